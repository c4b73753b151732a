use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;
mod eid;
mod face;
mod gallery;
mod images;
mod storage;
#[cfg(test)]
mod tests;

use config::Config;
use gallery::{RecognitionError, RecognitionService, RegistrationError, VerifyPolicy};
use storage::EnrollmentStorage;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();

    let mut config = Config::load()?;
    if let Some(backend) = args.backend {
        config.backend = backend;
    }
    let database = args
        .database
        .clone()
        .unwrap_or_else(|| config.database_path());

    let pipeline = face::load_pipeline(&config)?;
    let enrollment =
        EnrollmentStorage::with_extensions(database, config.image_extensions.iter().cloned());
    let service = RecognitionService::new(pipeline, enrollment, config.verify_policy)
        .with_enroll_margin(config.enroll_margin);

    match args.command {
        cli::Command::Register { name, images } => register(&service, &name, &images),
        cli::Command::Recognize {
            policy,
            output,
            images,
        } => recognize(&service, policy, output.as_deref(), &images),
        cli::Command::List {} => {
            let identities = service.identities()?;
            println!("{}", serde_json::to_string_pretty(&identities)?);
            Ok(())
        }
    }
}

fn register(service: &RecognitionService, name: &str, paths: &[PathBuf]) -> anyhow::Result<()> {
    let mut saved = 0;
    for path in paths {
        let frame = images::load_frame(path)?;
        match service.enroll(name, &frame) {
            Ok(enrollment) => match enrollment.path {
                Some(file) => {
                    println!("{}: saved {}", path.display(), file.display());
                    saved += 1;
                }
                None => println!("{}: no face detected", path.display()),
            },
            Err(RecognitionError::Registration(RegistrationError::AmbiguousEnrollment {
                faces,
            })) => {
                println!(
                    "{}: {faces} faces detected, registration needs exactly one",
                    path.display()
                );
            }
            Err(e) => return Err(e.into()),
        }
    }

    println!("{saved}/{} images enrolled under '{name}'", paths.len());

    if service.is_stale() {
        if let Some(report) = service.ensure_built()? {
            println!(
                "Gallery rebuilt: {} identities, {} samples",
                report.identities, report.samples
            );
        }
    }
    Ok(())
}

#[derive(serde::Serialize)]
struct RecognizedImage {
    image: PathBuf,
    matches: Vec<gallery::FaceMatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    annotated: Option<PathBuf>,
}

fn recognize(
    service: &RecognitionService,
    policy: Option<VerifyPolicy>,
    output: Option<&Path>,
    paths: &[PathBuf],
) -> anyhow::Result<()> {
    log::info!(
        "Recognizing {} images against {:?} ({:?} policy)",
        paths.len(),
        service.enrollment().root,
        policy.unwrap_or(service.policy())
    );

    if let Some(report) = service.ensure_built()? {
        for name in &report.empty_identities {
            log::warn!("Identity '{name}' has no usable faces");
        }
    }

    if let Some(dir) = output {
        std::fs::create_dir_all(dir).with_context(|| format!("failed to create {dir:?}"))?;
    }

    let mut results = Vec::with_capacity(paths.len());
    for path in paths {
        let frame = images::load_frame(path)?;
        let recognition = service.recognize_frame(&frame, policy)?;

        let annotated = match output {
            Some(dir) => {
                let file_name = path
                    .file_stem()
                    .map(|stem| format!("{}.png", stem.to_string_lossy()))
                    .context("image path has no file name")?;
                let target = dir.join(file_name);
                std::fs::write(&target, images::encode_png(&recognition.frame)?)
                    .with_context(|| format!("failed to write {target:?}"))?;
                Some(target)
            }
            None => None,
        };

        results.push(RecognizedImage {
            image: path.clone(),
            matches: recognition.matches,
            annotated,
        });
    }

    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}
