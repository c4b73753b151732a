use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::face::DetectorBackend;
use crate::gallery::{VerifyPolicy, DEFAULT_ENROLL_MARGIN};
use crate::storage::DEFAULT_EXTENSIONS;

const CONFIG_FILE: &str = "config.yaml";

/// Extractor input edge length (ArcFace expects 112x112)
const DEFAULT_INPUT_SIZE: u32 = 112;

const DEFAULT_RETINA_MODEL: &str = "retinaface_mobile0.25.onnx";
const DEFAULT_CASCADE_MODEL: &str = "version-RFB-320.onnx";
const DEFAULT_ARCFACE_MODEL: &str = "w600k_r50.onnx";
const DEFAULT_RETINA_THRESHOLD: f32 = 0.5;
const DEFAULT_CASCADE_THRESHOLD: f32 = 0.7;
const DEFAULT_NMS_THRESHOLD: f32 = 0.4;
const DEFAULT_DETECTOR_INPUT_SIZE: u32 = 640;

/// Model files and detection tuning
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Directory holding the ONNX files. Empty means `<base>/models`.
    #[serde(default)]
    pub dir: String,

    #[serde(default = "default_retina_model")]
    pub retina: String,

    #[serde(default = "default_cascade_model")]
    pub cascade: String,

    #[serde(default = "default_arcface_model")]
    pub arcface: String,

    /// Minimum face confidence for the retina backend [0.0, 1.0]
    #[serde(default = "default_retina_threshold")]
    pub retina_threshold: f32,

    /// Minimum face confidence for the opencv backend [0.0, 1.0]
    #[serde(default = "default_cascade_threshold")]
    pub cascade_threshold: f32,

    /// IoU above which overlapping detections are merged
    #[serde(default = "default_nms_threshold")]
    pub nms_threshold: f32,

    /// Square input size of the retina detector
    #[serde(default = "default_detector_input_size")]
    pub detector_input_size: u32,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            dir: String::new(),
            retina: DEFAULT_RETINA_MODEL.to_string(),
            cascade: DEFAULT_CASCADE_MODEL.to_string(),
            arcface: DEFAULT_ARCFACE_MODEL.to_string(),
            retina_threshold: DEFAULT_RETINA_THRESHOLD,
            cascade_threshold: DEFAULT_CASCADE_THRESHOLD,
            nms_threshold: DEFAULT_NMS_THRESHOLD,
            detector_input_size: DEFAULT_DETECTOR_INPUT_SIZE,
        }
    }
}

fn default_retina_model() -> String {
    DEFAULT_RETINA_MODEL.to_string()
}

fn default_cascade_model() -> String {
    DEFAULT_CASCADE_MODEL.to_string()
}

fn default_arcface_model() -> String {
    DEFAULT_ARCFACE_MODEL.to_string()
}

fn default_retina_threshold() -> f32 {
    DEFAULT_RETINA_THRESHOLD
}

fn default_cascade_threshold() -> f32 {
    DEFAULT_CASCADE_THRESHOLD
}

fn default_nms_threshold() -> f32 {
    DEFAULT_NMS_THRESHOLD
}

fn default_detector_input_size() -> u32 {
    DEFAULT_DETECTOR_INPUT_SIZE
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Enrollment root. Empty means `<base>/database`.
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub backend: DetectorBackend,
    #[serde(default)]
    pub verify_policy: VerifyPolicy,
    #[serde(default = "default_input_size")]
    pub input_size: u32,
    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,
    /// Margin around a registered face saved for enrollment, as a fraction
    /// of the face size
    #[serde(default = "default_enroll_margin")]
    pub enroll_margin: f32,
    #[serde(default)]
    pub models: ModelsConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: String::new(),
            backend: DetectorBackend::default(),
            verify_policy: VerifyPolicy::default(),
            input_size: DEFAULT_INPUT_SIZE,
            image_extensions: default_image_extensions(),
            enroll_margin: DEFAULT_ENROLL_MARGIN,
            models: ModelsConfig::default(),
            base_path: PathBuf::new(),
        }
    }
}

fn default_input_size() -> u32 {
    DEFAULT_INPUT_SIZE
}

fn default_image_extensions() -> Vec<String> {
    DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect()
}

fn default_enroll_margin() -> f32 {
    DEFAULT_ENROLL_MARGIN
}

/// Base directory for config, models and the default database:
/// `FACEMATCH_BASE_PATH`, or `~/.local/share/facematch`.
pub fn base_path() -> anyhow::Result<PathBuf> {
    if let Ok(path) = std::env::var("FACEMATCH_BASE_PATH") {
        return Ok(PathBuf::from(path));
    }

    let home = homedir::my_home()
        .map_err(|e| anyhow::anyhow!("couldnt find home dir: {e:?}"))?
        .context("couldnt find home dir")?;
    Ok(home.join(".local/share/facematch"))
}

impl Config {
    fn validate(&self) -> anyhow::Result<()> {
        if self.input_size == 0 {
            bail!("input_size must be greater than 0");
        }

        if self.image_extensions.is_empty() {
            bail!("image_extensions must not be empty");
        }

        if !(0.0..=1.0).contains(&self.enroll_margin) {
            bail!(
                "enroll_margin must be between 0.0 and 1.0, got {}",
                self.enroll_margin
            );
        }

        let models = &self.models;
        for (name, value) in [
            ("models.retina_threshold", models.retina_threshold),
            ("models.cascade_threshold", models.cascade_threshold),
            ("models.nms_threshold", models.nms_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                bail!("{name} must be between 0.0 and 1.0, got {value}");
            }
        }

        if models.detector_input_size == 0 {
            bail!("models.detector_input_size must be greater than 0");
        }

        Ok(())
    }

    pub fn load() -> anyhow::Result<Self> {
        Self::load_with(&base_path()?)
    }

    /// Load `config.yaml` from `base_path`, creating it with defaults when
    /// missing.
    pub fn load_with(base_path: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(base_path)
            .with_context(|| format!("failed to create {base_path:?}"))?;
        let config_path = base_path.join(CONFIG_FILE);

        // create new if does not exist
        if !config_path.exists() {
            write_atomic(&config_path, &serde_yml::to_string(&Self::default())?)?;
        }

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("failed to read {config_path:?}"))?;
        let mut config: Self =
            serde_yml::from_str(&config_str).context("config is malformed")?;

        config.base_path = base_path.to_path_buf();

        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_str = serde_yml::to_string(&self)?;
        write_atomic(&self.base_path.join(CONFIG_FILE), &config_str)
    }

    /// Enrollment root directory
    pub fn database_path(&self) -> PathBuf {
        if self.database.is_empty() {
            self.base_path.join("database")
        } else {
            self.base_path.join(&self.database)
        }
    }

    pub fn models_dir(&self) -> PathBuf {
        if self.models.dir.is_empty() {
            self.base_path.join("models")
        } else {
            self.base_path.join(&self.models.dir)
        }
    }

    pub fn model_path(&self, file: &str) -> PathBuf {
        self.models_dir().join(file)
    }
}

fn write_atomic(path: &Path, contents: &str) -> anyhow::Result<()> {
    let temp_path = path.with_extension("tmp");
    std::fs::write(&temp_path, contents)
        .with_context(|| format!("failed to write {temp_path:?}"))?;
    std::fs::rename(&temp_path, path).with_context(|| format!("failed to write {path:?}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_creates_default_config() {
        let tmp = tempfile::tempdir().unwrap();

        let config = Config::load_with(tmp.path()).unwrap();

        assert!(tmp.path().join(CONFIG_FILE).exists());
        assert_eq!(config.backend, DetectorBackend::Retina);
        assert_eq!(config.verify_policy, VerifyPolicy::PerSample);
        assert_eq!(config.input_size, 112);
        assert_eq!(config.image_extensions, vec!["png", "jpg"]);
        assert_eq!(config.database_path(), tmp.path().join("database"));
        assert_eq!(
            config.model_path("w600k_r50.onnx"),
            tmp.path().join("models").join("w600k_r50.onnx")
        );
    }

    #[test]
    fn test_partial_config_filled_with_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join(CONFIG_FILE),
            "backend: opencv\nverify_policy: mean\ndatabase: /srv/faces\n",
        )
        .unwrap();

        let config = Config::load_with(tmp.path()).unwrap();

        assert_eq!(config.backend, DetectorBackend::Opencv);
        assert_eq!(config.verify_policy, VerifyPolicy::Mean);
        assert_eq!(config.database_path(), PathBuf::from("/srv/faces"));
        assert_eq!(config.models, ModelsConfig::default());

        // upgraded file now carries every key
        let saved = std::fs::read_to_string(tmp.path().join(CONFIG_FILE)).unwrap();
        assert!(saved.contains("input_size"));
        assert!(saved.contains("nms_threshold"));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(CONFIG_FILE), "input_size: 0\n").unwrap();
        assert!(Config::load_with(tmp.path()).is_err());

        std::fs::write(
            tmp.path().join(CONFIG_FILE),
            "models:\n  nms_threshold: 1.5\n",
        )
        .unwrap();
        assert!(Config::load_with(tmp.path()).is_err());
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(CONFIG_FILE), "backend: dlib\n").unwrap();
        assert!(Config::load_with(tmp.path()).is_err());
    }
}
