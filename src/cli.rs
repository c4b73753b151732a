use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::face::DetectorBackend;
use crate::gallery::VerifyPolicy;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Enrollment directory (overrides `database` in config.yaml)
    #[clap(long, global = true)]
    pub database: Option<PathBuf>,

    /// Face detector backend (overrides `backend` in config.yaml)
    #[clap(long, value_enum, global = true)]
    pub backend: Option<DetectorBackend>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Register the face found in each image under an identity
    Register {
        /// Identity to enroll the faces under
        #[clap(short, long)]
        name: String,

        /// Images holding exactly one face each
        #[clap(required = true)]
        images: Vec<PathBuf>,
    },

    /// Recognize every face in each image and print the matches as JSON
    Recognize {
        /// Verification policy (overrides `verify_policy` in config.yaml)
        #[clap(long, value_enum)]
        policy: Option<VerifyPolicy>,

        /// Write annotated frames into this directory
        #[clap(short, long)]
        output: Option<PathBuf>,

        #[clap(required = true)]
        images: Vec<PathBuf>,
    },

    /// List enrolled identities and their sample counts
    List {},
}
