//! Identity gallery and nearest-match engine.
//!
//! # Architecture
//!
//! - `store`: per-identity sample vectors, their mean, and the validity flag
//! - `builder`: rebuilds the store from the enrollment directory when stale
//! - `matcher`: cosine-similarity matching under a verification policy
//! - `registration`: single-face capture that marks the store stale
//! - `service`: lock-guarded facade tying the pieces together

pub mod builder;
pub mod matcher;
pub mod registration;
mod service;
pub mod store;

pub use matcher::VerifyPolicy;
pub use registration::RegistrationError;
pub use service::{FaceMatch, RecognitionError, RecognitionService, DEFAULT_ENROLL_MARGIN};
