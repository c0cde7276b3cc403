//! # Remote Scoring Service Client
//!
//! Everything needed to talk to the speech-evaluation service:
//! - **signature**: Time-bound SHA-1 signatures derived from the key pair
//! - **envelope**: The signed `connect` + `start` handshake document
//! - **dispatcher**: The multipart HTTPS request carrying envelope and audio

pub mod dispatcher;
pub mod envelope;
pub mod signature;

pub use dispatcher::EvaluationDispatcher;
pub use envelope::{AudioFormat, ScoringParameters, SessionEnvelopeBuilder};
pub use signature::Credentials;
