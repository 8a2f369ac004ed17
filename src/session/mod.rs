pub mod classifier;
pub mod controller;
pub mod models;

pub use classifier::{GenerationOutcome, KeywordClassifier, OutcomeClassifier};
pub use controller::LinkController;
pub use models::{GenerationState, LinkSession, LinkStatus};

use crate::serial::{ConnectionError, TransmitError};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Breadboard controller not connected")]
    NotConnected,

    #[error("No circuit structure to generate")]
    EmptyStructure,

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Transmit error: {0}")]
    Transmit(#[from] TransmitError),
}

pub type Result<T> = std::result::Result<T, SessionError>;
