//! Error types and process exit codes.
//!
//! Each boundary gets its own error enum; [`MailerError`] gathers them for the
//! command line and decides which exit code a failure maps to.

use std::path::PathBuf;

use thiserror::Error;

use crate::auth::AuthError;
use crate::batch::BatchAborted;

/// Process exit codes.
pub mod exit_code {
    pub const SUCCESS: u8 = 0;
    pub const MISSING_INPUT: u8 = 1;
    pub const RATE_LIMITED: u8 = 2;
    pub const FILE_ERROR: u8 = 3;
    pub const UNEXPECTED: u8 = 4;
}

/// Failure to load a recipient table.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Unsupported file format: {0}. Only CSV and Excel (.xlsx) are supported.")]
    Unsupported(String),

    #[error("Error reading file: {0}")]
    Malformed(String),

    #[error("Required column '{0}' not found in file")]
    MissingColumn(String),
}

/// Failure to persist a recipient table.
#[derive(Debug, Error)]
pub enum SaveError {
    #[error("Failed to save file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write CSV {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Failed to write workbook {}: {source}", path.display())]
    Excel {
        path: PathBuf,
        #[source]
        source: rust_xlsxwriter::XlsxError,
    },
}

/// Top-level error for a batch run.
#[derive(Debug, Error)]
pub enum MailerError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Could not read body template {}: {source}", path.display())]
    BodyTemplate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Save(#[from] SaveError),

    #[error(transparent)]
    Aborted(#[from] BatchAborted),
}

impl MailerError {
    pub fn exit_code(&self) -> u8 {
        match self {
            MailerError::MissingInput(_) => exit_code::MISSING_INPUT,
            MailerError::Auth(AuthError::MissingCredentials(_)) => exit_code::MISSING_INPUT,
            MailerError::Auth(AuthError::Failed(_)) => exit_code::UNEXPECTED,
            MailerError::BodyTemplate { .. } | MailerError::Load(_) | MailerError::Save(_) => {
                exit_code::FILE_ERROR
            }
            MailerError::Aborted(_) => exit_code::UNEXPECTED,
        }
    }
}
