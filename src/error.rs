// ─────────────────────────────────────────────────────────────────────────────
//  openshock-autoflasher :: error
// ─────────────────────────────────────────────────────────────────────────────

use thiserror::Error;

use crate::esptool::FlashStage;

#[derive(Debug, Error)]
pub enum FlashError {
    #[error("Request to {url} failed: {reason}")]
    Network { url: String, reason: String },

    #[error("{0}")]
    Integrity(String),

    #[error("{0}")]
    Configuration(String),

    #[error("{stage} failed{}:\n{output}", exit_suffix(.code))]
    FlashTool { stage: FlashStage, code: Option<i32>, output: String },

    #[error("Serial command execution failed: {0}")]
    Serial(String),

    #[error("Port detection error: {0}")]
    Enumeration(String),

    #[error("Could not write firmware image to {dir}: {source}")]
    Staging { dir: String, source: std::io::Error },

    #[error("Invalid config file {path}: {reason}")]
    Config { path: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FlashError {
    pub fn network(url: &str, reason: impl Into<String>) -> Self {
        FlashError::Network { url: url.to_owned(), reason: reason.into() }
    }
}

fn exit_suffix(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!(" (exit code {})", c),
        None    => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, FlashError>;
