//! Error type shared by the discovery methods

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("`{program}` exited unsuccessfully: {stderr}")]
    CommandFailed { program: String, stderr: String },
    #[error("`{program}` timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },
    #[error("Tool not available: {0}")]
    ToolUnavailable(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("Failed to parse device description: {0}")]
    XmlError(#[from] quick_xml::DeError),
    #[error("Invalid device description: {0}")]
    InvalidDescription(String),
    #[error("Invalid network prefix {prefix:?}: {reason}")]
    InvalidPrefix { prefix: String, reason: String },
}

pub type Result<T> = std::result::Result<T, DiscoveryError>;
