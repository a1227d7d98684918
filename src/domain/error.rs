use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid engine version `{version}`: {reason}")]
    InvalidVersion { version: String, reason: &'static str },
    #[error("{message}")]
    Validation { message: String },
}

impl DomainError {
    pub fn invalid_version(version: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidVersion {
            version: version.into(),
            reason,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}
