use std::error::Error as StdError;
use std::fmt;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, ClassifierError>;

#[derive(Debug)]
pub enum ClassifierError {
    InvalidArgument {
        message: String,
        parameter: String,
    },
    MissingFeature {
        feature: String,
        message: String,
    },
    ModelError {
        message: String,
        source: Option<Box<dyn StdError + Send + Sync>>,
    },
    TokenizerError {
        message: String,
        source: Option<Box<dyn StdError + Send + Sync>>,
    },
    DownloadError {
        repo: String,
        message: String,
        source: Option<Box<dyn StdError + Send + Sync>>,
    },
    DeviceError {
        message: String,
    },
    IoError {
        path: Option<PathBuf>,
        source: std::io::Error,
    },
    SerializationError {
        message: String,
        source: Option<Box<dyn StdError + Send + Sync>>,
    },
}

impl ClassifierError {
    pub(crate) fn invalid_argument(parameter: &str, message: impl Into<String>) -> Self {
        ClassifierError::InvalidArgument {
            message: message.into(),
            parameter: parameter.to_string(),
        }
    }

    pub(crate) fn model(message: impl Into<String>) -> Self {
        ClassifierError::ModelError {
            message: message.into(),
            source: None,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ClassifierError::IoError {
            path: Some(path.into()),
            source,
        }
    }

    /// Whether the error was caused by caller input rather than the runtime
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, ClassifierError::InvalidArgument { .. })
    }
}

impl fmt::Display for ClassifierError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassifierError::InvalidArgument { message, parameter } => {
                write!(f, "Invalid argument {}: {}", parameter, message)
            }
            ClassifierError::MissingFeature { feature, message } => {
                write!(f, "Missing optional feature '{}': {}", feature, message)
            }
            ClassifierError::ModelError { message, .. } => {
                write!(f, "Model error: {}", message)
            }
            ClassifierError::TokenizerError { message, .. } => {
                write!(f, "Tokenizer error: {}", message)
            }
            ClassifierError::DownloadError { repo, message, .. } => {
                write!(f, "Failed to fetch '{}': {}", repo, message)
            }
            ClassifierError::DeviceError { message } => {
                write!(f, "Device error: {}", message)
            }
            ClassifierError::IoError { path: Some(path), source } => {
                write!(f, "I/O error on {}: {}", path.display(), source)
            }
            ClassifierError::IoError { path: None, source } => {
                write!(f, "I/O error: {}", source)
            }
            ClassifierError::SerializationError { message, .. } => {
                write!(f, "Serialization error: {}", message)
            }
        }
    }
}

impl StdError for ClassifierError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ClassifierError::ModelError { source, .. }
            | ClassifierError::TokenizerError { source, .. }
            | ClassifierError::DownloadError { source, .. }
            | ClassifierError::SerializationError { source, .. } => {
                source.as_ref().map(|s| s.as_ref() as &(dyn StdError + 'static))
            }
            ClassifierError::IoError { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<candle_core::Error> for ClassifierError {
    fn from(e: candle_core::Error) -> Self {
        ClassifierError::ModelError {
            message: e.to_string(),
            source: Some(Box::new(e)),
        }
    }
}

impl From<std::io::Error> for ClassifierError {
    fn from(e: std::io::Error) -> Self {
        ClassifierError::IoError { path: None, source: e }
    }
}

impl From<serde_json::Error> for ClassifierError {
    fn from(e: serde_json::Error) -> Self {
        ClassifierError::SerializationError {
            message: e.to_string(),
            source: Some(Box::new(e)),
        }
    }
}
