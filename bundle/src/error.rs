#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    InvalidFileName { name: String, reason: String },
    InvalidSuffix(String),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidFileName { name, reason } => {
                write!(f, "invalid one-block file name {:?}: {}", name, reason)
            }
            Error::InvalidSuffix(suffix) => {
                write!(f, "one-block suffix contains invalid characters: {:?}", suffix)
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
