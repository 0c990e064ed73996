/// Pipeline errors. Clonable so the first error can be both recorded on the
/// shutdown signal and handed to the shutdown callback.
#[derive(Debug, Clone)]
pub enum Error {
    Config(String),
    Storage(String),
    Reader(String),
    BlockStream(String),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Config(msg) => write!(f, "configuration error: {}", msg),
            Error::Storage(msg) => write!(f, "storage error: {}", msg),
            Error::Reader(msg) => write!(f, "console reader error: {}", msg),
            Error::BlockStream(msg) => write!(f, "block stream error: {}", msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
