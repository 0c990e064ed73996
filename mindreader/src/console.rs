use async_trait::async_trait;
use tokio::sync::mpsc;

use common::Block;

use crate::error::Error;

/// Why a console read ended.
#[derive(Debug, Clone)]
pub enum ReadError {
    /// The lines channel closed and every buffered line was consumed.
    /// Orderly end of stream, not a failure.
    Eof,
    Fatal(String),
}

impl std::error::Error for ReadError {}

impl std::fmt::Display for ReadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadError::Eof => write!(f, "end of console stream"),
            ReadError::Fatal(msg) => write!(f, "console read failed: {}", msg),
        }
    }
}

/// Source-specific parser turning the node's console lines into blocks.
///
/// Implementations own the lines receiver handed to the factory and must
/// keep consuming it until it closes; a reader that stops pulling lines
/// back-pressures all the way into the node's stdout.
#[async_trait]
pub trait ConsoleReader: Send {
    async fn read_block(&mut self) -> std::result::Result<Block, ReadError>;
}

/// Builds the console reader over the plugin-owned lines channel at launch.
pub type ConsoleReaderFactory =
    Box<dyn FnOnce(mpsc::Receiver<String>) -> std::result::Result<Box<dyn ConsoleReader>, Error> + Send>;
