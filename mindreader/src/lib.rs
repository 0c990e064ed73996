//! Block-ingestion pipeline for a managed blockchain node.
//!
//! The node's console stream is parsed into blocks which the [`Archiver`]
//! stages as one-block files, merging historical ranges into fixed-size
//! bundles. [`FileUploader`]s sweep completed artifacts to remote object
//! storage, and the [`MindReaderPlugin`] orchestrates the whole flow:
//!
//! ```text
//! node stdout -> lines -> console reader -> blocks -> archiver -> stage dirs
//!                                                 \-> block stream server
//!                                          stage dirs -> uploader -> remote
//! ```

mod archiver;
mod archiver_io;
mod block_stream;
mod config;
mod console;
mod error;
mod plugin;
mod shutdown;
mod uploader;

pub use archiver::Archiver;
pub use archiver_io::{ArchiverIo, ArchiverStoreIo, IoError, ONE_BLOCK_EXTENSION};
pub use block_stream::BlockStreamServer;
pub use config::MindReaderConfig;
pub use console::{ConsoleReader, ConsoleReaderFactory, ReadError};
pub use error::{Error, Result};
pub use plugin::{HeadBlockUpdate, MindReaderPlugin, OnShutdown, PluginStores};
pub use shutdown::Shutdown;
pub use uploader::{FileUploader, FileUploaderConfig};
