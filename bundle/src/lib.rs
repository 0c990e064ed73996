mod bundler;
mod error;
mod one_block_file;

pub use bundler::Bundler;
pub use error::{Error, Result};
pub use one_block_file::{validate_one_block_suffix, OneBlockFile};
