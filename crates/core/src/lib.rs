pub mod cache;
pub mod config;
pub mod detect;
pub mod encoding;
pub mod error;
pub mod filter;
pub mod natural;
pub mod reader;
pub mod readers;
pub mod security;
pub mod zip_strategy;

pub mod prelude {
    pub use crate::detect::ArchiveKind;
    pub use crate::error::*;
    pub use crate::reader::{BookInfo, BookReader};
    pub use crate::readers::{PagedReader, ReaderOptions};
}
