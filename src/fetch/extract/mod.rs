//! Streaming archive extraction / 流式解压
//!
//! - types.rs: format and entry types
//! - utils.rs: magic sniffing, path sanitizing, error mapping
//! - extractors.rs: zip / tar / tar.gz extraction
//! - zip_stream.rs: zip local headers, data descriptors, central directory

pub mod extractors;
pub mod types;
pub mod utils;
pub mod zip_stream;

pub use extractors::extract_archive;
pub use types::{ArchiveEntry, ArchiveFormat, Compression, Container, EntryKind, ExtractStats};
