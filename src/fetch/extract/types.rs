use std::fmt;

use serde::Serialize;

/// Archive container / 归档容器格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    Zip,
    Tar,
}

/// Stream compression wrapping the container / 外层压缩格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    Gzip,
}

/// Supported archive formats, identified from leading bytes / 支持的压缩格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ArchiveFormat {
    pub container: Container,
    pub compression: Compression,
}

impl ArchiveFormat {
    pub const ZIP: ArchiveFormat = ArchiveFormat {
        container: Container::Zip,
        compression: Compression::None,
    };
    pub const TAR: ArchiveFormat = ArchiveFormat {
        container: Container::Tar,
        compression: Compression::None,
    };
    pub const TAR_GZ: ArchiveFormat = ArchiveFormat {
        container: Container::Tar,
        compression: Compression::Gzip,
    };
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let container = match self.container {
            Container::Zip => "zip",
            Container::Tar => "tar",
        };
        match self.compression {
            Compression::None => f.write_str(container),
            Compression::Gzip => write!(f, "{}+gzip", container),
        }
    }
}

/// Magic numbers recognized at the head of a stream / 流头部魔数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Magic {
    Zip,
    Tar,
    Gzip,
    Bzip2,
    Xz,
    Zstd,
    SevenZip,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    Hardlink,
}

/// One archive record, read lazily and never retained / 归档条目
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub name: String,
    pub mode: u32,
    pub kind: EntryKind,
    pub link_target: Option<String>,
    /// Declared size, unknown until the data descriptor for streamed zips
    pub size: Option<u64>,
}

/// Extraction summary / 解压统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExtractStats {
    pub entries: u64,
    pub files: u64,
    pub directories: u64,
    pub links: u64,
    pub bytes: u64,
}
