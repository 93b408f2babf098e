use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use super::types::Magic;
use crate::fetch::error::FetchError;
use crate::fetch::pipe::upstream_failure;

/// Bytes needed to recognize every supported magic (tar magic sits at 257).
pub const SNIFF_LEN: usize = 512;

/// Identify a stream from its leading bytes / 根据头部字节识别格式
pub fn detect_magic(head: &[u8]) -> Magic {
    if head.starts_with(b"PK\x03\x04") {
        return Magic::Zip;
    }
    if head.starts_with(&[0x1f, 0x8b]) {
        return Magic::Gzip;
    }
    if head.starts_with(b"BZh") {
        return Magic::Bzip2;
    }
    if head.starts_with(&[0xfd, b'7', b'z', b'X', b'Z', 0x00]) {
        return Magic::Xz;
    }
    if head.starts_with(&[0x28, 0xb5, 0x2f, 0xfd]) {
        return Magic::Zstd;
    }
    if head.starts_with(&[b'7', b'z', 0xbc, 0xaf, 0x27, 0x1c]) {
        return Magic::SevenZip;
    }
    // POSIX "ustar\0" and GNU "ustar  " both start with "ustar".
    if head.len() >= 262 && &head[257..262] == b"ustar" {
        return Magic::Tar;
    }
    Magic::Unknown
}

/// Read up to `len` bytes and hand back a reader that replays them.
/// 预读头部字节，并返回可重放的读取器
pub fn peek_head<R: Read>(
    mut reader: R,
    len: usize,
) -> io::Result<(Vec<u8>, io::Chain<io::Cursor<Vec<u8>>, R>)> {
    let mut head = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        match reader.read(&mut head[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    head.truncate(filled);
    let replay = io::Cursor::new(head.clone()).chain(reader);
    Ok((head, replay))
}

/// Lexically resolve an entry name below the destination root.
/// 词法规范化条目路径，拒绝逃逸出根目录的路径
///
/// Returns the relative path (empty for the root itself). Absolute names,
/// drive prefixes and `..` segments that climb above the root are rejected.
pub fn sanitize_entry_path(name: &str) -> Result<PathBuf, FetchError> {
    let rejected = || FetchError::PathTraversalRejected {
        entry: name.to_string(),
    };

    let normalized = name.replace('\\', "/");
    if normalized.starts_with('/') {
        return Err(rejected());
    }

    let mut parts: Vec<&str> = Vec::new();
    for part in normalized.split('/') {
        match part {
            "" | "." => continue,
            ".." => {
                if parts.pop().is_none() {
                    return Err(rejected());
                }
            }
            _ => {
                let mut components = Path::new(part).components();
                match (components.next(), components.next()) {
                    (Some(Component::Normal(_)), None) => parts.push(part),
                    _ => return Err(rejected()),
                }
            }
        }
    }

    Ok(parts.iter().collect())
}

/// Map a read error on the archive stream / 映射归档读取错误
pub fn classify_read_error(err: io::Error, context: &str) -> FetchError {
    if let Some(message) = upstream_failure(&err) {
        return FetchError::Upstream(message);
    }
    match err.kind() {
        io::ErrorKind::UnexpectedEof => {
            FetchError::CorruptArchive(format!("{}: archive stream truncated", context))
        }
        _ => FetchError::CorruptArchive(format!("{}: {}", context, err)),
    }
}

/// 格式化文件大小
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{}B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1}KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1}MB", bytes as f64 / 1024.0 / 1024.0)
    } else {
        format!("{:.2}GB", bytes as f64 / 1024.0 / 1024.0 / 1024.0)
    }
}
