use std::fs;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tokio_util::sync::CancellationToken;
use zip::result::ZipError;

use super::types::{ArchiveEntry, ArchiveFormat, EntryKind, ExtractStats, Magic};
use super::utils::{classify_read_error, detect_magic, format_size, peek_head, sanitize_entry_path, SNIFF_LEN};
use super::zip_stream::{
    has_zip64_extra, read_u32, read_vec, CentralRecord, DescribedEntry, LocalHeader, CENTRAL_HEADER_SIG,
    END_SIGS, LOCAL_HEADER_SIG, METHOD_DEFLATE,
};
use crate::fetch::error::FetchError;

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;
const DEFAULT_FILE_MODE: u32 = 0o644;
const DIR_MODE: u32 = 0o755;
const MAX_LINK_TARGET: u64 = 4096;
const COPY_CHUNK: usize = 64 * 1024;
const TAR_BLOCK: usize = 512;

/// 流式解压归档到目标目录（同步，在 spawn_blocking 中调用）
///
/// The format is sniffed from the leading bytes, never from the object key.
/// Entries are written as they are read, and the source is drained to EOF
/// after the archive's end record so a truncated or failed stream is never
/// mistaken for a complete archive.
pub fn extract_archive<R: Read>(
    source: R,
    destination_root: &Path,
    cancel: &CancellationToken,
) -> Result<ExtractStats, FetchError> {
    check_cancelled(cancel)?;
    create_dir_with_mode(destination_root)?;
    let mut writer = EntryWriter::new(destination_root, cancel);

    let (head, reader) =
        peek_head(source, SNIFF_LEN).map_err(|e| classify_read_error(e, "archive header"))?;
    if head.is_empty() {
        return Err(FetchError::CorruptArchive("empty archive stream".to_string()));
    }

    let format = match detect_magic(&head) {
        Magic::Zip => {
            let mut rest = extract_zip(reader, &mut writer)?;
            drain(&mut rest)?;
            ArchiveFormat::ZIP
        }
        Magic::Tar => {
            let mut rest = extract_tar(reader, &mut writer)?;
            finish_tar(&mut rest)?;
            drain(&mut rest)?;
            ArchiveFormat::TAR
        }
        Magic::Gzip => {
            let (inner_head, inner) = peek_head(GzDecoder::new(reader), SNIFF_LEN)
                .map_err(|e| classify_read_error(e, "gzip header"))?;
            if detect_magic(&inner_head) != Magic::Tar {
                return Err(FetchError::UnsupportedArchiveFormat(
                    "gzip stream does not wrap a tar archive".to_string(),
                ));
            }
            let mut rest = extract_tar(inner, &mut writer)?;
            finish_tar(&mut rest)?;
            // Finish the gzip member (trailer CRC), then whatever follows it.
            let (_, mut decoder) = rest.into_inner();
            drain(&mut decoder)?;
            drain(&mut decoder.into_inner())?;
            ArchiveFormat::TAR_GZ
        }
        Magic::Bzip2 => return Err(unsupported("bzip2 compression")),
        Magic::Xz => return Err(unsupported("xz compression")),
        Magic::Zstd => return Err(unsupported("zstd compression")),
        Magic::SevenZip => return Err(unsupported("7z archive")),
        Magic::Unknown => {
            let prefix: String = head.iter().take(8).map(|b| format!("{:02x}", b)).collect();
            return Err(FetchError::UnsupportedArchiveFormat(format!(
                "unrecognized leading bytes {}",
                prefix
            )));
        }
    };

    let stats = writer.stats;
    tracing::info!(
        "Extracted {} archive into {:?}: {} entries, {} files, {}",
        format,
        destination_root,
        stats.entries,
        stats.files,
        format_size(stats.bytes)
    );
    Ok(stats)
}

fn check_cancelled(cancel: &CancellationToken) -> Result<(), FetchError> {
    if cancel.is_cancelled() {
        return Err(FetchError::Cancelled);
    }
    Ok(())
}

fn unsupported(what: &str) -> FetchError {
    FetchError::UnsupportedArchiveFormat(what.to_string())
}

fn zip_error(err: ZipError) -> FetchError {
    match err {
        ZipError::Io(e) => classify_read_error(e, "zip entry"),
        other => match &other {
            ZipError::UnsupportedArchive(_) => FetchError::UnsupportedArchiveFormat(other.to_string()),
            _ => FetchError::CorruptArchive(other.to_string()),
        },
    }
}

fn drain<R: Read>(reader: &mut R) -> Result<u64, FetchError> {
    io::copy(reader, &mut io::sink()).map_err(|e| classify_read_error(e, "trailing data"))
}

fn read_signature<R: Read>(reader: &mut R, context: &str) -> Result<u32, FetchError> {
    read_u32(reader).map_err(|e| classify_read_error(e, context))
}

/// 解压 ZIP（流式，只读本地文件头）
///
/// Entries are written from their local headers. The central directory that
/// follows the last entry is then read for unix modes and symlinks, and the
/// archive only counts as complete once its end record is reached.
fn extract_zip<R: Read>(reader: R, writer: &mut EntryWriter<'_>) -> Result<BufReader<R>, FetchError> {
    let mut reader = BufReader::with_capacity(COPY_CHUNK, reader);

    let mut signature = read_signature(&mut reader, "zip local header")?;
    while signature == LOCAL_HEADER_SIG {
        writer.check_cancelled()?;
        let header = LocalHeader::read_after_signature(&mut reader)
            .map_err(|e| classify_read_error(e, "zip local header"))?;
        if header.uses_descriptor() {
            extract_described(header, &mut reader, writer)?;
        } else {
            extract_sized(header, &mut reader, writer)?;
        }
        signature = read_signature(&mut reader, "zip record")?;
    }

    if signature != CENTRAL_HEADER_SIG && !END_SIGS.contains(&signature) {
        return Err(FetchError::CorruptArchive(format!(
            "unexpected zip record signature {:08x}",
            signature
        )));
    }
    while signature == CENTRAL_HEADER_SIG {
        let record = CentralRecord::read_after_signature(&mut reader)
            .map_err(|e| classify_read_error(e, "zip central directory"))?;
        writer.apply_zip_attributes(&record)?;
        signature = read_signature(&mut reader, "zip central directory")?;
    }
    if !END_SIGS.contains(&signature) {
        return Err(FetchError::CorruptArchive(
            "zip end of central directory missing".to_string(),
        ));
    }
    Ok(reader)
}

/// Entry whose sizes sit in the local header / 本地头带大小的条目
fn extract_sized<R: Read>(
    header: LocalHeader,
    reader: &mut R,
    writer: &mut EntryWriter<'_>,
) -> Result<(), FetchError> {
    let mut replay = io::Cursor::new(header.into_bytes()).chain(reader);
    let mut file = match zip::read::read_zipfile_from_stream(&mut replay) {
        Ok(Some(file)) => file,
        Ok(None) => return Err(FetchError::CorruptArchive("zip local header expected".to_string())),
        Err(e) => return Err(zip_error(e)),
    };

    let entry = ArchiveEntry {
        name: file.name().to_string(),
        mode: 0,
        kind: if file.is_dir() { EntryKind::Directory } else { EntryKind::File },
        link_target: None,
        size: Some(file.size()),
    };
    writer.apply(&entry, &mut file)?;
    // Whatever apply left unread (directory payloads) before the next header.
    io::copy(&mut file, &mut io::sink()).map_err(|e| classify_read_error(e, &entry.name))?;
    Ok(())
}

/// Entry followed by a data descriptor / 带数据描述符的条目
///
/// Only deflate marks its own end. A stored entry with a descriptor cannot
/// be delimited without the central directory.
fn extract_described<R: BufRead>(
    header: LocalHeader,
    reader: &mut R,
    writer: &mut EntryWriter<'_>,
) -> Result<(), FetchError> {
    let name = read_vec(reader, header.name_len()).map_err(|e| classify_read_error(e, "zip local header"))?;
    let name = String::from_utf8_lossy(&name).into_owned();
    let extra = read_vec(reader, header.extra_len()).map_err(|e| classify_read_error(e, &name))?;

    if header.encrypted() {
        return Err(FetchError::UnsupportedArchiveFormat(format!("encrypted zip entry {:?}", name)));
    }
    if header.method() != METHOD_DEFLATE {
        return Err(FetchError::UnsupportedArchiveFormat(format!(
            "zip entry {:?}: compression method {} with a trailing data descriptor",
            name,
            header.method()
        )));
    }

    let mut content = DescribedEntry::new(reader, has_zip64_extra(&extra));
    let entry = ArchiveEntry {
        kind: if name.ends_with('/') { EntryKind::Directory } else { EntryKind::File },
        name,
        mode: 0,
        link_target: None,
        size: None,
    };
    writer.apply(&entry, &mut content)?;
    io::copy(&mut content, &mut io::sink()).map_err(|e| classify_read_error(e, &entry.name))?;
    Ok(())
}

/// 解压 TAR
fn extract_tar<R: Read>(reader: R, writer: &mut EntryWriter<'_>) -> Result<R, FetchError> {
    let mut archive = tar::Archive::new(reader);
    {
        let entries = archive
            .entries()
            .map_err(|e| classify_read_error(e, "tar header"))?;

        for entry in entries {
            writer.check_cancelled()?;
            let mut entry = entry.map_err(|e| classify_read_error(e, "tar header"))?;

            let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
            let entry_type = entry.header().entry_type();
            let kind = if entry_type.is_dir() {
                EntryKind::Directory
            } else if entry_type.is_symlink() {
                EntryKind::Symlink
            } else if entry_type.is_hard_link() {
                EntryKind::Hardlink
            } else if entry_type.is_file() {
                EntryKind::File
            } else {
                tracing::debug!("Skipping tar entry {:?} of type {:?}", name, entry_type);
                continue;
            };

            let size = entry
                .header()
                .size()
                .map_err(|e| classify_read_error(e, &name))?;
            let record = ArchiveEntry {
                link_target: entry
                    .link_name_bytes()
                    .map(|target| String::from_utf8_lossy(&target).into_owned()),
                mode: entry.header().mode().unwrap_or(0),
                size: Some(size),
                name,
                kind,
            };
            writer.apply(&record, &mut entry)?;
        }
    }
    Ok(archive.into_inner())
}

/// 校验 tar 结束标记
///
/// `tar` stops at the first zero block, or at a clean EOF on a block
/// boundary. Only the first is a complete archive, and the second zero block
/// of the end marker must follow it.
fn finish_tar<R: Read>(rest: &mut R) -> Result<(), FetchError> {
    let mut block = [0u8; TAR_BLOCK];
    let mut filled = 0;
    while filled < TAR_BLOCK {
        match rest.read(&mut block[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(classify_read_error(e, "tar end-of-archive marker")),
        }
    }
    if filled < TAR_BLOCK || block.iter().any(|b| *b != 0) {
        return Err(FetchError::CorruptArchive(
            "tar end-of-archive marker missing".to_string(),
        ));
    }
    Ok(())
}

/// Writes entries below the destination root / 写入条目
struct EntryWriter<'a> {
    root: &'a Path,
    cancel: &'a CancellationToken,
    stats: ExtractStats,
}

impl<'a> EntryWriter<'a> {
    fn new(root: &'a Path, cancel: &'a CancellationToken) -> Self {
        Self {
            root,
            cancel,
            stats: ExtractStats::default(),
        }
    }

    fn check_cancelled(&self) -> Result<(), FetchError> {
        check_cancelled(self.cancel)
    }

    fn apply(&mut self, entry: &ArchiveEntry, content: &mut dyn Read) -> Result<(), FetchError> {
        self.check_cancelled()?;
        let relative = sanitize_entry_path(&entry.name)?;
        self.stats.entries += 1;
        if relative.as_os_str().is_empty() {
            return Ok(());
        }
        self.reject_linked_ancestors(&relative, &entry.name)?;

        let target = self.root.join(&relative);
        tracing::debug!("Extracting {:?} ({:?}, {:?} bytes)", entry.name, entry.kind, entry.size);

        match entry.kind {
            EntryKind::Directory => {
                create_dir_with_mode(&target)?;
                self.stats.directories += 1;
            }
            EntryKind::File => {
                self.create_parent(&target)?;
                remove_if_link(&target)?;
                let written = self.write_file(&target, entry, content)?;
                self.stats.files += 1;
                self.stats.bytes += written;
            }
            EntryKind::Symlink => {
                let link_target = entry.link_target.as_deref().unwrap_or_default();
                self.create_parent(&target)?;
                remove_non_dir(&target)?;
                create_symlink(link_target, &target)?;
                self.stats.links += 1;
            }
            EntryKind::Hardlink => {
                let source_name = entry.link_target.as_deref().unwrap_or_default();
                let source_relative = sanitize_entry_path(source_name)?;
                self.reject_linked_ancestors(&source_relative, source_name)?;
                let source = self.root.join(&source_relative);
                self.create_parent(&target)?;
                remove_non_dir(&target)?;
                fs::hard_link(&source, &target).map_err(|e| FetchError::local_io(&target, &e))?;
                self.stats.links += 1;
            }
        }
        Ok(())
    }

    /// An earlier entry may have planted a symlink on the way to this one.
    /// 拒绝经过已存在符号链接的路径
    fn reject_linked_ancestors(&self, relative: &Path, name: &str) -> Result<(), FetchError> {
        let mut current = PathBuf::from(self.root);
        let mut components = relative.components().peekable();
        while let Some(component) = components.next() {
            if components.peek().is_none() {
                break;
            }
            current.push(component);
            match fs::symlink_metadata(&current) {
                Ok(meta) if meta.file_type().is_symlink() => {
                    return Err(FetchError::PathTraversalRejected {
                        entry: name.to_string(),
                    })
                }
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => break,
                Err(e) => return Err(FetchError::local_io(&current, &e)),
            }
        }
        Ok(())
    }

    /// Unix mode or symlink bit for a file written earlier.
    /// 应用中央目录中的权限与符号链接
    fn apply_zip_attributes(&mut self, record: &CentralRecord) -> Result<(), FetchError> {
        self.check_cancelled()?;
        let mode = match record.unix_mode() {
            Some(mode) => mode,
            None => return Ok(()),
        };
        let relative = sanitize_entry_path(&record.name)?;
        if relative.as_os_str().is_empty() {
            return Ok(());
        }
        self.reject_linked_ancestors(&relative, &record.name)?;

        let target = self.root.join(&relative);
        match fs::symlink_metadata(&target) {
            Ok(meta) if meta.is_file() => {}
            _ => return Ok(()),
        }
        if mode & S_IFMT != S_IFLNK {
            return set_mode(&target, match mode & 0o777 {
                0 => DEFAULT_FILE_MODE,
                mode => mode,
            });
        }

        // A zip symlink stores its target as the entry content.
        let file = fs::File::open(&target).map_err(|e| FetchError::local_io(&target, &e))?;
        let mut content = Vec::new();
        file.take(MAX_LINK_TARGET + 1)
            .read_to_end(&mut content)
            .map_err(|e| FetchError::local_io(&target, &e))?;
        if content.len() as u64 > MAX_LINK_TARGET {
            return Err(FetchError::CorruptArchive(format!(
                "symlink {:?} target too long",
                record.name
            )));
        }
        let link_target = String::from_utf8(content).map_err(|_| {
            FetchError::CorruptArchive(format!("symlink {:?} target is not utf-8", record.name))
        })?;

        fs::remove_file(&target).map_err(|e| FetchError::local_io(&target, &e))?;
        create_symlink(&link_target, &target)?;
        tracing::debug!("Linked {:?} -> {:?}", record.name, link_target);
        self.stats.files = self.stats.files.saturating_sub(1);
        self.stats.bytes = self.stats.bytes.saturating_sub(link_target.len() as u64);
        self.stats.links += 1;
        Ok(())
    }

    fn create_parent(&self, target: &Path) -> Result<(), FetchError> {
        self.check_cancelled()?;
        match target.parent() {
            Some(parent) if parent != self.root => create_dir_with_mode(parent),
            _ => Ok(()),
        }
    }

    fn write_file(
        &self,
        target: &Path,
        entry: &ArchiveEntry,
        content: &mut dyn Read,
    ) -> Result<u64, FetchError> {
        let out = fs::File::create(target).map_err(|e| FetchError::local_io(target, &e))?;
        let mut out = BufWriter::with_capacity(128 * 1024, out);
        let mut buf = vec![0u8; COPY_CHUNK];
        let mut copied = 0u64;

        loop {
            self.check_cancelled()?;
            let n = match content.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(classify_read_error(e, &entry.name)),
            };
            out.write_all(&buf[..n])
                .map_err(|e| FetchError::local_io(target, &e))?;
            copied += n as u64;
        }
        out.flush().map_err(|e| FetchError::local_io(target, &e))?;

        if let Some(size) = entry.size.filter(|size| *size != copied) {
            return Err(FetchError::CorruptArchive(format!(
                "entry {:?} truncated: {} of {} bytes",
                entry.name, copied, size
            )));
        }

        let mode = match entry.mode & 0o777 {
            0 => DEFAULT_FILE_MODE,
            mode => mode,
        };
        set_mode(target, mode)?;
        Ok(copied)
    }
}

fn create_dir_with_mode(path: &Path) -> Result<(), FetchError> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(DIR_MODE);
    }
    builder.create(path).map_err(|e| FetchError::local_io(path, &e))
}

fn remove_if_link(path: &Path) -> Result<(), FetchError> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => {
            fs::remove_file(path).map_err(|e| FetchError::local_io(path, &e))
        }
        _ => Ok(()),
    }
}

fn remove_non_dir(path: &Path) -> Result<(), FetchError> {
    match fs::symlink_metadata(path) {
        Ok(meta) if !meta.is_dir() => fs::remove_file(path).map_err(|e| FetchError::local_io(path, &e)),
        _ => Ok(()),
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<(), FetchError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|e| FetchError::local_io(path, &e))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<(), FetchError> {
    Ok(())
}

#[cfg(unix)]
fn create_symlink(link_target: &str, path: &Path) -> Result<(), FetchError> {
    std::os::unix::fs::symlink(link_target, path).map_err(|e| FetchError::local_io(path, &e))
}

#[cfg(not(unix))]
fn create_symlink(_link_target: &str, path: &Path) -> Result<(), FetchError> {
    let err = io::Error::new(io::ErrorKind::Unsupported, "symlink entries need a unix host");
    Err(FetchError::local_io(path, &err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testing::descriptor_zip;
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;

    const META: &str = r#"{"name":"jokes","default_field":"joke","fields":["joke"]}"#;
    const DOCS: &str = "{\"id\":\"1\",\"fields\":{\"joke\":\"knock knock\"}}\n";

    fn build_zip() -> Vec<u8> {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        zip.add_directory("index/", options).unwrap();
        zip.add_directory("index/store/", options).unwrap();
        zip.start_file("index/index_meta.json", options.unix_permissions(0o640)).unwrap();
        zip.write_all(META.as_bytes()).unwrap();
        zip.start_file("index/store/docs.jsonl", options).unwrap();
        zip.write_all(DOCS.as_bytes()).unwrap();
        zip.add_symlink("index/latest", "store/docs.jsonl", options).unwrap();
        zip.finish().unwrap().into_inner()
    }

    fn build_tar_gz() -> Vec<u8> {
        let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);

        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Directory);
        header.set_mode(0o755);
        header.set_size(0);
        builder.append_data(&mut header, "index/", io::empty()).unwrap();

        let mut header = tar::Header::new_gnu();
        header.set_mode(0o600);
        header.set_size(META.len() as u64);
        builder.append_data(&mut header, "index/index_meta.json", META.as_bytes()).unwrap();

        let mut header = tar::Header::new_gnu();
        header.set_mode(0o644);
        header.set_size(DOCS.len() as u64);
        builder.append_data(&mut header, "index/store/docs.jsonl", DOCS.as_bytes()).unwrap();

        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Symlink);
        header.set_size(0);
        builder.append_link(&mut header, "index/latest", "store/docs.jsonl").unwrap();

        builder.into_inner().unwrap().finish().unwrap()
    }

    /// Yields `data` then fails like an aborted pipe.
    struct FailingReader {
        data: Cursor<Vec<u8>>,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.data.read(buf)? {
                0 => Err(io::Error::new(
                    io::ErrorKind::Other,
                    crate::fetch::pipe::PipeAborted("connection reset".into()),
                )),
                n => Ok(n),
            }
        }
    }

    fn extract(bytes: Vec<u8>, root: &Path) -> Result<ExtractStats, FetchError> {
        extract_archive(Cursor::new(bytes), root, &CancellationToken::new())
    }

    #[test]
    fn test_zip_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("out");

        let stats = extract(build_zip(), &root).unwrap();
        assert_eq!(stats.files, 2);
        assert_eq!(stats.links, 1);
        assert_eq!(stats.bytes, (META.len() + DOCS.len()) as u64);

        assert_eq!(fs::read_to_string(root.join("index/index_meta.json")).unwrap(), META);
        assert_eq!(fs::read_to_string(root.join("index/store/docs.jsonl")).unwrap(), DOCS);
        assert!(root.join("index/store").is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn test_zip_modes_and_symlinks() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        extract(build_zip(), dir.path()).unwrap();

        let meta = fs::metadata(dir.path().join("index/index_meta.json")).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o640);

        let link = dir.path().join("index/latest");
        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_link(&link).unwrap(), PathBuf::from("store/docs.jsonl"));
        assert_eq!(fs::read_to_string(&link).unwrap(), DOCS);
    }

    #[test]
    fn test_tar_gz_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let stats = extract(build_tar_gz(), dir.path()).unwrap();

        assert_eq!(stats.files, 2);
        assert_eq!(stats.directories, 1);
        assert_eq!(fs::read_to_string(dir.path().join("index/index_meta.json")).unwrap(), META);
        assert_eq!(fs::read_to_string(dir.path().join("index/latest")).unwrap(), DOCS);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let meta = fs::metadata(dir.path().join("index/index_meta.json")).unwrap();
            assert_eq!(meta.permissions().mode() & 0o777, 0o600);
        }
    }

    #[test]
    fn test_plain_tar() {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_ustar();
        header.set_mode(0o644);
        header.set_size(DOCS.len() as u64);
        builder.append_data(&mut header, "docs.jsonl", DOCS.as_bytes()).unwrap();
        let bytes = builder.into_inner().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let stats = extract(bytes, dir.path()).unwrap();
        assert_eq!(stats.files, 1);
        assert_eq!(fs::read_to_string(dir.path().join("docs.jsonl")).unwrap(), DOCS);
    }

    #[test]
    fn test_zip_traversal_rejected() {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        zip.start_file("../../etc/passwd", SimpleFileOptions::default()).unwrap();
        zip.write_all(b"root:x:0:0").unwrap();
        let bytes = zip.finish().unwrap().into_inner();

        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("a/b");
        match extract(bytes, &root) {
            Err(FetchError::PathTraversalRejected { entry }) => assert_eq!(entry, "../../etc/passwd"),
            other => panic!("expected traversal rejection, got {:?}", other),
        }
        assert!(!dir.path().join("etc").exists());
    }

    #[test]
    fn test_tar_traversal_rejected() {
        let mut header = tar::Header::new_gnu();
        {
            let name = b"../evil.txt";
            header.as_gnu_mut().unwrap().name[..name.len()].copy_from_slice(name);
        }
        header.set_mode(0o644);
        header.set_size(4);
        header.set_cksum();
        let mut builder = tar::Builder::new(Vec::new());
        builder.append(&header, &b"evil"[..]).unwrap();
        let bytes = builder.into_inner().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("root");
        assert!(matches!(extract(bytes, &root), Err(FetchError::PathTraversalRejected { .. })));
        assert!(!dir.path().join("evil.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_write_through_symlink_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let outside = dir.path().join("outside");
        fs::create_dir(&outside).unwrap();

        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Symlink);
        header.set_size(0);
        builder.append_link(&mut header, "escape", &outside).unwrap();
        let mut header = tar::Header::new_gnu();
        header.set_mode(0o644);
        header.set_size(5);
        builder.append_data(&mut header, "escape/pwned.txt", &b"pwned"[..]).unwrap();
        let bytes = builder.into_inner().unwrap();

        let root = dir.path().join("root");
        assert!(matches!(extract(bytes, &root), Err(FetchError::PathTraversalRejected { .. })));
        assert!(!outside.join("pwned.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_zip_symlink_is_linked_after_entries() {
        let dir = tempfile::tempdir().unwrap();
        let outside = dir.path().join("outside");
        fs::create_dir(&outside).unwrap();

        // The link only exists once the central directory is read, so the
        // later entry cannot be written through it.
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        zip.add_symlink("escape", outside.to_string_lossy(), options).unwrap();
        zip.start_file("escape/pwned.txt", options).unwrap();
        zip.write_all(b"pwned").unwrap();
        let bytes = zip.finish().unwrap().into_inner();

        assert!(extract(bytes, &dir.path().join("root")).is_err());
        assert!(!outside.join("pwned.txt").exists());
    }

    fn descriptor_entries() -> Vec<(&'static str, &'static [u8])> {
        vec![
            ("index/", &b""[..]),
            ("index/index_meta.json", META.as_bytes()),
            ("index/store/docs.jsonl", DOCS.as_bytes()),
        ]
    }

    #[test]
    fn test_descriptor_zip_round_trip() {
        let bytes = descriptor_zip(&descriptor_entries());
        // Same bytes through the seekable reader.
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes.clone())).unwrap();
        let mut meta = String::new();
        archive.by_name("index/index_meta.json").unwrap().read_to_string(&mut meta).unwrap();
        assert_eq!(meta, META);

        let dir = tempfile::tempdir().unwrap();
        let stats = extract(bytes, dir.path()).unwrap();
        assert_eq!(stats.entries, 3);
        assert_eq!(stats.files, 2);
        assert_eq!(stats.directories, 1);
        assert_eq!(stats.bytes, (META.len() + DOCS.len()) as u64);
        assert_eq!(fs::read_to_string(dir.path().join("index/index_meta.json")).unwrap(), META);
        assert_eq!(fs::read_to_string(dir.path().join("index/store/docs.jsonl")).unwrap(), DOCS);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let meta = fs::metadata(dir.path().join("index/store/docs.jsonl")).unwrap();
            assert_eq!(meta.permissions().mode() & 0o777, 0o644);
        }
    }

    #[test]
    fn test_descriptor_crc_mismatch_is_corrupt() {
        let mut bytes = descriptor_zip(&descriptor_entries());
        let at = bytes.windows(4).position(|w| w == b"PK\x07\x08").unwrap();
        bytes[at + 4] ^= 0xff;

        let dir = tempfile::tempdir().unwrap();
        match extract(bytes, dir.path()) {
            Err(FetchError::CorruptArchive(m)) => assert!(m.contains("crc32"), "{}", m),
            other => panic!("expected CorruptArchive, got {:?}", other),
        }
    }

    #[test]
    fn test_descriptor_zip_truncated() {
        let payload: Vec<u8> = (0..64 * 1024u32).map(|i| (i * 31 % 251) as u8).collect();
        let bytes = descriptor_zip(&[("index/store/big.dat", &payload[..])]);
        let dir = tempfile::tempdir().unwrap();

        // Inside the deflate data
        let mut cut = bytes.clone();
        cut.truncate(bytes.len() / 2);
        assert!(matches!(extract(cut, &dir.path().join("a")), Err(FetchError::CorruptArchive(_))));

        // Every entry complete, central directory gone
        let central = bytes.windows(4).position(|w| w == b"PK\x01\x02").unwrap();
        let mut cut = bytes.clone();
        cut.truncate(central);
        assert!(matches!(extract(cut, &dir.path().join("b")), Err(FetchError::CorruptArchive(_))));

        // End of central directory record gone
        let end = bytes.windows(4).position(|w| w == b"PK\x05\x06").unwrap();
        let mut cut = bytes;
        cut.truncate(end);
        assert!(matches!(extract(cut, &dir.path().join("c")), Err(FetchError::CorruptArchive(_))));
    }

    #[test]
    fn test_stored_descriptor_entry_unsupported() {
        let mut bytes = descriptor_zip(&[("docs.jsonl", DOCS.as_bytes())]);
        // Local header compression method at offset 8: deflate -> stored
        bytes[8] = 0;

        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            extract(bytes, dir.path()),
            Err(FetchError::UnsupportedArchiveFormat(m)) if m.contains("data descriptor")
        ));
    }

    fn three_entry_tar() -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for name in ["index/index_meta.json", "index/store/a.jsonl", "index/store/b.jsonl"] {
            let mut header = tar::Header::new_ustar();
            header.set_mode(0o644);
            header.set_size(DOCS.len() as u64);
            builder.append_data(&mut header, name, DOCS.as_bytes()).unwrap();
        }
        builder.into_inner().unwrap()
    }

    #[test]
    fn test_tar_without_end_marker_is_corrupt() {
        let bytes = three_entry_tar();
        let dir = tempfile::tempdir().unwrap();

        // First entry only (header + one data block), cut on a block boundary
        let mut cut = bytes.clone();
        cut.truncate(1024);
        match extract(cut, &dir.path().join("a")) {
            Err(FetchError::CorruptArchive(m)) => assert!(m.contains("end-of-archive"), "{}", m),
            other => panic!("expected CorruptArchive, got {:?}", other),
        }

        // All entries, no zero blocks
        let mut cut = bytes.clone();
        cut.truncate(bytes.len() - 1024);
        assert!(matches!(extract(cut, &dir.path().join("b")), Err(FetchError::CorruptArchive(_))));

        // Half of the end marker
        let mut cut = bytes.clone();
        cut.truncate(bytes.len() - 512);
        assert!(matches!(extract(cut, &dir.path().join("c")), Err(FetchError::CorruptArchive(_))));

        let stats = extract(bytes, &dir.path().join("d")).unwrap();
        assert_eq!(stats.files, 3);
    }

    #[test]
    fn test_tar_gz_without_end_marker_is_corrupt() {
        let mut tar = three_entry_tar();
        tar.truncate(tar.len() - 1024);
        let mut gz = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        gz.write_all(&tar).unwrap();

        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(extract(gz.finish().unwrap(), dir.path()), Err(FetchError::CorruptArchive(_))));
    }

    #[test]
    fn test_unsupported_formats() {
        let dir = tempfile::tempdir().unwrap();

        let bzip2 = b"BZh91AY&SY\x00\x00".to_vec();
        assert!(matches!(extract(bzip2, dir.path()), Err(FetchError::UnsupportedArchiveFormat(m)) if m.contains("bzip2")));

        let text = b"just some text, not an archive".to_vec();
        assert!(matches!(extract(text, dir.path()), Err(FetchError::UnsupportedArchiveFormat(_))));

        let mut gz = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        gz.write_all(b"plain gzip payload").unwrap();
        assert!(matches!(
            extract(gz.finish().unwrap(), dir.path()),
            Err(FetchError::UnsupportedArchiveFormat(m)) if m.contains("tar")
        ));

        assert!(matches!(extract(Vec::new(), dir.path()), Err(FetchError::CorruptArchive(_))));
    }

    #[test]
    fn test_truncated_zip_is_corrupt() {
        let payload: Vec<u8> = (0..32 * 1024u32).map(|i| (i % 251) as u8).collect();
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        zip.start_file("index/store/big.dat", options).unwrap();
        zip.write_all(&payload).unwrap();
        let mut bytes = zip.finish().unwrap().into_inner();
        bytes.truncate(bytes.len() / 2);

        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(extract(bytes, dir.path()), Err(FetchError::CorruptArchive(_))));
    }

    #[test]
    fn test_upstream_failure_surfaces() {
        let mut bytes = build_tar_gz();
        bytes.truncate(bytes.len() - 20);
        let reader = FailingReader { data: Cursor::new(bytes) };

        let dir = tempfile::tempdir().unwrap();
        let result = extract_archive(reader, dir.path(), &CancellationToken::new());
        assert!(matches!(result, Err(FetchError::Upstream(m)) if m == "connection reset"));
    }

    #[test]
    fn test_cancelled_before_first_entry() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let dir = tempfile::tempdir().unwrap();
        let result = extract_archive(Cursor::new(build_zip()), dir.path(), &cancel);
        assert!(matches!(result, Err(FetchError::Cancelled)));
        assert!(!dir.path().join("index").exists());
    }
}
