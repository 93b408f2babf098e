//! Zip records read straight off a stream / 流式 ZIP 记录
//!
//! Local headers only say where an entry starts. When general purpose bit 3
//! is set the sizes and CRC trail the data in a descriptor, so the entry is
//! inflated until its deflate stream ends and then checked against that
//! descriptor. Unix modes and symlink bits live only in the central
//! directory, which arrives after the last entry.

use std::io::{self, BufRead, Read};

use flate2::bufread::DeflateDecoder;

pub const LOCAL_HEADER_SIG: u32 = 0x0403_4b50;
pub const CENTRAL_HEADER_SIG: u32 = 0x0201_4b50;
const DESCRIPTOR_SIG: u32 = 0x0807_4b50;
/// End of central directory, zip64 end record and zip64 locator.
pub const END_SIGS: [u32; 3] = [0x0605_4b50, 0x0606_4b50, 0x0706_4b50];

const FLAG_ENCRYPTED: u16 = 1;
const FLAG_DESCRIPTOR: u16 = 1 << 3;
pub const METHOD_DEFLATE: u16 = 8;
const ZIP64_EXTRA_ID: u16 = 0x0001;
const SYSTEM_UNIX: u8 = 3;

fn le16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn le32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

pub fn read_u32<R: Read>(reader: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(reader: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

pub fn read_vec<R: Read>(reader: &mut R, len: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

fn skip<R: Read>(reader: &mut R, len: u64) -> io::Result<()> {
    let skipped = io::copy(&mut reader.by_ref().take(len), &mut io::sink())?;
    if skipped < len {
        return Err(io::ErrorKind::UnexpectedEof.into());
    }
    Ok(())
}

fn invalid(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

/// Fixed 30-byte part of a local file header / 本地文件头
pub struct LocalHeader {
    raw: [u8; 30],
}

impl LocalHeader {
    /// Read the rest of a header whose signature was already consumed.
    pub fn read_after_signature<R: Read>(reader: &mut R) -> io::Result<Self> {
        let mut raw = [0u8; 30];
        raw[..4].copy_from_slice(&LOCAL_HEADER_SIG.to_le_bytes());
        reader.read_exact(&mut raw[4..])?;
        Ok(Self { raw })
    }

    pub fn flags(&self) -> u16 {
        le16(&self.raw, 6)
    }

    pub fn method(&self) -> u16 {
        le16(&self.raw, 8)
    }

    pub fn uses_descriptor(&self) -> bool {
        self.flags() & FLAG_DESCRIPTOR != 0
    }

    pub fn encrypted(&self) -> bool {
        self.flags() & FLAG_ENCRYPTED != 0
    }

    pub fn name_len(&self) -> usize {
        le16(&self.raw, 26) as usize
    }

    pub fn extra_len(&self) -> usize {
        le16(&self.raw, 28) as usize
    }

    /// Header bytes, signature included, for replaying into another parser.
    pub fn into_bytes(self) -> [u8; 30] {
        self.raw
    }
}

/// Whether a local extra field carries zip64 sizes / 是否含 zip64 扩展字段
pub fn has_zip64_extra(extra: &[u8]) -> bool {
    let mut at = 0;
    while at + 4 <= extra.len() {
        if le16(extra, at) == ZIP64_EXTRA_ID {
            return true;
        }
        at += 4 + le16(extra, at + 2) as usize;
    }
    false
}

/// Deflated entry whose sizes follow the data / 数据描述符条目
///
/// Reading to EOF consumes the trailing descriptor and fails with
/// `InvalidData` when its CRC or sizes disagree with what was inflated.
pub struct DescribedEntry<'a, R: BufRead> {
    decoder: DeflateDecoder<&'a mut R>,
    crc: crc32fast::Hasher,
    produced: u64,
    zip64: bool,
    done: bool,
}

impl<'a, R: BufRead> DescribedEntry<'a, R> {
    pub fn new(reader: &'a mut R, zip64: bool) -> Self {
        Self {
            decoder: DeflateDecoder::new(reader),
            crc: crc32fast::Hasher::new(),
            produced: 0,
            zip64,
            done: false,
        }
    }

    fn verify_descriptor(&mut self) -> io::Result<()> {
        let compressed = self.decoder.total_in();
        let crc = std::mem::take(&mut self.crc).finalize();
        let reader = self.decoder.get_mut();

        // The descriptor signature is optional.
        let mut stored_crc = read_u32(reader)?;
        if stored_crc == DESCRIPTOR_SIG {
            stored_crc = read_u32(reader)?;
        }
        let (stored_compressed, stored_size) = if self.zip64 {
            (read_u64(reader)?, read_u64(reader)?)
        } else {
            (read_u32(reader)? as u64, read_u32(reader)? as u64)
        };

        if stored_crc != crc {
            return Err(invalid(format!(
                "crc32 mismatch: descriptor {:08x}, data {:08x}",
                stored_crc, crc
            )));
        }
        if stored_compressed != compressed || stored_size != self.produced {
            return Err(invalid(format!(
                "size mismatch: descriptor {}/{} bytes, data {}/{} bytes",
                stored_compressed, stored_size, compressed, self.produced
            )));
        }
        Ok(())
    }
}

impl<R: BufRead> Read for DescribedEntry<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.done || buf.is_empty() {
            return Ok(0);
        }
        let n = self.decoder.read(buf)?;
        if n > 0 {
            self.crc.update(&buf[..n]);
            self.produced += n as u64;
            return Ok(n);
        }
        self.verify_descriptor()?;
        self.done = true;
        Ok(0)
    }
}

/// Central directory file header, reduced to what extraction uses.
/// 中央目录记录
#[derive(Debug)]
pub struct CentralRecord {
    pub name: String,
    system: u8,
    external_attributes: u32,
}

impl CentralRecord {
    /// Read the rest of a record whose signature was already consumed.
    pub fn read_after_signature<R: Read>(reader: &mut R) -> io::Result<Self> {
        // version made by (2), needed (2), flags (2), method (2), time (2),
        // date (2), crc (4), sizes (8), name/extra/comment lengths (6),
        // disk (2), internal attributes (2), external attributes (4), offset (4)
        let mut fixed = [0u8; 42];
        reader.read_exact(&mut fixed)?;
        let name = read_vec(reader, le16(&fixed, 24) as usize)?;
        let trailing = le16(&fixed, 26) as u64 + le16(&fixed, 28) as u64;
        skip(reader, trailing)?;

        Ok(Self {
            name: String::from_utf8_lossy(&name).into_owned(),
            system: fixed[1],
            external_attributes: le32(&fixed, 34),
        })
    }

    /// Unix `st_mode`, when the entry was written on a unix host.
    pub fn unix_mode(&self) -> Option<u32> {
        match self.external_attributes >> 16 {
            mode if self.system == SYSTEM_UNIX && mode != 0 => Some(mode),
            _ => None,
        }
    }
}
