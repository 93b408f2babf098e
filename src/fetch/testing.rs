//! In-memory object store for pipeline tests / 测试用内存对象存储

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;

use crate::storage::{ByteStream, ObjectMeta, ObjectStore, RemoteObjectRef, StoreError};

#[derive(Default)]
pub struct MemoryStore {
    objects: HashMap<RemoteObjectRef, Bytes>,
    chunk_size: usize,
    chunk_delay: Duration,
    head_delay: Duration,
    fail_after_chunks: Option<usize>,
    short_body: Option<usize>,
    head_calls: AtomicUsize,
    get_calls: AtomicUsize,
    open_streams: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            chunk_size: 1024,
            ..Default::default()
        }
    }

    pub fn with_object(mut self, object: &RemoteObjectRef, data: impl Into<Bytes>) -> Self {
        self.objects.insert(object.clone(), data.into());
        self
    }

    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Sleep before every chunk / 每块数据前等待
    pub fn chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    pub fn head_delay(mut self, delay: Duration) -> Self {
        self.head_delay = delay;
        self
    }

    /// Fail the body stream after `chunks` chunks / 传输若干块后断开
    pub fn fail_after(mut self, chunks: usize) -> Self {
        self.fail_after_chunks = Some(chunks);
        self
    }

    /// Serve only `len` bytes while HEAD reports the full size.
    pub fn short_body(mut self, len: usize) -> Self {
        self.short_body = Some(len);
        self
    }

    pub fn head_calls(&self) -> usize {
        self.head_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    /// Body streams not yet dropped / 尚未释放的数据流
    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }
}

struct OpenStream(Arc<AtomicUsize>);

impl OpenStream {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for OpenStream {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Feed {
    chunks: VecDeque<Bytes>,
    sent: usize,
    delay: Duration,
    fail_after: Option<usize>,
    _open: OpenStream,
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn head_object(&self, object: &RemoteObjectRef) -> Result<ObjectMeta, StoreError> {
        self.head_calls.fetch_add(1, Ordering::SeqCst);
        if !self.head_delay.is_zero() {
            tokio::time::sleep(self.head_delay).await;
        }
        Ok(match self.objects.get(object) {
            Some(data) => ObjectMeta::found(data.len() as u64),
            None => ObjectMeta::missing(),
        })
    }

    async fn get_object_stream(&self, object: &RemoteObjectRef) -> Result<ByteStream, StoreError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let mut data = self
            .objects
            .get(object)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(object.to_string()))?;
        if let Some(len) = self.short_body {
            data.truncate(len);
        }

        let chunks = data.chunks(self.chunk_size).map(Bytes::copy_from_slice).collect();
        let feed = Feed {
            chunks,
            sent: 0,
            delay: self.chunk_delay,
            fail_after: self.fail_after_chunks,
            _open: OpenStream::new(self.open_streams.clone()),
        };

        let stream = futures::stream::unfold(feed, |mut feed| async move {
            if feed.fail_after == Some(feed.sent) {
                feed.fail_after = None;
                feed.chunks.clear();
                return Some((Err(StoreError::Transport("connection reset by peer".to_string())), feed));
            }
            let chunk = feed.chunks.pop_front()?;
            if !feed.delay.is_zero() {
                tokio::time::sleep(feed.delay).await;
            }
            feed.sent += 1;
            Some((Ok(chunk), feed))
        });
        Ok(stream.boxed())
    }
}

/// Build a zip holding a minimal search index / 构造包含最小索引的 zip
pub fn index_zip(docs: &[(&str, &str)]) -> Vec<u8> {
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    zip.add_directory("index/", options).unwrap();
    zip.start_file("index/index_meta.json", options).unwrap();
    zip.write_all(br#"{"name":"jokes","default_field":"joke","fields":["joke"],"facets":["category"]}"#)
        .unwrap();
    zip.start_file("index/store/docs.jsonl", options).unwrap();
    for (id, joke) in docs {
        let line = serde_json::json!({ "id": id, "fields": { "joke": joke, "category": "general" } });
        writeln!(zip, "{}", line).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

/// Zip as written to a non-seekable sink (Go's `archive/zip`, `zip -fd`):
/// files set flag bit 3 and put CRC and sizes in a trailing data descriptor.
/// 流式写出的 zip：大小写在数据描述符中
pub fn descriptor_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
    use std::io::Write;

    fn put16(out: &mut Vec<u8>, value: u16) {
        out.extend_from_slice(&value.to_le_bytes());
    }
    fn put32(out: &mut Vec<u8>, value: u32) {
        out.extend_from_slice(&value.to_le_bytes());
    }

    let mut out = Vec::new();
    let mut central = Vec::new();
    for (name, data) in entries {
        let offset = out.len() as u32;
        let is_dir = name.ends_with('/');
        // Directories are stored without a descriptor, files deflated with one.
        let (flags, method, mode) = if is_dir {
            (0x0800u16, 0u16, 0o040755u32)
        } else {
            (0x0808, 8, 0o100644)
        };
        let (crc, compressed) = if is_dir {
            (0, Vec::new())
        } else {
            let mut encoder = flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(data).unwrap();
            (crc32fast::hash(data), encoder.finish().unwrap())
        };

        out.extend_from_slice(b"PK\x03\x04");
        put16(&mut out, 20);
        put16(&mut out, flags);
        put16(&mut out, method);
        put16(&mut out, 0);
        put16(&mut out, 0x21);
        put32(&mut out, 0);
        put32(&mut out, 0);
        put32(&mut out, 0);
        put16(&mut out, name.len() as u16);
        put16(&mut out, 0);
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(&compressed);
        if !is_dir {
            out.extend_from_slice(b"PK\x07\x08");
            put32(&mut out, crc);
            put32(&mut out, compressed.len() as u32);
            put32(&mut out, data.len() as u32);
        }

        central.extend_from_slice(b"PK\x01\x02");
        put16(&mut central, (3 << 8) | 20);
        put16(&mut central, 20);
        put16(&mut central, flags);
        put16(&mut central, method);
        put16(&mut central, 0);
        put16(&mut central, 0x21);
        put32(&mut central, crc);
        put32(&mut central, compressed.len() as u32);
        put32(&mut central, data.len() as u32);
        put16(&mut central, name.len() as u16);
        put16(&mut central, 0);
        put16(&mut central, 0);
        put16(&mut central, 0);
        put16(&mut central, 0);
        put32(&mut central, mode << 16);
        put32(&mut central, offset);
        central.extend_from_slice(name.as_bytes());
    }

    let directory_offset = out.len() as u32;
    let directory_len = central.len() as u32;
    out.extend_from_slice(&central);
    out.extend_from_slice(b"PK\x05\x06");
    put16(&mut out, 0);
    put16(&mut out, 0);
    put16(&mut out, entries.len() as u16);
    put16(&mut out, entries.len() as u16);
    put32(&mut out, directory_len);
    put32(&mut out, directory_offset);
    put16(&mut out, 0);
    out
}
