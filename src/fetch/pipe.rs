//! In-process byte pipe between the downloader and the extractor / 进程内管道
//!
//! - Bounded channel of chunks: the writer waits when the reader falls behind.
//! - The reader only sees a clean EOF after `PipeWriter::finish`. An aborted or
//!   dropped writer surfaces as a read error, so a failed download can never
//!   pass for a short archive.
//! - `PipeWriter` releases the channel exactly once on every exit path.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;
use tokio_util::io::StreamReader;

use super::error::FetchError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum PipeState {
    Open,
    Finished,
    Aborted(String),
}

/// Error carried to the reader when the writer fails / 写端失败时传给读端的错误
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct PipeAborted(pub String);

/// Extract the upstream failure message if `err` came from an aborted pipe.
/// 判断 IO 错误是否来自写端中止
pub fn upstream_failure(err: &io::Error) -> Option<String> {
    err.get_ref()
        .and_then(|inner| inner.downcast_ref::<PipeAborted>())
        .map(|aborted| aborted.0.clone())
}

/// Create a pipe holding at most `capacity` chunks in flight / 创建管道
pub fn pipe(capacity: usize) -> (PipeWriter, PipeReader) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let state = Arc::new(Mutex::new(PipeState::Open));

    let writer = PipeWriter {
        tx: Some(tx),
        state: state.clone(),
        written: 0,
    };
    let reader = PipeReader {
        inner: StreamReader::new(PipeStream {
            rx,
            state,
            failure: None,
        }),
    };
    (writer, reader)
}

/// Write end / 写端
pub struct PipeWriter {
    tx: Option<mpsc::Sender<Bytes>>,
    state: Arc<Mutex<PipeState>>,
    written: u64,
}

impl PipeWriter {
    /// Send one chunk, waiting while the pipe is full / 写入一块数据（满时等待）
    pub async fn write(&mut self, chunk: Bytes) -> Result<(), FetchError> {
        if chunk.is_empty() {
            return Ok(());
        }
        let len = chunk.len() as u64;
        let tx = self.tx.as_ref().ok_or(FetchError::PipeClosed)?;
        tx.send(chunk).await.map_err(|_| FetchError::PipeClosed)?;
        self.written += len;
        Ok(())
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Whether the reader side has gone away / 读端是否已关闭
    pub fn is_closed(&self) -> bool {
        self.tx.as_ref().map_or(true, |tx| tx.is_closed())
    }

    /// Complete the stream; the reader sees EOF after the last chunk.
    /// 正常结束，读端读完后得到 EOF
    pub fn finish(mut self) -> u64 {
        self.close(PipeState::Finished);
        self.written
    }

    /// Fail the stream; the reader gets an error carrying `reason`.
    /// 中止，读端得到携带原因的错误
    pub fn abort(mut self, reason: impl ToString) {
        self.close(PipeState::Aborted(reason.to_string()));
    }

    fn close(&mut self, terminal: PipeState) {
        {
            let mut state = self.state.lock();
            if *state == PipeState::Open {
                *state = terminal;
            }
        }
        // The state is published before the sender goes away.
        self.tx.take();
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        self.close(PipeState::Aborted(
            "pipe writer dropped before the stream completed".to_string(),
        ));
    }
}

struct PipeStream {
    rx: mpsc::Receiver<Bytes>,
    state: Arc<Mutex<PipeState>>,
    failure: Option<String>,
}

impl PipeStream {
    fn failure_error(message: &str) -> io::Error {
        io::Error::new(io::ErrorKind::Other, PipeAborted(message.to_string()))
    }
}

impl Stream for PipeStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        // Failures are sticky: every later read reports the same error.
        if let Some(ref message) = self.failure {
            return Poll::Ready(Some(Err(Self::failure_error(message))));
        }

        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(chunk)) => Poll::Ready(Some(Ok(chunk))),
            Poll::Ready(None) => {
                let state = self.state.lock().clone();
                match state {
                    PipeState::Finished => Poll::Ready(None),
                    PipeState::Aborted(message) => {
                        let err = Self::failure_error(&message);
                        self.failure = Some(message);
                        Poll::Ready(Some(Err(err)))
                    }
                    PipeState::Open => {
                        let message = "pipe closed without completion".to_string();
                        let err = Self::failure_error(&message);
                        self.failure = Some(message);
                        Poll::Ready(Some(Err(err)))
                    }
                }
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Read end, an `AsyncRead` over the received chunks / 读端
pub struct PipeReader {
    inner: StreamReader<PipeStream, Bytes>,
}

impl AsyncRead for PipeReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}
