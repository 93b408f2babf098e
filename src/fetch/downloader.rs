//! Streaming downloader / 流式下载
//!
//! Pushes the object body into the pipe chunk by chunk. The writer is
//! consumed: every exit path either finishes or aborts it, so the
//! extractor always learns how the stream ended.

use std::time::Instant;

use futures::StreamExt;

use super::error::{FetchError, Stage};
use super::extract::utils::format_size;
use super::pipe::PipeWriter;
use crate::storage::{ObjectStore, RemoteObjectRef};

/// Stream `object` into `writer` before `deadline` / 在截止时间前下载对象到管道
///
/// `expected_size` comes from a prior HEAD; a body shorter than that is a
/// transport failure rather than a short archive.
pub async fn download(
    store: &dyn ObjectStore,
    object: &RemoteObjectRef,
    mut writer: PipeWriter,
    deadline: tokio::time::Instant,
    expected_size: Option<u64>,
) -> Result<u64, FetchError> {
    let started = Instant::now();
    tracing::debug!("Downloading {} via {}", object, store.name());

    let result = tokio::time::timeout_at(
        deadline,
        stream_body(store, object, &mut writer, expected_size),
    )
    .await
    .unwrap_or_else(|_| {
        Err(FetchError::RemoteTimeout {
            stage: Stage::Download,
            after: started.elapsed(),
        })
    });

    match result {
        Ok(received) => {
            writer.finish();
            tracing::info!(
                "Downloaded {} ({}) in {}ms",
                object,
                format_size(received),
                started.elapsed().as_millis()
            );
            Ok(received)
        }
        Err(e) => {
            tracing::warn!(
                "Download of {} failed after {}: {}",
                object,
                format_size(writer.bytes_written()),
                e
            );
            writer.abort(e.to_string());
            Err(e)
        }
    }
}

async fn stream_body(
    store: &dyn ObjectStore,
    object: &RemoteObjectRef,
    writer: &mut PipeWriter,
    expected_size: Option<u64>,
) -> Result<u64, FetchError> {
    let mut body = store
        .get_object_stream(object)
        .await
        .map_err(|e| FetchError::from_store(e, object))?;

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| FetchError::from_store(e, object))?;
        writer.write(chunk).await?;
    }

    let received = writer.bytes_written();
    if let Some(expected) = expected_size {
        if received < expected {
            return Err(FetchError::Transport(format!(
                "body truncated: received {} of {} bytes",
                received, expected
            )));
        }
    }
    Ok(received)
}
