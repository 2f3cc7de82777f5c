//! Dedicated writer task serializing all stream writes.
//!
//! Every concurrent caller funnels its framed bytes through one mpsc
//! channel into a single task that owns the write half of the stream, so
//! two messages can never interleave on the wire. The bounded channel is
//! also the write-side backpressure: when the peer stops draining, senders
//! suspend in `send()` instead of growing an unbounded queue.
//!
//! ```text
//! Call 1 ─┐
//! Call 2 ─┼─► mpsc::Sender<Bytes> ─► Writer Task ─► stream
//! Call N ─┘
//! ```

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{NetconfError, Result};

/// Default writer channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Maximum messages to drain into a single flush.
const MAX_BATCH_SIZE: usize = 16;

/// Handle for sending framed messages to the writer task.
///
/// Cheaply cloneable; shared by every concurrent call.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<Bytes>,
}

impl WriterHandle {
    /// Queue one framed message for the stream.
    ///
    /// Fails with `SessionClosed` once the writer task has stopped.
    pub async fn send(&self, message: Bytes) -> Result<()> {
        self.tx
            .send(message)
            .await
            .map_err(|_| NetconfError::SessionClosed)
    }
}

/// Spawn the writer task owning the stream's write half.
pub fn spawn_writer_task<W>(writer: W, capacity: usize) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let handle = WriterHandle { tx };
    let task = tokio::spawn(writer_loop(rx, writer));
    (handle, task)
}

/// Main writer loop - drains queued messages and writes them out.
///
/// Consecutive ready messages are written before a single flush to avoid
/// a syscall per message under load.
async fn writer_loop<W>(mut rx: mpsc::Receiver<Bytes>, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = match rx.recv().await {
            Some(m) => m,
            // All senders dropped: shut the write half down so the peer
            // observes end of stream, then exit.
            None => {
                writer.shutdown().await?;
                return Ok(());
            }
        };

        writer.write_all(&first).await?;
        let mut batched = 1;
        while batched < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(message) => {
                    writer.write_all(&message).await?;
                    batched += 1;
                }
                Err(_) => break,
            }
        }
        writer.flush().await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt};

    #[tokio::test]
    async fn test_send_reaches_stream() {
        let (client, mut server) = duplex(4096);
        let (handle, _task) = spawn_writer_task(client, DEFAULT_CHANNEL_CAPACITY);

        handle.send(Bytes::from_static(b"<rpc/>]]>]]>")).await.unwrap();

        let mut buf = vec![0u8; 64];
        let n = server.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"<rpc/>]]>]]>");
    }

    #[tokio::test]
    async fn test_messages_are_not_interleaved() {
        let (client, mut server) = duplex(4096);
        let (handle, _task) = spawn_writer_task(client, DEFAULT_CHANNEL_CAPACITY);

        for i in 0..10u32 {
            handle
                .send(Bytes::from(format!("<msg>{}</msg>", i)))
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut buf = vec![0u8; 1024];
        let n = server.read(&mut buf).await.unwrap();
        let text = String::from_utf8_lossy(&buf[..n]);
        let expected: String = (0..10).map(|i| format!("<msg>{}</msg>", i)).collect();
        assert_eq!(text, expected);
    }

    #[tokio::test]
    async fn test_shutdown_on_handle_drop() {
        let (client, _server) = duplex(4096);
        let (handle, task) = spawn_writer_task(client, DEFAULT_CHANNEL_CAPACITY);

        drop(handle);
        let result = task.await.unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_clean_exit_shuts_stream_down() {
        let (client, mut server) = duplex(4096);
        let (handle, task) = spawn_writer_task(client, DEFAULT_CHANNEL_CAPACITY);

        handle.send(Bytes::from_static(b"bye")).await.unwrap();
        drop(handle);
        task.await.unwrap().unwrap();

        // Queued data is still delivered, then the peer sees EOF.
        let mut buf = Vec::new();
        server.read_to_end(&mut buf).await.unwrap();
        assert_eq!(&buf, b"bye");
    }

    #[tokio::test]
    async fn test_send_after_writer_death_fails() {
        let (client, server) = duplex(4096);
        let (handle, task) = spawn_writer_task(client, DEFAULT_CHANNEL_CAPACITY);

        // Kill the read side so the next write errors out.
        drop(server);
        let _ = handle.send(Bytes::from_static(b"x")).await;
        let _ = task.await;

        let result = handle.send(Bytes::from_static(b"y")).await;
        assert!(matches!(result, Err(NetconfError::SessionClosed)));
    }
}
