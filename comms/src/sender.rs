use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{LEN_TYPE_SIZE, LenType, MAX_FRAME_LEN, Serialize};

/// The writing end of a channel.
///
/// Frame heads are built in a reused buffer, the tail a message hands back (the values of
/// a var) is written straight from the caller's memory.
pub struct OnoSender<W: AsyncWrite + Unpin> {
    tx: W,
    head: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> OnoSender<W> {
    pub(super) fn new(tx: W) -> Self {
        Self {
            tx,
            head: Vec::new(),
        }
    }

    /// Writes `msg` as a single frame and flushes it.
    ///
    /// # Arguments
    /// * `msg` - A serializable message.
    ///
    /// # Returns
    /// An io error if writing failed or the frame is larger than `MAX_FRAME_LEN`.
    pub async fn send<'a, T: Serialize<'a>>(&mut self, msg: &'a T) -> io::Result<()> {
        self.head.clear();
        self.head.resize(LEN_TYPE_SIZE, 0);

        let tail = msg.serialize(&mut self.head).unwrap_or_default();
        let body_len = self.head.len() - LEN_TYPE_SIZE + tail.len();

        if body_len > MAX_FRAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Frame of {body_len} bytes exceeds the limit of {MAX_FRAME_LEN} bytes"),
            ));
        }

        self.head[..LEN_TYPE_SIZE].copy_from_slice(&(body_len as LenType).to_be_bytes());
        self.tx.write_all(&self.head).await?;

        if !tail.is_empty() {
            self.tx.write_all(tail).await?;
        }

        self.tx.flush().await
    }

    /// Shuts down the write half of the underlying stream.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.tx.shutdown().await
    }
}
