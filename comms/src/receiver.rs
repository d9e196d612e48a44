use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{Align4, Deserialize, LEN_TYPE_SIZE, LenType, MAX_FRAME_LEN};

/// The reading end of a channel.
pub struct OnoReceiver<R: AsyncRead + Unpin> {
    rx: R,
}

impl<R: AsyncRead + Unpin> OnoReceiver<R> {
    pub(super) fn new(rx: R) -> Self {
        Self { rx }
    }

    /// Waits for the next frame and deserializes it.
    ///
    /// The body is read into `buf`, whose items are at least 4 byte aligned so that
    /// numeric payloads can be borrowed from it in place.
    ///
    /// # Arguments
    /// * `buf` - The receive buffer, the returned `T` borrows from it.
    ///
    /// # Returns
    /// The message, or an io error if reading failed or the frame is malformed.
    /// `UnexpectedEof` means the peer closed the stream.
    pub async fn recv_into<'buf, T, B>(&mut self, buf: &'buf mut Vec<B>) -> io::Result<T>
    where
        T: Deserialize<'buf>,
        B: Align4,
    {
        let len = self.read_len().await?;
        let body = body_view(buf, len);
        self.rx.read_exact(body).await?;

        T::deserialize(body)
    }

    async fn read_len(&mut self) -> io::Result<usize> {
        let mut head = [0; LEN_TYPE_SIZE];
        self.rx.read_exact(&mut head).await?;
        let len = LenType::from_be_bytes(head);

        usize::try_from(len)
            .ok()
            .filter(|&len| len <= MAX_FRAME_LEN)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("Frame of {len} bytes exceeds the limit of {MAX_FRAME_LEN} bytes"),
                )
            })
    }
}

/// Resizes `buf` to hold `len` bytes and returns them, zeroed.
fn body_view<B: Align4>(buf: &mut Vec<B>, len: usize) -> &mut [u8] {
    buf.clear();
    buf.resize(len.div_ceil(size_of::<B>()), B::zeroed());
    &mut bytemuck::cast_slice_mut::<B, u8>(buf)[..len]
}
