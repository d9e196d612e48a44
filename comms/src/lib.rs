//! Wire protocol shared by the aggregation server and its workers.
//!
//! Every frame is a big endian `u64` length followed by the body, the body starts with a
//! `u32` kind header (see [`msg`]).

mod align;
mod deserialize;
pub mod msg;
mod receiver;
mod sender;
mod serialize;
pub mod specs;

use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
};

pub use align::Align4;
pub use deserialize::Deserialize;
pub use receiver::OnoReceiver;
pub use sender::OnoSender;
pub use serialize::Serialize;

type LenType = u64;
const LEN_TYPE_SIZE: usize = size_of::<LenType>();

/// Bodies longer than this are refused on both ends.
pub const MAX_FRAME_LEN: usize = 1 << 30;

/// Wraps a reader and a writer into the two ends of a channel.
///
/// # Arguments
/// * `rx` - The half frames are read from.
/// * `tx` - The half frames are written to.
pub fn channel<R, W>(rx: R, tx: W) -> (OnoReceiver<R>, OnoSender<W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    (OnoReceiver::new(rx), OnoSender::new(tx))
}

/// Splits a connected tcp stream into a channel, with Nagle's algorithm disabled.
pub fn tcp_channel(
    stream: TcpStream,
) -> std::io::Result<(OnoReceiver<OwnedReadHalf>, OnoSender<OwnedWriteHalf>)> {
    stream.set_nodelay(true)?;
    let (rx, tx) = stream.into_split();
    Ok(channel(rx, tx))
}
