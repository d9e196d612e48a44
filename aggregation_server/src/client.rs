//! The worker side of the aggregation protocol.

use std::io;

use comms::{
    OnoReceiver, OnoSender,
    msg::{BATCH_BARRIER_MESSAGE, Command, Msg, Payload, TERMINATE_MESSAGE, VarRef},
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{
        TcpStream, ToSocketAddrs,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
};

use crate::store::Tensor;

/// A worker's connection to the aggregation server.
pub struct AggregationClient<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    rx: OnoReceiver<R>,
    tx: OnoSender<W>,
    rx_buf: Vec<u32>,
}

impl AggregationClient<OwnedReadHalf, OwnedWriteHalf> {
    /// Connects to the aggregation server listening at `addr`.
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (rx, tx) = comms::tcp_channel(stream)?;
        Ok(Self::new(rx, tx))
    }
}

impl<R, W> AggregationClient<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Creates a new `AggregationClient` over an established channel.
    ///
    /// # Arguments
    /// * `rx` - The receiving end of the communication.
    /// * `tx` - The sending end of the communication.
    pub fn new(rx: OnoReceiver<R>, tx: OnoSender<W>) -> Self {
        Self {
            rx,
            tx,
            rx_buf: Vec::new(),
        }
    }

    /// Sends a contribution for the current round.
    ///
    /// # Arguments
    /// * `name` - The declared variable to write.
    /// * `tensor` - Its value.
    pub async fn send(&mut self, name: &str, tensor: &Tensor) -> io::Result<()> {
        let msg = Msg::Data(Payload::Var(tensor.as_var(name)));
        self.tx.send(&msg).await
    }

    /// Signals that every contribution of this worker for the round was sent.
    pub async fn batch_barrier(&mut self) -> io::Result<()> {
        self.send_control(BATCH_BARRIER_MESSAGE).await
    }

    /// Asks the server to stop.
    pub async fn terminate(&mut self) -> io::Result<()> {
        self.send_control(TERMINATE_MESSAGE).await
    }

    /// Waits for the round to be consolidated and reads `names` from the result.
    ///
    /// Each fetch acknowledges one round.
    ///
    /// # Arguments
    /// * `names` - The variables to read.
    ///
    /// # Returns
    /// The tensors in the order of `names`, or an io error carrying the server's refusal.
    pub async fn fetch(&mut self, names: &[&str]) -> io::Result<Vec<Tensor>> {
        let names: Vec<String> = names.iter().map(|&name| name.to_string()).collect();
        let msg = Msg::Control(Command::Fetch {
            names: names.clone(),
        });
        self.tx.send(&msg).await?;

        let mut tensors = Vec::with_capacity(names.len());

        for expected in &names {
            match self.rx.recv_into(&mut self.rx_buf).await? {
                Msg::Data(Payload::Var(var)) if var.name == expected => {
                    let tensor = Tensor::from_var(&var)
                        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                    tensors.push(tensor);
                }
                Msg::Err(detail) => return Err(io::Error::other(detail.into_owned())),
                other => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("expected var {expected}, got {other:?}"),
                    ));
                }
            }
        }

        Ok(tensors)
    }

    /// Closes the connection after the server acknowledges it.
    pub async fn disconnect(mut self) -> io::Result<()> {
        self.tx.send(&Msg::Control(Command::Disconnect)).await?;

        loop {
            match self.rx.recv_into(&mut self.rx_buf).await {
                Ok(Msg::Control(Command::Disconnect)) => return Ok(()),
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_control(&mut self, name: &str) -> io::Result<()> {
        let msg = Msg::Data(Payload::Var(VarRef::control(name)));
        self.tx.send(&msg).await
    }
}
