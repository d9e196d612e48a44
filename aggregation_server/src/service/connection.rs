use std::io;

use comms::{
    OnoReceiver, OnoSender,
    msg::{Command, MessageKind, Msg, Payload},
};
use log::{debug, warn};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    queue::{Message, QueueSender, SenderId},
    store::Tensor,
    synchronization::{GateErr, ReleaseGate},
};

/// Serves a single worker connection until it disconnects.
///
/// Received vars are pushed into the inbound queue tagged with `sender`, fetch requests
/// wait on the release gate and are answered with one var per requested name.
///
/// A batch barrier counts once per fetched round: further barriers from the connection are
/// dropped until it fetched the round its barrier completed.
///
/// # Arguments
/// * `sender` - The id every message of this connection is tagged with.
/// * `rx` - The receiving end of the connection.
/// * `tx` - The sending end of the connection.
/// * `queue` - The producer half of the inbound queue.
/// * `gate` - The release gate.
///
/// # Returns
/// An io error if the connection failed or sent a malformed frame.
pub async fn serve_connection<R, W>(
    sender: SenderId,
    mut rx: OnoReceiver<R>,
    mut tx: OnoSender<W>,
    queue: QueueSender,
    gate: ReleaseGate,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut rx_buf: Vec<u32> = Vec::new();
    let mut last_seen = None;
    let mut barrier_pending = false;

    loop {
        let msg = match rx.recv_into(&mut rx_buf).await {
            Ok(msg) => msg,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                debug!(sender = sender; "connection closed");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        match msg {
            Msg::Data(Payload::Var(var)) => {
                let inbound = match MessageKind::classify(var.name) {
                    MessageKind::Data => {
                        let tensor = Tensor::from_var(&var)
                            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                        Message::new(sender, var.name, tensor)
                    }
                    MessageKind::BatchBarrier if barrier_pending => {
                        warn!(sender = sender; "ignoring batch barrier resent before a fetch");
                        continue;
                    }
                    MessageKind::BatchBarrier => {
                        barrier_pending = true;
                        Message::control(sender, var.name)
                    }
                    MessageKind::Terminate => Message::control(sender, var.name),
                };

                if queue.push(inbound).is_err() {
                    debug!(sender = sender; "inbound queue closed, dropping connection");
                    return Ok(());
                }
            }
            Msg::Control(Command::Fetch { names }) => {
                let res = gate.wait_for_result(&names, &mut last_seen).await;
                if !matches!(res, Err(GateErr::Stopped)) {
                    barrier_pending = false;
                }

                match res {
                    Ok(tensors) => {
                        for (name, tensor) in names.iter().zip(&tensors) {
                            let msg = Msg::Data(Payload::Var(tensor.as_var(name)));
                            tx.send(&msg).await?;
                        }
                    }
                    Err(e) => {
                        tx.send(&Msg::Err(e.to_string().into())).await?;

                        if e == GateErr::Stopped {
                            return Ok(());
                        }
                    }
                }
            }
            Msg::Control(Command::Disconnect) => {
                debug!(sender = sender; "worker disconnected");
                tx.send(&Msg::Control(Command::Disconnect)).await?;
                return Ok(());
            }
            Msg::Err(detail) => {
                warn!(sender = sender; "worker reported an error: {detail}");
            }
        }
    }
}
