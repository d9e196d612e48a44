//! The inbound queue between the connection handlers and the aggregation loop.

use comms::msg::{MessageKind, TERMINATE_MESSAGE};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::store::Tensor;

/// Identifies the producer of a message, every connection gets its own.
pub type SenderId = usize;

/// Sender id used for messages synthesized by the server itself.
pub const SERVER_SENDER: SenderId = usize::MAX;

/// A received named message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub sender: SenderId,
    pub name: String,
    pub tensor: Tensor,
}

impl Message {
    /// Creates a new `Message`.
    pub fn new(sender: SenderId, name: impl Into<String>, tensor: Tensor) -> Self {
        Self {
            sender,
            name: name.into(),
            tensor,
        }
    }

    /// Creates a message with a reserved name and no values.
    pub fn control(sender: SenderId, name: &str) -> Self {
        Self::new(sender, name, Tensor::zeros(vec![0]))
    }

    /// The sentinel that stops the aggregation loop.
    pub fn terminate() -> Self {
        Self::control(SERVER_SENDER, TERMINATE_MESSAGE)
    }

    pub fn kind(&self) -> MessageKind {
        MessageKind::classify(&self.name)
    }
}

/// Creates a new inbound queue.
///
/// # Returns
/// The cloneable producer half and the single consumer half.
pub fn inbound() -> (QueueSender, InboundQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (QueueSender(tx), InboundQueue(rx))
}

/// The producer half of the inbound queue, pushing never blocks.
#[derive(Debug, Clone)]
pub struct QueueSender(UnboundedSender<Message>);

impl QueueSender {
    /// Pushes a message into the queue.
    ///
    /// # Arguments
    /// * `msg` - The received message.
    ///
    /// # Returns
    /// The message back if the consumer is gone.
    pub fn push(&self, msg: Message) -> Result<(), Message> {
        self.0.send(msg).map_err(|e| e.0)
    }

    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }
}

/// The consumer half of the inbound queue.
#[derive(Debug)]
pub struct InboundQueue(UnboundedReceiver<Message>);

impl InboundQueue {
    /// Waits for the next message.
    ///
    /// # Returns
    /// `None` once the queue is closed and drained.
    pub async fn pop(&mut self) -> Option<Message> {
        self.0.recv().await
    }

    /// Stops accepting new messages, the ones already queued can still be popped.
    pub fn close(&mut self) {
        self.0.close();
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fifo_per_producer() {
        let (tx, mut queue) = inbound();

        for i in 0..3 {
            tx.push(Message::new(0, format!("v{i}"), Tensor::zeros(vec![1])))
                .unwrap();
        }

        for i in 0..3 {
            assert_eq!(queue.pop().await.unwrap().name, format!("v{i}"));
        }
    }

    #[tokio::test]
    async fn concurrent_producers_deliver_everything() {
        let (tx, mut queue) = inbound();

        let producers: Vec<_> = (0..8)
            .map(|sender| {
                let tx = tx.clone();
                tokio::spawn(async move {
                    for i in 0..100 {
                        tx.push(Message::new(sender, format!("v{i}"), Tensor::zeros(vec![1])))
                            .unwrap();
                    }
                })
            })
            .collect();

        for producer in producers {
            producer.await.unwrap();
        }
        drop(tx);

        let mut last = [None; 8];
        let mut count = 0;

        while let Some(msg) = queue.pop().await {
            let i: usize = msg.name[1..].parse().unwrap();
            assert!(last[msg.sender].is_none_or(|prev| prev < i));
            last[msg.sender] = Some(i);
            count += 1;
        }

        assert_eq!(count, 800);
    }

    #[tokio::test]
    async fn closed_queue_drains_then_ends() {
        let (tx, mut queue) = inbound();
        tx.push(Message::terminate()).unwrap();
        queue.close();

        assert!(tx.push(Message::terminate()).is_err());
        assert_eq!(queue.pop().await.unwrap().kind(), MessageKind::Terminate);
        assert_eq!(queue.pop().await, None);
    }
}
