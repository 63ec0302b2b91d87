//! Per-run event bus between a pipeline graph and the session waiting on it.
//!
//! The graph posts from its worker threads; the session reads on the calling task. Every run
//! gets its own channel, so a worker left over from an aborted run can only post into a bus
//! nobody reads any more.

use tokio::sync::mpsc;

use crate::graph::GraphState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusMessage {
    /// All input was consumed and every surviving output has been handed to the sink.
    EndOfStream,
    /// The graph failed; the run is over.
    Error { message: String },
    StateChanged { from: GraphState, to: GraphState },
    /// Something worth logging that does not end the run, e.g. dropped outputs.
    Warning { message: String },
}

impl BusMessage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BusMessage::EndOfStream | BusMessage::Error { .. })
    }
}

#[derive(Debug, Clone)]
pub struct BusPoster {
    tx: mpsc::UnboundedSender<BusMessage>,
}

impl BusPoster {
    /// Posting never fails; once the reader is gone messages are discarded.
    pub fn post(&self, message: BusMessage) {
        if let Err(e) = self.tx.send(message) {
            log::trace!("bus reader gone, discarding {:?}", e.0);
        }
    }

    pub fn error(&self, err: &anyhow::Error) {
        self.post(BusMessage::Error {
            message: format!("{:#}", err),
        });
    }
}

#[derive(Debug)]
pub struct BusReceiver {
    rx: mpsc::UnboundedReceiver<BusMessage>,
}

impl BusReceiver {
    /// Next message, or `None` once every poster has been dropped and the queue is empty.
    pub async fn next(&mut self) -> Option<BusMessage> {
        self.rx.recv().await
    }

    /// Non-blocking variant of [`next`](Self::next).
    pub fn try_next(&mut self) -> Option<BusMessage> {
        self.rx.try_recv().ok()
    }
}

pub fn channel() -> (BusPoster, BusReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (BusPoster { tx }, BusReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_messages_arrive_in_post_order() {
        let (poster, mut receiver) = channel();
        poster.post(BusMessage::Warning {
            message: "late".to_string(),
        });
        poster.post(BusMessage::EndOfStream);
        drop(poster);

        assert!(matches!(
            receiver.next().await,
            Some(BusMessage::Warning { .. })
        ));
        assert_eq!(receiver.next().await, Some(BusMessage::EndOfStream));
        assert_eq!(receiver.next().await, None);
    }

    #[test]
    fn test_post_after_reader_dropped_is_silent() {
        let (poster, receiver) = channel();
        drop(receiver);
        poster.post(BusMessage::EndOfStream);
    }

    #[test]
    fn test_terminal_messages() {
        assert!(BusMessage::EndOfStream.is_terminal());
        assert!(
            BusMessage::Error {
                message: String::new()
            }
            .is_terminal()
        );
        assert!(
            !BusMessage::StateChanged {
                from: GraphState::Ready,
                to: GraphState::Running
            }
            .is_terminal()
        );
    }
}
