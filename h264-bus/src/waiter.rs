use std::time::Duration;

use crate::{
    bus::{BusMessage, BusReceiver},
    error::{Error, Result},
};

/// Waits on a run's bus until the graph reports end-of-stream or an error.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompletionWaiter {
    timeout: Option<Duration>,
}

impl CompletionWaiter {
    /// `None` waits indefinitely: a graph that never finishes hangs the caller.
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    pub async fn wait(&self, bus: &mut BusReceiver) -> Result<()> {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, Self::until_terminal(bus))
                .await
                .map_err(|_| Error::Timeout(limit))?,
            None => Self::until_terminal(bus).await,
        }
    }

    async fn until_terminal(bus: &mut BusReceiver) -> Result<()> {
        loop {
            match bus.next().await {
                Some(BusMessage::EndOfStream) => return Ok(()),
                Some(BusMessage::Error { message }) => {
                    log::error!("pipeline error: {}", message);
                    return Err(Error::PipelineFailure { message });
                }
                Some(BusMessage::Warning { message }) => {
                    log::warn!("pipeline warning: {}", message);
                }
                Some(BusMessage::StateChanged { from, to }) => {
                    log::debug!("pipeline state changed: {:?} -> {:?}", from, to);
                }
                None => {
                    return Err(Error::PipelineFailure {
                        message: "event bus closed before end of stream".to_string(),
                    });
                }
            }
        }
    }
}
