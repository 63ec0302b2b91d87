//! Batch H.264 transcoding over an ffmpeg graph.
//!
//! A [`SessionController`] owns one graph for its whole life and runs it once per
//! [`encode`](SessionController::encode) or [`decode`](SessionController::decode) call: the graph
//! pulls input from a [`FeedCoordinator`], pushes outputs into a [`SinkCollector`], and the call
//! returns once the [`CompletionWaiter`] sees end-of-stream or an error on the run's bus.

/// Registers FFmpeg components. Safe to call more than once.
pub fn init() -> anyhow::Result<()> {
    ffmpeg_next::init().map_err(|e| anyhow::anyhow!("ffmpeg_next init: {}", e))
}

pub mod bus;
pub mod config;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod feed;
pub mod frame;
pub mod graph;
pub mod hw;
pub mod packet;
pub mod pipeline;
mod queue;
pub mod scaler;
pub mod session;
pub mod sink;
pub mod state;
pub mod waiter;

pub use config::{DropPolicy, EncoderSettings, Settings, SinkSettings};
pub use error::{Error, Result};
pub use feed::FeedCoordinator;
pub use frame::{FrameBuffer, VideoFormat};
pub use graph::{Direction, GraphState};
pub use packet::PayloadBuffer;
pub use session::{LifecycleState, SessionController};
pub use sink::SinkCollector;
pub use waiter::CompletionWaiter;
