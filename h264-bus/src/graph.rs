//! The seam between the session and whatever actually does the encoding or decoding.

use std::sync::Arc;

use bytes::Bytes;

use crate::{bus::BusPoster, frame::VideoFormat};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GraphState {
    /// Torn down; nothing allocated.
    Idle,
    /// Built and paused, ready to accept a run.
    Ready,
    /// Pulling input and pushing output.
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Raw frames in, encoded payloads out.
    Encode,
    /// Encoded payloads in, raw frames out.
    Decode,
}

/// Answer to a pull for input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pull {
    Unit(Bytes),
    EndOfStream,
}

/// Pull side: called from graph threads whenever the graph wants more input.
pub trait InputSource: Send + Sync {
    fn next_input(&self) -> Pull;
}

/// Push side: called from graph threads for every produced output unit.
///
/// The slice is only valid for the duration of the call. `None` means the graph signalled an
/// output but had nothing to hand over.
pub trait OutputSink: Send + Sync {
    fn accept_output(&self, unit: Option<&[u8]>);
}

/// Everything a graph needs for one run.
#[derive(Clone)]
pub struct RunContext {
    pub source: Arc<dyn InputSource>,
    pub sink: Arc<dyn OutputSink>,
    pub bus: BusPoster,
    /// Format of raw input units. Set for encode runs only.
    pub input_format: Option<VideoFormat>,
}

pub trait PipelineGraph: Send {
    fn direction(&self) -> Direction;

    fn state(&self) -> GraphState;

    /// Requests a transition. Entering `Running` requires a prior [`attach`](Self::attach).
    fn set_state(&mut self, state: GraphState) -> anyhow::Result<()>;

    /// Binds the handlers for the next run. Only valid while `Ready`.
    fn attach(&mut self, run: RunContext) -> anyhow::Result<()>;

    /// Output format resolved by the last run, if it produced any.
    fn negotiated_format(&self) -> Option<VideoFormat>;
}
