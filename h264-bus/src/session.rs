use std::{collections::VecDeque, sync::Arc};

use bytes::Bytes;

use crate::{
    bus,
    config::Settings,
    error::{Error, Result},
    feed::FeedCoordinator,
    frame::{FrameBuffer, VideoFormat},
    graph::{Direction, GraphState, PipelineGraph, RunContext},
    packet::PayloadBuffer,
    pipeline::FfmpegGraph,
    sink::SinkCollector,
    state::SessionState,
    waiter::CompletionWaiter,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Ready,
    Running,
}

/// Drives one pipeline graph through `Ready -> Running -> Ready` for every call.
///
/// The graph is built and paused once, at construction, and torn down on drop. Calls take
/// `&mut self`, so one instance runs at most one call at a time; use separate instances for
/// parallel work.
///
/// Outputs are collected best-effort: with [`DropPolicy::DropOldest`](crate::config::DropPolicy)
/// the graph may discard outputs under pressure and the call still succeeds.
pub struct SessionController {
    graph: Box<dyn PipelineGraph>,
    lifecycle: LifecycleState,
    waiter: CompletionWaiter,
    runs: u64,
}

impl SessionController {
    pub fn new(mut graph: Box<dyn PipelineGraph>, settings: &Settings) -> Result<Self> {
        graph.set_state(GraphState::Ready).map_err(Error::pipeline)?;
        log::info!("{:?} session ready", graph.direction());
        Ok(Self {
            graph,
            lifecycle: LifecycleState::Ready,
            waiter: CompletionWaiter::new(settings.timeout()),
            runs: 0,
        })
    }

    /// Session over an ffmpeg H.264 encode graph.
    pub fn encoder(settings: &Settings) -> Result<Self> {
        let graph = FfmpegGraph::encoder(settings).map_err(Error::pipeline)?;
        Self::new(Box::new(graph), settings)
    }

    /// Session over an ffmpeg H.264 decode graph.
    pub fn decoder(settings: &Settings) -> Result<Self> {
        let graph = FfmpegGraph::decoder(settings).map_err(Error::pipeline)?;
        Self::new(Box::new(graph), settings)
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle
    }

    pub fn direction(&self) -> Direction {
        self.graph.direction()
    }

    /// Encodes a batch of equally sized frames.
    ///
    /// Returns one payload per output the graph emitted, in emission order. A codec may buffer
    /// or reorder internally, so payload `i` need not belong to frame `i`.
    pub async fn encode(&mut self, frames: &[FrameBuffer]) -> Result<Vec<PayloadBuffer>> {
        self.expect_direction(Direction::Encode)?;
        let format = frames
            .first()
            .map(FrameBuffer::format)
            .ok_or_else(|| Error::InvalidInput("encode needs at least one frame".to_string()))?;
        if let Some((index, frame)) = frames
            .iter()
            .enumerate()
            .find(|(_, f)| f.format() != format)
        {
            return Err(Error::InvalidInput(format!(
                "frame {} is {}, batch started with {}",
                index,
                frame.format(),
                format
            )));
        }

        let units = frames.iter().map(|f| f.data().clone()).collect();
        let outputs = self.run(units, Some(format)).await?;
        Ok(outputs.into_iter().map(PayloadBuffer::from).collect())
    }

    /// Decodes a batch of payloads.
    ///
    /// Frame size is taken from the format the graph negotiated during the run, and applied to
    /// every returned frame.
    pub async fn decode(&mut self, payloads: &[PayloadBuffer]) -> Result<Vec<FrameBuffer>> {
        self.expect_direction(Direction::Decode)?;
        if payloads.is_empty() {
            return Err(Error::InvalidInput(
                "decode needs at least one payload".to_string(),
            ));
        }
        if let Some(index) = payloads.iter().position(PayloadBuffer::is_empty) {
            return Err(Error::InvalidInput(format!("payload {} is empty", index)));
        }

        let units = payloads.iter().map(|p| p.data().clone()).collect();
        let outputs = self.run(units, None).await?;

        let format = self.graph.negotiated_format().ok_or_else(|| {
            Error::FormatResolutionFailure(format!(
                "graph reported no output format after {} outputs",
                outputs.len()
            ))
        })?;
        outputs
            .into_iter()
            .enumerate()
            .map(|(index, unit)| Self::frame_from_unit(index, unit, format))
            .collect()
    }

    fn frame_from_unit(index: usize, unit: Bytes, format: VideoFormat) -> Result<FrameBuffer> {
        if unit.len() != format.frame_size() {
            return Err(Error::FormatResolutionFailure(format!(
                "output {} has {} bytes, negotiated {} needs {}",
                index,
                unit.len(),
                format,
                format.frame_size()
            )));
        }
        FrameBuffer::with_data(format.width, format.height, unit)
    }

    fn expect_direction(&self, wanted: Direction) -> Result<()> {
        let actual = self.graph.direction();
        if actual != wanted {
            return Err(Error::InvalidInput(format!(
                "{:?} requested on a {:?} session",
                wanted, actual
            )));
        }
        Ok(())
    }

    async fn run(
        &mut self,
        units: VecDeque<Bytes>,
        input_format: Option<VideoFormat>,
    ) -> Result<Vec<Bytes>> {
        if self.lifecycle == LifecycleState::Running {
            // a previous call was dropped mid-run
            log::warn!("previous run was abandoned, pausing graph");
            self.pause()?;
        }

        self.runs += 1;
        let run_id = self.runs;
        let state = Arc::new(SessionState::new(units));
        let (poster, mut receiver) = bus::channel();
        let context = RunContext {
            source: Arc::new(FeedCoordinator::new(state.clone())),
            sink: Arc::new(SinkCollector::new(state.clone())),
            bus: poster,
            input_format,
        };
        log::info!(
            "run {}: {:?} of {} units",
            run_id,
            self.graph.direction(),
            state.pending_len()
        );

        let outcome = match self.start(context) {
            Ok(()) => self.waiter.wait(&mut receiver).await,
            Err(e) => Err(e),
        };
        let paused = self.pause();
        let collected = state.finish();

        if let Err(e) = outcome {
            log::error!("run {} failed: {}", run_id, e);
            return Err(e);
        }
        paused?;
        log::info!("run {}: collected {} outputs", run_id, collected.len());
        Ok(collected)
    }

    fn start(&mut self, context: RunContext) -> Result<()> {
        self.graph.attach(context).map_err(Error::pipeline)?;
        self.graph
            .set_state(GraphState::Running)
            .map_err(Error::pipeline)?;
        self.lifecycle = LifecycleState::Running;
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.lifecycle = LifecycleState::Ready;
        if self.graph.state() != GraphState::Ready {
            self.graph
                .set_state(GraphState::Ready)
                .map_err(Error::pipeline)?;
        }
        Ok(())
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Err(e) = self.graph.set_state(GraphState::Idle) {
            log::error!("failed to tear down {:?} graph: {:#}", self.graph.direction(), e);
        }
        self.lifecycle = LifecycleState::Idle;
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;
