//! ffmpeg backed [`PipelineGraph`].
//!
//! ```text
//!   encode:  next_input ─► yuv420p frame ─► H.264 encoder ─┐
//!                                                          ├─► sink queue ─► accept_output
//!   decode:  next_input ─► H.264 decoder ─► yuv420p conv ──┘    (bounded)
//! ```
//!
//! A run uses two blocking threads: the streaming thread pulls input and drives the codec, the
//! sink thread drains the bounded queue into the session's sink and posts end-of-stream.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::{
    bus::{BusMessage, BusPoster},
    config::Settings,
    decoder::H264Decoder,
    encoder::H264Encoder,
    frame::{VideoFormat, pack_video_frame},
    graph::{Direction, GraphState, InputSource, PipelineGraph, Pull, RunContext},
    queue::{SinkQueue, drain_into, sink_queue},
    scaler::Yuv420Converter,
};

type Shared<T> = Arc<Mutex<T>>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct FfmpegGraph {
    direction: Direction,
    settings: Settings,
    state: GraphState,
    run: Option<RunContext>,
    // decode only: kept open between runs, borrowed by the streaming thread while running
    decoder: Shared<Option<H264Decoder>>,
    // replaced per run so a cancelled run cannot size a later one
    negotiated: Shared<Option<VideoFormat>>,
    cancel: Option<CancellationToken>,
}

impl FfmpegGraph {
    pub fn encoder(settings: &Settings) -> anyhow::Result<Self> {
        crate::init()?;
        Ok(Self::new(Direction::Encode, settings))
    }

    pub fn decoder(settings: &Settings) -> anyhow::Result<Self> {
        crate::init()?;
        Ok(Self::new(Direction::Decode, settings))
    }

    fn new(direction: Direction, settings: &Settings) -> Self {
        Self {
            direction,
            settings: settings.clone(),
            state: GraphState::Idle,
            run: None,
            decoder: Arc::new(Mutex::new(None)),
            negotiated: Arc::new(Mutex::new(None)),
            cancel: None,
        }
    }

    fn build(&mut self) -> anyhow::Result<()> {
        match self.direction {
            Direction::Encode => {
                // the encoder itself is opened per run, once the input size is known
                let codec = &self.settings.encoder.codec;
                if ffmpeg_next::encoder::find_by_name(codec).is_none() {
                    anyhow::bail!("codec not found: {}", codec);
                }
            }
            Direction::Decode => {
                let decoder = H264Decoder::open(self.settings.encoder.hardware)?;
                *lock(&self.decoder) = Some(decoder);
            }
        }
        Ok(())
    }

    fn start(&mut self) -> anyhow::Result<()> {
        let run = self
            .run
            .take()
            .ok_or_else(|| anyhow::anyhow!("no run attached"))?;
        self.negotiated = Arc::new(Mutex::new(None));
        let stage = match self.direction {
            Direction::Encode => {
                let format = run
                    .input_format
                    .ok_or_else(|| anyhow::anyhow!("encode run needs an input format"))?;
                Stage::Encode {
                    settings: self.settings.encoder.clone(),
                    format,
                    encoder: None,
                }
            }
            Direction::Decode => Stage::Decode {
                slot: self.decoder.clone(),
                decoder: None,
                hardware: self.settings.encoder.hardware,
                converter: Yuv420Converter::default(),
                negotiated: self.negotiated.clone(),
            },
        };
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| anyhow::anyhow!("graph needs a tokio runtime: {}", e))?;

        let cancel = CancellationToken::new();
        let (queue, rx) = sink_queue(&self.settings.sink, run.bus.clone(), cancel.clone());
        run.bus.post(BusMessage::StateChanged {
            from: GraphState::Ready,
            to: GraphState::Running,
        });

        let RunContext {
            source, sink, bus, ..
        } = run;
        {
            let bus = bus.clone();
            let cancel = cancel.clone();
            handle.spawn_blocking(move || streaming_thread(stage, source, queue, bus, cancel));
        }
        {
            let cancel = cancel.clone();
            handle.spawn_blocking(move || drain_into(rx, sink, bus, cancel));
        }
        self.cancel = Some(cancel);
        Ok(())
    }

    fn pause(&mut self) {
        // a finished run has already stopped on its own; this only matters for aborts
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
    }

    fn teardown(&mut self) {
        self.pause();
        self.run = None;
        *lock(&self.decoder) = None;
        self.negotiated = Arc::new(Mutex::new(None));
    }
}

impl PipelineGraph for FfmpegGraph {
    fn direction(&self) -> Direction {
        self.direction
    }

    fn state(&self) -> GraphState {
        self.state
    }

    fn set_state(&mut self, state: GraphState) -> anyhow::Result<()> {
        match (self.state, state) {
            (from, to) if from == to => return Ok(()),
            (GraphState::Idle, GraphState::Ready) => self.build()?,
            (GraphState::Ready, GraphState::Running) => self.start()?,
            (GraphState::Running, GraphState::Ready) => self.pause(),
            (_, GraphState::Idle) => self.teardown(),
            (GraphState::Idle, GraphState::Running) => {
                anyhow::bail!("graph must be Ready before Running")
            }
            (from, to) => anyhow::bail!("unsupported transition {:?} -> {:?}", from, to),
        }
        log::debug!(
            "{:?} graph {:?} -> {:?}",
            self.direction,
            self.state,
            state
        );
        self.state = state;
        Ok(())
    }

    fn attach(&mut self, run: RunContext) -> anyhow::Result<()> {
        if self.state != GraphState::Ready {
            anyhow::bail!("cannot attach a run while {:?}", self.state);
        }
        self.negotiated = Arc::new(Mutex::new(None));
        self.run = Some(run);
        Ok(())
    }

    fn negotiated_format(&self) -> Option<VideoFormat> {
        *lock(&self.negotiated)
    }
}

enum Stage {
    Encode {
        settings: crate::config::EncoderSettings,
        format: VideoFormat,
        encoder: Option<H264Encoder>,
    },
    Decode {
        slot: Shared<Option<H264Decoder>>,
        decoder: Option<H264Decoder>,
        hardware: bool,
        converter: Yuv420Converter,
        negotiated: Shared<Option<VideoFormat>>,
    },
}

impl Stage {
    fn send(&mut self, unit: &[u8]) -> anyhow::Result<()> {
        match self {
            Stage::Encode {
                settings,
                format,
                encoder,
            } => {
                if encoder.is_none() {
                    *encoder = Some(H264Encoder::open(settings, *format)?);
                }
                match encoder.as_mut() {
                    Some(encoder) => encoder.send_unit(unit),
                    None => anyhow::bail!("encoder not open"),
                }
            }
            Stage::Decode {
                slot,
                decoder,
                hardware,
                ..
            } => {
                if decoder.is_none() {
                    *decoder = match lock(slot).take() {
                        Some(d) => Some(d),
                        // a previous aborted run still holds the session decoder
                        None => Some(H264Decoder::open(*hardware)?),
                    };
                }
                match decoder.as_mut() {
                    Some(decoder) => decoder.send_unit(unit),
                    None => anyhow::bail!("decoder not open"),
                }
            }
        }
    }

    fn send_eof(&mut self) -> anyhow::Result<()> {
        match self {
            Stage::Encode { encoder, .. } => match encoder.as_mut() {
                Some(encoder) => encoder.send_eof(),
                None => Ok(()),
            },
            Stage::Decode { decoder, .. } => match decoder.as_mut() {
                Some(decoder) => decoder.send_eof(),
                None => Ok(()),
            },
        }
    }

    /// Moves every output the codec has ready into the sink queue.
    fn drain(
        &mut self,
        queue: &mut SinkQueue,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        match self {
            Stage::Encode { encoder, .. } => {
                let Some(encoder) = encoder.as_mut() else {
                    return Ok(());
                };
                while let Some(packet) = encoder.receive_packet()? {
                    if cancel.is_cancelled() {
                        return Ok(());
                    }
                    queue.push(packet)?;
                }
            }
            Stage::Decode {
                decoder,
                converter,
                negotiated,
                ..
            } => {
                let Some(decoder) = decoder.as_mut() else {
                    return Ok(());
                };
                while let Some(frame) = decoder.receive_frame()? {
                    if cancel.is_cancelled() {
                        return Ok(());
                    }
                    let format = VideoFormat::new(frame.width(), frame.height());
                    let previous = lock(negotiated).replace(format);
                    if previous != Some(format) {
                        log::info!("decoder negotiated {} output", format);
                    }
                    let frame = converter.convert(frame)?;
                    let unit: Bytes = pack_video_frame(&frame)?;
                    queue.push(unit)?;
                }
            }
        }
        Ok(())
    }

    /// Returns the session decoder to its slot, ready for the next run.
    fn release(self) {
        if let Stage::Decode {
            slot,
            decoder: Some(mut decoder),
            ..
        } = self
        {
            decoder.reset();
            *lock(&slot) = Some(decoder);
        }
    }
}

/// Pulls until end of input. Returns false if cancelled first.
fn pump(
    stage: &mut Stage,
    source: &dyn InputSource,
    queue: &mut SinkQueue,
    cancel: &CancellationToken,
) -> anyhow::Result<bool> {
    let mut fed = 0usize;
    loop {
        if cancel.is_cancelled() {
            return Ok(false);
        }
        match source.next_input() {
            Pull::Unit(unit) => {
                stage.send(&unit)?;
                fed += 1;
                stage.drain(queue, cancel)?;
            }
            Pull::EndOfStream => {
                stage.send_eof()?;
                stage.drain(queue, cancel)?;
                if cancel.is_cancelled() {
                    return Ok(false);
                }
                log::debug!(
                    "streaming thread consumed {} units, dropped {} outputs",
                    fed,
                    queue.dropped()
                );
                return Ok(true);
            }
        }
    }
}

fn streaming_thread(
    mut stage: Stage,
    source: Arc<dyn InputSource>,
    mut queue: SinkQueue,
    bus: BusPoster,
    cancel: CancellationToken,
) {
    let outcome = pump(&mut stage, source.as_ref(), &mut queue, &cancel);
    stage.release();

    let outcome = match outcome {
        Ok(true) => queue.finish(),
        Ok(false) => {
            log::debug!("streaming thread cancelled");
            return;
        }
        Err(e) => Err(e),
    };
    if let Err(e) = outcome {
        if cancel.is_cancelled() {
            log::debug!("streaming thread stopped after cancel: {:#}", e);
        } else {
            log::error!("streaming thread failed: {:#}", e);
            bus.error(&e);
        }
    }
}

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod pipeline_test;
