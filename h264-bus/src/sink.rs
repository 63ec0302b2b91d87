use std::sync::Arc;

use bytes::Bytes;

use crate::{graph::OutputSink, state::SessionState};

/// Copies every output the graph pushes into the session's collected queue, in arrival order.
pub struct SinkCollector {
    state: Arc<SessionState>,
}

impl SinkCollector {
    pub fn new(state: Arc<SessionState>) -> Self {
        Self { state }
    }
}

impl OutputSink for SinkCollector {
    fn accept_output(&self, unit: Option<&[u8]>) {
        match unit {
            Some(data) if !data.is_empty() => {
                let count = self.state.push_output(Bytes::copy_from_slice(data));
                log::trace!("collected output #{} ({} bytes)", count, data.len());
            }
            _ => log::trace!("output signalled without data, ignoring"),
        }
    }
}
