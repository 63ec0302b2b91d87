//! Bounded hand-off between a graph's codec stage and its sink callback.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError};
use tokio_util::sync::CancellationToken;

use crate::{
    bus::{BusMessage, BusPoster},
    config::{DropPolicy, SinkSettings},
    graph::OutputSink,
};

/// Log "queue full" at most every N drops.
const DROP_LOG_INTERVAL: u64 = 120;
const POLL_INTERVAL: Duration = Duration::from_millis(5);

pub(crate) enum SinkItem {
    Sample(Bytes),
    EndOfStream,
}

pub(crate) struct SinkQueue {
    tx: Sender<SinkItem>,
    // held so the producer can evict the oldest sample itself
    rx: Receiver<SinkItem>,
    policy: DropPolicy,
    dropped: u64,
    bus: BusPoster,
    cancel: CancellationToken,
}

pub(crate) fn sink_queue(
    settings: &SinkSettings,
    bus: BusPoster,
    cancel: CancellationToken,
) -> (SinkQueue, Receiver<SinkItem>) {
    let (tx, rx) = crossbeam_channel::bounded(settings.max_buffers.max(1));
    let queue = SinkQueue {
        tx,
        rx: rx.clone(),
        policy: settings.drop_policy,
        dropped: 0,
        bus,
        cancel,
    };
    (queue, rx)
}

impl SinkQueue {
    pub fn push(&mut self, unit: Bytes) -> anyhow::Result<()> {
        match self.policy {
            DropPolicy::DropOldest => self.push_lossy(SinkItem::Sample(unit)),
            DropPolicy::Block => self.push_blocking(SinkItem::Sample(unit)),
        }
    }

    /// Queues the end-of-stream marker. Never subject to the drop policy.
    pub fn finish(mut self) -> anyhow::Result<()> {
        if self.dropped > 0 {
            log::info!("sink queue dropped {} outputs this run", self.dropped);
        }
        self.push_blocking(SinkItem::EndOfStream)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn push_lossy(&mut self, mut item: SinkItem) -> anyhow::Result<()> {
        loop {
            match self.tx.try_send(item) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(back)) => {
                    item = back;
                    if self.rx.try_recv().is_ok() {
                        self.dropped += 1;
                        if self.dropped % DROP_LOG_INTERVAL == 1 {
                            log::debug!(
                                "sink queue full, dropped {} outputs (oldest first)",
                                self.dropped
                            );
                            self.bus.post(BusMessage::Warning {
                                message: format!("dropped {} outputs", self.dropped),
                            });
                        }
                    }
                }
                Err(TrySendError::Disconnected(_)) => anyhow::bail!("sink queue closed"),
            }
        }
    }

    fn push_blocking(&mut self, mut item: SinkItem) -> anyhow::Result<()> {
        loop {
            if self.cancel.is_cancelled() {
                anyhow::bail!("sink queue cancelled");
            }
            match self.tx.send_timeout(item, POLL_INTERVAL) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(back)) => item = back,
                Err(SendTimeoutError::Disconnected(_)) => anyhow::bail!("sink queue closed"),
            }
        }
    }
}

/// Sink thread body: hands every queued sample to `sink`, then posts end-of-stream once the
/// marker arrives. Returns the number of samples delivered.
pub(crate) fn drain_into(
    rx: Receiver<SinkItem>,
    sink: Arc<dyn OutputSink>,
    bus: BusPoster,
    cancel: CancellationToken,
) -> usize {
    let mut delivered = 0;
    loop {
        if cancel.is_cancelled() {
            log::debug!("sink drain cancelled after {} outputs", delivered);
            return delivered;
        }
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(SinkItem::Sample(unit)) => {
                sink.accept_output((!unit.is_empty()).then_some(&unit[..]));
                delivered += 1;
            }
            Ok(SinkItem::EndOfStream) => {
                log::debug!("sink drained {} outputs, end of stream", delivered);
                bus.post(BusMessage::EndOfStream);
                return delivered;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                // producer gave up; it reports its own error
                log::debug!("sink queue closed without end of stream");
                return delivered;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::bus;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Option<Vec<u8>>>>);

    impl OutputSink for Recorder {
        fn accept_output(&self, unit: Option<&[u8]>) {
            self.0.lock().unwrap().push(unit.map(|u| u.to_vec()));
        }
    }

    fn settings(max_buffers: usize, drop_policy: DropPolicy) -> SinkSettings {
        SinkSettings {
            max_buffers,
            drop_policy,
        }
    }

    #[test]
    fn test_drop_oldest_keeps_newest_outputs() {
        let (poster, _bus) = bus::channel();
        let (mut queue, rx) = sink_queue(
            &settings(2, DropPolicy::DropOldest),
            poster.clone(),
            CancellationToken::new(),
        );
        for i in 0..5u8 {
            queue.push(Bytes::from(vec![i])).unwrap();
        }
        assert_eq!(queue.dropped(), 3);

        let recorder = Arc::new(Recorder::default());
        // finish needs room for the marker
        let drain = std::thread::spawn({
            let recorder = recorder.clone();
            move || drain_into(rx, recorder, poster, CancellationToken::new())
        });
        queue.finish().unwrap();
        assert_eq!(drain.join().unwrap(), 2);

        let seen = recorder.0.lock().unwrap().clone();
        assert_eq!(seen, vec![Some(vec![3]), Some(vec![4])]);
    }

    #[test]
    fn test_block_policy_is_loss_free() {
        let (poster, mut bus) = bus::channel();
        let (mut queue, rx) = sink_queue(
            &settings(1, DropPolicy::Block),
            poster.clone(),
            CancellationToken::new(),
        );
        let recorder = Arc::new(Recorder::default());
        let drain = std::thread::spawn({
            let recorder = recorder.clone();
            move || drain_into(rx, recorder, poster, CancellationToken::new())
        });

        for i in 0..50u8 {
            queue.push(Bytes::from(vec![i])).unwrap();
        }
        assert_eq!(queue.dropped(), 0);
        queue.finish().unwrap();

        assert_eq!(drain.join().unwrap(), 50);
        let seen = recorder.0.lock().unwrap().clone();
        let expected: Vec<_> = (0..50u8).map(|i| Some(vec![i])).collect();
        assert_eq!(seen, expected);
        assert_eq!(bus.try_next(), Some(BusMessage::EndOfStream));
    }

    #[test]
    fn test_closed_queue_posts_nothing() {
        let (poster, mut bus) = bus::channel();
        let (queue, rx) = sink_queue(
            &settings(4, DropPolicy::Block),
            poster.clone(),
            CancellationToken::new(),
        );
        drop(queue);

        let delivered = drain_into(
            rx,
            Arc::new(Recorder::default()),
            poster,
            CancellationToken::new(),
        );
        assert_eq!(delivered, 0);
        assert_eq!(bus.try_next(), None);
    }

    #[test]
    fn test_empty_sample_reaches_sink_as_none() {
        let (poster, _bus) = bus::channel();
        let (mut queue, rx) = sink_queue(
            &settings(4, DropPolicy::Block),
            poster.clone(),
            CancellationToken::new(),
        );
        queue.push(Bytes::new()).unwrap();
        queue.finish().unwrap();

        let recorder = Arc::new(Recorder::default());
        drain_into(rx, recorder.clone(), poster, CancellationToken::new());
        assert_eq!(recorder.0.lock().unwrap().clone(), vec![None]);
    }

    #[test]
    fn test_cancelled_blocking_push_gives_up() {
        let (poster, _bus) = bus::channel();
        let cancel = CancellationToken::new();
        let (mut queue, _rx) = sink_queue(&settings(1, DropPolicy::Block), poster, cancel.clone());
        queue.push(Bytes::from_static(b"a")).unwrap();
        cancel.cancel();
        assert!(queue.push(Bytes::from_static(b"b")).is_err());
    }
}
