use std::collections::VecDeque;
use std::sync::{
    Mutex, MutexGuard, PoisonError,
    atomic::{AtomicBool, Ordering},
};

use bytes::Bytes;

/// Queues shared between the calling task and the graph's threads for a single run.
///
/// A fresh state is built for every run and drained with [`finish`](Self::finish) when the run
/// ends.
#[derive(Debug, Default)]
pub struct SessionState {
    pending: Mutex<VecDeque<Bytes>>,
    collected: Mutex<Vec<Bytes>>,
    end_of_input: AtomicBool,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // a panicking graph thread must not take the session down with it
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionState {
    pub fn new(input: impl IntoIterator<Item = Bytes>) -> Self {
        Self {
            pending: Mutex::new(input.into_iter().collect()),
            collected: Mutex::new(Vec::new()),
            end_of_input: AtomicBool::new(false),
        }
    }

    pub(crate) fn pop_input(&self) -> Option<Bytes> {
        lock(&self.pending).pop_front()
    }

    /// Marks input as exhausted. Returns true only for the first caller.
    pub(crate) fn mark_end_of_input(&self) -> bool {
        !self.end_of_input.swap(true, Ordering::AcqRel)
    }

    pub fn end_of_input(&self) -> bool {
        self.end_of_input.load(Ordering::Acquire)
    }

    pub(crate) fn push_output(&self, unit: Bytes) -> usize {
        let mut collected = lock(&self.collected);
        collected.push(unit);
        collected.len()
    }

    pub fn pending_len(&self) -> usize {
        lock(&self.pending).len()
    }

    pub fn collected_len(&self) -> usize {
        lock(&self.collected).len()
    }

    /// Empties both queues and returns what was collected, in arrival order.
    pub fn finish(&self) -> Vec<Bytes> {
        let leftover = std::mem::take(&mut *lock(&self.pending));
        if !leftover.is_empty() {
            log::debug!("discarding {} unconsumed input units", leftover.len());
        }
        std::mem::take(&mut *lock(&self.collected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_resets_both_queues() {
        let state = SessionState::new([Bytes::from_static(b"a"), Bytes::from_static(b"b")]);
        state.pop_input();
        state.push_output(Bytes::from_static(b"x"));

        assert_eq!(state.finish(), vec![Bytes::from_static(b"x")]);
        assert_eq!(state.pending_len(), 0);
        assert_eq!(state.collected_len(), 0);
        assert!(state.finish().is_empty());
    }

    #[test]
    fn test_end_of_input_marked_once() {
        let state = SessionState::default();
        assert!(!state.end_of_input());
        assert!(state.mark_end_of_input());
        assert!(!state.mark_end_of_input());
        assert!(state.end_of_input());
    }
}
