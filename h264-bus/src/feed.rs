use std::sync::Arc;

use crate::{
    graph::{InputSource, Pull},
    state::SessionState,
};

/// Answers the graph's pulls from the session's pending queue, in submission order.
pub struct FeedCoordinator {
    state: Arc<SessionState>,
}

impl FeedCoordinator {
    pub fn new(state: Arc<SessionState>) -> Self {
        Self { state }
    }
}

impl InputSource for FeedCoordinator {
    fn next_input(&self) -> Pull {
        match self.state.pop_input() {
            Some(unit) => {
                log::trace!("feeding input unit of {} bytes", unit.len());
                Pull::Unit(unit)
            }
            None => {
                // graphs may keep pulling after end of input; answer the same way every time
                if self.state.mark_end_of_input() {
                    log::debug!("input exhausted, signalling end of stream");
                }
                Pull::EndOfStream
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    #[test]
    fn test_feeds_in_submission_order_then_end_of_stream() {
        let state = Arc::new(SessionState::new(
            [&b"one"[..], &b"two"[..], &b"three"[..]].map(Bytes::from_static),
        ));
        let feed = FeedCoordinator::new(state.clone());

        assert_eq!(feed.next_input(), Pull::Unit(Bytes::from_static(b"one")));
        assert_eq!(feed.next_input(), Pull::Unit(Bytes::from_static(b"two")));
        assert_eq!(feed.next_input(), Pull::Unit(Bytes::from_static(b"three")));
        assert!(!state.end_of_input());
        assert_eq!(feed.next_input(), Pull::EndOfStream);
        assert!(state.end_of_input());
    }

    #[test]
    fn test_repeated_pulls_after_end_of_stream() {
        let feed = FeedCoordinator::new(Arc::new(SessionState::default()));
        for _ in 0..3 {
            assert_eq!(feed.next_input(), Pull::EndOfStream);
        }
    }
}
