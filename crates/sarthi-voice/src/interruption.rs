//! Barge-in handling.
//!
//! When the service reports that the user started talking over the
//! assistant, everything still queued for playback is cut. Capture is left
//! alone: the user's speech is what triggered the interruption.

use crate::playback::PlaybackScheduler;
use crate::session::SessionState;
use tracing::{debug, info};

#[derive(Debug, Default)]
pub struct InterruptionController {
    handled: u64,
}

impl InterruptionController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset playback if the session is live. Returns whether it acted.
    pub fn on_interrupted(&mut self, state: &SessionState, scheduler: &mut PlaybackScheduler) -> bool {
        if *state != SessionState::Active {
            debug!(?state, "interruption ignored outside an active session");
            return false;
        }
        let cut = scheduler.queued();
        scheduler.reset();
        self.handled += 1;
        info!(
            cut_ms = cut.as_millis() as u64,
            total = self.handled,
            "⚡ Barge-in: assistant output silenced"
        );
        true
    }

    /// Interruptions acted on so far.
    pub fn handled(&self) -> u64 {
        self.handled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode, OUTPUT_SAMPLE_RATE};
    use crate::error::VoiceResult;
    use crate::playback::{OutputDevice, SourceId};
    use std::sync::Arc;
    use std::time::Duration;

    struct FrozenClock;

    impl OutputDevice for FrozenClock {
        fn now(&self) -> Duration {
            Duration::ZERO
        }
        fn sample_rate(&self) -> u32 {
            OUTPUT_SAMPLE_RATE
        }
        fn start_at(
            &mut self,
            _samples: Arc<[f32]>,
            start: Duration,
        ) -> VoiceResult<(SourceId, Duration)> {
            Ok((SourceId(1), start))
        }
        fn stop(&mut self, _id: SourceId) {}
    }

    #[test]
    fn acts_only_while_active() {
        let mut scheduler = PlaybackScheduler::new(Box::new(FrozenClock));
        scheduler
            .on_chunk(&encode(&[0.1; 2400], OUTPUT_SAMPLE_RATE))
            .unwrap();
        let mut controller = InterruptionController::new();

        assert!(!controller.on_interrupted(&SessionState::Connecting, &mut scheduler));
        assert_eq!(scheduler.active_count(), 1);

        assert!(controller.on_interrupted(&SessionState::Active, &mut scheduler));
        assert_eq!(scheduler.active_count(), 0);
        assert_eq!(scheduler.cursor(), Duration::ZERO);
        assert_eq!(controller.handled(), 1);
    }
}
