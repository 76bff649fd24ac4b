//! Outbound transform throttling: a pure, directly-testable function of
//! state that decides whether the local participant's current transform is
//! worth sending this tick. Performs no I/O itself — the caller wraps the
//! returned [`OutgoingPosition`] into a wire frame.

use protocol::types::{Transform, WorldVolume};

pub const DEFAULT_POSITION_THRESHOLD: f64 = 0.01;
pub const DEFAULT_ROTATION_THRESHOLD: f64 = 0.001;
pub const DEFAULT_VOLUME_THRESHOLD: f64 = 0.1;
pub const MIN_SEND_RATE_HZ: f64 = 1.0;
pub const MAX_SEND_RATE_HZ: f64 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutgoingPosition {
    pub transform: Transform,
    pub volume: Option<WorldVolume>,
}

/// Gates outbound POSITION frames by rate first, then by per-field delta —
/// throttle, then gate. A participant holding perfectly still costs zero
/// bandwidth once its first frame has gone out.
pub struct SendScheduler {
    send_rate_hz: f64,
    position_threshold: f64,
    rotation_threshold: f64,
    volume_threshold: f64,
    last_sent: Option<Transform>,
    last_sent_volume: Option<WorldVolume>,
    last_sent_at_ms: Option<f64>,
}

impl SendScheduler {
    pub fn new(send_rate_hz: f64) -> Self {
        SendScheduler {
            send_rate_hz: send_rate_hz.clamp(MIN_SEND_RATE_HZ, MAX_SEND_RATE_HZ),
            position_threshold: DEFAULT_POSITION_THRESHOLD,
            rotation_threshold: DEFAULT_ROTATION_THRESHOLD,
            volume_threshold: DEFAULT_VOLUME_THRESHOLD,
            last_sent: None,
            last_sent_volume: None,
            last_sent_at_ms: None,
        }
    }

    pub fn send_rate_hz(&self) -> f64 {
        self.send_rate_hz
    }

    /// Evaluates whether `transform`/`volume` should go out at `now_ms`.
    /// Returns `None` if either the rate limit or the delta gate suppresses
    /// this tick; otherwise records the send and returns the payload.
    pub fn maybe_send(
        &mut self,
        now_ms: f64,
        transform: Transform,
        volume: Option<WorldVolume>,
    ) -> Option<OutgoingPosition> {
        if let Some(last_at) = self.last_sent_at_ms {
            let min_interval_ms = 1000.0 / self.send_rate_hz;
            if now_ms - last_at < min_interval_ms {
                return None;
            }
        }

        if !self.crosses_gate(&transform, volume) {
            return None;
        }

        self.last_sent = Some(transform);
        self.last_sent_volume = volume;
        self.last_sent_at_ms = Some(now_ms);

        Some(OutgoingPosition { transform, volume })
    }

    fn crosses_gate(&self, transform: &Transform, volume: Option<WorldVolume>) -> bool {
        let Some(last) = self.last_sent else {
            return true;
        };

        let position_moved = (0..3)
            .any(|axis| (transform.pos[axis] - last.pos[axis]).abs() > self.position_threshold);
        let rotated = (0..3)
            .any(|axis| (transform.rot[axis] - last.rot[axis]).abs() > self.rotation_threshold);
        let rescaled =
            (transform.visual_scale - last.visual_scale).abs() > self.position_threshold;
        let volume_changed = match (volume, self.last_sent_volume) {
            (Some(v), Some(l)) => (v.0 - l.0).abs() > self.volume_threshold,
            (Some(_), None) | (None, Some(_)) => true,
            (None, None) => false,
        };

        position_moved || rotated || rescaled || volume_changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn still() -> Transform {
        Transform {
            pos: [1.0, 2.0, 3.0],
            rot: [0.0, 0.0, 0.0],
            visual_scale: 1.0,
        }
    }

    #[test]
    fn first_transform_always_sends() {
        let mut scheduler = SendScheduler::new(20.0);
        assert!(scheduler.maybe_send(0.0, still(), None).is_some());
    }

    #[test]
    fn motionless_client_sends_nothing_after_the_first_frame() {
        let mut scheduler = SendScheduler::new(20.0);
        assert!(scheduler.maybe_send(0.0, still(), None).is_some());

        for tick in 1..600 {
            let now_ms = tick as f64 * (1000.0 / 20.0);
            assert!(
                scheduler.maybe_send(now_ms, still(), None).is_none(),
                "unexpected send at tick {tick}"
            );
        }
    }

    #[test]
    fn rate_limit_suppresses_sends_faster_than_the_configured_hz() {
        let mut scheduler = SendScheduler::new(10.0); // 100ms interval
        assert!(scheduler.maybe_send(0.0, still(), None).is_some());

        let mut moved = still();
        moved.pos[0] += 5.0;
        assert!(
            scheduler.maybe_send(50.0, moved, None).is_none(),
            "too soon after the last send"
        );
        assert!(scheduler.maybe_send(100.0, moved, None).is_some());
    }

    #[test]
    fn small_jitter_below_threshold_does_not_send() {
        let mut scheduler = SendScheduler::new(20.0);
        scheduler.maybe_send(0.0, still(), None).unwrap();

        let mut jittered = still();
        jittered.pos[0] += DEFAULT_POSITION_THRESHOLD / 2.0;
        assert!(scheduler.maybe_send(1000.0, jittered, None).is_none());
    }

    #[test]
    fn movement_past_threshold_sends() {
        let mut scheduler = SendScheduler::new(20.0);
        scheduler.maybe_send(0.0, still(), None).unwrap();

        let mut moved = still();
        moved.pos[0] += DEFAULT_POSITION_THRESHOLD * 2.0;
        assert!(scheduler.maybe_send(1000.0, moved, None).is_some());
    }

    #[test]
    fn volume_change_past_threshold_sends_even_with_identical_transform() {
        let mut scheduler = SendScheduler::new(20.0);
        scheduler
            .maybe_send(0.0, still(), Some(WorldVolume(10.0)))
            .unwrap();
        assert!(scheduler
            .maybe_send(1000.0, still(), Some(WorldVolume(10.0 + DEFAULT_VOLUME_THRESHOLD * 2.0)))
            .is_some());
    }

    #[test]
    fn send_rate_is_clamped_to_one_through_sixty_hz() {
        assert_eq!(SendScheduler::new(0.0).send_rate_hz(), MIN_SEND_RATE_HZ);
        assert_eq!(SendScheduler::new(1000.0).send_rate_hz(), MAX_SEND_RATE_HZ);
    }
}
