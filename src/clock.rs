use std::time::Instant;

/// Frame clock. Deltas are clamped so a stalled frame (window drag, debugger
/// break) does not launch animations.
#[derive(Clone, Debug)]
pub struct Clock {
    start: Option<Instant>,
    last: Option<Instant>,
    elapsed: f32,
    delta: f32,
    frames: u64,
    max_delta: f32,
}

impl Default for Clock {
    fn default() -> Self {
        Self {
            start: None,
            last: None,
            elapsed: 0.0,
            delta: 0.0,
            frames: 0,
            max_delta: 0.1,
        }
    }
}

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances to `now` and returns the delta in seconds. The first tick
    /// has a zero delta.
    pub fn tick(&mut self, now: Instant) -> f32 {
        let start = *self.start.get_or_insert(now);
        self.delta = self
            .last
            .map(|last| now.saturating_duration_since(last).as_secs_f32())
            .unwrap_or(0.0)
            .min(self.max_delta);
        self.elapsed = now.saturating_duration_since(start).as_secs_f32();
        self.last = Some(now);
        self.frames += 1;
        self.delta
    }

    pub fn delta(&self) -> f32 {
        self.delta
    }

    /// Seconds since the first tick.
    pub fn elapsed(&self) -> f32 {
        self.elapsed
    }

    /// Number of ticks so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn deltas_are_clamped() {
        let mut clock = Clock::new();
        let t0 = Instant::now();
        assert_eq!(clock.tick(t0), 0.0);
        let d = clock.tick(t0 + Duration::from_millis(16));
        assert!((d - 0.016).abs() < 1e-6);
        assert_eq!(clock.tick(t0 + Duration::from_secs(5)), 0.1);
        assert!((clock.elapsed() - 5.0).abs() < 1e-6);
        assert_eq!(clock.frames(), 3);
    }
}
