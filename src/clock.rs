// Frame clock
//
// Frame duration, exact / smoothed / average FPS for the main loop.

use std::time::{Duration, Instant};

const SMOOTHING: f64 = 0.9;

#[derive(Debug)]
pub struct AppClock {
    start: Instant,
    last_frame: Instant,
    frame_time: Duration,
    frame_count: u64,
    fps: f64,
    smoothed_fps: f64,
}

impl AppClock {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    fn starting_at(now: Instant) -> Self {
        Self {
            start: now,
            last_frame: now,
            frame_time: Duration::ZERO,
            frame_count: 0,
            fps: 0.0,
            smoothed_fps: 0.0,
        }
    }

    /// Mark the start of a new frame.
    pub fn next_frame(&mut self) {
        self.advance_to(Instant::now());
    }

    fn advance_to(&mut self, now: Instant) {
        self.frame_time = now.saturating_duration_since(self.last_frame);
        let secs = self.frame_time.as_secs_f64();
        if secs > 0.0 {
            self.fps = 1.0 / secs;
            self.smoothed_fps = self.smoothed_fps * SMOOTHING + self.fps * (1.0 - SMOOTHING);
        }
        self.last_frame = now;
        self.frame_count += 1;
    }

    pub fn start_time(&self) -> Instant {
        self.start
    }

    pub fn last_frame(&self) -> Instant {
        self.last_frame
    }

    pub fn uptime(&self) -> Duration {
        self.start.elapsed()
    }

    /// Duration of the most recent frame
    pub fn frame_time(&self) -> Duration {
        self.frame_time
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn smoothed_fps(&self) -> f64 {
        self.smoothed_fps
    }

    pub fn average_fps(&self) -> f64 {
        self.average_fps_at(Instant::now())
    }

    fn average_fps_at(&self, now: Instant) -> f64 {
        let uptime = now.saturating_duration_since(self.start).as_secs_f64();
        if uptime > 0.0 {
            self.frame_count as f64 / uptime
        } else {
            0.0
        }
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }
}

impl Default for AppClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_frames_and_measures_frame_time() {
        let t0 = Instant::now();
        let mut clock = AppClock::starting_at(t0);

        clock.advance_to(t0 + Duration::from_millis(10));
        clock.advance_to(t0 + Duration::from_millis(30));

        assert_eq!(clock.frame_count(), 2);
        assert_eq!(clock.frame_time(), Duration::from_millis(20));
        assert!((clock.fps() - 50.0).abs() < 1e-6);
        assert!((clock.average_fps_at(t0 + Duration::from_secs(1)) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn smoothed_fps_moves_toward_exact_fps() {
        let t0 = Instant::now();
        let mut clock = AppClock::starting_at(t0);

        clock.advance_to(t0 + Duration::from_millis(10));
        // 0.0 * 0.9 + 100 * 0.1
        assert!((clock.smoothed_fps() - 10.0).abs() < 1e-6);

        clock.advance_to(t0 + Duration::from_millis(20));
        assert!((clock.smoothed_fps() - 19.0).abs() < 1e-6);
    }
}
