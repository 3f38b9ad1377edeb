use formats::dat::FrameTiming;
use rand::Rng;

/// Frame duration used when the metadata carries none.
pub const ITEM_FRAME_DURATION: u32 = 500;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameDuration {
    pub min: u32,
    pub max: u32,
}

impl FrameDuration {
    pub fn new(min: u32, max: u32) -> Self {
        Self {
            min: min.min(max),
            max,
        }
    }

    pub fn duration(&self) -> u32 {
        if self.min == self.max {
            self.min
        } else {
            rand::rng().random_range(self.min..=self.max)
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

/// Frame sequencing for multi-frame sprites.
///
/// Loop count 0 loops forever, a negative count ping-pongs, a positive count
/// stops on the last frame after that many passes. Synchronous animators
/// derive the frame from the clock alone so every instance shows the same
/// frame; asynchronous ones advance from their own start time.
#[derive(Clone, Debug)]
pub struct Animator {
    frame_count: usize,
    start_frame: i32,
    loop_count: i32,
    asynchronous: bool,
    durations: Vec<FrameDuration>,
    current_frame: usize,
    current_loop: i32,
    current_duration: u64,
    total_duration: u64,
    direction: Direction,
    last_time: u64,
    complete: bool,
}

impl Animator {
    pub fn new(frame_count: usize, start_frame: i32, loop_count: i32, asynchronous: bool) -> Self {
        let frame_count = frame_count.max(1);
        let mut animator = Self {
            frame_count,
            start_frame,
            loop_count,
            asynchronous,
            durations: vec![
                FrameDuration::new(ITEM_FRAME_DURATION, ITEM_FRAME_DURATION);
                frame_count
            ],
            current_frame: 0,
            current_loop: 0,
            current_duration: 0,
            total_duration: 0,
            direction: Direction::Forward,
            last_time: 0,
            complete: false,
        };
        animator.reset(0);
        animator
    }

    pub fn from_timing(frames: usize, timing: &FrameTiming) -> Self {
        let mut animator = Self::new(
            frames,
            timing.start_frame as i32,
            timing.loop_count,
            timing.asynchronous,
        );
        for (slot, duration) in animator.durations.iter_mut().zip(&timing.durations) {
            *slot = FrameDuration::new(duration.min, duration.max);
        }
        animator.reset(0);
        animator
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn frame_duration(&self, frame: usize) -> Option<&FrameDuration> {
        self.durations.get(frame)
    }

    pub fn start_frame(&self) -> usize {
        if self.start_frame >= 0 {
            (self.start_frame as usize).min(self.frame_count - 1)
        } else {
            rand::rng().random_range(0..self.frame_count)
        }
    }

    fn duration(&self, frame: usize) -> u64 {
        self.durations
            .get(frame)
            .map(|d| d.duration() as u64)
            .unwrap_or(ITEM_FRAME_DURATION as u64)
    }

    pub fn reset(&mut self, now_ms: u64) {
        self.total_duration = self.durations.iter().map(|d| d.max as u64).sum();
        self.current_loop = 0;
        self.direction = Direction::Forward;
        self.complete = false;
        self.last_time = now_ms;
        if self.asynchronous {
            self.current_frame = if self.loop_count < 0 {
                0
            } else {
                self.start_frame()
            };
            self.current_duration = self.duration(self.current_frame);
        } else {
            self.calculate_synchronous(now_ms);
        }
    }

    pub fn set_frame(&mut self, frame: usize, now_ms: u64) {
        if frame >= self.frame_count {
            return;
        }
        self.current_frame = frame;
        self.current_duration = self.duration(frame);
        self.last_time = now_ms;
    }

    /// Advances to the frame that should be visible at `now_ms`.
    pub fn frame(&mut self, now_ms: u64) -> usize {
        if !self.asynchronous {
            self.calculate_synchronous(now_ms);
            return self.current_frame;
        }
        if self.complete {
            return self.current_frame;
        }

        let elapsed = now_ms.saturating_sub(self.last_time);
        if elapsed >= self.current_duration {
            let next = if self.loop_count < 0 {
                self.ping_pong_frame()
            } else {
                self.loop_frame()
            };
            if next != self.current_frame {
                let overshoot = elapsed - self.current_duration;
                self.current_duration = self.duration(next).saturating_sub(overshoot);
                self.current_frame = next;
            } else {
                self.complete = true;
            }
            self.last_time = now_ms;
        }
        self.current_frame
    }

    fn ping_pong_frame(&mut self) -> usize {
        if self.frame_count == 1 {
            return 0;
        }
        let forward = self.direction == Direction::Forward;
        let at_edge = if forward {
            self.current_frame + 1 >= self.frame_count
        } else {
            self.current_frame == 0
        };
        if at_edge {
            self.direction = if forward {
                Direction::Backward
            } else {
                Direction::Forward
            };
        }
        match self.direction {
            Direction::Forward => self.current_frame + 1,
            Direction::Backward => self.current_frame - 1,
        }
    }

    fn loop_frame(&mut self) -> usize {
        let next = self.current_frame + 1;
        if next < self.frame_count {
            return next;
        }
        if self.loop_count == 0 {
            return 0;
        }
        if self.current_loop < self.loop_count - 1 {
            self.current_loop += 1;
            return 0;
        }
        self.current_frame
    }

    fn calculate_synchronous(&mut self, now_ms: u64) {
        if self.total_duration == 0 {
            return;
        }
        let elapsed = now_ms % self.total_duration;
        let mut start = 0;
        for frame in 0..self.frame_count {
            let duration = self.durations[frame].max as u64;
            if elapsed >= start && elapsed < start + duration {
                self.current_frame = frame;
                self.current_duration = duration - (elapsed - start);
                break;
            }
            start += duration;
        }
        self.last_time = now_ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use formats::dat::FrameDuration as DatDuration;

    #[test]
    fn test_synchronous_follows_clock() {
        let mut animator = Animator::new(3, 0, 0, false);
        assert_eq!(animator.frame(0), 0);
        assert_eq!(animator.frame(499), 0);
        assert_eq!(animator.frame(500), 1);
        assert_eq!(animator.frame(1250), 2);
        assert_eq!(animator.frame(1500), 0, "wraps after the full cycle");
    }

    #[test]
    fn test_async_loop_count_stops_on_last_frame() {
        let mut animator = Animator::new(2, 0, 1, true);
        assert_eq!(animator.frame(0), 0);
        assert_eq!(animator.frame(500), 1);
        assert_eq!(animator.frame(1000), 1);
        assert!(animator.is_complete());
    }

    #[test]
    fn test_async_ping_pong() {
        let mut animator = Animator::new(3, 0, -1, true);
        let frames: Vec<usize> = (1..=6).map(|i| animator.frame(i * 500)).collect();
        assert_eq!(frames, vec![1, 2, 1, 0, 1, 2]);
    }

    #[test]
    fn test_from_timing_uses_durations() {
        let timing = FrameTiming {
            asynchronous: false,
            loop_count: 0,
            start_frame: 0,
            durations: vec![
                DatDuration { min: 100, max: 100 },
                DatDuration { min: 300, max: 300 },
            ],
        };
        let mut animator = Animator::from_timing(2, &timing);
        assert_eq!(animator.frame(99), 0);
        assert_eq!(animator.frame(100), 1);
        assert_eq!(animator.frame(399), 1);
        assert_eq!(animator.frame(400), 0);
        assert_eq!(animator.frame_duration(1), Some(&FrameDuration::new(300, 300)));
    }

    #[test]
    fn test_random_duration_in_range() {
        let duration = FrameDuration::new(100, 200);
        for _ in 0..50 {
            let d = duration.duration();
            assert!((100..=200).contains(&d), "duration {d} out of range");
        }
    }
}
