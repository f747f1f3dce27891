use std::{
    ops::Range,
    thread,
    time::{Duration, Instant},
};

use log::debug;

/// Emission rate safety margin: stay 2% below the nominal rate so the
/// copy never runs ahead of a real-time producer.
const DERATE: f64 = 0.98;

const DEFAULT_POLL: Duration = Duration::from_millis(10);

/// Releases frame ranges at a throttled rate.
///
/// A finite iterator over half-open ranges of length `chunk_size`
/// (the last one truncated to `total_frames`) that together partition
/// `[first_frame, total_frames)` exactly once. Before the first range the
/// scheduler sleeps for the configured initial latency; each subsequent
/// range is released once the wall-clock time since scheduling start
/// reaches `emitted / derated_rate`, so blocking consumers cannot
/// accumulate drift. The final, possibly partial, range is instead
/// preceded by one full chunk-period sleep, giving the producer time to
/// finish the tail.
///
/// Not restartable; construct a fresh scheduler to replay.
///
/// `rate` and `chunk_size` must be positive; callers validate before
/// constructing.
#[derive(Debug)]
pub struct PacedScheduler {
    total_frames: u64,
    chunk_size: u64,
    derated_rate: f64,
    initial_latency: Duration,
    poll: Duration,
    started: Option<Instant>,
    next_frame: u64,
    first_frame: u64,
}

impl PacedScheduler {
    pub fn new(
        initial_latency: Duration,
        total_frames: u64,
        chunk_size: u64,
        rate: f64,
    ) -> Self {
        debug_assert!(rate > 0.0);
        debug_assert!(chunk_size > 0);
        Self {
            total_frames,
            chunk_size,
            derated_rate: rate * DERATE,
            initial_latency,
            poll: DEFAULT_POLL,
            started: None,
            next_frame: 0,
            first_frame: 0,
        }
    }

    /// Start emission at `first_frame` instead of 0; ranges then cover
    /// `[first_frame, total_frames)`. Used to resume a live copy after
    /// the source has grown.
    pub fn starting_at(mut self, first_frame: u64) -> Self {
        self.first_frame = first_frame.min(self.total_frames);
        self.next_frame = self.first_frame;
        self
    }

    pub fn with_poll_interval(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    /// Seconds' worth of frames emitted so far, at the derated rate.
    fn pace_deadline(&self) -> Duration {
        Duration::from_secs_f64((self.next_frame - self.first_frame) as f64 / self.derated_rate)
    }

    fn chunk_period(&self) -> Duration {
        Duration::from_secs_f64(self.chunk_size as f64 / self.derated_rate)
    }
}

impl Iterator for PacedScheduler {
    type Item = Range<u64>;

    fn next(&mut self) -> Option<Range<u64>> {
        if self.next_frame >= self.total_frames {
            return None;
        }
        let started = match self.started {
            Some(instant) => instant,
            None => {
                debug!(
                    "waiting {:?} acquisition start-up latency",
                    self.initial_latency
                );
                thread::sleep(self.initial_latency);
                let now = Instant::now();
                self.started = Some(now);
                now
            }
        };

        let remaining = self.total_frames - self.next_frame;
        if remaining <= self.chunk_size {
            // Last, possibly partial, range: give the producer one full
            // chunk period so the tail is settled before it is read.
            thread::sleep(self.chunk_period());
            let range = self.next_frame..self.total_frames;
            self.next_frame = self.total_frames;
            return Some(range);
        }

        let deadline = self.pace_deadline();
        while started.elapsed() < deadline {
            thread::sleep(self.poll);
        }
        let range = self.next_frame..self.next_frame + self.chunk_size;
        self.next_frame = range.end;
        Some(range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast(total: u64, chunk: u64) -> PacedScheduler {
        PacedScheduler::new(Duration::ZERO, total, chunk, 1e6)
            .with_poll_interval(Duration::from_micros(50))
    }

    fn assert_partition(ranges: &[Range<u64>], first: u64, total: u64, chunk: u64) {
        let mut expected_start = first;
        for r in ranges {
            assert_eq!(r.start, expected_start, "gap or overlap at {r:?}");
            assert!(r.end > r.start);
            assert!(r.end - r.start <= chunk);
            expected_start = r.end;
        }
        assert_eq!(expected_start, total);
    }

    #[test]
    fn partitions_exactly() {
        for (total, chunk) in [(300, 128), (10, 3), (7, 7), (8, 1), (129, 128)] {
            let ranges: Vec<_> = fast(total, chunk).collect();
            assert_partition(&ranges, 0, total, chunk);
            let last = ranges.last().unwrap();
            let tail = total % chunk;
            assert_eq!(last.end - last.start, if tail == 0 { chunk } else { tail });
        }
    }

    #[test]
    fn example_ranges() {
        let ranges: Vec<_> = fast(300, 128).collect();
        assert_eq!(ranges, vec![0..128, 128..256, 256..300]);
    }

    #[test]
    fn single_range_when_total_fits_one_chunk() {
        let ranges: Vec<_> = fast(100, 128).collect();
        assert_eq!(ranges, vec![0..100]);
    }

    #[test]
    fn exhausted_scheduler_stays_exhausted() {
        let mut s = fast(10, 4);
        assert_eq!(s.by_ref().count(), 3);
        assert_eq!(s.next(), None);
        assert_eq!(s.next(), None);
    }

    #[test]
    fn resumes_mid_stream() {
        let ranges: Vec<_> = fast(300, 128).starting_at(256).collect();
        assert_partition(&ranges, 256, 300, 128);
        assert_eq!(ranges, vec![256..300]);

        let ranges: Vec<_> = fast(50, 16).starting_at(10).collect();
        assert_eq!(ranges, vec![10..26, 26..42, 42..50]);
    }

    #[test]
    fn paces_against_elapsed_time() {
        // 3 full ranges at 1000 fps with chunk 100: the third range must
        // not be released before 200 frames' worth of time has passed.
        let start = Instant::now();
        let ranges: Vec<_> = PacedScheduler::new(Duration::ZERO, 350, 100, 1000.0)
            .with_poll_interval(Duration::from_millis(1))
            .collect();
        let elapsed = start.elapsed();
        assert_partition(&ranges, 0, 350, 100);
        // 200 frames of pacing plus the final chunk-period sleep
        assert!(elapsed >= Duration::from_secs_f64(300.0 / (1000.0 * DERATE)));
    }

    #[test]
    fn initial_latency_is_respected() {
        let start = Instant::now();
        let _: Vec<_> = PacedScheduler::new(Duration::from_millis(30), 4, 8, 1e6).collect();
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
