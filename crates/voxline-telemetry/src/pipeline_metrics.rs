use std::sync::atomic::{AtomicI16, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared counters for cross-flow pipeline monitoring. Every flow updates
/// its own counters with relaxed atomics; the status loop reads them.
#[derive(Clone)]
pub struct PipelineMetrics {
    // Audio level of the most recent captured buffer
    pub current_peak: Arc<AtomicI16>,
    pub current_rms: Arc<AtomicU64>, // RMS * 1000 for precision

    // Capture -> framer -> egress
    pub capture_frames: Arc<AtomicU64>,
    pub capture_dropped: Arc<AtomicU64>,
    pub chunks_framed: Arc<AtomicU64>,
    pub framer_fps: Arc<AtomicU64>, // chunks per second * 10
    pub chunks_sent: Arc<AtomicU64>,
    pub send_failures: Arc<AtomicU64>,

    // Ingress -> playback
    pub events_received: Arc<AtomicU64>,
    pub playback_chunks: Arc<AtomicU64>,
    // Chunks discarded because the playback queue was full. The discard
    // policy is deliberate; this counter is what makes it observable.
    pub playback_dropped_chunks: Arc<AtomicU64>,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self {
            current_peak: Arc::new(AtomicI16::new(0)),
            current_rms: Arc::new(AtomicU64::new(0)),
            capture_frames: Arc::new(AtomicU64::new(0)),
            capture_dropped: Arc::new(AtomicU64::new(0)),
            chunks_framed: Arc::new(AtomicU64::new(0)),
            framer_fps: Arc::new(AtomicU64::new(0)),
            chunks_sent: Arc::new(AtomicU64::new(0)),
            send_failures: Arc::new(AtomicU64::new(0)),
            events_received: Arc::new(AtomicU64::new(0)),
            playback_chunks: Arc::new(AtomicU64::new(0)),
            playback_dropped_chunks: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl PipelineMetrics {
    pub fn update_audio_level(&self, samples: &[i16]) {
        if samples.is_empty() {
            return;
        }

        let peak = samples.iter().map(|&s| s.saturating_abs()).max().unwrap_or(0);
        self.current_peak.store(peak, Ordering::Relaxed);

        let sum: i64 = samples.iter().map(|&s| s as i64 * s as i64).sum();
        let rms = ((sum as f64 / samples.len() as f64).sqrt() * 1000.0) as u64;
        self.current_rms.store(rms, Ordering::Relaxed);
    }

    pub fn increment_capture_frames(&self) {
        self.capture_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_capture_dropped(&self) {
        self.capture_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_chunks_framed(&self) {
        self.chunks_framed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn update_framer_fps(&self, fps: f64) {
        self.framer_fps.store((fps * 10.0) as u64, Ordering::Relaxed);
    }

    pub fn increment_chunks_sent(&self) {
        self.chunks_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_send_failures(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_events_received(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_playback_chunks(&self) {
        self.playback_chunks.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the running total so the caller can include it in its log line.
    pub fn increment_playback_dropped(&self) -> u64 {
        self.playback_dropped_chunks.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[derive(Debug)]
pub struct FpsTracker {
    last_update: Instant,
    frame_count: u64,
}

impl FpsTracker {
    pub fn new() -> Self {
        Self {
            last_update: Instant::now(),
            frame_count: 0,
        }
    }

    pub fn tick(&mut self) -> Option<f64> {
        self.frame_count += 1;
        let elapsed = self.last_update.elapsed();

        if elapsed >= Duration::from_secs(1) {
            let fps = self.frame_count as f64 / elapsed.as_secs_f64();
            self.last_update = Instant::now();
            self.frame_count = 0;
            Some(fps)
        } else {
            None
        }
    }
}

impl Default for FpsTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_level_tracks_peak_and_rms() {
        let m = PipelineMetrics::default();
        m.update_audio_level(&[0, 100, -200, 50]);
        assert_eq!(m.current_peak.load(Ordering::Relaxed), 200);
        assert!(m.current_rms.load(Ordering::Relaxed) > 0);

        // i16::MIN must not overflow on abs()
        m.update_audio_level(&[i16::MIN]);
        assert_eq!(m.current_peak.load(Ordering::Relaxed), i16::MAX);
    }

    #[test]
    fn dropped_counter_returns_running_total() {
        let m = PipelineMetrics::default();
        assert_eq!(m.increment_playback_dropped(), 1);
        assert_eq!(m.increment_playback_dropped(), 2);
        assert_eq!(m.playback_dropped_chunks.load(Ordering::Relaxed), 2);
    }
}
