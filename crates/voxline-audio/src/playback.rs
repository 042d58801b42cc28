use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::device::DeviceManager;
use crate::ring_buffer::{AudioConsumer, AudioProducer, AudioRingBuffer};
use crate::{AudioChunk, CHANNELS, SAMPLE_RATE_HZ};
use voxline_foundation::{AudioError, ShutdownToken};
use voxline_telemetry::PipelineMetrics;

const STARTUP_TIMEOUT: Duration = Duration::from_secs(3);

/// Write side of the bounded playback queue. Writes never block: a chunk
/// that does not fit is dropped whole, counted, and logged. The receive
/// flow must stay live even when the output device falls behind.
pub struct PlaybackBuffer {
    producer: Mutex<AudioProducer>,
    closed: Arc<AtomicBool>,
    flush: Arc<AtomicBool>,
    metrics: Arc<PipelineMetrics>,
}

/// Consumer-side handles for the output engine (or a test reading the
/// queue directly).
pub struct PlaybackTap {
    pub consumer: AudioConsumer,
    pub closed: Arc<AtomicBool>,
    pub flush: Arc<AtomicBool>,
}

impl PlaybackBuffer {
    pub fn new(capacity_samples: usize, metrics: Arc<PipelineMetrics>) -> (Arc<Self>, PlaybackTap) {
        let (producer, consumer) = AudioRingBuffer::new(capacity_samples).split();
        let closed = Arc::new(AtomicBool::new(false));
        let flush = Arc::new(AtomicBool::new(false));
        let buffer = Arc::new(Self {
            producer: Mutex::new(producer),
            closed: closed.clone(),
            flush: flush.clone(),
            metrics,
        });
        (
            buffer,
            PlaybackTap {
                consumer,
                closed,
                flush,
            },
        )
    }

    /// Enqueue one chunk for playback. Returns false if the chunk was
    /// dropped (queue full) or refused (closed).
    pub fn write(&self, chunk: &AudioChunk) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            tracing::debug!("Playback write after close, ignoring");
            return false;
        }

        let samples = chunk.samples();
        if samples.is_empty() {
            return true;
        }

        let mut producer = self.producer.lock();
        if producer.slots() < samples.len() || producer.write(&samples).is_err() {
            let total = self.metrics.increment_playback_dropped();
            tracing::warn!(dropped_total = total, "Playback queue full, dropping chunk");
            return false;
        }
        self.metrics.increment_playback_chunks();
        true
    }

    /// No more writes will occur; the engine drains what remains and stops.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Discard everything queued but not yet played (agent interruption).
    /// Applied by the output callback at its next wakeup.
    pub fn clear(&self) {
        self.flush.store(true, Ordering::SeqCst);
    }
}

/// Runs the output device on a dedicated thread. The device callback pulls
/// samples from the queue in FIFO order and zero-fills when the queue is
/// momentarily empty, keeping the device cadence steady.
pub struct PlaybackEngine {
    handle: JoinHandle<()>,
    running: Arc<AtomicBool>,
    drained: Arc<AtomicBool>,
}

impl PlaybackEngine {
    pub fn spawn(tap: PlaybackTap, shutdown: ShutdownToken) -> Result<Self, AudioError> {
        let running = Arc::new(AtomicBool::new(true));
        let drained = Arc::new(AtomicBool::new(false));
        let worker_running = running.clone();
        let worker_drained = drained.clone();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), AudioError>>();

        let handle = thread::Builder::new()
            .name("audio-playback".to_string())
            .spawn(move || {
                let stream = match build_output_stream(tap, worker_drained, shutdown) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                while worker_running.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(20));
                }
                drop(stream);
            })
            .map_err(|e| AudioError::Fatal(format!("Failed to spawn playback thread: {}", e)))?;

        match ready_rx.recv_timeout(STARTUP_TIMEOUT) {
            Ok(Ok(())) => Ok(Self {
                handle,
                running,
                drained,
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                running.store(false, Ordering::SeqCst);
                let _ = handle.join();
                Err(AudioError::Fatal(
                    "Playback stream did not start within timeout".to_string(),
                ))
            }
        }
    }

    /// Wait (bounded) for the closed queue to drain, then stop the device
    /// and join the thread.
    pub fn stop(self, drain_timeout: Duration) {
        let deadline = Instant::now() + drain_timeout;
        while Instant::now() < deadline && !self.drained.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(10));
        }
        self.running.store(false, Ordering::SeqCst);
        let _ = self.handle.join();
    }
}

fn build_output_stream(
    tap: PlaybackTap,
    drained: Arc<AtomicBool>,
    shutdown: ShutdownToken,
) -> Result<cpal::Stream, AudioError> {
    let PlaybackTap {
        mut consumer,
        closed,
        flush,
    } = tap;

    let manager = DeviceManager::new();
    let device = manager.open_output()?;
    if let Ok(name) = device.name() {
        tracing::info!("Playback device: {}", name);
    }

    let sample_format = device.default_output_config()?.sample_format();
    let config = StreamConfig {
        channels: CHANNELS,
        sample_rate: cpal::SampleRate(SAMPLE_RATE_HZ),
        buffer_size: cpal::BufferSize::Default,
    };

    let err_fn = move |err: cpal::StreamError| {
        tracing::error!("Playback stream error: {}", err);
        shutdown.request();
    };

    let mut discard = [0i16; 1024];
    let mut fill_i16 = move |out: &mut [i16]| {
        if flush.swap(false, Ordering::SeqCst) {
            while consumer.read(&mut discard) > 0 {}
        }
        let n = consumer.read(out);
        out[n..].fill(0);
        if n == 0 && closed.load(Ordering::SeqCst) && consumer.slots() == 0 {
            drained.store(true, Ordering::SeqCst);
        }
    };

    let stream = match sample_format {
        SampleFormat::I16 => device.build_output_stream(
            &config,
            move |out: &mut [i16], _: &_| {
                fill_i16(out);
            },
            err_fn,
            None,
        )?,
        SampleFormat::F32 => {
            // Reused conversion buffer: no allocation inside the callback.
            let mut staging: Vec<i16> = Vec::new();
            device.build_output_stream(
                &config,
                move |out: &mut [f32], _: &_| {
                    staging.resize(out.len(), 0);
                    fill_i16(&mut staging);
                    for (dst, &src) in out.iter_mut().zip(staging.iter()) {
                        *dst = src as f32 / 32768.0;
                    }
                },
                err_fn,
                None,
            )?
        }
        other => {
            return Err(AudioError::FormatNotSupported {
                format: format!("{:?}", other),
            });
        }
    };

    stream.play()?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CHUNK_SAMPLES;

    fn chunk_of(value: i16) -> AudioChunk {
        AudioChunk::from_samples(&vec![value; CHUNK_SAMPLES])
    }

    #[test]
    fn writes_are_played_in_arrival_order() {
        let metrics = Arc::new(PipelineMetrics::default());
        let (buffer, mut tap) = PlaybackBuffer::new(CHUNK_SAMPLES * 4, metrics);

        assert!(buffer.write(&chunk_of(1)));
        assert!(buffer.write(&chunk_of(2)));
        assert!(buffer.write(&chunk_of(3)));

        let mut out = vec![0i16; CHUNK_SAMPLES * 3];
        assert_eq!(tap.consumer.read(&mut out), CHUNK_SAMPLES * 3);
        assert!(out[..CHUNK_SAMPLES].iter().all(|&s| s == 1));
        assert!(out[CHUNK_SAMPLES..CHUNK_SAMPLES * 2].iter().all(|&s| s == 2));
        assert!(out[CHUNK_SAMPLES * 2..].iter().all(|&s| s == 3));
    }

    #[test]
    fn overflow_drops_whole_chunks_without_blocking() {
        let metrics = Arc::new(PipelineMetrics::default());
        let (buffer, mut tap) = PlaybackBuffer::new(CHUNK_SAMPLES * 2, metrics.clone());

        assert!(buffer.write(&chunk_of(1)));
        assert!(buffer.write(&chunk_of(2)));
        // Queue is full: the excess chunk is discarded, nothing blocks.
        assert!(!buffer.write(&chunk_of(3)));
        assert!(!buffer.write(&chunk_of(4)));
        assert_eq!(
            metrics.playback_dropped_chunks.load(Ordering::Relaxed),
            2
        );

        // What made it in is intact and ordered.
        let mut out = vec![0i16; CHUNK_SAMPLES * 2];
        assert_eq!(tap.consumer.read(&mut out), CHUNK_SAMPLES * 2);
        assert!(out[..CHUNK_SAMPLES].iter().all(|&s| s == 1));
        assert!(out[CHUNK_SAMPLES..].iter().all(|&s| s == 2));
    }

    #[test]
    fn close_refuses_further_writes() {
        let metrics = Arc::new(PipelineMetrics::default());
        let (buffer, tap) = PlaybackBuffer::new(CHUNK_SAMPLES * 4, metrics.clone());

        assert!(buffer.write(&chunk_of(1)));
        buffer.close();
        assert!(buffer.is_closed());
        assert!(tap.closed.load(Ordering::SeqCst));
        assert!(!buffer.write(&chunk_of(2)));
        // A refused post-close write is not an overflow drop.
        assert_eq!(metrics.playback_dropped_chunks.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn clear_requests_a_flush() {
        let metrics = Arc::new(PipelineMetrics::default());
        let (buffer, tap) = PlaybackBuffer::new(CHUNK_SAMPLES * 4, metrics);
        buffer.clear();
        assert!(tap.flush.load(Ordering::SeqCst));
    }
}
