use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};

use crate::ring_buffer::AudioConsumer;
use crate::{AudioChunk, CHUNK_SAMPLES};
use voxline_telemetry::{FpsTracker, PipelineMetrics};

const READ_BATCH_SAMPLES: usize = 4096;
const IDLE_POLL: Duration = Duration::from_millis(20);

/// Turns the raw capture sample stream into fixed 100 ms chunks. Polls the
/// ring-buffer consumer, accumulates whole chunks, and sends each one
/// downstream. On stop it flushes every complete chunk already captured; a
/// trailing partial chunk is discarded.
pub struct ChunkFramer {
    consumer: AudioConsumer,
    output_tx: mpsc::Sender<AudioChunk>,
    metrics: Option<Arc<PipelineMetrics>>,
}

pub struct FramerHandle {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl FramerHandle {
    /// Flush buffered whole chunks and stop. The sender side of the output
    /// channel is dropped when this returns.
    pub async fn stop(self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.handle.await;
    }
}

impl ChunkFramer {
    pub fn new(consumer: AudioConsumer, output_tx: mpsc::Sender<AudioChunk>) -> Self {
        Self {
            consumer,
            output_tx,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn spawn(self) -> FramerHandle {
        let running = Arc::new(AtomicBool::new(true));
        let worker_running = running.clone();
        let handle = tokio::spawn(async move {
            run(self, worker_running).await;
        });
        FramerHandle { running, handle }
    }
}

async fn run(framer: ChunkFramer, running: Arc<AtomicBool>) {
    let ChunkFramer {
        mut consumer,
        output_tx,
        metrics,
    } = framer;

    tracing::debug!("Chunk framer started");
    let mut pending: VecDeque<i16> = VecDeque::with_capacity(CHUNK_SAMPLES * 4);
    let mut scratch = vec![0i16; READ_BATCH_SAMPLES];
    let mut fps = FpsTracker::new();

    loop {
        let n = consumer.read(&mut scratch);
        if n > 0 {
            pending.extend(&scratch[..n]);
            while pending.len() >= CHUNK_SAMPLES {
                let samples: Vec<i16> = pending.drain(..CHUNK_SAMPLES).collect();
                if output_tx
                    .send(AudioChunk::from_samples(&samples))
                    .await
                    .is_err()
                {
                    tracing::debug!("Chunk framer output closed");
                    return;
                }
                if let Some(m) = &metrics {
                    m.increment_chunks_framed();
                    if let Some(rate) = fps.tick() {
                        m.update_framer_fps(rate);
                    }
                }
            }
        } else if !running.load(Ordering::SeqCst) {
            // Capture has stopped and the ring buffer is drained of whole
            // chunks; anything shorter than one chunk is dropped.
            break;
        } else {
            time::sleep(IDLE_POLL).await;
        }
    }
    tracing::debug!("Chunk framer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring_buffer::AudioRingBuffer;

    #[tokio::test]
    async fn frames_are_fixed_size_and_ordered() {
        let (mut producer, consumer) = AudioRingBuffer::new(CHUNK_SAMPLES * 8).split();
        let (tx, mut rx) = mpsc::channel(16);
        let handle = ChunkFramer::new(consumer, tx).spawn();

        // Two and a half chunks of a ramp signal.
        let total = CHUNK_SAMPLES * 5 / 2;
        let samples: Vec<i16> = (0..total).map(|i| (i % 1000) as i16).collect();
        producer.write(&samples).unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.samples(), &samples[..CHUNK_SAMPLES]);
        assert_eq!(second.samples(), &samples[CHUNK_SAMPLES..CHUNK_SAMPLES * 2]);

        // The partial tail never becomes a chunk.
        handle.stop().await;
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn stop_flushes_buffered_whole_chunks() {
        let (mut producer, consumer) = AudioRingBuffer::new(CHUNK_SAMPLES * 8).split();
        let (tx, mut rx) = mpsc::channel(16);
        let handle = ChunkFramer::new(consumer, tx).spawn();

        producer.write(&vec![7i16; CHUNK_SAMPLES]).unwrap();
        handle.stop().await;

        let flushed = rx.recv().await.unwrap();
        assert_eq!(flushed.samples().len(), CHUNK_SAMPLES);
        assert!(rx.recv().await.is_none());
    }
}
