use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use voxline_audio::{
    AudioChunk, AudioRingBuffer, CaptureThread, ChunkFramer, FramerHandle, SAMPLE_RATE_HZ,
};
use voxline_foundation::{ShutdownToken, TurnEvent, TurnState, TurnTracker};
use voxline_session::OutboundMessage;
use voxline_telemetry::PipelineMetrics;

/// Headroom for a few seconds of capture; the framer drains continuously,
/// so this bounds burst tolerance, not latency.
const CAPTURE_RING_SAMPLES: usize = SAMPLE_RATE_HZ as usize * 4;
const CHUNK_CHANNEL_CAPACITY: usize = 64;

/// Keyboard-driven side of the turn state machine: owns the microphone
/// lifecycle and keeps the outbound queue ordered per turn. Each speaking
/// turn is a fresh device acquisition torn down when the turn ends.
pub struct TurnController {
    turns: Arc<TurnTracker>,
    out_tx: mpsc::Sender<OutboundMessage>,
    shutdown: ShutdownToken,
    metrics: Arc<PipelineMetrics>,
    device: Option<String>,
    active: Option<ActiveTurn>,
}

struct ActiveTurn {
    capture: CaptureThread,
    framer: FramerHandle,
    forward: JoinHandle<()>,
}

impl TurnController {
    pub fn new(
        turns: Arc<TurnTracker>,
        out_tx: mpsc::Sender<OutboundMessage>,
        shutdown: ShutdownToken,
        metrics: Arc<PipelineMetrics>,
        device: Option<String>,
    ) -> Self {
        Self {
            turns,
            out_tx,
            shutdown,
            metrics,
            device,
            active: None,
        }
    }

    /// The user pressed the talk key. The tracker decides whether the
    /// toggle means anything in the current state.
    pub async fn toggle(&mut self) {
        match self.turns.apply(TurnEvent::SpeakToggle) {
            Some(TurnState::UserSpeaking) => self.begin_turn().await,
            Some(TurnState::WaitingForAgent) => self.end_turn().await,
            // Ignored while the agent is speaking or after shutdown.
            _ => {}
        }
    }

    async fn begin_turn(&mut self) {
        // The remote must observe the turn boundary before the first chunk
        // of the turn; the queue is FIFO, so the signal goes in before
        // capture starts producing.
        if self.out_tx.send(OutboundMessage::TurnStart).await.is_err() {
            tracing::warn!("Outbound queue closed, cannot start turn");
            return;
        }

        let (producer, consumer) = AudioRingBuffer::new(CAPTURE_RING_SAMPLES).split();
        let (chunk_tx, mut chunk_rx) = mpsc::channel::<AudioChunk>(CHUNK_CHANNEL_CAPACITY);
        let framer = ChunkFramer::new(consumer, chunk_tx)
            .with_metrics(self.metrics.clone())
            .spawn();

        let out_tx = self.out_tx.clone();
        let forward = tokio::spawn(async move {
            while let Some(chunk) = chunk_rx.recv().await {
                if out_tx.send(OutboundMessage::Audio(chunk)).await.is_err() {
                    break;
                }
            }
        });

        match CaptureThread::spawn(
            self.device.clone(),
            producer,
            self.shutdown.clone(),
            self.metrics.clone(),
        ) {
            Ok(capture) => {
                self.active = Some(ActiveTurn {
                    capture,
                    framer,
                    forward,
                });
            }
            Err(e) => {
                // A dead microphone ends the conversation, not just the turn.
                tracing::error!(error = %e, "Failed to start capture, shutting down");
                self.shutdown.request();
                framer.stop().await;
                let _ = forward.await;
            }
        }
    }

    async fn end_turn(&mut self) {
        self.stop_capture().await;
        // Every chunk of the turn is in the queue by now; turn-end lands
        // strictly after the last of them.
        if self.out_tx.send(OutboundMessage::TurnEnd).await.is_err() {
            tracing::warn!("Outbound queue closed, turn-end not sent");
        }
    }

    /// Shutdown step one: release the microphone and flush captured chunks
    /// into the outbound queue. No turn-end follows; the session is closing.
    pub async fn halt(&mut self) {
        self.turns.apply(TurnEvent::Shutdown);
        self.stop_capture().await;
    }

    async fn stop_capture(&mut self) {
        if let Some(active) = self.active.take() {
            // Capture joins first so every sample is in the ring, then the
            // framer flushes whole chunks, then the forwarder drains into
            // the outbound queue.
            active.capture.stop();
            active.framer.stop().await;
            let _ = active.forward.await;
        }
    }
}
