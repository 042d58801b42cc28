use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::client::LiveSession;
use crate::types::OutboundMessage;
use voxline_foundation::ShutdownToken;
use voxline_telemetry::PipelineMetrics;

/// Drain the outbound queue into the session. One queue, one pump: per-turn
/// ordering (turn-start, chunks, turn-end) is the queue's FIFO order. A
/// failed send is logged and the flow continues; one lost chunk beats a
/// dead conversation.
pub fn spawn_egress(
    mut out_rx: mpsc::Receiver<OutboundMessage>,
    session: Arc<dyn LiveSession>,
    shutdown: ShutdownToken,
    metrics: Arc<PipelineMetrics>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.wait() => {
                    // Producers have been stopped by the coordinator; flush
                    // whatever is already queued, then stop.
                    while let Ok(msg) = out_rx.try_recv() {
                        send_one(&*session, msg, &metrics).await;
                    }
                    break;
                }
                msg = out_rx.recv() => match msg {
                    Some(msg) => send_one(&*session, msg, &metrics).await,
                    None => break,
                },
            }
        }
        tracing::debug!("Egress pump stopped");
    })
}

async fn send_one(session: &dyn LiveSession, msg: OutboundMessage, metrics: &PipelineMetrics) {
    let label = msg.label();
    let is_audio = matches!(msg, OutboundMessage::Audio(_));
    match session.send(msg).await {
        Ok(()) => {
            if is_audio {
                metrics.increment_chunks_sent();
            }
        }
        Err(e) => {
            metrics.increment_send_failures();
            tracing::warn!(error = %e, "Failed to send {}, continuing", label);
        }
    }
}
