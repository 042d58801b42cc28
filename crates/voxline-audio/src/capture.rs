use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::device::DeviceManager;
use crate::ring_buffer::AudioProducer;
use crate::{CHANNELS, SAMPLE_RATE_HZ};
use voxline_foundation::{AudioError, ShutdownToken};
use voxline_telemetry::PipelineMetrics;

const STARTUP_TIMEOUT: Duration = Duration::from_secs(3);

/// Handle to the dedicated capture thread. The cpal stream lives on that
/// thread (streams are not Send); the device callback writes samples into
/// the ring buffer. `stop()` joins the thread, so no samples are produced
/// after it returns and the device is released. Each `spawn` is a fresh
/// device acquisition; exactly one capture thread may be live at a time.
pub struct CaptureThread {
    handle: JoinHandle<()>,
    running: Arc<AtomicBool>,
}

impl CaptureThread {
    pub fn spawn(
        device_name: Option<String>,
        producer: AudioProducer,
        shutdown: ShutdownToken,
        metrics: Arc<PipelineMetrics>,
    ) -> Result<Self, AudioError> {
        let running = Arc::new(AtomicBool::new(true));
        let running_worker = running.clone();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), AudioError>>();

        let handle = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                let stream = match build_capture_stream(
                    device_name.as_deref(),
                    producer,
                    running_worker.clone(),
                    shutdown,
                    metrics,
                ) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                while running_worker.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(20));
                }
                // Dropping the stream stops the callback before the thread
                // exits, so a joined thread implies a silent device.
                drop(stream);
            })
            .map_err(|e| AudioError::Fatal(format!("Failed to spawn capture thread: {}", e)))?;

        match ready_rx.recv_timeout(STARTUP_TIMEOUT) {
            Ok(Ok(())) => Ok(Self { handle, running }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                running.store(false, Ordering::SeqCst);
                let _ = handle.join();
                Err(AudioError::Fatal(
                    "Capture stream did not start within timeout".to_string(),
                ))
            }
        }
    }

    /// Stop the stream and release the input device. Blocks until the
    /// capture thread has exited.
    pub fn stop(self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.handle.join();
    }
}

fn build_capture_stream(
    device_name: Option<&str>,
    producer: AudioProducer,
    running: Arc<AtomicBool>,
    shutdown: ShutdownToken,
    metrics: Arc<PipelineMetrics>,
) -> Result<cpal::Stream, AudioError> {
    let manager = DeviceManager::new();
    let device = manager.open_input(device_name)?;
    if let Ok(name) = device.name() {
        tracing::info!(
            "Capture device: {} (host: {:?})",
            name,
            manager.host_id()
        );
    }

    let sample_format = device.default_input_config()?.sample_format();
    let config = StreamConfig {
        channels: CHANNELS,
        sample_rate: cpal::SampleRate(SAMPLE_RATE_HZ),
        buffer_size: cpal::BufferSize::Default,
    };

    let producer = Arc::new(Mutex::new(producer));
    let err_fn = move |err: cpal::StreamError| {
        // A broken input device means the conversation cannot continue.
        tracing::error!("Capture stream error: {}", err);
        shutdown.request();
    };

    let handle_i16 = move |data: &[i16]| {
        if !running.load(Ordering::SeqCst) {
            return;
        }
        metrics.update_audio_level(data);
        if producer.lock().write(data).is_ok() {
            metrics.increment_capture_frames();
        } else {
            metrics.increment_capture_dropped();
        }
    };

    // Reused conversion buffer: no allocation inside the device callback.
    thread_local! {
        static CONVERT_BUFFER: std::cell::RefCell<Vec<i16>> =
            const { std::cell::RefCell::new(Vec::new()) };
    }

    let stream = match sample_format {
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &_| {
                handle_i16(data);
            },
            err_fn,
            None,
        )?,
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &_| {
                CONVERT_BUFFER.with(|buf| {
                    let mut converted = buf.borrow_mut();
                    converted.clear();
                    converted.reserve(data.len());
                    for &s in data {
                        converted.push((s.clamp(-1.0, 1.0) * 32767.0).round() as i16);
                    }
                    handle_i16(&converted);
                });
            },
            err_fn,
            None,
        )?,
        SampleFormat::U16 => device.build_input_stream(
            &config,
            move |data: &[u16], _: &_| {
                CONVERT_BUFFER.with(|buf| {
                    let mut converted = buf.borrow_mut();
                    converted.clear();
                    converted.reserve(data.len());
                    for &s in data {
                        converted.push((s as i32 - 32768) as i16);
                    }
                    handle_i16(&converted);
                });
            },
            err_fn,
            None,
        )?,
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
mod convert_tests {
    #[test]
    fn f32_to_i16_clamps_and_scales() {
        let src = [-2.0f32, -1.0, 0.0, 0.5, 1.0, 2.0];
        let out: Vec<i16> = src
            .iter()
            .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0).round() as i16)
            .collect();
        assert_eq!(out, vec![-32767, -32767, 0, 16384, 32767, 32767]);
    }

    #[test]
    fn u16_to_i16_centering() {
        let src = [0u16, 32768, 65535];
        let out: Vec<i16> = src.iter().map(|&s| (s as i32 - 32768) as i16).collect();
        assert_eq!(out, vec![-32768, 0, 32767]);
    }
}
