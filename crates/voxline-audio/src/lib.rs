pub mod capture;
pub mod device;
pub mod framer;
pub mod playback;
pub mod ring_buffer;

pub use capture::CaptureThread;
pub use device::DeviceManager;
pub use framer::{ChunkFramer, FramerHandle};
pub use playback::{PlaybackBuffer, PlaybackEngine, PlaybackTap};
pub use ring_buffer::{AudioConsumer, AudioProducer, AudioRingBuffer};

/// Session audio format: single-channel 16-bit PCM at 24 kHz.
pub const SAMPLE_RATE_HZ: u32 = 24_000;
pub const CHANNELS: u16 = 1;

/// One chunk is 100 ms of audio.
pub const CHUNK_SAMPLES: usize = SAMPLE_RATE_HZ as usize / 10;

/// Playback queue bound, ~30 seconds of audio to absorb network jitter.
pub const PLAYBACK_CAPACITY_SAMPLES: usize = SAMPLE_RATE_HZ as usize * 30;

/// A fixed time-slice of raw PCM audio (mono, 16-bit little-endian, 24 kHz).
/// Produced by the chunk framer or decoded from an inbound event; consumed
/// exactly once by egress or the playback buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    pub data: Vec<u8>,
}

impl AudioChunk {
    pub fn from_samples(samples: &[i16]) -> Self {
        let mut data = Vec::with_capacity(samples.len() * 2);
        for s in samples {
            data.extend_from_slice(&s.to_le_bytes());
        }
        Self { data }
    }

    /// Decode back to samples. A trailing odd byte (malformed input) is
    /// ignored.
    pub fn samples(&self) -> Vec<i16> {
        self.data
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
