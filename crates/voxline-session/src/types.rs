use voxline_audio::AudioChunk;

/// Everything the client ever puts on the wire, in submission order: turn
/// boundaries and the audio chunks between them.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    TurnStart,
    TurnEnd,
    Audio(AudioChunk),
}

impl OutboundMessage {
    pub fn label(&self) -> &'static str {
        match self {
            OutboundMessage::TurnStart => "turn-start",
            OutboundMessage::TurnEnd => "turn-end",
            OutboundMessage::Audio(_) => "audio chunk",
        }
    }
}

/// One inbound server event, already decoded from the wire. Events with
/// nothing the pipeline cares about decode to an empty event and are
/// ignored by ingress.
#[derive(Debug, Clone, Default)]
pub struct ServerEvent {
    pub audio: Vec<AudioPayload>,
    pub turn_complete: bool,
    pub interrupted: bool,
    pub setup_complete: bool,
}

impl ServerEvent {
    pub fn is_empty(&self) -> bool {
        self.audio.is_empty() && !self.turn_complete && !self.interrupted && !self.setup_complete
    }
}

/// An inline payload from a server event, tagged with its media type.
#[derive(Debug, Clone)]
pub struct AudioPayload {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl AudioPayload {
    /// Only raw-PCM payloads enter the playback path; anything else (text
    /// parts, other encodings) is ignored.
    pub fn is_pcm_audio(&self) -> bool {
        self.mime_type.starts_with("audio/pcm")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm_prefix_selects_audio_payloads() {
        let pcm = AudioPayload {
            mime_type: "audio/pcm;rate=24000".to_string(),
            data: vec![0, 1],
        };
        let text = AudioPayload {
            mime_type: "text/plain".to_string(),
            data: vec![],
        };
        assert!(pcm.is_pcm_audio());
        assert!(!text.is_pcm_audio());
    }

    #[test]
    fn empty_event_detection() {
        assert!(ServerEvent::default().is_empty());
        let ev = ServerEvent {
            turn_complete: true,
            ..Default::default()
        };
        assert!(!ev.is_empty());
    }
}
