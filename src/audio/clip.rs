use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::AudioError;

/// Container format of a speech clip. The backend decides (WAV from one
/// TTS engine, MP3 from another) so it is sniffed unless configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Wav,
    Mp3,
    Ogg,
    Unknown,
}

impl AudioFormat {
    pub fn sniff(bytes: &[u8]) -> Self {
        if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE" {
            AudioFormat::Wav
        } else if bytes.starts_with(b"ID3") {
            AudioFormat::Mp3
        } else if bytes.len() >= 2 && bytes[0] == 0xFF && bytes[1] & 0xE0 == 0xE0 {
            // bare MPEG frame sync
            AudioFormat::Mp3
        } else if bytes.starts_with(b"OggS") {
            AudioFormat::Ogg
        } else {
            AudioFormat::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "wav",
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Ogg => "ogg",
            AudioFormat::Unknown => "unknown",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "wav" | "wave" => Some(AudioFormat::Wav),
            "mp3" | "mpeg" => Some(AudioFormat::Mp3),
            "ogg" | "vorbis" => Some(AudioFormat::Ogg),
            _ => None,
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded speech clip, owned by the playback queue until it has played.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub bytes: Vec<u8>,
    pub format: AudioFormat,
}

impl AudioClip {
    pub fn from_base64(payload: &str, forced: Option<AudioFormat>) -> Result<Self, AudioError> {
        let bytes = STANDARD.decode(payload.trim())?;
        if bytes.is_empty() {
            return Err(AudioError::Empty);
        }
        let format = forced.unwrap_or_else(|| AudioFormat::sniff(&bytes));
        Ok(Self { bytes, format })
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
