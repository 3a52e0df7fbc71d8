//! Sonya Watch wire protocol.
//!
//! Every GATT notification on the TX characteristic carries at most one frame:
//!
//! ```text
//! offset 0        : type (1 byte)
//! offset 1..2     : seq, little-endian u16
//! offset 3..4     : length, little-endian u16
//! offset 5..5+len : payload
//! ```
//!
//! Commands written to RX are plain ASCII lines with no framing.

use std::fmt;
use std::str::FromStr;

// ============================================================================
// Constants
// ============================================================================

/// Size of the fixed frame header (type + seq + length).
pub const HEADER_LEN: usize = 5;

pub const TYPE_WAKE: u8 = 0x01;
pub const TYPE_REC_START: u8 = 0x02;
pub const TYPE_REC_END: u8 = 0x03;
pub const TYPE_AUDIO_CHUNK: u8 = 0x10;
pub const TYPE_ERROR: u8 = 0x11;

/// Length of the metadata block the firmware attaches to REC_END.
pub const REC_END_META_LEN: usize = 12;

/// Valid range for `SETREC:<seconds>`.
pub const SETREC_RANGE: std::ops::RangeInclusive<u8> = 1..=10;

// ============================================================================
// Frame
// ============================================================================

/// One decoded protocol unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Raw type byte; see [`EventKind::from_type`].
    pub kind_byte: u8,
    /// Sender-assigned sequence number. Gaps are not checked.
    pub seq: u16,
    /// Declared payload length.
    pub length: u16,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Build a frame; `None` if the payload does not fit the 16-bit length field.
    pub fn new(kind_byte: u8, seq: u16, payload: Vec<u8>) -> Option<Self> {
        let length = u16::try_from(payload.len()).ok()?;
        Some(Self {
            kind_byte,
            seq,
            length,
            payload,
        })
    }

    #[inline]
    pub fn kind(&self) -> EventKind {
        EventKind::from_type(self.kind_byte)
    }

    /// Serialize to the wire layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.push(self.kind_byte);
        out.extend_from_slice(&self.seq.to_le_bytes());
        out.extend_from_slice(&self.length.to_le_bytes());
        out.extend_from_slice(&self.payload);
        out
    }
}

/// Encode a frame straight from its parts.
pub fn encode_frame(kind_byte: u8, seq: u16, payload: &[u8]) -> Option<Vec<u8>> {
    Frame::new(kind_byte, seq, payload.to_vec()).map(|f| f.encode())
}

/// Parse the first frame in a notification.
///
/// Returns `None` when the buffer is shorter than the header or than the
/// declared payload. Bytes past the declared payload are ignored.
pub fn parse(buffer: &[u8]) -> Option<Frame> {
    if buffer.len() < HEADER_LEN {
        return None;
    }
    let kind_byte = buffer[0];
    let seq = u16::from_le_bytes([buffer[1], buffer[2]]);
    let length = u16::from_le_bytes([buffer[3], buffer[4]]);
    let end = HEADER_LEN + length as usize;
    let payload = buffer.get(HEADER_LEN..end)?.to_vec();
    Some(Frame {
        kind_byte,
        seq,
        length,
        payload,
    })
}

// ============================================================================
// Event classification
// ============================================================================

/// Semantic meaning of a frame's type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Wake,
    RecStart,
    RecEnd,
    /// Payload is a fragment of raw 16 kHz mono s16le PCM.
    AudioChunk,
    /// Payload is UTF-8 text (decoded lossily).
    Error,
    Unknown(u8),
}

impl EventKind {
    /// Total mapping from the type byte.
    pub fn from_type(kind_byte: u8) -> Self {
        match kind_byte {
            TYPE_WAKE => EventKind::Wake,
            TYPE_REC_START => EventKind::RecStart,
            TYPE_REC_END => EventKind::RecEnd,
            TYPE_AUDIO_CHUNK => EventKind::AudioChunk,
            TYPE_ERROR => EventKind::Error,
            other => EventKind::Unknown(other),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            EventKind::Wake => "EVT_WAKE",
            EventKind::RecStart => "EVT_REC_START",
            EventKind::RecEnd => "EVT_REC_END",
            EventKind::AudioChunk => "AUDIO_CHUNK",
            EventKind::Error => "EVT_ERROR",
            EventKind::Unknown(_) => "UNKNOWN",
        }
    }
}

/// Classify a frame and render the one-line transcript text for it.
pub fn describe(frame: &Frame) -> (EventKind, String) {
    let kind = frame.kind();
    let text = match kind {
        EventKind::Wake | EventKind::RecStart => format!("{} seq={}", kind.name(), frame.seq),
        EventKind::RecEnd => match RecordingMeta::parse(&frame.payload) {
            Some(meta) => format!("{} seq={} {}", kind.name(), frame.seq, meta),
            None => format!("{} seq={}", kind.name(), frame.seq),
        },
        EventKind::AudioChunk => {
            format!("{} seq={} bytes={}", kind.name(), frame.seq, frame.length)
        }
        EventKind::Error => format!(
            "{} seq={} \"{}\"",
            kind.name(),
            frame.seq,
            String::from_utf8_lossy(&frame.payload)
        ),
        EventKind::Unknown(t) => format!("TYPE=0x{:02x} seq={} len={}", t, frame.seq, frame.length),
    };
    (kind, text)
}

/// Lowercase hex rendering used for non-conforming notifications.
pub fn hexdump(data: &[u8]) -> String {
    data.iter().map(|b| format!("{b:02x}")).collect()
}

// ============================================================================
// REC_END metadata
// ============================================================================

/// Recording metadata sent by the watch with REC_END.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordingMeta {
    pub rec_id: u16,
    /// Bytes the watch stored for this recording.
    pub total_bytes: u32,
    pub crc32: u32,
    pub sample_rate: u16,
}

impl RecordingMeta {
    /// Decode the 12-byte block; `None` for shorter payloads.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let b = payload.get(..REC_END_META_LEN)?;
        Some(Self {
            rec_id: u16::from_le_bytes([b[0], b[1]]),
            total_bytes: u32::from_le_bytes([b[2], b[3], b[4], b[5]]),
            crc32: u32::from_le_bytes([b[6], b[7], b[8], b[9]]),
            sample_rate: u16::from_le_bytes([b[10], b[11]]),
        })
    }

    pub fn encode(&self) -> [u8; REC_END_META_LEN] {
        let mut out = [0u8; REC_END_META_LEN];
        out[0..2].copy_from_slice(&self.rec_id.to_le_bytes());
        out[2..6].copy_from_slice(&self.total_bytes.to_le_bytes());
        out[6..10].copy_from_slice(&self.crc32.to_le_bytes());
        out[10..12].copy_from_slice(&self.sample_rate.to_le_bytes());
        out
    }
}

impl fmt::Display for RecordingMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rec_id={} bytes={} crc=0x{:08x} sr={}",
            self.rec_id, self.total_bytes, self.crc32, self.sample_rate
        )
    }
}

// ============================================================================
// RX commands
// ============================================================================

/// Commands the watch firmware understands on RX.
///
/// The client always writes the user's text verbatim; parsing only exists to
/// warn about lines the watch would silently drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCommand {
    /// Watch answers with an ERROR frame carrying `PONG`.
    Ping,
    /// Start a recording.
    Rec,
    /// Set recording length in seconds (1..=10).
    SetRec(u8),
    /// Request `len` bytes of recording `rec_id` starting at `offset`.
    Get { rec_id: u16, offset: u32, len: u16 },
    /// Release recording `rec_id` on the watch.
    Done { rec_id: u16 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCommand(pub String);

impl fmt::Display for UnknownCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unrecognized watch command {:?}", self.0)
    }
}

impl std::error::Error for UnknownCommand {}

impl FromStr for DeviceCommand {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || UnknownCommand(s.to_string());
        let cmd = s.trim_end();

        if let Some(rest) = cmd.strip_prefix("SETREC:") {
            let secs: u8 = rest.parse().map_err(|_| unknown())?;
            return if SETREC_RANGE.contains(&secs) {
                Ok(DeviceCommand::SetRec(secs))
            } else {
                Err(unknown())
            };
        }
        if let Some(rest) = cmd.strip_prefix("GET:") {
            let mut parts = rest.splitn(3, ':');
            let rec_id = parts.next().and_then(|p| p.parse().ok());
            let offset = parts.next().and_then(|p| p.parse().ok());
            let len = parts.next().and_then(|p| p.parse::<u16>().ok());
            return match (rec_id, offset, len) {
                (Some(rec_id), Some(offset), Some(len)) if len > 0 => {
                    Ok(DeviceCommand::Get {
                        rec_id,
                        offset,
                        len,
                    })
                }
                _ => Err(unknown()),
            };
        }
        if let Some(rest) = cmd.strip_prefix("DONE:") {
            let rec_id = rest.parse().map_err(|_| unknown())?;
            return Ok(DeviceCommand::Done { rec_id });
        }
        // firmware matches these as prefixes
        if cmd.starts_with("PING") {
            return Ok(DeviceCommand::Ping);
        }
        if cmd.starts_with("REC") {
            return Ok(DeviceCommand::Rec);
        }
        Err(unknown())
    }
}

impl fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceCommand::Ping => write!(f, "PING"),
            DeviceCommand::Rec => write!(f, "REC"),
            DeviceCommand::SetRec(secs) => write!(f, "SETREC:{secs}"),
            DeviceCommand::Get {
                rec_id,
                offset,
                len,
            } => write!(f, "GET:{rec_id}:{offset}:{len}"),
            DeviceCommand::Done { rec_id } => write!(f, "DONE:{rec_id}"),
        }
    }
}
