//! Audio stream accumulation across AUDIO_CHUNK frames.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use log::{debug, warn};

use crate::protocol::{EventKind, Frame, RecordingMeta};

/// Totals for one recording, emitted on REC_END.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecordingSummary {
    pub chunk_count: u64,
    pub byte_count: u64,
}

/// Tracks chunk/byte counters for the current recording and forwards audio
/// payloads to an optional append-only sink.
pub struct StreamAccumulator {
    current: RecordingSummary,
    sink: Option<Box<dyn Write + Send>>,
}

impl Default for StreamAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self {
            current: RecordingSummary::default(),
            sink: None,
        }
    }

    /// Accumulator writing payloads to an arbitrary sink.
    pub fn with_sink(sink: Box<dyn Write + Send>) -> Self {
        Self {
            current: RecordingSummary::default(),
            sink: Some(sink),
        }
    }

    /// Open `path` in append mode (created if missing, never truncated).
    pub fn with_file_sink(path: &Path) -> io::Result<Self> {
        let file: File = OpenOptions::new().create(true).append(true).open(path)?;
        debug!("audio sink opened: path={}", path.display());
        Ok(Self::with_sink(Box::new(file)))
    }

    pub fn chunk_count(&self) -> u64 {
        self.current.chunk_count
    }

    pub fn byte_count(&self) -> u64 {
        self.current.byte_count
    }

    pub fn has_sink(&self) -> bool {
        self.sink.is_some()
    }

    /// Feed one classified frame.
    ///
    /// Returns the recording summary when a REC_END closes a recording that
    /// received at least one chunk.
    pub fn observe(&mut self, kind: EventKind, frame: &Frame) -> Option<RecordingSummary> {
        match kind {
            EventKind::AudioChunk => {
                self.current.chunk_count += 1;
                self.current.byte_count += frame.payload.len() as u64;
                self.write_to_sink(&frame.payload);
                None
            }
            EventKind::RecEnd => {
                let finished = std::mem::take(&mut self.current);
                if finished.chunk_count == 0 {
                    return None;
                }
                if let Some(meta) = RecordingMeta::parse(&frame.payload) {
                    if u64::from(meta.total_bytes) != finished.byte_count {
                        warn!(
                            "recording size mismatch: rec_id={}, device_bytes={}, received_bytes={}",
                            meta.rec_id, meta.total_bytes, finished.byte_count
                        );
                    }
                }
                Some(finished)
            }
            EventKind::Wake | EventKind::RecStart | EventKind::Error | EventKind::Unknown(_) => {
                None
            }
        }
    }

    fn write_to_sink(&mut self, payload: &[u8]) {
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        // flush per chunk so a crash loses at most the chunk in flight
        if let Err(e) = sink.write_all(payload).and_then(|_| sink.flush()) {
            warn!("audio sink write failed: bytes={}, error={}", payload.len(), e);
        }
    }
}
