use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{info, warn};

use crate::error::{ClientError, Result};
use crate::media::MediaStream;

pub const RECORDING_MIME: &str = "video/webm";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingFile {
    pub file_name: String,
    pub mime: &'static str,
    pub data: Vec<u8>,
}

impl RecordingFile {
    pub async fn save_to(&self, dir: impl AsRef<Path>) -> Result<PathBuf> {
        let path = dir.as_ref().join(&self.file_name);
        tokio::fs::write(&path, &self.data).await?;
        info!(path = %path.display(), bytes = self.data.len(), "recording saved");
        Ok(path)
    }
}

pub fn file_name_at(unix_ms: i64) -> String {
    format!("recording_{unix_ms}.webm")
}

#[derive(Debug, Default)]
enum State {
    #[default]
    Idle,
    Recording {
        chunks: Vec<Vec<u8>>,
    },
}

/// Local half of a recording: whether one is running and the encoded
/// chunks collected so far. The room pairs it with the backend calls.
#[derive(Debug, Default)]
pub struct Recorder {
    state: State,
    error: Option<String>,
    stream_live: Option<bool>,
}

impl Recorder {
    pub fn is_recording(&self) -> bool {
        matches!(self.state, State::Recording { .. })
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Called whenever the local stream may have changed, like the record
    /// button graying out when there is nothing to record. Only a change in
    /// whether anything is live touches the error.
    pub fn observe_stream(&mut self, stream: Option<&MediaStream>) {
        let live = stream.is_some_and(MediaStream::has_live_tracks);
        if self.stream_live == Some(live) {
            return;
        }
        self.stream_live = Some(live);
        self.error = if live {
            None
        } else {
            Some("No active media stream. Grant camera/mic access to record.".into())
        };
    }

    pub fn can_start(&mut self, stream: Option<&MediaStream>) -> Result<()> {
        if self.is_recording() {
            return Err(ClientError::Validation("Already recording.".into()));
        }
        if !stream.is_some_and(MediaStream::has_live_tracks) {
            let msg = "Cannot record: no active media stream.";
            self.error = Some(msg.into());
            return Err(ClientError::Validation(msg.into()));
        }
        Ok(())
    }

    pub fn begin(&mut self) {
        self.state = State::Recording { chunks: Vec::new() };
        self.error = None;
        info!("recording started");
    }

    pub fn fail(&mut self, err: &ClientError) {
        warn!(%err, "recording could not start");
        self.state = State::Idle;
        self.error = Some("Recording failed. Check permissions.".into());
    }

    /// Appends an encoded chunk; empty chunks and chunks outside a
    /// recording are dropped.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> bool {
        match &mut self.state {
            State::Recording { chunks } if !chunk.is_empty() => {
                chunks.push(chunk.to_vec());
                true
            }
            _ => false,
        }
    }

    pub fn finish(&mut self) -> Option<RecordingFile> {
        match std::mem::take(&mut self.state) {
            State::Recording { chunks } => {
                let data = chunks.concat();
                let file = RecordingFile {
                    file_name: file_name_at(Utc::now().timestamp_millis()),
                    mime: RECORDING_MIME,
                    data,
                };
                info!(file = %file.file_name, bytes = file.data.len(), "recording stopped");
                Some(file)
            }
            State::Idle => None,
        }
    }
}
