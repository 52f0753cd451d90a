//! Recording session state machine.
//!
//! ```text
//! Idle ──start──▶ Requesting ──open ok──▶ Recording ──stop──▶ Stopped
//!                     │                       │
//!                     └──open failed──▶ Error ◀──stream failed / buffer full
//!
//! any state ──discard──▶ Idle
//! any state ──start────▶ (tear down) ──▶ Requesting
//! ```
//!
//! At most one session holds the input at a time: `start` always releases
//! the previous stream before asking the host for a new one.  A session is
//! addressed by the [`SessionHandle`] that `start` returned; handles are
//! never reused, so a handle from an earlier session is rejected with
//! [`CaptureError::StaleSession`].

use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;

use crate::audio::buffer::ChunkBuffer;
use crate::audio::capture::{
    CaptureConstraints, CaptureError, CaptureEvent, CaptureHost, LiveStream, RecordingEncoding,
};
use crate::audio::types::TrackSource;
use crate::config::RecordingConfig;

// ---------------------------------------------------------------------------
// SessionHandle / RecordedTake
// ---------------------------------------------------------------------------

/// Token for one recording session.  Deliberately not `Clone`.
#[derive(Debug, PartialEq, Eq)]
pub struct SessionHandle {
    id: u64,
}

impl SessionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// A finalized recording: container header plus every captured fragment.
#[derive(Debug, Clone)]
pub struct RecordedTake {
    pub bytes: Vec<u8>,
    pub encoding: RecordingEncoding,
    pub sample_rate: u32,
    pub channels: u16,
    pub duration_secs: f64,
}

impl RecordedTake {
    fn finalize(
        fragments: Vec<Vec<u8>>,
        encoding: RecordingEncoding,
        sample_rate: u32,
        channels: u16,
    ) -> Self {
        let data_len: usize = fragments.iter().map(Vec::len).sum();
        let frame_bytes = encoding.bytes_per_sample() * channels.max(1) as usize;
        let duration_secs = if sample_rate == 0 {
            0.0
        } else {
            (data_len / frame_bytes) as f64 / sample_rate as f64
        };
        Self {
            bytes: encoding.finalize(fragments, sample_rate, channels),
            encoding,
            sample_rate,
            channels,
            duration_secs,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        self.encoding.mime_type()
    }

    /// Hand the blob to the decoder as an in-memory track source.
    pub fn into_source(self) -> TrackSource {
        TrackSource::from(self.bytes)
    }

    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, &self.bytes)
    }
}

// ---------------------------------------------------------------------------
// RecorderState
// ---------------------------------------------------------------------------

/// A session that currently holds the input.
pub struct ActiveSession {
    id: u64,
    stream: Box<dyn LiveStream>,
    events: mpsc::Receiver<CaptureEvent>,
    buffer: ChunkBuffer,
    encoding: RecordingEncoding,
}

/// A session that ended in a hardware or buffer error.  The input has been
/// released; fragments captured before the failure are kept.
pub struct FailedSession {
    id: Option<u64>,
    error: CaptureError,
    salvage: ChunkBuffer,
    encoding: RecordingEncoding,
    sample_rate: u32,
    channels: u16,
}

pub enum RecorderState {
    Idle,
    Requesting,
    Recording(ActiveSession),
    Stopped,
    Error(FailedSession),
}

impl RecorderState {
    pub fn label(&self) -> &'static str {
        match self {
            RecorderState::Idle => "idle",
            RecorderState::Requesting => "requesting",
            RecorderState::Recording(_) => "recording",
            RecorderState::Stopped => "stopped",
            RecorderState::Error(_) => "error",
        }
    }
}

// ---------------------------------------------------------------------------
// Recorder
// ---------------------------------------------------------------------------

pub struct Recorder {
    host: Arc<dyn CaptureHost>,
    preferred: Vec<RecordingEncoding>,
    max_buffered_bytes: usize,
    state: RecorderState,
    next_id: u64,
}

impl Recorder {
    pub fn new(
        host: Arc<dyn CaptureHost>,
        preferred: Vec<RecordingEncoding>,
        max_buffered_bytes: usize,
    ) -> Self {
        Self {
            host,
            preferred,
            max_buffered_bytes,
            state: RecorderState::Idle,
            next_id: 1,
        }
    }

    pub fn from_config(config: &RecordingConfig, host: Arc<dyn CaptureHost>) -> Self {
        Self::new(
            host,
            config.preferred_encodings.clone(),
            config.max_buffered_bytes,
        )
    }

    /// Begin a new session, tearing down whatever session exists.
    pub fn start(
        &mut self,
        constraints: &CaptureConstraints,
    ) -> Result<SessionHandle, CaptureError> {
        if !matches!(self.state, RecorderState::Idle | RecorderState::Stopped) {
            log::info!(
                "recorder: tearing down {} session before starting a new one",
                self.state.label()
            );
        }
        // Release the previous stream before the host is asked for another.
        self.state = RecorderState::Requesting;

        let supported = self.host.supported_encodings();
        let encoding = RecordingEncoding::negotiate(&self.preferred, &supported)
            .ok_or_else(|| CaptureError::NoEncoding(format!("{supported:?}")));
        let encoding = match encoding {
            Ok(encoding) => encoding,
            Err(e) => return Err(self.fail_request(e)),
        };

        let (tx, rx) = mpsc::channel();
        let stream = match self.host.open(constraints, encoding, tx) {
            Ok(stream) => stream,
            Err(e) => return Err(self.fail_request(e)),
        };

        let id = self.next_id;
        self.next_id += 1;
        log::info!("recorder: session {id} recording ({encoding:?})");
        self.state = RecorderState::Recording(ActiveSession {
            id,
            stream,
            events: rx,
            buffer: ChunkBuffer::new(self.max_buffered_bytes),
            encoding,
        });
        Ok(SessionHandle { id })
    }

    fn fail_request(&mut self, error: CaptureError) -> CaptureError {
        log::warn!("recorder: could not acquire input: {error}");
        self.state = RecorderState::Error(FailedSession {
            id: None,
            error: error.clone(),
            salvage: ChunkBuffer::new(0),
            encoding: RecordingEncoding::WavPcm16,
            sample_rate: 0,
            channels: 0,
        });
        error
    }

    /// Move pending capture events into the session buffer.
    ///
    /// Returns the number of fragments accepted.  A failure event or a full
    /// buffer moves the session to `Error` and releases the input.
    pub fn pump(&mut self) -> usize {
        let RecorderState::Recording(session) = &mut self.state else {
            return 0;
        };

        let mut accepted = 0;
        let mut failure = None;
        loop {
            match session.events.try_recv() {
                Ok(CaptureEvent::Fragment(bytes)) => match session.buffer.push(bytes) {
                    Ok(()) => accepted += 1,
                    Err(full) => {
                        failure = Some(CaptureError::from(full));
                        break;
                    }
                },
                Ok(CaptureEvent::Failed(detail)) => {
                    failure = Some(CaptureError::Stream(detail));
                    break;
                }
                Err(mpsc::TryRecvError::Empty) => break,
                Err(mpsc::TryRecvError::Disconnected) => {
                    failure = Some(CaptureError::Stream("input stream closed".into()));
                    break;
                }
            }
        }

        if let Some(error) = failure {
            self.fail_session(error);
        }
        accepted
    }

    fn fail_session(&mut self, error: CaptureError) {
        let RecorderState::Recording(session) =
            std::mem::replace(&mut self.state, RecorderState::Idle)
        else {
            return;
        };
        let ActiveSession {
            id,
            stream,
            buffer,
            encoding,
            ..
        } = session;
        let (sample_rate, channels) = (stream.sample_rate(), stream.channels());
        drop(stream);

        log::error!(
            "recorder: session {id} failed after {} bytes: {error}",
            buffer.byte_len()
        );
        self.state = RecorderState::Error(FailedSession {
            id: Some(id),
            error,
            salvage: buffer,
            encoding,
            sample_rate,
            channels,
        });
    }

    /// End the session addressed by `handle` and return the finalized blob.
    pub fn stop(&mut self, handle: SessionHandle) -> Result<RecordedTake, CaptureError> {
        self.pump();

        match std::mem::replace(&mut self.state, RecorderState::Idle) {
            RecorderState::Recording(session) if session.id == handle.id => {
                let ActiveSession {
                    id,
                    stream,
                    events,
                    mut buffer,
                    encoding,
                } = session;
                let (sample_rate, channels) = (stream.sample_rate(), stream.channels());
                drop(stream);

                // Fragments delivered between the last pump and the stream halting.
                for event in events.try_iter() {
                    if let CaptureEvent::Fragment(bytes) = event {
                        if let Err(full) = buffer.push(bytes) {
                            log::warn!("recorder: dropping trailing fragment: {full}");
                            break;
                        }
                    }
                }

                let take = RecordedTake::finalize(buffer.drain(), encoding, sample_rate, channels);
                log::info!(
                    "recorder: session {id} stopped ({:.2}s, {} bytes)",
                    take.duration_secs,
                    take.bytes.len()
                );
                self.state = RecorderState::Stopped;
                Ok(take)
            }
            RecorderState::Error(failed) if failed.id == Some(handle.id) => {
                let error = failed.error.clone();
                self.state = RecorderState::Error(failed);
                Err(error)
            }
            other => {
                self.state = other;
                Err(match self.state {
                    RecorderState::Recording(_) | RecorderState::Error(_) => {
                        CaptureError::StaleSession
                    }
                    _ => CaptureError::NoActiveSession,
                })
            }
        }
    }

    /// Release the input and drop every captured fragment.
    pub fn discard(&mut self) {
        let previous = std::mem::replace(&mut self.state, RecorderState::Idle);
        if !matches!(previous, RecorderState::Idle) {
            log::debug!("recorder: discarded {} session", previous.label());
        }
    }

    /// Finalize the fragments a failed session captured before its error.
    pub fn take_salvage(&mut self) -> Option<RecordedTake> {
        let RecorderState::Error(failed) = &mut self.state else {
            return None;
        };
        if failed.salvage.is_empty() {
            return None;
        }
        Some(RecordedTake::finalize(
            failed.salvage.drain(),
            failed.encoding,
            failed.sample_rate,
            failed.channels,
        ))
    }

    pub fn is_live(&self) -> bool {
        matches!(self.state, RecorderState::Recording(_))
    }

    pub fn state(&self) -> &RecorderState {
        &self.state
    }

    pub fn state_label(&self) -> &'static str {
        self.state.label()
    }

    /// The error that ended the current session, if it failed.
    pub fn error(&self) -> Option<&CaptureError> {
        match &self.state {
            RecorderState::Error(failed) => Some(&failed.error),
            _ => None,
        }
    }

    /// Bytes held for a failed session.
    pub fn salvaged_bytes(&self) -> usize {
        match &self.state {
            RecorderState::Error(failed) => failed.salvage.byte_len(),
            _ => 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
