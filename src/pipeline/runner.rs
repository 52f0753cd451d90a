//! Pipeline orchestrator — drives recording and the decode → mix → encode
//! sequence.
//!
//! [`PipelineOrchestrator`] owns the [`Recorder`], the decoder and the
//! exposed-asset slot.  It can be driven directly through its methods or by
//! [`run`](PipelineOrchestrator::run), which serves [`PipelineCommand`]s from
//! a `tokio::sync::mpsc` channel and reports [`PipelineEvent`]s.
//!
//! # Mix flow
//!
//! ```text
//! Mix(request)
//!   └─▶ discard live recording, revoke previous asset          [Preparing]
//!         └─▶ validate request + every track
//!         └─▶ JoinSet: decoder.decode(track i) for all i      (fan-out)
//!         └─▶ wait for all; lowest failing index wins         (fan-in)
//!   └─▶ spawn_blocking(mix::render → wav::encode)             [Rendering]
//!   └─▶ issue asset                                           [Ready]
//!
//! any failure ──▶ teardown (release input, drop buffers, revoke asset) [Error]
//! ```
//!
//! A command that arrives while a mix is in flight cancels the mix: the
//! decode tasks are aborted, the pipeline returns to `Idle`, and then the
//! new command runs.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::audio::capture::{CaptureConstraints, CaptureError, CaptureHost};
use crate::audio::decode::{AudioDecoder, DecodeError};
use crate::audio::mix::{self, MixError, MixErrorKind};
use crate::audio::recorder::{RecordedTake, Recorder, SessionHandle};
use crate::audio::types::{DecodedBuffer, EncodedAsset, MixRequest, RenderRequest};
use crate::audio::wav::{self, EncodeError};
use crate::config::AppConfig;

use super::asset::{AssetRef, AssetSlot};
use super::state::{Idle, PipelineState};

/// How often a live recording's capture events are drained by [`run`].
///
/// [`run`]: PipelineOrchestrator::run
const PUMP_INTERVAL: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// PipelineError
// ---------------------------------------------------------------------------

/// Structured cause of a failed pipeline operation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("recording failed: {0}")]
    Capture(#[from] CaptureError),

    #[error("track {index} could not be decoded: {source}")]
    Decode { index: usize, source: DecodeError },

    #[error("mix failed: {0}")]
    Mix(#[from] MixError),

    /// Encoder invariant violation; not user-recoverable.
    #[error("encoding failed: {0}")]
    Encode(#[from] EncodeError),

    #[error("mix cancelled by a newer request")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// The failure as seen by the mix: decode failures become
    /// [`MixErrorKind::Decode`] at their track index.
    pub fn to_mix_error(&self) -> Option<MixError> {
        match self {
            PipelineError::Decode { index, source } => Some(MixError::decode(*index, source.clone())),
            PipelineError::Mix(e) => Some(e.clone()),
            _ => None,
        }
    }

    /// Index of the offending track, for decode and per-track mix errors.
    pub fn failing_track_index(&self) -> Option<usize> {
        self.to_mix_error().and_then(|e| e.failing_track_index)
    }

    /// What the user can do about it, when there is something to do.
    pub fn remediation(&self) -> Option<String> {
        match self {
            PipelineError::Capture(e) => e.remediation().map(str::to_string),
            PipelineError::Decode { index, .. } => {
                Some(format!("drop or replace track {index} and retry"))
            }
            PipelineError::Mix(e) => match e.failing_track_index {
                Some(index) => Some(format!("fix or drop track {index} and retry")),
                None => Some("check the output channels, sample rate and duration".into()),
            },
            PipelineError::Encode(_) | PipelineError::Cancelled | PipelineError::Internal(_) => {
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Commands / events
// ---------------------------------------------------------------------------

/// Requests served by [`PipelineOrchestrator::run`].
#[derive(Debug, Clone)]
pub enum PipelineCommand {
    StartRecording,
    StopRecording,
    DiscardRecording,
    Mix(RenderRequest),
    ReleaseAsset,
}

/// Outcomes reported by [`PipelineOrchestrator::run`].
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    RecordingStarted { session: u64 },
    RecordingStopped(RecordedTake),
    RecordingDiscarded,
    /// The live session failed on its own (hardware error, buffer full).
    RecordingFailed(PipelineError),
    MixReady(AssetRef),
    /// Includes [`PipelineError::Cancelled`] when a newer command interrupted the mix.
    MixFailed(PipelineError),
    AssetReleased,
    /// A recording command was rejected.
    Error(PipelineError),
}

// ---------------------------------------------------------------------------
// PipelineOrchestrator
// ---------------------------------------------------------------------------

/// Drives recording and mixing.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use voice_mixdown::audio::{AudioTrack, CpalHost, RenderRequest, SymphoniaDecoder};
/// use voice_mixdown::config::AppConfig;
/// use voice_mixdown::pipeline::PipelineOrchestrator;
///
/// # async fn example() {
/// let config = AppConfig::default();
/// let mut orchestrator = PipelineOrchestrator::new(
///     config.clone(),
///     Arc::new(CpalHost::new(config.recording.device.clone())),
///     Arc::new(SymphoniaDecoder::from_config(&config.decoder)),
/// );
///
/// let request = RenderRequest::new(vec![
///     AudioTrack::new("https://cdn.example.com/voice.mp3".to_string()),
///     AudioTrack::new(std::path::PathBuf::from("bed.ogg")).with_gain(0.3),
/// ]);
/// let asset = orchestrator.mix(request).await.unwrap();
/// println!("{} bytes", asset.get().unwrap().bytes.len());
/// # }
/// ```
pub struct PipelineOrchestrator {
    config: AppConfig,
    decoder: Arc<dyn AudioDecoder>,
    recorder: Recorder,
    session: Option<SessionHandle>,
    assets: AssetSlot,
    state: PipelineState,
}

impl PipelineOrchestrator {
    pub fn new(
        config: AppConfig,
        host: Arc<dyn CaptureHost>,
        decoder: Arc<dyn AudioDecoder>,
    ) -> Self {
        let recorder = Recorder::from_config(&config.recording, host);
        Self {
            config,
            decoder,
            recorder,
            session: None,
            assets: AssetSlot::new(),
            state: PipelineState::default(),
        }
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    // -----------------------------------------------------------------------
    // Recording
    // -----------------------------------------------------------------------

    /// Start a recording with the configured constraints.
    ///
    /// Any existing session is torn down first.  Returns the session id.
    pub fn start_recording(&mut self) -> Result<u64, PipelineError> {
        let constraints: CaptureConstraints = self.config.recording.constraints();
        self.session = None;
        let handle = self.recorder.start(&constraints)?;
        let id = handle.id();
        self.session = Some(handle);
        log::debug!("pipeline: recording session {id} started");
        Ok(id)
    }

    /// Drain pending capture events.  Reports a session that failed since
    /// the last call.
    pub fn pump_recording(&mut self) -> Result<(), PipelineError> {
        if !self.recorder.is_live() {
            return Ok(());
        }
        self.recorder.pump();
        match self.recorder.error() {
            Some(e) => Err(PipelineError::Capture(e.clone())),
            None => Ok(()),
        }
    }

    /// Stop the current recording and return the finalized take.
    pub fn stop_recording(&mut self) -> Result<RecordedTake, PipelineError> {
        let handle = self
            .session
            .take()
            .ok_or(CaptureError::NoActiveSession)?;
        let take = self.recorder.stop(handle)?;
        log::debug!(
            "pipeline: recording stopped ({:.2}s, {} bytes)",
            take.duration_secs,
            take.bytes.len()
        );
        Ok(take)
    }

    /// Release the input and drop the captured data.
    pub fn discard_recording(&mut self) {
        self.session = None;
        self.recorder.discard();
    }

    // -----------------------------------------------------------------------
    // Assets
    // -----------------------------------------------------------------------

    /// Release the exposed asset.  Returns `false` if there was none.
    pub fn release_asset(&mut self) -> bool {
        let released = match self.assets.current() {
            Some(asset) => self.assets.release(asset.id()),
            None => false,
        };
        self.settle();
        released
    }

    /// Move the exposed asset out of the pipeline.
    pub fn take_asset(&mut self) -> Option<EncodedAsset> {
        let asset = self.assets.take();
        self.settle();
        asset
    }

    pub fn current_asset(&self) -> Option<AssetRef> {
        self.assets.current()
    }

    // -----------------------------------------------------------------------
    // Mix
    // -----------------------------------------------------------------------

    /// Decode, mix and encode `request`, exposing the result.
    ///
    /// On failure the pipeline is left in `Error` with every resource torn
    /// down and no asset exposed.
    pub async fn mix(&mut self, request: RenderRequest) -> Result<AssetRef, PipelineError> {
        if self.recorder.is_live() {
            log::warn!("pipeline: mix requested during a live recording; discarding the session");
            self.discard_recording();
        }
        self.assets.revoke();

        let preparing = self.settle().prepare(request.tracks.len());
        self.state = preparing.clone().into();
        log::debug!(
            "pipeline: Idle → Preparing ({} track(s), {} Hz, {} ch)",
            request.tracks.len(),
            request.sample_rate,
            request.channel_count
        );

        let decoder = Arc::clone(&self.decoder);
        let buffers = match Self::prepare(decoder, &request).await {
            Ok(buffers) => buffers,
            Err(e) => {
                self.teardown();
                self.state = preparing.fail(e.clone()).into();
                log::error!("pipeline error: {e}");
                return Err(e);
            }
        };

        let rendering = preparing.render();
        self.state = rendering.clone().into();
        log::debug!("pipeline: Preparing → Rendering");

        let mix_request = MixRequest {
            tracks: request.tracks.into_iter().zip(buffers).collect(),
            sample_rate: request.sample_rate,
            channel_count: request.channel_count,
            output_duration_secs: request.output_duration_secs,
        };

        match render_and_encode(mix_request).await {
            Ok(asset) => {
                log::info!(
                    "pipeline: mix ready ({:.2}s, {} bytes)",
                    asset.duration_secs,
                    asset.bytes.len()
                );
                let asset = self.assets.issue(asset);
                self.state = rendering.finish(asset.id()).into();
                Ok(asset)
            }
            Err(e) => {
                self.teardown();
                self.state = rendering.fail(e.clone()).into();
                log::error!("pipeline error: {e}");
                Err(e)
            }
        }
    }

    /// Validate the request, then decode every track concurrently.
    ///
    /// Takes the decoder by value so the future does not borrow the
    /// orchestrator, which is `Send` but not `Sync`.
    async fn prepare(
        decoder: Arc<dyn AudioDecoder>,
        request: &RenderRequest,
    ) -> Result<Vec<DecodedBuffer>, PipelineError> {
        if !(1..=2).contains(&request.channel_count) {
            return Err(MixError::format(format!(
                "channel count must be 1 or 2, got {}",
                request.channel_count
            ))
            .into());
        }
        if request.sample_rate == 0 {
            return Err(MixError::format("sample rate must be > 0").into());
        }
        if let Some(secs) = request.output_duration_secs {
            if !secs.is_finite() || secs < 0.0 {
                return Err(MixError::format(format!("invalid output duration {secs}")).into());
            }
            if !mix::fits_output(secs, request.sample_rate, request.channel_count) {
                return Err(MixError::format(format!(
                    "output duration of {secs}s exceeds the largest WAV file"
                ))
                .into());
            }
        }
        for (index, track) in request.tracks.iter().enumerate() {
            track
                .validate()
                .map_err(|reason| MixError::track(index, MixErrorKind::InvalidParameter(reason)))?;
        }

        let rate = request.sample_rate;
        let mut tasks = JoinSet::new();
        for (index, track) in request.tracks.iter().enumerate() {
            let decoder = Arc::clone(&decoder);
            let source = track.source.clone();
            tasks.spawn(async move { (index, decoder.decode(&source, rate).await) });
        }

        let mut slots: Vec<Option<DecodedBuffer>> = vec![None; request.tracks.len()];
        let mut failures: BTreeMap<usize, DecodeError> = BTreeMap::new();

        while let Some(joined) = tasks.join_next().await {
            let (index, result) =
                joined.map_err(|e| PipelineError::Internal(format!("decode task failed: {e}")))?;
            match result {
                Ok(buffer) => {
                    log::debug!(
                        "pipeline: track {index} decoded ({} frames × {} ch)",
                        buffer.frame_count(),
                        buffer.channel_count()
                    );
                    slots[index] = Some(buffer);
                }
                Err(e) => {
                    log::warn!("pipeline: track {index} failed to decode: {e}");
                    failures.insert(index, e);
                }
            }

            // Report the lowest failing index as soon as every track before
            // it has resolved; remaining decodes are aborted with `tasks`.
            if let Some((&first, _)) = failures.iter().next() {
                if slots[..first].iter().all(Option::is_some) {
                    if let Some(source) = failures.remove(&first) {
                        return Err(PipelineError::Decode {
                            index: first,
                            source,
                        });
                    }
                }
            }
        }

        slots
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| PipelineError::Internal("decode fan-in incomplete".into()))
    }

    /// Release the input and revoke any exposed asset.
    fn teardown(&mut self) {
        if self.recorder.is_live() || self.session.is_some() {
            self.discard_recording();
        }
        self.assets.revoke();
    }

    /// Return to `Idle`, abandoning an in-flight mix if there is one.
    fn settle(&mut self) -> Idle {
        match std::mem::take(&mut self.state).settle() {
            Ok(idle) => {
                self.state = PipelineState::default();
                idle
            }
            Err(busy) => {
                log::warn!("pipeline: abandoning mix in {} state", busy.label());
                self.assets.revoke();
                self.state = PipelineState::default();
                match busy {
                    PipelineState::Preparing(preparing) => preparing.abort(),
                    _ => Idle,
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Main async loop
    // -----------------------------------------------------------------------

    /// Serve commands until `command_rx` is closed.
    ///
    /// Spawn this as a tokio task.  While a recording is live its capture
    /// events are drained every 50 ms.
    pub async fn run(
        mut self,
        mut command_rx: mpsc::Receiver<PipelineCommand>,
        event_tx: mpsc::Sender<PipelineEvent>,
    ) {
        let mut pump = tokio::time::interval(PUMP_INTERVAL);
        pump.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            let command = tokio::select! {
                command = command_rx.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
                _ = pump.tick(), if self.recorder.is_live() => {
                    if let Err(e) = self.pump_recording() {
                        self.session = None;
                        let _ = event_tx.send(PipelineEvent::RecordingFailed(e)).await;
                    }
                    continue;
                }
            };

            let mut pending = Some(command);
            while let Some(command) = pending.take() {
                pending = self.handle(command, &mut command_rx, &event_tx).await;
            }
        }

        self.discard_recording();
        log::info!("pipeline: command channel closed, orchestrator shutting down");
    }

    /// Execute one command.  Returns a command that interrupted a mix.
    async fn handle(
        &mut self,
        command: PipelineCommand,
        command_rx: &mut mpsc::Receiver<PipelineCommand>,
        event_tx: &mpsc::Sender<PipelineEvent>,
    ) -> Option<PipelineCommand> {
        log::debug!("pipeline: command {command:?}");
        let event = match command {
            PipelineCommand::StartRecording => match self.start_recording() {
                Ok(session) => PipelineEvent::RecordingStarted { session },
                Err(e) => PipelineEvent::Error(e),
            },
            PipelineCommand::StopRecording => match self.stop_recording() {
                Ok(take) => PipelineEvent::RecordingStopped(take),
                Err(e) => PipelineEvent::Error(e),
            },
            PipelineCommand::DiscardRecording => {
                self.discard_recording();
                PipelineEvent::RecordingDiscarded
            }
            PipelineCommand::ReleaseAsset => {
                self.release_asset();
                PipelineEvent::AssetReleased
            }
            PipelineCommand::Mix(request) => {
                let outcome = tokio::select! {
                    result = self.mix(request) => Ok(result),
                    Some(next) = command_rx.recv() => Err(next),
                };
                match outcome {
                    Ok(Ok(asset)) => PipelineEvent::MixReady(asset),
                    Ok(Err(e)) => PipelineEvent::MixFailed(e),
                    Err(next) => {
                        log::info!("pipeline: in-flight mix cancelled by {next:?}");
                        self.settle();
                        let _ = event_tx
                            .send(PipelineEvent::MixFailed(PipelineError::Cancelled))
                            .await;
                        return Some(next);
                    }
                }
            }
        };
        let _ = event_tx.send(event).await;
        None
    }
}

/// Mix and encode on the blocking pool.
async fn render_and_encode(request: MixRequest) -> Result<EncodedAsset, PipelineError> {
    tokio::task::spawn_blocking(move || -> Result<EncodedAsset, PipelineError> {
        let rendered = mix::render(request)?;
        Ok(wav::encode(&rendered)?)
    })
    .await
    .map_err(|e| PipelineError::Internal(format!("render task failed: {e}")))?
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::capture::{CaptureEvent, MockHost};
    use crate::audio::decode::{DecodeErrorKind, MockDecoder, SymphoniaDecoder};
    use crate::audio::types::AudioTrack;

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn tone(frames: usize, level: f32) -> DecodedBuffer {
        DecodedBuffer::new(vec![vec![level; frames]], 44_100)
    }

    fn track(name: &str) -> AudioTrack {
        AudioTrack::new(name.to_string())
    }

    fn orchestrator(decoder: MockDecoder) -> (PipelineOrchestrator, Arc<MockHost>) {
        let host = Arc::new(MockHost::new());
        let orc = PipelineOrchestrator::new(
            AppConfig::default(),
            Arc::clone(&host) as Arc<dyn CaptureHost>,
            Arc::new(decoder),
        );
        (orc, host)
    }

    fn three_tracks() -> MockDecoder {
        MockDecoder::new()
            .ok("a", tone(100, 0.1))
            .ok("b", tone(200, 0.1))
            .ok("c", tone(50, 0.1))
    }

    // -----------------------------------------------------------------------
    // mix()
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn mix_reaches_ready_with_a_complete_asset() {
        let (mut orc, _) = orchestrator(three_tracks());
        let request = RenderRequest::new(vec![track("a"), track("b"), track("c")]);

        let asset = orc.mix(request).await.expect("mix");
        assert_eq!(orc.state().label(), "Ready");

        let asset = asset.get().expect("live asset");
        assert_eq!(asset.mime_type, "audio/wav");
        assert_eq!(asset.channel_count, 2);
        assert_eq!(asset.frame_count(), 200);
        assert_eq!(asset.bytes.len(), 44 + 200 * 2 * 2);
    }

    #[tokio::test]
    async fn decode_failure_names_the_track_and_issues_nothing() {
        let decoder = MockDecoder::new()
            .ok("a", tone(100, 0.1))
            .ok("b", tone(100, 0.1))
            .fail("c", DecodeErrorKind::Corrupt);
        let (mut orc, _) = orchestrator(decoder);

        let err = orc
            .mix(RenderRequest::new(vec![track("a"), track("b"), track("c")]))
            .await
            .unwrap_err();

        assert!(matches!(
            &err,
            PipelineError::Decode { index: 2, source } if source.kind == DecodeErrorKind::Corrupt
        ));
        assert_eq!(err.failing_track_index(), Some(2));
        assert!(matches!(
            err.to_mix_error().map(|e| e.kind),
            Some(MixErrorKind::Decode(_))
        ));
        assert_eq!(orc.state().label(), "Error");
        assert_eq!(orc.state().error(), Some(&err));
        assert!(orc.current_asset().is_none());
        assert!(err.remediation().is_some_and(|r| r.contains("track 2")));
    }

    #[tokio::test]
    async fn lowest_failing_index_wins() {
        let decoder = MockDecoder::new()
            .fail("a", DecodeErrorKind::Unsupported)
            .ok("b", tone(10, 0.1))
            .fail("c", DecodeErrorKind::FetchFailed);
        let (mut orc, _) = orchestrator(decoder);

        for _ in 0..5 {
            let err = orc
                .mix(RenderRequest::new(vec![track("a"), track("b"), track("c")]))
                .await
                .unwrap_err();
            assert_eq!(err.failing_track_index(), Some(0));
        }
    }

    #[tokio::test]
    async fn failed_mix_revokes_the_previous_asset() {
        let decoder = three_tracks().fail("bad", DecodeErrorKind::Unsupported);
        let (mut orc, _) = orchestrator(decoder);

        let first = orc.mix(RenderRequest::new(vec![track("a")])).await.unwrap();
        assert!(!first.is_revoked());

        orc.mix(RenderRequest::new(vec![track("bad")])).await.unwrap_err();
        assert!(first.is_revoked());
    }

    #[tokio::test]
    async fn successful_mix_replaces_the_previous_asset() {
        let (mut orc, _) = orchestrator(three_tracks());
        let first = orc.mix(RenderRequest::new(vec![track("a")])).await.unwrap();
        let second = orc.mix(RenderRequest::new(vec![track("b")])).await.unwrap();
        assert!(first.is_revoked());
        assert_eq!(second.get().map(|a| a.frame_count()), Some(200));
    }

    #[tokio::test]
    async fn invalid_track_is_rejected_before_decoding() {
        // "x" is unknown to the decoder, so reaching it would be a FetchFailed.
        let (mut orc, _) = orchestrator(MockDecoder::new());
        let err = orc
            .mix(RenderRequest::new(vec![track("x"), track("x").with_gain(2.0)]))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Mix(_)));
        assert_eq!(err.failing_track_index(), Some(1));
    }

    #[tokio::test]
    async fn unsupported_channel_count_has_no_track_index() {
        let (mut orc, _) = orchestrator(three_tracks());
        let err = orc
            .mix(RenderRequest::new(vec![track("a")]).with_format(44_100, 3))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Mix(_)));
        assert_eq!(err.failing_track_index(), None);
    }

    #[tokio::test]
    async fn oversized_output_duration_is_rejected_before_decoding() {
        let (mut orc, _) = orchestrator(MockDecoder::new());
        let mut request = RenderRequest::new(vec![track("missing")]);
        request.output_duration_secs = Some(1e300);

        let err = orc.mix(request).await.unwrap_err();
        assert!(matches!(
            err.to_mix_error().map(|e| e.kind),
            Some(MixErrorKind::InvalidFormat(_))
        ));
        assert_eq!(err.failing_track_index(), None);
        assert_eq!(orc.state().label(), "Error");
    }

    #[tokio::test]
    async fn empty_request_with_duration_renders_silence() {
        let (mut orc, _) = orchestrator(MockDecoder::new());
        let asset = orc
            .mix(RenderRequest::new(Vec::new()).with_duration(1.5))
            .await
            .unwrap();
        let asset = asset.get().unwrap();
        assert_eq!(asset.bytes.len(), 264_644);
        assert!(asset.bytes[44..].iter().all(|&b| b == 0));
    }

    #[tokio::test]
    async fn release_and_take_return_to_idle() {
        let (mut orc, _) = orchestrator(three_tracks());

        let asset = orc.mix(RenderRequest::new(vec![track("a")])).await.unwrap();
        assert!(orc.release_asset());
        assert!(asset.is_revoked());
        assert_eq!(orc.state().label(), "Idle");
        assert!(!orc.release_asset());

        let asset = orc.mix(RenderRequest::new(vec![track("a")])).await.unwrap();
        let owned = orc.take_asset().expect("asset");
        assert_eq!(owned.frame_count(), 100);
        assert!(asset.is_revoked());
        assert_eq!(orc.state().label(), "Idle");
    }

    // -----------------------------------------------------------------------
    // Recording
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn mix_discards_a_live_recording() {
        let (mut orc, host) = orchestrator(three_tracks());
        orc.start_recording().unwrap();
        assert_eq!(host.live_streams(), 1);

        orc.mix(RenderRequest::new(vec![track("a")])).await.unwrap();
        assert_eq!(host.live_streams(), 0);
        assert!(matches!(
            orc.stop_recording(),
            Err(PipelineError::Capture(CaptureError::NoActiveSession))
        ));
    }

    #[tokio::test]
    async fn permission_denied_surfaces_with_remediation() {
        let (mut orc, host) = orchestrator(MockDecoder::new());
        host.fail_next_open(CaptureError::Permission("denied by user".into()));
        let err = orc.start_recording().unwrap_err();
        assert!(matches!(err, PipelineError::Capture(CaptureError::Permission(_))));
        assert!(err.remediation().is_some_and(|r| r.contains("grant")));
    }

    #[tokio::test]
    async fn recorded_take_can_be_mixed() {
        let host = Arc::new(MockHost::new());
        let config = AppConfig::default();
        let mut orc = PipelineOrchestrator::new(
            config.clone(),
            Arc::clone(&host) as Arc<dyn CaptureHost>,
            Arc::new(SymphoniaDecoder::from_config(&config.decoder)),
        );

        orc.start_recording().unwrap();
        host.emit_samples(&vec![0.25; 441]);
        orc.pump_recording().unwrap();
        host.emit_samples(&vec![0.25; 441]);
        let take = orc.stop_recording().unwrap();
        assert_eq!(host.live_streams(), 0);

        let request = RenderRequest::new(vec![AudioTrack::new(take.into_source())])
            .with_format(44_100, 1);
        let asset = orc.mix(request).await.unwrap();
        let asset = asset.get().unwrap();
        assert_eq!(asset.channel_count, 1);
        assert_eq!(asset.frame_count(), 882);
    }

    #[tokio::test]
    async fn pump_reports_a_failed_session() {
        let (mut orc, host) = orchestrator(MockDecoder::new());
        orc.start_recording().unwrap();
        host.emit(CaptureEvent::Failed("unplugged".into()));
        assert!(matches!(
            orc.pump_recording(),
            Err(PipelineError::Capture(CaptureError::Stream(_)))
        ));
        assert_eq!(host.live_streams(), 0);
    }

    // -----------------------------------------------------------------------
    // run()
    // -----------------------------------------------------------------------

    async fn collect(mut rx: mpsc::Receiver<PipelineEvent>) -> Vec<PipelineEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test]
    async fn run_future_is_send_and_spawns_a_mix() {
        let (orc, _) = orchestrator(three_tracks());
        let (tx, rx) = mpsc::channel(8);
        let (ev_tx, mut ev_rx) = mpsc::channel(8);

        let run = orc.run(rx, ev_tx);
        assert_send(&run);
        let task = tokio::spawn(run);

        tx.send(PipelineCommand::Mix(RenderRequest::new(vec![track("b")])))
            .await
            .unwrap();
        match ev_rx.recv().await {
            Some(PipelineEvent::MixReady(asset)) => {
                assert_eq!(asset.get().map(|a| a.frame_count()), Some(200));
            }
            other => panic!("unexpected event {other:?}"),
        }

        drop(tx);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn run_serves_a_mix() {
        let (orc, _) = orchestrator(three_tracks());
        let (tx, rx) = mpsc::channel(8);
        let (ev_tx, ev_rx) = mpsc::channel(8);

        tx.send(PipelineCommand::Mix(RenderRequest::new(vec![track("a")])))
            .await
            .unwrap();
        drop(tx);
        orc.run(rx, ev_tx).await;

        let events = collect(ev_rx).await;
        assert_eq!(events.len(), 1);
        // The orchestrator was dropped when `run` returned, so the asset is gone.
        assert!(matches!(&events[0], PipelineEvent::MixReady(asset) if asset.is_revoked()));
    }

    #[tokio::test]
    async fn new_command_cancels_in_flight_mix() {
        let decoder = three_tracks().slow(Duration::from_millis(300));
        let (orc, _) = orchestrator(decoder);
        let (tx, rx) = mpsc::channel(8);
        let (ev_tx, ev_rx) = mpsc::channel(8);

        tx.send(PipelineCommand::Mix(RenderRequest::new(vec![track("a")])))
            .await
            .unwrap();
        tx.send(PipelineCommand::Mix(RenderRequest::new(vec![track("b")])))
            .await
            .unwrap();
        drop(tx);
        orc.run(rx, ev_tx).await;

        let events = collect(ev_rx).await;
        assert_eq!(events.len(), 2, "{events:?}");
        assert!(matches!(
            events[0],
            PipelineEvent::MixFailed(PipelineError::Cancelled)
        ));
        assert!(matches!(events[1], PipelineEvent::MixReady(_)));
    }

    #[tokio::test]
    async fn run_records_and_stops() {
        let (orc, host) = orchestrator(MockDecoder::new());
        let (tx, rx) = mpsc::channel(8);
        let (ev_tx, mut ev_rx) = mpsc::channel(8);
        let task = tokio::spawn(orc.run(rx, ev_tx));

        tx.send(PipelineCommand::StartRecording).await.unwrap();
        assert!(matches!(
            ev_rx.recv().await,
            Some(PipelineEvent::RecordingStarted { .. })
        ));

        host.emit_samples(&vec![0.0; 4_410]);
        tx.send(PipelineCommand::StopRecording).await.unwrap();
        match ev_rx.recv().await {
            Some(PipelineEvent::RecordingStopped(take)) => {
                assert!((take.duration_secs - 0.1).abs() < 1e-9);
            }
            other => panic!("unexpected event {other:?}"),
        }

        tx.send(PipelineCommand::StopRecording).await.unwrap();
        assert!(matches!(
            ev_rx.recv().await,
            Some(PipelineEvent::Error(PipelineError::Capture(
                CaptureError::NoActiveSession
            )))
        ));

        drop(tx);
        task.await.unwrap();
        assert_eq!(host.live_streams(), 0);
    }

    #[tokio::test]
    async fn run_reports_a_session_that_fails_while_live() {
        let (orc, host) = orchestrator(MockDecoder::new());
        let (tx, rx) = mpsc::channel(8);
        let (ev_tx, mut ev_rx) = mpsc::channel(8);
        let task = tokio::spawn(orc.run(rx, ev_tx));

        tx.send(PipelineCommand::StartRecording).await.unwrap();
        assert!(matches!(
            ev_rx.recv().await,
            Some(PipelineEvent::RecordingStarted { .. })
        ));

        host.emit(CaptureEvent::Failed("device lost".into()));
        assert!(matches!(
            ev_rx.recv().await,
            Some(PipelineEvent::RecordingFailed(PipelineError::Capture(
                CaptureError::Stream(_)
            )))
        ));
        assert_eq!(host.live_streams(), 0);

        drop(tx);
        task.await.unwrap();
    }
}
