//! Pipeline orchestrator module for voice-mixdown.
//!
//! This module wires recording and the decode → mix → encode sequence
//! together behind a single owner, and exposes the finished asset.
//!
//! # Architecture
//!
//! ```text
//! PipelineCommand (mpsc)
//!        │
//!        ▼
//! PipelineOrchestrator::run()  ← async tokio task
//!        │
//!        ├─ StartRecording / StopRecording / DiscardRecording → Recorder
//!        │
//!        ├─ Mix(request)
//!        │     ├─ JoinSet: AudioDecoder::decode per track    [Preparing]
//!        │     ├─ spawn_blocking(mix::render + wav::encode)  [Rendering]
//!        │     └─ AssetSlot::issue                           [Ready]
//!        │
//!        └─ ReleaseAsset → AssetSlot::release
//!
//! PipelineEvent (mpsc) ──▶ caller
//! ```
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//! use voice_mixdown::audio::{AudioTrack, CpalHost, RenderRequest, SymphoniaDecoder};
//! use voice_mixdown::config::AppConfig;
//! use voice_mixdown::pipeline::{PipelineCommand, PipelineEvent, PipelineOrchestrator};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = AppConfig::default();
//!     let orchestrator = PipelineOrchestrator::new(
//!         config.clone(),
//!         Arc::new(CpalHost::new(config.recording.device.clone())),
//!         Arc::new(SymphoniaDecoder::from_config(&config.decoder)),
//!     );
//!
//!     let (command_tx, command_rx) = mpsc::channel(16);
//!     let (event_tx, mut event_rx) = mpsc::channel(16);
//!     tokio::spawn(orchestrator.run(command_rx, event_tx));
//!
//!     let request = RenderRequest::new(vec![AudioTrack::new("voice.mp3".to_string())]);
//!     command_tx.send(PipelineCommand::Mix(request)).await.unwrap();
//!     if let Some(PipelineEvent::MixReady(asset)) = event_rx.recv().await {
//!         println!("{} bytes", asset.get().map(|a| a.bytes.len()).unwrap_or(0));
//!     }
//! }
//! ```

pub mod asset;
pub mod runner;
pub mod state;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use asset::{AssetRef, AssetSlot};
pub use runner::{PipelineCommand, PipelineError, PipelineEvent, PipelineOrchestrator};
pub use state::PipelineState;
