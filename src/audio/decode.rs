//! Track decoder — opaque encoded source → planar `f32` at the mix rate.
//!
//! # Stages
//!
//! ```text
//! TrackSource ──fetch──▶ bytes ──symphonia──▶ planar f32 @ native rate
//!                                          ──rubato──▶ planar f32 @ target rate
//! ```
//!
//! Fetching is bounded by [`DecoderConfig::fetch_timeout_secs`] and fails fast
//! with [`DecodeErrorKind::FetchFailed`].  Decoding and resampling are CPU
//! bound and run on `tokio::task::spawn_blocking`.  [`SymphoniaDecoder`]
//! holds no mutable state, so any number of decodes may run at once.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use symphonia::core::audio::{AudioBuffer, AudioBufferRef, Signal};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

use crate::audio::resample::resample;
use crate::audio::types::{DecodedBuffer, TrackSource};
use crate::config::DecoderConfig;

// ---------------------------------------------------------------------------
// DecodeError
// ---------------------------------------------------------------------------

/// Category of a decode failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeErrorKind {
    /// Container or codec the decoder does not understand.
    Unsupported,
    /// Recognised format, but the data is malformed.
    Corrupt,
    /// The bytes could not be retrieved (network, file system, timeout).
    FetchFailed,
}

impl std::fmt::Display for DecodeErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DecodeErrorKind::Unsupported => "unsupported format",
            DecodeErrorKind::Corrupt => "corrupt audio",
            DecodeErrorKind::FetchFailed => "fetch failed",
        };
        f.write_str(label)
    }
}

/// A failed decode of one source.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind} ({source_ref}): {detail}")]
pub struct DecodeError {
    pub kind: DecodeErrorKind,
    pub source_ref: String,
    pub detail: String,
}

impl DecodeError {
    pub fn new(
        kind: DecodeErrorKind,
        source_ref: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            source_ref: source_ref.into(),
            detail: detail.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// AudioDecoder trait
// ---------------------------------------------------------------------------

/// Async, thread-safe decoder interface used by the orchestrator.
///
/// Implementations must resample to `target_rate` before returning so that
/// every buffer entering one mix shares the same rate.
#[async_trait]
pub trait AudioDecoder: Send + Sync {
    async fn decode(
        &self,
        source: &TrackSource,
        target_rate: u32,
    ) -> Result<DecodedBuffer, DecodeError>;
}

// Compile-time assertion: Arc<dyn AudioDecoder> must be constructible.
const _: fn() = || {
    fn _assert_object_safe(_: Arc<dyn AudioDecoder>) {}
};

// ---------------------------------------------------------------------------
// SymphoniaDecoder
// ---------------------------------------------------------------------------

/// Production decoder: `reqwest` / `tokio::fs` fetch + `symphonia` decode +
/// `rubato` resample.
pub struct SymphoniaDecoder {
    client: reqwest::Client,
    fetch_timeout: Duration,
    max_source_bytes: usize,
}

impl SymphoniaDecoder {
    /// Build a decoder from application config.
    ///
    /// The HTTP client carries the fetch timeout.  A default client is used
    /// as a last resort if the builder fails; file reads are bounded by the
    /// same timeout separately.
    pub fn from_config(config: &DecoderConfig) -> Self {
        let fetch_timeout = config.fetch_timeout();
        let client = reqwest::Client::builder()
            .timeout(fetch_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            fetch_timeout,
            max_source_bytes: config.max_source_bytes,
        }
    }

    async fn fetch(&self, source: &TrackSource) -> Result<Arc<[u8]>, DecodeError> {
        let fail = |detail: String| {
            DecodeError::new(DecodeErrorKind::FetchFailed, source.source_ref(), detail)
        };

        let bytes: Arc<[u8]> = match source {
            TrackSource::Bytes(bytes) => Arc::clone(bytes),
            TrackSource::Path(path) => {
                if let Ok(meta) = tokio::fs::metadata(path).await {
                    if meta.len() > self.max_source_bytes as u64 {
                        return Err(fail(format!(
                            "source is {} bytes (limit {})",
                            meta.len(),
                            self.max_source_bytes
                        )));
                    }
                }
                match tokio::time::timeout(self.fetch_timeout, tokio::fs::read(path)).await {
                    Ok(Ok(bytes)) => bytes.into(),
                    Ok(Err(e)) => return Err(fail(e.to_string())),
                    Err(_) => return Err(fail("timed out reading file".into())),
                }
            }
            TrackSource::Url(url) => {
                let mut response = self.client.get(url).send().await.map_err(|e| {
                    if e.is_timeout() {
                        fail("request timed out".into())
                    } else {
                        fail(e.to_string())
                    }
                })?;
                let status = response.status();
                if !status.is_success() {
                    return Err(fail(format!("HTTP {status}")));
                }
                if let Some(len) = response.content_length() {
                    if len > self.max_source_bytes as u64 {
                        return Err(fail(format!(
                            "source is {len} bytes (limit {})",
                            self.max_source_bytes
                        )));
                    }
                }

                // Chunked or unlabelled bodies are capped while streaming.
                let mut body = Vec::new();
                while let Some(chunk) = response.chunk().await.map_err(|e| {
                    if e.is_timeout() {
                        fail("request timed out".into())
                    } else {
                        fail(e.to_string())
                    }
                })? {
                    if body.len() + chunk.len() > self.max_source_bytes {
                        return Err(fail(format!(
                            "source exceeds {} bytes (limit {})",
                            body.len() + chunk.len(),
                            self.max_source_bytes
                        )));
                    }
                    body.extend_from_slice(&chunk);
                }
                body.into()
            }
        };

        if bytes.len() > self.max_source_bytes {
            return Err(fail(format!(
                "source is {} bytes (limit {})",
                bytes.len(),
                self.max_source_bytes
            )));
        }
        Ok(bytes)
    }
}

#[async_trait]
impl AudioDecoder for SymphoniaDecoder {
    async fn decode(
        &self,
        source: &TrackSource,
        target_rate: u32,
    ) -> Result<DecodedBuffer, DecodeError> {
        let source_ref = source.source_ref();
        log::debug!("decode: fetching {source_ref}");

        let bytes = self.fetch(source).await?;
        let hint = source.extension_hint();

        let task_ref = source_ref.clone();
        let decoded = tokio::task::spawn_blocking(move || {
            decode_bytes(&bytes, hint.as_deref(), &task_ref).and_then(|buffer| {
                let native = buffer.sample_rate;
                resample(buffer.channels, native, target_rate)
                    .map(|channels| DecodedBuffer::new(channels, target_rate))
                    .map_err(|e| {
                        DecodeError::new(DecodeErrorKind::Corrupt, task_ref.clone(), e.to_string())
                    })
            })
        })
        .await
        .map_err(|e| {
            DecodeError::new(
                DecodeErrorKind::Corrupt,
                source_ref.clone(),
                format!("decode task failed: {e}"),
            )
        })??;

        log::debug!(
            "decode: {source_ref} → {} frames × {} ch @ {} Hz",
            decoded.frame_count(),
            decoded.channel_count(),
            decoded.sample_rate
        );
        Ok(decoded)
    }
}

// ---------------------------------------------------------------------------
// decode_bytes
// ---------------------------------------------------------------------------

/// Decode an in-memory encoded stream at its native sample rate.
///
/// Packets from other tracks are skipped.  A malformed packet after at least
/// one good one ends the stream early with a warning; a malformed first
/// packet is reported as [`DecodeErrorKind::Corrupt`].
pub fn decode_bytes(
    bytes: &[u8],
    extension: Option<&str>,
    source_ref: &str,
) -> Result<DecodedBuffer, DecodeError> {
    let unsupported =
        |detail: String| DecodeError::new(DecodeErrorKind::Unsupported, source_ref, detail);
    let corrupt = |detail: String| DecodeError::new(DecodeErrorKind::Corrupt, source_ref, detail);

    if bytes.is_empty() {
        return Err(corrupt("source is empty".into()));
    }

    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes.to_vec())), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = extension {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| match e {
            SymphoniaError::IoError(io) => corrupt(format!("truncated container: {io}")),
            other => unsupported(format!("failed to probe format: {other}")),
        })?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| unsupported("no audio track found".into()))?;

    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| unsupported(format!("failed to create decoder: {e}")))?;

    let mut sample_rate = codec_params.sample_rate;
    let mut channels: Vec<Vec<f32>> = Vec::new();
    let mut good_packets = 0usize;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) if good_packets > 0 => {
                log::warn!("decode: {source_ref}: stopping at unreadable packet: {e}");
                break;
            }
            Err(e) => return Err(corrupt(format!("failed to read packet: {e}"))),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                good_packets += 1;
                if sample_rate.is_none() {
                    sample_rate = Some(decoded.spec().rate);
                }
                append_planar(&decoded, &mut channels);
            }
            Err(SymphoniaError::DecodeError(e)) => {
                log::warn!("decode: {source_ref}: skipping bad packet: {e}");
                continue;
            }
            Err(SymphoniaError::Unsupported(e)) => {
                return Err(unsupported(format!("unsupported codec feature: {e}")))
            }
            Err(e) if good_packets > 0 => {
                log::warn!("decode: {source_ref}: stopping at decoder error: {e}");
                break;
            }
            Err(e) => return Err(corrupt(e.to_string())),
        }
    }

    let sample_rate = sample_rate
        .filter(|&r| r > 0)
        .ok_or_else(|| corrupt("sample rate not found".into()))?;

    if channels.is_empty() {
        let declared = codec_params.channels.map_or(0, |c| c.count());
        if declared == 0 {
            return Err(corrupt("no decodable audio".into()));
        }
        channels = vec![Vec::new(); declared];
    }

    Ok(DecodedBuffer::new(channels, sample_rate))
}

/// Append one decoded packet to the planar accumulator, normalising to `f32`.
///
/// Signed 16-bit input is scaled asymmetrically (`/32768` below zero,
/// `/32767` above) to invert [`crate::audio::wav::quantize`] exactly.
fn append_planar(decoded: &AudioBufferRef<'_>, channels: &mut Vec<Vec<f32>>) {
    let count = decoded.spec().channels.count();
    if channels.is_empty() {
        channels.resize(count, Vec::new());
    }

    match decoded {
        AudioBufferRef::S16(buf) => {
            for (ch, out) in channels.iter_mut().enumerate().take(buf.spec().channels.count()) {
                out.extend(buf.chan(ch).iter().map(|&s| {
                    if s < 0 {
                        s as f32 / 32_768.0
                    } else {
                        s as f32 / 32_767.0
                    }
                }));
            }
        }
        AudioBufferRef::F32(buf) => {
            for (ch, out) in channels.iter_mut().enumerate().take(buf.spec().channels.count()) {
                out.extend_from_slice(buf.chan(ch));
            }
        }
        other => {
            let mut converted: AudioBuffer<f32> = other.make_equivalent();
            other.convert(&mut converted);
            for (ch, out) in channels
                .iter_mut()
                .enumerate()
                .take(converted.spec().channels.count())
            {
                out.extend_from_slice(converted.chan(ch));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Test double
// ---------------------------------------------------------------------------

/// Decoder stub for pipeline tests: returns a fixed buffer per source
/// reference, or a scripted error.
#[cfg(test)]
pub struct MockDecoder {
    responses: std::collections::HashMap<String, Result<DecodedBuffer, DecodeErrorKind>>,
    delay: Option<Duration>,
}

#[cfg(test)]
impl MockDecoder {
    pub fn new() -> Self {
        Self {
            responses: Default::default(),
            delay: None,
        }
    }

    pub fn ok(mut self, source_ref: &str, buffer: DecodedBuffer) -> Self {
        self.responses.insert(source_ref.into(), Ok(buffer));
        self
    }

    pub fn fail(mut self, source_ref: &str, kind: DecodeErrorKind) -> Self {
        self.responses.insert(source_ref.into(), Err(kind));
        self
    }

    /// Delay every decode, to keep a mix in flight.
    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[cfg(test)]
#[async_trait]
impl AudioDecoder for MockDecoder {
    async fn decode(
        &self,
        source: &TrackSource,
        target_rate: u32,
    ) -> Result<DecodedBuffer, DecodeError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let source_ref = source.source_ref();
        match self.responses.get(&source_ref) {
            Some(Ok(buffer)) => {
                let channels = resample(buffer.channels.clone(), buffer.sample_rate, target_rate)
                    .map_err(|e| {
                        DecodeError::new(DecodeErrorKind::Corrupt, &source_ref, e.to_string())
                    })?;
                Ok(DecodedBuffer::new(channels, target_rate))
            }
            Some(Err(kind)) => Err(DecodeError::new(*kind, &source_ref, "scripted failure")),
            None => Err(DecodeError::new(
                DecodeErrorKind::FetchFailed,
                &source_ref,
                "unknown source",
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
