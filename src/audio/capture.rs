//! Hardware input capture via `cpal`, behind the [`CaptureHost`] trait.
//!
//! A host opens a live input stream that delivers already-encoded byte
//! fragments as [`CaptureEvent`]s over an mpsc channel.  The returned
//! [`LiveStream`] is a RAII guard: dropping it releases the hardware.
//!
//! [`CpalHost`] runs each `cpal::Stream` on its own thread so the guard is
//! `Send` on every platform (a `cpal::Stream` is not).

use std::sync::mpsc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audio::buffer::BufferFull;
use crate::audio::resample::downmix;
use crate::audio::wav::{write_header, FORMAT_IEEE_FLOAT, FORMAT_PCM};

// ---------------------------------------------------------------------------
// CaptureConstraints
// ---------------------------------------------------------------------------

/// Requested input format and processing.
///
/// Rate and channel count are hard requirements.  Echo cancellation and
/// noise suppression are requests; a host that cannot provide them captures
/// unprocessed input and says so in the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConstraints {
    pub sample_rate: u32,
    pub channels: u16,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 1,
            echo_cancellation: true,
            noise_suppression: true,
        }
    }
}

// ---------------------------------------------------------------------------
// RecordingEncoding
// ---------------------------------------------------------------------------

/// Container/codec of a finished recording.  Both variants are WAV files the
/// decoder reads back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordingEncoding {
    /// 16-bit signed PCM.
    WavPcm16,
    /// 32-bit IEEE float.
    WavFloat32,
}

impl RecordingEncoding {
    /// Pick the first of `preferred` that the host lists in `supported`.
    pub fn negotiate(preferred: &[Self], supported: &[Self]) -> Option<Self> {
        preferred.iter().copied().find(|enc| supported.contains(enc))
    }

    pub fn mime_type(&self) -> &'static str {
        "audio/wav"
    }

    pub fn bytes_per_sample(&self) -> usize {
        match self {
            RecordingEncoding::WavPcm16 => 2,
            RecordingEncoding::WavFloat32 => 4,
        }
    }

    /// Encode interleaved float frames into a data-chunk fragment.
    pub fn encode_frames(&self, samples: &[f32]) -> Vec<u8> {
        let mut out = Vec::with_capacity(samples.len() * self.bytes_per_sample());
        match self {
            RecordingEncoding::WavPcm16 => {
                for &s in samples {
                    out.extend_from_slice(&crate::audio::wav::quantize(s).to_le_bytes());
                }
            }
            RecordingEncoding::WavFloat32 => {
                for &s in samples {
                    out.extend_from_slice(&s.to_le_bytes());
                }
            }
        }
        out
    }

    /// Join `fragments` behind a container header into one blob.
    pub fn finalize(&self, fragments: Vec<Vec<u8>>, sample_rate: u32, channels: u16) -> Vec<u8> {
        let data_len: usize = fragments.iter().map(Vec::len).sum();
        let (tag, bits) = match self {
            RecordingEncoding::WavPcm16 => (FORMAT_PCM, 16),
            RecordingEncoding::WavFloat32 => (FORMAT_IEEE_FLOAT, 32),
        };

        let mut blob = Vec::with_capacity(crate::audio::wav::HEADER_LEN + data_len);
        let declared = u32::try_from(data_len).unwrap_or(u32::MAX - 36);
        write_header(&mut blob, tag, channels, sample_rate, bits, declared);
        for fragment in fragments {
            blob.extend(fragment);
        }
        blob
    }
}

// ---------------------------------------------------------------------------
// CaptureEvent / CaptureError
// ---------------------------------------------------------------------------

/// Delivered by a live stream, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    /// Encoded data-chunk bytes covering whole frames.
    Fragment(Vec<u8>),
    /// The hardware reported an error; the stream is unusable.
    Failed(String),
}

/// Errors raised while acquiring or running a capture session.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CaptureError {
    #[error("microphone access denied: {0}")]
    Permission(String),

    #[error("input device unavailable: {0}")]
    Device(String),

    #[error("capture constraints not satisfiable: {0}")]
    Config(String),

    #[error("input stream failed: {0}")]
    Stream(String),

    #[error(transparent)]
    BufferFull(#[from] BufferFull),

    #[error("no supported recording encoding (host offers {0})")]
    NoEncoding(String),

    #[error("session handle no longer refers to the live session")]
    StaleSession,

    #[error("no recording session is active")]
    NoActiveSession,
}

impl CaptureError {
    /// What the user can do about it, for errors that have a fix.
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            CaptureError::Permission(_) => {
                Some("grant microphone access to this application and try again")
            }
            CaptureError::Device(_) => {
                Some("connect a microphone or close other applications using it, then retry")
            }
            CaptureError::Config(_) => {
                Some("choose an input device that supports the configured sample rate and channels")
            }
            CaptureError::BufferFull(_) => Some("record a shorter take"),
            _ => None,
        }
    }
}

/// Map a backend-specific message onto permission vs. device failure.
fn classify(detail: String) -> CaptureError {
    let lower = detail.to_lowercase();
    if ["permission", "denied", "not authorized", "unauthorized"]
        .iter()
        .any(|needle| lower.contains(needle))
    {
        CaptureError::Permission(detail)
    } else {
        CaptureError::Device(detail)
    }
}

impl From<cpal::BuildStreamError> for CaptureError {
    fn from(e: cpal::BuildStreamError) -> Self {
        match e {
            cpal::BuildStreamError::DeviceNotAvailable => CaptureError::Device(e.to_string()),
            cpal::BuildStreamError::StreamConfigNotSupported
            | cpal::BuildStreamError::InvalidArgument => CaptureError::Config(e.to_string()),
            other => classify(other.to_string()),
        }
    }
}

impl From<cpal::SupportedStreamConfigsError> for CaptureError {
    fn from(e: cpal::SupportedStreamConfigsError) -> Self {
        match e {
            cpal::SupportedStreamConfigsError::DeviceNotAvailable => {
                CaptureError::Device(e.to_string())
            }
            other => classify(other.to_string()),
        }
    }
}

impl From<cpal::PlayStreamError> for CaptureError {
    fn from(e: cpal::PlayStreamError) -> Self {
        match e {
            cpal::PlayStreamError::DeviceNotAvailable => CaptureError::Device(e.to_string()),
            other => classify(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// CaptureHost / LiveStream
// ---------------------------------------------------------------------------

/// RAII guard over an open hardware input.  Dropping it stops the stream
/// and releases the device.
pub trait LiveStream: Send {
    /// Sample rate of the delivered fragments.
    fn sample_rate(&self) -> u32;
    /// Interleaved channel count of the delivered fragments.
    fn channels(&self) -> u16;
}

/// A source of live input streams.
pub trait CaptureHost: Send + Sync {
    /// Encodings this host can deliver, in no particular order.
    fn supported_encodings(&self) -> Vec<RecordingEncoding>;

    /// Acquire the input and start delivering fragments to `tx`.
    fn open(
        &self,
        constraints: &CaptureConstraints,
        encoding: RecordingEncoding,
        tx: mpsc::Sender<CaptureEvent>,
    ) -> Result<Box<dyn LiveStream>, CaptureError>;
}

// ---------------------------------------------------------------------------
// CpalHost
// ---------------------------------------------------------------------------

/// Production capture host on the cpal default host.
#[derive(Debug, Clone, Default)]
pub struct CpalHost {
    /// Input device name; `None` selects the system default.
    device_name: Option<String>,
}

impl CpalHost {
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }

    /// Names of the input devices on the default host.
    pub fn input_device_names() -> Result<Vec<String>, CaptureError> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| CaptureError::Device(e.to_string()))?;
        Ok(devices.filter_map(|d| d.name().ok()).collect())
    }
}

/// Thread-backed stream handle.
struct CpalStream {
    stop_tx: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
    sample_rate: u32,
    channels: u16,
}

impl LiveStream for CpalStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        if let Some(stop) = self.stop_tx.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("capture: capture thread panicked during shutdown");
            }
        }
        log::debug!("capture: input stream released");
    }
}

impl CaptureHost for CpalHost {
    fn supported_encodings(&self) -> Vec<RecordingEncoding> {
        vec![RecordingEncoding::WavPcm16, RecordingEncoding::WavFloat32]
    }

    fn open(
        &self,
        constraints: &CaptureConstraints,
        encoding: RecordingEncoding,
        tx: mpsc::Sender<CaptureEvent>,
    ) -> Result<Box<dyn LiveStream>, CaptureError> {
        if constraints.echo_cancellation || constraints.noise_suppression {
            log::info!(
                "capture: echo cancellation / noise suppression not available on this host; \
                 capturing unprocessed input"
            );
        }

        let device_name = self.device_name.clone();
        let thread_constraints = constraints.clone();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), CaptureError>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || {
                let stream =
                    match build_stream(device_name.as_deref(), &thread_constraints, encoding, tx) {
                        Ok(stream) => stream,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(e.into()));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Park until the handle asks us to stop (or is dropped).
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| CaptureError::Device(format!("failed to spawn capture thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                log::info!(
                    "capture: input stream started ({} Hz, {} ch, {:?})",
                    constraints.sample_rate,
                    constraints.channels,
                    encoding
                );
                Ok(Box::new(CpalStream {
                    stop_tx: Some(stop_tx),
                    thread: Some(thread),
                    sample_rate: constraints.sample_rate,
                    channels: constraints.channels,
                }))
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(CaptureError::Device("capture thread exited during setup".into()))
            }
        }
    }
}

fn build_stream(
    device_name: Option<&str>,
    constraints: &CaptureConstraints,
    encoding: RecordingEncoding,
    tx: mpsc::Sender<CaptureEvent>,
) -> Result<cpal::Stream, CaptureError> {
    let host = cpal::default_host();
    let device = match device_name {
        Some(name) => host
            .input_devices()
            .map_err(|e| CaptureError::Device(e.to_string()))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| CaptureError::Device(format!("input device '{name}' not found")))?,
        None => host
            .default_input_device()
            .ok_or_else(|| CaptureError::Device("no input device on the default host".into()))?,
    };

    let range = device
        .supported_input_configs()?
        .filter(|r| {
            r.channels() >= constraints.channels
                && r.min_sample_rate().0 <= constraints.sample_rate
                && r.max_sample_rate().0 >= constraints.sample_rate
        })
        .min_by_key(|r| {
            (
                r.channels() - constraints.channels,
                r.sample_format() != cpal::SampleFormat::F32,
            )
        })
        .ok_or_else(|| {
            CaptureError::Config(format!(
                "device offers no {} Hz input with at least {} channel(s)",
                constraints.sample_rate, constraints.channels
            ))
        })?;

    let device_channels = range.channels();
    let sample_format = range.sample_format();
    let config: cpal::StreamConfig = range
        .with_sample_rate(cpal::SampleRate(constraints.sample_rate))
        .into();

    let wanted = constraints.channels;
    match sample_format {
        cpal::SampleFormat::F32 => {
            build_typed::<f32>(&device, &config, device_channels, wanted, encoding, tx)
        }
        cpal::SampleFormat::I16 => {
            build_typed::<i16>(&device, &config, device_channels, wanted, encoding, tx)
        }
        cpal::SampleFormat::U16 => {
            build_typed::<u16>(&device, &config, device_channels, wanted, encoding, tx)
        }
        cpal::SampleFormat::I32 => {
            build_typed::<i32>(&device, &config, device_channels, wanted, encoding, tx)
        }
        other => Err(CaptureError::Config(format!(
            "unsupported device sample format {other:?}"
        ))),
    }
}

fn build_typed<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    device_channels: u16,
    wanted: u16,
    encoding: RecordingEncoding,
    tx: mpsc::Sender<CaptureEvent>,
) -> Result<cpal::Stream, CaptureError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let err_tx = tx.clone();
    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let samples: Vec<f32> = data.iter().map(|&s| f32::from_sample(s)).collect();
            let frames = downmix(&samples, device_channels, wanted);
            // Ignore send errors; the recorder may already be gone.
            let _ = tx.send(CaptureEvent::Fragment(encoding.encode_frames(&frames)));
        },
        move |err: cpal::StreamError| {
            log::error!("capture: cpal stream error: {err}");
            let _ = err_tx.send(CaptureEvent::Failed(err.to_string()));
        },
        None,
    )?;
    Ok(stream)
}

// ---------------------------------------------------------------------------
// Test double
// ---------------------------------------------------------------------------

#[cfg(test)]
pub use mock::MockHost;

#[cfg(test)]
mod mock {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;

    /// In-memory capture host.  Tracks how many streams are live so tests
    /// can prove two sessions never hold the input at once.
    pub struct MockHost {
        encodings: Vec<RecordingEncoding>,
        live: Arc<AtomicUsize>,
        opened: AtomicUsize,
        overlap: AtomicBool,
        next_error: Mutex<Option<CaptureError>>,
        last_tx: Mutex<Option<mpsc::Sender<CaptureEvent>>>,
        last_encoding: Mutex<Option<RecordingEncoding>>,
    }

    struct MockStream {
        live: Arc<AtomicUsize>,
        sample_rate: u32,
        channels: u16,
    }

    impl LiveStream for MockStream {
        fn sample_rate(&self) -> u32 {
            self.sample_rate
        }

        fn channels(&self) -> u16 {
            self.channels
        }
    }

    impl Drop for MockStream {
        fn drop(&mut self) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl MockHost {
        pub fn new() -> Self {
            Self::with_encodings(vec![RecordingEncoding::WavPcm16, RecordingEncoding::WavFloat32])
        }

        pub fn with_encodings(encodings: Vec<RecordingEncoding>) -> Self {
            Self {
                encodings,
                live: Arc::new(AtomicUsize::new(0)),
                opened: AtomicUsize::new(0),
                overlap: AtomicBool::new(false),
                next_error: Mutex::new(None),
                last_tx: Mutex::new(None),
                last_encoding: Mutex::new(None),
            }
        }

        /// Make the next `open` fail with `err`.
        pub fn fail_next_open(&self, err: CaptureError) {
            *self.next_error.lock().unwrap() = Some(err);
        }

        /// Deliver `event` on the most recently opened stream.
        pub fn emit(&self, event: CaptureEvent) {
            if let Some(tx) = self.last_tx.lock().unwrap().as_ref() {
                let _ = tx.send(event);
            }
        }

        /// Deliver `samples` encoded with the negotiated encoding.
        pub fn emit_samples(&self, samples: &[f32]) {
            let encoding = self.last_encoding.lock().unwrap().expect("no stream opened");
            self.emit(CaptureEvent::Fragment(encoding.encode_frames(samples)));
        }

        pub fn live_streams(&self) -> usize {
            self.live.load(Ordering::SeqCst)
        }

        pub fn opened(&self) -> usize {
            self.opened.load(Ordering::SeqCst)
        }

        /// `true` if a stream was ever opened while another was live.
        pub fn saw_overlap(&self) -> bool {
            self.overlap.load(Ordering::SeqCst)
        }
    }

    impl CaptureHost for MockHost {
        fn supported_encodings(&self) -> Vec<RecordingEncoding> {
            self.encodings.clone()
        }

        fn open(
            &self,
            constraints: &CaptureConstraints,
            encoding: RecordingEncoding,
            tx: mpsc::Sender<CaptureEvent>,
        ) -> Result<Box<dyn LiveStream>, CaptureError> {
            if let Some(err) = self.next_error.lock().unwrap().take() {
                return Err(err);
            }
            if self.live.fetch_add(1, Ordering::SeqCst) > 0 {
                self.overlap.store(true, Ordering::SeqCst);
            }
            self.opened.fetch_add(1, Ordering::SeqCst);
            *self.last_tx.lock().unwrap() = Some(tx);
            *self.last_encoding.lock().unwrap() = Some(encoding);
            Ok(Box::new(MockStream {
                live: Arc::clone(&self.live),
                sample_rate: constraints.sample_rate,
                channels: constraints.channels,
            }))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_event_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<CaptureEvent>();
        assert_send::<Box<dyn LiveStream>>();
    }

    #[test]
    fn default_constraints_are_mono_44k1_with_processing() {
        let c = CaptureConstraints::default();
        assert_eq!(c.sample_rate, 44_100);
        assert_eq!(c.channels, 1);
        assert!(c.echo_cancellation);
        assert!(c.noise_suppression);
    }

    #[test]
    fn negotiation_follows_preference_order() {
        use RecordingEncoding::*;
        assert_eq!(
            RecordingEncoding::negotiate(&[WavFloat32, WavPcm16], &[WavPcm16, WavFloat32]),
            Some(WavFloat32)
        );
        assert_eq!(
            RecordingEncoding::negotiate(&[WavFloat32, WavPcm16], &[WavPcm16]),
            Some(WavPcm16)
        );
        assert_eq!(RecordingEncoding::negotiate(&[WavFloat32], &[WavPcm16]), None);
    }

    #[test]
    fn pcm16_fragments_are_two_bytes_per_sample() {
        let bytes = RecordingEncoding::WavPcm16.encode_frames(&[1.0, -1.0, 0.0]);
        assert_eq!(bytes, vec![0xFF, 0x7F, 0x00, 0x80, 0x00, 0x00]);
    }

    #[test]
    fn float_fragments_are_raw_le_floats() {
        let bytes = RecordingEncoding::WavFloat32.encode_frames(&[0.5]);
        assert_eq!(bytes, 0.5f32.to_le_bytes().to_vec());
    }

    #[test]
    fn finalize_prepends_header_with_data_length() {
        let blob = RecordingEncoding::WavPcm16.finalize(vec![vec![1, 0], vec![2, 0]], 44_100, 1);
        assert_eq!(blob.len(), 44 + 4);
        assert_eq!(&blob[0..4], b"RIFF");
        assert_eq!(u32::from_le_bytes([blob[40], blob[41], blob[42], blob[43]]), 4);
        assert_eq!(&blob[44..], &[1, 0, 2, 0]);
    }

    #[test]
    fn backend_permission_messages_are_classified() {
        assert!(matches!(
            classify("Access denied by the OS".into()),
            CaptureError::Permission(_)
        ));
        assert!(matches!(classify("device busy".into()), CaptureError::Device(_)));
    }

    #[test]
    fn cpal_build_errors_map_to_taxonomy() {
        assert!(matches!(
            CaptureError::from(cpal::BuildStreamError::DeviceNotAvailable),
            CaptureError::Device(_)
        ));
        assert!(matches!(
            CaptureError::from(cpal::BuildStreamError::StreamConfigNotSupported),
            CaptureError::Config(_)
        ));
    }

    #[test]
    fn permission_and_device_errors_carry_remediation() {
        assert!(CaptureError::Permission("x".into())
            .remediation()
            .is_some_and(|r| r.contains("grant")));
        assert!(CaptureError::Device("x".into()).remediation().is_some());
        assert!(CaptureError::StaleSession.remediation().is_none());
    }
}
