//! # Local Playback (consumer mode)
//!
//! Plays a WAV stream from the TTS provider on a local output device while it
//! is still arriving.
//!
//! ## Data flow:
//! ```text
//! upstream chunks ──mpsc──▶ playback thread ──▶ PlaybackPipeline ──▶ AudioSink
//!   (async task)             (blocking)          (header, then PCM)
//! ```
//!
//! ## Why a dedicated thread:
//! Sink writes block while the device queue is full, and rodio's output
//! stream must stay on the thread that opened it. The async side only awaits
//! network chunks and the bounded channel; all blocking happens on the
//! playback thread.
//!
//! ## Release guarantees:
//! The sink is stopped exactly once on every exit path: after draining on
//! success, or from `Drop` when the pipeline is abandoned on an error.
//! Only an explicit `End` drains; a dropped `play` future hangs up the
//! channel and the thread stops output immediately.

pub mod device;
pub mod rodio_sink;

pub use device::{list_output_devices, selector_from_config, DeviceSelector};
pub use rodio_sink::RodioSink;

use crate::config::PlaybackConfig;
use crate::relay::TransportFailure;
use crate::upstream::{SpeechRequest, UpstreamClient};
use crate::wav::{HeaderAccumulator, SampleEncoding, WavError};
use bytes::Bytes;
use futures_util::StreamExt;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Chunks allowed in flight between the network task and the playback thread.
const CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error(transparent)]
    Wav(#[from] WavError),

    #[error("{source}; buffered header saved to {path}")]
    HeaderDumped { source: WavError, path: String },

    #[error("stream ended before audio data started ({buffered} bytes buffered)")]
    Incomplete { buffered: usize },

    #[error("audio device error: {0}")]
    Device(String),

    #[error("audio sink error: {0}")]
    Sink(String),

    #[error("upstream returned {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("upstream stream error: {0}")]
    Transport(&'static str),

    #[error("playback aborted")]
    Aborted,

    #[error("playback thread exited unexpectedly")]
    ThreadLost,
}

/// Open-time configuration handed to the sink factory.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkSpec {
    pub sample_rate: u32,
    pub channels: u16,
    pub encoding: SampleEncoding,
    pub device: Option<DeviceSelector>,
}

/// A live audio output accepting raw little-endian sample bytes.
pub trait AudioSink {
    /// Queue bytes for playback. May block while the device catches up.
    fn write(&mut self, bytes: &[u8]) -> Result<(), PlaybackError>;

    /// Block until everything written so far has been played.
    fn finish(&mut self) -> Result<(), PlaybackError>;

    /// Stop output and release the device. Safe to call more than once.
    fn stop(&mut self);
}

/// Summary of a completed playback.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackReport {
    pub sample_rate: u32,
    pub channels: u16,
    pub encoding: SampleEncoding,
    pub header_bytes: usize,
    pub bytes_played: u64,
}

/// Header accumulation followed by direct sink writes.
///
/// `F` opens the sink once the format is known, so tests can substitute a
/// recording sink for the audio device.
pub struct PlaybackPipeline<S: AudioSink, F> {
    accumulator: HeaderAccumulator,
    open_sink: F,
    device: Option<DeviceSelector>,
    dump_path: Option<PathBuf>,
    live: Option<(S, PlaybackReport)>,
}

impl<S, F> PlaybackPipeline<S, F>
where
    S: AudioSink,
    F: FnMut(&SinkSpec) -> Result<S, PlaybackError>,
{
    pub fn new(config: &PlaybackConfig, device: Option<DeviceSelector>, open_sink: F) -> Self {
        let dump_path = Some(config.header_dump_path.trim())
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);

        Self {
            accumulator: HeaderAccumulator::new(config.max_header_bytes),
            open_sink,
            device,
            dump_path,
            live: None,
        }
    }

    pub fn is_live(&self) -> bool {
        self.live.is_some()
    }

    /// Consume one network chunk.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<(), PlaybackError> {
        if let Some((sink, report)) = self.live.as_mut() {
            sink.write(chunk)?;
            report.bytes_played += chunk.len() as u64;
            return Ok(());
        }

        let start = match self.accumulator.feed(chunk) {
            Ok(Some(start)) => start,
            Ok(None) => return Ok(()),
            Err(e @ WavError::HeaderNotFound { .. }) => return Err(self.dump_header(e)),
            Err(e) => return Err(e.into()),
        };

        info!(
            format_code = start.format.audio_format,
            encoding = %start.encoding,
            channels = start.format.channels,
            sample_rate = start.format.sample_rate,
            header_bytes = start.header_bytes,
            "WAV format resolved"
        );

        let spec = SinkSpec {
            sample_rate: start.format.sample_rate,
            channels: start.format.channels,
            encoding: start.encoding,
            device: self.device.clone(),
        };
        let mut sink = (self.open_sink)(&spec)?;
        if !start.payload.is_empty() {
            if let Err(e) = sink.write(&start.payload) {
                sink.stop();
                return Err(e);
            }
        }

        let report = PlaybackReport {
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            encoding: spec.encoding,
            header_bytes: start.data_offset,
            bytes_played: start.payload.len() as u64,
        };
        self.live = Some((sink, report));
        Ok(())
    }

    /// Drain the sink after the last chunk and release it.
    pub fn finish(&mut self) -> Result<PlaybackReport, PlaybackError> {
        let Some((mut sink, report)) = self.live.take() else {
            return Err(PlaybackError::Incomplete {
                buffered: self.accumulator.buffered().len(),
            });
        };

        let result = sink.finish();
        sink.stop();
        result?;

        info!(bytes_played = report.bytes_played, "Playback finished");
        Ok(report)
    }

    /// Release the sink without draining.
    pub fn stop(&mut self) {
        if let Some((mut sink, _)) = self.live.take() {
            sink.stop();
        }
    }

    fn dump_header(&self, source: WavError) -> PlaybackError {
        let Some(path) = &self.dump_path else {
            return source.into();
        };

        match std::fs::write(path, self.accumulator.buffered()) {
            Ok(()) => {
                warn!(path = %path.display(), bytes = self.accumulator.buffered().len(), "Saved unparsed header");
                PlaybackError::HeaderDumped {
                    source,
                    path: path.display().to_string(),
                }
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to save unparsed header");
                source.into()
            }
        }
    }
}

impl<S: AudioSink, F> Drop for PlaybackPipeline<S, F> {
    fn drop(&mut self) {
        if let Some((mut sink, _)) = self.live.take() {
            sink.stop();
        }
    }
}

/// Messages from the network task to the playback thread.
#[derive(Debug)]
pub enum PlaybackCommand {
    Chunk(Bytes),
    /// The upstream body completed; drain and release.
    End,
    /// The upstream stream broke; stop without draining.
    Abort,
}

/// Drive a pipeline from a channel until the sender ends or aborts.
///
/// A sender that hangs up without `End` was cancelled, so the sink is
/// stopped without draining.
pub fn run_pipeline<S, F>(
    mut pipeline: PlaybackPipeline<S, F>,
    mut commands: mpsc::Receiver<PlaybackCommand>,
) -> Result<PlaybackReport, PlaybackError>
where
    S: AudioSink,
    F: FnMut(&SinkSpec) -> Result<S, PlaybackError>,
{
    while let Some(command) = commands.blocking_recv() {
        match command {
            PlaybackCommand::Chunk(bytes) => pipeline.feed(&bytes)?,
            PlaybackCommand::End => return pipeline.finish(),
            PlaybackCommand::Abort => break,
        }
    }
    pipeline.stop();
    Err(PlaybackError::Aborted)
}

/// Start a playback thread and return its command channel and result.
pub fn spawn_playback<S, F>(
    config: &PlaybackConfig,
    device: Option<DeviceSelector>,
    open_sink: F,
) -> (
    mpsc::Sender<PlaybackCommand>,
    oneshot::Receiver<Result<PlaybackReport, PlaybackError>>,
)
where
    S: AudioSink + 'static,
    F: FnMut(&SinkSpec) -> Result<S, PlaybackError> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (done_tx, done_rx) = oneshot::channel();
    let config = config.clone();

    std::thread::spawn(move || {
        let pipeline = PlaybackPipeline::new(&config, device, open_sink);
        let _ = done_tx.send(run_pipeline(pipeline, rx));
    });

    (tx, done_rx)
}

/// Synthesize `text` and play it on the configured output device.
pub async fn play_text(
    client: &UpstreamClient,
    config: &PlaybackConfig,
    device: Option<DeviceSelector>,
    text: &str,
) -> Result<PlaybackReport, PlaybackError> {
    let max_queued_buffers = config.max_queued_buffers;
    play_request(client, config, device, &SpeechRequest::new(text), move |spec| {
        RodioSink::open(spec, max_queued_buffers)
    })
    .await
}

/// Open the upstream stream and feed it through a playback thread.
pub async fn play_request<S, F>(
    client: &UpstreamClient,
    config: &PlaybackConfig,
    device: Option<DeviceSelector>,
    request: &SpeechRequest,
    open_sink: F,
) -> Result<PlaybackReport, PlaybackError>
where
    S: AudioSink + 'static,
    F: FnMut(&SinkSpec) -> Result<S, PlaybackError> + Send + 'static,
{
    let response = client
        .open_stream(request)
        .await
        .map_err(|e| PlaybackError::Transport(e.label()))?;

    let status = response.status();
    info!(
        status = status.as_u16(),
        content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-"),
        "Upstream responded"
    );
    for (name, value) in response.headers() {
        debug!(header = %name, value = ?value, "Upstream response header");
    }

    if !status.is_success() {
        return Err(rejection(status.as_u16(), response.text().await));
    }

    let (commands, done) = spawn_playback(config, device, open_sink);
    let mut body = response.bytes_stream();
    let mut transport_error = None;
    let mut ended = false;

    while let Some(item) = body.next().await {
        match item {
            Ok(chunk) if chunk.is_empty() => continue,
            Ok(chunk) => {
                // The thread only hangs up after failing; its result says why.
                if commands.send(PlaybackCommand::Chunk(chunk)).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(kind = e.label(), error = %e, "Upstream stream failed during playback");
                transport_error = Some(e.label());
                let _ = commands.send(PlaybackCommand::Abort).await;
                break;
            }
        }
    }
    if transport_error.is_none() {
        ended = commands.send(PlaybackCommand::End).await.is_ok();
    }
    drop(commands);
    debug!(ended, "Upstream body closed");

    let result = done.await.map_err(|_| PlaybackError::ThreadLost)?;
    match (transport_error, result) {
        (Some(kind), Err(PlaybackError::Aborted)) => Err(PlaybackError::Transport(kind)),
        (_, result) => result,
    }
}

/// Error for a non-success upstream status, keeping a failed body read visible.
fn rejection<E: TransportFailure>(status: u16, body: Result<String, E>) -> PlaybackError {
    match body {
        Ok(body) => PlaybackError::Rejected { status, body },
        Err(e) => {
            warn!(status, kind = e.label(), error = %e, "Failed to read upstream rejection body");
            PlaybackError::Transport(e.label())
        }
    }
}
