//! [`AudioSink`] backed by a rodio output stream.

use super::device::find_output_device;
use super::{AudioSink, PlaybackError, SinkSpec};
use crate::wav::SampleEncoding;
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamBuilder, Sink};
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

const QUEUE_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Decodes raw PCM bytes into f32 samples on whole-frame boundaries.
///
/// Bytes belonging to an incomplete frame are held until the next push.
#[derive(Debug)]
pub struct FrameAssembler {
    encoding: SampleEncoding,
    frame_bytes: usize,
    pending: Vec<u8>,
}

impl FrameAssembler {
    pub fn new(encoding: SampleEncoding, channels: u16) -> Self {
        Self {
            encoding,
            frame_bytes: encoding.bytes_per_sample() * channels.max(1) as usize,
            pending: Vec::new(),
        }
    }

    /// Returns the samples of every frame completed by `bytes`, or `None`
    /// when no frame was completed.
    pub fn push(&mut self, bytes: &[u8]) -> Option<Vec<f32>> {
        self.pending.extend_from_slice(bytes);
        let usable = self.pending.len() - self.pending.len() % self.frame_bytes;
        if usable == 0 {
            return None;
        }

        let mut samples = Vec::new();
        self.encoding.decode_into(&self.pending[..usable], &mut samples);
        self.pending.drain(..usable);
        Some(samples)
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

pub struct RodioSink {
    // Dropping the stream silences the sink, so it lives as long as the sink.
    _stream: OutputStream,
    sink: Sink,
    assembler: FrameAssembler,
    channels: u16,
    sample_rate: u32,
    max_queued_buffers: usize,
    stopped: bool,
}

impl RodioSink {
    /// Open the selected (or default) output device for `spec`.
    pub fn open(spec: &SinkSpec, max_queued_buffers: usize) -> Result<Self, PlaybackError> {
        let stream = match &spec.device {
            None => OutputStreamBuilder::open_default_stream(),
            Some(selector) => {
                let device = find_output_device(selector)?;
                OutputStreamBuilder::from_device(device).and_then(|builder| builder.open_stream())
            }
        }
        .map_err(|e| PlaybackError::Device(format!("Failed to open audio output: {}", e)))?;

        let sink = Sink::connect_new(stream.mixer());

        info!(
            sample_rate = spec.sample_rate,
            channels = spec.channels,
            encoding = %spec.encoding,
            "Audio output opened"
        );

        Ok(Self {
            _stream: stream,
            sink,
            assembler: FrameAssembler::new(spec.encoding, spec.channels),
            channels: spec.channels,
            sample_rate: spec.sample_rate,
            max_queued_buffers: max_queued_buffers.max(1),
            stopped: false,
        })
    }

    fn wait_for_room(&self) {
        while !self.stopped && self.sink.len() > self.max_queued_buffers {
            thread::sleep(QUEUE_POLL_INTERVAL);
        }
    }
}

impl AudioSink for RodioSink {
    fn write(&mut self, bytes: &[u8]) -> Result<(), PlaybackError> {
        if self.stopped {
            return Err(PlaybackError::Sink("write after stop".to_string()));
        }
        if let Some(samples) = self.assembler.push(bytes) {
            self.wait_for_room();
            self.sink
                .append(SamplesBuffer::new(self.channels, self.sample_rate, samples));
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), PlaybackError> {
        if self.stopped {
            return Ok(());
        }
        if self.assembler.pending() > 0 {
            debug!(bytes = self.assembler.pending(), "Discarding incomplete trailing frame");
        }
        self.sink.sleep_until_end();
        Ok(())
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.sink.stop();
            self.stopped = true;
        }
    }
}
