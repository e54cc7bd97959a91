use std::io::Read;
use std::sync::Arc;

use ringbuf::{HeapRb, traits::*};

use crate::audio_data::StreamingResampler;
use crate::source::{AudioCategory, AudioSource, PositioningMode, SampleFormat, SourceState};

/// Consecutive empty non-blocking reads tolerated before the stream is
/// declared stalled. Bounds silence injected during a stall to this many
/// callback periods.
const MAX_EMPTY_READS: u32 = 5;

/// Pending source-rate samples carried across callbacks; comfortably larger
/// than one callback's worth at any supported rate.
const PENDING_CAPACITY: usize = 16_384;

/// Streamed synthesized speech pulled from a non-blocking byte stream.
///
/// The host hands over an owned reader (a duplicated descriptor, so closing
/// it is independent of the host's copy) whose raw PCM format is declared at
/// creation but may be corrected once the speech engine reports the real one;
/// [`SourceState::can_start`] stays false until that update lands. Reads are
/// non-blocking only. A zero-byte result on the very first read is an
/// immediate end-of-stream; [`MAX_EMPTY_READS`] consecutive empty reads is a
/// stall end-of-stream. Both latch `finished`.
pub struct SpeechSource {
    state: Arc<SourceState>,
    positioning: PositioningMode,
    reader: Box<dyn Read + Send>,
    resampler: StreamingResampler,
    /// Source-rate mono samples decoded but not yet resampled.
    pending: HeapRb<f32>,
    /// Trailing bytes of an incomplete frame from the previous read.
    byte_remainder: Vec<u8>,
    read_buf: Vec<u8>,
    src_scratch: Vec<f32>,
    first_read_done: bool,
    empty_reads: u32,
}

impl SpeechSource {
    pub fn new(
        reader: Box<dyn Read + Send>,
        positioning: PositioningMode,
        device_sample_rate: u32,
        declared_rate: u32,
        declared_format: SampleFormat,
        declared_channels: u32,
    ) -> Self {
        let state = SourceState::new();
        state.set_device_sample_rate(device_sample_rate);
        state.declare_speech_format(declared_rate, declared_format, declared_channels);
        state.set_can_start(false);

        Self {
            state,
            positioning,
            reader,
            resampler: StreamingResampler::new(),
            pending: HeapRb::new(PENDING_CAPACITY),
            byte_remainder: Vec::new(),
            read_buf: vec![0u8; 4096],
            src_scratch: Vec::new(),
            first_read_done: false,
            empty_reads: 0,
        }
    }

    /// Convert the raw interleaved PCM accumulated in `byte_remainder` to
    /// f32 mono by channel averaging and push the frames into the pending
    /// buffer. Incomplete trailing frames stay behind for the next read. No
    /// allocation on the steady-state path.
    fn decode_remainder(&mut self, format: SampleFormat, channels: usize) {
        let frame_bytes = format.bytes_per_sample() * channels;
        let complete = self.byte_remainder.len() / frame_bytes * frame_bytes;

        for frame in self.byte_remainder[..complete].chunks_exact(frame_bytes) {
            let mut sum = 0.0f32;
            for sample in frame.chunks_exact(format.bytes_per_sample()) {
                sum += match format {
                    SampleFormat::U8 => (sample[0] as f32 - 128.0) / 128.0,
                    SampleFormat::I16 => {
                        i16::from_le_bytes([sample[0], sample[1]]) as f32 / 32768.0
                    }
                    SampleFormat::F32 => {
                        f32::from_le_bytes([sample[0], sample[1], sample[2], sample[3]])
                    }
                };
            }
            self.pending.try_push(sum / channels as f32).ok();
        }

        self.byte_remainder.drain(..complete);
    }

    /// Pull bytes until `needed_src` source frames are pending, data runs
    /// out for this period, or the stream ends.
    fn fill_pending(&mut self, needed_src: usize, format: SampleFormat, channels: usize) {
        let frame_bytes = format.bytes_per_sample() * channels;

        while self.pending.occupied_len() < needed_src && !self.state.is_finished() {
            let missing = needed_src - self.pending.occupied_len();
            let want = (missing * frame_bytes).min(self.read_buf.len());

            match self.reader.read(&mut self.read_buf[..want]) {
                Ok(0) => {
                    if self.first_read_done {
                        log::debug!("speech stream closed");
                    } else {
                        log::debug!("speech stream empty on first read");
                    }
                    self.state.set_finished();
                }
                Ok(n) => {
                    self.first_read_done = true;
                    self.empty_reads = 0;
                    self.byte_remainder.extend_from_slice(&self.read_buf[..n]);
                    self.decode_remainder(format, channels);
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    self.empty_reads += 1;
                    if self.empty_reads > MAX_EMPTY_READS {
                        log::debug!("speech stream stalled, ending");
                        self.state.set_finished();
                    }
                    break;
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::warn!("speech stream read failed: {e}");
                    self.state.set_finished();
                }
            }
        }
    }
}

impl AudioSource for SpeechSource {
    fn read_pcm(&mut self, out: &mut [f32]) -> usize {
        if self.is_finished() && self.pending.is_empty() {
            out.fill(0.0);
            return 0;
        }

        let (src_rate, format, channels) = self.state.speech_format();
        let device_rate = self.state.device_sample_rate().max(1);
        self.resampler.set_rates(src_rate.max(1), device_rate);

        let needed_src = self.resampler.input_frames_needed(out.len());
        self.fill_pending(needed_src, format, channels);

        self.src_scratch.resize(needed_src, 0.0);
        let available = self.pending.pop_slice(&mut self.src_scratch[..]);

        let (written, consumed) = self.resampler.process(&self.src_scratch[..available], out);
        // The ring is empty here, so pushing the unconsumed tail back keeps
        // sample order.
        if consumed < available {
            self.pending.push_slice(&self.src_scratch[consumed..available]);
        }

        out[written..].fill(0.0);
        written
    }

    fn state(&self) -> &Arc<SourceState> {
        &self.state
    }

    fn category(&self) -> AudioCategory {
        AudioCategory::Speech
    }

    fn needs_spatialize(&self) -> bool {
        self.positioning.needs_spatialize()
    }
}
