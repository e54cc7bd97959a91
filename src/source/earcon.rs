use std::sync::Arc;

use crate::audio_data::{AudioClip, StreamingResampler};
use crate::source::{AudioCategory, AudioSource, PositioningMode, SourceState};

/// A one-shot sound effect: sequential read of a decoded clip, finished once
/// the frame position reaches the clip length. An empty (failed-decode) clip
/// finishes on the first read.
pub struct EarconSource {
    state: Arc<SourceState>,
    positioning: PositioningMode,
    clip: Arc<AudioClip>,
    position: usize,
    resampler: StreamingResampler,
    scratch: Vec<f32>,
}

impl EarconSource {
    pub fn new(
        clip: Arc<AudioClip>,
        device_sample_rate: u32,
        positioning: PositioningMode,
    ) -> Self {
        let state = SourceState::new();
        state.set_device_sample_rate(device_sample_rate);
        Self {
            state,
            positioning,
            clip,
            position: 0,
            resampler: StreamingResampler::new(),
            scratch: Vec::new(),
        }
    }
}

impl AudioSource for EarconSource {
    fn read_pcm(&mut self, out: &mut [f32]) -> usize {
        if self.is_finished() {
            out.fill(0.0);
            return 0;
        }

        let len = self.clip.num_frames();
        if self.position >= len {
            self.state.set_finished();
            out.fill(0.0);
            return 0;
        }

        let device_rate = self.state.device_sample_rate().max(1);
        self.resampler.set_rates(self.clip.sample_rate(), device_rate);

        let needed = self.resampler.input_frames_needed(out.len());
        self.scratch.resize(needed, 0.0);
        let available = len.saturating_sub(self.position).min(needed);
        self.scratch[..available]
            .copy_from_slice(&self.clip.samples()[self.position..self.position + available]);
        self.scratch[available..].fill(0.0);

        let (written, consumed) = self.resampler.process(&self.scratch, out);
        out[written..].fill(0.0);
        self.position += consumed;
        if self.position >= len {
            self.state.set_finished();
        }

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
