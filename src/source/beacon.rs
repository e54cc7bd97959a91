use std::sync::Arc;

use crate::audio_data::{AssetLoader, AudioClip, StreamingResampler};
use crate::catalog::{BeaconDescriptor, INTRO_ASSET, OUTRO_ASSET, PROXIMITY_DESCRIPTOR};
use crate::source::{AudioCategory, AudioSource, PositioningMode, SourceMode, SourceState};

/// Play-state of a beacon. `Intro` and `Outro` are single-play clips that pad
/// with silence at the end; `Beacon` loops the currently selected clip.
/// `Complete` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlayState {
    Intro,
    Beacon,
    Outro,
    Complete,
}

/// A looping directional beacon.
///
/// All clips of the style are decoded up front at the device rate; every
/// callback picks one by the off-axis angle (or proximity bucket) published
/// in the shared [`SourceState`] and reads it with a wrapping frame position,
/// so the beat phase survives clip switches. A clip that failed to decode
/// renders silence with a full frame count.
pub struct BeaconSource {
    state: Arc<SourceState>,
    positioning: PositioningMode,
    descriptor: BeaconDescriptor,
    clips: Vec<Arc<AudioClip>>,
    intro: Arc<AudioClip>,
    outro: Arc<AudioClip>,
    play_state: PlayState,
    /// Frame position in source-rate samples, wrapped in `Beacon` state.
    position: usize,
    resampler: StreamingResampler,
    scratch: Vec<f32>,
}

impl BeaconSource {
    /// A directional beacon of the given style, with the route intro/outro
    /// clips.
    pub fn new(
        descriptor: &BeaconDescriptor,
        loader: &dyn AssetLoader,
        device_sample_rate: u32,
        positioning: PositioningMode,
    ) -> Self {
        let clips = descriptor
            .assets
            .iter()
            .map(|asset| loader.load_or_silent(asset.filename, device_sample_rate))
            .collect();
        let intro = loader.load_or_silent(INTRO_ASSET, device_sample_rate);
        let outro = loader.load_or_silent(OUTRO_ASSET, device_sample_rate);

        let state = SourceState::new();
        state.set_device_sample_rate(device_sample_rate);

        log::info!(
            "beacon created (style \"{}\", {} clips)",
            descriptor.name,
            descriptor.assets.len()
        );

        Self {
            state,
            positioning,
            descriptor: descriptor.clone(),
            clips,
            intro,
            outro,
            play_state: PlayState::Intro,
            position: 0,
            resampler: StreamingResampler::new(),
            scratch: Vec::new(),
        }
    }

    /// A distance beacon using the reserved near/far style. No intro or
    /// outro; it starts looping immediately.
    pub fn new_proximity(
        loader: &dyn AssetLoader,
        device_sample_rate: u32,
        positioning: PositioningMode,
    ) -> Self {
        let mut source = Self::new(&PROXIMITY_DESCRIPTOR, loader, device_sample_rate, positioning);
        source.play_state = PlayState::Beacon;
        source
    }

    /// The clip the current mode selects, or `None` when out of range.
    fn selected_clip(&self) -> Option<Arc<AudioClip>> {
        match self.state.mode() {
            SourceMode::Direction => {
                let idx = self.descriptor.select_clip(self.state.off_axis_degrees());
                self.clips.get(idx).cloned()
            }
            SourceMode::Near => self.clips.first().cloned(),
            SourceMode::Far => self.clips.get(1).cloned(),
            SourceMode::TooFar => None,
        }
    }

    fn enter(&mut self, next: PlayState) {
        self.play_state = next;
        self.position = 0;
        self.resampler.reset();
        if next == PlayState::Complete {
            self.state.set_finished();
            log::debug!("beacon complete");
        }
    }

    /// Resample one block of `clip` into `out`, reading source frames at
    /// `self.position` (wrapping when `looping`). Returns frames written and
    /// whether a non-looping clip ran past its end.
    fn read_clip(&mut self, clip: &AudioClip, out: &mut [f32], looping: bool) -> (usize, bool) {
        let len = clip.num_frames();
        if len == 0 {
            out.fill(0.0);
            return (out.len(), !looping);
        }

        let device_rate = self.state.device_sample_rate().max(1);
        self.resampler.set_rates(clip.sample_rate(), device_rate);

        let needed = self.resampler.input_frames_needed(out.len());
        self.scratch.resize(needed, 0.0);
        let samples = clip.samples();
        if looping {
            for (i, slot) in self.scratch.iter_mut().enumerate() {
                *slot = samples[(self.position + i) % len];
            }
        } else {
            let available = len.saturating_sub(self.position).min(needed);
            self.scratch[..available]
                .copy_from_slice(&samples[self.position..self.position + available]);
            self.scratch[available..].fill(0.0);
        }

        let (written, consumed) = self.resampler.process(&self.scratch, out);
        out[written..].fill(0.0);

        if looping {
            self.position = (self.position + consumed) % len;
            (out.len(), false)
        } else {
            self.position += consumed;
            (out.len(), self.position >= len)
        }
    }
}

impl AudioSource for BeaconSource {
    fn read_pcm(&mut self, out: &mut [f32]) -> usize {
        if self.state.outro_requested()
            && matches!(self.play_state, PlayState::Intro | PlayState::Beacon)
        {
            self.enter(PlayState::Outro);
        }

        match self.play_state {
            PlayState::Intro => {
                let clip = self.intro.clone();
                let (written, ended) = self.read_clip(&clip, out, false);
                if ended {
                    self.enter(PlayState::Beacon);
                }
                written
            }
            PlayState::Beacon => match self.selected_clip() {
                Some(clip) => self.read_clip(&clip, out, true).0,
                None => {
                    // Out of range; hold position so the beat resumes in phase.
                    out.fill(0.0);
                    out.len()
                }
            },
            PlayState::Outro => {
                let clip = self.outro.clone();
                let (written, ended) = self.read_clip(&clip, out, false);
                if ended {
                    self.enter(PlayState::Complete);
                }
                written
            }
            PlayState::Complete => {
                out.fill(0.0);
                0
            }
        }
    }

    fn state(&self) -> &Arc<SourceState> {
        &self.state
    }

    fn category(&self) -> AudioCategory {
        AudioCategory::Beacon
    }

    fn needs_spatialize(&self) -> bool {
        self.positioning.needs_spatialize()
    }

    fn is_audible(&self) -> bool {
        !self.is_finished()
            && !self.state.is_muted()
            && self.state.mode() != SourceMode::TooFar
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_data::AssetLoader;
    use crate::catalog::BEACON_DESCRIPTORS;
    use crate::error::Result;

    const RATE: u32 = 48_000;

    /// Loader producing short recognizable clips: intro all 0.25, outro all
    /// 0.5, style clips a constant equal to their catalog position.
    struct StubLoader;

    impl AssetLoader for StubLoader {
        fn load(&self, path: &str, target_sample_rate: u32) -> Result<Arc<AudioClip>> {
            let value = if path == INTRO_ASSET {
                0.25
            } else if path == OUTRO_ASSET {
                0.5
            } else if path.contains("Close") || path.contains("A+") || path.contains("OnAxis") {
                0.0
            } else if path.contains("Behind") {
                0.75
            } else {
                0.1
            };
            Ok(Arc::new(AudioClip::new(
                vec![value; 64],
                target_sample_rate,
            )))
        }
    }

    /// Loader that fails every request, exercising the silence path.
    struct FailingLoader;

    impl AssetLoader for FailingLoader {
        fn load(&self, path: &str, _target_sample_rate: u32) -> Result<Arc<AudioClip>> {
            Err(crate::error::WaybeaconError::AudioLoading(format!(
                "no such asset: {path}"
            )))
        }
    }

    fn current_style() -> &'static BeaconDescriptor {
        &BEACON_DESCRIPTORS[1]
    }

    #[test]
    fn intro_plays_once_then_loops_beacon() {
        let mut beacon = BeaconSource::new(
            current_style(),
            &StubLoader,
            RATE,
            PositioningMode::localized(0.0, 0.0),
        );
        let mut out = vec![0.0f32; 64];

        // First block drains the 64-frame intro.
        let n = beacon.read_pcm(&mut out);
        assert_eq!(n, 64);
        assert!(out.iter().all(|&s| (s - 0.25).abs() < 1e-6));

        // Next blocks loop the on-axis clip forever.
        for _ in 0..4 {
            let n = beacon.read_pcm(&mut out);
            assert_eq!(n, 64);
            assert!(out.iter().all(|&s| s.abs() < 1e-6));
        }
        assert!(!beacon.is_finished());
    }

    #[test]
    fn off_axis_angle_switches_clip() {
        let mut beacon = BeaconSource::new(
            current_style(),
            &StubLoader,
            RATE,
            PositioningMode::localized(0.0, 0.0),
        );
        let mut out = vec![0.0f32; 64];
        beacon.read_pcm(&mut out); // intro

        beacon.state().set_off_axis_degrees(170.0);
        beacon.read_pcm(&mut out);
        assert!(out.iter().all(|&s| (s - 0.75).abs() < 1e-6), "behind clip");
    }

    #[test]
    fn outro_request_winds_down_and_finishes() {
        let mut beacon = BeaconSource::new(
            current_style(),
            &StubLoader,
            RATE,
            PositioningMode::localized(0.0, 0.0),
        );
        let mut out = vec![0.0f32; 64];
        beacon.read_pcm(&mut out); // intro
        beacon.read_pcm(&mut out); // beacon loop

        beacon.state().request_outro();
        let n = beacon.read_pcm(&mut out);
        assert_eq!(n, 64);
        assert!(out.iter().all(|&s| (s - 0.5).abs() < 1e-6), "outro clip");

        // Outro ran its length; the next read is terminal.
        assert!(beacon.is_finished());
        assert_eq!(beacon.read_pcm(&mut out), 0);
    }

    #[test]
    fn proximity_modes_pick_near_far_silence() {
        let mut beacon = BeaconSource::new_proximity(
            &StubLoader,
            RATE,
            PositioningMode::localized(0.0, 0.0).with_proximity(),
        );
        let mut out = vec![0.0f32; 64];

        beacon.state().set_mode(SourceMode::Near);
        beacon.read_pcm(&mut out);
        assert!(out.iter().all(|&s| s.abs() < 1e-6), "near clip");

        beacon.state().set_mode(SourceMode::Far);
        beacon.read_pcm(&mut out);
        assert!(out.iter().all(|&s| (s - 0.1).abs() < 1e-6), "far clip");

        beacon.state().set_mode(SourceMode::TooFar);
        assert!(!beacon.is_audible());
        let n = beacon.read_pcm(&mut out);
        assert_eq!(n, 64);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn failed_decode_renders_silence_full_count() {
        let mut beacon = BeaconSource::new(
            current_style(),
            &FailingLoader,
            RATE,
            PositioningMode::localized(0.0, 0.0),
        );
        let mut out = vec![1.0f32; 64];
        // Empty intro falls through to the (empty) beacon clip.
        let n = beacon.read_pcm(&mut out);
        assert_eq!(n, 64);
        let n = beacon.read_pcm(&mut out);
        assert_eq!(n, 64);
        assert!(out.iter().all(|&s| s == 0.0));
        assert!(!beacon.is_finished());
    }

    #[test]
    fn loop_position_wraps_with_resampling() {
        // Clip rate differs from device rate; the loop must still wrap
        // without running off the end.
        struct SlowLoader;
        impl AssetLoader for SlowLoader {
            fn load(&self, _path: &str, _rate: u32) -> Result<Arc<AudioClip>> {
                Ok(Arc::new(AudioClip::new(vec![0.3; 100], 24_000)))
            }
        }

        let mut beacon = BeaconSource::new(
            current_style(),
            &SlowLoader,
            RATE,
            PositioningMode::localized(0.0, 0.0),
        );
        let mut out = vec![0.0f32; 256];
        beacon.read_pcm(&mut out); // intro (plays through, then pads)
        for _ in 0..10 {
            let n = beacon.read_pcm(&mut out);
            assert_eq!(n, 256);
            assert!(out.iter().all(|&s| (s - 0.3).abs() < 1e-4));
        }
    }
}
