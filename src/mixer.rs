//! The render-callback mixer and output-device lifecycle.
//!
//! The mixer owns the registered-source list and the cpal output stream.
//! Once per callback it pulls mono PCM from every audible source, applies
//! category gains with beacon/speech ducking, spatializes (HRTF when
//! available, constant-power pan otherwise), sums and clamps. The callback
//! takes the source-list mutex blocking; the only contenders are brief
//! control-thread add/remove operations, and ducking stays glitch-free. The
//! try-lock variant (substituting silence for the whole period on
//! contention) trades an occasional audible dropout for never waiting, and
//! was rejected here.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SizedSample};
use crossbeam_channel::{Receiver, Sender};

use crate::error::{Result, WaybeaconError};
use crate::source::{AtomicF32, AudioCategory, AudioSource, SoundId, SourceState};
use crate::spatial::{EffectId, SpatialRenderer, pan_spatialize, rear_attenuation};

/// Frames per render block. The spatializer is sized to this; callbacks of
/// any other length fall back to panning.
pub const FRAME_SIZE: usize = 1024;

const OUTPUT_CHANNELS: u16 = 2;

/// Beacon gain factor when a speech source is concurrently registered.
const DUCK_BEACON: f32 = 0.25;
/// Speech gain factor when a beacon is concurrently registered.
const BOOST_SPEECH: f32 = 0.75;

/// Asynchronous notifications leaving the audio callback.
enum DeviceEvent {
    Disconnected,
}

struct MixerSource {
    id: SoundId,
    source: Box<dyn AudioSource>,
    state: Arc<SourceState>,
    effect: Option<EffectId>,
}

/// Everything the render callback touches, behind one mutex.
pub(crate) struct MixerShared {
    sources: Vec<MixerSource>,
    spatializer: Option<SpatialRenderer>,
    mono_scratch: Vec<f32>,
    stereo_scratch: Vec<f32>,
}

impl MixerShared {
    fn new() -> Self {
        Self {
            sources: Vec::new(),
            spatializer: None,
            mono_scratch: Vec::new(),
            stereo_scratch: Vec::new(),
        }
    }
}

/// Mix one interleaved stereo block from the registered sources.
fn mix_block(
    shared: &mut MixerShared,
    out: &mut [f32],
    beacon_base: f32,
    speech_base: f32,
    use_hrtf: bool,
) {
    out.fill(0.0);
    let frames = out.len() / OUTPUT_CHANNELS as usize;
    if frames == 0 {
        return;
    }

    let beacon_present = shared
        .sources
        .iter()
        .any(|s| !s.source.is_finished() && s.source.category() == AudioCategory::Beacon);
    let speech_present = shared
        .sources
        .iter()
        .any(|s| !s.source.is_finished() && s.source.category() == AudioCategory::Speech);

    let (beacon_gain, speech_gain) = if beacon_present && speech_present {
        (beacon_base * DUCK_BEACON, speech_base * BOOST_SPEECH)
    } else {
        (beacon_base, speech_base)
    };

    shared.mono_scratch.resize(frames, 0.0);
    shared.stereo_scratch.resize(frames * 2, 0.0);

    // Split so a source pull and the spatializer can be borrowed together.
    let MixerShared {
        sources,
        spatializer,
        mono_scratch,
        stereo_scratch,
    } = shared;

    for entry in sources.iter_mut() {
        if !entry.source.is_audible() {
            continue;
        }

        // Pull before looking at the gain: a fully ducked source must keep
        // consuming its stream so EOF and stall detection still latch and
        // the serialized queue drains during a focus loss.
        mono_scratch.fill(0.0);
        let produced = entry.source.read_pcm(mono_scratch);
        if produced == 0 && entry.source.is_finished() {
            continue;
        }

        let gain = match entry.source.category() {
            AudioCategory::Beacon => beacon_gain,
            AudioCategory::Speech => speech_gain,
        };
        if gain <= 0.0 {
            continue;
        }

        if entry.source.needs_spatialize() {
            let azimuth = entry.state.azimuth();
            let elevation = entry.state.elevation();

            let mut rendered = false;
            if use_hrtf {
                if let (Some(sp), Some(effect)) = (spatializer.as_mut(), entry.effect) {
                    // The HRTF is sized to FRAME_SIZE; odd-length callbacks
                    // fall through to panning.
                    if sp.frame_size() == frames {
                        sp.spatialize(effect, mono_scratch, stereo_scratch, azimuth, elevation);
                        let g = gain * rear_attenuation(azimuth);
                        for (o, &s) in out.iter_mut().zip(stereo_scratch.iter()) {
                            *o += s * g;
                        }
                        rendered = true;
                    }
                }
            }
            if !rendered {
                // Pan fallback carries its own rear attenuation.
                pan_spatialize(mono_scratch, stereo_scratch, azimuth);
                for (o, &s) in out.iter_mut().zip(stereo_scratch.iter()) {
                    *o += s * gain;
                }
            }
        } else {
            for (frame, &s) in mono_scratch.iter().enumerate() {
                out[frame * 2] += s * gain;
                out[frame * 2 + 1] += s * gain;
            }
        }
    }

    for sample in out.iter_mut() {
        *sample = sample.clamp(-1.0, 1.0);
    }
}

/// Owns the output stream, the registered-source list and the spatializer.
pub struct AudioMixer {
    shared: Arc<Mutex<MixerShared>>,
    stream: Option<cpal::Stream>,
    running: Arc<AtomicBool>,
    sample_rate: Arc<AtomicU32>,
    beacon_volume: Arc<AtomicF32>,
    speech_volume: Arc<AtomicF32>,
    use_hrtf: Arc<AtomicBool>,
    event_tx: Sender<DeviceEvent>,
    event_rx: Receiver<DeviceEvent>,
}

impl AudioMixer {
    /// Does not touch the audio device; call [`start`](Self::start) for that.
    pub fn new() -> Self {
        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        Self {
            shared: Arc::new(Mutex::new(MixerShared::new())),
            stream: None,
            running: Arc::new(AtomicBool::new(false)),
            sample_rate: Arc::new(AtomicU32::new(48_000)),
            beacon_volume: Arc::new(AtomicF32::new(1.0)),
            speech_volume: Arc::new(AtomicF32::new(1.0)),
            use_hrtf: Arc::new(AtomicBool::new(true)),
            event_tx,
            event_rx,
        }
    }

    /// Device sample rate sources should be created at. Before the first
    /// `start` this is a default the stream may later correct.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn set_beacon_volume(&self, volume: f32) {
        self.beacon_volume.store(volume.clamp(0.0, 1.0));
    }

    pub fn beacon_volume(&self) -> f32 {
        self.beacon_volume.load()
    }

    pub fn set_speech_volume(&self, volume: f32) {
        self.speech_volume.store(volume.clamp(0.0, 1.0));
    }

    pub fn speech_volume(&self) -> f32 {
        self.speech_volume.load()
    }

    /// Select between binaural rendering and the stereo-pan fallback.
    pub fn set_use_hrtf(&self, use_hrtf: bool) {
        self.use_hrtf.store(use_hrtf, Ordering::Relaxed);
    }

    /// Register a source for pulling. Creates its binaural effect when the
    /// spatializer is up.
    pub fn add_source(&self, id: SoundId, source: Box<dyn AudioSource>) {
        let state = source.state().clone();
        state.set_device_sample_rate(self.sample_rate());

        let mut shared = match self.shared.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let effect = if source.needs_spatialize() {
            shared
                .spatializer
                .as_mut()
                .and_then(|sp| sp.create_source_effect().ok())
        } else {
            None
        };
        shared.sources.push(MixerSource {
            id,
            source,
            state,
            effect,
        });
        log::debug!("mixer registered source {id}");
    }

    /// Unregister a source; the render thread can no longer observe it once
    /// this returns.
    pub fn remove_source(&self, id: SoundId) {
        let mut shared = match self.shared.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(idx) = shared.sources.iter().position(|s| s.id == id) {
            let entry = shared.sources.swap_remove(idx);
            if let Some(effect) = entry.effect {
                if let Some(sp) = shared.spatializer.as_mut() {
                    sp.remove_source_effect(effect);
                }
            }
            log::debug!("mixer unregistered source {id}");
        }
    }

    pub fn source_count(&self) -> usize {
        match self.shared.lock() {
            Ok(guard) => guard.sources.len(),
            Err(poisoned) => poisoned.into_inner().sources.len(),
        }
    }

    /// Open the default output device, build the spatializer at the
    /// negotiated rate, and begin rendering.
    pub fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host.default_output_device().ok_or_else(|| {
            WaybeaconError::AudioDevice("No default output device available".into())
        })?;

        let default_config = device.default_output_config().map_err(|e| {
            WaybeaconError::AudioDevice(format!("Failed to get default config: {e}"))
        })?;
        let rate = default_config.sample_rate().0;

        let config = cpal::StreamConfig {
            channels: OUTPUT_CHANNELS,
            sample_rate: cpal::SampleRate(rate),
            buffer_size: cpal::BufferSize::Fixed(FRAME_SIZE as u32),
        };

        self.sample_rate.store(rate, Ordering::Relaxed);

        {
            let mut shared = match self.shared.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };

            // Degrade to panning when Steam Audio cannot come up.
            shared.spatializer = match SpatialRenderer::new(rate, FRAME_SIZE) {
                Ok(sp) => Some(sp),
                Err(e) => {
                    log::warn!("spatializer unavailable, using pan fallback: {e}");
                    None
                }
            };

            // Sources registered before start (or surviving a restart) get
            // the new rate and fresh effects.
            let MixerShared {
                sources,
                spatializer,
                ..
            } = &mut *shared;
            for entry in sources.iter_mut() {
                entry.state.set_device_sample_rate(rate);
                entry.effect = if entry.source.needs_spatialize() {
                    spatializer
                        .as_mut()
                        .and_then(|sp| sp.create_source_effect().ok())
                } else {
                    None
                };
            }
        }

        let stream = match default_config.sample_format() {
            cpal::SampleFormat::F32 => self.create_stream::<f32>(&device, &config)?,
            cpal::SampleFormat::I16 => self.create_stream::<i16>(&device, &config)?,
            cpal::SampleFormat::U16 => self.create_stream::<u16>(&device, &config)?,
            _ => {
                return Err(WaybeaconError::AudioFormat(
                    "Unsupported sample format".into(),
                ));
            }
        };

        stream
            .play()
            .map_err(|e| WaybeaconError::AudioDevice(format!("Failed to start stream: {e}")))?;

        self.stream = Some(stream);
        self.running.store(true, Ordering::Relaxed);
        log::info!("mixer started ({rate} Hz, block {FRAME_SIZE})");
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            self.running.store(false, Ordering::Relaxed);
            drop(stream);
            log::info!("mixer stopped");
        }
    }

    /// Process device notifications from the render side. On disconnect the
    /// stream is reopened, possibly at a different rate, transparently to
    /// the registered sources; if reopening fails the mixer stays stopped
    /// until `start` is called again.
    pub fn handle_device_events(&mut self) {
        let mut disconnected = false;
        while let Ok(event) = self.event_rx.try_recv() {
            match event {
                DeviceEvent::Disconnected => disconnected = true,
            }
        }
        if !disconnected {
            return;
        }

        log::warn!("output device lost, attempting restart");
        self.stop();
        if let Err(e) = self.start() {
            log::error!("device restart failed: {e}");
        }
    }

    fn create_stream<T>(
        &self,
        device: &cpal::Device,
        config: &cpal::StreamConfig,
    ) -> Result<cpal::Stream>
    where
        T: SizedSample + FromSample<f32>,
    {
        let shared = self.shared.clone();
        let running = self.running.clone();
        let beacon_volume = self.beacon_volume.clone();
        let speech_volume = self.speech_volume.clone();
        let use_hrtf = self.use_hrtf.clone();
        let event_tx = self.event_tx.clone();

        let stream = device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    if !running.load(Ordering::Relaxed) {
                        for sample in data.iter_mut() {
                            *sample = T::from_sample(0.0f32);
                        }
                        return;
                    }

                    let mut buffer = vec![0.0f32; data.len()];
                    {
                        let mut guard = match shared.lock() {
                            Ok(guard) => guard,
                            Err(poisoned) => poisoned.into_inner(),
                        };
                        mix_block(
                            &mut guard,
                            &mut buffer,
                            beacon_volume.load(),
                            speech_volume.load(),
                            use_hrtf.load(Ordering::Relaxed),
                        );
                    }

                    for (out, &sample) in data.iter_mut().zip(buffer.iter()) {
                        *out = T::from_sample(sample);
                    }
                },
                move |err| {
                    log::error!("audio stream error: {err}");
                    if matches!(err, cpal::StreamError::DeviceNotAvailable) {
                        let _ = event_tx.try_send(DeviceEvent::Disconnected);
                    }
                },
                None,
            )
            .map_err(|e| WaybeaconError::AudioDevice(format!("Failed to build stream: {e}")))?;

        Ok(stream)
    }
}

impl Default for AudioMixer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AudioMixer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::PositioningMode;

    /// Constant-valued source for inspecting gains.
    struct ConstSource {
        state: Arc<SourceState>,
        value: f32,
        category: AudioCategory,
        positioning: PositioningMode,
    }

    impl ConstSource {
        fn new(value: f32, category: AudioCategory, positioning: PositioningMode) -> Self {
            let state = SourceState::new();
            state.set_device_sample_rate(48_000);
            Self {
                state,
                value,
                category,
                positioning,
            }
        }
    }

    impl AudioSource for ConstSource {
        fn read_pcm(&mut self, out: &mut [f32]) -> usize {
            out.fill(self.value);
            out.len()
        }

        fn state(&self) -> &Arc<SourceState> {
            &self.state
        }

        fn category(&self) -> AudioCategory {
            self.category
        }

        fn needs_spatialize(&self) -> bool {
            self.positioning.needs_spatialize()
        }
    }

    fn shared_with(sources: Vec<Box<dyn AudioSource>>) -> MixerShared {
        let mut shared = MixerShared::new();
        for (i, source) in sources.into_iter().enumerate() {
            let state = source.state().clone();
            shared.sources.push(MixerSource {
                id: SoundId(i as u64 + 1),
                source,
                state,
                effect: None,
            });
        }
        shared
    }

    #[test]
    fn single_source_plays_at_base_volume() {
        let mut shared = shared_with(vec![Box::new(ConstSource::new(
            0.5,
            AudioCategory::Beacon,
            PositioningMode::standard(),
        ))]);
        let mut out = vec![0.0f32; 32];
        mix_block(&mut shared, &mut out, 1.0, 1.0, false);
        assert!(out.iter().all(|&s| (s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn concurrent_beacon_and_speech_are_ducked() {
        let mut shared = shared_with(vec![
            Box::new(ConstSource::new(
                0.4,
                AudioCategory::Beacon,
                PositioningMode::standard(),
            )),
            Box::new(ConstSource::new(
                0.4,
                AudioCategory::Speech,
                PositioningMode::standard(),
            )),
        ]);
        let mut out = vec![0.0f32; 32];
        mix_block(&mut shared, &mut out, 1.0, 1.0, false);
        let expected = 0.4 * DUCK_BEACON + 0.4 * BOOST_SPEECH;
        assert!(out.iter().all(|&s| (s - expected).abs() < 1e-6));
    }

    #[test]
    fn output_is_clamped() {
        let mut shared = shared_with(vec![
            Box::new(ConstSource::new(
                0.9,
                AudioCategory::Beacon,
                PositioningMode::standard(),
            )),
            Box::new(ConstSource::new(
                0.9,
                AudioCategory::Beacon,
                PositioningMode::standard(),
            )),
        ]);
        let mut out = vec![0.0f32; 32];
        mix_block(&mut shared, &mut out, 1.0, 1.0, false);
        assert!(out.iter().all(|&s| (-1.0..=1.0).contains(&s)));
        assert!(out.iter().all(|&s| (s - 1.0).abs() < 1e-6));
    }

    #[test]
    fn muted_source_is_skipped() {
        let source = ConstSource::new(0.5, AudioCategory::Beacon, PositioningMode::standard());
        source.state.set_muted(true);
        let mut shared = shared_with(vec![Box::new(source)]);
        let mut out = vec![1.0f32; 16];
        mix_block(&mut shared, &mut out, 1.0, 1.0, false);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn finished_source_contributes_nothing() {
        let source = ConstSource::new(0.5, AudioCategory::Speech, PositioningMode::standard());
        source.state.set_finished();
        let mut shared = shared_with(vec![Box::new(source)]);
        let mut out = vec![0.0f32; 16];
        mix_block(&mut shared, &mut out, 1.0, 1.0, false);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn localized_source_pans_toward_its_azimuth() {
        // Source 90 degrees to the right without a spatializer: the pan
        // fallback should put nearly everything in the right channel.
        let source = ConstSource::new(
            0.5,
            AudioCategory::Beacon,
            PositioningMode::localized(0.0, 0.0),
        );
        source.state.set_direction(std::f32::consts::FRAC_PI_2, 0.0);
        let mut shared = shared_with(vec![Box::new(source)]);
        let mut out = vec![0.0f32; 32];
        mix_block(&mut shared, &mut out, 1.0, 1.0, true);

        let left: f32 = out.iter().step_by(2).sum();
        let right: f32 = out.iter().skip(1).step_by(2).sum();
        assert!(left.abs() < 1e-4);
        assert!(right > 0.1);
    }

    #[test]
    fn zero_gain_source_still_reaches_end_of_stream() {
        // Focus loss with ducking disallowed sets both category volumes to
        // zero. Streams must still be pulled so they can finish and the
        // serialized queue keeps draining.
        use crate::source::{SampleFormat, SpeechSource};

        let source = SpeechSource::new(
            Box::new(std::io::Cursor::new(Vec::new())),
            PositioningMode::standard(),
            48_000,
            48_000,
            SampleFormat::I16,
            1,
        );
        source.state().set_speech_format(48_000, SampleFormat::I16, 1);
        let mut shared = shared_with(vec![Box::new(source)]);
        let mut out = vec![0.0f32; 32];

        mix_block(&mut shared, &mut out, 0.0, 0.0, false);
        assert!(
            shared.sources[0].source.is_finished(),
            "silenced stream never saw its EOF"
        );
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn zero_category_volume_silences_category() {
        let mut shared = shared_with(vec![Box::new(ConstSource::new(
            0.5,
            AudioCategory::Beacon,
            PositioningMode::standard(),
        ))]);
        let mut out = vec![0.0f32; 16];
        mix_block(&mut shared, &mut out, 0.0, 1.0, false);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn mixer_construction_without_device() {
        let mixer = AudioMixer::new();
        assert!(!mixer.is_running());
        assert_eq!(mixer.source_count(), 0);

        let source = ConstSource::new(0.1, AudioCategory::Beacon, PositioningMode::standard());
        mixer.add_source(SoundId(7), Box::new(source));
        assert_eq!(mixer.source_count(), 1);
        mixer.remove_source(SoundId(7));
        assert_eq!(mixer.source_count(), 0);
    }
}
