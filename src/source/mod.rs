//! The audio-source abstraction.
//!
//! Each sound is split in two: a render-side object implementing
//! [`AudioSource`] (owned by the mixer, pulled on the audio thread) and a
//! shared [`SourceState`] control block of atomics (written by the control
//! thread, read by the render thread). The fields are independent atomics by
//! design: a render pass may see a mix of this update's and the previous
//! update's values across fields of one source, which audio-rate smoothing
//! masks. No struct-wide lock ever sits on the hot path.

mod beacon;
mod earcon;
mod speech;

pub use beacon::BeaconSource;
pub use earcon::EarconSource;
pub use speech::SpeechSource;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering};

/// Off-axis angle substituted when the listener's heading is unknown: the
/// beacon sounds occluded/behind rather than confidently wrong.
pub const BEHIND_DEGREES: f64 = 180.0;

/// Identity of one logical sound, unique for the life of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SoundId(pub u64);

impl std::fmt::Display for SoundId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Volume/ducking category of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCategory {
    Beacon,
    Speech,
}

/// How a sound is positioned in the world.
///
/// `Standard` is plain unpositioned audio. `Localized` pins the sound to a
/// coordinate, `Relative` to a fixed angle off the listener's heading, and
/// `Compass` to a fixed compass bearing (synthesized as a distant point so
/// it behaves like a far-away localized sound).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioType {
    Standard,
    Localized,
    Relative,
    Compass,
}

/// Whether a beacon reacts to heading alone or also to proximity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioMode {
    Heading,
    HeadingAndProximity,
}

/// Immutable positioning parameters, fixed at source creation.
#[derive(Debug, Clone, Copy)]
pub struct PositioningMode {
    pub audio_type: AudioType,
    pub audio_mode: AudioMode,
    pub latitude: f64,
    pub longitude: f64,
    /// Relative: angle off the listener's heading. Compass: fixed bearing.
    pub heading: f64,
}

impl PositioningMode {
    pub fn standard() -> Self {
        Self {
            audio_type: AudioType::Standard,
            audio_mode: AudioMode::Heading,
            latitude: 0.0,
            longitude: 0.0,
            heading: 0.0,
        }
    }

    pub fn localized(latitude: f64, longitude: f64) -> Self {
        Self {
            audio_type: AudioType::Localized,
            audio_mode: AudioMode::Heading,
            latitude,
            longitude,
            heading: 0.0,
        }
    }

    pub fn relative(heading_offset: f64) -> Self {
        Self {
            audio_type: AudioType::Relative,
            audio_mode: AudioMode::Heading,
            latitude: 0.0,
            longitude: 0.0,
            heading: heading_offset,
        }
    }

    pub fn compass(bearing: f64) -> Self {
        Self {
            audio_type: AudioType::Compass,
            audio_mode: AudioMode::Heading,
            latitude: 0.0,
            longitude: 0.0,
            heading: bearing,
        }
    }

    pub fn with_proximity(mut self) -> Self {
        self.audio_mode = AudioMode::HeadingAndProximity;
        self
    }

    pub fn needs_spatialize(&self) -> bool {
        self.audio_type != AudioType::Standard
    }
}

/// Clip-selection mode of a beacon, produced by the geometry pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SourceMode {
    /// Pick the clip by off-axis angle.
    Direction = 0,
    /// Proximity override: near clip.
    Near = 1,
    /// Proximity override: far clip.
    Far = 2,
    /// Proximity override: out of range, silent.
    TooFar = 3,
}

impl SourceMode {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Near,
            2 => Self::Far,
            3 => Self::TooFar,
            _ => Self::Direction,
        }
    }
}

/// Raw PCM sample encoding of a speech stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SampleFormat {
    U8 = 0,
    I16 = 1,
    F32 = 2,
}

impl SampleFormat {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::U8,
            2 => Self::F32,
            _ => Self::I16,
        }
    }

    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::I16 => 2,
            Self::F32 => 4,
        }
    }
}

/// An f32 stored in an `AtomicU32`, relaxed ordering throughout. The fields
/// carried this way are single-writer/single-reader and independently stale.
pub(crate) struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(v: f32) -> Self {
        Self(AtomicU32::new(v.to_bits()))
    }

    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn store(&self, v: f32) {
        self.0.store(v.to_bits(), Ordering::Relaxed);
    }
}

/// Cross-thread control block of one source.
///
/// Written by the control thread (geometry pass, mute, format updates) and
/// read by the render thread inside `read_pcm`, except `finished`, which the
/// render side latches and the control thread polls.
pub struct SourceState {
    azimuth: AtomicF32,
    elevation: AtomicF32,
    off_axis_degrees: AtomicF32,
    mode: AtomicU8,
    muted: AtomicBool,
    finished: AtomicBool,
    can_start: AtomicBool,
    outro_requested: AtomicBool,
    device_sample_rate: AtomicU32,
    // Speech stream format, late-bound: the declared values may be replaced
    // once the real format is known.
    src_sample_rate: AtomicU32,
    src_format: AtomicU8,
    src_channels: AtomicU32,
    config_received: AtomicBool,
}

impl SourceState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            azimuth: AtomicF32::new(0.0),
            elevation: AtomicF32::new(0.0),
            off_axis_degrees: AtomicF32::new(0.0),
            mode: AtomicU8::new(SourceMode::Direction as u8),
            muted: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            can_start: AtomicBool::new(true),
            outro_requested: AtomicBool::new(false),
            device_sample_rate: AtomicU32::new(0),
            src_sample_rate: AtomicU32::new(0),
            src_format: AtomicU8::new(SampleFormat::I16 as u8),
            src_channels: AtomicU32::new(1),
            config_received: AtomicBool::new(false),
        })
    }

    /// Azimuth in radians: 0 = ahead, positive = right.
    pub fn azimuth(&self) -> f32 {
        self.azimuth.load()
    }

    /// Elevation in radians: 0 = level, positive = up.
    pub fn elevation(&self) -> f32 {
        self.elevation.load()
    }

    pub fn set_direction(&self, azimuth: f32, elevation: f32) {
        self.azimuth.store(azimuth);
        self.elevation.store(elevation);
    }

    pub fn off_axis_degrees(&self) -> f64 {
        self.off_axis_degrees.load() as f64
    }

    pub fn set_off_axis_degrees(&self, degrees: f64) {
        self.off_axis_degrees.store(degrees as f32);
    }

    pub fn mode(&self) -> SourceMode {
        SourceMode::from_u8(self.mode.load(Ordering::Relaxed))
    }

    pub fn set_mode(&self, mode: SourceMode) {
        self.mode.store(mode as u8, Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    /// Latches permanently once set.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Relaxed)
    }

    pub fn set_finished(&self) {
        self.finished.store(true, Ordering::Relaxed);
    }

    /// False for speech sources until the real stream format has arrived.
    pub fn can_start(&self) -> bool {
        self.can_start.load(Ordering::Relaxed)
    }

    pub(crate) fn set_can_start(&self, v: bool) {
        self.can_start.store(v, Ordering::Relaxed);
    }

    pub fn request_outro(&self) {
        self.outro_requested.store(true, Ordering::Relaxed);
    }

    pub fn outro_requested(&self) -> bool {
        self.outro_requested.load(Ordering::Relaxed)
    }

    pub fn device_sample_rate(&self) -> u32 {
        self.device_sample_rate.load(Ordering::Relaxed)
    }

    pub fn set_device_sample_rate(&self, rate: u32) {
        self.device_sample_rate.store(rate, Ordering::Relaxed);
    }

    pub fn speech_format(&self) -> (u32, SampleFormat, usize) {
        (
            self.src_sample_rate.load(Ordering::Relaxed),
            SampleFormat::from_u8(self.src_format.load(Ordering::Relaxed)),
            self.src_channels.load(Ordering::Relaxed).max(1) as usize,
        )
    }

    /// Record the format declared at creation without marking the real
    /// configuration as received.
    pub(crate) fn declare_speech_format(
        &self,
        sample_rate: u32,
        format: SampleFormat,
        channels: u32,
    ) {
        self.src_sample_rate.store(sample_rate, Ordering::Relaxed);
        self.src_format.store(format as u8, Ordering::Relaxed);
        self.src_channels.store(channels.max(1), Ordering::Relaxed);
    }

    pub fn set_speech_format(&self, sample_rate: u32, format: SampleFormat, channels: u32) {
        self.src_sample_rate.store(sample_rate, Ordering::Relaxed);
        self.src_format.store(format as u8, Ordering::Relaxed);
        self.src_channels.store(channels.max(1), Ordering::Relaxed);
        self.config_received.store(true, Ordering::Relaxed);
        self.can_start.store(true, Ordering::Relaxed);
    }

    pub fn config_received(&self) -> bool {
        self.config_received.load(Ordering::Relaxed)
    }
}

/// Render-side contract of a sound. Pulled by the mixer once per callback.
///
/// `read_pcm` must never block and never panic: on missing data it writes
/// silence and/or returns a short frame count.
pub trait AudioSource: Send {
    /// Fill `out` with mono f32 frames at the device sample rate. Returns
    /// the number of frames actually produced; the mixer pads the rest.
    fn read_pcm(&mut self, out: &mut [f32]) -> usize;

    /// The shared control block.
    fn state(&self) -> &Arc<SourceState>;

    fn category(&self) -> AudioCategory;

    fn needs_spatialize(&self) -> bool;

    fn is_finished(&self) -> bool {
        self.state().is_finished()
    }

    /// Whether this source will contribute audible output this callback.
    fn is_audible(&self) -> bool {
        !self.is_finished() && !self.state().is_muted()
    }
}

/// Monotonic id allocator shared by the engine.
pub(crate) struct SoundIdAllocator(AtomicU64);

impl SoundIdAllocator {
    pub fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    pub fn next(&self) -> SoundId {
        SoundId(self.0.fetch_add(1, Ordering::Relaxed))
    }
}
