//! Real-time audio rendering core for an accessibility navigation app:
//! looping directional beacon tones, streamed synthesized speech, one-shot
//! earcons, all mixed into a binaurally spatialized stereo stream that
//! follows the listener's position and heading.
//!
//! [`engine::AudioEngine`] is the control-thread entry point; everything
//! below it (mixer, sources, spatializer) runs on or feeds the audio
//! callback.

pub mod audio_data;
pub mod catalog;
pub mod engine;
pub mod error;
pub mod geo;
pub mod mixer;
pub mod source;
pub mod spatial;

pub use catalog::{BEACON_DESCRIPTORS, BeaconDescriptor, descriptor_index_by_name, list_beacon_names};
pub use engine::{AudioEngine, EventSink};
pub use error::{Result, WaybeaconError};
pub use mixer::AudioMixer;
pub use source::{
    AudioCategory, AudioMode, AudioSource, AudioType, PositioningMode, SampleFormat, SoundId,
    SourceMode, SourceState,
};
pub use spatial::SpatialRenderer;
