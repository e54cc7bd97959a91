use crate::audio_data::AudioClip;
use crate::error::Result;
use std::sync::Arc;

/// Capability for turning a logical asset identifier into decoded mono PCM
/// at a requested sample rate.
///
/// The engine ships with [`SymphoniaLoader`](crate::audio_data::SymphoniaLoader)
/// for filesystem assets; hosts with packaged or in-memory assets implement
/// this trait themselves. Callers treat a load failure as silence, never as a
/// fatal error.
pub trait AssetLoader: Send + Sync {
    /// Load and decode `path`, downmixed to mono and resampled to
    /// `target_sample_rate`.
    fn load(&self, path: &str, target_sample_rate: u32) -> Result<Arc<AudioClip>>;

    /// Like [`load`](Self::load), but absorbs the failure into a silent clip.
    fn load_or_silent(&self, path: &str, target_sample_rate: u32) -> Arc<AudioClip> {
        match self.load(path, target_sample_rate) {
            Ok(clip) => clip,
            Err(e) => {
                log::warn!("failed to load {path}: {e}; substituting silence");
                Arc::new(AudioClip::silent(target_sample_rate))
            }
        }
    }
}
