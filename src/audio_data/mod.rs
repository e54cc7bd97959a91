mod batch_resampler;
mod loader;
mod streaming_resampler;
mod symphonia_loader;

pub use batch_resampler::BatchResampler;
pub use loader::AssetLoader;
pub use streaming_resampler::StreamingResampler;
pub use symphonia_loader::SymphoniaLoader;

/// A decoded audio asset: mono f32 PCM at a known sample rate.
///
/// A clip that failed to decode is represented as an empty clip; everything
/// that reads clips renders silence for it rather than failing.
#[derive(Debug, Clone)]
pub struct AudioClip {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioClip {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// The stand-in for an asset that could not be loaded.
    pub fn silent(sample_rate: u32) -> Self {
        Self {
            samples: Vec::new(),
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of mono frames.
    pub fn num_frames(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
