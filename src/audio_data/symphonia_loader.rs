use crate::audio_data::{AssetLoader, AudioClip, BatchResampler};
use crate::error::{Result, WaybeaconError};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use symphonia::{
    core::{
        audio::SampleBuffer, codecs::DecoderOptions, errors::Error, formats::FormatOptions,
        io::MediaSourceStream, meta::MetadataOptions, probe::Hint,
    },
    default::{get_codecs, get_probe},
};

/// Default [`AssetLoader`] for filesystem assets, decoding via Symphonia.
///
/// Decodes whatever the container holds (WAV in practice, but anything
/// Symphonia probes works), averages the channels down to mono, and
/// resamples to the requested rate.
pub struct SymphoniaLoader {
    asset_root: PathBuf,
}

impl SymphoniaLoader {
    /// `asset_root` is prepended to every logical asset path.
    pub fn new(asset_root: impl Into<PathBuf>) -> Self {
        Self {
            asset_root: asset_root.into(),
        }
    }
}

impl AssetLoader for SymphoniaLoader {
    fn load(&self, path: &str, target_sample_rate: u32) -> Result<Arc<AudioClip>> {
        let full_path = self.asset_root.join(path);
        let file = File::open(&full_path)?;

        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = Path::new(path).extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| {
                WaybeaconError::AudioLoading(format!("Failed to probe audio format: {e:?}"))
            })?;

        let mut format = probed.format;

        let track = format.default_track().ok_or_else(|| {
            WaybeaconError::AudioLoading("No default audio track found".to_string())
        })?;

        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| WaybeaconError::AudioLoading("Sample rate not found".to_string()))?;

        let channels = track
            .codec_params
            .channels
            .ok_or_else(|| WaybeaconError::AudioLoading("Channel count not found".to_string()))?
            .count();

        let mut decoder = get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| {
                WaybeaconError::AudioLoading(format!("Failed to create decoder: {e:?}"))
            })?;

        let mut samples: Vec<f32> = Vec::new();

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(Error::IoError(_)) => break, // end-of-file
                Err(e) => {
                    return Err(WaybeaconError::AudioLoading(format!(
                        "Error reading packet: {e:?}"
                    )));
                }
            };

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(Error::IoError(_)) => break, // also EOF in some formats
                Err(Error::DecodeError(_)) => continue, // recoverable corruption
                Err(e) => {
                    return Err(WaybeaconError::AudioLoading(format!(
                        "Error decoding packet: {e:?}"
                    )));
                }
            };

            let spec = *decoded.spec();
            let capacity = decoded.capacity();

            let mut tmp = SampleBuffer::<f32>::new(capacity as u64, spec);
            tmp.copy_interleaved_ref(decoded);
            samples.extend_from_slice(tmp.samples());
        }

        // Downmix by channel averaging.
        let mono: Vec<f32> = if channels <= 1 {
            samples
        } else {
            samples
                .chunks(channels)
                .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                .collect()
        };

        let resampled = if sample_rate == target_sample_rate {
            mono
        } else {
            BatchResampler::new(sample_rate, target_sample_rate)?.resample(&mono)?
        };

        log::debug!(
            "loaded {} ({} Hz -> {} Hz, {} frames)",
            full_path.display(),
            sample_rate,
            target_sample_rate,
            resampled.len()
        );

        Ok(Arc::new(AudioClip::new(resampled, target_sample_rate)))
    }
}
