use crate::error::{Result, WaybeaconError};

/// Offline whole-clip resampler used when loading assets whose native rate
/// differs from the output device rate. Streaming audio goes through
/// [`StreamingResampler`](crate::audio_data::StreamingResampler) instead.
pub struct BatchResampler {
    source_sample_rate: u32,
    target_sample_rate: u32,
    chunk_size: usize,
}

impl BatchResampler {
    pub fn new(source_sample_rate: u32, target_sample_rate: u32) -> Result<Self> {
        if source_sample_rate == 0 || target_sample_rate == 0 {
            return Err(WaybeaconError::AudioFormat(
                "Sample rates must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            source_sample_rate,
            target_sample_rate,
            chunk_size: 1024,
        })
    }

    /// Resample a mono channel. Returns the input unchanged when the rates
    /// already match.
    pub fn resample(&self, samples: &[f32]) -> Result<Vec<f32>> {
        if self.source_sample_rate == self.target_sample_rate {
            return Ok(samples.to_vec());
        }

        use rubato::{FftFixedIn, Resampler};

        let mut resampler = FftFixedIn::new(
            self.source_sample_rate as usize,
            self.target_sample_rate as usize,
            self.chunk_size,
            2, // sub_chunks
            1, // mono
        )
        .map_err(|e| WaybeaconError::AudioLoading(format!("Failed to create resampler: {e}")))?;

        let mut output = Vec::new();
        let mut input_index = 0;

        while input_index < samples.len() {
            let remaining = samples.len() - input_index;
            let to_process = remaining.min(self.chunk_size);

            // Pad the final chunk to the fixed input size.
            let mut chunk = vec![0.0f32; self.chunk_size];
            chunk[..to_process].copy_from_slice(&samples[input_index..input_index + to_process]);

            let waves_out = resampler
                .process(&[chunk], None)
                .map_err(|e| WaybeaconError::AudioLoading(format!("Resampling error: {e}")))?;

            if let Some(channel) = waves_out.first() {
                output.extend_from_slice(channel);
            }

            input_index += to_process;
        }

        Ok(output)
    }

    pub fn source_sample_rate(&self) -> u32 {
        self.source_sample_rate
    }

    pub fn target_sample_rate(&self) -> u32 {
        self.target_sample_rate
    }
}
