/// A real-time streaming sample-rate converter for pull-driven audio.
///
/// Linear interpolation with a fractional read position and the previous
/// chunk's last sample carried across calls, so chunk boundaries stay
/// continuous no matter how the caller slices the stream. Cheap enough for
/// the render thread, and tolerant of the rate changing between calls
/// (speech streams may declare their real format after creation).
pub struct StreamingResampler {
    /// source rate / target rate; 1.0 means pass-through.
    ratio: f64,
    /// Fractional position on the source timeline. Coordinate 0 is the last
    /// sample of the previous chunk, coordinate `i + 1` is `input[i]`.
    src_pos: f64,
    prev_sample: f32,
    has_prev: bool,
}

impl Default for StreamingResampler {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamingResampler {
    pub fn new() -> Self {
        Self {
            ratio: 1.0,
            src_pos: 1.0,
            prev_sample: 0.0,
            has_prev: false,
        }
    }

    /// Set the conversion rates. May be called between `process` calls; the
    /// position state is kept so the stream stays continuous across a rate
    /// change.
    pub fn set_rates(&mut self, source_rate: u32, target_rate: u32) {
        if source_rate > 0 && target_rate > 0 {
            self.ratio = source_rate as f64 / target_rate as f64;
        } else {
            self.ratio = 1.0;
        }
    }

    pub fn reset(&mut self) {
        self.src_pos = 1.0;
        self.prev_sample = 0.0;
        self.has_prev = false;
    }

    pub fn needs_resampling(&self) -> bool {
        self.ratio != 1.0
    }

    /// Source frames a caller should supply to fill `output_frames` without
    /// under-running the interpolator.
    pub fn input_frames_needed(&self, output_frames: usize) -> usize {
        if !self.needs_resampling() {
            return output_frames;
        }
        (output_frames as f64 * self.ratio).ceil() as usize + 1
    }

    /// Consume up to `input.len()` frames, write up to `output.len()` frames.
    /// Returns `(frames_written, frames_consumed)`.
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) -> (usize, usize) {
        if !self.needs_resampling() {
            let n = input.len().min(output.len());
            output[..n].copy_from_slice(&input[..n]);
            if n > 0 {
                // Keep boundary state valid in case the ratio changes later.
                self.prev_sample = input[n - 1];
                self.has_prev = true;
                self.src_pos = 1.0;
            }
            return (n, n);
        }

        let mut written = 0;
        while written < output.len() {
            let idx = self.src_pos.floor() as usize;
            let frac = (self.src_pos - idx as f64) as f32;

            // Need both the sample at `idx` and its successor.
            if idx >= input.len() {
                break;
            }
            let s0 = if idx == 0 {
                if self.has_prev {
                    self.prev_sample
                } else {
                    input[0]
                }
            } else {
                input[idx - 1]
            };
            let s1 = input[idx];

            output[written] = s0 + (s1 - s0) * frac;
            written += 1;
            self.src_pos += self.ratio;
        }

        let consumed = (self.src_pos.floor() as usize).min(input.len());
        if consumed > 0 {
            self.prev_sample = input[consumed - 1];
            self.has_prev = true;
            self.src_pos -= consumed as f64;
        }

        (written, consumed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: usize) -> Vec<f32> {
        (0..n).map(|i| i as f32).collect()
    }

    #[test]
    fn unity_ratio_is_byte_identical() {
        let mut r = StreamingResampler::new();
        r.set_rates(48_000, 48_000);
        let input = ramp(256);
        let mut output = vec![0.0f32; 256];
        let (written, consumed) = r.process(&input, &mut output);
        assert_eq!(written, 256);
        assert_eq!(consumed, 256);
        assert_eq!(input, output);
    }

    #[test]
    fn downsample_by_two_strides_input() {
        let mut r = StreamingResampler::new();
        r.set_rates(48_000, 24_000);
        let input = ramp(64);
        let mut output = vec![0.0f32; 32];
        let (written, _) = r.process(&input, &mut output);
        assert_eq!(written, 32);
        for (k, &s) in output.iter().enumerate() {
            assert!((s - (2 * k) as f32).abs() < 1e-4, "sample {k} was {s}");
        }
    }

    #[test]
    fn continuity_across_chunk_boundaries() {
        // Resample a ramp in two differently-sized chunks; the joined output
        // must itself be an evenly-spaced ramp with no seam.
        let mut r = StreamingResampler::new();
        r.set_rates(44_100, 48_000);
        let input = ramp(441);

        let mut out_a = vec![0.0f32; 100];
        let (wa, ca) = r.process(&input[..200], &mut out_a);
        let mut out_b = vec![0.0f32; 300];
        let (wb, _) = r.process(&input[ca..], &mut out_b);

        let joined: Vec<f32> = out_a[..wa].iter().chain(out_b[..wb].iter()).copied().collect();
        let step = 44_100.0f32 / 48_000.0;
        for (k, &s) in joined.iter().enumerate() {
            let expected = k as f32 * step;
            assert!(
                (s - expected).abs() < 1e-2,
                "sample {k}: got {s}, expected {expected}"
            );
        }
    }

    #[test]
    fn no_position_drift_over_many_chunks() {
        // At a constant ratio, total output over a long run must track
        // total input / ratio exactly (no cumulative drift).
        let mut r = StreamingResampler::new();
        r.set_rates(22_050, 48_000);
        let chunk = ramp(441);
        let mut total_out = 0usize;
        let mut total_in = 0usize;
        let mut out = vec![0.0f32; 2048];
        for _ in 0..200 {
            let (w, c) = r.process(&chunk, &mut out);
            total_out += w;
            total_in += c;
        }
        let expected = total_in as f64 * 48_000.0 / 22_050.0;
        assert!((total_out as f64 - expected).abs() < 3.0);
    }

    #[test]
    fn round_trip_approximates_original() {
        let input: Vec<f32> = (0..480).map(|i| (i as f32 * 0.05).sin()).collect();

        let mut up = StreamingResampler::new();
        up.set_rates(24_000, 48_000);
        let mut mid = vec![0.0f32; 1024];
        let (wm, _) = up.process(&input, &mut mid);

        let mut down = StreamingResampler::new();
        down.set_rates(48_000, 24_000);
        let mut out = vec![0.0f32; 512];
        let (wo, _) = down.process(&mid[..wm], &mut out);

        // Interior samples should match within linear-interpolation error.
        for k in 2..wo.saturating_sub(2) {
            assert!(
                (out[k] - input[k]).abs() < 0.01,
                "sample {k}: {} vs {}",
                out[k],
                input[k]
            );
        }
    }

    #[test]
    fn input_frames_needed_covers_request() {
        let mut r = StreamingResampler::new();
        r.set_rates(44_100, 48_000);
        let out_frames = 512;
        let needed = r.input_frames_needed(out_frames);
        assert_eq!(needed, (512.0f64 * 44_100.0 / 48_000.0).ceil() as usize + 1);

        let input = ramp(needed);
        let mut output = vec![0.0f32; out_frames];
        let (written, _) = r.process(&input, &mut output);
        assert_eq!(written, out_frames);
    }

    #[test]
    fn tolerates_rate_change_between_calls() {
        let mut r = StreamingResampler::new();
        r.set_rates(16_000, 48_000);
        let chunk = ramp(160);
        let mut out = vec![0.0f32; 512];
        let (w1, _) = r.process(&chunk, &mut out);
        assert!(w1 > 0);

        // Speech engines may re-declare the stream rate mid-flight.
        r.set_rates(22_050, 48_000);
        let (w2, c2) = r.process(&chunk, &mut out);
        assert!(w2 > 0);
        assert!(c2 <= chunk.len());
    }
}
