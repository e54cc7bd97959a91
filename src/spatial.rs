//! Binaural rendering and the stereo-pan fallback.
//!
//! [`SpatialRenderer`] wraps Steam Audio (via audionimbus): one shared
//! context and HRTF, one `BinauralEffect` handle per spatialized source.
//! When the renderer cannot be built, or a callback arrives with a block
//! size the HRTF was not prepared for, the mixer falls back to
//! [`pan_spatialize`], a constant-power pan with rear attenuation.

use std::collections::HashMap;

use audionimbus::{
    AudioBuffer, AudioBufferSettings, AudioSettings, BinauralEffect, BinauralEffectParams,
    BinauralEffectSettings, Context, ContextSettings, Direction, Hrtf, HrtfInterpolation,
    HrtfSettings, VolumeNormalization,
};

use glam::Vec3;

use crate::error::{Result, WaybeaconError};

/// Handle to one source's binaural effect.
pub type EffectId = u64;

/// Unit direction vector for a source at (azimuth, elevation), in the
/// right-handed listener frame Steam Audio expects: +x right, +y up,
/// forward = -z.
pub fn direction_vector(azimuth: f32, elevation: f32) -> Vec3 {
    Vec3::new(
        azimuth.sin() * elevation.cos(),
        elevation.sin(),
        -azimuth.cos() * elevation.cos(),
    )
}

/// Smooth volume falloff for sounds behind the listener: 1.0 ahead, 0.5
/// directly behind, continuous everywhere (including at ±180°).
pub fn rear_attenuation(azimuth: f32) -> f32 {
    0.5 + 0.25 * (1.0 + azimuth.cos())
}

/// Constant-power stereo pan of a mono block into interleaved stereo.
///
/// `pan = sin(azimuth)` maps onto a quarter-turn pan angle; left/right gains
/// are its cosine/sine, so total power stays constant across the arc. Rear
/// attenuation is folded in here; the HRTF path applies it separately.
pub fn pan_spatialize(mono: &[f32], stereo: &mut [f32], azimuth: f32) {
    let pan = azimuth.sin();
    let pan_angle = (pan + 1.0) * std::f32::consts::FRAC_PI_4;
    let rear = rear_attenuation(azimuth);
    let left = pan_angle.cos() * rear;
    let right = pan_angle.sin() * rear;

    let frames = mono.len().min(stereo.len() / 2);
    for (i, &sample) in mono[..frames].iter().enumerate() {
        stereo[i * 2] = sample * left;
        stereo[i * 2 + 1] = sample * right;
    }
}

/// Steam Audio lifecycle wrapper: context + HRTF sized to one (sample rate,
/// frame size) pair, and the table of per-source effect handles.
pub struct SpatialRenderer {
    context: Context,
    hrtf: Hrtf,
    sample_rate: u32,
    frame_size: usize,
    effects: HashMap<EffectId, BinauralEffect>,
    next_id: u64,
    /// Channel-major stereo scratch for the deinterleaved effect output.
    deinterleaved: Vec<f32>,
}

impl SpatialRenderer {
    pub fn new(sample_rate: u32, frame_size: usize) -> Result<Self> {
        let context = Context::try_new(&ContextSettings::default()).map_err(|e| {
            WaybeaconError::Spatialization(format!("Failed to create Steam Audio context: {e}"))
        })?;

        let audio_settings = AudioSettings {
            sampling_rate: sample_rate,
            frame_size: frame_size as u32,
        };

        let hrtf = Hrtf::try_new(
            &context,
            &audio_settings,
            &HrtfSettings {
                volume_normalization: VolumeNormalization::None,
                sofa_information: None,
                ..Default::default()
            },
        )
        .map_err(|e| WaybeaconError::Spatialization(format!("Failed to create HRTF: {e}")))?;

        log::info!("spatializer initialized ({sample_rate} Hz, frame size {frame_size})");

        Ok(Self {
            context,
            hrtf,
            sample_rate,
            frame_size,
            effects: HashMap::new(),
            next_id: 1,
            deinterleaved: vec![0.0; frame_size * 2],
        })
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn create_source_effect(&mut self) -> Result<EffectId> {
        let audio_settings = AudioSettings {
            sampling_rate: self.sample_rate,
            frame_size: self.frame_size as u32,
        };

        let effect = BinauralEffect::try_new(
            &self.context,
            &audio_settings,
            &BinauralEffectSettings { hrtf: &self.hrtf },
        )
        .map_err(|e| {
            WaybeaconError::Spatialization(format!("Failed to create binaural effect: {e}"))
        })?;

        let id = self.next_id;
        self.next_id += 1;
        self.effects.insert(id, effect);
        log::debug!("created binaural effect {id}");
        Ok(id)
    }

    pub fn remove_source_effect(&mut self, id: EffectId) {
        if self.effects.remove(&id).is_some() {
            log::debug!("removed binaural effect {id}");
        }
    }

    /// Render one mono block to interleaved binaural stereo for a source at
    /// the given direction. A missing handle or a buffer setup failure
    /// outputs silence.
    pub fn spatialize(
        &mut self,
        id: EffectId,
        mono: &[f32],
        stereo: &mut [f32],
        azimuth: f32,
        elevation: f32,
    ) {
        let frames = mono.len().min(stereo.len() / 2).min(self.frame_size);
        let Some(effect) = self.effects.get_mut(&id) else {
            stereo[..frames * 2].fill(0.0);
            return;
        };

        let dir = direction_vector(azimuth, elevation);
        let direction = Direction::new(dir.x, dir.y, dir.z);

        let input = AudioBuffer::try_with_data_and_settings(
            &mono[..frames],
            AudioBufferSettings {
                num_channels: Some(1),
                ..Default::default()
            },
        );
        let output = AudioBuffer::try_with_data_and_settings(
            &mut self.deinterleaved[..frames * 2],
            AudioBufferSettings {
                num_channels: Some(2),
                ..Default::default()
            },
        );
        let (Ok(input), Ok(output)) = (input, output) else {
            stereo[..frames * 2].fill(0.0);
            return;
        };

        let params = BinauralEffectParams {
            direction,
            interpolation: HrtfInterpolation::Bilinear,
            spatial_blend: 1.0,
            hrtf: &self.hrtf,
            peak_delays: None,
        };
        effect.apply(&params, &input, &output);

        output.interleave(&self.context, &mut stereo[..frames * 2]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    #[test]
    fn direction_vector_is_unit_length_and_oriented() {
        for az in [-PI, -PI / 2.0, 0.0, PI / 4.0, PI / 2.0, PI] {
            for el in [-PI / 3.0, 0.0, PI / 3.0] {
                let v = direction_vector(az, el);
                assert!((v.length() - 1.0).abs() < 1e-5);
            }
        }
        // Ahead is -z, right is +x, up is +y.
        assert!(direction_vector(0.0, 0.0).abs_diff_eq(Vec3::new(0.0, 0.0, -1.0), 1e-6));
        assert!(direction_vector(PI / 2.0, 0.0).abs_diff_eq(Vec3::new(1.0, 0.0, 0.0), 1e-6));
        assert!(direction_vector(0.0, PI / 2.0).abs_diff_eq(Vec3::new(0.0, 1.0, 0.0), 1e-6));
    }

    #[test]
    fn rear_attenuation_is_periodic_and_continuous() {
        for k in 0..360 {
            let theta = (k as f32).to_radians();
            let a = rear_attenuation(theta);
            let b = rear_attenuation(theta + 2.0 * PI);
            assert!((a - b).abs() < 1e-6, "not periodic at {k} deg");
        }

        // No jump across the rear seam.
        let just_under = rear_attenuation(PI - 1e-4);
        let just_over = rear_attenuation(-PI + 1e-4);
        assert!((just_under - just_over).abs() < 1e-3);
    }

    #[test]
    fn rear_attenuation_range() {
        assert!((rear_attenuation(0.0) - 1.0).abs() < 1e-6);
        assert!((rear_attenuation(PI) - 0.5).abs() < 1e-6);
        for k in -180..=180 {
            let a = rear_attenuation((k as f32).to_radians());
            assert!((0.5..=1.0).contains(&a));
        }
    }

    #[test]
    fn pan_center_is_equal_power() {
        let mono = vec![1.0f32; 8];
        let mut stereo = vec![0.0f32; 16];
        pan_spatialize(&mono, &mut stereo, 0.0);
        // Centered: both channels at cos(45°) times full (rear = 1) gain.
        let expected = std::f32::consts::FRAC_1_SQRT_2;
        assert!((stereo[0] - expected).abs() < 1e-5);
        assert!((stereo[1] - expected).abs() < 1e-5);
    }

    #[test]
    fn pan_hard_left_and_right() {
        let mono = vec![1.0f32; 4];
        let mut stereo = vec![0.0f32; 8];

        // 90° right: pan angle is a full quarter turn, left gain zero.
        pan_spatialize(&mono, &mut stereo, PI / 2.0);
        assert!(stereo[0].abs() < 1e-5);
        assert!(stereo[1] > 0.5);

        pan_spatialize(&mono, &mut stereo, -PI / 2.0);
        assert!(stereo[0] > 0.5);
        assert!(stereo[1].abs() < 1e-5);
    }

    #[test]
    fn pan_power_is_constant_across_the_front_arc() {
        let mono = vec![1.0f32; 1];
        let mut stereo = vec![0.0f32; 2];
        for k in -90..=90 {
            let azimuth = (k as f32).to_radians();
            pan_spatialize(&mono, &mut stereo, azimuth);
            let rear = rear_attenuation(azimuth);
            let power = stereo[0] * stereo[0] + stereo[1] * stereo[1];
            assert!(
                (power - rear * rear).abs() < 1e-4,
                "power {power} at {k} deg"
            );
        }
    }
}
