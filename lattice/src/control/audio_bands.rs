//! Continuous audio-to-parameter mappings.
//!
//! Each configured band averages spectrum energy over a frequency
//! sub-range once per render frame, smooths it, shapes it, and feeds the
//! result through the same normalization layer the MIDI path uses. The
//! EMA coefficients are fixed at 0.8/0.2, trading a little responsiveness
//! for jitter suppression.

use std::error::Error;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::control::params::ParameterRegistry;
use crate::core::prelude::*;
use crate::io::audio::SpectrumFrame;
use crate::scene::Scene;

pub type BandId = u32;

const EMA_PREVIOUS_WEIGHT: f32 = 0.8;
const EMA_SAMPLE_WEIGHT: f32 = 0.2;

pub const MAX_SENSITIVITY: f32 = 2.0;

#[derive(
    Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ResponseCurve {
    #[default]
    Linear,
    Exponential,
    Logarithmic,
    Sine,
}

impl ResponseCurve {
    pub fn apply(&self, x: f32) -> f32 {
        match self {
            ResponseCurve::Linear => x,
            ResponseCurve::Exponential => x * x,
            ResponseCurve::Logarithmic => (x + 1.0).ln() / 2.0f32.ln(),
            ResponseCurve::Sine => (std::f32::consts::PI * x).sin(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct AudioBandConfig {
    pub min_hz: f32,
    pub max_hz: f32,
    pub target: Option<String>,
    pub curve: ResponseCurve,
    /// 0 = inert, 1 = unity, 2 = doubled.
    pub sensitivity: f32,
}

impl Default for AudioBandConfig {
    fn default() -> Self {
        Self {
            min_hz: 20.0,
            max_hz: 250.0,
            target: None,
            curve: ResponseCurve::Linear,
            sensitivity: 1.0,
        }
    }
}

impl AudioBandConfig {
    /// Structural checks. `nyquist` is only known when a live audio
    /// session exists; without one the frequency ceiling is accepted
    /// provisionally.
    pub fn validate(&self, nyquist: Option<f32>) -> Result<(), BandError> {
        if !(self.min_hz >= 0.0 && self.min_hz < self.max_hz) {
            return Err(BandError::InvalidRange(self.min_hz, self.max_hz));
        }
        if let Some(nyquist) = nyquist
            && self.max_hz > nyquist
        {
            return Err(BandError::BeyondNyquist(self.max_hz, nyquist));
        }
        if !(0.0..=MAX_SENSITIVITY).contains(&self.sensitivity) {
            return Err(BandError::InvalidSensitivity(self.sensitivity));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub enum BandError {
    InvalidRange(f32, f32),
    BeyondNyquist(f32, f32),
    InvalidSensitivity(f32),
    UnknownBand(BandId),
}

impl fmt::Display for BandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BandError::InvalidRange(min, max) => {
                write!(f, "Invalid frequency range [{}, {}] Hz", min, max)
            }
            BandError::BeyondNyquist(max, nyquist) => write!(
                f,
                "Band ceiling {} Hz exceeds Nyquist limit {} Hz",
                max, nyquist
            ),
            BandError::InvalidSensitivity(s) => write!(
                f,
                "Sensitivity {} outside [0, {}]",
                s, MAX_SENSITIVITY
            ),
            BandError::UnknownBand(id) => {
                write!(f, "No audio band with id {}", id)
            }
        }
    }
}

impl Error for BandError {}

#[derive(Debug)]
struct BandState {
    config: AudioBandConfig,
    smoothed: f32,
}

/// The active set of band mappings, polled once per frame.
#[derive(Debug, Default)]
pub struct AudioBandSampler {
    bands: IndexMap<BandId, BandState>,
    next_id: BandId,
    // Targets already warned about, so a bad mapping logs once per target
    // instead of once per frame
    warned_targets: HashSet<String>,
}

impl AudioBandSampler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &mut self,
        config: AudioBandConfig,
    ) -> Result<BandId, BandError> {
        config.validate(None)?;
        self.next_id += 1;
        let id = self.next_id;
        self.bands.insert(
            id,
            BandState {
                config,
                smoothed: 0.0,
            },
        );
        Ok(id)
    }

    pub fn update(
        &mut self,
        id: BandId,
        config: AudioBandConfig,
    ) -> Result<(), BandError> {
        config.validate(None)?;
        let state =
            self.bands.get_mut(&id).ok_or(BandError::UnknownBand(id))?;
        state.config = config;
        Ok(())
    }

    /// Destroying a band frees its registration immediately. Returns the
    /// removed config so the caller can purge the target from any pending
    /// scheduler updates.
    pub fn remove(&mut self, id: BandId) -> Option<AudioBandConfig> {
        self.bands.shift_remove(&id).map(|state| state.config)
    }

    pub fn config(&self, id: BandId) -> Option<&AudioBandConfig> {
        self.bands.get(&id).map(|state| &state.config)
    }

    /// Configs in creation order, for preset export.
    pub fn configs(&self) -> Vec<AudioBandConfig> {
        self.bands.values().map(|state| state.config.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.bands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }

    /// Wholesale replacement, used by preset import after validation.
    /// Smoothing state starts from zero; configs are assumed valid.
    pub fn replace_all(&mut self, configs: Vec<AudioBandConfig>) {
        self.bands.clear();
        self.warned_targets.clear();
        for config in configs {
            self.next_id += 1;
            self.bands.insert(
                self.next_id,
                BandState {
                    config,
                    smoothed: 0.0,
                },
            );
        }
    }

    /// Run every band against one spectrum frame and apply the results.
    /// Returns the number of parameters actually applied.
    pub fn process_frame(
        &mut self,
        frame: &SpectrumFrame,
        registry: &mut ParameterRegistry,
        scene: &mut dyn Scene,
    ) -> usize {
        let mut applied = 0;
        for state in self.bands.values_mut() {
            let value = Self::sample_band(state, frame);
            let Some(target) = state.config.target.clone() else {
                continue;
            };
            match registry.apply_unit(&target, value, scene) {
                Ok(_) => applied += 1,
                Err(e) => {
                    if !self.warned_targets.contains(&target) {
                        warn!(
                            "Skipping audio updates for '{}': {}",
                            target, e
                        );
                        self.warned_targets.insert(target);
                    }
                }
            }
        }
        applied
    }

    fn sample_band(state: &mut BandState, frame: &SpectrumFrame) -> f32 {
        let resolution = frame.bin_resolution();
        let bins = frame.magnitudes.len();
        if resolution <= 0.0 || bins == 0 {
            return 0.0;
        }

        let start =
            ((state.config.min_hz / resolution).floor() as usize).min(bins - 1);
        let end =
            ((state.config.max_hz / resolution).floor() as usize).min(bins - 1);

        let sample = if start > end {
            0.0
        } else {
            let slice = &frame.magnitudes[start..=end];
            slice.iter().sum::<f32>() / slice.len() as f32
        };

        state.smoothed = state.smoothed * EMA_PREVIOUS_WEIGHT
            + sample * EMA_SAMPLE_WEIGHT;

        let curved = state.config.curve.apply(state.smoothed);
        (curved * state.config.sensitivity).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::RecordingScene;

    fn flat_frame(magnitude: f32) -> SpectrumFrame {
        // 1024-bin FFT at 44100 Hz: 512 magnitude bins, ~43 Hz each
        SpectrumFrame {
            magnitudes: vec![magnitude; 512],
            sample_rate: 44100.0,
        }
    }

    fn band(min_hz: f32, max_hz: f32, sensitivity: f32) -> AudioBandConfig {
        AudioBandConfig {
            min_hz,
            max_hz,
            target: Some("light_intensity".to_string()),
            curve: ResponseCurve::Linear,
            sensitivity,
        }
    }

    #[test]
    fn converges_to_sensitivity_scaled_average() {
        let mut sampler = AudioBandSampler::new();
        sampler.add(band(250.0, 500.0, 2.0)).unwrap();

        let mut registry = ParameterRegistry::with_defaults();
        let mut scene = RecordingScene::default();
        let frame = flat_frame(0.5);

        let mut last = 0.0;
        for _ in 0..100 {
            sampler.process_frame(&frame, &mut registry, &mut scene);
            last = registry.normalize(
                "light_intensity",
                registry.get("light_intensity").unwrap(),
            )
            .unwrap();
        }

        // clamp(0.5 * 2.0) = 1.0 once the EMA has settled
        assert!((last - 1.0).abs() < 1e-3, "got {}", last);
    }

    #[test]
    fn ema_rises_gradually() {
        let mut sampler = AudioBandSampler::new();
        let id = sampler.add(band(0.0, 22050.0, 1.0)).unwrap();

        let frame = flat_frame(1.0);
        let mut registry = ParameterRegistry::with_defaults();
        let mut scene = RecordingScene::default();

        sampler.process_frame(&frame, &mut registry, &mut scene);
        let first = sampler.bands.get(&id).unwrap().smoothed;
        assert!((first - 0.2).abs() < 1e-6);

        sampler.process_frame(&frame, &mut registry, &mut scene);
        let second = sampler.bands.get(&id).unwrap().smoothed;
        assert!(second > first && second < 1.0);
    }

    #[test]
    fn curves_shape_the_smoothed_value() {
        assert_eq!(ResponseCurve::Linear.apply(0.5), 0.5);
        assert_eq!(ResponseCurve::Exponential.apply(0.5), 0.25);
        assert!((ResponseCurve::Logarithmic.apply(1.0) - 1.0).abs() < 1e-6);
        assert!((ResponseCurve::Sine.apply(0.5) - 1.0).abs() < 1e-6);
        assert!(ResponseCurve::Sine.apply(0.0).abs() < 1e-6);
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let mut sampler = AudioBandSampler::new();
        assert!(matches!(
            sampler.add(band(500.0, 250.0, 1.0)),
            Err(BandError::InvalidRange(..))
        ));
        assert!(matches!(
            sampler.add(band(20.0, 200.0, 2.5)),
            Err(BandError::InvalidSensitivity(..))
        ));
        assert!(matches!(
            band(20.0, 30000.0, 1.0).validate(Some(22050.0)),
            Err(BandError::BeyondNyquist(..))
        ));
        // Without a live session the ceiling is provisional
        assert!(band(20.0, 30000.0, 1.0).validate(None).is_ok());
    }

    #[test]
    fn zero_sensitivity_is_inert() {
        let mut sampler = AudioBandSampler::new();
        sampler.add(band(0.0, 22050.0, 0.0)).unwrap();

        let mut registry = ParameterRegistry::with_defaults();
        let mut scene = RecordingScene::default();
        for _ in 0..50 {
            sampler.process_frame(&flat_frame(1.0), &mut registry, &mut scene);
        }
        assert_eq!(registry.get("light_intensity"), Some(0.0));
    }

    #[test]
    fn each_skipped_target_is_warned_about_separately() {
        let mut sampler = AudioBandSampler::new();
        for name in ["ghost_a", "ghost_b"] {
            let mut config = band(0.0, 1000.0, 1.0);
            config.target = Some(name.to_string());
            sampler.add(config).unwrap();
        }

        let mut registry = ParameterRegistry::with_defaults();
        let mut scene = RecordingScene::default();
        assert_eq!(
            sampler.process_frame(&flat_frame(1.0), &mut registry, &mut scene),
            0
        );
        assert!(sampler.warned_targets.contains("ghost_a"));
        assert!(sampler.warned_targets.contains("ghost_b"));

        // Repeat frames stay suppressed rather than re-warning
        sampler.process_frame(&flat_frame(1.0), &mut registry, &mut scene);
        assert_eq!(sampler.warned_targets.len(), 2);

        // A wholesale replacement resets the suppression
        sampler.replace_all(vec![]);
        assert!(sampler.warned_targets.is_empty());
    }

    #[test]
    fn removal_frees_the_registration() {
        let mut sampler = AudioBandSampler::new();
        let id = sampler.add(band(0.0, 1000.0, 1.0)).unwrap();
        let removed = sampler.remove(id).unwrap();
        assert_eq!(removed.target.as_deref(), Some("light_intensity"));
        assert!(sampler.is_empty());

        let mut registry = ParameterRegistry::with_defaults();
        let mut scene = RecordingScene::default();
        assert_eq!(
            sampler.process_frame(
                &flat_frame(1.0),
                &mut registry,
                &mut scene
            ),
            0
        );
    }
}
