//! Live audio input and spectrum analysis.
//!
//! [`AudioInput`] owns a cpal input stream feeding a fixed-size sample
//! ring; [`SpectrumFrame`]s are computed on demand with rustfft and carry
//! unit-scaled magnitudes. The control core consumes this only through
//! the [`SpectrumSource`] trait, polled once per render frame.

use cpal::traits::*;
use cpal::{Device, Stream, StreamConfig};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::cmp::Ordering;
use std::error::Error;
use std::sync::{Arc, Mutex};

use crate::core::prelude::*;

pub const FFT_SIZE: usize = 1024;

// Magnitudes are folded from dB into [0, 1] over this window
const DB_FLOOR: f32 = -80.0;
const DB_RANGE: f32 = 60.0;

/// One spectrum snapshot. `magnitudes` spans DC to Nyquist with
/// `sample_rate / (2 * magnitudes.len())` Hz per bin, each value already
/// scaled to [0, 1].
#[derive(Clone, Debug)]
pub struct SpectrumFrame {
    pub magnitudes: Vec<f32>,
    pub sample_rate: f32,
}

impl SpectrumFrame {
    pub fn bin_resolution(&self) -> f32 {
        if self.magnitudes.is_empty() {
            return 0.0;
        }
        self.sample_rate / (2.0 * self.magnitudes.len() as f32)
    }

    pub fn nyquist(&self) -> f32 {
        self.sample_rate / 2.0
    }
}

/// The audio frontend collaborator as the control core sees it.
pub trait SpectrumSource {
    fn spectrum(&self) -> Option<SpectrumFrame>;
    fn is_active(&self) -> bool;
    /// Known only while a live session exists.
    fn nyquist(&self) -> Option<f32>;
}

#[derive(Default)]
pub struct AudioInput {
    processor: Arc<Mutex<SpectrumProcessor>>,
    device_name: Option<String>,
    stream: Option<Stream>,
    active: bool,
}

impl AudioInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_device_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        self.device_name = if name.is_empty() { None } else { Some(name) };
    }

    pub fn start(&mut self) -> Result<(), Box<dyn Error>> {
        let Some(device_name) = self.device_name.clone() else {
            warn!("Skipping audio setup; no audio device selected.");
            return Ok(());
        };

        let (device, stream_config) =
            Self::device_and_stream_config(&device_name)?;

        {
            let mut processor = self.processor.lock().unwrap();
            processor.initialize(stream_config.sample_rate.0 as usize);
        }

        let shared = self.processor.clone();
        let channels = stream_config.channels;

        if channels < 1 {
            return Err("Device must have at least one channel".into());
        }

        let stream = device.build_input_stream(
            &stream_config,
            move |data: &[f32], _| {
                let left_channel: Vec<f32> =
                    data.iter().step_by(channels as usize).copied().collect();
                let mut processor = shared.lock().unwrap();
                processor.add_samples(&left_channel);
            },
            move |err| error!("Error in audio stream: {}", err),
            None,
        )?;

        stream.play()?;
        self.stream = Some(stream);
        self.active = true;
        info!(
            "Audio connected to device: {:?}",
            device.name().unwrap_or_else(|_| "Unknown".to_string())
        );

        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(_stream) = self.stream.take() {
            self.active = false;
            debug!("Audio stream stopped");
        }
    }

    pub fn restart(&mut self) -> Result<(), Box<dyn Error>> {
        self.stop();
        std::thread::sleep(std::time::Duration::from_millis(10));
        self.start()
    }

    fn device_and_stream_config(
        device_name: &str,
    ) -> Result<(Device, StreamConfig), Box<dyn Error>> {
        let host = cpal::default_host();
        let device = host
            .input_devices()?
            .find(|d| d.name().map(|n| n == device_name).unwrap_or(false))
            .ok_or_else(|| {
                Box::<dyn Error>::from(format!(
                    "Audio device '{}' not found",
                    device_name
                ))
            })?;

        let stream_config = device.default_input_config()?.into();
        Ok((device, stream_config))
    }
}

impl SpectrumSource for AudioInput {
    fn spectrum(&self) -> Option<SpectrumFrame> {
        if !self.active {
            return None;
        }
        let processor = self.processor.lock().unwrap();
        processor.frame()
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn nyquist(&self) -> Option<f32> {
        if !self.active {
            return None;
        }
        let processor = self.processor.lock().unwrap();
        Some(processor.sample_rate as f32 / 2.0)
    }
}

struct SpectrumProcessor {
    sample_rate: usize,
    buffer: Vec<f32>,
    fft: Option<Arc<dyn Fft<f32>>>,
}

impl Default for SpectrumProcessor {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            buffer: Vec::new(),
            fft: None,
        }
    }
}

impl SpectrumProcessor {
    fn initialize(&mut self, sample_rate: usize) {
        self.sample_rate = sample_rate;
        self.buffer = vec![0.0; FFT_SIZE];
        let mut planner = FftPlanner::new();
        self.fft = Some(planner.plan_fft_forward(FFT_SIZE));
    }

    fn add_samples(&mut self, samples: &[f32]) {
        self.buffer.extend_from_slice(samples);

        match self.buffer.len().cmp(&FFT_SIZE) {
            Ordering::Greater => {
                self.buffer.drain(0..(self.buffer.len() - FFT_SIZE));
            }
            Ordering::Less => {
                while self.buffer.len() < FFT_SIZE {
                    self.buffer.push(0.0);
                }
            }
            Ordering::Equal => {}
        }
    }

    fn frame(&self) -> Option<SpectrumFrame> {
        let fft = self.fft.as_ref()?;

        let mut complex_input: Vec<Complex<f32>> = self
            .buffer
            .iter()
            .map(|&x| Complex::new(x, 0.0))
            .collect();
        fft.process(&mut complex_input);

        let magnitudes: Vec<f32> = complex_input
            .iter()
            .take(FFT_SIZE / 2)
            .map(|c| {
                let magnitude = c.norm() / complex_input.len() as f32;
                let db = 20.0 * (magnitude.max(1e-8)).log10();
                ((db - DB_FLOOR) / DB_RANGE).clamp(0.0, 1.0)
            })
            .collect();

        Some(SpectrumFrame {
            magnitudes,
            sample_rate: self.sample_rate as f32,
        })
    }
}

pub fn list_audio_devices() -> Result<Vec<String>, Box<dyn Error>> {
    let audio_host = cpal::default_host();
    let devices = audio_host.input_devices()?;
    let info = devices
        .map(|device| {
            let name = device.name()?;
            Ok::<String, Box<dyn Error>>(name)
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bin_resolution_matches_fft_layout() {
        let frame = SpectrumFrame {
            magnitudes: vec![0.0; 512],
            sample_rate: 44100.0,
        };
        assert!((frame.bin_resolution() - 43.066).abs() < 0.01);
        assert_eq!(frame.nyquist(), 22050.0);
    }

    #[test]
    fn sine_input_peaks_in_the_expected_bin() {
        let mut processor = SpectrumProcessor::default();
        processor.initialize(48000);

        // Exactly 20 cycles per window, so the energy lands in one bin
        let freq = 48000.0 * 20.0 / FFT_SIZE as f32;
        let samples: Vec<f32> = (0..FFT_SIZE)
            .map(|i| {
                (2.0 * std::f32::consts::PI * freq * i as f32 / 48000.0).sin()
            })
            .collect();
        processor.add_samples(&samples);

        let frame = processor.frame().unwrap();
        let peak_bin = frame
            .magnitudes
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(Ordering::Equal))
            .map(|(i, _)| i)
            .unwrap();

        let expected = (freq / frame.bin_resolution()).round() as usize;
        assert!(
            peak_bin.abs_diff(expected) <= 1,
            "peak at bin {}, expected ~{}",
            peak_bin,
            expected
        );
    }

    #[test]
    fn ring_buffer_keeps_the_newest_samples() {
        let mut processor = SpectrumProcessor::default();
        processor.initialize(48000);

        processor.add_samples(&vec![1.0; FFT_SIZE]);
        processor.add_samples(&vec![2.0; 8]);

        assert_eq!(processor.buffer.len(), FFT_SIZE);
        assert_eq!(processor.buffer[FFT_SIZE - 1], 2.0);
        assert_eq!(processor.buffer[0], 1.0);
    }

    #[test]
    fn frame_is_unavailable_before_initialize() {
        let processor = SpectrumProcessor::default();
        assert!(processor.frame().is_none());
    }
}
