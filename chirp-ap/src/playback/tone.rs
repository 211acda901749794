//! Test-tone chirp generator
//!
//! Linear frequency sweep rendered as mono 16-bit PCM. Used to check the
//! output path without any file on storage.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::f32::consts::TAU;

/// Sweep parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChirpParams {
    pub start_hz: u32,
    pub end_hz: u32,
    pub duration_ms: u32,
    /// 0-255, 128 is roughly half scale
    pub volume: u8,
}

impl Default for ChirpParams {
    fn default() -> Self {
        Self {
            start_hz: 500,
            end_hz: 4000,
            duration_ms: 250,
            volume: 128,
        }
    }
}

/// Sweep generator state
#[derive(Debug, Clone)]
pub struct Chirp {
    params: ChirpParams,
    sample_rate: u32,
    total_samples: u64,
    position: u64,
    /// Radians, kept in [0, TAU)
    phase: f32,
}

impl Chirp {
    pub fn new(params: ChirpParams, sample_rate: u32) -> Result<Self> {
        let nyquist = sample_rate / 2;
        if sample_rate == 0 || params.duration_ms == 0 {
            return Err(Error::Config("Chirp needs a duration and sample rate".to_string()));
        }
        if params.start_hz == 0
            || params.end_hz == 0
            || params.start_hz > nyquist
            || params.end_hz > nyquist
        {
            return Err(Error::Config(format!(
                "Chirp sweep {}-{} Hz outside 1-{} Hz",
                params.start_hz, params.end_hz, nyquist
            )));
        }

        Ok(Self {
            params,
            sample_rate,
            total_samples: params.duration_ms as u64 * sample_rate as u64 / 1000,
            position: 0,
            phase: 0.0,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn total_samples(&self) -> u64 {
        self.total_samples
    }

    pub fn remaining(&self) -> u64 {
        self.total_samples - self.position
    }

    pub fn is_finished(&self) -> bool {
        self.position >= self.total_samples
    }

    /// Render up to `out.len()` samples; returns how many were written
    pub fn render(&mut self, out: &mut [i16]) -> usize {
        let n = (self.remaining() as usize).min(out.len());
        let amplitude = self.params.volume as f32 / 255.0 * i16::MAX as f32;
        let start = self.params.start_hz as f32;
        let span = self.params.end_hz as f32 - start;
        let total = self.total_samples as f32;
        let rate = self.sample_rate as f32;

        for sample in out[..n].iter_mut() {
            let progress = self.position as f32 / total;
            let freq = start + span * progress;
            *sample = (self.phase.sin() * amplitude) as i16;
            self.phase = (self.phase + TAU * freq / rate) % TAU;
            self.position += 1;
        }
        n
    }
}
