//! # Spectrum Module
//!
//! FFT magnitude spectra and spectral frequency refinement.
//!
//! The YIN estimate is accurate to a fraction of a sample of lag, which is
//! coarse for high notes. When enabled, the estimator hands its result to
//! [`SpectrumAnalyzer::refine`], which looks for the spectral peak next to the
//! estimate and interpolates it on a log scale.
//!
//! ## Features
//! - High-performance FFT using RustFFT, plan cached per analyzer
//! - DC offset removal and Hann windowing
//! - Zero padding to twice the frame length for finer bins

use rustfft::{Fft, FftPlanner, num_complex::Complex};
use std::sync::Arc;

/// Bins searched either side of the rough estimate.
const PEAK_SEARCH_BINS: f32 = 2.0;

/// Centers `frame` on zero and tapers it with a Hann window.
fn condition(frame: &mut [f32]) {
    let n = frame.len();
    if n < 2 {
        return;
    }
    let mean = frame.iter().sum::<f32>() / n as f32;
    let step = 2.0 * std::f32::consts::PI / (n - 1) as f32;
    for (i, sample) in frame.iter_mut().enumerate() {
        let hann = 0.5 - 0.5 * (step * i as f32).cos();
        *sample = (*sample - mean) * hann;
    }
}

/// Reusable FFT state for one frame length.
pub struct SpectrumAnalyzer {
    frame_len: usize,
    fft_len: usize,
    fft: Arc<dyn Fft<f32>>,
    windowed: Vec<f32>,
    buffer: Vec<Complex<f32>>,
    magnitudes: Vec<f32>,
}

impl std::fmt::Debug for SpectrumAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectrumAnalyzer")
            .field("frame_len", &self.frame_len)
            .field("fft_len", &self.fft_len)
            .finish()
    }
}

impl SpectrumAnalyzer {
    pub fn new(frame_len: usize) -> Self {
        let fft_len = (frame_len.max(1) * 2).next_power_of_two();
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_len);
        Self {
            frame_len,
            fft_len,
            fft,
            windowed: vec![0.0; frame_len],
            buffer: vec![Complex { re: 0.0, im: 0.0 }; fft_len],
            magnitudes: vec![0.0; fft_len / 2],
        }
    }

    pub fn fft_len(&self) -> usize {
        self.fft_len
    }

    /// Magnitude spectrum up to the Nyquist frequency.
    ///
    /// Uses the first `frame_len` samples of `signal`; shorter input is
    /// zero padded.
    pub fn magnitudes(&mut self, signal: &[f32]) -> &[f32] {
        let used = signal.len().min(self.frame_len);
        self.windowed.fill(0.0);
        self.windowed[..used].copy_from_slice(&signal[..used]);
        condition(&mut self.windowed[..used]);

        self.buffer.fill(Complex { re: 0.0, im: 0.0 });
        for (slot, &sample) in self.buffer.iter_mut().zip(self.windowed.iter()) {
            slot.re = sample;
        }
        self.fft.process(&mut self.buffer);

        for (magnitude, c) in self.magnitudes.iter_mut().zip(self.buffer.iter()) {
            *magnitude = c.norm();
        }
        &self.magnitudes
    }

    /// Refines `rough_freq` against the spectrum of `signal`.
    ///
    /// Returns `None` when no usable peak sits next to the estimate.
    pub fn refine(&mut self, signal: &[f32], sample_rate: f32, rough_freq: f32) -> Option<f32> {
        if rough_freq <= 0.0 || sample_rate <= 0.0 {
            return None;
        }
        self.magnitudes(signal);
        let bin_width = sample_rate / self.fft_len as f32;
        let peak = self.loudest_bin_near(rough_freq / bin_width)?;
        let shift = self.log_vertex(peak)?;
        let refined = (peak as f32 + shift) * bin_width;
        (refined.is_finite() && refined > 0.0).then_some(refined)
    }

    /// Loudest interior bin within `PEAK_SEARCH_BINS` of `center`.
    fn loudest_bin_near(&self, center: f32) -> Option<usize> {
        let last = self.magnitudes.len().checked_sub(1)?;
        let lo = ((center - PEAK_SEARCH_BINS).max(1.0) as usize).min(last);
        let hi = ((center + PEAK_SEARCH_BINS).max(0.0) as usize).min(last.saturating_sub(1));
        (lo..=hi).max_by(|&a, &b| self.magnitudes[a].total_cmp(&self.magnitudes[b]))
    }

    /// Offset of the parabola vertex through the log magnitudes around `bin`.
    fn log_vertex(&self, bin: usize) -> Option<f32> {
        let [left, mid, right] = [bin - 1, bin, bin + 1].map(|b| self.magnitudes[b].ln());
        if !(left.is_finite() && mid.is_finite() && right.is_finite()) {
            return None;
        }
        let curvature = 2.0 * mid - left - right;
        if curvature < 1e-6 {
            // Flat or a valley, not a peak.
            return None;
        }
        Some(0.5 * (right - left) / curvature)
    }
}
