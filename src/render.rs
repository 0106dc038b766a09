//! Audio Rendering
//!
//! Turns one node's modal state into samples. Each mode drives a sine carrier
//! from its own fixed-point phase accumulator. The carrier is offset by the
//! mode's complex argument, so phase drift caused by coupling is heard as
//! beating rather than as pure amplitude modulation.
//!
//! Modal state only changes at the control rate, so amplitudes are smoothed
//! per sample to keep block and tick boundaries click-free.

use crate::node::{ModalNode, MAX_MODES};
use core::f64::consts::{FRAC_PI_2, PI, TAU};
use serde::{Deserialize, Serialize};

/// One-pole smoothing coefficient applied per sample
const SMOOTHING: f64 = 0.12;

/// Per-mode headroom; also the upper clip of each mode's gain
const MAX_AMPLITUDE_SCALE: f64 = 0.7;

/// 2^32 as f64, the full turn of a phase accumulator
const PHASE_SCALE: f64 = 4_294_967_296.0;

/// How per-mode signals reach output channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMapping {
    /// Sum of all modes, duplicated onto every channel
    #[default]
    StereoMix,
    /// Mode k on channel k; channels past the mode count are silent
    ModePerChannel,
}

/// Sine approximation for audio carriers.
///
/// Reduces to [−π, π], folds into [−π/2, π/2] and evaluates a 9th-order
/// Taylor polynomial. Worst-case error is below 4e-6 and the result is
/// clamped to [−1, 1].
#[inline]
pub fn fast_sin(x: f64) -> f64 {
    if !x.is_finite() {
        return 0.0;
    }

    let mut x = x - TAU * libm::round(x / TAU);
    if x > FRAC_PI_2 {
        x = PI - x;
    } else if x < -FRAC_PI_2 {
        x = -PI - x;
    }

    let x2 = x * x;
    let y = x * (1.0 - x2 / 6.0 * (1.0 - x2 / 20.0 * (1.0 - x2 / 42.0 * (1.0 - x2 / 72.0))));
    y.clamp(-1.0, 1.0)
}

/// Per-node audio renderer
#[derive(Debug, Clone)]
pub struct AudioRenderer {
    sample_rate: f64,
    mapping: OutputMapping,
    phase: [u32; MAX_MODES],
    smoothed: [f64; MAX_MODES],
    mode_gains: [f64; MAX_MODES],
    master_gain: f64,
    muted: bool,
    initialized: bool,
}

impl AudioRenderer {
    /// A renderer with a non-finite or non-positive sample rate stays
    /// uninitialized and renders silence.
    pub fn new(sample_rate: f64, mapping: OutputMapping) -> Self {
        Self {
            sample_rate,
            mapping,
            phase: [0; MAX_MODES],
            smoothed: [0.0; MAX_MODES],
            mode_gains: [1.0; MAX_MODES],
            master_gain: 1.0,
            muted: false,
            initialized: sample_rate.is_finite() && sample_rate > 0.0,
        }
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn mapping(&self) -> OutputMapping {
        self.mapping
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// Clamped to [0, 1]; non-finite values are ignored
    pub fn set_master_gain(&mut self, gain: f64) {
        if gain.is_finite() {
            self.master_gain = gain.clamp(0.0, 1.0);
        }
    }

    pub fn master_gain(&self) -> f64 {
        self.master_gain
    }

    /// Clamped to [0, 1]; bad indices and non-finite values are ignored
    pub fn set_mode_gain(&mut self, index: usize, gain: f64) {
        if !gain.is_finite() {
            return;
        }
        if let Some(slot) = self.mode_gains.get_mut(index) {
            *slot = gain.clamp(0.0, 1.0);
        }
    }

    pub fn mode_gain(&self, index: usize) -> Option<f64> {
        self.mode_gains.get(index).copied()
    }

    /// Zero phases and smoothed amplitudes
    pub fn reset(&mut self) {
        self.phase = [0; MAX_MODES];
        self.smoothed = [0.0; MAX_MODES];
    }

    /// Render `node` into `outputs`.
    ///
    /// The frame count is the shortest output slice. Every frame up to that
    /// count is written on every channel, so the caller does not need to
    /// clear the buffers first.
    pub fn render(&mut self, node: &ModalNode, outputs: &mut [&mut [f32]]) {
        let frames = outputs.iter().map(|c| c.len()).min().unwrap_or(0);

        if self.muted || !self.initialized {
            for channel in outputs.iter_mut() {
                channel.fill(0.0);
            }
            return;
        }

        // Node state is frozen for the duration of a block
        let mut increment = [0u32; MAX_MODES];
        let mut target = [0.0f64; MAX_MODES];
        let mut offset = [0.0f64; MAX_MODES];
        let mut active = [false; MAX_MODES];
        for (k, mode) in node.modes().iter().enumerate() {
            active[k] = mode.is_active();
            if !active[k] {
                self.smoothed[k] = 0.0;
                continue;
            }
            let cycles = (mode.omega() / TAU / self.sample_rate).rem_euclid(1.0);
            increment[k] = (cycles * PHASE_SCALE) as u32;
            target[k] = mode.amplitude().norm() * mode.weight();
            offset[k] = mode.amplitude().arg();
        }

        for frame in 0..frames {
            let mut per_mode = [0.0f64; MAX_MODES];

            for k in 0..MAX_MODES {
                if !active[k] {
                    continue;
                }
                self.smoothed[k] += SMOOTHING * (target[k] - self.smoothed[k]);

                let gain = (self.smoothed[k] * self.mode_gains[k] * self.master_gain * MAX_AMPLITUDE_SCALE)
                    .clamp(0.0, MAX_AMPLITUDE_SCALE);
                let angle = self.phase[k] as f64 * (TAU / PHASE_SCALE) + offset[k];
                per_mode[k] = gain * fast_sin(angle);

                self.phase[k] = self.phase[k].wrapping_add(increment[k]);
            }

            match self.mapping {
                OutputMapping::StereoMix => {
                    let mixed = per_mode.iter().sum::<f64>() as f32;
                    for channel in outputs.iter_mut() {
                        channel[frame] = mixed;
                    }
                }
                OutputMapping::ModePerChannel => {
                    for (c, channel) in outputs.iter_mut().enumerate() {
                        channel[frame] = per_mode.get(c).copied().unwrap_or(0.0) as f32;
                    }
                }
            }
        }
    }

    /// Render into a left/right pair
    pub fn render_stereo(&mut self, node: &ModalNode, left: &mut [f32], right: &mut [f32]) {
        let mut outputs: [&mut [f32]; 2] = [left, right];
        self.render(node, &mut outputs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{frequency_to_omega, Personality, PhaseHint, PokeEvent};
    use crate::rng::Rng;
    use approx::assert_abs_diff_eq;

    fn excited_node() -> ModalNode {
        let mut node = ModalNode::with_rng(0, Personality::Resonator, Rng::from_seed(5));
        node.configure_mode(0, frequency_to_omega(440.0), 0.5, 1.0);
        node.configure_mode(1, frequency_to_omega(880.0), 0.5, 0.5);
        node.start();
        node.apply_poke(&PokeEvent::new(0, 1.0).with_phase(PhaseHint::Fixed(0.3)));
        for _ in 0..10 {
            node.step();
        }
        node
    }

    #[test]
    fn test_fast_sin_accuracy() {
        let mut x = -20.0;
        while x < 20.0 {
            assert_abs_diff_eq!(fast_sin(x), x.sin(), epsilon = 1e-5);
            x += 0.01;
        }
    }

    #[test]
    fn test_fast_sin_bounds() {
        for i in 0..10_000 {
            let x = i as f64 * 0.001 * PI;
            let y = fast_sin(x);
            assert!((-1.0..=1.0).contains(&y));
        }
        assert_eq!(fast_sin(f64::NAN), 0.0);
    }

    #[test]
    fn test_render_split_matches_single_block() {
        let node = excited_node();
        let mut single = AudioRenderer::new(48000.0, OutputMapping::StereoMix);
        let mut split = single.clone();

        let mut left_a = vec![0.0f32; 512];
        let mut right_a = vec![0.0f32; 512];
        single.render_stereo(&node, &mut left_a, &mut right_a);

        let mut left_b = vec![0.0f32; 512];
        let mut right_b = vec![0.0f32; 512];
        {
            let (l1, l2) = left_b.split_at_mut(128);
            let (r1, r2) = right_b.split_at_mut(128);
            split.render_stereo(&node, l1, r1);
            split.render_stereo(&node, l2, r2);
        }

        for i in 0..512 {
            assert_abs_diff_eq!(left_a[i], left_b[i], epsilon = 1e-6);
            assert_abs_diff_eq!(right_a[i], right_b[i], epsilon = 1e-6);
        }
        assert!(left_a.iter().any(|&s| s != 0.0));
    }

    #[test]
    fn test_stereo_channels_identical() {
        let node = excited_node();
        let mut renderer = AudioRenderer::new(44100.0, OutputMapping::StereoMix);
        let mut left = [0.0f32; 256];
        let mut right = [1.0f32; 256];

        renderer.render_stereo(&node, &mut left, &mut right);

        assert_eq!(left, right);
        assert!(left.iter().all(|s| s.abs() <= 1.0));
    }

    #[test]
    fn test_muted_renders_silence() {
        let node = excited_node();
        let mut renderer = AudioRenderer::new(48000.0, OutputMapping::StereoMix);
        renderer.set_muted(true);
        let mut left = [0.5f32; 64];
        let mut right = [0.5f32; 64];

        renderer.render_stereo(&node, &mut left, &mut right);

        assert!(left.iter().chain(right.iter()).all(|&s| s == 0.0));
    }

    #[test]
    fn test_uninitialized_renders_silence() {
        let node = excited_node();
        for rate in [0.0, -1.0, f64::NAN] {
            let mut renderer = AudioRenderer::new(rate, OutputMapping::StereoMix);
            assert!(!renderer.is_initialized());
            let mut left = [0.5f32; 16];
            let mut right = [0.5f32; 16];
            renderer.render_stereo(&node, &mut left, &mut right);
            assert!(left.iter().chain(right.iter()).all(|&s| s == 0.0));
        }
    }

    #[test]
    fn test_mode_per_channel_routes_modes() {
        let node = excited_node();
        let mut renderer = AudioRenderer::new(48000.0, OutputMapping::ModePerChannel);
        let mut channels = [[0.0f32; 128]; 5];
        {
            let [c0, c1, c2, c3, c4] = &mut channels;
            let mut outputs: [&mut [f32]; 5] = [c0, c1, c2, c3, c4];
            renderer.render(&node, &mut outputs);
        }

        assert!(channels[0].iter().any(|&s| s != 0.0));
        assert!(channels[1].iter().any(|&s| s != 0.0));
        // modes 2 and 3 are inactive, channel 4 has no mode
        assert!(channels[2].iter().all(|&s| s == 0.0));
        assert!(channels[3].iter().all(|&s| s == 0.0));
        assert!(channels[4].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_mode_gain_zero_silences_mode() {
        let node = excited_node();
        let mut renderer = AudioRenderer::new(48000.0, OutputMapping::ModePerChannel);
        renderer.set_mode_gain(0, 0.0);
        renderer.set_mode_gain(9, 0.5);
        let mut c0 = [0.0f32; 64];
        let mut c1 = [0.0f32; 64];
        renderer.render_stereo(&node, &mut c0, &mut c1);

        assert!(c0.iter().all(|&s| s == 0.0));
        assert!(c1.iter().any(|&s| s != 0.0));
        assert_eq!(renderer.mode_gain(9), None);
    }

    #[test]
    fn test_master_gain_clamped() {
        let mut renderer = AudioRenderer::new(48000.0, OutputMapping::StereoMix);
        renderer.set_master_gain(3.0);
        assert_abs_diff_eq!(renderer.master_gain(), 1.0);
        renderer.set_master_gain(f64::NAN);
        assert_abs_diff_eq!(renderer.master_gain(), 1.0);
    }
}
