//! Engine Parameters
//!
//! The automatable parameter table (ids, ranges, defaults, units) and a
//! lock-free store that a host thread writes and the engine polls once per
//! render call.
//!
//! Parameter values are always in plain units. Out-of-range, non-finite and
//! read-only writes are rejected rather than clamped, so stray automation
//! values never reach the engine.

use crate::io::AtomicF64;
use crate::node::{DEFAULT_POKE_DURATION_MS, MAX_POKE_DURATION_MS, MIN_POKE_DURATION_MS};
use crate::polyphony::{DEFAULT_MODE_TEMPLATES, DEFAULT_POLYPHONY, MAX_POLYPHONY};
use crate::topology::DEFAULT_COUPLING_STRENGTH;
use core::sync::atomic::{AtomicU64, Ordering};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Default master gain
pub const DEFAULT_MASTER_GAIN: f64 = 0.7;

/// Default scale from note velocity to poke strength
pub const DEFAULT_POKE_STRENGTH: f64 = 1.0;

/// Automatable parameter identifiers, in host order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum ParamId {
    MasterGain = 0,
    CouplingStrength,
    Topology,
    Mode0Frequency,
    Mode0Damping,
    Mode0Weight,
    Mode1Frequency,
    Mode1Damping,
    Mode1Weight,
    Mode2Frequency,
    Mode2Damping,
    Mode2Weight,
    Mode3Frequency,
    Mode3Damping,
    Mode3Weight,
    PokeStrength,
    PokeDuration,
    Polyphony,
    Personality,
}

/// Which field of a mode template a per-mode parameter addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeParam {
    /// Frequency ratio to the note fundamental
    Frequency,
    Damping,
    Weight,
}

impl ParamId {
    pub const COUNT: usize = 19;

    pub const ALL: [ParamId; Self::COUNT] = [
        ParamId::MasterGain,
        ParamId::CouplingStrength,
        ParamId::Topology,
        ParamId::Mode0Frequency,
        ParamId::Mode0Damping,
        ParamId::Mode0Weight,
        ParamId::Mode1Frequency,
        ParamId::Mode1Damping,
        ParamId::Mode1Weight,
        ParamId::Mode2Frequency,
        ParamId::Mode2Damping,
        ParamId::Mode2Weight,
        ParamId::Mode3Frequency,
        ParamId::Mode3Damping,
        ParamId::Mode3Weight,
        ParamId::PokeStrength,
        ParamId::PokeDuration,
        ParamId::Polyphony,
        ParamId::Personality,
    ];

    pub fn from_index(index: u32) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    pub fn index(self) -> u32 {
        self as u32
    }

    /// Mode index and field for per-mode parameters
    pub fn mode_param(self) -> Option<(usize, ModeParam)> {
        let index = self.index();
        let first = ParamId::Mode0Frequency.index();
        let last = ParamId::Mode3Weight.index();
        if !(first..=last).contains(&index) {
            return None;
        }
        let offset = (index - first) as usize;
        let field = match offset % 3 {
            0 => ModeParam::Frequency,
            1 => ModeParam::Damping,
            _ => ModeParam::Weight,
        };
        Some((offset / 3, field))
    }

    /// Can this parameter change after construction?
    pub fn is_writable(self) -> bool {
        self != ParamId::Polyphony
    }

    pub fn info(self) -> ParameterInfo {
        match self {
            ParamId::MasterGain => ParameterInfo::new(self, "Master Gain", 0.0, 1.0, DEFAULT_MASTER_GAIN),
            ParamId::CouplingStrength => {
                ParameterInfo::new(self, "Coupling Strength", 0.0, 1.0, DEFAULT_COUPLING_STRENGTH)
            }
            ParamId::Topology => ParameterInfo::new(self, "Topology", 0.0, 6.0, 0.0).with_steps(6),
            ParamId::PokeStrength => ParameterInfo::new(self, "Poke Strength", 0.0, 1.0, DEFAULT_POKE_STRENGTH),
            ParamId::PokeDuration => ParameterInfo::new(
                self,
                "Poke Duration",
                MIN_POKE_DURATION_MS,
                MAX_POKE_DURATION_MS,
                DEFAULT_POKE_DURATION_MS,
            )
            .with_unit("ms"),
            ParamId::Polyphony => ParameterInfo::new(
                self,
                "Polyphony",
                1.0,
                MAX_POLYPHONY as f64,
                DEFAULT_POLYPHONY as f64,
            )
            .with_steps(MAX_POLYPHONY as u32 - 1),
            ParamId::Personality => ParameterInfo::new(self, "Personality", 0.0, 1.0, 0.0).with_steps(1),
            _ => {
                let (mode, field) = self.mode_param().unwrap_or((0, ModeParam::Frequency));
                let template = DEFAULT_MODE_TEMPLATES[mode];
                let (name, min, max, default, unit) = match field {
                    ModeParam::Frequency => (MODE_FREQUENCY_NAMES[mode], 0.5, 8.0, template.ratio, "x"),
                    ModeParam::Damping => (MODE_DAMPING_NAMES[mode], 0.1, 5.0, template.damping, "1/s"),
                    ModeParam::Weight => (MODE_WEIGHT_NAMES[mode], 0.0, 1.0, template.weight, ""),
                };
                ParameterInfo::new(self, name, min, max, default).with_unit(unit)
            }
        }
    }
}

const MODE_FREQUENCY_NAMES: [&str; 4] = [
    "Mode 1 Frequency",
    "Mode 2 Frequency",
    "Mode 3 Frequency",
    "Mode 4 Frequency",
];
const MODE_DAMPING_NAMES: [&str; 4] = ["Mode 1 Damping", "Mode 2 Damping", "Mode 3 Damping", "Mode 4 Damping"];
const MODE_WEIGHT_NAMES: [&str; 4] = ["Mode 1 Weight", "Mode 2 Weight", "Mode 3 Weight", "Mode 4 Weight"];

/// Parameter definition
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterInfo {
    pub id: ParamId,
    /// Display name
    pub name: &'static str,
    pub min: f64,
    pub max: f64,
    pub default: f64,
    /// Unit label (e.g. "ms")
    pub unit: &'static str,
    /// Number of steps (0 = continuous)
    pub steps: u32,
}

impl ParameterInfo {
    const fn new(id: ParamId, name: &'static str, min: f64, max: f64, default: f64) -> Self {
        Self {
            id,
            name,
            min,
            max,
            default,
            unit: "",
            steps: 0,
        }
    }

    const fn with_unit(mut self, unit: &'static str) -> Self {
        self.unit = unit;
        self
    }

    const fn with_steps(mut self, steps: u32) -> Self {
        self.steps = steps;
        self
    }

    pub fn is_discrete(&self) -> bool {
        self.steps > 0
    }

    /// Is `value` finite and within [min, max]?
    pub fn accepts(&self, value: f64) -> bool {
        value.is_finite() && value >= self.min && value <= self.max
    }

    /// Normalize a value to 0.0-1.0 range
    pub fn normalize(&self, value: f64) -> f64 {
        ((value - self.min) / (self.max - self.min)).clamp(0.0, 1.0)
    }

    /// Denormalize from 0.0-1.0 to parameter range
    pub fn denormalize(&self, normalized: f64) -> f64 {
        self.min + normalized.clamp(0.0, 1.0) * (self.max - self.min)
    }

    /// Quantize to steps (if discrete)
    pub fn quantize(&self, value: f64) -> f64 {
        if self.steps == 0 {
            return value;
        }
        let step_size = (self.max - self.min) / self.steps as f64;
        let steps = libm::round((value - self.min) / step_size);
        self.min + steps * step_size
    }
}

/// Every parameter definition in host order
pub fn parameters() -> impl Iterator<Item = ParameterInfo> {
    ParamId::ALL.into_iter().map(ParamId::info)
}

#[derive(Debug)]
struct SharedState {
    values: [AtomicF64; ParamId::COUNT],
    generation: AtomicU64,
}

/// Lock-free parameter store shared between a host thread and the engine.
///
/// Cloning shares the same storage.
#[derive(Debug, Clone)]
pub struct SharedParameters {
    state: Arc<SharedState>,
}

impl SharedParameters {
    /// A store holding every parameter's default
    pub fn new() -> Self {
        let values = core::array::from_fn(|i| AtomicF64::new(ParamId::ALL[i].info().default));
        Self {
            state: Arc::new(SharedState {
                values,
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Write a plain value. Returns false (and stores nothing) for read-only
    /// parameters and for non-finite or out-of-range values.
    pub fn set(&self, id: ParamId, value: f64) -> bool {
        let info = id.info();
        if !id.is_writable() || !info.accepts(value) {
            return false;
        }
        self.state.values[id as usize].set(info.quantize(value));
        self.state.generation.fetch_add(1, Ordering::Release);
        true
    }

    /// Write a 0-1 host value
    pub fn set_normalized(&self, id: ParamId, normalized: f64) -> bool {
        if !normalized.is_finite() {
            return false;
        }
        self.set(id, id.info().denormalize(normalized))
    }

    /// Write by raw host index; unknown indices are rejected
    pub fn set_by_index(&self, index: u32, value: f64) -> bool {
        match ParamId::from_index(index) {
            Some(id) => self.set(id, value),
            None => false,
        }
    }

    pub fn get(&self, id: ParamId) -> f64 {
        self.state.values[id as usize].get()
    }

    pub fn get_normalized(&self, id: ParamId) -> f64 {
        id.info().normalize(self.get(id))
    }

    /// Incremented on every accepted write
    pub fn generation(&self) -> u64 {
        self.state.generation.load(Ordering::Acquire)
    }
}

impl Default for SharedParameters {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_parameter_table_is_consistent() {
        assert_eq!(parameters().count(), ParamId::COUNT);
        for (i, info) in parameters().enumerate() {
            assert_eq!(info.id.index() as usize, i);
            assert!(info.min < info.max, "{}", info.name);
            assert!(info.accepts(info.default), "{} default out of range", info.name);
        }
    }

    #[test]
    fn test_mode_param_mapping() {
        assert_eq!(ParamId::Mode0Frequency.mode_param(), Some((0, ModeParam::Frequency)));
        assert_eq!(ParamId::Mode1Damping.mode_param(), Some((1, ModeParam::Damping)));
        assert_eq!(ParamId::Mode3Weight.mode_param(), Some((3, ModeParam::Weight)));
        assert_eq!(ParamId::MasterGain.mode_param(), None);
        assert_eq!(ParamId::PokeStrength.mode_param(), None);
    }

    #[test]
    fn test_mode_defaults_follow_templates() {
        assert_abs_diff_eq!(ParamId::Mode1Frequency.info().default, 1.01);
        assert_abs_diff_eq!(ParamId::Mode2Damping.info().default, 0.8);
        assert_abs_diff_eq!(ParamId::Mode3Weight.info().default, 0.3);
    }

    #[test]
    fn test_normalize_denormalize() {
        let info = ParamId::PokeDuration.info();
        assert_abs_diff_eq!(info.normalize(1.0), 0.0);
        assert_abs_diff_eq!(info.normalize(50.0), 1.0);
        assert_abs_diff_eq!(info.denormalize(0.5), 25.5);
    }

    #[test]
    fn test_quantize_discrete() {
        let info = ParamId::Topology.info();
        assert_abs_diff_eq!(info.quantize(2.4), 2.0);
        assert_abs_diff_eq!(info.quantize(2.6), 3.0);

        let continuous = ParamId::MasterGain.info();
        assert_abs_diff_eq!(continuous.quantize(0.33), 0.33);
    }

    #[test]
    fn test_shared_parameters_rejects_bad_writes() {
        let params = SharedParameters::new();

        assert!(!params.set(ParamId::MasterGain, 1.5));
        assert!(!params.set(ParamId::MasterGain, f64::NAN));
        assert!(!params.set(ParamId::Polyphony, 8.0));
        assert!(!params.set_by_index(99, 0.5));
        assert_eq!(params.generation(), 0);
        assert_abs_diff_eq!(params.get(ParamId::MasterGain), DEFAULT_MASTER_GAIN);
    }

    #[test]
    fn test_shared_parameters_accepts_and_quantizes() {
        let params = SharedParameters::new();
        let host = params.clone();

        assert!(host.set(ParamId::Topology, 3.2));
        assert!(host.set_normalized(ParamId::CouplingStrength, 0.5));

        assert_abs_diff_eq!(params.get(ParamId::Topology), 3.0);
        assert_abs_diff_eq!(params.get(ParamId::CouplingStrength), 0.5);
        assert_abs_diff_eq!(params.get_normalized(ParamId::Topology), 0.5);
        assert_eq!(params.generation(), 2);
    }
}
