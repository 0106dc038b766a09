//! Modal Oscillator Node
//!
//! A node integrates up to four complex modes. Each mode evolves as
//!
//! ```text
//! ȧ_k = (−γ_eff + iω_k)·a_k + u_k(t)
//! ```
//!
//! where `u_k` is the forcing from the current excitation envelope. The linear
//! part is integrated exactly with `e^{λ·dt}`; the forcing enters with an
//! explicit Euler term. `SelfOscillator` nodes replace `γ` with a Van der Pol
//! style damping that is negative at low energy and positive at high energy,
//! so they settle on a bounded limit cycle without any external drive.
//!
//! Nothing here allocates, locks or logs: `step`, `apply_poke` and
//! `apply_coupling` are safe to call from the control cycle.

use crate::rng::Rng;
use core::f64::consts::TAU;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// Number of modes per node
pub const MAX_MODES: usize = 4;

/// Default control (integration) rate in Hz
pub const DEFAULT_CONTROL_RATE_HZ: f64 = 500.0;

/// Default excitation envelope length
pub const DEFAULT_POKE_DURATION_MS: f64 = 10.0;

/// Shortest accepted excitation envelope
pub const MIN_POKE_DURATION_MS: f64 = 1.0;

/// Longest accepted excitation envelope
pub const MAX_POKE_DURATION_MS: f64 = 50.0;

/// Scale of the immediate kick applied by a poke, ahead of the envelope
const KICK_SCALE: f64 = 0.1;

/// Divisor that maps the weighted mode sum onto a rough 0..1 loudness
const AMPLITUDE_NORMALIZATION: f64 = 2.0;

/// Amplitude at which the self-oscillator damping changes sign (scaled by √3)
const SATURATION_LEVEL: f64 = 1.0;

/// Nonlinear damping gain: γ_eff = −γ + NONLINEAR_GAIN·γ·|a|²/sat²
const NONLINEAR_GAIN: f64 = 3.0;

/// Per-component amplitude of the noise a fresh node starts with
const INITIAL_NOISE: f64 = 0.005;

/// Standard tuning reference: MIDI note 69 = A4 = 440 Hz
const A4_NOTE: f64 = 69.0;
const A4_FREQUENCY: f64 = 440.0;

/// Pitch bend range in semitones for a full-scale bend of ±1
pub const PITCH_BEND_SEMITONES: f64 = 2.0;

/// Behavioral class of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Personality {
    /// Decays to silence without forcing (percussive)
    #[default]
    Resonator,
    /// Sustains on a limit cycle (drone)
    SelfOscillator,
}

impl Personality {
    /// Map a discrete parameter index (0 or 1) to a personality
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Personality::Resonator),
            1 => Some(Personality::SelfOscillator),
            _ => None,
        }
    }

    /// Discrete parameter index of this personality
    pub fn index(self) -> u8 {
        match self {
            Personality::Resonator => 0,
            Personality::SelfOscillator => 1,
        }
    }
}

/// Phase of an excitation: a fixed angle, or a fresh random angle per draw
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum PhaseHint {
    #[default]
    Random,
    Fixed(f64),
}

impl PhaseHint {
    /// Decode the wire representation, where any negative value means random
    pub fn from_radians(value: f64) -> Self {
        if value.is_finite() && value >= 0.0 {
            PhaseHint::Fixed(value)
        } else {
            PhaseHint::Random
        }
    }

    /// Encode for the wire (random becomes the −1 sentinel)
    pub fn to_radians(self) -> f64 {
        match self {
            PhaseHint::Random => -1.0,
            PhaseHint::Fixed(phase) => phase,
        }
    }

    /// Resolve to a concrete angle, drawing from `rng` when random
    #[inline]
    pub fn resolve(self, rng: &mut Rng) -> f64 {
        match self {
            PhaseHint::Random => rng.next_phase(),
            PhaseHint::Fixed(phase) => phase,
        }
    }
}

/// A discrete excitation event
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PokeEvent {
    /// Sending node or voice
    pub source_id: u8,
    /// Excitation strength in [0, 1]
    pub strength: f64,
    pub phase: PhaseHint,
    /// Per-mode scaling of the immediate kick
    pub mode_weights: [f64; MAX_MODES],
}

impl PokeEvent {
    /// Poke with equal mode weighting and a random phase
    pub fn new(source_id: u8, strength: f64) -> Self {
        Self {
            source_id,
            strength,
            phase: PhaseHint::Random,
            mode_weights: [1.0; MAX_MODES],
        }
    }

    pub fn with_phase(mut self, phase: PhaseHint) -> Self {
        self.phase = phase;
        self
    }

    pub fn with_mode_weights(mut self, weights: [f64; MAX_MODES]) -> Self {
        self.mode_weights = weights;
        self
    }
}

/// One resonant partial
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mode {
    omega: f64,
    gamma: f64,
    weight: f64,
    active: bool,
    amplitude: Complex64,
}

impl Mode {
    const fn inactive() -> Self {
        Self {
            omega: 0.0,
            gamma: 0.0,
            weight: 0.0,
            active: false,
            amplitude: Complex64::new(0.0, 0.0),
        }
    }

    /// Angular frequency in rad/s
    pub fn omega(&self) -> f64 {
        self.omega
    }

    /// Frequency in Hz
    pub fn frequency(&self) -> f64 {
        self.omega / TAU
    }

    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    /// Audio weight in [0, 1]
    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Complex state amplitude
    pub fn amplitude(&self) -> Complex64 {
        self.amplitude
    }
}

/// Transient excitation overlay created by a poke
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExcitationEnvelope {
    strength: f64,
    duration_ms: f64,
    elapsed_ms: f64,
    phase: PhaseHint,
    active: bool,
}

impl ExcitationEnvelope {
    const fn idle() -> Self {
        Self {
            strength: 0.0,
            duration_ms: DEFAULT_POKE_DURATION_MS,
            elapsed_ms: 0.0,
            phase: PhaseHint::Random,
            active: false,
        }
    }

    pub fn strength(&self) -> f64 {
        self.strength
    }

    pub fn duration_ms(&self) -> f64 {
        self.duration_ms
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed_ms
    }

    pub fn phase(&self) -> PhaseHint {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Hann window over normalized elapsed time: 0 at both ends, 1 at the midpoint
    pub fn level(&self) -> f64 {
        hann(self.elapsed_ms / self.duration_ms)
    }
}

/// Hann window on t ∈ [0, 1]; zero outside
#[inline]
pub fn hann(t: f64) -> f64 {
    if !(0.0..=1.0).contains(&t) {
        return 0.0;
    }
    0.5 * (1.0 - libm::cos(TAU * t))
}

/// Equal-tempered frequency of a MIDI note (A4 = 69 = 440 Hz)
#[inline]
pub fn midi_note_to_frequency(note: u8) -> f64 {
    A4_FREQUENCY * libm::pow(2.0, (note as f64 - A4_NOTE) / 12.0)
}

/// Frequency ratio of a normalized pitch bend in [-1, 1] (±2 semitones)
#[inline]
pub fn pitch_bend_ratio(bend: f64) -> f64 {
    libm::pow(2.0, bend.clamp(-1.0, 1.0) * PITCH_BEND_SEMITONES / 12.0)
}

/// Hz to rad/s
#[inline]
pub fn frequency_to_omega(frequency: f64) -> f64 {
    TAU * frequency
}

#[inline]
fn effective_damping(personality: Personality, gamma: f64, amplitude: Complex64) -> f64 {
    match personality {
        Personality::Resonator => gamma,
        Personality::SelfOscillator => {
            let energy = amplitude.norm_sqr() / (SATURATION_LEVEL * SATURATION_LEVEL);
            -gamma + NONLINEAR_GAIN * gamma * energy
        }
    }
}

/// Four coupled-ready complex modes plus one excitation envelope
#[derive(Debug, Clone)]
pub struct ModalNode {
    id: u8,
    personality: Personality,
    modes: [Mode; MAX_MODES],
    excitation: ExcitationEnvelope,
    coupling_strength: f64,
    poke_duration_ms: f64,
    running: bool,
    step_count: u64,
    dt: f64,
    rng: Rng,
}

impl ModalNode {
    /// Create a stopped node with an entropy-seeded phase source
    pub fn new(id: u8, personality: Personality) -> Self {
        Self::with_rng(id, personality, Rng::from_entropy())
    }

    /// Create a stopped node drawing random phases from `rng`
    ///
    /// Every mode starts inactive with a tiny random amplitude.
    pub fn with_rng(id: u8, personality: Personality, mut rng: Rng) -> Self {
        let mut modes = [Mode::inactive(); MAX_MODES];
        for mode in &mut modes {
            mode.amplitude = Complex64::new(
                rng.next_f64_bipolar() * INITIAL_NOISE,
                rng.next_f64_bipolar() * INITIAL_NOISE,
            );
        }

        Self {
            id,
            personality,
            modes,
            excitation: ExcitationEnvelope::idle(),
            coupling_strength: 1.0,
            poke_duration_ms: DEFAULT_POKE_DURATION_MS,
            running: false,
            step_count: 0,
            dt: 1.0 / DEFAULT_CONTROL_RATE_HZ,
            rng,
        }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn personality(&self) -> Personality {
        self.personality
    }

    /// Takes effect on the next step
    pub fn set_personality(&mut self, personality: Personality) {
        self.personality = personality;
    }

    /// Integration rate in Hz; non-positive or non-finite values are ignored
    pub fn set_control_rate(&mut self, rate_hz: f64) {
        if rate_hz.is_finite() && rate_hz > 0.0 {
            self.dt = 1.0 / rate_hz;
        }
    }

    pub fn control_rate(&self) -> f64 {
        1.0 / self.dt
    }

    /// Integration time step in seconds
    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Configure mode `index` and mark it active.
    ///
    /// Out-of-range indices and non-finite values are ignored.
    pub fn configure_mode(&mut self, index: usize, omega: f64, gamma: f64, weight: f64) {
        if !(omega.is_finite() && gamma.is_finite() && weight.is_finite()) {
            return;
        }
        if let Some(mode) = self.modes.get_mut(index) {
            mode.omega = omega;
            mode.gamma = gamma;
            mode.weight = weight.clamp(0.0, 1.0);
            mode.active = true;
        }
    }

    /// Remove a mode from integration and output
    pub fn deactivate_mode(&mut self, index: usize) {
        if let Some(mode) = self.modes.get_mut(index) {
            mode.active = false;
        }
    }

    pub fn modes(&self) -> &[Mode; MAX_MODES] {
        &self.modes
    }

    pub fn mode(&self, index: usize) -> Option<&Mode> {
        self.modes.get(index)
    }

    pub fn excitation(&self) -> &ExcitationEnvelope {
        &self.excitation
    }

    /// Envelope length used by subsequent pokes (1 to 50 ms, else ignored)
    pub fn set_poke_duration(&mut self, duration_ms: f64) {
        if (MIN_POKE_DURATION_MS..=MAX_POKE_DURATION_MS).contains(&duration_ms) {
            self.poke_duration_ms = duration_ms;
        }
    }

    pub fn poke_duration(&self) -> f64 {
        self.poke_duration_ms
    }

    /// Receptivity to incoming coupling forcing
    pub fn coupling_strength(&self) -> f64 {
        self.coupling_strength
    }

    pub fn set_coupling_strength(&mut self, strength: f64) {
        if strength.is_finite() && strength >= 0.0 {
            self.coupling_strength = strength;
        }
    }

    pub fn start(&mut self) {
        self.running = true;
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    /// Advance every active mode by one control step
    pub fn step(&mut self) {
        if !self.running {
            return;
        }

        if self.excitation.active {
            self.excitation.elapsed_ms += self.dt * 1000.0;
            if self.excitation.elapsed_ms >= self.excitation.duration_ms {
                self.excitation.active = false;
            }
        }

        let envelope = if self.excitation.active {
            self.excitation.level()
        } else {
            0.0
        };

        for mode in self.modes.iter_mut().filter(|m| m.active) {
            let gamma_eff = effective_damping(self.personality, mode.gamma, mode.amplitude);
            let lambda = Complex64::new(-gamma_eff, mode.omega);

            let forcing = if self.excitation.active {
                let phase = self.excitation.phase.resolve(&mut self.rng);
                Complex64::from_polar(self.excitation.strength * mode.weight * envelope, phase)
            } else {
                Complex64::new(0.0, 0.0)
            };

            mode.amplitude = mode.amplitude * (lambda * self.dt).exp() + forcing * self.dt;

            if !mode.amplitude.is_finite() {
                mode.amplitude = Complex64::new(0.0, 0.0);
            }
        }

        self.step_count = self.step_count.wrapping_add(1);
    }

    /// Start a new excitation envelope and kick every active mode
    pub fn apply_poke(&mut self, poke: &PokeEvent) {
        if !poke.strength.is_finite() {
            return;
        }
        let strength = poke.strength.clamp(0.0, 1.0);

        self.excitation = ExcitationEnvelope {
            strength,
            duration_ms: self.poke_duration_ms,
            elapsed_ms: 0.0,
            phase: poke.phase,
            active: true,
        };

        for (mode, &weight) in self.modes.iter_mut().zip(poke.mode_weights.iter()) {
            if !mode.active || !weight.is_finite() {
                continue;
            }
            let phase = poke.phase.resolve(&mut self.rng);
            mode.amplitude += Complex64::from_polar(KICK_SCALE * strength * weight, phase);
        }
    }

    /// Add diffusive coupling forcing to mode 0: `a₀ += receptivity·forcing·dt`
    pub fn apply_coupling(&mut self, forcing: f64) {
        if !forcing.is_finite() {
            return;
        }
        let dt = self.dt;
        let scale = self.coupling_strength;
        let mode = &mut self.modes[0];
        if mode.active {
            mode.amplitude += scale * forcing * dt;
        }
    }

    /// Mode-0 complex amplitude, the quantity exchanged with neighbors
    pub fn mode0_amplitude(&self) -> Complex64 {
        self.modes[0].amplitude
    }

    /// Heuristic loudness in [0, 1]: Σ|a|·weight over active modes, halved
    pub fn amplitude(&self) -> f64 {
        let total: f64 = self
            .modes
            .iter()
            .filter(|m| m.active)
            .map(|m| m.amplitude.norm() * m.weight)
            .sum();

        (total / AMPLITUDE_NORMALIZATION).clamp(0.0, 1.0)
    }

    /// Zero every mode and clear the envelope; leaves `running` untouched
    pub fn reset(&mut self) {
        for mode in &mut self.modes {
            mode.amplitude = Complex64::new(0.0, 0.0);
        }
        self.excitation.active = false;
        self.excitation.elapsed_ms = 0.0;
        self.step_count = 0;
    }
}
