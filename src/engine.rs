//! Polyphonic Engine
//!
//! The context object a plugin host drives. It owns the voice pool, the
//! coupling graph, the event queue and the shared parameter store, and runs
//! the control cycle inline with rendering: every `samples_per_tick` samples
//! it drains queued events, applies one coupling update and advances every
//! active voice.
//!
//! Control ticks are scheduled by absolute sample position, so the audio is
//! the same however the host slices its blocks.

use crate::io::{event_channel, EngineEvent, EventReceiver, EventSender, DEFAULT_EVENT_CAPACITY};
use crate::node::{Personality, PokeEvent, DEFAULT_CONTROL_RATE_HZ};
use crate::params::{ModeParam, ParamId, SharedParameters};
use crate::polyphony::{VoicePool, VoiceTelemetry, DEFAULT_POLYPHONY, MAX_POLYPHONY};
use crate::render::OutputMapping;
use crate::rng::Rng;
use crate::session::{ConfigError, SessionConfig};
use crate::topology::{CouplingTopology, TopologyType};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Construction-time engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sample_rate: f64,
    /// Voice count, clamped to 1..=32 and fixed for the engine's lifetime
    pub polyphony: usize,
    pub control_rate_hz: f64,
    pub event_capacity: usize,
    /// Fixed seed for reproducible excitation phases and graphs
    pub seed: Option<u64>,
    pub output_mapping: OutputMapping,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000.0,
            polyphony: DEFAULT_POLYPHONY,
            control_rate_hz: DEFAULT_CONTROL_RATE_HZ,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            seed: None,
            output_mapping: OutputMapping::StereoMix,
        }
    }
}

impl EngineConfig {
    pub fn new(sample_rate: f64, polyphony: usize) -> Self {
        Self {
            sample_rate,
            polyphony,
            ..Self::default()
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_control_rate(mut self, rate_hz: f64) -> Self {
        self.control_rate_hz = rate_hz;
        self
    }
}

/// Monitoring snapshot of the whole engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineTelemetry {
    pub active_voices: usize,
    pub voices: Vec<VoiceTelemetry>,
    pub topology: TopologyType,
    pub topology_parameter: f64,
    pub coupling_strength: f64,
    pub control_ticks: u64,
}

/// Polyphonic modal synthesis engine
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    pool: VoicePool,
    topology: CouplingTopology,
    events: EventReceiver,
    params: SharedParameters,
    applied: [f64; ParamId::COUNT],
    params_generation: u64,
    samples_per_tick: usize,
    samples_until_tick: usize,
    control_ticks: u64,
    initialized: bool,
}

impl Engine {
    /// Build an engine and the sender half of its event queue.
    ///
    /// An invalid sample rate leaves the engine uninitialized; it then
    /// renders silence.
    pub fn new(config: EngineConfig) -> (Self, EventSender) {
        let mut config = config;
        config.polyphony = config.polyphony.clamp(1, MAX_POLYPHONY);
        if !(config.control_rate_hz.is_finite() && config.control_rate_hz > 0.0) {
            warn!(rate = config.control_rate_hz, "invalid control rate, using default");
            config.control_rate_hz = DEFAULT_CONTROL_RATE_HZ;
        }

        let initialized = config.sample_rate.is_finite() && config.sample_rate > 0.0;
        if !initialized {
            warn!(sample_rate = config.sample_rate, "invalid sample rate, engine will render silence");
        }

        let mut rng = match config.seed {
            Some(seed) => Rng::from_seed(seed),
            None => Rng::from_entropy(),
        };

        let pool = VoicePool::with_rng(config.polyphony, config.sample_rate, config.output_mapping, rng.fork(0));
        let topology = CouplingTopology::with_rng(config.polyphony, rng.fork(1));
        let (sender, events) = event_channel(config.event_capacity);
        let params = SharedParameters::new();
        let applied = core::array::from_fn(|i| ParamId::ALL[i].info().default);

        let mut engine = Self {
            config,
            pool,
            topology,
            events,
            params,
            applied,
            params_generation: 0,
            samples_per_tick: 1,
            samples_until_tick: 0,
            control_ticks: 0,
            initialized,
        };

        engine.set_control_rate(engine.config.control_rate_hz);
        for id in ParamId::ALL {
            if id.is_writable() {
                engine.apply_parameter(id, engine.applied[id as usize]);
            }
        }

        info!(
            sample_rate = engine.config.sample_rate,
            polyphony = engine.config.polyphony,
            control_rate = engine.config.control_rate_hz,
            samples_per_tick = engine.samples_per_tick,
            "engine initialized"
        );

        (engine, sender)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn sample_rate(&self) -> f64 {
        self.config.sample_rate
    }

    pub fn pool(&self) -> &VoicePool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut VoicePool {
        &mut self.pool
    }

    pub fn topology(&self) -> &CouplingTopology {
        &self.topology
    }

    pub fn topology_mut(&mut self) -> &mut CouplingTopology {
        &mut self.topology
    }

    /// Handle to the shared parameter store, for a host or UI thread
    pub fn parameters(&self) -> SharedParameters {
        self.params.clone()
    }

    /// Value most recently applied to the engine
    pub fn parameter(&self, id: ParamId) -> f64 {
        self.applied[id as usize]
    }

    pub fn active_voice_count(&self) -> usize {
        self.pool.active_count()
    }

    pub fn samples_per_tick(&self) -> usize {
        self.samples_per_tick
    }

    pub fn control_ticks(&self) -> u64 {
        self.control_ticks
    }

    /// Change the integration rate of every voice
    pub fn set_control_rate(&mut self, rate_hz: f64) {
        if !(rate_hz.is_finite() && rate_hz > 0.0) {
            return;
        }
        self.config.control_rate_hz = rate_hz;
        self.samples_per_tick = if self.initialized {
            (self.config.sample_rate / rate_hz).round().max(1.0) as usize
        } else {
            1
        };
        for voice in self.pool.voices_mut() {
            voice.node_mut().set_control_rate(rate_hz);
        }
    }

    // ------------------------------------------------------------------
    // Direct control (same thread as render)
    // ------------------------------------------------------------------

    /// MIDI note on; velocity 0 releases the note
    pub fn note_on(&mut self, note: u8, velocity: u8) -> Option<usize> {
        if velocity == 0 {
            return self.pool.note_off(note);
        }
        self.pool.note_on(note, velocity as f64 / 127.0)
    }

    pub fn note_off(&mut self, note: u8) -> Option<usize> {
        self.pool.note_off(note)
    }

    pub fn set_pitch_bend(&mut self, bend: f64) {
        self.pool.set_pitch_bend(bend);
    }

    /// Poke every active voice
    pub fn poke(&mut self, poke: &PokeEvent) {
        self.pool.poke_all(poke);
    }

    pub fn all_notes_off(&mut self) {
        self.pool.all_notes_off();
    }

    pub fn panic(&mut self) {
        self.pool.panic();
    }

    /// Apply a parameter write. Returns false for read-only parameters and
    /// for non-finite or out-of-range values, which are ignored.
    pub fn set_parameter(&mut self, id: ParamId, value: f64) -> bool {
        let info = id.info();
        if !id.is_writable() || !info.accepts(value) {
            return false;
        }
        let value = info.quantize(value);
        self.apply_parameter(id, value);
        self.record(id, value);
        true
    }

    /// Remember an applied value and mirror it into the shared store so a
    /// later poll does not revert it
    fn record(&mut self, id: ParamId, value: f64) {
        self.applied[id as usize] = value;
        self.params.set(id, value);
    }

    /// Apply a write addressed by raw host index
    pub fn set_parameter_by_index(&mut self, index: u32, value: f64) -> bool {
        match ParamId::from_index(index) {
            Some(id) => self.set_parameter(id, value),
            None => false,
        }
    }

    fn apply_parameter(&mut self, id: ParamId, value: f64) {
        match id {
            ParamId::MasterGain => self.pool.set_master_gain(value),
            ParamId::CouplingStrength => self.topology.set_coupling_strength(value),
            ParamId::Topology => {
                if let Some(kind) = TopologyType::from_index(value.round() as u8) {
                    let strength = self.topology.coupling_strength();
                    self.topology.generate(kind, strength);
                }
            }
            ParamId::PokeStrength => self.pool.set_poke_strength(value),
            ParamId::PokeDuration => self.pool.set_poke_duration(value),
            ParamId::Personality => {
                if let Some(personality) = Personality::from_index(value.round() as u8) {
                    self.pool.set_personality(personality);
                }
            }
            ParamId::Polyphony => {}
            _ => {
                if let Some((mode, field)) = id.mode_param() {
                    match field {
                        ModeParam::Frequency => self.pool.set_mode_ratio(mode, value),
                        ModeParam::Damping => self.pool.set_mode_damping(mode, value),
                        ModeParam::Weight => self.pool.set_mode_weight(mode, value),
                    }
                }
            }
        }
    }

    /// Pick up writes made through [`SharedParameters`] since the last poll
    fn poll_parameters(&mut self) {
        let generation = self.params.generation();
        if generation == self.params_generation {
            return;
        }
        self.params_generation = generation;

        for id in ParamId::ALL {
            let value = self.params.get(id);
            if id.is_writable() && value != self.applied[id as usize] {
                self.apply_parameter(id, value);
                self.applied[id as usize] = value;
            }
        }
    }

    // ------------------------------------------------------------------
    // Session control
    // ------------------------------------------------------------------

    /// Apply a validated session: topology, timbre, excitation and gain.
    ///
    /// The pool size is fixed at construction, so `num_nodes` is not applied.
    pub fn apply_session(&mut self, session: &SessionConfig) -> Result<(), ConfigError> {
        session.validate()?;

        if session.num_nodes as usize != self.pool.num_voices() {
            debug!(
                requested = session.num_nodes,
                polyphony = self.pool.num_voices(),
                "session node count differs from polyphony"
            );
        }

        self.topology.set_topology_parameter(session.topology_parameter);
        self.topology.generate(session.topology, session.coupling_strength);
        self.record(ParamId::Topology, session.topology.index() as f64);
        self.record(ParamId::CouplingStrength, session.coupling_strength);

        self.set_control_rate(session.control_rate_hz);
        self.pool.set_personality(session.personality);
        self.record(ParamId::Personality, session.personality.index() as f64);

        for (k, template) in session.modes.iter().enumerate() {
            self.pool.set_mode_template(k, *template);
        }

        self.set_parameter(ParamId::PokeStrength, session.poke_strength);
        self.set_parameter(ParamId::PokeDuration, session.poke_duration_ms);
        self.set_parameter(ParamId::MasterGain, session.master_gain);

        info!(
            session = %session.session_id,
            topology = session.topology.name(),
            coupling = session.coupling_strength,
            "session applied"
        );
        Ok(())
    }

    /// Release every voice; they decay naturally
    pub fn stop_session(&mut self) {
        info!(active = self.pool.active_count(), "stopping session");
        self.pool.all_notes_off();
    }

    /// Silence everything immediately and restart the control clock
    pub fn reset(&mut self) {
        info!("engine reset");
        self.pool.panic();
        self.samples_until_tick = 0;
    }

    // ------------------------------------------------------------------
    // Real-time path
    // ------------------------------------------------------------------

    fn apply_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::NoteOn { note, velocity } => {
                self.note_on(note, velocity);
            }
            EngineEvent::NoteOff { note } => {
                self.pool.note_off(note);
            }
            EngineEvent::PitchBend(bend) => self.pool.set_pitch_bend(bend),
            EngineEvent::Poke(poke) => self.pool.poke_all(&poke),
            EngineEvent::PokeVoice { voice, poke } => self.pool.poke_voice(voice, &poke),
            EngineEvent::Parameter { id, value } => {
                self.set_parameter(id, value);
            }
            EngineEvent::AllNotesOff => self.pool.all_notes_off(),
            EngineEvent::Panic => self.pool.panic(),
        }
    }

    /// One control tick: queued events, coupling, integration
    pub fn control_tick(&mut self) {
        while let Some(event) = self.events.try_recv() {
            self.apply_event(event);
        }
        self.topology.update_coupling(self.pool.voices_mut());
        self.pool.update_voices();
        self.control_ticks += 1;
    }

    /// Render a stereo block, running control ticks at their sample positions.
    ///
    /// Output is always finite and within [-1, 1]. Samples past the shorter
    /// slice are zeroed.
    pub fn render(&mut self, left: &mut [f32], right: &mut [f32]) {
        if !self.initialized {
            left.fill(0.0);
            right.fill(0.0);
            return;
        }

        self.poll_parameters();

        let frames = left.len().min(right.len());
        let mut offset = 0;
        while offset < frames {
            if self.samples_until_tick == 0 {
                self.control_tick();
                self.samples_until_tick = self.samples_per_tick;
            }

            let n = (frames - offset).min(self.samples_until_tick);
            self.pool
                .render_audio(&mut left[offset..offset + n], &mut right[offset..offset + n]);
            offset += n;
            self.samples_until_tick -= n;
        }

        for sample in left[..frames].iter_mut().chain(right[..frames].iter_mut()) {
            *sample = if sample.is_finite() {
                sample.clamp(-1.0, 1.0)
            } else {
                0.0
            };
        }
        left[frames..].fill(0.0);
        right[frames..].fill(0.0);
    }

    /// Snapshot for monitoring
    pub fn telemetry(&self) -> EngineTelemetry {
        EngineTelemetry {
            active_voices: self.pool.active_count(),
            voices: self.pool.telemetry(),
            topology: self.topology.kind(),
            topology_parameter: self.topology.topology_parameter(),
            coupling_strength: self.topology.coupling_strength(),
            control_ticks: self.control_ticks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polyphony::VoiceState;
    use approx::assert_abs_diff_eq;

    fn engine(polyphony: usize) -> (Engine, EventSender) {
        Engine::new(EngineConfig::new(48000.0, polyphony).with_seed(7))
    }

    fn render_blocks(engine: &mut Engine, blocks: usize, size: usize) -> Vec<f32> {
        let mut out = Vec::with_capacity(blocks * size);
        let mut left = vec![0.0f32; size];
        let mut right = vec![0.0f32; size];
        for _ in 0..blocks {
            engine.render(&mut left, &mut right);
            out.extend_from_slice(&left);
        }
        out
    }

    #[test]
    fn test_defaults_applied_at_construction() {
        let (engine, _tx) = engine(8);
        assert_eq!(engine.topology().kind(), TopologyType::Ring);
        assert_abs_diff_eq!(engine.topology().coupling_strength(), 0.3);
        assert_eq!(engine.samples_per_tick(), 96);
        assert_abs_diff_eq!(engine.parameter(ParamId::MasterGain), 0.7);
        assert_eq!(engine.pool().num_voices(), 8);
    }

    #[test]
    fn test_silent_when_idle() {
        let (mut engine, _tx) = engine(4);
        let out = render_blocks(&mut engine, 4, 256);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_note_produces_sound() {
        let (mut engine, _tx) = engine(4);
        assert_eq!(engine.note_on(60, 100), Some(0));

        let out = render_blocks(&mut engine, 4, 256);
        assert!(out.iter().any(|&s| s != 0.0));
        assert!(out.iter().all(|s| s.abs() <= 1.0));
    }

    #[test]
    fn test_render_split_matches_single_block() {
        let (mut a, _ta) = engine(4);
        let (mut b, _tb) = engine(4);
        for e in [&mut a, &mut b] {
            e.note_on(60, 100);
            e.note_on(67, 80);
        }

        let mut left_a = vec![0.0f32; 512];
        let mut right_a = vec![0.0f32; 512];
        a.render(&mut left_a, &mut right_a);

        let mut left_b = vec![0.0f32; 512];
        let mut right_b = vec![0.0f32; 512];
        {
            let (l1, l2) = left_b.split_at_mut(128);
            let (r1, r2) = right_b.split_at_mut(128);
            b.render(l1, r1);
            b.render(l2, r2);
        }

        for i in 0..512 {
            assert_abs_diff_eq!(left_a[i], left_b[i], epsilon = 1e-6);
            assert_abs_diff_eq!(right_a[i], right_b[i], epsilon = 1e-6);
        }
        assert_eq!(a.control_ticks(), b.control_ticks());
    }

    #[test]
    fn test_queued_events_apply_on_tick() {
        let (mut engine, mut tx) = engine(4);
        assert!(tx.send(EngineEvent::NoteOn { note: 64, velocity: 127 }));
        assert_eq!(engine.active_voice_count(), 0);

        let mut left = [0.0f32; 32];
        let mut right = [0.0f32; 32];
        engine.render(&mut left, &mut right);

        assert_eq!(engine.active_voice_count(), 1);
        assert_eq!(engine.pool().voice_for_note(64), Some(0));
    }

    #[test]
    fn test_zero_velocity_is_note_off() {
        let (mut engine, _tx) = engine(4);
        engine.note_on(60, 100);
        engine.note_on(60, 0);
        assert_eq!(engine.pool().voice(0).map(|v| v.state()), Some(VoiceState::Release));
    }

    #[test]
    fn test_output_bounded_under_heavy_load() {
        let (mut engine, _tx) = engine(32);
        engine.set_parameter(ParamId::Personality, 1.0);
        engine.set_parameter(ParamId::Topology, TopologyType::Complete.index() as f64);
        engine.set_parameter(ParamId::CouplingStrength, 1.0);
        engine.set_parameter(ParamId::MasterGain, 1.0);
        for note in 40..72 {
            engine.note_on(note, 127);
        }

        let out = render_blocks(&mut engine, 200, 256);
        assert!(out.iter().all(|s| s.is_finite() && s.abs() <= 1.0));
        assert!(out.iter().any(|&s| s != 0.0));
    }

    #[test]
    fn test_parameter_writes_validated() {
        let (mut engine, _tx) = engine(4);
        assert!(!engine.set_parameter(ParamId::MasterGain, 2.0));
        assert!(!engine.set_parameter(ParamId::CouplingStrength, f64::INFINITY));
        assert!(!engine.set_parameter(ParamId::Polyphony, 8.0));
        assert!(!engine.set_parameter_by_index(1000, 0.5));
        assert_eq!(engine.pool().num_voices(), 4);

        assert!(engine.set_parameter(ParamId::Mode2Damping, 2.0));
        assert_abs_diff_eq!(engine.pool().templates()[2].damping, 2.0);
        assert!(engine.set_parameter_by_index(ParamId::Topology.index(), 5.0));
        assert_eq!(engine.topology().kind(), TopologyType::Complete);
    }

    #[test]
    fn test_shared_parameters_polled_on_render() {
        let (mut engine, _tx) = engine(4);
        let host = engine.parameters();
        assert!(host.set(ParamId::Topology, 3.0));
        assert!(host.set(ParamId::Personality, 1.0));

        let mut left = [0.0f32; 16];
        let mut right = [0.0f32; 16];
        engine.render(&mut left, &mut right);

        assert_eq!(engine.topology().kind(), TopologyType::HubSpoke);
        assert_eq!(engine.pool().personality(), Personality::SelfOscillator);
    }

    #[test]
    fn test_direct_write_survives_shared_poll() {
        let (mut engine, _tx) = engine(4);
        let host = engine.parameters();
        assert!(engine.set_parameter(ParamId::MasterGain, 0.2));
        assert!(host.set(ParamId::CouplingStrength, 0.9));

        let mut left = [0.0f32; 16];
        let mut right = [0.0f32; 16];
        engine.render(&mut left, &mut right);

        assert_abs_diff_eq!(engine.parameter(ParamId::MasterGain), 0.2);
        assert_abs_diff_eq!(engine.topology().coupling_strength(), 0.9);
        assert_abs_diff_eq!(host.get(ParamId::MasterGain), 0.2);
    }

    #[test]
    fn test_stop_session_releases_and_reset_silences() {
        let (mut engine, _tx) = engine(4);
        engine.note_on(60, 100);
        engine.note_on(62, 100);

        engine.stop_session();
        assert_eq!(engine.active_voice_count(), 2);
        assert!(engine
            .pool()
            .voices()
            .iter()
            .filter(|v| v.is_active())
            .all(|v| v.state() == VoiceState::Release));

        engine.reset();
        assert_eq!(engine.active_voice_count(), 0);
        let out = render_blocks(&mut engine, 2, 128);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_apply_session() {
        let (mut engine, _tx) = engine(8);
        let session = SessionConfig::small_world_8_oscillator();

        engine.apply_session(&session).expect("valid session");

        assert_eq!(engine.topology().kind(), TopologyType::SmallWorld);
        assert_abs_diff_eq!(engine.topology().coupling_strength(), 0.4);
        assert_abs_diff_eq!(engine.topology().topology_parameter(), 0.25);
        assert_eq!(engine.pool().personality(), Personality::SelfOscillator);
        assert_abs_diff_eq!(engine.parameter(ParamId::MasterGain), 0.6);
        assert_eq!(engine.pool().templates(), &session.modes);
    }

    #[test]
    fn test_apply_invalid_session_changes_nothing() {
        let (mut engine, _tx) = engine(8);
        let mut session = SessionConfig::clusters_16();
        session.coupling_strength = -1.0;

        assert!(engine.apply_session(&session).is_err());
        assert_eq!(engine.topology().kind(), TopologyType::Ring);
    }

    #[test]
    fn test_invalid_sample_rate_renders_silence() {
        let (mut engine, _tx) = Engine::new(EngineConfig::new(0.0, 4));
        assert!(!engine.is_initialized());
        engine.note_on(60, 100);

        let mut left = [1.0f32; 64];
        let mut right = [1.0f32; 64];
        engine.render(&mut left, &mut right);
        assert!(left.iter().chain(right.iter()).all(|&s| s == 0.0));
    }

    #[test]
    fn test_mismatched_buffers_zero_tail() {
        let (mut engine, _tx) = engine(2);
        engine.note_on(60, 100);
        let mut left = [1.0f32; 64];
        let mut right = [1.0f32; 100];
        engine.render(&mut left, &mut right);
        assert!(right[64..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_telemetry() {
        let (mut engine, _tx) = engine(4);
        engine.note_on(60, 100);
        let mut left = [0.0f32; 200];
        let mut right = [0.0f32; 200];
        engine.render(&mut left, &mut right);

        let telemetry = engine.telemetry();
        assert_eq!(telemetry.active_voices, 1);
        assert_eq!(telemetry.voices.len(), 4);
        assert_eq!(telemetry.control_ticks, 3);
        assert_eq!(telemetry.topology, TopologyType::Ring);
    }
}
