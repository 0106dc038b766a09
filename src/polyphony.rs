//! Polyphony Support
//!
//! A fixed pool of voices, each owning one [`ModalNode`] and its
//! [`AudioRenderer`]. The pool maps note numbers to voices, steals the oldest
//! voice when every slot is busy, advances every active node once per control
//! tick and mixes active voices into a stereo block.
//!
//! # Architecture
//!
//! - `Voice` - One node plus note, velocity, pitch bend, age and lifecycle state
//! - `VoicePool` - Allocation, stealing, lifecycle, broadcast timbre settings and mixing
//! - `ModeTemplate` - Frequency ratio, damping and weight applied to every voice

use crate::node::{
    frequency_to_omega, midi_note_to_frequency, pitch_bend_ratio, ModalNode, Personality,
    PokeEvent, DEFAULT_POKE_DURATION_MS, MAX_MODES,
};
use crate::render::{AudioRenderer, OutputMapping};
use crate::rng::Rng;
use serde::{Deserialize, Serialize};

/// Largest accepted pool size
pub const MAX_POLYPHONY: usize = 32;

/// Default pool size
pub const DEFAULT_POLYPHONY: usize = 16;

/// Number of addressable note identifiers
pub const NOTE_COUNT: usize = 128;

/// A releasing voice goes inactive once its amplitude drops below this
pub const RELEASE_THRESHOLD: f64 = 0.001;

/// Frames rendered per voice per pass; longer blocks are processed in chunks
pub const MAX_BLOCK_SIZE: usize = 512;

/// Note assigned to voices before their first note-on
const DEFAULT_NOTE: u8 = 60;

/// Per-mode timbre settings shared by every voice
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModeTemplate {
    /// Multiple of the note's fundamental frequency
    pub ratio: f64,
    /// Damping γ in 1/s
    pub damping: f64,
    /// Audio weight in [0, 1]
    pub weight: f64,
}

impl ModeTemplate {
    pub const fn new(ratio: f64, damping: f64, weight: f64) -> Self {
        Self {
            ratio,
            damping,
            weight,
        }
    }
}

/// Detuned fundamental plus second and third harmonics
pub const DEFAULT_MODE_TEMPLATES: [ModeTemplate; MAX_MODES] = [
    ModeTemplate::new(1.0, 0.5, 1.0),
    ModeTemplate::new(1.01, 0.6, 0.7),
    ModeTemplate::new(2.0, 0.8, 0.5),
    ModeTemplate::new(3.0, 1.0, 0.3),
];

/// Lifecycle state of a single voice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceState {
    /// Voice is not playing
    #[default]
    Inactive,
    /// Triggered; resonators stay here until note-off
    Attack,
    /// Self-oscillating, held until note-off
    Sustain,
    /// Note released, decaying towards silence
    Release,
}

/// A single voice in the pool
#[derive(Debug, Clone)]
pub struct Voice {
    index: usize,
    node: ModalNode,
    renderer: AudioRenderer,
    note: u8,
    velocity: f64,
    pitch_bend: f64,
    age: u64,
    state: VoiceState,
}

impl Voice {
    fn new(index: usize, sample_rate: f64, mapping: OutputMapping, rng: Rng) -> Self {
        let mut node = ModalNode::with_rng(index as u8, Personality::Resonator, rng);
        node.start();

        let mut voice = Self {
            index,
            node,
            renderer: AudioRenderer::new(sample_rate, mapping),
            note: DEFAULT_NOTE,
            velocity: 0.0,
            pitch_bend: 0.0,
            age: 0,
            state: VoiceState::Inactive,
        };
        voice.retune(&DEFAULT_MODE_TEMPLATES);
        voice
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn state(&self) -> VoiceState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state != VoiceState::Inactive
    }

    /// Note currently sounding, if any
    pub fn note(&self) -> Option<u8> {
        self.is_active().then_some(self.note)
    }

    /// Normalized velocity of the last trigger
    pub fn velocity(&self) -> f64 {
        self.velocity
    }

    pub fn pitch_bend(&self) -> f64 {
        self.pitch_bend
    }

    /// Control ticks since the last (re)trigger
    pub fn age(&self) -> u64 {
        self.age
    }

    pub fn amplitude(&self) -> f64 {
        self.node.amplitude()
    }

    pub fn node(&self) -> &ModalNode {
        &self.node
    }

    pub fn node_mut(&mut self) -> &mut ModalNode {
        &mut self.node
    }

    pub fn renderer(&self) -> &AudioRenderer {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut AudioRenderer {
        &mut self.renderer
    }

    /// Is this voice sounding `note`?
    pub fn is_playing_note(&self, note: u8) -> bool {
        self.is_active() && self.note == note
    }

    fn trigger(&mut self, note: u8, velocity: f64, templates: &[ModeTemplate; MAX_MODES], poke_strength: f64) {
        self.note = note;
        self.velocity = velocity;
        self.state = VoiceState::Attack;
        self.age = 0;
        self.retune(templates);
        self.node
            .apply_poke(&PokeEvent::new(self.index as u8, velocity * poke_strength));
    }

    fn release(&mut self) {
        if self.is_active() {
            self.state = VoiceState::Release;
        }
    }

    /// Back to a silent, unassigned voice
    fn kill(&mut self) {
        self.node.reset();
        self.renderer.reset();
        self.state = VoiceState::Inactive;
        self.velocity = 0.0;
        self.age = 0;
    }

    /// Set mode frequencies from the note and pitch bend, damping and weight from `templates`
    fn retune(&mut self, templates: &[ModeTemplate; MAX_MODES]) {
        let base = midi_note_to_frequency(self.note) * pitch_bend_ratio(self.pitch_bend);
        for (k, template) in templates.iter().enumerate() {
            self.node.configure_mode(
                k,
                frequency_to_omega(base * template.ratio),
                template.damping,
                template.weight,
            );
        }
    }

    /// One control tick: integrate, then advance the lifecycle
    fn update(&mut self) {
        if !self.is_active() {
            return;
        }

        self.node.step();

        match self.state {
            VoiceState::Attack => {
                if self.node.personality() == Personality::SelfOscillator {
                    self.state = VoiceState::Sustain;
                }
            }
            VoiceState::Release => {
                if self.node.amplitude() < RELEASE_THRESHOLD {
                    self.kill();
                    return;
                }
            }
            VoiceState::Sustain | VoiceState::Inactive => {}
        }

        self.age = self.age.saturating_add(1);
    }
}

/// Per-voice monitoring snapshot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoiceTelemetry {
    pub index: usize,
    pub state: VoiceState,
    pub note: Option<u8>,
    pub amplitude: f64,
    pub age: u64,
}

/// Fixed-size pool of voices with note mapping and stealing
#[derive(Debug, Clone)]
pub struct VoicePool {
    voices: Vec<Voice>,
    note_map: [Option<usize>; NOTE_COUNT],
    pitch_bend: f64,
    personality: Personality,
    templates: [ModeTemplate; MAX_MODES],
    poke_strength: f64,
    poke_duration_ms: f64,
    scratch_left: Vec<f32>,
    scratch_right: Vec<f32>,
}

impl VoicePool {
    /// Create a pool with entropy-seeded excitation phases
    pub fn new(polyphony: usize, sample_rate: f64) -> Self {
        Self::with_rng(polyphony, sample_rate, OutputMapping::StereoMix, Rng::from_entropy())
    }

    /// Create a pool; each voice gets its own stream forked from `rng`.
    ///
    /// `polyphony` is clamped to `1..=MAX_POLYPHONY` and fixed thereafter.
    pub fn with_rng(polyphony: usize, sample_rate: f64, mapping: OutputMapping, mut rng: Rng) -> Self {
        let polyphony = polyphony.clamp(1, MAX_POLYPHONY);
        let voices = (0..polyphony)
            .map(|i| Voice::new(i, sample_rate, mapping, rng.fork(i as u64)))
            .collect();

        Self {
            voices,
            note_map: [None; NOTE_COUNT],
            pitch_bend: 0.0,
            personality: Personality::Resonator,
            templates: DEFAULT_MODE_TEMPLATES,
            poke_strength: 1.0,
            poke_duration_ms: DEFAULT_POKE_DURATION_MS,
            scratch_left: vec![0.0; MAX_BLOCK_SIZE],
            scratch_right: vec![0.0; MAX_BLOCK_SIZE],
        }
    }

    /// Get the number of voices
    pub fn num_voices(&self) -> usize {
        self.voices.len()
    }

    /// Get a voice by index
    pub fn voice(&self, index: usize) -> Option<&Voice> {
        self.voices.get(index)
    }

    /// Get a mutable voice by index
    pub fn voice_mut(&mut self, index: usize) -> Option<&mut Voice> {
        self.voices.get_mut(index)
    }

    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    pub fn voices_mut(&mut self) -> &mut [Voice] {
        &mut self.voices
    }

    /// Count voices that are not inactive (releasing voices included)
    pub fn active_count(&self) -> usize {
        self.voices.iter().filter(|v| v.is_active()).count()
    }

    /// Voice currently mapped to `note`
    pub fn voice_for_note(&self, note: u8) -> Option<usize> {
        self.note_map.get(note as usize).copied().flatten()
    }

    /// Start (or retrigger) a note. `velocity` is normalized to [0, 1].
    ///
    /// Returns the voice index, or `None` for a note outside 0..=127.
    pub fn note_on(&mut self, note: u8, velocity: f64) -> Option<usize> {
        let slot = note as usize;
        if slot >= NOTE_COUNT {
            return None;
        }
        let velocity = if velocity.is_finite() {
            velocity.clamp(0.0, 1.0)
        } else {
            0.0
        };

        // Retrigger the voice already holding this note
        if let Some(index) = self.note_map[slot] {
            if self.voices[index].is_playing_note(note) {
                self.voices[index].trigger(note, velocity, &self.templates, self.poke_strength);
                return Some(index);
            }
            self.note_map[slot] = None;
        }

        let index = match self.voices.iter().position(|v| !v.is_active()) {
            Some(index) => index,
            None => {
                let index = self.find_steal_voice();
                self.steal(index);
                index
            }
        };

        self.voices[index].trigger(note, velocity, &self.templates, self.poke_strength);
        self.note_map[slot] = Some(index);
        Some(index)
    }

    /// Release a note. Returns the voice index if the note was mapped.
    pub fn note_off(&mut self, note: u8) -> Option<usize> {
        let index = self.note_map.get_mut(note as usize)?.take()?;
        self.voices[index].release();
        Some(index)
    }

    /// Release every voice and clear the note map
    pub fn all_notes_off(&mut self) {
        for voice in &mut self.voices {
            voice.release();
        }
        self.note_map = [None; NOTE_COUNT];
    }

    /// Silence every voice immediately (panic)
    pub fn panic(&mut self) {
        for voice in &mut self.voices {
            voice.kill();
        }
        self.note_map = [None; NOTE_COUNT];
    }

    /// Advance every active voice by one control tick
    pub fn update_voices(&mut self) {
        for voice in &mut self.voices {
            voice.update();
        }
    }

    /// Mix every active voice into `left`/`right`.
    ///
    /// The frame count is the shorter of the two slices.
    pub fn render_audio(&mut self, left: &mut [f32], right: &mut [f32]) {
        let frames = left.len().min(right.len());
        left.fill(0.0);
        right.fill(0.0);

        let mut offset = 0;
        while offset < frames {
            let n = (frames - offset).min(MAX_BLOCK_SIZE);

            for voice in self.voices.iter_mut().filter(|v| v.is_active()) {
                let scratch_l = &mut self.scratch_left[..n];
                let scratch_r = &mut self.scratch_right[..n];
                voice.renderer.render_stereo(&voice.node, scratch_l, scratch_r);

                for (out, s) in left[offset..offset + n].iter_mut().zip(scratch_l.iter()) {
                    *out += *s;
                }
                for (out, s) in right[offset..offset + n].iter_mut().zip(scratch_r.iter()) {
                    *out += *s;
                }
            }

            offset += n;
        }
    }

    /// Poke every active voice
    pub fn poke_all(&mut self, poke: &PokeEvent) {
        for voice in self.voices.iter_mut().filter(|v| v.is_active()) {
            voice.node.apply_poke(poke);
        }
    }

    /// Poke one voice regardless of its state; bad indices are ignored
    pub fn poke_voice(&mut self, index: usize, poke: &PokeEvent) {
        if let Some(voice) = self.voices.get_mut(index) {
            voice.node.apply_poke(poke);
        }
    }

    /// Global pitch bend in [-1, 1] (±2 semitones), retuning every voice
    pub fn set_pitch_bend(&mut self, bend: f64) {
        if !bend.is_finite() {
            return;
        }
        self.pitch_bend = bend.clamp(-1.0, 1.0);
        for voice in &mut self.voices {
            voice.pitch_bend = self.pitch_bend;
            voice.retune(&self.templates);
        }
    }

    pub fn pitch_bend(&self) -> f64 {
        self.pitch_bend
    }

    pub fn set_personality(&mut self, personality: Personality) {
        self.personality = personality;
        for voice in &mut self.voices {
            voice.node.set_personality(personality);
        }
    }

    pub fn personality(&self) -> Personality {
        self.personality
    }

    /// Replace one mode template and retune every voice.
    ///
    /// Bad indices, non-finite values and non-positive ratios are ignored.
    pub fn set_mode_template(&mut self, index: usize, template: ModeTemplate) {
        if index >= MAX_MODES
            || !(template.ratio.is_finite() && template.damping.is_finite() && template.weight.is_finite())
            || template.ratio <= 0.0
        {
            return;
        }
        self.templates[index] = template;
        for voice in &mut self.voices {
            voice.retune(&self.templates);
        }
    }

    pub fn set_mode_ratio(&mut self, index: usize, ratio: f64) {
        if let Some(mut template) = self.templates.get(index).copied() {
            template.ratio = ratio;
            self.set_mode_template(index, template);
        }
    }

    pub fn set_mode_damping(&mut self, index: usize, damping: f64) {
        if let Some(mut template) = self.templates.get(index).copied() {
            template.damping = damping;
            self.set_mode_template(index, template);
        }
    }

    pub fn set_mode_weight(&mut self, index: usize, weight: f64) {
        if let Some(mut template) = self.templates.get(index).copied() {
            template.weight = weight;
            self.set_mode_template(index, template);
        }
    }

    pub fn templates(&self) -> &[ModeTemplate; MAX_MODES] {
        &self.templates
    }

    /// Scale applied to velocity for note-on pokes, in [0, 1]
    pub fn set_poke_strength(&mut self, strength: f64) {
        if strength.is_finite() {
            self.poke_strength = strength.clamp(0.0, 1.0);
        }
    }

    pub fn poke_strength(&self) -> f64 {
        self.poke_strength
    }

    /// Envelope length for subsequent pokes on every voice
    pub fn set_poke_duration(&mut self, duration_ms: f64) {
        for voice in &mut self.voices {
            voice.node.set_poke_duration(duration_ms);
        }
        if let Some(voice) = self.voices.first() {
            self.poke_duration_ms = voice.node.poke_duration();
        }
    }

    pub fn poke_duration(&self) -> f64 {
        self.poke_duration_ms
    }

    pub fn set_master_gain(&mut self, gain: f64) {
        for voice in &mut self.voices {
            voice.renderer.set_master_gain(gain);
        }
    }

    pub fn set_mode_gain(&mut self, index: usize, gain: f64) {
        for voice in &mut self.voices {
            voice.renderer.set_mode_gain(index, gain);
        }
    }

    /// Snapshot of every voice for monitoring
    pub fn telemetry(&self) -> Vec<VoiceTelemetry> {
        self.voices
            .iter()
            .map(|v| VoiceTelemetry {
                index: v.index,
                state: v.state,
                note: v.note(),
                amplitude: v.amplitude(),
                age: v.age,
            })
            .collect()
    }

    /// Oldest active voice; the first in pool order wins ties
    fn find_steal_voice(&self) -> usize {
        let mut oldest = 0;
        let mut oldest_age = None;
        for voice in self.voices.iter().filter(|v| v.is_active()) {
            if oldest_age.map_or(true, |age| voice.age > age) {
                oldest = voice.index;
                oldest_age = Some(voice.age);
            }
        }
        oldest
    }

    fn steal(&mut self, index: usize) {
        let old_note = self.voices[index].note as usize;
        if self.note_map[old_note] == Some(index) {
            self.note_map[old_note] = None;
        }
        self.voices[index].kill();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn pool(polyphony: usize) -> VoicePool {
        VoicePool::with_rng(polyphony, 48000.0, OutputMapping::StereoMix, Rng::from_seed(11))
    }

    #[test]
    fn test_voice_allocation_basic() {
        let mut pool = pool(4);

        assert_eq!(pool.note_on(60, 0.8), Some(0));
        assert_eq!(pool.active_count(), 1);

        assert_eq!(pool.note_on(64, 0.7), Some(1));
        assert_eq!(pool.active_count(), 2);

        // Released voices keep sounding
        assert_eq!(pool.note_off(60), Some(0));
        assert_eq!(pool.active_count(), 2);
        assert_eq!(pool.voice(0).map(|v| v.state()), Some(VoiceState::Release));
        assert_eq!(pool.voice_for_note(60), None);
    }

    #[test]
    fn test_voice_allocation_retrigger() {
        let mut pool = pool(4);

        assert_eq!(pool.note_on(60, 0.8), Some(0));
        pool.update_voices();
        pool.update_voices();

        assert_eq!(pool.note_on(60, 0.9), Some(0));
        assert_eq!(pool.active_count(), 1);
        assert_eq!(pool.voice(0).map(|v| v.age()), Some(0));
        assert_abs_diff_eq!(pool.voice(0).map(|v| v.velocity()).unwrap_or(0.0), 0.9);
    }

    #[test]
    fn test_deterministic_stealing() {
        let polyphony = 8;
        let mut pool = pool(polyphony);

        for note in 0..polyphony as u8 {
            pool.note_on(40 + note, 1.0);
        }
        let stolen = pool.note_on(40 + polyphony as u8, 1.0);

        assert_eq!(stolen, Some(0));
        assert_eq!(pool.voice(0).and_then(|v| v.note()), Some(40 + polyphony as u8));
        assert_eq!(pool.voice_for_note(40), None);
        for i in 1..polyphony {
            assert_eq!(pool.voice(i).and_then(|v| v.note()), Some(40 + i as u8));
            assert_eq!(pool.voice_for_note(40 + i as u8), Some(i));
        }
    }

    #[test]
    fn test_stealing_picks_oldest() {
        let mut pool = pool(3);

        pool.note_on(60, 1.0);
        pool.note_on(62, 1.0);
        pool.update_voices();
        pool.note_on(64, 1.0);
        // Retrigger resets age, leaving voice 1 as the oldest
        pool.note_on(60, 1.0);

        assert_eq!(pool.note_on(67, 1.0), Some(1));
        assert_eq!(pool.voice_for_note(62), None);
        assert_eq!(pool.voice_for_note(67), Some(1));
    }

    #[test]
    fn test_note_reusable_while_releasing() {
        let mut pool = pool(4);

        pool.note_on(60, 1.0);
        pool.note_off(60);
        let second = pool.note_on(60, 1.0);

        assert_eq!(second, Some(1));
        assert_eq!(pool.voice(0).map(|v| v.state()), Some(VoiceState::Release));
        assert_eq!(pool.voice_for_note(60), Some(1));
    }

    #[test]
    fn test_release_goes_inactive() {
        let mut pool = pool(2);
        pool.note_on(72, 1.0);
        pool.note_off(72);

        for _ in 0..20_000 {
            pool.update_voices();
            if pool.active_count() == 0 {
                break;
            }
        }

        assert_eq!(pool.active_count(), 0);
        let voice = pool.voice(0).map(|v| (v.state(), v.amplitude()));
        assert_eq!(voice, Some((VoiceState::Inactive, 0.0)));
    }

    #[test]
    fn test_self_oscillator_enters_sustain() {
        let mut pool = pool(2);
        pool.set_personality(Personality::SelfOscillator);

        pool.note_on(60, 0.5);
        assert_eq!(pool.voice(0).map(|v| v.state()), Some(VoiceState::Attack));
        pool.update_voices();
        assert_eq!(pool.voice(0).map(|v| v.state()), Some(VoiceState::Sustain));
    }

    #[test]
    fn test_resonator_stays_in_attack() {
        let mut pool = pool(2);
        pool.note_on(60, 0.5);
        for _ in 0..100 {
            pool.update_voices();
        }
        assert_eq!(pool.voice(0).map(|v| v.state()), Some(VoiceState::Attack));
        assert_eq!(pool.voice(0).map(|v| v.age()), Some(100));
    }

    #[test]
    fn test_all_notes_off_and_panic() {
        let mut pool = pool(4);
        pool.note_on(60, 1.0);
        pool.note_on(64, 1.0);

        pool.all_notes_off();
        assert_eq!(pool.active_count(), 2);
        assert!(pool.voices().iter().filter(|v| v.is_active()).all(|v| v.state() == VoiceState::Release));
        assert_eq!(pool.voice_for_note(60), None);

        pool.panic();
        assert_eq!(pool.active_count(), 0);
    }

    #[test]
    fn test_note_frequencies_follow_templates() {
        let mut pool = pool(2);
        pool.note_on(69, 1.0);

        let node = pool.voice(0).map(|v| v.node().clone());
        let freqs: Vec<f64> = node
            .iter()
            .flat_map(|n| n.modes().iter().map(|m| m.frequency()))
            .collect();
        assert_abs_diff_eq!(freqs[0], 440.0, epsilon = 1e-9);
        assert_abs_diff_eq!(freqs[1], 444.4, epsilon = 1e-9);
        assert_abs_diff_eq!(freqs[2], 880.0, epsilon = 1e-9);
        assert_abs_diff_eq!(freqs[3], 1320.0, epsilon = 1e-9);
    }

    #[test]
    fn test_pitch_bend_broadcast_to_inactive_voices() {
        let mut pool = pool(2);
        pool.set_pitch_bend(1.0);
        pool.note_on(69, 1.0);
        pool.note_on(57, 1.0);

        let expected = 440.0 * libm::pow(2.0, 2.0 / 12.0);
        let f0 = pool.voice(0).and_then(|v| v.node().mode(0).map(|m| m.frequency()));
        assert_abs_diff_eq!(f0.unwrap_or(0.0), expected, epsilon = 1e-9);
        let f1 = pool.voice(1).and_then(|v| v.node().mode(0).map(|m| m.frequency()));
        assert_abs_diff_eq!(f1.unwrap_or(0.0), expected / 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_template_changes_apply_to_every_voice() {
        let mut pool = pool(3);
        pool.set_mode_damping(2, 2.5);
        pool.set_mode_ratio(1, -1.0);
        pool.set_mode_weight(9, 0.5);

        for voice in pool.voices() {
            assert_abs_diff_eq!(voice.node().mode(2).map(|m| m.gamma()).unwrap_or(0.0), 2.5);
        }
        assert_abs_diff_eq!(pool.templates()[1].ratio, 1.01);
    }

    #[test]
    fn test_render_audio_silent_when_idle() {
        let mut pool = pool(4);
        let mut left = [1.0f32; 700];
        let mut right = [1.0f32; 700];

        pool.render_audio(&mut left, &mut right);

        assert!(left.iter().chain(right.iter()).all(|&s| s == 0.0));
    }

    #[test]
    fn test_render_audio_mixes_active_voices() {
        let mut pool = pool(4);
        pool.note_on(60, 1.0);
        pool.note_on(67, 1.0);
        for _ in 0..5 {
            pool.update_voices();
        }

        let mut left = [0.0f32; 1500];
        let mut right = [0.0f32; 1500];
        pool.render_audio(&mut left, &mut right);

        assert!(left.iter().any(|&s| s != 0.0));
        assert_eq!(left, right);
        assert!(left.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn test_polyphony_is_clamped() {
        assert_eq!(pool(0).num_voices(), 1);
        assert_eq!(pool(100).num_voices(), MAX_POLYPHONY);
    }

    #[test]
    fn test_telemetry_reports_voices() {
        let mut pool = pool(2);
        pool.note_on(60, 1.0);
        pool.update_voices();

        let telemetry = pool.telemetry();
        assert_eq!(telemetry.len(), 2);
        assert_eq!(telemetry[0].note, Some(60));
        assert_eq!(telemetry[0].age, 1);
        assert_eq!(telemetry[1].state, VoiceState::Inactive);
        assert_eq!(telemetry[1].note, None);
    }
}
