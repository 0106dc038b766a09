//! # Modal Attractors: Coupled Modal Synthesis
//!
//! `modal_attractors` synthesizes sound from a small network of coupled,
//! complex-valued damped oscillators. Each node holds up to four resonant
//! modes driven by short excitation bursts ("pokes") and by diffusive
//! coupling to its neighbours over a configurable interaction graph.
//!
//! ## Architecture
//!
//! - **Nodes** - [`ModalNode`](node::ModalNode) integrates each mode exactly
//!   (`a ← a·e^{λ·dt} + forcing·dt`), as a linear resonator or a bounded
//!   Van der Pol self-oscillator
//! - **Rendering** - [`AudioRenderer`](render::AudioRenderer) turns modal
//!   state into samples with phase accumulators and smoothed gains
//! - **Polyphony** - [`VoicePool`](polyphony::VoicePool) maps notes to a fixed
//!   set of voices with oldest-voice stealing
//! - **Coupling** - [`CouplingTopology`](topology::CouplingTopology) builds a
//!   row-normalized graph and applies snapshot-based diffusive forcing
//!
//! Two context objects tie these together: [`Engine`](engine::Engine) for a
//! polyphonic plugin, and [`MeshNode`](mesh::MeshNode) for one device in a
//! wireless mesh speaking the [`protocol`] wire format.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use modal_attractors::prelude::*;
//!
//! let (mut engine, mut events) = Engine::new(EngineConfig::default());
//!
//! // From the MIDI thread
//! events.send(EngineEvent::NoteOn { note: 60, velocity: 100 });
//!
//! // From the audio callback
//! let mut left = [0.0f32; 256];
//! let mut right = [0.0f32; 256];
//! engine.render(&mut left, &mut right);
//! ```

pub mod engine;
pub mod io;
pub mod mesh;
pub mod node;
pub mod params;
pub mod polyphony;
pub mod protocol;
pub mod render;
pub mod rng;
pub mod session;
pub mod topology;

/// Prelude module for convenient imports
pub mod prelude {
    // Oscillator core
    pub use crate::node::{
        hann, midi_note_to_frequency, pitch_bend_ratio, ExcitationEnvelope, ModalNode, Mode,
        Personality, PhaseHint, PokeEvent, MAX_MODES,
    };
    pub use crate::render::{fast_sin, AudioRenderer, OutputMapping};

    // Voices and coupling
    pub use crate::polyphony::{
        ModeTemplate, Voice, VoicePool, VoiceState, VoiceTelemetry, DEFAULT_MODE_TEMPLATES,
        MAX_POLYPHONY,
    };
    pub use crate::topology::{Coupled, CouplingTopology, TopologyType};

    // Control and parameters
    pub use crate::io::{event_channel, AtomicF64, EngineEvent, EventReceiver, EventSender};
    pub use crate::params::{ParamId, ParameterInfo, SharedParameters};
    pub use crate::rng::Rng;

    // Configuration and networking
    pub use crate::protocol::{
        crc32, ConfigReceiver, ConfigTransfer, Header, Message, MessageType, Packet,
        ProtocolError,
    };
    pub use crate::session::{ConfigError, SessionConfig};

    // Context objects
    pub use crate::engine::{Engine, EngineConfig, EngineTelemetry};
    pub use crate::mesh::MeshNode;
}

// Re-export key types at crate root for convenience
pub use prelude::*;
