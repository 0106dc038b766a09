//! Session Configuration
//!
//! A session describes one network of coupled nodes: how many, how they are
//! wired, their personality and timbre, and the excitation defaults. It is
//! serialized to compact JSON so it fits in a single chunked configuration
//! transfer, and validated on the way in.

use crate::node::{Personality, MAX_MODES, MAX_POKE_DURATION_MS, MIN_POKE_DURATION_MS};
use crate::params::{DEFAULT_MASTER_GAIN, DEFAULT_POKE_STRENGTH};
use crate::polyphony::{ModeTemplate, DEFAULT_MODE_TEMPLATES, MAX_POLYPHONY};
use crate::protocol::MAX_CONFIG_SIZE;
use crate::topology::{TopologyType, DEFAULT_COUPLING_STRENGTH, DEFAULT_TOPOLOGY_PARAMETER};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest accepted session identifier
pub const MAX_SESSION_ID_LEN: usize = 32;

/// Highest accepted control rate
pub const MAX_CONTROL_RATE_HZ: f64 = 10_000.0;

/// Largest accepted mode frequency ratio
pub const MAX_MODE_RATIO: f64 = 16.0;

/// Largest accepted mode damping
pub const MAX_MODE_DAMPING: f64 = 5.0;

/// Names accepted by [`SessionConfig::preset`]
pub const PRESET_NAMES: [&str; 4] = [
    "ring_16_resonator",
    "small_world_8_oscillator",
    "clusters_16",
    "hub_spoke_16",
];

/// Errors from loading or validating a session configuration
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// JSON encoding or decoding failed
    Serialization(String),
    /// A numeric field is non-finite or out of range
    InvalidField { field: &'static str, value: f64 },
    InvalidSessionId(String),
    /// Encoded blob exceeds the transfer limit
    TooLarge(usize),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Serialization(msg) => write!(f, "Serialization failed: {}", msg),
            ConfigError::InvalidField { field, value } => {
                write!(f, "Invalid value {} for {}", value, field)
            }
            ConfigError::InvalidSessionId(id) => write!(f, "Invalid session id: {:?}", id),
            ConfigError::TooLarge(n) => {
                write!(f, "Configuration is {} bytes, limit is {}", n, MAX_CONFIG_SIZE)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Serialization(err.to_string())
    }
}

/// Network-wide session parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub session_id: String,
    /// Nodes (mesh devices or voices) in the network
    pub num_nodes: u8,
    pub topology: TopologyType,
    /// Rewiring or connection probability for the random families
    pub topology_parameter: f64,
    pub coupling_strength: f64,
    pub control_rate_hz: f64,
    pub personality: Personality,
    /// Fundamental of node 0 in a mesh
    pub base_frequency_hz: f64,
    /// Added to the fundamental per node id
    pub frequency_spread_hz: f64,
    pub modes: [ModeTemplate; MAX_MODES],
    pub poke_strength: f64,
    pub poke_duration_ms: f64,
    pub master_gain: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: "default".to_string(),
            num_nodes: 16,
            topology: TopologyType::Ring,
            topology_parameter: DEFAULT_TOPOLOGY_PARAMETER,
            coupling_strength: DEFAULT_COUPLING_STRENGTH,
            control_rate_hz: crate::node::DEFAULT_CONTROL_RATE_HZ,
            personality: Personality::Resonator,
            base_frequency_hz: 440.0,
            frequency_spread_hz: 0.0,
            modes: DEFAULT_MODE_TEMPLATES,
            poke_strength: DEFAULT_POKE_STRENGTH,
            poke_duration_ms: crate::node::DEFAULT_POKE_DURATION_MS,
            master_gain: DEFAULT_MASTER_GAIN,
        }
    }
}

/// Carrier, beating partner, octave and sub-bass used by the mesh presets
const MESH_MODES: [ModeTemplate; MAX_MODES] = [
    ModeTemplate::new(1.0, 0.5, 1.0),
    ModeTemplate::new(442.0 / 440.0, 0.6, 0.8),
    ModeTemplate::new(2.0, 1.0, 0.3),
    ModeTemplate::new(0.125, 0.1, 0.5),
];

impl SessionConfig {
    /// 16 resonators on a ring
    pub fn ring_16_resonator() -> Self {
        Self {
            session_id: "ring_16_resonator".to_string(),
            num_nodes: 16,
            topology: TopologyType::Ring,
            coupling_strength: 0.3,
            modes: MESH_MODES,
            ..Self::default()
        }
    }

    /// 8 self-oscillating drones on a small-world graph, fanned out by 10 Hz
    pub fn small_world_8_oscillator() -> Self {
        Self {
            session_id: "small_world_8_oscillator".to_string(),
            num_nodes: 8,
            topology: TopologyType::SmallWorld,
            topology_parameter: 0.25,
            coupling_strength: 0.4,
            personality: Personality::SelfOscillator,
            frequency_spread_hz: 10.0,
            modes: MESH_MODES,
            master_gain: 0.6,
            ..Self::default()
        }
    }

    /// 16 resonators in clusters of four
    pub fn clusters_16() -> Self {
        Self {
            session_id: "clusters_16".to_string(),
            num_nodes: 16,
            topology: TopologyType::Clustered,
            coupling_strength: 0.25,
            modes: MESH_MODES,
            ..Self::default()
        }
    }

    /// One conductor node coupled to 15 others
    pub fn hub_spoke_16() -> Self {
        Self {
            session_id: "hub_spoke_16".to_string(),
            num_nodes: 16,
            topology: TopologyType::HubSpoke,
            coupling_strength: 0.3,
            modes: MESH_MODES,
            ..Self::default()
        }
    }

    /// Look up a built-in preset by name
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "ring_16_resonator" => Some(Self::ring_16_resonator()),
            "small_world_8_oscillator" => Some(Self::small_world_8_oscillator()),
            "clusters_16" => Some(Self::clusters_16()),
            "hub_spoke_16" => Some(Self::hub_spoke_16()),
            _ => None,
        }
    }

    /// Fundamental for the node with `node_id`
    pub fn node_frequency(&self, node_id: u8) -> f64 {
        self.base_frequency_hz + node_id as f64 * self.frequency_spread_hz
    }

    /// Check every field against its accepted range
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session_id.is_empty() || self.session_id.len() > MAX_SESSION_ID_LEN {
            return Err(ConfigError::InvalidSessionId(self.session_id.clone()));
        }

        check("num_nodes", self.num_nodes as f64, 1.0, MAX_POLYPHONY as f64)?;
        check("topology_parameter", self.topology_parameter, 0.0, 1.0)?;
        check("coupling_strength", self.coupling_strength, 0.0, 1.0)?;
        check_positive("control_rate_hz", self.control_rate_hz, MAX_CONTROL_RATE_HZ)?;
        check_positive("base_frequency_hz", self.base_frequency_hz, 20_000.0)?;
        check("frequency_spread_hz", self.frequency_spread_hz, 0.0, 1_000.0)?;
        for mode in &self.modes {
            check_positive("modes.ratio", mode.ratio, MAX_MODE_RATIO)?;
            check_positive("modes.damping", mode.damping, MAX_MODE_DAMPING)?;
            check("modes.weight", mode.weight, 0.0, 1.0)?;
        }
        check("poke_strength", self.poke_strength, 0.0, 1.0)?;
        check(
            "poke_duration_ms",
            self.poke_duration_ms,
            MIN_POKE_DURATION_MS,
            MAX_POKE_DURATION_MS,
        )?;
        check("master_gain", self.master_gain, 0.0, 1.0)?;
        Ok(())
    }

    /// Compact JSON bytes for a configuration transfer
    pub fn to_bytes(&self) -> Result<Vec<u8>, ConfigError> {
        self.validate()?;
        let bytes = serde_json::to_vec(self)?;
        if bytes.len() > MAX_CONFIG_SIZE {
            return Err(ConfigError::TooLarge(bytes.len()));
        }
        Ok(bytes)
    }

    /// Parse and validate bytes produced by [`SessionConfig::to_bytes`]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_slice(bytes)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Deserialize from JSON and validate
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Self::from_bytes(json.as_bytes())
    }
}

fn check(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= min && value <= max {
        Ok(())
    } else {
        Err(ConfigError::InvalidField { field, value })
    }
}

fn check_positive(field: &'static str, value: f64, max: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 && value <= max {
        Ok(())
    } else {
        Err(ConfigError::InvalidField { field, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ConfigReceiver, ConfigTransfer, CHUNK_SIZE};

    #[test]
    fn test_presets_validate() {
        for name in PRESET_NAMES {
            let config = SessionConfig::preset(name).expect("preset exists");
            assert_eq!(config.session_id, name);
            assert_eq!(config.validate(), Ok(()));
        }
        assert_eq!(SessionConfig::preset("nope"), None);
    }

    #[test]
    fn test_bytes_round_trip() {
        let config = SessionConfig::small_world_8_oscillator();
        let bytes = config.to_bytes().expect("encodes");
        assert!(bytes.len() <= MAX_CONFIG_SIZE);

        let back = SessionConfig::from_bytes(&bytes).expect("decodes");
        assert_eq!(back, config);
    }

    #[test]
    fn test_json_round_trip() {
        let config = SessionConfig::clusters_16();
        let json = config.to_json().expect("encodes");
        assert!(json.contains("\"clustered\""));
        assert_eq!(SessionConfig::from_json(&json), Ok(config));
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let config = SessionConfig::from_json(r#"{"session_id":"mini","num_nodes":4}"#).expect("parses");
        assert_eq!(config.num_nodes, 4);
        assert_eq!(config.topology, TopologyType::Ring);
        assert_eq!(config.modes, DEFAULT_MODE_TEMPLATES);
    }

    #[test]
    fn test_validation_rejects_bad_fields() {
        let mut config = SessionConfig::default();
        config.coupling_strength = 1.5;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidField {
                field: "coupling_strength",
                value: 1.5
            })
        );

        let mut config = SessionConfig::default();
        config.num_nodes = 0;
        assert!(config.validate().is_err());

        let mut config = SessionConfig::default();
        config.modes[2].damping = 0.0;
        assert!(config.validate().is_err());

        let mut config = SessionConfig::default();
        config.session_id = "x".repeat(MAX_SESSION_ID_LEN + 1);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidSessionId(_))));

        let mut config = SessionConfig::default();
        config.poke_duration_ms = f64::NAN;
        assert!(config.to_bytes().is_err());
    }

    #[test]
    fn test_malformed_bytes_rejected() {
        assert!(matches!(
            SessionConfig::from_bytes(b"{not json"),
            Err(ConfigError::Serialization(_))
        ));
    }

    #[test]
    fn test_node_frequency_spread() {
        let config = SessionConfig::small_world_8_oscillator();
        assert_eq!(config.node_frequency(0), 440.0);
        assert_eq!(config.node_frequency(3), 470.0);
    }

    #[test]
    fn test_preset_survives_chunked_transfer() {
        let config = SessionConfig::hub_spoke_16();
        let transfer = ConfigTransfer::new(config.to_bytes().expect("encodes")).expect("fits");
        assert!(transfer.num_chunks() >= 1);

        let mut receiver = ConfigReceiver::new();
        receiver
            .begin(transfer.data().len(), transfer.num_chunks(), transfer.checksum())
            .expect("begin");
        for (index, chunk) in transfer.data().chunks(CHUNK_SIZE).enumerate() {
            receiver.accept_chunk(index, chunk).expect("chunk");
        }
        let bytes = receiver.finish(transfer.checksum()).expect("verifies");

        assert_eq!(SessionConfig::from_bytes(&bytes), Ok(config));
    }
}
