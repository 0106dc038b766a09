//! Coupling Topology
//!
//! An N×N interaction matrix over the voice pool (or over mesh devices) and
//! the diffusive coupling update that feeds neighbor state back into each
//! node's fundamental mode.
//!
//! After every [`CouplingTopology::generate`], each row sums to 1 (normalized
//! neighbor influence) or 0 (isolated node). Coupling strength is a separate
//! scalar, so changing it does not reshape the graph.

use crate::node::ModalNode;
use crate::polyphony::Voice;
use crate::rng::Rng;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// Default global coupling strength
pub const DEFAULT_COUPLING_STRENGTH: f64 = 0.3;

/// Default rewiring / connection probability
pub const DEFAULT_TOPOLOGY_PARAMETER: f64 = 0.1;

/// Members per cluster in the `Clustered` family
pub const CLUSTER_SIZE: usize = 4;

/// Weight of the link between consecutive cluster leaders
const INTER_CLUSTER_WEIGHT: f64 = 0.5;

/// Graph family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopologyType {
    /// Each node linked to its two ring neighbors
    #[default]
    Ring,
    /// Ring with edges rewired to random targets (Watts-Strogatz style)
    SmallWorld,
    /// Fully connected clusters of four, leaders chained together
    Clustered,
    /// One hub linked to every other node
    HubSpoke,
    /// Each pair linked with a fixed probability (Erdős–Rényi)
    Random,
    /// Every pair linked
    Complete,
    /// No coupling
    None,
}

impl TopologyType {
    pub const ALL: [TopologyType; 7] = [
        TopologyType::Ring,
        TopologyType::SmallWorld,
        TopologyType::Clustered,
        TopologyType::HubSpoke,
        TopologyType::Random,
        TopologyType::Complete,
        TopologyType::None,
    ];

    /// Map a discrete parameter index (0..=6) to a family
    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    pub fn index(self) -> u8 {
        match self {
            TopologyType::Ring => 0,
            TopologyType::SmallWorld => 1,
            TopologyType::Clustered => 2,
            TopologyType::HubSpoke => 3,
            TopologyType::Random => 4,
            TopologyType::Complete => 5,
            TopologyType::None => 6,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TopologyType::Ring => "Ring",
            TopologyType::SmallWorld => "Small World",
            TopologyType::Clustered => "Clustered",
            TopologyType::HubSpoke => "Hub & Spoke",
            TopologyType::Random => "Random",
            TopologyType::Complete => "Complete",
            TopologyType::None => "None",
        }
    }
}

/// Something that takes part in diffusive coupling
pub trait Coupled {
    /// Only coupled participants are read or written
    fn is_coupled(&self) -> bool;

    /// State exchanged with neighbors (mode-0 amplitude)
    fn coupling_amplitude(&self) -> Complex64;

    /// Receive the accumulated forcing for this tick
    fn apply_coupling_forcing(&mut self, forcing: f64);
}

impl Coupled for ModalNode {
    fn is_coupled(&self) -> bool {
        self.is_running()
    }

    fn coupling_amplitude(&self) -> Complex64 {
        self.mode0_amplitude()
    }

    fn apply_coupling_forcing(&mut self, forcing: f64) {
        self.apply_coupling(forcing);
    }
}

impl Coupled for Voice {
    fn is_coupled(&self) -> bool {
        self.is_active()
    }

    fn coupling_amplitude(&self) -> Complex64 {
        self.node().mode0_amplitude()
    }

    fn apply_coupling_forcing(&mut self, forcing: f64) {
        self.node_mut().apply_coupling(forcing);
    }
}

/// Interaction graph plus global coupling strength
#[derive(Debug, Clone)]
pub struct CouplingTopology {
    size: usize,
    weights: Vec<f64>,
    kind: TopologyType,
    strength: f64,
    parameter: f64,
    hub: usize,
    rng: Rng,
    snapshot: Vec<Option<Complex64>>,
}

impl CouplingTopology {
    /// An empty (`None`) graph over `size` nodes
    pub fn new(size: usize) -> Self {
        Self::with_rng(size, Rng::from_entropy())
    }

    /// An empty graph whose random families draw from `rng`
    pub fn with_rng(size: usize, rng: Rng) -> Self {
        Self {
            size,
            weights: vec![0.0; size * size],
            kind: TopologyType::None,
            strength: DEFAULT_COUPLING_STRENGTH,
            parameter: DEFAULT_TOPOLOGY_PARAMETER,
            hub: 0,
            rng,
            snapshot: vec![None; size],
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn kind(&self) -> TopologyType {
        self.kind
    }

    pub fn coupling_strength(&self) -> f64 {
        self.strength
    }

    /// Leaves the graph shape untouched; negative or non-finite values are ignored
    pub fn set_coupling_strength(&mut self, strength: f64) {
        if strength.is_finite() && strength >= 0.0 {
            self.strength = strength;
        }
    }

    /// Rewiring probability (SmallWorld) or connection probability (Random)
    pub fn topology_parameter(&self) -> f64 {
        self.parameter
    }

    /// Takes effect on the next `generate`; values outside [0, 1] are ignored
    pub fn set_topology_parameter(&mut self, parameter: f64) {
        if (0.0..=1.0).contains(&parameter) {
            self.parameter = parameter;
        }
    }

    pub fn hub(&self) -> usize {
        self.hub
    }

    /// Hub node for `HubSpoke`; takes effect on the next `generate`
    pub fn set_hub(&mut self, hub: usize) {
        if hub < self.size {
            self.hub = hub;
        }
    }

    /// Change the node count and regenerate the current family
    pub fn resize(&mut self, size: usize) {
        self.size = size;
        self.weights = vec![0.0; size * size];
        self.snapshot = vec![None; size];
        if self.hub >= size {
            self.hub = 0;
        }
        self.generate(self.kind, self.strength);
    }

    /// Normalized weight from `i` to `j` (0 when out of range)
    pub fn weight(&self, i: usize, j: usize) -> f64 {
        if i < self.size && j < self.size {
            self.weights[i * self.size + j]
        } else {
            0.0
        }
    }

    /// Row `i` of the matrix
    pub fn row(&self, i: usize) -> Option<&[f64]> {
        if i < self.size {
            Some(&self.weights[i * self.size..(i + 1) * self.size])
        } else {
            None
        }
    }

    /// Row-major weight matrix
    pub fn matrix(&self) -> &[f64] {
        &self.weights
    }

    /// Number of outgoing edges from `i`
    pub fn degree(&self, i: usize) -> usize {
        self.row(i)
            .map(|row| row.iter().filter(|&&w| w > 0.0).count())
            .unwrap_or(0)
    }

    /// Rebuild the matrix for `kind`, then row-normalize it
    pub fn generate(&mut self, kind: TopologyType, strength: f64) {
        self.kind = kind;
        self.set_coupling_strength(strength);
        self.weights.fill(0.0);

        match kind {
            TopologyType::Ring => self.build_ring(),
            TopologyType::SmallWorld => self.build_small_world(),
            TopologyType::Clustered => self.build_clustered(CLUSTER_SIZE),
            TopologyType::HubSpoke => self.build_hub_spoke(),
            TopologyType::Random => self.build_random(),
            TopologyType::Complete => self.build_complete(),
            TopologyType::None => {}
        }

        self.normalize();
    }

    /// Apply one tick of diffusive coupling to `nodes`.
    ///
    /// Every coupled node's amplitude is read before any is written, so the
    /// result does not depend on iteration order. Does nothing when
    /// `nodes.len()` differs from the graph size.
    pub fn update_coupling<T: Coupled>(&mut self, nodes: &mut [T]) {
        if nodes.len() != self.size {
            return;
        }

        for (slot, node) in self.snapshot.iter_mut().zip(nodes.iter()) {
            *slot = node.is_coupled().then(|| node.coupling_amplitude());
        }

        for (i, node) in nodes.iter_mut().enumerate() {
            let Some(self_amp) = self.snapshot[i] else {
                continue;
            };

            let row = &self.weights[i * self.size..(i + 1) * self.size];
            let mut forcing = 0.0;
            for (j, (&weight, neighbor)) in row.iter().zip(self.snapshot.iter()).enumerate() {
                if i == j || weight <= 0.0 {
                    continue;
                }
                if let Some(neighbor_amp) = *neighbor {
                    forcing += (neighbor_amp - self_amp).norm() * weight * self.strength;
                }
            }

            if forcing != 0.0 {
                node.apply_coupling_forcing(forcing);
            }
        }
    }

    fn set_edge(&mut self, i: usize, j: usize, weight: f64) {
        if i != j {
            self.weights[i * self.size + j] = weight;
        }
    }

    fn normalize(&mut self) {
        for row in self.weights.chunks_mut(self.size.max(1)) {
            let sum: f64 = row.iter().sum();
            if sum > 0.0 {
                for w in row.iter_mut() {
                    *w /= sum;
                }
            }
        }
    }

    fn build_ring(&mut self) {
        let n = self.size;
        for i in 0..n {
            self.set_edge(i, (i + n - 1) % n, 1.0);
            self.set_edge(i, (i + 1) % n, 1.0);
        }
    }

    fn build_small_world(&mut self) {
        self.build_ring();
        let n = self.size;
        if n < 2 {
            return;
        }

        for i in 0..n {
            for j in (i + 1)..n {
                if self.weights[i * n + j] <= 0.0 || !self.rng.next_bool_with_probability(self.parameter) {
                    continue;
                }
                self.weights[i * n + j] = 0.0;
                self.weights[j * n + i] = 0.0;

                // Uniform over every node except i
                let mut target = self.rng.next_below(n - 1);
                if target >= i {
                    target += 1;
                }
                self.set_edge(i, target, 1.0);
            }
        }
    }

    fn build_clustered(&mut self, cluster_size: usize) {
        let n = self.size;
        let mut start = 0;
        while start < n {
            let end = (start + cluster_size).min(n);
            for i in start..end {
                for j in start..end {
                    self.set_edge(i, j, 1.0);
                }
            }

            let next = start + cluster_size;
            if next < n {
                self.set_edge(start, next, INTER_CLUSTER_WEIGHT);
                self.set_edge(next, start, INTER_CLUSTER_WEIGHT);
            }
            start = next;
        }
    }

    fn build_hub_spoke(&mut self) {
        let hub = self.hub;
        for i in 0..self.size {
            self.set_edge(hub, i, 1.0);
            self.set_edge(i, hub, 1.0);
        }
    }

    fn build_random(&mut self) {
        let n = self.size;
        for i in 0..n {
            for j in (i + 1)..n {
                if self.rng.next_bool_with_probability(self.parameter) {
                    self.set_edge(i, j, 1.0);
                    self.set_edge(j, i, 1.0);
                }
            }
        }
    }

    fn build_complete(&mut self) {
        for i in 0..self.size {
            for j in 0..self.size {
                self.set_edge(i, j, 1.0);
            }
        }
    }
}
