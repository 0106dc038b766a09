//! Mesh Node
//!
//! Firmware-side context object for one physical device in the wireless
//! mesh. It owns a single modal node and its renderer, answers protocol
//! messages (session control, pokes, configuration transfer) and produces
//! STATE and HEARTBEAT packets for the hub.
//!
//! Coupling between devices happens acoustically and through pokes relayed
//! by the hub, so a mesh node carries no coupling graph of its own.

use crate::io::{event_channel, EngineEvent, EventReceiver, EventSender, DEFAULT_EVENT_CAPACITY};
use crate::node::{frequency_to_omega, ModalNode, PokeEvent, MAX_MODES};
use crate::protocol::{
    ConfigReceiver, Header, Message, Packet, ProtocolError, BROADCAST_ID, STATUS_INVALID_CONFIG, STATUS_OK,
};
use crate::render::{AudioRenderer, OutputMapping};
use crate::rng::Rng;
use crate::session::{ConfigError, SessionConfig};
use tracing::{debug, info, warn};

/// Pending pokes held between network receive and the next control tick
pub const POKE_QUEUE_CAPACITY: usize = DEFAULT_EVENT_CAPACITY;

/// One device in the mesh
#[derive(Debug)]
pub struct MeshNode {
    node: ModalNode,
    renderer: AudioRenderer,
    session: SessionConfig,
    receiver: ConfigReceiver,
    poke_tx: EventSender,
    poke_rx: EventReceiver,
    sequence: u16,
    uptime_us: u64,
}

impl MeshNode {
    /// Node `id` configured with the default session
    pub fn new(id: u8, sample_rate: f64, mapping: OutputMapping) -> Self {
        Self::with_rng(id, sample_rate, mapping, Rng::from_entropy())
    }

    pub fn with_rng(id: u8, sample_rate: f64, mapping: OutputMapping, rng: Rng) -> Self {
        let session = SessionConfig::default();
        let (poke_tx, poke_rx) = event_channel(POKE_QUEUE_CAPACITY);

        let mut mesh = Self {
            node: ModalNode::with_rng(id, session.personality, rng),
            renderer: AudioRenderer::new(sample_rate, mapping),
            session: session.clone(),
            receiver: ConfigReceiver::new(),
            poke_tx,
            poke_rx,
            sequence: 0,
            uptime_us: 0,
        };
        mesh.configure(&session);

        info!(node_id = id, sample_rate, ?mapping, "mesh node initialized");
        mesh
    }

    pub fn id(&self) -> u8 {
        self.node.id()
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

    /// Session currently in effect
    pub fn session(&self) -> &SessionConfig {
        &self.session
    }

    pub fn is_running(&self) -> bool {
        self.node.is_running()
    }

    /// Control time elapsed since construction
    pub fn uptime_ms(&self) -> u32 {
        (self.uptime_us / 1000) as u32
    }

    /// Chunks received so far in an open configuration transfer
    pub fn config_progress(&self) -> Option<usize> {
        self.receiver.is_active().then(|| self.receiver.received_count())
    }

    /// Validate and apply a session to this device
    pub fn apply_session(&mut self, session: &SessionConfig) -> Result<(), ConfigError> {
        session.validate()?;
        self.configure(session);
        self.session = session.clone();
        info!(
            node_id = self.id(),
            session = %session.session_id,
            frequency = session.node_frequency(self.id()),
            "session applied"
        );
        Ok(())
    }

    fn configure(&mut self, session: &SessionConfig) {
        let base = session.node_frequency(self.id());
        self.node.set_personality(session.personality);
        self.node.set_control_rate(session.control_rate_hz);
        self.node.set_poke_duration(session.poke_duration_ms);
        for (k, template) in session.modes.iter().enumerate().take(MAX_MODES) {
            self.node
                .configure_mode(k, frequency_to_omega(base * template.ratio), template.damping, template.weight);
        }
        self.renderer.set_master_gain(session.master_gain);
    }

    /// Queue a poke for the next control tick. Returns false if the queue is full.
    pub fn queue_poke(&mut self, poke: PokeEvent) -> bool {
        self.poke_tx.send(EngineEvent::Poke(poke))
    }

    /// Pokes waiting for the control task
    pub fn pending_pokes(&self) -> usize {
        self.poke_rx.len()
    }

    // ------------------------------------------------------------------
    // Network side
    // ------------------------------------------------------------------

    /// Decode and handle one received packet.
    ///
    /// Returns the encoded reply, if any. Packets addressed elsewhere or
    /// echoed from this node are ignored.
    pub fn handle_packet(&mut self, bytes: &[u8]) -> Result<Option<Vec<u8>>, ProtocolError> {
        let packet = Packet::decode(bytes)?;
        let header = packet.header;
        if !header.is_for(self.id()) || header.source_id == self.id() {
            return Ok(None);
        }

        match self.handle_message(header.source_id, packet.message) {
            Some(reply) => self.encode(header.source_id, reply).map(Some),
            None => Ok(None),
        }
    }

    /// Handle one message from `source_id`, returning the reply to send back
    pub fn handle_message(&mut self, source_id: u8, message: Message) -> Option<Message> {
        debug!(node_id = self.id(), source_id, kind = ?message.message_type(), "message received");

        match message {
            Message::Poke { .. } => {
                if let Some(poke) = message.to_poke(source_id) {
                    self.queue_poke(poke);
                }
                None
            }
            Message::Start { start_time_ms } => {
                info!(node_id = self.id(), start_time_ms, "session starting");
                self.node.start();
                None
            }
            Message::Stop => {
                info!(node_id = self.id(), "session stopping");
                self.node.stop();
                None
            }
            Message::Reset => {
                info!(node_id = self.id(), "resetting node state");
                self.node.reset();
                None
            }
            Message::CfgBegin {
                total_size,
                num_chunks,
                checksum,
            } => self
                .receiver
                .begin(total_size as usize, num_chunks as usize, checksum)
                .err()
                .map(|e| self.reject(e)),
            Message::CfgChunk { index, data } => self
                .receiver
                .accept_chunk(index as usize, &data)
                .err()
                .map(|e| self.reject(e)),
            Message::CfgEnd { checksum } => Some(self.finish_transfer(checksum)),
            Message::CfgAck { .. } | Message::CfgNack { .. } | Message::State { .. } | Message::Heartbeat { .. } => {
                None
            }
        }
    }

    fn reject(&mut self, error: ProtocolError) -> Message {
        warn!(node_id = self.id(), %error, "configuration transfer rejected");
        self.receiver.cancel();
        Message::CfgNack {
            status: error.status_code(),
        }
    }

    fn finish_transfer(&mut self, checksum: u32) -> Message {
        let blob = match self.receiver.finish(checksum) {
            Ok(blob) => blob,
            Err(error) => return self.reject(error),
        };

        let applied = SessionConfig::from_bytes(&blob).and_then(|session| self.apply_session(&session));
        match applied {
            Ok(()) => Message::CfgAck { status: STATUS_OK },
            Err(error) => {
                warn!(node_id = self.id(), %error, "received configuration is invalid");
                Message::CfgNack {
                    status: STATUS_INVALID_CONFIG,
                }
            }
        }
    }

    /// Wrap `message` in a packet from this node to `dest_id`
    pub fn encode(&mut self, dest_id: u8, message: Message) -> Result<Vec<u8>, ProtocolError> {
        let header = Header::new(self.id(), dest_id, self.sequence, self.uptime_ms() as u16);
        self.sequence = self.sequence.wrapping_add(1);
        Packet::new(header, message).encode()
    }

    /// Mode-0 telemetry for the hub
    pub fn state_message(&self) -> Message {
        let a = self.node.mode0_amplitude();
        Message::State {
            re: a.re as f32,
            im: a.im as f32,
            amplitude: self.node.amplitude() as f32,
        }
    }

    pub fn state_packet(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let message = self.state_message();
        self.encode(BROADCAST_ID, message)
    }

    pub fn heartbeat_packet(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let message = Message::Heartbeat {
            uptime_ms: self.uptime_ms(),
            cpu_usage: 0,
        };
        self.encode(BROADCAST_ID, message)
    }

    // ------------------------------------------------------------------
    // Real-time side
    // ------------------------------------------------------------------

    /// One control period: apply at most one queued poke, then integrate
    pub fn control_tick(&mut self) {
        if let Some(EngineEvent::Poke(poke)) = self.poke_rx.try_recv() {
            self.node.apply_poke(&poke);
        }
        self.node.step();
        self.uptime_us += (self.node.dt() * 1e6).round() as u64;
    }

    /// Render one block; with `ModePerChannel` pass one slice per mode
    pub fn render(&mut self, outputs: &mut [&mut [f32]]) {
        self.renderer.render(&self.node, outputs);
    }
}
