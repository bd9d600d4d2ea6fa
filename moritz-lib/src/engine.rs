//! High-level message processing.
//!
//! The engine worker drains the transport's frame channel, reacts to
//! pairing and time requests on behalf of the impersonated cube, tracks
//! per-device state in the [`DeviceRegistry`] and publishes domain
//! events. Commands submitted from outside are encoded and forwarded to
//! the transport.

use crate::bus::{Event, EventBus};
use crate::constants::{CUBE_ID, ENGINE_POLL_PERIOD, QUEUE_POLL_TIMEOUT};
use crate::cul::CulLink;
use crate::error::MoritzError;
use crate::frame::MoritzFrame;
use crate::message::{AckState, DeviceType, MoritzPayload, OutgoingMessage};
use crate::registry::{DeviceRegistry, DeviceSnapshot};
use chrono::Local;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Identity this host answers for. Pair pongs and time replies are
    /// sent from this address.
    pub cube_id: u32,
    pub pair_as_cube: bool,
    pub pair_as_wall_thermostat: bool,
    pub pair_as_shutter_contact: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            cube_id: CUBE_ID,
            pair_as_cube: true,
            pair_as_wall_thermostat: false,
            pair_as_shutter_contact: false,
        }
    }
}

impl EngineConfig {
    fn any_pair_role(&self) -> bool {
        self.pair_as_cube || self.pair_as_wall_thermostat || self.pair_as_shutter_contact
    }
}

/// Clonable command ingress for external collaborators.
#[derive(Clone)]
pub struct CommandSender {
    tx: Sender<OutgoingMessage>,
}

impl CommandSender {
    /// Queues a message for transmission. The encoding is validated here
    /// so a malformed command is rejected at the call site instead of
    /// being dropped later on the engine loop. Acknowledgements arrive
    /// asynchronously via the event bus.
    pub fn submit(&self, message: OutgoingMessage) -> Result<(), MoritzError> {
        message.encode()?;
        let _ = self.tx.send(message);
        Ok(())
    }
}

/// Running engine worker.
pub struct EngineHandle {
    commands: CommandSender,
    registry: DeviceRegistry,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl EngineHandle {
    pub fn commands(&self) -> CommandSender {
        self.commands.clone()
    }

    /// Consistent snapshot of every device heard from so far.
    pub fn state(&self) -> HashMap<u32, DeviceSnapshot> {
        self.registry.snapshot()
    }

    pub fn registry(&self) -> DeviceRegistry {
        self.registry.clone()
    }

    pub fn shutdown(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

pub struct MessageEngine {
    config: EngineConfig,
    registry: DeviceRegistry,
    bus: EventBus,
    cul: CulLink,
    command_rx: Receiver<OutgoingMessage>,
}

impl MessageEngine {
    /// Starts the engine worker on the given transport link. The bus and
    /// its subscribers are fixed from here on.
    pub fn spawn(
        config: EngineConfig,
        bus: EventBus,
        cul: CulLink,
    ) -> Result<EngineHandle, MoritzError> {
        let (tx, command_rx) = unbounded();
        let registry = DeviceRegistry::new();
        let stop = Arc::new(AtomicBool::new(false));

        let engine = MessageEngine {
            config,
            registry: registry.clone(),
            bus,
            cul,
            command_rx,
        };
        let worker_stop = stop.clone();
        let worker = thread::Builder::new()
            .name("moritz-engine".into())
            .spawn(move || engine.run(worker_stop))?;

        Ok(EngineHandle {
            commands: CommandSender { tx },
            registry,
            stop,
            worker: Some(worker),
        })
    }

    fn run(self, stop: Arc<AtomicBool>) {
        while !stop.load(Ordering::Relaxed) {
            if let Ok(line) = self.cul.frame_rx.recv_timeout(QUEUE_POLL_TIMEOUT) {
                self.handle_line(&line);
            }

            if let Ok(message) = self.command_rx.recv_timeout(QUEUE_POLL_TIMEOUT) {
                debug!(msg_type = ?message.msg_type, "forwarding submitted command");
                self.send(&message);
            }

            thread::sleep(ENGINE_POLL_PERIOD);
        }
        info!("engine worker stopped");
    }

    /// Splits the RSSI tail off a received line and decodes the rest.
    /// Malformed frames are logged and dropped; the loop never stops
    /// over bad input.
    fn handle_line(&self, line: &str) {
        if !line.is_ascii() || line.len() < 4 {
            warn!(%line, "received line too short for a frame, ignoring");
            return;
        }
        let (body, rssi) = line.split_at(line.len() - 2);
        let signal_strength = match u8::from_str_radix(rssi, 16) {
            Ok(value) => value,
            Err(_) => {
                error!(%line, "invalid signal strength tail, ignoring frame");
                return;
            }
        };
        match MoritzFrame::decode(body) {
            Ok(frame) => self.dispatch(frame, signal_strength),
            Err(err) => error!(%line, %err, "message parsing failed, ignoring"),
        }
    }

    fn dispatch(&self, frame: MoritzFrame, signal_strength: u8) {
        let payload = match frame.decoded_payload() {
            Ok(payload) => payload,
            Err(err) => {
                error!(%frame, %err, "payload decoding failed, ignoring");
                return;
            }
        };
        match payload {
            MoritzPayload::PairPing { .. } => self.handle_pair_ping(frame),
            MoritzPayload::TimeRequest if frame.receiver_id == self.config.cube_id => {
                self.handle_time_request(frame)
            }
            MoritzPayload::ThermostatState(status) => {
                self.registry
                    .apply_status(frame.sender_id, &status, signal_strength);
                info!("thermostat state updated for 0x{:X}", frame.sender_id);
                self.bus.publish(&Event::ThermostatStateReceived {
                    frame,
                    signal_strength,
                });
            }
            MoritzPayload::Ack { state, status }
                if frame.receiver_id == self.config.cube_id && state == AckState::Ok =>
            {
                match &status {
                    Some(status) => {
                        self.registry
                            .apply_status(frame.sender_id, status, signal_strength);
                        info!("ack and thermostat state updated for 0x{:X}", frame.sender_id);
                    }
                    None => self.registry.record_contact(frame.sender_id, signal_strength),
                }
                self.bus.publish(&Event::ThermostatStateReceived {
                    frame,
                    signal_strength,
                });
            }
            _ => warn!(%frame, "unhandled message, dropping"),
        }
    }

    fn handle_pair_ping(&self, frame: MoritzFrame) {
        info!("received pair ping from 0x{:X}", frame.sender_id);
        self.bus.publish(&Event::DevicePairRequest {
            frame: frame.clone(),
        });

        if frame.is_broadcast() {
            if !self.config.any_pair_role() {
                info!("pairing to new device but no pair role enabled, ignoring");
                return;
            }
            self.answer_pair_ping(&frame, "pair after factory reset");
        } else if frame.receiver_id == self.config.cube_id {
            self.answer_pair_ping(&frame, "pair after battery replacement");
        } else {
            info!(
                "pair request addressed to other device 0x{:X}, ignoring",
                frame.receiver_id
            );
        }
    }

    /// Answers a pair ping with a pong from the cube identity. The
    /// thermostat only listens briefly after its ping, so without enough
    /// airtime to answer promptly we skip and let it retry.
    fn answer_pair_ping(&self, frame: &MoritzFrame, context: &str) {
        if !self.cul.has_send_budget() {
            info!("NOT responding to {context} as no send budget to be on time");
            return;
        }
        let response = OutgoingMessage::pair_pong(
            1,
            self.config.cube_id,
            frame.sender_id,
            frame.group_id,
            DeviceType::Cube,
        );
        info!("responding to {context}");
        self.send(&response);
        self.bus.publish(&Event::DevicePairAccepted { response });
    }

    fn handle_time_request(&self, frame: MoritzFrame) {
        info!(
            "time information requested by 0x{:X}, responding",
            frame.sender_id
        );
        let response = OutgoingMessage::time_information(
            1,
            self.config.cube_id,
            frame.sender_id,
            frame.group_id,
            Local::now().naive_local(),
        );
        self.send(&response);
    }

    fn send(&self, message: &OutgoingMessage) {
        match message.encode() {
            Ok(wire) => {
                debug!(%wire, "queueing for transmission");
                let _ = self.cul.send_tx.send(wire);
            }
            Err(err) => error!(%err, "encoding outgoing message failed, dropping"),
        }
    }
}
