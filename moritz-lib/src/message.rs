//! Structured payloads behind the raw frame.
//!
//! Decoding is lazy: [`MoritzFrame`] keeps its payload as raw bytes and
//! [`MoritzFrame::decoded_payload`] interprets them on request. Encoding
//! goes the other way: an [`OutgoingMessage`] carries a typed
//! [`SendPayload`] and produces the complete `"Zs…"` wire line.

use crate::error::MoritzError;
use crate::frame::{MoritzFrame, MsgType};
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use strum_macros::Display;

/// Device classes of the MAX! ecosystem, by their wire code.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize, IntoPrimitive, TryFromPrimitive,
)]
#[repr(u8)]
pub enum DeviceType {
    Cube = 0,
    HeatingThermostat = 1,
    HeatingThermostatPlus = 2,
    WallMountedThermostat = 3,
    ShutterContact = 4,
    PushButton = 5,
}

/// Thermostat operating mode (2-bit wire value).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize, IntoPrimitive)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ThermostatMode {
    Auto = 0,
    Manual = 1,
    Temporary = 2,
    Boost = 3,
}

impl ThermostatMode {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => ThermostatMode::Auto,
            1 => ThermostatMode::Manual,
            2 => ThermostatMode::Temporary,
            _ => ThermostatMode::Boost,
        }
    }
}

/// Whether a pair ping is a fresh pairing or a re-pair to a known cube.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum PairMode {
    /// Broadcast ping after a factory reset.
    Pair,
    /// Addressed ping, typically after a battery replacement.
    RePair,
}

/// Acknowledgement outcome reported by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum AckState {
    Ok,
    InvalidCommand,
}

/// Decoded thermostat status block (3 bytes plus optional tail).
#[derive(Debug, Clone, PartialEq)]
pub struct ThermostatStatus {
    pub mode: ThermostatMode,
    pub dst_setting: bool,
    pub lan_gateway: bool,
    pub is_locked: bool,
    pub rf_error: bool,
    pub battery_low: bool,
    /// Target temperature in °C, half-degree steps.
    pub desired_temperature: f64,
    /// Valve opening in percent as reported; not range-checked.
    pub valve_position: u8,
    /// Room temperature in °C; only present on a 2-byte tail outside
    /// temporary mode.
    pub measured_temperature: Option<f64>,
}

impl ThermostatStatus {
    /// Decodes the leading 3-byte status block.
    pub(crate) fn decode(payload: &[u8]) -> Result<Self, MoritzError> {
        if payload.len() < 3 {
            return Err(MoritzError::DecodeFormat(format!(
                "thermostat status needs 3 bytes, got {}",
                payload.len()
            )));
        }
        let status = payload[0];
        // The lock/rferror/battery flags sit above bit 8 and are never
        // set in the single status byte carried here; real devices seem
        // to report them in a second status byte this message lacks.
        let hi = (status as u16) >> 9;
        Ok(ThermostatStatus {
            mode: ThermostatMode::from_bits(status),
            dst_setting: status & 0x04 != 0,
            lan_gateway: status & 0x08 != 0,
            is_locked: hi & 0x01 != 0,
            rf_error: hi & 0x02 != 0,
            battery_low: hi & 0x04 != 0,
            desired_temperature: f64::from(payload[2] & 0x7F) / 2.0,
            valve_position: payload[1],
            measured_temperature: None,
        })
    }

    /// Decodes the status block plus the optional trailing bytes of a
    /// state report: 2 bytes carry the measured temperature, 3 bytes a
    /// schedule date (accepted, not interpreted).
    pub(crate) fn decode_with_tail(payload: &[u8]) -> Result<Self, MoritzError> {
        let mut status = Self::decode(payload)?;
        if payload.len() == 5 && status.mode != ThermostatMode::Temporary {
            let raw = (u16::from(payload[3] & 0x01) << 8) | u16::from(payload[4]);
            status.measured_temperature = Some(f64::from(raw) / 10.0);
        }
        Ok(status)
    }
}

/// Structured view of a frame's payload.
#[derive(Debug, Clone, PartialEq)]
pub enum MoritzPayload {
    PairPing {
        firmware_version: String,
        device_type: DeviceType,
        selftest_result: u8,
        device_serial: String,
        pair_mode: PairMode,
    },
    PairPong {
        device_type: DeviceType,
    },
    Ack {
        state: AckState,
        /// Present when the device piggybacks its thermostat status.
        status: Option<ThermostatStatus>,
    },
    /// Empty time-information payload: the device asks for the time.
    TimeRequest,
    Time(NaiveDateTime),
    SetTemperature {
        desired_temperature: f64,
        mode: ThermostatMode,
    },
    ThermostatState(ThermostatStatus),
    /// Known tag without a structured payload; bytes preserved verbatim.
    Opaque(Vec<u8>),
}

impl MoritzFrame {
    /// Interprets the raw payload according to the message type.
    pub fn decoded_payload(&self) -> Result<MoritzPayload, MoritzError> {
        MoritzPayload::try_from(self)
    }
}

impl TryFrom<&MoritzFrame> for MoritzPayload {
    type Error = MoritzError;

    fn try_from(frame: &MoritzFrame) -> Result<Self, Self::Error> {
        let payload = frame.payload.as_slice();
        match frame.msg_type {
            MsgType::PairPing => decode_pair_ping(frame),
            MsgType::PairPong => {
                let code = *payload.first().ok_or_else(|| {
                    MoritzError::DecodeFormat("empty pair pong payload".into())
                })?;
                Ok(MoritzPayload::PairPong {
                    device_type: decode_device_type(code)?,
                })
            }
            MsgType::Ack => decode_ack(payload),
            MsgType::TimeInformation => {
                if payload.is_empty() {
                    Ok(MoritzPayload::TimeRequest)
                } else {
                    Ok(MoritzPayload::Time(decode_datetime(payload)?))
                }
            }
            MsgType::SetTemperature => {
                let packed = *payload.first().ok_or_else(|| {
                    MoritzError::DecodeFormat("empty set-temperature payload".into())
                })?;
                Ok(MoritzPayload::SetTemperature {
                    desired_temperature: f64::from(packed & 0x3F) / 2.0,
                    mode: ThermostatMode::from_bits(packed >> 6),
                })
            }
            MsgType::ThermostatState => Ok(MoritzPayload::ThermostatState(
                ThermostatStatus::decode_with_tail(payload)?,
            )),
            _ => Ok(MoritzPayload::Opaque(frame.payload.clone())),
        }
    }
}

fn decode_device_type(code: u8) -> Result<DeviceType, MoritzError> {
    DeviceType::try_from(code)
        .map_err(|_| MoritzError::DecodeFormat(format!("unknown device type {code}")))
}

fn decode_pair_ping(frame: &MoritzFrame) -> Result<MoritzPayload, MoritzError> {
    let payload = frame.payload.as_slice();
    if payload.len() < 3 {
        return Err(MoritzError::DecodeFormat(format!(
            "pair ping needs 3 bytes, got {}",
            payload.len()
        )));
    }
    let firmware = payload[0];
    let device_serial = std::str::from_utf8(&payload[3..])
        .map_err(|_| MoritzError::DecodeFormat("device serial is not ASCII".into()))?
        .to_owned();
    Ok(MoritzPayload::PairPing {
        firmware_version: format!("V{}.{}", firmware >> 4, firmware & 0x0F),
        device_type: decode_device_type(payload[1])?,
        selftest_result: payload[2],
        device_serial,
        pair_mode: if frame.is_broadcast() {
            PairMode::Pair
        } else {
            PairMode::RePair
        },
    })
}

fn decode_ack(payload: &[u8]) -> Result<MoritzPayload, MoritzError> {
    let state = match payload.first() {
        Some(0x01) => AckState::Ok,
        Some(0x81) => AckState::InvalidCommand,
        Some(other) => {
            return Err(MoritzError::DecodeFormat(format!(
                "unknown ack state 0x{other:02X}"
            )))
        }
        None => return Err(MoritzError::DecodeFormat("empty ack payload".into())),
    };
    let status = if payload.len() == 4 {
        Some(ThermostatStatus::decode(&payload[1..])?)
    } else {
        None
    };
    Ok(MoritzPayload::Ack { state, status })
}

fn decode_datetime(payload: &[u8]) -> Result<NaiveDateTime, MoritzError> {
    if payload.len() < 5 {
        return Err(MoritzError::DecodeFormat(format!(
            "time information needs 5 bytes, got {}",
            payload.len()
        )));
    }
    let year = 2000 + i32::from(payload[0]);
    let month = u32::from(((payload[3] >> 4) & 0x0C) | ((payload[4] >> 6) & 0x03));
    NaiveDate::from_ymd_opt(year, month, u32::from(payload[1]))
        .and_then(|date| {
            date.and_hms_opt(
                u32::from(payload[2]),
                u32::from(payload[3] & 0x3F),
                u32::from(payload[4] & 0x3F),
            )
        })
        .ok_or_else(|| MoritzError::DecodeFormat("invalid date-time".into()))
}

/// Packs a date-time into the 5-byte wire layout. The month is split:
/// its upper two bits ride in byte 3, the lower two in byte 4.
fn encode_datetime(time: &NaiveDateTime) -> [u8; 5] {
    let month = time.month() as u8;
    [
        (time.year() - 2000) as u8,
        time.day() as u8,
        time.hour() as u8,
        time.minute() as u8 | ((month & 0x0C) << 4),
        time.second() as u8 | ((month & 0x03) << 6),
    ]
}

/// Typed payload of an outgoing message.
///
/// `SetTemperature` keeps its parameters optional so callers that fill
/// commands from loosely-typed input (HTTP forms, config files) get a
/// [`MissingPayloadParameter`] error instead of a silent default.
///
/// [`MissingPayloadParameter`]: MoritzError::MissingPayloadParameter
#[derive(Debug, Clone, PartialEq)]
pub enum SendPayload {
    None,
    PairPong {
        device_type: DeviceType,
    },
    /// `None` requests the time, `Some` answers with it.
    Time(Option<NaiveDateTime>),
    SetTemperature {
        desired_temperature: Option<f64>,
        mode: Option<ThermostatMode>,
    },
    /// Raw bytes for tags without a structured encoder.
    Raw(Vec<u8>),
}

impl SendPayload {
    fn encode(&self) -> Result<Vec<u8>, MoritzError> {
        match self {
            SendPayload::None | SendPayload::Time(None) => Ok(Vec::new()),
            SendPayload::PairPong { device_type } => Ok(vec![u8::from(*device_type)]),
            SendPayload::Time(Some(time)) => Ok(encode_datetime(time).to_vec()),
            SendPayload::SetTemperature {
                desired_temperature,
                mode,
            } => {
                let desired = desired_temperature
                    .ok_or(MoritzError::MissingPayloadParameter("desired_temperature"))?;
                let mode = mode.ok_or(MoritzError::MissingPayloadParameter("mode"))?;
                // 4.5 reads as OFF and 30.5 as ON on the thermostat.
                let desired = if desired > 30.5 {
                    30.5
                } else if desired < 4.5 {
                    4.5
                } else {
                    (desired * 2.0).round() / 2.0
                };
                Ok(vec![(u8::from(mode) << 6) | ((desired * 2.0) as u8)])
            }
            SendPayload::Raw(bytes) => Ok(bytes.clone()),
        }
    }
}

/// A message prepared for transmission.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub msg_type: MsgType,
    pub counter: u8,
    /// Base flag byte; message types with a flag rule override it.
    pub flag: u8,
    pub sender_id: u32,
    pub receiver_id: u32,
    pub group_id: u8,
    pub payload: SendPayload,
}

impl OutgoingMessage {
    pub fn set_temperature(
        counter: u8,
        sender_id: u32,
        receiver_id: u32,
        group_id: u8,
        desired_temperature: f64,
        mode: ThermostatMode,
    ) -> Self {
        OutgoingMessage {
            msg_type: MsgType::SetTemperature,
            counter,
            flag: 0,
            sender_id,
            receiver_id,
            group_id,
            payload: SendPayload::SetTemperature {
                desired_temperature: Some(desired_temperature),
                mode: Some(mode),
            },
        }
    }

    pub fn pair_pong(
        counter: u8,
        sender_id: u32,
        receiver_id: u32,
        group_id: u8,
        device_type: DeviceType,
    ) -> Self {
        OutgoingMessage {
            msg_type: MsgType::PairPong,
            counter,
            flag: 0,
            sender_id,
            receiver_id,
            group_id,
            payload: SendPayload::PairPong { device_type },
        }
    }

    pub fn time_information(
        counter: u8,
        sender_id: u32,
        receiver_id: u32,
        group_id: u8,
        time: NaiveDateTime,
    ) -> Self {
        OutgoingMessage {
            msg_type: MsgType::TimeInformation,
            counter,
            flag: 0,
            sender_id,
            receiver_id,
            group_id,
            payload: SendPayload::Time(Some(time)),
        }
    }

    pub fn wake_up(counter: u8, sender_id: u32, receiver_id: u32, group_id: u8) -> Self {
        OutgoingMessage {
            msg_type: MsgType::WakeUp,
            counter,
            flag: 0,
            sender_id,
            receiver_id,
            group_id,
            payload: SendPayload::None,
        }
    }

    /// Factory-resets the addressed device.
    pub fn reset(counter: u8, sender_id: u32, receiver_id: u32, group_id: u8) -> Self {
        OutgoingMessage {
            msg_type: MsgType::Reset,
            counter,
            flag: 0,
            sender_id,
            receiver_id,
            group_id,
            payload: SendPayload::None,
        }
    }

    /// Serializes the message into its wire line.
    pub fn encode(&self) -> Result<String, MoritzError> {
        let payload = self.payload.encode()?;
        let flag = match self.msg_type {
            MsgType::TimeInformation => {
                if payload.is_empty() {
                    0x0A
                } else {
                    0x04
                }
            }
            MsgType::SetTemperature => {
                if self.group_id != 0 {
                    0x04
                } else {
                    0x00
                }
            }
            _ => self.flag,
        };
        let mut body = format!(
            "{:02X}{:02X}{:02X}{:06X}{:06X}{:02X}",
            self.counter,
            flag,
            u8::from(self.msg_type),
            self.sender_id,
            self.receiver_id,
            self.group_id,
        );
        body.push_str(&hex::encode_upper(&payload));
        Ok(format!("Zs{:02X}{}", body.len() / 2, body))
    }
}
