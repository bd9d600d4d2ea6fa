use crate::constants::HEADER_HEX_DIGITS;
use crate::error::MoritzError;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::fmt;

/// Message tags as assigned by the MAX! radio protocol.
///
/// The set is taken from the FHEM CUL_MAX module. Tags without a
/// structured payload implementation decode as [`Opaque`] and keep
/// their payload verbatim.
///
/// [`Opaque`]: crate::message::MoritzPayload::Opaque
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum MsgType {
    PairPing = 0x00,
    PairPong = 0x01,
    Ack = 0x02,
    TimeInformation = 0x03,

    ConfigWeekProfile = 0x10,
    ConfigTemperatures = 0x11,
    ConfigValve = 0x12,

    AddLinkPartner = 0x20,
    RemoveLinkPartner = 0x21,
    SetGroupId = 0x22,
    RemoveGroupId = 0x23,

    ShutterContactState = 0x30,

    SetTemperature = 0x40,
    WallThermostatControl = 0x42,
    SetComfortTemperature = 0x43,
    SetEcoTemperature = 0x44,

    PushButtonState = 0x50,

    ThermostatState = 0x60,

    WallThermostatState = 0x70,

    SetDisplayActualTemperature = 0x82,

    Reset = 0xF0,
    WakeUp = 0xF1,
}

/// A message as seen on the Moritz wire.
///
/// Header fields are fully parsed; the payload stays raw until
/// [`decoded_payload`] is called, so frames with opaque or malformed
/// payloads can still be routed and re-serialized.
///
/// [`decoded_payload`]: MoritzFrame::decoded_payload
#[derive(Debug, Clone, PartialEq)]
pub struct MoritzFrame {
    pub counter: u8,
    pub flag: u8,
    pub msg_type: MsgType,
    /// 24-bit address of the sending device.
    pub sender_id: u32,
    /// 24-bit address of the receiving device; 0 means broadcast.
    pub receiver_id: u32,
    pub group_id: u8,
    pub payload: Vec<u8>,
}

fn hex_field(line: &str, range: std::ops::Range<usize>, what: &str) -> Result<u32, MoritzError> {
    u32::from_str_radix(&line[range], 16)
        .map_err(|_| MoritzError::DecodeFormat(format!("invalid hex in {what}")))
}

impl MoritzFrame {
    /// Parses a wire line into a frame.
    ///
    /// Accepts received lines (`"Z…"`) as well as our own transmissions
    /// (`"Zs…"`), which round-trip through here unchanged. The caller
    /// must strip the trailing RSSI digits of a received line first.
    pub fn decode(line: &str) -> Result<Self, MoritzError> {
        let body = line
            .strip_prefix("Zs")
            .or_else(|| line.strip_prefix('Z'))
            .unwrap_or(line);
        if !body.is_ascii() || body.len() < 2 {
            return Err(MoritzError::DecodeFormat("line too short for a frame".into()));
        }

        let length = hex_field(body, 0..2, "length")? as usize;
        if body.len() - 2 != length * 2 {
            return Err(MoritzError::LengthMismatch {
                expected: length,
                actual: (body.len() - 2) / 2,
            });
        }
        if body.len() - 2 < HEADER_HEX_DIGITS {
            return Err(MoritzError::DecodeFormat("frame shorter than header".into()));
        }

        let counter = hex_field(body, 2..4, "counter")? as u8;
        let flag = hex_field(body, 4..6, "flag")? as u8;
        let tag = hex_field(body, 6..8, "message type")? as u8;
        let sender_id = hex_field(body, 8..14, "sender id")?;
        let receiver_id = hex_field(body, 14..20, "receiver id")?;
        let group_id = hex_field(body, 20..22, "group id")? as u8;
        let payload = hex::decode(&body[22..])?;

        let msg_type = MsgType::try_from(tag).map_err(|_| MoritzError::UnknownMessage(tag))?;

        Ok(MoritzFrame {
            counter,
            flag,
            msg_type,
            sender_id,
            receiver_id,
            group_id,
            payload,
        })
    }

    /// Serializes the frame back into its transmit form (`"Zs…"`).
    pub fn to_wire(&self) -> String {
        let mut body = format!(
            "{:02X}{:02X}{:02X}{:06X}{:06X}{:02X}",
            self.counter,
            self.flag,
            u8::from(self.msg_type),
            self.sender_id,
            self.receiver_id,
            self.group_id,
        );
        body.push_str(&hex::encode_upper(&self.payload));
        format!("Zs{:02X}{}", body.len() / 2, body)
    }

    pub fn is_broadcast(&self) -> bool {
        self.receiver_id == 0
    }
}

impl fmt::Display for MoritzFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<{:?} counter:{:x} flag:{:x} sender:{:x} receiver:{:x} group:{:x} payload:{}>",
            self.msg_type,
            self.counter,
            self.flag,
            self.sender_id,
            self.receiver_id,
            self.group_id,
            hex::encode_upper(&self.payload),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_unknown_tag() {
        // header-only frame with tag 0x05
        let err = MoritzFrame::decode("Z0A00000512345600000000").unwrap_err();
        assert!(matches!(err, MoritzError::UnknownMessage(0x05)));
    }

    #[test]
    fn test_rejects_length_mismatch() {
        let err = MoritzFrame::decode("Z0FB900401234560B3554004B").unwrap_err();
        assert!(matches!(
            err,
            MoritzError::LengthMismatch { expected: 15, actual: 11 }
        ));
    }

    #[test]
    fn test_rejects_malformed_hex() {
        let err = MoritzFrame::decode("Z0AXY00F11234560B355400").unwrap_err();
        assert!(matches!(err, MoritzError::DecodeFormat(_)));
    }

    #[test]
    fn test_sender_id_keeps_leading_zero_on_rewrite() {
        let frame = MoritzFrame::decode("Z0F61046008FFE90000000019002000CA").unwrap();
        assert_eq!(frame.to_wire(), "Zs0F61046008FFE90000000019002000CA");
    }
}
