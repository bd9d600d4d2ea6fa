//! Encoding tests against known-good wire output.

use moritz_lib::{
    DeviceType, MoritzError, MoritzFrame, MoritzPayload, MsgType, OutgoingMessage, SendPayload,
    ThermostatMode,
};

#[test]
fn test_encodes_set_temperature() {
    let message =
        OutgoingMessage::set_temperature(0xB9, 0x123456, 0x0B3554, 0, 5.5, ThermostatMode::Manual);
    assert_eq!(message.encode().unwrap(), "Zs0BB900401234560B3554004B");
}

#[test]
fn test_set_temperature_for_a_group_sets_the_flag() {
    let message =
        OutgoingMessage::set_temperature(0xB9, 0x123456, 0x0B3554, 5, 5.5, ThermostatMode::Manual);
    let wire = message.encode().unwrap();
    let frame = MoritzFrame::decode(&wire).unwrap();
    assert_eq!(frame.flag, 0x04);
    assert_eq!(frame.group_id, 5);
}

#[test]
fn test_set_temperature_clamps_and_rounds() {
    let cases = [
        (45.0, 30.5), // ON
        (0.0, 4.5),   // OFF
        (21.3, 21.5),
        (21.2, 21.0),
        (18.0, 18.0),
    ];
    for (requested, expected) in cases {
        let message = OutgoingMessage::set_temperature(
            0x01,
            0x123456,
            0x0B3554,
            0,
            requested,
            ThermostatMode::Auto,
        );
        let frame = MoritzFrame::decode(&message.encode().unwrap()).unwrap();
        let MoritzPayload::SetTemperature {
            desired_temperature,
            mode,
        } = frame.decoded_payload().unwrap()
        else {
            panic!("expected a set-temperature payload");
        };
        assert_eq!(desired_temperature, expected, "requested {requested}");
        assert_eq!(mode, ThermostatMode::Auto);
    }
}

#[test]
fn test_missing_set_temperature_parameters_are_rejected() {
    let message = OutgoingMessage {
        msg_type: MsgType::SetTemperature,
        counter: 0xB9,
        flag: 0,
        sender_id: 0x123456,
        receiver_id: 0x0B3554,
        group_id: 0,
        payload: SendPayload::SetTemperature {
            desired_temperature: None,
            mode: Some(ThermostatMode::Manual),
        },
    };
    assert!(matches!(
        message.encode(),
        Err(MoritzError::MissingPayloadParameter("desired_temperature"))
    ));

    let message = OutgoingMessage {
        payload: SendPayload::SetTemperature {
            desired_temperature: Some(5.5),
            mode: None,
        },
        ..message
    };
    assert!(matches!(
        message.encode(),
        Err(MoritzError::MissingPayloadParameter("mode"))
    ));
}

#[test]
fn test_encodes_time_information() {
    let time = chrono::NaiveDate::from_ymd_opt(2014, 12, 1)
        .unwrap()
        .and_hms_opt(2, 33, 23)
        .unwrap();
    let message = OutgoingMessage::time_information(0x02, 0x123456, 0xE016C, 0, time);
    assert_eq!(message.encode().unwrap(), "Zs0F0204031234560E016C000E0102E117");
}

#[test]
fn test_encodes_time_information_request_with_request_flag() {
    let message = OutgoingMessage {
        msg_type: MsgType::TimeInformation,
        counter: 0x00,
        flag: 0,
        sender_id: 0xE016C,
        receiver_id: 0x123456,
        group_id: 0,
        payload: SendPayload::Time(None),
    };
    assert_eq!(message.encode().unwrap(), "Zs0A000A030E016C12345600");
}

#[test]
fn test_encodes_wake_up_without_payload() {
    let message = OutgoingMessage::wake_up(0xB9, 0x123456, 0x0B3554, 0);
    assert_eq!(message.encode().unwrap(), "Zs0AB900F11234560B355400");
}

#[test]
fn test_encodes_pair_pong() {
    let message = OutgoingMessage::pair_pong(0x01, 0x123456, 0xE016C, 0, DeviceType::Cube);
    assert_eq!(message.encode().unwrap(), "Zs0B0100011234560E016C0000");
}

#[test]
fn test_encoded_messages_decode_back_structurally() {
    let message =
        OutgoingMessage::set_temperature(0xB9, 0x123456, 0x0B3554, 0, 5.5, ThermostatMode::Manual);
    let frame = MoritzFrame::decode(&message.encode().unwrap()).unwrap();
    assert_eq!(frame.msg_type, MsgType::SetTemperature);
    assert_eq!(frame.counter, 0xB9);
    assert_eq!(frame.sender_id, 0x123456);
    assert_eq!(frame.receiver_id, 0x0B3554);
    assert_eq!(
        frame.decoded_payload().unwrap(),
        MoritzPayload::SetTemperature {
            desired_temperature: 5.5,
            mode: ThermostatMode::Manual,
        }
    );
    // and back onto the wire unchanged
    assert_eq!(frame.to_wire(), "Zs0BB900401234560B3554004B");
}
