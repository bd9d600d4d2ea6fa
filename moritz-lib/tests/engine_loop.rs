//! Engine behavior tests, driven over raw channels instead of a serial
//! port. The test side holds the transport's end of both queues: it
//! injects received lines (RSSI tail attached) and observes the wire
//! lines the engine queues for transmission.

use crossbeam_channel::{unbounded, Receiver, Sender};
use moritz_lib::{
    CulLink, EngineConfig, Event, EventBus, MoritzFrame, MoritzPayload, MsgType, OutgoingMessage,
    SendPayload, ThermostatMode,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

struct Harness {
    link: CulLink,
    frame_tx: Sender<String>,
    wire_rx: Receiver<String>,
}

fn harness() -> Harness {
    let (send_tx, wire_rx) = unbounded();
    let (frame_tx, frame_rx) = unbounded();
    Harness {
        link: CulLink {
            send_tx,
            frame_rx,
            budget_ms: Arc::new(AtomicU32::new(0)),
        },
        frame_tx,
        wire_rx,
    }
}

fn recording_bus() -> (EventBus, Arc<Mutex<Vec<String>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let mut bus = EventBus::new();
    for topic in [
        moritz_lib::EventTopic::DevicePairRequest,
        moritz_lib::EventTopic::DevicePairAccepted,
        moritz_lib::EventTopic::ThermostatStateReceived,
    ] {
        let log = events.clone();
        bus.subscribe(topic, move |event: &Event| {
            log.lock().push(format!("{:?}", event.topic()));
        });
    }
    (bus, events)
}

/// Waits until the event log reaches the expected length.
fn wait_for_events(events: &Arc<Mutex<Vec<String>>>, count: usize) -> Vec<String> {
    for _ in 0..40 {
        if events.lock().len() >= count {
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    events.lock().clone()
}

#[test]
fn test_answers_broadcast_pair_ping_when_budget_allows() {
    let harness = harness();
    harness.link.budget_ms.store(5000, Ordering::Relaxed);
    let (bus, events) = recording_bus();
    let engine = moritz_lib::MessageEngine::spawn(EngineConfig::default(), bus, harness.link.clone())
        .expect("engine starts");

    harness
        .frame_tx
        .send("Z170004000E016C000000001001A04B45513039393234373642".to_owned())
        .unwrap();

    let wire = harness.wire_rx.recv_timeout(RECV_TIMEOUT).expect("pair pong queued");
    assert_eq!(wire, "Zs0B0100011234560E016C0000");

    let events = wait_for_events(&events, 2);
    assert_eq!(events, vec!["DevicePairRequest", "DevicePairAccepted"]);
    engine.shutdown();
}

#[test]
fn test_skips_pair_pong_without_send_budget() {
    let harness = harness();
    let (bus, events) = recording_bus();
    let engine = moritz_lib::MessageEngine::spawn(EngineConfig::default(), bus, harness.link.clone())
        .expect("engine starts");

    harness
        .frame_tx
        .send("Z170004000E016C000000001001A04B45513039393234373642".to_owned())
        .unwrap();

    assert!(harness.wire_rx.recv_timeout(Duration::from_millis(800)).is_err());
    let events = wait_for_events(&events, 1);
    assert_eq!(events, vec!["DevicePairRequest"]);
    engine.shutdown();
}

#[test]
fn test_ignores_pair_ping_addressed_to_another_cube() {
    let harness = harness();
    harness.link.budget_ms.store(5000, Ordering::Relaxed);
    let (bus, events) = recording_bus();
    let engine = moritz_lib::MessageEngine::spawn(EngineConfig::default(), bus, harness.link.clone())
        .expect("engine starts");

    harness
        .frame_tx
        .send("Z170004000E016CABCDEF001001A04B45513039393234373642".to_owned())
        .unwrap();

    assert!(harness.wire_rx.recv_timeout(Duration::from_millis(800)).is_err());
    let events = wait_for_events(&events, 1);
    assert_eq!(events, vec!["DevicePairRequest"]);
    engine.shutdown();
}

#[test]
fn test_answers_re_pair_ping_addressed_to_us() {
    let harness = harness();
    harness.link.budget_ms.store(5000, Ordering::Relaxed);
    let (bus, _events) = recording_bus();
    let engine = moritz_lib::MessageEngine::spawn(EngineConfig::default(), bus, harness.link.clone())
        .expect("engine starts");

    harness
        .frame_tx
        .send("Z170004000E016C123456001001A04B45513039393234373642".to_owned())
        .unwrap();

    let wire = harness.wire_rx.recv_timeout(RECV_TIMEOUT).expect("pair pong queued");
    assert_eq!(wire, "Zs0B0100011234560E016C0000");
    engine.shutdown();
}

#[test]
fn test_answers_time_request_regardless_of_budget() {
    let harness = harness();
    let (bus, _events) = recording_bus();
    let engine = moritz_lib::MessageEngine::spawn(EngineConfig::default(), bus, harness.link.clone())
        .expect("engine starts");

    harness.frame_tx.send("Z0A000A030E016C123456001F".to_owned()).unwrap();

    let wire = harness.wire_rx.recv_timeout(RECV_TIMEOUT).expect("time reply queued");
    let frame = MoritzFrame::decode(&wire).expect("reply is a valid frame");
    assert_eq!(frame.msg_type, MsgType::TimeInformation);
    assert_eq!(frame.flag, 0x04);
    assert_eq!(frame.sender_id, 0x123456);
    assert_eq!(frame.receiver_id, 0xE016C);
    assert!(matches!(
        frame.decoded_payload().unwrap(),
        MoritzPayload::Time(_)
    ));
    engine.shutdown();
}

#[test]
fn test_state_report_updates_the_registry() {
    let harness = harness();
    let (bus, events) = recording_bus();
    let engine = moritz_lib::MessageEngine::spawn(EngineConfig::default(), bus, harness.link.clone())
        .expect("engine starts");

    harness
        .frame_tx
        .send("Z0F61046008FFE90000000019002000CA3C".to_owned())
        .unwrap();

    let events = wait_for_events(&events, 1);
    assert_eq!(events, vec!["ThermostatStateReceived"]);

    let state = engine.state();
    let snapshot = state.get(&0x8FFE9).expect("device is registered");
    assert_eq!(snapshot.mode, Some(ThermostatMode::Manual));
    assert_eq!(snapshot.desired_temperature, Some(16.0));
    assert_eq!(snapshot.valve_position, Some(0));
    assert_eq!(snapshot.measured_temperature, Some(20.2));
    assert_eq!(snapshot.signal_strength, 0x3C);
    engine.shutdown();
}

#[test]
fn test_ok_ack_merges_status_into_the_registry() {
    let harness = harness();
    let (bus, events) = recording_bus();
    let engine = moritz_lib::MessageEngine::spawn(EngineConfig::default(), bus, harness.link.clone())
        .expect("engine starts");

    harness
        .frame_tx
        .send("Z0EB902020B3554123456000119000B28".to_owned())
        .unwrap();

    let events = wait_for_events(&events, 1);
    assert_eq!(events, vec!["ThermostatStateReceived"]);

    let snapshot = engine.registry().get(0x0B3554).expect("device is registered");
    assert_eq!(snapshot.mode, Some(ThermostatMode::Manual));
    assert_eq!(snapshot.desired_temperature, Some(5.5));
    assert_eq!(snapshot.signal_strength, 0x28);
    engine.shutdown();
}

#[test]
fn test_ok_ack_without_status_registers_the_device() {
    let harness = harness();
    let (bus, events) = recording_bus();
    let engine = moritz_lib::MessageEngine::spawn(EngineConfig::default(), bus, harness.link.clone())
        .expect("engine starts");

    harness
        .frame_tx
        .send("Z0BB902020B3554123456000128".to_owned())
        .unwrap();

    let events = wait_for_events(&events, 1);
    assert_eq!(events, vec!["ThermostatStateReceived"]);

    let snapshot = engine.registry().get(0x0B3554).expect("first contact registers");
    assert_eq!(snapshot.mode, None);
    assert_eq!(snapshot.desired_temperature, None);
    assert_eq!(snapshot.signal_strength, 0x28);
    engine.shutdown();
}

#[test]
fn test_malformed_lines_are_dropped_without_stopping_the_engine() {
    let harness = harness();
    let (bus, _events) = recording_bus();
    let engine = moritz_lib::MessageEngine::spawn(EngineConfig::default(), bus, harness.link.clone())
        .expect("engine starts");

    // bad hex, then a valid report
    harness.frame_tx.send("ZXXNOTAFRAME42".to_owned()).unwrap();
    harness
        .frame_tx
        .send("Z0F61046008FFE90000000019002000CA3C".to_owned())
        .unwrap();

    for _ in 0..40 {
        if !engine.state().is_empty() {
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    assert!(engine.state().contains_key(&0x8FFE9));
    engine.shutdown();
}

#[test]
fn test_submitted_commands_are_encoded_and_forwarded() {
    let harness = harness();
    let (bus, _events) = recording_bus();
    let engine = moritz_lib::MessageEngine::spawn(EngineConfig::default(), bus, harness.link.clone())
        .expect("engine starts");

    engine
        .commands()
        .submit(OutgoingMessage::set_temperature(
            0xB9,
            0x123456,
            0x0B3554,
            0,
            5.5,
            ThermostatMode::Manual,
        ))
        .expect("well-formed command");

    let wire = harness.wire_rx.recv_timeout(RECV_TIMEOUT).expect("command forwarded");
    assert_eq!(wire, "Zs0BB900401234560B3554004B");
    engine.shutdown();
}

#[test]
fn test_malformed_command_is_rejected_at_submission() {
    let harness = harness();
    let (bus, _events) = recording_bus();
    let engine = moritz_lib::MessageEngine::spawn(EngineConfig::default(), bus, harness.link.clone())
        .expect("engine starts");

    let result = engine.commands().submit(OutgoingMessage {
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
    });
    assert!(matches!(
        result,
        Err(moritz_lib::MoritzError::MissingPayloadParameter("desired_temperature"))
    ));
    assert!(harness.wire_rx.recv_timeout(Duration::from_millis(800)).is_err());
    engine.shutdown();
}
