//! The rumqttc engine end to end
//!
//! Nothing listens on 127.0.0.1:1, so attempts there fail fast and drive the
//! backoff, give-up and stop paths. The connected paths run against the
//! in-process broker in `fake_broker`.


use fake_broker::{connack_with_assigned_id, disconnect_packet, publish_packet, FakeBroker};
use mqttkit::error::ErrorCode;
use mqttkit::mqtt::{
    ClientOptions, DisconnectPacket, DisconnectReasonCode, LifecycleEvent, LifecycleEventKind,
    Mqtt5Client,
};
use mqttkit::native::reconnect::ReconnectConfig;
use std::sync::Arc;
use std::time::{Duration, Instant};
use test_helpers::{init_runtime, recording_options_for, wait_until, Recorder, WAIT};

const UNREACHABLE_HOST: &str = "127.0.0.1";
const UNREACHABLE_PORT: u16 = 1;

fn wait_long(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(15);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

#[test]
fn test_unreachable_broker_fails_then_gives_up() {
    let event_loop = init_runtime();
    let recorder = Recorder::new();
    let options = recording_options_for(&recorder, UNREACHABLE_HOST, UNREACHABLE_PORT)
        .with_client_id("engine-gives-up")
        .with_connack_timeout(Duration::from_secs(2))
        .with_reconnect(ReconnectConfig {
            max_attempts: Some(1),
            backoff_pattern: vec![10],
            sustained_delay: 10,
        });

    let mut client = Mqtt5Client::new(options).unwrap();
    client.start().unwrap();

    assert!(wait_long(|| recorder.count(LifecycleEventKind::Stopped) == 1));

    assert_eq!(
        recorder.kinds(),
        vec![
            LifecycleEventKind::AttemptingConnect,
            LifecycleEventKind::ConnectionFailure,
            LifecycleEventKind::AttemptingConnect,
            LifecycleEventKind::ConnectionFailure,
            LifecycleEventKind::Stopped,
        ]
    );
    let failure = recorder.events()[1].error().and_then(|e| e.error_code());
    assert!(matches!(
        failure,
        Some(ErrorCode::ConnectionFailed) | Some(ErrorCode::ConnackTimeout)
    ));

    let shutdown = client.shutdown_handle();
    client.close();
    assert!(event_loop.block_on(shutdown.wait_timeout(WAIT)));
    assert_eq!(recorder.shutdowns(), 1);
}

#[test]
fn test_stop_interrupts_reconnect_delay_and_start_resumes() {
    let event_loop = init_runtime();
    let recorder = Recorder::new();
    let options = recording_options_for(&recorder, UNREACHABLE_HOST, UNREACHABLE_PORT)
        .with_client_id("engine-stop-during-backoff")
        .with_connack_timeout(Duration::from_secs(2))
        .with_reconnect(ReconnectConfig {
            max_attempts: None,
            backoff_pattern: vec![60_000],
            sustained_delay: 60_000,
        });

    let mut client = Mqtt5Client::new(options).unwrap();
    client.start().unwrap();
    assert!(wait_long(
        || recorder.count(LifecycleEventKind::ConnectionFailure) == 1
    ));

    let stop_requested = Instant::now();
    client.stop(None).unwrap();
    assert!(wait_until(|| recorder.count(LifecycleEventKind::Stopped) == 1));
    assert!(stop_requested.elapsed() < Duration::from_secs(5));

    // Never connected, so no Disconnection is reported
    assert_eq!(recorder.count(LifecycleEventKind::Disconnection), 0);

    client.start().unwrap();
    assert!(wait_until(
        || recorder.count(LifecycleEventKind::AttemptingConnect) == 2
    ));

    let shutdown = client.shutdown_handle();
    client.close();
    assert!(event_loop.block_on(shutdown.wait_timeout(WAIT)));
    assert_eq!(recorder.count(LifecycleEventKind::Stopped), 2);
    assert_eq!(recorder.after_shutdown(), 0);
}

#[test]
fn test_invalid_client_id_fails_construction() {
    init_runtime();
    let recorder = Recorder::new();
    let options = recording_options_for(&recorder, UNREACHABLE_HOST, UNREACHABLE_PORT)
        .with_client_id(" leading-space");

    let error = Mqtt5Client::new(options).unwrap_err();

    assert_eq!(error.error_code(), Some(ErrorCode::InvalidClientOptions));
    assert!(wait_until(|| recorder.shutdowns() == 1));
    assert!(recorder.events().is_empty());
}

#[test]
fn test_server_only_reason_code_is_rejected_on_stop() {
    let event_loop = init_runtime();
    let recorder = Recorder::new();
    let options = recording_options_for(&recorder, UNREACHABLE_HOST, UNREACHABLE_PORT)
        .with_client_id("engine-bad-reason");

    let mut client = Mqtt5Client::new(options).unwrap();
    let error = client
        .stop(Some(&DisconnectPacket::new(
            DisconnectReasonCode::ServerShuttingDown,
        )))
        .unwrap_err();

    assert_eq!(error.error_code(), Some(ErrorCode::InvalidDisconnectPacket));
    assert!(!client.is_released());

    let shutdown = client.shutdown_handle();
    client.close();
    assert!(event_loop.block_on(shutdown.wait_timeout(WAIT)));
    assert!(recorder.events().is_empty());
}

fn broker_options(broker: &FakeBroker, recorder: &Arc<Recorder>, client_id: &str) -> ClientOptions {
    recording_options_for(recorder, "127.0.0.1", broker.port()).with_client_id(client_id)
}

/// Start `client` and wait for the broker's CONNACK to be reported
fn connect(client: &Mqtt5Client, recorder: &Recorder) {
    client.start().unwrap();
    assert!(wait_until(
        || recorder.count(LifecycleEventKind::ConnectionSuccess) == 1
    ));
}

#[test]
fn test_connack_reported_and_every_filter_subscribed() {
    let event_loop = init_runtime();
    let broker = FakeBroker::with_connack(connack_with_assigned_id("broker-assigned"));
    let recorder = Recorder::new();
    let filters: Vec<String> = (0..15).map(|i| format!("sensors/{i}/temp")).collect();
    let options = filters.iter().fold(
        broker_options(&broker, &recorder, "engine-subscribes"),
        |options, filter| options.with_subscription(filter.as_str()),
    );

    let mut client = Mqtt5Client::new(options).unwrap();
    connect(&client, &recorder);

    match &recorder.events()[1] {
        LifecycleEvent::ConnectionSuccess {
            connack: Some(connack),
        } => assert_eq!(
            connack.assigned_client_identifier.as_deref(),
            Some("broker-assigned")
        ),
        other => panic!("unexpected event: {other:?}"),
    }

    assert!(wait_until(|| broker.subscriptions().len() == filters.len()));
    let mut subscribed = broker.subscriptions();
    subscribed.sort();
    let mut expected = filters.clone();
    expected.sort();
    assert_eq!(subscribed, expected);

    let shutdown = client.shutdown_handle();
    client.close();
    assert!(event_loop.block_on(shutdown.wait_timeout(WAIT)));
    assert_eq!(broker.disconnect_reasons(), vec![0x00]);
}

#[test]
fn test_inbound_publish_reaches_callback() {
    let event_loop = init_runtime();
    let broker = FakeBroker::start();
    let recorder = Recorder::new();
    let mut client =
        Mqtt5Client::new(broker_options(&broker, &recorder, "engine-receives")).unwrap();
    connect(&client, &recorder);

    broker.send(&publish_packet("sensors/temp", "21.5"));
    assert!(wait_until(|| recorder.publishes().len() == 1));
    assert_eq!(recorder.publishes(), vec!["sensors/temp".to_string()]);

    let shutdown = client.shutdown_handle();
    client.close();
    assert!(event_loop.block_on(shutdown.wait_timeout(WAIT)));
}

#[test]
fn test_stop_while_connected_disconnects_then_stops() {
    let event_loop = init_runtime();
    let broker = FakeBroker::start();
    let recorder = Recorder::new();
    let mut client =
        Mqtt5Client::new(broker_options(&broker, &recorder, "engine-stops")).unwrap();
    connect(&client, &recorder);

    let packet = DisconnectPacket::new(DisconnectReasonCode::DisconnectWithWillMessage);
    client.stop(Some(&packet)).unwrap();
    assert!(wait_until(|| recorder.count(LifecycleEventKind::Stopped) == 1));

    assert_eq!(
        recorder.kinds(),
        vec![
            LifecycleEventKind::AttemptingConnect,
            LifecycleEventKind::ConnectionSuccess,
            LifecycleEventKind::Disconnection,
            LifecycleEventKind::Stopped,
        ]
    );
    match &recorder.events()[2] {
        LifecycleEvent::Disconnection { error, disconnect } => {
            assert_eq!(
                error.and_then(|e| e.error_code()),
                Some(ErrorCode::UserRequestedStop)
            );
            assert_eq!(disconnect.as_ref(), Some(&packet));
        }
        other => panic!("unexpected event: {other:?}"),
    }

    // rumqttc only sends a normal-disconnection reason code
    assert!(wait_until(|| broker.disconnect_reasons() == vec![0x00]));

    let shutdown = client.shutdown_handle();
    client.close();
    assert!(event_loop.block_on(shutdown.wait_timeout(WAIT)));
    assert_eq!(recorder.count(LifecycleEventKind::Stopped), 1);
}

#[test]
fn test_server_disconnect_reported_with_reason_code() {
    let event_loop = init_runtime();
    let broker = FakeBroker::start();
    let recorder = Recorder::new();
    let options = broker_options(&broker, &recorder, "engine-kicked").with_reconnect(
        ReconnectConfig {
            max_attempts: None,
            backoff_pattern: vec![60_000],
            sustained_delay: 60_000,
        },
    );
    let mut client = Mqtt5Client::new(options).unwrap();
    connect(&client, &recorder);

    broker.send(&disconnect_packet(0x8B));
    assert!(wait_until(
        || recorder.count(LifecycleEventKind::Disconnection) == 1
    ));

    match &recorder.events()[2] {
        LifecycleEvent::Disconnection { error, disconnect } => {
            assert_eq!(
                error.and_then(|e| e.error_code()),
                Some(ErrorCode::ServerDisconnect)
            );
            assert_eq!(
                disconnect.as_ref().map(|d| d.reason_code),
                Some(DisconnectReasonCode::ServerShuttingDown)
            );
        }
        other => panic!("unexpected event: {other:?}"),
    }

    // Released during the reconnect delay; no DISCONNECT is owed
    let shutdown = client.shutdown_handle();
    client.close();
    assert!(event_loop.block_on(shutdown.wait_timeout(WAIT)));
    assert_eq!(recorder.count(LifecycleEventKind::Stopped), 1);
    assert_eq!(broker.connects(), 1);
}
