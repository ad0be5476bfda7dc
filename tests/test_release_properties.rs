//! Property tests: whatever the caller does, the engine handle is released
//! exactly once and the shutdown notification fires exactly once.


use mqttkit::mqtt::{DisconnectPacket, Mqtt5Client};
use mqttkit::runtime;
use mqttkit::testing::mocks::MockNativeFactory;
use proptest::prelude::*;
use test_helpers::{init_runtime, recording_options, wait_until, Recorder};

#[derive(Debug, Clone)]
enum Call {
    Start,
    Stop,
    StopWithPacket,
    Close,
}

fn call_strategy() -> impl Strategy<Value = Call> {
    prop_oneof![
        Just(Call::Start),
        Just(Call::Stop),
        Just(Call::StopWithPacket),
        Just(Call::Close),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_release_and_shutdown_happen_once(
        calls in prop::collection::vec(call_strategy(), 0..12),
        close_at_end in any::<bool>(),
    ) {
        init_runtime();
        let factory = MockNativeFactory::new();
        let recorder = Recorder::new();
        let mut client =
            Mqtt5Client::create(recording_options(&recorder), runtime::global(), &factory)
                .unwrap();
        let engine = factory.last_client().unwrap();

        let mut closed = false;
        let mut expected_starts = 0;
        let mut expected_stops = 0;
        for call in &calls {
            match call {
                Call::Start => {
                    prop_assert!(client.start().is_ok());
                    if !closed {
                        expected_starts += 1;
                    }
                }
                Call::Stop => {
                    prop_assert!(client.stop(None).is_ok());
                    if !closed {
                        expected_stops += 1;
                    }
                }
                Call::StopWithPacket => {
                    prop_assert!(client.stop(Some(&DisconnectPacket::default())).is_ok());
                    if !closed {
                        expected_stops += 1;
                    }
                }
                Call::Close => {
                    client.close();
                    closed = true;
                }
            }
            prop_assert!(engine.releases() <= 1);
        }

        if close_at_end {
            client.close();
        }
        drop(client);

        prop_assert_eq!(engine.starts(), expected_starts);
        prop_assert_eq!(engine.stops().len(), expected_stops);
        prop_assert_eq!(engine.releases(), 1);
        prop_assert!(wait_until(|| recorder.shutdowns() == 1));
        prop_assert_eq!(recorder.shutdowns(), 1);
    }
}
