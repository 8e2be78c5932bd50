use std::sync::Arc;
use std::thread::sleep;
use std::time::{Duration, Instant};

use tally_core::link::Activation;
use tally_core::{
    EngineOptions, EventName, LinkError, LoopbackTransport, Notification, Role, StorageConfig,
    TallyConfig, TallyEngine, TallyError,
};
use tally_protocol::codec::MessageKind;
use tempfile::TempDir;

const WAIT: Duration = Duration::from_secs(5);

struct Device {
    _home: TempDir,
    engine: TallyEngine,
}

fn start_device(role: Role, transport: LoopbackTransport) -> Device {
    let home = tempfile::tempdir().expect("temp dir");
    let config = TallyConfig {
        role,
        ..TallyConfig::default()
    };
    let engine = TallyEngine::start(
        EngineOptions::new(
            StorageConfig::with_root(home.path().to_path_buf()),
            Arc::new(transport),
        )
        .config(config),
    )
    .expect("start engine");
    Device {
        _home: home,
        engine,
    }
}

fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return;
        }
        sleep(Duration::from_millis(10));
    }
    panic!("Timed out waiting for {}", what);
}

fn wait_activated(device: &Device) {
    wait_until("link activation", || {
        device.engine.link_state().activation == Activation::Activated
    });
}

fn pair() -> (Device, Device, LoopbackTransport) {
    let (watch_side, phone_side) = LoopbackTransport::pair();
    let control = watch_side.clone();
    let watch = start_device(Role::Watch, watch_side);
    let phone = start_device(Role::Phone, phone_side);
    wait_activated(&watch);
    wait_activated(&phone);
    (watch, phone, control)
}

#[test]
fn five_mistakes_reach_the_phone_as_one_session() {
    let (watch, phone, _control) = pair();
    let sessions = phone.engine.subscribe(EventName::SessionReceived);

    for _ in 0..5 {
        watch.engine.increment().expect("increment");
    }
    let receipt = watch
        .engine
        .submit_session(None, None, None)
        .expect("submit");
    assert_eq!(receipt.delivery, Ok(()));
    assert_eq!(receipt.payload.mistake_count, 5);

    let record = match sessions.recv_timeout(WAIT) {
        Some(Notification::SessionReceived(record)) => record,
        other => panic!("expected session notification, got {:?}", other),
    };
    assert_eq!(record.mistake_count, 5);
    assert_eq!(record.mistake_timeline.len(), 5);
    assert!(!record.name.is_empty());

    let stored = phone.engine.recent_sessions(10).expect("list");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, record.id);

    // Fire-and-forget handoff: the watch starts over immediately.
    let counter = watch.engine.counter().expect("counter");
    assert_eq!(counter.value, 0);
    assert!(counter.mistake_timeline.is_empty());
}

#[test]
fn unreachable_watch_drops_the_session() {
    let (watch, phone, control) = pair();
    control.set_link_up(false);
    wait_until("watch to see the peer leave", || {
        !watch.engine.link_state().reachable
    });
    let sends_before = control.sends();

    watch.engine.increment().expect("increment");
    let receipt = watch
        .engine
        .submit_session(None, None, None)
        .expect("submit");

    assert_eq!(
        receipt.delivery,
        Err(LinkError::LinkUnreachable {
            kind: MessageKind::Session
        })
    );
    assert_eq!(control.sends(), sends_before);
    assert_eq!(watch.engine.counter().expect("counter").value, 0);

    sleep(Duration::from_millis(100));
    assert_eq!(phone.engine.sessions().count().expect("count"), 0);
}

#[test]
fn empty_session_is_not_submitted() {
    let (watch, phone, control) = pair();
    let sends_before = control.sends();
    let before = watch.engine.counter().expect("counter");

    let err = watch
        .engine
        .submit_session(None, None, None)
        .expect_err("empty submit must be refused");
    assert!(matches!(err, TallyError::EmptySession));
    assert_eq!(control.sends(), sends_before);
    assert_eq!(watch.engine.counter().expect("counter"), before);

    sleep(Duration::from_millis(100));
    assert_eq!(phone.engine.sessions().count().expect("count"), 0);
}

#[test]
fn notes_and_counter_sync_reach_the_watch() {
    let (watch, phone, _control) = pair();
    let notes = watch.engine.subscribe(EventName::MessageReceived);
    let counters = watch.engine.subscribe(EventName::CounterReceived);

    phone.engine.send_note("watch your footwork").expect("send note");
    match notes.recv_timeout(WAIT) {
        Some(Notification::MessageReceived(item)) => {
            assert_eq!(item.text, "watch your footwork")
        }
        other => panic!("expected message notification, got {:?}", other),
    }
    let saved = watch.engine.messages().list().expect("list");
    assert_eq!(saved.len(), 1);

    phone.engine.increment().expect("increment");
    phone.engine.increment().expect("increment");
    phone.engine.send_counter().expect("send counter");
    assert_eq!(
        counters.recv_timeout(WAIT),
        Some(Notification::CounterReceived(2))
    );
    let mirrored = watch.engine.counter().expect("counter");
    assert_eq!(mirrored.value, 2);
    assert_eq!(mirrored.mistake_timeline.len(), 2);
}

#[test]
fn redelivered_session_is_stored_once() {
    let (watch, phone, control) = pair();
    let sessions = phone.engine.subscribe(EventName::SessionReceived);

    watch.engine.increment().expect("increment");
    let receipt = watch
        .engine
        .submit_session(Some("drills".to_string()), None, None)
        .expect("submit");
    assert!(sessions.recv_timeout(WAIT).is_some());

    // The platform delivers the same submission again as a background transfer.
    control.transfer_user_info(tally_protocol::encode(&tally_protocol::Payload::Session(
        receipt.payload,
    )));
    sleep(Duration::from_millis(200));

    assert_eq!(phone.engine.sessions().count().expect("count"), 1);
    assert_eq!(sessions.try_recv(), None);
}

#[test]
fn deactivated_link_reactivates() {
    let (watch, _phone, control) = pair();
    assert_eq!(control.activations(), 1);
    control.deactivate();
    wait_until("reactivation", || {
        let state = watch.engine.link_state();
        control.activations() == 2 && state.activation == Activation::Activated && state.reachable
    });
    watch.engine.increment().expect("increment");
    assert_eq!(
        watch
            .engine
            .submit_session(None, None, None)
            .expect("submit")
            .delivery,
        Ok(())
    );
}

#[test]
fn shutdown_is_clean() {
    let (watch, phone, _control) = pair();
    watch.engine.shutdown().expect("shutdown watch");
    phone.engine.shutdown().expect("shutdown phone");
}
