//! Integration tests for the routing engine.
//!
//! These drive a full `Engine` over in-memory ports: events are injected on
//! virtual inputs and the messages recorded on virtual outputs are checked.
//! Time is paused, so delays and liveness polls run instantly.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use stagesavvy::{Bindings, Engine, EngineSettings, MappingTree, SwitchCommand};
use stagesavvy_transport::{
    EventSink, InputConnection, MidiBackend, MidiMessage, OutputPort, PortDirection,
    TransportError, VirtualBackend,
};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const SETTINGS: &str = r#"
[MP1]
"Knobs.CC.0.5.X"       = "Synth.CC.0.74.X"
"Knobs.CC.0.5.10"      = "Lights.CC.3.1.99"
"Knobs.CC.1.60.127"    = "Drums.NOTE.0.60.127.200ms"
"Keys.NOTE.0.60.X"     = "Synth.NOTE.0.60.X"
"Pad.NOTEON.9.36.127"  = "[MP2]"
"Pad.NOTEON.9.37.127"  = "[MPN]"

[MP2]
"Knobs.CC.0.5.X"       = "Synth.CC.1.7.X"
"Pad.NOTEON.9.36.127"  = "[MP1]"
"Pad.NOTEON.9.37.127"  = "[MPN]"

[MP3]
"Pad.NOTEON.9.37.127"  = "[MPN]"
"#;

struct Harness {
    backend: VirtualBackend,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
    active: stagesavvy::ActiveMapping,
    switch: stagesavvy::SwitchHandle,
}

impl Harness {
    async fn start(inputs: &[&str]) -> Self {
        let backend = VirtualBackend::new();
        for name in inputs {
            backend.plug(name);
        }

        let tree = MappingTree::parse(SETTINGS).unwrap();
        let bindings = Bindings::from_tree(&tree).unwrap();
        let engine = Engine::new(
            Arc::new(backend.clone()),
            bindings,
            EngineSettings::default(),
        )
        .unwrap();
        let active = engine.active_mapping();
        let switch = engine.switch_handle();

        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(engine.run(async move {
            let _ = stopped.await;
        }));
        settle().await;

        Self {
            backend,
            stop: Some(stop),
            task,
            active,
            switch,
        }
    }

    fn sent(&self, output: &str) -> Vec<MidiMessage> {
        self.backend.output(output).unwrap().messages()
    }

    async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        (&mut self.task).await.unwrap();
    }
}

/// Virtual ports whose next `listen` calls fail while ports stay listed
#[derive(Clone, Default)]
struct FlakyBackend {
    inner: VirtualBackend,
    listen_failures: Arc<AtomicUsize>,
}

impl MidiBackend for FlakyBackend {
    fn list_ports(&self, direction: PortDirection) -> Result<Vec<String>, TransportError> {
        self.inner.list_ports(direction)
    }

    fn listen(&self, name: &str, sink: EventSink) -> Result<InputConnection, TransportError> {
        let armed = self
            .listen_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if armed {
            return Err(TransportError::Connect {
                port: name.to_string(),
                reason: "device busy".to_string(),
            });
        }
        self.inner.listen(name, sink)
    }

    fn open_output(&self, name: &str) -> Result<Arc<dyn OutputPort>, TransportError> {
        self.inner.open_output(name)
    }
}

/// Let spawned tasks drain their queues
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

// ── Matching and exclusion ──

#[tokio::test(start_paused = true)]
async fn exact_rule_wins_over_wildcard() {
    let h = Harness::start(&["Knobs"]).await;

    h.backend.inject("Knobs", MidiMessage::control_change(0, 5, 10));
    h.backend.inject("Knobs", MidiMessage::control_change(0, 5, 7));
    settle().await;

    assert_eq!(h.sent("Lights"), vec![MidiMessage::control_change(3, 1, 99)]);
    assert_eq!(h.sent("Synth"), vec![MidiMessage::control_change(0, 74, 7)]);
    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn unmatched_events_send_nothing() {
    let h = Harness::start(&["Knobs", "Keys"]).await;

    h.backend.inject("Knobs", MidiMessage::control_change(2, 5, 10));
    h.backend.inject("Keys", MidiMessage::control_change(0, 60, 1));
    settle().await;

    for output in ["Synth", "Lights", "Drums"] {
        assert!(h.sent(output).is_empty(), "{output} got traffic");
    }
    h.shutdown().await;
}

// ── Delayed release ──

#[tokio::test(start_paused = true)]
async fn note_destination_releases_once_after_delay() {
    let h = Harness::start(&["Knobs"]).await;
    let start = tokio::time::Instant::now();

    h.backend.inject("Knobs", MidiMessage::control_change(1, 60, 127));
    settle().await;
    assert_eq!(h.sent("Drums"), vec![MidiMessage::note_on(0, 60, 127)]);

    tokio::time::sleep(Duration::from_secs(2)).await;
    let sent = h.backend.output("Drums").unwrap().sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].message, MidiMessage::note_off(0, 60));
    assert!(sent[1].at - start >= Duration::from_millis(200));
    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn note_source_passes_velocity_and_release() {
    let h = Harness::start(&["Keys"]).await;

    h.backend.inject("Keys", MidiMessage::note_on(0, 60, 80));
    settle().await;
    h.backend.inject("Keys", MidiMessage::note_off(0, 60));
    settle().await;

    let sent = h.sent("Synth");
    assert_eq!(sent[0], MidiMessage::note_on(0, 60, 80));
    assert!(sent[1..].iter().all(|m| *m == MidiMessage::note_off(0, 60)));
    h.shutdown().await;
}

// ── Mapping switches ──

#[tokio::test(start_paused = true)]
async fn switch_rule_changes_mapping_without_output() {
    let mut h = Harness::start(&["Knobs", "Pad"]).await;
    assert_eq!(&*h.active.current(), "MP1");

    h.backend.inject("Pad", MidiMessage::note_on(9, 36, 127));
    assert_eq!(h.active.changed().await.as_deref(), Some("MP2"));
    settle().await;
    assert!(h.sent("Synth").is_empty());

    h.backend.inject("Knobs", MidiMessage::control_change(0, 5, 42));
    settle().await;
    assert_eq!(h.sent("Synth"), vec![MidiMessage::control_change(1, 7, 42)]);
    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn next_wraps_to_first_mapping() {
    let mut h = Harness::start(&["Pad"]).await;

    for expected in ["MP2", "MP3", "MP1"] {
        h.backend.inject("Pad", MidiMessage::note_on(9, 37, 127));
        assert_eq!(h.active.changed().await.as_deref(), Some(expected));
    }
    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn external_switch_to_unknown_mapping_is_ignored() {
    let mut h = Harness::start(&["Pad"]).await;

    assert!(h.switch.request(SwitchCommand::Select("MP9".to_string())));
    assert!(h.switch.request(SwitchCommand::Select("MP3".to_string())));
    assert_eq!(h.active.changed().await.as_deref(), Some("MP3"));
    h.shutdown().await;
}

// ── Liveness ──

#[tokio::test(start_paused = true)]
async fn reconnected_input_resumes_without_duplicates() {
    let h = Harness::start(&["Knobs"]).await;
    assert_eq!(h.backend.listener_count("Knobs"), 1);

    h.backend.unplug("Knobs");
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(h.backend.inject("Knobs", MidiMessage::control_change(0, 5, 1)), 0);

    h.backend.plug("Knobs");
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.backend.listener_count("Knobs"), 1);

    assert_eq!(h.backend.inject("Knobs", MidiMessage::control_change(0, 5, 3)), 1);
    settle().await;
    assert_eq!(h.sent("Synth"), vec![MidiMessage::control_change(0, 74, 3)]);
    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn input_missing_at_startup_is_attached_later() {
    let h = Harness::start(&[]).await;
    assert_eq!(h.backend.listener_count("Pad"), 0);

    h.backend.plug("Pad");
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(h.backend.listener_count("Pad"), 1);
    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failed_reattach_is_retried_on_next_poll() {
    let backend = FlakyBackend::default();
    let tree = MappingTree::parse(SETTINGS).unwrap();
    let engine = Engine::new(
        Arc::new(backend.clone()),
        Bindings::from_tree(&tree).unwrap(),
        EngineSettings::default(),
    )
    .unwrap();
    let (stop, stopped) = oneshot::channel::<()>();
    let task = tokio::spawn(engine.run(async move {
        let _ = stopped.await;
    }));
    settle().await;

    backend.listen_failures.store(1, Ordering::SeqCst);
    backend.inner.plug("Pad");

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(backend.listen_failures.load(Ordering::SeqCst), 0);
    assert_eq!(backend.inner.listener_count("Pad"), 0);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(backend.inner.listener_count("Pad"), 1);

    let _ = stop.send(());
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn present_input_is_not_reattached() {
    let h = Harness::start(&["Knobs"]).await;
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.backend.listener_count("Knobs"), 1);
    h.shutdown().await;
}

// ── Output failures ──

#[tokio::test(start_paused = true)]
async fn failing_output_does_not_stop_dispatch() {
    let h = Harness::start(&["Knobs"]).await;
    let synth = h.backend.output("Synth").unwrap();

    synth.set_failing(true);
    h.backend.inject("Knobs", MidiMessage::control_change(0, 5, 1));
    settle().await;
    synth.set_failing(false);
    h.backend.inject("Knobs", MidiMessage::control_change(0, 5, 2));
    settle().await;

    assert_eq!(synth.messages(), vec![MidiMessage::control_change(0, 74, 2)]);
    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_releases_listeners() {
    let h = Harness::start(&["Knobs", "Keys"]).await;
    let backend = h.backend.clone();
    h.shutdown().await;
    assert_eq!(backend.listener_count("Knobs"), 0);
    assert_eq!(backend.listener_count("Keys"), 0);
}
