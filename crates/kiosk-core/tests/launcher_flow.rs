//! Submission, persisted launch and override-gate behaviour of the launcher.

use std::{fs, net::TcpListener as StdListener, sync::Arc};

use kiosk_core::{
    BindFailurePolicy, Chord, Classifier, Config, ControllerEvent, ControllerState, Error,
    ErrorKind, KeyOutcome, KeyValueStore, Launcher, MemoryStore, Runtime, Submission,
    store::{CLEARED, PERSISTED_KEY, PERSISTED_PORT_KEY},
    test_support::{
        CollectorCall, RecordingChannel, RecordingCollector, RecordingSurface, free_port,
    },
};

struct Harness {
    launcher: Launcher,
    surface: Arc<RecordingSurface>,
    collector: Arc<RecordingCollector>,
    channel: Arc<RecordingChannel>,
    store: Arc<MemoryStore>,
}

fn harness_with(config: Config, store: Arc<MemoryStore>) -> Harness {
    let surface = Arc::new(RecordingSurface::default());
    let collector = Arc::new(RecordingCollector::default());
    let channel = Arc::new(RecordingChannel::default());
    let (launcher, _events) = Launcher::new(
        config,
        surface.clone(),
        collector.clone(),
        channel.clone(),
        store.clone(),
    )
    .expect("launcher");
    Harness {
        launcher,
        surface,
        collector,
        channel,
        store,
    }
}

fn harness() -> Harness {
    harness_with(Config::default(), Arc::new(MemoryStore::new()))
}

fn chord(s: &str) -> Chord {
    Chord::parse(s).expect("chord")
}

async fn launch_webview(h: &Harness) {
    h.launcher
        .submit(Submission::new("https://example.com"))
        .await
        .expect("submit");
    assert!(!h.launcher.is_collector_visible());
}

#[tokio::test]
async fn init_without_persisted_target_shows_collector() {
    let h = harness();
    h.launcher.init().await.expect("init");
    assert_eq!(h.collector.calls(), vec![CollectorCall::Show]);
    assert!(h.surface.sources().is_empty());
}

#[tokio::test]
async fn init_launches_persisted_target() {
    let store = Arc::new(MemoryStore::new());
    store
        .set(
            PERSISTED_KEY,
            r#"{"runtime":"webview","path":"https://example.org","static":false}"#,
        )
        .expect("seed");
    let h = harness_with(Config::default(), store);
    h.launcher.init().await.expect("init");
    assert_eq!(h.surface.last().as_deref(), Some("https://example.org"));
    assert_eq!(h.collector.visible(), Some(false));
}

#[tokio::test]
async fn empty_submission_is_reported_and_changes_nothing() {
    let h = harness();
    h.launcher.submit(Submission::new("   ")).await.expect("submit");
    assert_eq!(h.collector.errors(), vec![ErrorKind::EmptyInput]);
    assert_eq!(h.launcher.controller().state(), ControllerState::Idle);
    assert_eq!(h.store.get(PERSISTED_KEY).expect("get"), None);
}

#[tokio::test]
async fn missing_path_leaves_running_target_alone() {
    let h = harness();
    launch_webview(&h).await;
    h.launcher
        .submit(Submission::new("/no/such/path"))
        .await
        .expect("submit");
    assert_eq!(h.collector.errors(), vec![ErrorKind::PathNotFound]);
    assert_eq!(
        h.launcher.controller().state(),
        ControllerState::Active(Runtime::Webview)
    );
}

#[tokio::test]
async fn invalid_port_is_reported() {
    let h = harness();
    h.launcher
        .submit(Submission::new("https://example.com").with_port("http"))
        .await
        .expect("submit");
    assert_eq!(h.collector.errors(), vec![ErrorKind::InvalidPort]);
    assert!(h.surface.sources().is_empty());
}

#[tokio::test]
async fn persisted_submission_is_stored() {
    let h = harness();
    h.launcher
        .submit(
            Submission::new("https://example.com")
                .with_port("4100")
                .persisted(true),
        )
        .await
        .expect("submit");
    let stored = h.store.get(PERSISTED_KEY).expect("get").expect("stored");
    let json: serde_json::Value = serde_json::from_str(&stored).expect("json");
    assert_eq!(json["runtime"], "webview");
    assert_eq!(json["path"], "https://example.com");
    assert_eq!(
        h.store.get(PERSISTED_PORT_KEY).expect("get").as_deref(),
        Some("4100")
    );
    assert_eq!(h.collector.calls(), vec![CollectorCall::Hide]);
}

#[tokio::test]
async fn unpersisted_submission_clears_the_store() {
    let h = harness();
    h.launcher
        .submit(Submission::new("https://a.org").persisted(true))
        .await
        .expect("submit");
    h.launcher
        .submit(Submission::new("https://b.org").with_port("5000"))
        .await
        .expect("submit");
    assert_eq!(h.store.get(PERSISTED_KEY).expect("get").as_deref(), Some(CLEARED));
    assert_eq!(
        h.store.get(PERSISTED_PORT_KEY).expect("get").as_deref(),
        Some("3000")
    );
    assert_eq!(h.surface.last().as_deref(), Some("https://b.org"));
}

#[tokio::test]
async fn directory_submission_serves_index_html() {
    let h = harness();
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("index.html"), "<p>hi</p>").expect("write");
    fs::write(dir.path().join("index.js"), "").expect("write");
    let port = free_port();

    h.launcher
        .submit(Submission::new(dir.path().to_string_lossy()).with_port(port.to_string()))
        .await
        .expect("submit");
    assert_eq!(
        h.launcher.controller().state(),
        ControllerState::Active(Runtime::Static)
    );
    assert_eq!(h.surface.last(), Some(format!("http://localhost:{port}")));
    h.launcher.shutdown().await;
    assert_eq!(h.launcher.controller().state(), ControllerState::Idle);
}

#[tokio::test]
async fn bind_failure_recovers_by_default() {
    let h = harness();
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("index.html"), "x").expect("write");
    let busy = StdListener::bind(("127.0.0.1", 0)).expect("occupy");
    let port = busy.local_addr().expect("addr").port();

    h.launcher
        .submit(Submission::new(dir.path().to_string_lossy()).with_port(port.to_string()))
        .await
        .expect("recoverable");
    assert_eq!(h.collector.errors(), vec![ErrorKind::BindFailed]);
    assert_eq!(h.collector.visible(), Some(true));
    assert_eq!(h.launcher.controller().state(), ControllerState::Idle);
}

#[tokio::test]
async fn bind_failure_can_be_fatal() {
    let config = Config {
        bind_failure: BindFailurePolicy::Fatal,
        ..Config::default()
    };
    let h = harness_with(config, Arc::new(MemoryStore::new()));
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("index.html"), "x").expect("write");
    let busy = StdListener::bind(("127.0.0.1", 0)).expect("occupy");
    let port = busy.local_addr().expect("addr").port();

    let err = h
        .launcher
        .submit(Submission::new(dir.path().to_string_lossy()).with_port(port.to_string()))
        .await
        .expect_err("fatal");
    assert!(matches!(err, Error::Bind { .. }));
}

#[tokio::test]
async fn show_gate_needs_six_quick_presses() {
    let h = harness();
    launch_webview(&h).await;
    let show = chord("shift+`");
    for _ in 0..5 {
        assert_eq!(h.launcher.on_key(&show).await, KeyOutcome::Counted);
    }
    assert_eq!(h.launcher.on_key(&show).await, KeyOutcome::ShowCollector);
    assert!(h.launcher.is_collector_visible());
    assert_eq!(h.launcher.on_key(&show).await, KeyOutcome::Ignored);
}

#[tokio::test]
async fn unrelated_keys_are_ignored() {
    let h = harness();
    launch_webview(&h).await;
    assert_eq!(h.launcher.on_key(&chord("`")).await, KeyOutcome::Ignored);
    assert_eq!(h.launcher.on_key(&chord("shift+a")).await, KeyOutcome::Ignored);
}

#[tokio::test]
async fn quit_gate_sends_kill_and_stops() {
    let h = harness();
    launch_webview(&h).await;
    let quit = chord("shift+esc");
    for _ in 0..5 {
        assert_eq!(h.launcher.on_key(&quit).await, KeyOutcome::Counted);
    }
    assert_eq!(h.launcher.on_key(&quit).await, KeyOutcome::Quit);
    assert_eq!(h.channel.kills(), 1);
    assert_eq!(h.launcher.controller().state(), ControllerState::Idle);
}

#[tokio::test]
async fn script_error_event_reopens_collector() {
    let h = harness();
    launch_webview(&h).await;
    h.launcher.on_event(ControllerEvent::ScriptError {
        message: "Script exited (exit status: 1)".into(),
    });
    assert_eq!(h.collector.errors(), vec![ErrorKind::ScriptError]);
    assert!(h.launcher.is_collector_visible());
}

#[tokio::test]
async fn tilde_submission_uses_the_pinned_home() {
    let home = tempfile::tempdir().expect("tempdir");
    fs::create_dir(home.path().join("site")).expect("mkdir");
    fs::write(home.path().join("site/index.html"), "x").expect("write");
    let port = free_port();

    let mut h = harness();
    h.launcher = h
        .launcher
        .with_classifier(Classifier::new().with_home(home.path()));
    h.launcher
        .submit(Submission::new("~/site").with_port(port.to_string()))
        .await
        .expect("submit");
    assert_eq!(h.surface.last(), Some(format!("http://localhost:{port}")));
    h.launcher.shutdown().await;
}
