//! Controller lifecycle against real listeners and child processes.

use std::{fs, net::TcpListener as StdListener, sync::Arc};

use kiosk_core::{
    Controller, ControllerEvent, ControllerState, Error, Runtime, TargetDescriptor,
    test_support::{RecordingChannel, RecordingSurface, free_port, wait_until, within},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::mpsc::UnboundedReceiver,
};

struct Harness {
    controller: Controller,
    surface: Arc<RecordingSurface>,
    channel: Arc<RecordingChannel>,
    events: UnboundedReceiver<ControllerEvent>,
}

fn harness(interpreter: Option<&str>) -> Harness {
    let surface = Arc::new(RecordingSurface::default());
    let channel = Arc::new(RecordingChannel::default());
    let (controller, events) = Controller::new(
        surface.clone(),
        channel.clone(),
        interpreter.map(str::to_string),
    );
    Harness {
        controller,
        surface,
        channel,
        events,
    }
}

fn site(body: &str) -> (tempfile::TempDir, TargetDescriptor) {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("index.html"), body).expect("write index");
    let d = TargetDescriptor::Static {
        path: dir.path().join("index.html"),
        directory: dir.path().to_path_buf(),
    };
    (dir, d)
}

fn script(body: &str) -> (tempfile::TempDir, TargetDescriptor) {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("index.js"), body).expect("write script");
    let d = TargetDescriptor::Process {
        path: dir.path().join("index.js"),
        directory: dir.path().to_path_buf(),
    };
    (dir, d)
}

fn port_is_free(port: u16) -> bool {
    StdListener::bind(("127.0.0.1", port)).is_ok()
}

async fn fetch_root(port: u16) -> String {
    let mut stream = TcpStream::connect(("127.0.0.1", port))
        .await
        .expect("connect");
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .expect("write");
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await.expect("read");
    String::from_utf8_lossy(&buf).into_owned()
}

#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    // SAFETY: signal 0 only probes for existence.
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[tokio::test]
async fn switching_static_sites_reuses_the_port() {
    let h = harness(None);
    let port = free_port();
    let (_a, first) = site("<p>first</p>");
    let (_b, second) = site("<p>second</p>");

    h.controller.start(&first, port).await.expect("first");
    assert_eq!(h.controller.state(), ControllerState::Active(Runtime::Static));
    assert!(fetch_root(port).await.contains("first"));

    h.controller.replace(&second, port).await.expect("second");
    assert!(fetch_root(port).await.contains("second"));
    assert_eq!(
        h.surface.sources(),
        vec![format!("http://localhost:{port}"); 2]
    );

    h.controller.stop().await;
    assert!(port_is_free(port));
}

#[tokio::test]
async fn double_stop_is_harmless() {
    let h = harness(None);
    let port = free_port();
    let (_a, d) = site("x");
    h.controller.start(&d, port).await.expect("start");
    h.controller.stop().await;
    h.controller.stop().await;
    assert_eq!(h.controller.state(), ControllerState::Idle);
    assert!(port_is_free(port));
}

#[tokio::test]
async fn stop_during_pending_start_releases_the_listener() {
    let h = harness(None);
    let port = free_port();
    let (_a, d) = site("x");

    let (started, ()) = tokio::join!(h.controller.start(&d, port), h.controller.stop());
    assert!(matches!(started, Err(Error::Superseded)), "{started:?}");
    assert_eq!(h.controller.state(), ControllerState::Idle);
    assert!(h.surface.sources().is_empty());
    assert!(port_is_free(port));
}

#[tokio::test]
async fn webview_replaces_static_and_frees_the_port() {
    let h = harness(None);
    let port = free_port();
    let (_a, d) = site("x");
    h.controller.start(&d, port).await.expect("static");
    let web = TargetDescriptor::Webview {
        url: "https://example.com".into(),
    };
    h.controller.replace(&web, port).await.expect("webview");
    assert_eq!(h.controller.state(), ControllerState::Active(Runtime::Webview));
    assert_eq!(h.surface.last().as_deref(), Some("https://example.com"));
    assert!(port_is_free(port));
}

#[cfg(unix)]
#[tokio::test]
async fn script_becomes_active_on_first_output() {
    let h = harness(Some("sh"));
    let (_dir, d) = script("echo ready; sleep 30\n");

    h.controller.start(&d, 4321).await.expect("spawn");
    assert!(wait_until(5000, || h.surface.last().is_some()).await);
    assert_eq!(
        h.surface.last().as_deref(),
        Some("http://localhost:4321")
    );
    assert_eq!(h.controller.state(), ControllerState::Active(Runtime::Process));
    assert!(wait_until(5000, || h.channel.output().contains("ready")).await);

    h.controller.stop().await;
    assert_eq!(h.controller.state(), ControllerState::Idle);
}

#[cfg(unix)]
#[tokio::test]
async fn script_exit_is_reported_as_an_event() {
    let mut h = harness(Some("sh"));
    let (_dir, d) = script("echo partial; exit 2\n");

    h.controller.start(&d, 4322).await.expect("spawn");
    let event = within(5000, h.events.recv())
        .await
        .flatten()
        .expect("script error event");
    let ControllerEvent::ScriptError { message } = event;
    assert!(message.contains('2'), "{message}");
    assert_eq!(h.controller.state(), ControllerState::Idle);
    assert!(h.channel.output().contains("partial"));
}

#[cfg(unix)]
#[tokio::test]
async fn replacing_a_script_kills_the_child() {
    let mut h = harness(Some("sh"));
    let (_dir, d) = script("echo $$; sleep 30\n");

    h.controller.start(&d, 4323).await.expect("spawn");
    assert!(wait_until(5000, || !h.channel.output().is_empty()).await);
    let pid: u32 = h.channel.output().trim().parse().expect("pid");
    assert!(pid_alive(pid));

    let web = TargetDescriptor::Webview {
        url: "https://example.com".into(),
    };
    h.controller.replace(&web, 4323).await.expect("webview");
    assert!(!pid_alive(pid));
    assert!(h.events.try_recv().is_err(), "requested stop is not a script error");
}
