//! Test support utilities for kiosk-core unit and integration tests.
//! Recording implementations of the shell traits, plus small async helpers.
//! They are intended for use by the test suite only.

use std::{future::Future, net::TcpListener, time::Duration};

use parking_lot::Mutex;
use tokio::time::{Instant, sleep, timeout};

use crate::{
    error::ErrorKind,
    shell::{ChannelMessage, DisplaySurface, DuplexChannel, InputCollector},
};

/// A display surface that records every source it is given.
#[derive(Debug, Default)]
pub struct RecordingSurface {
    /// Sources in the order they were set.
    sources: Mutex<Vec<String>>,
}

impl RecordingSurface {
    /// All sources set so far.
    pub fn sources(&self) -> Vec<String> {
        self.sources.lock().clone()
    }

    /// The most recent source.
    pub fn last(&self) -> Option<String> {
        self.sources.lock().last().cloned()
    }
}

impl DisplaySurface for RecordingSurface {
    fn set_source(&self, source: &str) {
        self.sources.lock().push(source.to_string());
    }
}

/// A duplex channel that records outbound messages.
#[derive(Debug, Default)]
pub struct RecordingChannel {
    /// Messages in send order.
    messages: Mutex<Vec<ChannelMessage>>,
}

impl RecordingChannel {
    /// All messages sent so far.
    pub fn messages(&self) -> Vec<ChannelMessage> {
        self.messages.lock().clone()
    }

    /// Concatenated payloads of all `message` sends.
    pub fn output(&self) -> String {
        self.messages
            .lock()
            .iter()
            .filter_map(|m| match m {
                ChannelMessage::Message(s) => Some(s.as_str()),
                ChannelMessage::Kill => None,
            })
            .collect()
    }

    /// Number of `kill` sends.
    pub fn kills(&self) -> usize {
        self.messages
            .lock()
            .iter()
            .filter(|m| **m == ChannelMessage::Kill)
            .count()
    }
}

impl DuplexChannel for RecordingChannel {
    fn send(&self, msg: ChannelMessage) {
        self.messages.lock().push(msg);
    }
}

/// A call made on a [`RecordingCollector`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectorCall {
    /// `show()`
    Show,
    /// `hide()`
    Hide,
    /// `display_error(kind, message)`
    Error(ErrorKind, String),
}

/// An input collector that records calls.
#[derive(Debug, Default)]
pub struct RecordingCollector {
    /// Calls in order.
    calls: Mutex<Vec<CollectorCall>>,
}

impl RecordingCollector {
    /// All calls so far.
    pub fn calls(&self) -> Vec<CollectorCall> {
        self.calls.lock().clone()
    }

    /// Kinds of all displayed errors.
    pub fn errors(&self) -> Vec<ErrorKind> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                CollectorCall::Error(kind, _) => Some(*kind),
                _ => None,
            })
            .collect()
    }

    /// Visibility after the last `show` or `hide`, if either was called.
    pub fn visible(&self) -> Option<bool> {
        self.calls.lock().iter().rev().find_map(|c| match c {
            CollectorCall::Show => Some(true),
            CollectorCall::Hide => Some(false),
            CollectorCall::Error(..) => None,
        })
    }
}

impl InputCollector for RecordingCollector {
    fn show(&self) {
        self.calls.lock().push(CollectorCall::Show);
    }

    fn hide(&self) {
        self.calls.lock().push(CollectorCall::Hide);
    }

    fn display_error(&self, kind: ErrorKind, message: &str) {
        self.calls
            .lock()
            .push(CollectorCall::Error(kind, message.to_string()));
    }
}

/// A loopback port that was free a moment ago.
pub fn free_port() -> u16 {
    TcpListener::bind(("127.0.0.1", 0))
        .and_then(|l| l.local_addr())
        .map(|a| a.port())
        .unwrap_or(0)
}

/// Poll `pred` until it holds or `timeout_ms` elapses.
pub async fn wait_until<F>(timeout_ms: u64, mut pred: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        if pred() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(Duration::from_millis(5)).await;
    }
}

/// Await `fut`, giving up after `timeout_ms`.
pub async fn within<F: Future>(timeout_ms: u64, fut: F) -> Option<F::Output> {
    timeout(Duration::from_millis(timeout_ms), fut)
        .await
        .ok()
}
