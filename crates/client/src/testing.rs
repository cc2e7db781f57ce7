//! Test doubles shared by the client's unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use stash_core::{CachedResponse, ChannelResult, DeliveryReport, Error, Notification, RequestRecord};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use url::Url;

use crate::clock::Clock;
use crate::fetch::Network;
use crate::relay::Relay;

pub const ORIGIN: &str = "http://localhost:8080";

pub fn origin() -> Url {
    Url::parse(ORIGIN).unwrap()
}

/// Absolute URL for a path on the test origin, or the input if already absolute.
pub fn url(path: &str) -> Url {
    origin().join(path).unwrap()
}

/// Serve one raw HTTP response on a local port and return its base URL.
pub async fn serve_raw(response: String) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 8192];
        let _ = socket.read(&mut buf).await;
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.ok();
    });
    Url::parse(&format!("http://{addr}/")).unwrap()
}

/// Serve one `text/html` response with the given status and body.
pub async fn serve_once(status: u16, body: &str) -> Url {
    serve_raw(format!(
        "HTTP/1.1 {status} X\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    ))
    .await
}

#[derive(Clone)]
enum Script {
    Respond(CachedResponse),
    Fail,
}

/// Scripted network with per-URL call counters. Unscripted URLs fail as if offline.
#[derive(Default)]
pub struct MockNetwork {
    scripts: Mutex<HashMap<String, Script>>,
    calls: Mutex<HashMap<String, usize>>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `path` with `status` and `body` until re-scripted.
    pub fn respond(&self, path: &str, status: u16, body: &str) -> &Self {
        let url = url(path);
        self.respond_with(path, CachedResponse::new(url, status, body.as_bytes().to_vec()))
    }

    pub fn respond_with(&self, path: &str, response: CachedResponse) -> &Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(url(path).to_string(), Script::Respond(response));
        self
    }

    /// Fail every fetch of `path` until re-scripted.
    pub fn fail(&self, path: &str) -> &Self {
        self.scripts.lock().unwrap().insert(url(path).to_string(), Script::Fail);
        self
    }

    /// Hold every fetch of `path` until the returned gate is notified.
    pub fn gate(&self, path: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates.lock().unwrap().insert(url(path).to_string(), gate.clone());
        gate
    }

    /// Yield until `path` has been requested `count` times.
    pub async fn wait_for_calls(&self, path: &str, count: usize) {
        while self.calls(path) < count {
            tokio::task::yield_now().await;
        }
    }

    pub fn calls(&self, path: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(url(path).as_str())
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl Network for MockNetwork {
    async fn fetch(&self, request: &RequestRecord) -> Result<CachedResponse, Error> {
        let key = request.url.to_string();
        *self.calls.lock().unwrap().entry(key.clone()).or_default() += 1;
        let gate = self.gates.lock().unwrap().get(&key).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let script = self.scripts.lock().unwrap().get(&key).cloned();
        match script {
            Some(Script::Respond(mut response)) => {
                response.captured_at = Utc::now();
                Ok(response)
            }
            Some(Script::Fail) | None => Err(Error::NetworkFailure(format!("{key}: offline"))),
        }
    }
}

/// Relay that records every notification it is handed.
#[derive(Default)]
pub struct MockRelay {
    delivered: Mutex<Vec<Notification>>,
    failing: bool,
}

impl MockRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Relay whose channels all fail.
    pub fn failing() -> Self {
        Self { failing: true, ..Default::default() }
    }

    pub fn delivered(&self) -> Vec<Notification> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl Relay for MockRelay {
    async fn deliver(&self, notification: &Notification) -> DeliveryReport {
        self.delivered.lock().unwrap().push(notification.clone());
        if self.failing {
            return DeliveryReport::failed("relay unavailable");
        }
        let sent = |to: &Option<String>| match to {
            Some(to) => ChannelResult::Sent { to: to.clone(), id: None },
            None => ChannelResult::Skipped,
        };
        DeliveryReport { email: sent(&notification.email_to), whatsapp: sent(&notification.whatsapp_to) }
    }
}

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self { now: Mutex::new(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()) }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
