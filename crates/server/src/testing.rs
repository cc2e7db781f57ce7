//! Test support: a scripted network and a registration wired to it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use stash_client::{Coordinator, LifecycleSettings, Network, Registration, StrategyEngine, SystemClock};
use stash_core::{CacheDb, CachedResponse, CoordinatorVersion, Error, RequestRecord, Scope};
use url::Url;

pub const ORIGIN: &str = "http://localhost:8080";

pub fn origin() -> Url {
    Url::parse(ORIGIN).unwrap()
}

pub fn url(path: &str) -> Url {
    origin().join(path).unwrap()
}

/// Serves scripted bodies by path; anything else is a network failure.
#[derive(Default)]
pub struct StubNetwork {
    pages: Mutex<HashMap<String, String>>,
}

impl StubNetwork {
    pub fn page(&self, path: &str, body: &str) -> &Self {
        self.pages.lock().unwrap().insert(path.to_string(), body.to_string());
        self
    }

    pub fn drop_page(&self, path: &str) {
        self.pages.lock().unwrap().remove(path);
    }
}

#[async_trait]
impl Network for StubNetwork {
    async fn fetch(&self, request: &RequestRecord) -> Result<CachedResponse, Error> {
        let body = self.pages.lock().unwrap().get(request.url.path()).cloned();
        match body {
            Some(body) => Ok(CachedResponse::ok(request.url.clone(), body).with_header("content-type", "text/html")),
            None => Err(Error::NetworkFailure(format!("{} unreachable", request.url))),
        }
    }
}

pub struct Harness {
    pub db: CacheDb,
    pub network: Arc<StubNetwork>,
    pub registration: Arc<Registration>,
}

impl Harness {
    pub async fn new() -> Self {
        let db = CacheDb::open_in_memory().await.unwrap();
        let network = Arc::new(StubNetwork::default());
        network.page("/", "home").page("/index.html", "index");
        let registration = Arc::new(Registration::new(db.clone(), network.clone()));
        Self { db, network, registration }
    }

    pub fn coordinator(&self, version: &str) -> Coordinator {
        let version = CoordinatorVersion::new("stash", version).unwrap();
        let scope = Scope::new(origin(), ["fonts.googleapis.com"]);
        let engine = StrategyEngine::new(self.db.clone(), self.network.clone(), version, scope)
            .with_offline_document(Some(url("/index.html")));
        let settings = LifecycleSettings {
            core_files: vec![url("/"), url("/index.html")],
            static_assets: Vec::new(),
            skip_waiting: false,
            refresh_interval: chrono::Duration::hours(24),
        };
        Coordinator::new(engine, Arc::new(SystemClock), settings)
    }

    /// A harness with `v1` registered and active.
    pub async fn active() -> Self {
        let harness = Self::new().await;
        harness.registration.register(harness.coordinator("v1")).await.unwrap();
        harness
    }
}
