//! Coordinator lifecycle controller.
//!
//! A [`Coordinator`] owns one version's partitions. Every input arrives
//! through [`Coordinator::dispatch`]; the pure [`state`] machine decides what
//! happens and this module carries out the resulting effects.
//!
//! The lifecycle sits behind an async `RwLock`. Activation holds the write
//! lock across the stale-partition purge, so a fetch can never observe the
//! coordinator as active before the purge has finished.

mod install;
pub mod registration;
pub mod state;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stash_core::{
    AppConfig, CacheDb, CoordinatorVersion, DeliveryReport, Error, PartitionKind, RequestRecord, Scope,
};
use tokio::sync::RwLock;
use url::Url;

pub use registration::{RegisterOutcome, Registration, RegistrationStatus};
pub use state::{Effect, Lifecycle, Signal, State, Transition};

use crate::clock::Clock;
use crate::fetch::{Network, canonicalize};
use crate::relay::Relay;
use crate::strategy::{Handled, StrategyEngine};

/// Control messages posted by pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    /// Activate a waiting coordinator now.
    SkipWaiting,
    /// Re-fetch the core partition now.
    RefreshCache,
}

impl ControlMessage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SkipWaiting => "SKIP_WAITING",
            Self::RefreshCache => "REFRESH_CACHE",
        }
    }
}

impl fmt::Display for ControlMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControlMessage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SKIP_WAITING" => Ok(Self::SkipWaiting),
            "REFRESH_CACHE" => Ok(Self::RefreshCache),
            other => Err(Error::InvalidInput(format!("unknown message type: {other}"))),
        }
    }
}

/// Inputs accepted by [`Coordinator::dispatch`].
#[derive(Debug, Clone)]
pub enum Event {
    Install,
    Activate,
    Fetch(RequestRecord),
    Message(ControlMessage),
    /// Clock tick driving the periodic refresh.
    Tick,
    Sync { tag: String },
    Supersede,
}

/// Delivery result for one deferred task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDelivery {
    pub id: i64,
    pub tag: String,
    pub report: DeliveryReport,
    /// Nothing was sent, so the task went back to the queue for the next sync.
    #[serde(default)]
    pub requeued: bool,
}

/// What a dispatched event produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Installed { activation_requested: bool },
    Activated { purged: Vec<String> },
    Response(Box<Handled>),
    Acknowledged { activation_requested: bool },
    /// Background refresh scheduled for this many resources (0 if not due).
    Refreshing { scheduled: usize },
    Delivered(Vec<TaskDelivery>),
    Superseded,
}

/// Resources and timing for one coordinator.
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub core_files: Vec<Url>,
    pub static_assets: Vec<Url>,
    pub skip_waiting: bool,
    pub refresh_interval: chrono::Duration,
}

/// Snapshot of one coordinator for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorStatus {
    pub version: String,
    pub state: State,
    pub last_refresh: Option<DateTime<Utc>>,
    pub partitions: Vec<String>,
}

/// One version of the caching coordinator.
pub struct Coordinator {
    engine: StrategyEngine,
    lifecycle: RwLock<Lifecycle>,
    clock: Arc<dyn Clock>,
    relay: Option<Arc<dyn Relay>>,
    core_files: Vec<Url>,
    static_assets: Vec<Url>,
}

fn dedup(urls: Vec<Url>) -> Vec<Url> {
    let mut out: Vec<Url> = Vec::with_capacity(urls.len());
    for url in urls {
        if !out.contains(&url) {
            out.push(url);
        }
    }
    out
}

impl Coordinator {
    pub fn new(engine: StrategyEngine, clock: Arc<dyn Clock>, settings: LifecycleSettings) -> Self {
        Self {
            engine,
            lifecycle: RwLock::new(Lifecycle::new(settings.skip_waiting, settings.refresh_interval)),
            clock,
            relay: None,
            core_files: dedup(settings.core_files),
            static_assets: dedup(settings.static_assets),
        }
    }

    pub fn with_relay(mut self, relay: Option<Arc<dyn Relay>>) -> Self {
        self.relay = relay;
        self
    }

    /// Build a coordinator from application configuration.
    pub fn from_config(
        config: &AppConfig, db: CacheDb, network: Arc<dyn Network>, clock: Arc<dyn Clock>,
    ) -> Result<Self, Error> {
        let origin = config.origin_url().map_err(|e| Error::InvalidUrl(e.to_string()))?;
        let resolve = |input: &str| canonicalize(input, &origin).map_err(Error::from);
        let resolve_all = |inputs: &[String]| inputs.iter().map(|s| resolve(s.as_str())).collect::<Result<Vec<_>, _>>();
        let resolve_opt = |input: &Option<String>| input.as_deref().map(resolve).transpose();

        let version = CoordinatorVersion::new(config.cache_prefix.clone(), config.version.clone())?;
        let scope = Scope::new(origin.clone(), config.allowed_hosts.iter().cloned());
        let engine = StrategyEngine::new(db, network, version, scope)
            .with_offline_document(resolve_opt(&config.offline_document)?)
            .with_image_fallback(resolve_opt(&config.image_fallback)?);

        let refresh_interval =
            chrono::Duration::from_std(config.refresh_interval()).unwrap_or(chrono::Duration::MAX);
        let settings = LifecycleSettings {
            core_files: resolve_all(&config.core_files)?,
            static_assets: resolve_all(&config.static_assets)?,
            skip_waiting: config.skip_waiting,
            refresh_interval,
        };

        Ok(Self::new(engine, clock, settings))
    }

    pub fn version(&self) -> &CoordinatorVersion {
        self.engine.version()
    }

    pub fn engine(&self) -> &StrategyEngine {
        &self.engine
    }

    pub fn db(&self) -> &CacheDb {
        self.engine.db()
    }

    pub async fn state(&self) -> State {
        self.lifecycle.read().await.state
    }

    pub async fn status(&self) -> CoordinatorStatus {
        let lifecycle = self.lifecycle.read().await.clone();
        CoordinatorStatus {
            version: self.version().token().to_string(),
            state: lifecycle.state,
            last_refresh: lifecycle.last_refresh,
            partitions: self.version().current_names(),
        }
    }

    /// Single entry point for every lifecycle input.
    pub async fn dispatch(&self, event: Event) -> Result<Outcome, Error> {
        match event {
            Event::Install => self.install().await,
            Event::Activate => self.activate().await,
            Event::Fetch(request) => Ok(Outcome::Response(Box::new(self.fetch(&request).await?))),
            Event::Message(ControlMessage::SkipWaiting) => {
                let effects = self.apply(Signal::SkipWaiting).await?;
                Ok(Outcome::Acknowledged { activation_requested: effects.contains(&Effect::RequestActivation) })
            }
            Event::Message(ControlMessage::RefreshCache) => {
                let effects = self.apply(Signal::RefreshNow).await?;
                self.run_refresh(&effects).await
            }
            Event::Tick => {
                let effects = self.apply(Signal::Tick(self.clock.now())).await?;
                self.run_refresh(&effects).await
            }
            Event::Sync { tag } => {
                let effects = self.apply(Signal::Sync(tag.clone())).await?;
                if !effects.contains(&Effect::DeliverDeferred(tag.clone())) {
                    return Ok(Outcome::Delivered(vec![]));
                }
                self.deliver_deferred(&tag).await
            }
            Event::Supersede => {
                self.apply(Signal::Supersede).await?;
                self.engine.retire();
                Ok(Outcome::Superseded)
            }
        }
    }

    /// Apply a signal and return the effects left for the caller.
    async fn apply(&self, signal: Signal) -> Result<Vec<Effect>, Error> {
        let mut lifecycle = self.lifecycle.write().await;
        self.commit(&mut lifecycle, &signal)
    }

    fn commit(&self, lifecycle: &mut Lifecycle, signal: &Signal) -> Result<Vec<Effect>, Error> {
        let transition = lifecycle.step(signal)?;
        if transition.next.state != lifecycle.state {
            tracing::info!(
                version = %self.version(),
                from = %lifecycle.state,
                to = %transition.next.state,
                signal = signal.name(),
                "lifecycle transition"
            );
        }
        *lifecycle = transition.next;
        Ok(transition.effects)
    }

    async fn activate(&self) -> Result<Outcome, Error> {
        let mut lifecycle = self.lifecycle.write().await;
        let effects = self.commit(&mut lifecycle, &Signal::Activate)?;

        let mut purged = Vec::new();
        if effects.contains(&Effect::PurgeStale) {
            let keep = self.version().current_names();
            match self.db().delete_all_except(&keep).await {
                Ok(deleted) => purged = deleted,
                Err(e) => {
                    tracing::warn!(version = %self.version(), error = %e, "activation purge failed");
                    lifecycle.state = State::Installed;
                    return Err(e);
                }
            }

            let effects = self.commit(&mut lifecycle, &Signal::Activated { at: self.clock.now() })?;
            if effects.contains(&Effect::ClaimClients) {
                tracing::info!(version = %self.version(), purged = purged.len(), "claimed clients");
            }
        }

        Ok(Outcome::Activated { purged })
    }

    /// Route a request through this version's partitions.
    pub(crate) async fn fetch(&self, request: &RequestRecord) -> Result<Handled, Error> {
        let state = self.state().await;
        if state != State::Active {
            return Err(Error::InvalidTransition { state: state.to_string(), event: "fetch".into() });
        }
        self.engine.handle(request).await
    }

    async fn run_refresh(&self, effects: &[Effect]) -> Result<Outcome, Error> {
        if !effects.contains(&Effect::RefreshCore) {
            return Ok(Outcome::Refreshing { scheduled: 0 });
        }
        let scheduled = self.refresh_core().await?;
        Ok(Outcome::Refreshing { scheduled })
    }

    /// Re-fetch every core file plus anything else already in the core
    /// partition. Runs in the background; failures are logged.
    async fn refresh_core(&self) -> Result<usize, Error> {
        let partition = self.version().partition_name(PartitionKind::Core);
        let mut urls = self.core_files.clone();
        for entry in self.db().entries(&partition).await? {
            if let Ok(url) = Url::parse(&entry.url)
                && !urls.contains(&url)
            {
                urls.push(url);
            }
        }

        tracing::info!(version = %self.version(), count = urls.len(), "refreshing core partition");
        for url in &urls {
            self.engine
                .revalidate(RequestRecord::get(url.clone()), partition.clone())
                .await;
        }
        Ok(urls.len())
    }

    async fn deliver_deferred(&self, tag: &str) -> Result<Outcome, Error> {
        let Some(relay) = &self.relay else {
            let pending = self.db().pending_count(tag).await?;
            tracing::warn!(tag, pending, "no relay configured, tasks left queued");
            return Err(Error::DeliveryFailure(format!(
                "no relay configured; {pending} task(s) for '{tag}' left queued"
            )));
        };

        let tasks = self.db().take_deferred(tag).await?;
        let mut deliveries = Vec::with_capacity(tasks.len());
        let mut undelivered = Vec::new();
        for task in tasks {
            let report = relay.deliver(&task.notification).await;
            let requeued = report.undelivered();
            if report.any_failed() {
                tracing::warn!(tag, id = task.id, ?report, requeued, "deferred task delivery failed");
            }
            deliveries.push(TaskDelivery { id: task.id, tag: task.tag.clone(), report, requeued });
            if requeued {
                undelivered.push(task);
            }
        }

        if !undelivered.is_empty() {
            let restored = self.db().requeue(&undelivered).await?;
            tracing::warn!(tag, restored, "undelivered tasks returned to the queue");
        }

        tracing::info!(tag, count = deliveries.len(), "delivered deferred tasks");
        Ok(Outcome::Delivered(deliveries))
    }
}
