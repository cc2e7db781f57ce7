//! Registration host.
//!
//! Owns the active coordinator and at most one waiting coordinator, and
//! routes every client request to whichever is active. Promotion swaps the
//! active slot under its write lock, so no request is routed while the new
//! version purges stale partitions.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use stash_core::{CacheDb, Error, Notification, PartitionStat, RequestRecord};
use tokio::sync::{Mutex, RwLock};

use super::{ControlMessage, Coordinator, CoordinatorStatus, Event, Outcome, State, TaskDelivery};
use crate::fetch::Network;
use crate::strategy::{Handled, Source};

/// Result of registering a coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RegisterOutcome {
    /// Installed; waiting for skip-waiting or an explicit promotion.
    Waiting,
    /// Installed and activated; stale partitions were purged.
    Activated { purged: Vec<String> },
}

/// Snapshot of the host for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationStatus {
    pub active: Option<CoordinatorStatus>,
    pub waiting: Option<CoordinatorStatus>,
    pub partitions: Vec<PartitionStat>,
}

/// Hosts coordinator versions for every connected client.
pub struct Registration {
    db: CacheDb,
    network: Arc<dyn Network>,
    active: RwLock<Option<Arc<Coordinator>>>,
    waiting: Mutex<Option<Arc<Coordinator>>>,
}

impl Registration {
    pub fn new(db: CacheDb, network: Arc<dyn Network>) -> Self {
        Self { db, network, active: RwLock::new(None), waiting: Mutex::new(None) }
    }

    pub async fn active(&self) -> Option<Arc<Coordinator>> {
        self.active.read().await.clone()
    }

    pub async fn waiting(&self) -> Option<Arc<Coordinator>> {
        self.waiting.lock().await.clone()
    }

    /// Install a coordinator and activate it when nothing is active yet or
    /// it asked to skip waiting.
    ///
    /// # Errors
    ///
    /// Returns the install error; the previously active coordinator keeps
    /// serving.
    pub async fn register(&self, coordinator: Coordinator) -> Result<RegisterOutcome, Error> {
        let coordinator = Arc::new(coordinator);
        let outcome = match coordinator.dispatch(Event::Install).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(version = %coordinator.version(), error = %e, "registration failed, keeping current version");
                return Err(e);
            }
        };
        let activation_requested = matches!(outcome, Outcome::Installed { activation_requested: true });

        let replaced = self.waiting.lock().await.replace(coordinator.clone());
        if let Some(replaced) = replaced {
            tracing::info!(version = %replaced.version(), "replacing waiting coordinator");
            replaced.dispatch(Event::Supersede).await?;
        }

        if activation_requested || self.active().await.is_none() {
            let purged = self.promote().await?;
            return Ok(RegisterOutcome::Activated { purged });
        }

        tracing::info!(version = %coordinator.version(), "coordinator waiting");
        Ok(RegisterOutcome::Waiting)
    }

    /// Activate the waiting coordinator and retire the active one.
    ///
    /// # Errors
    ///
    /// Returns `INVALID_INPUT` when nothing is waiting. A failed activation
    /// leaves both slots as they were.
    pub async fn promote(&self) -> Result<Vec<String>, Error> {
        let mut active = self.active.write().await;
        let Some(next) = self.waiting.lock().await.take() else {
            return Err(Error::InvalidInput("no waiting coordinator".into()));
        };

        let mut purged = match next.dispatch(Event::Activate).await {
            Ok(Outcome::Activated { purged }) => purged,
            Ok(_) => Vec::new(),
            Err(e) => {
                *self.waiting.lock().await = Some(next);
                return Err(e);
            }
        };

        if let Some(previous) = active.replace(next.clone()) {
            previous.dispatch(Event::Supersede).await?;
            // Writes the old version made between the purge and its retirement.
            match self.db.delete_all_except(&next.version().current_names()).await {
                Ok(stragglers) => purged.extend(stragglers),
                Err(e) => tracing::warn!(version = %previous.version(), error = %e, "post-promotion sweep failed"),
            }
            tracing::info!(from = %previous.version(), to = %next.version(), "coordinator promoted");
        } else {
            tracing::info!(version = %next.version(), "coordinator activated");
        }

        Ok(purged)
    }

    /// Route a request through the active coordinator, or straight to the
    /// network when none is active.
    pub async fn fetch(&self, request: &RequestRecord) -> Result<Handled, Error> {
        match self.active().await {
            Some(coordinator) => self.fetch_through(coordinator, request).await,
            None => {
                let response = self.network.fetch(request).await?;
                Ok(Handled { response, source: Source::Bypass, classification: None })
            }
        }
    }

    /// Serve through `coordinator`, following a promotion that superseded it
    /// after it was picked.
    async fn fetch_through(&self, coordinator: Arc<Coordinator>, request: &RequestRecord) -> Result<Handled, Error> {
        let result = coordinator.fetch(request).await;
        if matches!(result, Err(Error::InvalidTransition { .. }))
            && coordinator.state().await == State::Superseded
            && let Some(next) = self.active().await
            && !Arc::ptr_eq(&next, &coordinator)
        {
            tracing::debug!(
                url = %request.url,
                from = %coordinator.version(),
                to = %next.version(),
                "rerouting after promotion"
            );
            return next.fetch(request).await;
        }
        result
    }

    /// Deliver a control message.
    ///
    /// `SKIP_WAITING` goes to the waiting coordinator and promotes it;
    /// `REFRESH_CACHE` goes to the active one.
    pub async fn message(&self, message: ControlMessage) -> Result<Outcome, Error> {
        if message == ControlMessage::SkipWaiting
            && let Some(waiting) = self.waiting().await
        {
            let outcome = waiting.dispatch(Event::Message(message)).await?;
            if matches!(outcome, Outcome::Acknowledged { activation_requested: true }) {
                let purged = self.promote().await?;
                return Ok(Outcome::Activated { purged });
            }
            return Ok(outcome);
        }

        let active = self.require_active().await?;
        active.dispatch(Event::Message(message)).await
    }

    /// Drain the outbox for `tag` through the active coordinator's relay.
    pub async fn sync(&self, tag: &str) -> Result<Vec<TaskDelivery>, Error> {
        let Some(active) = self.active().await else {
            return Err(Error::DeliveryFailure(format!("no active coordinator to deliver '{tag}'")));
        };
        match active.dispatch(Event::Sync { tag: tag.to_string() }).await? {
            Outcome::Delivered(deliveries) => Ok(deliveries),
            _ => Ok(Vec::new()),
        }
    }

    /// Queue a submission for a later sync.
    pub async fn defer(&self, tag: &str, notification: &Notification) -> Result<u64, Error> {
        let pending = self.db.defer(tag, notification).await?;
        tracing::debug!(tag, pending, "task deferred");
        Ok(pending)
    }

    /// Forward a clock tick to the active coordinator.
    pub async fn tick(&self) -> Result<usize, Error> {
        match self.active().await {
            Some(active) => match active.dispatch(Event::Tick).await? {
                Outcome::Refreshing { scheduled } => Ok(scheduled),
                _ => Ok(0),
            },
            None => Ok(0),
        }
    }

    pub async fn status(&self) -> Result<RegistrationStatus, Error> {
        let mut status = RegistrationStatus { active: None, waiting: None, partitions: self.db.partition_stats().await? };
        if let Some(active) = self.active().await {
            status.active = Some(active.status().await);
        }
        if let Some(waiting) = self.waiting().await {
            status.waiting = Some(waiting.status().await);
        }
        Ok(status)
    }

    async fn require_active(&self) -> Result<Arc<Coordinator>, Error> {
        self.active()
            .await
            .ok_or_else(|| Error::InvalidTransition { state: "unregistered".into(), event: "message".into() })
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::Fixture;
    use super::*;
    use crate::testing::{MockRelay, url};

    fn registration(f: &Fixture) -> Registration {
        Registration::new(f.db.clone(), f.network.clone())
    }

    fn document(path: &str) -> RequestRecord {
        RequestRecord::get(url(path)).with_accept("text/html")
    }

    #[tokio::test]
    async fn test_first_registration_activates() {
        let f = Fixture::new().await;
        f.network.respond("/", 200, "v1 root");
        let host = registration(&f);

        let outcome = host.register(f.coordinator("v1", &["/"])).await.unwrap();
        assert!(matches!(outcome, RegisterOutcome::Activated { .. }));
        assert_eq!(host.active().await.unwrap().state().await, State::Active);
        assert!(host.waiting().await.is_none());
    }

    #[tokio::test]
    async fn test_fetch_without_coordinator_goes_to_network() {
        let f = Fixture::new().await;
        f.network.respond("/", 200, "live");
        let host = registration(&f);

        let handled = host.fetch(&document("/")).await.unwrap();
        assert_eq!(handled.source, Source::Bypass);
        assert!(f.db.partition_names().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_second_version_waits_until_skip_waiting() {
        let f = Fixture::new().await;
        f.network.respond("/", 200, "root");
        let host = registration(&f);
        host.register(f.coordinator("v1", &["/"])).await.unwrap();

        let outcome = host.register(f.coordinator("v2", &["/"])).await.unwrap();
        assert_eq!(outcome, RegisterOutcome::Waiting);
        assert_eq!(host.active().await.unwrap().version().token(), "v1");

        let outcome = host.message(ControlMessage::SkipWaiting).await.unwrap();
        let Outcome::Activated { purged } = outcome else {
            panic!("expected activation");
        };
        assert!(purged.contains(&"samma-core-v1".to_string()));

        let active = host.active().await.unwrap();
        assert_eq!(active.version().token(), "v2");
        let names = f.db.partition_names().await.unwrap();
        assert!(names.iter().all(|n| n.ends_with("-v2")));
    }

    #[tokio::test]
    async fn test_skip_waiting_registration_promotes_immediately() {
        let f = Fixture::new().await;
        f.network.respond("/", 200, "root");
        let host = registration(&f);
        host.register(f.coordinator("v1", &["/"])).await.unwrap();

        let old = host.active().await.unwrap();
        let mut next = f.coordinator("v2", &["/"]);
        next.lifecycle.get_mut().skip_waiting = true;

        let outcome = host.register(next).await.unwrap();
        assert!(matches!(outcome, RegisterOutcome::Activated { .. }));
        assert_eq!(old.state().await, State::Superseded);
        assert_eq!(host.active().await.unwrap().version().token(), "v2");
    }

    #[tokio::test]
    async fn test_failed_install_keeps_previous_version_serving() {
        let f = Fixture::new().await;
        f.network.respond("/", 200, "v1 root").respond("/index.html", 200, "v1 home");
        let host = registration(&f);
        host.register(f.coordinator("v1", &["/", "/index.html"])).await.unwrap();

        f.network.fail("/index.html");
        let result = host.register(f.coordinator("v2", &["/", "/index.html"])).await;
        assert!(matches!(result, Err(Error::InstallFailure(_))));
        assert!(host.waiting().await.is_none());

        let active = host.active().await.unwrap();
        assert_eq!(active.version().token(), "v1");
        assert_eq!(active.state().await, State::Active);

        let handled = host.fetch(&document("/index.html")).await.unwrap();
        assert_eq!(handled.source, Source::Cache);
        assert_eq!(handled.response.text(), "v1 home");
        assert!(f.db.partition_names().await.unwrap().iter().all(|n| n.ends_with("-v1")));
    }

    #[tokio::test]
    async fn test_promote_without_waiting_is_rejected() {
        let f = Fixture::new().await;
        let host = registration(&f);
        assert!(matches!(host.promote().await, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_sync_and_defer_through_host() {
        let f = Fixture::new().await;
        f.network.respond("/", 200, "root");
        let host = registration(&f);

        let relay = Arc::new(MockRelay::new());
        let coordinator = f.coordinator("v1", &["/"]).with_relay(Some(relay.clone()));
        host.register(coordinator).await.unwrap();

        assert_eq!(host.defer("contact-form", &Notification::new("Contact", "hello")).await.unwrap(), 1);
        let deliveries = host.sync("contact-form").await.unwrap();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(relay.delivered()[0].message, "hello");
    }

    #[tokio::test]
    async fn test_sync_without_active_fails() {
        let f = Fixture::new().await;
        let host = registration(&f);
        host.defer("contact-form", &Notification::default()).await.unwrap();
        assert!(matches!(host.sync("contact-form").await, Err(Error::DeliveryFailure(_))));
        assert_eq!(f.db.pending_count("contact-form").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_tick_and_status() {
        let f = Fixture::new().await;
        f.network.respond("/", 200, "root");
        let host = registration(&f);
        assert_eq!(host.tick().await.unwrap(), 0);

        host.register(f.coordinator("v1", &["/"])).await.unwrap();
        f.clock.advance(chrono::Duration::hours(25));
        assert_eq!(host.tick().await.unwrap(), 1);
        host.active().await.unwrap().engine().background().settle().await;

        let status = host.status().await.unwrap();
        assert_eq!(status.active.unwrap().state, State::Active);
        assert!(status.waiting.is_none());
        assert!(status.partitions.iter().any(|p| p.name == "samma-core-v1" && p.entries == 1));
    }

    #[tokio::test]
    async fn test_fetch_routed_to_superseded_version_follows_promotion() {
        let f = Fixture::new().await;
        f.network.respond("/", 200, "root");
        let host = registration(&f);
        host.register(f.coordinator("v1", &["/"])).await.unwrap();
        host.register(f.coordinator("v2", &["/"])).await.unwrap();

        let picked = host.active().await.unwrap();
        host.promote().await.unwrap();
        assert_eq!(picked.state().await, State::Superseded);

        let handled = host.fetch_through(picked, &document("/")).await.unwrap();
        assert_eq!(handled.source, Source::Network);
        let names = f.db.partition_names().await.unwrap();
        assert!(names.contains(&"samma-dynamic-v2".to_string()));
        assert!(names.iter().all(|n| n.ends_with("-v2")));
    }

    #[tokio::test]
    async fn test_promotion_during_in_flight_fetch() {
        let f = Fixture::new().await;
        f.network.respond("/", 200, "root").respond("/about.html", 200, "about");
        let host = Arc::new(registration(&f));
        host.register(f.coordinator("v1", &["/"])).await.unwrap();
        host.register(f.coordinator("v2", &["/"])).await.unwrap();

        let gate = f.network.gate("/about.html");
        let in_flight = tokio::spawn({
            let host = host.clone();
            async move { host.fetch(&document("/about.html")).await }
        });
        f.network.wait_for_calls("/about.html", 1).await;

        let outcome = host.message(ControlMessage::SkipWaiting).await.unwrap();
        assert!(matches!(outcome, Outcome::Activated { .. }));
        gate.notify_one();

        let handled = in_flight.await.unwrap().unwrap();
        assert_eq!(handled.source, Source::Network);
        assert_eq!(handled.response.text(), "about");
        assert!(f.db.partition_names().await.unwrap().iter().all(|n| n.ends_with("-v2")));
    }
}
