//! Per-class caching strategies.
//!
//! | class          | strategy               | writes to | lookup        | offline fallback   |
//! |----------------|------------------------|-----------|---------------|--------------------|
//! | image          | cache-first            | image     | image only    | image fallback     |
//! | static asset   | stale-while-revalidate | static    | all current   | none               |
//! | document       | network-first          | dynamic   | all current   | offline document   |
//! | other          | network-first          | core      | all current   | none               |
//!
//! Only exact-200 same-origin responses are written. Everything else is
//! handed back to the caller untouched.

pub mod background;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use stash_core::{
    CacheDb, CachedResponse, Classification, CoordinatorVersion, Error, PartitionKind, RequestRecord, Scope, Verdict,
    classify,
};
use url::Url;

pub use background::Background;

use crate::fetch::Network;

/// How a class of request is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    CacheFirst,
    NetworkFirst,
    StaleWhileRevalidate,
}

/// Cached resource served when the network fails and nothing better is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    None,
    Image,
    OfflineDocument,
}

/// Routing table entry for one classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub strategy: Strategy,
    pub partition: PartitionKind,
    pub fallback: Fallback,
}

impl Route {
    pub fn for_class(class: Classification) -> Self {
        match class {
            Classification::Image => {
                Self { strategy: Strategy::CacheFirst, partition: PartitionKind::Image, fallback: Fallback::Image }
            }
            Classification::StaticAsset => Self {
                strategy: Strategy::StaleWhileRevalidate,
                partition: PartitionKind::Static,
                fallback: Fallback::None,
            },
            Classification::Document => Self {
                strategy: Strategy::NetworkFirst,
                partition: PartitionKind::Dynamic,
                fallback: Fallback::OfflineDocument,
            },
            Classification::Other => {
                Self { strategy: Strategy::NetworkFirst, partition: PartitionKind::Core, fallback: Fallback::None }
            }
        }
    }
}

/// Where a handled response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Network,
    Cache,
    Fallback,
    /// Not intercepted; fetched straight from the network.
    Bypass,
}

/// A response plus how it was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handled {
    pub response: CachedResponse,
    pub source: Source,
    pub classification: Option<Classification>,
}

impl Handled {
    fn new(response: CachedResponse, source: Source, classification: Classification) -> Self {
        Self { response, source, classification: Some(classification) }
    }
}

/// Executes the routing table against one coordinator version's partitions.
pub struct StrategyEngine {
    db: CacheDb,
    network: Arc<dyn Network>,
    version: CoordinatorVersion,
    scope: Scope,
    offline_document: Option<Url>,
    image_fallback: Option<Url>,
    background: Background,
    /// Set once the owning coordinator is superseded; no further writes.
    retired: Arc<AtomicBool>,
}

impl StrategyEngine {
    pub fn new(db: CacheDb, network: Arc<dyn Network>, version: CoordinatorVersion, scope: Scope) -> Self {
        Self {
            db,
            network,
            version,
            scope,
            offline_document: None,
            image_fallback: None,
            background: Background::new(),
            retired: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_offline_document(mut self, url: Option<Url>) -> Self {
        self.offline_document = url;
        self
    }

    pub fn with_image_fallback(mut self, url: Option<Url>) -> Self {
        self.image_fallback = url;
        self
    }

    pub fn db(&self) -> &CacheDb {
        &self.db
    }

    pub fn network(&self) -> &Arc<dyn Network> {
        &self.network
    }

    pub fn version(&self) -> &CoordinatorVersion {
        &self.version
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn background(&self) -> &Background {
        &self.background
    }

    /// Stop writing to this version's partitions. Requests are still served.
    pub fn retire(&self) {
        self.retired.store(true, Ordering::Release);
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    /// Classify and serve a request.
    pub async fn handle(&self, request: &RequestRecord) -> Result<Handled, Error> {
        match classify(request, &self.scope) {
            Verdict::Bypass(reason) => {
                tracing::debug!(url = %request.url, ?reason, "bypassing cache");
                let response = self.network.fetch(request).await?;
                Ok(Handled { response, source: Source::Bypass, classification: None })
            }
            Verdict::Intercept(class) => self.execute(class, request).await,
        }
    }

    async fn execute(&self, class: Classification, request: &RequestRecord) -> Result<Handled, Error> {
        let route = Route::for_class(class);
        tracing::debug!(url = %request.url, class = class.as_str(), strategy = ?route.strategy, "routing request");

        match route.strategy {
            Strategy::CacheFirst => self.cache_first(class, route, request).await,
            Strategy::StaleWhileRevalidate => self.stale_while_revalidate(class, route, request).await,
            Strategy::NetworkFirst => self.network_first(class, route, request).await,
        }
    }

    async fn cache_first(&self, class: Classification, route: Route, request: &RequestRecord) -> Result<Handled, Error> {
        let partition = self.version.partition_name(route.partition);
        if let Some(hit) = self.db.get(&partition, &request.cache_key()).await? {
            tracing::debug!(url = %request.url, %partition, "cache hit");
            return Ok(Handled::new(hit, Source::Cache, class));
        }
        tracing::debug!(url = %request.url, %partition, "cache miss");
        self.fetch_and_store(class, route, request).await
    }

    async fn stale_while_revalidate(
        &self, class: Classification, route: Route, request: &RequestRecord,
    ) -> Result<Handled, Error> {
        let names = self.version.current_names();
        match self.db.lookup_any(&names, &request.cache_key()).await? {
            Some((partition, cached)) => {
                tracing::debug!(url = %request.url, %partition, "serving stale, revalidating");
                self.revalidate(request.clone(), partition).await;
                Ok(Handled::new(cached, Source::Cache, class))
            }
            None => self.fetch_and_store(class, route, request).await,
        }
    }

    async fn network_first(
        &self, class: Classification, route: Route, request: &RequestRecord,
    ) -> Result<Handled, Error> {
        match self.network.fetch(request).await {
            Ok(response) => {
                self.store(&self.version.partition_name(route.partition), request, &response)
                    .await;
                Ok(Handled::new(response, Source::Network, class))
            }
            Err(err) => {
                let names = self.version.current_names();
                if let Some((partition, cached)) = self.db.lookup_any(&names, &request.cache_key()).await? {
                    tracing::debug!(url = %request.url, %partition, error = %err, "network failed, serving cached copy");
                    return Ok(Handled::new(cached, Source::Cache, class));
                }
                self.fallback(class, route.fallback, err).await
            }
        }
    }

    /// Miss path shared by cache-first and stale-while-revalidate.
    async fn fetch_and_store(
        &self, class: Classification, route: Route, request: &RequestRecord,
    ) -> Result<Handled, Error> {
        match self.network.fetch(request).await {
            Ok(response) => {
                self.store(&self.version.partition_name(route.partition), request, &response)
                    .await;
                Ok(Handled::new(response, Source::Network, class))
            }
            Err(err) => self.fallback(class, route.fallback, err).await,
        }
    }

    async fn fallback(&self, class: Classification, fallback: Fallback, err: Error) -> Result<Handled, Error> {
        let target = match fallback {
            Fallback::None => None,
            Fallback::Image => self.image_fallback.as_ref(),
            Fallback::OfflineDocument => self.offline_document.as_ref(),
        };
        let Some(target) = target else {
            return Err(err);
        };

        let key = RequestRecord::get(target.clone()).cache_key();
        match self.db.lookup_any(&self.version.current_names(), &key).await? {
            Some((_, response)) => {
                tracing::warn!(error = %err, fallback = %target, "network failed, serving offline fallback");
                Ok(Handled::new(response, Source::Fallback, class))
            }
            None => Err(err),
        }
    }

    /// Write an eligible response; anything else is skipped.
    async fn store(&self, partition: &str, request: &RequestRecord, response: &CachedResponse) {
        if let Some(reason) = response.ineligibility() {
            tracing::debug!(url = %request.url, %reason, "not caching");
            return;
        }
        if self.is_retired() {
            tracing::debug!(url = %request.url, %partition, "version retired, not caching");
            return;
        }
        if let Err(e) = self.db.put(partition, request, response).await {
            tracing::warn!(url = %request.url, %partition, error = %e, "cache write failed");
        }
    }

    /// Re-fetch `request` in the background and overwrite its entry in `partition`.
    pub async fn revalidate(&self, request: RequestRecord, partition: String) {
        let db = self.db.clone();
        let network = self.network.clone();
        let retired = self.retired.clone();
        self.background
            .spawn(async move {
                match network.fetch(&request).await {
                    Ok(_) if retired.load(Ordering::Acquire) => {
                        tracing::debug!(url = %request.url, %partition, "version retired, refresh dropped")
                    }
                    Ok(response) => match db.put(&partition, &request, &response).await {
                        Ok(()) => tracing::debug!(url = %request.url, %partition, "refreshed"),
                        Err(Error::IneligibleResponse(reason)) => {
                            tracing::debug!(url = %request.url, %reason, "refresh not cached")
                        }
                        Err(e) => tracing::warn!(url = %request.url, %partition, error = %e, "refresh write failed"),
                    },
                    Err(e) => tracing::warn!(url = %request.url, error = %e, "background refresh failed"),
                }
            })
            .await;
    }
}
