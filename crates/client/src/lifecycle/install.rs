//! Install: pre-populate the core and static partitions.
//!
//! Core files are all-or-nothing. Every one must come back as an eligible
//! response before any is written, and they are then written in one
//! transaction. Static assets are best-effort.

use stash_core::{CachedResponse, Error, PartitionKind, RequestRecord};
use tokio::task::JoinSet;
use url::Url;

use super::{Coordinator, Effect, Outcome, Signal};

type Fetched = (RequestRecord, Result<CachedResponse, Error>);

impl Coordinator {
    pub(crate) async fn install(&self) -> Result<Outcome, Error> {
        self.apply(Signal::Install).await?;

        tracing::info!(version = %self.version(), core = self.core_files.len(), "installing");

        match self.precache().await {
            Ok(()) => {
                let effects = self.apply(Signal::InstallSucceeded).await?;
                let activation_requested = effects.contains(&Effect::RequestActivation);
                tracing::info!(version = %self.version(), activation_requested, "install completed");
                Ok(Outcome::Installed { activation_requested })
            }
            Err(e) => {
                tracing::warn!(version = %self.version(), error = %e, "install failed");
                self.apply(Signal::InstallFailed).await?;
                Err(e)
            }
        }
    }

    async fn precache(&self) -> Result<(), Error> {
        let mut entries = Vec::with_capacity(self.core_files.len());
        let mut failures = Vec::new();
        for (request, result) in self.fetch_all(&self.core_files).await {
            match result {
                Ok(response) => match response.ineligibility() {
                    None => entries.push((request, response)),
                    Some(reason) => failures.push(format!("{}: {reason}", request.url)),
                },
                Err(e) => failures.push(format!("{}: {e}", request.url)),
            }
        }
        if !failures.is_empty() {
            return Err(Error::InstallFailure(failures.join("; ")));
        }

        let core = self.version().partition_name(PartitionKind::Core);
        let written = self
            .db()
            .put_many(&core, &entries)
            .await
            .map_err(|e| Error::InstallFailure(format!("writing {core}: {e}")))?;
        tracing::debug!(partition = %core, written, "core partition populated");

        let static_partition = self.version().partition_name(PartitionKind::Static);
        self.db().open_partition(&static_partition).await?;
        let mut cached = 0usize;
        for (request, result) in self.fetch_all(&self.static_assets).await {
            let outcome = match result {
                Ok(response) => self.db().put(&static_partition, &request, &response).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(()) => cached += 1,
                Err(e) => tracing::warn!(url = %request.url, error = %e, "optional asset not cached"),
            }
        }
        tracing::debug!(partition = %static_partition, cached, total = self.static_assets.len(), "static partition populated");

        Ok(())
    }

    /// Fetch every URL concurrently, returning results in input order.
    async fn fetch_all(&self, urls: &[Url]) -> Vec<Fetched> {
        let mut set = JoinSet::new();
        for (index, url) in urls.iter().enumerate() {
            let network = self.engine().network().clone();
            let request = RequestRecord::get(url.clone());
            set.spawn(async move {
                let result = network.fetch(&request).await;
                (index, (request, result))
            });
        }

        let mut slots: Vec<Option<Fetched>> = (0..urls.len()).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, fetched)) => slots[index] = Some(fetched),
                Err(e) => tracing::warn!(error = %e, "precache fetch aborted"),
            }
        }

        slots
            .into_iter()
            .zip(urls)
            .map(|(slot, url)| {
                slot.unwrap_or_else(|| {
                    let request = RequestRecord::get(url.clone());
                    let err = Error::NetworkFailure(format!("{url}: fetch aborted"));
                    (request, Err(err))
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::Fixture;
    use super::super::{Event, State};
    use super::*;
    use crate::testing::url;

    #[tokio::test]
    async fn test_install_populates_core_and_static() {
        let f = Fixture::new().await;
        f.network.respond("/", 200, "root").respond("/index.html", 200, "home").respond("/robots.txt", 200, "ua");

        let coordinator = f.coordinator("v1", &["/", "/index.html"]);
        let outcome = coordinator.dispatch(Event::Install).await.unwrap();
        assert_eq!(outcome, Outcome::Installed { activation_requested: false });
        assert_eq!(coordinator.state().await, State::Installed);

        let core = f.db.entries("samma-core-v1").await.unwrap();
        assert_eq!(core.len(), 2);
        let robots = f.db.get("samma-static-v1", &RequestRecord::get(url("/robots.txt")).cache_key()).await.unwrap();
        assert_eq!(robots.unwrap().text(), "ua");
    }

    #[tokio::test]
    async fn test_core_failure_fails_install_and_writes_nothing() {
        let f = Fixture::new().await;
        f.network.respond("/", 200, "root").fail("/index.html");

        let coordinator = f.coordinator("v1", &["/", "/index.html"]);
        let result = coordinator.dispatch(Event::Install).await;
        assert!(matches!(result, Err(Error::InstallFailure(_))));
        assert_eq!(coordinator.state().await, State::Uninitialized);
        assert!(f.db.partition_names().await.unwrap().is_empty());

        let activate = coordinator.dispatch(Event::Activate).await;
        assert!(matches!(activate, Err(Error::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn test_core_error_status_fails_install() {
        let f = Fixture::new().await;
        f.network.respond("/", 200, "root").respond("/index.html", 404, "");

        let coordinator = f.coordinator("v1", &["/", "/index.html"]);
        let result = coordinator.dispatch(Event::Install).await;
        assert!(matches!(result, Err(Error::InstallFailure(msg)) if msg.contains("status 404")));
    }

    #[tokio::test]
    async fn test_static_failure_does_not_fail_install() {
        let f = Fixture::new().await;
        f.network.respond("/", 200, "root").fail("/robots.txt");

        let coordinator = f.coordinator("v1", &["/"]);
        coordinator.dispatch(Event::Install).await.unwrap();
        assert_eq!(coordinator.state().await, State::Installed);
        assert!(f.db.entries("samma-static-v1").await.unwrap().is_empty());
        assert!(f.db.partition_names().await.unwrap().contains(&"samma-static-v1".to_string()));
    }

    #[tokio::test]
    async fn test_install_twice_is_rejected() {
        let f = Fixture::new().await;
        f.network.respond("/", 200, "root");

        let coordinator = f.coordinator("v1", &["/"]);
        coordinator.dispatch(Event::Install).await.unwrap();
        let again = coordinator.dispatch(Event::Install).await;
        assert!(matches!(again, Err(Error::InvalidTransition { .. })));
    }
}
