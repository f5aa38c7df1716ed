//! Long-lived services
//!
//! A [`Service`] is a named, cancellable task of the node: the crawler and
//! PageRank pass drivers both wake on a fixed interval, consult the
//! partition detector, and run their workload over the partition this node
//! owns. A [`ServiceGroup`] runs services side by side, shutting the rest
//! down when one fails.

mod crawler;
mod pagerank;

pub use crawler::{CrawlerService, CrawlerServiceConfig};
pub use pagerank::{PageRankService, PageRankServiceConfig};

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::task::JoinSet;

use crate::shutdown::{self, ShutdownToken};

/// Errors reported by services and service groups.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("service configuration: {0}")]
    InvalidConfig(String),

    #[error("service {name}: {cause}")]
    Failed { name: String, cause: anyhow::Error },

    #[error("{} services failed: {}", .0.len(), summarize(.0))]
    Multiple(Vec<ServiceError>),
}

fn summarize(errors: &[ServiceError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// A named long-running component of the application.
#[async_trait]
pub trait Service: Send + Sync {
    fn name(&self) -> &'static str;

    /// Executes the service until it completes, fails, or `shutdown` fires.
    async fn run(&self, shutdown: ShutdownToken) -> anyhow::Result<()>;
}

/// A set of services executing in parallel.
pub struct ServiceGroup {
    services: Vec<Arc<dyn Service>>,
}

impl ServiceGroup {
    pub fn new(services: Vec<Arc<dyn Service>>) -> Self {
        Self { services }
    }

    /// Runs every service until all complete. The first failure (or the
    /// external `shutdown`) triggers shutdown of the remaining services;
    /// every failure is collected into the returned composite.
    pub async fn run(&self, shutdown: &ShutdownToken) -> Result<(), ServiceError> {
        let (handle, token) = shutdown::channel();

        let mut running: JoinSet<(&'static str, anyhow::Result<()>)> = JoinSet::new();
        for service in &self.services {
            let service = service.clone();
            let token = token.clone();
            running.spawn(async move {
                tracing::info!(service = service.name(), "starting service");
                let result = service.run(token).await;
                tracing::info!(service = service.name(), "stopped service");
                (service.name(), result)
            });
        }

        let mut errors = Vec::new();
        let mut forwarded = false;
        loop {
            tokio::select! {
                _ = shutdown.wait(), if !forwarded => {
                    forwarded = true;
                    handle.shutdown();
                }
                next = running.join_next() => match next {
                    None => break,
                    Some(Ok((_, Ok(())))) => {}
                    Some(Ok((name, Err(cause)))) => {
                        errors.push(ServiceError::Failed {
                            name: name.to_string(),
                            cause,
                        });
                        handle.shutdown();
                    }
                    Some(Err(join_error)) => {
                        errors.push(ServiceError::Failed {
                            name: "unknown".to_string(),
                            cause: anyhow::anyhow!("service task failed: {join_error}"),
                        });
                        handle.shutdown();
                    }
                }
            }
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ServiceError::Multiple(errors)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    struct WaitsForShutdown;

    #[async_trait]
    impl Service for WaitsForShutdown {
        fn name(&self) -> &'static str {
            "waits"
        }

        async fn run(&self, shutdown: ShutdownToken) -> anyhow::Result<()> {
            shutdown.wait().await;
            Ok(())
        }
    }

    struct FailsQuickly;

    #[async_trait]
    impl Service for FailsQuickly {
        fn name(&self) -> &'static str {
            "fails"
        }

        async fn run(&self, _shutdown: ShutdownToken) -> anyhow::Result<()> {
            tokio::time::sleep(Duration::from_millis(10)).await;
            anyhow::bail!("boom")
        }
    }

    #[tokio::test]
    async fn test_failure_shuts_down_the_rest_of_the_group() {
        let group = ServiceGroup::new(vec![Arc::new(WaitsForShutdown), Arc::new(FailsQuickly)]);

        let err = tokio::time::timeout(
            Duration::from_secs(5),
            group.run(&ShutdownToken::never()),
        )
        .await
        .expect("group should stop after the failure")
        .unwrap_err();

        match err {
            ServiceError::Failed { name, .. } => assert_eq!(name, "fails"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_external_shutdown_stops_the_group_cleanly() {
        let group = ServiceGroup::new(vec![Arc::new(WaitsForShutdown)]);
        let (handle, token) = shutdown::channel();

        let run = group.run(&token);
        let trigger = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.shutdown();
        };
        let (result, ()) = tokio::join!(run, trigger);
        assert!(result.is_ok());
    }
}
