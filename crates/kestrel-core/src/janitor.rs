//! Background destruction of expired sandboxes.

use crate::sandbox::Sandbox;
use crate::service::SandboxService;
use crate::store::{ListOptions, SandboxFilter};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Sandboxes destroyed concurrently per sweep.
const SWEEP_CONCURRENCY: usize = 4;

/// Periodically destroys sandboxes whose TTL has elapsed.
///
/// A sandbox's TTL is its own `ttl_seconds`, or the janitor default when it
/// has none. Sandboxes with neither never expire.
pub struct Janitor {
    service: Arc<SandboxService>,
    interval: Duration,
    default_ttl: Option<Duration>,
}

impl Janitor {
    pub fn new(
        service: Arc<SandboxService>,
        interval: Duration,
        default_ttl: Option<Duration>,
    ) -> Self {
        Self {
            service,
            interval,
            default_ttl,
        }
    }

    /// Janitor using the service's configured interval and default TTL.
    pub fn from_config(service: Arc<SandboxService>) -> Self {
        let config = service.config();
        let (interval, default_ttl) = (config.janitor_interval, config.default_ttl);
        Self::new(service, interval, default_ttl)
    }

    /// Whether `sandbox` has outlived its TTL at `now`.
    pub fn is_expired(&self, sandbox: &Sandbox, now: DateTime<Utc>) -> bool {
        let ttl = match sandbox.ttl_seconds {
            Some(secs) => Duration::from_secs(secs),
            None => match self.default_ttl {
                Some(ttl) => ttl,
                None => return false,
            },
        };
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            return false;
        };
        sandbox
            .created_at
            .checked_add_signed(ttl)
            .is_some_and(|deadline| now >= deadline)
    }

    /// Destroy every expired sandbox once. Returns how many were destroyed.
    pub async fn sweep(&self) -> usize {
        let start = Instant::now();
        let sandboxes = match self
            .service
            .list_sandboxes(&SandboxFilter::default(), &ListOptions::default())
            .await
        {
            Ok(sandboxes) => sandboxes,
            Err(e) => {
                tracing::error!(error = %e, "Janitor failed to list sandboxes");
                return 0;
            }
        };

        let now = self.service.clock().now();
        let expired: Vec<Sandbox> = sandboxes
            .into_iter()
            .filter(|sb| self.is_expired(sb, now))
            .collect();
        if expired.is_empty() {
            return 0;
        }
        tracing::info!(count = expired.len(), "Destroying expired sandboxes");

        let destroyed = stream::iter(expired)
            .map(|sb| async move {
                match self.service.destroy_sandbox(&sb.id).await {
                    Ok(_) => {
                        tracing::info!(sandbox_id = %sb.id, ttl_seconds = ?sb.ttl_seconds, "Expired sandbox destroyed");
                        true
                    }
                    Err(e) => {
                        tracing::error!(sandbox_id = %sb.id, error = %e, "Failed to destroy expired sandbox");
                        false
                    }
                }
            })
            .buffer_unordered(SWEEP_CONCURRENCY)
            .filter(|ok| futures::future::ready(*ok))
            .count()
            .await;

        tracing::info!(
            destroyed,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Janitor sweep finished"
        );
        destroyed
    }

    /// Sweep now and then every interval until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            default_ttl_secs = self.default_ttl.map(|t| t.as_secs()),
            "Janitor started"
        );
        loop {
            self.sweep().await;
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    tracing::info!("Janitor received shutdown signal");
                    break;
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use crate::sandbox::SandboxState;
    use crate::service::CreateSandboxRequest;
    use crate::store::MemoryStore;
    use crate::test_support::{ManualClock, MockDriver};

    struct Fixture {
        service: Arc<SandboxService>,
        driver: Arc<MockDriver>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let driver = MockDriver::new();
        let clock = ManualClock::new();
        let service = SandboxService::new(
            driver.clone(),
            Arc::new(MemoryStore::new()),
            ServiceConfig::default(),
        )
        .unwrap()
        .with_clock(clock.clone());
        Fixture {
            service: Arc::new(service),
            driver,
            clock,
        }
    }

    async fn create(f: &Fixture, ttl_seconds: Option<u64>) -> Sandbox {
        let mut req = CreateSandboxRequest::new("golden-ubuntu", "agent-1");
        req.ttl_seconds = ttl_seconds;
        f.service.create_sandbox(req).await.unwrap()
    }

    #[tokio::test]
    async fn test_is_expired() {
        let f = fixture();
        let janitor = Janitor::new(f.service.clone(), Duration::from_secs(60), None);
        let sb = create(&f, Some(60)).await;
        let created = sb.created_at;

        assert!(!janitor.is_expired(&sb, created + chrono::Duration::seconds(59)));
        assert!(janitor.is_expired(&sb, created + chrono::Duration::seconds(60)));

        let forever = Sandbox {
            ttl_seconds: None,
            ..sb.clone()
        };
        assert!(!janitor.is_expired(&forever, created + chrono::Duration::days(365)));

        let with_default = Janitor::new(
            f.service.clone(),
            Duration::from_secs(60),
            Some(Duration::from_secs(3600)),
        );
        assert!(with_default.is_expired(&forever, created + chrono::Duration::hours(1)));
    }

    #[tokio::test]
    async fn test_sweep_destroys_only_expired() {
        let f = fixture();
        let short = create(&f, Some(30)).await;
        let long = create(&f, Some(3600)).await;
        let forever = create(&f, None).await;
        let janitor = Janitor::from_config(f.service.clone());

        assert_eq!(janitor.sweep().await, 0);

        f.clock.advance(Duration::from_secs(31));
        assert_eq!(janitor.sweep().await, 1);

        assert!(f.service.get_sandbox(&short.id).await.unwrap_err().is_not_found());
        assert_eq!(
            f.service.get_sandbox(&long.id).await.unwrap().state,
            SandboxState::Created
        );
        assert!(f.service.get_sandbox(&forever.id).await.is_ok());
        assert_eq!(f.driver.count("destroy"), 1);
    }

    #[tokio::test]
    async fn test_sweep_keeps_going_after_failure() {
        let f = fixture();
        let sb = create(&f, Some(1)).await;
        f.driver.fail("destroy");
        f.clock.advance(Duration::from_secs(5));

        let janitor = Janitor::from_config(f.service.clone());
        assert_eq!(janitor.sweep().await, 0);
        assert!(f.service.get_sandbox(&sb.id).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancel() {
        let f = fixture();
        create(&f, Some(10)).await;
        let janitor = Janitor::new(f.service.clone(), Duration::from_secs(60), None);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(janitor.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(f.driver.count("destroy"), 0);

        f.clock.advance(Duration::from_secs(30));
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(f.driver.count("destroy"), 1);

        shutdown.cancel();
        handle.await.unwrap();
    }
}
