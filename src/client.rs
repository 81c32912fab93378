//! Client facade: one scheduler, one config, one PM session.
//!
//! ```ignore
//! let client = Client::new(Config::load()?)?;
//! let pm = client.pm();
//! pm.connect(&client.config().username, &client.config().password).await?;
//! pm.send_message("bob", "hello").await?;
//! client.stop().await;
//! ```

use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::Result;

use crate::config::Config;
use crate::events::{EventListener, LoggingListener};
use crate::scheduler::{TaskId, TaskScheduler};
use crate::session::PmSession;
use crate::token::{HttpTokenService, TokenService};

/// Owns the shared scheduler and builds the PM session on first use.
pub struct Client {
    config: Config,
    scheduler: TaskScheduler,
    tokens: Arc<dyn TokenService>,
    listener: Arc<dyn EventListener>,
    pm: OnceLock<PmSession>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("scheduler", &self.scheduler)
            .field("pm", &self.pm.get())
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Client using the HTTP token service at `config.login_url` and a
    /// [`LoggingListener`].
    pub fn new(config: Config) -> Result<Self> {
        let tokens = Arc::new(HttpTokenService::new(config.login_url.clone())?);
        Ok(Self::with_parts(config, tokens, Arc::new(LoggingListener)))
    }

    /// Client with explicit collaborators.
    pub fn with_parts(
        config: Config,
        tokens: Arc<dyn TokenService>,
        listener: Arc<dyn EventListener>,
    ) -> Self {
        Self {
            config,
            scheduler: TaskScheduler::new(),
            tokens,
            listener,
            pm: OnceLock::new(),
        }
    }

    /// The PM session, built on first call.
    pub fn pm(&self) -> &PmSession {
        self.pm.get_or_init(|| {
            PmSession::new(
                self.config.clone(),
                Arc::clone(&self.tokens),
                Arc::clone(&self.listener),
                self.scheduler.clone(),
            )
        })
    }

    /// Client configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shared scheduler.
    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    /// Run `callback` once after `delay`.
    pub fn set_timeout<F, Fut>(&self, label: impl Into<String>, delay: Duration, callback: F) -> TaskId
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.scheduler.set_timeout(label, delay, callback)
    }

    /// Run `callback` every `period` until cancelled.
    pub fn set_interval<F, Fut>(&self, label: impl Into<String>, period: Duration, callback: F) -> TaskId
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.scheduler.set_interval(label, period, callback)
    }

    /// Cancel a task. Returns `true` if it was still registered.
    pub fn cancel_task(&self, id: TaskId) -> bool {
        self.scheduler.cancel(id)
    }

    /// Disconnect the PM session (if built) and cancel every task.
    pub async fn stop(&self) {
        if let Some(pm) = self.pm.get() {
            pm.disconnect().await;
        }
        self.scheduler.cancel_all();
        log::info!("[Client] Stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionStatus;
    use crate::token::StaticTokenService;

    fn client() -> Client {
        Client::with_parts(
            Config::default(),
            Arc::new(StaticTokenService::new("tok")),
            Arc::new(LoggingListener),
        )
    }

    #[test]
    fn test_pm_is_built_once() {
        let client = client();
        let first = client.pm().session_id().to_string();
        assert_eq!(client.pm().session_id(), first);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_all_tasks() {
        let client = client();
        let a = client.set_interval("a", Duration::from_secs(1), || async { Ok(()) });
        let b = client.set_timeout("b", Duration::from_secs(60), || async { Ok(()) });
        assert_eq!(client.scheduler().len(), 2);

        assert!(client.cancel_task(a));
        assert!(!client.cancel_task(a));

        client.pm();
        client.stop().await;
        assert!(!client.scheduler().contains(b));
        assert!(client.scheduler().is_empty());
        assert_eq!(client.pm().status(), SessionStatus::Terminated);
    }

    #[test]
    fn test_new_uses_configured_login_url() {
        let mut config = Config::default();
        config.login_url = "http://127.0.0.1:1/login".into();
        assert!(Client::new(config).is_ok());
    }
}
