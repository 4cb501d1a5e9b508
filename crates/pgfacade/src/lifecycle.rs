//! Component lifecycle.
//!
//! [`Postgres`] is the component a dependency-injection host starts and
//! stops. `start` validates the configuration, builds the pool and returns
//! the [`Database`] handle; `stop` closes the pool.
//!
//! ```text
//! Stopped -> Running (via start())
//! Running -> Stopped (via stop())
//! Running -> Running (start() fails with AlreadyStarted)
//! Stopped -> Stopped (stop() is a no-op)
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::Dispatch;

use crate::config::Config;
use crate::database::{Database, QueryMode};
use crate::driver::{Driver, DriverPool};
use crate::error::{Error, Result};
use crate::hooks::{ConnectHookRunner, PoolEvents};
use crate::instrumentation::Logger;

/// Default component name.
pub const DEFAULT_NAME: &str = "postgres";

/// What the host passes to `start`.
#[derive(Clone, Default)]
#[non_exhaustive]
pub struct Dependencies {
    /// Component configuration. Required.
    pub config: Option<Config>,
    /// Dispatcher to log to. Without one, events go to the process-wide
    /// default subscriber.
    pub logger: Option<Dispatch>,
}

impl Dependencies {
    /// Create empty dependencies.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the configuration.
    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the logging dispatcher.
    #[must_use]
    pub fn logger(mut self, dispatch: Dispatch) -> Self {
        self.logger = Some(dispatch);
        self
    }
}

impl From<Config> for Dependencies {
    fn from(config: Config) -> Self {
        Self::new().config(config)
    }
}

struct Running {
    pool: Arc<dyn DriverPool>,
    log: Logger,
    url: String,
}

/// Lifecycle-managed PostgreSQL component.
pub struct Postgres {
    name: Arc<str>,
    driver: Option<Arc<dyn Driver>>,
    running: Mutex<Option<Running>>,
}

impl Default for Postgres {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Postgres {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Postgres")
            .field("name", &self.name)
            .field("has_driver", &self.driver.is_some())
            .field("running", &self.is_running())
            .finish()
    }
}

impl Postgres {
    /// Create a component with the default name and driver.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a builder to override the driver or the name.
    #[must_use]
    pub fn builder() -> PostgresBuilder {
        PostgresBuilder::default()
    }

    /// Component name, attached to every log event.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if a pool is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Start the component.
    ///
    /// Fails with [`Error::Config`] when the configuration is missing or
    /// invalid (nothing is built or logged in that case), and with
    /// [`Error::AlreadyStarted`] when a pool is already running.
    pub fn start(&self, deps: impl Into<Dependencies>) -> Result<Database> {
        let deps = deps.into();
        let config = deps
            .config
            .ok_or_else(|| Error::Config("config is required".into()))?;
        config.validate()?;
        let driver = self
            .driver
            .clone()
            .ok_or_else(|| {
                Error::Config("no driver available; enable the `postgres` feature".into())
            })?;

        let mut running = self.running.lock();
        if running.is_some() {
            return Err(Error::AlreadyStarted);
        }

        let log = Logger::new(Arc::clone(&self.name), deps.logger);
        let url = config.connection_url();
        log.connecting(&url);

        let hooks = ConnectHookRunner::new(config.on_connect.iter().cloned());
        let events = PoolEvents::new(log.clone(), hooks);
        let pool = driver.create_pool(&config, events)?;

        let mode = if config.suppress_query_logging {
            QueryMode::Quiet
        } else {
            QueryMode::Logged
        };

        *running = Some(Running {
            pool: Arc::clone(&pool),
            log: log.clone(),
            url,
        });

        Ok(Database::new(pool, log, mode))
    }

    /// Stop the component and close the pool.
    ///
    /// Resolves once every connection has been returned and closed. A
    /// [`RowStream`](crate::RowStream) that is still open keeps its
    /// connection, so drop or drain streams first; awaiting `stop` from the
    /// task that holds a stream never resolves.
    ///
    /// A no-op if the component is not running, so calling it before
    /// `start` or twice in a row is safe.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };
        running.log.disconnecting(&running.url);
        running.pool.close().await;
    }
}

/// Builder for [`Postgres`].
#[derive(Default)]
pub struct PostgresBuilder {
    name: Option<String>,
    driver: Option<Arc<dyn Driver>>,
}

impl PostgresBuilder {
    /// Set the component name used to scope log events.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Use a specific driver instead of the default.
    #[must_use]
    pub fn driver(mut self, driver: Arc<dyn Driver>) -> Self {
        self.driver = Some(driver);
        self
    }

    /// Build the component.
    #[must_use]
    pub fn build(self) -> Postgres {
        Postgres {
            name: Arc::from(self.name.as_deref().unwrap_or(DEFAULT_NAME)),
            driver: self.driver.or_else(default_driver),
            running: Mutex::new(None),
        }
    }
}

#[cfg(feature = "postgres")]
fn default_driver() -> Option<Arc<dyn Driver>> {
    Some(Arc::new(crate::postgres::PgDriver::new()))
}

#[cfg(not(feature = "postgres"))]
fn default_driver() -> Option<Arc<dyn Driver>> {
    None
}
