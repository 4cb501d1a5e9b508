//! Per-connection hooks.
//!
//! [`PoolEvents`] is handed to the driver when the pool is built. It routes
//! server notices, runs the configured initialization statements on each new
//! connection, and logs errors on idle connections. None of these raise:
//! failures end up in the log.

use std::sync::Arc;

use crate::driver::StatementExecutor;
use crate::error::DriverError;
use crate::instrumentation::Logger;
use crate::notice::Notice;

/// Runs initialization statements on a new connection.
#[derive(Debug, Clone, Default)]
pub struct ConnectHookRunner {
    statements: Arc<[String]>,
}

impl ConnectHookRunner {
    /// Create a runner for the given statements.
    #[must_use]
    pub fn new(statements: impl IntoIterator<Item = String>) -> Self {
        Self {
            statements: statements.into_iter().collect(),
        }
    }

    /// Statements in execution order.
    #[must_use]
    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    /// Execute every statement in order. A failure is logged and the next
    /// statement still runs. Returns the number of failed statements.
    pub async fn run(&self, conn: &dyn StatementExecutor, log: &Logger) -> usize {
        let mut failed = 0;
        for statement in self.statements.iter() {
            if let Err(err) = conn.execute(statement).await {
                log.on_connect_failed(statement, &err);
                failed += 1;
            }
        }
        failed
    }
}

/// Observer the driver notifies about pool-level events.
#[derive(Debug, Clone)]
pub struct PoolEvents {
    log: Logger,
    on_connect: ConnectHookRunner,
}

impl PoolEvents {
    /// Create pool events bound to a logger.
    #[must_use]
    pub fn new(log: Logger, on_connect: ConnectHookRunner) -> Self {
        Self { log, on_connect }
    }

    /// A new physical connection is ready. Runs the initialization statements.
    pub async fn connected(&self, conn: &dyn StatementExecutor) {
        let failed = self.on_connect.run(conn, &self.log).await;
        tracing::trace!(
            component = self.log.component(),
            statements = self.on_connect.statements().len(),
            failed,
            "connection initialized"
        );
    }

    /// A connection received a server notice.
    pub fn notice(&self, severity: &str, message: &str) {
        self.log.notice(&Notice::new(severity, message));
    }

    /// A pooled connection failed while not running a query.
    pub fn idle_error(&self, err: &DriverError) {
        self.log.idle_error(err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct RecordingExecutor {
        executed: Mutex<Vec<String>>,
        fail_on: &'static str,
    }

    #[async_trait::async_trait]
    impl StatementExecutor for RecordingExecutor {
        async fn execute(&self, statement: &str) -> Result<(), DriverError> {
            self.executed.lock().push(statement.to_string());
            if statement == self.fail_on {
                return Err(DriverError::Query(format!("cannot run {statement}")));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_runner_continues_after_failure() {
        let runner = ConnectHookRunner::new(["SET a = 1", "SET b = oops", "SET c = 3"].map(String::from));
        let conn = RecordingExecutor {
            executed: Mutex::new(Vec::new()),
            fail_on: "SET b = oops",
        };
        let log = Logger::new("postgres", None);

        let failed = runner.run(&conn, &log).await;

        assert_eq!(failed, 1);
        assert_eq!(
            *conn.executed.lock(),
            vec!["SET a = 1", "SET b = oops", "SET c = 3"]
        );
    }

    #[tokio::test]
    async fn test_empty_runner_executes_nothing() {
        let runner = ConnectHookRunner::default();
        let conn = RecordingExecutor {
            executed: Mutex::new(Vec::new()),
            fail_on: "",
        };
        let failed = runner.run(&conn, &Logger::new("postgres", None)).await;
        assert_eq!(failed, 0);
        assert!(conn.executed.lock().is_empty());
    }
}
