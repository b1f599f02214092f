use crate::config::WarehouseConfig;
use crate::errors::{AppError, AppResult};
use crate::models::Credentials;
use crate::redaction::Redactor;
use crate::secrets::SecretStore;
use crate::warehouse::{Warehouse, WarehouseConnection};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHandle {
    pub session_id: String,
    pub account: String,
    pub user: String,
    pub opened_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub retry_on_connectivity: bool,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &WarehouseConfig) -> Self {
        Self {
            retry_on_connectivity: config.retry_on_connectivity,
            delay: Duration::from_millis(config.retry_delay_ms),
        }
    }

    pub fn none() -> Self {
        Self {
            retry_on_connectivity: false,
            delay: Duration::ZERO,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&WarehouseConfig::default())
    }
}

struct ActiveSession {
    handle: SessionHandle,
    fingerprint: u64,
    connection: Box<dyn WarehouseConnection>,
    redactor: Redactor,
}

/// Credentials the warehouse refused, kept until they change or the manager is reset.
struct Rejection {
    fingerprint: u64,
    message: String,
}

/// Owns the single warehouse session for this dashboard. The session sits behind
/// an async mutex so two in-flight queries never share the handle; driver calls
/// run on the blocking pool.
#[derive(Clone)]
pub struct ConnectionManager {
    warehouse: Arc<dyn Warehouse>,
    secrets: Arc<dyn SecretStore>,
    active: Arc<Mutex<Option<ActiveSession>>>,
    rejected: Arc<std::sync::Mutex<Option<Rejection>>>,
    retry: RetryPolicy,
}

impl ConnectionManager {
    pub fn new(warehouse: Arc<dyn Warehouse>, secrets: Arc<dyn SecretStore>, retry: RetryPolicy) -> Self {
        Self {
            warehouse,
            secrets,
            active: Arc::new(Mutex::new(None)),
            rejected: Arc::new(std::sync::Mutex::new(None)),
            retry,
        }
    }

    /// Opens a session for `credentials`, reusing the active one when it was
    /// opened with the same account, user and token.
    pub async fn acquire_session(&self, credentials: &Credentials) -> AppResult<SessionHandle> {
        let mut active = self.active.lock().await;
        let fingerprint = fingerprint(credentials);
        if let Some(session) = active.as_ref() {
            if session.fingerprint == fingerprint {
                return Ok(session.handle.clone());
            }
        }
        if let Some(previous) = active.take() {
            close_session(previous, "credentials changed");
        }

        let session = self.open(credentials).await?;
        let handle = session.handle.clone();
        *active = Some(session);
        Ok(handle)
    }

    pub async fn acquire_from_store(&self) -> AppResult<SessionHandle> {
        let credentials = self.secrets.credentials()?;
        self.acquire_session(&credentials).await
    }

    /// Returns the active session, opening one from the secret store if needed.
    pub async fn ensure_session(&self) -> AppResult<SessionHandle> {
        let mut active = self.active.lock().await;
        if let Some(session) = active.as_ref() {
            return Ok(session.handle.clone());
        }
        let credentials = self.secrets.credentials()?;
        let session = self.open(&credentials).await?;
        let handle = session.handle.clone();
        *active = Some(session);
        Ok(handle)
    }

    /// Idempotent: returns `false` when `handle` is no longer the active session.
    pub async fn release_session(&self, handle: &SessionHandle) -> AppResult<bool> {
        let mut active = self.active.lock().await;
        let matches = active
            .as_ref()
            .is_some_and(|session| session.handle.session_id == handle.session_id);
        if !matches {
            return Ok(false);
        }
        if let Some(session) = active.take() {
            close_session(session, "released");
        }
        Ok(true)
    }

    /// Closes the active session and forgets any rejected credentials.
    pub async fn release_all(&self) -> bool {
        let mut active = self.active.lock().await;
        self.clear_rejection();
        match active.take() {
            Some(session) => {
                close_session(session, "shutdown");
                true
            }
            None => false,
        }
    }

    pub async fn current_session(&self) -> Option<SessionHandle> {
        let active = self.active.lock().await;
        active.as_ref().map(|session| session.handle.clone())
    }

    /// Runs `operation` on the active session, opening one from the secret store
    /// if needed. Connectivity or authentication failures drop the session so the
    /// next call reconnects.
    pub async fn with_session<T, F>(&self, operation: F) -> AppResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn WarehouseConnection) -> AppResult<T> + Send + 'static,
    {
        let mut active = self.active.lock().await;
        let mut session = match active.take() {
            Some(session) => session,
            None => {
                let credentials = self.secrets.credentials()?;
                self.open(&credentials).await?
            }
        };

        // A panicking driver call loses the session; the next call reconnects.
        let (session, result) = tokio::task::spawn_blocking(move || {
            let result = operation(session.connection.as_mut());
            (session, result)
        })
        .await
        .map_err(|error| AppError::Internal(format!("Warehouse call aborted: {}", error)))?;

        match result {
            Ok(value) => {
                *active = Some(session);
                Ok(value)
            }
            Err(error) => {
                let error = scrub(error, &session.redactor);
                if matches!(error, AppError::Connectivity(_) | AppError::Authentication(_)) {
                    close_session(session, "query failed");
                } else {
                    *active = Some(session);
                }
                Err(error)
            }
        }
    }

    /// Acquire, run, release: the session is released on every exit path.
    pub async fn scoped<T, F>(&self, credentials: &Credentials, operation: F) -> AppResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn WarehouseConnection) -> AppResult<T> + Send + 'static,
    {
        let handle = self.acquire_session(credentials).await?;
        let result = self.with_session(operation).await;
        let released = self.release_session(&handle).await;
        match (result, released) {
            (Err(error), _) => Err(error),
            (Ok(_), Err(error)) => Err(error),
            (Ok(value), Ok(_)) => Ok(value),
        }
    }

    async fn open(&self, credentials: &Credentials) -> AppResult<ActiveSession> {
        let fingerprint = fingerprint(credentials);
        if let Some(message) = self.rejection_for(fingerprint) {
            return Err(AppError::Authentication(message));
        }

        let redactor = Redactor::new().with_secret(&credentials.token);
        let connection = match self.connect(credentials).await {
            Err(AppError::Connectivity(message)) if self.retry.retry_on_connectivity => {
                tracing::warn!(
                    warehouse = self.warehouse.name(),
                    account = %credentials.account,
                    error = %redactor.redact(&message),
                    "warehouse unreachable, retrying once"
                );
                tokio::time::sleep(self.retry.delay).await;
                self.connect(credentials).await
            }
            other => other,
        }
        .map_err(|error| scrub(error, &redactor));

        let connection = match connection {
            Ok(connection) => connection,
            Err(AppError::Authentication(message)) => {
                tracing::warn!(
                    warehouse = self.warehouse.name(),
                    account = %credentials.account,
                    user = %credentials.user,
                    "warehouse rejected credentials; not retrying until they change"
                );
                self.remember_rejection(fingerprint, &message);
                return Err(AppError::Authentication(message));
            }
            Err(error) => return Err(error),
        };

        let handle = SessionHandle {
            session_id: Uuid::new_v4().to_string(),
            account: credentials.account.clone(),
            user: credentials.user.clone(),
            opened_at: Utc::now(),
        };
        tracing::info!(
            session_id = %handle.session_id,
            warehouse = self.warehouse.name(),
            account = %handle.account,
            user = %handle.user,
            "warehouse session opened"
        );
        Ok(ActiveSession {
            handle,
            fingerprint,
            connection,
            redactor,
        })
    }

    async fn connect(&self, credentials: &Credentials) -> AppResult<Box<dyn WarehouseConnection>> {
        let warehouse = self.warehouse.clone();
        let credentials = credentials.clone();
        match tokio::task::spawn_blocking(move || warehouse.connect(&credentials)).await {
            Ok(result) => result,
            Err(error) => Err(AppError::Internal(format!("Warehouse connect aborted: {}", error))),
        }
    }

    fn rejection_for(&self, fingerprint: u64) -> Option<String> {
        let rejected = self.lock_rejected();
        rejected
            .as_ref()
            .filter(|rejection| rejection.fingerprint == fingerprint)
            .map(|rejection| rejection.message.clone())
    }

    fn remember_rejection(&self, fingerprint: u64, message: &str) {
        *self.lock_rejected() = Some(Rejection {
            fingerprint,
            message: message.to_string(),
        });
    }

    fn clear_rejection(&self) {
        *self.lock_rejected() = None;
    }

    fn lock_rejected(&self) -> std::sync::MutexGuard<'_, Option<Rejection>> {
        self.rejected.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn fingerprint(credentials: &Credentials) -> u64 {
    let mut hasher = DefaultHasher::new();
    credentials.account.hash(&mut hasher);
    credentials.user.hash(&mut hasher);
    credentials.token.hash(&mut hasher);
    hasher.finish()
}

fn close_session(session: ActiveSession, reason: &str) {
    let session_id = session.handle.session_id.clone();
    match session.connection.close() {
        Ok(()) => tracing::info!(session_id = %session_id, reason, "warehouse session closed"),
        Err(error) => tracing::warn!(
            session_id = %session_id,
            reason,
            error = %session.redactor.redact(&error.to_string()),
            "warehouse session close failed"
        ),
    }
}

fn scrub(error: AppError, redactor: &Redactor) -> AppError {
    match error {
        AppError::Authentication(message) => AppError::Authentication(redactor.redact(&message)),
        AppError::Connectivity(message) => AppError::Connectivity(redactor.redact(&message)),
        AppError::Query(message) => AppError::Query(redactor.redact(&message)),
        AppError::Internal(message) => AppError::Internal(redactor.redact(&message)),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::{ConnectionManager, RetryPolicy};
    use crate::errors::{AppError, AppResult};
    use crate::models::{Credentials, SqlValue};
    use crate::secrets::StaticSecretStore;
    use crate::warehouse::{Warehouse, WarehouseConnection, WarehouseRows};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::time::Duration;

    #[derive(Clone, Copy)]
    enum Failure {
        Connectivity,
        Authentication,
    }

    struct FakeWarehouse {
        failure: Failure,
        failures_remaining: AtomicUsize,
        connects: AtomicUsize,
        closes: Arc<AtomicUsize>,
    }

    impl FakeWarehouse {
        fn new(failure: Failure, failures: usize) -> Arc<Self> {
            Arc::new(Self {
                failure,
                failures_remaining: AtomicUsize::new(failures),
                connects: AtomicUsize::new(0),
                closes: Arc::new(AtomicUsize::new(0)),
            })
        }
    }

    struct FakeConnection {
        closes: Arc<AtomicUsize>,
    }

    impl WarehouseConnection for FakeConnection {
        fn execute(&mut self, sql: &str, params: &[SqlValue]) -> AppResult<WarehouseRows> {
            if sql == "SLOW" {
                std::thread::sleep(Duration::from_millis(300));
            }
            Ok(WarehouseRows {
                columns: vec!["params".to_string()],
                rows: vec![vec![SqlValue::Integer(params.len() as i64)]],
            })
        }

        fn close(self: Box<Self>) -> AppResult<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl Warehouse for FakeWarehouse {
        fn name(&self) -> &str {
            "fake"
        }

        fn connect(&self, credentials: &Credentials) -> AppResult<Box<dyn WarehouseConnection>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures_remaining.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
                return Err(match self.failure {
                    Failure::Connectivity => {
                        AppError::Connectivity(format!("timeout while sending token={}", credentials.token))
                    }
                    Failure::Authentication => AppError::Authentication("bad credentials".to_string()),
                });
            }
            Ok(Box::new(FakeConnection {
                closes: self.closes.clone(),
            }))
        }
    }

    fn credentials() -> Credentials {
        Credentials {
            account: "acme".to_string(),
            user: "analyst".to_string(),
            token: "tok-123456".to_string(),
        }
    }

    fn manager(warehouse: Arc<FakeWarehouse>) -> ConnectionManager {
        ConnectionManager::new(
            warehouse,
            Arc::new(StaticSecretStore::new(credentials())),
            RetryPolicy {
                retry_on_connectivity: true,
                delay: Duration::ZERO,
            },
        )
    }

    #[tokio::test]
    async fn transient_connectivity_failure_is_retried_once() {
        let warehouse = FakeWarehouse::new(Failure::Connectivity, 1);
        let manager = manager(warehouse.clone());
        manager.acquire_session(&credentials()).await.expect("acquire after retry");
        assert_eq!(warehouse.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn repeated_connectivity_failure_surfaces_without_token() {
        let warehouse = FakeWarehouse::new(Failure::Connectivity, 5);
        let manager = manager(warehouse.clone());
        let error = manager
            .acquire_session(&credentials())
            .await
            .expect_err("should fail");
        assert!(matches!(error, AppError::Connectivity(_)));
        assert!(!error.to_string().contains("tok-123456"));
        assert_eq!(warehouse.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn authentication_failure_is_never_retried() {
        let warehouse = FakeWarehouse::new(Failure::Authentication, 5);
        let manager = manager(warehouse.clone());
        let error = manager
            .acquire_session(&credentials())
            .await
            .expect_err("should fail");
        assert!(matches!(error, AppError::Authentication(_)));
        assert_eq!(warehouse.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejected_credentials_are_latched_until_reset() {
        let warehouse = FakeWarehouse::new(Failure::Authentication, 1);
        let manager = manager(warehouse.clone());

        for _ in 0..3 {
            let error = manager
                .acquire_session(&credentials())
                .await
                .expect_err("rejected credentials");
            assert!(matches!(error, AppError::Authentication(_)));
            let error = manager
                .with_session(|conn| conn.execute("SELECT 1", &[]))
                .await
                .expect_err("no session with rejected credentials");
            assert!(matches!(error, AppError::Authentication(_)));
        }
        assert_eq!(warehouse.connects.load(Ordering::SeqCst), 1);

        assert!(!manager.release_all().await);
        manager.acquire_session(&credentials()).await.expect("retry after reset");
        assert_eq!(warehouse.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn changed_token_is_tried_even_after_a_rejection() {
        let warehouse = FakeWarehouse::new(Failure::Authentication, 1);
        let manager = manager(warehouse.clone());
        manager
            .acquire_session(&credentials())
            .await
            .expect_err("first token rejected");

        let rotated = Credentials {
            token: "tok-rotated".to_string(),
            ..credentials()
        };
        manager.acquire_session(&rotated).await.expect("rotated token accepted");
        assert_eq!(warehouse.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn session_is_reused_only_for_the_same_token() {
        let warehouse = FakeWarehouse::new(Failure::Connectivity, 0);
        let manager = manager(warehouse.clone());
        let first = manager.acquire_session(&credentials()).await.expect("acquire");
        let again = manager.acquire_session(&credentials()).await.expect("reacquire");
        assert_eq!(first.session_id, again.session_id);

        let rotated = Credentials {
            token: "tok-rotated".to_string(),
            ..credentials()
        };
        let replaced = manager.acquire_session(&rotated).await.expect("acquire rotated");
        assert_ne!(first.session_id, replaced.session_id);
        assert_eq!(warehouse.connects.load(Ordering::SeqCst), 2);
        assert_eq!(warehouse.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn ensure_session_opens_from_the_secret_store_once() {
        let warehouse = FakeWarehouse::new(Failure::Connectivity, 0);
        let manager = manager(warehouse.clone());
        let first = manager.ensure_session().await.expect("open");
        let second = manager.ensure_session().await.expect("reuse");
        assert_eq!(first, second);
        assert_eq!(warehouse.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_statements_do_not_stall_the_runtime() {
        let warehouse = FakeWarehouse::new(Failure::Connectivity, 0);
        let manager = manager(warehouse);
        let started = std::time::Instant::now();

        let query = manager.with_session(|conn| conn.execute("SLOW", &[]));
        let timer = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            started.elapsed()
        };
        let (rows, timer_fired_after) = tokio::join!(query, timer);

        rows.expect("slow query");
        assert!(timer_fired_after < Duration::from_millis(150), "{:?}", timer_fired_after);
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let warehouse = FakeWarehouse::new(Failure::Connectivity, 0);
        let manager = manager(warehouse.clone());
        let handle = manager.acquire_session(&credentials()).await.expect("acquire");

        assert!(manager.release_session(&handle).await.expect("first release"));
        assert!(!manager.release_session(&handle).await.expect("second release"));
        assert_eq!(warehouse.closes.load(Ordering::SeqCst), 1);
        assert!(manager.current_session().await.is_none());
    }

    #[tokio::test]
    async fn scoped_session_is_released_on_error() {
        let warehouse = FakeWarehouse::new(Failure::Connectivity, 0);
        let manager = manager(warehouse.clone());

        let result: AppResult<()> = manager
            .scoped(&credentials(), |_conn| Err(AppError::Query("syntax error".to_string())))
            .await;
        assert!(matches!(result, Err(AppError::Query(_))));
        assert!(manager.current_session().await.is_none());
        assert_eq!(warehouse.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn with_session_opens_lazily_and_reuses_the_handle() {
        let warehouse = FakeWarehouse::new(Failure::Connectivity, 0);
        let manager = manager(warehouse.clone());

        for _ in 0..3 {
            let rows = manager
                .with_session(|conn| conn.execute("SELECT ?1", &[SqlValue::Integer(1)]))
                .await
                .expect("query");
            assert_eq!(rows.rows[0][0], SqlValue::Integer(1));
        }
        assert_eq!(warehouse.connects.load(Ordering::SeqCst), 1);
        assert!(manager.release_all().await);
        assert!(!manager.release_all().await);
    }
}
