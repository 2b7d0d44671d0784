//! Per-connection facade over a shared session.

use crate::cache::CacheStats;
use crate::column::ColumnDescriptor;
use crate::config::ClientConfig;
use crate::error::{ClientError, Operation, Result};
use crate::executor::RetryPolicy;
use crate::headers::{self, SESSION_HEADER};
use crate::result::QueryResult;
use crate::session::{SessionHandle, SessionManager};
use crate::types::{Database, DatasetRequest, NativeQuery, TableInfo};
use parking_lot::{Mutex, RwLock};
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Schemas beyond which the prefetch pauses between schemas.
const PREFETCH_PAUSE_THRESHOLD: usize = 5;

/// One logical connection to a Metabase server.
///
/// Metadata reads go through the shared session's cache; queries go straight
/// to the dataset endpoint. Methods take `&self`, so [`cancel`](Self::cancel)
/// can be called from another task while a query is running.
///
/// # Example
///
/// ```rust,no_run
/// use metabridge_client::{ClientConfig, ManagerConfig, MetabaseClient, SessionManager};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let manager = Arc::new(SessionManager::new(ManagerConfig::default())?);
/// let config = ClientConfig::builder("metabase.example.com", "analyst@example.com", "secret")
///     .database("Sample Database")
///     .build()?;
///
/// let client = MetabaseClient::new(config, Arc::clone(&manager))?;
/// client.connect().await?;
///
/// let mut result = client.execute_query("SELECT 1 AS one", "Sample Database").await?;
/// while result.next() {
///     println!("{}", result.value(1)?);
/// }
/// client.close();
/// # Ok(())
/// # }
/// ```
pub struct MetabaseClient {
    config: ClientConfig,
    manager: Arc<SessionManager>,
    session: RwLock<Option<SessionHandle>>,
    database: RwLock<Option<String>>,
    cancel: Mutex<CancellationToken>,
    prefetch: Mutex<Option<JoinHandle<usize>>>,
}

impl MetabaseClient {
    /// Create an unconnected client. Nothing is sent until the first call.
    pub fn new(config: ClientConfig, manager: Arc<SessionManager>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            database: RwLock::new(config.database.clone()),
            config,
            manager,
            session: RwLock::new(None),
            cancel: Mutex::new(CancellationToken::new()),
            prefetch: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    // =========================================================================
    // Connection lifecycle
    // =========================================================================

    /// Authenticate, select the configured database and start the prefetch.
    ///
    /// Prefetch failures are logged and never fail the connection.
    pub async fn connect(&self) -> Result<()> {
        self.authenticate().await?;

        let database = self.database.read().clone();
        if let Some(name) = database {
            self.set_database(&name).await?;
            if self.config.prefetch_metadata {
                self.spawn_prefetch(name).await?;
            }
        }
        Ok(())
    }

    /// Attach to the shared session for this client's credentials.
    pub async fn authenticate(&self) -> Result<()> {
        let handle = self.manager.acquire(&self.config).await?;
        // Replacing an older handle gives its reference back.
        *self.session.write() = Some(handle);
        Ok(())
    }

    /// True while a session is held and its token is valid.
    pub fn is_authenticated(&self) -> bool {
        self.session
            .read()
            .as_ref()
            .is_some_and(SessionHandle::is_valid)
    }

    /// Return a usable session, re-acquiring one if the held token expired.
    pub async fn ensure_connection(&self) -> Result<SessionHandle> {
        let current = self.session.read().as_ref().filter(|h| h.is_valid()).cloned();
        if let Some(handle) = current {
            return Ok(handle);
        }

        tracing::debug!(host = %self.config.host, "Session missing or expired, re-authenticating");
        let handle = self.manager.acquire(&self.config).await?;
        *self.session.write() = Some(handle.clone());
        Ok(handle)
    }

    /// Give the session reference back after `release_delay`.
    ///
    /// The delay leaves a running prefetch or a racing call time to finish on
    /// the same session. Without a runtime the reference is released at once.
    pub fn close(&self) {
        let Some(handle) = self.session.write().take() else {
            return;
        };

        let delay = self.config.release_delay;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let manager = Arc::clone(&self.manager);
                runtime.spawn(async move {
                    tokio::time::sleep(delay).await;
                    manager.release(handle);
                });
            }
            Err(_) => self.manager.release(handle),
        }
    }

    /// Cancel the query in flight, if any.
    ///
    /// The running HTTP attempt is not aborted; the query fails with
    /// [`ClientError::Cancelled`] instead of starting another attempt.
    pub fn cancel(&self) {
        let previous = std::mem::replace(&mut *self.cancel.lock(), CancellationToken::new());
        previous.cancel();
    }

    /// Take the handle of the prefetch started by [`connect`](Self::connect).
    ///
    /// The task yields the number of tables it loaded.
    pub fn take_prefetch(&self) -> Option<JoinHandle<usize>> {
        self.prefetch.lock().take()
    }

    // =========================================================================
    // Databases
    // =========================================================================

    /// Every database visible to this user (cached).
    pub async fn databases(&self) -> Result<Vec<Database>> {
        let session = self.ensure_connection().await?;
        session.metadata().databases().await
    }

    /// Look up a database by exact name.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotFound`] when no database has this name.
    pub async fn validate_database(&self, name: &str) -> Result<Database> {
        self.databases()
            .await?
            .into_iter()
            .find(|db| db.name == name)
            .ok_or_else(|| ClientError::NotFound(format!("database '{}'", name)))
    }

    /// Validate `name` and make it the database used for schema and table browsing.
    pub async fn set_database(&self, name: &str) -> Result<()> {
        self.validate_database(name).await?;
        *self.database.write() = Some(name.to_string());
        Ok(())
    }

    /// Name of the database used for schema and table browsing.
    pub fn current_database(&self) -> Option<String> {
        self.database.read().clone()
    }

    // =========================================================================
    // Catalog
    // =========================================================================

    /// Schemas of the current database.
    pub async fn schemas(&self) -> Result<Vec<String>> {
        let session = self.ensure_connection().await?;
        let database_id = self.current_database_id().await?;
        session.metadata().schemas(database_id).await
    }

    /// Tables of one schema of the current database.
    pub async fn tables(&self, schema: &str) -> Result<Vec<TableInfo>> {
        let session = self.ensure_connection().await?;
        let database_id = self.current_database_id().await?;
        session.metadata().tables(database_id, schema).await
    }

    /// Top-level columns of a table.
    pub async fn columns(&self, table_id: i64) -> Result<Vec<ColumnDescriptor>> {
        let session = self.ensure_connection().await?;
        session.metadata().columns(table_id).await
    }

    /// Drop the session's cached catalog and reload the database list.
    ///
    /// Other clients sharing the session see the reset too.
    pub async fn refresh_metadata(&self) -> Result<Vec<Database>> {
        let session = self.ensure_connection().await?;
        session.metadata().invalidate_all();
        session.metadata().databases().await
    }

    /// Statistics of the shared catalog cache, if a session is held.
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.session
            .read()
            .as_ref()
            .map(|session| session.metadata().stats())
    }

    async fn current_database_id(&self) -> Result<i64> {
        let name = self.current_database().ok_or_else(|| {
            ClientError::Config("no database selected for this connection".to_string())
        })?;
        Ok(self.validate_database(&name).await?.id)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Run a native SQL query against the named database.
    ///
    /// # Errors
    ///
    /// - [`ClientError::NotFound`] for an unknown database
    /// - [`ClientError::QueryExecution`] for a rejected or malformed response
    /// - [`ClientError::TransientNetwork`] / [`ClientError::Cancelled`] from the executor
    pub async fn execute_query(&self, sql: &str, database_name: &str) -> Result<QueryResult> {
        let session = self.ensure_connection().await?;
        let database = self.validate_database(database_name).await?;

        let url = format!("{}/api/dataset", session.base_url());
        let body = DatasetRequest {
            database: database.id,
            query_type: "native",
            native: NativeQuery { query: sql },
            template_tags: serde_json::Map::new(),
            query_metadata: headers::query_metadata(sql.len()),
        };
        let request = self
            .manager
            .executor()
            .http()
            .post(&url)
            .header(SESSION_HEADER, session.token())
            .json(&body)
            .build()
            .map_err(|e| ClientError::Config(format!("Invalid dataset URL {}: {}", url, e)))?;
        let policy = RetryPolicy::new(
            self.config.query_timeout,
            self.config.max_retries,
            self.config.retry_delay,
        );
        let cancel = self.cancel.lock().clone();

        let start = Instant::now();
        let response = self
            .manager
            .executor()
            .execute(Operation::Query, request, &policy, Some(&cancel))
            .await?;
        let status = response.status;
        let bytes = response.body;

        if status != StatusCode::OK && status != StatusCode::ACCEPTED {
            tracing::warn!(
                database = %database_name,
                status = status.as_u16(),
                "Query rejected"
            );
            return Err(ClientError::QueryExecution(format!(
                "HTTP {}: {}",
                status.as_u16(),
                String::from_utf8_lossy(&bytes)
            )));
        }

        let result = QueryResult::decode(&bytes)?;
        tracing::debug!(
            database = %database_name,
            rows = result.row_count(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Query completed"
        );
        Ok(result)
    }

    // =========================================================================
    // Prefetch
    // =========================================================================

    async fn spawn_prefetch(&self, database_name: String) -> Result<()> {
        let session = self.ensure_connection().await?;
        let pause = self.config.prefetch_pause;
        let task = tokio::spawn(async move {
            let loaded = prefetch_tables(&session, &database_name, pause).await;
            drop(session);
            loaded
        });
        if let Some(previous) = self.prefetch.lock().replace(task) {
            previous.abort();
        }
        Ok(())
    }
}

/// Warm the table cache for every schema of a database. Never fails.
async fn prefetch_tables(
    session: &SessionHandle,
    database_name: &str,
    pause: std::time::Duration,
) -> usize {
    let start = Instant::now();
    let metadata = session.metadata();

    let database_id = match metadata.databases().await {
        Ok(databases) => match databases.into_iter().find(|db| db.name == database_name) {
            Some(db) => db.id,
            None => return 0,
        },
        Err(e) => {
            tracing::warn!(error = %e, "Metadata prefetch could not list databases");
            return 0;
        }
    };
    let schemas = match metadata.schemas(database_id).await {
        Ok(schemas) => schemas,
        Err(e) => {
            tracing::warn!(database = %database_name, error = %e, "Metadata prefetch could not list schemas");
            return 0;
        }
    };

    let mut tables = 0;
    for schema in &schemas {
        match metadata.tables(database_id, schema).await {
            Ok(loaded) => tables += loaded.len(),
            Err(e) => {
                tracing::warn!(schema = %schema, error = %e, "Metadata prefetch skipped schema");
            }
        }
        if schemas.len() > PREFETCH_PAUSE_THRESHOLD {
            tokio::time::sleep(pause).await;
        }
    }

    tracing::debug!(
        database = %database_name,
        schemas = schemas.len(),
        tables,
        duration_ms = start.elapsed().as_millis() as u64,
        "Metadata prefetch finished"
    );
    tables
}

impl std::fmt::Debug for MetabaseClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetabaseClient")
            .field("config", &self.config)
            .field("database", &*self.database.read())
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}
