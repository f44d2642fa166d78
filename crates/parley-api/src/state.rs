use std::sync::Arc;
use std::time::Duration;

use tracing::{error, warn};

use parley_db::Database;
use parley_gateway::{ConnectionHub, Notifier};

use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub hub: ConnectionHub,
    pub notifier: Notifier,
    pub jwt_secret: String,
    /// Upper bound for a single storage call made by a handler.
    pub db_timeout: Duration,
}

impl AppStateInner {
    pub fn new(db: Arc<Database>, hub: ConnectionHub, jwt_secret: String, db_timeout: Duration) -> Self {
        let notifier = Notifier::new(hub.clone(), db.clone(), db_timeout);
        Self {
            db,
            hub,
            notifier,
            jwt_secret,
            db_timeout,
        }
    }

    /// Run a blocking read off the async runtime, bounded by `db_timeout`.
    /// On timeout the read keeps running in the blocking pool but the
    /// request fails with `Unavailable`.
    pub async fn run_db<F, T>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&Database) -> parley_db::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        let task = tokio::task::spawn_blocking(move || f(&db));

        match tokio::time::timeout(self.db_timeout, task).await {
            Ok(Ok(result)) => result.map_err(ApiError::from),
            Ok(Err(e)) => {
                error!("spawn_blocking join error: {}", e);
                Err(ApiError::Unavailable(format!("storage task failed: {e}")))
            }
            Err(_) => {
                warn!("Storage call exceeded {:?}", self.db_timeout);
                Err(ApiError::Unavailable("storage timed out".into()))
            }
        }
    }

    /// Run a blocking write off the async runtime and wait for its outcome.
    ///
    /// Writes are not abandoned here: storage rolls back any transaction
    /// that overruns its write timeout, so an error always means nothing
    /// was committed and success always reaches the notifier.
    pub async fn run_write<F, T>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&Database) -> parley_db::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        match tokio::task::spawn_blocking(move || f(&db)).await {
            Ok(result) => result.map_err(ApiError::from),
            Err(e) => {
                error!("spawn_blocking join error: {}", e);
                Err(ApiError::Unavailable(format!("storage task failed: {e}")))
            }
        }
    }
}
