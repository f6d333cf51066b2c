//! Remote key-value backend over Redis.
//!
//! The client connects lazily on first use and verifies the server answers `PING` before the
//! connection is shared. Reads, writes and deletes are awaited network calls.

use std::fmt;

use async_trait::async_trait;
use redis::{AsyncCommands as _, aio::MultiplexedConnection};
use time::Duration;
use tokio::sync::OnceCell;

use crate::{
    backend::SessionBackend,
    error::{Error, Result},
    format,
    value::Values,
};

pub const DEFAULT_URL: &str = "redis://127.0.0.1:6379/";

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    /// Prepended to every session id to form the key.
    pub key_prefix: String,
    /// Server-side expiry for written keys; `None` keeps them until deleted.
    pub max_age: Option<Duration>,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_owned(),
            key_prefix: String::new(),
            max_age: None,
        }
    }
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }
}

pub struct RedisStore {
    client: redis::Client,
    connection: OnceCell<MultiplexedConnection>,
    config: RedisConfig,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("config", &self.config)
            .field("connected", &self.connection.initialized())
            .finish()
    }
}

fn unavailable(err: redis::RedisError) -> Error {
    Error::BackendUnavailable(err.to_string())
}

impl RedisStore {
    /// Validate the configuration. No connection is made until the store is first used.
    pub fn new(config: RedisConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str()).map_err(unavailable)?;
        Ok(Self {
            client,
            connection: OnceCell::new(),
            config,
        })
    }

    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    fn key(&self, id: &str) -> String {
        format!("{}{id}", self.config.key_prefix)
    }

    async fn connection(&self) -> Result<MultiplexedConnection> {
        let connection = self
            .connection
            .get_or_try_init(|| async {
                let mut connection = self
                    .client
                    .get_multiplexed_async_connection()
                    .await
                    .map_err(unavailable)?;
                let pong: String = redis::cmd("PING")
                    .query_async(&mut connection)
                    .await
                    .map_err(unavailable)?;
                tracing::debug!(url = %self.config.url, %pong, "session store connected");
                Ok::<_, Error>(connection)
            })
            .await?;

        Ok(connection.clone())
    }
}

#[async_trait]
impl SessionBackend for RedisStore {
    async fn load(&self, id: &str) -> Result<Option<Values>> {
        let mut connection = self.connection().await?;
        let raw: Option<Vec<u8>> = connection.get(self.key(id)).await.map_err(unavailable)?;

        raw.map(|bytes| format::decode_values(&bytes)).transpose()
    }

    async fn update(&self, id: &str, values: &Values) -> Result<()> {
        let mut connection = self.connection().await?;
        let key = self.key(id);

        if values.is_empty() {
            let () = connection.del(key).await.map_err(unavailable)?;
            return Ok(());
        }

        let bytes = format::encode_values(values)?;
        let () = match self.config.max_age {
            Some(max_age) => {
                let seconds = max_age.whole_seconds().max(1).unsigned_abs();
                connection.set_ex(key, bytes, seconds).await
            }
            None => connection.set(key, bytes).await,
        }
        .map_err(unavailable)?;

        Ok(())
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        let mut connection = self.connection().await?;
        connection.exists(self.key(id)).await.map_err(unavailable)
    }
}
