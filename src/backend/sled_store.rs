//! Embedded log-structured store backed by `sled`.
//!
//! Every record carries a death time computed when it is written. A background cleaner flushes
//! the log on a fixed interval and sweeps records that are past their death time or no longer
//! decode. Writes and deletes are queued to a single writer task, so they apply in the order
//! they were issued without blocking the caller.

use std::{path::PathBuf, time::Duration as StdDuration};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};

use crate::{
    backend::SessionBackend,
    error::{Error, Result},
    format,
    value::Values,
};

const DEFAULT_CLEANUP_INTERVAL: StdDuration = StdDuration::from_secs(30 * 60);
const DEFAULT_MAX_AGE: Duration = Duration::days(2 * 365);

#[derive(Debug, Clone)]
pub struct SledConfig {
    pub path: PathBuf,
    pub cleanup_interval: StdDuration,
    pub max_age: Duration,
}

impl SledConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            max_age: DEFAULT_MAX_AGE,
        }
    }

    #[must_use]
    pub fn with_cleanup_interval(mut self, interval: StdDuration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    #[must_use]
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Record {
    data: Vec<u8>,
    #[serde(with = "time::serde::timestamp")]
    death_time: OffsetDateTime,
}

impl Record {
    fn is_dead(&self, now: OffsetDateTime) -> bool {
        self.death_time <= now
    }
}

fn unavailable(err: impl std::fmt::Display) -> Error {
    Error::BackendUnavailable(err.to_string())
}

fn malformed(err: impl std::fmt::Display) -> Error {
    Error::Malformed(err.to_string())
}

#[derive(Debug)]
enum WriteOp {
    Insert(String, Vec<u8>),
    Remove(String),
    Barrier(oneshot::Sender<()>),
}

#[derive(Debug)]
pub struct SledStore {
    db: sled::Db,
    config: SledConfig,
    writes: mpsc::UnboundedSender<WriteOp>,
    shutdown: watch::Sender<bool>,
    cleaner: Mutex<Option<JoinHandle<()>>>,
}

impl SledStore {
    /// Open the log at `config.path` and start the cleaner. Must be called within a tokio
    /// runtime.
    pub fn open(config: SledConfig) -> Result<Self> {
        let db = sled::open(&config.path).map_err(unavailable)?;
        let (writes, queued) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(db.clone(), queued));
        let (shutdown, stop) = watch::channel(false);
        let cleaner = tokio::spawn(run_cleaner(db.clone(), config.cleanup_interval, stop));

        Ok(Self {
            db,
            config,
            writes,
            shutdown,
            cleaner: Mutex::new(Some(cleaner)),
        })
    }

    pub fn config(&self) -> &SledConfig {
        &self.config
    }

    /// Wait until every write queued so far has been applied.
    pub async fn settle(&self) -> Result<()> {
        let (done, applied) = oneshot::channel();
        self.writes
            .send(WriteOp::Barrier(done))
            .map_err(|_| unavailable("session log writer stopped"))?;
        applied
            .await
            .map_err(|_| unavailable("session log writer stopped"))
    }

    /// Apply queued writes, stop the cleaner after one final sweep, then flush the log to disk.
    pub async fn shutdown(&self) -> Result<()> {
        self.settle().await?;
        self.shutdown.send_replace(true);

        let cleaner = self.cleaner.lock().take();
        if let Some(cleaner) = cleaner
            && let Err(err) = cleaner.await
        {
            tracing::error!(err = %err, "session log cleaner failed");
        }

        self.db.flush_async().await.map_err(unavailable)?;
        Ok(())
    }

    fn read_record(&self, id: &str) -> Result<Option<Record>> {
        let Some(raw) = self.db.get(id.as_bytes()).map_err(unavailable)? else {
            return Ok(None);
        };
        let record: Record = bincode::deserialize(&raw).map_err(malformed)?;

        // swept on the next cleaner pass
        if record.is_dead(OffsetDateTime::now_utc()) {
            return Ok(None);
        }
        Ok(Some(record))
    }
}

impl Drop for SledStore {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

#[async_trait]
impl SessionBackend for SledStore {
    async fn load(&self, id: &str) -> Result<Option<Values>> {
        match self.read_record(id)? {
            Some(record) => format::decode_values(&record.data).map(Some),
            None => Ok(None),
        }
    }

    async fn update(&self, id: &str, values: &Values) -> Result<()> {
        let op = if values.is_empty() {
            WriteOp::Remove(id.to_owned())
        } else {
            let record = Record {
                data: format::encode_values(values)?,
                death_time: OffsetDateTime::now_utc().saturating_add(self.config.max_age),
            };
            WriteOp::Insert(id.to_owned(), bincode::serialize(&record).map_err(malformed)?)
        };

        self.writes
            .send(op)
            .map_err(|_| unavailable("session log writer stopped"))
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.read_record(id)?.is_some())
    }
}

// Applies queued operations one at a time until the store is dropped.
async fn run_writer(db: sled::Db, mut queued: mpsc::UnboundedReceiver<WriteOp>) {
    while let Some(op) = queued.recv().await {
        let db = db.clone();
        let applied = tokio::task::spawn_blocking(move || match op {
            WriteOp::Insert(key, raw) => {
                if let Err(err) = db.insert(key.as_bytes(), raw) {
                    tracing::warn!(err = %err, session_id = %key, "session log write failed");
                }
            }
            WriteOp::Remove(key) => {
                if let Err(err) = db.remove(key.as_bytes()) {
                    tracing::warn!(err = %err, session_id = %key, "session log delete failed");
                }
            }
            WriteOp::Barrier(done) => {
                let _ = done.send(());
            }
        })
        .await;

        if let Err(err) = applied {
            tracing::error!(err = %err, "session log writer panicked");
        }
    }
}

async fn run_cleaner(db: sled::Db, interval: StdDuration, mut stop: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;

    loop {
        let last = tokio::select! {
            _ = ticker.tick() => false,
            _ = stop.changed() => true,
        };

        let pass_db = db.clone();
        match tokio::task::spawn_blocking(move || sweep(&pass_db)).await {
            Ok(0) => {}
            Ok(purged) => tracing::debug!(purged, "session log swept"),
            Err(err) => tracing::error!(err = %err, "session log sweep panicked"),
        }

        if last {
            break;
        }
    }
}

/// Flush the log, then delete every record that is dead or does not decode.
fn sweep(db: &sled::Db) -> usize {
    if let Err(err) = db.flush() {
        tracing::error!(err = %err, "session log flush failed");
    }

    let now = OffsetDateTime::now_utc();
    let mut purged = 0;

    for entry in db.iter() {
        let (key, raw) = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::error!(err = %err, "session log scan failed");
                continue;
            }
        };

        let dead = bincode::deserialize::<Record>(&raw)
            .map(|record| record.is_dead(now))
            .unwrap_or(true);

        if dead {
            match db.remove(&key) {
                Ok(_) => purged += 1,
                Err(err) => tracing::error!(err = %err, "session log purge failed"),
            }
        }
    }

    purged
}
