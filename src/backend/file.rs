//! One file per session under a directory.
//!
//! Writes and deletes go through a single writer task in the order they were issued. Writes are
//! awaited, deletes are not.

use std::{
    io,
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use tokio::{
    fs,
    sync::{mpsc, oneshot},
};

use crate::{
    backend::SessionBackend,
    error::{Error, Result},
    format,
    value::Values,
};

#[derive(Debug)]
enum FileOp {
    Write {
        path: PathBuf,
        bytes: Vec<u8>,
        done: oneshot::Sender<io::Result<()>>,
    },
    Remove(PathBuf),
}

#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
    writer: Arc<OnceLock<mpsc::UnboundedSender<FileOp>>>,
}

impl FileStore {
    /// Store sessions under `dir`, which is created on the first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            writer: Arc::default(),
        }
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    // Session ids embed client addresses, so they are encoded into a safe file name.
    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(URL_SAFE_NO_PAD.encode(id))
    }

    // The writer starts with the first write, inside the caller's runtime.
    fn queue(&self, op: FileOp) -> Result<()> {
        self.writer
            .get_or_init(|| {
                let (writer, queued) = mpsc::unbounded_channel();
                tokio::spawn(run_writer(self.dir.clone(), queued));
                writer
            })
            .send(op)
            .map_err(|_| writer_stopped())
    }
}

fn writer_stopped() -> Error {
    Error::BackendUnavailable("session file writer stopped".to_owned())
}

async fn run_writer(dir: PathBuf, mut queued: mpsc::UnboundedReceiver<FileOp>) {
    while let Some(op) = queued.recv().await {
        match op {
            FileOp::Write { path, bytes, done } => {
                let _ = done.send(write(&dir, &path, bytes).await);
            }
            FileOp::Remove(path) => {
                if let Err(err) = fs::remove_file(&path).await
                    && err.kind() != io::ErrorKind::NotFound
                {
                    tracing::warn!(err = %err, path = %path.display(), "session file delete failed");
                }
            }
        }
    }
}

async fn write(dir: &Path, path: &Path, bytes: Vec<u8>) -> io::Result<()> {
    fs::create_dir_all(dir).await?;
    fs::write(path, bytes).await
}

fn unavailable(err: io::Error) -> Error {
    Error::BackendUnavailable(err.to_string())
}

#[async_trait]
impl SessionBackend for FileStore {
    async fn load(&self, id: &str) -> Result<Option<Values>> {
        match fs::read(self.path_for(id)).await {
            Ok(bytes) => format::decode_values(&bytes).map(Some),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(unavailable(err)),
        }
    }

    async fn update(&self, id: &str, values: &Values) -> Result<()> {
        let path = self.path_for(id);

        if values.is_empty() {
            return self.queue(FileOp::Remove(path));
        }

        let bytes = format::encode_values(values)?;
        let (done, written) = oneshot::channel();
        self.queue(FileOp::Write { path, bytes, done })?;

        written
            .await
            .map_err(|_| writer_stopped())?
            .map_err(unavailable)
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        fs::try_exists(self.path_for(id)).await.map_err(unavailable)
    }
}
