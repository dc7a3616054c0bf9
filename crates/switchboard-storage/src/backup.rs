use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, Notify};

/// On-disk mirror for tokens and plain config.
///
/// Writes compose the full JSON in memory, land in `<path>.tmp`, fsync, and
/// rename over the destination; a per-file lock serializes writers. Reads
/// are unlocked.
pub struct FileBackup {
    base_dir: PathBuf,
    locks: std::sync::Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl FileBackup {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .unwrap()
            .entry(path.to_path_buf())
            .or_default()
            .clone()
    }

    pub async fn write_json(&self, relative: &str, value: &Value) -> std::io::Result<()> {
        let path = self.base_dir.join(relative);
        let lock = self.lock_for(&path);
        let _guard = lock.lock().await;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("tmp");
        let payload = serde_json::to_vec_pretty(value)?;
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&payload).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    pub async fn read_json(&self, relative: &str) -> std::io::Result<Option<Value>> {
        let path = self.base_dir.join(relative);
        match tokio::fs::read(&path).await {
            Ok(raw) => Ok(serde_json::from_slice(&raw).ok()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub async fn remove(&self, relative: &str) -> std::io::Result<()> {
        let path = self.base_dir.join(relative);
        let lock = self.lock_for(&path);
        let _guard = lock.lock().await;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Relative paths of `.json` files directly under `relative_dir`.
    pub async fn list_json(&self, relative_dir: &str) -> std::io::Result<Vec<String>> {
        let dir = self.base_dir.join(relative_dir);
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(err) => return Err(err),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.ends_with(".json") {
                out.push(format!("{relative_dir}/{name}"));
            }
        }
        out.sort();
        Ok(out)
    }
}

/// Coalesces bursts of work into one callback per quiet period.
///
/// `signal()` arms the timer; further signals within the window fold into
/// the pending flush. `force_flush()` runs the callback immediately and
/// clears the pending state.
pub struct Debouncer {
    pending: Arc<Notify>,
    forced: Arc<Notify>,
    flushed: Arc<Notify>,
}

impl Debouncer {
    pub fn spawn<F, Fut>(quiet: Duration, mut flush: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let pending = Arc::new(Notify::new());
        let forced = Arc::new(Notify::new());
        let flushed = Arc::new(Notify::new());

        let pending_rx = pending.clone();
        let forced_rx = forced.clone();
        let flushed_tx = flushed.clone();
        tokio::spawn(async move {
            loop {
                pending_rx.notified().await;
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(quiet) => break,
                        // A new signal inside the window restarts it.
                        _ = pending_rx.notified() => continue,
                        _ = forced_rx.notified() => break,
                    }
                }
                flush().await;
                flushed_tx.notify_waiters();
            }
        });

        Self {
            pending,
            forced,
            flushed,
        }
    }

    pub fn signal(&self) {
        self.pending.notify_one();
    }

    /// Skip the quiet period and wait for the flush callback to finish.
    pub async fn force_flush(&self) {
        let done = self.flushed.notified();
        tokio::pin!(done);
        // Register before signalling so the completion wake is not lost.
        done.as_mut().enable();
        self.pending.notify_one();
        self.forced.notify_one();
        done.await;
    }
}
