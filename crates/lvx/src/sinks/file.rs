// ai
//! 📂 Previously, on "Things That Could Go Wrong With A File"...
//!
//! The disk was quiet. Too quiet. A lone process had been tasked with
//! appending to a log file — just appending, they said. Simple, they said.
//! What could go wrong?
//!
//! Then logrotate showed up. Or an operator with `rm` and confidence. The
//! file vanished out from under a perfectly healthy file descriptor, which —
//! fun fact — keeps writing happily into the void, because POSIX believes in
//! you long after the directory entry has stopped.
//!
//! This module is the answer: an append-mode sink that listens for "your file
//! is gone" events and reopens a fresh handle at the same path, mid-stream,
//! without dropping the session. Writes in flight at the moment of deletion
//! may be lost. Everything after the reopen lands in the new file. That's the
//! deal. It's a good deal. logrotate takes it or leaves it.
//!
//! 🚰 Record → BufWriter → append → (deletion?) → reopen → append
//! 💀 Permission denied → sink goes inert, pipeline lives on
//! 🦆 (mandatory, no notes)

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use async_channel::{Receiver, Sender};
use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::common::Record;
use crate::sinks::Sink;

/// 👀 Something happened to the watched path. Currently one something.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PathEvent {
    /// 💀 The target file no longer exists. The fd may still be warm.
    Deleted,
}

/// 🚰 ResilientFileSink — appends records as JSON lines and refuses to die quietly.
///
/// Failure manners, in order of severity:
/// - Can't open at startup → `error!` once, go inert (writes become no-ops).
///   File logging is best-effort next to the remote backend; crashing the
///   process over a bad path would be tail wagging dog.
/// - Target deleted while open → the injected watcher tells us, we drop the
///   stale handle and reopen append-mode at the same path. Detection is drained
///   before every write and on every tick, so recovery is prompt either way.
/// - Reopen fails → inert, logged. The next deletion event gets another try.
///
/// The watcher is a capability, not a mechanism: anything that can push
/// [`PathEvent::Deleted`] into the channel works — the polling task below,
/// an inotify wrapper, a test with a `Sender` and an agenda.
#[derive(Debug)]
pub(crate) struct ResilientFileSink {
    path: PathBuf,
    /// 📦 None = inert. The sink swallows writes and keeps its dignity.
    handle: Option<BufWriter<File>>,
    watch: Receiver<PathEvent>,
    closed: bool,
}

impl ResilientFileSink {
    /// 🚀 Open the target in append mode and arm the deletion watch.
    ///
    /// Note this never fails — when the open fails, the sink reports the
    /// problem and comes up inert instead of refusing to exist. The other
    /// sinks did nothing wrong and deserve to run.
    pub(crate) async fn new(path: impl Into<PathBuf>, watch: Receiver<PathEvent>) -> Self {
        let path = path.into();
        let handle = match open_append(&path).await {
            Ok(file) => Some(BufWriter::new(file)),
            Err(err) => {
                // 💀 The door would not budge. We log it once, loudly, and move on.
                // Inert is a valid lifestyle for a best-effort sink.
                error!("💀 file sink disabled, could not open '{}': {err:#}", path.display());
                None
            }
        };
        Self {
            path,
            handle,
            watch,
            closed: false,
        }
    }

    /// 🔄 Drain pending watch events; any deletion notice triggers a reopen.
    ///
    /// Deterministic contract: a close/deletion event always leads here unless
    /// the sink was explicitly shut down. `closed` is the only off switch.
    async fn check_watch(&mut self) {
        let mut deleted = false;
        while let Ok(event) = self.watch.try_recv() {
            match event {
                PathEvent::Deleted => deleted = true,
            }
        }
        if deleted && !self.closed {
            info!(
                "🔄 '{}' was deleted out from under us — reopening a fresh append handle",
                self.path.display()
            );
            // 🗑️ the old handle points at an unlinked inode. Let it go. Let it gooo.
            self.handle = None;
            match open_append(&self.path).await {
                Ok(file) => self.handle = Some(BufWriter::new(file)),
                Err(err) => {
                    error!(
                        "💀 reopen of '{}' failed, file sink going inert: {err:#}",
                        self.path.display()
                    );
                }
            }
        }
    }
}

/// 📂 Append-mode open, creating the file if needed. The only way this sink
/// ever touches the filesystem. `File::create` truncates; we are not savages.
async fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .await
        .context(format!(
            "💀 The log file '{}' could not be opened for append. We knocked. \
             We checked permissions. The door remained closed.",
            path.display()
        ))
}

#[async_trait]
impl Sink for ResilientFileSink {
    async fn receive(&mut self, record: Record) -> Result<()> {
        self.check_watch().await;
        let Some(handle) = self.handle.as_mut() else {
            // 🤫 inert mode: the write is dropped on purpose. Documented. Intentional.
            // Not silent data loss — loudly-announced-at-startup data loss.
            return Ok(());
        };
        let line = record.to_json_line();
        handle
            .write_all(line.as_bytes())
            .await
            .context("💀 append to log file failed mid-write")?;
        handle.write_all(b"\n").await?;
        Ok(())
    }

    async fn tick(&mut self) -> Result<()> {
        // ⏰ ticks also notice deletions, so a quiet stream still recovers promptly
        self.check_watch().await;
        if let Some(handle) = self.handle.as_mut() {
            handle
                .flush()
                .await
                .context("💀 periodic flush of the log file failed")?;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        // 🔒 explicit shutdown disarms the reopen logic for good
        self.closed = true;
        if let Some(mut handle) = self.handle.take() {
            handle.flush().await.context(
                "💀 Final flush of the log file failed. The last lines were SO close to disk.",
            )?;
        }
        debug!("🗑️ file sink closed for '{}'", self.path.display());
        Ok(())
    }
}

/// 👀 Spawn the default deletion watcher: a polling task that checks whether
/// the path still exists and shouts [`PathEvent::Deleted`] when it stops.
///
/// Polling instead of inotify keeps this portable and dependency-free; the
/// sink only cares about the channel, so swapping in a fancier watcher later
/// touches exactly zero sink code. The task exits on its own once the sink
/// (the only receiver) is gone.
pub(crate) fn spawn_poll_watcher(
    path: PathBuf,
    period: Duration,
) -> (Receiver<PathEvent>, JoinHandle<()>) {
    let (tx, rx): (Sender<PathEvent>, Receiver<PathEvent>) = async_channel::bounded(4);
    let handle = tokio::spawn(async move {
        let mut existed = tokio::fs::try_exists(&path).await.unwrap_or(false);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let exists = tokio::fs::try_exists(&path).await.unwrap_or(false);
            if existed && !exists {
                warn!("👀 detected deletion of '{}'", path.display());
                if tx.send(PathEvent::Deleted).await.is_err() {
                    // sink dropped its receiver; watch duty is over
                    return;
                }
            }
            existed = exists;
            if tx.is_closed() {
                return;
            }
        }
    });
    (rx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn the_one_where_the_file_is_deleted_and_the_sink_shrugs() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("service.log");
        let (tx, rx) = async_channel::unbounded();
        let mut sink = ResilientFileSink::new(path.clone(), rx).await;

        let r1 = Record::parse(r#"{"time":"2023-03-01","msg":"before deletion"}"#)?;
        sink.receive(r1).await?;

        // 🧪 simulate logrotate's dark side: unlink the target mid-stream
        std::fs::remove_file(&path)?;
        tx.send(PathEvent::Deleted).await?;

        let r2 = Record::parse(r#"{"time":"2023-03-01","msg":"after deletion"}"#)?;
        sink.receive(r2).await?;
        sink.close().await?;

        // 🧪 the recreated file holds everything written after detection.
        // r1 rode the unlinked inode into the void — that loss is the contract.
        let contents = std::fs::read_to_string(&path)?;
        assert!(contents.contains("after deletion"));
        assert!(!contents.contains("before deletion"));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_writes_append_across_ticks() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("service.log");
        let (_tx, rx) = async_channel::unbounded::<PathEvent>();
        let mut sink = ResilientFileSink::new(path.clone(), rx).await;

        sink.receive(Record::parse(r#"{"time":"2023-03-01","n":1}"#)?).await?;
        sink.tick().await?;
        sink.receive(Record::parse(r#"{"time":"2023-03-01","n":2}"#)?).await?;
        sink.close().await?;

        let contents = std::fs::read_to_string(&path)?;
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2, "two records, two lines, append semantics");
        assert!(lines[0].contains("\"n\":1"));
        assert!(lines[1].contains("\"n\":2"));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_an_unopenable_path_makes_an_inert_sink() -> Result<()> {
        // 🧪 a directory path cannot be opened as a file. The sink must shrug, not crash.
        let dir = tempfile::tempdir()?;
        let (_tx, rx) = async_channel::unbounded::<PathEvent>();
        let mut sink = ResilientFileSink::new(dir.path().to_path_buf(), rx).await;

        // writes are swallowed, not errored — best-effort means best-effort
        sink.receive(Record::parse(r#"{"time":"2023-03-01"}"#)?).await?;
        sink.close().await?;
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_close_disarms_the_reopen_reflex() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("service.log");
        let (tx, rx) = async_channel::unbounded();
        let mut sink = ResilientFileSink::new(path.clone(), rx).await;
        sink.close().await?;

        std::fs::remove_file(&path)?;
        tx.send(PathEvent::Deleted).await?;
        // 🧪 a closed sink ignores the deletion event instead of resurrecting the file
        sink.check_watch().await;
        assert!(!path.exists(), "closed sink must not recreate its file");
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_poll_watcher_notices_an_unlink() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("watched.log");
        std::fs::write(&path, b"here today\n")?;

        let (rx, watcher) = spawn_poll_watcher(path.clone(), Duration::from_millis(10));
        // let the watcher record "exists" first, then pull the rug
        tokio::time::sleep(Duration::from_millis(50)).await;
        std::fs::remove_file(&path)?;

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await;
        assert_eq!(event.expect("watcher timed out").ok(), Some(PathEvent::Deleted));
        drop(rx);
        watcher.abort();
        Ok(())
    }
}
