//! 🚚 The Pipeline — where configuration becomes a running log shipper.
//!
//! 🎬 COLD OPEN, 3:47 AM. A process reads stdin. The stdin never stops.
//! Somewhere, a cluster flaps. Somewhere else, logrotate sharpens its knives.
//! The pipeline does not care. The pipeline ships. 🦆
//!
//! Assembly order, for the archaeologists:
//! 1. Config decides which sinks exist (file unless told not to, console by
//!    default, bulk if a backend is configured).
//! 2. Every sink goes into the multiplexer, each in its own lane.
//! 3. Bytes come in, the splitter cuts records out, redaction scrubs them,
//!    the multiplexer fans them out. Unparseable lines get a warning and a
//!    tally mark, never a funeral for the stream.
//! 4. Shutdown closes the lanes, drains the queues, and reports who behaved.
//!
//! The pipeline is an explicit object you hold, not a global you summon.
//! Two pipelines in one process is weird but legal. We don't judge. Much.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::app_config::AppConfig;
use crate::common::Record;
use crate::mux::SinkMultiplexer;
pub use crate::mux::ShutdownOutcome;
use crate::sinks::SinkBackend;
use crate::sinks::bulk::{BulkIndexer, IndexNamePolicy, IndexOutcome};
use crate::sinks::console::ConsoleSink;
use crate::sinks::file::{ResilientFileSink, spawn_poll_watcher};
use crate::splitter::{RecordSplitter, SplitEvent};
use crate::transport::EsTransport;

/// 📖 How many bytes we bite off the reader at a time.
const READ_CHUNK_BYTES: usize = 8192;

/// 🚚 A running shipper: sinks wired, lanes open, splitter mid-sentence.
#[derive(Debug)]
pub struct Pipeline {
    mux: SinkMultiplexer,
    splitter: RecordSplitter,
    redact_fields: Vec<String>,
    shutdown_timeout: Duration,
    /// 🧹 background helpers (watcher, outcome drain, fault drain) that die
    /// with the pipeline and not a moment later
    aux_tasks: Vec<JoinHandle<()>>,
    /// 🔢 lines that refused to be records. Counted, logged, not mourned.
    unparseable_count: u64,
}

impl Pipeline {
    /// 🚀 Build every configured sink and open the lanes.
    ///
    /// Failure manners: a misbehaving file path makes an inert file sink, an
    /// unreachable backend makes a bulk sink that will complain per-flush —
    /// neither stops startup. Only a malformed backend URL is a hard error,
    /// because no amount of retrying fixes a typo.
    pub async fn start(config: AppConfig) -> Result<Self> {
        let mut sinks: Vec<SinkBackend> = Vec::new();
        let mut aux_tasks: Vec<JoinHandle<()>> = Vec::new();

        if !config.no_file {
            let path = match &config.log_path {
                Some(path) => PathBuf::from(path),
                None => PathBuf::from(format!("./{}.log", config.service_name.to_lowercase())),
            };
            // the watcher is the file sink's smoke detector: it only reports,
            // the sink decides what to do about the smoke
            let (watch_rx, watcher) =
                spawn_poll_watcher(path.clone(), config.runtime.watch_poll_interval);
            aux_tasks.push(watcher);
            sinks.push(SinkBackend::File(
                ResilientFileSink::new(path, watch_rx).await,
            ));
        }

        if config.to_console {
            sinks.push(SinkBackend::Console(ConsoleSink::new()));
        }

        if let Some(backend) = &config.backend {
            let transport = EsTransport::for_host(&backend.host, backend.port).context(
                "💀 The backend host/port does not assemble into a URL. \
                 This is a config problem, and config problems don't age well.",
            )?;
            // a cold cluster is an inconvenience, not a startup failure —
            // the shipper often boots before the backend does
            if let Err(err) = transport.ping().await {
                warn!("📡 backend not answering yet ({err:#}) — shipping anyway, it'll catch up");
            }

            let policy = match backend.rotation {
                Some(rotation) => IndexNamePolicy::Rotated {
                    base: backend.index_base_name.clone(),
                    rotation,
                },
                None => IndexNamePolicy::Static(backend.index_base_name.clone()),
            };

            let (outcomes_tx, outcomes_rx) = async_channel::unbounded();
            // 📣 somebody has to read the receipts, or the channel fills with regret
            aux_tasks.push(tokio::spawn(async move {
                while let Ok(outcome) = outcomes_rx.recv().await {
                    match outcome {
                        IndexOutcome::Inserted { index, .. } => {
                            debug!("✅ record landed in '{index}'");
                        }
                        IndexOutcome::FlushFailed { records, error } => {
                            warn!("💀 bulk flush dropped {records} record(s): {error}");
                        }
                    }
                }
            }));

            sinks.push(SinkBackend::Bulk(BulkIndexer::new(
                Box::new(transport),
                policy,
                backend.bulk_size,
                backend.high_water_bytes,
                outcomes_tx,
            )));
        }

        info!(
            "🚚 pipeline up for '{}' with {} sink(s)",
            config.service_name,
            sinks.len()
        );
        let mux = SinkMultiplexer::new(
            sinks,
            config.runtime.queue_capacity,
            config.runtime.flush_interval,
        );

        // 🚨 drain the fault feed into the logs; each fault is one record's
        // bad day at one sink, already survived by the time we hear about it
        let faults = mux.faults();
        aux_tasks.push(tokio::spawn(async move {
            while let Ok(fault) = faults.recv().await {
                warn!("🚨 sink '{}' reported a fault: {}", fault.sink, fault.error);
            }
        }));

        Ok(Self {
            mux,
            splitter: RecordSplitter::new(),
            redact_fields: config.redact_fields,
            shutdown_timeout: config.runtime.shutdown_timeout,
            aux_tasks,
            unparseable_count: 0,
        })
    }

    /// 📥 Consume a byte stream to EOF, shipping every record it contains.
    ///
    /// Reads chunky, splits carefully, and never lets one garbage line take
    /// the stream down with it. Backpressure propagates naturally: when a
    /// lane is full, this read loop slows down, and so does whoever is
    /// feeding us. That's the system working, not the system breaking.
    pub async fn ingest<R: AsyncRead + Unpin>(&mut self, reader: &mut R) -> Result<()> {
        let mut buffer = [0u8; READ_CHUNK_BYTES];
        loop {
            let n = reader
                .read(&mut buffer)
                .await
                .context("💀 reading the input stream failed — upstream hung up mid-syllable")?;
            if n == 0 {
                break;
            }
            for event in self.splitter.feed(&buffer[..n]) {
                self.dispatch(event).await;
            }
        }
        // EOF: whatever's in the carry buffer is the final (unterminated) line
        if let Some(event) = self.splitter.finish() {
            self.dispatch(event).await;
        }
        if self.unparseable_count > 0 {
            warn!(
                "🔢 {} line(s) were not parseable as records this session",
                self.unparseable_count
            );
        }
        Ok(())
    }

    async fn dispatch(&mut self, event: SplitEvent) {
        match event {
            SplitEvent::Record(mut record) => {
                if !self.redact_fields.is_empty() {
                    record.redact(&self.redact_fields);
                }
                self.mux.offer(record).await;
            }
            SplitEvent::Unparseable { line, error } => {
                // 💀 one bad line, one warning, zero casualties
                self.unparseable_count += 1;
                warn!("⚠️ unparseable line skipped ({error}): {line:.200}");
            }
        }
    }

    /// 📥 Ship a single pre-parsed record, bypassing the splitter. For callers
    /// that already have structure and don't want to serialize it into a line
    /// just so we can parse it back out. We've all seen that code. No.
    pub async fn offer(&mut self, mut record: Record) {
        if !self.redact_fields.is_empty() {
            record.redact(&self.redact_fields);
        }
        self.mux.offer(record).await;
    }

    /// 🗑️ Coordinated shutdown: close the lanes, drain the queues, flush the
    /// sinks, stop the helpers. Returns the outcome with names named.
    pub async fn shutdown(self) -> ShutdownOutcome {
        let outcome = self.mux.shutdown(self.shutdown_timeout).await;
        // helpers only exist to serve the lanes; lanes gone, helpers go
        for task in self.aux_tasks {
            task.abort();
        }
        if outcome.clean {
            info!("✅ pipeline shut down clean");
        } else {
            warn!("💀 pipeline shutdown forced these lanes: {:?}", outcome.forced);
        }
        outcome
    }

    /// 🔄 Configuration changed: retire this pipeline gracefully and raise its
    /// successor. Old sinks drain and close before new sinks open, so there is
    /// no moment where two file sinks are arguing over one append handle.
    pub async fn config_changed(self, new_config: AppConfig) -> Result<Self> {
        info!("🔄 configuration changed — rotating the whole pipeline");
        let outcome = self.shutdown().await;
        if !outcome.clean {
            warn!(
                "💀 previous pipeline went down ungracefully ({:?}) — continuing with the new one",
                outcome.forced
            );
        }
        Self::start(new_config).await
    }
}

/// 🚀 The whole shipper as one function: build a pipeline from config, pump
/// stdin through it, shut down when stdin ends. What `main` calls.
pub async fn run(config: AppConfig) -> Result<()> {
    let mut pipeline = Pipeline::start(config).await?;
    let mut stdin = tokio::io::stdin();
    pipeline.ingest(&mut stdin).await?;
    let outcome = pipeline.shutdown().await;
    if !outcome.clean {
        anyhow::bail!(
            "💀 shutdown had to force-close these sinks: {} — their buffered tails are gone",
            outcome.forced.join(", ")
        );
    }
    Ok(())
}
