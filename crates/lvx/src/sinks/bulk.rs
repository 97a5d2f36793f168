// ai
//! 📡 BulkIndexer — micro-batching documents into the elastic void.
//!
//! 🎬 COLD OPEN — INT. DATA CENTER — THE BULK ENDPOINT — HIGH NOON
//!
//! The bulk API has rules. Two lines per document: action metadata, then
//! source. Newline-delimited. The trailing newline on the whole body MATTERS.
//! Three engineers lost weekends to this. Their families miss them.
//!
//! This sink buffers records and flushes them as one `_bulk` call when any of
//! three tripwires fires: the batch hits `bulk_size` records, the pending
//! bytes cross the high-water mark, or the worker's interval tick says it's
//! been long enough. Classic micro-batching. Whichever fires first wins.
//!
//! ⚖️ Delivery contract, stated plainly because it is the kind of thing people
//! argue about in incident reviews: **at-most-once**. A failed bulk call
//! reports the whole in-flight batch as failed and clears it. No retry —
//! a bulk write can partially apply, and without a per-record idempotency key
//! a retry risks indexing documents twice. Duplicated logs are worse than
//! dropped logs when the drop is *loudly reported*, which it is: every flush
//! outcome, good or bad, goes out the outcome channel. Nothing fails silently.
//!
//! 🔙 Backpressure: `receive` does not return until the buffer is under its
//! limits again. The worker awaits us, the channel behind the worker fills,
//! the producer awaits the channel. Cooperative flow control all the way up —
//! no unbounded buffering, no secret queues, no surprises.
//!
//! 🦆 (the duck has reviewed the delivery semantics and signed off)

use anyhow::Result;
use async_channel::Sender;
use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, trace, warn};

use crate::app_config::Rotation;
use crate::common::Record;
use crate::sinks::Sink;
use crate::transport::BulkTransport;

/// 🔪 How many chars of an RFC 3339 timestamp spell a rotation granularity.
/// `2023-03-01T…` → 4 is the year, 7 the month, 10 the day. ISO 8601:
/// the rare standard that was designed to be truncated.
fn rotation_prefix_len(rotation: Rotation) -> usize {
    match rotation {
        Rotation::Yearly => 4,
        Rotation::Monthly => 7,
        Rotation::Daily => 10,
    }
}

/// 🏷️ Where does a record go? Either one fixed index, or a rotating family of
/// them derived from each record's own timestamp.
#[derive(Debug, Clone)]
pub(crate) enum IndexNamePolicy {
    /// 📦 One index to hold them all.
    Static(String),
    /// 🔄 `base + "." + truncate(time, granularity)` — one batch can fan out
    /// to several indices when records straddle a boundary. That's a feature.
    Rotated { base: String, rotation: Rotation },
}

impl IndexNamePolicy {
    /// 🏷️ Resolve the destination index for a record, from ITS OWN `time` —
    /// not the wall clock. A record from yesterday files itself under
    /// yesterday, even if it shows up late to the party.
    pub(crate) fn index_for(&self, time: &str) -> String {
        match self {
            IndexNamePolicy::Static(name) => name.clone(),
            IndexNamePolicy::Rotated { base, rotation } => {
                let stamp = time.get(..rotation_prefix_len(*rotation)).unwrap_or(time);
                format!("{base}.{stamp}")
            }
        }
    }
}

/// 📣 One observable flush outcome. Subscribers get the full story; nobody
/// has to grep for what happened to their batch.
#[derive(Debug)]
pub(crate) enum IndexOutcome {
    /// ✅ One record made it, with the backend's per-item verdict attached.
    Inserted { index: String, result: Value },
    /// 💀 One whole batch did not. Count and reason included; batch dropped
    /// by design (see the delivery contract up top).
    FlushFailed { records: usize, error: String },
}

/// 📦 A record staged for the next bulk call: resolved index + serialized body.
/// The index is resolved at receive time so late flushes can't misfile anyone.
#[derive(Debug)]
struct StagedDoc {
    index: String,
    body: String,
}

/// 📡 The sink that talks (through a transport) to the indexing backend.
///
/// Internally holds:
/// - `transport`: the HTTP muscle, or a test double with the same handshake 💪
/// - `staged`: the in-flight buffer of documents waiting to be bulk-indexed
/// - `pending_bytes`: byte accounting, because nobody wants a 413
/// - `outcomes`: the channel every flush result goes out on, success or not
///
/// ⚠️ Flushing is NOT automatic on drop. The worker calls `close()`. If you
/// wire this up by hand and skip `close`, your last batch silently vanishes
/// like a developer at 4:59pm on a Friday. Call. `close()`.
#[derive(Debug)]
pub(crate) struct BulkIndexer {
    transport: Box<dyn BulkTransport>,
    policy: IndexNamePolicy,
    bulk_size: usize,
    high_water_bytes: usize,
    staged: Vec<StagedDoc>,
    pending_bytes: usize,
    outcomes: Sender<IndexOutcome>,
}

impl BulkIndexer {
    pub(crate) fn new(
        transport: Box<dyn BulkTransport>,
        policy: IndexNamePolicy,
        bulk_size: usize,
        high_water_bytes: usize,
        outcomes: Sender<IndexOutcome>,
    ) -> Self {
        Self {
            transport,
            policy,
            // a bulk_size of 0 would flush forever and index nothing. 1 it is.
            bulk_size: bulk_size.max(1),
            high_water_bytes,
            staged: Vec::new(),
            pending_bytes: 0,
            outcomes,
        }
    }

    /// 📦 The staged buffer → one NDJSON bulk body.
    ///
    /// Each document becomes two lines:
    /// 1. An action line: `{"index":{"_index":"...","_type":"log"}}`
    /// 2. A source line: the record, serialized, as-is
    ///
    /// Trailing newline included — the bulk API requires it, and we are not
    /// going to be the fourth engineer who loses a weekend to that.
    fn assemble_body(&self) -> String {
        let estimated: usize = self.staged.iter().map(|d| d.body.len() + d.index.len() + 40).sum();
        let mut body = String::with_capacity(estimated);
        for doc in &self.staged {
            let action = json!({"index": {"_index": doc.index, "_type": "log"}});
            body.push_str(&action.to_string());
            body.push('\n');
            body.push_str(&doc.body);
            body.push('\n');
        }
        body
    }

    /// 🗑️ Flush the staged buffer as one bulk call and report every outcome.
    ///
    /// Success → one `Inserted` per record, paired with the backend's per-item
    /// result in submission order. Failure → one `FlushFailed` for the batch.
    /// Either way the buffer is cleared: the at-most-once contract, honored.
    async fn flush(&mut self) -> Result<()> {
        if self.staged.is_empty() {
            return Ok(());
        }
        let body = self.assemble_body();
        let batch_len = self.staged.len();
        let batch_bytes = self.pending_bytes;

        match self.transport.bulk(body).await {
            Ok(reply) => {
                for (i, doc) in self.staged.iter().enumerate() {
                    let result = reply.items.get(i).cloned().unwrap_or(Value::Null);
                    // outcome channel is observability, not control flow — a
                    // departed subscriber doesn't get to fail the flush
                    let _ = self
                        .outcomes
                        .send(IndexOutcome::Inserted {
                            index: doc.index.clone(),
                            result,
                        })
                        .await;
                }
                debug!(
                    "📡 yeeted {batch_bytes} bytes / {batch_len} docs into the cluster — \
                     the bytes have left the building"
                );
            }
            Err(err) => {
                // 💀 the whole batch goes down together, and everyone hears about it
                warn!("💀 bulk flush of {batch_len} records failed: {err:#}");
                let _ = self
                    .outcomes
                    .send(IndexOutcome::FlushFailed {
                        records: batch_len,
                        error: format!("{err:#}"),
                    })
                    .await;
            }
        }

        // 🗑️ Reset the buffer. Clean slate. Fresh start. Very therapeutic.
        self.staged.clear();
        self.pending_bytes = 0;
        Ok(())
    }
}

#[async_trait]
impl Sink for BulkIndexer {
    /// 📥 Stage one record; flush inline when a tripwire fires.
    ///
    /// This await IS the backpressure. While a flush is in flight, nothing
    /// else gets staged — one flush in flight at a time, which is also what
    /// keeps record order stable within each destination index.
    async fn receive(&mut self, record: Record) -> Result<()> {
        trace!("📦 record staged for bulk — please hold your excitement");
        let index = self.policy.index_for(record.time());
        let body = record.to_json_line();
        self.pending_bytes += body.len();
        self.staged.push(StagedDoc { index, body });

        if self.staged.len() >= self.bulk_size || self.pending_bytes >= self.high_water_bytes {
            self.flush().await?;
        }
        Ok(())
    }

    /// ⏰ Interval flush — the "whichever comes first" half of micro-batching.
    /// A trickle of records shouldn't age in the buffer waiting for quorum.
    async fn tick(&mut self) -> Result<()> {
        self.flush().await
    }

    /// 🗑️ The final curtain call. Whatever is staged gets its last send.
    async fn close(&mut self) -> Result<()> {
        debug!("🗑️ bulk indexer bowing out — final flush, documents to the stage");
        self.flush().await
    }
}
