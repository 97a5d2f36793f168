//! 🕳️ Sinks — where the records actually land.
//!
//! 🚰 The splitter pours the records, the sinks slurp them up.
//! And in between, we panic! (kidding, we use anyhow)
//!
//! 🎭 This module is the casting agency. Need an append-only file that
//! shrugs off deletion? A console feed for the humans? A bulk shipment
//! to an Elasticsearch cluster that's having a day? We've got a sink for that.
//! We've got sinks for days.
//!
//! ⚠️ Every sink fails alone. That's the whole covenant of this pipeline:
//! a sink's bad afternoon is logged, counted, and contained — it never
//! becomes another sink's problem. The multiplexer enforces it; the sinks
//! just have to not panic. Low bar. We clear it.
//!
//! 🦆 The duck is here because every file must have one. This is law. Do not question the duck.

use anyhow::Result;
use async_trait::async_trait;

use crate::common::Record;

pub(crate) mod bulk;
pub(crate) mod console;
pub(crate) mod file;

/// 🕳️ A sink that consumes records, one at a time, in arrival order.
///
/// # Contract
/// - `receive` accepts a record and does something durable-ish with it. A sink
///   that buffers internally may apply backpressure here by simply not
///   returning until it has made room — the worker (and therefore the
///   producer) waits. Cooperative flow control, no hidden queues.
/// - `tick` fires on the worker's flush interval. Buffering sinks flush;
///   everyone else inherits the default nap.
/// - `close` flushes, finalizes, and bids the data a fond farewell. MUST be
///   called. Skipping `close` is a bug. It is also considered rude.
#[async_trait]
pub(crate) trait Sink: std::fmt::Debug + Send {
    /// 📥 Accept one record and write/forward/stash it somewhere meaningful.
    async fn receive(&mut self, record: Record) -> Result<()>;

    /// ⏰ Periodic nudge from the worker. Default: gracious nothing.
    async fn tick(&mut self) -> Result<()> {
        Ok(())
    }

    /// 🗑️ Flush, finalize, and release. Call this. Always. Not even on Fridays is it optional.
    async fn close(&mut self) -> Result<()>;
}

/// 🎭 The many faces of a Sink — a polymorphic casting call for record destinations.
///
/// The enum dispatches `receive`/`tick`/`close` to the inner concrete type,
/// keeping the multiplexer blissfully ignorant of where data actually lands.
/// Ignorance is a feature. It's called "abstraction."
#[derive(Debug)]
pub(crate) enum SinkBackend {
    File(file::ResilientFileSink),
    Console(console::ConsoleSink),
    Bulk(bulk::BulkIndexer),
    /// 🧪 a scriptable stand-in so tests can cast whatever character they need
    #[cfg(test)]
    Test(Box<dyn Sink>),
}

impl SinkBackend {
    /// 🏷️ Human-readable name for logs and shutdown reports. Shows up at 3am. Keep it boring.
    pub(crate) fn name(&self) -> &'static str {
        match self {
            SinkBackend::File(_) => "file",
            SinkBackend::Console(_) => "console",
            SinkBackend::Bulk(_) => "bulk-indexer",
            #[cfg(test)]
            SinkBackend::Test(_) => "test",
        }
    }
}

#[async_trait]
impl Sink for SinkBackend {
    async fn receive(&mut self, record: Record) -> Result<()> {
        match self {
            SinkBackend::File(sink) => sink.receive(record).await,
            SinkBackend::Console(sink) => sink.receive(record).await,
            SinkBackend::Bulk(sink) => sink.receive(record).await,
            #[cfg(test)]
            SinkBackend::Test(sink) => sink.receive(record).await,
        }
    }

    async fn tick(&mut self) -> Result<()> {
        match self {
            SinkBackend::File(sink) => sink.tick().await,
            SinkBackend::Console(sink) => sink.tick().await,
            SinkBackend::Bulk(sink) => sink.tick().await,
            #[cfg(test)]
            SinkBackend::Test(sink) => sink.tick().await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            SinkBackend::File(sink) => sink.close().await,
            SinkBackend::Console(sink) => sink.close().await,
            SinkBackend::Bulk(sink) => sink.close().await,
            #[cfg(test)]
            SinkBackend::Test(sink) => sink.close().await,
        }
    }
}
