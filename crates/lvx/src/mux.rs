// ai
//! 🎛️ SinkMultiplexer — one record in, N sinks out, zero cross-contamination.
//!
//! 🎬 *[camera pans across a dimly lit server room]*
//! 🎬 "In a world where one slow sink could stall them all..."
//! 🎬 "One multiplexer dared to give every sink its own lane."
//! 🎬 *[record scratch]* 🦆
//!
//! The covenant, spelled out so nobody can claim they weren't told:
//!
//! - Every sink gets its OWN bounded queue and its OWN worker task. The file
//!   sink's disk tantrum never delays the console. The cluster being red never
//!   delays the file. Independent lanes, independent moods.
//! - Within one lane, arrival order IS delivery order. A channel is a queue.
//!   We did not reinvent the queue. You're welcome.
//! - A sink that errors on a record gets its failure logged and reported, and
//!   the worker moves on to the next record. A sink failure is a fact, not a
//!   contagion.
//! - Backpressure is the bounded channel doing its one job: when a lane is
//!   full, `offer` waits. The producer slows down. Nobody buffers to infinity
//!   and nobody discovers that at 3am via the OOM killer.

use std::time::{Duration, Instant};

use async_channel::{Receiver, Sender};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::common::Record;
use crate::sinks::{Sink, SinkBackend};

/// 🚨 One sink had one bad moment with one record. Reported upstream so the
/// pipeline can count it, log it, and keep going. The record is gone for that
/// sink — the other sinks never hear about it.
#[derive(Debug)]
pub(crate) struct SinkFault {
    pub(crate) sink: &'static str,
    pub(crate) error: String,
}

/// 🧾 What shutdown has to say for itself: whether everyone left politely,
/// and who had to be escorted out.
#[derive(Debug)]
pub struct ShutdownOutcome {
    /// ✅ true = every worker drained and closed within the timeout
    pub clean: bool,
    /// 💀 names of workers that blew the deadline and got aborted
    pub forced: Vec<String>,
}

/// 🛤️ One lane: a sender to feed it, a worker to drain it, a name to blame.
#[derive(Debug)]
struct Lane {
    name: &'static str,
    tx: Sender<Record>,
    worker: JoinHandle<()>,
}

/// 🎛️ The multiplexer itself. Owns the lanes; the lanes own the sinks.
#[derive(Debug)]
pub(crate) struct SinkMultiplexer {
    lanes: Vec<Lane>,
    faults_rx: Receiver<SinkFault>,
}

impl SinkMultiplexer {
    /// 🚀 Put every sink in its own lane with its own worker task.
    ///
    /// `queue_capacity` bounds each lane; `flush_interval` is how often idle
    /// sinks get a tick so buffered data doesn't grow a beard.
    pub(crate) fn new(
        sinks: Vec<SinkBackend>,
        queue_capacity: usize,
        flush_interval: Duration,
    ) -> Self {
        // unbounded is fine here: faults are rare and tiny, and blocking a
        // worker on fault reporting would defeat the entire covenant
        let (faults_tx, faults_rx) = async_channel::unbounded();

        let lanes = sinks
            .into_iter()
            .map(|sink| {
                let name = sink.name();
                let (tx, rx) = async_channel::bounded(queue_capacity.max(1));
                let worker = tokio::spawn(lane_worker(sink, rx, faults_tx.clone(), flush_interval));
                info!("🛤️ lane open for sink '{name}' (queue depth {})", queue_capacity.max(1));
                Lane { name, tx, worker }
            })
            .collect();

        Self { lanes, faults_rx }
    }

    /// 📥 Offer one record to every lane, in lane order.
    ///
    /// Waits on any lane that's full — that's the backpressure, working as
    /// intended. A full FILE lane slowing the producer down does not violate
    /// sink independence: the sinks never wait on EACH OTHER, the producer
    /// waits on the slowest sink. That's the difference between a traffic jam
    /// and a pileup.
    pub(crate) async fn offer(&self, record: Record) {
        for lane in &self.lanes {
            if lane.tx.send(record.clone()).await.is_err() {
                // lane worker already gone; nothing to deliver to
                debug!("🕳️ lane '{}' is closed, record not delivered there", lane.name);
            }
        }
    }

    /// 🚨 The fault feed. Someone should be listening; faults held in an
    /// unread channel are just guilt with extra steps.
    pub(crate) fn faults(&self) -> Receiver<SinkFault> {
        self.faults_rx.clone()
    }

    /// 🗑️ Coordinated shutdown: close every lane, let each worker drain its
    /// queue and close its sink, and give the whole parade `timeout` to
    /// finish. Stragglers get aborted and named in the outcome.
    ///
    /// Ancient proverb: "A graceful shutdown that can wait forever is just a
    /// hang with good intentions."
    pub(crate) async fn shutdown(self, timeout: Duration) -> ShutdownOutcome {
        info!("🗑️ shutting down {} sink lane(s), budget {timeout:?}", self.lanes.len());
        let deadline = Instant::now() + timeout;
        let mut forced = Vec::new();

        for mut lane in self.lanes {
            // closing the sender lets the worker drain what's queued, then close
            lane.tx.close();
            let remaining = deadline.saturating_duration_since(Instant::now());
            // poll the handle by reference: on timeout we must still hold it
            // so the straggler can actually be aborted, not just abandoned
            match tokio::time::timeout(remaining, &mut lane.worker).await {
                Ok(_) => debug!("✅ lane '{}' drained and closed", lane.name),
                Err(_) => {
                    // 💀 the deadline is the deadline. Buffered data in this
                    // lane is lost; the outcome says so in writing.
                    warn!("💀 lane '{}' blew the shutdown budget, aborting it", lane.name);
                    lane.worker.abort();
                    forced.push(lane.name.to_string());
                }
            }
        }

        ShutdownOutcome {
            clean: forced.is_empty(),
            forced,
        }
    }
}

/// 🧵 One lane's worker: drain the queue in order, tick on the interval,
/// close the sink when the lane closes. The entire job description.
async fn lane_worker(
    mut sink: SinkBackend,
    rx: Receiver<Record>,
    faults: Sender<SinkFault>,
    flush_interval: Duration,
) {
    let name = sink.name();
    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // the first interval tick fires immediately; nobody needs a flush at t=0
    ticker.tick().await;

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Ok(record) => {
                    if let Err(err) = sink.receive(record).await {
                        // 💀 logged, reported, survived. One record's funeral
                        // is not the whole lane's funeral.
                        warn!("💀 sink '{name}' failed on a record: {err:#}");
                        let _ = faults
                            .send(SinkFault { sink: name, error: format!("{err:#}") })
                            .await;
                    }
                }
                Err(_) => {
                    // channel closed: drain is complete, time to fold the chairs
                    if let Err(err) = sink.close().await {
                        warn!("💀 sink '{name}' failed to close: {err:#}");
                        let _ = faults
                            .send(SinkFault { sink: name, error: format!("{err:#}") })
                            .await;
                    }
                    break;
                }
            },
            _ = ticker.tick() => {
                if let Err(err) = sink.tick().await {
                    warn!("💀 sink '{name}' failed its periodic flush: {err:#}");
                    let _ = faults
                        .send(SinkFault { sink: name, error: format!("{err:#}") })
                        .await;
                }
            }
        }
    }
}
