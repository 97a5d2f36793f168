//! 🗓️ IndexLifecycleManager — the janitor of the time-partitioned indices.
//!
//! 🎬 *[camera pans across a dimly lit server room]*
//! 🎬 *[dramatic orchestral music swells]*
//! 🎬 "In a world where indices accumulate endlessly..."
//! 🎬 "One manager dared to expire them all."
//! 🎬 *[record scratch]* 🦆
//!
//! Three operations, each independently invokable, none of them touching the
//! live record stream:
//!
//! - **discover_expired** — fresh catalog query, keep the `base.YYYY-MM-DD`
//!   family, keep the ones older than the retention window, sorted ascending.
//! - **delete_indices** — retire them one batch at a time, bookkeeping every
//!   outcome; a single failed deletion is an entry in the ledger, not a reason
//!   to abandon the run.
//! - **reindex_day** — range-copy one day out of the base index into its
//!   day-partitioned home, counting before and after. If the counts disagree,
//!   we say so, loudly, and DO NOT delete anything. Deleting the source is
//!   the operator's call — an irreversible mistake should require a human
//!   signature.
//!
//! ⚠️ Concurrent lifecycle runs against the same cluster are not coordinated
//! here. Two janitors with one broom closet: don't schedule that.

use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Days, NaiveDate};
use tracing::{info, warn};

use crate::transport::CatalogClient;

/// 📇 One time-partitioned index, as parsed from the catalog.
///
/// Ephemeral on purpose: descriptors are recomputed from a fresh catalog query
/// on every pass and never cached. Acting on yesterday's catalog is how you
/// delete an index that was already deleted and miss the one that wasn't.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDescriptor {
    /// 🏷️ The full index name, e.g. `logs.2023-01-01`.
    pub name: String,
    /// 📅 The calendar day parsed from the name's suffix.
    pub date: NaiveDate,
    /// 🔢 Document count at catalog time.
    pub doc_count: u64,
}

impl IndexDescriptor {
    /// 🔍 Parse `"<base>.<YYYY-MM-DD>"` into a descriptor.
    ///
    /// Names that don't match the pattern return `None` — they're not
    /// malformed, they're just somebody else's indices. `.kibana` has rights.
    pub fn parse(base: &str, name: &str, doc_count: u64) -> Option<Self> {
        let suffix = name.strip_prefix(base)?.strip_prefix('.')?;
        let date = NaiveDate::parse_from_str(suffix, "%Y-%m-%d").ok()?;
        Some(Self {
            name: name.to_string(),
            date,
            doc_count,
        })
    }
}

/// 🧾 The ledger of one deletion run: how many the backend acknowledged, and
/// exactly which ones it didn't. Partial failure is a report, not a panic.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DeletionReport {
    pub acknowledged_count: usize,
    pub failed: BTreeSet<String>,
}

/// 🧾 One completed day re-partition: the range count before the copy and the
/// destination's count of the same range after. Equal by construction —
/// a mismatch never produces this struct, it produces a
/// [`ReconciliationMismatch`].
#[derive(Debug, PartialEq, Eq)]
pub struct ReindexReport {
    pub day: NaiveDate,
    pub source: String,
    pub dest: String,
    pub before: u64,
    pub after: u64,
}

/// 💀 The copy finished but the numbers don't agree. This error exists so the
/// discrepancy can never be papered over: callers must handle it or crash,
/// and neither option quietly deletes a day of logs.
#[derive(Debug, PartialEq, Eq)]
pub struct ReconciliationMismatch {
    pub day: NaiveDate,
    pub before: u64,
    pub after: u64,
}

impl std::fmt::Display for ReconciliationMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "reindex of {} did not reconcile: {} docs in the source range, {} in the \
             destination — do NOT delete the source range",
            self.day, self.before, self.after
        )
    }
}

impl std::error::Error for ReconciliationMismatch {}

/// 🗓️ The manager itself: a catalog client, a base name, and a batch knob.
///
/// Shares nothing mutable with the ingestion pipeline — it reads config,
/// talks to the catalog, and minds its own business.
#[derive(Debug)]
pub struct IndexLifecycleManager {
    client: Box<dyn CatalogClient>,
    base: String,
    /// 🔢 How many deletions to issue per batch. Default 1 — sequential —
    /// because bulk catalog mutations on a production cluster are how you
    /// meet the circuit breaker. Turn it up only if you know your cluster.
    delete_batch_size: usize,
}

impl IndexLifecycleManager {
    pub fn new(client: Box<dyn CatalogClient>, base: impl Into<String>) -> Self {
        Self {
            client,
            base: base.into(),
            delete_batch_size: 1,
        }
    }

    pub fn with_delete_batch_size(mut self, size: usize) -> Self {
        self.delete_batch_size = size.max(1);
        self
    }

    /// 🔍 Query the catalog (fresh, always fresh) and return the names of
    /// day-partitioned indices strictly older than `today − retention`,
    /// sorted ascending by date.
    ///
    /// Indices whose names don't match `base.YYYY-MM-DD` are ignored — out of
    /// scope, not out of line.
    pub async fn discover_expired(
        &self,
        retention: Duration,
        today: NaiveDate,
    ) -> Result<Vec<String>> {
        let retention = chrono::Duration::from_std(retention)
            .context("💀 Retention window too large for date math. Geological retention is not supported.")?;
        let cutoff = today - retention;

        let catalog = self.client.catalog().await.context(
            "💀 Could not fetch the index catalog. No catalog, no expiry decisions — \
             guessing at what exists is how indices get deleted twice.",
        )?;

        let mut expired: Vec<IndexDescriptor> = catalog
            .iter()
            .filter_map(|entry| IndexDescriptor::parse(&self.base, &entry.index, entry.doc_count()))
            .filter(|descriptor| descriptor.date < cutoff)
            .collect();
        expired.sort_by_key(|descriptor| descriptor.date);

        info!(
            "🔍 {} of the '{}.*' family expired (cutoff {cutoff})",
            expired.len(),
            self.base
        );
        Ok(expired.into_iter().map(|descriptor| descriptor.name).collect())
    }

    /// 🗑️ Delete indices in batches of `delete_batch_size`, recording every
    /// outcome. A failed deletion (already gone, cluster grumpy, whatever)
    /// lands in `failed` and the run continues — rerunning with the failed
    /// set IS the retry strategy, and it's idempotent enough.
    pub async fn delete_indices<S: AsRef<str>>(&self, indices: &[S]) -> Result<DeletionReport> {
        let mut report = DeletionReport::default();
        for batch in indices.chunks(self.delete_batch_size) {
            for index in batch {
                let index = index.as_ref();
                match self.client.delete_index(index).await {
                    Ok(true) => {
                        info!("🗑️ deleted index '{index}'");
                        report.acknowledged_count += 1;
                    }
                    Ok(false) => {
                        warn!("⚠️ deletion of '{index}' was not acknowledged");
                        report.failed.insert(index.to_string());
                    }
                    Err(err) => {
                        // 💀 one index having a bad day does not cancel the run
                        warn!("💀 deletion of '{index}' failed: {err:#}");
                        report.failed.insert(index.to_string());
                    }
                }
            }
        }
        Ok(report)
    }

    /// 🔄 Copy one day of records `[day, day+1)` from the base index into
    /// `base.day`, cross-checking counts before and after.
    ///
    /// Counting happens against the SAME time range on both sides — the only
    /// comparison that means anything. On agreement you get the report; on
    /// disagreement you get a [`ReconciliationMismatch`] and the source stays
    /// exactly where it was. This function deletes nothing, ever.
    pub async fn reindex_day(&self, day: NaiveDate) -> Result<ReindexReport> {
        let gte = day.format("%Y-%m-%d").to_string();
        let next = day
            .checked_add_days(Days::new(1))
            .context("💀 There is no day after this day. The calendar has ended.")?;
        let lt = next.format("%Y-%m-%d").to_string();
        let dest = format!("{}.{gte}", self.base);

        let before = self
            .client
            .count_range(&self.base, &gte, &lt)
            .await
            .context("💀 Pre-copy count failed — refusing to reindex a range we can't measure.")?;
        info!("🔄 reindexing {before} docs of {gte} from '{}' into '{dest}'", self.base);

        self.client
            .reindex_range(&self.base, &dest, &gte, &lt)
            .await
            .context("💀 The range-copy itself failed. Source untouched. Nothing lost, nothing moved.")?;

        let after = self
            .client
            .count_range(&dest, &gte, &lt)
            .await
            .context("💀 Post-copy count failed — the copy may be fine, but we cannot certify it.")?;

        if before != after {
            // 💀 surfaced, never auto-corrected. The numbers disagree; a human decides.
            return Err(ReconciliationMismatch { day, before, after }.into());
        }

        info!("✅ {gte} reconciled: {before} docs before, {after} after");
        Ok(ReindexReport {
            day,
            source: self.base.clone(),
            dest,
            before,
            after,
        })
    }
}
