// ai
//! 📦 Common data structures — the building blocks of logvex
//!
//! ---
//!
//! 🎬 COLD OPEN — INT. PRODUCTION SERVICE — 3:47 AM
//!
//! 🌩️  Somewhere upstream, an application calls `log.info()` and moves on with
//! its life, blissfully unaware of the journey it just launched. The line gets
//! serialized. The line gets shipped. The line will outlive the process that
//! wrote it, the deploy that caused it, and possibly the engineer who reads it.
//!
//! ✅ And then — a `Record` arrives. Quietly. Carrying its fields like a
//! responsible adult carrying groceries in one trip (ALL of them, no second
//! trips, this is a point of honor). Every record knows its `time`. None of
//! them know where they're going. Relatable.
//!
//! 🦆
//!
//! This module defines the humble yet load-bearing structs that ferry log
//! records from the ingest stream to wherever they're going. They don't ask
//! questions. They carry the data. They are the postal workers of this codebase.
//! Please tip your postal workers.
//!
//! ---
//!
//! ⚠️  NOTE: When the singularity occurs, `time` will still be mandatory.
//! The AGI will also have to timestamp its logs. Welcome to ops, buddy.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde_json::{Map, Value};

/// 🎯 A singular `Record` — one structured log entry, one timestamp, zero excuses.
///
/// This is the atomic unit of shipping. A single log line, parsed into a field
/// map and hurled through the pipeline like a message in a bottle, except the
/// ocean is a fan-out of sinks and the bottle costs us about 0.003ms of latency.
/// Worth it? Philosophers are still debating.
///
/// Invariant: `fields["time"]` always exists and is always a normalized
/// RFC 3339 UTC string after [`Record::parse`] succeeds. Everything downstream —
/// index rotation, day partitioning, the console prefix — leans on that one
/// promise. Do not break that one promise. It is the only promise we make.
///
/// Records are immutable once produced (redaction happens at ingest, before
/// anyone else sees them). Clone-able because the multiplexer hands a copy to
/// every sink and sharing is caring.
#[derive(Debug, Clone)]
pub struct Record {
    /// 📦 The full field map, `time` included (already normalized).
    /// `serde_json`'s preserve_order feature keeps fields in arrival order,
    /// because a log line that reorders itself is a log line you stop trusting.
    pub fields: Map<String, Value>,
}

impl Record {
    /// 🚀 Parse one line of JSON into a `Record`, normalizing `time` on the way in.
    ///
    /// Accepted `time` shapes, in descending order of civilization:
    /// - RFC 3339 string (`"2023-03-01T12:00:00.000Z"`) — chef's kiss
    /// - epoch milliseconds as a number — fine, we've all been there
    /// - bare calendar day (`"2023-03-01"`) — treated as midnight UTC
    ///
    /// Everything gets re-emitted as RFC 3339 UTC with millisecond precision,
    /// so downstream consumers only ever see one shape. One shape. One truth.
    ///
    /// # Errors
    /// 💀 Not-an-object, missing `time`, or an un-parseable `time` all bail here.
    /// The splitter catches these and turns them into unparseable-line events —
    /// one cursed line never gets to take the whole stream down with it.
    pub fn parse(line: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(line)
            .context("💀 This line claimed to be JSON. It lied. The parser is filing a report.")?;

        let Value::Object(mut fields) = value else {
            // 💀 A bare number. A string. An array. Technically JSON, spiritually chaos.
            // Log records are objects. This is non-negotiable. Like the trailing newline.
            bail!(
                "💀 Parsed the line fine, but it's not an object. A log record without fields \
                 is just a vibe, and we don't index vibes."
            );
        };

        let normalized = match fields.get("time") {
            Some(raw) => normalize_time(raw).context(
                "💀 The 'time' field exists but refuses to be a timestamp. \
                 We tried RFC 3339. We tried epoch millis. We tried being nice.",
            )?,
            None => {
                // 💀 No time field. An event that happened... whenever? Nope.
                // Every record pays the timestamp toll. No exceptions. Not even for Kevin.
                bail!("💀 Record has no 'time' field. Un-dated logs are gossip, not telemetry.")
            }
        };
        fields.insert("time".to_string(), Value::String(normalized));

        Ok(Self { fields })
    }

    /// 📅 The normalized RFC 3339 timestamp. Guaranteed present by `parse`.
    pub fn time(&self) -> &str {
        // 🔒 Invariant established in parse(): "time" exists and is a string.
        // If this default ever fires, someone constructed a Record by hand. Find them.
        self.fields
            .get("time")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// 📅 The calendar day of this record — the first 10 chars of RFC 3339,
    /// which is exactly `YYYY-MM-DD`. String slicing as date math. It's fine.
    /// ISO 8601 was designed by people who knew we'd do this.
    pub fn day(&self) -> Option<NaiveDate> {
        let day = self.time().get(..10)?;
        NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
    }

    /// 📦 Re-serialize the record as a single JSON line (no trailing newline —
    /// the sink assembling the payload owns the framing, same deal as always).
    pub fn to_json_line(&self) -> String {
        // ✅ A Map of valid Values cannot fail to serialize. serde_json agrees.
        Value::Object(self.fields.clone()).to_string()
    }

    /// 📏 Approximate wire size of this record, for watermark accounting.
    /// Close enough for flow control. We're metering a firehose, not billing AWS.
    pub fn approx_bytes(&self) -> usize {
        self.to_json_line().len()
    }

    /// 🔒 Censor the given dot-paths in place, replacing values with `"[redacted]"`.
    ///
    /// Paths that don't resolve are silently skipped — redacting a field that
    /// isn't there is a no-op, not a crisis. Called once at ingest, before the
    /// record fans out, so every sink sees the same censored reality.
    pub fn redact(&mut self, paths: &[String]) {
        for path in paths {
            redact_path(&mut self.fields, path);
        }
    }
}

/// 🔒 Walk a dot-path into a field map and stamp `[redacted]` over the leaf.
///
/// `"password"` hits a top-level field. `"req.body.card"` spelunks through
/// nested objects. Arrays are not traversed — if your secrets live in arrays,
/// we need to have a different conversation.
fn redact_path(fields: &mut Map<String, Value>, path: &str) {
    let mut segments = path.split('.');
    let Some(first) = segments.next() else { return };
    let rest: Vec<&str> = segments.collect();

    if rest.is_empty() {
        if let Some(slot) = fields.get_mut(first) {
            *slot = Value::String("[redacted]".to_string());
        }
        return;
    }

    // 🔄 descend into nested objects, one segment at a time
    let mut cursor = match fields.get_mut(first) {
        Some(Value::Object(inner)) => inner,
        _ => return,
    };
    for (i, segment) in rest.iter().enumerate() {
        if i == rest.len() - 1 {
            if let Some(slot) = cursor.get_mut(*segment) {
                *slot = Value::String("[redacted]".to_string());
            }
            return;
        }
        cursor = match cursor.get_mut(*segment) {
            Some(Value::Object(inner)) => inner,
            _ => return,
        };
    }
}

/// 📅 Normalize whatever the producer called a timestamp into RFC 3339 UTC millis.
///
/// The upstream serializer promises a `time` field. It does not promise taste.
fn normalize_time(raw: &Value) -> Result<String> {
    match raw {
        Value::String(s) => {
            if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
                return Ok(ts
                    .with_timezone(&Utc)
                    .to_rfc3339_opts(SecondsFormat::Millis, true));
            }
            if let Ok(day) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                // 📅 bare date → midnight UTC. The most charitable reading available.
                let midnight = day
                    .and_hms_opt(0, 0, 0)
                    .context("💀 Midnight does not exist on this day. Calendar says no.")?
                    .and_utc();
                return Ok(midnight.to_rfc3339_opts(SecondsFormat::Millis, true));
            }
            bail!("💀 '{s}' is not a timestamp in any timeline we recognize.")
        }
        Value::Number(n) => {
            let millis = n
                .as_i64()
                .context("💀 Numeric 'time' that doesn't fit in an i64. What year is it THERE?")?;
            let ts = DateTime::<Utc>::from_timestamp_millis(millis).context(
                "💀 Epoch millis out of range. Either a typo or a message from the far future.",
            )?;
            Ok(ts.to_rfc3339_opts(SecondsFormat::Millis, true))
        }
        other => bail!(
            "💀 'time' is a {} — we accept strings and epoch millis, not whatever this is.",
            json_type_name(other)
        ),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn the_one_where_rfc3339_time_gets_normalized_to_utc_millis() -> Result<()> {
        let record = Record::parse(r#"{"time":"2023-03-01T05:30:00+05:30","msg":"hello"}"#)?;
        // 🧪 +05:30 offset collapses to UTC. The record now lives in one timezone. Ours.
        assert_eq!(record.time(), "2023-03-01T00:00:00.000Z");
        assert_eq!(record.day(), NaiveDate::from_ymd_opt(2023, 3, 1));
        Ok(())
    }

    #[test]
    fn the_one_where_epoch_millis_are_also_welcome() -> Result<()> {
        let record = Record::parse(r#"{"time":1677628800000,"msg":"numbers are fine too"}"#)?;
        assert_eq!(record.time(), "2023-03-01T00:00:00.000Z");
        Ok(())
    }

    #[test]
    fn the_one_where_a_bare_day_means_midnight() -> Result<()> {
        let record = Record::parse(r#"{"time":"2023-01-02"}"#)?;
        assert_eq!(record.time(), "2023-01-02T00:00:00.000Z");
        Ok(())
    }

    #[test]
    fn the_one_where_timeless_records_are_rejected() {
        // 🧪 No time field → no entry. The bouncer checks for timestamps.
        assert!(Record::parse(r#"{"msg":"when did this happen? nobody knows"}"#).is_err());
        assert!(Record::parse(r#"{"time":"yesterday-ish","msg":"nope"}"#).is_err());
        assert!(Record::parse(r#"[1,2,3]"#).is_err());
    }

    #[test]
    fn the_one_where_redaction_censors_nested_paths() -> Result<()> {
        let mut record = Record::parse(
            r#"{"time":"2023-03-01","password":"hunter2","req":{"body":{"card":"4111","ok":true}}}"#,
        )?;
        record.redact(&[
            "password".to_string(),
            "req.body.card".to_string(),
            "ghost.field".to_string(),
        ]);

        assert_eq!(record.fields["password"], json!("[redacted]"));
        assert_eq!(record.fields["req"]["body"]["card"], json!("[redacted]"));
        // 🧪 untouched bystanders stay untouched
        assert_eq!(record.fields["req"]["body"]["ok"], json!(true));
        Ok(())
    }

    #[test]
    fn the_one_where_json_line_round_trips_with_normalized_time() -> Result<()> {
        let record = Record::parse(r#"{"time":"2023-03-01","level":30,"msg":"shipped"}"#)?;
        let line = record.to_json_line();
        let back: Value = serde_json::from_str(&line)?;
        assert_eq!(back["time"], json!("2023-03-01T00:00:00.000Z"));
        assert_eq!(back["msg"], json!("shipped"));
        Ok(())
    }
}
