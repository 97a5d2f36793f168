//! 🖥️ ConsoleSink — logs for the humans still watching the terminal.
//!
//! Best-effort, prettied-up, and entirely unbothered by what the other sinks
//! are going through. The cluster can be red, the disk can be full — stdout
//! abides. 🦆

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncWriteExt, BufWriter, Stdout};

use crate::common::Record;
use crate::sinks::Sink;

/// 🖥️ Writes one human-shaped line per record to stdout.
///
/// Buffered, because a syscall per log line is how you end up on a flame graph
/// with your name on it. Flushed on every tick and on close.
pub(crate) struct ConsoleSink {
    out: BufWriter<Stdout>,
}

// stdout handles don't Debug nicely and nobody wants them to
impl std::fmt::Debug for ConsoleSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleSink").finish()
    }
}

impl ConsoleSink {
    pub(crate) fn new() -> Self {
        Self {
            out: BufWriter::new(tokio::io::stdout()),
        }
    }
}

/// 🎨 `[time] LEVEL msg {everything else}` — enough structure to scan,
/// little enough to not reimplement a log viewer in here.
fn pretty_line(record: &Record) -> String {
    let level = record
        .fields
        .get("level")
        .and_then(Value::as_i64)
        .map(level_label)
        .unwrap_or("LOG");
    let msg = record
        .fields
        .get("msg")
        .and_then(Value::as_str)
        .unwrap_or("");

    let mut rest = record.fields.clone();
    rest.shift_remove("time");
    rest.shift_remove("level");
    rest.shift_remove("msg");

    if rest.is_empty() {
        format!("[{}] {} {}", record.time(), level, msg)
    } else {
        format!(
            "[{}] {} {} {}",
            record.time(),
            level,
            msg,
            Value::Object(rest)
        )
    }
}

/// 🔢 The sacred numeric levels of structured logging, translated for mammals.
/// 30 means info. Everyone knows 30 means info. (Nobody knew. We looked it up.)
fn level_label(level: i64) -> &'static str {
    match level {
        ..=19 => "TRACE",
        20..=29 => "DEBUG",
        30..=39 => "INFO",
        40..=49 => "WARN",
        50..=59 => "ERROR",
        _ => "FATAL",
    }
}

#[async_trait]
impl Sink for ConsoleSink {
    async fn receive(&mut self, record: Record) -> Result<()> {
        let line = pretty_line(&record);
        self.out
            .write_all(line.as_bytes())
            .await
            .context("💀 stdout rejected a log line. stdout. Rejected. A log line. Unprecedented.")?;
        self.out.write_all(b"\n").await?;
        Ok(())
    }

    async fn tick(&mut self) -> Result<()> {
        // ⏰ humans are waiting; don't let lines age in the buffer
        self.out.flush().await.context("💀 stdout flush failed on tick")
    }

    async fn close(&mut self) -> Result<()> {
        self.out
            .flush()
            .await
            .context("💀 Final stdout flush failed. The terminal has seen its last line early.")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_levels_become_words() {
        assert_eq!(level_label(10), "TRACE");
        assert_eq!(level_label(30), "INFO");
        assert_eq!(level_label(50), "ERROR");
        assert_eq!(level_label(60), "FATAL");
    }

    #[test]
    fn the_one_where_the_pretty_line_keeps_the_leftovers() -> Result<()> {
        let record =
            Record::parse(r#"{"time":"2023-03-01","level":30,"msg":"deployed","region":"eu-1"}"#)?;
        let line = pretty_line(&record);
        assert!(line.starts_with("[2023-03-01T00:00:00.000Z] INFO deployed"));
        // 🧪 the extras tag along as JSON, not as a mystery
        assert!(line.contains(r#""region":"eu-1""#));
        Ok(())
    }

    #[test]
    fn the_one_where_a_bare_record_still_prints() -> Result<()> {
        let record = Record::parse(r#"{"time":"2023-03-01"}"#)?;
        assert_eq!(pretty_line(&record), "[2023-03-01T00:00:00.000Z] LOG ");
        Ok(())
    }
}
