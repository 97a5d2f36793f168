//! 🔪 RecordSplitter — newline-delimited JSON disassembly, artisan grade.
//!
//! 🎬 *[NDJSON: the format producers emit. The format sinks whisper about at night.]*
//! *[one newline per record. no commas. no brackets. just vibes and vertical whitespace.]*
//!
//! The splitter eats raw byte chunks in whatever sizes the kernel feels like
//! handing over, finds the newlines with `memchr` (SIMD goes brrr), and parses
//! each complete line into a [`Record`]. A line that refuses to parse does NOT
//! get to end the show — it becomes an [`SplitEvent::Unparseable`] and the
//! stream marches on. One bad actor. Zero cancelled seasons.
//!
//! Ordering: output order equals input line order. Always. The splitter holds
//! exactly one partial line of state (the `carry`) and no opinions.
//!
//! 🦆 (the duck asks: if NDJSON falls in a forest with no parser, does it stream?)

use memchr::memchr;

use crate::common::Record;

/// 🔪 What fell out of the splitter for one input line.
///
/// Two possible fates. There is no third fate. We checked.
#[derive(Debug)]
pub enum SplitEvent {
    /// ✅ A line that parsed, time-normalized and ready to fan out.
    Record(Record),
    /// 💀 A line that did not parse — carried verbatim with its parse error,
    /// so somebody downstream can log it, count it, or frame it on the wall.
    Unparseable { line: String, error: String },
}

/// 🔪 The splitter itself. One `carry` buffer of partial-line state, refilled
/// by `feed` and drained by newlines. Restartable per line by construction:
/// every `\n` is a clean checkpoint.
#[derive(Debug, Default)]
pub struct RecordSplitter {
    /// 📦 Bytes after the last newline of the previous chunk — the cliffhanger.
    carry: Vec<u8>,
}

impl RecordSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 🚰 Feed a chunk of raw bytes, get back every event the chunk completed.
    ///
    /// A chunk can end mid-line (the kernel does not respect framing, the
    /// kernel respects nothing) — the tail is stashed in `carry` and completed
    /// by a future chunk. Empty lines are skipped outright: a lone `\n` is a
    /// keepalive, not a record, and it would be rude to report it as broken.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SplitEvent> {
        let mut events = Vec::new();
        let mut rest = chunk;

        // 🔄 THE LOOP. Find newline, complete the carry, emit, repeat.
        while let Some(pos) = memchr(b'\n', rest) {
            self.carry.extend_from_slice(&rest[..pos]);
            rest = &rest[pos + 1..];

            let line = std::mem::take(&mut self.carry);
            if let Some(event) = split_line(line) {
                events.push(event);
            }
        }

        // 📦 no newline left — everything remaining is next line's opening act
        self.carry.extend_from_slice(rest);
        events
    }

    /// 🏁 Flush a trailing unterminated line at end-of-stream.
    ///
    /// Producers are *supposed* to terminate their last line. Some don't.
    /// We take their final words anyway.
    pub fn finish(&mut self) -> Option<SplitEvent> {
        if self.carry.is_empty() {
            return None;
        }
        split_line(std::mem::take(&mut self.carry))
    }
}

/// 🔪 One complete line → one event (or none, for blank lines).
///
/// Invalid UTF-8 counts as unparseable — lossily decoded so the evidence in
/// the event is at least printable at 3am.
fn split_line(line: Vec<u8>) -> Option<SplitEvent> {
    if line.iter().all(|b| b.is_ascii_whitespace()) {
        return None;
    }
    let text = match String::from_utf8(line) {
        Ok(text) => text,
        Err(err) => {
            let lossy = String::from_utf8_lossy(err.as_bytes()).into_owned();
            return Some(SplitEvent::Unparseable {
                line: lossy,
                error: "invalid UTF-8 in input line".to_string(),
            });
        }
    };
    match Record::parse(&text) {
        Ok(record) => Some(SplitEvent::Record(record)),
        // 💀 recovered, reported, skipped. The stream does not grieve. The stream streams.
        Err(err) => Some(SplitEvent::Unparseable {
            line: text,
            error: format!("{err:#}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(splitter: &mut RecordSplitter, input: &[u8]) -> Vec<SplitEvent> {
        let mut events = splitter.feed(input);
        events.extend(splitter.finish());
        events
    }

    #[test]
    fn the_one_where_good_and_bad_lines_interleave_and_everyone_is_counted() {
        // 🧪 K well-formed + M malformed, interleaved. K records out, M errors out.
        // Never fewer. Never more. The splitter is an accountant, not a bouncer.
        let input = concat!(
            "{\"time\":\"2023-03-01\",\"msg\":\"one\"}\n",
            "this is not json\n",
            "{\"time\":\"2023-03-01\",\"msg\":\"two\"}\n",
            "{\"broken\": \n",
            "{\"time\":\"2023-03-01\",\"msg\":\"three\"}\n",
        );
        let mut splitter = RecordSplitter::new();
        let events = drain(&mut splitter, input.as_bytes());

        assert_eq!(events.len(), 5);
        let records: Vec<&Record> = events
            .iter()
            .filter_map(|e| match e {
                SplitEvent::Record(r) => Some(r),
                _ => None,
            })
            .collect();
        let errors = events
            .iter()
            .filter(|e| matches!(e, SplitEvent::Unparseable { .. }))
            .count();

        assert_eq!(records.len(), 3);
        assert_eq!(errors, 2);
        // 🧪 relative order of the survivors is the input order
        assert_eq!(records[0].fields["msg"], "one");
        assert_eq!(records[1].fields["msg"], "two");
        assert_eq!(records[2].fields["msg"], "three");
    }

    #[test]
    fn the_one_where_a_line_arrives_in_three_cruel_chunks() {
        // 🧪 the kernel hands us fragments. the splitter reassembles without complaint.
        let mut splitter = RecordSplitter::new();
        assert!(splitter.feed(b"{\"time\":\"2023-").is_empty());
        assert!(splitter.feed(b"03-01\",\"msg\"").is_empty());
        let events = splitter.feed(b":\"patience\"}\n");

        assert_eq!(events.len(), 1);
        match &events[0] {
            SplitEvent::Record(r) => assert_eq!(r.fields["msg"], "patience"),
            other => panic!("expected a record, got {other:?}"),
        }
    }

    #[test]
    fn the_one_where_the_last_line_forgot_its_newline() {
        let mut splitter = RecordSplitter::new();
        assert!(splitter.feed(b"{\"time\":\"2023-03-01\",\"msg\":\"finale\"}").is_empty());
        // 🧪 finish() collects the unterminated straggler
        match splitter.finish() {
            Some(SplitEvent::Record(r)) => assert_eq!(r.fields["msg"], "finale"),
            other => panic!("expected the straggler record, got {other:?}"),
        }
        // 🧪 second finish: nothing left, nothing invented
        assert!(splitter.finish().is_none());
    }

    #[test]
    fn the_one_where_blank_lines_are_keepalives_not_crimes() {
        let mut splitter = RecordSplitter::new();
        let events = drain(&mut splitter, b"\n\n  \n{\"time\":\"2023-03-01\"}\n\n");
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], SplitEvent::Record(_)));
    }

    #[test]
    fn the_one_where_the_bad_line_keeps_its_evidence() {
        let mut splitter = RecordSplitter::new();
        let events = drain(&mut splitter, b"{oops\n");
        match &events[0] {
            SplitEvent::Unparseable { line, error } => {
                // 🧪 the raw line rides along with the error — exhibit A, your honor
                assert_eq!(line, "{oops");
                assert!(!error.is_empty());
            }
            other => panic!("expected unparseable, got {other:?}"),
        }
    }
}
