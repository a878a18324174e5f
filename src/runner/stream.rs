//! Reader threads that turn child stream bytes into tagged events.
//!
//! One thread per stream. Lines are forwarded in write order with trailing
//! whitespace removed; each stream is internally ordered but no ordering
//! holds between stdout and stderr. Readers drain to EOF even if the
//! receiver goes away, so a child never blocks on a full pipe.

use async_channel::Sender;
use std::io::{BufRead, BufReader, Read};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

use crate::protocol::{OutputEvent, RequestId};

/// Which child stream a reader is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// Spawn a reader thread forwarding one stream's lines as events.
///
/// Returns the thread handle; the thread finishes at EOF (or on a read
/// error) and yields the number of events forwarded. Decoding is lossy:
/// invalid UTF-8 becomes replacement characters rather than ending the
/// stream. Generic over the reader so tests can drive it with an in-memory
/// cursor.
pub fn spawn_line_reader<R: Read + Send + 'static>(
    stream: R,
    kind: StreamKind,
    request_id: RequestId,
    tx: Sender<OutputEvent>,
) -> JoinHandle<usize> {
    thread::spawn(move || {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        let mut forwarded = 0usize;
        let mut receiver_gone = false;

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!(target: "script", request_id = %request_id, error = %e, "stream read error");
                    break;
                }
            }

            let line = String::from_utf8_lossy(&buf).trim_end().to_string();

            // Mirror every relayed line into the host log
            match kind {
                StreamKind::Stdout => {
                    debug!(target: "script", request_id = %request_id, "{}", line)
                }
                StreamKind::Stderr => {
                    warn!(target: "script", request_id = %request_id, "{}", line)
                }
            }

            if receiver_gone {
                continue;
            }

            let event = match kind {
                StreamKind::Stdout => OutputEvent::stdout(request_id, line),
                StreamKind::Stderr => OutputEvent::stderr(request_id, line),
            };

            // Keep reading on send failure: the child must be able to write
            // to completion even with no subscriber left.
            if tx.send_blocking(event).is_err() {
                receiver_gone = true;
            } else {
                forwarded += 1;
            }
        }

        debug!(target: "script", request_id = %request_id, kind = ?kind, forwarded, "stream reader exiting");
        forwarded
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn collect_events(input: &[u8], kind: StreamKind) -> Vec<OutputEvent> {
        let (tx, rx) = async_channel::unbounded();
        let handle = spawn_line_reader(Cursor::new(input.to_vec()), kind, RequestId::new(), tx);
        handle.join().unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn stdout_lines(events: &[OutputEvent]) -> Vec<&str> {
        events
            .iter()
            .map(|e| match e {
                OutputEvent::Stdout { line, .. } => line.as_str(),
                other => panic!("unexpected event: {:?}", other),
            })
            .collect()
    }

    #[test]
    fn forwards_lines_in_write_order() {
        let events = collect_events(b"first\nsecond\nthird\n", StreamKind::Stdout);
        assert_eq!(stdout_lines(&events), vec!["first", "second", "third"]);
    }

    #[test]
    fn trims_trailing_whitespace_only() {
        let events = collect_events(b"  indented  \ntabbed\t\n", StreamKind::Stdout);
        assert_eq!(stdout_lines(&events), vec!["  indented", "tabbed"]);
    }

    #[test]
    fn stderr_reader_produces_stderr_events() {
        let events = collect_events(b"bad input\n", StreamKind::Stderr);
        assert_eq!(events.len(), 1);
        match &events[0] {
            OutputEvent::Stderr { line, .. } => assert_eq!(line, "bad input"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn empty_stream_forwards_nothing() {
        let events = collect_events(b"", StreamKind::Stdout);
        assert!(events.is_empty());
    }

    #[test]
    fn final_line_without_newline_is_forwarded() {
        let events = collect_events(b"done", StreamKind::Stdout);
        assert_eq!(stdout_lines(&events), vec!["done"]);
    }

    #[test]
    fn invalid_utf8_is_decoded_lossily_not_dropped() {
        let events = collect_events(b"ok\n\xff\xfe broken\nafter\n", StreamKind::Stdout);
        let lines = stdout_lines(&events);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "ok");
        assert!(lines[1].contains('\u{FFFD}'));
        assert_eq!(lines[2], "after");
    }

    #[test]
    fn drains_to_eof_when_receiver_is_gone() {
        let (tx, rx) = async_channel::unbounded();
        drop(rx);

        let input = b"one\ntwo\nthree\n".repeat(100);
        let handle = spawn_line_reader(
            Cursor::new(input),
            StreamKind::Stdout,
            RequestId::new(),
            tx,
        );

        // The reader must finish rather than wedge on the closed channel
        let forwarded = handle.join().unwrap();
        assert_eq!(forwarded, 0);
    }
}
