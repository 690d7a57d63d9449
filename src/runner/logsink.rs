//! Line-oriented output sinks for plan execution
//!
//! Command stdout/stderr is delivered line by line so features can
//! interpose: the output-capture handler matches `::set-output …::`
//! lines, and the TUI routes lines into per-plan panes.

use std::fmt;
use std::sync::Arc;

use tracing::info;

/// Receives one line at a time, including its `\r\n`/`\n` terminator
/// when one was present in the stream.
pub trait LineSink: Send + Sync {
    fn line(&self, line: &str);
}

/// Shared handle to a [`LineSink`]
pub type LogSink = Arc<dyn LineSink>;

/// Default sink: forwards lines to the tracing logger, tagged with the
/// plan id when one is known.
pub struct TracingSink {
    id: Option<String>,
}

impl TracingSink {
    pub fn new() -> LogSink {
        Arc::new(Self { id: None })
    }

    pub fn for_plan(id: impl Into<String>) -> LogSink {
        Arc::new(Self { id: Some(id.into()) })
    }
}

impl LineSink for TracingSink {
    fn line(&self, line: &str) {
        let trimmed = line.trim_end_matches(['\r', '\n']);
        match &self.id {
            Some(id) => info!(id = %id, "{trimmed}"),
            None => info!("{trimmed}"),
        }
    }
}

impl fmt::Debug for TracingSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracingSink").field("id", &self.id).finish()
    }
}

/// Splits a byte stream into terminated lines and feeds them to a sink.
///
/// Incomplete trailing data is buffered until the next chunk or
/// [`LineBuffer::flush`].
pub struct LineBuffer {
    sink: LogSink,
    pending: String,
}

impl LineBuffer {
    pub fn new(sink: LogSink) -> Self {
        Self {
            sink,
            pending: String::new(),
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.pending.push_str(&String::from_utf8_lossy(chunk));
        while let Some(pos) = self.pending.find('\n') {
            let rest = self.pending.split_off(pos + 1);
            let line = std::mem::replace(&mut self.pending, rest);
            self.sink.line(&line);
        }
    }

    /// Emit any unterminated trailing data
    pub fn flush(&mut self) {
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.sink.line(&line);
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Test sink that records every line it receives
    #[derive(Default)]
    pub struct RecordingSink {
        pub lines: Mutex<Vec<String>>,
    }

    impl RecordingSink {
        pub fn shared() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn lines(&self) -> Vec<String> {
            self.lines.lock().unwrap().clone()
        }
    }

    impl LineSink for RecordingSink {
        fn line(&self, line: &str) {
            self.lines.lock().unwrap().push(line.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingSink;
    use super::*;

    #[test]
    fn splits_chunks_into_lines() {
        let sink = RecordingSink::shared();
        let mut buf = LineBuffer::new(sink.clone());
        buf.push(b"hello wo");
        buf.push(b"rld\nsecond line\npart");
        assert_eq!(sink.lines(), vec!["hello world\n", "second line\n"]);
        buf.flush();
        assert_eq!(sink.lines().last().unwrap(), "part");
    }

    #[test]
    fn preserves_crlf_terminators() {
        let sink = RecordingSink::shared();
        let mut buf = LineBuffer::new(sink.clone());
        buf.push(b"::set-output name=Foo::Bar\r\n");
        assert_eq!(sink.lines(), vec!["::set-output name=Foo::Bar\r\n"]);
    }

    #[test]
    fn flush_with_nothing_pending_is_silent() {
        let sink = RecordingSink::shared();
        let mut buf = LineBuffer::new(sink.clone());
        buf.flush();
        assert!(sink.lines().is_empty());
    }
}
