//! Tracing setup plus the administrative log sink.
//!
//! Every formatted line lands in an in-memory ring buffer (served by
//! `GET /admin/logs`) and is appended to `data/temp/system.log`. Rotation of
//! that file is handled outside the engine; `reset` truncates it.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const BUFFER_CAPACITY: usize = 2048;

pub struct LogBuffer {
    lines: Mutex<VecDeque<String>>,
    file: Mutex<Option<File>>,
    path: PathBuf,
}

impl LogBuffer {
    pub fn new(path: PathBuf) -> Arc<Self> {
        let file = open_log_file(&path);
        Arc::new(Self {
            lines: Mutex::new(VecDeque::with_capacity(BUFFER_CAPACITY)),
            file: Mutex::new(file),
            path,
        })
    }

    /// The last `n` formatted lines, oldest first.
    pub fn tail(&self, n: usize) -> Vec<String> {
        let lines = self.lines.lock();
        lines
            .iter()
            .skip(lines.len().saturating_sub(n))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    /// Clear the buffer and truncate the log file.
    pub fn reset(&self) -> io::Result<()> {
        self.lines.lock().clear();
        let mut file = self.file.lock();
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        *file = Some(
            OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&self.path)?,
        );
        Ok(())
    }

    pub fn append_line(&self, line: &str) {
        {
            let mut lines = self.lines.lock();
            if lines.len() == BUFFER_CAPACITY {
                lines.pop_front();
            }
            lines.push_back(line.to_string());
        }
        if let Some(file) = self.file.lock().as_mut() {
            let _ = writeln!(file, "{line}");
        }
    }
}

fn open_log_file(path: &PathBuf) -> Option<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok()?;
    }
    OpenOptions::new().create(true).append(true).open(path).ok()
}

/// `MakeWriter` feeding the buffer; complete lines only.
#[derive(Clone)]
pub struct LogSink(pub Arc<LogBuffer>);

pub struct LogSinkWriter {
    buffer: Arc<LogBuffer>,
    pending: Vec<u8>,
}

impl Write for LogSinkWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line[..line.len() - 1]);
            self.buffer.append_line(&text);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for LogSinkWriter {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            let text = String::from_utf8_lossy(&self.pending).into_owned();
            self.buffer.append_line(&text);
        }
    }
}

impl<'a> MakeWriter<'a> for LogSink {
    type Writer = LogSinkWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogSinkWriter {
            buffer: Arc::clone(&self.0),
            pending: Vec::new(),
        }
    }
}

/// Level precedence: explicit flag, then `LOG_LEVEL`, then `info`.
pub fn resolve_level(flag: Option<&str>) -> String {
    flag.map(str::to_string)
        .or_else(|| std::env::var("LOG_LEVEL").ok())
        .unwrap_or_else(|| "info".to_string())
}

pub fn init(level: &str, buffer: Arc<LogBuffer>) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(level))
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(LogSink(buffer)),
        )
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_buffer() -> (Arc<LogBuffer>, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("scratch dir");
        let buffer = LogBuffer::new(dir.path().join("temp").join("system.log"));
        (buffer, dir)
    }

    #[test]
    fn tail_returns_most_recent_lines() {
        let (buffer, _dir) = scratch_buffer();
        for i in 0..5 {
            buffer.append_line(&format!("line {i}"));
        }
        assert_eq!(buffer.tail(2), vec!["line 3", "line 4"]);
        assert_eq!(buffer.tail(100).len(), 5);
    }

    #[test]
    fn reset_clears_buffer_and_file() {
        let (buffer, dir) = scratch_buffer();
        buffer.append_line("something");
        buffer.reset().expect("reset");
        assert_eq!(buffer.len(), 0);
        let contents =
            std::fs::read_to_string(dir.path().join("temp").join("system.log")).expect("read log");
        assert!(contents.is_empty());
    }

    #[test]
    fn sink_writer_splits_lines() {
        let (buffer, _dir) = scratch_buffer();
        let sink = LogSink(Arc::clone(&buffer));
        let mut writer = sink.make_writer();
        writer.write_all(b"first line\nsecond ").expect("write");
        writer.write_all(b"half\n").expect("write");
        drop(writer);
        assert_eq!(buffer.tail(10), vec!["first line", "second half"]);
    }

    #[test]
    fn level_resolution_precedence() {
        assert_eq!(resolve_level(Some("debug")), "debug");
    }
}
