//! The per-request access log.
//!
//! Every answered request produces exactly one line:
//!
//! ```text
//! [ 2024-05-01 12:00:00 ] 200 | 127.0.0.1       | /current-version.txt (3ms)
//! ```

use std::fmt;
use std::io::{self, Write};
use std::sync::Mutex;
use std::time::Duration;
use chrono::{DateTime, Local};
use log::debug;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One access log record.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub status: u16,
    pub remote_address: String,
    pub path: String,
    pub elapsed: Duration,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f, "[ {} ] {:>3} | {:<15} | {} ({}ms)",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.status,
            self.remote_address,
            self.path,
            self.elapsed.as_millis(),
        )
    }
}

/// Writes log entries to a shared sink, one whole line per write.
pub struct AccessLogger {
    sink: Mutex<Box<dyn Write + Send>>,
}

impl AccessLogger {
    pub fn new(sink: impl Write + Send + 'static) -> Self {
        Self { sink: Mutex::new(Box::new(sink)) }
    }

    /// A logger writing to the process's standard output.
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// Records `entry`.
    ///
    /// The line is formatted before the lock is taken and written with a
    /// single call, so concurrent entries never mix. Write failures are
    /// dropped; losing a log line must not fail the request.
    pub fn log(&self, entry: &LogEntry) {
        let line = format!("{entry}\n");
        let mut sink = match self.sink.lock() {
            Ok(sink) => sink,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(err) = sink.write_all(line.as_bytes()).and_then(|_| sink.flush()) {
            debug!("Failed to write access log entry: {err}");
        }
    }
}

impl Default for AccessLogger {
    fn default() -> Self {
        Self::stdout()
    }
}

impl fmt::Debug for AccessLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessLogger").finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Arc;
    use chrono::TimeZone;

    /// A cloneable in-memory sink for inspecting log output.
    #[derive(Clone, Default)]
    pub(crate) struct SharedBuf(pub Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        pub(crate) fn lines(&self) -> Vec<String> {
            let buf = self.0.lock().unwrap();
            String::from_utf8_lossy(&buf).lines().map(String::from).collect()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn entry(path: &str) -> LogEntry {
        LogEntry {
            timestamp: Local.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            status: 200,
            remote_address: "127.0.0.1".into(),
            path: path.into(),
            elapsed: Duration::from_millis(3),
        }
    }

    #[test]
    fn formats_one_line() {
        assert_eq!(
            entry("/current-version.txt").to_string(),
            "[ 2024-05-01 12:00:00 ] 200 | 127.0.0.1       | /current-version.txt (3ms)"
        );
    }

    #[test]
    fn long_addresses_are_not_truncated() {
        let mut entry = entry("/a");
        entry.remote_address = "2001:db8::1234:5678".into();
        entry.status = 404;
        assert!(entry.to_string().contains("] 404 | 2001:db8::1234:5678 | /a (3ms)"));
    }

    #[test]
    fn concurrent_entries_stay_whole() {
        let buf = SharedBuf::default();
        let logger = Arc::new(AccessLogger::new(buf.clone()));

        let threads: Vec<_> = (0..8).map(|i| {
            let logger = logger.clone();
            std::thread::spawn(move || {
                for j in 0..50 {
                    logger.log(&entry(&format!("/file-{i}-{j}.bin")));
                }
            })
        }).collect();
        for thread in threads {
            thread.join().unwrap();
        }

        let lines = buf.lines();
        assert_eq!(lines.len(), 400);
        for line in lines {
            assert!(line.starts_with("[ 2024-05-01 12:00:00 ] 200 | "), "{line}");
            assert!(line.ends_with("(3ms)"), "{line}");
        }
    }
}
