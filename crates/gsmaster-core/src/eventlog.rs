//! Master event log
//!
//! One line per protocol event, appended to the configured log file and
//! flushed immediately so concurrent readers see progress. Format:
//! `MMM DD HH:MM:SS host:port message`, with `-` in place of the address
//! when no remote is associated.

use std::net::SocketAddr;
use std::path::Path;

use chrono::Local;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::warn;

pub struct EventLog {
    file: File,
}

impl EventLog {
    /// Open the log file in append mode, creating it if needed. Failure
    /// here is a startup fatal.
    pub async fn open(path: &Path) -> std::io::Result<EventLog> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(EventLog { file })
    }

    /// Append one line and flush it. Write failures are reported but never
    /// interrupt packet handling.
    pub async fn write(&mut self, remote: Option<SocketAddr>, message: &str) {
        let stamp = Local::now().format("%b %d %H:%M:%S");
        let who = match remote {
            Some(addr) => addr.to_string(),
            None => "-".to_string(),
        };
        let line = format!("{} {} {}\n", stamp, who, message);

        if let Err(e) = self.file.write_all(line.as_bytes()).await {
            warn!("event log write failed: {}", e);
            return;
        }
        if let Err(e) = self.file.flush().await {
            warn!("event log flush failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static COUNTER: AtomicUsize = AtomicUsize::new(0);

    fn temp_log_path() -> std::path::PathBuf {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!(
            "gsmaster-eventlog-test-{}-{}.log",
            std::process::id(),
            n
        ))
    }

    #[tokio::test]
    async fn test_line_format() {
        let path = temp_log_path();
        let mut log = EventLog::open(&path).await.unwrap();
        log.write(Some("203.0.113.5:2342".parse().unwrap()), "add request")
            .await;
        log.write(None, "startup").await;

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        // "MMM DD HH:MM:SS" is a fixed 15-character prefix.
        assert_eq!(lines[0].as_bytes()[15], b' ');
        assert!(lines[0].ends_with("203.0.113.5:2342 add request"));
        assert!(lines[1].ends_with("- startup"));

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_append_across_opens() {
        let path = temp_log_path();
        {
            let mut log = EventLog::open(&path).await.unwrap();
            log.write(None, "first").await;
        }
        {
            let mut log = EventLog::open(&path).await.unwrap();
            log.write(None, "second").await;
        }

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents.lines().count(), 2);

        tokio::fs::remove_file(&path).await.unwrap();
    }
}
