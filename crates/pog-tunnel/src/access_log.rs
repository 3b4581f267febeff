//! CONNECT access log
//!
//! Records go to the `pog::access` tracing target, so they can be routed or
//! filtered separately from diagnostic logs.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use tokio::sync::mpsc;
use tracing::info;

/// One CONNECT attempt as seen by either side of the proxy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub connect_addr: String,
    pub user: String,
    pub remote_addr: String,
    /// gRPC code name on the server, HTTP status on the client
    pub status: String,
}

impl LogRecord {
    pub fn new(
        connect_addr: impl Into<String>,
        user: impl Into<String>,
        remote_addr: impl Into<String>,
        status: impl fmt::Display,
    ) -> Self {
        Self {
            connect_addr: non_empty(connect_addr.into()),
            user: non_empty(user.into()),
            remote_addr: non_empty(remote_addr.into()),
            status: status.to_string(),
        }
    }

    /// `<connect_addr> <user> HTTPS <remote_addr> [<time>] <status>`
    pub fn format_line(&self, at: DateTime<Utc>) -> String {
        format!(
            "{} {} HTTPS {} [{}] {}",
            self.connect_addr,
            self.user,
            self.remote_addr,
            at.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.status
        )
    }
}

fn non_empty(value: String) -> String {
    if value.is_empty() {
        "-".to_string()
    } else {
        value
    }
}

/// Access log sink; a disabled log drops every record
#[derive(Debug, Clone)]
pub struct AccessLog {
    enabled: bool,
    forward: Option<mpsc::UnboundedSender<LogRecord>>,
}

impl AccessLog {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            forward: None,
        }
    }

    pub fn disabled() -> Self {
        Self::new(false)
    }

    /// A log that hands every record to the returned receiver instead of
    /// writing it out
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<LogRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let log = Self {
            enabled: false,
            forward: Some(tx),
        };
        (log, rx)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn record(&self, rec: &LogRecord) {
        if let Some(forward) = &self.forward {
            // receiver gone means nobody is listening any more
            let _ = forward.send(rec.clone());
        }
        if !self.enabled {
            return;
        }

        info!(
            target: "pog::access",
            connect_addr = %rec.connect_addr,
            user = %rec.user,
            remote_addr = %rec.remote_addr,
            status = %rec.status,
            "{}",
            rec.format_line(Utc::now())
        );
    }
}

impl Default for AccessLog {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_line() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        let rec = LogRecord::new("example.com:443", "alice", "10.0.0.7:51234", 200);

        assert_eq!(
            rec.format_line(at),
            "example.com:443 alice HTTPS 10.0.0.7:51234 [2024-03-01T12:30:00Z] 200"
        );
    }

    #[test]
    fn test_missing_fields_become_dash() {
        let rec = LogRecord::new("", "anonymous", "", "Unavailable");
        assert_eq!(rec.connect_addr, "-");
        assert_eq!(rec.remote_addr, "-");
        assert_eq!(rec.status, "Unavailable");
    }

    #[test]
    fn test_disabled_log() {
        assert!(!AccessLog::disabled().is_enabled());
        assert!(AccessLog::default().is_enabled());
        // recording into a disabled log is a no-op
        AccessLog::disabled().record(&LogRecord::new("a:1", "u", "r", 0));
    }

    #[test]
    fn test_channel_log_forwards_records() {
        let (log, mut rx) = AccessLog::channel();
        assert!(!log.is_enabled());

        log.clone().record(&LogRecord::new("a:1", "bob", "10.0.0.1:5", "Ok"));
        let rec = rx.try_recv().unwrap();
        assert_eq!(rec.user, "bob");
        assert_eq!(rec.status, "Ok");

        drop(rx);
        // no receiver left; recording still must not fail
        log.record(&LogRecord::new("a:1", "bob", "-", "Ok"));
    }
}
