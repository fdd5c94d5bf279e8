//! Structured access logging for dispatched connections.
//!
//! An [`AccessRecord`] is attached to the session by the inbound side;
//! the dispatcher fills in the chosen detour tag and emits the record
//! once routing has settled. Records go through `tracing` and can
//! additionally be appended to a file.

use std::path::PathBuf;

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{error, info};

/// Per-connection access record.
#[derive(Debug, Clone, Serialize)]
pub struct AccessRecord {
    /// Session id for log correlation
    pub id: u64,
    pub source: String,
    pub target: String,
    pub network: String,
    pub inbound: String,
    /// Outbound tag chosen by routing; empty when none
    pub detour: String,
    /// Protocol detected via sniffing
    pub protocol: Option<String>,
    pub status: String,
}

impl AccessRecord {
    pub fn new(id: u64, source: String, target: String, network: &str, inbound: String) -> Self {
        Self {
            id,
            source,
            target,
            network: network.to_string(),
            inbound,
            detour: String::new(),
            protocol: None,
            status: "accepted".to_string(),
        }
    }

    pub fn to_text(&self) -> String {
        format!(
            "conn={} src={} dst={} net={} in={} detour={} proto={} status={}",
            self.id,
            if self.source.is_empty() { "-" } else { &self.source },
            self.target,
            self.network,
            self.inbound,
            if self.detour.is_empty() { "-" } else { &self.detour },
            self.protocol.as_deref().unwrap_or("-"),
            self.status,
        )
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| format!("{{\"id\":{},\"status\":\"serialize-failed\"}}", self.id))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessLogFormat {
    Text,
    Json,
}

impl AccessLogFormat {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Text,
        }
    }
}

/// Access log sink. Always emits through `tracing`; optionally appends
/// each line to a file.
pub struct AccessLogger {
    format: AccessLogFormat,
    file: Option<(PathBuf, Mutex<Option<tokio::fs::File>>)>,
}

impl AccessLogger {
    pub fn new(format: AccessLogFormat, file_path: Option<PathBuf>) -> Self {
        Self {
            format,
            file: file_path.map(|p| (p, Mutex::new(None))),
        }
    }

    pub async fn emit(&self, record: &AccessRecord) {
        let line = match self.format {
            AccessLogFormat::Text => record.to_text(),
            AccessLogFormat::Json => record.to_json(),
        };

        info!(target: "access", "{}", line);

        if let Some((path, file)) = &self.file {
            if let Err(e) = self.append(path, file, &line).await {
                error!(error = %e, path = %path.display(), "failed to write access log");
            }
        }
    }

    async fn append(
        &self,
        path: &PathBuf,
        file: &Mutex<Option<tokio::fs::File>>,
        line: &str,
    ) -> std::io::Result<()> {
        let mut guard = file.lock().await;
        if guard.is_none() {
            let opened = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await?;
            *guard = Some(opened);
        }
        let f = guard.as_mut().unwrap();
        f.write_all(format!("{}\n", line).as_bytes()).await?;
        f.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> AccessRecord {
        let mut r = AccessRecord::new(
            42,
            "192.168.1.1:54321".to_string(),
            "example.com:443".to_string(),
            "tcp",
            "forward-in".to_string(),
        );
        r.detour = "proxy-a".to_string();
        r.protocol = Some("tls".to_string());
        r
    }

    #[test]
    fn text_format() {
        let text = record().to_text();
        assert!(text.contains("conn=42"));
        assert!(text.contains("dst=example.com:443"));
        assert!(text.contains("detour=proxy-a"));
        assert!(text.contains("proto=tls"));
    }

    #[test]
    fn text_format_placeholders() {
        let r = AccessRecord::new(1, String::new(), "t:1".to_string(), "tcp", "in".to_string());
        let text = r.to_text();
        assert!(text.contains("src=-"));
        assert!(text.contains("detour=-"));
        assert!(text.contains("proto=-"));
    }

    #[test]
    fn json_format() {
        let json = record().to_json();
        assert!(json.contains("\"id\":42"));
        assert!(json.contains("\"detour\":\"proxy-a\""));
    }

    #[test]
    fn format_from_str() {
        assert_eq!(AccessLogFormat::from_str("json"), AccessLogFormat::Json);
        assert_eq!(AccessLogFormat::from_str("JSON"), AccessLogFormat::Json);
        assert_eq!(AccessLogFormat::from_str("text"), AccessLogFormat::Text);
        assert_eq!(AccessLogFormat::from_str("other"), AccessLogFormat::Text);
    }

    #[tokio::test]
    async fn file_append() {
        let dir = std::env::temp_dir().join(format!("windrose-access-{}", rand::random::<u32>()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("access.log");

        let logger = AccessLogger::new(AccessLogFormat::Text, Some(path.clone()));
        logger.emit(&record()).await;
        logger.emit(&record()).await;

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.contains("conn=42"));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
