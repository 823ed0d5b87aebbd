//! Line-delimited JSON control interface for host-embedded mode.
//!
//! Each message is one line: `{"type": ..., "ts": ..., "id"?: ..., "data"?: {...}}`.
//! The wire schema is loosely typed; inbound messages are decoded into the
//! typed [`Inbound`] variants at this boundary and nowhere else. Malformed
//! JSON and unknown types produce outbound `error` messages, never
//! termination.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::engine::{Stats, TaskResult};
use crate::proxy::PoolStats;

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// The wire envelope shared by every message in both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub ts: i64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<Value>,
}

impl Envelope {
    /// Creates an envelope of the given type, stamped with the current time.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ts: now_ms(),
            id: None,
            data: None,
        }
    }

    /// Attaches a data payload.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Serializes to one wire line (no trailing newline).
    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Errors produced while decoding an inbound line.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The line was not valid JSON or its data did not decode.
    #[error("{0}")]
    Parse(String),
    /// The envelope type is not recognized.
    #[error("unknown message type: {0}")]
    UnknownType(String),
}

impl ProtocolError {
    /// The wire error code for this failure.
    pub fn code(&self) -> &'static str {
        match self {
            ProtocolError::Parse(_) => "parse_error",
            ProtocolError::UnknownType(_) => "unknown_type",
        }
    }
}

/// Engine configuration carried by the `init` message. All durations are
/// millisecond-denominated on the wire. Zero or missing fields fall back
/// to defaults via [`InitConfig::normalized`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct InitConfig {
    pub workers: usize,
    pub timeout: u64,
    pub base_delay: u64,
    pub min_delay: u64,
    pub max_delay: u64,
    pub max_retries: u32,
    pub results_per_page: u32,
    pub proxy_file: String,
    pub proxies: Vec<String>,
}

impl Default for InitConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            timeout: 30_000,
            base_delay: 8_000,
            min_delay: 3_000,
            max_delay: 15_000,
            max_retries: 3,
            results_per_page: 100,
            proxy_file: String::new(),
            proxies: Vec::new(),
        }
    }
}

impl InitConfig {
    /// Replaces zeroed numeric fields with their defaults.
    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();
        if self.workers == 0 {
            self.workers = defaults.workers;
        }
        if self.timeout == 0 {
            self.timeout = defaults.timeout;
        }
        if self.min_delay == 0 {
            self.min_delay = defaults.min_delay;
        }
        if self.max_delay == 0 {
            self.max_delay = defaults.max_delay;
        }
        if self.max_retries == 0 {
            self.max_retries = defaults.max_retries;
        }
        if self.results_per_page == 0 {
            self.results_per_page = defaults.results_per_page;
        }
        self
    }
}

/// One task as specified on the wire.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TaskSpec {
    #[serde(alias = "task_id")]
    pub id: String,
    pub dork: String,
    #[serde(default)]
    pub page: u32,
}

#[derive(Deserialize)]
struct BatchData {
    #[serde(default)]
    tasks: Vec<TaskSpec>,
}

/// A decoded inbound command.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Init(InitConfig),
    Task(TaskSpec),
    TaskBatch(Vec<TaskSpec>),
    Pause,
    Resume,
    GetStats,
    Shutdown,
}

/// Decodes one inbound wire line.
pub fn parse_inbound(line: &str) -> Result<Inbound, ProtocolError> {
    let envelope: Envelope =
        serde_json::from_str(line).map_err(|e| ProtocolError::Parse(e.to_string()))?;
    let data = envelope.data.unwrap_or(Value::Null);

    match envelope.kind.as_str() {
        "init" => {
            let config: InitConfig = if data.is_null() {
                InitConfig::default()
            } else {
                decode(data)?
            };
            Ok(Inbound::Init(config.normalized()))
        }
        "task" => Ok(Inbound::Task(decode(data)?)),
        "task_batch" => {
            let batch: BatchData = decode(data)?;
            Ok(Inbound::TaskBatch(batch.tasks))
        }
        "pause" => Ok(Inbound::Pause),
        "resume" => Ok(Inbound::Resume),
        "get_stats" => Ok(Inbound::GetStats),
        "shutdown" => Ok(Inbound::Shutdown),
        other => Err(ProtocolError::UnknownType(other.to_string())),
    }
}

fn decode<T: serde::de::DeserializeOwned>(data: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(data).map_err(|e| ProtocolError::Parse(e.to_string()))
}

/// Builds a `status` message (`ready`, `initialized`, `paused`, `resumed`,
/// `shutdown`, `interrupted`).
pub fn status(status: &str, message: &str) -> Envelope {
    let mut data = json!({ "status": status });
    if !message.is_empty() {
        data["message"] = json!(message);
    }
    Envelope::new("status").with_data(data)
}

/// Builds a `result` message from a terminal task result.
pub fn result(result: &TaskResult) -> Envelope {
    let mut data = json!({
        "task_id": result.task_id,
        "dork": result.dork,
        "urls": result.urls,
        "status": result.status,
        "proxy_id": result.proxy_id,
        "duration_ms": result.duration.as_millis() as u64,
    });
    if let Some(error) = &result.error {
        data["error"] = json!(error);
    }
    Envelope::new("result").with_data(data)
}

/// Builds a `stats` message, deriving an ETA from current throughput.
pub fn stats(stats: &Stats, proxies: &PoolStats) -> Envelope {
    let remaining = stats
        .tasks_total
        .saturating_sub(stats.tasks_completed + stats.tasks_failed);
    let eta_ms = if stats.requests_per_sec > 0.0 {
        (remaining as f64 / stats.requests_per_sec * 1000.0) as i64
    } else {
        0
    };

    Envelope::new("stats").with_data(json!({
        "tasks_total": stats.tasks_total,
        "tasks_completed": stats.tasks_completed,
        "tasks_failed": stats.tasks_failed,
        "tasks_pending": stats.tasks_pending,
        "urls_found": stats.urls_found,
        "captcha_count": stats.captcha_count,
        "block_count": stats.block_count,
        "results_dropped": stats.results_dropped,
        "proxies_alive": proxies.alive + proxies.slow,
        "proxies_dead": proxies.dead,
        "requests_per_sec": stats.requests_per_sec,
        "elapsed_ms": stats.elapsed_ms,
        "eta_ms": eta_ms,
    }))
}

/// Builds a `progress` message.
pub fn progress(current: u64, total: u64) -> Envelope {
    let percentage = if total > 0 {
        current as f64 / total as f64 * 100.0
    } else {
        0.0
    };
    Envelope::new("progress").with_data(json!({
        "current": current,
        "total": total,
        "percentage": percentage,
    }))
}

/// Builds a `proxy_info` message.
pub fn proxy_info(stats: &PoolStats) -> Envelope {
    Envelope::new("proxy_info").with_data(json!({
        "alive": stats.alive + stats.slow,
        "dead": stats.dead,
        "quarantined": stats.quarantined,
        "total": stats.total,
    }))
}

/// Builds a `log` message.
pub fn log(level: &str, message: &str) -> Envelope {
    Envelope::new("log").with_data(json!({ "level": level, "message": message }))
}

/// Builds an `error` message.
pub fn error(code: &str, message: &str) -> Envelope {
    Envelope::new("error").with_data(json!({ "code": code, "message": message }))
}

/// Serializes envelopes onto the outbound byte stream, one line each.
/// Writes are serialized through a mutex so workers and the control loop
/// never interleave partial lines.
pub struct MessageWriter<W> {
    writer: Mutex<W>,
}

impl<W: AsyncWrite + Unpin> MessageWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Writes one envelope as a line and flushes.
    pub async fn send(&self, envelope: &Envelope) -> std::io::Result<()> {
        let line = envelope
            .to_line()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Classification;
    use std::time::Duration;

    #[test]
    fn test_envelope_round_trip() {
        let envelope = Envelope::new("stats").with_data(json!({"tasks_total": 5}));
        let line = envelope.to_line().unwrap();
        let back: Envelope = serde_json::from_str(&line).unwrap();
        assert_eq!(envelope, back);
    }

    #[test]
    fn test_envelope_omits_empty_fields() {
        let line = Envelope::new("pause").to_line().unwrap();
        assert!(!line.contains("\"id\""));
        assert!(!line.contains("\"data\""));
    }

    #[test]
    fn test_parse_init_with_defaults() {
        let line = r#"{"type":"init","ts":0,"data":{"workers":4,"proxies":["1.2.3.4:8080"]}}"#;
        let Inbound::Init(config) = parse_inbound(line).unwrap() else {
            panic!("expected init");
        };
        assert_eq!(config.workers, 4);
        assert_eq!(config.timeout, 30_000);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.proxies, vec!["1.2.3.4:8080"]);
    }

    #[test]
    fn test_parse_init_zero_fields_normalized() {
        let line = r#"{"type":"init","ts":0,"data":{"workers":0,"timeout":0}}"#;
        let Inbound::Init(config) = parse_inbound(line).unwrap() else {
            panic!("expected init");
        };
        assert_eq!(config.workers, 10);
        assert_eq!(config.timeout, 30_000);
    }

    #[test]
    fn test_parse_task() {
        let line = r#"{"type":"task","ts":0,"data":{"id":"t1","dork":"site:example.com","page":2}}"#;
        let Inbound::Task(task) = parse_inbound(line).unwrap() else {
            panic!("expected task");
        };
        assert_eq!(task.id, "t1");
        assert_eq!(task.dork, "site:example.com");
        assert_eq!(task.page, 2);
    }

    #[test]
    fn test_parse_task_id_alias() {
        let line = r#"{"type":"task","ts":0,"data":{"task_id":"t9","dork":"x"}}"#;
        let Inbound::Task(task) = parse_inbound(line).unwrap() else {
            panic!("expected task");
        };
        assert_eq!(task.id, "t9");
        assert_eq!(task.page, 0);
    }

    #[test]
    fn test_parse_task_batch() {
        let line = r#"{"type":"task_batch","ts":0,"data":{"tasks":[
            {"id":"a","dork":"one"},{"id":"b","dork":"two","page":1}]}}"#;
        let Inbound::TaskBatch(tasks) = parse_inbound(line).unwrap() else {
            panic!("expected batch");
        };
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[1].page, 1);
    }

    #[test]
    fn test_parse_control_messages() {
        for (line, expected) in [
            (r#"{"type":"pause","ts":0}"#, Inbound::Pause),
            (r#"{"type":"resume","ts":0}"#, Inbound::Resume),
            (r#"{"type":"get_stats","ts":0}"#, Inbound::GetStats),
            (r#"{"type":"shutdown","ts":0}"#, Inbound::Shutdown),
        ] {
            assert_eq!(parse_inbound(line).unwrap(), expected);
        }
    }

    #[test]
    fn test_parse_unknown_type() {
        let err = parse_inbound(r#"{"type":"dance","ts":0}"#).unwrap_err();
        assert_eq!(err.code(), "unknown_type");
    }

    #[test]
    fn test_parse_malformed_json() {
        let err = parse_inbound("{not json").unwrap_err();
        assert_eq!(err.code(), "parse_error");
    }

    #[test]
    fn test_result_message_shape() {
        let result = TaskResult {
            task_id: "t1".to_string(),
            dork: "site:example.com".to_string(),
            status: Classification::Success,
            urls: vec!["https://example.com/x".to_string()],
            error: None,
            proxy_id: "http_10.0.0.1_8080".to_string(),
            duration: Duration::from_millis(1234),
            timestamp: SystemTime::now(),
        };
        let envelope = super::result(&result);
        assert_eq!(envelope.kind, "result");
        let data = envelope.data.unwrap();
        assert_eq!(data["status"], "success");
        assert_eq!(data["duration_ms"], 1234);
        assert!(data.get("error").is_none());
    }

    #[test]
    fn test_stats_message_eta() {
        let stats_in = Stats {
            tasks_total: 100,
            tasks_completed: 50,
            requests_per_sec: 5.0,
            ..Default::default()
        };
        let envelope = stats(&stats_in, &PoolStats::default());
        let data = envelope.data.unwrap();
        assert_eq!(data["eta_ms"], 10_000);
    }

    #[test]
    fn test_progress_percentage() {
        let envelope = progress(25, 100);
        let data = envelope.data.unwrap();
        assert_eq!(data["percentage"], 25.0);
        // Empty totals do not divide by zero.
        let empty = progress(0, 0);
        assert_eq!(empty.data.unwrap()["percentage"], 0.0);
    }

    #[test]
    fn test_proxy_info_totals() {
        let envelope = proxy_info(&PoolStats {
            total: 10,
            alive: 4,
            slow: 2,
            dead: 3,
            quarantined: 1,
            unknown: 0,
        });
        let data = envelope.data.unwrap();
        assert_eq!(data["alive"], 6);
        assert_eq!(data["dead"], 3);
        assert_eq!(data["quarantined"], 1);
        assert_eq!(data["total"], 10);
    }

    #[tokio::test]
    async fn test_message_writer_lines() {
        let mut buffer = Vec::new();
        {
            let writer = MessageWriter::new(&mut buffer);
            writer.send(&status("ready", "")).await.unwrap();
            writer.send(&log("info", "hello")).await.unwrap();
        }
        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.trim_end().split('\n').collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let envelope: Envelope = serde_json::from_str(line).unwrap();
            assert!(!envelope.kind.is_empty());
        }
    }
}
