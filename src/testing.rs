// Test doubles for the completion API and the log store.
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use reqwest::StatusCode;
use mongodb::bson;
use serde::de::Error as _;
use serde_json::Value;

use crate::llm::{LlmClient, LlmError};
use crate::logs::{LogError, LogStore, LogStoreConnector};
use crate::settings::SystemSettings;
use crate::types::{CallLog, CompletionRequest, ConfigStats, LogQuery, LogStats};

pub fn sample_log(config_name: &str, success: bool) -> CallLog {
    CallLog {
        id: None,
        timestamp: Utc::now(),
        config_name: config_name.to_string(),
        request_data: Value::Null,
        response_data: Value::Null,
        success,
        error_message: (!success).then(|| "boom".to_string()),
        execution_time_ms: 1.5,
        ip_address: "127.0.0.1".to_string(),
        user_agent: "test".to_string(),
        request_id: uuid::Uuid::new_v4().to_string(),
    }
}

/// Completion client that answers every call with a fixed reply, or fails.
pub struct ScriptedLlm {
    reply: Result<String, String>,
    requests: Mutex<Vec<CompletionRequest>>,
    configured: Mutex<Option<String>>,
}

impl ScriptedLlm {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Ok(reply.to_string()),
            requests: Mutex::new(Vec::new()),
            configured: Mutex::new(None),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            reply: Err(message.to_string()),
            requests: Mutex::new(Vec::new()),
            configured: Mutex::new(None),
        }
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }

    pub fn configured_url(&self) -> Option<String> {
        self.configured.lock().clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
        self.requests.lock().push(request);
        match &self.reply {
            Ok(reply) => Ok(reply.clone()),
            Err(message) => Err(LlmError::ApiError {
                status: StatusCode::TOO_MANY_REQUESTS,
                message: message.clone(),
            }),
        }
    }

    fn configure(&self, settings: &SystemSettings) -> Result<(), LlmError> {
        *self.configured.lock() = Some(settings.openai_api_url.clone());
        Ok(())
    }
}

/// Returns true if `log` passes the name and inclusive timestamp filters of
/// `query`, mirroring the filter the MongoDB store builds.
pub fn query_matches(query: &LogQuery, log: &CallLog) -> bool {
    if let Some(name) = &query.config_name {
        if &log.config_name != name {
            return false;
        }
    }
    if let Some(start) = query.start_date {
        if log.timestamp < start {
            return false;
        }
    }
    if let Some(end) = query.end_date {
        if log.timestamp > end {
            return false;
        }
    }
    true
}

#[derive(Default)]
pub struct MemoryLogStore {
    logs: Mutex<Vec<CallLog>>,
    closed: AtomicBool,
    // Every insert fails, as if the server went away after connecting
    reject_inserts: bool,
}

impl MemoryLogStore {
    pub fn logs(&self) -> Vec<CallLog> {
        self.logs.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn insert(&self, log: &CallLog) -> Result<(), LogError> {
        if self.reject_inserts {
            return Err(LogError::DecodeError(bson::de::Error::custom("log store offline")));
        }
        self.logs.lock().push(log.clone());
        Ok(())
    }

    async fn query(&self, query: &LogQuery) -> Result<Vec<CallLog>, LogError> {
        let mut matched: Vec<CallLog> = self
            .logs
            .lock()
            .iter()
            .filter(|log| query_matches(query, log))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(matched
            .into_iter()
            .skip(query.skip as usize)
            .take(query.limit.max(0) as usize)
            .collect())
    }

    async fn stats(&self) -> Result<LogStats, LogError> {
        let logs = self.logs.lock();
        let mut config_stats: Vec<ConfigStats> = Vec::new();
        for log in logs.iter() {
            let index = match config_stats.iter().position(|s| s.config_name == log.config_name) {
                Some(index) => index,
                None => {
                    config_stats.push(ConfigStats {
                        config_name: log.config_name.clone(),
                        ..ConfigStats::default()
                    });
                    config_stats.len() - 1
                }
            };
            let entry = &mut config_stats[index];
            entry.count += 1;
            if log.success {
                entry.success_count += 1;
            } else {
                entry.error_count += 1;
            }
        }

        let total = logs.len() as u64;
        let success = logs.iter().filter(|log| log.success).count() as u64;
        Ok(LogStats::new(total, success, total - success, config_stats))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Hands out a fresh [`MemoryLogStore`] per connection.
#[derive(Default)]
pub struct MemoryConnector {
    connections: AtomicUsize,
    opened: Mutex<Vec<Arc<MemoryLogStore>>>,
    reject_inserts: bool,
}

impl MemoryConnector {
    /// A connector whose stores accept the connection but fail every insert.
    pub fn rejecting_inserts() -> Self {
        Self {
            reject_inserts: true,
            ..Self::default()
        }
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Every store opened so far, oldest first.
    pub fn opened(&self) -> Vec<Arc<MemoryLogStore>> {
        self.opened.lock().clone()
    }

    /// The most recently opened store.
    pub fn store(&self) -> Arc<MemoryLogStore> {
        self.opened
            .lock()
            .last()
            .cloned()
            .expect("connector has not been connected")
    }
}

#[async_trait]
impl LogStoreConnector for MemoryConnector {
    async fn connect(&self, _settings: &SystemSettings) -> Result<Arc<dyn LogStore>, LogError> {
        self.connections.fetch_add(1, Ordering::SeqCst);
        // Lets concurrent reconnects interleave the way a network round trip would
        tokio::task::yield_now().await;
        let store = Arc::new(MemoryLogStore {
            reject_inserts: self.reject_inserts,
            ..MemoryLogStore::default()
        });
        self.opened.lock().push(store.clone());
        Ok(store)
    }
}

mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn query_bounds_are_inclusive() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut log = sample_log("greet", true);
        log.timestamp = at;

        let query = LogQuery {
            start_date: Some(at),
            end_date: Some(at),
            config_name: Some("greet".to_string()),
            ..LogQuery::default()
        };
        assert!(query_matches(&query, &log));

        let other = LogQuery {
            config_name: Some("other".to_string()),
            ..LogQuery::default()
        };
        assert!(!query_matches(&other, &log));
    }
}
