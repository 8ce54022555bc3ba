/// Common type definitions used throughout the application.
///
/// This module defines the data structures exchanged with the chat-completion
/// API and the records written to and read from the call log.
///
/// # Type Categories
///
/// - Chat-completion API types (requests and responses)
/// - Call log types (log records, queries, and statistics)
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

//------------------------------------------------------------------------------
// Chat-Completion API Types
//------------------------------------------------------------------------------

/// Request body for an OpenAI-compatible `chat/completions` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    /// Name of the model to use
    pub model: String,

    /// Conversation messages, system prompt first
    pub messages: Vec<Message>,

    /// Sampling temperature, 0 to 2
    pub temperature: f64,
}

/// Represents a single message in a chat conversation.
///
/// Roles used by the gateway are "system" and "user"; replies carry
/// "assistant".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Identifies the sender of the message
    pub role: String,

    /// The actual text content of the message
    #[serde(default)]
    pub content: Option<String>,
}

impl Message {
    pub fn system(content: &str) -> Self {
        Self {
            role: "system".to_string(),
            content: Some(content.to_string()),
        }
    }

    pub fn user(content: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: Some(content.to_string()),
        }
    }
}

/// Response from a `chat/completions` call. Only the fields the gateway
/// reads are modelled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub model: Option<String>,

    pub choices: Vec<Choice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub index: u32,

    pub message: Message,

    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Everything the LLM client needs for one completion.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_text: String,
    pub model: String,
    pub temperature: f64,
}

//------------------------------------------------------------------------------
// Call Log Types
//------------------------------------------------------------------------------

/// One dispatch invocation, as written to the log store.
///
/// Records are immutable once written. `request_id` is a fresh UUID per call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallLog {
    /// Store-assigned identifier, present only on records read back
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// When the call finished
    pub timestamp: DateTime<Utc>,

    /// Name of the endpoint config that served the call
    pub config_name: String,

    /// Request body as received, `null` when it was not valid JSON
    pub request_data: Value,

    /// Body returned to the caller
    pub response_data: Value,

    pub success: bool,

    pub error_message: Option<String>,

    /// Wall-clock time from resolution to response, in milliseconds
    pub execution_time_ms: f64,

    pub ip_address: String,

    pub user_agent: String,

    pub request_id: String,
}

/// Filters and paging for call log retrieval.
///
/// Both timestamp bounds are inclusive. Results are newest first.
#[derive(Debug, Clone, PartialEq)]
pub struct LogQuery {
    pub limit: i64,
    pub skip: u64,
    pub config_name: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

impl Default for LogQuery {
    fn default() -> Self {
        Self {
            limit: 100,
            skip: 0,
            config_name: None,
            start_date: None,
            end_date: None,
        }
    }
}

/// Aggregate call statistics across the whole log.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LogStats {
    pub total_calls: u64,
    pub success_calls: u64,
    pub error_calls: u64,
    /// Percentage of successful calls, rounded to two decimals
    pub success_rate: f64,
    pub config_stats: Vec<ConfigStats>,
}

impl LogStats {
    pub fn new(total_calls: u64, success_calls: u64, error_calls: u64, config_stats: Vec<ConfigStats>) -> Self {
        Self {
            total_calls,
            success_calls,
            error_calls,
            success_rate: success_rate(success_calls, total_calls),
            config_stats,
        }
    }
}

/// Per-endpoint breakdown. Serialized with `_id` as the key field so the
/// shape matches the store's `$group` output.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConfigStats {
    #[serde(rename = "_id")]
    pub config_name: String,
    pub count: u64,
    pub success_count: u64,
    pub error_count: u64,
}

/// `success / total * 100` rounded to two decimals, or 0 for an empty log.
pub fn success_rate(success: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let rate = success as f64 / total as f64 * 100.0;
    (rate * 100.0).round() / 100.0
}
