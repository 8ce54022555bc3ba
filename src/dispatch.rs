// Dynamic endpoint dispatch.
//
// Resolves an incoming request to an endpoint config, sends the caller's text
// to the completion API under that config's system prompt, normalizes the
// reply into a JSON object and records the call in the log sink.
//
// # Pipeline
//
// 1. Resolve the target (config name or literal path) to an enabled config
// 2. Read a non-empty `text` string from the request body
// 3. Run the completion with the current model and temperature
// 4. Extract the first `{...}` object from the reply, or wrap the raw text
// 5. Record one call log, whatever the outcome of steps 2-4
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{debug, error};
use uuid::Uuid;

use crate::endpoints::{EndpointConfig, EndpointStore};
use crate::llm::{LlmClient, LlmError};
use crate::logs::{LogOutcome, LogSink};
use crate::settings::SettingsManager;
use crate::types::{CallLog, CompletionRequest};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("endpoint does not exist or is disabled")]
    NotFound,

    #[error("input text must not be empty")]
    EmptyText,

    #[error("API call failed: {0}")]
    Upstream(#[from] LlmError),
}

/// How the request names its endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    /// `POST /api/{name}`
    Name(String),
    /// Full request path, matched against each config's `path`
    Path(String),
}

/// Caller metadata copied into the call log.
#[derive(Debug, Clone, Default)]
pub struct CallerInfo {
    pub ip_address: String,
    pub user_agent: String,
}

/// Result of one dispatch.
#[derive(Debug)]
pub struct Dispatched {
    /// The resolved config's name, absent when resolution failed
    pub config_name: Option<String>,
    pub result: Result<Value, DispatchError>,
    /// Absent when the request never reached an endpoint
    pub log: Option<LogOutcome>,
}

#[derive(Clone)]
pub struct Dispatcher {
    endpoints: Arc<EndpointStore>,
    settings: Arc<SettingsManager>,
    llm: Arc<dyn LlmClient>,
    sink: Arc<LogSink>,
}

impl Dispatcher {
    pub fn new(
        endpoints: Arc<EndpointStore>,
        settings: Arc<SettingsManager>,
        llm: Arc<dyn LlmClient>,
        sink: Arc<LogSink>,
    ) -> Self {
        Self {
            endpoints,
            settings,
            llm,
            sink,
        }
    }

    /// Finds the config for `target`.
    ///
    /// Path lookups take the first config with that path in insertion order;
    /// if that config is disabled the lookup fails even when a later config
    /// shares the path.
    pub fn resolve(&self, target: &Target) -> Option<EndpointConfig> {
        let config = match target {
            Target::Name(name) => self.endpoints.get(name),
            Target::Path(path) => self.endpoints.find_by_path(path),
        }?;
        config.enabled.then_some(config)
    }

    pub async fn dispatch(&self, target: &Target, body: &[u8], caller: &CallerInfo) -> Dispatched {
        let started = Instant::now();

        let Some(config) = self.resolve(target) else {
            debug!("No enabled endpoint for {:?}", target);
            return Dispatched {
                config_name: None,
                result: Err(DispatchError::NotFound),
                log: None,
            };
        };

        let request_data: Value = serde_json::from_slice(body).unwrap_or(Value::Null);
        let result = self.complete(&config, &request_data).await;

        let response_data = match &result {
            Ok(value) => value.clone(),
            Err(e) => json!({ "error": e.to_string() }),
        };
        let log = CallLog {
            id: None,
            timestamp: Utc::now(),
            config_name: config.name.clone(),
            request_data,
            response_data,
            success: result.is_ok(),
            error_message: result.as_ref().err().map(|e| e.to_string()),
            execution_time_ms: started.elapsed().as_secs_f64() * 1000.0,
            ip_address: caller.ip_address.clone(),
            user_agent: caller.user_agent.clone(),
            request_id: Uuid::new_v4().to_string(),
        };
        let outcome = self.sink.record(log).await;

        Dispatched {
            config_name: Some(config.name),
            result,
            log: Some(outcome),
        }
    }

    async fn complete(&self, config: &EndpointConfig, request_data: &Value) -> Result<Value, DispatchError> {
        let text = request_data
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if text.is_empty() {
            return Err(DispatchError::EmptyText);
        }

        let settings = self.settings.current();
        let request = CompletionRequest {
            system_prompt: config.system_prompt.clone(),
            user_text: text.to_string(),
            model: settings.model_name,
            temperature: settings.temperature,
        };

        let reply = self.llm.complete(request).await.map_err(|e| {
            error!("Completion for endpoint {} failed: {}", config.name, e);
            DispatchError::Upstream(e)
        })?;

        Ok(normalize_reply(&reply, text))
    }
}

/// Parses the first `{...}` span of `content` as a JSON object.
///
/// The span runs from the first `{` to the first `}` after it, so a reply
/// whose object contains nested objects yields a truncated span and fails to
/// parse.
pub fn extract_json(content: &str) -> Option<Map<String, Value>> {
    let start = content.find('{')?;
    let end = start + content[start..].find('}')?;
    match serde_json::from_str(&content[start..=end]) {
        Ok(Value::Object(object)) => Some(object),
        _ => None,
    }
}

/// Turns a raw completion into the response body: the extracted object with
/// `original_text` set, or `{response, original_text}` when nothing parses.
pub fn normalize_reply(reply: &str, text: &str) -> Value {
    match extract_json(reply) {
        Some(mut object) => {
            object.insert("original_text".to_string(), Value::String(text.to_string()));
            Value::Object(object)
        }
        None => json!({
            "response": reply,
            "original_text": text,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoints::EndpointDraft;
    use crate::settings::SystemSettings;
    use crate::testing::{MemoryConnector, ScriptedLlm};
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        _dir: TempDir,
        dispatcher: Dispatcher,
        endpoints: Arc<EndpointStore>,
        llm: Arc<ScriptedLlm>,
        connector: Arc<MemoryConnector>,
    }

    async fn fixture(llm: ScriptedLlm) -> Fixture {
        fixture_with(llm, MemoryConnector::default()).await
    }

    async fn fixture_with(llm: ScriptedLlm, connector: MemoryConnector) -> Fixture {
        let dir = tempdir().expect("temp dir");
        let endpoints = Arc::new(EndpointStore::open(dir.path().join("api_configs.json")).unwrap());
        let settings = Arc::new(
            SettingsManager::load_with(dir.path().join("system_config.json"), || {
                SystemSettings::from_lookup(|_| None)
            })
            .unwrap(),
        );
        let connector = Arc::new(connector);
        let sink = Arc::new(LogSink::new(connector.clone()));
        sink.reconnect(&settings.current()).await;
        let llm = Arc::new(llm);

        let dispatcher = Dispatcher::new(endpoints.clone(), settings, llm.clone(), sink);
        Fixture {
            _dir: dir,
            dispatcher,
            endpoints,
            llm,
            connector,
        }
    }

    fn add(endpoints: &EndpointStore, name: &str, path: &str, enabled: bool) {
        assert!(endpoints
            .add(EndpointDraft {
                name: name.to_string(),
                path: path.to_string(),
                system_prompt: format!("{} prompt", name),
                enabled,
            })
            .unwrap());
    }

    fn caller() -> CallerInfo {
        CallerInfo {
            ip_address: "10.0.0.7".to_string(),
            user_agent: "curl/8".to_string(),
        }
    }

    #[test]
    fn extracts_first_object() {
        let object = extract_json("Sure! {\"a\": 1} and {\"b\": 2}").unwrap();
        assert_eq!(object.get("a"), Some(&json!(1)));
        assert!(object.get("b").is_none());
    }

    #[test]
    fn nested_object_truncates_at_first_close_brace() {
        assert!(extract_json(r#"{"outer": {"inner": 1}}"#).is_none());
    }

    #[test]
    fn no_braces_or_bad_json_yield_none() {
        assert!(extract_json("plain text").is_none());
        assert!(extract_json("{not json}").is_none());
        assert!(extract_json("} before {").is_none());
        assert!(extract_json("{ unterminated").is_none());
    }

    #[test]
    fn normalize_overwrites_original_text() {
        let value = normalize_reply(r#"{"original_text": "model's", "k": "v"}"#, "mine");
        assert_eq!(value, json!({"original_text": "mine", "k": "v"}));
    }

    #[test]
    fn normalize_wraps_unparseable_reply() {
        let value = normalize_reply("just words", "hi");
        assert_eq!(value, json!({"response": "just words", "original_text": "hi"}));
    }

    #[tokio::test]
    async fn success_returns_parsed_object_and_logs() {
        let fx = fixture(ScriptedLlm::replying(r#"```json
{"greeting":"hello"}
```"#))
        .await;
        add(&fx.endpoints, "greet", "/YiDiJiuYi/greet", true);

        let dispatched = fx
            .dispatcher
            .dispatch(&Target::Name("greet".into()), br#"{"text":"hi"}"#, &caller())
            .await;

        assert_eq!(
            dispatched.result.unwrap(),
            json!({"greeting": "hello", "original_text": "hi"})
        );
        assert_eq!(dispatched.log, Some(LogOutcome::Recorded));

        let requests = fx.llm.requests();
        let request = &requests[0];
        assert_eq!(request.system_prompt, "greet prompt");
        assert_eq!(request.user_text, "hi");
        assert_eq!(request.model, "qwen-max");
        assert_eq!(request.temperature, 0.1);

        let logs = fx.connector.store().logs();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].success);
        assert_eq!(logs[0].config_name, "greet");
        assert_eq!(logs[0].ip_address, "10.0.0.7");
        assert_eq!(logs[0].user_agent, "curl/8");
        assert_eq!(logs[0].request_data, json!({"text": "hi"}));
        assert!(logs[0].execution_time_ms >= 0.0);
    }

    #[tokio::test]
    async fn empty_or_missing_text_is_rejected_and_logged() {
        let fx = fixture(ScriptedLlm::replying("{}")).await;
        add(&fx.endpoints, "greet", "/p", true);

        let bodies: [&[u8]; 5] = [br#"{"text":""}"#, br#"{}"#, b"", b"not json", br#"{"text": 5}"#];
        for body in bodies {
            let dispatched = fx
                .dispatcher
                .dispatch(&Target::Name("greet".into()), body, &caller())
                .await;
            assert!(matches!(dispatched.result, Err(DispatchError::EmptyText)));
        }

        assert!(fx.llm.requests().is_empty());
        let logs = fx.connector.store().logs();
        assert_eq!(logs.len(), 5);
        assert!(logs.iter().all(|log| !log.success));
        assert_eq!(logs[0].error_message.as_deref(), Some("input text must not be empty"));
        assert_eq!(logs[0].response_data, json!({"error": "input text must not be empty"}));
    }

    #[tokio::test]
    async fn unknown_or_disabled_endpoint_is_not_found_and_not_logged() {
        let fx = fixture(ScriptedLlm::replying("{}")).await;
        add(&fx.endpoints, "off", "/YiDiJiuYi/off", false);

        for target in [
            Target::Name("missing".into()),
            Target::Name("off".into()),
            Target::Path("/YiDiJiuYi/off".into()),
            Target::Path("/YiDiJiuYi/missing".into()),
        ] {
            let dispatched = fx.dispatcher.dispatch(&target, br#"{"text":"hi"}"#, &caller()).await;
            assert!(matches!(dispatched.result, Err(DispatchError::NotFound)));
            assert!(dispatched.log.is_none());
        }
        assert!(fx.connector.store().logs().is_empty());
    }

    #[tokio::test]
    async fn upstream_failure_is_logged_as_error() {
        let fx = fixture(ScriptedLlm::failing("quota exceeded")).await;
        add(&fx.endpoints, "greet", "/p", true);

        let dispatched = fx
            .dispatcher
            .dispatch(&Target::Name("greet".into()), br#"{"text":"hi"}"#, &caller())
            .await;
        let err = dispatched.result.unwrap_err();
        assert!(matches!(err, DispatchError::Upstream(_)));
        assert!(err.to_string().contains("quota exceeded"));

        let logs = fx.connector.store().logs();
        assert_eq!(logs.len(), 1);
        assert!(!logs[0].success);
        assert!(logs[0].error_message.as_deref().unwrap().contains("quota exceeded"));
    }

    #[tokio::test]
    async fn failed_log_write_does_not_change_the_result() {
        let fx = fixture_with(
            ScriptedLlm::replying(r#"{"g":1}"#),
            MemoryConnector::rejecting_inserts(),
        )
        .await;
        add(&fx.endpoints, "greet", "/p", true);

        let dispatched = fx
            .dispatcher
            .dispatch(&Target::Name("greet".into()), br#"{"text":"hi"}"#, &caller())
            .await;

        assert_eq!(dispatched.result.unwrap(), json!({"g": 1, "original_text": "hi"}));
        assert!(matches!(dispatched.log, Some(LogOutcome::Failed(_))));
        assert!(fx.connector.store().logs().is_empty());
    }

    #[tokio::test]
    async fn path_target_uses_first_config_in_insertion_order() {
        let fx = fixture(ScriptedLlm::replying("no json here")).await;
        add(&fx.endpoints, "second", "/YiDiJiuYi/shared", true);
        add(&fx.endpoints, "first", "/YiDiJiuYi/shared", true);

        let dispatched = fx
            .dispatcher
            .dispatch(&Target::Path("/YiDiJiuYi/shared".into()), br#"{"text":"yo"}"#, &caller())
            .await;

        assert_eq!(dispatched.config_name.as_deref(), Some("second"));
        assert_eq!(
            dispatched.result.unwrap(),
            json!({"response": "no json here", "original_text": "yo"})
        );
        assert_eq!(fx.llm.requests()[0].system_prompt, "second prompt");
    }
}
