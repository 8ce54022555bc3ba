// Call log sink backed by a document store.
//
// Every dispatch writes one `CallLog` through the `LogSink`. The sink owns an
// optional connection to a `LogStore`; when the store cannot be reached, or
// logging is switched off in the system settings, the sink stays disabled and
// every operation quietly becomes a no-op. Store faults are reported through
// `tracing` and never reach the request path.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use mongodb::bson::{self, doc, oid::ObjectId, Bson, Document};
use mongodb::options::{ClientOptions, FindOptions};
use mongodb::{Client, Collection};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::settings::SystemSettings;
use crate::types::{CallLog, ConfigStats, LogQuery, LogStats};

#[derive(Debug, Error)]
pub enum LogError {
    #[error("MongoDB error: {0}")]
    MongoError(#[from] mongodb::error::Error),

    #[error("Failed to encode log record: {0}")]
    EncodeError(#[from] bson::ser::Error),

    #[error("Failed to decode log record: {0}")]
    DecodeError(#[from] bson::de::Error),
}

/// What happened to a log write. Callers may inspect it but are never
/// required to act on it.
#[derive(Debug, Clone, PartialEq)]
pub enum LogOutcome {
    Recorded,
    /// The sink has no connection, so nothing was written
    Skipped,
    Failed(String),
}

/// A connected document store holding call logs.
#[async_trait]
pub trait LogStore: Send + Sync {
    async fn insert(&self, log: &CallLog) -> Result<(), LogError>;

    /// Logs matching `query`, newest first.
    async fn query(&self, query: &LogQuery) -> Result<Vec<CallLog>, LogError>;

    async fn stats(&self) -> Result<LogStats, LogError>;

    async fn close(&self);
}

/// Opens `LogStore` connections from the log-store fields of the settings.
#[async_trait]
pub trait LogStoreConnector: Send + Sync {
    async fn connect(&self, settings: &SystemSettings) -> Result<Arc<dyn LogStore>, LogError>;
}

pub struct LogSink {
    connector: Arc<dyn LogStoreConnector>,
    store: RwLock<Option<Arc<dyn LogStore>>>,
}

impl LogSink {
    /// Creates a disabled sink. Call [`LogSink::reconnect`] to connect it.
    pub fn new(connector: Arc<dyn LogStoreConnector>) -> Self {
        Self {
            connector,
            store: RwLock::new(None),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.store.read().is_some()
    }

    fn current(&self) -> Option<Arc<dyn LogStore>> {
        self.store.read().clone()
    }

    /// Closes any open connection and connects again with `settings`.
    ///
    /// Returns whether the sink is connected afterwards. A failure leaves the
    /// sink disabled.
    pub async fn reconnect(&self, settings: &SystemSettings) -> bool {
        let previous = self.store.write().take();
        if let Some(store) = previous {
            store.close().await;
        }

        if !settings.log_enabled {
            info!("Call logging disabled in system settings");
            return false;
        }

        match self.connector.connect(settings).await {
            Ok(store) => {
                info!(
                    "Log store connected: {}/{}",
                    settings.mongodb_database, settings.mongodb_collection
                );
                // A concurrent reconnect may have stored its own connection
                // since the take above; close whichever one this displaces.
                let displaced = self.store.write().replace(store);
                if let Some(old) = displaced {
                    old.close().await;
                }
                true
            }
            Err(e) => {
                warn!("Log store connection failed: {}", e);
                false
            }
        }
    }

    /// Writes one record. Never fails.
    pub async fn record(&self, log: CallLog) -> LogOutcome {
        let Some(store) = self.current() else {
            debug!("Log sink disabled, dropping record {}", log.request_id);
            return LogOutcome::Skipped;
        };

        match store.insert(&log).await {
            Ok(()) => LogOutcome::Recorded,
            Err(e) => {
                warn!("Failed to record call log {}: {}", log.request_id, e);
                LogOutcome::Failed(e.to_string())
            }
        }
    }

    /// Logs matching `query`, or none when disabled or on a store fault.
    pub async fn query(&self, query: &LogQuery) -> Vec<CallLog> {
        let Some(store) = self.current() else {
            return Vec::new();
        };

        store.query(query).await.unwrap_or_else(|e| {
            warn!("Failed to query call logs: {}", e);
            Vec::new()
        })
    }

    /// Aggregate statistics, zeroed when disabled or on a store fault.
    pub async fn stats(&self) -> LogStats {
        let Some(store) = self.current() else {
            return LogStats::default();
        };

        store.stats().await.unwrap_or_else(|e| {
            warn!("Failed to compute call log statistics: {}", e);
            LogStats::default()
        })
    }
}

//------------------------------------------------------------------------------
// MongoDB
//------------------------------------------------------------------------------

const SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Connects to MongoDB and verifies the server with a `ping`.
pub struct MongoConnector;

#[async_trait]
impl LogStoreConnector for MongoConnector {
    async fn connect(&self, settings: &SystemSettings) -> Result<Arc<dyn LogStore>, LogError> {
        let mut options = ClientOptions::parse(&settings.mongodb_url).await?;
        options.server_selection_timeout = Some(SERVER_SELECTION_TIMEOUT);
        options.app_name = Some("prompt-gateway".to_string());

        let client = Client::with_options(options)?;
        client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await?;

        let collection = client
            .database(&settings.mongodb_database)
            .collection::<LogDocument>(&settings.mongodb_collection);

        Ok(Arc::new(MongoLogStore { client, collection }))
    }
}

pub struct MongoLogStore {
    client: Client,
    collection: Collection<LogDocument>,
}

// On-disk shape of a call log. Timestamps are BSON dates so range filters and
// sorting happen in the store.
#[derive(Debug, Serialize, Deserialize)]
struct LogDocument {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    id: Option<ObjectId>,
    timestamp: bson::DateTime,
    config_name: String,
    #[serde(default = "bson_null")]
    request_data: Bson,
    #[serde(default = "bson_null")]
    response_data: Bson,
    success: bool,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    execution_time_ms: f64,
    #[serde(default)]
    ip_address: String,
    #[serde(default)]
    user_agent: String,
    request_id: String,
}

fn bson_null() -> Bson {
    Bson::Null
}

fn to_bson_datetime(at: DateTime<Utc>) -> bson::DateTime {
    bson::DateTime::from_millis(at.timestamp_millis())
}

impl LogDocument {
    fn from_log(log: &CallLog) -> Result<Self, LogError> {
        Ok(Self {
            id: None,
            timestamp: to_bson_datetime(log.timestamp),
            config_name: log.config_name.clone(),
            request_data: bson::to_bson(&log.request_data)?,
            response_data: bson::to_bson(&log.response_data)?,
            success: log.success,
            error_message: log.error_message.clone(),
            execution_time_ms: log.execution_time_ms,
            ip_address: log.ip_address.clone(),
            user_agent: log.user_agent.clone(),
            request_id: log.request_id.clone(),
        })
    }

    fn into_log(self) -> CallLog {
        CallLog {
            id: self.id.map(|id| id.to_hex()),
            timestamp: DateTime::from_timestamp_millis(self.timestamp.timestamp_millis())
                .unwrap_or_default(),
            config_name: self.config_name,
            request_data: self.request_data.into_relaxed_extjson(),
            response_data: self.response_data.into_relaxed_extjson(),
            success: self.success,
            error_message: self.error_message,
            execution_time_ms: self.execution_time_ms,
            ip_address: self.ip_address,
            user_agent: self.user_agent,
            request_id: self.request_id,
        }
    }
}

fn build_filter(query: &LogQuery) -> Document {
    let mut filter = Document::new();
    if let Some(name) = &query.config_name {
        filter.insert("config_name", name.as_str());
    }

    let mut range = Document::new();
    if let Some(start) = query.start_date {
        range.insert("$gte", to_bson_datetime(start));
    }
    if let Some(end) = query.end_date {
        range.insert("$lte", to_bson_datetime(end));
    }
    if !range.is_empty() {
        filter.insert("timestamp", range);
    }
    filter
}

fn stats_pipeline() -> Vec<Document> {
    vec![doc! {
        "$group": {
            "_id": "$config_name",
            "count": { "$sum": 1 },
            "success_count": { "$sum": { "$cond": ["$success", 1, 0] } },
            "error_count": { "$sum": { "$cond": ["$success", 0, 1] } },
        }
    }]
}

#[async_trait]
impl LogStore for MongoLogStore {
    async fn insert(&self, log: &CallLog) -> Result<(), LogError> {
        let document = LogDocument::from_log(log)?;
        self.collection.insert_one(document, None).await?;
        Ok(())
    }

    async fn query(&self, query: &LogQuery) -> Result<Vec<CallLog>, LogError> {
        let options = FindOptions::builder()
            .sort(doc! { "timestamp": -1 })
            .skip(query.skip)
            .limit(query.limit)
            .build();

        let mut cursor = self.collection.find(build_filter(query), options).await?;
        let mut logs = Vec::new();
        while let Some(document) = cursor.try_next().await? {
            logs.push(document.into_log());
        }
        Ok(logs)
    }

    async fn stats(&self) -> Result<LogStats, LogError> {
        let total = self.collection.count_documents(doc! {}, None).await?;
        let success = self
            .collection
            .count_documents(doc! { "success": true }, None)
            .await?;
        let errors = self
            .collection
            .count_documents(doc! { "success": false }, None)
            .await?;

        let mut cursor = self.collection.aggregate(stats_pipeline(), None).await?;
        let mut config_stats = Vec::new();
        while let Some(group) = cursor.try_next().await? {
            config_stats.push(bson::from_document::<ConfigStats>(group)?);
        }

        Ok(LogStats::new(total, success, errors, config_stats))
    }

    async fn close(&self) {
        self.client.clone().shutdown().await;
    }
}
