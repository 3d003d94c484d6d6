//! Host-facing adapter.
//!
//! An [`AzurePipeline`] is what an outer catalog talks to: it publishes the
//! selectable deployments, forwards chat requests, and reacts to lifecycle
//! hooks. Configuration and the deployment list live together in one
//! immutable [`PipelineSnapshot`]; a reload swaps the whole snapshot so a
//! reader sees either the old list or the new one, never a mix.

use crate::config::AzureConfig;
use crate::deployments::{resolve_deployments, Deployment};
use crate::error::{RelayError, Result};
use crate::forward::{Forwarded, Forwarder, LineStream};
use crate::logging::SharedLogger;
use crate::payload::Payload;

use serde_json::Value;
use std::sync::{Arc, PoisonError, RwLock};

pub const PIPELINE_NAME: &str = "Azure OpenAI: ";

#[derive(Debug)]
pub struct PipelineSnapshot {
    pub config: AzureConfig,
    pub deployments: Vec<Deployment>,
}

/// What [`AzurePipeline::pipe`] hands back to a host that only understands
/// "a document, a line iterator, or an error string". The typed error rides
/// along for hosts that want the failure kind or upstream status.
pub enum PipeOutput {
    Json(Value),
    Lines(LineStream),
    Error { message: String, error: RelayError },
}

impl std::fmt::Debug for PipeOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json(value) => f.debug_tuple("Json").field(value).finish(),
            Self::Lines(_) => f.write_str("Lines(..)"),
            Self::Error { message, error } => f
                .debug_struct("Error")
                .field("message", message)
                .field("kind", &error.kind())
                .finish(),
        }
    }
}

pub struct AzurePipeline {
    forwarder: Forwarder,
    logger: SharedLogger,
    state: RwLock<Arc<PipelineSnapshot>>,
}

impl AzurePipeline {
    pub fn new(config: AzureConfig, client: reqwest::Client, logger: SharedLogger) -> Self {
        let snapshot = build_snapshot(config, &logger);
        Self {
            forwarder: Forwarder::new(client, logger.clone()),
            logger,
            state: RwLock::new(Arc::new(snapshot)),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        PIPELINE_NAME
    }

    /// The snapshot current at the time of the call. Holding on to it keeps
    /// that configuration alive across a concurrent reload.
    #[must_use]
    pub fn snapshot(&self) -> Arc<PipelineSnapshot> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn deployments(&self) -> Vec<Deployment> {
        self.snapshot().deployments.clone()
    }

    pub fn on_startup(&self) {
        self.logger.info("pipeline", "on_startup");
    }

    pub fn on_shutdown(&self) {
        self.logger.info("pipeline", "on_shutdown");
    }

    /// Replace the configuration and rebuild the deployment list. Calls
    /// already in flight finish with the snapshot they started with.
    pub fn on_config_updated(&self, config: AzureConfig) -> Vec<Deployment> {
        let snapshot = Arc::new(build_snapshot(config, &self.logger));
        let deployments = snapshot.deployments.clone();
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = snapshot;
        deployments
    }

    /// Forward `body` to the deployment `model_id`, keeping the error kind.
    pub async fn forward(&self, model_id: &str, body: Payload) -> Result<Forwarded> {
        let snapshot = self.snapshot();
        self.forwarder.forward(model_id, &snapshot.config, body).await
    }

    /// Host entry point. `user_message` and `messages` are accepted for
    /// interface compatibility only; `body` is what gets forwarded.
    pub async fn pipe(
        &self,
        user_message: &str,
        model_id: &str,
        messages: &[Value],
        body: Payload,
    ) -> PipeOutput {
        self.logger.debug(
            "pipeline",
            format!(
                "pipe model={} messages={} user_message_len={}",
                model_id,
                messages.len(),
                user_message.len()
            ),
        );

        match self.forward(model_id, body).await {
            Ok(Forwarded::Completion(value)) => PipeOutput::Json(value),
            Ok(Forwarded::Lines(lines)) => PipeOutput::Lines(lines),
            Err(error) => PipeOutput::Error {
                message: error.pipe_message(),
                error,
            },
        }
    }
}

/// Text of the most recent `user` message. Array content contributes its
/// `text` parts, joined by newlines.
#[must_use]
pub fn last_user_message(messages: &[Value]) -> String {
    let Some(message) = messages
        .iter()
        .rev()
        .find(|m| m.get("role").and_then(Value::as_str) == Some("user"))
    else {
        return String::new();
    };

    match message.get("content") {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter(|p| p.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

fn build_snapshot(config: AzureConfig, logger: &SharedLogger) -> PipelineSnapshot {
    let deployments = resolve_deployments(&config, logger);
    PipelineSnapshot {
        config,
        deployments,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pipeline(config: AzureConfig) -> AzurePipeline {
        AzurePipeline::new(config, reqwest::Client::new(), SharedLogger::in_memory())
    }

    #[test]
    fn test_publishes_default_deployments() {
        let pipeline = pipeline(AzureConfig::default());
        let ids: Vec<_> = pipeline.deployments().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["gpt-35-turbo", "gpt-4o"]);
        assert_eq!(pipeline.name(), "Azure OpenAI: ");
    }

    #[test]
    fn test_reload_swaps_snapshot() {
        let pipeline = pipeline(AzureConfig::default());
        let before = pipeline.snapshot();

        let updated = pipeline.on_config_updated(AzureConfig {
            models: "o1".to_string(),
            model_names: "o1 preview".to_string(),
            ..AzureConfig::default()
        });

        assert_eq!(updated.len(), 1);
        assert_eq!(pipeline.deployments(), updated);
        // A snapshot taken earlier is untouched by the reload.
        assert_eq!(before.deployments.len(), 2);
        assert_eq!(pipeline.snapshot().config.models, "o1");
    }

    #[test]
    fn test_last_user_message() {
        let messages = vec![
            json!({ "role": "system", "content": "be brief" }),
            json!({ "role": "user", "content": "first" }),
            json!({ "role": "assistant", "content": "ok" }),
            json!({ "role": "user", "content": [
                { "type": "text", "text": "look at" },
                { "type": "image_url", "image_url": { "url": "https://x/y.png" } },
                { "type": "text", "text": "this" },
            ] }),
        ];
        assert_eq!(last_user_message(&messages), "look at\nthis");
        assert_eq!(last_user_message(&messages[..3]), "first");
        assert_eq!(last_user_message(&messages[..1]), "");
    }

    #[test]
    fn test_reload_with_same_config_is_stable() {
        let pipeline = pipeline(AzureConfig::default());
        let first = pipeline.deployments();
        let second = pipeline.on_config_updated(AzureConfig::default());
        assert_eq!(first, second);
    }
}
