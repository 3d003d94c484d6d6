//! Deployment catalog.
//!
//! Turns the two semicolon-delimited configuration strings into the ordered
//! list of deployments a host offers for selection.

use crate::config::AzureConfig;
use crate::logging::{LogLevel, SharedLogger};
use serde::{Deserialize, Serialize};

/// A selectable Azure deployment: the identifier used in the request path and
/// the label shown to users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: String,
    pub name: String,
}

/// Pair deployment ids with display names by position.
///
/// Both lists are split on `;` and each token is trimmed. Surplus entries in
/// the longer list are dropped.
#[must_use]
pub fn parse_deployments(models: &str, model_names: &str) -> Vec<Deployment> {
    models
        .split(';')
        .zip(model_names.split(';'))
        .map(|(id, name)| Deployment {
            id: id.trim().to_string(),
            name: name.trim().to_string(),
        })
        .collect()
}

/// Resolve the deployment list for a configuration and record it.
pub fn resolve_deployments(config: &AzureConfig, logger: &SharedLogger) -> Vec<Deployment> {
    let deployments = parse_deployments(&config.models, &config.model_names);

    let ids = config.models.split(';').count();
    let names = config.model_names.split(';').count();
    if ids != names {
        logger.debug(
            "deployments",
            format!("Deployment ids ({ids}) and names ({names}) differ in length, pairing the first {}", deployments.len()),
        );
    }

    logger.log_with_context(
        LogLevel::Info,
        "deployments",
        format!("Resolved {} deployments", deployments.len()),
        serde_json::json!({ "deployments": deployments }),
    );

    deployments
}
