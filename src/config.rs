//! Datasource configuration, ingested as a JSON blob at registration time.
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

const DEFAULT_CLOSE_TIMEOUT_SECONDS: u64 = 10;

/// Configuration of one database datasource.
///
/// The member names are the wire names of the gateway configuration, so a
/// blob produced for the original datasource deserializes unchanged.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Configuration {
    #[serde(rename = "DatabaseURL")]
    pub database_url: String,
    /// The Prisma datamodel the query engine is started with.
    pub prisma_schema: String,
    /// The GraphQL SDL of the engine, used to re-normalize upstream operations.
    pub graphql_schema: String,
    /// Seconds of idleness after which the engine subprocess is reaped. 0 means the default of 10.
    pub close_timeout_seconds: u64,
    /// Fields whose value is opaque JSON and must not be descended into.
    pub json_type_fields: Vec<SingleTypeField>,
    /// Input variable type names that carry opaque JSON.
    pub json_input_variables: Vec<String>,
    #[serde(rename = "WunderGraphDir")]
    pub wundergraph_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SingleTypeField {
    pub type_name: String,
    pub field_name: String,
}

impl Configuration {
    pub fn close_timeout(&self) -> Duration {
        let seconds = if self.close_timeout_seconds == 0 {
            DEFAULT_CLOSE_TIMEOUT_SECONDS
        } else {
            self.close_timeout_seconds
        };
        Duration::from_secs(seconds)
    }

    /// Serializes the configuration into the blob `Planner::register` consumes.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}
