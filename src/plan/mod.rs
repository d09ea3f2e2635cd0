//! The planning-framework surface the datasource consumes and exposes.
use std::sync::Arc;

use crate::plan::variables::Variables;
use crate::source::Source;

pub mod variables;
pub mod walker;

/// Where a configured field argument takes its value from at resolve time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentSource {
    /// The argument on the downstream field.
    FieldArgument,
    /// A field of the enclosing response object.
    ObjectField,
}

#[derive(Debug, Clone)]
pub struct ArgumentConfiguration {
    pub name: String,
    pub source: ArgumentSource,
    pub source_path: Vec<String>,
}

/// Per-(type, field) planning configuration, including the upstream path
/// remapping and the argument sources.
#[derive(Debug, Clone)]
pub struct FieldConfiguration {
    pub type_name: String,
    pub field_name: String,
    pub path: Vec<String>,
    pub arguments: Vec<ArgumentConfiguration>,
}

impl FieldConfiguration {
    pub(crate) fn for_type_field<'a>(
        fields: &'a [FieldConfiguration],
        type_name: &str,
        field_name: &str,
    ) -> Option<&'a FieldConfiguration> {
        fields
            .iter()
            .find(|f| f.type_name == type_name && f.field_name == field_name)
    }
}

/// What the planner receives at registration: the datasource-specific
/// configuration blob plus the field configurations of the plan.
#[derive(Debug, Clone)]
pub struct DataSourceConfiguration {
    pub custom: serde_json::Value,
    pub fields: Vec<FieldConfiguration>,
}

#[derive(Debug, Clone, Copy)]
pub struct DataSourcePlanningBehavior {
    pub merge_aliased_root_nodes: bool,
    pub override_field_path_from_alias: bool,
}

/// The fetch the execution engine performs for one plan.
pub struct FetchConfiguration {
    /// `{"query": ..., "variables": ...}` with `$$N$$` placeholders.
    pub input: String,
    pub source: Arc<Source>,
    pub variables: Variables,
    pub disallow_single_flight: bool,
    pub extract_graphql_response: bool,
}

/// Subscription counterpart of [`FetchConfiguration`]. The database engine
/// has no subscription transport, so no data source is attached.
pub struct SubscriptionConfiguration {
    pub input: String,
    pub variables: Variables,
}
