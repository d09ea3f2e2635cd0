//! The query planner: a visitor over the downstream operation that builds
//! the equivalent upstream operation for the query engine.
use std::sync::Arc;

use apollo_compiler::ast;
use apollo_compiler::executable;
use apollo_compiler::validation::Valid;
use apollo_compiler::ExecutableDocument;
use apollo_compiler::Node;
use apollo_compiler::Schema;
use tokio_util::sync::CancellationToken;

use crate::config::Configuration;
use crate::engine::lazy::EngineRegistry;
use crate::error::PlanError;
use crate::plan::variables::Variable;
use crate::plan::variables::VariableRenderer;
use crate::plan::variables::Variables;
use crate::plan::walker;
use crate::plan::walker::Walker;
use crate::plan::ArgumentConfiguration;
use crate::plan::ArgumentSource;
use crate::plan::DataSourceConfiguration;
use crate::plan::DataSourcePlanningBehavior;
use crate::plan::FetchConfiguration;
use crate::plan::FieldConfiguration;
use crate::plan::SubscriptionConfiguration;
use crate::source::Source;
use crate::upstream;
use crate::upstream::BuilderNode;
use crate::upstream::OperationType;
use crate::upstream::Selection;

mod normalize;

use normalize::normalize;
use normalize::parse_definition;
use normalize::parse_operation;
use normalize::replace_query_type;
use normalize::NormalizeOptions;

/// A downstream variable the planner chose to inline textually. Its `$name`
/// occurrence in the printed query is replaced with a placeholder from the
/// variable list.
#[derive(Debug)]
struct InlinedVariable {
    name: String,
    ty: Node<ast::Type>,
    is_json: bool,
}

/// Translates one downstream operation into an upstream operation.
///
/// A planner is single-use: it is handed out by [`PlannerFactory`] for one
/// plan phase and must not be shared across plans.
pub struct Planner {
    registry: Arc<EngineRegistry>,
    config: Configuration,
    fields: Arc<Vec<FieldConfiguration>>,
    is_nested: bool,

    upstream: upstream::Document,
    nodes: Vec<BuilderNode>,
    upstream_variables: Option<String>,
    variables: Variables,
    inlined_variables: Vec<InlinedVariable>,
    disallow_single_flight: bool,

    root_type_name: String,
    root_field_name: String,
    last_field_enclosing_type: String,

    inside_json_field: bool,
    json_field_depth: usize,
}

impl Planner {
    fn new(registry: Arc<EngineRegistry>) -> Self {
        Planner {
            registry,
            config: Configuration::default(),
            fields: Arc::new(Vec::new()),
            is_nested: false,
            upstream: upstream::Document::default(),
            nodes: Vec::new(),
            upstream_variables: None,
            variables: Variables::default(),
            inlined_variables: Vec::new(),
            disallow_single_flight: false,
            root_type_name: String::new(),
            root_field_name: String::new(),
            last_field_enclosing_type: String::new(),
            inside_json_field: false,
            json_field_depth: 0,
        }
    }

    /// Ingests the datasource configuration blob and the field
    /// configurations of the plan. `is_nested` flags that the planner's
    /// root field is not on the schema's query type.
    pub fn register(
        &mut self,
        configuration: DataSourceConfiguration,
        is_nested: bool,
    ) -> Result<(), PlanError> {
        self.config = serde_json::from_value(configuration.custom)?;
        if self.config.close_timeout_seconds == 0 {
            self.config.close_timeout_seconds = 10;
        }
        self.fields = Arc::new(configuration.fields);
        self.is_nested = is_nested;
        Ok(())
    }

    pub fn data_source_planning_behavior(&self) -> DataSourcePlanningBehavior {
        DataSourcePlanningBehavior {
            merge_aliased_root_nodes: true,
            override_field_path_from_alias: false,
        }
    }

    /// Walks the downstream operation and assembles the upstream document.
    pub fn plan(
        &mut self,
        operation: &ExecutableDocument,
        definition: &Valid<Schema>,
    ) -> Result<(), PlanError> {
        let fields = Arc::clone(&self.fields);
        walker::walk(self, operation, definition, &fields)
    }

    /// When the downstream query re-uses one upstream path from differently
    /// named root fields, the downstream field name becomes the upstream
    /// alias so the response post-processor can route correctly.
    pub fn downstream_response_field_alias(
        &self,
        walker: &Walker<'_>,
        field: &Node<executable::Field>,
    ) -> Option<String> {
        if field.alias.is_some() {
            return None;
        }
        let field_name = field.name.as_str();
        for configuration in walker.fields {
            if configuration.type_name == walker.enclosing_type
                && configuration.field_name == field_name
                && configuration.path.len() == 1
            {
                if configuration.path[0] != field_name {
                    return Some(field_name.to_string());
                }
                break;
            }
        }
        None
    }

    /// Builds the fetch input `{"query": ..., "variables": ...}`, replacing
    /// every inlined `$name` with its variable-list placeholder.
    pub fn configure_fetch(&mut self) -> FetchConfiguration {
        let input = match self.print_operation() {
            Ok(mut query) => {
                for inlined in &self.inlined_variables {
                    let renderer = if inlined.is_json {
                        VariableRenderer::json_string()
                    } else {
                        VariableRenderer::from_type(&inlined.ty)
                    };
                    let variable = Variable::context(vec![inlined.name.clone()], renderer);
                    let (placeholder, _) = self.variables.add_variable(variable);
                    query = query.replace(&format!("${}", inlined.name), &placeholder);
                }
                format!(
                    "{{\"query\":{},\"variables\":{}}}",
                    json_string(&query),
                    self.upstream_variables.as_deref().unwrap_or("null"),
                )
            }
            Err(error) => {
                tracing::error!(%error, "building the upstream operation failed");
                format!("{{\"error\":{}}}", json_string(&error.to_string()))
            }
        };

        let engine = self.registry.engine(
            &self.config.prisma_schema,
            &self.config.wundergraph_dir,
            self.config.close_timeout(),
        );

        FetchConfiguration {
            input,
            source: Arc::new(Source::new(engine)),
            variables: std::mem::take(&mut self.variables),
            disallow_single_flight: self.disallow_single_flight,
            extract_graphql_response: true,
        }
    }

    /// The database engine has no subscription transport; only the input is
    /// assembled.
    pub fn configure_subscription(&mut self) -> SubscriptionConfiguration {
        let input = match self.print_operation() {
            Ok(query) => format!(
                "{{\"query\":{},\"variables\":{}}}",
                json_string(&query),
                self.upstream_variables.as_deref().unwrap_or("null"),
            ),
            Err(error) => format!("{{\"error\":{}}}", json_string(&error.to_string())),
        };
        SubscriptionConfiguration {
            input,
            variables: std::mem::take(&mut self.variables),
        }
    }

    /// Prints the assembled document, re-parses it against the (possibly
    /// rewritten) engine schema, normalizes and prints again.
    fn print_operation(&self) -> Result<String, PlanError> {
        let printed = self.upstream.print();
        let mut definition = parse_definition(&self.config.graphql_schema)?;
        replace_query_type(
            &mut definition,
            self.is_nested,
            &self.root_field_name,
            &self.root_type_name,
        )?;
        let definition = Valid::assume_valid(definition);
        let document = parse_operation(&definition, &printed)?;
        let normalized = normalize(document, &NormalizeOptions::default())?;
        Ok(normalized.document.serialize().no_indent().to_string())
    }

    fn add_field(&mut self, walker: &Walker<'_>, field_name: &str, is_root_field: bool) {
        let mut name = field_name.to_string();
        for configuration in walker.fields {
            let is_desired_field = configuration.type_name == self.last_field_enclosing_type
                && configuration.field_name == field_name;
            // a single-element path is a plain mapping, substitute it for the field name
            if is_desired_field && configuration.path.len() == 1 {
                name = configuration.path[0].clone();
                if is_root_field {
                    self.root_field_name = name.clone();
                }
                break;
            }
        }
        let field = self.upstream.add_field(name);
        if let Some(BuilderNode::SelectionSet(set)) = self.nodes.last().copied() {
            self.upstream.add_selection(set, Selection::Field(field));
        }
        self.nodes.push(BuilderNode::Field(field));
    }

    fn add_json_field(&mut self, field_name: &str) {
        let field = self.upstream.add_field(field_name);
        if let Some(BuilderNode::SelectionSet(set)) = self.nodes.last().copied() {
            self.upstream.add_selection(set, Selection::Field(field));
        }
    }

    fn configure_argument(
        &mut self,
        walker: &Walker<'_>,
        upstream_field: usize,
        field: &Node<executable::Field>,
        field_configuration: &FieldConfiguration,
        argument_configuration: &ArgumentConfiguration,
    ) -> Result<(), PlanError> {
        match argument_configuration.source {
            ArgumentSource::FieldArgument => self.configure_field_argument_source(
                walker,
                upstream_field,
                field,
                &argument_configuration.name,
            ),
            ArgumentSource::ObjectField => self.configure_object_field_source(
                walker,
                upstream_field,
                field,
                field_configuration,
                argument_configuration,
            ),
        }
    }

    fn configure_field_argument_source(
        &mut self,
        walker: &Walker<'_>,
        upstream_field: usize,
        field: &Node<executable::Field>,
        argument_name: &str,
    ) -> Result<(), PlanError> {
        let Some(argument) = field
            .arguments
            .iter()
            .find(|argument| argument.name.as_str() == argument_name)
        else {
            return Ok(());
        };
        let ast::Value::Variable(variable_name) = &*argument.value else {
            return self.apply_inline_field_argument(walker, upstream_field, field, argument_name);
        };
        let Some(definition) = walker
            .operation_definition
            .variables
            .iter()
            .find(|definition| definition.name == *variable_name)
        else {
            return Ok(());
        };

        // reference the declaration by name, never re-define it upstream
        let argument_ref = self.upstream.add_argument(
            argument_name,
            upstream::Value::Variable(variable_name.to_string()),
        );
        self.upstream
            .add_argument_to_field(upstream_field, argument_ref);

        self.record_inlined_variable(variable_name.as_str(), &definition.ty);
        Ok(())
    }

    fn apply_inline_field_argument(
        &mut self,
        walker: &Walker<'_>,
        upstream_field: usize,
        field: &Node<executable::Field>,
        argument_name: &str,
    ) -> Result<(), PlanError> {
        let Some(argument) = field
            .arguments
            .iter()
            .find(|argument| argument.name.as_str() == argument_name)
        else {
            return Ok(());
        };
        let imported = upstream::Value::from_ast(&argument.value);
        let argument_ref = self.upstream.add_argument(argument_name, imported);
        self.upstream
            .add_argument_to_field(upstream_field, argument_ref);
        self.record_inlined_variables_recursively(walker, &argument.value);
        Ok(())
    }

    fn record_inlined_variables_recursively(&mut self, walker: &Walker<'_>, value: &ast::Value) {
        match value {
            ast::Value::Object(fields) => {
                for (_, value) in fields {
                    self.record_inlined_variables_recursively(walker, value);
                }
            }
            ast::Value::List(items) => {
                for item in items {
                    self.record_inlined_variables_recursively(walker, item);
                }
            }
            ast::Value::Variable(variable_name) => {
                let Some(definition) = walker
                    .operation_definition
                    .variables
                    .iter()
                    .find(|definition| definition.name == *variable_name)
                else {
                    return;
                };
                let ty = definition.ty.clone();
                self.record_inlined_variable(variable_name.as_str(), &ty);
            }
            _ => {}
        }
    }

    fn record_inlined_variable(&mut self, name: &str, ty: &Node<ast::Type>) {
        let type_name = ty.inner_named_type().as_str();
        let is_json = self
            .config
            .json_input_variables
            .iter()
            .any(|json_type| json_type == type_name);
        self.inlined_variables.push(InlinedVariable {
            name: name.to_string(),
            ty: ty.clone(),
            is_json,
        });
    }

    /// The argument value comes from a field of the enclosing upstream
    /// object at resolve time: declare a fresh variable, bind it to the
    /// source path and template its placeholder into the variables blob.
    fn configure_object_field_source(
        &mut self,
        walker: &Walker<'_>,
        upstream_field: usize,
        field: &Node<executable::Field>,
        field_configuration: &FieldConfiguration,
        argument_configuration: &ArgumentConfiguration,
    ) -> Result<(), PlanError> {
        if argument_configuration.source_path.is_empty() {
            return Ok(());
        }

        let mut field_name = field.name.as_str().to_string();
        if field_configuration.path.len() == 1 {
            field_name = field_configuration.path[0].clone();
        }

        let Some(query_type_name) = walker.definition.schema_definition.query.as_ref() else {
            return Ok(());
        };
        let Some(apollo_compiler::schema::ExtendedType::Object(query_type)) =
            walker.definition.types.get(&query_type_name.name)
        else {
            return Ok(());
        };
        let Some(field_definition) = query_type.fields.get(field_name.as_str()) else {
            return Ok(());
        };
        let Some(argument_definition) = field_definition
            .arguments
            .iter()
            .find(|argument| argument.name.as_str() == argument_configuration.name)
        else {
            return Ok(());
        };

        let Some(BuilderNode::Operation(operation)) = self.nodes.first().copied() else {
            return Ok(());
        };
        let variable_name = self.upstream.generate_unused_variable_name(operation);
        let argument_ref = self.upstream.add_argument(
            &argument_configuration.name,
            upstream::Value::Variable(variable_name.clone()),
        );
        self.upstream
            .add_argument_to_field(upstream_field, argument_ref);
        let imported_type = self.upstream.import_type(&argument_definition.ty);
        self.upstream
            .add_variable_definition(operation, &variable_name, imported_type);

        let renderer = VariableRenderer::from_type(&argument_definition.ty);
        let variable = Variable::object(argument_configuration.source_path.clone(), renderer);
        let (placeholder, existed) = self.variables.add_variable(variable);
        if !existed {
            self.set_upstream_variable_raw(&variable_name, &placeholder);
        }
        Ok(())
    }

    // The placeholder is spliced unquoted, the variables member is a raw
    // template until the execution engine binds it.
    fn set_upstream_variable_raw(&mut self, name: &str, raw: &str) {
        let entry = format!("\"{name}\":{raw}");
        match &mut self.upstream_variables {
            None => self.upstream_variables = Some(format!("{{{entry}}}")),
            Some(existing) => {
                existing.pop();
                existing.push(',');
                existing.push_str(&entry);
                existing.push('}');
            }
        }
    }

    /// Wraps the current selection set in `... on <enclosing type>`.
    pub fn add_one_type_inline_fragment(&mut self) {
        let set = self.upstream.add_selection_set();
        let ty = self
            .upstream
            .add_named_type(self.last_field_enclosing_type.clone());
        let fragment = self.upstream.add_inline_fragment(Some(ty));
        self.upstream
            .attach_selection_set(BuilderNode::InlineFragment(fragment), set);
        if let Some(BuilderNode::SelectionSet(parent)) = self.nodes.last().copied() {
            self.upstream
                .add_selection(parent, Selection::InlineFragment(fragment));
        }
        self.nodes.push(BuilderNode::SelectionSet(set));
    }

    /// Adds `_entities(representations: $representations)` with an open
    /// selection set for a federated-entity plan.
    pub fn add_entities_selection_set(&mut self) {
        let representations = self.upstream.add_argument(
            "representations",
            upstream::Value::Variable("representations".to_string()),
        );
        let set = self.upstream.add_selection_set();
        let entities = self.upstream.add_field("_entities");
        self.upstream.add_argument_to_field(entities, representations);
        self.upstream
            .attach_selection_set(BuilderNode::Field(entities), set);
        if let Some(BuilderNode::SelectionSet(parent)) = self.nodes.last().copied() {
            self.upstream.add_selection(parent, Selection::Field(entities));
        }
        self.nodes.push(BuilderNode::Field(entities));
        self.nodes.push(BuilderNode::SelectionSet(set));
    }

    /// Declares `$representations: [_Any!]!` on the operation.
    pub fn add_representations_variable_definition(&mut self) {
        let Some(BuilderNode::Operation(operation)) = self.nodes.first().copied() else {
            return;
        };
        let any = self.upstream.add_named_type("_Any");
        let non_null_any = self.upstream.add_non_null_type(any);
        let list = self.upstream.add_list_type(non_null_any);
        let non_null_list = self.upstream.add_non_null_type(list);
        self.upstream
            .add_variable_definition(operation, "representations", non_null_list);
    }
}

impl walker::Visitor for Planner {
    fn enter_document(
        &mut self,
        _operation: &ExecutableDocument,
        _definition: &Valid<Schema>,
    ) -> Result<(), PlanError> {
        self.upstream.reset();
        self.nodes.clear();
        self.upstream_variables = None;
        self.variables = Variables::default();
        self.inlined_variables.clear();
        self.disallow_single_flight = false;
        self.root_type_name.clear();
        self.root_field_name.clear();
        self.last_field_enclosing_type.clear();
        self.inside_json_field = false;
        self.json_field_depth = 0;
        Ok(())
    }

    fn enter_operation_definition(
        &mut self,
        _walker: &Walker<'_>,
        operation: &Node<executable::Operation>,
    ) -> Result<(), PlanError> {
        let operation_type = if self.is_nested {
            OperationType::Query
        } else {
            operation.operation_type
        };
        let definition = self.upstream.add_operation_definition(operation_type);
        self.disallow_single_flight = operation_type == OperationType::Mutation;
        self.nodes.push(BuilderNode::Operation(definition));
        Ok(())
    }

    fn leave_operation_definition(
        &mut self,
        _walker: &Walker<'_>,
        _operation: &Node<executable::Operation>,
    ) -> Result<(), PlanError> {
        self.nodes.pop();
        Ok(())
    }

    fn enter_selection_set(
        &mut self,
        _walker: &Walker<'_>,
        set: &executable::SelectionSet,
    ) -> Result<(), PlanError> {
        if self.inside_json_field {
            return Ok(());
        }
        let Some(parent) = self.nodes.last().copied() else {
            return Err(PlanError::Internal(
                "selection set without an open parent node".to_string(),
            ));
        };
        let new_set = self.upstream.add_selection_set();
        self.upstream.attach_selection_set(parent, new_set);
        self.nodes.push(BuilderNode::SelectionSet(new_set));

        // normalization may drop __typename, re-add what the downstream selected
        for selection in &set.selections {
            if let executable::Selection::Field(field) = selection {
                if field.name.as_str() == "__typename" {
                    let type_name_field = self.upstream.add_field("__typename");
                    self.upstream
                        .add_selection(new_set, Selection::Field(type_name_field));
                }
            }
        }
        Ok(())
    }

    fn leave_selection_set(
        &mut self,
        _walker: &Walker<'_>,
        _set: &executable::SelectionSet,
    ) -> Result<(), PlanError> {
        if self.inside_json_field {
            return Ok(());
        }
        self.nodes.pop();
        Ok(())
    }

    fn enter_inline_fragment(
        &mut self,
        _walker: &Walker<'_>,
        fragment: &Node<executable::InlineFragment>,
    ) -> Result<(), PlanError> {
        if self.inside_json_field {
            return Ok(());
        }
        let Some(type_condition) = &fragment.type_condition else {
            return Ok(());
        };
        let ty = self.upstream.add_named_type(type_condition.as_str());
        let inline = self.upstream.add_inline_fragment(Some(ty));
        if let Some(BuilderNode::SelectionSet(parent)) = self.nodes.last().copied() {
            // __typename next to the fragment lets the resolver dispatch on
            // the response's type tag
            let type_name_field = self.upstream.add_field("__typename");
            self.upstream
                .add_selection(parent, Selection::Field(type_name_field));
            self.upstream
                .add_selection(parent, Selection::InlineFragment(inline));
        }
        self.nodes.push(BuilderNode::InlineFragment(inline));
        Ok(())
    }

    fn leave_inline_fragment(
        &mut self,
        _walker: &Walker<'_>,
        _fragment: &Node<executable::InlineFragment>,
    ) -> Result<(), PlanError> {
        if self.inside_json_field {
            return Ok(());
        }
        if matches!(self.nodes.last(), Some(BuilderNode::InlineFragment(_))) {
            self.nodes.pop();
        }
        Ok(())
    }

    fn enter_field(
        &mut self,
        walker: &Walker<'_>,
        field: &Node<executable::Field>,
    ) -> Result<(), PlanError> {
        if self.inside_json_field {
            self.json_field_depth += 1;
            return Ok(());
        }

        let field_name = field.name.as_str();
        let enclosing_type = walker.enclosing_type;
        let is_json_field = self
            .config
            .json_type_fields
            .iter()
            .any(|type_field| {
                type_field.type_name == enclosing_type && type_field.field_name == field_name
            });
        if is_json_field {
            self.inside_json_field = true;
            self.json_field_depth = 0;
            self.add_json_field(field_name);
            return Ok(());
        }

        // the outermost field drives the nested-datasource schema rewrite
        let is_root_field = self.root_field_name.is_empty();
        if is_root_field {
            self.root_field_name = field_name.to_string();
        }
        if self.root_type_name.is_empty() {
            self.root_type_name = enclosing_type.to_string();
        }
        self.last_field_enclosing_type = enclosing_type.to_string();

        self.add_field(walker, field_name, is_root_field);

        let Some(BuilderNode::Field(upstream_field)) = self.nodes.last().copied() else {
            return Err(PlanError::Internal("field was not appended".to_string()));
        };
        if let Some(field_configuration) =
            FieldConfiguration::for_type_field(walker.fields, enclosing_type, field_name)
        {
            for argument_configuration in &field_configuration.arguments {
                self.configure_argument(
                    walker,
                    upstream_field,
                    field,
                    field_configuration,
                    argument_configuration,
                )?;
            }
        }
        Ok(())
    }

    fn enter_argument(
        &mut self,
        _walker: &Walker<'_>,
        _field: &Node<executable::Field>,
        _argument: &Node<ast::Argument>,
    ) -> Result<(), PlanError> {
        // arguments are configured from enter_field, nothing to do here
        Ok(())
    }

    fn leave_field(
        &mut self,
        _walker: &Walker<'_>,
        _field: &Node<executable::Field>,
    ) -> Result<(), PlanError> {
        if self.inside_json_field {
            if self.json_field_depth == 0 {
                self.inside_json_field = false;
            } else {
                self.json_field_depth -= 1;
            }
            return Ok(());
        }
        self.nodes.pop();
        Ok(())
    }
}

/// Hands out fresh planners wired to a process-wide engine registry. When
/// the close signal fires, every supervisor the registry spawned shuts
/// down.
pub struct PlannerFactory {
    registry: Arc<EngineRegistry>,
}

impl PlannerFactory {
    pub fn new(close_signal: CancellationToken) -> Self {
        PlannerFactory {
            registry: Arc::new(EngineRegistry::new(close_signal)),
        }
    }

    pub fn planner(&self) -> Planner {
        Planner::new(Arc::clone(&self.registry))
    }
}

fn json_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SingleTypeField;

    fn field_config(
        type_name: &str,
        field_name: &str,
        path: &[&str],
        arguments: Vec<ArgumentConfiguration>,
    ) -> FieldConfiguration {
        FieldConfiguration {
            type_name: type_name.to_string(),
            field_name: field_name.to_string(),
            path: path.iter().map(|s| s.to_string()).collect(),
            arguments,
        }
    }

    fn field_argument(name: &str) -> ArgumentConfiguration {
        ArgumentConfiguration {
            name: name.to_string(),
            source: ArgumentSource::FieldArgument,
            source_path: Vec::new(),
        }
    }

    fn parse(
        schema: &str,
        query: &str,
    ) -> (Valid<Schema>, Valid<ExecutableDocument>) {
        let schema = Schema::parse_and_validate(schema, "downstream.graphql")
            .expect("downstream schema must be valid");
        let document = ExecutableDocument::parse_and_validate(&schema, query, "operation.graphql")
            .expect("downstream operation must be valid");
        (schema, document)
    }

    fn planner_with(config: Configuration, fields: Vec<FieldConfiguration>, is_nested: bool) -> Planner {
        let factory = PlannerFactory::new(CancellationToken::new());
        let mut planner = factory.planner();
        planner
            .register(
                DataSourceConfiguration {
                    custom: config.to_json(),
                    fields,
                },
                is_nested,
            )
            .unwrap();
        planner
    }

    fn fetch_input(fetch: &FetchConfiguration) -> serde_json::Value {
        serde_json::from_str(&fetch.input).expect("fetch input must be JSON")
    }

    /// Compares two GraphQL documents structurally, independent of the
    /// serializer's whitespace choices.
    fn assert_same_graphql(actual: &str, expected: &str) {
        let actual = ast::Document::parse(actual, "actual.graphql")
            .expect("actual query must parse")
            .serialize()
            .no_indent()
            .to_string();
        let expected = ast::Document::parse(expected, "expected.graphql")
            .expect("expected query must parse")
            .serialize()
            .no_indent()
            .to_string();
        assert_eq!(actual, expected);
    }

    const USER_SCHEMA: &str = "
        type Query { user(id: Int): User }
        type User { name: String }
    ";

    #[tokio::test]
    async fn plans_a_plain_query_with_an_inline_literal() {
        let (schema, document) = parse(USER_SCHEMA, "{ user(id: 1) { name } }");
        let config = Configuration {
            graphql_schema: USER_SCHEMA.to_string(),
            ..Configuration::default()
        };
        let mut planner = planner_with(
            config,
            vec![field_config("Query", "user", &[], vec![field_argument("id")])],
            false,
        );
        planner.plan(&document, &schema).unwrap();
        assert!(planner.nodes.is_empty());

        let fetch = planner.configure_fetch();
        assert!(!fetch.disallow_single_flight);
        assert!(fetch.extract_graphql_response);
        let input = fetch_input(&fetch);
        assert_same_graphql(input["query"].as_str().unwrap(), "{ user(id: 1) { name } }");
        assert_eq!(input["variables"], serde_json::Value::Null);
        assert!(fetch.variables.is_empty());
    }

    #[tokio::test]
    async fn replaces_downstream_variables_with_placeholders() {
        let schema_sdl = "
            scalar Json
            type Query { user(id: Int!): User }
            type User { name: String meta: Meta }
            type Meta { value: String }
        ";
        let upstream_sdl = "
            scalar Json
            type Query { user(id: Int!): User }
            type User { name: String meta: Json }
        ";
        let (schema, document) = parse(
            schema_sdl,
            "query($id: Int!) { user(id: $id) { name meta { value } } }",
        );
        let config = Configuration {
            graphql_schema: upstream_sdl.to_string(),
            json_type_fields: vec![SingleTypeField {
                type_name: "User".to_string(),
                field_name: "meta".to_string(),
            }],
            ..Configuration::default()
        };
        let mut planner = planner_with(
            config,
            vec![field_config("Query", "user", &[], vec![field_argument("id")])],
            false,
        );
        planner.plan(&document, &schema).unwrap();

        // the JSON field stays a leaf in the upstream document
        let meta = planner
            .upstream
            .fields
            .iter()
            .find(|field| field.name == "meta")
            .expect("meta field is present");
        assert!(meta.selection_set.is_none());

        assert_eq!(planner.inlined_variables.len(), 1);
        assert!(!planner.inlined_variables[0].is_json);

        let fetch = planner.configure_fetch();
        let input = fetch_input(&fetch);
        let query = input["query"].as_str().unwrap();
        assert!(query.contains("user(id: $$0$$)"), "got {query}");
        assert!(!query.contains("$id"));
        assert!(query.contains("meta"));
        assert!(!query.contains("value"));
        assert_eq!(fetch.variables.len(), 1);
    }

    #[tokio::test]
    async fn marks_json_input_variables() {
        let sdl = "
            scalar Json
            type Query { find(filter: Json): String }
        ";
        let (schema, document) = parse(sdl, "query($f: Json) { find(filter: $f) }");
        let config = Configuration {
            graphql_schema: sdl.to_string(),
            json_input_variables: vec!["Json".to_string()],
            ..Configuration::default()
        };
        let mut planner = planner_with(
            config,
            vec![field_config("Query", "find", &[], vec![field_argument("filter")])],
            false,
        );
        planner.plan(&document, &schema).unwrap();
        assert!(planner.inlined_variables[0].is_json);
    }

    #[tokio::test]
    async fn mutations_disallow_single_flight_and_import_literal_objects() {
        let sdl = "
            type Query { user: User }
            type Mutation { createUser(input: UserInput): User }
            input UserInput { name: String }
            type User { id: Int }
        ";
        let (schema, document) = parse(sdl, "mutation { createUser(input: {name: \"x\"}) { id } }");
        let config = Configuration {
            graphql_schema: sdl.to_string(),
            ..Configuration::default()
        };
        let mut planner = planner_with(
            config,
            vec![field_config(
                "Mutation",
                "createUser",
                &[],
                vec![field_argument("input")],
            )],
            false,
        );
        planner.plan(&document, &schema).unwrap();
        assert!(planner.disallow_single_flight);

        let fetch = planner.configure_fetch();
        assert!(fetch.disallow_single_flight);
        let input = fetch_input(&fetch);
        assert_same_graphql(
            input["query"].as_str().unwrap(),
            "mutation { createUser(input: {name: \"x\"}) { id } }",
        );
    }

    #[tokio::test]
    async fn duplicate_variable_references_collapse_to_one_placeholder() {
        let sdl = "
            type Query { user(id: Int!): User }
            type User { name: String }
        ";
        let (schema, document) = parse(
            sdl,
            "query($id: Int!) { first: user(id: $id) { name } second: user(id: $id) { name } }",
        );
        let config = Configuration {
            graphql_schema: sdl.to_string(),
            ..Configuration::default()
        };
        let mut planner = planner_with(
            config,
            vec![field_config("Query", "user", &[], vec![field_argument("id")])],
            false,
        );
        planner.plan(&document, &schema).unwrap();
        assert_eq!(planner.inlined_variables.len(), 2);

        let fetch = planner.configure_fetch();
        assert_eq!(fetch.variables.len(), 1);
        let input = fetch_input(&fetch);
        let query = input["query"].as_str().unwrap();
        assert_eq!(query.matches("$$0$$").count(), 2);
        assert!(!query.contains("$id"));
    }

    #[tokio::test]
    async fn rewrites_single_element_field_paths() {
        let downstream = "
            type Query { firstUser(id: Int): User }
            type User { name: String }
        ";
        let upstream = "
            type Query { findFirstUser(id: Int): User }
            type User { name: String }
        ";
        let (schema, document) = parse(downstream, "{ firstUser(id: 1) { name } }");
        let config = Configuration {
            graphql_schema: upstream.to_string(),
            ..Configuration::default()
        };
        let mut planner = planner_with(
            config,
            vec![field_config(
                "Query",
                "firstUser",
                &["findFirstUser"],
                vec![field_argument("id")],
            )],
            false,
        );
        planner.plan(&document, &schema).unwrap();
        assert_eq!(planner.root_field_name, "findFirstUser");

        let fetch = planner.configure_fetch();
        let input = fetch_input(&fetch);
        assert_same_graphql(
            input["query"].as_str().unwrap(),
            "{ findFirstUser(id: 1) { name } }",
        );
    }

    #[tokio::test]
    async fn nested_planners_force_the_query_operation_type() {
        let sdl = "
            type Query { user: User }
            type Mutation { createUser: User }
            type User { id: Int }
        ";
        let (schema, document) = parse(sdl, "mutation { createUser { id } }");
        let config = Configuration {
            graphql_schema: sdl.to_string(),
            ..Configuration::default()
        };
        let mut planner = planner_with(config, Vec::new(), true);
        planner.plan(&document, &schema).unwrap();
        assert!(!planner.disallow_single_flight);
        assert_eq!(
            planner.upstream.operations[0].operation_type,
            OperationType::Query
        );
    }

    #[tokio::test]
    async fn nested_root_field_absent_from_query_type_normalizes_after_rewrite() {
        // downstream walk sees `countries` on the Query type, upstream the
        // field only exists on ServiceOneResponse
        let downstream = "
            type Query { countries: [Country!]! }
            type Country { name: String! }
        ";
        let upstream = "
            type Query { serviceOne(arg: String): ServiceOneResponse }
            type ServiceOneResponse { countries: [Country!]! }
            type Country { name: String! }
        ";
        let (schema, document) = parse(downstream, "{ countries { name } }");
        let config = Configuration {
            graphql_schema: upstream.to_string(),
            ..Configuration::default()
        };
        let mut planner = planner_with(
            config,
            vec![field_config("Query", "countries", &[], Vec::new())],
            true,
        );
        planner.plan(&document, &schema).unwrap();
        assert_eq!(planner.root_field_name, "countries");
        // the enclosing type the nested walk would have recorded
        planner.root_type_name = "ServiceOneResponse".to_string();

        let fetch = planner.configure_fetch();
        let input = fetch_input(&fetch);
        assert!(
            input.get("error").is_none(),
            "normalization failed: {}",
            fetch.input
        );
        assert_same_graphql(
            input["query"].as_str().unwrap(),
            "{ countries { name } }",
        );
    }

    #[tokio::test]
    async fn object_field_sources_declare_fresh_variables() {
        let sdl = "
            type Query { user(id: Int!): User posts(authorId: Int): [Post] }
            type User { id: Int posts: [Post] }
            type Post { title: String }
        ";
        let (schema, document) = parse(sdl, "{ posts { title } }");
        let config = Configuration {
            graphql_schema: sdl.to_string(),
            ..Configuration::default()
        };
        let mut planner = planner_with(
            config,
            vec![field_config(
                "Query",
                "posts",
                &[],
                vec![ArgumentConfiguration {
                    name: "authorId".to_string(),
                    source: ArgumentSource::ObjectField,
                    source_path: vec!["id".to_string()],
                }],
            )],
            false,
        );
        planner.plan(&document, &schema).unwrap();
        assert_eq!(planner.upstream_variables.as_deref(), Some("{\"a\":$$0$$}"));

        let fetch = planner.configure_fetch();
        // the placeholder is spliced raw, so the input is a template rather
        // than valid JSON
        assert!(
            fetch.input.ends_with("\"variables\":{\"a\":$$0$$}}"),
            "got {}",
            fetch.input
        );
        assert!(fetch.input.contains("$a: Int"), "got {}", fetch.input);
        assert!(fetch.input.contains("posts(authorId: $a)"));
        assert_eq!(fetch.variables.len(), 1);
    }

    #[tokio::test]
    async fn copies_typename_and_tags_inline_fragments() {
        let sdl = "
            type Query { node: Node }
            union Node = User | Post
            type User { name: String }
            type Post { title: String }
        ";
        let (schema, document) = parse(
            sdl,
            "{ node { __typename ... on User { name } ... on Post { title } } }",
        );
        let config = Configuration {
            graphql_schema: sdl.to_string(),
            ..Configuration::default()
        };
        let mut planner = planner_with(config, vec![field_config("Query", "node", &[], Vec::new())], false);
        planner.plan(&document, &schema).unwrap();
        assert!(planner.nodes.is_empty());

        let fetch = planner.configure_fetch();
        let input = fetch_input(&fetch);
        let query = input["query"].as_str().unwrap();
        assert!(query.contains("__typename"));
        assert!(query.contains("... on User"));
        assert!(query.contains("... on Post"));
    }

    #[tokio::test]
    async fn malformed_configuration_fails_registration() {
        let factory = PlannerFactory::new(CancellationToken::new());
        let mut planner = factory.planner();
        let error = planner
            .register(
                DataSourceConfiguration {
                    custom: serde_json::json!({"CloseTimeoutSeconds": "not a number"}),
                    fields: Vec::new(),
                },
                false,
            )
            .unwrap_err();
        assert!(matches!(error, PlanError::Configuration(_)));
    }

    #[tokio::test]
    async fn normalization_failure_yields_a_diagnostic_input() {
        let sdl = "
            type Query { user: User }
            type User { name: String }
        ";
        let (schema, document) = parse(sdl, "{ user { name } }");
        let config = Configuration {
            // the upstream schema lacks the root field and the planner is
            // not nested, so re-parsing must fail
            graphql_schema: "type Query { other: String }".to_string(),
            ..Configuration::default()
        };
        let mut planner = planner_with(config, Vec::new(), false);
        planner.plan(&document, &schema).unwrap();
        let fetch = planner.configure_fetch();
        let input = fetch_input(&fetch);
        assert!(input.get("error").is_some(), "got {}", fetch.input);
    }

    #[test]
    fn alias_is_returned_for_rewritten_sibling_paths() {
        let sdl = "
            type Query { firstUser: User secondUser: User }
            type User { name: String }
        ";
        let (schema, document) = parse(sdl, "{ firstUser { name } }");
        let fields = vec![field_config("Query", "firstUser", &["findFirstUser"], Vec::new())];
        let factory = PlannerFactory::new(CancellationToken::new());
        let planner = factory.planner();

        let operation = document.operations.get(None).unwrap();
        let walker = Walker {
            operation: &document,
            definition: &schema,
            fields: &fields,
            operation_definition: operation,
            enclosing_type: "Query",
        };
        let field = match &operation.selection_set.selections[0] {
            executable::Selection::Field(field) => field,
            _ => unreachable!(),
        };
        assert_eq!(
            planner.downstream_response_field_alias(&walker, field),
            Some("firstUser".to_string())
        );

        // identical path means no alias
        let fields = vec![field_config("Query", "firstUser", &["firstUser"], Vec::new())];
        let walker = Walker { fields: &fields, ..walker };
        assert_eq!(planner.downstream_response_field_alias(&walker, field), None);
    }

    #[tokio::test]
    async fn federation_helpers_produce_the_entities_selection() {
        let factory = PlannerFactory::new(CancellationToken::new());
        let mut planner = factory.planner();
        let operation = planner.upstream.add_operation_definition(OperationType::Query);
        planner.nodes.push(BuilderNode::Operation(operation));
        let set = planner.upstream.add_selection_set();
        planner
            .upstream
            .attach_selection_set(BuilderNode::Operation(operation), set);
        planner.nodes.push(BuilderNode::SelectionSet(set));
        planner.last_field_enclosing_type = "User".to_string();

        planner.add_representations_variable_definition();
        planner.add_entities_selection_set();
        planner.add_one_type_inline_fragment();
        let name = planner.upstream.add_field("name");
        if let Some(BuilderNode::SelectionSet(current)) = planner.nodes.last().copied() {
            planner.upstream.add_selection(current, Selection::Field(name));
        }

        assert_eq!(
            planner.upstream.print(),
            "query($representations: [_Any!]!) {_entities(representations: $representations){... on User{name}}}"
        );
    }
}
