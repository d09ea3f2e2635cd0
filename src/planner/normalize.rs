//! Post-processing of the assembled upstream operation.
//!
//! The printed document is re-parsed against the configured engine schema,
//! rewritten when the planner is nested, normalized and printed again. The
//! re-parse is type-aware but the document is not validated as a whole:
//! field-argument variables are reused by name without a definition and
//! only turn into placeholders afterwards.
use std::collections::HashSet;

use apollo_compiler::ast;
use apollo_compiler::executable;
use apollo_compiler::validation::Valid;
use apollo_compiler::ExecutableDocument;
use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::Schema;

use crate::error::PlanError;
use crate::upstream;

pub(crate) struct NormalizeOptions {
    /// Extract literal argument values of named operations into variables.
    pub(crate) extract_variables: bool,
    /// Inline fragment spreads and drop the fragment definitions.
    pub(crate) remove_fragment_definitions: bool,
    /// Drop variable definitions no selection references.
    pub(crate) remove_unused_variables: bool,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        NormalizeOptions {
            extract_variables: true,
            remove_fragment_definitions: true,
            remove_unused_variables: true,
        }
    }
}

pub(crate) struct NormalizedOperation {
    pub(crate) document: ExecutableDocument,
    /// Values extracted from literal arguments, keyed by generated variable
    /// name. Only named operations are extracted from.
    pub(crate) extracted_variables: serde_json::Map<String, serde_json::Value>,
}

/// Parses the engine schema SDL. Built-in scalars and introspection types
/// are supplied by the parser, which stands in for the base-schema merge.
pub(crate) fn parse_definition(sdl: &str) -> Result<Schema, PlanError> {
    Schema::parse(sdl, "definition.graphql").map_err(|invalid| PlanError::Parse {
        document: "definition",
        reason: invalid.errors.to_string(),
    })
}

/// Retargets the schema's query root to `root_type_name` when the planner
/// is nested and the query type does not declare `root_field_name`. Without
/// the rewrite, re-parsing a nested upstream operation fails because its
/// root field does not exist on the original query type. Returns whether
/// the schema was rewritten.
pub(crate) fn replace_query_type(
    definition: &mut Schema,
    is_nested: bool,
    root_field_name: &str,
    root_type_name: &str,
) -> Result<bool, PlanError> {
    if !is_nested {
        return Ok(false);
    }
    let Some(query_name) = definition
        .schema_definition
        .query
        .as_ref()
        .map(|q| q.name.clone())
    else {
        return Ok(false);
    };
    let Some(apollo_compiler::schema::ExtendedType::Object(query_type)) =
        definition.types.get(&query_name)
    else {
        return Ok(false);
    };
    if query_type.fields.contains_key(root_field_name) {
        return Ok(false);
    }

    definition.types.shift_remove(&query_name);
    let root = Name::new(root_type_name)
        .map_err(|_| PlanError::InvalidName(root_type_name.to_string()))?;
    definition.schema_definition.make_mut().query = Some(root.into());
    Ok(true)
}

/// Re-parses the printed upstream operation against the definition.
pub(crate) fn parse_operation(
    definition: &Valid<Schema>,
    printed: &str,
) -> Result<ExecutableDocument, PlanError> {
    ExecutableDocument::parse(definition, printed, "operation.graphql").map_err(|invalid| {
        PlanError::Parse {
            document: "operation",
            reason: invalid.errors.to_string(),
        }
    })
}

pub(crate) fn normalize(
    mut document: ExecutableDocument,
    options: &NormalizeOptions,
) -> Result<NormalizedOperation, PlanError> {
    let mut extracted_variables = serde_json::Map::new();

    if options.remove_fragment_definitions {
        let fragments = std::mem::take(&mut document.fragments);
        for operation in operations_mut(&mut document) {
            let operation = operation.make_mut();
            inline_spreads(&mut operation.selection_set, &fragments)?;
        }
    }

    if options.extract_variables {
        let named: Vec<Name> = document.operations.named.keys().cloned().collect();
        for name in named {
            if let Some(operation) = document.operations.named.get_mut(&name) {
                extract_operation_variables(operation.make_mut(), &mut extracted_variables)?;
            }
        }
    }

    if options.remove_unused_variables {
        for operation in operations_mut(&mut document) {
            let operation = operation.make_mut();
            let mut used = HashSet::new();
            collect_used_variables(&operation.selection_set, &mut used);
            operation
                .variables
                .retain(|definition| used.contains(definition.name.as_str()));
        }
    }

    Ok(NormalizedOperation {
        document,
        extracted_variables,
    })
}

fn operations_mut(
    document: &mut ExecutableDocument,
) -> impl Iterator<Item = &mut Node<executable::Operation>> {
    document
        .operations
        .anonymous
        .iter_mut()
        .chain(document.operations.named.values_mut())
}

fn inline_spreads(
    set: &mut executable::SelectionSet,
    fragments: &apollo_compiler::collections::IndexMap<Name, Node<executable::Fragment>>,
) -> Result<(), PlanError> {
    let selections = std::mem::take(&mut set.selections);
    for selection in selections {
        match selection {
            executable::Selection::FragmentSpread(spread) => {
                let fragment = fragments.get(&spread.fragment_name).ok_or_else(|| {
                    PlanError::Normalization(format!(
                        "fragment {} is not defined",
                        spread.fragment_name
                    ))
                })?;
                let mut inline = executable::InlineFragment {
                    type_condition: Some(fragment.selection_set.ty.clone()),
                    directives: Default::default(),
                    selection_set: fragment.selection_set.clone(),
                };
                inline_spreads(&mut inline.selection_set, fragments)?;
                set.selections
                    .push(executable::Selection::InlineFragment(Node::new(inline)));
            }
            executable::Selection::Field(mut field) => {
                inline_spreads(&mut field.make_mut().selection_set, fragments)?;
                set.selections.push(executable::Selection::Field(field));
            }
            executable::Selection::InlineFragment(mut fragment) => {
                inline_spreads(&mut fragment.make_mut().selection_set, fragments)?;
                set.selections
                    .push(executable::Selection::InlineFragment(fragment));
            }
        }
    }
    Ok(())
}

fn extract_operation_variables(
    operation: &mut executable::Operation,
    extracted: &mut serde_json::Map<String, serde_json::Value>,
) -> Result<(), PlanError> {
    let mut taken: HashSet<String> = operation
        .variables
        .iter()
        .map(|definition| definition.name.to_string())
        .collect();
    let mut new_definitions = Vec::new();
    extract_in_set(
        &mut operation.selection_set,
        &mut taken,
        &mut new_definitions,
        extracted,
    )?;
    operation.variables.extend(new_definitions);
    Ok(())
}

fn extract_in_set(
    set: &mut executable::SelectionSet,
    taken: &mut HashSet<String>,
    definitions: &mut Vec<Node<ast::VariableDefinition>>,
    extracted: &mut serde_json::Map<String, serde_json::Value>,
) -> Result<(), PlanError> {
    for selection in &mut set.selections {
        match selection {
            executable::Selection::Field(field) => {
                let field = field.make_mut();
                let argument_definitions = field.definition.arguments.clone();
                for argument in &mut field.arguments {
                    if value_contains_variable(&argument.value) {
                        continue;
                    }
                    let Some(ty) = argument_definitions
                        .iter()
                        .find(|definition| definition.name == argument.name)
                        .map(|definition| definition.ty.clone())
                    else {
                        continue;
                    };
                    let name = upstream::generate_variable_name(taken);
                    taken.insert(name.clone());
                    let variable =
                        Name::new(&name).map_err(|_| PlanError::InvalidName(name.clone()))?;
                    extracted.insert(name, ast_value_to_json(&argument.value));
                    definitions.push(Node::new(ast::VariableDefinition {
                        name: variable.clone(),
                        ty,
                        default_value: None,
                        directives: Default::default(),
                    }));
                    argument.make_mut().value = Node::new(ast::Value::Variable(variable));
                }
                extract_in_set(&mut field.selection_set, taken, definitions, extracted)?;
            }
            executable::Selection::InlineFragment(fragment) => {
                extract_in_set(
                    &mut fragment.make_mut().selection_set,
                    taken,
                    definitions,
                    extracted,
                )?;
            }
            executable::Selection::FragmentSpread(_) => {}
        }
    }
    Ok(())
}

fn value_contains_variable(value: &ast::Value) -> bool {
    match value {
        ast::Value::Variable(_) => true,
        ast::Value::List(items) => items.iter().any(|item| value_contains_variable(item)),
        ast::Value::Object(fields) => fields
            .iter()
            .any(|(_, value)| value_contains_variable(value)),
        _ => false,
    }
}

fn ast_value_to_json(value: &ast::Value) -> serde_json::Value {
    match value {
        ast::Value::Null | ast::Value::Variable(_) => serde_json::Value::Null,
        ast::Value::Enum(name) => serde_json::Value::String(name.to_string()),
        ast::Value::String(s) => serde_json::Value::String(s.clone()),
        ast::Value::Boolean(b) => serde_json::Value::Bool(*b),
        ast::Value::Int(i) => i
            .as_str()
            .parse::<i64>()
            .map(serde_json::Value::from)
            .unwrap_or(serde_json::Value::Null),
        ast::Value::Float(f) => f
            .as_str()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ast::Value::List(items) => {
            serde_json::Value::Array(items.iter().map(|item| ast_value_to_json(item)).collect())
        }
        ast::Value::Object(fields) => serde_json::Value::Object(
            fields
                .iter()
                .map(|(name, value)| (name.to_string(), ast_value_to_json(value)))
                .collect(),
        ),
    }
}

fn collect_used_variables(set: &executable::SelectionSet, used: &mut HashSet<String>) {
    for selection in &set.selections {
        match selection {
            executable::Selection::Field(field) => {
                for argument in &field.arguments {
                    collect_value_variables(&argument.value, used);
                }
                for directive in field.directives.iter() {
                    for argument in &directive.arguments {
                        collect_value_variables(&argument.value, used);
                    }
                }
                collect_used_variables(&field.selection_set, used);
            }
            executable::Selection::InlineFragment(fragment) => {
                collect_used_variables(&fragment.selection_set, used);
            }
            executable::Selection::FragmentSpread(_) => {}
        }
    }
}

fn collect_value_variables(value: &ast::Value, used: &mut HashSet<String>) {
    match value {
        ast::Value::Variable(name) => {
            used.insert(name.to_string());
        }
        ast::Value::List(items) => {
            for item in items {
                collect_value_variables(item, used);
            }
        }
        ast::Value::Object(fields) => {
            for (_, value) in fields {
                collect_value_variables(value, used);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition() -> Valid<Schema> {
        Valid::assume_valid(
            parse_definition(
                "
                type Query { user(id: Int!): User users(filter: String): [User] }
                type User { id: Int name: String }
                ",
            )
            .unwrap(),
        )
    }

    fn serialize(document: &ExecutableDocument) -> String {
        document.serialize().no_indent().to_string()
    }

    /// Compares through a parse so the assertion is independent of the
    /// serializer's whitespace choices.
    fn assert_serializes_to(document: &ExecutableDocument, expected: &str) {
        let canonical = |source: &str, path: &str| {
            ast::Document::parse(source, path.to_string())
                .expect("document must parse")
                .serialize()
                .no_indent()
                .to_string()
        };
        assert_eq!(
            canonical(&serialize(document), "actual.graphql"),
            canonical(expected, "expected.graphql"),
        );
    }

    #[test]
    fn inlines_and_removes_fragment_definitions() {
        let definition = definition();
        let document = parse_operation(
            &definition,
            "{ user(id: 1) { ...F } } fragment F on User { name }",
        )
        .unwrap();
        let normalized = normalize(document, &NormalizeOptions::default()).unwrap();
        assert!(normalized.document.fragments.is_empty());
        assert_serializes_to(
            &normalized.document,
            "{ user(id: 1) { ... on User { name } } }",
        );
    }

    #[test]
    fn removes_unused_variable_definitions() {
        let definition = definition();
        let document = parse_operation(
            &definition,
            "query($id: Int!, $unused: String) { user(id: $id) { name } }",
        )
        .unwrap();
        let normalized = normalize(document, &NormalizeOptions::default()).unwrap();
        assert_serializes_to(
            &normalized.document,
            "query($id: Int!) { user(id: $id) { name } }",
        );
    }

    #[test]
    fn extracts_literals_from_named_operations_only() {
        let definition = definition();
        let document =
            parse_operation(&definition, "query Find { users(filter: \"x\") { name } }").unwrap();
        let normalized = normalize(document, &NormalizeOptions::default()).unwrap();
        assert_serializes_to(
            &normalized.document,
            "query Find($a: String) { users(filter: $a) { name } }",
        );
        assert_eq!(normalized.extracted_variables["a"], "x");

        let document = parse_operation(&definition, "{ users(filter: \"x\") { name } }").unwrap();
        let normalized = normalize(document, &NormalizeOptions::default()).unwrap();
        assert_serializes_to(&normalized.document, "{ users(filter: \"x\") { name } }");
        assert!(normalized.extracted_variables.is_empty());
    }

    #[test]
    fn rewrites_the_query_root_for_nested_planners() {
        let mut schema = parse_definition(
            "
            type Query { serviceOne: ServiceOneResponse }
            type ServiceOneResponse { countries: [Country!]! }
            type Country { name: String! }
            ",
        )
        .unwrap();
        let replaced =
            replace_query_type(&mut schema, true, "countries", "ServiceOneResponse").unwrap();
        assert!(replaced);
        let schema = Valid::assume_valid(schema);
        let document = parse_operation(&schema, "{ countries { name } }").unwrap();
        let normalized = normalize(document, &NormalizeOptions::default()).unwrap();
        assert_serializes_to(&normalized.document, "{ countries { name } }");
    }

    #[test]
    fn keeps_the_query_root_when_the_field_exists() {
        let mut schema = parse_definition(
            "
            type Query { serviceOne: ServiceOneResponse }
            type ServiceOneResponse { countries: [Country!]! }
            type Country { name: String! }
            ",
        )
        .unwrap();
        assert!(!replace_query_type(&mut schema, true, "serviceOne", "ServiceOneResponse").unwrap());
        assert!(!replace_query_type(&mut schema, false, "countries", "ServiceOneResponse").unwrap());
    }
}
