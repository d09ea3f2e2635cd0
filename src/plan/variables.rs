//! The variable list attached to a fetch.
//!
//! Adding a variable yields a `$$N$$` placeholder; the execution engine
//! substitutes the rendered request-time value for the placeholder in the
//! fetch input. Variables are de-duplicated structurally, so repeated
//! references share one placeholder.
use apollo_compiler::ast;

/// How a bound value is rendered into the fetch input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariableRenderer {
    /// Renders the value as a JSON string literal, for opaque JSON scalars.
    JsonString,
    /// Renders the value as a GraphQL literal of the given source type.
    Graphql { ty: String },
}

impl VariableRenderer {
    pub fn json_string() -> Self {
        VariableRenderer::JsonString
    }

    pub fn from_type(ty: &ast::Type) -> Self {
        VariableRenderer::Graphql { ty: ty.to_string() }
    }

    pub fn render(&self, value: &serde_json::Value) -> String {
        match self {
            VariableRenderer::JsonString => {
                serde_json::Value::String(value.to_string()).to_string()
            }
            VariableRenderer::Graphql { .. } => render_graphql_value(value),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableSource {
    /// Read from the request context by JSON path.
    Context,
    /// Read from the upstream object being resolved by JSON path.
    Object,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub source: VariableSource,
    pub path: Vec<String>,
    pub renderer: VariableRenderer,
}

impl Variable {
    pub fn context(path: Vec<String>, renderer: VariableRenderer) -> Self {
        Variable {
            source: VariableSource::Context,
            path,
            renderer,
        }
    }

    pub fn object(path: Vec<String>, renderer: VariableRenderer) -> Self {
        Variable {
            source: VariableSource::Object,
            path,
            renderer,
        }
    }
}

#[derive(Debug, Default)]
pub struct Variables(Vec<Variable>);

impl Variables {
    /// Adds a variable and returns its placeholder, plus whether an equal
    /// variable was already present.
    pub fn add_variable(&mut self, variable: Variable) -> (String, bool) {
        if let Some(index) = self.0.iter().position(|v| *v == variable) {
            return (placeholder(index), true);
        }
        self.0.push(variable);
        (placeholder(self.0.len() - 1), false)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn placeholder(index: usize) -> String {
    format!("$${index}$$")
}

fn render_graphql_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "null".to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(_) => value.to_string(),
        serde_json::Value::Array(items) => {
            let items: Vec<String> = items.iter().map(render_graphql_value).collect();
            format!("[{}]", items.join(", "))
        }
        serde_json::Value::Object(fields) => {
            let fields: Vec<String> = fields
                .iter()
                .map(|(name, value)| format!("{name}: {}", render_graphql_value(value)))
                .collect();
            format!("{{{}}}", fields.join(", "))
        }
    }
}
