//! The upstream GraphQL document under construction.
//!
//! Nodes live in parallel arrays and are addressed by integer refs, so the
//! planner can append and rewire selections without touching previously
//! built nodes. Values are plain trees, they are only ever built once and
//! printed.
use std::collections::HashSet;

use apollo_compiler::ast;

mod print;

pub(crate) use ast::OperationType;

/// A ref into one of the parallel node arrays, tagged with the node kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BuilderNode {
    Operation(usize),
    SelectionSet(usize),
    Field(usize),
    InlineFragment(usize),
}

#[derive(Debug, Default)]
pub(crate) struct Document {
    pub(crate) operations: Vec<OperationDefinition>,
    pub(crate) selection_sets: Vec<SelectionSet>,
    pub(crate) fields: Vec<Field>,
    pub(crate) inline_fragments: Vec<InlineFragment>,
    pub(crate) arguments: Vec<Argument>,
    pub(crate) variable_definitions: Vec<VariableDefinition>,
    pub(crate) types: Vec<Type>,
}

#[derive(Debug)]
pub(crate) struct OperationDefinition {
    pub(crate) operation_type: OperationType,
    pub(crate) variable_definitions: Vec<usize>,
    pub(crate) selection_set: Option<usize>,
}

#[derive(Debug, Default)]
pub(crate) struct SelectionSet {
    pub(crate) selections: Vec<Selection>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Selection {
    Field(usize),
    InlineFragment(usize),
}

#[derive(Debug)]
pub(crate) struct Field {
    pub(crate) name: String,
    pub(crate) arguments: Vec<usize>,
    pub(crate) selection_set: Option<usize>,
}

#[derive(Debug)]
pub(crate) struct InlineFragment {
    pub(crate) type_condition: Option<usize>,
    pub(crate) selection_set: Option<usize>,
}

#[derive(Debug)]
pub(crate) struct Argument {
    pub(crate) name: String,
    pub(crate) value: Value,
}

#[derive(Debug)]
pub(crate) struct VariableDefinition {
    pub(crate) name: String,
    pub(crate) ty: usize,
}

#[derive(Debug)]
pub(crate) enum Type {
    Named(String),
    List(usize),
    NonNull(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Value {
    Null,
    Int(String),
    Float(String),
    String(String),
    Boolean(bool),
    Enum(String),
    Variable(String),
    List(Vec<Value>),
    Object(Vec<(String, Value)>),
}

impl Document {
    pub(crate) fn reset(&mut self) {
        self.operations.clear();
        self.selection_sets.clear();
        self.fields.clear();
        self.inline_fragments.clear();
        self.arguments.clear();
        self.variable_definitions.clear();
        self.types.clear();
    }

    pub(crate) fn add_operation_definition(&mut self, operation_type: OperationType) -> usize {
        self.operations.push(OperationDefinition {
            operation_type,
            variable_definitions: Vec::new(),
            selection_set: None,
        });
        self.operations.len() - 1
    }

    pub(crate) fn add_selection_set(&mut self) -> usize {
        self.selection_sets.push(SelectionSet::default());
        self.selection_sets.len() - 1
    }

    /// Wires a selection set to its parent node.
    pub(crate) fn attach_selection_set(&mut self, parent: BuilderNode, set: usize) {
        match parent {
            BuilderNode::Operation(r) => self.operations[r].selection_set = Some(set),
            BuilderNode::Field(r) => self.fields[r].selection_set = Some(set),
            BuilderNode::InlineFragment(r) => self.inline_fragments[r].selection_set = Some(set),
            BuilderNode::SelectionSet(_) => {}
        }
    }

    pub(crate) fn add_selection(&mut self, set: usize, selection: Selection) {
        self.selection_sets[set].selections.push(selection);
    }

    pub(crate) fn add_field(&mut self, name: impl Into<String>) -> usize {
        self.fields.push(Field {
            name: name.into(),
            arguments: Vec::new(),
            selection_set: None,
        });
        self.fields.len() - 1
    }

    pub(crate) fn add_inline_fragment(&mut self, type_condition: Option<usize>) -> usize {
        self.inline_fragments.push(InlineFragment {
            type_condition,
            selection_set: None,
        });
        self.inline_fragments.len() - 1
    }

    pub(crate) fn add_argument(&mut self, name: impl Into<String>, value: Value) -> usize {
        self.arguments.push(Argument {
            name: name.into(),
            value,
        });
        self.arguments.len() - 1
    }

    pub(crate) fn add_argument_to_field(&mut self, field: usize, argument: usize) {
        self.fields[field].arguments.push(argument);
    }

    pub(crate) fn add_named_type(&mut self, name: impl Into<String>) -> usize {
        self.types.push(Type::Named(name.into()));
        self.types.len() - 1
    }

    pub(crate) fn add_list_type(&mut self, of_type: usize) -> usize {
        self.types.push(Type::List(of_type));
        self.types.len() - 1
    }

    pub(crate) fn add_non_null_type(&mut self, of_type: usize) -> usize {
        self.types.push(Type::NonNull(of_type));
        self.types.len() - 1
    }

    pub(crate) fn add_variable_definition(
        &mut self,
        operation: usize,
        name: impl Into<String>,
        ty: usize,
    ) -> usize {
        self.variable_definitions.push(VariableDefinition {
            name: name.into(),
            ty,
        });
        let r = self.variable_definitions.len() - 1;
        self.operations[operation].variable_definitions.push(r);
        r
    }

    /// Picks a variable name that collides neither with the operation's
    /// definitions nor with any variable referenced from an argument.
    pub(crate) fn generate_unused_variable_name(&self, operation: usize) -> String {
        let mut taken: HashSet<String> = self.operations[operation]
            .variable_definitions
            .iter()
            .map(|r| self.variable_definitions[*r].name.clone())
            .collect();
        for argument in &self.arguments {
            collect_variable_names(&argument.value, &mut taken);
        }
        generate_variable_name(&taken)
    }

    /// Copies a downstream AST type into this document.
    pub(crate) fn import_type(&mut self, ty: &ast::Type) -> usize {
        match ty {
            ast::Type::Named(name) => self.add_named_type(name.as_str()),
            ast::Type::NonNullNamed(name) => {
                let inner = self.add_named_type(name.as_str());
                self.add_non_null_type(inner)
            }
            ast::Type::List(inner) => {
                let inner = self.import_type(inner);
                self.add_list_type(inner)
            }
            ast::Type::NonNullList(inner) => {
                let inner = self.import_type(inner);
                let list = self.add_list_type(inner);
                self.add_non_null_type(list)
            }
        }
    }
}

impl Value {
    /// Copies a downstream AST value, keeping variable references by name.
    pub(crate) fn from_ast(value: &ast::Value) -> Self {
        match value {
            ast::Value::Null => Value::Null,
            ast::Value::Enum(name) => Value::Enum(name.to_string()),
            ast::Value::Variable(name) => Value::Variable(name.to_string()),
            ast::Value::String(s) => Value::String(s.clone()),
            ast::Value::Float(f) => Value::Float(f.as_str().to_string()),
            ast::Value::Int(i) => Value::Int(i.as_str().to_string()),
            ast::Value::Boolean(b) => Value::Boolean(*b),
            ast::Value::List(items) => {
                Value::List(items.iter().map(|item| Value::from_ast(item)).collect())
            }
            ast::Value::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(name, value)| (name.to_string(), Value::from_ast(value)))
                    .collect(),
            ),
        }
    }
}

fn collect_variable_names(value: &Value, out: &mut HashSet<String>) {
    match value {
        Value::Variable(name) => {
            out.insert(name.clone());
        }
        Value::List(items) => {
            for item in items {
                collect_variable_names(item, out);
            }
        }
        Value::Object(fields) => {
            for (_, value) in fields {
                collect_variable_names(value, out);
            }
        }
        _ => {}
    }
}

/// Generates `a`..`z`, `aa`, `ab`, .. skipping names in `taken`.
pub(crate) fn generate_variable_name(taken: &HashSet<String>) -> String {
    for length in 1.. {
        let mut indexes = vec![0usize; length];
        loop {
            let candidate: String = indexes.iter().map(|i| (b'a' + *i as u8) as char).collect();
            if !taken.contains(&candidate) {
                return candidate;
            }
            let mut carry = true;
            for index in indexes.iter_mut().rev() {
                if carry {
                    *index += 1;
                    carry = *index == 26;
                    if carry {
                        *index = 0;
                    }
                }
            }
            if carry {
                break;
            }
        }
    }
    unreachable!("name space is unbounded")
}
