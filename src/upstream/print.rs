//! Compact printer for the upstream document.
//!
//! The output is re-parsed and normalized before it leaves the planner, so
//! the only contract here is valid GraphQL syntax.
use std::fmt::Write;

use super::Document;
use super::OperationType;
use super::Selection;
use super::Type;
use super::Value;

impl Document {
    pub(crate) fn print(&self) -> String {
        let mut out = String::new();
        for (index, operation) in self.operations.iter().enumerate() {
            if index > 0 {
                out.push(' ');
            }
            let keyword = match operation.operation_type {
                OperationType::Query => "query",
                OperationType::Mutation => "mutation",
                OperationType::Subscription => "subscription",
            };
            let has_variables = !operation.variable_definitions.is_empty();
            if operation.operation_type != OperationType::Query || has_variables {
                out.push_str(keyword);
            }
            if has_variables {
                out.push('(');
                for (i, def) in operation.variable_definitions.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    let def = &self.variable_definitions[*def];
                    let _ = write!(out, "${}: ", def.name);
                    self.print_type(def.ty, &mut out);
                }
                out.push(')');
            }
            if operation.operation_type != OperationType::Query || has_variables {
                out.push(' ');
            }
            if let Some(set) = operation.selection_set {
                self.print_selection_set(set, &mut out);
            } else {
                out.push_str("{}");
            }
        }
        out
    }

    fn print_selection_set(&self, set: usize, out: &mut String) {
        out.push('{');
        for (i, selection) in self.selection_sets[set].selections.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            match selection {
                Selection::Field(field) => self.print_field(*field, out),
                Selection::InlineFragment(fragment) => self.print_inline_fragment(*fragment, out),
            }
        }
        out.push('}');
    }

    fn print_field(&self, field: usize, out: &mut String) {
        let field = &self.fields[field];
        out.push_str(&field.name);
        if !field.arguments.is_empty() {
            out.push('(');
            for (i, argument) in field.arguments.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                let argument = &self.arguments[*argument];
                let _ = write!(out, "{}: ", argument.name);
                print_value(&argument.value, out);
            }
            out.push(')');
        }
        if let Some(set) = field.selection_set {
            self.print_selection_set(set, out);
        }
    }

    fn print_inline_fragment(&self, fragment: usize, out: &mut String) {
        let fragment = &self.inline_fragments[fragment];
        out.push_str("...");
        if let Some(ty) = fragment.type_condition {
            out.push_str(" on ");
            self.print_type(ty, out);
        }
        if let Some(set) = fragment.selection_set {
            self.print_selection_set(set, out);
        }
    }

    fn print_type(&self, ty: usize, out: &mut String) {
        match &self.types[ty] {
            Type::Named(name) => out.push_str(name),
            Type::List(of_type) => {
                out.push('[');
                self.print_type(*of_type, out);
                out.push(']');
            }
            Type::NonNull(of_type) => {
                self.print_type(*of_type, out);
                out.push('!');
            }
        }
    }
}

fn print_value(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Int(text) | Value::Float(text) => out.push_str(text),
        Value::String(text) => out.push_str(&serde_json::Value::String(text.clone()).to_string()),
        Value::Boolean(true) => out.push_str("true"),
        Value::Boolean(false) => out.push_str("false"),
        Value::Enum(name) => out.push_str(name),
        Value::Variable(name) => {
            out.push('$');
            out.push_str(name);
        }
        Value::List(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                print_value(item, out);
            }
            out.push(']');
        }
        Value::Object(fields) => {
            out.push('{');
            for (i, (name, value)) in fields.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                let _ = write!(out, "{name}: ");
                print_value(value, out);
            }
            out.push('}');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::BuilderNode;
    use super::*;

    #[test]
    fn prints_anonymous_query_without_keyword() {
        let mut doc = Document::default();
        let op = doc.add_operation_definition(OperationType::Query);
        let set = doc.add_selection_set();
        doc.attach_selection_set(BuilderNode::Operation(op), set);
        let user = doc.add_field("user");
        let id = doc.add_argument("id", Value::Int("1".to_string()));
        doc.add_argument_to_field(user, id);
        doc.add_selection(set, Selection::Field(user));
        let inner = doc.add_selection_set();
        doc.attach_selection_set(BuilderNode::Field(user), inner);
        let name = doc.add_field("name");
        doc.add_selection(inner, Selection::Field(name));

        assert_eq!(doc.print(), "{user(id: 1){name}}");
    }

    #[test]
    fn prints_mutation_with_inline_object() {
        let mut doc = Document::default();
        let op = doc.add_operation_definition(OperationType::Mutation);
        let set = doc.add_selection_set();
        doc.attach_selection_set(BuilderNode::Operation(op), set);
        let create = doc.add_field("createUser");
        let input = doc.add_argument(
            "input",
            Value::Object(vec![(
                "name".to_string(),
                Value::String("x \"quoted\"".to_string()),
            )]),
        );
        doc.add_argument_to_field(create, input);
        doc.add_selection(set, Selection::Field(create));
        let inner = doc.add_selection_set();
        doc.attach_selection_set(BuilderNode::Field(create), inner);
        let id = doc.add_field("id");
        doc.add_selection(inner, Selection::Field(id));

        assert_eq!(
            doc.print(),
            "mutation {createUser(input: {name: \"x \\\"quoted\\\"\"}){id}}"
        );
    }

    #[test]
    fn prints_variable_definitions_and_fragments() {
        let mut doc = Document::default();
        let op = doc.add_operation_definition(OperationType::Query);
        let named = doc.add_named_type("_Any");
        let non_null = doc.add_non_null_type(named);
        let list = doc.add_list_type(non_null);
        let outer = doc.add_non_null_type(list);
        doc.add_variable_definition(op, "representations", outer);
        let set = doc.add_selection_set();
        doc.attach_selection_set(BuilderNode::Operation(op), set);
        let fragment_ty = doc.add_named_type("User");
        let fragment = doc.add_inline_fragment(Some(fragment_ty));
        doc.add_selection(set, Selection::InlineFragment(fragment));
        let inner = doc.add_selection_set();
        doc.attach_selection_set(BuilderNode::InlineFragment(fragment), inner);
        let name = doc.add_field("name");
        doc.add_selection(inner, Selection::Field(name));

        assert_eq!(
            doc.print(),
            "query($representations: [_Any!]!) {... on User{name}}"
        );
    }
}
