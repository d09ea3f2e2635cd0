//! Typed traversal of a downstream executable document.
//!
//! The walker fires enter/leave callbacks while threading the enclosing
//! type definition, mirroring how the upstream planner expects to observe
//! the document. Fragment spreads are walked through transparently, the
//! downstream operation is normalized before planning and usually has
//! none. `__typename` meta selections are not visited as fields, the
//! planner copies them per selection set instead.
use apollo_compiler::ast;
use apollo_compiler::executable;
use apollo_compiler::validation::Valid;
use apollo_compiler::ExecutableDocument;
use apollo_compiler::Node;
use apollo_compiler::Schema;

use crate::error::PlanError;
use crate::plan::FieldConfiguration;

/// The walker state visible to callbacks.
#[derive(Clone, Copy)]
pub struct Walker<'a> {
    /// The downstream operation document.
    pub operation: &'a ExecutableDocument,
    /// The downstream schema definition.
    pub definition: &'a Valid<Schema>,
    /// Field configurations of the plan.
    pub fields: &'a [FieldConfiguration],
    /// The operation definition currently being walked.
    pub operation_definition: &'a Node<executable::Operation>,
    /// Name of the type definition enclosing the current selection.
    pub enclosing_type: &'a str,
}

#[allow(unused_variables)]
pub trait Visitor {
    fn enter_document(
        &mut self,
        operation: &ExecutableDocument,
        definition: &Valid<Schema>,
    ) -> Result<(), PlanError> {
        Ok(())
    }

    fn leave_document(
        &mut self,
        operation: &ExecutableDocument,
        definition: &Valid<Schema>,
    ) -> Result<(), PlanError> {
        Ok(())
    }

    fn enter_operation_definition(
        &mut self,
        walker: &Walker<'_>,
        operation: &Node<executable::Operation>,
    ) -> Result<(), PlanError> {
        Ok(())
    }

    fn leave_operation_definition(
        &mut self,
        walker: &Walker<'_>,
        operation: &Node<executable::Operation>,
    ) -> Result<(), PlanError> {
        Ok(())
    }

    fn enter_selection_set(
        &mut self,
        walker: &Walker<'_>,
        set: &executable::SelectionSet,
    ) -> Result<(), PlanError> {
        Ok(())
    }

    fn leave_selection_set(
        &mut self,
        walker: &Walker<'_>,
        set: &executable::SelectionSet,
    ) -> Result<(), PlanError> {
        Ok(())
    }

    fn enter_field(
        &mut self,
        walker: &Walker<'_>,
        field: &Node<executable::Field>,
    ) -> Result<(), PlanError> {
        Ok(())
    }

    fn enter_argument(
        &mut self,
        walker: &Walker<'_>,
        field: &Node<executable::Field>,
        argument: &Node<ast::Argument>,
    ) -> Result<(), PlanError> {
        Ok(())
    }

    fn leave_field(
        &mut self,
        walker: &Walker<'_>,
        field: &Node<executable::Field>,
    ) -> Result<(), PlanError> {
        Ok(())
    }

    fn enter_inline_fragment(
        &mut self,
        walker: &Walker<'_>,
        fragment: &Node<executable::InlineFragment>,
    ) -> Result<(), PlanError> {
        Ok(())
    }

    fn leave_inline_fragment(
        &mut self,
        walker: &Walker<'_>,
        fragment: &Node<executable::InlineFragment>,
    ) -> Result<(), PlanError> {
        Ok(())
    }
}

/// Walks every operation of the document, halting on the first error.
pub fn walk<V: Visitor>(
    visitor: &mut V,
    operation: &ExecutableDocument,
    definition: &Valid<Schema>,
    fields: &[FieldConfiguration],
) -> Result<(), PlanError> {
    visitor.enter_document(operation, definition)?;
    let definitions = operation
        .operations
        .anonymous
        .iter()
        .chain(operation.operations.named.values());
    for operation_definition in definitions {
        let walker = Walker {
            operation,
            definition,
            fields,
            operation_definition,
            enclosing_type: operation_definition.selection_set.ty.as_str(),
        };
        visitor.enter_operation_definition(&walker, operation_definition)?;
        walk_selection_set(visitor, &walker, &operation_definition.selection_set)?;
        visitor.leave_operation_definition(&walker, operation_definition)?;
    }
    visitor.leave_document(operation, definition)
}

fn walk_selection_set<V: Visitor>(
    visitor: &mut V,
    walker: &Walker<'_>,
    set: &executable::SelectionSet,
) -> Result<(), PlanError> {
    let walker = Walker {
        enclosing_type: set.ty.as_str(),
        ..*walker
    };
    visitor.enter_selection_set(&walker, set)?;
    for selection in &set.selections {
        match selection {
            executable::Selection::Field(field) => {
                if field.name.as_str() == "__typename" {
                    continue;
                }
                visitor.enter_field(&walker, field)?;
                for argument in &field.arguments {
                    visitor.enter_argument(&walker, field, argument)?;
                }
                if !field.selection_set.selections.is_empty() {
                    walk_selection_set(visitor, &walker, &field.selection_set)?;
                }
                visitor.leave_field(&walker, field)?;
            }
            executable::Selection::InlineFragment(fragment) => {
                visitor.enter_inline_fragment(&walker, fragment)?;
                walk_selection_set(visitor, &walker, &fragment.selection_set)?;
                visitor.leave_inline_fragment(&walker, fragment)?;
            }
            executable::Selection::FragmentSpread(spread) => {
                let fragment = walker
                    .operation
                    .fragments
                    .get(&spread.fragment_name)
                    .ok_or_else(|| {
                        PlanError::Internal(format!(
                            "fragment {} is not defined",
                            spread.fragment_name
                        ))
                    })?;
                walk_selection_set(visitor, &walker, &fragment.selection_set)?;
            }
        }
    }
    visitor.leave_selection_set(&walker, set)
}
