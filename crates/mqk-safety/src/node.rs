//! Language-independent structural view of a plugin source.
//!
//! A frontend lowers its own syntax tree into a flat, source-ordered list of
//! these nodes. The safety rules only ever see this enumeration.

use mqk_schemas::SourceLocation;

/// How the root name of an assignment target is bound at the point of the
/// assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    /// Assigned inside the current function.
    Local,
    /// Parameter of the current function (bound by the caller).
    Parameter,
    /// Bound at module level.
    ModuleLevel,
    /// Bound in an enclosing function (closure state).
    Enclosing,
    /// Bound by an import statement.
    Imported,
    /// Named in a `global` / `nonlocal` declaration of the current function.
    DeclaredOuter,
    /// Not bound anywhere in the source (a builtin or an undefined name).
    Unbound,
    /// The target has no root name (`f().x = ...`).
    Computed,
}

/// Shape of the assignment target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetShape {
    /// Plain name rebinding.
    Name,
    /// Attribute store (`a.b = ...`).
    Attribute,
    /// Item store (`a[i] = ...`).
    Subscript,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructuralNode {
    Import {
        module: String,
        location: SourceLocation,
    },
    Call {
        /// Dotted callee path when statically known (`eval`, `importlib.import_module`).
        callee: Option<String>,
        location: SourceLocation,
    },
    AttributeAccess {
        attr: String,
        location: SourceLocation,
    },
    Assignment {
        /// Rendered target, for diagnostics.
        target: String,
        shape: TargetShape,
        root: Option<String>,
        binding: Binding,
        in_function: bool,
        location: SourceLocation,
    },
}

impl StructuralNode {
    pub fn location(&self) -> SourceLocation {
        match self {
            StructuralNode::Import { location, .. }
            | StructuralNode::Call { location, .. }
            | StructuralNode::AttributeAccess { location, .. }
            | StructuralNode::Assignment { location, .. } => *location,
        }
    }
}
