//! The spec tree: a hierarchical, inheritance-aware declaration of an
//! executable environment matrix. Constructed once at load time and
//! read-only thereafter.

use crate::interpreter::Interpreter;

/// One node of the spec tree. Attributes are passed down to children;
/// children override `name`, `command` and `pys` and merge `pkgs`/`env`
/// (nearest-to-leaf value wins per key).
#[derive(Debug, Default, Clone)]
pub struct SpecNode {
    /// Instance name; inherited by children unless overridden.
    pub name: Option<String>,
    /// Command template; inherited by children unless overridden.
    pub command: Option<String>,
    /// Interpreter hints. Empty means "inherit the parent's choice".
    pub pys: Vec<Interpreter>,
    /// Own package constraint lists, in declaration order. A `None`
    /// constraint cancels the package inherited from an ancestor.
    pub pkgs: Vec<(String, Vec<Option<String>>)>,
    /// Own environment variable value lists, in declaration order.
    pub env: Vec<(String, Vec<String>)>,
    /// Child specs.
    pub venvs: Vec<SpecNode>,
    /// Installation boundary: this node owns a physical virtualenv.
    pub create: bool,
    /// Skip the editable install of the local project at this boundary.
    pub skip_dev_install: bool,
}

impl SpecNode {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }
}
