//! Serde schema for the spec file.
//!
//! The file declares a tree of nested venv specs. Most fields accept both a
//! scalar and a list of scalars; singletons are normalized to one-element
//! lists by the loader. Key order of `pkgs` and `env` maps is significant
//! (it drives enumeration order and fingerprints), hence `IndexMap`.

use indexmap::IndexMap;
use serde::Deserialize;

/// Top-level document: `venv:` holds the root of the spec tree.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpecFile {
    pub venv: VenvSchema,
}

/// One node of the spec tree as written in the file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct VenvSchema {
    /// Instance name. Overrides the parent value.
    pub name: Option<String>,
    /// Command template. Overrides the parent value. May contain the
    /// `{cmdargs}` placeholder for extra CLI arguments.
    pub command: Option<String>,
    /// Interpreter hints: versions ("3.11"), executable names or paths.
    pub pys: Option<OneOrMany<Scalar>>,
    /// Package -> version constraint(s). A null constraint drops the
    /// package inherited from an ancestor; an empty string means
    /// unconstrained.
    pub pkgs: Option<IndexMap<String, OneOrMany<Option<Scalar>>>>,
    /// Environment variable -> value(s).
    pub env: Option<IndexMap<String, OneOrMany<Scalar>>>,
    /// Child specs inheriting from this node.
    pub venvs: Option<Vec<VenvSchema>>,
    /// Installation boundary: this node owns its own virtualenv.
    pub create: bool,
    /// Skip the editable install of the local project at this boundary.
    pub skip_dev_install: bool,
}

/// A scalar or a list of scalars.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(value) => vec![value],
            OneOrMany::Many(values) => values,
        }
    }
}

/// YAML scalar accepted where a string is expected. Bare numbers are
/// allowed for convenience (`pys: [3]`), though quoted strings are the
/// reliable spelling ("3.10" as a float would lose its trailing zero).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Scalar {
    pub fn into_string(self) -> String {
        match self {
            Scalar::Str(s) => s,
            Scalar::Int(i) => i.to_string(),
            Scalar::Float(f) => f.to_string(),
            Scalar::Bool(b) => b.to_string(),
        }
    }
}
