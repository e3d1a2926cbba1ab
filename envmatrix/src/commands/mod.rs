pub mod generate;
pub mod list;
pub mod requirements;
pub mod run;
pub mod shell;

use anyhow::{Context, Result};
use regex::Regex;

pub(crate) fn compile_pattern(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).with_context(|| format!("invalid pattern '{pattern}'"))
}
