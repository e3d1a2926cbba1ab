use anyhow::Result;

use envmatrix_core::interpreter::HostResolver;
use envmatrix_core::Session;

use super::compile_pattern;

pub fn list(
    session: &Session,
    pattern: &str,
    venv_pattern: &str,
    pythons: &[String],
    hash_only: bool,
    json: bool,
) -> Result<()> {
    let pattern = compile_pattern(pattern)?;
    let venv_pattern = compile_pattern(venv_pattern)?;
    let entries = session.list_instances(&pattern, &venv_pattern, pythons, &HostResolver);

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    for entry in entries {
        if hash_only {
            println!("{}", entry.short_hash);
        } else {
            println!("{}", entry.line());
        }
    }
    Ok(())
}
