use anyhow::Result;

use envmatrix_core::interpreter::HostResolver;
use envmatrix_core::process::ShellRunner;
use envmatrix_core::Session;

use super::compile_pattern;

pub fn generate(
    session: &Session,
    pattern: &str,
    pythons: &[String],
    recreate_venvs: bool,
    skip_base_install: bool,
) -> Result<()> {
    let pattern = compile_pattern(pattern)?;
    session.generate_base_venvs(
        &pattern,
        &HostResolver,
        &ShellRunner::from_env(),
        recreate_venvs,
        skip_base_install,
        pythons,
    )?;
    Ok(())
}
