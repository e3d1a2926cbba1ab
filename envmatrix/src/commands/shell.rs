use anyhow::Result;
use regex::Regex;

use envmatrix_core::interpreter::HostResolver;
use envmatrix_core::process::ShellRunner;
use envmatrix_core::Session;

pub fn shell(session: &Session, ident: &str, pass_env: bool) -> Result<()> {
    let pattern = Regex::new(".*").expect("static pattern");
    session.shell(
        &pattern,
        &HostResolver,
        &ShellRunner::from_env(),
        ident,
        pass_env,
    )?;
    Ok(())
}
