use anyhow::Result;
use regex::Regex;

use envmatrix_core::interpreter::HostResolver;
use envmatrix_core::process::ShellRunner;
use envmatrix_core::Session;

pub fn requirements(session: &Session, ident: &str) -> Result<()> {
    let pattern = Regex::new(".*").expect("static pattern");
    let lockfile = session.compile_requirements(
        &pattern,
        &HostResolver,
        &ShellRunner::from_env(),
        ident,
    )?;
    println!("{}", lockfile.display());
    Ok(())
}
