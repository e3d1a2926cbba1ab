mod cli;
mod commands;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;

use cli::{Cli, Commands};
use envmatrix_core::config::Settings;
use envmatrix_core::Session;

fn main() -> Result<()> {
    envmatrix_core::observability::init_tracing();
    let cli = Cli::parse();

    let settings = Settings::from_env();
    let session = Session::from_config_file(Path::new(&cli.file), settings)
        .with_context(|| format!("loading spec file '{}'", cli.file))?;

    match cli.command {
        Commands::List {
            pattern,
            venv_pattern,
            pythons,
            hash_only,
            json,
        } => commands::list::list(&session, &pattern, &venv_pattern, &pythons, hash_only, json),
        Commands::Generate {
            pattern,
            pythons,
            recreate_venvs,
            skip_base_install,
        } => commands::generate::generate(
            &session,
            &pattern,
            &pythons,
            recreate_venvs,
            skip_base_install,
        ),
        Commands::Run {
            pattern,
            venv_pattern,
            pythons,
            recreate_venvs,
            skip_base_install,
            recompile_requirements,
            pass_env,
            skip_missing,
            exit_first,
            cmdargs,
        } => commands::run::run(
            &session,
            &pattern,
            commands::run::RunArgs {
                venv_pattern,
                pythons,
                recreate_venvs,
                skip_base_install,
                recompile_requirements,
                pass_env,
                skip_missing,
                exit_first,
                cmdargs,
            },
        ),
        Commands::Requirements { ident } => commands::requirements::requirements(&session, &ident),
        Commands::Shell { ident, pass_env } => commands::shell::shell(&session, &ident, pass_env),
    }
}
