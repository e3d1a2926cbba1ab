use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};

use envmatrix_core::interpreter::HostResolver;
use envmatrix_core::process::ShellRunner;
use envmatrix_core::runner::{RunOptions, RunReport};
use envmatrix_core::Session;

use super::compile_pattern;

pub struct RunArgs {
    pub venv_pattern: String,
    pub pythons: Vec<String>,
    pub recreate_venvs: bool,
    pub skip_base_install: bool,
    pub recompile_requirements: bool,
    pub pass_env: bool,
    pub skip_missing: bool,
    pub exit_first: bool,
    pub cmdargs: Vec<String>,
}

pub fn run(session: &Session, pattern: &str, args: RunArgs) -> Result<()> {
    let pattern = compile_pattern(pattern)?;
    let venv_pattern = compile_pattern(&args.venv_pattern)?;

    let interrupt = Arc::new(AtomicBool::new(false));
    let handler_flag = interrupt.clone();
    ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::SeqCst);
    })
    .context("installing interrupt handler")?;

    let opts = RunOptions {
        venv_pattern,
        recreate_venvs: args.recreate_venvs,
        skip_base_install: args.skip_base_install,
        recompile_requirements: args.recompile_requirements,
        pass_env: args.pass_env,
        cmdargs: args.cmdargs,
        skip_missing: args.skip_missing,
        exit_first: args.exit_first,
        pythons: args.pythons,
        interrupt,
        ..RunOptions::default()
    };

    let report = session.run(&pattern, &HostResolver, &ShellRunner::from_env(), &opts)?;
    print_summary(&report);

    if report.any_failed() {
        std::process::exit(1);
    }
    Ok(())
}

fn print_summary(report: &RunReport) {
    println!("\n-------------------summary-------------------");
    for result in &report.results {
        let mark = if !result.passed() {
            "x"
        } else if result.warned {
            "⚠"
        } else {
            "✓"
        };
        println!("{mark} {}", result.label());
    }
    println!(
        "{} passed with {} warnings, {} failed",
        report.passed(),
        report.warned(),
        report.failed()
    );
    if report.interrupted {
        println!("interrupted");
    }
}
