//! Matrix execution: expanding the spec tree and running every matched
//! instance to completion, sequentially, in declaration order.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use regex::Regex;
use serde::Serialize;

use crate::config::{load_spec_file, Settings};
use crate::error::{Error, Result};
use crate::expand::{expand, Instance, InstanceArena};
use crate::fingerprint::{pip_deps, sanitize_ident, Selector};
use crate::interpreter::{site_packages, InterpreterResolver, ResolvedInterpreter};
use crate::materialize::{MaterializeOptions, Materializer};
use crate::nspkg::NspkgGuard;
use crate::process::{join_paths, quote_args, ProcessRunner, PATH_LIST_SEP};
use crate::spec::SpecNode;

/// Case-insensitive substrings that flag a passing run as noisy.
pub const WARNING_MARKERS: &[&str] = &[
    "deprecated",
    "deprecation",
    "warning",
    "no longer maintained",
    "not maintained",
    "did you mean",
];

/// Variables forwarded from the parent process even when the environment
/// is otherwise scrubbed.
pub const ALWAYS_PASS_ENV: &[&str] = &[
    "LANG",
    "LANGUAGE",
    "SSL_CERT_FILE",
    "HTTP_PROXY",
    "HTTPS_PROXY",
    "NO_PROXY",
    "PIP_INDEX_URL",
    "PATH",
];

const CMDARGS_PLACEHOLDER: &str = "{cmdargs}";

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Secondary filter matched against the instance's sanitized package
    /// identifier chain.
    pub venv_pattern: Regex,
    pub recreate_venvs: bool,
    pub skip_base_install: bool,
    pub recompile_requirements: bool,
    /// Inherit the full parent environment instead of starting empty.
    pub pass_env: bool,
    /// Extra arguments substituted for the `{cmdargs}` placeholder.
    pub cmdargs: Vec<String>,
    pub skip_missing: bool,
    pub exit_first: bool,
    /// Restrict execution to instances whose interpreter hint appears in
    /// this list. Empty means no restriction.
    pub pythons: Vec<String>,
    /// Variables forwarded regardless of `pass_env`.
    pub always_pass_env: Vec<String>,
    /// Set externally (signal handler) to stop the loop between commands.
    pub interrupt: Arc<AtomicBool>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            venv_pattern: Regex::new(".*").unwrap(),
            recreate_venvs: false,
            skip_base_install: false,
            recompile_requirements: false,
            pass_env: false,
            cmdargs: Vec::new(),
            skip_missing: false,
            exit_first: false,
            pythons: Vec::new(),
            always_pass_env: ALWAYS_PASS_ENV.iter().map(|s| s.to_string()).collect(),
            interrupt: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Outcome of one instance's command.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub name: Option<String>,
    pub env_str: String,
    pub interpreter: String,
    pub pkg_str: String,
    pub code: i32,
    pub warned: bool,
    pub output: String,
}

impl ExecutionResult {
    pub fn passed(&self) -> bool {
        self.code == 0
    }

    /// Human-readable identity line, shared by the run summary.
    pub fn label(&self) -> String {
        format!(
            "{}: {} {} {}",
            self.name.as_deref().unwrap_or("<unnamed>"),
            self.env_str,
            self.interpreter,
            self.pkg_str,
        )
    }
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub results: Vec<ExecutionResult>,
    pub interrupted: bool,
}

impl RunReport {
    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.passed()).count()
    }

    pub fn warned(&self) -> usize {
        self.results.iter().filter(|r| r.passed() && r.warned).count()
    }

    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| !r.passed()).count()
    }

    pub fn any_failed(&self) -> bool {
        self.failed() > 0
    }
}

/// One line of `list` output.
#[derive(Debug, Clone, Serialize)]
pub struct ListEntry {
    pub ordinal: usize,
    pub short_hash: String,
    pub long_hash: String,
    pub name: Option<String>,
    pub env_str: String,
    pub interpreter: Option<String>,
    pub pkg_str: String,
}

impl ListEntry {
    pub fn line(&self) -> String {
        format!(
            "#{} {} {} {} {} {}",
            self.ordinal,
            self.short_hash,
            self.name.as_deref().unwrap_or("<unnamed>"),
            self.env_str,
            self.interpreter.as_deref().unwrap_or("<no interpreter>"),
            self.pkg_str,
        )
    }
}

/// A loaded spec tree plus the cache settings it materializes against.
#[derive(Debug)]
pub struct Session {
    root: SpecNode,
    settings: Settings,
}

impl Session {
    pub fn new(root: SpecNode, settings: Settings) -> Self {
        Self { root, settings }
    }

    pub fn from_config_file(path: &Path, settings: Settings) -> Result<Self> {
        Ok(Self::new(load_spec_file(path)?, settings))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn expand(&self, pattern: &Regex, resolver: &dyn InterpreterResolver) -> InstanceArena {
        expand(&self.root, pattern, resolver)
    }

    /// Run the matched slice of the matrix. Each instance materializes and
    /// runs to completion before the next begins.
    pub fn run(
        &self,
        pattern: &Regex,
        resolver: &dyn InterpreterResolver,
        runner: &dyn ProcessRunner,
        opts: &RunOptions,
    ) -> Result<RunReport> {
        let arena = self.expand(pattern, resolver);
        let materializer = Materializer::new(&self.settings, runner);
        let mut report = RunReport::default();

        self.generate_base_venvs_in(
            &arena,
            runner,
            opts.recreate_venvs,
            opts.skip_base_install,
            &opts.pythons,
            &opts.always_pass_env,
        )?;

        for leaf in arena.leaves() {
            if opts.interrupt.load(Ordering::SeqCst) {
                report.interrupted = true;
                break;
            }

            let Some(binding) = leaf.binding() else {
                tracing::warn!(
                    name = leaf.name().unwrap_or("<unnamed>"),
                    "skipping instance with no interpreter specification"
                );
                continue;
            };
            if !python_allowed(&opts.pythons, binding.hint()) {
                tracing::debug!(hint = binding.hint(), "skipping interpreter not selected");
                continue;
            }
            let py = match binding.resolved() {
                Some(py) => py,
                None if opts.skip_missing => {
                    tracing::warn!(hint = binding.hint(), "skipping missing interpreter");
                    continue;
                }
                None => {
                    return Err(Error::InterpreterNotFound {
                        hint: binding.hint().to_string(),
                    })
                }
            };

            let ident_chain = venv_ident_chain(leaf);
            if !opts.venv_pattern.is_match(&ident_chain) {
                tracing::debug!(ident = %ident_chain, "skipping instance due to venv pattern mismatch");
                continue;
            }

            let Some(template) = leaf.command() else {
                tracing::warn!(
                    name = leaf.name().unwrap_or("<unnamed>"),
                    "skipping instance with no command"
                );
                continue;
            };

            tracing::info!(interpreter = %binding.canonical(), "running instance");

            let mut result = ExecutionResult {
                name: leaf.name().map(str::to_string),
                env_str: leaf.env_str(),
                interpreter: binding.canonical(),
                pkg_str: leaf.full_pkg_str(),
                code: 1,
                warned: false,
                output: String::new(),
            };

            let install_env = allowlist_env(&opts.always_pass_env);
            let composed = match materializer.materialize(
                leaf,
                &install_env,
                MaterializeOptions {
                    recreate: opts.recreate_venvs,
                    skip_deps: opts.skip_base_install,
                    recompile: opts.recompile_requirements,
                },
            ) {
                Ok(composed) => composed,
                Err(e @ (Error::VenvCreation { .. } | Error::Installation { .. })) => {
                    tracing::error!(error = %e, "materialization failed");
                    report.results.push(result);
                    if opts.exit_first {
                        break;
                    }
                    continue;
                }
                Err(e) => return Err(e),
            };

            let env = self.compose_command_env(leaf, py, &composed.path, &composed.pythonpath, opts);
            let command = substitute_cmdargs(template, &opts.cmdargs);

            let env_str = env
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(" ");
            tracing::info!(command = %command, env = %env_str, "running command");

            let pythonpath_entries: Vec<String> = composed
                .pythonpath
                .split(PATH_LIST_SEP)
                .map(str::to_string)
                .collect();
            let dest = site_packages(&composed.venv_path, py.version());
            let _guard = match NspkgGuard::reconcile(&pythonpath_entries, &dest) {
                Ok(guard) => guard,
                Err(e) => {
                    tracing::error!(error = %e, "namespace package reconciliation failed");
                    report.results.push(result);
                    if opts.exit_first {
                        break;
                    }
                    continue;
                }
            };

            let activation = format!(
                "source {}/bin/activate && {}",
                composed.venv_path.display(),
                command
            );
            match runner.run(&activation, &env, true) {
                Ok(output) => {
                    print!("{}", output.stdout);
                    result.code = 0;
                    result.warned = is_warning(&output.stdout);
                    result.output = output.stdout;
                    report.results.push(result);
                }
                Err(Error::CommandFailure { code, output }) => {
                    print!("{output}");
                    tracing::error!(code, "command failed");
                    result.code = code;
                    result.output = output;
                    report.results.push(result);
                    if opts.exit_first {
                        break;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        if opts.interrupt.load(Ordering::SeqCst) {
            report.interrupted = true;
        }
        Ok(report)
    }

    /// Create the base venv of every interpreter the matched instances
    /// need, installing the local project into each unless skipped.
    pub fn generate_base_venvs(
        &self,
        pattern: &Regex,
        resolver: &dyn InterpreterResolver,
        runner: &dyn ProcessRunner,
        recreate: bool,
        skip_deps: bool,
        pythons: &[String],
    ) -> Result<()> {
        let arena = self.expand(pattern, resolver);
        self.generate_base_venvs_in(
            &arena,
            runner,
            recreate,
            skip_deps,
            pythons,
            &ALWAYS_PASS_ENV.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
        )
    }

    fn generate_base_venvs_in(
        &self,
        arena: &InstanceArena,
        runner: &dyn ProcessRunner,
        recreate: bool,
        skip_deps: bool,
        pythons: &[String],
        always_pass_env: &[String],
    ) -> Result<()> {
        let mut required: Vec<&ResolvedInterpreter> = Vec::new();
        for leaf in arena.leaves() {
            match leaf.binding() {
                Some(binding) if !python_allowed(pythons, binding.hint()) => {}
                Some(binding) => match binding.resolved() {
                    Some(py) => {
                        if !required.iter().any(|r| r.hint() == py.hint()) {
                            required.push(py);
                        }
                    }
                    None => tracing::warn!(hint = binding.hint(), "interpreter not found"),
                },
                None => tracing::warn!("instance has no interpreter specification"),
            }
        }

        tracing::info!(
            interpreters = %required.iter().map(|p| p.hint()).collect::<Vec<_>>().join(","),
            "generating base virtual environments"
        );

        let materializer = Materializer::new(&self.settings, runner);
        let install_env = allowlist_env(always_pass_env);
        for py in required {
            match materializer.ensure_base_venv(py, &install_env, recreate, skip_deps) {
                Ok(()) => {}
                Err(Error::VenvCreation { output, .. }) => {
                    tracing::error!(%output, "failed to create base virtual environment");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Listing entries for the matched instances, in expansion order.
    pub fn list_instances(
        &self,
        pattern: &Regex,
        venv_pattern: &Regex,
        pythons: &[String],
        resolver: &dyn InterpreterResolver,
    ) -> Vec<ListEntry> {
        let arena = self.expand(pattern, resolver);
        let mut entries = Vec::new();
        for (ordinal, leaf) in arena.leaves().enumerate() {
            let Some(binding) = leaf.binding() else {
                continue;
            };
            if !python_allowed(pythons, binding.hint()) {
                continue;
            }
            if !venv_pattern.is_match(&venv_ident_chain(leaf)) {
                continue;
            }
            let fingerprint = leaf.fingerprint();
            entries.push(ListEntry {
                ordinal,
                short_hash: fingerprint.short().to_string(),
                long_hash: fingerprint.long().to_string(),
                name: leaf.name().map(str::to_string),
                env_str: leaf.env_str(),
                interpreter: leaf.binding().map(|b| b.canonical()),
                pkg_str: leaf.full_pkg_str(),
            });
        }
        entries
    }

    /// Look up one instance by ordinal (`#N`) or unique long-hash prefix.
    /// Ambiguous or unparsable identifiers resolve to nothing.
    pub fn find_instance<'a>(
        &self,
        arena: &'a InstanceArena,
        ident: &str,
    ) -> Option<Instance<'a>> {
        match Selector::parse(ident)? {
            Selector::Ordinal(n) => arena.leaf(n),
            Selector::HashPrefix(prefix) => {
                let mut matched = None;
                for leaf in arena.leaves() {
                    if leaf.fingerprint().long().starts_with(&prefix) {
                        if matched.is_some() {
                            return None;
                        }
                        matched = Some(leaf);
                    }
                }
                matched
            }
        }
    }

    /// Compile (or recompile) the pinned lockfile for one instance and
    /// return its path.
    pub fn compile_requirements(
        &self,
        pattern: &Regex,
        resolver: &dyn InterpreterResolver,
        runner: &dyn ProcessRunner,
        ident: &str,
    ) -> Result<PathBuf> {
        let arena = self.expand(pattern, resolver);
        let leaf = self
            .find_instance(&arena, ident)
            .ok_or_else(|| Error::InstanceNotFound {
                ident: ident.to_string(),
            })?;
        let py = resolved_interpreter(leaf)?;
        let materializer = Materializer::new(&self.settings, runner);
        let install_env = allowlist_env(
            &ALWAYS_PASS_ENV.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
        );
        materializer.compile_lock(leaf, py, &install_env, true)
    }

    /// Materialize one instance and launch an interactive shell inside its
    /// composed environment.
    pub fn shell(
        &self,
        pattern: &Regex,
        resolver: &dyn InterpreterResolver,
        runner: &dyn ProcessRunner,
        ident: &str,
        pass_env: bool,
    ) -> Result<()> {
        let arena = self.expand(pattern, resolver);
        let leaf = self
            .find_instance(&arena, ident)
            .ok_or_else(|| Error::InstanceNotFound {
                ident: ident.to_string(),
            })?;
        let py = resolved_interpreter(leaf)?;

        let opts = RunOptions {
            pass_env,
            ..RunOptions::default()
        };
        let materializer = Materializer::new(&self.settings, runner);
        let install_env = allowlist_env(&opts.always_pass_env);
        let composed =
            materializer.materialize(leaf, &install_env, MaterializeOptions::default())?;
        let env = self.compose_command_env(leaf, py, &composed.path, &composed.pythonpath, &opts);

        let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string());
        let activation = format!("source {}/bin/activate && {}", composed.venv_path.display(), shell);
        runner.run(&activation, &env, false)?;
        Ok(())
    }

    /// Build the child process environment: inherit-or-empty base, the
    /// instance's merged env vars, identity metadata, composed search
    /// paths, then the forwarded allow-list for anything still unset.
    fn compose_command_env(
        &self,
        leaf: Instance<'_>,
        py: &ResolvedInterpreter,
        path: &str,
        pythonpath: &str,
        opts: &RunOptions,
    ) -> HashMap<String, String> {
        let mut env: HashMap<String, String> = if opts.pass_env {
            std::env::vars().collect()
        } else {
            HashMap::new()
        };

        for (key, value) in leaf.merged_env() {
            env.insert(key, value);
        }

        let fingerprint = leaf.fingerprint();
        env.insert(
            "ENVMATRIX_VENV_NAME".to_string(),
            leaf.name().unwrap_or_default().to_string(),
        );
        env.insert(
            "ENVMATRIX_PYTHON_HINT".to_string(),
            leaf.binding().map(|b| b.hint().to_string()).unwrap_or_default(),
        );
        env.insert("ENVMATRIX_PYTHON_VERSION".to_string(), py.version().to_string());
        env.insert("ENVMATRIX_VENV_HASH".to_string(), fingerprint.short().to_string());
        env.insert(
            "ENVMATRIX_VENV_FULL_HASH".to_string(),
            fingerprint.long().to_string(),
        );
        env.insert("ENVMATRIX_VENV_PKGS".to_string(), leaf.full_pkg_str());

        // Composed entries come first so leaf-ward installs shadow.
        let pythonpath = match env.get("PYTHONPATH") {
            Some(existing) if !existing.is_empty() => join_paths([pythonpath, existing.as_str()]),
            _ => pythonpath.to_string(),
        };
        env.insert("PYTHONPATH".to_string(), pythonpath);

        let inherited_path = env
            .get("PATH")
            .cloned()
            .or_else(|| std::env::var("PATH").ok())
            .unwrap_or_default();
        let path = if path.is_empty() {
            inherited_path
        } else {
            join_paths([path, inherited_path.as_str()])
        };
        env.insert("PATH".to_string(), path);

        for key in &opts.always_pass_env {
            if !env.contains_key(key) {
                if let Ok(value) = std::env::var(key) {
                    env.insert(key.clone(), value);
                }
            }
        }
        env
    }
}

/// Identifier chain used by the venv pattern filter: sanitized package
/// identifiers from root to leaf, joined with `_`.
fn venv_ident_chain(leaf: Instance<'_>) -> String {
    let mut idents: Vec<String> = Vec::new();
    let mut current = Some(leaf);
    while let Some(node) = current {
        let own = pip_deps(node.own_pkgs());
        if !own.is_empty() {
            idents.push(sanitize_ident(&own));
        }
        current = node.parent();
    }
    idents.reverse();
    idents.join("_")
}

fn python_allowed(pythons: &[String], hint: &str) -> bool {
    pythons.is_empty() || pythons.iter().any(|p| p == hint)
}

fn resolved_interpreter<'a>(leaf: Instance<'a>) -> Result<&'a ResolvedInterpreter> {
    leaf.interpreter().ok_or_else(|| Error::InterpreterNotFound {
        hint: leaf
            .binding()
            .map(|b| b.hint().to_string())
            .unwrap_or_else(|| "<none>".to_string()),
    })
}

fn allowlist_env(keys: &[String]) -> HashMap<String, String> {
    keys.iter()
        .filter_map(|k| std::env::var(k).ok().map(|v| (k.clone(), v)))
        .collect()
}

fn substitute_cmdargs(template: &str, cmdargs: &[String]) -> String {
    if !template.contains(CMDARGS_PLACEHOLDER) {
        return template.trim().to_string();
    }
    template
        .replace(CMDARGS_PLACEHOLDER, &quote_args(cmdargs))
        .trim()
        .to_string()
}

/// Heuristic: a passing command whose output mentions any of the warning
/// markers is flagged for attention.
pub fn is_warning(output: &str) -> bool {
    let lower = output.to_lowercase();
    WARNING_MARKERS.iter().any(|marker| lower.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warning_detection_is_case_insensitive() {
        assert!(is_warning("DeprecationWarning: collections.abc"));
        assert!(is_warning("this package is No Longer Maintained"));
        assert!(!is_warning("all 12 tests passed"));
    }

    #[test]
    fn test_cmdargs_substitution_quotes_arguments() {
        let cmd = substitute_cmdargs(
            "pytest {cmdargs}",
            &["-k".to_string(), "test me".to_string()],
        );
        assert_eq!(cmd, "pytest -k 'test me'");
    }

    #[test]
    fn test_cmdargs_substitution_without_placeholder_trims() {
        assert_eq!(substitute_cmdargs("  pytest  ", &[]), "pytest");
    }

    #[test]
    fn test_run_report_counts() {
        let result = |code: i32, warned: bool| ExecutionResult {
            name: Some("test".to_string()),
            env_str: String::new(),
            interpreter: "Interpreter('3.9')".to_string(),
            pkg_str: String::new(),
            code,
            warned,
            output: String::new(),
        };
        let report = RunReport {
            results: vec![result(0, false), result(0, true), result(1, false)],
            interrupted: false,
        };
        assert_eq!(report.passed(), 2);
        assert_eq!(report.warned(), 1);
        assert_eq!(report.failed(), 1);
        assert!(report.any_failed());
    }
}
