//! Environment materialization: turning an expanded instance into a
//! physical, layered installation and a composed runtime environment.
//!
//! The central optimization lives here: an installation layer whose prefix
//! directory already exists is assumed good and skipped entirely, so a
//! warm cache run issues zero installer invocations.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::expand::Instance;
use crate::fingerprint::{sanitize_ident, Fingerprint};
use crate::interpreter::{site_packages, ResolvedInterpreter};
use crate::process::{join_paths, shell_quote, ProcessRunner};

/// Paths beyond this length fall back to fingerprint naming.
const MAX_PREFIX_PATH_LEN: usize = 255;

#[derive(Debug, Clone, Copy, Default)]
pub struct MaterializeOptions {
    /// Delete and recreate installation layers.
    pub recreate: bool,
    /// Skip the editable install of the local project.
    pub skip_deps: bool,
    /// Force regeneration of the compiled lockfile (implies recreate).
    pub recompile: bool,
}

/// The composed runtime environment for one instance.
#[derive(Debug, Clone)]
pub struct ComposedEnv {
    /// The virtualenv the command is activated in (nearest boundary, or
    /// the interpreter's base venv).
    pub venv_path: PathBuf,
    /// Ordered `PATH` entries, leaf-ward first.
    pub path: String,
    /// Ordered `PYTHONPATH` entries: `["", cwd, leaf.., base]`.
    pub pythonpath: String,
}

pub struct Materializer<'a> {
    settings: &'a Settings,
    runner: &'a dyn ProcessRunner,
}

impl<'a> Materializer<'a> {
    pub fn new(settings: &'a Settings, runner: &'a dyn ProcessRunner) -> Self {
        Self { settings, runner }
    }

    /// Install anything missing for `instance` and compose its runtime
    /// environment. `install_env` is the environment used for installer
    /// subprocesses; it must carry `PATH`.
    pub fn materialize(
        &self,
        instance: Instance<'_>,
        install_env: &HashMap<String, String>,
        opts: MaterializeOptions,
    ) -> Result<ComposedEnv> {
        let py = instance.interpreter().ok_or_else(|| Error::InterpreterNotFound {
            hint: instance
                .binding()
                .map(|b| b.hint().to_string())
                .unwrap_or_else(|| "<none>".to_string()),
        })?;

        let recreate = opts.recreate || opts.recompile;
        self.prepare(
            instance,
            py,
            install_env,
            recreate,
            opts.skip_deps,
            opts.recompile,
            false,
        )?;
        Ok(self.compose(instance, py))
    }

    /// Prefix directory where this node's merged package set is installed:
    /// `<base venv>` when there are no packages, else
    /// `<base venv>_<sanitized package string>`, falling back to the long
    /// fingerprint when the path would not be filesystem-safe.
    pub fn prefix_path(&self, instance: Instance<'_>, py: &ResolvedInterpreter) -> PathBuf {
        let base = py.base_venv_path(self.settings);
        let pkg_str = instance.full_pkg_str();
        if pkg_str.is_empty() {
            return base;
        }

        let base_name = base.file_name().unwrap_or_default().to_string_lossy();
        let candidate = base.with_file_name(format!("{}_{}", base_name, sanitize_ident(&pkg_str)));
        if candidate.to_string_lossy().len() <= MAX_PREFIX_PATH_LEN {
            return candidate;
        }

        let fingerprint = self.fingerprint_for(instance, py);
        base.with_file_name(format!("{}_{}", base_name, fingerprint.long()))
    }

    /// The venv this instance's command runs in: the prefix of the nearest
    /// installation boundary (self included), or the interpreter's base
    /// venv when no ancestor is a boundary.
    pub fn boundary_venv_path(&self, instance: Instance<'_>, py: &ResolvedInterpreter) -> PathBuf {
        let mut current = Some(instance);
        while let Some(node) = current {
            if node.is_boundary() {
                return self.prefix_path(node, py);
            }
            current = node.parent();
        }
        py.base_venv_path(self.settings)
    }

    /// Create (or recreate) the base venv for an interpreter and install
    /// the local project into it unless skipped.
    pub fn ensure_base_venv(
        &self,
        py: &ResolvedInterpreter,
        install_env: &HashMap<String, String>,
        recreate: bool,
        skip_deps: bool,
    ) -> Result<()> {
        let path = py.base_venv_path(self.settings);
        self.create_venv(py, &path, install_env, recreate)?;
        if skip_deps {
            tracing::info!("skipping dev package install");
            return Ok(());
        }
        self.dev_install(py, &path, install_env)
    }

    /// Compile (or reuse) the pinned lockfile for this node's full merged
    /// package string, keyed by its short fingerprint.
    pub fn compile_lock(
        &self,
        instance: Instance<'_>,
        py: &ResolvedInterpreter,
        install_env: &HashMap<String, String>,
        recompile: bool,
    ) -> Result<PathBuf> {
        let pkg_str = instance.full_pkg_str();
        let fingerprint = self.fingerprint_for(instance, py);
        let dir = self.settings.requirements_dir();
        std::fs::create_dir_all(&dir)?;

        let in_path = dir.join(format!("{}.in", fingerprint.short()));
        let txt_path = in_path.with_extension("txt");
        if !recompile && txt_path.exists() {
            return Ok(txt_path);
        }

        // One requirement per line, quotes dropped.
        let requirements = pkg_str.replace('\'', "").split_whitespace().collect::<Vec<_>>().join("\n");
        std::fs::write(&in_path, requirements)?;

        tracing::info!(lockfile = %in_path.display(), "compiling requirements");
        let py_ex = shell_quote(&py.path().display().to_string());
        let install_tools = format!("{py_ex} -m pip --disable-pip-version-check install -q pip-tools");
        let compile = format!(
            "{py_ex} -m piptools compile -q --no-annotate --resolver=backtracking {}",
            shell_quote(&in_path.display().to_string())
        );
        for cmd in [install_tools, compile] {
            self.runner
                .run(&cmd, install_env, true)
                .map_err(|e| installation_error(&pkg_str, e))?;
        }
        Ok(txt_path)
    }

    fn fingerprint_for(&self, instance: Instance<'_>, py: &ResolvedInterpreter) -> Fingerprint {
        Fingerprint::compute(
            instance.name(),
            Some(&format!("Interpreter('{}')", py.hint())),
            &instance.full_pkg_str(),
        )
    }

    /// Walk from the instance toward the root, installing every layer that
    /// is missing or invalidated. A boundary absorbs further propagation:
    /// it owns the whole merged package set already.
    fn prepare(
        &self,
        instance: Instance<'_>,
        py: &ResolvedInterpreter,
        install_env: &HashMap<String, String>,
        recreate: bool,
        skip_deps: bool,
        recompile: bool,
        child_was_installed: bool,
    ) -> Result<()> {
        let prefix = self.prefix_path(instance, py);
        let exists = prefix.exists();
        let mut installed = false;

        if (!exists || recreate || recompile) && !child_was_installed {
            let venv_path = self.boundary_venv_path(instance, py);

            if instance.is_boundary() {
                self.create_venv(py, &venv_path, install_env, recreate)?;
                if !skip_deps && !instance.skip_dev_install() {
                    self.dev_install(py, &venv_path, install_env)?;
                }
            } else if !venv_path.exists() {
                // Nearest boundary is the base interpreter environment.
                self.create_venv(py, &venv_path, install_env, false)?;
                if !skip_deps {
                    self.dev_install(py, &venv_path, install_env)?;
                }
            }

            let pkg_str = instance.full_pkg_str();
            if !pkg_str.is_empty() {
                let lockfile = self.compile_lock(instance, py, install_env, recompile)?;
                self.install_lockfile(instance, py, &venv_path, &prefix, &lockfile, install_env)?;
                installed = true;
            }
        }

        if !instance.is_boundary() {
            if let Some(parent) = instance.parent() {
                self.prepare(
                    parent,
                    py,
                    install_env,
                    false,
                    skip_deps,
                    false,
                    installed || exists || child_was_installed,
                )?;
            }
        }
        Ok(())
    }

    fn install_lockfile(
        &self,
        instance: Instance<'_>,
        py: &ResolvedInterpreter,
        venv_path: &Path,
        prefix: &Path,
        lockfile: &Path,
        install_env: &HashMap<String, String>,
    ) -> Result<()> {
        let pkg_str = instance.full_pkg_str();
        tracing::info!(
            lockfile = %lockfile.display(),
            prefix = %prefix.display(),
            "installing venv dependencies"
        );

        // Installs run through a venv sharing the boundary's interpreter:
        // the boundary venv itself for boundary nodes, otherwise a sibling
        // "_deps" venv whose interpreter binary is symlinked rather than
        // recreated.
        let deps_venv = if instance.is_boundary() {
            venv_path.to_path_buf()
        } else {
            let name = venv_path.file_name().unwrap_or_default().to_string_lossy();
            let deps_venv = venv_path.with_file_name(format!("{name}_deps"));
            if !deps_venv.exists() {
                self.create_venv(py, &deps_venv, install_env, false)?;
                link_interpreter(&deps_venv, venv_path);
            }
            deps_venv
        };

        let cmd = format!(
            "pip --disable-pip-version-check install --prefix {} --no-warn-script-location -r {}",
            shell_quote(&prefix.display().to_string()),
            shell_quote(&lockfile.display().to_string()),
        );
        self.run_in_venv(py, &deps_venv, &cmd, install_env, true)
            .map_err(|e| installation_error(&pkg_str, e))?;
        Ok(())
    }

    fn create_venv(
        &self,
        py: &ResolvedInterpreter,
        path: &Path,
        install_env: &HashMap<String, String>,
        force: bool,
    ) -> Result<()> {
        if path.exists() {
            if !force {
                tracing::info!(path = %path.display(), "virtualenv already exists, skipping creation");
                return Ok(());
            }
            tracing::info!(path = %path.display(), "deleting virtualenv");
            std::fs::remove_dir_all(path)?;
        }

        tracing::info!(path = %path.display(), interpreter = %py.path().display(), "creating virtualenv");
        let cmd = format!(
            "virtualenv --python={} {}",
            shell_quote(&py.path().display().to_string()),
            shell_quote(&path.display().to_string()),
        );
        self.runner.run(&cmd, install_env, true).map_err(|e| {
            Error::VenvCreation {
                path: path.to_path_buf(),
                output: error_output(e),
            }
        })?;
        Ok(())
    }

    fn dev_install(
        &self,
        py: &ResolvedInterpreter,
        venv_path: &Path,
        install_env: &HashMap<String, String>,
    ) -> Result<()> {
        if !Path::new("setup.py").exists() && !Path::new("pyproject.toml").exists() {
            tracing::warn!("no Python setup file found, skipping dev package install");
            return Ok(());
        }
        tracing::info!(venv = %venv_path.display(), "installing dev package (editable)");
        self.run_in_venv(
            py,
            venv_path,
            "pip --disable-pip-version-check install -e .",
            install_env,
            true,
        )
        .map_err(|e| installation_error("-e .", e))?;
        Ok(())
    }

    /// Run a command with the venv activated: `VIRTUAL_ENV` set, the venv
    /// `bin` directory first on `PATH`, and the venv site-packages on
    /// `PYTHONPATH` so dev package dependencies resolve.
    pub fn run_in_venv(
        &self,
        py: &ResolvedInterpreter,
        venv_path: &Path,
        cmd: &str,
        env: &HashMap<String, String>,
        capture: bool,
    ) -> Result<crate::process::CmdOutput> {
        let mut env = env.clone();
        let venv = venv_path.display().to_string();
        let bin = venv_path.join("bin").display().to_string();

        env.insert("VIRTUAL_ENV".to_string(), venv);
        let path = match env.get("PATH") {
            Some(existing) => join_paths([bin.as_str(), existing.as_str()]),
            None => bin,
        };
        env.insert("PATH".to_string(), path);

        let sites = site_packages(venv_path, py.version()).display().to_string();
        let pythonpath = match env.get("PYTHONPATH") {
            Some(existing) if !existing.is_empty() => join_paths([existing.as_str(), sites.as_str()]),
            _ => sites,
        };
        env.insert("PYTHONPATH".to_string(), pythonpath);

        self.runner.run(cmd, &env, capture)
    }

    /// Compose the ordered search paths for an instance. Leaf-ward entries
    /// come first so they shadow ancestor installs.
    pub fn compose(&self, instance: Instance<'_>, py: &ResolvedInterpreter) -> ComposedEnv {
        let cwd = std::env::current_dir().unwrap_or_default();

        // Mimic `python -m`: empty entry, then the working directory.
        let mut sites = vec![String::new(), cwd.display().to_string()];
        let mut bins = Vec::new();

        let mut current = Some(instance);
        while let Some(node) = current {
            if node.is_boundary() {
                break;
            }
            if !node.own_pkgs().is_empty() {
                let prefix = self.prefix_path(node, py);
                sites.push(site_packages(&prefix, py.version()).display().to_string());
                bins.push(prefix.join("bin").display().to_string());
            }
            current = node.parent();
        }

        if !instance.is_boundary() {
            sites.push(py.base_site_packages(self.settings).display().to_string());
            bins.push(py.bin_path(self.settings).display().to_string());
        }

        ComposedEnv {
            venv_path: self.boundary_venv_path(instance, py),
            path: join_paths(bins),
            pythonpath: join_paths(sites),
        }
    }
}

fn installation_error(pkgs: &str, err: Error) -> Error {
    match err {
        Error::CommandFailure { output, .. } => Error::Installation {
            pkgs: pkgs.to_string(),
            output,
        },
        other => other,
    }
}

fn error_output(err: Error) -> String {
    match err {
        Error::CommandFailure { output, .. } => output,
        other => other.to_string(),
    }
}

/// Point the deps venv at the boundary venv's interpreter binary so the
/// same interpreter is shared instead of installed twice. Best effort.
fn link_interpreter(deps_venv: &Path, venv_path: &Path) {
    #[cfg(unix)]
    {
        let deps_bin = deps_venv.join("bin").join("python");
        let venv_bin = venv_path.join("bin").join("python");
        if venv_bin.exists() {
            let _ = std::fs::remove_file(&deps_bin);
            if let Err(e) = std::os::unix::fs::symlink(&venv_bin, &deps_bin) {
                tracing::debug!(error = %e, "failed to share interpreter binary with deps venv");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = (deps_venv, venv_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expand::expand;
    use crate::interpreter::{InterpreterResolver, PythonVersion};
    use crate::spec::SpecNode;
    use regex::Regex;
    use std::cell::RefCell;

    struct RecordingRunner {
        commands: RefCell<Vec<String>>,
    }

    impl RecordingRunner {
        fn new() -> Self {
            Self {
                commands: RefCell::new(Vec::new()),
            }
        }
    }

    impl ProcessRunner for RecordingRunner {
        fn run(
            &self,
            cmd: &str,
            _env: &HashMap<String, String>,
            _capture: bool,
        ) -> Result<crate::process::CmdOutput> {
            self.commands.borrow_mut().push(cmd.to_string());
            Ok(crate::process::CmdOutput::default())
        }
    }

    struct FixedResolver;

    impl InterpreterResolver for FixedResolver {
        fn resolve(&self, hint: &str) -> Result<ResolvedInterpreter> {
            Ok(ResolvedInterpreter::new(
                hint,
                "/usr/bin/python3.9",
                PythonVersion::new(3, 9, 1),
            ))
        }
    }

    fn one_leaf_spec() -> SpecNode {
        SpecNode {
            name: Some("test".to_string()),
            command: Some("pytest".to_string()),
            pys: vec![crate::interpreter::Interpreter::new("3.9")],
            pkgs: vec![(
                "pytest".to_string(),
                vec![Some("==6.1.2".to_string())],
            )],
            ..SpecNode::default()
        }
    }

    fn install_env() -> HashMap<String, String> {
        HashMap::from([("PATH".to_string(), "/usr/bin".to_string())])
    }

    #[test]
    fn test_prefix_path_naming() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::default().with_base_path(dir.path());
        let runner = RecordingRunner::new();
        let materializer = Materializer::new(&settings, &runner);

        let spec = one_leaf_spec();
        let arena = expand(&spec, &Regex::new(".*").unwrap(), &FixedResolver);
        let inst = arena.leaf(0).unwrap();
        let py = inst.interpreter().unwrap();

        let prefix = materializer.prefix_path(inst, py);
        assert_eq!(
            prefix,
            dir.path().join("venv_py391_pytest612")
        );
    }

    #[test]
    fn test_prefix_path_falls_back_to_fingerprint_when_too_long() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::default().with_base_path(dir.path());
        let runner = RecordingRunner::new();
        let materializer = Materializer::new(&settings, &runner);

        let mut spec = one_leaf_spec();
        spec.pkgs = (0..40)
            .map(|i| {
                (
                    format!("averyverylongpackagename{i}"),
                    vec![Some("==1.0.0".to_string())],
                )
            })
            .collect();
        let arena = expand(&spec, &Regex::new(".*").unwrap(), &FixedResolver);
        let inst = arena.leaf(0).unwrap();
        let py = inst.interpreter().unwrap();

        let prefix = materializer.prefix_path(inst, py);
        assert!(prefix.to_string_lossy().len() <= MAX_PREFIX_PATH_LEN + dir.path().to_string_lossy().len());
        let name = prefix.file_name().unwrap().to_string_lossy().into_owned();
        let fingerprint = inst.fingerprint();
        assert_eq!(name, format!("venv_py391_{}", fingerprint.long()));
    }

    #[test]
    fn test_materialize_cold_cache_runs_create_and_install() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::default().with_base_path(dir.path());
        let runner = RecordingRunner::new();
        let materializer = Materializer::new(&settings, &runner);

        let spec = one_leaf_spec();
        let arena = expand(&spec, &Regex::new(".*").unwrap(), &FixedResolver);
        let inst = arena.leaf(0).unwrap();

        materializer
            .materialize(inst, &install_env(), MaterializeOptions::default())
            .unwrap();

        let commands = runner.commands.borrow();
        assert!(commands.iter().any(|c| c.starts_with("virtualenv --python=")));
        assert!(commands.iter().any(|c| c.contains("piptools compile")));
        assert!(commands.iter().any(|c| c.contains("pip --disable-pip-version-check install --prefix")));
        // The lock input file was written, keyed by the short fingerprint.
        let in_path = settings
            .requirements_dir()
            .join(format!("{}.in", inst.fingerprint().short()));
        assert_eq!(std::fs::read_to_string(in_path).unwrap(), "pytest==6.1.2");
    }

    #[test]
    fn test_materialize_is_idempotent_on_existing_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::default().with_base_path(dir.path());
        let runner = RecordingRunner::new();
        let materializer = Materializer::new(&settings, &runner);

        let spec = one_leaf_spec();
        let arena = expand(&spec, &Regex::new(".*").unwrap(), &FixedResolver);
        let inst = arena.leaf(0).unwrap();
        let py = inst.interpreter().unwrap();

        // Simulate an earlier successful materialization.
        std::fs::create_dir_all(materializer.prefix_path(inst, py)).unwrap();

        materializer
            .materialize(inst, &install_env(), MaterializeOptions::default())
            .unwrap();
        assert!(
            runner.commands.borrow().is_empty(),
            "existing prefix must trigger zero installer invocations"
        );
    }

    #[test]
    fn test_recreate_invalidates_existing_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::default().with_base_path(dir.path());
        let runner = RecordingRunner::new();
        let materializer = Materializer::new(&settings, &runner);

        let spec = one_leaf_spec();
        let arena = expand(&spec, &Regex::new(".*").unwrap(), &FixedResolver);
        let inst = arena.leaf(0).unwrap();
        let py = inst.interpreter().unwrap();
        std::fs::create_dir_all(materializer.prefix_path(inst, py)).unwrap();

        materializer
            .materialize(
                inst,
                &install_env(),
                MaterializeOptions {
                    recreate: true,
                    ..MaterializeOptions::default()
                },
            )
            .unwrap();
        assert!(!runner.commands.borrow().is_empty());
    }

    #[test]
    fn test_pythonpath_composition_two_level_chain() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::default().with_base_path(dir.path());
        let runner = RecordingRunner::new();
        let materializer = Materializer::new(&settings, &runner);

        let root = SpecNode {
            pys: vec![crate::interpreter::Interpreter::new("3.9")],
            pkgs: vec![("parentpkg".to_string(), vec![Some("==1".to_string())])],
            venvs: vec![SpecNode {
                name: Some("test".to_string()),
                command: Some("pytest".to_string()),
                pkgs: vec![("leafpkg".to_string(), vec![Some("==2".to_string())])],
                ..SpecNode::default()
            }],
            ..SpecNode::default()
        };
        let arena = expand(&root, &Regex::new(".*").unwrap(), &FixedResolver);
        let inst = arena.leaf(0).unwrap();
        let py = inst.interpreter().unwrap();

        let composed = materializer.compose(inst, py);
        let entries: Vec<&str> = composed.pythonpath.split(':').collect();
        let cwd = std::env::current_dir().unwrap().display().to_string();
        let leaf_sites = site_packages(&materializer.prefix_path(inst, py), py.version());
        let parent_sites =
            site_packages(&materializer.prefix_path(inst.parent().unwrap(), py), py.version());
        let base_sites = py.base_site_packages(&settings);
        assert_eq!(
            entries,
            vec![
                "",
                cwd.as_str(),
                leaf_sites.to_str().unwrap(),
                parent_sites.to_str().unwrap(),
                base_sites.to_str().unwrap(),
            ]
        );
    }

    #[test]
    fn test_boundary_absorbs_composition_and_propagation() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::default().with_base_path(dir.path());
        let runner = RecordingRunner::new();
        let materializer = Materializer::new(&settings, &runner);

        let root = SpecNode {
            pys: vec![crate::interpreter::Interpreter::new("3.9")],
            pkgs: vec![("pkg".to_string(), vec![Some("==1".to_string())])],
            name: Some("boundary".to_string()),
            command: Some("pytest".to_string()),
            create: true,
            ..SpecNode::default()
        };
        let arena = expand(&root, &Regex::new(".*").unwrap(), &FixedResolver);
        let inst = arena.leaf(0).unwrap();
        let py = inst.interpreter().unwrap();

        // A boundary runs inside its own venv: no prefix site-packages on
        // PYTHONPATH and no base venv bin on PATH.
        let composed = materializer.compose(inst, py);
        let cwd = std::env::current_dir().unwrap().display().to_string();
        assert_eq!(composed.pythonpath, format!(":{cwd}"));
        assert_eq!(composed.path, "");
        assert_eq!(composed.venv_path, materializer.prefix_path(inst, py));
    }
}
