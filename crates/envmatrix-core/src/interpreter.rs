//! Interpreter hints and their resolution to concrete binaries.
//!
//! An [`Interpreter`] is only a hint ("3.11", "python3", a path). Equality
//! and hashing are declared on the hint, not on the resolved path, so
//! interpreter sets deduplicate before resolution is even attempted.
//! Resolution is deferred until a binary is actually required; a hint that
//! cannot be resolved is carried on the instance and reported at run time.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

use crate::config::Settings;
use crate::error::{Error, Result};

/// An interpreter requirement as declared in the spec.
#[derive(Debug, Clone, Eq)]
pub struct Interpreter {
    hint: String,
}

impl Interpreter {
    pub fn new(hint: impl Into<String>) -> Self {
        Self { hint: hint.into() }
    }

    pub fn hint(&self) -> &str {
        &self.hint
    }
}

impl PartialEq for Interpreter {
    fn eq(&self, other: &Self) -> bool {
        self.hint == other.hint
    }
}

impl std::hash::Hash for Interpreter {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.hint.hash(state);
    }
}

impl fmt::Display for Interpreter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Interpreter('{}')", self.hint)
    }
}

/// A parsed `Python X.Y.Z` version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PythonVersion {
    pub major: u32,
    pub minor: u32,
    pub micro: u32,
}

impl PythonVersion {
    pub fn new(major: u32, minor: u32, micro: u32) -> Self {
        Self {
            major,
            minor,
            micro,
        }
    }

    /// Parse "3.11.4" (or "3.13.0rc1": trailing non-digits are dropped).
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.trim().split('.').map(|part| {
            let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse::<u32>().ok()
        });
        Some(Self {
            major: parts.next()??,
            minor: parts.next().flatten().unwrap_or(0),
            micro: parts.next().flatten().unwrap_or(0),
        })
    }

    /// Dot-free form used in on-disk venv names: 3.11.2 -> "3112".
    pub fn compact(&self) -> String {
        format!("{}{}{}", self.major, self.minor, self.micro)
    }

    /// The `lib/pythonX.Y` directory component of a prefix.
    pub fn lib_dir(&self) -> String {
        format!("python{}.{}", self.major, self.minor)
    }
}

impl fmt::Display for PythonVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.micro)
    }
}

/// A hint resolved against the host: a concrete binary plus its version.
#[derive(Debug, Clone)]
pub struct ResolvedInterpreter {
    hint: String,
    path: PathBuf,
    version: PythonVersion,
}

impl ResolvedInterpreter {
    pub fn new(hint: impl Into<String>, path: impl Into<PathBuf>, version: PythonVersion) -> Self {
        Self {
            hint: hint.into(),
            path: path.into(),
            version,
        }
    }

    pub fn hint(&self) -> &str {
        &self.hint
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn version(&self) -> &PythonVersion {
        &self.version
    }

    /// Path of the base venv for this interpreter, e.g.
    /// `.envmatrix/venv_py3112`. Always absolute.
    pub fn base_venv_path(&self, settings: &Settings) -> PathBuf {
        settings
            .absolute_base_path()
            .join(format!("{}{}", settings.venv_prefix, self.version.compact()))
    }

    /// `bin` directory of the base venv.
    pub fn bin_path(&self, settings: &Settings) -> PathBuf {
        self.base_venv_path(settings).join("bin")
    }

    /// Site-packages directory of the base venv.
    pub fn base_site_packages(&self, settings: &Settings) -> PathBuf {
        site_packages(&self.base_venv_path(settings), &self.version)
    }
}

/// Two resolved interpreters are equal iff their hints are.
impl PartialEq for ResolvedInterpreter {
    fn eq(&self, other: &Self) -> bool {
        self.hint == other.hint
    }
}

impl Eq for ResolvedInterpreter {}

impl fmt::Display for ResolvedInterpreter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Interpreter('{}')", self.hint)
    }
}

/// Site-packages directory for a prefix and interpreter version.
pub fn site_packages(prefix: &Path, version: &PythonVersion) -> PathBuf {
    prefix.join("lib").join(version.lib_dir()).join("site-packages")
}

/// Resolution of a hint to a concrete interpreter binary.
pub trait InterpreterResolver {
    fn resolve(&self, hint: &str) -> Result<ResolvedInterpreter>;
}

/// Resolves hints against the host: tries the hint itself as a path or
/// executable, then `python<hint>` on the PATH, and asks the binary for its
/// real location and version. Results are cached per hint for the lifetime
/// of the process.
#[derive(Debug, Default)]
pub struct HostResolver;

static RESOLUTION_CACHE: Mutex<Option<HashMap<String, Option<(PathBuf, PythonVersion)>>>> =
    Mutex::new(None);

impl InterpreterResolver for HostResolver {
    fn resolve(&self, hint: &str) -> Result<ResolvedInterpreter> {
        if let Ok(mut guard) = RESOLUTION_CACHE.lock() {
            if let Some(cached) = guard.get_or_insert_with(HashMap::new).get(hint) {
                return match cached {
                    Some((path, version)) => {
                        Ok(ResolvedInterpreter::new(hint, path.clone(), version.clone()))
                    }
                    None => Err(Error::InterpreterNotFound {
                        hint: hint.to_string(),
                    }),
                };
            }
        }

        let resolved = resolve_on_host(hint);
        if let Ok(mut guard) = RESOLUTION_CACHE.lock() {
            guard.get_or_insert_with(HashMap::new).insert(
                hint.to_string(),
                resolved
                    .as_ref()
                    .map(|r| (r.path.clone(), r.version.clone())),
            );
        }
        resolved.ok_or_else(|| Error::InterpreterNotFound {
            hint: hint.to_string(),
        })
    }
}

fn resolve_on_host(hint: &str) -> Option<ResolvedInterpreter> {
    for candidate in [hint.to_string(), format!("python{hint}")] {
        let executable = if Path::new(&candidate).exists() {
            Some(PathBuf::from(&candidate))
        } else {
            which::which(&candidate).ok()
        };
        let Some(executable) = executable else {
            continue;
        };

        // Ask the binary for its real location; `python3` is often a
        // symlink chain and venv naming keys off the version anyway.
        let path = match probe(&executable, &["-c", "import sys; print(sys.executable)"]) {
            Some(out) => PathBuf::from(out.trim()),
            None => continue,
        };
        let version = probe(&executable, &["-V"])
            .and_then(|out| out.rsplit(' ').next().and_then(PythonVersion::parse));
        let Some(version) = version else {
            tracing::warn!(executable = %executable.display(), "failed to parse interpreter version");
            continue;
        };

        tracing::debug!(hint, path = %path.display(), %version, "resolved interpreter");
        return Some(ResolvedInterpreter::new(hint, path, version));
    }
    None
}

fn probe(executable: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new(executable).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    // Older interpreters print the version banner on stderr.
    let stdout = String::from_utf8_lossy(&output.stdout);
    if stdout.trim().is_empty() {
        Some(String::from_utf8_lossy(&output.stderr).trim().to_string())
    } else {
        Some(stdout.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpreter_equality_is_on_hint() {
        assert_eq!(Interpreter::new("3.8"), Interpreter::new("3.8"));
        assert_ne!(Interpreter::new("3.8"), Interpreter::new("3.9"));

        let a = ResolvedInterpreter::new("3.8", "/usr/bin/python3.8", PythonVersion::new(3, 8, 2));
        let b = ResolvedInterpreter::new("3.8", "/opt/python/bin/python", PythonVersion::new(3, 8, 5));
        assert_eq!(a, b);
    }

    #[test]
    fn test_version_parse() {
        assert_eq!(PythonVersion::parse("3.11.4"), Some(PythonVersion::new(3, 11, 4)));
        assert_eq!(PythonVersion::parse("3.13.0rc1"), Some(PythonVersion::new(3, 13, 0)));
        assert_eq!(PythonVersion::parse("3"), Some(PythonVersion::new(3, 0, 0)));
        assert_eq!(PythonVersion::parse("not-a-version"), None);
    }

    #[test]
    fn test_version_compact_and_lib_dir() {
        let v = PythonVersion::new(3, 11, 2);
        assert_eq!(v.compact(), "3112");
        assert_eq!(v.lib_dir(), "python3.11");
    }

    #[test]
    fn test_base_venv_paths() {
        let settings = Settings::default().with_base_path("/tmp/cache");
        let py = ResolvedInterpreter::new("3.9", "/usr/bin/python3.9", PythonVersion::new(3, 9, 1));
        assert_eq!(
            py.base_venv_path(&settings),
            PathBuf::from("/tmp/cache/venv_py391")
        );
        assert_eq!(
            py.base_site_packages(&settings),
            PathBuf::from("/tmp/cache/venv_py391/lib/python3.9/site-packages")
        );
    }
}
