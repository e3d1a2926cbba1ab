//! Namespace package reconciliation.
//!
//! Installing split namespace packages into separate prefix directories
//! leaves each prefix with its own `*-nspkg.pth` hook, none of which is
//! visible from the venv the command actually runs in. Before running, the
//! hooks are copied into that venv's site-packages with their directory
//! reference pinned to the source prefix; they are removed again when the
//! guard drops.

use std::path::{Path, PathBuf};

use crate::error::Result;

const SITEDIR_TOKEN: &str = "sys._getframe(1).f_locals['sitedir']";

/// Removes the copied hook files and restores any backed-up originals on
/// drop.
#[derive(Debug, Default)]
pub struct NspkgGuard {
    copied: Vec<PathBuf>,
    backed_up: Vec<PathBuf>,
}

impl NspkgGuard {
    /// Copy namespace hook files from every composed site-packages
    /// directory into `dest`. `site_packages` is the composed interpreter
    /// path list; the leading empty and working-directory entries are
    /// skipped, as is `dest` itself. The first directory providing a given
    /// hook filename wins.
    pub fn reconcile(site_packages: &[String], dest: &Path) -> Result<NspkgGuard> {
        let mut guard = NspkgGuard::default();
        let dest_str = dest.display().to_string();

        let mut sources: Vec<(String, PathBuf)> = Vec::new();
        for dir in site_packages.iter().skip(2).filter(|d| **d != dest_str) {
            let entries = match std::fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(_) => continue,
            };
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.ends_with("nspkg.pth")
                    && !sources.iter().any(|(existing, _)| *existing == name)
                {
                    sources.push((name, PathBuf::from(dir)));
                }
            }
        }

        for (name, src_dir) in sources {
            let dst_path = dest.join(&name);

            // An existing hook belongs to the venv itself; keep a backup
            // instead of overwriting it.
            if dst_path.is_file() {
                std::fs::rename(&dst_path, backup_path(&dst_path))?;
                guard.backed_up.push(dst_path.clone());
            }

            let content = std::fs::read_to_string(src_dir.join(&name))?;
            let pinned = content.replace(
                SITEDIR_TOKEN,
                &format!("'{}'", src_dir.display()),
            );
            std::fs::write(&dst_path, pinned)?;
            guard.copied.push(dst_path);
        }

        Ok(guard)
    }
}

impl Drop for NspkgGuard {
    fn drop(&mut self) {
        for path in &self.copied {
            if let Err(e) = std::fs::remove_file(path) {
                tracing::debug!(path = %path.display(), error = %e, "failed to remove namespace hook");
            }
        }
        for path in &self.backed_up {
            if let Err(e) = std::fs::rename(backup_path(path), path) {
                tracing::debug!(path = %path.display(), error = %e, "failed to restore namespace hook");
            }
        }
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".bak");
    PathBuf::from(os)
}
