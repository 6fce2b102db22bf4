//! Locates the per-project runtime directory shared by `kagan-runtime` (the
//! core host) and the `kagan` CLI launcher, so both agree on where
//! `endpoint.json`, `core.lease.json` and `kagan.db` live without either
//! one hardcoding the other's defaults.

use std::path::{Path, PathBuf};

/// `KAGAN_CORE_RUNTIME_DIR` always wins. Otherwise the directory is the OS
/// state dir (falling back to the data dir, then the home dir) joined with
/// `kagan/<hash of the canonicalized project dir>`, so two checkouts never
/// collide and repeated calls for the same checkout agree.
pub fn runtime_dir(project_dir: &Path) -> PathBuf {
    if let Ok(dir) = std::env::var("KAGAN_CORE_RUNTIME_DIR") {
        return PathBuf::from(dir);
    }

    let base = dirs::state_dir()
        .or_else(dirs::data_dir)
        .or_else(dirs::home_dir)
        .unwrap_or_else(std::env::temp_dir);

    let canonical = project_dir.canonicalize().unwrap_or_else(|_| project_dir.to_path_buf());
    base.join("kagan").join(project_hash(&canonical))
}

fn project_hash(path: &Path) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    path.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_override_takes_precedence() {
        // SAFETY: single-threaded test process; no other thread reads this var concurrently.
        unsafe {
            std::env::set_var("KAGAN_CORE_RUNTIME_DIR", "/tmp/explicit-kagan-dir");
        }
        assert_eq!(runtime_dir(Path::new(".")), PathBuf::from("/tmp/explicit-kagan-dir"));
        unsafe {
            std::env::remove_var("KAGAN_CORE_RUNTIME_DIR");
        }
    }

    #[test]
    fn same_project_dir_hashes_to_same_directory() {
        unsafe {
            std::env::remove_var("KAGAN_CORE_RUNTIME_DIR");
        }
        let a = runtime_dir(Path::new("."));
        let b = runtime_dir(Path::new("."));
        assert_eq!(a, b);
    }
}
