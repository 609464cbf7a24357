//! Code injection: writing a retrieved function into a caller's project.
//!
//! Everything lands under a `local_pkg/` subdirectory of the target so the
//! injected files are clearly grouped and trivially gitignored. Writes go
//! through a temp file and rename so a crash never leaves a half-written
//! module in the caller's tree.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub const INJECTION_DIR: &str = "local_pkg";

/// Write `code` to `<target_dir>/local_pkg/<name>.<ext>`, creating the
/// directory chain as needed and overwriting any previous injection of the
/// same name. Returns the final path.
pub fn write_function(target_dir: &Path, name: &str, code: &str, ext: &str) -> Result<PathBuf> {
    let pkg_dir = target_dir.join(INJECTION_DIR);
    fs::create_dir_all(&pkg_dir)
        .with_context(|| format!("create injection dir {}", pkg_dir.display()))?;

    let dest = pkg_dir.join(format!("{name}.{ext}"));
    let tmp = pkg_dir.join(format!(".{name}.{ext}.tmp"));
    fs::write(&tmp, code).with_context(|| format!("write staged code {}", tmp.display()))?;
    fs::rename(&tmp, &dest)
        .with_context(|| format!("publish injected code {}", dest.display()))?;

    tracing::info!(
        name,
        path = %dest.display(),
        bytes = code.len(),
        "function injected"
    );
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_injection_dir_and_writes_code() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_function(dir.path(), "helper", "def helper(): pass", "py")
            .expect("write function");
        assert!(path.ends_with("local_pkg/helper.py"));
        assert_eq!(
            fs::read_to_string(&path).expect("read back"),
            "def helper(): pass"
        );
    }

    #[test]
    fn overwrites_previous_injection() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_function(dir.path(), "helper", "old", "py").expect("first write");
        let path = write_function(dir.path(), "helper", "new", "py").expect("second write");
        assert_eq!(fs::read_to_string(&path).expect("read back"), "new");
    }

    #[test]
    fn nested_target_dir_is_created() {
        let dir = tempfile::tempdir().expect("tempdir");
        let nested = dir.path().join("a").join("b");
        let path = write_function(&nested, "deep", "code", "py").expect("write nested");
        assert!(path.starts_with(&nested));
        assert!(path.exists());
    }
}
