//! Atomic (temp + rename) file writers, used for `auth.json`, integration
//! profiles, and env files (spec §6: "all files written atomically").

use std::io::Write;
use std::path::Path;

use crate::error::{MiddlemanError, Result};

fn write_via_temp(path: &Path, bytes: &[u8], mode: Option<u32>) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;

    let tmp_path = parent.join(format!(
        ".{}.tmp-{}",
        path.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("middleman"),
        uuid::Uuid::new_v4()
    ));

    {
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    #[cfg(unix)]
    if let Some(mode) = mode {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    std::fs::rename(&tmp_path, path).map_err(MiddlemanError::Io)
}

/// Atomically write `bytes` to `path` with default file permissions.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    write_via_temp(path, bytes, None)
}

/// Atomically write `bytes` to `path` as an owner-only (`0600`) file, for
/// credential/env files per spec §6.
pub fn write_atomic_private(path: &Path, bytes: &[u8]) -> Result<()> {
    write_via_temp(path, bytes, Some(0o600))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_atomic_round_trips_content() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested/auth.json");
        write_atomic_private(&path, b"{\"token\":\"secret\"}").unwrap();
        let read_back = std::fs::read(&path).unwrap();
        assert_eq!(read_back, b"{\"token\":\"secret\"}");
    }

    #[cfg(unix)]
    #[test]
    fn write_atomic_private_sets_owner_only_mode() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("auth.json");
        write_atomic_private(&path, b"{}").unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn write_atomic_overwrites_existing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("f.json");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
    }
}
