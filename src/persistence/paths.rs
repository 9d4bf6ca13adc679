//! Data directory layout, following the teacher's `PHOENIX_DB_PATH`
//! env-var-with-fallback convention in `main.rs`.

use std::path::{Path, PathBuf};

const ENV_DATA_DIR: &str = "MIDDLEMAN_DATA_DIR";

#[derive(Debug, Clone)]
pub struct DataDirs {
    root: PathBuf,
}

impl DataDirs {
    #[must_use]
    pub fn resolve() -> Self {
        let root = std::env::var(ENV_DATA_DIR).map_or_else(
            |_| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".middleman")
            },
            PathBuf::from,
        );
        Self { root }
    }

    #[must_use]
    pub fn from_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn ensure_all(&self) -> std::io::Result<()> {
        for dir in [
            self.root(),
            &self.auth_dir(),
            &self.sessions_dir(),
            &self.integrations_dir(),
            &self.env_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn auth_dir(&self) -> PathBuf {
        self.root.join("auth")
    }

    #[must_use]
    pub fn auth_file(&self) -> PathBuf {
        self.auth_dir().join("auth.json")
    }

    #[must_use]
    pub fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    #[must_use]
    pub fn session_file(&self, agent_id: &str) -> PathBuf {
        self.sessions_dir().join(format!("{agent_id}.jsonl"))
    }

    #[must_use]
    pub fn integrations_dir(&self) -> PathBuf {
        self.root.join("integrations")
    }

    #[must_use]
    pub fn integration_file(&self, name: &str) -> PathBuf {
        self.integrations_dir().join(format!("{name}.json"))
    }

    #[must_use]
    pub fn env_dir(&self) -> PathBuf {
        self.root.join("env")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_file_is_named_by_agent_id() {
        let dirs = DataDirs::from_root("/tmp/mm-test");
        assert_eq!(
            dirs.session_file("agent-1"),
            PathBuf::from("/tmp/mm-test/sessions/agent-1.jsonl")
        );
    }

    #[test]
    fn ensure_all_creates_every_subdirectory() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = DataDirs::from_root(tmp.path());
        dirs.ensure_all().unwrap();
        assert!(dirs.auth_dir().is_dir());
        assert!(dirs.sessions_dir().is_dir());
        assert!(dirs.integrations_dir().is_dir());
        assert!(dirs.env_dir().is_dir());
    }
}
