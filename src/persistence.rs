//! Persisted state layout (spec §6): data directory resolution and atomic
//! file writers for `auth/`, `sessions/`, `integrations/`, `env/`.

mod atomic;
mod paths;

pub use atomic::{write_atomic, write_atomic_private};
pub use paths::DataDirs;
