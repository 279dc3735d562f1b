pub mod config;

use std::path::PathBuf;

pub use config::{
    AppConfig, ChatConfig, ConfigError, Environment, TwitchConfig, DEFAULT_BIND_ADDR,
};

/// Loads a `.env` file into the process environment, returning its path when one was found.
///
/// Variables already present in the environment win over the file.
pub fn load_env_file() -> Option<PathBuf> {
    dotenvy::dotenv().ok()
}

#[cfg(test)]
pub(crate) static ENV_GUARD: std::sync::LazyLock<std::sync::Mutex<()>> =
    std::sync::LazyLock::new(|| std::sync::Mutex::new(()));
