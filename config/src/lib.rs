//! Load configuration from the user config dir `config.toml` and project `.env`,
//! then apply to the process environment with priority: **existing env > .env > config.toml**.
//!
//! The serve binary calls [`load_and_apply`] once at startup so every knob
//! (API keys, model name, database path, timeouts) can live in either place.

mod dotenv;
mod file_toml;

use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("config dir unavailable")]
    ConfigDir,
    #[error("read config.toml: {0}")]
    TomlRead(std::io::Error),
    #[error("parse config.toml: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("read .env: {0}")]
    DotenvRead(std::io::Error),
}

/// Loads config from `<config dir>/<app_name>/config.toml` and an optional project
/// `.env`, then sets environment variables only for keys that are **not** already
/// set (so the existing environment always wins).
///
/// Order of precedence when a key is missing in the process environment:
/// 1. Value from project `.env` (current directory, or `override_dir` if given)
/// 2. Value from the `[env]` table of `config.toml`
///
/// * `app_name`: e.g. `"morada"`, used for `~/.config/<app_name>/config.toml`.
/// * `override_dir`: if `Some`, look for `.env` there instead of the current directory.
pub fn load_and_apply(app_name: &str, override_dir: Option<&Path>) -> Result<(), LoadError> {
    let toml_map = file_toml::load_env_map(app_name)?;
    let dotenv_map = dotenv::load_env_map(override_dir).map_err(LoadError::DotenvRead)?;

    let mut keys: std::collections::HashSet<String> = toml_map.keys().cloned().collect();
    keys.extend(dotenv_map.keys().cloned());

    for key in keys {
        if std::env::var(&key).is_ok() {
            continue; // existing env wins
        }
        let value = dotenv_map.get(&key).or_else(|| toml_map.get(&key)).cloned();
        if let Some(v) = value {
            std::env::set_var(&key, v);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn restore_var(key: &str, prev: Option<String>) {
        match prev {
            Some(v) => env::set_var(key, v),
            None => env::remove_var(key),
        }
    }

    #[test]
    fn existing_env_wins() {
        env::set_var("MORADA_CONFIG_TEST_EXISTING", "from_env");
        let _ = load_and_apply("morada", None);
        assert_eq!(
            env::var("MORADA_CONFIG_TEST_EXISTING").as_deref(),
            Ok("from_env")
        );
        env::remove_var("MORADA_CONFIG_TEST_EXISTING");
    }

    #[test]
    fn load_and_apply_no_config_ok() {
        let r = load_and_apply("morada-nonexistent-app-xyz", None::<&std::path::Path>);
        assert!(r.is_ok());
    }

    #[test]
    fn dotenv_overrides_toml() {
        let xdg_dir = tempfile::tempdir().unwrap();
        let app_dir = xdg_dir.path().join("morada");
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(
            app_dir.join("config.toml"),
            "[env]\nMORADA_CONFIG_TEST_PRIORITY = \"from_toml\"\n",
        )
        .unwrap();

        let dotenv_dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dotenv_dir.path().join(".env"),
            "MORADA_CONFIG_TEST_PRIORITY=from_dotenv\n",
        )
        .unwrap();

        let prev_xdg = env::var("XDG_CONFIG_HOME").ok();
        env::set_var("XDG_CONFIG_HOME", xdg_dir.path());
        env::remove_var("MORADA_CONFIG_TEST_PRIORITY");

        let _ = load_and_apply("morada", Some(dotenv_dir.path()));
        let val = env::var("MORADA_CONFIG_TEST_PRIORITY").unwrap();
        env::remove_var("MORADA_CONFIG_TEST_PRIORITY");
        restore_var("XDG_CONFIG_HOME", prev_xdg);

        assert_eq!(val, "from_dotenv");
    }

    #[test]
    fn toml_applied_when_no_dotenv() {
        let xdg_dir = tempfile::tempdir().unwrap();
        let app_dir = xdg_dir.path().join("morada");
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(
            app_dir.join("config.toml"),
            "[env]\nMORADA_CONFIG_TEST_TOML_ONLY = \"from_toml\"\n",
        )
        .unwrap();

        let empty_dir = tempfile::tempdir().unwrap();

        let prev_xdg = env::var("XDG_CONFIG_HOME").ok();
        env::set_var("XDG_CONFIG_HOME", xdg_dir.path());
        env::remove_var("MORADA_CONFIG_TEST_TOML_ONLY");

        let _ = load_and_apply("morada", Some(empty_dir.path()));
        let val = env::var("MORADA_CONFIG_TEST_TOML_ONLY").unwrap();
        env::remove_var("MORADA_CONFIG_TEST_TOML_ONLY");
        restore_var("XDG_CONFIG_HOME", prev_xdg);

        assert_eq!(val, "from_toml");
    }

    #[test]
    fn invalid_toml_fails_with_parse_error() {
        let xdg_dir = tempfile::tempdir().unwrap();
        let app_dir = xdg_dir.path().join("morada");
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(app_dir.join("config.toml"), "invalid [[[\n").unwrap();

        let prev_xdg = env::var("XDG_CONFIG_HOME").ok();
        env::set_var("XDG_CONFIG_HOME", xdg_dir.path());

        let result = load_and_apply("morada", None::<&std::path::Path>);
        restore_var("XDG_CONFIG_HOME", prev_xdg);

        assert!(matches!(result, Err(LoadError::TomlParse(_))));
    }
}
