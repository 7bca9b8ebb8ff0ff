use std::env;
use std::path::{Path, PathBuf};

/// Where the active configuration was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathConfigType {
    Local,
    Global,
}

/// Resolved configuration path, local-project or global-user.
#[derive(Debug, Clone)]
pub struct PathConfig {
    pub config_type: PathConfigType,
    pub config_path: String,
}

/// Get the global config directory (~/.config/taskloom or $XDG_CONFIG_HOME/taskloom).
pub fn get_global_config_dir() -> PathBuf {
    let base = if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        PathBuf::from(xdg)
    } else if let Some(home) = dirs::home_dir() {
        home.join(".config")
    } else {
        PathBuf::from(".config")
    };
    base.join("taskloom")
}

/// Walk up from `start_dir` looking for taskloom.config.yaml.
pub fn find_local_config(start_dir: Option<&Path>) -> Option<PathBuf> {
    let start = match start_dir {
        Some(dir) => dir.to_path_buf(),
        None => env::current_dir().ok()?,
    };

    let mut dir = start.as_path();

    loop {
        let config_path = dir.join("taskloom.config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        match dir.parent() {
            Some(parent) if parent != dir => dir = parent,
            _ => break,
        }
    }

    None
}

/// Resolve the config path to use: local (walking up the tree) beats global.
pub fn resolve_paths() -> PathConfig {
    if let Some(local_config) = find_local_config(None) {
        return PathConfig {
            config_type: PathConfigType::Local,
            config_path: local_config.to_string_lossy().to_string(),
        };
    }

    let global_config_path = get_global_config_dir().join("config.yaml");
    PathConfig {
        config_type: PathConfigType::Global,
        config_path: global_config_path.to_string_lossy().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_local_config_with_temp_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let config_path = tmp.path().join("taskloom.config.yaml");
        std::fs::write(&config_path, "backend: linear\n").unwrap();

        let found = find_local_config(Some(tmp.path()));
        assert!(found.is_some());
        assert_eq!(found.unwrap(), config_path);
    }

    #[test]
    fn test_find_local_config_walks_up() {
        let tmp = tempfile::tempdir().unwrap();
        let config_path = tmp.path().join("taskloom.config.yaml");
        std::fs::write(&config_path, "backend: linear\n").unwrap();

        let subdir = tmp.path().join("src").join("lib");
        std::fs::create_dir_all(&subdir).unwrap();

        let found = find_local_config(Some(&subdir));
        assert!(found.is_some());
        assert_eq!(found.unwrap(), config_path);
    }

    #[test]
    fn test_find_local_config_returns_none() {
        let tmp = tempfile::tempdir().unwrap();
        let found = find_local_config(Some(tmp.path()));
        assert!(found.is_none());
    }

    #[test]
    fn test_get_global_config_dir() {
        let dir = get_global_config_dir();
        let dir_str = dir.to_string_lossy();
        assert!(dir_str.contains("taskloom"));
    }
}
