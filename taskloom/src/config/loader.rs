use std::path::Path;
use std::str::FromStr;

use crate::types::config::LoopConfig;
use crate::types::enums::{AgentRuntime, Backend};

use super::error::ConfigError;

/// Read and parse a `LoopConfig` from `path`.
pub fn read_config(path: &str) -> Result<LoopConfig, ConfigError> {
    if !Path::new(path).exists() {
        return Err(ConfigError::NotFound(path.to_string()));
    }
    let raw = std::fs::read_to_string(path)?;
    let config: LoopConfig = serde_yaml::from_str(&raw)?;
    Ok(config)
}

/// Read a `LoopConfig` from `path`, then apply `TASKLOOM_*` environment
/// overrides on top of whatever the file specifies.
pub fn read_config_with_env(path: &str) -> Result<LoopConfig, ConfigError> {
    let mut config = read_config(path)?;

    if let Ok(runtime) = std::env::var("TASKLOOM_RUNTIME") {
        if let Ok(parsed) = AgentRuntime::from_str(&runtime) {
            config.runtime = parsed;
        }
    }
    if let Ok(backend) = std::env::var("TASKLOOM_BACKEND") {
        if let Ok(parsed) = Backend::from_str(&backend) {
            config.backend = parsed;
        }
    }
    if let Ok(model) = std::env::var("TASKLOOM_MODEL") {
        config.execution.model = model;
    }
    if let Ok(max_parallel) = std::env::var("TASKLOOM_MAX_PARALLEL_AGENTS") {
        if let Ok(parsed) = max_parallel.parse::<u32>() {
            config.execution.max_parallel_agents = Some(parsed);
        }
    }

    Ok(config)
}

/// Whether a config file exists at `path`.
pub fn config_exists(path: &str) -> bool {
    Path::new(path).exists()
}

/// Serialize `config` to YAML and write it to `path`, creating parent
/// directories as needed.
pub fn write_config(path: &str, config: &LoopConfig) -> Result<(), ConfigError> {
    let path = Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(path, yaml)?;
    Ok(())
}

/// Check cross-field consistency beyond what serde's `#[serde(default)]`
/// already guarantees. Returns a list of human-readable problems, empty if
/// the config is usable as-is.
pub fn validate_config(config: &LoopConfig) -> Vec<String> {
    let mut errors = Vec::new();

    if config.backend == Backend::Linear && config.linear.is_none() {
        errors.push("backend is \"linear\" but no [linear] section is configured".to_string());
    }
    if config.backend == Backend::Jira && config.jira.is_none() {
        errors.push("backend is \"jira\" but no [jira] section is configured".to_string());
    }
    if let Some(max_parallel) = config.execution.max_parallel_agents {
        if max_parallel == 0 {
            errors.push("execution.max_parallel_agents must be at least 1".to_string());
        }
    }
    if config.execution.max_iterations == 0 {
        errors.push("execution.max_iterations must be at least 1".to_string());
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_config_missing_file_is_not_found() {
        let err = read_config("/nonexistent/taskloom.config.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_write_then_read_config_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("taskloom.config.yaml");
        let path_str = path.to_string_lossy().to_string();

        let mut config = LoopConfig::default();
        config.backend = Backend::Local;
        write_config(&path_str, &config).unwrap();

        let read_back = read_config(&path_str).unwrap();
        assert_eq!(read_back.backend, Backend::Local);
        assert_eq!(read_back.execution.max_iterations, config.execution.max_iterations);
    }

    #[test]
    fn test_read_config_with_env_overrides_model() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("taskloom.config.yaml");
        let path_str = path.to_string_lossy().to_string();
        write_config(&path_str, &LoopConfig::default()).unwrap();

        std::env::set_var("TASKLOOM_MODEL", "haiku");
        let config = read_config_with_env(&path_str).unwrap();
        std::env::remove_var("TASKLOOM_MODEL");

        assert_eq!(config.execution.model, "haiku");
    }

    #[test]
    fn test_validate_config_flags_missing_linear_section() {
        let mut config = LoopConfig::default();
        config.backend = Backend::Linear;
        config.linear = None;
        let errors = validate_config(&config);
        assert!(errors.iter().any(|e| e.contains("linear")));
    }

    #[test]
    fn test_validate_config_accepts_local_backend() {
        let mut config = LoopConfig::default();
        config.backend = Backend::Local;
        assert!(validate_config(&config).is_empty());
    }

    #[test]
    fn test_config_exists() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("taskloom.config.yaml");
        assert!(!config_exists(&path.to_string_lossy()));
        std::fs::write(&path, "backend: local\n").unwrap();
        assert!(config_exists(&path.to_string_lossy()));
    }
}
