use std::path::Path;

use crate::config::schema::{Config, StorageBackend};
use crate::error::ConfigError;

const SUPPORTED_VERSION: &str = "1.0";

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let invalid = |message: String| Err(ConfigError::Validation { message });

    if config.version != SUPPORTED_VERSION {
        return invalid(format!("Unsupported config version: {}", config.version));
    }

    let storage = &config.storage;
    if storage.bucket.is_empty() || storage.bucket.contains('/') {
        return invalid(format!("Invalid storage bucket '{}'", storage.bucket));
    }
    if storage.base_path.starts_with('/')
        || storage
            .base_path
            .split('/')
            .any(|segment| segment == "." || segment == "..")
    {
        return invalid(format!(
            "storage.base_path must be a relative key, got '{}'",
            storage.base_path
        ));
    }
    if storage.backend == StorageBackend::Filesystem && storage.root_dir.as_os_str().is_empty() {
        return invalid("storage.root_dir must be set for the filesystem backend".to_string());
    }
    if let Some(ref endpoint) = storage.endpoint_url {
        if !is_http_url(endpoint) {
            return invalid(format!("storage.endpoint_url is not an http(s) URL: {}", endpoint));
        }
    }

    let worker = &config.worker;
    if worker.executable.as_os_str().is_empty() {
        return invalid("worker.executable must be set".to_string());
    }
    if worker.process_timeout_secs == 0 {
        return invalid("worker.process_timeout_secs must be greater than 0".to_string());
    }
    if worker.max_queue_wait_secs == 0 {
        return invalid("worker.max_queue_wait_secs must be greater than 0".to_string());
    }
    if worker.max_score_bytes == 0 {
        return invalid("worker.max_score_bytes must be greater than 0".to_string());
    }
    if worker.poll_interval_ms == 0 {
        return invalid("worker.poll_interval_ms must be greater than 0".to_string());
    }

    if let Some(ref webhook) = config.notification.webhook {
        if !is_http_url(webhook) {
            return invalid(format!("notification.webhook is not an http(s) URL: {}", webhook));
        }
    }
    if config.notification.timeout_secs == 0 {
        return invalid("notification.timeout_secs must be greater than 0".to_string());
    }

    if let Some(ref filter) = config.logging.filter {
        tracing_subscriber::EnvFilter::try_new(filter).map_err(|e| ConfigError::LogFilter {
            filter: filter.clone(),
            reason: e.to_string(),
        })?;
    }

    Ok(())
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
    {
        "version": "1.0",
        "worker": { "executable": "/opt/neutrino/run.sh" }
    }
    "#;

    #[test]
    fn test_load_minimal_config_applies_defaults() {
        let config = load_config_from_str(MINIMAL).unwrap();
        assert_eq!(config.storage.backend, StorageBackend::Filesystem);
        assert_eq!(config.storage.bucket, "synthjob");
        assert_eq!(config.worker.concurrency, 1);
        assert_eq!(config.worker.process_timeout_secs, 1200);
        assert_eq!(config.worker.max_queue_wait_secs, 86400);
        assert_eq!(config.worker.max_score_bytes, 1 << 20);
        assert_eq!(config.notification.timeout_secs, 10);
        assert!(config.notification.webhook.is_none());
        assert!(!config.logging.json);
    }

    #[test]
    fn test_load_full_config() {
        let config_json = r#"
        {
            "version": "1.0",
            "database": { "path": "/var/lib/synthjob/jobs.db" },
            "storage": {
                "backend": "s3",
                "bucket": "voices",
                "base_path": "jobs",
                "endpoint_url": "http://localhost:9000",
                "force_path_style": true
            },
            "worker": {
                "executable": "/opt/neutrino/run.sh",
                "concurrency": 4,
                "process_timeout_secs": 60,
                "env": { "LANG": "C.UTF-8" },
                "extra_args": ["--shell", "bash"]
            },
            "notification": { "webhook": "https://hooks.example.com/synth", "timeout_secs": 3 },
            "logging": { "json": true, "filter": "synthjob=debug" }
        }
        "#;

        let config = load_config_from_str(config_json).unwrap();
        assert_eq!(config.storage.backend, StorageBackend::S3);
        assert_eq!(config.storage.bucket, "voices");
        assert!(config.storage.force_path_style);
        assert_eq!(config.worker.concurrency, 4);
        assert_eq!(config.worker.env.get("LANG").map(String::as_str), Some("C.UTF-8"));
        assert_eq!(config.worker.extra_args, vec!["--shell", "bash"]);
        assert_eq!(
            config.notification.webhook.as_deref(),
            Some("https://hooks.example.com/synth")
        );
        assert_eq!(
            config.database.resolve_path().unwrap(),
            std::path::PathBuf::from("/var/lib/synthjob/jobs.db")
        );
    }

    #[test]
    fn test_invalid_version() {
        let result = load_config_from_str(&MINIMAL.replace("1.0", "2.0"));
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_missing_worker_section() {
        let result = load_config_from_str(r#"{ "version": "1.0" }"#);
        assert!(matches!(result, Err(ConfigError::ParseJson(_))));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config_json = r#"
        {
            "version": "1.0",
            "worker": { "executable": "/bin/true", "process_timeout_secs": 0 }
        }
        "#;
        assert!(load_config_from_str(config_json).is_err());
    }

    #[test]
    fn test_zero_queue_wait_rejected() {
        let config_json = r#"
        {
            "version": "1.0",
            "worker": { "executable": "/bin/true", "max_queue_wait_secs": 0 }
        }
        "#;
        assert!(load_config_from_str(config_json).is_err());
    }

    #[test]
    fn test_escaping_base_path_rejected() {
        let config_json = r#"
        {
            "version": "1.0",
            "storage": { "base_path": "../elsewhere" },
            "worker": { "executable": "/bin/true" }
        }
        "#;
        assert!(load_config_from_str(config_json).is_err());
    }

    #[test]
    fn test_non_http_webhook_rejected() {
        let config_json = r#"
        {
            "version": "1.0",
            "worker": { "executable": "/bin/true" },
            "notification": { "webhook": "ftp://example.com" }
        }
        "#;
        assert!(load_config_from_str(config_json).is_err());
    }

    #[test]
    fn test_invalid_log_filter_rejected() {
        let config_json = r#"
        {
            "version": "1.0",
            "worker": { "executable": "/bin/true" },
            "logging": { "filter": "synthjob=notalevel" }
        }
        "#;
        assert!(matches!(
            load_config_from_str(config_json),
            Err(ConfigError::LogFilter { .. })
        ));
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config("/nonexistent/synthjob.json");
        assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    }

    #[test]
    fn test_child_env_overlays_explicit_values() {
        let mut config = load_config_from_str(MINIMAL).unwrap().worker;
        config.pass_env = vec!["SYNTHJOB_SURELY_UNSET_VAR".to_string()];
        config.env.insert("A".to_string(), "1".to_string());
        let env = config.child_env();
        assert_eq!(env.len(), 1);
        assert_eq!(env.get("A").map(String::as_str), Some("1"));
    }
}
