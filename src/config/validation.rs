use crate::config::types::{
    Config, FetchConfig, OutputConfig, RateLimitConfig, ResourceEntry, SchedulerConfig,
};
use crate::ConfigError;
use std::collections::HashSet;
use std::net::IpAddr;

/// One hour; backoff is this unit times the attempt number
const MAX_RETRY_BACKOFF_UNIT_MS: u64 = 3_600_000;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_scheduler_config(&config.scheduler)?;
    validate_fetch_config(&config.fetch)?;
    validate_rate_limit_config(&config.rate_limit)?;
    validate_output_config(&config.output)?;
    validate_resources(&config.resources)?;

    // every resource queue needs at least one worker to drain it
    if config.scheduler.worker_ceiling < config.resources.len() {
        return Err(ConfigError::Validation(format!(
            "worker_ceiling ({}) must be >= the number of resources ({})",
            config.scheduler.worker_ceiling,
            config.resources.len()
        )));
    }

    Ok(())
}

/// Validates worker pool and queue configuration
fn validate_scheduler_config(config: &SchedulerConfig) -> Result<(), ConfigError> {
    if config.worker_ceiling < 1 {
        return Err(ConfigError::Validation(
            "worker_ceiling must be >= 1".to_string(),
        ));
    }

    if config.initial_workers_per_resource < 1 {
        return Err(ConfigError::Validation(
            "initial_workers_per_resource must be >= 1".to_string(),
        ));
    }

    if !(config.scale_threshold > 0.0 && config.scale_threshold < 1.0) {
        return Err(ConfigError::Validation(format!(
            "scale_threshold must be between 0 and 1 (exclusive), got {}",
            config.scale_threshold
        )));
    }

    if config.scale_check_interval_ms < 1 {
        return Err(ConfigError::Validation(
            "scale_check_interval_ms must be >= 1ms".to_string(),
        ));
    }

    if config.idle_interval_ms < 1 {
        return Err(ConfigError::Validation(
            "idle_interval_ms must be >= 1ms".to_string(),
        ));
    }

    if config.stats_interval_ms < 1 {
        return Err(ConfigError::Validation(
            "stats_interval_ms must be >= 1ms".to_string(),
        ));
    }

    if config.queue_capacity_per_resource < 1 {
        return Err(ConfigError::Validation(
            "queue_capacity_per_resource must be >= 1".to_string(),
        ));
    }

    if config.priority_queue_capacity < 1 {
        return Err(ConfigError::Validation(
            "priority_queue_capacity must be >= 1".to_string(),
        ));
    }

    if config.retry_backoff_unit_ms > MAX_RETRY_BACKOFF_UNIT_MS {
        return Err(ConfigError::Validation(format!(
            "retry_backoff_unit_ms must be <= {}, got {}",
            MAX_RETRY_BACKOFF_UNIT_MS, config.retry_backoff_unit_ms
        )));
    }

    Ok(())
}

fn validate_fetch_config(config: &FetchConfig) -> Result<(), ConfigError> {
    if config.request_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "request_timeout_secs must be >= 1".to_string(),
        ));
    }

    if config.clients_per_resource < 1 {
        return Err(ConfigError::Validation(
            "clients_per_resource must be >= 1".to_string(),
        ));
    }

    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user_agent cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_rate_limit_config(config: &RateLimitConfig) -> Result<(), ConfigError> {
    if config.requests_per_second < 1 {
        return Err(ConfigError::Validation(format!(
            "requests_per_second must be >= 1, got {}",
            config.requests_per_second
        )));
    }

    if config.burst < 1 {
        return Err(ConfigError::Validation(format!(
            "burst must be >= 1, got {}",
            config.burst
        )));
    }

    Ok(())
}

fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.download_dir.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "download_dir cannot be empty".to_string(),
        ));
    }

    if config.journal_capacity < 1 {
        return Err(ConfigError::Validation(
            "journal_capacity must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates the resource list: non-empty, unique names, parseable addresses
fn validate_resources(resources: &[ResourceEntry]) -> Result<(), ConfigError> {
    if resources.is_empty() {
        return Err(ConfigError::Validation(
            "at least one [[resource]] entry is required".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for entry in resources {
        if entry.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "resource name cannot be empty".to_string(),
            ));
        }

        if !seen.insert(entry.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate resource name '{}'",
                entry.name
            )));
        }

        if let Some(addr) = &entry.local_address {
            addr.parse::<IpAddr>().map_err(|e| {
                ConfigError::InvalidAddress(format!("'{}' for resource '{}': {}", addr, entry.name, e))
            })?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::CapacityClass;

    fn resource(name: &str, addr: Option<&str>) -> ResourceEntry {
        ResourceEntry {
            name: name.to_string(),
            local_address: addr.map(str::to_string),
            capacity: CapacityClass::Standard,
        }
    }

    #[test]
    fn test_validate_resources() {
        assert!(validate_resources(&[resource("eth0", None)]).is_ok());
        assert!(validate_resources(&[resource("eth0", Some("10.0.0.2"))]).is_ok());
        assert!(validate_resources(&[resource("eth0", Some("::1"))]).is_ok());

        assert!(validate_resources(&[]).is_err());
        assert!(validate_resources(&[resource("", None)]).is_err());
        assert!(validate_resources(&[resource("eth0", None), resource("eth0", None)]).is_err());
        assert!(matches!(
            validate_resources(&[resource("eth0", Some("not-an-ip"))]),
            Err(ConfigError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_validate_scale_threshold() {
        let mut config = SchedulerConfig::default();
        assert!(validate_scheduler_config(&config).is_ok());

        config.scale_threshold = 0.0;
        assert!(validate_scheduler_config(&config).is_err());

        config.scale_threshold = 1.0;
        assert!(validate_scheduler_config(&config).is_err());
    }

    #[test]
    fn test_validate_retry_backoff_cap() {
        let mut config = SchedulerConfig::default();
        config.retry_backoff_unit_ms = MAX_RETRY_BACKOFF_UNIT_MS;
        assert!(validate_scheduler_config(&config).is_ok());

        config.retry_backoff_unit_ms = u64::MAX;
        assert!(validate_scheduler_config(&config).is_err());
    }

    #[test]
    fn test_validate_rate_limit() {
        let mut config = RateLimitConfig::default();
        assert!(validate_rate_limit_config(&config).is_ok());

        config.requests_per_second = 0;
        assert!(validate_rate_limit_config(&config).is_err());
    }
}
