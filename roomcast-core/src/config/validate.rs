//! Configuration validation rules.

use super::schema::Config;
use tracing::warn;

/// Validate configuration and return aggregated validation errors.
pub fn validate_config(config: &Config) -> crate::Result<()> {
    let mut errors = Vec::new();

    if config.bus.component_name.trim().is_empty() {
        errors.push("bus.component_name must not be empty".to_string());
    }
    if config.bus.channel_capacity == 0 {
        errors.push("bus.channel_capacity must be > 0".to_string());
    }

    let identity = config.identity.default_identity.trim();
    if identity.is_empty() {
        errors.push("identity.default_identity must not be empty".to_string());
    } else if !is_user_id(identity) {
        errors.push(format!(
            "identity.default_identity must look like @localpart:server, got {}",
            identity
        ));
    }

    if !config.encryption.enabled && config.encryption.encrypt_notices.is_some() {
        warn!("encryption.encrypt_notices is set but encryption is disabled; ignoring it");
    }

    let format = config.logging.format.to_ascii_lowercase();
    if format != "text" && format != "json" {
        errors.push(format!(
            "logging.format must be text or json, got {}",
            config.logging.format
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(crate::Error::Validation(errors.join("; ")))
    }
}

/// `@localpart:server` with both parts non-empty
pub fn is_user_id(candidate: &str) -> bool {
    let Some(rest) = candidate.strip_prefix('@') else {
        return false;
    };
    match rest.split_once(':') {
        Some((localpart, server)) => !localpart.is_empty() && !server.is_empty(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_defaults() {
        validate_config(&Config::default()).unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_identity() {
        let mut config = Config::default();
        config.identity.default_identity = "roomcast".to_string();

        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("identity.default_identity"));
    }

    #[test]
    fn test_validate_aggregates_errors() {
        let mut config = Config::default();
        config.bus.component_name = " ".to_string();
        config.bus.channel_capacity = 0;
        config.logging.format = "yaml".to_string();

        let msg = validate_config(&config).unwrap_err().to_string();
        assert!(msg.contains("bus.component_name"));
        assert!(msg.contains("bus.channel_capacity"));
        assert!(msg.contains("logging.format"));
    }

    #[test]
    fn test_notice_setting_without_encryption_is_accepted() {
        let mut config = Config::default();
        config.encryption.encrypt_notices = Some(false);
        validate_config(&config).unwrap();
    }

    #[test]
    fn test_is_user_id() {
        assert!(is_user_id("@bot:example.org"));
        assert!(!is_user_id("bot:example.org"));
        assert!(!is_user_id("@:example.org"));
        assert!(!is_user_id("@bot:"));
        assert!(!is_user_id("@bot"));
    }
}
