//! Root configuration type.

use hera_guardrails::{GuardrailSettings, GuardrailsEngine};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use crate::{
    AdmissionConfig, BusinessConfig, ConfigError, IdempotencyConfig, IdentityConfig, LogFormat,
    LoggingConfig, MaintenanceConfig, MetricsSection, RateLimitConfig, ServerConfig,
};

/// Upper bound of any idempotency retention, in minutes.
pub const MAX_RETENTION_MINUTES: u64 = 24 * 60;

/// Complete gateway configuration.
///
/// Use [`ConfigLoader`](crate::ConfigLoader) to load it from files and
/// environment variables.
///
/// # Example
///
/// ```
/// use hera_config::GatewayConfig;
///
/// let config = GatewayConfig::default();
/// assert_eq!(config.rate_limit.write_limit, 60);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    /// HTTP server.
    pub server: ServerConfig,
    /// Process logging and the structured logger.
    pub logging: LoggingConfig,
    /// Prometheus metrics.
    pub metrics: MetricsSection,
    /// Perimeter admission filter.
    pub admission: AdmissionConfig,
    /// Rate limiter.
    pub rate_limit: RateLimitConfig,
    /// Idempotency manager.
    pub idempotency: IdempotencyConfig,
    /// Identity collaborator.
    pub identity: IdentityConfig,
    /// Business-operation collaborator.
    pub business: BusinessConfig,
    /// Guardrails engine.
    pub guardrails: GuardrailSettings,
    /// Background sweeps.
    pub maintenance: MaintenanceConfig,
}

impl GatewayConfig {
    /// Validates cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.http_addr.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::invalid_value(
                "server.http_addr",
                format!("invalid socket address: {}", self.server.http_addr),
            ));
        }
        if self.server.shutdown_timeout_secs == 0 {
            return Err(ConfigError::invalid_value(
                "server.shutdown_timeout_secs",
                "must be greater than 0",
            ));
        }

        if let Some(addr) = &self.metrics.addr {
            if self.metrics.enabled && addr.parse::<SocketAddr>().is_err() {
                return Err(ConfigError::invalid_value(
                    "metrics.addr",
                    format!("invalid socket address: {addr}"),
                ));
            }
        }

        self.validate_admission()?;
        self.validate_rate_limit()?;
        self.validate_idempotency()?;

        positive("identity.timeout_ms", self.identity.timeout_ms)?;
        positive("business.timeout_ms", self.business.timeout_ms)?;
        positive(
            "maintenance.sweep_interval_secs",
            self.maintenance.sweep_interval_secs,
        )?;

        if !self.guardrails.balance_tolerance.is_finite() || self.guardrails.balance_tolerance < 0.0
        {
            return Err(ConfigError::invalid_value(
                "guardrails.balance_tolerance",
                "must be a non-negative number",
            ));
        }
        if let Err(e) = GuardrailsEngine::new(self.guardrails.clone()) {
            return Err(ConfigError::invalid_value(
                "guardrails.smart_code_pattern",
                e.to_string(),
            ));
        }

        Ok(())
    }

    fn validate_admission(&self) -> Result<(), ConfigError> {
        let admission = &self.admission;
        if !admission.enabled {
            return Ok(());
        }
        positive("admission.max_body_bytes", admission.max_body_bytes)?;
        if admission.max_upload_bytes < admission.max_body_bytes {
            return Err(ConfigError::invalid_value(
                "admission.max_upload_bytes",
                "must be at least admission.max_body_bytes",
            ));
        }
        positive(
            "admission.max_requests_per_hour",
            u64::from(admission.max_requests_per_hour),
        )?;
        positive(
            "admission.max_concurrent_per_source",
            u64::from(admission.max_concurrent_per_source),
        )?;
        positive(
            "admission.concurrent_release_secs",
            admission.concurrent_release_secs,
        )?;
        if admission.max_block_secs < admission.rate_block_secs {
            return Err(ConfigError::invalid_value(
                "admission.max_block_secs",
                "must be at least admission.rate_block_secs",
            ));
        }
        Ok(())
    }

    fn validate_rate_limit(&self) -> Result<(), ConfigError> {
        let rate_limit = &self.rate_limit;
        positive("rate_limit.window_secs", rate_limit.window_secs)?;
        positive("rate_limit.read_limit", u64::from(rate_limit.read_limit))?;
        positive("rate_limit.write_limit", u64::from(rate_limit.write_limit))?;
        positive("rate_limit.finance_limit", u64::from(rate_limit.finance_limit))?;
        positive(
            "rate_limit.privileged_limit",
            u64::from(rate_limit.privileged_limit),
        )
    }

    fn validate_idempotency(&self) -> Result<(), ConfigError> {
        let idempotency = &self.idempotency;
        for (field, minutes) in [
            ("idempotency.retention_minutes", idempotency.retention_minutes),
            (
                "idempotency.finance_retention_minutes",
                idempotency.finance_retention_minutes,
            ),
        ] {
            if !(1..=MAX_RETENTION_MINUTES).contains(&minutes) {
                return Err(ConfigError::invalid_value(
                    field,
                    format!("must be between 1 and {MAX_RETENTION_MINUTES} minutes"),
                ));
            }
        }
        positive(
            "idempotency.in_progress_timeout_secs",
            idempotency.in_progress_timeout_secs,
        )?;
        if !(16..=1024).contains(&idempotency.max_key_length) {
            return Err(ConfigError::invalid_value(
                "idempotency.max_key_length",
                "must be between 16 and 1024",
            ));
        }
        Ok(())
    }

    /// Development preset: pretty debug logs, debug entries in the
    /// structured logger.
    ///
    /// # Example
    ///
    /// ```
    /// use hera_config::GatewayConfig;
    ///
    /// let config = GatewayConfig::development();
    /// assert_eq!(config.logging.level, "debug");
    /// assert!(config.server.is_development());
    /// ```
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();

        config.logging.level = "debug".to_string();
        config.logging.format = LogFormat::Pretty;
        config.logging.ansi_enabled = true;
        config.logging.include_location = true;

        config.server.environment = "development".to_string();
        config.server.shutdown_timeout_secs = 5;

        config
    }

    /// Production preset: JSON logs at info level.
    #[must_use]
    pub fn production() -> Self {
        let mut config = Self::default();

        config.logging.level = "info".to_string();
        config.logging.format = LogFormat::Json;
        config.logging.ansi_enabled = false;

        config.server.environment = "production".to_string();
        config.server.trust_forwarded_for = true;

        config
    }
}

fn positive(field: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        Err(ConfigError::invalid_value(field, "must be greater than 0"))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(GatewayConfig::default().validate().is_ok());
        assert!(GatewayConfig::development().validate().is_ok());
        assert!(GatewayConfig::production().validate().is_ok());
    }

    #[test]
    fn test_invalid_server_addr() {
        let mut config = GatewayConfig::default();
        config.server.http_addr = "not-an-address".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("server.http_addr"));
    }

    #[test]
    fn test_retention_bounds() {
        let mut config = GatewayConfig::default();
        config.idempotency.retention_minutes = 0;
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("idempotency.retention_minutes"));

        config.idempotency.retention_minutes = 1440;
        assert!(config.validate().is_ok());

        config.idempotency.finance_retention_minutes = 1441;
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("finance_retention_minutes"));
    }

    #[test]
    fn test_zero_budget_rejected() {
        let mut config = GatewayConfig::default();
        config.rate_limit.finance_limit = 0;
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("rate_limit.finance_limit"));
    }

    #[test]
    fn test_upload_cap_below_body_cap_rejected() {
        let mut config = GatewayConfig::default();
        config.admission.max_upload_bytes = 10;
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("max_upload_bytes"));
    }

    #[test]
    fn test_bad_smart_code_pattern_rejected() {
        let mut config = GatewayConfig::default();
        config.guardrails.smart_code_pattern = "(".to_string();
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("smart_code_pattern"));
    }

    #[test]
    fn test_toml_roundtrip_sections() {
        let toml_str = toml::to_string_pretty(&GatewayConfig::default()).unwrap();
        for section in ["[server]", "[rate_limit]", "[idempotency]", "[guardrails]", "[admission]"] {
            assert!(toml_str.contains(section), "missing {section}");
        }
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_str = r#"
            [rate_limit]
            strategy = "sliding_window"
            write_limit = 120

            [guardrails]
            tier_reporting = "violated"
        "#;
        let config: GatewayConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(
            config.rate_limit.strategy,
            crate::RateLimitStrategy::SlidingWindow
        );
        assert_eq!(config.rate_limit.write_limit, 120);
        assert_eq!(
            config.guardrails.tier_reporting,
            hera_guardrails::TierReporting::Violated
        );
        assert_eq!(config.server.http_addr, "0.0.0.0:8080");
    }
}
