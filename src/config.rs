//! Configuration loading via `ortho-config`.

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::guardrails::CostLimits;

/// DigitalOcean specific configuration derived from environment variables,
/// configuration files, and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "DIGITALOCEAN")]
pub struct ProviderConfig {
    /// API token used for authentication. This value is required and must
    /// be present before any resource is touched.
    pub token: String,
    /// Region for new instances. Defaults to `nyc3`.
    #[ortho_config(default = "nyc3".to_owned())]
    pub region: String,
    /// Size slug for new instances. Defaults to the smallest droplet to
    /// minimise cost during verification runs.
    #[ortho_config(default = "s-1vcpu-1gb".to_owned())]
    pub size: String,
}

/// Harness-wide settings: guardrail limits, file locations, and the
/// downstream verification credential.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq)]
#[ortho_config(
    prefix = "GAUNTLET",
    discovery(
        app_name = "gauntlet",
        env_var = "GAUNTLET_CONFIG_PATH",
        config_file_name = "gauntlet.toml",
        dotfile_name = ".gauntlet.toml",
        project_file_name = "gauntlet.toml"
    )
)]
pub struct HarnessConfig {
    /// Maximum number of instances one session may create.
    #[ortho_config(default = 6)]
    pub max_instances: u32,
    /// Maximum session length in minutes.
    #[ortho_config(default = 60)]
    pub max_session_minutes: u64,
    /// Hourly price of one instance, used for the cost estimate.
    #[ortho_config(default = 0.00893)]
    pub hourly_unit_cost: f64,
    /// Path to the snapshot override file mapping target names to image
    /// identifiers. A missing file falls back to the built-in defaults.
    #[ortho_config(default = "snapshots.json".to_owned())]
    pub snapshot_file: String,
    /// Directory receiving one report artifact per run.
    #[ortho_config(default = "reports".to_owned())]
    pub report_dir: String,
    /// Tag applied to every resource this harness creates, used by the
    /// cleanup sweep.
    #[ortho_config(default = "gauntlet-test".to_owned())]
    pub session_tag: String,
    /// Endpoint probed by the optional service connectivity check. The
    /// check is skipped when unset.
    pub probe_url: Option<String>,
    /// Credential presented by the service connectivity check. Consumed
    /// only by that check, never by the core.
    pub probe_token: Option<String>,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
    section: &'static str,
}

impl FieldMetadata {
    const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
        section: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
            section,
        }
    }
}

fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to [{}] in gauntlet.toml",
            metadata.description, metadata.env_var, metadata.toml_key, metadata.section
        )));
    }
    Ok(())
}

impl ProviderConfig {
    /// Loads configuration using the `ortho-config` derive. Values merge
    /// defaults, configuration files, environment variables, and CLI flags
    /// in that order of precedence.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge
    /// sources.
    pub fn load_from_sources() -> Result<Self, ConfigError> {
        Self::load().map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("gauntlet")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is
    /// empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(
            &self.token,
            &FieldMetadata::new(
                "DigitalOcean API token",
                "DIGITALOCEAN_TOKEN",
                "token",
                "digitalocean",
            ),
        )?;
        require_field(
            &self.region,
            &FieldMetadata::new("region", "DIGITALOCEAN_REGION", "region", "digitalocean"),
        )?;
        require_field(
            &self.size,
            &FieldMetadata::new("instance size", "DIGITALOCEAN_SIZE", "size", "digitalocean"),
        )?;
        Ok(())
    }
}

impl HarnessConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("gauntlet")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on the harness settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty
    /// or a limit is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_instances == 0 {
            return Err(ConfigError::MissingField(String::from(
                "max_instances must be at least 1: set GAUNTLET_MAX_INSTANCES",
            )));
        }
        if self.max_session_minutes == 0 {
            return Err(ConfigError::MissingField(String::from(
                "max_session_minutes must be at least 1: set GAUNTLET_MAX_SESSION_MINUTES",
            )));
        }
        require_field(
            &self.session_tag,
            &FieldMetadata::new(
                "session tag",
                "GAUNTLET_SESSION_TAG",
                "session_tag",
                "gauntlet",
            ),
        )?;
        require_field(
            &self.report_dir,
            &FieldMetadata::new(
                "report directory",
                "GAUNTLET_REPORT_DIR",
                "report_dir",
                "gauntlet",
            ),
        )?;
        Ok(())
    }

    /// Builds the guardrail limits carried by this configuration.
    #[must_use]
    pub const fn cost_limits(&self) -> CostLimits {
        CostLimits::new(
            self.max_instances,
            self.max_session_minutes,
            self.hourly_unit_cost,
        )
    }

    /// Returns the probe credential pair when both halves are configured.
    #[must_use]
    pub fn probe_credential(&self) -> Option<(String, String)> {
        match (self.probe_url.as_deref(), self.probe_token.as_deref()) {
            (Some(url), Some(token)) if !url.trim().is_empty() && !token.trim().is_empty() => {
                Some((url.trim().to_owned(), token.trim().to_owned()))
            }
            _ => None,
        }
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::EnvGuard;
    use rstest::rstest;

    fn harness_config() -> HarnessConfig {
        HarnessConfig {
            max_instances: 6,
            max_session_minutes: 60,
            hourly_unit_cost: 0.00893,
            snapshot_file: String::from("snapshots.json"),
            report_dir: String::from("reports"),
            session_tag: String::from("gauntlet-test"),
            probe_url: None,
            probe_token: None,
        }
    }

    #[rstest]
    fn provider_validation_names_the_token_sources() {
        let config = ProviderConfig {
            token: String::from("  "),
            region: String::from("nyc3"),
            size: String::from("s-1vcpu-1gb"),
        };

        let err = config.validate().expect_err("blank token should fail");
        let rendered = err.to_string();
        assert!(rendered.contains("DIGITALOCEAN_TOKEN"), "{rendered}");
        assert!(rendered.contains("gauntlet.toml"), "{rendered}");
    }

    #[rstest]
    fn harness_validation_rejects_zero_limits() {
        let mut config = harness_config();
        config.max_instances = 0;
        assert!(config.validate().is_err());
    }

    #[rstest]
    fn cost_limits_carry_the_configured_values() {
        let limits = harness_config().cost_limits();
        assert_eq!(limits.max_instances, 6);
        assert_eq!(limits.max_session_minutes, 60);
    }

    #[rstest]
    #[tokio::test]
    async fn harness_config_merges_environment_overrides() {
        let _guard = EnvGuard::set_vars(&[
            ("GAUNTLET_MAX_INSTANCES", "2"),
            ("GAUNTLET_MAX_SESSION_MINUTES", "15"),
        ])
        .await;

        let config =
            HarnessConfig::load_without_cli_args().unwrap_or_else(|err| panic!("load: {err}"));

        assert_eq!(config.max_instances, 2);
        assert_eq!(config.max_session_minutes, 15);
    }

    #[rstest]
    fn probe_credential_requires_both_halves() {
        let mut config = harness_config();
        assert!(config.probe_credential().is_none());

        config.probe_url = Some(String::from("https://api.example.com/v1/models"));
        assert!(config.probe_credential().is_none());

        config.probe_token = Some(String::from("sk-test"));
        assert_eq!(
            config.probe_credential(),
            Some((
                String::from("https://api.example.com/v1/models"),
                String::from("sk-test")
            ))
        );
    }
}
