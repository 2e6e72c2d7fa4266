use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use fleet_leads_core::{LeadError, Role};

use crate::auth::{DirectoryUser, DEFAULT_SESSION_TTL};

pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;
pub const DEFAULT_ADVISOR_API_KEY: &str = "advisor-dev-key";

#[derive(Debug, Clone, Parser)]
#[command(name = "fleet-leads-service")]
#[command(about = "HTTP backend for fleet advisory lead capture and triage")]
pub struct ServiceArgs {
    #[arg(long, env = "BIND", default_value = "0.0.0.0:4173")]
    pub bind: SocketAddr,
    #[arg(long, env = "DATA_FILE", default_value = "./data/db.json")]
    pub data_file: PathBuf,
    #[arg(long, env = "ADVISOR_API_KEY", default_value = DEFAULT_ADVISOR_API_KEY)]
    pub advisor_api_key: String,
    #[arg(long, env = "ADVISOR_USERNAME", default_value = "advisor")]
    pub advisor_username: String,
    #[arg(long, env = "ADVISOR_PASSWORD", default_value = "advisor123")]
    pub advisor_password: String,
    #[arg(long, env = "ADMIN_USERNAME", default_value = "admin")]
    pub admin_username: String,
    #[arg(long, env = "ADMIN_PASSWORD", default_value = "admin123")]
    pub admin_password: String,
    #[arg(long, default_value_t = 8 * 60 * 60 * 1000)]
    pub session_ttl_ms: u64,
    #[arg(long, default_value_t = DEFAULT_MAX_BODY_BYTES)]
    pub max_body_bytes: usize,
}

/// Runtime settings handed to the router, independent of how they were
/// sourced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub advisor_api_key: String,
    pub users: Vec<DirectoryUser>,
    pub session_ttl: Duration,
    pub max_body_bytes: usize,
}

impl ServiceConfig {
    /// Local defaults: the dev API key and the two seeded accounts.
    #[must_use]
    pub fn development() -> Self {
        Self {
            advisor_api_key: DEFAULT_ADVISOR_API_KEY.to_string(),
            users: vec![
                DirectoryUser::new("u1", "advisor", "advisor123", Role::Advisor),
                DirectoryUser::new("u2", "admin", "admin123", Role::Admin),
            ],
            session_ttl: DEFAULT_SESSION_TTL,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    /// # Errors
    /// Returns [`LeadError::Configuration`] for unusable settings.
    pub fn validate(&self) -> Result<(), LeadError> {
        if self.session_ttl.is_zero() {
            return Err(LeadError::Configuration(
                "session TTL must be greater than zero".to_string(),
            ));
        }
        if self.max_body_bytes == 0 {
            return Err(LeadError::Configuration(
                "max body bytes must be greater than zero".to_string(),
            ));
        }
        for user in &self.users {
            if user.username.trim().is_empty() || user.password.is_empty() {
                return Err(LeadError::Configuration(format!(
                    "user {} needs a username and password",
                    user.id
                )));
            }
        }
        if self.users.len() > 1 && self.users[0].username == self.users[1].username {
            return Err(LeadError::Configuration(
                "advisor and admin usernames must differ".to_string(),
            ));
        }
        Ok(())
    }
}

impl ServiceArgs {
    /// # Errors
    /// Returns [`LeadError::Configuration`] when the resulting config fails
    /// validation.
    pub fn service_config(&self) -> Result<ServiceConfig, LeadError> {
        let config = ServiceConfig {
            advisor_api_key: self.advisor_api_key.trim().to_string(),
            users: vec![
                DirectoryUser::new(
                    "u1",
                    &self.advisor_username,
                    &self.advisor_password,
                    Role::Advisor,
                ),
                DirectoryUser::new("u2", &self.admin_username, &self.admin_password, Role::Admin),
            ],
            session_ttl: Duration::from_millis(self.session_ttl_ms),
            max_body_bytes: self.max_body_bytes,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> ServiceArgs {
        match ServiceArgs::try_parse_from(args) {
            Ok(parsed) => parsed,
            Err(err) => panic!("failed to parse args: {err}"),
        }
    }

    #[test]
    fn defaults_match_development_config() {
        let args = parse(&["fleet-leads-service"]);
        let config = match args.service_config() {
            Ok(config) => config,
            Err(err) => panic!("default config rejected: {err}"),
        };
        assert_eq!(config, ServiceConfig::development());
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let args = parse(&["fleet-leads-service", "--session-ttl-ms", "0"]);
        assert!(matches!(
            args.service_config(),
            Err(LeadError::Configuration(_))
        ));
    }

    #[test]
    fn duplicate_usernames_are_rejected() {
        let args = parse(&["fleet-leads-service", "--admin-username", "advisor"]);
        assert!(matches!(
            args.service_config(),
            Err(LeadError::Configuration(_))
        ));
    }
}
