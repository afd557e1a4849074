//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

/// Shortest turn the authority will run, in seconds
pub const MIN_TURN_DURATION_SECS: f32 = 0.5;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed CORS origins, comma-separated
    pub client_origin: String,
    /// Tuning applied to every match this process hosts
    pub match_config: MatchConfig,
}

/// Load-time match tuning. Immutable once a match is created.
#[derive(Clone, Debug, PartialEq)]
pub struct MatchConfig {
    /// Seconds per turn before the timer hands the turn over
    pub turn_duration_secs: f32,
    /// Impulse at zero power
    pub min_launch_force: f32,
    /// Impulse at full power
    pub max_launch_force: f32,
    /// Scale applied on top of the interpolated impulse
    pub base_launch_force: f32,
    /// Exponent applied to the clamped power before interpolation
    pub curve_exponent: f32,
    /// Planar speed under which a launched unit counts as still
    pub settle_velocity_threshold: f32,
    /// Seconds a unit must stay still to settle
    pub settle_time_required: f32,
    /// Seconds after launch at which a unit that has not settled is settled by force
    pub max_flight_secs: f32,
    /// Seconds to wait after a settle before deciding the next turn
    pub post_settle_grace: f32,
    /// Linear drag while a unit is in flight
    pub moving_drag: f32,
    /// Units per slot
    pub team_size: usize,
    /// Hit points each unit starts with
    pub unit_max_hp: i32,
    /// Damage source for collisions
    pub unit_attack_power: f32,
    /// Collision radius of a unit
    pub unit_radius: f32,
    /// Seconds a finished match waits for both players to ask for a rematch
    pub rematch_window_secs: f32,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            turn_duration_secs: 10.0,
            min_launch_force: 4.0,
            max_launch_force: 18.0,
            base_launch_force: 1.0,
            curve_exponent: 1.05,
            settle_velocity_threshold: 0.2,
            settle_time_required: 0.8,
            max_flight_secs: 15.0,
            post_settle_grace: 0.5,
            moving_drag: 0.15,
            team_size: 3,
            unit_max_hp: 10,
            unit_attack_power: 2.0,
            unit_radius: 0.5,
            rematch_window_secs: 60.0,
        }
    }
}

impl MatchConfig {
    /// Read overrides from the environment on top of the defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        let d = Self::default();
        let config = Self {
            turn_duration_secs: env_or("TURN_DURATION_SECONDS", d.turn_duration_secs)?,
            min_launch_force: env_or("MIN_LAUNCH_FORCE", d.min_launch_force)?,
            max_launch_force: env_or("MAX_LAUNCH_FORCE", d.max_launch_force)?,
            base_launch_force: env_or("BASE_LAUNCH_FORCE", d.base_launch_force)?,
            curve_exponent: env_or("LAUNCH_CURVE_EXPONENT", d.curve_exponent)?,
            settle_velocity_threshold: env_or(
                "SETTLE_VELOCITY_THRESHOLD",
                d.settle_velocity_threshold,
            )?,
            settle_time_required: env_or("SETTLE_TIME_REQUIRED", d.settle_time_required)?,
            max_flight_secs: env_or("MAX_FLIGHT_SECONDS", d.max_flight_secs)?,
            post_settle_grace: env_or("POST_SETTLE_GRACE", d.post_settle_grace)?,
            moving_drag: d.moving_drag,
            team_size: env_or("TEAM_SIZE", d.team_size)?,
            unit_max_hp: env_or("UNIT_MAX_HP", d.unit_max_hp)?,
            unit_attack_power: env_or("UNIT_ATTACK_POWER", d.unit_attack_power)?,
            unit_radius: d.unit_radius,
            rematch_window_secs: env_or("REMATCH_WINDOW_SECONDS", d.rematch_window_secs)?,
        };
        config.validated()
    }

    /// Check ranges and apply the turn duration floor
    pub fn validated(mut self) -> Result<Self, ConfigError> {
        self.turn_duration_secs = self.turn_duration_secs.max(MIN_TURN_DURATION_SECS);

        if !(self.min_launch_force >= 0.0 && self.max_launch_force >= self.min_launch_force) {
            return Err(ConfigError::Invalid("MAX_LAUNCH_FORCE"));
        }
        if !(self.base_launch_force > 0.0) {
            return Err(ConfigError::Invalid("BASE_LAUNCH_FORCE"));
        }
        if !(self.curve_exponent > 0.0) {
            return Err(ConfigError::Invalid("LAUNCH_CURVE_EXPONENT"));
        }
        if !(self.settle_velocity_threshold > 0.0) {
            return Err(ConfigError::Invalid("SETTLE_VELOCITY_THRESHOLD"));
        }
        if !(self.settle_time_required > 0.0) {
            return Err(ConfigError::Invalid("SETTLE_TIME_REQUIRED"));
        }
        if !(self.max_flight_secs > self.settle_time_required) {
            return Err(ConfigError::Invalid("MAX_FLIGHT_SECONDS"));
        }
        if !(self.post_settle_grace >= 0.0) {
            return Err(ConfigError::Invalid("POST_SETTLE_GRACE"));
        }
        if !(1..=8).contains(&self.team_size) {
            return Err(ConfigError::Invalid("TEAM_SIZE"));
        }
        if self.unit_max_hp <= 0 {
            return Err(ConfigError::Invalid("UNIT_MAX_HP"));
        }
        if !(self.rematch_window_secs >= 0.0) {
            return Err(ConfigError::Invalid("REMATCH_WINDOW_SECONDS"));
        }
        Ok(self)
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            client_origin: env::var("CLIENT_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),

            match_config: MatchConfig::from_env()?,
        })
    }
}

fn env_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_defaults_are_valid() {
        let config = assert_ok!(MatchConfig::default().validated());
        assert_eq!(config, MatchConfig::default());
    }

    #[test]
    fn test_turn_duration_is_floored() {
        let config = MatchConfig {
            turn_duration_secs: 0.1,
            ..MatchConfig::default()
        };
        let config = assert_ok!(config.validated());
        assert_eq!(config.turn_duration_secs, MIN_TURN_DURATION_SECS);
    }

    #[test]
    fn test_inverted_force_range_is_rejected() {
        let config = MatchConfig {
            min_launch_force: 10.0,
            max_launch_force: 5.0,
            ..MatchConfig::default()
        };
        assert_err!(config.validated());
    }

    #[test]
    fn test_nan_tuning_is_rejected() {
        let threshold = MatchConfig {
            settle_velocity_threshold: f32::NAN,
            ..MatchConfig::default()
        };
        assert!(matches!(
            threshold.validated(),
            Err(ConfigError::Invalid("SETTLE_VELOCITY_THRESHOLD"))
        ));

        let exponent = MatchConfig {
            curve_exponent: f32::NAN,
            ..MatchConfig::default()
        };
        assert!(matches!(
            exponent.validated(),
            Err(ConfigError::Invalid("LAUNCH_CURVE_EXPONENT"))
        ));

        let grace = MatchConfig {
            post_settle_grace: f32::NAN,
            ..MatchConfig::default()
        };
        assert_err!(grace.validated());
    }

    #[test]
    fn test_flight_limit_must_exceed_settle_time() {
        let config = MatchConfig {
            max_flight_secs: 0.5,
            ..MatchConfig::default()
        };
        assert!(matches!(
            config.validated(),
            Err(ConfigError::Invalid("MAX_FLIGHT_SECONDS"))
        ));
    }

    #[test]
    fn test_team_size_bounds() {
        let empty = MatchConfig {
            team_size: 0,
            ..MatchConfig::default()
        };
        assert!(matches!(
            empty.validated(),
            Err(ConfigError::Invalid("TEAM_SIZE"))
        ));
    }
}
