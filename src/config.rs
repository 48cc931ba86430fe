use std::env;
use std::str::FromStr;

use crate::scheduling::validation::SchedulingRules;

/// Width of the `appointment.notes` CHECK constraint in the migrations.
pub const NOTES_COLUMN_MAX_CHARS: usize = 500;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub db_max_connections: u32,
    pub run_migrations: bool,
    pub rules: SchedulingRules,
}

/// Parsed env var, or `default` when missing or malformed.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<T>().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        let db_max_connections = env_or("DB_MAX_CONNECTIONS", 10);
        let run_migrations = env_or("RUN_MIGRATIONS", true);

        let defaults = SchedulingRules::default();
        let rules = SchedulingRules {
            slot_step_minutes: env_or("SLOT_STEP_MINUTES", defaults.slot_step_minutes),
            default_session_minutes: env_or("DEFAULT_SESSION_MINUTES", defaults.default_session_minutes),
            min_session_minutes: env_or("MIN_SESSION_MINUTES", defaults.min_session_minutes),
            max_session_minutes: env_or("MAX_SESSION_MINUTES", defaults.max_session_minutes),
            booking_horizon_months: env_or("BOOKING_HORIZON_MONTHS", defaults.booking_horizon_months),
            notes_max_chars: env_or("NOTES_MAX_CHARS", defaults.notes_max_chars),
        };
        check_rules(&rules)?;

        Ok(Self {
            database_url,
            bind_addr,
            db_max_connections,
            run_migrations,
            rules,
        })
    }
}

/// Rejects rule sets under which offered slots would fail validation, or
/// validated notes would fail the column check.
fn check_rules(rules: &SchedulingRules) -> anyhow::Result<()> {
    if rules.slot_step_minutes == 0 {
        anyhow::bail!("SLOT_STEP_MINUTES must be greater than zero");
    }
    if rules.min_session_minutes > rules.max_session_minutes {
        anyhow::bail!("MIN_SESSION_MINUTES must not exceed MAX_SESSION_MINUTES");
    }
    if !(rules.min_session_minutes..=rules.max_session_minutes)
        .contains(&rules.default_session_minutes)
    {
        anyhow::bail!(
            "DEFAULT_SESSION_MINUTES must lie between {} and {}",
            rules.min_session_minutes,
            rules.max_session_minutes
        );
    }
    if rules.notes_max_chars > NOTES_COLUMN_MAX_CHARS {
        anyhow::bail!("NOTES_MAX_CHARS cannot exceed {NOTES_COLUMN_MAX_CHARS}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_values_fall_back_to_defaults() {
        assert_eq!(env_or("HDCMS_SCHEDULER_UNSET_FOR_TEST", 30u16), 30);
        assert!(env_or("HDCMS_SCHEDULER_UNSET_FOR_TEST", true));
    }

    #[test]
    fn default_rules_pass() {
        assert!(check_rules(&SchedulingRules::default()).is_ok());
    }

    #[test]
    fn zero_slot_step_is_rejected() {
        let rules = SchedulingRules {
            slot_step_minutes: 0,
            ..SchedulingRules::default()
        };
        assert!(check_rules(&rules).is_err());
    }

    #[test]
    fn inverted_session_bounds_are_rejected() {
        let rules = SchedulingRules {
            min_session_minutes: 300,
            max_session_minutes: 200,
            default_session_minutes: 250,
            ..SchedulingRules::default()
        };
        assert!(check_rules(&rules).is_err());
    }

    #[test]
    fn default_session_outside_bounds_is_rejected() {
        let too_long = SchedulingRules {
            default_session_minutes: 400,
            ..SchedulingRules::default()
        };
        let too_short = SchedulingRules {
            default_session_minutes: 30,
            ..SchedulingRules::default()
        };
        assert!(check_rules(&too_long).is_err());
        assert!(check_rules(&too_short).is_err());
    }

    #[test]
    fn notes_limit_cannot_exceed_column() {
        let wider = SchedulingRules {
            notes_max_chars: NOTES_COLUMN_MAX_CHARS + 1,
            ..SchedulingRules::default()
        };
        let narrower = SchedulingRules {
            notes_max_chars: 200,
            ..SchedulingRules::default()
        };
        assert!(check_rules(&wider).is_err());
        assert!(check_rules(&narrower).is_ok());
    }
}
