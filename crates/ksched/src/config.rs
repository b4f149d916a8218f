//! Scheduler configuration.
//!
//! The kernel picks its scheduler at boot from the command line:
//!
//! ```text
//! sched=lottery sched.seed=12345
//! ```
//!
//! Arguments are whitespace-separated `key=value` pairs. Keys that belong
//! to other subsystems are skipped; a recognised key with a bad value is an
//! error so a typo does not silently boot the wrong policy.

use crate::error::ConfigError;
use crate::rng::DEFAULT_SEED;
use crate::task::policy::Policy;

/// Command-line key selecting the queue policy.
pub const KEY_POLICY: &str = "sched";
/// Command-line key seeding lottery draws.
pub const KEY_SEED: &str = "sched.seed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedConfig {
    /// Policy given to every queue the scheduler creates.
    pub policy: Policy,
    /// Seed for the lottery draw generator.
    pub lottery_seed: u64,
}

impl SchedConfig {
    /// Priority scheduling with the default seed.
    pub const fn new() -> Self {
        Self {
            policy: Policy::Priority,
            lottery_seed: DEFAULT_SEED,
        }
    }

    pub const fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.lottery_seed = seed;
        self
    }

    /// Parse the scheduler arguments out of a kernel command line.
    pub fn from_cmdline(cmdline: &str) -> Result<Self, ConfigError> {
        let mut config = Self::new();
        for (key, value) in cmdline
            .split_whitespace()
            .filter_map(|arg| arg.split_once('='))
        {
            match key {
                KEY_POLICY => config.policy = value.parse()?,
                KEY_SEED => {
                    config.lottery_seed = value
                        .parse()
                        .map_err(|_| ConfigError::InvalidSeed(value.into()))?;
                }
                _ => {}
            }
        }
        log::debug!(
            "[sched] config: policy={} seed={:#x}",
            config.policy,
            config.lottery_seed
        );
        Ok(config)
    }
}

impl Default for SchedConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_cmdline_gives_defaults() {
        assert_eq!(SchedConfig::from_cmdline(""), Ok(SchedConfig::new()));
    }

    #[test]
    fn picks_lottery_and_seed() {
        let config = SchedConfig::from_cmdline("quiet sched=lottery sched.seed=7 console=ttyS0").unwrap();
        assert_eq!(config.policy, Policy::Lottery);
        assert_eq!(config.lottery_seed, 7);
    }

    #[test]
    fn later_arguments_override_earlier_ones() {
        let config = SchedConfig::from_cmdline("sched=lottery sched=priority").unwrap();
        assert_eq!(config.policy, Policy::Priority);
    }

    #[test]
    fn rejects_bad_values() {
        assert_eq!(
            SchedConfig::from_cmdline("sched=mlfq"),
            Err(ConfigError::UnknownPolicy("mlfq".into()))
        );
        assert_eq!(
            SchedConfig::from_cmdline("sched.seed=-3"),
            Err(ConfigError::InvalidSeed("-3".into()))
        );
    }

    #[test]
    fn builder_methods() {
        let config = SchedConfig::new().with_policy(Policy::Lottery).with_seed(11);
        assert_eq!(config, SchedConfig { policy: Policy::Lottery, lottery_seed: 11 });
    }
}
