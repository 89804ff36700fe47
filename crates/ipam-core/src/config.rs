//! Runtime configuration
//!
//! Loaded from environment variables; every setting has a default.

use crate::error::IpamError;
use std::env;

/// Environment variable for [`IpamConfig::enforce_global_unique`]
pub const ENV_ENFORCE_GLOBAL_UNIQUE: &str = "IPAM_ENFORCE_GLOBAL_UNIQUE";
/// Environment variable for [`IpamConfig::allocation_retries`]
pub const ENV_ALLOCATION_RETRIES: &str = "IPAM_ALLOCATION_RETRIES";

/// IPAM core configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpamConfig {
    /// Enforce unique addresses and non-overlapping ranges in the global (VRF-less) table
    pub enforce_global_unique: bool,
    /// Conditional-insert retries when an allocation loses a race with an overlapping block
    pub allocation_retries: u32,
}

impl Default for IpamConfig {
    fn default() -> Self {
        Self {
            enforce_global_unique: true,
            allocation_retries: 3,
        }
    }
}

impl IpamConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, IpamError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, IpamError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let enforce_global_unique = match lookup(ENV_ENFORCE_GLOBAL_UNIQUE) {
            Some(value) => parse_bool(ENV_ENFORCE_GLOBAL_UNIQUE, &value)?,
            None => defaults.enforce_global_unique,
        };

        let allocation_retries = match lookup(ENV_ALLOCATION_RETRIES) {
            Some(value) => value.trim().parse::<u32>().map_err(|_| {
                IpamError::InvalidConfig(format!(
                    "{} must be a non-negative integer, got '{}'",
                    ENV_ALLOCATION_RETRIES, value
                ))
            })?,
            None => defaults.allocation_retries,
        };

        Ok(Self {
            enforce_global_unique,
            allocation_retries,
        })
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, IpamError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(IpamError::InvalidConfig(format!(
            "{} must be a boolean, got '{}'",
            key, value
        ))),
    }
}
