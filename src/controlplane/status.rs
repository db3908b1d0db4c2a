use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Setup state of the control plane. Only `Ready` lets traffic through to the
/// worker; every other state redirects to the setup wizard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfigStatus {
    Unconfigured,
    Configuring,
    Ready,
    Error,
}

impl ConfigStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unconfigured => "UNCONFIGURED",
            Self::Configuring => "CONFIGURING",
            Self::Ready => "READY",
            Self::Error => "ERROR",
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

impl fmt::Display for ConfigStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfigStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UNCONFIGURED" => Ok(Self::Unconfigured),
            "CONFIGURING" => Ok(Self::Configuring),
            "READY" => Ok(Self::Ready),
            "ERROR" => Ok(Self::Error),
            _ => Err(format!("Invalid status: {}", s)),
        }
    }
}
