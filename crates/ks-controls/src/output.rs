//! Per-output records.

use core::fmt;
use core::str::FromStr;

use ks_core::OutputId;
use serde::{Deserialize, Serialize};

use crate::error::ControlError;

/// How an output is driven.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Always energized while enabled and not interlocked.
    ForcedOn,
    /// Never energized.
    ForcedOff,
    /// Follows the staged controller output.
    #[default]
    Auto,
}

impl OutputMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ForcedOn => "on",
            Self::ForcedOff => "off",
            Self::Auto => "auto",
        }
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputMode {
    type Err = ControlError;

    /// Accepts the command words `on`, `off`, `auto` and the older `pid`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "on" => Ok(Self::ForcedOn),
            "off" => Ok(Self::ForcedOff),
            "auto" | "pid" => Ok(Self::Auto),
            _ => Err(ControlError::InvalidArg {
                what: "output mode must be on, off or auto",
            }),
        }
    }
}

/// One switched heating output.
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalOutput {
    id: OutputId,
    weight: f64,
    pub mode: OutputMode,
    /// Commanded duty in percent.
    pub duty: f64,
    /// Commanded binary state after staging and interlock.
    pub energized: bool,
}

impl PhysicalOutput {
    pub fn new(id: OutputId, weight: f64, mode: OutputMode) -> Self {
        Self {
            id,
            weight,
            mode,
            duty: 0.0,
            energized: false,
        }
    }

    pub fn id(&self) -> OutputId {
        self.id
    }

    /// Relative power compared to the other outputs.
    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn de_energize(&mut self) {
        self.energized = false;
    }
}
