//! Configuration types (spec §6). Parsing the JSON file itself is the
//! daemon's job (`e84-daemon`'s config loader); this crate only owns the
//! shape and the validation rules spec §7 calls `Error::Configuration`.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::facade::ControllerMode;
use crate::port::DigitalMapping;
use crate::timer::{validate_override, TimerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterfaceKind {
    Digital,
    Ascii,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsciiConfig {
    pub port: String,
    #[serde(default = "default_baud")]
    pub baud: u32,
}

fn default_baud() -> u32 {
    9600
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimerOverrides {
    #[serde(default)]
    pub tp1_ms: Option<u64>,
    #[serde(default)]
    pub tp2_ms: Option<u64>,
    #[serde(default)]
    pub tp3_ms: Option<u64>,
    #[serde(default)]
    pub tp4_ms: Option<u64>,
    #[serde(default)]
    pub tp5_ms: Option<u64>,
}

impl TimerOverrides {
    fn get(&self, id: TimerId) -> Option<u64> {
        match id {
            TimerId::Tp1 => self.tp1_ms,
            TimerId::Tp2 => self.tp2_ms,
            TimerId::Tp3 => self.tp3_ms,
            TimerId::Tp4 => self.tp4_ms,
            TimerId::Tp5 => self.tp5_ms,
        }
    }

    /// Resolve every timer's duration, falling back to the protocol
    /// default (spec §4.2) and validating overrides (spec §7
    /// `InvalidTimerValue`).
    pub fn resolve(&self) -> Result<HashMap<TimerId, Duration>, Error> {
        let mut out = HashMap::new();
        for id in TimerId::ALL {
            let duration = match self.get(id) {
                Some(ms) => validate_override(id, ms)?,
                None => id.default_duration(),
            };
            out.insert(id, duration);
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub interface: InterfaceKind,
    #[serde(default)]
    pub ascii: Option<AsciiConfig>,
    #[serde(default)]
    pub digital_mapping: Vec<DigitalMapping>,
    #[serde(default)]
    pub timers: TimerOverrides,
    #[serde(default = "default_mode")]
    pub mode: ControllerMode,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Diagnostic ring buffer capacity (SPEC_FULL.md [MACHINE]); not part
    /// of spec.md §6 but a sane knob to expose alongside it.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

fn default_mode() -> ControllerMode {
    ControllerMode::Auto
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_history_capacity() -> usize {
    crate::state::DEFAULT_HISTORY_CAPACITY
}

impl ControllerConfig {
    /// Validate cross-field constraints spec §7 lists under `Configuration`
    /// errors: an `ascii` interface needs `ascii.port`/`ascii.baud`
    /// (`UnmappedSignal`/`InvalidTimerValue` don't apply here — this is the
    /// third configuration-error family, absent `digital.mapping` for a
    /// `digital` interface).
    pub fn validate(&self) -> Result<(), Error> {
        match self.interface {
            InterfaceKind::Ascii if self.ascii.is_none() => {
                return Err(Error::Config(crate::error::ConfigError::UnmappedSignal(
                    "ascii.port".to_string(),
                )))
            }
            InterfaceKind::Digital if self.digital_mapping.is_empty() => {
                return Err(Error::Config(crate::error::ConfigError::UnmappedSignal(
                    "digital.mapping".to_string(),
                )))
            }
            _ => {}
        }
        self.timers.resolve().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_interface_without_port_is_rejected() {
        let cfg = ControllerConfig {
            interface: InterfaceKind::Ascii,
            ascii: None,
            digital_mapping: vec![],
            timers: TimerOverrides::default(),
            mode: ControllerMode::Auto,
            log_level: "info".to_string(),
            history_capacity: 256,
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn timer_overrides_resolve_with_defaults() {
        let overrides = TimerOverrides { tp1_ms: Some(500), ..Default::default() };
        let resolved = overrides.resolve().unwrap();
        assert_eq!(resolved[&TimerId::Tp1], Duration::from_millis(500));
        assert_eq!(resolved[&TimerId::Tp3], TimerId::Tp3.default_duration());
    }
}
