//! Status LED states and their wire encoding

use std::fmt;
use std::str::FromStr;

/// LED state
///
/// The discriminants are the values current firmware expects. Legacy
/// firmware (minor version 0) numbers the same states from 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LedState {
    On = 1,
    Flash = 2,
    SlowBlink = 3,
    FastBlink = 4,
    Off = 5,
}

impl LedState {
    /// All LED states
    pub const ALL: &'static [LedState] = &[
        LedState::On,
        LedState::Flash,
        LedState::SlowBlink,
        LedState::FastBlink,
        LedState::Off,
    ];

    /// Wire value for this state
    ///
    /// # Arguments
    /// * `legacy` - Device uses the off-by-one numbering of old firmware
    pub fn encode(self, legacy: bool) -> u8 {
        if legacy {
            self as u8 - 1
        } else {
            self as u8
        }
    }

    /// State from a wire value, as the firmware interprets it
    pub fn decode(value: u8, legacy: bool) -> Option<Self> {
        let value = if legacy { value.checked_add(1)? } else { value };
        match value {
            1 => Some(Self::On),
            2 => Some(Self::Flash),
            3 => Some(Self::SlowBlink),
            4 => Some(Self::FastBlink),
            5 => Some(Self::Off),
            _ => None,
        }
    }

    /// Command-line name for this state
    pub fn name(&self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Flash => "flash",
            Self::SlowBlink => "slow-blink",
            Self::FastBlink => "fast-blink",
            Self::Off => "off",
        }
    }
}

impl fmt::Display for LedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LedState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .iter()
            .copied()
            .find(|state| state.name() == normalized)
            .ok_or_else(|| {
                let names: Vec<_> = Self::ALL.iter().map(|s| s.name()).collect();
                format!("unknown LED state \"{s}\" (expected one of: {})", names.join(", "))
            })
    }
}
