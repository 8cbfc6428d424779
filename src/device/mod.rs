pub mod agent;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// The two values the mocked LED can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnOff {
    On,
    Off,
}

impl OnOff {
    /// Accepts exactly "on" or "off". No trimming, no case folding.
    pub fn parse(payload: &str) -> Option<Self> {
        match payload {
            "on" => Some(Self::On),
            "off" => Some(Self::Off),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
        }
    }
}

impl fmt::Display for OnOff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process-wide on/off state. Cloning shares the same underlying value.
#[derive(Debug, Clone, Default)]
pub struct DeviceState {
    on: Arc<AtomicBool>,
}

impl DeviceState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> OnOff {
        if self.on.load(Ordering::Acquire) {
            OnOff::On
        } else {
            OnOff::Off
        }
    }

    pub fn set(&self, value: OnOff) {
        self.on.store(value == OnOff::On, Ordering::Release);
    }
}
