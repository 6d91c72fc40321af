use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A controllable immersion heater.
///
/// The installation has exactly two elements: the main tank and Lucy's
/// tank. Every rule in the controller branches over this closed set, so new
/// devices are a code change, not a registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Main,
    Lucy,
}

impl Device {
    pub const ALL: [Device; 2] = [Device::Main, Device::Lucy];

    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Main => "main",
            Device::Lucy => "lucy",
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Device {
    type Err = UnknownDevice;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "main" => Ok(Device::Main),
            "lucy" => Ok(Device::Lucy),
            other => Err(UnknownDevice(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown device id: {0:?} (expected 'main' or 'lucy')")]
pub struct UnknownDevice(pub String);

/// A value held once per device.
///
/// Keeps per-device state as plain fields instead of a map, so exhaustive
/// handling is checked by the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerDevice<T> {
    pub main: T,
    pub lucy: T,
}

impl<T> PerDevice<T> {
    pub fn new(main: T, lucy: T) -> Self {
        Self { main, lucy }
    }

    pub fn uniform(value: T) -> Self
    where
        T: Clone,
    {
        Self {
            main: value.clone(),
            lucy: value,
        }
    }

    pub fn get(&self, device: Device) -> &T {
        match device {
            Device::Main => &self.main,
            Device::Lucy => &self.lucy,
        }
    }

    pub fn get_mut(&mut self, device: Device) -> &mut T {
        match device {
            Device::Main => &mut self.main,
            Device::Lucy => &mut self.lucy,
        }
    }

    pub fn map<U>(self, mut f: impl FnMut(Device, T) -> U) -> PerDevice<U> {
        PerDevice {
            main: f(Device::Main, self.main),
            lucy: f(Device::Lucy, self.lucy),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Device, &T)> {
        [(Device::Main, &self.main), (Device::Lucy, &self.lucy)].into_iter()
    }
}
