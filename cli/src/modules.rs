//! Demo modules served by the CLI.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};
use stateful_core::{assign, JsonState, UpdateResult};

pub const MAX_PRESET: u8 = 15;


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Module {
    Lights,
    Device,
}

impl Module {
    pub const ALL: [Module; 2] = [Module::Lights, Module::Device];

    pub fn name(self) -> &'static str {
        match self {
            Module::Lights => "lights",
            Module::Device => "device",
        }
    }
}

impl FromStr for Module {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "lights" => Ok(Module::Lights),
            "device" => Ok(Module::Device),
            _ => Err(format!("Unknown module: '{}' (expected lights or device)", s)),
        }
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}


// ---------------------------------------------------------------------------
// Lights
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lights {
    pub on: bool,
    pub brightness: u8,
    pub preset: u8,
}

impl Default for Lights {
    fn default() -> Self {
        Lights {
            on: true,
            brightness: 128,
            preset: 0,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct LightsDoc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brightness: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<u8>,
}

impl JsonState for Lights {
    type Document = LightsDoc;

    fn read(&self) -> LightsDoc {
        LightsDoc {
            on: Some(self.on),
            brightness: Some(self.brightness),
            preset: Some(self.preset),
        }
    }

    fn update(doc: LightsDoc, state: &mut Lights, _origin_id: &str) -> UpdateResult {
        if doc.preset.is_some_and(|p| p > MAX_PRESET) {
            return UpdateResult::Error;
        }
        let mut changed = false;
        if let Some(on) = doc.on {
            changed |= assign(&mut state.on, on);
        }
        if let Some(b) = doc.brightness {
            changed |= assign(&mut state.brightness, b);
        }
        if let Some(p) = doc.preset {
            changed |= assign(&mut state.preset, p);
        }
        UpdateResult::from_changed(changed)
    }
}


// ---------------------------------------------------------------------------
// Device
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Device {
    pub name: String,
    pub device_id: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DeviceDoc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

impl JsonState for Device {
    type Document = DeviceDoc;

    fn read(&self) -> DeviceDoc {
        DeviceDoc {
            name: Some(self.name.clone()),
            device_id: Some(self.device_id.clone()),
        }
    }

    fn update(doc: DeviceDoc, state: &mut Device, _origin_id: &str) -> UpdateResult {
        let blank = |v: &Option<String>| v.as_deref().is_some_and(|s| s.trim().is_empty());
        if blank(&doc.name) || blank(&doc.device_id) {
            return UpdateResult::Error;
        }
        let mut changed = false;
        if let Some(name) = doc.name {
            changed |= assign(&mut state.name, name);
        }
        if let Some(id) = doc.device_id {
            changed |= assign(&mut state.device_id, id);
        }
        UpdateResult::from_changed(changed)
    }
}

/// Defaults for a device seen for the first time: a fresh random id, which
/// must then stay the same across restarts.
pub fn device_defaults(device: &mut Device) {
    let id: u32 = rand::thread_rng().gen();
    device.name = "stateful-device".into();
    device.device_id = format!("{:08x}", id);
}
