use std::error::Error;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use directories_next::BaseDirs;
use serde::{Deserialize, Serialize};

use super::serialization::Preset;
use crate::io::midi::DeviceDescriptor;

pub const SETTINGS_VERSION: &str = "1";

/// Cross-session preferences. Notably `last_midi_input`, recorded when the
/// user completes a device selection so the next session can offer the
/// same device first.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub version: String,
    pub audio_device_name: String,
    pub last_midi_input: String,
    pub presets_dir: String,
}

impl Settings {
    /// Record the input chosen from a device selection. Callers pass the
    /// descriptor returned by
    /// [`DeviceSession::select`](crate::io::midi::DeviceSession::select)
    /// and save the settings afterwards.
    pub fn record_midi_selection(&mut self, descriptor: &DeviceDescriptor) {
        self.last_midi_input = descriptor.name.clone();
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION.to_string(),
            audio_device_name: String::new(),
            last_midi_input: String::new(),
            presets_dir: default_presets_dir(),
        }
    }
}

pub fn config_dir() -> Option<PathBuf> {
    BaseDirs::new().map(|base| base.config_dir().join("Lattice"))
}

pub fn default_presets_dir() -> String {
    config_dir()
        .map(|dir| dir.join("Presets"))
        .unwrap_or_else(|| PathBuf::from("Presets"))
        .to_string_lossy()
        .into_owned()
}

fn settings_path(storage_dir: &str) -> PathBuf {
    PathBuf::from(storage_dir).join("settings.json")
}

pub fn save_settings(
    storage_dir: &str,
    settings: &Settings,
) -> Result<(), Box<dyn Error>> {
    let json = serde_json::to_string_pretty(settings)?;
    write_with_parents(&settings_path(storage_dir), &json)
}

pub fn load_settings(storage_dir: &str) -> Result<Settings, Box<dyn Error>> {
    let bytes = fs::read(settings_path(storage_dir))?;
    Ok(serde_json::from_slice::<Settings>(&bytes)?)
}

pub fn load_settings_if_exists(
    storage_dir: &str,
) -> Result<Option<Settings>, Box<dyn Error>> {
    match load_settings(storage_dir) {
        Ok(settings) => Ok(Some(settings)),
        Err(err) => {
            if err
                .downcast_ref::<std::io::Error>()
                .is_some_and(|e| e.kind() == ErrorKind::NotFound)
            {
                Ok(None)
            } else {
                Err(err)
            }
        }
    }
}

fn preset_path(presets_dir: &str, name: &str) -> PathBuf {
    PathBuf::from(presets_dir).join(format!("{}.json", name))
}

pub fn save_preset(
    presets_dir: &str,
    name: &str,
    preset: &Preset,
) -> Result<PathBuf, Box<dyn Error>> {
    let json = serde_json::to_string_pretty(preset)?;
    let path = preset_path(presets_dir, name);
    write_with_parents(&path, &json)?;
    Ok(path)
}

pub fn load_preset(
    presets_dir: &str,
    name: &str,
) -> Result<Preset, Box<dyn Error>> {
    let bytes = fs::read(preset_path(presets_dir, name))?;
    Ok(serde_json::from_slice::<Preset>(&bytes)?)
}

fn write_with_parents(
    path: &PathBuf,
    contents: &str,
) -> Result<(), Box<dyn Error>> {
    if let Some(parent_dir) = path.parent() {
        fs::create_dir_all(parent_dir)?;
    }
    fs::write(path, contents)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn temp_dir(label: &str) -> String {
        let dir = std::env::temp_dir()
            .join("lattice_storage_tests")
            .join(label);
        let _ = fs::remove_dir_all(&dir);
        dir.to_string_lossy().into_owned()
    }

    #[test]
    #[serial]
    fn settings_round_trip() {
        let dir = temp_dir("settings");
        let mut settings = Settings::default();
        settings.last_midi_input = "nanoKONTROL2".to_string();

        save_settings(&dir, &settings).unwrap();
        let loaded = load_settings(&dir).unwrap();
        assert_eq!(loaded.last_midi_input, "nanoKONTROL2");
        assert_eq!(loaded.version, SETTINGS_VERSION);
    }

    #[test]
    #[serial]
    fn recorded_selection_survives_a_round_trip() {
        let dir = temp_dir("selection");
        let mut settings = Settings::default();
        settings.record_midi_selection(&DeviceDescriptor {
            index: 1,
            name: "Faderfox EC4".to_string(),
        });

        save_settings(&dir, &settings).unwrap();
        let loaded = load_settings(&dir).unwrap();
        assert_eq!(loaded.last_midi_input, "Faderfox EC4");
    }

    #[test]
    #[serial]
    fn missing_settings_is_none_not_an_error() {
        let dir = temp_dir("absent");
        assert!(load_settings_if_exists(&dir).unwrap().is_none());
    }
}
