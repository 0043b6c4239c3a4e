//! Preset documents: the portable form of the binding table and audio-band
//! configuration.
//!
//! Import is validate-then-mutate. Every referenced target name, channel,
//! controller/note number, and frequency range is checked against the live
//! [`ParameterRegistry`] (and Nyquist limit, when known) before any state
//! is touched; a corrupt document rejects atomically.

use std::error::Error;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::control::audio_bands::{AudioBandConfig, BandError};
use crate::control::bindings::{
    Binding, BindingId, BindingRegistry, TriggerKey, TriggerKind,
};
use crate::control::params::ParameterRegistry;
use crate::core::prelude::*;

pub const PRESET_VERSION: &str = "1";

/// One binding as it appears on disk. Control ids are 1-indexed and stable
/// across export/import so the UI can be reconstructed exactly.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MappingDoc {
    pub id: BindingId,
    pub kind: TriggerKind,
    pub channel: u8,
    pub number: u8,
    pub primary_target: Option<String>,
    #[serde(default)]
    pub secondary_targets: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Preset {
    pub version: String,
    pub mappings: Vec<MappingDoc>,
    #[serde(default)]
    pub audio_bands: Vec<AudioBandConfig>,
    /// Control ids in creation order. Import recreates controls in this
    /// exact order, not just their state.
    #[serde(default)]
    pub manifest: Vec<BindingId>,
}

#[derive(Debug)]
pub enum PresetError {
    UnsupportedVersion(String),
    UnknownTarget(String),
    ChannelOutOfRange(u8),
    NumberOutOfRange(u8),
    DuplicateTrigger(TriggerKey),
    ManifestMismatch,
    Band(BandError),
}

impl fmt::Display for PresetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid preset: ")?;
        match self {
            PresetError::UnsupportedVersion(version) => {
                write!(f, "unsupported version '{}'", version)
            }
            PresetError::UnknownTarget(name) => {
                write!(f, "unknown target parameter '{}'", name)
            }
            PresetError::ChannelOutOfRange(ch) => {
                write!(f, "channel {} outside [0, 15]", ch)
            }
            PresetError::NumberOutOfRange(n) => {
                write!(f, "controller/note {} outside [0, 127]", n)
            }
            PresetError::DuplicateTrigger(key) => write!(
                f,
                "{} {} on channel {} mapped more than once",
                key.kind, key.number, key.channel
            ),
            PresetError::ManifestMismatch => {
                write!(f, "manifest does not match the mapping table")
            }
            PresetError::Band(e) => write!(f, "{}", e),
        }
    }
}

impl Error for PresetError {}

impl From<BandError> for PresetError {
    fn from(e: BandError) -> Self {
        PresetError::Band(e)
    }
}

/// Snapshot live state into a document.
pub fn export(
    bindings: &BindingRegistry,
    bands: &[AudioBandConfig],
) -> Preset {
    let mappings = bindings
        .iter()
        .map(|binding| MappingDoc {
            id: binding.id,
            kind: binding.kind(),
            channel: binding.trigger.channel,
            number: binding.trigger.number,
            primary_target: binding.primary_target.clone(),
            secondary_targets: binding.secondary_targets.clone(),
        })
        .collect();

    Preset {
        version: PRESET_VERSION.to_string(),
        mappings,
        audio_bands: bands.to_vec(),
        manifest: bindings.ids(),
    }
}

/// Full structural validation against the live parameter table. Does not
/// mutate anything.
pub fn validate(
    preset: &Preset,
    params: &ParameterRegistry,
    nyquist: Option<f32>,
) -> Result<(), PresetError> {
    if preset.version != PRESET_VERSION {
        return Err(PresetError::UnsupportedVersion(preset.version.clone()));
    }

    let mut seen_triggers: HashSet<TriggerKey> = HashSet::default();
    for mapping in &preset.mappings {
        if mapping.channel > 15 {
            return Err(PresetError::ChannelOutOfRange(mapping.channel));
        }
        if mapping.number > 127 {
            return Err(PresetError::NumberOutOfRange(mapping.number));
        }

        let key = TriggerKey {
            kind: mapping.kind,
            channel: mapping.channel,
            number: mapping.number,
        };
        if !seen_triggers.insert(key) {
            return Err(PresetError::DuplicateTrigger(key));
        }

        for target in mapping
            .primary_target
            .iter()
            .chain(mapping.secondary_targets.iter())
        {
            if !params.has(target) {
                return Err(PresetError::UnknownTarget(target.clone()));
            }
        }
    }

    let mut manifest_ids: Vec<BindingId> = preset.manifest.clone();
    let mut mapping_ids: Vec<BindingId> =
        preset.mappings.iter().map(|m| m.id).collect();
    manifest_ids.sort_unstable();
    mapping_ids.sort_unstable();
    if manifest_ids != mapping_ids {
        return Err(PresetError::ManifestMismatch);
    }

    for band in &preset.audio_bands {
        band.validate(nyquist)?;
        if let Some(target) = &band.target
            && !params.has(target)
        {
            return Err(PresetError::UnknownTarget(target.clone()));
        }
    }

    Ok(())
}

/// Validate, then build the replacement state. The caller swaps the
/// returned registry/band set in wholesale; on any error nothing was
/// built and live state is untouched.
pub fn import(
    preset: &Preset,
    params: &ParameterRegistry,
    nyquist: Option<f32>,
) -> Result<(BindingRegistry, Vec<AudioBandConfig>), PresetError> {
    validate(preset, params, nyquist)?;

    let mut bindings = BindingRegistry::new();
    for id in &preset.manifest {
        // Manifest/mapping consistency was just validated
        let mapping = preset
            .mappings
            .iter()
            .find(|m| m.id == *id)
            .ok_or(PresetError::ManifestMismatch)?;

        let trigger = TriggerKey {
            kind: mapping.kind,
            channel: mapping.channel,
            number: mapping.number,
        };
        bindings
            .insert(Binding::new(
                mapping.id,
                trigger,
                mapping.primary_target.clone(),
                mapping.secondary_targets.clone(),
            ))
            .map_err(|_| PresetError::DuplicateTrigger(trigger))?;
    }

    Ok((bindings, preset.audio_bands.clone()))
}

pub fn to_json(preset: &Preset) -> Result<String, Box<dyn Error>> {
    Ok(serde_json::to_string_pretty(preset)?)
}

pub fn from_json(json: &str) -> Result<Preset, Box<dyn Error>> {
    Ok(serde_json::from_str(json)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::audio_bands::ResponseCurve;

    fn live_state() -> (BindingRegistry, Vec<AudioBandConfig>) {
        let mut bindings = BindingRegistry::new();
        bindings
            .add(
                TriggerKey::cc(0, 21),
                Some("cell_size".to_string()),
                vec!["sphere_scale".to_string()],
            )
            .unwrap();
        bindings
            .add(
                TriggerKey::note(9, 36),
                Some("isometric_view".to_string()),
                vec![],
            )
            .unwrap();

        let bands = vec![AudioBandConfig {
            min_hz: 60.0,
            max_hz: 250.0,
            target: Some("light_intensity".to_string()),
            curve: ResponseCurve::Exponential,
            sensitivity: 1.5,
        }];

        (bindings, bands)
    }

    #[test]
    fn export_import_round_trip() {
        let params = ParameterRegistry::with_defaults();
        let (bindings, bands) = live_state();

        let preset = export(&bindings, &bands);
        assert_eq!(preset.manifest, vec![1, 2]);

        let json = to_json(&preset).unwrap();
        let parsed = from_json(&json).unwrap();
        let (imported, imported_bands) =
            import(&parsed, &params, None).unwrap();

        assert_eq!(imported.len(), 2);
        assert_eq!(imported.ids(), vec![1, 2]);
        let restored = imported.lookup(&TriggerKey::cc(0, 21)).unwrap();
        assert_eq!(restored.primary_target.as_deref(), Some("cell_size"));
        assert_eq!(restored.secondary_targets, vec!["sphere_scale"]);
        assert_eq!(imported_bands, bands);
    }

    #[test]
    fn unknown_target_rejects_the_whole_document() {
        let params = ParameterRegistry::with_defaults();
        let (bindings, bands) = live_state();

        let mut preset = export(&bindings, &bands);
        preset.mappings[1].primary_target = Some("warp_factor".to_string());

        assert!(matches!(
            import(&preset, &params, None),
            Err(PresetError::UnknownTarget(name)) if name == "warp_factor"
        ));
    }

    #[test]
    fn out_of_range_trigger_fields_are_rejected() {
        let params = ParameterRegistry::with_defaults();
        let (bindings, bands) = live_state();

        let mut preset = export(&bindings, &bands);
        preset.mappings[0].channel = 16;
        assert!(matches!(
            validate(&preset, &params, None),
            Err(PresetError::ChannelOutOfRange(16))
        ));

        let mut preset = export(&bindings, &bands);
        preset.mappings[0].number = 128;
        assert!(matches!(
            validate(&preset, &params, None),
            Err(PresetError::NumberOutOfRange(128))
        ));
    }

    #[test]
    fn duplicate_triggers_in_document_are_rejected() {
        let params = ParameterRegistry::with_defaults();
        let (bindings, bands) = live_state();

        let mut preset = export(&bindings, &bands);
        preset.mappings[1] = MappingDoc {
            id: 2,
            kind: preset.mappings[0].kind,
            channel: preset.mappings[0].channel,
            number: preset.mappings[0].number,
            primary_target: None,
            secondary_targets: vec![],
        };

        assert!(matches!(
            validate(&preset, &params, None),
            Err(PresetError::DuplicateTrigger(_))
        ));
    }

    #[test]
    fn manifest_must_match_mapping_table() {
        let params = ParameterRegistry::with_defaults();
        let (bindings, bands) = live_state();

        let mut preset = export(&bindings, &bands);
        preset.manifest = vec![1];

        assert!(matches!(
            validate(&preset, &params, None),
            Err(PresetError::ManifestMismatch)
        ));
    }

    #[test]
    fn band_beyond_nyquist_is_rejected_only_with_a_live_session() {
        let params = ParameterRegistry::with_defaults();
        let (bindings, mut bands) = live_state();
        bands[0].max_hz = 30_000.0;

        let preset = export(&bindings, &bands);
        assert!(validate(&preset, &params, None).is_ok());
        assert!(matches!(
            validate(&preset, &params, Some(22_050.0)),
            Err(PresetError::Band(BandError::BeyondNyquist(..)))
        ));
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let params = ParameterRegistry::with_defaults();
        let (bindings, bands) = live_state();

        let mut preset = export(&bindings, &bands);
        preset.version = "99".to_string();

        assert!(matches!(
            validate(&preset, &params, None),
            Err(PresetError::UnsupportedVersion(_))
        ));
    }
}
