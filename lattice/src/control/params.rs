//! The parameter normalization layer.
//!
//! Every target parameter the control surfaces can reach is declared here
//! once, with its domain range, quantization step, and scene routing. Both
//! the MIDI dispatch path and the audio-band path funnel through
//! [`ParameterRegistry::apply_unit`]; presets validate against the same
//! table. There is no second copy of any range anywhere in the crate.

use std::error::Error;
use std::fmt;

use indexmap::IndexMap;

use crate::core::prelude::*;
use crate::scene::Scene;

/// Which scene capability an applied update must invoke, if any. This is
/// the auditable classification that keeps a material tweak from
/// triggering a full grid rebuild.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SceneRouting {
    /// Value is read by the renderer on its own schedule; no call needed.
    None,
    CreateGrid,
    CellSize,
    SphereMaterials,
    SphereScales,
    PostProcessing,
    Lighting,
    GridLines,
    CameraRotation,
    IsometricView,
    CenterScaling,
}

impl SceneRouting {
    pub fn requires_external_sync(&self) -> bool {
        !matches!(self, SceneRouting::None)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ParamKind {
    Continuous,
    /// Boolean stored in [0, 1]; the effective value is `v > 0.5`.
    Level,
    /// Boolean flipped on every apply, ignoring the incoming value. Used
    /// for note/pad-driven targets where the incoming value is a fixed
    /// velocity, not a level.
    Toggle,
}

#[derive(Clone, Debug)]
pub struct ParamSpec {
    pub name: String,
    pub min: f32,
    pub max: f32,
    pub step: f32,
    pub kind: ParamKind,
    pub routing: SceneRouting,
}

impl ParamSpec {
    pub fn continuous(
        name: &str,
        min: f32,
        max: f32,
        step: f32,
        routing: SceneRouting,
    ) -> Self {
        Self {
            name: name.to_string(),
            min,
            max,
            step,
            kind: ParamKind::Continuous,
            routing,
        }
    }

    pub fn level(name: &str, routing: SceneRouting) -> Self {
        Self {
            name: name.to_string(),
            min: 0.0,
            max: 1.0,
            step: 0.0,
            kind: ParamKind::Level,
            routing,
        }
    }

    pub fn toggle(name: &str, routing: SceneRouting) -> Self {
        Self {
            name: name.to_string(),
            min: 0.0,
            max: 1.0,
            step: 0.0,
            kind: ParamKind::Toggle,
            routing,
        }
    }

    pub fn requires_external_sync(&self) -> bool {
        self.routing.requires_external_sync()
    }
}

#[derive(Debug)]
pub enum ParamError {
    UnknownParameter(String),
    OutOfRangeUnit(f32),
}

impl fmt::Display for ParamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamError::UnknownParameter(name) => {
                write!(f, "Unknown parameter: '{}'", name)
            }
            ParamError::OutOfRangeUnit(unit) => {
                write!(f, "Normalized value {} outside [0, 1]", unit)
            }
        }
    }
}

impl Error for ParamError {}

/// Explicitly constructed parameter table plus current values. Built once
/// at startup and handed by reference to every consumer; deliberately not a
/// global.
#[derive(Debug, Default)]
pub struct ParameterRegistry {
    specs: IndexMap<String, ParamSpec>,
    values: HashMap<String, f32>,
}

impl ParameterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The stock parameter space of the sphere-grid visualizer.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        use SceneRouting::*;

        for spec in [
            ParamSpec::continuous("grid_rows", 1.0, 24.0, 1.0, CreateGrid),
            ParamSpec::continuous("grid_cols", 1.0, 24.0, 1.0, CreateGrid),
            ParamSpec::continuous("cell_size", 0.2, 4.0, 0.0, CellSize),
            ParamSpec::continuous("sphere_scale", 0.1, 3.0, 0.0, SphereScales),
            ParamSpec::continuous(
                "sphere_metalness",
                0.0,
                1.0,
                0.0,
                SphereMaterials,
            ),
            ParamSpec::continuous(
                "sphere_roughness",
                0.0,
                1.0,
                0.0,
                SphereMaterials,
            ),
            ParamSpec::continuous("hue_shift", 0.0, 1.0, 0.0, None),
            ParamSpec::continuous(
                "bloom_strength",
                0.0,
                3.0,
                0.0,
                PostProcessing,
            ),
            ParamSpec::continuous("bloom_radius", 0.0, 1.0, 0.0, PostProcessing),
            ParamSpec::continuous("light_intensity", 0.0, 10.0, 0.0, Lighting),
            ParamSpec::continuous("ambient_level", 0.0, 1.0, 0.0, Lighting),
            ParamSpec::continuous(
                "grid_line_opacity",
                0.0,
                1.0,
                0.0,
                GridLines,
            ),
            ParamSpec::level("grid_lines_visible", GridLines),
            ParamSpec::continuous(
                "camera_rotation_speed",
                0.0,
                2.0,
                0.0,
                CameraRotation,
            ),
            ParamSpec::toggle("auto_rotate", CameraRotation),
            ParamSpec::toggle("isometric_view", IsometricView),
            ParamSpec::continuous(
                "center_scaling",
                0.0,
                2.0,
                0.0,
                CenterScaling,
            ),
        ] {
            registry.register(spec);
        }

        registry
    }

    pub fn register(&mut self, spec: ParamSpec) {
        if self.specs.contains_key(&spec.name) {
            warn!("Replacing existing parameter spec: '{}'", spec.name);
        }
        self.values.insert(spec.name.clone(), spec.min);
        self.specs.insert(spec.name.clone(), spec);
    }

    pub fn has(&self, name: &str) -> bool {
        self.specs.contains_key(name)
    }

    pub fn spec(&self, name: &str) -> Option<&ParamSpec> {
        self.specs.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.specs.keys().cloned().collect()
    }

    /// Current domain value, if the parameter exists.
    pub fn get(&self, name: &str) -> Option<f32> {
        self.values.get(name).copied()
    }

    pub fn bool_value(&self, name: &str) -> Option<bool> {
        self.get(name).map(|v| v > 0.5)
    }

    /// Map a unit-interval control value into the parameter's domain,
    /// honoring its quantization step. `unit` outside [0, 1] is a caller
    /// error, not something we clamp away silently.
    pub fn denormalize(
        &self,
        name: &str,
        unit: f32,
    ) -> Result<f32, ParamError> {
        let spec = self
            .specs
            .get(name)
            .ok_or_else(|| ParamError::UnknownParameter(name.to_string()))?;

        if !(0.0..=1.0).contains(&unit) || unit.is_nan() {
            return Err(ParamError::OutOfRangeUnit(unit));
        }

        let value = spec.min + unit * (spec.max - spec.min);
        Ok(quantize(value, spec.min, spec.step))
    }

    pub fn normalize(&self, name: &str, domain: f32) -> Result<f32, ParamError> {
        let spec = self
            .specs
            .get(name)
            .ok_or_else(|| ParamError::UnknownParameter(name.to_string()))?;
        Ok(map_range(domain, spec.min, spec.max, 0.0, 1.0).clamp(0.0, 1.0))
    }

    /// Store a domain value and invoke the parameter's scene capability.
    /// Exactly zero or one scene call happens per apply.
    pub fn apply(
        &mut self,
        name: &str,
        domain_value: f32,
        scene: &mut dyn Scene,
    ) -> Result<f32, ParamError> {
        let spec = self
            .specs
            .get(name)
            .ok_or_else(|| ParamError::UnknownParameter(name.to_string()))?
            .clone();

        let value = match spec.kind {
            ParamKind::Continuous | ParamKind::Level => {
                domain_value.clamp(spec.min, spec.max)
            }
            ParamKind::Toggle => {
                let current = self.get(name).unwrap_or(0.0) > 0.5;
                bool_to_f32(!current)
            }
        };

        self.values.insert(name.to_string(), value);

        match spec.routing {
            SceneRouting::None => {}
            SceneRouting::CreateGrid => scene.create_grid(),
            SceneRouting::CellSize => scene.update_cell_size(),
            SceneRouting::SphereMaterials => scene.update_sphere_materials(),
            SceneRouting::SphereScales => scene.update_sphere_scales(),
            SceneRouting::PostProcessing => scene.update_post_processing(),
            SceneRouting::Lighting => scene.update_lighting(),
            SceneRouting::GridLines => scene.update_grid_lines(),
            SceneRouting::CameraRotation => scene.update_camera_rotation(),
            SceneRouting::IsometricView => {
                scene.set_isometric_view(value > 0.5)
            }
            SceneRouting::CenterScaling => scene.update_center_scaling(),
        }

        Ok(value)
    }

    /// The single entry point shared by the MIDI and audio paths:
    /// denormalize then apply. Failures are logged and skipped by callers;
    /// nothing here panics.
    pub fn apply_unit(
        &mut self,
        name: &str,
        unit: f32,
        scene: &mut dyn Scene,
    ) -> Result<f32, ParamError> {
        let domain_value = self.denormalize(name, unit)?;
        self.apply(name, domain_value, scene)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::NullScene;

    #[test]
    fn denormalize_maps_into_domain() {
        let registry = ParameterRegistry::with_defaults();
        assert_eq!(registry.denormalize("light_intensity", 0.5).unwrap(), 5.0);
        assert_eq!(registry.denormalize("cell_size", 0.0).unwrap(), 0.2);
        assert_eq!(registry.denormalize("cell_size", 1.0).unwrap(), 4.0);
    }

    #[test]
    fn denormalize_honors_quant_step() {
        let registry = ParameterRegistry::with_defaults();
        let rows = registry.denormalize("grid_rows", 0.37).unwrap();
        assert_eq!(rows, rows.round());
        assert!((1.0..=24.0).contains(&rows));
    }

    #[test]
    fn out_of_range_unit_is_rejected() {
        let registry = ParameterRegistry::with_defaults();
        assert!(matches!(
            registry.denormalize("cell_size", 1.2),
            Err(ParamError::OutOfRangeUnit(_))
        ));
        assert!(matches!(
            registry.denormalize("cell_size", -0.1),
            Err(ParamError::OutOfRangeUnit(_))
        ));
    }

    #[test]
    fn unknown_parameter_is_rejected() {
        let mut registry = ParameterRegistry::with_defaults();
        assert!(matches!(
            registry.denormalize("nope", 0.5),
            Err(ParamError::UnknownParameter(_))
        ));
        assert!(matches!(
            registry.apply("nope", 0.5, &mut NullScene),
            Err(ParamError::UnknownParameter(_))
        ));
    }

    #[test]
    fn normalize_round_trips_within_step_tolerance() {
        let registry = ParameterRegistry::with_defaults();
        for name in ["cell_size", "light_intensity", "grid_rows"] {
            let step = registry.spec(name).unwrap().step;
            let span = {
                let spec = registry.spec(name).unwrap();
                spec.max - spec.min
            };
            let tolerance = ternary!(step > 0.0, step / span, 1e-6);
            for unit in [0.0, 0.25, 0.5, 0.75, 1.0] {
                let domain = registry.denormalize(name, unit).unwrap();
                let back = registry.normalize(name, domain).unwrap();
                let domain2 = registry.denormalize(name, back).unwrap();
                let back2 = registry.normalize(name, domain2).unwrap();
                assert!(
                    (back2 - unit).abs() <= tolerance + 1e-6,
                    "{}: {} vs {}",
                    name,
                    back2,
                    unit
                );
            }
        }
    }

    #[test]
    fn toggle_flips_regardless_of_incoming_value() {
        let mut registry = ParameterRegistry::with_defaults();
        let mut scene = NullScene;

        assert_eq!(registry.bool_value("isometric_view"), Some(false));
        registry.apply("isometric_view", 1.0, &mut scene).unwrap();
        assert_eq!(registry.bool_value("isometric_view"), Some(true));
        // Same incoming value again still flips
        registry.apply("isometric_view", 1.0, &mut scene).unwrap();
        assert_eq!(registry.bool_value("isometric_view"), Some(false));
    }

    #[test]
    fn level_param_is_threshold_set() {
        let mut registry = ParameterRegistry::with_defaults();
        let mut scene = NullScene;

        registry
            .apply("grid_lines_visible", 0.7, &mut scene)
            .unwrap();
        assert_eq!(registry.bool_value("grid_lines_visible"), Some(true));
        registry
            .apply("grid_lines_visible", 0.3, &mut scene)
            .unwrap();
        assert_eq!(registry.bool_value("grid_lines_visible"), Some(false));
    }
}
