//! The rendering side of the world, seen through a keyhole.
//!
//! The control core never touches geometry, materials, or cameras directly.
//! Every parameter that needs the renderer to react is classified against
//! exactly one of these capabilities (see
//! [`SceneRouting`](crate::control::params::SceneRouting)), and the
//! [`ParameterRegistry`](crate::control::params::ParameterRegistry) invokes
//! at most one capability per applied update.

/// Capability set a rendering host implements to receive structural
/// notifications. Implementations are expected to be synchronous and
/// bounded; anything heavy (full geometry rebuilds) should be deferred
/// internally by the host.
pub trait Scene {
    /// Regenerate the sphere grid from current dimension parameters.
    fn create_grid(&mut self);
    fn update_cell_size(&mut self);
    fn update_sphere_materials(&mut self);
    fn update_sphere_scales(&mut self);
    fn update_post_processing(&mut self);
    fn update_lighting(&mut self);
    fn update_grid_lines(&mut self);
    fn update_camera_rotation(&mut self);
    fn set_isometric_view(&mut self, enabled: bool);
    fn update_center_scaling(&mut self);

    /// Called when the active MIDI input disappears (hot unplug).
    fn on_disconnected(&mut self) {}
}

/// [`Scene`] that counts capability calls. Used by tests and useful for
/// smoke-checking routing classifications from a headless host.
#[derive(Debug, Default)]
pub struct RecordingScene {
    pub create_grid_calls: usize,
    pub cell_size_calls: usize,
    pub sphere_material_calls: usize,
    pub sphere_scale_calls: usize,
    pub post_processing_calls: usize,
    pub lighting_calls: usize,
    pub grid_line_calls: usize,
    pub camera_rotation_calls: usize,
    pub center_scaling_calls: usize,
    pub isometric_states: Vec<bool>,
    pub disconnects: usize,
}

impl RecordingScene {
    pub fn total_calls(&self) -> usize {
        self.create_grid_calls
            + self.cell_size_calls
            + self.sphere_material_calls
            + self.sphere_scale_calls
            + self.post_processing_calls
            + self.lighting_calls
            + self.grid_line_calls
            + self.camera_rotation_calls
            + self.center_scaling_calls
            + self.isometric_states.len()
    }
}

impl Scene for RecordingScene {
    fn create_grid(&mut self) {
        self.create_grid_calls += 1;
    }
    fn update_cell_size(&mut self) {
        self.cell_size_calls += 1;
    }
    fn update_sphere_materials(&mut self) {
        self.sphere_material_calls += 1;
    }
    fn update_sphere_scales(&mut self) {
        self.sphere_scale_calls += 1;
    }
    fn update_post_processing(&mut self) {
        self.post_processing_calls += 1;
    }
    fn update_lighting(&mut self) {
        self.lighting_calls += 1;
    }
    fn update_grid_lines(&mut self) {
        self.grid_line_calls += 1;
    }
    fn update_camera_rotation(&mut self) {
        self.camera_rotation_calls += 1;
    }
    fn set_isometric_view(&mut self, enabled: bool) {
        self.isometric_states.push(enabled);
    }
    fn update_center_scaling(&mut self) {
        self.center_scaling_calls += 1;
    }
    fn on_disconnected(&mut self) {
        self.disconnects += 1;
    }
}

/// No-op [`Scene`] for headless use and tests that don't assert on
/// scene traffic.
#[derive(Debug, Default)]
pub struct NullScene;

impl Scene for NullScene {
    fn create_grid(&mut self) {}
    fn update_cell_size(&mut self) {}
    fn update_sphere_materials(&mut self) {}
    fn update_sphere_scales(&mut self) {}
    fn update_post_processing(&mut self) {}
    fn update_lighting(&mut self) {}
    fn update_grid_lines(&mut self) {}
    fn update_camera_rotation(&mut self) {}
    fn set_isometric_view(&mut self, _enabled: bool) {}
    fn update_center_scaling(&mut self) {}
}
