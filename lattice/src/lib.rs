//! Routes two real-time control streams, a MIDI control surface and a live
//! audio spectrum, into a large named parameter space that drives an
//! external rendering host.
//!
//! The pipeline: raw frames decode in [`io::midi`], the
//! [`control::hub::ControlHub`] dispatches through the binding table (or an
//! armed learn session), bursts coalesce in the update scheduler, and every
//! value crosses exactly one normalization layer
//! ([`control::params::ParameterRegistry`]) before reaching the host's
//! [`scene::Scene`] capabilities. The audio path
//! ([`control::audio_bands`]) feeds the same layer once per frame.

pub mod control;
pub mod core;
pub mod io;
pub mod runtime;
pub mod scene;

pub mod prelude {
    pub use crate::control::*;
    pub use crate::core::prelude::*;
    pub use crate::io::audio::{
        AudioInput, SpectrumFrame, SpectrumSource, list_audio_devices,
    };
    pub use crate::io::midi::{
        ConnectionState, DeviceDescriptor, DeviceError, DeviceIo,
        DeviceSession, DisconnectCallback, Event, FrameCallback, MidirIo,
        decode, list_input_ports,
    };
    pub use crate::runtime::serialization::{Preset, PresetError};
    pub use crate::runtime::storage::Settings;
    pub use crate::scene::{NullScene, RecordingScene, Scene};
}
