pub mod audio_bands;
pub mod bindings;
pub mod hub;
pub mod learn;
pub mod params;
pub mod scheduler;

pub use audio_bands::*;
pub use bindings::*;
pub use hub::*;
pub use learn::*;
pub use params::*;
pub use scheduler::*;
