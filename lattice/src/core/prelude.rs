pub use crate::core::logging::init_logger;
pub use crate::core::logging::{debug, error, info, trace, warn};
pub use crate::core::util::HashMap;
pub use crate::core::util::HashSet;
pub use crate::core::util::bool_to_f32;
pub use crate::core::util::map_range;
pub use crate::core::util::quantize;
pub use crate::ternary;
