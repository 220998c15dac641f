//! The STAR backend: high-level pipetting and transport operations
//! compiled into firmware commands.

mod backend;
mod liquid_classes;
mod ops;
mod probe;
mod y_spacing;

pub use backend::{StarBackend, StarConfig};
pub use liquid_classes::{liquid_class, HamiltonLiquidClass, LiquidClassKey};
pub use ops::{GripDirection, HotelSpec, LiquidOp, LldMode, MixSpec, ResourceMoveSpec, TipOp};
pub use probe::{mm_to_y_increments, Y_DRIVE_MM_PER_INCREMENT, Z_DRIVE_MM_PER_INCREMENT};
pub use y_spacing::{space_channel_ys, MIN_CHANNEL_PITCH, Y_BACK_LIMIT, Y_FRONT_LIMIT};
