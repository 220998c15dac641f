//! The Prep backend: structured firmware parameters and command-id
//! dispatch over the binary wire protocol.

mod backend;
pub mod params;

pub use backend::{
    PrepBackend, PrepLiquidOp, PrepTipOp, CHANNEL_COMMAND_SOURCE, DECK_LIGHT_SOURCE,
    DEFAULT_HOST, DEFAULT_PORT, DESTINATION_ADDRESS, PIPETTOR_DESTINATION, PIPETTOR_SOURCE,
    PREP_NUM_CHANNELS, SOURCE_ADDRESS,
};
