//! # star-wire
//!
//! The STAR firmware talks 7-bit ASCII: a two character module id, a two
//! character command, an echoed `id####`, then `<name><value>` parameters
//! where names are two lowercase letters. This crate builds those frames,
//! parses responses against format strings, and classifies the `er` error
//! fields into the firmware error taxonomy, including the per-channel
//! demultiplexing of pipetting errors.
//!
//! No transport lives here; the backend owns the socket and hands frames
//! back and forth as strings.

pub mod errors;
pub mod frame;
pub mod parse;

pub use errors::{
    check_fw_string_error, ChannelError, FirmwareErrorSet, ModuleError, StarErrorKind,
};
pub use frame::{mm_to_tenths, ul_to_tenths, CommandBuilder, IdGenerator};
pub use parse::{parse_response, FieldValue};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StarWireError {
    /// A required parameter was missing from a response.
    #[error("could not find matches for parameter {0}")]
    MissingParameter(String),

    /// A parameter matched but its value could not be decoded.
    #[error("could not decode parameter {name}: {reason}")]
    BadValue { name: String, reason: String },

    /// The format string itself was malformed.
    #[error("bad format string: {0}")]
    BadFormat(String),

    /// The response was too short to carry a device and command id.
    #[error("response too short: {0:?}")]
    TooShort(String),

    /// The firmware reported one or more module errors.
    #[error("firmware error: {0}")]
    Firmware(#[from] FirmwareErrorSet),
}
