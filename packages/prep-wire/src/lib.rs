//! # prep-wire
//!
//! Binary codec for the Prep's layered wire protocol. From the outside
//! in: an `IpPacket` envelope, a `HarpPacket` with source and destination
//! addresses, and a `HoiPacket2` carrying typed data fragments. All
//! multi-byte integers are little-endian.
//!
//! The first fragment of a response may be an `HcResult`; a nonzero value
//! means the firmware rejected or failed the command.

pub mod fragment;
pub mod hcresult;
pub mod packet;

pub use fragment::{Fragment, FragmentValue, ParameterType};
pub use hcresult::{check_result_fragment, HcResult, HcResultGroup};
pub use packet::{
    HarpAction, HarpAddress, HarpPacket, HoiAction, HoiPacket2, IpPacket, IpProtocol,
    PayloadDescription, ResponseRequired, HARP_PROTOCOL_HOI2,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PrepWireError {
    /// Fewer bytes than the fixed header needs.
    #[error("data too small to decode {layer} (need {need} bytes, got {got})")]
    Truncated {
        layer: &'static str,
        need: usize,
        got: usize,
    },

    /// A length field disagrees with the actual byte count.
    #[error("{layer} length field mismatch: field says {field}, buffer has {actual}")]
    LengthMismatch {
        layer: &'static str,
        field: usize,
        actual: usize,
    },

    /// A fragment carried an unknown or unsupported parameter type.
    #[error("unsupported parameter type {0}")]
    UnsupportedType(u8),

    /// Fragment payload did not decode as its declared type.
    #[error("bad fragment payload for {type_name}: {reason}")]
    BadFragment {
        type_name: &'static str,
        reason: String,
    },

    /// A packet named a protocol this codec does not speak.
    #[error("unsupported protocol {0}")]
    UnsupportedProtocol(u8),

    /// The fragment count in a HOI2 header disagrees with the payload.
    #[error("fragment count mismatch: header says {header}, payload has {actual}")]
    FragmentCountMismatch { header: usize, actual: usize },

    /// The firmware answered with a nonzero HcResult.
    #[error("command failed with result code {code:#06x} ({known:?})")]
    CommandFailed { code: u16, known: Option<HcResult> },
}
