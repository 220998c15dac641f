//! The unified error taxonomy and the driver-specific adapters into it.
//!
//! Both backends surface the same kinds, so callers handle "no tip on
//! channel 3" identically whether a STAR or a Prep reported it. Errors
//! the adapters cannot translate pass through as [`BackendError::Firmware`]
//! with the raw module and trace preserved.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use labware::LabwareError;
use prep_wire::{HcResult, PrepWireError};
use star_wire::{ChannelError, FirmwareErrorSet, StarErrorKind, StarWireError};

/// A per-channel failure, 0-indexed by channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelFault {
    HasTip,
    NoTip,
    TooLittleLiquid,
    TooLittleVolume,
    Firmware(String),
}

impl From<ChannelError> for ChannelFault {
    fn from(error: ChannelError) -> Self {
        match error {
            ChannelError::HasTip => Self::HasTip,
            ChannelError::NoTip => Self::NoTip,
            ChannelError::TooLittleLiquid => Self::TooLittleLiquid,
            ChannelError::TooLittleVolume => Self::TooLittleVolume,
            ChannelError::Other(module_error) => Self::Firmware(module_error.to_string()),
        }
    }
}

/// An untranslated firmware error.
#[derive(Debug, Clone, PartialEq)]
pub struct FirmwareFault {
    pub raw_module: String,
    pub trace: u8,
    pub message: String,
}

impl fmt::Display for FirmwareFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} trace {:02}: {}", self.raw_module, self.trace, self.message)
    }
}

#[derive(Debug, Error)]
pub enum BackendError {
    /// Attempted pickup with a tip already present.
    #[error("tip already present")]
    HasTip,

    /// The operation needs a tip and none is present.
    #[error("no tip present")]
    NoTip,

    /// LLD found no liquid, or the level is below reach.
    #[error("too little liquid")]
    TooLittleLiquid,

    /// The aspirate target exceeds what is available.
    #[error("too little volume")]
    TooLittleVolume,

    /// Geometry outside the mechanical limits.
    #[error("position not reachable")]
    PositionNotReachable,

    /// Different channels failed differently; per-channel detail inside.
    #[error("channel errors: {}", format_channels(.0))]
    Channelized(BTreeMap<usize, ChannelFault>),

    /// The codec or transport misbehaved.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A firmware error with no unified mapping.
    #[error("firmware error: {0}")]
    Firmware(FirmwareFault),

    /// No (matching) response within the read deadline. The robot state
    /// must be treated as unknown.
    #[error("timed out waiting for response")]
    Timeout,

    /// A caller-supplied value was out of bounds.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The driver does not implement this operation.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// `setup()` has not run, or the device refused because it is not
    /// initialized.
    #[error("backend not ready, call setup() first")]
    NotReady,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_channels(channels: &BTreeMap<usize, ChannelFault>) -> String {
    channels
        .iter()
        .map(|(channel, fault)| format!("channel {channel}: {fault:?}"))
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, BackendError>;

// ── STAR adapter ──────────────────────────────────────────────────────────────

/// Translate a STAR firmware error set into the unified taxonomy.
///
/// All-channel error sets become [`BackendError::Channelized`]. A single
/// module error with a direct unified mapping is promoted; everything
/// else stays a firmware fault. An unknown-parameter master error gets
/// the hint to query the instrument for the offending parameter name.
pub fn map_star_errors(set: FirmwareErrorSet) -> BackendError {
    if let Some(channels) = set.channelized() {
        return BackendError::Channelized(
            channels
                .into_iter()
                .map(|(channel, error)| (channel, error.into()))
                .collect(),
        );
    }

    if set.errors.len() == 1 {
        if let Some(error) = set.errors.values().next() {
            match error.kind {
                StarErrorKind::TipAlreadyFitted => return BackendError::HasTip,
                StarErrorKind::NoTip => return BackendError::NoTip,
                StarErrorKind::TooLittleLiquid | StarErrorKind::LiquidLevel => {
                    return BackendError::TooLittleLiquid
                }
                StarErrorKind::NotAspirated => return BackendError::TooLittleVolume,
                StarErrorKind::PositionNotReachable
                | StarErrorKind::IllegalTargetPlatePosition => {
                    return BackendError::PositionNotReachable
                }
                _ => {}
            }
            let mut message = error.message.clone();
            if error.raw_module == "C0" && error.trace_code == 31 {
                message.push_str(
                    "; query the name of the last faulty parameter (C0 VP) to identify it",
                );
            }
            return BackendError::Firmware(FirmwareFault {
                raw_module: error.raw_module.clone(),
                trace: error.trace_code,
                message,
            });
        }
    }

    BackendError::Firmware(FirmwareFault {
        raw_module: "C0".to_string(),
        trace: 0,
        message: set.to_string(),
    })
}

impl From<StarWireError> for BackendError {
    fn from(error: StarWireError) -> Self {
        match error {
            StarWireError::Firmware(set) => map_star_errors(set),
            other => BackendError::Protocol(other.to_string()),
        }
    }
}

/// True when a STAR error is the transient "command not completed"
/// condition worth an automatic retry.
pub fn star_error_is_transient(set: &FirmwareErrorSet) -> bool {
    set.errors.len() == 1
        && set
            .errors
            .values()
            .all(|e| e.kind == StarErrorKind::CommandNotCompleted)
}

// ── Prep adapter ──────────────────────────────────────────────────────────────

impl From<PrepWireError> for BackendError {
    fn from(error: PrepWireError) -> Self {
        match error {
            PrepWireError::CommandFailed { code, known } => match known {
                Some(HcResult::GenericInvalidParameter)
                | Some(HcResult::GenericInvalidData)
                | Some(HcResult::GenericNullParameter) => {
                    BackendError::InvalidArgument(format!("firmware rejected parameters ({code:#06x})"))
                }
                Some(HcResult::GenericNotImplemented) | Some(HcResult::GenericNotSupported) => {
                    BackendError::Unsupported("firmware reports unsupported command")
                }
                Some(HcResult::GenericTimeOut)
                | Some(HcResult::GenericCoordinatedCommandTimeout)
                | Some(HcResult::ComLinkTimeout) => BackendError::Timeout,
                Some(HcResult::GenericNotInitialized)
                | Some(HcResult::GenericNotReady)
                | Some(HcResult::GenericNotConfigured) => BackendError::NotReady,
                Some(result) => BackendError::Firmware(FirmwareFault {
                    raw_module: "prep".to_string(),
                    trace: 0,
                    message: format!("{result:?} ({code:#06x})"),
                }),
                None => BackendError::Protocol(format!("unknown HcResult code {code:#06x}")),
            },
            other => BackendError::Protocol(other.to_string()),
        }
    }
}

/// True when a Prep failure is the transient busy condition worth an
/// automatic retry.
pub fn prep_error_is_transient(error: &PrepWireError) -> bool {
    matches!(
        error,
        PrepWireError::CommandFailed {
            known: Some(result),
            ..
        } if result.is_busy()
    )
}

impl From<LabwareError> for BackendError {
    fn from(error: LabwareError) -> Self {
        match error {
            LabwareError::ResourceNotFound(name) => {
                BackendError::InvalidArgument(format!("resource '{name}' not found"))
            }
            other => BackendError::InvalidArgument(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use star_wire::check_fw_string_error;

    #[test]
    fn channelized_star_errors_map_per_channel() {
        let set = check_fw_string_error("X0er00/00 P1er08/76 P3er08/76").unwrap_err();
        match map_star_errors(set) {
            BackendError::Channelized(channels) => {
                assert_eq!(channels[&0], ChannelFault::NoTip);
                assert_eq!(channels[&2], ChannelFault::NoTip);
            }
            other => panic!("expected channelized, got {other:?}"),
        }
    }

    #[test]
    fn single_master_error_promotes_to_kind() {
        let set = check_fw_string_error("C0PPid0012er27/00").unwrap_err();
        assert!(matches!(
            map_star_errors(set),
            BackendError::PositionNotReachable
        ));
    }

    #[test]
    fn unknown_parameter_gets_the_hint() {
        let set = check_fw_string_error("C0ASid0004er01/31").unwrap_err();
        match map_star_errors(set) {
            BackendError::Firmware(fault) => {
                assert!(fault.message.contains("last faulty parameter"));
            }
            other => panic!("expected firmware fault, got {other:?}"),
        }
    }

    #[test]
    fn prep_busy_is_transient() {
        let busy = PrepWireError::CommandFailed {
            code: 0x0019,
            known: HcResult::from_code(0x0019),
        };
        assert!(prep_error_is_transient(&busy));
        let hard = PrepWireError::CommandFailed {
            code: 0x0001,
            known: HcResult::from_code(0x0001),
        };
        assert!(!prep_error_is_transient(&hard));
    }

    #[test]
    fn unknown_prep_code_is_a_protocol_error() {
        let error = PrepWireError::CommandFailed {
            code: 0x7777,
            known: None,
        };
        match BackendError::from(error) {
            BackendError::Protocol(message) => assert!(message.contains("0x7777")),
            other => panic!("expected protocol error, got {other:?}"),
        }
    }
}
