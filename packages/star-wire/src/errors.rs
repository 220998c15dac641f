//! Firmware error detection and taxonomy.
//!
//! Error reporting comes in two shapes. The master module `C0` answers
//! with `er##/##` (error code / trace code) and may append one entry per
//! slave module, like `P1er08/76`. Slave modules answering directly only
//! send `er##`, a bare trace code. Trace code meaning is module specific;
//! the tables below cover the master, the pipetting channels, the CoRe 96
//! head and the iSWAP.
//!
//! When every reported module is a pipetting channel, the error set is
//! demultiplexed into per-channel errors so callers can retry or skip
//! individual channels.

use std::collections::BTreeMap;
use std::fmt;

use regex::Regex;

// ── Module names ──────────────────────────────────────────────────────────────

/// All slave modules the master may report on.
pub const SLAVE_MODULES: [&str; 30] = [
    "X0", "I0", "W1", "W2", "T1", "T2", "R0", "P1", "P2", "P3", "P4", "P5", "P6", "P7", "P8",
    "P9", "PA", "PB", "PC", "PD", "PE", "PF", "PG", "H0", "HW", "HU", "HV", "N0", "D0", "NP",
];

/// Human readable name of a module id.
pub fn module_name(id: &str) -> &'static str {
    match id {
        "C0" => "Master",
        "X0" => "X-drives",
        "I0" => "Auto Load",
        "W1" => "Wash station 1-3",
        "W2" => "Wash station 4-6",
        "T1" => "Temperature carrier 1",
        "T2" => "Temperature carrier 2",
        "R0" => "ISWAP",
        "P1" => "Pipetting channel 1",
        "P2" => "Pipetting channel 2",
        "P3" => "Pipetting channel 3",
        "P4" => "Pipetting channel 4",
        "P5" => "Pipetting channel 5",
        "P6" => "Pipetting channel 6",
        "P7" => "Pipetting channel 7",
        "P8" => "Pipetting channel 8",
        "P9" => "Pipetting channel 9",
        "PA" => "Pipetting channel 10",
        "PB" => "Pipetting channel 11",
        "PC" => "Pipetting channel 12",
        "PD" => "Pipetting channel 13",
        "PE" => "Pipetting channel 14",
        "PF" => "Pipetting channel 15",
        "PG" => "Pipetting channel 16",
        "H0" => "CoRe 96 Head",
        "HW" => "Pump station 1 station",
        "HU" => "Pump station 2 station",
        "HV" => "Pump station 3 station",
        "N0" => "Nano dispenser",
        "D0" => "384 dispensing head",
        "NP" => "Nano disp. pressure controller",
        "M1" => "Reserved for module 1",
        _ => "Unknown module",
    }
}

/// Channel index of a pipetting module id (`P1` is channel 0), if it is
/// one.
pub fn pip_channel_index(id: &str) -> Option<usize> {
    let mut chars = id.chars();
    if chars.next() != Some('P') {
        return None;
    }
    match chars.next() {
        Some(c @ '1'..='9') => Some(c as usize - '1' as usize),
        Some(c @ 'A'..='G') => Some(9 + c as usize - 'A' as usize),
        _ => None,
    }
}

// ── Error kinds ───────────────────────────────────────────────────────────────

/// The firmware error code taxonomy (error codes 1..33 and 99..113).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StarErrorKind {
    CommandSyntax,
    Hardware,
    CommandNotCompleted,
    ClotDetected,
    BarcodeUnreadable,
    TooLittleLiquid,
    TipAlreadyFitted,
    NoTip,
    NoCarrier,
    NotCompleted,
    DispenseWithPressureLld,
    NoTeachInSignal,
    LoadingTray,
    SequencedAspirationWithPressureLld,
    NotAllowedParameterCombination,
    CoverClose,
    Aspiration,
    WashFluidOrWaste,
    Incubation,
    TadmMeasurement,
    NoElement,
    ElementStillHolding,
    ElementLost,
    IllegalTargetPlatePosition,
    IllegalUserAccess,
    PositionNotReachable,
    UnexpectedLld,
    AreaAlreadyOccupied,
    ImpossibleToOccupyArea,
    AntiDropControl,
    Decapper,
    DecapperHandling,
    Slave,
    WrongCarrier,
    NoCarrierBarcode,
    LiquidLevel,
    NotDetected,
    NotAspirated,
    ImproperDispensation,
    NoLabware,
    UnexpectedLabware,
    WrongLabware,
    BarcodeMask,
    BarcodeNotUnique,
    BarcodeAlreadyUsed,
    KitLotExpired,
    Delimiter,
    Unknown,
}

/// Map a firmware error code to its kind. Unknown codes map to
/// [`StarErrorKind::Unknown`].
pub fn error_code_to_kind(code: u8) -> StarErrorKind {
    use StarErrorKind::*;
    match code {
        1 => CommandSyntax,
        2 => Hardware,
        3 => CommandNotCompleted,
        4 => ClotDetected,
        5 => BarcodeUnreadable,
        6 => TooLittleLiquid,
        7 => TipAlreadyFitted,
        8 => NoTip,
        9 => NoCarrier,
        10 => NotCompleted,
        11 => DispenseWithPressureLld,
        12 => NoTeachInSignal,
        13 => LoadingTray,
        14 => SequencedAspirationWithPressureLld,
        15 => NotAllowedParameterCombination,
        16 => CoverClose,
        17 => Aspiration,
        18 => WashFluidOrWaste,
        19 => Incubation,
        20 | 26 => TadmMeasurement,
        21 => NoElement,
        22 => ElementStillHolding,
        23 => ElementLost,
        24 => IllegalTargetPlatePosition,
        25 => IllegalUserAccess,
        27 => PositionNotReachable,
        28 => UnexpectedLld,
        29 => AreaAlreadyOccupied,
        30 => ImpossibleToOccupyArea,
        31 => AntiDropControl,
        32 => Decapper,
        33 => DecapperHandling,
        99 => Slave,
        100 => WrongCarrier,
        101 => NoCarrierBarcode,
        102 => LiquidLevel,
        103 => NotDetected,
        104 => NotAspirated,
        105 => ImproperDispensation,
        106 => NoLabware,
        107 => UnexpectedLabware,
        108 => WrongLabware,
        109 => BarcodeMask,
        110 => BarcodeNotUnique,
        111 => BarcodeAlreadyUsed,
        112 => KitLotExpired,
        113 => Delimiter,
        _ => Unknown,
    }
}

// ── Trace tables ──────────────────────────────────────────────────────────────

fn master_trace(trace: u8) -> Option<&'static str> {
    Some(match trace {
        10 => "CAN error",
        11 => "Slave command time out",
        20 => "E2PROM error",
        30 => "Unknown command",
        31 => "Unknown parameter",
        32 => "Parameter out of range",
        33 => "Parameter does not belong to command, or not all parameters were sent",
        34 => "Node name unknown",
        35 => "id parameter error",
        37 => "node name defined twice",
        38 => "faulty XL channel settings",
        39 => "faulty robotic channel settings",
        40 => "PIP task busy",
        41 => "Auto load task busy",
        42 => "Miscellaneous task busy",
        43 => "Incubator task busy",
        44 => "Washer task busy",
        45 => "iSWAP task busy",
        46 => "CoRe 96 head task busy",
        47 => "Carrier sensor doesn't work properly",
        48 => "CoRe 384 head task busy",
        49 => "Nano pipettor task busy",
        50 => "XL channel task busy",
        51 => "Tube gripper task busy",
        52 => "Imaging channel task busy",
        53 => "Robotic channel task busy",
        _ => return None,
    })
}

fn pip_trace(trace: u8) -> Option<&'static str> {
    Some(match trace {
        0 => "No error",
        20 => "No communication to EEPROM",
        30 => "Unknown command",
        31 => "Unknown parameter",
        32 => "Parameter out of range",
        35 => "Voltages outside permitted range",
        36 | 37 => "Stop during execution of command",
        40 => "No parallel processes permitted",
        50 => "Dispensing drive init. position not found",
        51 => "Dispensing drive not initialized",
        52 => "Dispensing drive movement error",
        53 => "Maximum volume in tip reached",
        54 => "Position outside of permitted area",
        55 => "Y-drive blocked",
        56 => "Y-drive not initialized",
        57 => "Y-drive movement error",
        60 => "X-drive blocked",
        61 => "X-drive not initialized",
        62 => "X-drive movement error",
        63 => "X-drive limit stop not found",
        70 => "No liquid level found (possibly because no liquid was present)",
        71 => "Not enough liquid present",
        75 => "No tip picked up, possibly because none was present at specified position",
        76 => "Tip already picked up",
        77 => "Tip not discarded",
        78 => "Wrong tip picked up",
        80 => "Liquid not correctly aspirated",
        81 => "Clot detected",
        82 => "TADM measurement out of lower limit curve",
        83 => "TADM measurement out of upper limit curve",
        84 => "Not enough memory for TADM measurement",
        85 => "No communication to digital potentiometer",
        86 => "ADC algorithm error",
        87 => "2nd phase of liquid not found",
        88 => "Not enough liquid present",
        90 => "Limit curve not resetable",
        91 => "Limit curve not programmable",
        92 => "Limit curve not found",
        93 => "Limit curve data incorrect",
        94 => "Not enough memory for limit curve",
        95 => "Invalid limit curve index",
        96 => "Limit curve already stored",
        _ => return None,
    })
}

fn core96_trace(trace: u8) -> Option<&'static str> {
    Some(match trace {
        20 => "No communication to EEPROM",
        30 => "Unknown command",
        31 => "Unknown parameter",
        32 => "Parameter out of range",
        35 => "Voltage outside permitted range",
        36 => "Stop during execution of command",
        37 => "The adjustment sensor did not switch",
        40 => "No parallel processes permitted",
        50 => "Dispensing drive initialization failed",
        51 => "Dispensing drive not initialized",
        52 => "Dispensing drive movement error",
        53 => "Maximum volume in tip reached",
        54 => "Position out of permitted area",
        55 => "Y drive initialization failed",
        56 => "Y drive not initialized",
        57 => "Y drive movement error",
        58 => "Y drive position outside of permitted area",
        60 => "Z drive initialization failed",
        61 => "Z drive not initialized",
        62 => "Z drive movement error",
        63 => "Z drive position outside of permitted area",
        65 => "Squeezer drive initialization failed",
        66 => "Squeezer drive not initialized",
        67 => "Squeezer drive movement error",
        68 => "Squeezer drive position outside of permitted area",
        70 => "No liquid level found",
        71 => "Not enough liquid present",
        75 => "No tip picked up",
        76 => "Tip already picked up",
        81 => "Clot detected",
        _ => return None,
    })
}

fn iswap_trace(trace: u8) -> Option<&'static str> {
    Some(match trace {
        20 => "No communication to EEPROM",
        30 => "Unknown command",
        31 => "Unknown parameter",
        32 => "Parameter out of range",
        33 => "FW doesn't match to HW",
        36 => "Stop during execution of command",
        37 => "The adjustment sensor did not switch",
        38 => "The adjustment sensor cannot be searched",
        40 | 41 | 42 => "No parallel processes permitted",
        50 => "Y-drive initialization failed",
        51 => "Y-drive not initialized",
        52 => "Y-drive movement error: drive locked or incremental sensor fault",
        53 => "Y-drive movement error: position counter over/underflow",
        60 => "Z-drive initialization failed",
        61 => "Z-drive not initialized",
        62 => "Z-drive movement error: drive locked or incremental sensor fault",
        63 => "Z-drive movement error: position counter over/underflow",
        70 => "Rotation-drive initialization failed",
        71 => "Rotation-drive not initialized",
        72 => "Rotation-drive movement error: drive locked or incremental sensor fault",
        73 => "Rotation-drive movement error: position counter over/underflow",
        80 => "Wrist twist drive initialization failed",
        81 => "Wrist twist drive not initialized",
        82 => "Wrist twist drive movement error: drive locked or incremental sensor fault",
        83 => "Wrist twist drive movement error: position counter over/underflow",
        85 => "Gripper drive: communication error to gripper DMS digital potentiometer",
        86 => "Gripper drive: auto adjustment of DMS digital potentiometer not possible",
        89 => "Gripper drive movement error: drive locked or sensor fault during gripping",
        90 => "Gripper drive initialization failed",
        91 => "iSWAP not initialized",
        92 => "Gripper drive movement error: drive locked or sensor fault during release",
        93 => "Gripper drive movement error: position counter over/underflow",
        94 => "Plate not found",
        96 => "Plate not available",
        97 => "Unexpected object found",
        _ => return None,
    })
}

/// Trace code to message, module specific.
pub fn trace_to_string(module_id: &str, trace: u8) -> String {
    let table = match module_id {
        "C0" => master_trace(trace),
        "H0" => core96_trace(trace),
        "R0" => iswap_trace(trace),
        _ if pip_channel_index(module_id).is_some() || module_id == "PX" => pip_trace(trace),
        _ => None,
    };
    table
        .map(str::to_string)
        .unwrap_or_else(|| format!("Unknown trace information code {trace:02}"))
}

// ── Error values ──────────────────────────────────────────────────────────────

/// An error reported by one module.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleError {
    pub kind: StarErrorKind,
    pub trace_code: u8,
    pub message: String,
    pub raw_module: String,
    pub raw_error: String,
}

impl fmt::Display for ModuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} ({}): {}",
            self.kind,
            self.raw_error.trim(),
            self.message
        )
    }
}

/// A per-channel view of a pipetting error.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelError {
    HasTip,
    NoTip,
    TooLittleLiquid,
    TooLittleVolume,
    Other(ModuleError),
}

impl ChannelError {
    fn from_module_error(error: &ModuleError) -> Self {
        // Kind first, then module specific trace codes.
        match error.kind {
            StarErrorKind::TipAlreadyFitted => return Self::HasTip,
            StarErrorKind::NoTip => return Self::NoTip,
            _ => {}
        }
        match error.trace_code {
            75 => Self::NoTip,
            70 | 71 => Self::TooLittleLiquid,
            54 => Self::TooLittleVolume,
            _ => Self::Other(error.clone()),
        }
    }
}

/// All module errors found in one response.
#[derive(Debug, Clone)]
pub struct FirmwareErrorSet {
    /// Keyed by human readable module name, ordered for stable output.
    pub errors: BTreeMap<String, ModuleError>,
    pub raw_response: String,
}

impl fmt::Display for FirmwareErrorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (module, error) in &self.errors {
            if !first {
                write!(f, "; ")?;
            }
            write!(f, "{module}: {error}")?;
            first = false;
        }
        Ok(())
    }
}

impl std::error::Error for FirmwareErrorSet {}

impl FirmwareErrorSet {
    /// When every module entry is a pipetting channel, return the error
    /// per zero-indexed channel.
    pub fn channelized(&self) -> Option<BTreeMap<usize, ChannelError>> {
        let mut out = BTreeMap::new();
        for error in self.errors.values() {
            let channel = pip_channel_index(&error.raw_module)?;
            out.insert(channel, ChannelError::from_module_error(error));
        }
        if out.is_empty() {
            None
        } else {
            Some(out)
        }
    }

    /// The master's trace code, when the master reported. Used for the
    /// unknown-parameter hint and busy retries.
    pub fn master_trace(&self) -> Option<u8> {
        self.errors
            .values()
            .find(|e| e.raw_module == "C0")
            .map(|e| e.trace_code)
    }
}

// ── Detection ─────────────────────────────────────────────────────────────────

/// Scan a response for error fields.
///
/// Entries of `00` or `00/00` are no-errors and discarded. A master
/// `SlaveError` (code 99) is dropped when slave entries are present, to
/// avoid double reporting. Returns `Ok(())` for clean responses.
pub fn check_fw_string_error(resp: &str) -> Result<(), FirmwareErrorSet> {
    let mut entries: Vec<(String, u8, u8, String)> = Vec::new(); // module, code, trace, raw

    // `##/##` style entries: the leading master `er` field and any
    // module-prefixed slave fields.
    let master_re = Regex::new(r"er(\d{2})/(\d{2})").expect("static regex");
    let slave_re = Regex::new(r"([A-Z][0-9A-Z])er(\d{2})/(\d{2})").expect("static regex");

    let mut slave_spans: Vec<(usize, usize)> = Vec::new();
    for captures in slave_re.captures_iter(resp) {
        let whole = captures.get(0).expect("whole match");
        slave_spans.push((whole.start(), whole.end()));
        let module = captures[1].to_string();
        let code: u8 = captures[2].parse().unwrap_or(0);
        let trace: u8 = captures[3].parse().unwrap_or(0);
        if code == 0 && trace == 0 {
            continue;
        }
        let raw = format!("{:02}/{:02}", code, trace);
        entries.push((module, code, trace, raw));
    }

    for captures in master_re.captures_iter(resp) {
        let whole = captures.get(0).expect("whole match");
        // Skip the `er` parts of module-prefixed entries.
        if slave_spans
            .iter()
            .any(|&(start, end)| whole.start() >= start && whole.end() <= end)
        {
            continue;
        }
        let code: u8 = captures[1].parse().unwrap_or(0);
        let trace: u8 = captures[2].parse().unwrap_or(0);
        if code == 0 && trace == 0 {
            continue;
        }
        let raw = format!("{:02}/{:02}", code, trace);
        entries.push(("C0".to_string(), code, trace, raw));
    }

    // Bare `er##` responses from a slave module answering directly: the
    // two digits are a trace code, the module is the response's own
    // prefix.
    if entries.is_empty() && !resp.contains('/') {
        let bare_re = Regex::new(r"er(\d{2})").expect("static regex");
        if let Some(captures) = bare_re.captures(resp) {
            let trace: u8 = captures[1].parse().unwrap_or(0);
            if trace != 0 {
                let module = resp.get(0..2).unwrap_or("??").to_string();
                entries.push((module, 0, trace, format!("{trace:02}")));
            }
        }
    }

    if entries.is_empty() {
        return Ok(());
    }

    let has_slaves = entries.iter().any(|(module, ..)| module != "C0");
    let mut errors = BTreeMap::new();
    for (module, code, trace, raw) in entries {
        let kind = if code == 0 {
            StarErrorKind::Unknown
        } else {
            error_code_to_kind(code)
        };
        // The master reporting "a slave failed" is noise next to the
        // slave's own entry.
        if module == "C0" && kind == StarErrorKind::Slave && has_slaves {
            continue;
        }
        let message = trace_to_string(&module, trace);
        errors.insert(
            module_name(&module).to_string(),
            ModuleError {
                kind,
                trace_code: trace,
                message,
                raw_module: module,
                raw_error: raw,
            },
        );
    }

    if errors.is_empty() {
        return Ok(());
    }
    Err(FirmwareErrorSet {
        errors,
        raw_response: resp.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_responses_pass() {
        assert!(check_fw_string_error("C0TPid0004er00/00").is_ok());
        assert!(check_fw_string_error("C0RTid0023ry0100 0200").is_ok());
        assert!(check_fw_string_error("P1RZid0003er00").is_ok());
    }

    #[test]
    fn master_error_is_classified() {
        let err = check_fw_string_error("C0ASid0004er01/30").unwrap_err();
        let master = &err.errors["Master"];
        assert_eq!(master.kind, StarErrorKind::CommandSyntax);
        assert_eq!(master.trace_code, 30);
        assert_eq!(master.message, "Unknown command");
    }

    #[test]
    fn slave_error_drops_master_slave_entry() {
        let err = check_fw_string_error("C0TPid0004er99/00 P1er08/76").unwrap_err();
        assert!(!err.errors.contains_key("Master"));
        let channel = &err.errors["Pipetting channel 1"];
        assert_eq!(channel.kind, StarErrorKind::NoTip);
        assert_eq!(channel.message, "Tip already picked up");
    }

    #[test]
    fn channel_demux() {
        let err = check_fw_string_error("X0er00/00 P1er08/76 P3er08/76").unwrap_err();
        let channels = err.channelized().expect("all entries are channels");
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[&0], ChannelError::NoTip);
        assert_eq!(channels[&2], ChannelError::NoTip);
    }

    #[test]
    fn demux_refuses_mixed_modules() {
        let err = check_fw_string_error("C0TPid0004er02/00 P1er08/75").unwrap_err();
        assert!(err.channelized().is_none());
    }

    #[test]
    fn trace_rules_for_channels() {
        let err = check_fw_string_error("P1er06/70 P2er02/54 P3er07/00 P4er06/71").unwrap_err();
        let channels = err.channelized().unwrap();
        assert_eq!(channels[&0], ChannelError::TooLittleLiquid);
        assert_eq!(channels[&1], ChannelError::TooLittleVolume);
        assert_eq!(channels[&2], ChannelError::HasTip);
        assert_eq!(channels[&3], ChannelError::TooLittleLiquid);
    }

    #[test]
    fn bare_slave_trace() {
        let err = check_fw_string_error("P1RZid0003er32").unwrap_err();
        let channel = &err.errors["Pipetting channel 1"];
        assert_eq!(channel.kind, StarErrorKind::Unknown);
        assert_eq!(channel.trace_code, 32);
        assert_eq!(channel.message, "Parameter out of range");
    }

    #[test]
    fn pip_channel_indices() {
        assert_eq!(pip_channel_index("P1"), Some(0));
        assert_eq!(pip_channel_index("P9"), Some(8));
        assert_eq!(pip_channel_index("PA"), Some(9));
        assert_eq!(pip_channel_index("PG"), Some(15));
        assert_eq!(pip_channel_index("H0"), None);
        assert_eq!(pip_channel_index("C0"), None);
    }
}
