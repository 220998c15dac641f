//! Typed parameter structures for the Prep firmware.
//!
//! Each structure mirrors one firmware structure fragment: its fields
//! encode in declaration order as a `Structure` of typed fragments.
//! Structures whose firmware default is well known carry a `default()`
//! constructor with those values.

use prep_wire::Fragment;

// ── Firmware enums ────────────────────────────────────────────────────────────

/// Channel addressing. The machine has a rear and a front channel;
/// channel index 0 of the public API is the rear one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ChannelIndex {
    InvalidIndex = 0,
    FrontChannel = 1,
    RearChannel = 2,
    MphChannel = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PrepTipType {
    None = 0,
    LowVolume = 1,
    StandardVolume = 2,
    HighVolume = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum TadmRecordingMode {
    NoRecording = 0,
    Errors = 1,
    All = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum TipDropType {
    FixedHeight = 0,
    Stall = 1,
    CLldSeek = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum LldSensitivity {
    Low = 0,
    MediumLow = 1,
    MediumHigh = 2,
    High = 3,
    Tool = 4,
    Waste = 5,
}

// ── Coordinates and movement ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct XyzCoord {
    pub default_values: bool,
    pub x_position: f32,
    pub y_position: f32,
    pub z_position: f32,
}

impl XyzCoord {
    pub fn fragments(&self) -> Vec<Fragment> {
        vec![
            Fragment::boolean(self.default_values),
            Fragment::real32(self.x_position),
            Fragment::real32(self.y_position),
            Fragment::real32(self.z_position),
        ]
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PlateDimensions {
    pub default_values: bool,
    pub length: f32,
    pub width: f32,
    pub height: f32,
}

impl PlateDimensions {
    pub fn fragments(&self) -> Vec<Fragment> {
        vec![
            Fragment::boolean(self.default_values),
            Fragment::real32(self.length),
            Fragment::real32(self.width),
            Fragment::real32(self.height),
        ]
    }
}

/// One channel's y/z target for a gantry move.
#[derive(Debug, Clone, Copy)]
pub struct ChannelYzMoveParameters {
    pub default_values: bool,
    pub channel: ChannelIndex,
    pub y_position: f32,
    pub z_position: f32,
}

impl ChannelYzMoveParameters {
    pub fn fragments(&self) -> Vec<Fragment> {
        vec![
            Fragment::boolean(self.default_values),
            Fragment::enumeration(self.channel as u32),
            Fragment::real32(self.y_position),
            Fragment::real32(self.z_position),
        ]
    }
}

/// Whole-gantry move: one x for the gantry, y/z per channel.
#[derive(Debug, Clone)]
pub struct GantryMoveXyzParameters {
    pub default_values: bool,
    pub gantry_x_position: f32,
    pub axis_parameters: Vec<ChannelYzMoveParameters>,
}

impl GantryMoveXyzParameters {
    pub fn fragments(&self) -> Vec<Fragment> {
        vec![
            Fragment::boolean(self.default_values),
            Fragment::real32(self.gantry_x_position),
            Fragment::structure_array(
                self.axis_parameters.iter().map(|p| p.fragments()).collect(),
            ),
        ]
    }
}

// ── Tips ──────────────────────────────────────────────────────────────────────

/// Where a channel finds or leaves a tip.
#[derive(Debug, Clone, Copy)]
pub struct TipPositionParameters {
    pub default_values: bool,
    pub channel: ChannelIndex,
    pub x_position: f32,
    pub y_position: f32,
    pub z_position: f32,
    pub z_seek: f32,
}

impl TipPositionParameters {
    pub fn fragments(&self) -> Vec<Fragment> {
        vec![
            Fragment::boolean(self.default_values),
            Fragment::enumeration(self.channel as u32),
            Fragment::real32(self.x_position),
            Fragment::real32(self.y_position),
            Fragment::real32(self.z_position),
            Fragment::real32(self.z_seek),
        ]
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TipDropParameters {
    pub default_values: bool,
    pub channel: ChannelIndex,
    pub x_position: f32,
    pub y_position: f32,
    pub z_position: f32,
    pub z_seek: f32,
    pub drop_type: TipDropType,
}

impl TipDropParameters {
    pub fn fragments(&self) -> Vec<Fragment> {
        vec![
            Fragment::boolean(self.default_values),
            Fragment::enumeration(self.channel as u32),
            Fragment::real32(self.x_position),
            Fragment::real32(self.y_position),
            Fragment::real32(self.z_position),
            Fragment::real32(self.z_seek),
            Fragment::enumeration(self.drop_type as u32),
        ]
    }
}

/// Geometry of the tip a pickup expects to find.
#[derive(Debug, Clone, Copy)]
pub struct TipPickupParameters {
    pub default_values: bool,
    pub volume: f32,
    pub length: f32,
    pub tip_type: PrepTipType,
    pub has_filter: bool,
    pub is_needle: bool,
    pub is_tool: bool,
}

impl TipPickupParameters {
    pub fn fragments(&self) -> Vec<Fragment> {
        vec![
            Fragment::boolean(self.default_values),
            Fragment::real32(self.volume),
            Fragment::real32(self.length),
            Fragment::enumeration(self.tip_type as u32),
            Fragment::boolean(self.has_filter),
            Fragment::boolean(self.is_needle),
            Fragment::boolean(self.is_tool),
        ]
    }
}

/// Initialization: where channels drop any tips they wake up with.
#[derive(Debug, Clone)]
pub struct InitTipDropParameters {
    pub default_values: bool,
    pub x_position: f32,
    pub rolloff_distance: f32,
    pub channel_parameters: Vec<TipDropParameters>,
}

impl InitTipDropParameters {
    pub fn fragments(&self) -> Vec<Fragment> {
        vec![
            Fragment::boolean(self.default_values),
            Fragment::real32(self.x_position),
            Fragment::real32(self.rolloff_distance),
            Fragment::structure_array(
                self.channel_parameters.iter().map(|p| p.fragments()).collect(),
            ),
        ]
    }

    /// The values the instrument initializes with.
    pub fn default() -> Self {
        Self {
            default_values: true,
            x_position: 287.0,
            rolloff_distance: 3.0,
            channel_parameters: Vec::new(),
        }
    }
}

// ── Liquid handling ───────────────────────────────────────────────────────────

/// Aspiration-specific position and volumes.
#[derive(Debug, Clone, Copy)]
pub struct AspirateParameters {
    pub default_values: bool,
    pub x_position: f32,
    pub y_position: f32,
    pub prewet_volume: f32,
    pub blowout_volume: f32,
}

impl AspirateParameters {
    pub fn fragments(&self) -> Vec<Fragment> {
        vec![
            Fragment::boolean(self.default_values),
            Fragment::real32(self.x_position),
            Fragment::real32(self.y_position),
            Fragment::real32(self.prewet_volume),
            Fragment::real32(self.blowout_volume),
        ]
    }
}

/// Dispense-specific position, stop-back and cutoff.
#[derive(Debug, Clone, Copy)]
pub struct DispenseParameters {
    pub default_values: bool,
    pub x_position: f32,
    pub y_position: f32,
    pub stop_back_volume: f32,
    pub cutoff_speed: f32,
}

impl DispenseParameters {
    pub fn fragments(&self) -> Vec<Fragment> {
        vec![
            Fragment::boolean(self.default_values),
            Fragment::real32(self.x_position),
            Fragment::real32(self.y_position),
            Fragment::real32(self.stop_back_volume),
            Fragment::real32(self.cutoff_speed),
        ]
    }
}

/// Parameters shared by aspirate and dispense.
#[derive(Debug, Clone, Copy)]
pub struct CommonParameters {
    pub default_values: bool,
    pub empty: bool,
    pub z_minimum: f32,
    pub z_final: f32,
    pub z_liquid_exit_speed: f32,
    pub liquid_volume: f32,
    pub liquid_speed: f32,
    pub transport_air_volume: f32,
    pub tube_radius: f32,
    pub cone_height: f32,
    pub cone_bottom_radius: f32,
    pub settling_time: f32,
    pub additional_probes: u32,
}

impl CommonParameters {
    pub fn fragments(&self) -> Vec<Fragment> {
        vec![
            Fragment::boolean(self.default_values),
            Fragment::boolean(self.empty),
            Fragment::real32(self.z_minimum),
            Fragment::real32(self.z_final),
            Fragment::real32(self.z_liquid_exit_speed),
            Fragment::real32(self.liquid_volume),
            Fragment::real32(self.liquid_speed),
            Fragment::real32(self.transport_air_volume),
            Fragment::real32(self.tube_radius),
            Fragment::real32(self.cone_height),
            Fragment::real32(self.cone_bottom_radius),
            Fragment::real32(self.settling_time),
            Fragment::u32(self.additional_probes),
        ]
    }
}

/// Fixed-height (no LLD) liquid access.
#[derive(Debug, Clone, Copy)]
pub struct NoLldParameters {
    pub default_values: bool,
    pub z_fluid: f32,
    pub z_air: f32,
    pub bottom_search: bool,
    pub z_bottom_search_offset: f32,
    pub z_bottom_offset: f32,
}

impl NoLldParameters {
    pub fn fragments(&self) -> Vec<Fragment> {
        vec![
            Fragment::boolean(self.default_values),
            Fragment::real32(self.z_fluid),
            Fragment::real32(self.z_air),
            Fragment::boolean(self.bottom_search),
            Fragment::real32(self.z_bottom_search_offset),
            Fragment::real32(self.z_bottom_offset),
        ]
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MixParameters {
    pub default_values: bool,
    pub z_offset: f32,
    pub volume: f32,
    pub cycles: u8,
    pub speed: f32,
}

impl MixParameters {
    pub fn fragments(&self) -> Vec<Fragment> {
        vec![
            Fragment::boolean(self.default_values),
            Fragment::real32(self.z_offset),
            Fragment::real32(self.volume),
            Fragment::u8(self.cycles),
            Fragment::real32(self.speed),
        ]
    }

    pub fn default() -> Self {
        Self {
            default_values: true,
            z_offset: 0.0,
            volume: 0.0,
            cycles: 0,
            speed: 250.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AdcParameters {
    pub default_values: bool,
    pub errors: bool,
    pub maximum_volume: f32,
}

impl AdcParameters {
    pub fn fragments(&self) -> Vec<Fragment> {
        vec![
            Fragment::boolean(self.default_values),
            Fragment::boolean(self.errors),
            Fragment::real32(self.maximum_volume),
        ]
    }

    pub fn default() -> Self {
        Self {
            default_values: true,
            errors: true,
            maximum_volume: 4.5,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AspirateMonitoringParameters {
    pub default_values: bool,
    pub c_lld_enable: bool,
    pub p_lld_enable: bool,
    pub minimum_differential: u16,
    pub maximum_differential: u16,
    pub clot_threshold: u16,
}

impl AspirateMonitoringParameters {
    pub fn fragments(&self) -> Vec<Fragment> {
        vec![
            Fragment::boolean(self.default_values),
            Fragment::boolean(self.c_lld_enable),
            Fragment::boolean(self.p_lld_enable),
            Fragment::u16(self.minimum_differential),
            Fragment::u16(self.maximum_differential),
            Fragment::u16(self.clot_threshold),
        ]
    }

    pub fn default() -> Self {
        Self {
            default_values: true,
            c_lld_enable: false,
            p_lld_enable: false,
            minimum_differential: 30,
            maximum_differential: 30,
            clot_threshold: 20,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TadmParameters {
    pub default_values: bool,
    pub limit_curve_index: u16,
    pub recording_mode: TadmRecordingMode,
}

impl TadmParameters {
    pub fn fragments(&self) -> Vec<Fragment> {
        vec![
            Fragment::boolean(self.default_values),
            Fragment::u16(self.limit_curve_index),
            Fragment::enumeration(self.recording_mode as u32),
        ]
    }

    pub fn default() -> Self {
        Self {
            default_values: true,
            limit_curve_index: 0,
            recording_mode: TadmRecordingMode::Errors,
        }
    }
}

/// Full per-channel aspirate: fixed height with pressure monitoring.
#[derive(Debug, Clone)]
pub struct AspirateParametersNoLldAndMonitoring {
    pub default_values: bool,
    pub channel: ChannelIndex,
    pub aspirate: AspirateParameters,
    pub common: CommonParameters,
    pub no_lld: NoLldParameters,
    pub mix: MixParameters,
    pub adc: AdcParameters,
    pub aspirate_monitoring: AspirateMonitoringParameters,
}

impl AspirateParametersNoLldAndMonitoring {
    pub fn fragments(&self) -> Vec<Fragment> {
        vec![
            Fragment::boolean(self.default_values),
            Fragment::enumeration(self.channel as u32),
            Fragment::structure(self.aspirate.fragments()),
            Fragment::structure(self.common.fragments()),
            Fragment::structure(self.no_lld.fragments()),
            Fragment::structure(self.mix.fragments()),
            Fragment::structure(self.adc.fragments()),
            Fragment::structure(self.aspirate_monitoring.fragments()),
        ]
    }
}

/// Full per-channel dispense at fixed height.
#[derive(Debug, Clone)]
pub struct DispenseParametersNoLld {
    pub default_values: bool,
    pub channel: ChannelIndex,
    pub dispense: DispenseParameters,
    pub common: CommonParameters,
    pub no_lld: NoLldParameters,
    pub mix: MixParameters,
    pub adc: AdcParameters,
    pub tadm: TadmParameters,
}

impl DispenseParametersNoLld {
    pub fn fragments(&self) -> Vec<Fragment> {
        vec![
            Fragment::boolean(self.default_values),
            Fragment::enumeration(self.channel as u32),
            Fragment::structure(self.dispense.fragments()),
            Fragment::structure(self.common.fragments()),
            Fragment::structure(self.no_lld.fragments()),
            Fragment::structure(self.mix.fragments()),
            Fragment::structure(self.adc.fragments()),
            Fragment::structure(self.tadm.fragments()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prep_wire::FragmentValue;

    #[test]
    fn init_tip_drop_default_matches_instrument_values() {
        let params = InitTipDropParameters::default();
        let encoded = Fragment::structure(params.fragments()).to_bytes();
        // bool(6) + two real32(8+8) + empty structure array(4) = 26 inner
        // bytes behind the 4 byte header.
        assert_eq!(encoded.len(), 4 + 26);
        let (decoded, _) = Fragment::decode(&encoded).unwrap();
        match decoded.value {
            FragmentValue::Structure(fields) => {
                assert_eq!(fields[0].value, FragmentValue::Bool(true));
                assert_eq!(fields[1].value, FragmentValue::F32(287.0));
                assert_eq!(fields[2].value, FragmentValue::F32(3.0));
                assert_eq!(fields[3].value, FragmentValue::StructureArray(vec![]));
            }
            _ => panic!("expected structure"),
        }
    }

    #[test]
    fn tip_position_structure_size_matches_recorded_frames() {
        let params = TipPositionParameters {
            default_values: false,
            channel: ChannelIndex::RearChannel,
            x_position: 152.6,
            y_position: 153.33,
            z_position: 58.97,
            z_seek: 70.97,
        };
        let encoded = Fragment::structure(params.fragments()).to_bytes();
        // Recorded frames carry these structures as 0x2e inner bytes.
        assert_eq!(encoded.len(), 4 + 0x2e);
    }

    #[test]
    fn aspirate_bundle_encodes_nested_structures() {
        let bundle = AspirateParametersNoLldAndMonitoring {
            default_values: false,
            channel: ChannelIndex::RearChannel,
            aspirate: AspirateParameters {
                default_values: false,
                x_position: 15.775,
                y_position: 150.435,
                prewet_volume: 0.0,
                blowout_volume: 0.0,
            },
            common: CommonParameters {
                default_values: false,
                empty: true,
                z_minimum: -5.03,
                z_final: 96.97,
                z_liquid_exit_speed: 2.0,
                liquid_volume: 100.0,
                liquid_speed: 100.0,
                transport_air_volume: 0.0,
                tube_radius: 3.175,
                cone_height: 0.0,
                cone_bottom_radius: 0.0,
                settling_time: 1.0,
                additional_probes: 0,
            },
            no_lld: NoLldParameters {
                default_values: false,
                z_fluid: 94.97,
                z_air: 96.97,
                bottom_search: false,
                z_bottom_search_offset: 2.0,
                z_bottom_offset: 0.0,
            },
            mix: MixParameters::default(),
            adc: AdcParameters::default(),
            aspirate_monitoring: AspirateMonitoringParameters::default(),
        };
        let encoded = Fragment::structure_array(vec![bundle.fragments()]).to_bytes();
        let (decoded, _) = Fragment::decode(&encoded).unwrap();
        match decoded.value {
            FragmentValue::StructureArray(structures) => {
                assert_eq!(structures.len(), 1);
                // default flag, channel, six nested structures.
                assert_eq!(structures[0].len(), 8);
                assert_eq!(structures[0][1].value, FragmentValue::Enum(2));
            }
            _ => panic!("expected structure array"),
        }
    }
}
