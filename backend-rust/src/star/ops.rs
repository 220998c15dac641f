//! High-level STAR operations: tips, liquid, the 96 head, and plate
//! transport with the iSWAP or the CoRe gripper.
//!
//! Every operation resolves its targets through the resource tree,
//! works in mm and uL internally, and converts to firmware units exactly
//! once when the parameter vectors are built.

use std::collections::BTreeMap;

use labware::tree::ResourceTree;
use labware::{
    Coordinate, Liquid, NodeId, ResourceData, Tip, TipDropMethod, TipSize, XAnchor, YAnchor,
    ZAnchor,
};
use star_wire::{mm_to_tenths, ul_to_tenths, CommandBuilder};

use crate::error::{BackendError, Result};
use crate::star::backend::StarBackend;
use crate::star::liquid_classes::{liquid_class, HamiltonLiquidClass};
use crate::star::y_spacing::space_channel_ys;
use crate::transport::Transport;

// ── Empirical constants ───────────────────────────────────────────────────────

/// Tip length corrections by tip size, from recorded runs. Unexplained
/// but required for clean pickups.
const LOW_VOLUME_TIP_LENGTH_CORRECTION: f64 = 2.0;
const NON_STANDARD_TIP_LENGTH_CORRECTION: f64 = -2.0;

/// PLACE_SHIFT drop heights above the target's top, mm.
const PLACE_SHIFT_BEGIN_ABOVE_TOP: f64 = 59.9;
const PLACE_SHIFT_END_ABOVE_TOP: f64 = 49.9;

/// The iSWAP grip-width parameter is sent 3.3 mm narrower than the
/// plate; origin unknown, kept from recorded traffic. In 0.1 mm.
const ISWAP_GRIP_WIDTH_CORRECTION_TENTHS: i64 = 33;

/// Gripper opening beyond the plate width, mm. Hotel mode in its unsafe
/// variant opens wider.
const GRIP_OPEN_MARGIN: f64 = 3.0;
const GRIP_OPEN_MARGIN_UNSAFE_HOTEL: f64 = 5.0;

/// Default liquid height above the cavity bottom when the caller gives
/// none, mm.
const DEFAULT_LIQUID_HEIGHT: f64 = 1.0;

/// LLD seek starts this far above the container top, mm.
const LLD_SEARCH_OFFSET: f64 = 5.0;

/// CoRe 96 head geometry: 9 mm channel pitch, 12 columns by 8 rows.
const HEAD_SPAN_X: f64 = 9.0 * 11.0;
const HEAD_SPAN_Y: f64 = 9.0 * 7.0;

/// Factory wasteblock x of the CoRe gripper tool, by deck width.
const CORE_MOUNT_X_STARLET: f64 = 797.5;
const CORE_MOUNT_X_STAR: f64 = 1318.5;
/// Y positions of the two mounting channels at the wasteblock.
const CORE_MOUNT_Y_BACK: f64 = 124.0;
const CORE_MOUNT_Y_FRONT: f64 = 106.5;

// ── Operation descriptions ────────────────────────────────────────────────────

/// One channel's tip pickup or drop.
#[derive(Debug, Clone)]
pub struct TipOp {
    pub spot: NodeId,
    pub offset: Coordinate,
    pub tip: Tip,
}

/// Mixing after aspiration / before dispense.
#[derive(Debug, Clone, Copy)]
pub struct MixSpec {
    pub volume: f64,
    pub cycles: u8,
    pub flow_rate: f64,
    /// Mix position below the liquid surface, mm.
    pub position: f64,
}

/// Liquid level detection mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LldMode {
    #[default]
    Off,
    Gamma,
    Pressure,
    Dual,
    ZTouch,
}

/// One channel's aspiration or dispense.
#[derive(Debug, Clone)]
pub struct LiquidOp {
    pub container: NodeId,
    pub offset: Coordinate,
    /// Target volume in uL.
    pub volume: f64,
    pub flow_rate: Option<f64>,
    /// Height of the liquid surface above the cavity bottom, mm.
    pub liquid_height: Option<f64>,
    pub blow_out_air_volume: Option<f64>,
    pub transport_air_volume: Option<f64>,
    pub liquid: Option<Liquid>,
    pub lld_mode: LldMode,
    pub mix: Option<MixSpec>,
    /// Liquid class selector bits.
    pub jet: bool,
    pub blow_out: bool,
    /// Dispense only: force the empty-tip mode.
    pub empty: bool,
}

impl LiquidOp {
    pub fn new(container: NodeId, volume: f64) -> Self {
        Self {
            container,
            offset: Coordinate::zero(),
            volume,
            flow_rate: None,
            liquid_height: None,
            blow_out_air_volume: None,
            transport_air_volume: None,
            liquid: None,
            lld_mode: LldMode::Off,
            mix: None,
            jet: false,
            blow_out: false,
            empty: false,
        }
    }
}

/// Which side the gripper approaches a plate from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GripDirection {
    Front = 1,
    Right = 2,
    Back = 3,
    Left = 4,
}

/// Off-deck hotel access: descend to a clearance above the slot, drive
/// forward by the hotel depth, then down by the clearance height.
#[derive(Debug, Clone, Copy)]
pub struct HotelSpec {
    pub depth: f64,
    pub clearance_height: f64,
    /// Unsafe hotels need the gripper opened wider.
    pub unsafe_mode: bool,
}

/// Plate transport parameters shared by pickup and drop.
#[derive(Debug, Clone)]
pub struct ResourceMoveSpec {
    pub offset: Coordinate,
    /// Where below the plate's top the jaws grip, mm.
    pub pickup_distance_from_top: f64,
    pub grip_direction: GripDirection,
    pub hotel: Option<HotelSpec>,
    /// Firmware collision control level.
    pub collision_control: u8,
}

impl Default for ResourceMoveSpec {
    fn default() -> Self {
        Self {
            offset: Coordinate::zero(),
            pickup_distance_from_top: 13.2,
            grip_direction: GripDirection::Front,
            hotel: None,
            collision_control: 1,
        }
    }
}

fn dispense_mode(jet: bool, blow_out: bool, empty: bool) -> i64 {
    if empty {
        return 4;
    }
    match (jet, blow_out) {
        (true, true) => 1,
        (true, false) => 0,
        (false, true) => 3,
        (false, false) => 2,
    }
}

fn lld_mode_code(mode: LldMode) -> i64 {
    match mode {
        LldMode::Off => 0,
        LldMode::Gamma => 1,
        LldMode::Pressure => 2,
        LldMode::Dual => 3,
        LldMode::ZTouch => 4,
    }
}

fn tip_volume_class(tip: &Tip) -> u32 {
    match tip.size {
        TipSize::LowVolume => 10,
        TipSize::HighVolume | TipSize::XlChannel => 1000,
        TipSize::StandardVolume | TipSize::Core384 => 300,
    }
}

impl<T: Transport> StarBackend<T> {
    /// Per-channel x/y firmware vectors: entries for every channel up to
    /// the last one used, zeros for unused channels, plus one trailing
    /// zero sentinel.
    fn ops_to_fw_positions(
        &self,
        centers: &[Coordinate],
        use_channels: &[usize],
    ) -> Result<(Vec<i64>, Vec<i64>, Vec<bool>)> {
        if centers.len() != use_channels.len() {
            return Err(BackendError::InvalidArgument(
                "ops and use_channels must have the same length".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for &channel in use_channels {
            if channel >= self.num_channels() {
                return Err(BackendError::InvalidArgument(format!(
                    "channel {channel} out of range, machine has {} channels",
                    self.num_channels()
                )));
            }
            if !seen.insert(channel) {
                return Err(BackendError::InvalidArgument(format!(
                    "channel {channel} used twice"
                )));
            }
        }

        let last = *use_channels.iter().max().unwrap_or(&0);
        let mut xs = vec![0i64; last + 1];
        let mut ys = vec![0i64; last + 1];
        let mut pattern = vec![false; last + 1];
        for (center, &channel) in centers.iter().zip(use_channels) {
            xs[channel] = mm_to_tenths(center.x);
            ys[channel] = mm_to_tenths(center.y);
            pattern[channel] = true;
        }
        if pattern.len() < self.num_channels() {
            xs.push(0);
            ys.push(0);
            pattern.push(false);
        }
        Ok((xs, ys, pattern))
    }

    fn channel_centers(
        &self,
        tree: &ResourceTree,
        ops: impl Iterator<Item = (NodeId, Coordinate)>,
    ) -> Result<Vec<Coordinate>> {
        ops.map(|(node, offset)| {
            let center =
                tree.absolute_location(node, XAnchor::Center, YAnchor::Center, ZAnchor::Bottom)?;
            Ok(center + offset)
        })
        .collect()
    }

    // ── Tips ─────────────────────────────────────────────────────────────────

    /// Pick up tips with the given channels. All tips must be of one
    /// type; the type is registered with the firmware on first use.
    pub async fn pick_up_tips(
        &mut self,
        tree: &ResourceTree,
        ops: &[TipOp],
        use_channels: &[usize],
    ) -> Result<()> {
        self.ensure_setup()?;
        self.ensure_iswap_parked().await?;
        let first = ops.first().ok_or_else(|| {
            BackendError::InvalidArgument("pick_up_tips needs at least one op".into())
        })?;
        if ops.iter().any(|op| op.tip != first.tip) {
            return Err(BackendError::InvalidArgument(
                "all tips in one pickup must be of the same type".into(),
            ));
        }

        let centers =
            self.channel_centers(tree, ops.iter().map(|op| (op.spot, op.offset)))?;
        let (xs, ys, pattern) = self.ops_to_fw_positions(&centers, use_channels)?;
        let ttti = self.get_or_assign_tip_type_index(&first.tip).await?;

        let max_z = ops
            .iter()
            .map(|op| -> Result<f64> {
                Ok(tree.absolute_origin(op.spot)?.z + op.offset.z)
            })
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .fold(f64::NEG_INFINITY, f64::max);
        let total_tip_length = first.tip.total_tip_length;
        let mut tip_length = first.tip.total_tip_length - first.tip.fitting_depth;
        // Corrections observed in instrument logs; required, cause unknown.
        if first.tip.size == TipSize::LowVolume {
            tip_length += LOW_VOLUME_TIP_LENGTH_CORRECTION;
        } else if first.tip.size != TipSize::StandardVolume {
            tip_length += NON_STANDARD_TIP_LENGTH_CORRECTION;
        }

        let th = mm_to_tenths(self.channel_traversal_height());
        let builder = CommandBuilder::new("C0", "TP")
            .int_list("xp", &xs, 5)
            .int_list("yp", &ys, 4)
            .flag_pattern("tm", &pattern)
            .int_padded("tt", ttti as i64, 2)
            .int_padded("tp", mm_to_tenths(max_z + total_tip_length), 4)
            .int_padded("tz", mm_to_tenths(max_z + tip_length), 4)
            .int_padded("th", th, 4)
            .int("td", first.tip.pickup_method as i64);
        self.send_command_raw(&builder).await?;
        Ok(())
    }

    /// Drop tips. The default method is the fast `Drop` when every
    /// target is a tip spot, the gentle `PlaceShift` everywhere else.
    pub async fn drop_tips(
        &mut self,
        tree: &ResourceTree,
        ops: &[TipOp],
        use_channels: &[usize],
        method: Option<TipDropMethod>,
    ) -> Result<()> {
        self.ensure_setup()?;
        self.ensure_iswap_parked().await?;
        let first = ops.first().ok_or_else(|| {
            BackendError::InvalidArgument("drop_tips needs at least one op".into())
        })?;

        let all_tip_spots = ops.iter().try_fold(true, |acc, op| -> Result<bool> {
            Ok(acc && matches!(tree.data(op.spot)?, ResourceData::TipSpot(_)))
        })?;
        let method = method.unwrap_or(if all_tip_spots {
            TipDropMethod::Drop
        } else {
            TipDropMethod::PlaceShift
        });

        let centers =
            self.channel_centers(tree, ops.iter().map(|op| (op.spot, op.offset)))?;
        let (xs, ys, pattern) = self.ops_to_fw_positions(&centers, use_channels)?;

        let (begin, end) = match method {
            TipDropMethod::Drop | TipDropMethod::Place => {
                let max_z = ops
                    .iter()
                    .map(|op| -> Result<f64> {
                        Ok(tree.absolute_origin(op.spot)?.z + op.offset.z)
                    })
                    .collect::<Result<Vec<_>>>()?
                    .into_iter()
                    .fold(f64::NEG_INFINITY, f64::max);
                let total = first.tip.total_tip_length;
                let length = first.tip.total_tip_length - first.tip.fitting_depth;
                (max_z + total, max_z + length)
            }
            TipDropMethod::PlaceShift => {
                let max_top = ops
                    .iter()
                    .map(|op| -> Result<f64> {
                        Ok(tree
                            .absolute_location(op.spot, XAnchor::Left, YAnchor::Front, ZAnchor::Top)?
                            .z
                            + op.offset.z)
                    })
                    .collect::<Result<Vec<_>>>()?
                    .into_iter()
                    .fold(f64::NEG_INFINITY, f64::max);
                // Empirical offsets; keep verbatim.
                (
                    max_top + PLACE_SHIFT_BEGIN_ABOVE_TOP,
                    max_top + PLACE_SHIFT_END_ABOVE_TOP,
                )
            }
        };

        let th = mm_to_tenths(self.channel_traversal_height());
        let builder = CommandBuilder::new("C0", "TR")
            .int_list("xp", &xs, 5)
            .int_list("yp", &ys, 4)
            .flag_pattern("tm", &pattern)
            .int_padded("tp", mm_to_tenths(begin), 4)
            .int_padded("tz", mm_to_tenths(end), 4)
            .int_padded("th", th, 4)
            .int("ti", method as i64);
        self.send_command_raw(&builder).await?;
        Ok(())
    }

    // ── Liquid ───────────────────────────────────────────────────────────────

    fn class_for(&self, op: &LiquidOp, tip: &Tip, core: bool) -> Option<&'static HamiltonLiquidClass> {
        let key = (
            tip_volume_class(tip),
            core,
            true,
            tip.has_filter,
            op.liquid.unwrap_or(Liquid::Water),
            op.jet,
            op.blow_out,
        );
        liquid_class(&key)
    }

    /// Aspirate with the given channels. `tips` are the tips currently
    /// on those channels, used for liquid class selection.
    pub async fn aspirate(
        &mut self,
        tree: &ResourceTree,
        ops: &[LiquidOp],
        use_channels: &[usize],
        tips: &[Tip],
    ) -> Result<()> {
        self.ensure_setup()?;
        self.ensure_iswap_parked().await?;
        if ops.is_empty() || ops.len() != tips.len() {
            return Err(BackendError::InvalidArgument(
                "aspirate needs matching ops and tips".into(),
            ));
        }

        let centers =
            self.channel_centers(tree, ops.iter().map(|op| (op.container, op.offset)))?;
        let (xs, ys, pattern) = self.ops_to_fw_positions(&centers, use_channels)?;

        let mut volumes = Vec::new();
        let mut speeds = Vec::new();
        let mut transport_air = Vec::new();
        let mut blow_out = Vec::new();
        let mut surfaces = Vec::new();
        let mut lld_heights = Vec::new();
        let mut minimums = Vec::new();
        let mut clot_heights = Vec::new();
        let mut swap_speeds = Vec::new();
        let mut settling = Vec::new();
        let mut over_aspirate = Vec::new();
        let mut lld_modes = Vec::new();
        let mut mix_volumes = Vec::new();
        let mut mix_cycles = Vec::new();
        let mut mix_positions = Vec::new();
        let mut mix_speeds = Vec::new();

        for (op, tip) in ops.iter().zip(tips) {
            let class = self.class_for(op, tip, false);
            let cavity_bottom = tree.absolute_location(
                op.container,
                XAnchor::Center,
                YAnchor::Center,
                ZAnchor::CavityBottom,
            )?;
            let top = tree.absolute_location(
                op.container,
                XAnchor::Left,
                YAnchor::Front,
                ZAnchor::Top,
            )?;
            let liquid_height = op.liquid_height.unwrap_or(DEFAULT_LIQUID_HEIGHT);
            let surface = cavity_bottom.z + op.offset.z + liquid_height;

            let volume = class
                .map(|c| c.compute_corrected_volume(op.volume))
                .unwrap_or(op.volume);
            volumes.push(ul_to_tenths(volume));
            speeds.push(ul_to_tenths(op.flow_rate.unwrap_or_else(|| {
                class.map(|c| c.aspiration_flow_rate).unwrap_or(100.0)
            })));
            transport_air.push(ul_to_tenths(op.transport_air_volume.unwrap_or_else(
                || {
                    class
                        .map(|c| c.aspiration_air_transport_volume)
                        .unwrap_or(0.0)
                },
            )));
            blow_out.push(ul_to_tenths(op.blow_out_air_volume.unwrap_or_else(|| {
                class.map(|c| c.aspiration_blow_out_volume).unwrap_or(0.0)
            })));
            surfaces.push(mm_to_tenths(surface));
            lld_heights.push(mm_to_tenths(top.z + LLD_SEARCH_OFFSET));
            minimums.push(mm_to_tenths(cavity_bottom.z + op.offset.z));
            clot_heights.push(mm_to_tenths(
                class.map(|c| c.aspiration_clot_retract_height).unwrap_or(0.0),
            ));
            swap_speeds.push(mm_to_tenths(
                class.map(|c| c.aspiration_swap_speed).unwrap_or(2.0),
            ));
            settling.push(
                (class.map(|c| c.aspiration_settling_time).unwrap_or(0.5) * 10.0).round() as i64,
            );
            over_aspirate.push(ul_to_tenths(
                class.map(|c| c.aspiration_over_aspirate_volume).unwrap_or(0.0),
            ));
            lld_modes.push(lld_mode_code(op.lld_mode));
            let mix = op.mix;
            mix_volumes.push(ul_to_tenths(mix.map(|m| m.volume).unwrap_or(0.0)));
            mix_cycles.push(mix.map(|m| m.cycles as i64).unwrap_or(0));
            mix_positions.push(mm_to_tenths(mix.map(|m| m.position).unwrap_or(0.0)));
            mix_speeds.push(ul_to_tenths(mix.map(|m| m.flow_rate).unwrap_or(100.0)));
        }

        let th = mm_to_tenths(self.channel_traversal_height());
        let builder = CommandBuilder::new("C0", "AS")
            .int("at", 0)
            .flag_pattern("tm", &pattern)
            .int_list("xp", &xs, 5)
            .int_list("yp", &ys, 4)
            .int_padded("th", th, 4)
            .int_padded("te", th, 4)
            .int_list("lp", &lld_heights, 4)
            .int_list("ch", &clot_heights, 3)
            .int_list("zl", &surfaces, 4)
            .int_list("zx", &minimums, 4)
            .int_list("av", &volumes, 5)
            .int_list("as", &speeds, 4)
            .int_list("ta", &transport_air, 3)
            .int_list("ba", &blow_out, 5)
            .int_list("oa", &over_aspirate, 3)
            .int_list("lm", &lld_modes, 1)
            .int_list("de", &swap_speeds, 4)
            .int_list("wt", &settling, 2)
            .int_list("mv", &mix_volumes, 5)
            .int_list("mc", &mix_cycles, 2)
            .int_list("mp", &mix_positions, 3)
            .int_list("ms", &mix_speeds, 4);
        self.send_command_raw(&builder).await?;
        Ok(())
    }

    /// Dispense with the given channels. The firmware dispense mode is
    /// derived from each op's jet/blow-out/empty flags.
    pub async fn dispense(
        &mut self,
        tree: &ResourceTree,
        ops: &[LiquidOp],
        use_channels: &[usize],
        tips: &[Tip],
    ) -> Result<()> {
        self.ensure_setup()?;
        self.ensure_iswap_parked().await?;
        if ops.is_empty() || ops.len() != tips.len() {
            return Err(BackendError::InvalidArgument(
                "dispense needs matching ops and tips".into(),
            ));
        }

        let centers =
            self.channel_centers(tree, ops.iter().map(|op| (op.container, op.offset)))?;
        let (xs, ys, pattern) = self.ops_to_fw_positions(&centers, use_channels)?;

        let mut modes = Vec::new();
        let mut volumes = Vec::new();
        let mut speeds = Vec::new();
        let mut cutoff_speeds = Vec::new();
        let mut stop_back = Vec::new();
        let mut transport_air = Vec::new();
        let mut blow_out = Vec::new();
        let mut surfaces = Vec::new();
        let mut lld_heights = Vec::new();
        let mut minimums = Vec::new();
        let mut swap_speeds = Vec::new();
        let mut settling = Vec::new();
        let mut lld_modes = Vec::new();
        let mut mix_volumes = Vec::new();
        let mut mix_cycles = Vec::new();
        let mut mix_speeds = Vec::new();

        for (op, tip) in ops.iter().zip(tips) {
            let class = self.class_for(op, tip, false);
            let cavity_bottom = tree.absolute_location(
                op.container,
                XAnchor::Center,
                YAnchor::Center,
                ZAnchor::CavityBottom,
            )?;
            let top = tree.absolute_location(
                op.container,
                XAnchor::Left,
                YAnchor::Front,
                ZAnchor::Top,
            )?;
            let liquid_height = op.liquid_height.unwrap_or(DEFAULT_LIQUID_HEIGHT);

            modes.push(dispense_mode(op.jet, op.blow_out, op.empty));
            let volume = class
                .map(|c| c.compute_corrected_volume(op.volume))
                .unwrap_or(op.volume);
            volumes.push(ul_to_tenths(volume));
            speeds.push(ul_to_tenths(op.flow_rate.unwrap_or_else(|| {
                class.map(|c| c.dispense_flow_rate).unwrap_or(120.0)
            })));
            cutoff_speeds.push(ul_to_tenths(
                class.map(|c| c.dispense_stop_flow_rate).unwrap_or(5.0),
            ));
            stop_back.push(ul_to_tenths(
                class.map(|c| c.dispense_stop_back_volume).unwrap_or(0.0),
            ));
            transport_air.push(ul_to_tenths(op.transport_air_volume.unwrap_or_else(
                || class.map(|c| c.dispense_air_transport_volume).unwrap_or(0.0),
            )));
            blow_out.push(ul_to_tenths(op.blow_out_air_volume.unwrap_or_else(|| {
                class.map(|c| c.dispense_blow_out_volume).unwrap_or(0.0)
            })));
            surfaces.push(mm_to_tenths(
                cavity_bottom.z + op.offset.z + liquid_height,
            ));
            lld_heights.push(mm_to_tenths(top.z + LLD_SEARCH_OFFSET));
            minimums.push(mm_to_tenths(cavity_bottom.z + op.offset.z));
            swap_speeds.push(mm_to_tenths(
                class.map(|c| c.dispense_swap_speed).unwrap_or(2.0),
            ));
            settling.push(
                (class.map(|c| c.dispense_settling_time).unwrap_or(0.0) * 10.0).round() as i64,
            );
            lld_modes.push(lld_mode_code(op.lld_mode));
            let mix = op.mix;
            mix_volumes.push(ul_to_tenths(mix.map(|m| m.volume).unwrap_or(0.0)));
            mix_cycles.push(mix.map(|m| m.cycles as i64).unwrap_or(0));
            mix_speeds.push(ul_to_tenths(mix.map(|m| m.flow_rate).unwrap_or(100.0)));
        }

        let th = mm_to_tenths(self.channel_traversal_height());
        let builder = CommandBuilder::new("C0", "DS")
            .int_list("dm", &modes, 1)
            .flag_pattern("tm", &pattern)
            .int_list("xp", &xs, 5)
            .int_list("yp", &ys, 4)
            .int_padded("th", th, 4)
            .int_padded("te", th, 4)
            .int_list("lp", &lld_heights, 4)
            .int_list("zl", &surfaces, 4)
            .int_list("zx", &minimums, 4)
            .int_list("dv", &volumes, 5)
            .int_list("ds", &speeds, 4)
            .int_list("ss", &cutoff_speeds, 4)
            .int_list("rv", &stop_back, 3)
            .int_list("ta", &transport_air, 3)
            .int_list("ba", &blow_out, 5)
            .int_list("lm", &lld_modes, 1)
            .int_list("de", &swap_speeds, 4)
            .int_list("wt", &settling, 2)
            .int_list("mv", &mix_volumes, 5)
            .int_list("mc", &mix_cycles, 2)
            .int_list("ms", &mix_speeds, 4);
        self.send_command_raw(&builder).await?;
        Ok(())
    }

    // ── Channel positioning ──────────────────────────────────────────────────

    /// Move channels to requested y positions. With `make_space`, other
    /// channels are pushed outward to keep the mechanical pitch; without
    /// it, any conflict is an error. No command is sent when the plan
    /// violates the y limits.
    pub async fn position_channels_in_y_direction(
        &mut self,
        requested: &BTreeMap<usize, f64>,
        make_space: bool,
    ) -> Result<()> {
        self.ensure_setup()?;
        self.ensure_iswap_parked().await?;
        let current = self.request_y_positions().await?;
        let ys = space_channel_ys(&current, requested, make_space)?;
        self.position_channels_y(&ys).await
    }

    // ── CoRe 96 head ─────────────────────────────────────────────────────────

    fn head_position(
        &self,
        tree: &ResourceTree,
        resource: NodeId,
        offset: Coordinate,
    ) -> Result<(i64, i64)> {
        let center = tree.absolute_location(
            resource,
            XAnchor::Center,
            YAnchor::Center,
            ZAnchor::Bottom,
        )? + offset;
        // The firmware takes the A1 channel position; the head is
        // centered on the resource.
        let xs = mm_to_tenths(center.x - HEAD_SPAN_X / 2.0);
        let yh = mm_to_tenths(center.y - HEAD_SPAN_Y / 2.0);
        Ok((xs, yh))
    }

    /// Pick up a full rack of 96 tips with the head (C0 EP).
    pub async fn pick_up_tips96(
        &mut self,
        tree: &ResourceTree,
        rack: NodeId,
        tip: &Tip,
        offset: Coordinate,
    ) -> Result<()> {
        self.ensure_setup()?;
        if !self.core96_installed {
            return Err(BackendError::Unsupported("no CoRe 96 head installed"));
        }
        self.ensure_iswap_parked().await?;
        let (xs, yh) = self.head_position(tree, rack, offset)?;
        let ttti = self.get_or_assign_tip_type_index(tip).await?;
        let z = tree.absolute_origin(rack)?.z + offset.z;
        let th = mm_to_tenths(self.channel_traversal_height());
        let builder = CommandBuilder::new("C0", "EP")
            .int_padded("xs", xs, 5)
            .int_padded("yh", yh, 4)
            .int_padded("tt", ttti as i64, 2)
            .int_padded("za", mm_to_tenths(z + tip.total_tip_length), 4)
            .int_padded("zh", mm_to_tenths(z + tip.total_tip_length - tip.fitting_depth), 4)
            .int_padded("th", th, 4)
            .int_padded("te", th, 4);
        self.send_command_raw(&builder).await?;
        Ok(())
    }

    /// Drop the head's tips onto a rack or into the 96 trash (C0 ER).
    pub async fn drop_tips96(
        &mut self,
        tree: &ResourceTree,
        target: NodeId,
        tip: &Tip,
        offset: Coordinate,
    ) -> Result<()> {
        self.ensure_setup()?;
        if !self.core96_installed {
            return Err(BackendError::Unsupported("no CoRe 96 head installed"));
        }
        self.ensure_iswap_parked().await?;
        let (xs, yh) = self.head_position(tree, target, offset)?;
        let z = tree.absolute_origin(target)?.z + offset.z;
        let th = mm_to_tenths(self.channel_traversal_height());
        let builder = CommandBuilder::new("C0", "ER")
            .int_padded("xs", xs, 5)
            .int_padded("yh", yh, 4)
            .int_padded("za", mm_to_tenths(z + tip.total_tip_length), 4)
            .int_padded("zh", mm_to_tenths(z + tip.total_tip_length - tip.fitting_depth), 4)
            .int_padded("th", th, 4)
            .int_padded("te", th, 4);
        self.send_command_raw(&builder).await?;
        Ok(())
    }

    /// Aspirate one volume with all 96 channels, centered on the
    /// resource (C0 EA).
    pub async fn aspirate96(
        &mut self,
        tree: &ResourceTree,
        plate: NodeId,
        op: &LiquidOp,
        tip: &Tip,
    ) -> Result<()> {
        self.ensure_setup()?;
        if !self.core96_installed {
            return Err(BackendError::Unsupported("no CoRe 96 head installed"));
        }
        self.ensure_iswap_parked().await?;
        let (xs, yh) = self.head_position(tree, plate, op.offset)?;

        let key = (
            tip_volume_class(tip),
            true,
            true,
            tip.has_filter,
            op.liquid.unwrap_or(Liquid::Water),
            op.jet,
            op.blow_out,
        );
        let class = liquid_class(&key);
        let first_well = tree.children(plate)?.first().copied().ok_or_else(|| {
            BackendError::InvalidArgument("96-head aspirate target has no wells".into())
        })?;
        let cavity_bottom = tree.absolute_location(
            first_well,
            XAnchor::Center,
            YAnchor::Center,
            ZAnchor::CavityBottom,
        )?;
        let surface =
            cavity_bottom.z + op.offset.z + op.liquid_height.unwrap_or(DEFAULT_LIQUID_HEIGHT);
        let volume = class
            .map(|c| c.compute_corrected_volume(op.volume))
            .unwrap_or(op.volume);

        let th = mm_to_tenths(self.channel_traversal_height());
        let builder = CommandBuilder::new("C0", "EA")
            .int_padded("xs", xs, 5)
            .int_padded("yh", yh, 4)
            .int_padded("zl", mm_to_tenths(surface), 4)
            .int_padded("zx", mm_to_tenths(cavity_bottom.z + op.offset.z), 4)
            .int_padded("av", ul_to_tenths(volume), 5)
            .int_padded(
                "as",
                ul_to_tenths(op.flow_rate.unwrap_or_else(|| {
                    class.map(|c| c.aspiration_flow_rate).unwrap_or(150.0)
                })),
                4,
            )
            .int_padded(
                "ta",
                ul_to_tenths(op.transport_air_volume.unwrap_or_else(|| {
                    class
                        .map(|c| c.aspiration_air_transport_volume)
                        .unwrap_or(0.0)
                })),
                3,
            )
            .int_padded(
                "ba",
                ul_to_tenths(op.blow_out_air_volume.unwrap_or_else(|| {
                    class.map(|c| c.aspiration_blow_out_volume).unwrap_or(0.0)
                })),
                5,
            )
            .int("lm", lld_mode_code(op.lld_mode))
            .int_padded("th", th, 4)
            .int_padded("te", th, 4);
        self.send_command_raw(&builder).await?;
        Ok(())
    }

    /// Dispense one volume with all 96 channels (C0 ED).
    pub async fn dispense96(
        &mut self,
        tree: &ResourceTree,
        plate: NodeId,
        op: &LiquidOp,
        tip: &Tip,
    ) -> Result<()> {
        self.ensure_setup()?;
        if !self.core96_installed {
            return Err(BackendError::Unsupported("no CoRe 96 head installed"));
        }
        self.ensure_iswap_parked().await?;
        let (xs, yh) = self.head_position(tree, plate, op.offset)?;

        let key = (
            tip_volume_class(tip),
            true,
            true,
            tip.has_filter,
            op.liquid.unwrap_or(Liquid::Water),
            op.jet,
            op.blow_out,
        );
        let class = liquid_class(&key);
        let first_well = tree.children(plate)?.first().copied().ok_or_else(|| {
            BackendError::InvalidArgument("96-head dispense target has no wells".into())
        })?;
        let cavity_bottom = tree.absolute_location(
            first_well,
            XAnchor::Center,
            YAnchor::Center,
            ZAnchor::CavityBottom,
        )?;
        let surface =
            cavity_bottom.z + op.offset.z + op.liquid_height.unwrap_or(DEFAULT_LIQUID_HEIGHT);
        let volume = class
            .map(|c| c.compute_corrected_volume(op.volume))
            .unwrap_or(op.volume);

        let th = mm_to_tenths(self.channel_traversal_height());
        let builder = CommandBuilder::new("C0", "ED")
            .int_padded("xs", xs, 5)
            .int_padded("yh", yh, 4)
            .int("dm", dispense_mode(op.jet, op.blow_out, op.empty))
            .int_padded("zl", mm_to_tenths(surface), 4)
            .int_padded("zx", mm_to_tenths(cavity_bottom.z + op.offset.z), 4)
            .int_padded("dv", ul_to_tenths(volume), 5)
            .int_padded(
                "ds",
                ul_to_tenths(op.flow_rate.unwrap_or_else(|| {
                    class.map(|c| c.dispense_flow_rate).unwrap_or(400.0)
                })),
                4,
            )
            .int_padded(
                "ta",
                ul_to_tenths(op.transport_air_volume.unwrap_or_else(|| {
                    class.map(|c| c.dispense_air_transport_volume).unwrap_or(0.0)
                })),
                3,
            )
            .int_padded(
                "ba",
                ul_to_tenths(op.blow_out_air_volume.unwrap_or_else(|| {
                    class.map(|c| c.dispense_blow_out_volume).unwrap_or(0.0)
                })),
                5,
            )
            .int_padded("th", th, 4)
            .int_padded("te", th, 4);
        self.send_command_raw(&builder).await?;
        Ok(())
    }

    // ── iSWAP transport ──────────────────────────────────────────────────────

    fn grip_geometry(
        &self,
        tree: &ResourceTree,
        resource: NodeId,
        spec: &ResourceMoveSpec,
    ) -> Result<(Coordinate, f64)> {
        if !tree.rotation(resource)?.is_axis_aligned() {
            return Err(BackendError::InvalidArgument(
                "transported resources must be axis aligned (z rotation a multiple of 90)".into(),
            ));
        }
        let center = tree.absolute_location(
            resource,
            XAnchor::Center,
            YAnchor::Center,
            ZAnchor::Bottom,
        )? + spec.offset;
        // The jaws close on the axis perpendicular to the approach.
        let grip_width = match spec.grip_direction {
            GripDirection::Front | GripDirection::Back => tree.absolute_size_x(resource)?,
            GripDirection::Left | GripDirection::Right => tree.absolute_size_y(resource)?,
        };
        Ok((center, grip_width))
    }

    fn iswap_builder(
        &self,
        command: &'static str,
        center: Coordinate,
        grip_z: f64,
        grip_width: f64,
        spec: &ResourceMoveSpec,
    ) -> CommandBuilder {
        let open_margin = match spec.hotel {
            Some(HotelSpec { unsafe_mode: true, .. }) => GRIP_OPEN_MARGIN_UNSAFE_HOTEL,
            _ => GRIP_OPEN_MARGIN,
        };
        let th = mm_to_tenths(self.iswap_traversal_height());
        let mut builder = CommandBuilder::new("C0", command)
            .int_padded("xs", mm_to_tenths(center.x), 5)
            .int_padded("yj", mm_to_tenths(center.y), 4)
            .int_padded("zj", mm_to_tenths(grip_z), 4)
            .int("gr", spec.grip_direction as i64)
            .int_padded(
                "gw",
                mm_to_tenths(grip_width) - ISWAP_GRIP_WIDTH_CORRECTION_TENTHS,
                4,
            )
            .int_padded("go", mm_to_tenths(grip_width + open_margin), 4)
            .int_padded("th", th, 4)
            .int_padded("te", th, 4)
            .int("ga", spec.collision_control as i64);
        if let Some(hotel) = spec.hotel {
            builder = builder
                .int_padded("hd", mm_to_tenths(hotel.depth), 4)
                .int_padded("hc", mm_to_tenths(hotel.clearance_height), 4)
                .flag("hu", hotel.unsafe_mode);
        }
        builder
    }

    /// Grab a plate with the iSWAP (C0 PP). Leaves the arm unparked.
    pub async fn iswap_pick_up_resource(
        &mut self,
        tree: &ResourceTree,
        resource: NodeId,
        spec: &ResourceMoveSpec,
    ) -> Result<()> {
        self.ensure_setup()?;
        if !self.iswap_installed {
            return Err(BackendError::Unsupported("no iSWAP installed"));
        }
        let (center, grip_width) = self.grip_geometry(tree, resource, spec)?;
        let top = tree
            .absolute_location(resource, XAnchor::Left, YAnchor::Front, ZAnchor::Top)?
            .z
            + spec.offset.z;
        let grip_z = top - spec.pickup_distance_from_top;
        let builder = self.iswap_builder("PP", center, grip_z, grip_width, spec);
        self.send_command_raw(&builder).await?;
        self.iswap_parked = false;
        Ok(())
    }

    /// Move a held plate so its center lands on `location` (C0 PM).
    pub async fn iswap_move_picked_up_resource(
        &mut self,
        location: Coordinate,
        spec: &ResourceMoveSpec,
    ) -> Result<()> {
        self.ensure_setup()?;
        if !self.iswap_installed {
            return Err(BackendError::Unsupported("no iSWAP installed"));
        }
        let th = mm_to_tenths(self.iswap_traversal_height());
        let builder = CommandBuilder::new("C0", "PM")
            .int_padded("xs", mm_to_tenths(location.x), 5)
            .int_padded("yj", mm_to_tenths(location.y), 4)
            .int_padded("zj", mm_to_tenths(location.z), 4)
            .int("gr", spec.grip_direction as i64)
            .int_padded("th", th, 4)
            .int("ga", spec.collision_control as i64);
        self.send_command_raw(&builder).await?;
        Ok(())
    }

    /// Set a held plate down with its center at `location` (C0 PR).
    pub async fn iswap_drop_resource(
        &mut self,
        location: Coordinate,
        grip_width: f64,
        spec: &ResourceMoveSpec,
    ) -> Result<()> {
        self.ensure_setup()?;
        if !self.iswap_installed {
            return Err(BackendError::Unsupported("no iSWAP installed"));
        }
        let open_margin = match spec.hotel {
            Some(HotelSpec { unsafe_mode: true, .. }) => GRIP_OPEN_MARGIN_UNSAFE_HOTEL,
            _ => GRIP_OPEN_MARGIN,
        };
        let th = mm_to_tenths(self.iswap_traversal_height());
        let mut builder = CommandBuilder::new("C0", "PR")
            .int_padded("xs", mm_to_tenths(location.x), 5)
            .int_padded("yj", mm_to_tenths(location.y), 4)
            .int_padded("zj", mm_to_tenths(location.z), 4)
            .int("gr", spec.grip_direction as i64)
            .int_padded("go", mm_to_tenths(grip_width + open_margin), 4)
            .int_padded("th", th, 4)
            .int_padded("te", th, 4)
            .int("ga", spec.collision_control as i64);
        if let Some(hotel) = spec.hotel {
            builder = builder
                .int_padded("hd", mm_to_tenths(hotel.depth), 4)
                .int_padded("hc", mm_to_tenths(hotel.clearance_height), 4)
                .flag("hu", hotel.unsafe_mode);
        }
        self.send_command_raw(&builder).await?;
        Ok(())
    }

    /// Full iSWAP transfer: pick the resource up, move, set it down with
    /// its center at `destination`, park the arm again.
    pub async fn iswap_move_resource(
        &mut self,
        tree: &ResourceTree,
        resource: NodeId,
        destination: Coordinate,
        spec: &ResourceMoveSpec,
    ) -> Result<()> {
        let (_, grip_width) = self.grip_geometry(tree, resource, spec)?;
        self.iswap_pick_up_resource(tree, resource, spec).await?;
        let height = tree.absolute_size_z(resource)?;
        let drop = Coordinate::new(
            destination.x,
            destination.y,
            destination.z + height - spec.pickup_distance_from_top,
        );
        self.iswap_drop_resource(drop, grip_width, spec).await?;
        self.park_iswap().await
    }

    // ── CoRe gripper transport ───────────────────────────────────────────────

    /// Mount the CoRe gripper tool from the wasteblock onto two channels
    /// (C0 ZT).
    pub async fn get_core(&mut self, back_channel: usize, front_channel: usize) -> Result<()> {
        self.ensure_setup()?;
        if back_channel >= front_channel || front_channel >= self.num_channels() {
            return Err(BackendError::InvalidArgument(format!(
                "invalid gripper channels {back_channel}/{front_channel}"
            )));
        }
        let deck_width = *self.extended_conf.get("ka").unwrap_or(&13600) as f64 / 10.0;
        let mount_x = if deck_width >= 1900.0 {
            CORE_MOUNT_X_STAR
        } else {
            CORE_MOUNT_X_STARLET
        };
        let th = mm_to_tenths(self.channel_traversal_height());
        let builder = CommandBuilder::new("C0", "ZT")
            .int_padded("xs", mm_to_tenths(mount_x), 5)
            .int("xd", 0)
            .int_padded("ya", mm_to_tenths(CORE_MOUNT_Y_BACK), 4)
            .int_padded("yb", mm_to_tenths(CORE_MOUNT_Y_FRONT), 4)
            .int_padded("pa", back_channel as i64 + 1, 2)
            .int_padded("pb", front_channel as i64 + 1, 2)
            .int_padded("tp", 2350, 4)
            .int_padded("tz", 2250, 4)
            .int_padded("th", th, 4)
            .int_padded("te", th, 4);
        self.send_command_raw(&builder).await?;
        self.core_parked = false;
        Ok(())
    }

    /// Return the CoRe gripper tool to the wasteblock (C0 ZS).
    pub async fn put_core(&mut self) -> Result<()> {
        self.ensure_setup()?;
        let deck_width = *self.extended_conf.get("ka").unwrap_or(&13600) as f64 / 10.0;
        let mount_x = if deck_width >= 1900.0 {
            CORE_MOUNT_X_STAR
        } else {
            CORE_MOUNT_X_STARLET
        };
        let th = mm_to_tenths(self.channel_traversal_height());
        let builder = CommandBuilder::new("C0", "ZS")
            .int_padded("xs", mm_to_tenths(mount_x), 5)
            .int("xd", 0)
            .int_padded("ya", mm_to_tenths(CORE_MOUNT_Y_BACK), 4)
            .int_padded("yb", mm_to_tenths(CORE_MOUNT_Y_FRONT), 4)
            .int_padded("tp", 2150, 4)
            .int_padded("tz", 2050, 4)
            .int_padded("th", th, 4)
            .int_padded("te", th, 4);
        self.send_command_raw(&builder).await?;
        self.core_parked = true;
        Ok(())
    }

    /// Grab a plate with the CoRe gripper (C0 ZP), mounting the tool
    /// first when it is still parked.
    pub async fn core_pick_up_resource(
        &mut self,
        tree: &ResourceTree,
        resource: NodeId,
        spec: &ResourceMoveSpec,
    ) -> Result<()> {
        self.ensure_setup()?;
        self.ensure_iswap_parked().await?;
        if self.core_parked() {
            let back = self.num_channels().saturating_sub(2);
            let front = self.num_channels().saturating_sub(1);
            self.get_core(back, front).await?;
        }
        let adjustment = self.core_adjustment();
        let center = tree.absolute_location(
            resource,
            XAnchor::Center,
            YAnchor::Center,
            ZAnchor::Bottom,
        )? + spec.offset
            + adjustment;
        // The gripper jaws sit on channels, so they close in y.
        let grip_width = tree.absolute_size_y(resource)?;
        let top = tree
            .absolute_location(resource, XAnchor::Left, YAnchor::Front, ZAnchor::Top)?
            .z
            + spec.offset.z
            + adjustment.z;
        let th = mm_to_tenths(self.channel_traversal_height());
        let builder = CommandBuilder::new("C0", "ZP")
            .int_padded("xs", mm_to_tenths(center.x), 5)
            .int("xd", 0)
            .int_padded("yj", mm_to_tenths(center.y), 4)
            .int_padded("zj", mm_to_tenths(top - spec.pickup_distance_from_top), 4)
            .int_padded("gw", mm_to_tenths(grip_width), 4)
            .int_padded("go", mm_to_tenths(grip_width + GRIP_OPEN_MARGIN), 4)
            .int_padded("th", th, 4)
            .int("ga", spec.collision_control as i64);
        self.send_command_raw(&builder).await?;
        Ok(())
    }

    /// Move a plate held by the CoRe gripper (C0 ZM).
    pub async fn core_move_picked_up_resource(
        &mut self,
        location: Coordinate,
        spec: &ResourceMoveSpec,
    ) -> Result<()> {
        self.ensure_setup()?;
        let adjustment = self.core_adjustment();
        let th = mm_to_tenths(self.channel_traversal_height());
        let builder = CommandBuilder::new("C0", "ZM")
            .int_padded("xs", mm_to_tenths(location.x + adjustment.x), 5)
            .int_padded("yj", mm_to_tenths(location.y + adjustment.y), 4)
            .int_padded("zj", mm_to_tenths(location.z + adjustment.z), 4)
            .int_padded("th", th, 4)
            .int("ga", spec.collision_control as i64);
        self.send_command_raw(&builder).await?;
        Ok(())
    }

    /// Set a plate down from the CoRe gripper (C0 ZR).
    pub async fn core_release_picked_up_resource(
        &mut self,
        location: Coordinate,
        grip_width: f64,
        spec: &ResourceMoveSpec,
    ) -> Result<()> {
        self.ensure_setup()?;
        let adjustment = self.core_adjustment();
        let th = mm_to_tenths(self.channel_traversal_height());
        let builder = CommandBuilder::new("C0", "ZR")
            .int_padded("xs", mm_to_tenths(location.x + adjustment.x), 5)
            .int_padded("yj", mm_to_tenths(location.y + adjustment.y), 4)
            .int_padded("zj", mm_to_tenths(location.z + adjustment.z), 4)
            .int_padded("go", mm_to_tenths(grip_width + GRIP_OPEN_MARGIN), 4)
            .int_padded("th", th, 4)
            .int("ga", spec.collision_control as i64);
        self.send_command_raw(&builder).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispense_mode_selection() {
        assert_eq!(dispense_mode(true, true, false), 1);
        assert_eq!(dispense_mode(true, false, false), 0);
        assert_eq!(dispense_mode(false, true, false), 3);
        assert_eq!(dispense_mode(false, false, false), 2);
        // Empty tip wins over everything.
        assert_eq!(dispense_mode(true, true, true), 4);
    }

    #[test]
    fn tip_volume_classes() {
        assert_eq!(tip_volume_class(&Tip::low_volume_with_filter()), 10);
        assert_eq!(tip_volume_class(&Tip::standard_volume_with_filter()), 300);
        assert_eq!(tip_volume_class(&Tip::high_volume_with_filter()), 1000);
    }
}
