//! The Prep backend: TCP transport, packet correlation, and the
//! command-id dispatch for pipetting, plate transport and system
//! commands.
//!
//! Each firmware command has a fixed id and a fixed (source, destination)
//! HARP address pair. The HOI2 `action_id` carries the command id and is
//! echoed by the response; the HARP sequence number is a per-session
//! counter wrapping at 0xFF.

use std::time::{Duration, Instant};

use bytes::Bytes;
use rand::Rng;
use tracing::{debug, info, warn};

use labware::tree::ResourceTree;
use labware::{Coordinate, NodeId, Tip, TipSize, XAnchor, YAnchor, ZAnchor};
use prep_wire::{
    check_result_fragment, Fragment, FragmentValue, HarpAddress, HarpPacket, HoiAction,
    HoiPacket2, IpPacket, IpProtocol, PrepWireError, HARP_PROTOCOL_HOI2,
};

use crate::error::{prep_error_is_transient, BackendError, Result};
use crate::prep::params::*;
use crate::transport::{Transport, TransportTimeouts};

// ── Addresses ─────────────────────────────────────────────────────────────────

/// Source for pipettor-level commands (plate transport, TADM).
pub const PIPETTOR_SOURCE: HarpAddress = HarpAddress::new(0x0002, 0x0004, 0x0006);
/// Destination of all pipettor commands.
pub const PIPETTOR_DESTINATION: HarpAddress = HarpAddress::new(0xE000, 0x0001, 0x1000);
/// Source for system commands (initialize, park, storage, lights).
pub const SOURCE_ADDRESS: HarpAddress = HarpAddress::new(0x0002, 0x0004, 0x0004);
/// Destination of system commands.
pub const DESTINATION_ADDRESS: HarpAddress = HarpAddress::new(0x0001, 0x0001, 0x1500);
/// Source for channel commands (tips, aspirate, dispense, gantry moves).
pub const CHANNEL_COMMAND_SOURCE: HarpAddress = HarpAddress::new(0x0002, 0x0007, 0x0006);
/// Source the deck-light commands come from.
pub const DECK_LIGHT_SOURCE: HarpAddress = HarpAddress::new(0x0002, 0x0005, 0x0002);

/// The Prep has a rear channel (index 0) and a front channel (index 1).
pub const PREP_NUM_CHANNELS: usize = 2;

/// Default TCP endpoint of the instrument.
pub const DEFAULT_HOST: &str = "192.168.100.102";
pub const DEFAULT_PORT: u16 = 2000;

/// Seek distance above the tip top during pickup and drop, mm.
const TIP_SEEK_ABOVE: f32 = 12.0;

/// Retries for the transient busy result.
const BUSY_RETRIES: usize = 2;

fn channel_for_index(index: usize) -> Result<ChannelIndex> {
    match index {
        0 => Ok(ChannelIndex::RearChannel),
        1 => Ok(ChannelIndex::FrontChannel),
        _ => Err(BackendError::InvalidArgument(format!(
            "channel {index} out of range, the Prep has {PREP_NUM_CHANNELS} channels"
        ))),
    }
}

fn prep_tip_type(tip: &Tip) -> PrepTipType {
    match tip.size {
        TipSize::LowVolume => PrepTipType::LowVolume,
        TipSize::HighVolume => PrepTipType::HighVolume,
        _ => PrepTipType::StandardVolume,
    }
}

/// A tip pickup or drop on one Prep channel.
#[derive(Debug, Clone)]
pub struct PrepTipOp {
    pub spot: NodeId,
    pub offset: Coordinate,
    pub tip: Tip,
}

/// An aspiration or dispense on one Prep channel.
#[derive(Debug, Clone)]
pub struct PrepLiquidOp {
    pub container: NodeId,
    pub offset: Coordinate,
    pub volume: f64,
    pub flow_rate: Option<f64>,
    pub blow_out_air_volume: Option<f64>,
}

/// Backend for the Prep.
pub struct PrepBackend<T: Transport> {
    transport: T,
    timeouts: TransportTimeouts,
    sequence: u8,
    read_buffer: Vec<u8>,
    setup_done: bool,
}

impl<T: Transport> PrepBackend<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            timeouts: TransportTimeouts::default(),
            sequence: 0,
            read_buffer: Vec::new(),
            setup_done: false,
        }
    }

    pub fn num_channels(&self) -> usize {
        PREP_NUM_CHANNELS
    }

    /// The underlying transport. Tests use this to inspect recorded
    /// frames.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn next_sequence(&mut self) -> u8 {
        self.sequence = self.sequence.wrapping_add(1) % 0xFF;
        self.sequence
    }

    fn ensure_setup(&self) -> Result<()> {
        if self.setup_done {
            Ok(())
        } else {
            Err(BackendError::NotReady)
        }
    }

    // ── Packet transport ─────────────────────────────────────────────────────

    fn assemble(
        &mut self,
        command_id: u16,
        fragments: Vec<Fragment>,
        source: HarpAddress,
        destination: HarpAddress,
    ) -> Bytes {
        let hoi = HoiPacket2::command_request(command_id, fragments);
        let harp =
            HarpPacket::command_request(source, destination, self.next_sequence(), hoi.encode());
        IpPacket::new(IpProtocol::Harp2, (3, 0), harp.encode()).encode()
    }

    /// Send a command and return the response's fragments. The response
    /// must echo the command id with a command-response action; an
    /// exception action or a nonzero leading HcResult is an error. A
    /// busy result is retried twice before surfacing.
    pub async fn send_command(
        &mut self,
        command_id: u16,
        fragments: Vec<Fragment>,
        source: HarpAddress,
        destination: HarpAddress,
    ) -> Result<Vec<Fragment>> {
        let mut attempt = 0;
        loop {
            let frame = self.assemble(command_id, fragments.clone(), source, destination);
            debug!("sending command {command_id} ({} bytes)", frame.len());
            self.transport
                .send(&frame, self.timeouts.write)
                .await?;

            let hoi = self.read_correlated(command_id).await?;
            if hoi.hoi_action() == Some(HoiAction::CommandException) {
                if let Some(Fragment {
                    value: FragmentValue::HcResult(code),
                }) = hoi.fragments.first()
                {
                    return Err(PrepWireError::CommandFailed {
                        code: *code,
                        known: prep_wire::HcResult::from_code(*code),
                    }
                    .into());
                }
                return Err(BackendError::Protocol(format!(
                    "command {command_id} answered with an exception"
                )));
            }

            match check_result_fragment(&hoi.fragments) {
                Ok(()) => return Ok(hoi.fragments),
                Err(e) if prep_error_is_transient(&e) && attempt < BUSY_RETRIES => {
                    attempt += 1;
                    warn!("command {command_id} busy, retrying ({attempt}/{BUSY_RETRIES})");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Read packets until one echoes `command_id`. Packets answering an
    /// id nobody waits for are late responses to cancelled commands;
    /// they are logged and dropped.
    async fn read_correlated(&mut self, command_id: u16) -> Result<HoiPacket2> {
        let deadline = Instant::now() + self.timeouts.read;
        loop {
            if let Some(packet) = self.take_packet()? {
                let harp = HarpPacket::decode(&packet.payload).map_err(BackendError::from)?;
                if harp.protocol != HARP_PROTOCOL_HOI2 {
                    warn!("discarding packet with protocol {}", harp.protocol);
                    continue;
                }
                let hoi = HoiPacket2::decode(&harp.payload).map_err(BackendError::from)?;
                if hoi.action_id == command_id {
                    return Ok(hoi);
                }
                warn!(
                    "discarding response for orphan command id {} (waiting for {command_id})",
                    hoi.action_id
                );
                continue;
            }
            if Instant::now() >= deadline {
                return Err(BackendError::Timeout);
            }
            match self.transport.recv(self.timeouts.packet_read).await {
                Ok(chunk) => self.read_buffer.extend_from_slice(&chunk),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Pop one complete IpPacket off the read buffer, if present.
    fn take_packet(&mut self) -> Result<Option<IpPacket>> {
        if self.read_buffer.len() < 2 {
            return Ok(None);
        }
        let size = u16::from_le_bytes([self.read_buffer[0], self.read_buffer[1]]) as usize;
        let total = size + 2;
        if self.read_buffer.len() < total {
            return Ok(None);
        }
        let packet_bytes: Vec<u8> = self.read_buffer.drain(..total).collect();
        let packet = IpPacket::decode(&packet_bytes).map_err(BackendError::from)?;
        Ok(Some(packet))
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Initialize the instrument with the standard tip-drop defaults.
    pub async fn setup(&mut self, smart: bool) -> Result<()> {
        self.initialize(smart, InitTipDropParameters::default())
            .await?;
        self.setup_done = true;
        info!("Prep initialized (smart={smart})");
        Ok(())
    }

    /// Release the transport. The handle is closed on every path.
    pub async fn stop(&mut self) -> Result<()> {
        self.setup_done = false;
        self.transport.close().await?;
        Ok(())
    }

    // ── System commands ──────────────────────────────────────────────────────

    /// Command 1 (system): initialize, dropping any mounted tips.
    pub async fn initialize(
        &mut self,
        smart: bool,
        tip_drop_params: InitTipDropParameters,
    ) -> Result<()> {
        self.send_command(
            1,
            vec![
                Fragment::boolean(smart),
                Fragment::structure(tip_drop_params.fragments()),
            ],
            SOURCE_ADDRESS,
            DESTINATION_ADDRESS,
        )
        .await?;
        Ok(())
    }

    /// Command 3 (system): park both channels.
    pub async fn park(&mut self) -> Result<()> {
        self.ensure_setup()?;
        self.send_command(3, vec![], SOURCE_ADDRESS, DESTINATION_ADDRESS)
            .await?;
        Ok(())
    }

    /// Command 4 (system): spread the channels apart.
    pub async fn spread(&mut self) -> Result<()> {
        self.ensure_setup()?;
        self.send_command(4, vec![], SOURCE_ADDRESS, DESTINATION_ADDRESS)
            .await?;
        Ok(())
    }

    /// Command 14 (system): read instrument storage.
    pub async fn read_storage(&mut self, offset: u32, length: u32) -> Result<Vec<u8>> {
        self.ensure_setup()?;
        let fragments = self
            .send_command(
                14,
                vec![Fragment::u32(offset), Fragment::u32(length)],
                SOURCE_ADDRESS,
                DESTINATION_ADDRESS,
            )
            .await?;
        for fragment in &fragments {
            if let FragmentValue::U8Array(data) = &fragment.value {
                return Ok(data.clone());
            }
        }
        Err(BackendError::Protocol(
            "read_storage response without data".into(),
        ))
    }

    /// Command 15 (system): write instrument storage.
    pub async fn write_storage(&mut self, offset: u32, data: Vec<u8>) -> Result<()> {
        self.ensure_setup()?;
        self.send_command(
            15,
            vec![Fragment::u32(offset), Fragment::u8_array(data)],
            SOURCE_ADDRESS,
            DESTINATION_ADDRESS,
        )
        .await?;
        Ok(())
    }

    /// Command 25 (deck light): set the deck light color.
    pub async fn set_deck_light(&mut self, white: u8, red: u8, green: u8, blue: u8) -> Result<()> {
        self.ensure_setup()?;
        self.send_command(
            25,
            vec![
                Fragment::u8(white),
                Fragment::u8(red),
                Fragment::u8(green),
                Fragment::u8(blue),
            ],
            DECK_LIGHT_SOURCE,
            DESTINATION_ADDRESS,
        )
        .await?;
        Ok(())
    }

    /// Command 26 (system): current deck light color (white, r, g, b).
    pub async fn get_deck_light(&mut self) -> Result<(u8, u8, u8, u8)> {
        self.ensure_setup()?;
        let fragments = self
            .send_command(26, vec![], SOURCE_ADDRESS, DESTINATION_ADDRESS)
            .await?;
        let mut values = fragments.iter().filter_map(|f| match f.value {
            FragmentValue::U8(v) => Some(v),
            _ => None,
        });
        match (values.next(), values.next(), values.next(), values.next()) {
            (Some(w), Some(r), Some(g), Some(b)) => Ok((w, r, g, b)),
            _ => Err(BackendError::Protocol(
                "invalid return length for deck light data".into(),
            )),
        }
    }

    /// Easter egg: strobe the deck light with random colors.
    pub async fn disco_mode(&mut self) -> Result<()> {
        for _ in 0..69 {
            let (w, r, g, b) = {
                let mut rng = rand::thread_rng();
                (
                    rng.gen_range(1..=255),
                    rng.gen_range(1..=255),
                    rng.gen_range(1..=255),
                    rng.gen_range(1..=255),
                )
            };
            self.set_deck_light(w, r, g, b).await?;
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        Ok(())
    }

    /// Command 29 (system): park into a caller-chosen position.
    pub async fn suspended_park(
        &mut self,
        move_parameters: GantryMoveXyzParameters,
    ) -> Result<()> {
        self.ensure_setup()?;
        self.send_command(
            29,
            vec![Fragment::structure(move_parameters.fragments())],
            SOURCE_ADDRESS,
            DESTINATION_ADDRESS,
        )
        .await?;
        Ok(())
    }

    /// Command 30 (system): begin a method run.
    pub async fn method_begin(&mut self, automatic_pause: bool) -> Result<()> {
        self.ensure_setup()?;
        self.send_command(
            30,
            vec![Fragment::boolean(automatic_pause)],
            SOURCE_ADDRESS,
            DESTINATION_ADDRESS,
        )
        .await?;
        Ok(())
    }

    /// Command 31 (system): end a method run.
    pub async fn method_end(&mut self) -> Result<()> {
        self.ensure_setup()?;
        self.send_command(31, vec![], SOURCE_ADDRESS, DESTINATION_ADDRESS)
            .await?;
        Ok(())
    }

    /// Command 33 (system): abort the current method.
    pub async fn method_abort(&mut self) -> Result<()> {
        self.ensure_setup()?;
        self.send_command(33, vec![], SOURCE_ADDRESS, DESTINATION_ADDRESS)
            .await?;
        Ok(())
    }

    async fn query_bool(&mut self, command_id: u16) -> Result<bool> {
        self.ensure_setup()?;
        let fragments = self
            .send_command(command_id, vec![], SOURCE_ADDRESS, DESTINATION_ADDRESS)
            .await?;
        // The status follows the HcResult fragment.
        for fragment in &fragments {
            if let FragmentValue::Bool(v) = fragment.value {
                return Ok(v);
            }
        }
        Err(BackendError::Protocol(format!(
            "command {command_id} returned no status flag"
        )))
    }

    /// Command 34 (system): whether the channels are parked.
    pub async fn is_parked(&mut self) -> Result<bool> {
        self.query_bool(34).await
    }

    /// Command 35 (system): whether the channels are spread.
    pub async fn is_spread(&mut self) -> Result<bool> {
        self.query_bool(35).await
    }

    // ── Channel commands ─────────────────────────────────────────────────────

    /// Command 9 (channels): pick up tips.
    ///
    /// All ops must use the same tip type. The firmware seeks from
    /// `z + 12` mm down onto the tip.
    pub async fn pick_up_tips(
        &mut self,
        tree: &ResourceTree,
        ops: &[PrepTipOp],
        use_channels: &[usize],
        final_z: f32,
    ) -> Result<()> {
        self.ensure_setup()?;
        if ops.len() != use_channels.len() || ops.is_empty() {
            return Err(BackendError::InvalidArgument(
                "pick_up_tips needs matching ops and channels".into(),
            ));
        }
        let first = &ops[0];
        if ops.iter().any(|op| op.tip != first.tip) {
            return Err(BackendError::InvalidArgument(
                "all ops must use the same tip".into(),
            ));
        }

        let mut tip_parameters = Vec::new();
        for (op, &channel) in ops.iter().zip(use_channels) {
            let loc = tree.absolute_location(
                op.spot,
                XAnchor::Center,
                YAnchor::Center,
                ZAnchor::Top,
            )? + op.offset;
            let z = (loc.z + op.tip.total_tip_length) as f32;
            tip_parameters.push(TipPositionParameters {
                default_values: false,
                channel: channel_for_index(channel)?,
                x_position: loc.x as f32,
                y_position: loc.y as f32,
                z_position: z,
                z_seek: z + TIP_SEEK_ABOVE,
            });
        }

        let tip_definition = TipPickupParameters {
            default_values: false,
            volume: first.tip.maximal_volume as f32,
            length: (first.tip.total_tip_length - first.tip.fitting_depth) as f32,
            tip_type: prep_tip_type(&first.tip),
            has_filter: first.tip.has_filter,
            is_needle: false,
            is_tool: false,
        };

        let seek_speed = 15.0f32;
        let enable_tadm = false;
        let dispenser_volume = 0.0f32;
        let dispenser_speed = 250.0f32;

        self.send_command(
            9,
            vec![
                Fragment::structure_array(
                    tip_parameters.iter().map(|p| p.fragments()).collect(),
                ),
                Fragment::real32(final_z),
                Fragment::real32(seek_speed),
                Fragment::structure(tip_definition.fragments()),
                Fragment::boolean(enable_tadm),
                Fragment::real32(dispenser_volume),
                Fragment::real32(dispenser_speed),
            ],
            CHANNEL_COMMAND_SOURCE,
            PIPETTOR_DESTINATION,
        )
        .await?;
        Ok(())
    }

    /// Command 12 (channels): drop tips at fixed height.
    pub async fn drop_tips(
        &mut self,
        tree: &ResourceTree,
        ops: &[PrepTipOp],
        use_channels: &[usize],
        final_z: f32,
    ) -> Result<()> {
        self.ensure_setup()?;
        if ops.len() != use_channels.len() || ops.is_empty() {
            return Err(BackendError::InvalidArgument(
                "drop_tips needs matching ops and channels".into(),
            ));
        }

        let mut tip_parameters = Vec::new();
        for (op, &channel) in ops.iter().zip(use_channels) {
            let loc = tree.absolute_location(
                op.spot,
                XAnchor::Center,
                YAnchor::Center,
                ZAnchor::Top,
            )? + op.offset;
            let z = (loc.z + op.tip.total_tip_length) as f32;
            tip_parameters.push(TipDropParameters {
                default_values: false,
                channel: channel_for_index(channel)?,
                x_position: loc.x as f32,
                y_position: loc.y as f32,
                z_position: z,
                z_seek: z + TIP_SEEK_ABOVE,
                drop_type: TipDropType::FixedHeight,
            });
        }

        let seek_speed = 10.0f32;
        let tip_roll_off_distance = 0.0f32;
        self.send_command(
            12,
            vec![
                Fragment::structure_array(
                    tip_parameters.iter().map(|p| p.fragments()).collect(),
                ),
                Fragment::real32(final_z),
                Fragment::real32(seek_speed),
                Fragment::real32(tip_roll_off_distance),
            ],
            CHANNEL_COMMAND_SOURCE,
            PIPETTOR_DESTINATION,
        )
        .await?;
        Ok(())
    }

    /// Command 1 (channels): aspirate at fixed height with pressure
    /// monitoring defaults.
    pub async fn aspirate(
        &mut self,
        tree: &ResourceTree,
        ops: &[PrepLiquidOp],
        use_channels: &[usize],
        z_final: f32,
    ) -> Result<()> {
        self.ensure_setup()?;
        if ops.len() != use_channels.len() || ops.is_empty() {
            return Err(BackendError::InvalidArgument(
                "aspirate needs matching ops and channels".into(),
            ));
        }

        let mut bundles = Vec::new();
        for (op, &channel) in ops.iter().zip(use_channels) {
            let loc = tree.absolute_location(
                op.container,
                XAnchor::Center,
                YAnchor::Center,
                ZAnchor::CavityBottom,
            )? + op.offset;
            let size_x = tree.size_x(op.container)?;
            let size_y = tree.size_y(op.container)?;
            if (size_x - size_y).abs() > 1e-9 {
                return Err(BackendError::InvalidArgument(
                    "the Prep only aspirates from round containers".into(),
                ));
            }
            let radius = (size_x / 2.0) as f32;

            bundles.push(AspirateParametersNoLldAndMonitoring {
                default_values: false,
                channel: channel_for_index(channel)?,
                aspirate: AspirateParameters {
                    default_values: false,
                    x_position: loc.x as f32,
                    y_position: loc.y as f32,
                    prewet_volume: 0.0,
                    blowout_volume: op.blow_out_air_volume.unwrap_or(0.0) as f32,
                },
                common: CommonParameters {
                    default_values: false,
                    empty: true,
                    z_minimum: -5.03,
                    z_final,
                    z_liquid_exit_speed: 2.0,
                    liquid_volume: op.volume as f32,
                    liquid_speed: op.flow_rate.unwrap_or(100.0) as f32,
                    transport_air_volume: 0.0,
                    tube_radius: radius,
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
            });
        }

        self.send_command(
            1,
            vec![Fragment::structure_array(
                bundles.iter().map(|b| b.fragments()).collect(),
            )],
            CHANNEL_COMMAND_SOURCE,
            PIPETTOR_DESTINATION,
        )
        .await?;
        Ok(())
    }

    /// Command 5 (channels): dispense at fixed height.
    pub async fn dispense(
        &mut self,
        tree: &ResourceTree,
        ops: &[PrepLiquidOp],
        use_channels: &[usize],
        final_z: f32,
    ) -> Result<()> {
        self.ensure_setup()?;
        if ops.len() != use_channels.len() || ops.is_empty() {
            return Err(BackendError::InvalidArgument(
                "dispense needs matching ops and channels".into(),
            ));
        }

        let mut bundles = Vec::new();
        for (op, &channel) in ops.iter().zip(use_channels) {
            let loc = tree.absolute_location(
                op.container,
                XAnchor::Center,
                YAnchor::Center,
                ZAnchor::CavityBottom,
            )? + op.offset;
            let size_x = tree.size_x(op.container)?;
            let size_y = tree.size_y(op.container)?;
            if (size_x - size_y).abs() > 1e-9 {
                return Err(BackendError::InvalidArgument(
                    "the Prep only dispenses into round containers".into(),
                ));
            }
            let radius = (size_x / 2.0) as f32;

            bundles.push(DispenseParametersNoLld {
                default_values: false,
                channel: channel_for_index(channel)?,
                dispense: DispenseParameters {
                    default_values: false,
                    x_position: loc.x as f32,
                    y_position: loc.y as f32,
                    stop_back_volume: 0.0,
                    cutoff_speed: 100.0,
                },
                common: CommonParameters {
                    default_values: false,
                    empty: true,
                    z_minimum: -5.03,
                    z_final: final_z,
                    z_liquid_exit_speed: 2.0,
                    liquid_volume: op.volume as f32,
                    liquid_speed: op.flow_rate.unwrap_or(100.0) as f32,
                    transport_air_volume: 0.0,
                    tube_radius: radius,
                    cone_height: 0.0,
                    cone_bottom_radius: 0.0,
                    settling_time: 0.0,
                    additional_probes: 0,
                },
                no_lld: NoLldParameters {
                    default_values: false,
                    z_fluid: 94.97,
                    z_air: 99.08,
                    bottom_search: false,
                    z_bottom_search_offset: 2.0,
                    z_bottom_offset: 0.0,
                },
                mix: MixParameters::default(),
                adc: AdcParameters::default(),
                tadm: TadmParameters::default(),
            });
        }

        self.send_command(
            5,
            vec![Fragment::structure_array(
                bundles.iter().map(|b| b.fragments()).collect(),
            )],
            CHANNEL_COMMAND_SOURCE,
            PIPETTOR_DESTINATION,
        )
        .await?;
        Ok(())
    }

    /// Command 26 (channels): move the gantry and channels to a
    /// position.
    pub async fn move_to_position(
        &mut self,
        move_parameters: GantryMoveXyzParameters,
    ) -> Result<()> {
        self.ensure_setup()?;
        self.send_command(
            26,
            vec![Fragment::structure(move_parameters.fragments())],
            CHANNEL_COMMAND_SOURCE,
            PIPETTOR_DESTINATION,
        )
        .await?;
        Ok(())
    }

    /// Command 27 (channels): like `move_to_position` but via the travel
    /// lane.
    pub async fn move_to_position_via_lane(
        &mut self,
        move_parameters: GantryMoveXyzParameters,
    ) -> Result<()> {
        self.ensure_setup()?;
        self.send_command(
            27,
            vec![Fragment::structure(move_parameters.fragments())],
            CHANNEL_COMMAND_SOURCE,
            PIPETTOR_DESTINATION,
        )
        .await?;
        Ok(())
    }

    /// Command 28 (channels): raise channels to the safe z.
    pub async fn move_z_up_to_safe(&mut self, channels: &[usize]) -> Result<()> {
        self.ensure_setup()?;
        let mut enums = Vec::new();
        for &channel in channels {
            enums.push(channel_for_index(channel)? as u32);
        }
        self.send_command(
            28,
            vec![Fragment::enum_array(enums)],
            CHANNEL_COMMAND_SOURCE,
            PIPETTOR_DESTINATION,
        )
        .await?;
        Ok(())
    }

    /// Command 13 to the z-travel controller: select the z travel
    /// configuration. The argument's meaning is not documented; the
    /// recorded sessions use 3.
    pub async fn z_travel_configuration(&mut self, configuration: u32) -> Result<()> {
        self.ensure_setup()?;
        self.send_command(
            13,
            vec![Fragment::enumeration(configuration)],
            HarpAddress::new(0x0002, 0x0004, 0x0005),
            HarpAddress::new(0x0001, 0x0001, 0xBEF0),
        )
        .await?;
        Ok(())
    }

    // ── Plate transport ──────────────────────────────────────────────────────

    /// Command 17 (pipettor): grip a plate at its top center.
    #[allow(clippy::too_many_arguments)]
    pub async fn pick_up_plate(
        &mut self,
        plate_top_center: XyzCoord,
        plate: PlateDimensions,
        clearance_y: f32,
        grip_speed_y: f32,
        grip_distance: f32,
        grip_height: f32,
    ) -> Result<()> {
        self.ensure_setup()?;
        self.send_command(
            17,
            vec![
                Fragment::structure(plate_top_center.fragments()),
                Fragment::structure(plate.fragments()),
                Fragment::real32(clearance_y),
                Fragment::real32(grip_speed_y),
                Fragment::real32(grip_distance),
                Fragment::real32(grip_height),
            ],
            PIPETTOR_SOURCE,
            PIPETTOR_DESTINATION,
        )
        .await?;
        Ok(())
    }

    /// Command 18 (pipettor): set a held plate down.
    pub async fn drop_plate(
        &mut self,
        plate_top_center: XyzCoord,
        clearance_y: f32,
        acceleration_scale_x: u8,
    ) -> Result<()> {
        self.ensure_setup()?;
        self.send_command(
            18,
            vec![
                Fragment::structure(plate_top_center.fragments()),
                Fragment::real32(clearance_y),
                Fragment::u8(acceleration_scale_x),
            ],
            PIPETTOR_SOURCE,
            PIPETTOR_DESTINATION,
        )
        .await?;
        Ok(())
    }

    /// Command 19 (pipettor): move a held plate.
    pub async fn move_plate(
        &mut self,
        plate_top_center: XyzCoord,
        acceleration_scale_x: u8,
    ) -> Result<()> {
        self.ensure_setup()?;
        self.send_command(
            19,
            vec![
                Fragment::structure(plate_top_center.fragments()),
                Fragment::u8(acceleration_scale_x),
            ],
            PIPETTOR_SOURCE,
            PIPETTOR_DESTINATION,
        )
        .await?;
        Ok(())
    }

    /// Command 20 (pipettor): full pick-move-place transfer.
    #[allow(clippy::too_many_arguments)]
    pub async fn transfer_plate(
        &mut self,
        source_top_center: XyzCoord,
        destination_top_center: XyzCoord,
        plate: PlateDimensions,
        clearance_y: f32,
        grip_speed_y: f32,
        grip_distance: f32,
        grip_height: f32,
        acceleration_scale_x: u8,
    ) -> Result<()> {
        self.ensure_setup()?;
        self.send_command(
            20,
            vec![
                Fragment::structure(source_top_center.fragments()),
                Fragment::structure(destination_top_center.fragments()),
                Fragment::structure(plate.fragments()),
                Fragment::real32(clearance_y),
                Fragment::real32(grip_speed_y),
                Fragment::real32(grip_distance),
                Fragment::real32(grip_height),
                Fragment::u8(acceleration_scale_x),
            ],
            PIPETTOR_SOURCE,
            PIPETTOR_DESTINATION,
        )
        .await?;
        Ok(())
    }

    /// Command 21 (pipettor): open the gripper.
    pub async fn release_plate(&mut self) -> Result<()> {
        self.ensure_setup()?;
        self.send_command(21, vec![], PIPETTOR_SOURCE, PIPETTOR_DESTINATION)
            .await?;
        Ok(())
    }

    /// Command 23 (pipettor): purge the dispenser drives.
    pub async fn empty_dispenser(&mut self, channels: &[usize]) -> Result<()> {
        self.ensure_setup()?;
        let mut enums = Vec::new();
        for &channel in channels {
            enums.push(channel_for_index(channel)? as u32);
        }
        self.send_command(
            23,
            vec![Fragment::enum_array(enums)],
            PIPETTOR_SOURCE,
            PIPETTOR_DESTINATION,
        )
        .await?;
        Ok(())
    }
}
