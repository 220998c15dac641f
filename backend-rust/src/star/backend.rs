//! STAR backend core: command transport, correlation, machine state and
//! the firmware command set.
//!
//! One command is in flight at a time. Every outgoing frame carries a
//! generated id; responses are matched on the echo. Late responses with
//! an id nobody is waiting for are logged and dropped, so a timed-out
//! command cannot poison the next one.

use std::collections::HashMap;
use std::time::Instant;

use tracing::{debug, info, warn};

use labware::star_deck::StarDeck;
use labware::{Coordinate, Tip, TipPickupMethod, TipSize, XAnchor, YAnchor, ZAnchor};
use star_wire::{
    check_fw_string_error, mm_to_tenths, parse_response, ul_to_tenths, CommandBuilder,
    FieldValue, IdGenerator,
};

use crate::error::{map_star_errors, star_error_is_transient, BackendError, Result};
use crate::transport::{Transport, TransportTimeouts};

/// Module ids of the pipetting channels, channel 0 first.
pub(crate) const PIP_MODULES: [&str; 16] = [
    "P1", "P2", "P3", "P4", "P5", "P6", "P7", "P8", "P9", "PA", "PB", "PC", "PD", "PE", "PF",
    "PG",
];

/// Bounds for traversal heights (mm): strictly above the deck, strictly
/// below the mechanical ceiling.
const TRAVERSAL_MIN: f64 = 0.0;
const TRAVERSAL_MAX: f64 = 285.0;

/// Retries for the transient "command not completed" firmware condition.
const TRANSIENT_RETRIES: usize = 2;

#[derive(Debug, Clone)]
pub struct StarConfig {
    pub timeouts: TransportTimeouts,
    /// Default lateral movement height for channels (mm).
    pub channel_traversal_height: f64,
    /// Default lateral movement height for the iSWAP (mm).
    pub iswap_traversal_height: f64,
    /// Calibration offset applied to CoRe gripper coordinates.
    pub core_adjustment: Coordinate,
}

impl Default for StarConfig {
    fn default() -> Self {
        Self {
            timeouts: TransportTimeouts::default(),
            channel_traversal_height: 245.0,
            iswap_traversal_height: 284.0,
            core_adjustment: Coordinate::zero(),
        }
    }
}

/// A registered tip type. The firmware addresses tip geometry by a small
/// index; the first tip type seen gets index 0, the next 1, and so on.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TipTypeKey {
    length_tenths: i64,
    volume_tenths: i64,
    has_filter: bool,
    size: TipSize,
    pickup: TipPickupMethod,
}

impl TipTypeKey {
    fn of(tip: &Tip) -> Self {
        Self {
            length_tenths: mm_to_tenths(tip.total_tip_length),
            volume_tenths: ul_to_tenths(tip.maximal_volume),
            has_filter: tip.has_filter,
            size: tip.size,
            pickup: tip.pickup_method,
        }
    }
}

/// Backend for a Hamilton STAR(let).
pub struct StarBackend<T: Transport> {
    transport: T,
    ids: IdGenerator,
    config: StarConfig,
    read_buffer: String,

    pub(crate) setup_done: bool,
    pub(crate) num_channels: usize,
    pub(crate) iswap_installed: bool,
    pub(crate) autoload_installed: bool,
    pub(crate) core96_installed: bool,
    pub(crate) iswap_parked: bool,
    pub(crate) core_parked: bool,
    pub(crate) extended_conf: HashMap<String, i64>,
    tip_table: Vec<TipTypeKey>,
}

impl<T: Transport> StarBackend<T> {
    pub fn new(transport: T, config: StarConfig) -> Self {
        Self {
            transport,
            ids: IdGenerator::new(),
            config,
            read_buffer: String::new(),
            setup_done: false,
            num_channels: 0,
            iswap_installed: false,
            autoload_installed: false,
            core96_installed: false,
            iswap_parked: false,
            core_parked: true,
            extended_conf: HashMap::new(),
            tip_table: Vec::new(),
        }
    }

    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    /// The underlying transport. Tests use this to inspect recorded
    /// frames.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn iswap_parked(&self) -> bool {
        self.iswap_parked
    }

    pub fn core_parked(&self) -> bool {
        self.core_parked
    }

    pub fn channel_traversal_height(&self) -> f64 {
        self.config.channel_traversal_height
    }

    pub fn set_channel_traversal_height(&mut self, height: f64) -> Result<()> {
        if !(TRAVERSAL_MIN < height && height < TRAVERSAL_MAX) {
            return Err(BackendError::InvalidArgument(format!(
                "traversal height {height} outside ({TRAVERSAL_MIN}, {TRAVERSAL_MAX})"
            )));
        }
        self.config.channel_traversal_height = height;
        Ok(())
    }

    pub fn iswap_traversal_height(&self) -> f64 {
        self.config.iswap_traversal_height
    }

    pub fn set_iswap_traversal_height(&mut self, height: f64) -> Result<()> {
        if !(TRAVERSAL_MIN < height && height < TRAVERSAL_MAX) {
            return Err(BackendError::InvalidArgument(format!(
                "traversal height {height} outside ({TRAVERSAL_MIN}, {TRAVERSAL_MAX})"
            )));
        }
        self.config.iswap_traversal_height = height;
        Ok(())
    }

    pub fn core_adjustment(&self) -> Coordinate {
        self.config.core_adjustment
    }

    pub(crate) fn ensure_setup(&self) -> Result<()> {
        if self.setup_done {
            Ok(())
        } else {
            Err(BackendError::NotReady)
        }
    }

    // ── Command transport ────────────────────────────────────────────────────

    /// Issue a command and parse the correlated response against `fmt`.
    pub(crate) async fn send_command(
        &mut self,
        builder: &CommandBuilder,
        fmt: &str,
    ) -> Result<HashMap<String, FieldValue>> {
        let resp = self.send_command_raw(builder).await?;
        Ok(parse_response(&resp, fmt)?)
    }

    /// Issue a command and return the raw (error-checked) response.
    pub(crate) async fn send_command_raw(&mut self, builder: &CommandBuilder) -> Result<String> {
        let mut attempt = 0;
        loop {
            let id = self.ids.next_id();
            let frame = builder.build(id);
            debug!("sending: {}", frame.trim_end());
            self.transport
                .send(frame.as_bytes(), self.config.timeouts.write)
                .await?;

            let resp = self.read_correlated(id).await?;
            debug!("received: {resp}");
            match check_fw_string_error(&resp) {
                Ok(()) => return Ok(resp),
                Err(set) if star_error_is_transient(&set) && attempt < TRANSIENT_RETRIES => {
                    attempt += 1;
                    warn!(
                        "{}{} not completed, retrying ({attempt}/{TRANSIENT_RETRIES})",
                        builder.module(),
                        builder.command()
                    );
                }
                Err(set) => return Err(map_star_errors(set)),
            }
        }
    }

    /// Read frames until one echoes `id`, within the full-response
    /// deadline. Frames with other ids are orphans from cancelled or
    /// timed-out commands, logged and dropped.
    async fn read_correlated(&mut self, id: u16) -> Result<String> {
        let deadline = Instant::now() + self.config.timeouts.read;
        loop {
            while let Some(line) = self.take_line() {
                match frame_id(&line) {
                    Some(frame_id) if frame_id == id => return Ok(line),
                    Some(orphan) => {
                        warn!("discarding response with orphan id {orphan:04}: {line}");
                    }
                    None => {
                        warn!("discarding unparseable frame: {line}");
                    }
                }
            }
            if Instant::now() >= deadline {
                return Err(BackendError::Timeout);
            }
            match self.transport.recv(self.config.timeouts.packet_read).await {
                Ok(chunk) => {
                    self.read_buffer.push_str(&String::from_utf8_lossy(&chunk));
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                    // A single quiet interval; the overall deadline decides.
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn take_line(&mut self) -> Option<String> {
        let end = self.read_buffer.find(['\r', '\n'])?;
        let line: String = self.read_buffer[..end].to_string();
        let rest = self.read_buffer[end..]
            .trim_start_matches(['\r', '\n'])
            .to_string();
        self.read_buffer = rest;
        if line.is_empty() {
            self.take_line()
        } else {
            Some(line)
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Query the machine configuration and initialize every installed
    /// component: pipetting channels, autoload, iSWAP, CoRe 96 head.
    ///
    /// Not transactional: on failure the machine may be partially
    /// initialized; `iswap_parked`, `core_parked` and `num_channels`
    /// reflect how far it got.
    pub async fn setup(&mut self, deck: &StarDeck) -> Result<()> {
        let version = self.request_firmware_version().await?;
        info!("STAR firmware: {version}");

        self.request_extended_configuration().await?;
        self.num_channels = *self.extended_conf.get("xt").unwrap_or(&0) as usize;
        self.iswap_installed = self.extended_conf.get("ia") == Some(&1);
        self.autoload_installed = self.extended_conf.get("al") == Some(&1);
        self.core96_installed = self.extended_conf.get("ca") == Some(&1);
        info!(
            "configuration: {} channels, iswap={}, autoload={}, core96={}",
            self.num_channels, self.iswap_installed, self.autoload_installed, self.core96_installed
        );
        if self.num_channels == 0 {
            return Err(BackendError::Protocol(
                "machine reports zero pipetting channels".into(),
            ));
        }

        self.pre_initialize_instrument().await?;

        // Channels initialize with their tip-drop position over the trash.
        let tree = deck.tree();
        let trash = deck.get_trash_area();
        let trash_center =
            tree.absolute_location(trash, XAnchor::Center, YAnchor::Center, ZAnchor::Bottom)?;
        let th = mm_to_tenths(self.config.channel_traversal_height);
        let xs: Vec<i64> = (0..self.num_channels)
            .map(|_| mm_to_tenths(trash_center.x))
            .collect();
        let ys: Vec<i64> = (0..self.num_channels)
            .map(|i| mm_to_tenths(trash_center.y) - 90 * i as i64)
            .collect();
        let builder = CommandBuilder::new("C0", "DI")
            .int_list("xp", &xs, 5)
            .int_list("yp", &ys, 4)
            .int_padded("tp", mm_to_tenths(trash_center.z + 40.0), 4)
            .int_padded("tz", mm_to_tenths(trash_center.z + 20.0), 4)
            .int_padded("th", th, 4)
            .int_padded("te", th, 4);
        self.send_command_raw(&builder).await?;

        if self.autoload_installed {
            self.initialize_autoload().await?;
        }
        if self.iswap_installed {
            self.initialize_iswap().await?;
            self.park_iswap().await?;
        }
        if self.core96_installed {
            if let Ok(trash96) = deck.get_trash_area96() {
                let center = tree.absolute_location(
                    trash96,
                    XAnchor::Center,
                    YAnchor::Center,
                    ZAnchor::Bottom,
                )?;
                self.initialize_core96(center).await?;
            }
        }

        self.setup_done = true;
        Ok(())
    }

    /// Release the transport. The handle is closed on every path.
    pub async fn stop(&mut self) -> Result<()> {
        self.setup_done = false;
        self.transport.close().await?;
        Ok(())
    }

    // ── System commands ──────────────────────────────────────────────────────

    /// C0 RF: request master firmware version. Returned raw; the format
    /// is free text.
    pub async fn request_firmware_version(&mut self) -> Result<String> {
        let resp = self
            .send_command_raw(&CommandBuilder::new("C0", "RF"))
            .await?;
        Ok(resp.get(4..).unwrap_or_default().to_string())
    }

    /// C0 QM: request the extended configuration. Stores the fields for
    /// later inspection.
    pub async fn request_extended_configuration(&mut self) -> Result<()> {
        let parsed = self
            .send_command(
                &CommandBuilder::new("C0", "QM"),
                "ka#####xt##ia#al#ca#",
            )
            .await?;
        for (key, value) in parsed {
            if let FieldValue::Int(v) = value {
                self.extended_conf.insert(key, v);
            }
        }
        Ok(())
    }

    /// C0 MI: pre-initialize the instrument (homes the gantry).
    pub async fn pre_initialize_instrument(&mut self) -> Result<()> {
        self.send_command_raw(&CommandBuilder::new("C0", "MI"))
            .await?;
        Ok(())
    }

    /// I0 DI: initialize the autoload module.
    pub async fn initialize_autoload(&mut self) -> Result<()> {
        self.send_command_raw(&CommandBuilder::new("I0", "DI"))
            .await?;
        Ok(())
    }

    /// R0 DI: initialize the iSWAP arm.
    pub async fn initialize_iswap(&mut self) -> Result<()> {
        self.send_command_raw(&CommandBuilder::new("R0", "DI"))
            .await?;
        self.iswap_parked = false;
        Ok(())
    }

    /// C0 PG: fold the iSWAP into its park position, at the iSWAP
    /// traversal height.
    pub async fn park_iswap(&mut self) -> Result<()> {
        let th = mm_to_tenths(self.config.iswap_traversal_height);
        self.send_command_raw(&CommandBuilder::new("C0", "PG").int_padded("th", th, 4))
            .await?;
        self.iswap_parked = true;
        Ok(())
    }

    /// Park the iSWAP first if it is installed and unparked. Operations
    /// that move channels over the deck call this before doing anything.
    pub(crate) async fn ensure_iswap_parked(&mut self) -> Result<()> {
        if self.iswap_installed && !self.iswap_parked {
            self.park_iswap().await?;
        }
        Ok(())
    }

    /// C0 EI: initialize the CoRe 96 head over its trash.
    pub async fn initialize_core96(&mut self, trash_center: Coordinate) -> Result<()> {
        let builder = CommandBuilder::new("C0", "EI")
            .int_padded("xs", mm_to_tenths(trash_center.x), 5)
            .int_padded("yh", mm_to_tenths(trash_center.y), 4)
            .int_padded("za", mm_to_tenths(trash_center.z + 20.0), 4)
            .int_padded("th", mm_to_tenths(self.config.channel_traversal_height), 4);
        self.send_command_raw(&builder).await?;
        Ok(())
    }

    /// C0 RY: current y position of every channel, in mm, back to front.
    pub async fn request_y_positions(&mut self) -> Result<Vec<f64>> {
        let parsed = self
            .send_command(&CommandBuilder::new("C0", "RY"), "ry#### (n)")
            .await?;
        let values = parsed
            .get("ry")
            .and_then(FieldValue::as_int_list)
            .ok_or_else(|| BackendError::Protocol("RY response without ry".into()))?;
        Ok(values.iter().map(|&v| v as f64 / 10.0).collect())
    }

    /// C0 JY: move channels to the given y positions (mm, one per
    /// channel).
    pub async fn position_channels_y(&mut self, ys: &[f64]) -> Result<()> {
        let tenths: Vec<i64> = ys.iter().map(|&y| mm_to_tenths(y)).collect();
        self.send_command_raw(&CommandBuilder::new("C0", "JY").int_list("yp", &tenths, 4))
            .await?;
        Ok(())
    }

    // ── Tip types ────────────────────────────────────────────────────────────

    /// Index of this tip's registered type, registering it with the
    /// firmware (C0 TT) on first sight.
    pub(crate) async fn get_or_assign_tip_type_index(&mut self, tip: &Tip) -> Result<u8> {
        let key = TipTypeKey::of(tip);
        if let Some(index) = self.tip_table.iter().position(|k| *k == key) {
            return Ok(index as u8);
        }
        let index = self.tip_table.len();
        if index > 99 {
            return Err(BackendError::InvalidArgument(
                "too many distinct tip types registered".into(),
            ));
        }
        let size_code = match tip.size {
            TipSize::LowVolume => 0,
            TipSize::StandardVolume => 1,
            TipSize::HighVolume => 2,
            TipSize::Core384 => 3,
            TipSize::XlChannel => 4,
        };
        let builder = CommandBuilder::new("C0", "TT")
            .int_padded("tt", index as i64, 2)
            .flag("tf", tip.has_filter)
            .int_padded("tl", mm_to_tenths(tip.total_tip_length), 4)
            .int_padded("tv", ul_to_tenths(tip.maximal_volume), 5)
            .int("tg", size_code)
            .int("tu", tip.pickup_method as i64);
        self.send_command_raw(&builder).await?;
        self.tip_table.push(key);
        Ok(index as u8)
    }
}

/// Extract the echoed id of a response frame. The id field follows the
/// 4-character module and command echo.
fn frame_id(line: &str) -> Option<u16> {
    let rest = line.get(4..)?;
    let rest = rest.strip_prefix("id")?;
    rest.get(..4)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    fn backend(responses: &[&str]) -> StarBackend<MockTransport> {
        let mut mock = MockTransport::new();
        for resp in responses {
            mock.push_response(resp.as_bytes().to_vec());
        }
        StarBackend::new(mock, StarConfig::default())
    }

    #[tokio::test]
    async fn response_is_matched_by_id_echo() {
        let mut star = backend(&["C0RYid0000ry0100 0200\r"]);
        let ys = star.request_y_positions().await.unwrap();
        assert_eq!(ys, vec![10.0, 20.0]);
        assert_eq!(star.transport.sent_strings(), vec!["C0RYid0000\r"]);
    }

    #[tokio::test]
    async fn orphan_responses_are_discarded() {
        let mut star = backend(&["C0RYid0099ry0300\rC0RYid0000ry0100 0200\r"]);
        let ys = star.request_y_positions().await.unwrap();
        assert_eq!(ys, vec![10.0, 20.0]);
    }

    #[tokio::test]
    async fn firmware_errors_map_to_the_taxonomy() {
        let mut star = backend(&["C0PPid0000er27/00\r"]);
        let err = star
            .send_command_raw(&CommandBuilder::new("C0", "PP"))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::PositionNotReachable));
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let mut star = backend(&[
            "C0MIid0000er03/00\r",
            "C0MIid0001er00/00\r",
        ]);
        star.pre_initialize_instrument().await.unwrap();
        assert_eq!(star.transport.sent.len(), 2);
    }

    #[tokio::test]
    async fn tip_type_indices_are_assigned_in_first_seen_order() {
        let mut star = backend(&["C0TTid0000\r", "C0TTid0001\r"]);
        let standard = Tip::standard_volume_with_filter();
        let high = Tip::high_volume_with_filter();
        assert_eq!(star.get_or_assign_tip_type_index(&standard).await.unwrap(), 0);
        // Same type again: no new registration, no new frame.
        assert_eq!(star.get_or_assign_tip_type_index(&standard).await.unwrap(), 0);
        assert_eq!(star.transport.sent.len(), 1);
        assert_eq!(star.get_or_assign_tip_type_index(&high).await.unwrap(), 1);
        assert_eq!(star.transport.sent.len(), 2);
    }

    #[tokio::test]
    async fn traversal_height_bounds() {
        let mut star = backend(&[]);
        assert!(star.set_channel_traversal_height(290.0).is_err());
        assert!(star.set_channel_traversal_height(0.0).is_err());
        star.set_channel_traversal_height(200.0).unwrap();
        assert_eq!(star.channel_traversal_height(), 200.0);
    }
}
