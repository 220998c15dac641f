//! Liquid-level probing with a single channel.
//!
//! The channel drives talk in encoder increments; the conversion factors
//! are fixed properties of the hardware. Capacitive probing (cLLD) works
//! with any conductive liquid; Z-touch probing pushes the tip onto the
//! surface and needs firmware from 2022 or later.

use regex::Regex;

use star_wire::{mm_to_tenths, CommandBuilder, FieldValue};

use crate::error::{BackendError, Result};
use crate::star::backend::{StarBackend, PIP_MODULES};
use crate::transport::Transport;

/// Z drive conversion, mm per encoder increment.
pub const Z_DRIVE_MM_PER_INCREMENT: f64 = 0.01072765;
/// Y drive conversion, mm per encoder increment.
pub const Y_DRIVE_MM_PER_INCREMENT: f64 = 0.046302082;

/// Mechanical z range of a channel head, mm.
const Z_RANGE_MM: (f64, f64) = (0.0, 334.0);

/// First firmware year supporting Z-touch probing.
const ZTOUCH_MIN_FIRMWARE_YEAR: u32 = 2022;

fn mm_to_z_increments(mm: f64) -> i64 {
    (mm / Z_DRIVE_MM_PER_INCREMENT).round() as i64
}

fn z_increments_to_mm(increments: i64) -> f64 {
    increments as f64 * Z_DRIVE_MM_PER_INCREMENT
}

/// Millimeters to y-drive increments; exposed for channel y moves that
/// need drive-native resolution.
pub fn mm_to_y_increments(mm: f64) -> i64 {
    (mm / Y_DRIVE_MM_PER_INCREMENT).round() as i64
}

impl<T: Transport> StarBackend<T> {
    fn pip_module(&self, channel: usize) -> Result<&'static str> {
        if channel >= self.num_channels() || channel >= PIP_MODULES.len() {
            return Err(BackendError::InvalidArgument(format!(
                "channel {channel} out of range, machine has {} channels",
                self.num_channels()
            )));
        }
        Ok(PIP_MODULES[channel])
    }

    /// Px RF: version string of one channel's firmware.
    pub async fn request_pip_channel_version(&mut self, channel: usize) -> Result<String> {
        let module = self.pip_module(channel)?;
        let resp = self
            .send_command_raw(&CommandBuilder::new(module, "RF"))
            .await?;
        Ok(resp.get(4..).unwrap_or_default().to_string())
    }

    /// Capacitive liquid-level search with one channel (Px ZL): descend
    /// from `start_height` toward `end_height` until the cLLD triggers,
    /// return the detected surface height in mm.
    pub async fn probe_z_height_using_channel(
        &mut self,
        channel: usize,
        start_height: f64,
        end_height: f64,
        seek_speed: f64,
    ) -> Result<f64> {
        self.ensure_setup()?;
        self.ensure_iswap_parked().await?;
        let module = self.pip_module(channel)?;
        if !(Z_RANGE_MM.0..=Z_RANGE_MM.1).contains(&start_height)
            || !(Z_RANGE_MM.0..=Z_RANGE_MM.1).contains(&end_height)
        {
            return Err(BackendError::InvalidArgument(format!(
                "probe heights {start_height}/{end_height} outside {Z_RANGE_MM:?} mm"
            )));
        }
        if end_height >= start_height {
            return Err(BackendError::InvalidArgument(
                "probe must descend: end height must be below start height".into(),
            ));
        }

        let builder = CommandBuilder::new(module, "ZL")
            .int_padded("zs", mm_to_z_increments(start_height), 5)
            .int_padded("ze", mm_to_z_increments(end_height), 5)
            .int_padded("zv", mm_to_z_increments(seek_speed), 4)
            .int_padded("th", mm_to_tenths(self.channel_traversal_height()), 4);
        let parsed = self.send_command(&builder, "lz#####").await?;
        let increments = parsed
            .get("lz")
            .and_then(FieldValue::as_int)
            .ok_or_else(|| BackendError::Protocol("ZL response without lz".into()))?;
        Ok(z_increments_to_mm(increments))
    }

    /// Z-touch liquid-level search with one channel (Px ZH). The drive
    /// reports where the tip tip touched; `tip_length_correction` (the
    /// mounted tip's length below the nose) converts that into the
    /// surface height.
    pub async fn ztouch_probe_z_height_using_channel(
        &mut self,
        channel: usize,
        start_height: f64,
        end_height: f64,
        tip_length_correction: f64,
    ) -> Result<f64> {
        self.ensure_setup()?;
        self.ensure_iswap_parked().await?;

        let version = self.request_pip_channel_version(channel).await?;
        let year = firmware_year(&version).ok_or_else(|| {
            BackendError::Protocol(format!("cannot read firmware year from '{version}'"))
        })?;
        if year < ZTOUCH_MIN_FIRMWARE_YEAR {
            return Err(BackendError::Unsupported(
                "Z-touch probing needs channel firmware from 2022 or later",
            ));
        }

        let module = self.pip_module(channel)?;
        if end_height >= start_height {
            return Err(BackendError::InvalidArgument(
                "probe must descend: end height must be below start height".into(),
            ));
        }
        let builder = CommandBuilder::new(module, "ZH")
            .int_padded("zs", mm_to_z_increments(start_height), 5)
            .int_padded("ze", mm_to_z_increments(end_height), 5)
            .int_padded("th", mm_to_tenths(self.channel_traversal_height()), 4);
        let parsed = self.send_command(&builder, "zh#####").await?;
        let increments = parsed
            .get("zh")
            .and_then(FieldValue::as_int)
            .ok_or_else(|| BackendError::Protocol("ZH response without zh".into()))?;
        Ok(z_increments_to_mm(increments) - tip_length_correction)
    }
}

/// Pull the release year out of a firmware version string like
/// `"1.0 2023-02-18"`.
fn firmware_year(version: &str) -> Option<u32> {
    let re = Regex::new(r"(\d{4})-\d{2}-\d{2}").ok()?;
    re.captures(version)?.get(1)?.as_str().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increment_conversions() {
        assert_eq!(mm_to_z_increments(100.0), 9322);
        assert!((z_increments_to_mm(9322) - 100.0).abs() < Z_DRIVE_MM_PER_INCREMENT);
        assert_eq!(mm_to_y_increments(100.0), 2160);
    }

    #[test]
    fn firmware_year_parses() {
        assert_eq!(firmware_year("1.0 2023-02-18"), Some(2023));
        assert_eq!(firmware_year("SV 4.5 2019-11-02 A"), Some(2019));
        assert_eq!(firmware_year("no date here"), None);
    }
}
