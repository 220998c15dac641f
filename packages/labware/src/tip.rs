//! Tips and tip spots.
//!
//! A tip spot holds at most one tip. What kind of tip it produces is a
//! serializable recipe (a parameter bundle), so layouts containing tip
//! racks round-trip through JSON without ever serializing code.

use serde::{Deserialize, Serialize};

/// Size class of a Hamilton channel tip. Decides empirical pickup-height
/// corrections and liquid-class selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TipSize {
    LowVolume,
    StandardVolume,
    HighVolume,
    Core384,
    XlChannel,
}

/// Firmware tip pickup mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TipPickupMethod {
    OutOfRack = 0,
    OutOfWashLiquid = 1,
}

/// Firmware tip drop mode. `Drop` is fast; `PlaceShift` sets tips down
/// gently and is required off-rack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TipDropMethod {
    Place = 0,
    PlaceShift = 1,
    Drop = 2,
}

/// A pipetting tip, described by the geometry the firmware needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tip {
    /// Full length of the tip in mm, cone included.
    pub total_tip_length: f64,
    /// How far the channel nose slides into the tip, mm.
    pub fitting_depth: f64,
    /// Nominal maximum volume in uL.
    pub maximal_volume: f64,
    pub has_filter: bool,
    pub size: TipSize,
    pub pickup_method: TipPickupMethod,
}

impl Tip {
    /// Standard volume (300 uL class) tip with filter, as found on STF
    /// racks.
    pub fn standard_volume_with_filter() -> Self {
        Self {
            total_tip_length: 59.9,
            fitting_depth: 8.0,
            maximal_volume: 360.0,
            has_filter: true,
            size: TipSize::StandardVolume,
            pickup_method: TipPickupMethod::OutOfRack,
        }
    }

    /// Standard volume tip without filter (ST racks).
    pub fn standard_volume() -> Self {
        Self {
            has_filter: false,
            ..Self::standard_volume_with_filter()
        }
    }

    /// Low volume (10 uL class) tip with filter.
    pub fn low_volume_with_filter() -> Self {
        Self {
            total_tip_length: 29.9,
            fitting_depth: 8.0,
            maximal_volume: 15.0,
            has_filter: true,
            size: TipSize::LowVolume,
            pickup_method: TipPickupMethod::OutOfRack,
        }
    }

    /// High volume (1000 uL class) tip with filter.
    pub fn high_volume_with_filter() -> Self {
        Self {
            total_tip_length: 95.1,
            fitting_depth: 8.0,
            maximal_volume: 1065.0,
            has_filter: true,
            size: TipSize::HighVolume,
            pickup_method: TipPickupMethod::OutOfRack,
        }
    }
}

/// State carried by a tip spot: the recipe for the tip it dispenses and
/// whether one is currently present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TipSpotState {
    pub tip: Tip,
    pub has_tip: bool,
}

impl TipSpotState {
    pub fn new(tip: Tip, with_tip: bool) -> Self {
        Self { tip, has_tip: with_tip }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recipe_round_trips_as_json() {
        let state = TipSpotState::new(Tip::standard_volume_with_filter(), true);
        let json = serde_json::to_value(&state).unwrap();
        let back: TipSpotState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
        assert_eq!(back.tip.total_tip_length, 59.9);
    }
}
