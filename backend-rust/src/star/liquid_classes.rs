//! Hamilton liquid classes.
//!
//! A liquid class is a bundle of empirically tuned aspiration and
//! dispense parameters, keyed by the combination of tip volume class,
//! head type, tip presence, filter, liquid, jet and blow-out. The table
//! here carries the classes the backend's operations reach for; a missed
//! lookup makes the orchestrator fall back to per-field defaults.

use labware::Liquid;

/// Lookup key: (tip volume uL, 96-head, is tip (not needle), has filter,
/// liquid, jet, blow out).
pub type LiquidClassKey = (u32, bool, bool, bool, Liquid, bool, bool);

/// One tuned parameter bundle. Volumes in uL, flow rates in uL/s,
/// heights in mm, times in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct HamiltonLiquidClass {
    /// Volume correction curve as (target, corrected) pairs, ascending.
    pub curve: &'static [(f64, f64)],
    pub aspiration_flow_rate: f64,
    pub aspiration_mix_flow_rate: f64,
    pub aspiration_air_transport_volume: f64,
    pub aspiration_blow_out_volume: f64,
    pub aspiration_swap_speed: f64,
    pub aspiration_settling_time: f64,
    pub aspiration_over_aspirate_volume: f64,
    pub aspiration_clot_retract_height: f64,
    pub dispense_flow_rate: f64,
    pub dispense_mode: f64,
    pub dispense_mix_flow_rate: f64,
    pub dispense_air_transport_volume: f64,
    pub dispense_blow_out_volume: f64,
    pub dispense_swap_speed: f64,
    pub dispense_settling_time: f64,
    pub dispense_stop_flow_rate: f64,
    pub dispense_stop_back_volume: f64,
}

impl HamiltonLiquidClass {
    /// Apply the correction curve to a target volume by linear
    /// interpolation; outside the curve the nearest segment extrapolates.
    pub fn compute_corrected_volume(&self, volume: f64) -> f64 {
        if self.curve.is_empty() {
            return volume;
        }
        if self.curve.len() == 1 {
            let (target, corrected) = self.curve[0];
            return volume * corrected / target;
        }
        let mut lower = self.curve[0];
        let mut upper = self.curve[self.curve.len() - 1];
        for window in self.curve.windows(2) {
            if volume >= window[0].0 && volume <= window[1].0 {
                lower = window[0];
                upper = window[1];
                break;
            }
        }
        if volume < self.curve[0].0 {
            lower = self.curve[0];
            upper = self.curve[1];
        } else if volume > self.curve[self.curve.len() - 1].0 {
            lower = self.curve[self.curve.len() - 2];
            upper = self.curve[self.curve.len() - 1];
        }
        let (x0, y0) = lower;
        let (x1, y1) = upper;
        y0 + (volume - x0) * (y1 - y0) / (x1 - x0)
    }
}

const STANDARD_WATER_CURVE: [(f64, f64); 6] = [
    (1.0, 1.3),
    (5.0, 5.8),
    (10.0, 11.1),
    (50.0, 52.9),
    (100.0, 104.8),
    (300.0, 308.4),
];

const STANDARD_WATER_JET: HamiltonLiquidClass = HamiltonLiquidClass {
    curve: &STANDARD_WATER_CURVE,
    aspiration_flow_rate: 100.0,
    aspiration_mix_flow_rate: 100.0,
    aspiration_air_transport_volume: 5.0,
    aspiration_blow_out_volume: 30.0,
    aspiration_swap_speed: 2.0,
    aspiration_settling_time: 1.0,
    aspiration_over_aspirate_volume: 0.0,
    aspiration_clot_retract_height: 0.0,
    dispense_flow_rate: 400.0,
    dispense_mode: 1.0,
    dispense_mix_flow_rate: 100.0,
    dispense_air_transport_volume: 5.0,
    dispense_blow_out_volume: 30.0,
    dispense_swap_speed: 1.0,
    dispense_settling_time: 0.0,
    dispense_stop_flow_rate: 250.0,
    dispense_stop_back_volume: 0.0,
};

const STANDARD_WATER_SURFACE: HamiltonLiquidClass = HamiltonLiquidClass {
    curve: &STANDARD_WATER_CURVE,
    aspiration_flow_rate: 100.0,
    aspiration_mix_flow_rate: 100.0,
    aspiration_air_transport_volume: 0.0,
    aspiration_blow_out_volume: 0.0,
    aspiration_swap_speed: 2.0,
    aspiration_settling_time: 1.0,
    aspiration_over_aspirate_volume: 0.0,
    aspiration_clot_retract_height: 0.0,
    dispense_flow_rate: 120.0,
    dispense_mode: 2.0,
    dispense_mix_flow_rate: 120.0,
    dispense_air_transport_volume: 0.0,
    dispense_blow_out_volume: 0.0,
    dispense_swap_speed: 2.0,
    dispense_settling_time: 0.5,
    dispense_stop_flow_rate: 5.0,
    dispense_stop_back_volume: 0.0,
};

const HIGH_WATER_CURVE: [(f64, f64); 5] = [
    (10.0, 11.3),
    (50.0, 52.4),
    (100.0, 103.5),
    (500.0, 511.8),
    (1000.0, 1019.0),
];

const HIGH_WATER_JET: HamiltonLiquidClass = HamiltonLiquidClass {
    curve: &HIGH_WATER_CURVE,
    aspiration_flow_rate: 250.0,
    aspiration_mix_flow_rate: 250.0,
    aspiration_air_transport_volume: 5.0,
    aspiration_blow_out_volume: 40.0,
    aspiration_swap_speed: 2.0,
    aspiration_settling_time: 1.0,
    aspiration_over_aspirate_volume: 0.0,
    aspiration_clot_retract_height: 0.0,
    dispense_flow_rate: 500.0,
    dispense_mode: 1.0,
    dispense_mix_flow_rate: 250.0,
    dispense_air_transport_volume: 5.0,
    dispense_blow_out_volume: 40.0,
    dispense_swap_speed: 1.0,
    dispense_settling_time: 0.0,
    dispense_stop_flow_rate: 250.0,
    dispense_stop_back_volume: 0.0,
};

const LOW_WATER_CURVE: [(f64, f64); 4] = [(0.5, 0.8), (1.0, 1.4), (5.0, 5.7), (10.0, 10.9)];

const LOW_WATER_SURFACE: HamiltonLiquidClass = HamiltonLiquidClass {
    curve: &LOW_WATER_CURVE,
    aspiration_flow_rate: 25.0,
    aspiration_mix_flow_rate: 25.0,
    aspiration_air_transport_volume: 0.0,
    aspiration_blow_out_volume: 0.0,
    aspiration_swap_speed: 2.0,
    aspiration_settling_time: 0.5,
    aspiration_over_aspirate_volume: 0.0,
    aspiration_clot_retract_height: 0.0,
    dispense_flow_rate: 25.0,
    dispense_mode: 2.0,
    dispense_mix_flow_rate: 25.0,
    dispense_air_transport_volume: 0.0,
    dispense_blow_out_volume: 0.0,
    dispense_swap_speed: 2.0,
    dispense_settling_time: 0.5,
    dispense_stop_flow_rate: 2.0,
    dispense_stop_back_volume: 0.0,
};

const CORE96_WATER_JET: HamiltonLiquidClass = HamiltonLiquidClass {
    curve: &STANDARD_WATER_CURVE,
    aspiration_flow_rate: 150.0,
    aspiration_mix_flow_rate: 150.0,
    aspiration_air_transport_volume: 5.0,
    aspiration_blow_out_volume: 30.0,
    aspiration_swap_speed: 2.0,
    aspiration_settling_time: 1.0,
    aspiration_over_aspirate_volume: 0.0,
    aspiration_clot_retract_height: 0.0,
    dispense_flow_rate: 400.0,
    dispense_mode: 1.0,
    dispense_mix_flow_rate: 150.0,
    dispense_air_transport_volume: 5.0,
    dispense_blow_out_volume: 30.0,
    dispense_swap_speed: 1.0,
    dispense_settling_time: 0.0,
    dispense_stop_flow_rate: 250.0,
    dispense_stop_back_volume: 0.0,
};

const STANDARD_ETHANOL_SURFACE: HamiltonLiquidClass = HamiltonLiquidClass {
    curve: &STANDARD_WATER_CURVE,
    aspiration_flow_rate: 75.0,
    aspiration_mix_flow_rate: 75.0,
    aspiration_air_transport_volume: 3.0,
    aspiration_blow_out_volume: 0.0,
    aspiration_swap_speed: 1.0,
    aspiration_settling_time: 2.0,
    aspiration_over_aspirate_volume: 3.0,
    aspiration_clot_retract_height: 0.0,
    dispense_flow_rate: 100.0,
    dispense_mode: 2.0,
    dispense_mix_flow_rate: 100.0,
    dispense_air_transport_volume: 3.0,
    dispense_blow_out_volume: 0.0,
    dispense_swap_speed: 1.0,
    dispense_settling_time: 1.0,
    dispense_stop_flow_rate: 5.0,
    dispense_stop_back_volume: 0.0,
};

/// Look up the tuned class for a key. Filtered and unfiltered tips share
/// their bundle; the filter bit only matters where a dedicated class
/// exists.
pub fn liquid_class(key: &LiquidClassKey) -> Option<&'static HamiltonLiquidClass> {
    let (tip_volume, core, tip, _filter, liquid, jet, blow_out) = *key;
    if !tip {
        return None;
    }
    match (tip_volume, core, liquid, jet, blow_out) {
        (300, false, Liquid::Water, true, true) => Some(&STANDARD_WATER_JET),
        (300, false, Liquid::Water, false, false) => Some(&STANDARD_WATER_SURFACE),
        (1000, false, Liquid::Water, true, true) => Some(&HIGH_WATER_JET),
        (10, false, Liquid::Water, false, false) => Some(&LOW_WATER_SURFACE),
        (300, true, Liquid::Water, true, true) => Some(&CORE96_WATER_JET),
        (300, false, Liquid::Ethanol, false, false) => Some(&STANDARD_ETHANOL_SURFACE),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_hits_and_misses() {
        let hit = liquid_class(&(300, false, true, true, Liquid::Water, true, true));
        assert!(hit.is_some());
        let miss = liquid_class(&(300, false, true, true, Liquid::Blood, true, true));
        assert!(miss.is_none());
        // Needles have no classes here.
        let needle = liquid_class(&(300, false, false, false, Liquid::Water, true, true));
        assert!(needle.is_none());
    }

    #[test]
    fn corrected_volume_interpolates() {
        let class = &STANDARD_WATER_JET;
        // Exactly on a curve point.
        assert!((class.compute_corrected_volume(100.0) - 104.8).abs() < 1e-9);
        // Between 100 and 300: halfway.
        let mid = class.compute_corrected_volume(200.0);
        assert!((mid - (104.8 + 308.4) / 2.0).abs() < 1e-9);
    }

    #[test]
    fn corrected_volume_extrapolates_at_the_edges() {
        let class = &STANDARD_WATER_JET;
        let above = class.compute_corrected_volume(400.0);
        assert!(above > 308.4);
    }
}
