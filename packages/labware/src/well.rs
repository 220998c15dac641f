//! Wells and their liquid contents.

use serde::{Deserialize, Serialize};

use crate::errors::LabwareError;
use crate::liquid::Liquid;

/// Per-well liquid state: a stack of (liquid, volume-in-uL) layers, newest
/// on top, plus the geometry needed to compute the reachable bottom.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WellState {
    /// Thickness of the well floor in mm. The cavity bottom sits this far
    /// above the resource's outer bottom.
    pub material_z_thickness: f64,
    /// Maximum volume in uL.
    pub max_volume: f64,
    /// Liquid layers, bottom first.
    pub contents: Vec<(Liquid, f64)>,
}

impl WellState {
    pub fn new(material_z_thickness: f64, max_volume: f64) -> Self {
        Self {
            material_z_thickness,
            max_volume,
            contents: Vec::new(),
        }
    }

    pub fn total_volume(&self) -> f64 {
        self.contents.iter().map(|(_, v)| v).sum()
    }

    /// Add a layer on top.
    pub fn add_liquid(&mut self, liquid: Liquid, volume: f64) -> Result<(), LabwareError> {
        if volume < 0.0 {
            return Err(LabwareError::InvalidArgument(
                "liquid volume must be non-negative".into(),
            ));
        }
        if self.total_volume() + volume > self.max_volume {
            return Err(LabwareError::InvalidArgument(format!(
                "volume {} exceeds well capacity {}",
                self.total_volume() + volume,
                self.max_volume
            )));
        }
        self.contents.push((liquid, volume));
        Ok(())
    }

    /// Remove volume from the top layers. Returns the removed layers, top
    /// first, so a subsequent dispense can re-stack them elsewhere.
    pub fn remove_liquid(&mut self, mut volume: f64) -> Result<Vec<(Liquid, f64)>, LabwareError> {
        if volume > self.total_volume() + 1e-9 {
            return Err(LabwareError::InvalidArgument(format!(
                "cannot remove {volume} uL from well holding {} uL",
                self.total_volume()
            )));
        }
        let mut removed = Vec::new();
        while volume > 1e-9 {
            let (liquid, available) = match self.contents.pop() {
                Some(layer) => layer,
                None => break,
            };
            if available > volume {
                self.contents.push((liquid, available - volume));
                removed.push((liquid, volume));
                volume = 0.0;
            } else {
                removed.push((liquid, available));
                volume -= available;
            }
        }
        Ok(removed)
    }

    /// Topmost liquid, if any.
    pub fn top_liquid(&self) -> Option<Liquid> {
        self.contents.last().map(|(l, _)| *l)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_remove_layers() {
        let mut well = WellState::new(1.0, 400.0);
        well.add_liquid(Liquid::Water, 100.0).unwrap();
        well.add_liquid(Liquid::Ethanol, 50.0).unwrap();
        assert_eq!(well.total_volume(), 150.0);

        let removed = well.remove_liquid(75.0).unwrap();
        assert_eq!(removed, vec![(Liquid::Ethanol, 50.0), (Liquid::Water, 25.0)]);
        assert_eq!(well.total_volume(), 75.0);
        assert_eq!(well.top_liquid(), Some(Liquid::Water));
    }

    #[test]
    fn overfill_is_rejected() {
        let mut well = WellState::new(1.0, 100.0);
        well.add_liquid(Liquid::Water, 80.0).unwrap();
        assert!(well.add_liquid(Liquid::Water, 30.0).is_err());
        assert_eq!(well.total_volume(), 80.0);
    }

    #[test]
    fn over_aspiration_is_rejected() {
        let mut well = WellState::new(1.0, 100.0);
        well.add_liquid(Liquid::Water, 10.0).unwrap();
        assert!(well.remove_liquid(20.0).is_err());
    }
}
