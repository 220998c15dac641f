//! Liquid kinds.
//!
//! Backends use the liquid kind to select aspiration/dispense parameter
//! bundles (the equivalent of VENUS "liquid classes").

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Liquid {
    Water,
    Ethanol,
    Glycerin,
    Glycerin80,
    Dmso,
    Plasma,
    Serum,
    Acetonitrile,
    Blood,
    Chloroform,
    Methanol,
    Octanol,
    PbsBuffer,
}

impl Liquid {
    /// Parse the names used in exported Hamilton liquid-class tables. Some
    /// liquids appear under more than one name there.
    pub fn from_str_loose(s: &str) -> Option<Self> {
        let s = s.trim().trim_end_matches(" for aliquot").trim();
        Some(match s {
            "Water" | "SysFlWater" => Self::Water,
            "EtOH" | "Ethanol" | "EtOH 100%" | "Ethanol 100%" => Self::Ethanol,
            "Glycerin" => Self::Glycerin,
            "Glycerin80" | "Glycerin 80%" => Self::Glycerin80,
            "DMSO" | "Dimethylsulfoxid 100%" => Self::Dmso,
            "Plasma" | "Plasma 100%" => Self::Plasma,
            "Serum" | "Serum 100%" => Self::Serum,
            "Acetonitril" | "Acetonitril 100%" | "Acetonitrile" | "Acetonitrile 100%" => {
                Self::Acetonitrile
            }
            "Blood" | "Blood (completely)" => Self::Blood,
            "Chloroform 100%" => Self::Chloroform,
            "Methanol 100%" => Self::Methanol,
            "Octanol 100%" => Self::Octanol,
            "PBS Buffer" => Self::PbsBuffer,
            _ => return None,
        })
    }
}
