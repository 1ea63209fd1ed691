// Copyright 2025 The FE-I4 Scan Authors
// SPDX-License-Identifier: Apache-2.0

//! Pre-parsed chip definition.
//!
//! The definition is the declarative description of the chip: commands and
//! their bitstream templates, global registers with their position inside the
//! 16-bit register words, and pixel registers with their strobe bits.
//! Parsing the vendor XML is done elsewhere; this module accepts the already
//! parsed descriptors, either built in ([`ChipDefinition::builtin`]) or as JSON.
use crate::{DOUBLE_COLUMNS, Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChipFlavor {
    #[serde(rename = "fei4a")]
    Fei4a,
    #[serde(rename = "fei4b")]
    Fei4b,
}

impl FromStr for ChipFlavor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "fei4a" => Ok(ChipFlavor::Fei4a),
            "fei4b" => Ok(ChipFlavor::Fei4b),
            _ => Err(Error::configuration(format!("Unknown chip flavor '{s}'"))),
        }
    }
}

impl fmt::Display for ChipFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChipFlavor::Fei4a => write!(f, "fei4a"),
            ChipFlavor::Fei4b => write!(f, "fei4b"),
        }
    }
}

/// How a pixel register bit is transferred into the pixel latches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawPixelStrobe", into = "RawPixelStrobe")]
pub enum PixelStrobe {
    /// Latched with the `Pixel_Strobes` bit at this offset.
    Strobe(u8),
    /// Lives in the shift register itself, no latch.
    DirectShift,
}

impl PixelStrobe {
    pub fn offset(&self) -> Option<u8> {
        match self {
            PixelStrobe::Strobe(offset) => Some(*offset),
            PixelStrobe::DirectShift => None,
        }
    }
}

/// Serialized form: an integer strobe offset or the `"SR"` sentinel.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawPixelStrobe {
    Offset(u8),
    Sentinel(String),
}

impl TryFrom<RawPixelStrobe> for PixelStrobe {
    type Error = String;

    fn try_from(value: RawPixelStrobe) -> std::result::Result<Self, Self::Error> {
        match value {
            RawPixelStrobe::Offset(offset) => Ok(PixelStrobe::Strobe(offset)),
            RawPixelStrobe::Sentinel(s) if s.eq_ignore_ascii_case("sr") => {
                Ok(PixelStrobe::DirectShift)
            }
            RawPixelStrobe::Sentinel(s) => Err(format!("Invalid pixel strobe '{s}'")),
        }
    }
}

impl From<PixelStrobe> for RawPixelStrobe {
    fn from(value: PixelStrobe) -> Self {
        match value {
            PixelStrobe::Strobe(offset) => RawPixelStrobe::Offset(offset),
            PixelStrobe::DirectShift => RawPixelStrobe::Sentinel("SR".to_string()),
        }
    }
}

/// A command or, if `bitstream` is absent, a parameter field of `bitlength` bits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandDef {
    pub name: String,
    pub bitlength: usize,
    #[serde(default)]
    pub bitstream: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalRegisterDef {
    pub name: String,
    pub address: u16,
    pub offset: u8,
    pub bitlength: u8,
    #[serde(default)]
    pub littleendian: bool,
    #[serde(default)]
    pub register_littleendian: bool,
    /// Default value. Registers without a default are reported as not set.
    #[serde(default)]
    pub value: Option<u64>,
    #[serde(default)]
    pub readonly: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRegisterDef {
    pub name: String,
    pub pxstrobe: PixelStrobe,
    pub bitlength: u8,
    #[serde(default)]
    pub littleendian: bool,
    #[serde(default)]
    pub value: u8,
}

/// PlsrDAC corrections per double column, one table per injection capacitance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationParameters {
    #[serde(rename = "Pulser_Corr_C_Inj_Low")]
    pub pulser_corr_c_inj_low: Vec<f64>,
    #[serde(rename = "Pulser_Corr_C_Inj_Med")]
    pub pulser_corr_c_inj_med: Vec<f64>,
    #[serde(rename = "Pulser_Corr_C_Inj_High")]
    pub pulser_corr_c_inj_high: Vec<f64>,
}

impl Default for CalibrationParameters {
    fn default() -> Self {
        CalibrationParameters {
            pulser_corr_c_inj_low: vec![0.0; DOUBLE_COLUMNS],
            pulser_corr_c_inj_med: vec![0.0; DOUBLE_COLUMNS],
            pulser_corr_c_inj_high: vec![0.0; DOUBLE_COLUMNS],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChipDefinition {
    pub flavor: ChipFlavor,
    /// Chip address on the command link, 8 addresses all chips (broadcast).
    #[serde(default = "default_chip_id")]
    pub chip_id: u8,
    pub commands: Vec<CommandDef>,
    pub global_registers: Vec<GlobalRegisterDef>,
    pub pixel_registers: Vec<PixelRegisterDef>,
    #[serde(default)]
    pub calibration: CalibrationParameters,
}

fn default_chip_id() -> u8 {
    crate::builtin::BROADCAST_CHIP_ID
}

impl ChipDefinition {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::configuration(format!("Invalid chip definition: {e}")))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Anyhow(e.into()))
    }
}
