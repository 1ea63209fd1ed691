// Copyright 2025 The FE-I4 Scan Authors
// SPDX-License-Identifier: Apache-2.0

//! Built-in FE-I4A and FE-I4B chip definitions.
//!
//! NOTE: Offsets count from the least significant bit of the 16-bit register
//!     word. DAC fields are stored with reversed bit order in the chip, which
//!     is expressed by `littleendian: false`.
use crate::definition::{
    CalibrationParameters, ChipDefinition, ChipFlavor, CommandDef, GlobalRegisterDef,
    PixelRegisterDef, PixelStrobe,
};

/// Chip ID addressing all chips on the command link.
pub const BROADCAST_CHIP_ID: u8 = 8;

struct CommandSpec {
    name: &'static str,
    bitlength: usize,
    bitstream: Option<&'static str>,
}

const fn cmd(name: &'static str, bitlength: usize, bitstream: &'static str) -> CommandSpec {
    CommandSpec {
        name,
        bitlength,
        bitstream: Some(bitstream),
    }
}

const fn field(name: &'static str, bitlength: usize) -> CommandSpec {
    CommandSpec {
        name,
        bitlength,
        bitstream: None,
    }
}

const COMMANDS: &[CommandSpec] = &[
    cmd("LV1", 5, "11101"),
    cmd("BCR", 9, "101100001"),
    cmd("ECR", 9, "101100010"),
    cmd("CAL", 9, "101100100"),
    cmd("SlowCommand", 9, "101101000"),
    cmd("RdRegister", 23, "SlowCommand + 0001 + ChipID + Address"),
    cmd(
        "WrRegister",
        39,
        "SlowCommand + 0010 + ChipID + Address + GlobalData",
    ),
    cmd(
        "WrFrontEnd",
        695,
        "SlowCommand + 0100 + ChipID + 000000 + PixelData",
    ),
    cmd("GlobalReset", 17, "SlowCommand + 1000 + ChipID"),
    cmd("GlobalPulse", 23, "SlowCommand + 1001 + ChipID + Width"),
    cmd("RunMode", 23, "SlowCommand + 1010 + ChipID + Mode"),
    field("ChipID", 4),
    field("Address", 6),
    field("GlobalData", 16),
    field("PixelData", 672),
    field("Width", 6),
    field("Mode", 6),
];

struct GlobalSpec {
    name: &'static str,
    address: u16,
    offset: u8,
    bitlength: u8,
    littleendian: bool,
    value: u64,
    readonly: bool,
}

/// DAC field, reversed bit order.
const fn dac(name: &'static str, address: u16, offset: u8, bitlength: u8, value: u64) -> GlobalSpec {
    GlobalSpec {
        name,
        address,
        offset,
        bitlength,
        littleendian: false,
        value,
        readonly: false,
    }
}

/// Configuration field, natural bit order.
const fn cnf(name: &'static str, address: u16, offset: u8, bitlength: u8, value: u64) -> GlobalSpec {
    GlobalSpec {
        name,
        address,
        offset,
        bitlength,
        littleendian: true,
        value,
        readonly: false,
    }
}

const GLOBAL_REGISTERS: &[GlobalSpec] = &[
    cnf("SmallHitErase", 1, 8, 1, 0),
    cnf("Eventlimit", 1, 0, 8, 0),
    cnf("Trig_Count", 2, 12, 4, 1),
    cnf("Conf_AddrEnable", 2, 11, 1, 1),
    cnf("ErrorMask_0", 3, 0, 16, 0x4600),
    cnf("ErrorMask_1", 4, 0, 16, 0x0040),
    dac("PrmpVbp_R", 5, 8, 8, 43),
    dac("BufVgOpAmp", 5, 0, 8, 160),
    dac("PrmpVbp", 6, 0, 8, 43),
    dac("TDACVbp", 7, 8, 8, 150),
    dac("DisVbn", 7, 0, 8, 40),
    dac("Amp2Vbn", 8, 8, 8, 79),
    dac("Amp2VbpFol", 8, 0, 8, 26),
    dac("Amp2Vbp", 9, 0, 8, 85),
    dac("FDACVbn", 10, 8, 8, 30),
    dac("Amp2Vbpff", 10, 0, 8, 50),
    dac("PrmpVbnFol", 11, 8, 8, 106),
    dac("PrmpVbp_L", 11, 0, 8, 43),
    dac("PrmpVbpf", 12, 8, 8, 100),
    dac("PrmpVbnLCC", 12, 0, 8, 0),
    cnf("S1", 13, 15, 1, 0),
    cnf("S0", 13, 14, 1, 0),
    cnf("Pixel_Strobes", 13, 1, 13, 0),
    dac("LVDSDrvIref", 14, 8, 8, 171),
    dac("GADCCompBias", 14, 0, 8, 100),
    dac("PllIbias", 15, 8, 8, 88),
    dac("LVDSDrvVos", 15, 0, 8, 105),
    dac("TempSensIbias", 16, 8, 8, 0),
    dac("PllIcp", 16, 0, 8, 28),
    dac("PlsrIDACRamp", 17, 0, 8, 213),
    dac("VrefDigTune", 18, 8, 8, 100),
    dac("PlsrVgOpAmp", 18, 0, 8, 255),
    dac("PlsrDACbias", 19, 8, 8, 96),
    dac("VrefAnTune", 19, 0, 8, 50),
    dac("Vthin_AltCoarse", 20, 8, 8, 0),
    dac("Vthin_AltFine", 20, 0, 8, 150),
    cnf("HITLD_IN", 21, 12, 1, 0),
    cnf("DINJ_OVERRIDE", 21, 11, 1, 0),
    cnf("DIGHITIN_SEL", 21, 10, 1, 0),
    dac("PlsrDAC", 21, 0, 10, 54),
    cnf("Colpr_Mode", 22, 8, 2, 0),
    cnf("Colpr_Addr", 22, 2, 6, 0),
    cnf("DisableColumnCnfg", 23, 0, 40, 0),
    cnf("Trig_Lat", 25, 8, 8, 210),
    cnf("CMDcnt", 26, 3, 13, 11),
    cnf("StopModeCnfg", 26, 2, 1, 0),
    cnf("HitDiscCnfg", 26, 0, 2, 0),
    cnf("PLL_Enable", 27, 15, 1, 1),
    cnf("Efuse_Sense", 27, 14, 1, 0),
    cnf("StopClkPulse", 27, 13, 1, 0),
    cnf("ReadErrorReq", 27, 12, 1, 0),
    cnf("GADC_En", 27, 10, 1, 0),
    cnf("SR_Read", 27, 9, 1, 0),
    cnf("GateHitOr", 27, 5, 1, 0),
    cnf("CalEn", 27, 3, 1, 0),
    cnf("SR_Clr", 27, 2, 1, 0),
    cnf("Latch_En", 27, 1, 1, 0),
    cnf("SR_Clock", 27, 0, 1, 0),
    cnf("LVDSDrvSet06", 28, 15, 1, 1),
    cnf("EN_40M", 28, 9, 1, 1),
    cnf("EN_80M", 28, 8, 1, 0),
    cnf("CLK1", 28, 5, 3, 0),
    cnf("CLK0", 28, 2, 3, 4),
    cnf("EN_160M", 28, 1, 1, 1),
    cnf("EN_320M", 28, 0, 1, 0),
    cnf("No8b10b", 29, 13, 1, 0),
    cnf("Clk2OutCnfg", 29, 12, 1, 0),
    cnf("EmptyRecordCnfg", 29, 4, 8, 0),
    cnf("LVDSDrvEn", 29, 2, 1, 1),
    cnf("LVDSDrvSet30", 29, 1, 1, 1),
    cnf("LVDSDrvSet12", 29, 0, 1, 1),
    cnf("TempSensDiodeSel", 30, 14, 2, 0),
    cnf("TempSensDisable", 30, 13, 1, 0),
    cnf("IleakRange", 30, 12, 1, 0),
    cnf("PlsrRiseUpTau", 31, 13, 3, 7),
    cnf("PlsrPwr", 31, 12, 1, 1),
    cnf("PlsrDelay", 31, 6, 6, 2),
    cnf("ExtDigCalSW", 31, 5, 1, 0),
    cnf("ExtAnaCalSW", 31, 4, 1, 0),
    cnf("GADCSel", 31, 0, 3, 0),
    cnf("SELB", 32, 0, 40, 0),
    cnf("PrmpVbpMsnEn", 34, 12, 1, 0),
    GlobalSpec {
        name: "Chip_SN",
        address: 35,
        offset: 0,
        bitlength: 16,
        littleendian: true,
        value: 0,
        readonly: true,
    },
];

/// Registers which only exist on FE-I4A.
const GLOBAL_REGISTERS_FEI4A: &[GlobalSpec] = &[cnf("ReadSkipped", 27, 11, 1, 0)];

/// Registers which only exist on FE-I4B.
const FEI4B_ONLY: &[&str] = &["SmallHitErase", "Eventlimit"];

struct PixelSpec {
    name: &'static str,
    pxstrobe: PixelStrobe,
    bitlength: u8,
    littleendian: bool,
    value: u8,
}

const PIXEL_REGISTERS: &[PixelSpec] = &[
    PixelSpec {
        name: "Enable",
        pxstrobe: PixelStrobe::Strobe(0),
        bitlength: 1,
        littleendian: false,
        value: 1,
    },
    PixelSpec {
        name: "TDAC",
        pxstrobe: PixelStrobe::Strobe(1),
        bitlength: 5,
        littleendian: true,
        value: 15,
    },
    PixelSpec {
        name: "C_High",
        pxstrobe: PixelStrobe::Strobe(6),
        bitlength: 1,
        littleendian: false,
        value: 1,
    },
    PixelSpec {
        name: "C_Low",
        pxstrobe: PixelStrobe::Strobe(7),
        bitlength: 1,
        littleendian: false,
        value: 1,
    },
    PixelSpec {
        name: "Imon",
        pxstrobe: PixelStrobe::Strobe(8),
        bitlength: 1,
        littleendian: false,
        value: 0,
    },
    PixelSpec {
        name: "FDAC",
        pxstrobe: PixelStrobe::Strobe(9),
        bitlength: 4,
        littleendian: false,
        value: 7,
    },
    PixelSpec {
        name: "EnableDigInj",
        pxstrobe: PixelStrobe::DirectShift,
        bitlength: 1,
        littleendian: false,
        value: 0,
    },
];

impl ChipDefinition {
    /// The built-in definition of the given chip flavor.
    pub fn builtin(flavor: ChipFlavor) -> Self {
        let commands = COMMANDS
            .iter()
            .map(|c| CommandDef {
                name: c.name.to_string(),
                bitlength: c.bitlength,
                bitstream: c.bitstream.map(str::to_string),
            })
            .collect();
        let extra: &[GlobalSpec] = match flavor {
            ChipFlavor::Fei4a => GLOBAL_REGISTERS_FEI4A,
            ChipFlavor::Fei4b => &[],
        };
        let global_registers = GLOBAL_REGISTERS
            .iter()
            .chain(extra)
            .filter(|r| flavor == ChipFlavor::Fei4b || !FEI4B_ONLY.contains(&r.name))
            .map(|r| GlobalRegisterDef {
                name: r.name.to_string(),
                address: r.address,
                offset: r.offset,
                bitlength: r.bitlength,
                littleendian: r.littleendian,
                register_littleendian: false,
                value: Some(r.value),
                readonly: r.readonly,
            })
            .collect();
        let pixel_registers = PIXEL_REGISTERS
            .iter()
            .map(|p| PixelRegisterDef {
                // FE-I4A calls the current monitor bit HitBus
                name: match (flavor, p.name) {
                    (ChipFlavor::Fei4a, "Imon") => "HitBus".to_string(),
                    _ => p.name.to_string(),
                },
                pxstrobe: p.pxstrobe,
                bitlength: p.bitlength,
                littleendian: p.littleendian,
                value: p.value,
            })
            .collect();
        ChipDefinition {
            flavor,
            chip_id: BROADCAST_CHIP_ID,
            commands,
            global_registers,
            pixel_registers,
            calibration: CalibrationParameters::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flavor_specific_registers() {
        let a = ChipDefinition::builtin(ChipFlavor::Fei4a);
        let b = ChipDefinition::builtin(ChipFlavor::Fei4b);
        let has = |d: &ChipDefinition, name: &str| d.global_registers.iter().any(|r| r.name == name);
        assert!(has(&a, "ReadSkipped"));
        assert!(!has(&b, "ReadSkipped"));
        assert!(has(&b, "Eventlimit"));
        assert!(!has(&a, "Eventlimit"));
        assert!(a.pixel_registers.iter().any(|p| p.name == "HitBus"));
        assert!(b.pixel_registers.iter().any(|p| p.name == "Imon"));
    }

    #[test]
    fn test_default_values_fit() {
        for r in &ChipDefinition::builtin(ChipFlavor::Fei4b).global_registers {
            let value = r.value.unwrap();
            assert!(value < 1u64 << r.bitlength, "{}", r.name);
        }
    }

    #[test]
    fn test_strobe_offsets_unique() {
        let mut used = 0u32;
        for p in PIXEL_REGISTERS {
            if let Some(offset) = p.pxstrobe.offset() {
                for bit in 0..p.bitlength {
                    let mask = 1 << (offset + bit);
                    assert_eq!(used & mask, 0, "{}", p.name);
                    used |= mask;
                }
            }
        }
        // All 13 Pixel_Strobes bits are used.
        assert_eq!(used, (1 << 13) - 1);
    }
}
