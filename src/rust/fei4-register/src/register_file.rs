// Copyright 2025 The FE-I4 Scan Authors
// SPDX-License-Identifier: Apache-2.0

//! Live register state of one front-end chip.
use crate::definition::{
    CalibrationParameters, ChipDefinition, ChipFlavor, GlobalRegisterDef, PixelRegisterDef,
    PixelStrobe,
};
use crate::encoder::CommandSet;
use crate::restore_point::RestorePointStack;
use crate::{Error, PixelMatrix, Result};
use anyhow::Context;
use std::collections::{BTreeSet, HashSet};
use std::ops::Range;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalRegister {
    name: String,
    address: u16,
    offset: u8,
    bitlength: u8,
    littleendian: bool,
    register_littleendian: bool,
    pub(crate) value: u64,
    readonly: bool,
    pub(crate) not_set: bool,
}

impl GlobalRegister {
    fn from_def(def: &GlobalRegisterDef) -> Result<Self> {
        if def.bitlength == 0 || def.bitlength > 64 {
            return Err(Error::configuration(format!(
                "Global register '{}' has invalid bit length {}",
                def.name, def.bitlength
            )));
        }
        if def.offset >= 16 {
            return Err(Error::configuration(format!(
                "Global register '{}' has offset {} outside of the 16-bit word",
                def.name, def.offset
            )));
        }
        let register = GlobalRegister {
            name: def.name.clone(),
            address: def.address,
            offset: def.offset,
            bitlength: def.bitlength,
            littleendian: def.littleendian,
            register_littleendian: def.register_littleendian,
            value: def.value.unwrap_or_default(),
            readonly: def.readonly,
            not_set: def.value.is_none(),
        };
        register.validate(register.value)?;
        Ok(register)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    pub fn offset(&self) -> u8 {
        self.offset
    }

    pub fn bitlength(&self) -> u8 {
        self.bitlength
    }

    pub fn littleendian(&self) -> bool {
        self.littleendian
    }

    pub fn register_littleendian(&self) -> bool {
        self.register_littleendian
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn readonly(&self) -> bool {
        self.readonly
    }

    pub fn not_set(&self) -> bool {
        self.not_set
    }

    pub fn max_value(&self) -> u64 {
        u64::MAX >> (64 - u32::from(self.bitlength))
    }

    /// The 16-bit register words occupied by this register.
    pub fn addresses(&self) -> Range<u16> {
        let words = (u16::from(self.offset) + u16::from(self.bitlength)).div_ceil(16);
        self.address..self.address + words
    }

    /// Absolute bit positions `[16 * address + offset, + bitlength)`.
    pub(crate) fn bit_range(&self) -> Range<i64> {
        let start = 16 * i64::from(self.address) + i64::from(self.offset);
        start..start + i64::from(self.bitlength)
    }

    pub fn overlaps_address(&self, address: u16) -> bool {
        let word_start = 16 * i64::from(address);
        let range = self.bit_range();
        range.start < word_start + 16 && range.end > word_start
    }

    fn validate(&self, value: u64) -> Result<()> {
        if value > self.max_value() {
            return Err(Error::validation(format!(
                "Value {value} exceeds the range of global register '{}' ({} bits)",
                self.name, self.bitlength
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelRegister {
    name: String,
    pxstrobe: PixelStrobe,
    bitlength: u8,
    littleendian: bool,
    pub(crate) value: PixelMatrix,
}

impl PixelRegister {
    fn from_def(def: &PixelRegisterDef) -> Result<Self> {
        if def.bitlength == 0 || def.bitlength > 8 {
            return Err(Error::configuration(format!(
                "Pixel register '{}' has invalid bit length {}",
                def.name, def.bitlength
            )));
        }
        let register = PixelRegister {
            name: def.name.clone(),
            pxstrobe: def.pxstrobe,
            bitlength: def.bitlength,
            littleendian: def.littleendian,
            value: PixelMatrix::filled(def.value),
        };
        register.validate(&register.value)?;
        Ok(register)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pxstrobe(&self) -> PixelStrobe {
        self.pxstrobe
    }

    pub fn bitlength(&self) -> u8 {
        self.bitlength
    }

    pub fn littleendian(&self) -> bool {
        self.littleendian
    }

    pub fn value(&self) -> &PixelMatrix {
        &self.value
    }

    pub fn max_value(&self) -> u8 {
        (u16::MAX >> (16 - u16::from(self.bitlength))) as u8
    }

    fn validate(&self, value: &PixelMatrix) -> Result<()> {
        if value.max_value() > self.max_value() {
            return Err(Error::validation(format!(
                "Value {} exceeds the range of pixel register '{}' ({} bits)",
                value.max_value(),
                self.name,
                self.bitlength
            )));
        }
        Ok(())
    }
}

/// New content for a pixel register.
#[derive(Debug, Clone)]
pub enum PixelValue {
    /// Same value for every pixel.
    Scalar(u8),
    Matrix(PixelMatrix),
    /// Mask or DAC file, read by the registered [`PixelFileReader`].
    File(PathBuf),
}

impl From<u8> for PixelValue {
    fn from(value: u8) -> Self {
        PixelValue::Scalar(value)
    }
}

impl From<PixelMatrix> for PixelValue {
    fn from(value: PixelMatrix) -> Self {
        PixelValue::Matrix(value)
    }
}

impl From<&PixelMatrix> for PixelValue {
    fn from(value: &PixelMatrix) -> Self {
        PixelValue::Matrix(value.clone())
    }
}

impl From<&Path> for PixelValue {
    fn from(value: &Path) -> Self {
        PixelValue::File(value.to_path_buf())
    }
}

impl From<PathBuf> for PixelValue {
    fn from(value: PathBuf) -> Self {
        PixelValue::File(value)
    }
}

/// Reads pixel mask (1 bit) and pixel DAC (multi bit) files.
pub trait PixelFileReader {
    fn read(&self, path: &Path, bitlength: u8) -> anyhow::Result<PixelMatrix>;
}

/// Selection of global registers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GlobalSelection {
    All,
    /// All registers which are not read-only.
    Writable,
    Names(Vec<String>),
}

impl GlobalSelection {
    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        GlobalSelection::Names(names.into_iter().map(Into::into).collect())
    }
}

impl From<&str> for GlobalSelection {
    fn from(value: &str) -> Self {
        GlobalSelection::Names(vec![value.to_string()])
    }
}

/// Selection of pixel registers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PixelSelection {
    All,
    Names(Vec<String>),
}

impl PixelSelection {
    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        PixelSelection::Names(names.into_iter().map(Into::into).collect())
    }
}

impl From<&str> for PixelSelection {
    fn from(value: &str) -> Self {
        PixelSelection::Names(vec![value.to_string()])
    }
}

/// The register file of one chip.
///
/// Owns all descriptors and their live values for the lifetime of a run.
/// The register file is not meant to be shared between threads; all scan
/// executions against one chip must be serialized by the caller.
pub struct RegisterFile {
    flavor: ChipFlavor,
    chip_id: u8,
    pub(crate) global_registers: Vec<GlobalRegister>,
    pub(crate) pixel_registers: Vec<PixelRegister>,
    pub(crate) commands: CommandSet,
    calibration: CalibrationParameters,
    pub(crate) restore_points: RestorePointStack,
    pixel_file_reader: Option<Box<dyn PixelFileReader>>,
}

impl std::fmt::Debug for RegisterFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisterFile")
            .field("flavor", &self.flavor)
            .field("chip_id", &self.chip_id)
            .field("global_registers", &self.global_registers.len())
            .field("pixel_registers", &self.pixel_registers.len())
            .field("restore_points", &self.restore_points.len())
            .finish()
    }
}

impl RegisterFile {
    pub fn new(definition: &ChipDefinition) -> Result<Self> {
        let global_registers = definition
            .global_registers
            .iter()
            .map(GlobalRegister::from_def)
            .collect::<Result<Vec<_>>>()?;
        check_unique_names(global_registers.iter().map(|r| r.name()), "global register")?;
        check_no_overlap(&global_registers)?;
        let pixel_registers = definition
            .pixel_registers
            .iter()
            .map(PixelRegister::from_def)
            .collect::<Result<Vec<_>>>()?;
        check_unique_names(pixel_registers.iter().map(|r| r.name()), "pixel register")?;
        check_pixel_strobes(&global_registers, &pixel_registers)?;
        let commands = CommandSet::new(&definition.commands)?;

        let mut register_file = RegisterFile {
            flavor: definition.flavor,
            chip_id: 0,
            global_registers,
            pixel_registers,
            commands,
            calibration: definition.calibration.clone(),
            restore_points: RestorePointStack::default(),
            pixel_file_reader: None,
        };
        register_file.set_chip_id(definition.chip_id)?;
        let unset = register_file.unset_global_registers();
        if !unset.is_empty() {
            fei4_log::warn!("Following global registers were not set: {}", unset.join(", "));
        }
        Ok(register_file)
    }

    /// Register file with the built-in definition of `flavor`.
    pub fn builtin(flavor: ChipFlavor) -> Result<Self> {
        Self::new(&ChipDefinition::builtin(flavor))
    }

    pub fn flavor(&self) -> ChipFlavor {
        self.flavor
    }

    pub fn is_fei4a(&self) -> bool {
        self.flavor == ChipFlavor::Fei4a
    }

    pub fn is_fei4b(&self) -> bool {
        self.flavor == ChipFlavor::Fei4b
    }

    pub fn chip_id(&self) -> u8 {
        self.chip_id
    }

    pub fn set_chip_id(&mut self, chip_id: u8) -> Result<()> {
        if chip_id >= 16 {
            return Err(Error::validation(format!(
                "Chip ID {chip_id} out of range [0, 16)"
            )));
        }
        self.chip_id = chip_id;
        Ok(())
    }

    pub fn calibration(&self) -> &CalibrationParameters {
        &self.calibration
    }

    pub fn set_pixel_file_reader(&mut self, reader: Box<dyn PixelFileReader>) {
        self.pixel_file_reader = Some(reader);
    }

    pub fn global_registers(&self) -> &[GlobalRegister] {
        &self.global_registers
    }

    pub fn pixel_registers(&self) -> &[PixelRegister] {
        &self.pixel_registers
    }

    pub fn has_global_register(&self, name: &str) -> bool {
        self.global_registers
            .iter()
            .any(|r| r.name.eq_ignore_ascii_case(name))
    }

    pub fn global_register(&self, name: &str) -> Result<&GlobalRegister> {
        Ok(&self.global_registers[self.global_index(name)?])
    }

    pub fn pixel_register(&self, name: &str) -> Result<&PixelRegister> {
        Ok(&self.pixel_registers[self.pixel_index(name)?])
    }

    pub(crate) fn global_index(&self, name: &str) -> Result<usize> {
        let matches: Vec<usize> = self
            .global_registers
            .iter()
            .enumerate()
            .filter(|(_, r)| r.name.eq_ignore_ascii_case(name))
            .map(|(idx, _)| idx)
            .collect();
        match matches.as_slice() {
            [idx] => Ok(*idx),
            [] => Err(Error::validation(format!(
                "Global register '{name}' not found"
            ))),
            _ => Err(Error::validation(format!(
                "Global register name '{name}' is ambiguous"
            ))),
        }
    }

    pub(crate) fn pixel_index(&self, name: &str) -> Result<usize> {
        let matches: Vec<usize> = self
            .pixel_registers
            .iter()
            .enumerate()
            .filter(|(_, r)| r.name.eq_ignore_ascii_case(name))
            .map(|(idx, _)| idx)
            .collect();
        match matches.as_slice() {
            [idx] => Ok(*idx),
            [] => Err(Error::validation(format!(
                "Pixel register '{name}' not found"
            ))),
            _ => Err(Error::validation(format!(
                "Pixel register name '{name}' is ambiguous"
            ))),
        }
    }

    /// Set a global register. Returns the previous value.
    pub fn set_global(&mut self, name: &str, value: u64) -> Result<u64> {
        let idx = self.global_index(name)?;
        let register = &mut self.global_registers[idx];
        register.validate(value)?;
        register.not_set = false;
        Ok(std::mem::replace(&mut register.value, value))
    }

    pub fn get_global(&self, name: &str) -> Result<u64> {
        Ok(self.global_registers[self.global_index(name)?].value)
    }

    /// Set a pixel register.
    ///
    /// On a failed validation the previous content is kept and the error is returned.
    pub fn set_pixel(&mut self, name: &str, value: impl Into<PixelValue>) -> Result<()> {
        let idx = self.pixel_index(name)?;
        let matrix = match value.into() {
            PixelValue::Scalar(v) => PixelMatrix::filled(v),
            PixelValue::Matrix(m) => m,
            PixelValue::File(path) => {
                let reader = self.pixel_file_reader.as_ref().ok_or_else(|| {
                    Error::configuration(format!(
                        "No pixel file reader available to read '{}'",
                        path.display()
                    ))
                })?;
                let bitlength = self.pixel_registers[idx].bitlength;
                reader.read(&path, bitlength).with_context(|| {
                    format!(
                        "Failed to read pixel register '{name}' from '{}'",
                        path.display()
                    )
                })?
            }
        };
        let register = &mut self.pixel_registers[idx];
        let previous = std::mem::replace(&mut register.value, matrix);
        if let Err(e) = register.validate(&register.value) {
            register.value = previous;
            return Err(e);
        }
        Ok(())
    }

    /// Copy of the pixel register content.
    pub fn get_pixel(&self, name: &str) -> Result<PixelMatrix> {
        Ok(self.pixel_registers[self.pixel_index(name)?].value.clone())
    }

    /// Names of global registers which never received a value.
    pub fn unset_global_registers(&self) -> Vec<&str> {
        self.global_registers
            .iter()
            .filter(|r| r.not_set)
            .map(|r| r.name())
            .collect()
    }

    /// All global registers occupying bits of the register word at `address`.
    pub fn global_registers_at(&self, address: u16) -> Vec<&GlobalRegister> {
        self.global_registers
            .iter()
            .filter(|r| r.overlaps_address(address))
            .collect()
    }

    pub(crate) fn select_global(&self, selection: &GlobalSelection) -> Result<Vec<usize>> {
        match selection {
            GlobalSelection::All => Ok((0..self.global_registers.len()).collect()),
            GlobalSelection::Writable => Ok(self
                .global_registers
                .iter()
                .enumerate()
                .filter(|(_, r)| !r.readonly)
                .map(|(idx, _)| idx)
                .collect()),
            GlobalSelection::Names(names) => names.iter().map(|n| self.global_index(n)).collect(),
        }
    }

    pub(crate) fn select_pixel(&self, selection: &PixelSelection) -> Result<Vec<usize>> {
        match selection {
            PixelSelection::All => Ok((0..self.pixel_registers.len()).collect()),
            PixelSelection::Names(names) => names.iter().map(|n| self.pixel_index(n)).collect(),
        }
    }

    /// Sorted register word addresses occupied by the selected registers.
    pub fn global_register_addresses(&self, selection: &GlobalSelection) -> Result<Vec<u16>> {
        let addresses: BTreeSet<u16> = self
            .select_global(selection)?
            .into_iter()
            .flat_map(|idx| self.global_registers[idx].addresses())
            .collect();
        Ok(addresses.into_iter().collect())
    }
}

fn check_unique_names<'a>(names: impl Iterator<Item = &'a str>, kind: &str) -> Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name.to_lowercase()) {
            return Err(Error::configuration(format!(
                "Duplicate {kind} name '{name}'"
            )));
        }
    }
    Ok(())
}

fn check_no_overlap(registers: &[GlobalRegister]) -> Result<()> {
    let mut ranges: Vec<(Range<i64>, &str)> =
        registers.iter().map(|r| (r.bit_range(), r.name())).collect();
    ranges.sort_by_key(|(range, _)| range.start);
    for pair in ranges.windows(2) {
        let (a, a_name) = &pair[0];
        let (b, b_name) = &pair[1];
        if b.start < a.end {
            return Err(Error::configuration(format!(
                "Global registers '{a_name}' and '{b_name}' overlap"
            )));
        }
    }
    Ok(())
}

/// The strobe bits of every pixel register must lie inside `Pixel_Strobes`.
fn check_pixel_strobes(
    global_registers: &[GlobalRegister],
    pixel_registers: &[PixelRegister],
) -> Result<()> {
    let Some(strobes) = global_registers
        .iter()
        .find(|r| r.name().eq_ignore_ascii_case("Pixel_Strobes"))
    else {
        return Ok(());
    };
    for register in pixel_registers {
        let Some(offset) = register.pxstrobe().offset() else {
            continue;
        };
        let end = u16::from(offset) + u16::from(register.bitlength());
        if end > u16::from(strobes.bitlength()) {
            return Err(Error::configuration(format!(
                "Strobe bits {offset}..{end} of pixel register '{}' exceed the {} bits of Pixel_Strobes",
                register.name(),
                strobes.bitlength()
            )));
        }
    }
    Ok(())
}
