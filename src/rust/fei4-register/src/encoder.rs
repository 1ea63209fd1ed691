// Copyright 2025 The FE-I4 Scan Authors
// SPDX-License-Identifier: Apache-2.0

//! Command encoder.
//!
//! Command templates of the chip definition are parsed once into tagged parts
//! and resolved on demand against caller parameters. [`RegisterFile::get_commands`]
//! additionally knows the multi-command sequences which depend on the register
//! state, such as writing global register words or shifting pixel registers
//! into the front end.
use crate::bitset::pixel_register_bitset;
use crate::command::{Bits, Command};
use crate::definition::{CommandDef, PixelStrobe};
use crate::register_file::{GlobalSelection, PixelSelection, RegisterFile};
use crate::{DOUBLE_COLUMNS, Error, Result};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};

/// Parameter field filled with the chip ID of the register file when not given.
const CHIP_ID_FIELD: &str = "ChipID";

/// Control bits zeroed while shifting pixel registers into the front end.
const FRONT_END_CONTROL_BITS: &[&str] = &[
    "S0",
    "S1",
    "SR_Clr",
    "CalEn",
    "DIGHITIN_SEL",
    "GateHitOr",
    "ReadSkipped",
    "ReadErrorReq",
    "StopClkPulse",
    "SR_Clock",
    "Efuse_Sense",
    "HITLD_IN",
];

/// Field of the `RunMode` command selecting configuration mode.
const CONF_MODE: &str = "000111";
/// Field of the `RunMode` command selecting run mode.
const RUN_MODE: &str = "111000";

/// Number of clock cycles to wait after an injection, for the given number of mask steps.
pub fn calculate_wait_cycles(mask_steps: u32) -> Result<usize> {
    if mask_steps == 0 {
        return Err(Error::validation("Number of mask steps must be positive"));
    }
    Ok((336.0 / f64::from(mask_steps) * 25.0).floor() as usize + 600)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TemplatePart {
    Literal(Command),
    /// Another command with its own template, by lowercase name.
    FieldRef(String),
    ParamField { name: String, bitlength: usize },
}

#[derive(Debug, Clone)]
struct CommandTemplate {
    name: String,
    bitlength: usize,
    parts: Vec<TemplatePart>,
}

/// The parsed command templates of a chip definition.
#[derive(Debug, Clone, Default)]
pub(crate) struct CommandSet {
    templates: IndexMap<String, CommandTemplate>,
}

impl CommandSet {
    pub(crate) fn new(definitions: &[CommandDef]) -> Result<Self> {
        let mut lookup: HashMap<String, &CommandDef> = HashMap::new();
        for def in definitions {
            if lookup.insert(def.name.to_lowercase(), def).is_some() {
                return Err(Error::configuration(format!(
                    "Duplicate command name '{}'",
                    def.name
                )));
            }
        }
        let mut templates = IndexMap::new();
        for def in definitions {
            let Some(bitstream) = &def.bitstream else {
                continue;
            };
            let parts = bitstream
                .split('+')
                .map(|token| parse_part(token.trim(), &lookup, &def.name))
                .collect::<Result<Vec<_>>>()?;
            templates.insert(
                def.name.to_lowercase(),
                CommandTemplate {
                    name: def.name.clone(),
                    bitlength: def.bitlength,
                    parts,
                },
            );
        }
        let commands = CommandSet { templates };
        for key in commands.templates.keys() {
            commands.check_cycles(key, &mut vec![])?;
        }
        Ok(commands)
    }

    fn check_cycles<'a>(&'a self, key: &'a str, stack: &mut Vec<&'a str>) -> Result<()> {
        if stack.contains(&key) {
            return Err(Error::configuration(format!(
                "Command template '{}' references itself",
                stack[0]
            )));
        }
        let Some(template) = self.templates.get(key) else {
            return Ok(());
        };
        stack.push(key);
        for part in &template.parts {
            if let TemplatePart::FieldRef(reference) = part {
                self.check_cycles(reference, stack)?;
            }
        }
        stack.pop();
        Ok(())
    }

    fn template(&self, name: &str) -> Result<&CommandTemplate> {
        self.templates
            .get(&name.to_lowercase())
            .ok_or_else(|| Error::encoding(format!("Unknown command '{name}'")))
    }

    fn resolve(
        &self,
        template: &CommandTemplate,
        params: &CommandParams,
        chip_id: u8,
        used: &mut HashSet<String>,
        out: &mut Bits,
    ) -> Result<()> {
        for part in &template.parts {
            match part {
                TemplatePart::Literal(bits) => out.extend_from_bitslice(bits.bits()),
                TemplatePart::FieldRef(reference) => {
                    let nested = self.template(reference)?;
                    self.resolve(nested, params, chip_id, used, out)?;
                }
                TemplatePart::ParamField { name, bitlength } => {
                    let value = match params.get(name) {
                        Some(value) => {
                            used.insert(name.to_lowercase());
                            value.encode(name, *bitlength)?
                        }
                        None if name.eq_ignore_ascii_case(CHIP_ID_FIELD) => {
                            Command::from_value(u64::from(chip_id), *bitlength)?
                        }
                        None => {
                            return Err(Error::encoding(format!(
                                "Missing parameter '{name}' for command '{}'",
                                template.name
                            )));
                        }
                    };
                    out.extend_from_bitslice(value.bits());
                }
            }
        }
        Ok(())
    }
}

fn parse_part(
    token: &str,
    lookup: &HashMap<String, &CommandDef>,
    command: &str,
) -> Result<TemplatePart> {
    if token.is_empty() {
        return Err(Error::configuration(format!(
            "Empty part in template of command '{command}'"
        )));
    }
    if token.chars().all(|c| c == '0' || c == '1') {
        return Ok(TemplatePart::Literal(Command::from_bit_str(token)?));
    }
    match lookup.get(&token.to_lowercase()) {
        Some(def) if def.bitstream.is_some() => {
            Ok(TemplatePart::FieldRef(def.name.to_lowercase()))
        }
        Some(def) => Ok(TemplatePart::ParamField {
            name: def.name.clone(),
            bitlength: def.bitlength,
        }),
        None => Err(Error::configuration(format!(
            "Unknown part '{token}' in template of command '{command}'"
        ))),
    }
}

/// Value of a parameter field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParameterValue {
    /// Encoded most significant bit first with the width of the field.
    Integer(u64),
    /// String of `0` and `1` characters.
    BitString(String),
    /// Appended as is.
    BitSequence(Command),
}

impl ParameterValue {
    fn encode(&self, name: &str, bitlength: usize) -> Result<Command> {
        match self {
            ParameterValue::Integer(value) => {
                Command::from_value(*value, bitlength).map_err(|_| {
                    Error::encoding(format!(
                        "Value {value} of parameter '{name}' does not fit into {bitlength} bits"
                    ))
                })
            }
            ParameterValue::BitString(bits) => Command::from_bit_str(bits),
            ParameterValue::BitSequence(bits) => Ok(bits.clone()),
        }
    }
}

impl From<u64> for ParameterValue {
    fn from(value: u64) -> Self {
        ParameterValue::Integer(value)
    }
}

impl From<&str> for ParameterValue {
    fn from(value: &str) -> Self {
        ParameterValue::BitString(value.to_string())
    }
}

impl From<String> for ParameterValue {
    fn from(value: String) -> Self {
        ParameterValue::BitString(value)
    }
}

impl From<Command> for ParameterValue {
    fn from(value: Command) -> Self {
        ParameterValue::BitSequence(value)
    }
}

/// Parameters of a command, looked up case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandParams {
    values: IndexMap<String, ParameterValue>,
}

impl CommandParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<ParameterValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: impl Into<ParameterValue>) {
        self.values.insert(name.to_lowercase(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&ParameterValue> {
        self.values.get(&name.to_lowercase())
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

/// Length of a filler command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
    Length(usize),
    /// Wait time after an injection with the given number of mask steps, see
    /// [`calculate_wait_cycles`].
    MaskSteps(u32),
}

impl Fill {
    fn length(self) -> Result<usize> {
        match self {
            Fill::Length(length) => Ok(length),
            Fill::MaskSteps(mask_steps) => calculate_wait_cycles(mask_steps),
        }
    }
}

/// Shift pixel registers into the front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontEndWrite {
    pub selection: PixelSelection,
    /// Broadcast the content of double column 0 to all double columns.
    pub same_mask_for_all_dc: bool,
    /// Double columns to write. `None` writes all of them.
    pub double_columns: Option<Vec<usize>>,
}

impl FrontEndWrite {
    pub fn new(selection: impl Into<PixelSelection>) -> Self {
        FrontEndWrite {
            selection: selection.into(),
            same_mask_for_all_dc: false,
            double_columns: None,
        }
    }

    pub fn same_mask_for_all_dc(mut self, same_mask_for_all_dc: bool) -> Self {
        self.same_mask_for_all_dc = same_mask_for_all_dc;
        self
    }

    pub fn double_columns(mut self, double_columns: Vec<usize>) -> Self {
        self.double_columns = Some(double_columns);
        self
    }
}

/// Commands known to [`RegisterFile::get_commands`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandRequest {
    Zeros(Fill),
    Ones(Fill),
    /// Write the register words occupied by the selected global registers.
    WrRegister(GlobalSelection),
    RdRegister(GlobalSelection),
    WrFrontEnd(FrontEndWrite),
    ConfMode,
    RunMode,
    GlobalReset,
    GlobalPulse { width: u8 },
    /// Any command of the chip definition.
    Command { name: String, params: CommandParams },
}

impl CommandRequest {
    pub fn command(name: impl Into<String>, params: CommandParams) -> Self {
        CommandRequest::Command {
            name: name.into(),
            params,
        }
    }
}

impl From<FrontEndWrite> for CommandRequest {
    fn from(value: FrontEndWrite) -> Self {
        CommandRequest::WrFrontEnd(value)
    }
}

impl RegisterFile {
    /// Resolve the template of command `name` with the given parameters.
    ///
    /// The `ChipID` field is filled with the chip ID of the register file
    /// unless given explicitly.
    pub fn build_command(&self, name: &str, params: &CommandParams) -> Result<Command> {
        let template = self.commands.template(name)?;
        let mut bits = Bits::with_capacity(template.bitlength);
        let mut used = HashSet::new();
        self.commands
            .resolve(template, params, self.chip_id(), &mut used, &mut bits)?;
        if let Some(unused) = params.keys().find(|key| !used.contains(*key)) {
            return Err(Error::encoding(format!(
                "Unknown parameter '{unused}' for command '{name}'"
            )));
        }
        if bits.is_empty() {
            return Err(Error::encoding(format!(
                "Unknown command '{name}': template resolves to zero bits"
            )));
        }
        if bits.len() != template.bitlength {
            return Err(Error::encoding(format!(
                "Command '{name}' has wrong length: {} bits, expected {}",
                bits.len(),
                template.bitlength
            )));
        }
        Ok(Command::from_bits(bits))
    }

    pub fn get_commands(&mut self, request: CommandRequest) -> Result<Vec<Command>> {
        match request {
            CommandRequest::Zeros(fill) => Ok(vec![Command::zeros(fill.length()?)]),
            CommandRequest::Ones(fill) => Ok(vec![Command::ones(fill.length()?)]),
            CommandRequest::WrRegister(selection) => self.register_commands(&selection, true),
            CommandRequest::RdRegister(selection) => self.register_commands(&selection, false),
            CommandRequest::WrFrontEnd(write) => self.front_end_commands(&write),
            CommandRequest::ConfMode => Ok(vec![self.build_command(
                "RunMode",
                &CommandParams::new().with("Mode", CONF_MODE),
            )?]),
            CommandRequest::RunMode => Ok(vec![self.build_command(
                "RunMode",
                &CommandParams::new().with("Mode", RUN_MODE),
            )?]),
            CommandRequest::GlobalReset => {
                Ok(vec![self.build_command("GlobalReset", &CommandParams::new())?])
            }
            CommandRequest::GlobalPulse { width } => Ok(vec![self.build_command(
                "GlobalPulse",
                &CommandParams::new().with("Width", u64::from(width)),
            )?]),
            CommandRequest::Command { name, params } => {
                Ok(vec![self.build_command(&name, &params)?])
            }
        }
    }

    /// Single command of a request which is known to produce exactly one.
    pub fn get_command(&mut self, request: CommandRequest) -> Result<Command> {
        let mut commands = self.get_commands(request)?;
        match commands.len() {
            1 => Ok(commands.remove(0)),
            n => Err(Error::encoding(format!("Expected a single command, got {n}"))),
        }
    }

    fn register_commands(&self, selection: &GlobalSelection, write: bool) -> Result<Vec<Command>> {
        let addresses = self.global_register_addresses(selection)?;
        if addresses.is_empty() {
            fei4_log::warn!(
                "No global registers selected, no {} commands generated",
                if write { "WrRegister" } else { "RdRegister" }
            );
        }
        addresses
            .into_iter()
            .map(|address| {
                let params = CommandParams::new().with("Address", u64::from(address));
                if write {
                    let data = self.global_register_bitset(address)?;
                    self.build_command("WrRegister", &params.with("GlobalData", data))
                } else {
                    self.build_command("RdRegister", &params)
                }
            })
            .collect()
    }

    fn write_registers(&self, names: &[&str]) -> Result<Vec<Command>> {
        self.register_commands(&GlobalSelection::names(names.iter().copied()), true)
    }

    fn front_end_control_registers(&self) -> Vec<&'static str> {
        FRONT_END_CONTROL_BITS
            .iter()
            .copied()
            .filter(|name| {
                *name != "ReadSkipped" || (self.is_fei4a() && self.has_global_register(name))
            })
            .chain(["Colpr_Mode", "Colpr_Addr"])
            .collect()
    }

    /// Shift pixel registers into the front end.
    ///
    /// The global register state is the same before and after the call; the
    /// control registers are rewritten at the end of the sequence.
    fn front_end_commands(&mut self, write: &FrontEndWrite) -> Result<Vec<Command>> {
        let double_columns: Vec<usize> = if write.same_mask_for_all_dc {
            vec![0]
        } else {
            write
                .double_columns
                .clone()
                .unwrap_or_else(|| (0..DOUBLE_COLUMNS).collect())
        };
        if let Some(dc) = double_columns.iter().find(|dc| **dc >= DOUBLE_COLUMNS) {
            return Err(Error::validation(format!(
                "Double column {dc} out of range [0, {DOUBLE_COLUMNS})"
            )));
        }
        let mut registers = self.select_pixel(&write.selection)?;
        registers.sort_by_key(|idx| match self.pixel_registers[*idx].pxstrobe() {
            PixelStrobe::Strobe(offset) => (0, offset),
            PixelStrobe::DirectShift => (1, 0),
        });
        let control = self.front_end_control_registers();

        let saved = self.snapshot();
        let result =
            self.front_end_sequence(&registers, &double_columns, &control, write.same_mask_for_all_dc);
        self.apply_snapshot(saved, true, false);
        let mut commands = result?;
        let rewrite: Vec<&str> = control
            .iter()
            .copied()
            .chain(["Pixel_Strobes", "Latch_En"])
            .collect();
        commands.extend(self.write_registers(&rewrite)?);
        Ok(commands)
    }

    fn front_end_sequence(
        &mut self,
        registers: &[usize],
        double_columns: &[usize],
        control: &[&str],
        same_mask_for_all_dc: bool,
    ) -> Result<Vec<Command>> {
        for name in control {
            self.set_global(name, 0)?;
        }
        self.set_global("Colpr_Mode", if same_mask_for_all_dc { 3 } else { 0 })?;
        let mut commands = self.write_registers(control)?;

        for idx in registers {
            let register = self.pixel_registers[*idx].clone();
            let bitlength = register.bitlength();
            for bit_no in 0..bitlength {
                // Little-endian registers are latched with the strobe bits in reverse order.
                let strobe_bit = if register.littleendian() {
                    bitlength - 1 - bit_no
                } else {
                    bit_no
                };
                let latch = register.pxstrobe().offset();
                let strobes = match latch {
                    Some(offset) => 1u64
                        .checked_shl(u32::from(offset) + u32::from(strobe_bit))
                        .ok_or_else(|| {
                            Error::encoding(format!(
                                "Strobe bit {} of pixel register '{}' out of range",
                                u32::from(offset) + u32::from(strobe_bit),
                                register.name()
                            ))
                        })?,
                    None => 0,
                };
                self.set_global("Pixel_Strobes", strobes)?;
                commands.extend(self.write_registers(&["Pixel_Strobes"])?);
                for dc in double_columns {
                    self.set_global("Colpr_Addr", *dc as u64)?;
                    commands.extend(self.write_registers(&["Colpr_Addr"])?);
                    let payload = pixel_register_bitset(&register, bit_no, *dc)?;
                    commands.push(self.build_command(
                        "WrFrontEnd",
                        &CommandParams::new().with("PixelData", payload),
                    )?);
                    if latch.is_some() {
                        self.set_global("Latch_En", 1)?;
                        commands.extend(self.write_registers(&["Latch_En"])?);
                        commands.extend(self.get_commands(CommandRequest::GlobalPulse { width: 0 })?);
                        self.set_global("Latch_En", 0)?;
                        commands.extend(self.write_registers(&["Latch_En"])?);
                    }
                }
            }
        }
        Ok(commands)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{ChipDefinition, ChipFlavor};
    use crate::{PixelMatrix, ROWS};

    fn register_file() -> RegisterFile {
        RegisterFile::builtin(ChipFlavor::Fei4b).unwrap()
    }

    fn field_value(command: &Command, range: std::ops::Range<usize>) -> u64 {
        Command::from_bits(command.bits()[range].to_bitvec())
            .to_value()
            .unwrap()
    }

    #[test]
    fn test_calculate_wait_cycles() {
        assert_eq!(calculate_wait_cycles(1).unwrap(), 9000);
        assert_eq!(calculate_wait_cycles(3).unwrap(), 3400);
        assert_eq!(calculate_wait_cycles(7).unwrap(), 1800);
        assert_eq!(calculate_wait_cycles(672).unwrap(), 612);
        assert!(calculate_wait_cycles(0).is_err());
    }

    #[test]
    fn test_fillers() {
        let mut reg = register_file();
        let zeros = reg
            .get_command(CommandRequest::Zeros(Fill::MaskSteps(3)))
            .unwrap();
        assert_eq!(zeros.len(), 3400);
        assert_eq!(zeros.count_ones(), 0);
        let ones = reg.get_command(CommandRequest::Ones(Fill::Length(10))).unwrap();
        assert_eq!(ones.to_string(), "1111111111");
    }

    #[test]
    fn test_builtin_command_lengths() {
        let mut reg = register_file();
        let wr = reg
            .get_commands(CommandRequest::WrRegister("PlsrDAC".into()))
            .unwrap();
        assert_eq!(wr.len(), 1);
        assert_eq!(wr[0].len(), 39);
        let rd = reg
            .get_commands(CommandRequest::RdRegister("PlsrDAC".into()))
            .unwrap();
        assert_eq!(rd[0].len(), 23);
        let pulse = reg
            .get_command(CommandRequest::GlobalPulse { width: 0 })
            .unwrap();
        assert_eq!(
            pulse.to_string(),
            ["101101000", "1001", "1000", "000000"].concat()
        );
        let reset = reg.get_command(CommandRequest::GlobalReset).unwrap();
        assert_eq!(reset.len(), 17);
        let lv1 = reg
            .get_command(CommandRequest::command("lv1", CommandParams::new()))
            .unwrap();
        assert_eq!(lv1.to_string(), "11101");
    }

    #[test]
    fn test_run_and_conf_mode() {
        let mut reg = register_file();
        let conf = reg.get_command(CommandRequest::ConfMode).unwrap();
        assert_eq!(
            conf.to_string(),
            ["101101000", "1010", "1000", "000111"].concat()
        );
        let run = reg.get_command(CommandRequest::RunMode).unwrap();
        assert_eq!(
            run.to_string(),
            ["101101000", "1010", "1000", "111000"].concat()
        );
        reg.set_chip_id(3).unwrap();
        let conf = reg.get_command(CommandRequest::ConfMode).unwrap();
        assert_eq!(field_value(&conf, 13..17), 3);
    }

    #[test]
    fn test_build_command_parameters() {
        let reg = register_file();
        let params = CommandParams::new()
            .with("address", 22u64)
            .with("GlobalData", "1010101010101010")
            .with("ChipID", 5u64);
        let command = reg.build_command("WrRegister", &params).unwrap();
        assert_eq!(field_value(&command, 13..17), 5);
        assert_eq!(field_value(&command, 17..23), 22);
        assert_eq!(field_value(&command, 23..39), 0xAAAA);

        let err = reg
            .build_command("WrRegister", &CommandParams::new().with("Address", 1u64))
            .unwrap_err();
        assert!(matches!(err, Error::Encoding(_)));
        let err = reg
            .build_command(
                "RdRegister",
                &CommandParams::new().with("Address", 64u64),
            )
            .unwrap_err();
        assert!(err.to_string().contains("does not fit"));
        let err = reg
            .build_command(
                "RdRegister",
                &CommandParams::new().with("Address", 1u64).with("Width", 1u64),
            )
            .unwrap_err();
        assert!(err.to_string().contains("Unknown parameter"));
        let err = reg
            .build_command("NoSuchCommand", &CommandParams::new())
            .unwrap_err();
        assert!(matches!(err, Error::Encoding(_)));
    }

    #[test]
    fn test_wrong_length() {
        let reg = register_file();
        let short = CommandParams::new()
            .with("Address", 0u64)
            .with("GlobalData", "101");
        let err = reg.build_command("WrRegister", &short).unwrap_err();
        assert!(matches!(err, Error::Encoding(_)));
        assert!(err.to_string().contains("wrong length"));
    }

    fn definition_with(commands: Vec<CommandDef>) -> ChipDefinition {
        let mut definition = ChipDefinition::builtin(ChipFlavor::Fei4b);
        definition.commands.extend(commands);
        definition
    }

    fn def(name: &str, bitlength: usize, bitstream: Option<&str>) -> CommandDef {
        CommandDef {
            name: name.to_string(),
            bitlength,
            bitstream: bitstream.map(str::to_string),
        }
    }

    #[test]
    fn test_zero_bit_template() {
        let reg = RegisterFile::new(&definition_with(vec![
            def("Nothing", 0, Some("Empty")),
            def("Empty", 0, None),
        ]))
        .unwrap();
        let err = reg
            .build_command("Nothing", &CommandParams::new().with("Empty", ""))
            .unwrap_err();
        assert!(err.to_string().contains("zero bits"));
    }

    #[test]
    fn test_nested_templates() {
        let reg = RegisterFile::new(&definition_with(vec![
            def("Trigger", 15, Some("LV1 + 0 + BCR")),
            def("DoubleTrigger", 30, Some("Trigger + Trigger")),
        ]))
        .unwrap();
        let command = reg
            .build_command("doubletrigger", &CommandParams::new())
            .unwrap();
        let trigger = "11101".to_string() + "0" + "101100001";
        assert_eq!(command.to_string(), trigger.repeat(2));
    }

    #[test]
    fn test_invalid_templates() {
        let err = RegisterFile::new(&definition_with(vec![
            def("A", 9, Some("B")),
            def("B", 9, Some("A")),
        ]))
        .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        let err = RegisterFile::new(&definition_with(vec![def("C", 9, Some("SlowCommand + X"))]))
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        let err = RegisterFile::new(&definition_with(vec![def("lv1", 5, Some("11101"))]))
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_write_registers_ascending() {
        let mut reg = register_file();
        let commands = reg
            .get_commands(CommandRequest::WrRegister(GlobalSelection::names([
                "Colpr_Addr",
                "S0",
                "DisableColumnCnfg",
                "Colpr_Mode",
            ])))
            .unwrap();
        let addresses: Vec<u64> = commands.iter().map(|c| field_value(c, 17..23)).collect();
        assert_eq!(addresses, vec![13, 22, 23, 24, 25]);

        reg.set_global("Colpr_Addr", 5).unwrap();
        let colpr = &commands[1];
        assert_eq!(field_value(colpr, 23..39), 0);
        let colpr = reg
            .get_command(CommandRequest::WrRegister("Colpr_Addr".into()))
            .unwrap();
        assert_eq!(field_value(&colpr, 23..39), 5 << 2);

        let all = reg
            .get_commands(CommandRequest::WrRegister(GlobalSelection::All))
            .unwrap();
        assert_eq!(
            all.len(),
            reg.global_register_addresses(&GlobalSelection::All)
                .unwrap()
                .len()
        );
        let none = reg
            .get_commands(CommandRequest::WrRegister(GlobalSelection::Names(vec![])))
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_front_end_command_counts() {
        let mut reg = register_file();
        let count = |reg: &mut RegisterFile, write: FrontEndWrite| {
            reg.get_commands(write.into()).unwrap().len()
        };
        // 4 control register words before and after the pixel data.
        let enable = FrontEndWrite::new("Enable").same_mask_for_all_dc(true);
        assert_eq!(count(&mut reg, enable), 4 + 1 + 5 + 4);
        let tdac = FrontEndWrite::new("TDAC").same_mask_for_all_dc(true);
        assert_eq!(count(&mut reg, tdac), 4 + 5 * (1 + 5) + 4);
        let dig_inj = FrontEndWrite::new("EnableDigInj").same_mask_for_all_dc(true);
        assert_eq!(count(&mut reg, dig_inj), 4 + 1 + 2 + 4);
        let columns = FrontEndWrite::new("Enable").double_columns(vec![3, 4]);
        assert_eq!(count(&mut reg, columns), 4 + 1 + 2 * 5 + 4);
        let all = FrontEndWrite::new("Enable");
        assert_eq!(count(&mut reg, all), 4 + 1 + 40 * 5 + 4);

        let mut fei4a = RegisterFile::builtin(ChipFlavor::Fei4a).unwrap();
        let enable = FrontEndWrite::new("Enable").same_mask_for_all_dc(true);
        assert_eq!(count(&mut fei4a, enable), 4 + 1 + 5 + 4);
    }

    #[test]
    fn test_front_end_sequence() {
        let mut reg = register_file();
        let mut tdac = PixelMatrix::zeros();
        for row in 0..ROWS {
            tdac[(0, row)] = (row % 32) as u8;
            tdac[(1, row)] = 31 - (row % 32) as u8;
        }
        reg.set_pixel("TDAC", &tdac).unwrap();
        reg.set_global("CalEn", 1).unwrap();
        reg.set_global("Colpr_Addr", 17).unwrap();
        let globals = reg.global_registers().to_vec();

        let write = FrontEndWrite::new("TDAC").same_mask_for_all_dc(true);
        let commands = reg.get_commands(write.into()).unwrap();

        // Control words 13, 21, 22, 27 with Colpr_Mode broadcast and CalEn cleared.
        assert_eq!(field_value(&commands[2], 17..23), 22);
        assert_eq!(field_value(&commands[2], 23..39), 3 << 8);
        assert_eq!(field_value(&commands[3], 17..23), 27);
        assert_eq!(field_value(&commands[3], 23..39) & (1 << 3), 0);
        // Bit plane 0 of TDAC is latched with the highest strobe bit.
        assert_eq!(field_value(&commands[4], 17..23), 13);
        assert_eq!(field_value(&commands[4], 23..39), 1 << 6);
        assert_eq!(commands[6].len(), 695);
        let payload = Command::from_bits(commands[6].bits()[23..].to_bitvec());
        assert_eq!(payload, reg.pixel_register_bitset("TDAC", 0, 0).unwrap());
        // The control words are rewritten with the previous values.
        let last = commands.last().unwrap();
        assert_eq!(field_value(last, 17..23), 27);
        assert_eq!(field_value(last, 23..39) & (1 << 3), 1 << 3);

        assert_eq!(reg.global_registers(), globals.as_slice());
        assert_eq!(reg.get_pixel("TDAC").unwrap(), tdac);
        assert!(reg.restore_point_names().is_empty());
    }

    #[test]
    fn test_front_end_write_clears_strobes_on_chip() {
        let mut reg = register_file();
        let write = FrontEndWrite::new("FDAC").same_mask_for_all_dc(true);
        let commands = reg.get_commands(write.into()).unwrap();
        let strobe_words: Vec<u64> = commands
            .iter()
            .filter(|c| c.len() == 39 && field_value(c, 17..23) == 13)
            .map(|c| field_value(c, 23..39))
            .collect();
        assert!(strobe_words.iter().any(|word| *word & (0x1fff << 1) != 0));
        let tail = &commands[commands.len() - 4..];
        let last_strobes = tail
            .iter()
            .find(|c| field_value(c, 17..23) == 13)
            .unwrap();
        assert_eq!(field_value(last_strobes, 23..39) & (0x1fff << 1), 0);
        let last_latch = tail
            .iter()
            .find(|c| field_value(c, 17..23) == 27)
            .unwrap();
        assert_eq!(field_value(last_latch, 23..39) & (1 << 1), 0);
        assert_eq!(reg.get_global("Pixel_Strobes").unwrap(), 0);
    }

    #[test]
    fn test_front_end_invalid_double_column() {
        let mut reg = register_file();
        let globals = reg.global_registers().to_vec();
        let write = FrontEndWrite::new("Enable").double_columns(vec![0, 40]);
        assert!(matches!(
            reg.get_commands(write.into()).unwrap_err(),
            Error::Validation(_)
        ));
        let write = FrontEndWrite::new("NoSuchRegister");
        assert!(reg.get_commands(write.into()).is_err());
        assert_eq!(reg.global_registers(), globals.as_slice());
    }
}
