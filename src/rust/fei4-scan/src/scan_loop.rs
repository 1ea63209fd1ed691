// Copyright 2025 The FE-I4 Scan Authors
// SPDX-License-Identifier: Apache-2.0

//! The injection scan loop.
//!
//! For every enabled mask step the shift masks are regenerated and written,
//! then the double columns are addressed one after the other and the scan
//! command is sent with hardware repetition.
//!
//! The fast double column loop stages `[dc address, scan command]` in the
//! command memory once and only swaps the address prefix between columns,
//! with the start sequence sent once before the repeated scan command. The
//! slow loop sends everything sequentially and must be used if the column
//! callbacks write registers.
use crate::masks::make_pixel_mask;
use crate::sender::CommandSender;
use crate::transport::{CancellationToken, CommandTransport};
use crate::{Error, Result};
use anyhow::Context;
use fei4_register::{
    Command, CommandRequest, DOUBLE_COLUMNS, FrontEndWrite, PixelMatrix, PixelSelection,
    RegisterFile, RestoreOptions, calculate_wait_cycles,
};
use std::collections::BTreeSet;
use std::path::PathBuf;

const DIGITAL_INJECTION_MASK: &str = "EnableDigInj";
const INJECTION_CAPACITORS: &[&str] = &["C_High", "C_Low"];

/// PlsrDAC correction per double column.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum DoubleColumnCorrection {
    #[default]
    Disabled,
    /// Calibration table of the chip definition, selected by the injection
    /// capacitors in the enable shift masks.
    Calibrated,
    Table(Vec<f64>),
    /// Text file with the table as a list (`[a, b, ...]`) in the first line.
    File(PathBuf),
}

impl DoubleColumnCorrection {
    fn resolve(
        &self,
        register: &RegisterFile,
        enable_shift_masks: &[String],
    ) -> Result<Option<Vec<f64>>> {
        match self {
            DoubleColumnCorrection::Disabled => Ok(None),
            DoubleColumnCorrection::Table(table) => Ok(Some(table.clone())),
            DoubleColumnCorrection::File(path) => {
                let content = std::fs::read_to_string(path).with_context(|| {
                    format!("Failed to read PlsrDAC correction '{}'", path.display())
                })?;
                let first_line = content.lines().next().unwrap_or_default();
                let table = serde_json::from_str(first_line.trim()).map_err(|e| {
                    Error::configuration(format!(
                        "Invalid PlsrDAC correction in '{}': {e}",
                        path.display()
                    ))
                })?;
                Ok(Some(table))
            }
            DoubleColumnCorrection::Calibrated => {
                let calibration = register.calibration();
                let c_high = contains_name(enable_shift_masks, "C_High");
                let c_low = contains_name(enable_shift_masks, "C_Low");
                match (c_high, c_low) {
                    (true, true) => Ok(Some(calibration.pulser_corr_c_inj_high.clone())),
                    (true, false) => Ok(Some(calibration.pulser_corr_c_inj_med.clone())),
                    (false, true) => Ok(Some(calibration.pulser_corr_c_inj_low.clone())),
                    (false, false) => Err(Error::configuration(
                        "PlsrDAC correction requires C_High or C_Low in the enable shift masks",
                    )),
                }
            }
        }
    }
}

pub type ColumnCallback<'a, T> = Box<dyn FnMut(&mut T, usize) -> anyhow::Result<()> + 'a>;

/// Callback run before or after the scan command of a double column.
///
/// The callback receives the transport and the double column.
pub struct ColumnHook<'a, T> {
    callback: ColumnCallback<'a, T>,
    writes_registers: bool,
}

impl<'a, T> ColumnHook<'a, T> {
    pub fn new(callback: impl FnMut(&mut T, usize) -> anyhow::Result<()> + 'a) -> Self {
        ColumnHook {
            callback: Box::new(callback),
            writes_registers: false,
        }
    }

    /// A callback which writes registers. Only allowed with the slow double column loop.
    pub fn writing_registers(
        callback: impl FnMut(&mut T, usize) -> anyhow::Result<()> + 'a,
    ) -> Self {
        ColumnHook {
            callback: Box::new(callback),
            writes_registers: true,
        }
    }

    pub fn writes_registers(&self) -> bool {
        self.writes_registers
    }

    fn call(&mut self, transport: &mut T, dc: usize) -> Result<()> {
        (self.callback)(transport, dc)
            .with_context(|| format!("Callback failed for double column {dc}"))?;
        Ok(())
    }
}

/// Begin-of-loop and end-of-loop callbacks of the double column loop.
pub struct ScanHooks<'a, T> {
    pub bol: Option<ColumnHook<'a, T>>,
    pub eol: Option<ColumnHook<'a, T>>,
}

impl<T> Default for ScanHooks<'_, T> {
    fn default() -> Self {
        ScanHooks {
            bol: None,
            eol: None,
        }
    }
}

impl<T> ScanHooks<'_, T> {
    fn writes_registers(&self) -> bool {
        [&self.bol, &self.eol]
            .into_iter()
            .flatten()
            .any(|hook| hook.writes_registers())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanLoopOptions {
    pub repeat_command: u32,
    /// Append the settle time of [`calculate_wait_cycles`] to the scan command.
    pub use_delay: bool,
    pub mask_steps: u32,
    /// Mask steps to run. `None` runs all of them.
    pub enable_mask_steps: Option<Vec<u32>>,
    /// Double columns to run. `None` runs all of them.
    pub enable_double_columns: Option<Vec<usize>>,
    pub same_mask_for_all_dc: bool,
    pub fast_dc_loop: bool,
    pub digital_injection: bool,
    /// Pixel registers set to the mask of the current step.
    pub enable_shift_masks: Vec<String>,
    /// Pixel registers set to the inverted mask of the current step.
    pub disable_shift_masks: Vec<String>,
    pub restore_shift_masks: bool,
    /// Pixels excluded from all shift masks.
    pub mask: Option<PixelMatrix>,
    pub double_column_correction: DoubleColumnCorrection,
}

impl Default for ScanLoopOptions {
    fn default() -> Self {
        ScanLoopOptions {
            repeat_command: 100,
            use_delay: true,
            mask_steps: 3,
            enable_mask_steps: None,
            enable_double_columns: None,
            same_mask_for_all_dc: false,
            fast_dc_loop: true,
            digital_injection: false,
            enable_shift_masks: vec![
                "Enable".to_string(),
                "C_High".to_string(),
                "C_Low".to_string(),
            ],
            disable_shift_masks: vec![],
            restore_shift_masks: true,
            mask: None,
            double_column_correction: DoubleColumnCorrection::Disabled,
        }
    }
}

fn contains_name(names: &[String], name: &str) -> bool {
    names.iter().any(|n| n.eq_ignore_ascii_case(name))
}

/// Columns (1-based) injected while double column `dc` is addressed.
///
/// The analog injection of a double column reaches the neighboring columns;
/// the first and last double columns are wired differently.
pub fn enable_columns(dc: usize, digital_injection: bool) -> Vec<usize> {
    if digital_injection {
        return vec![2 * dc + 1, 2 * dc + 2];
    }
    match dc {
        0 => vec![1],
        39 => vec![78, 79, 80],
        _ => vec![2 * dc, 2 * dc + 1],
    }
}

/// Double columns holding the columns of [`enable_columns`].
pub fn write_double_columns(dc: usize, digital_injection: bool) -> Vec<usize> {
    if digital_injection {
        return vec![dc];
    }
    match dc {
        0 => vec![0],
        39 => vec![38, 39],
        _ => vec![dc - 1, dc],
    }
}

/// Validated scan parameters.
struct ScanPlan {
    mask_steps: usize,
    enable_mask_steps: Vec<usize>,
    double_columns: Vec<usize>,
    /// Corrected PlsrDAC value per double column.
    plsr_dac: Option<Vec<u64>>,
    scan_command: Command,
}

impl ScanPlan {
    fn new<T>(
        register: &RegisterFile,
        command: &Command,
        options: &ScanLoopOptions,
        hooks: &ScanHooks<'_, T>,
    ) -> Result<Self> {
        if command.is_empty() {
            return Err(Error::configuration("Scan command is empty"));
        }
        if options.repeat_command == 0 {
            return Err(Error::configuration("Number of repetitions must be positive"));
        }
        if options.mask_steps == 0 {
            return Err(Error::configuration("Number of mask steps must be positive"));
        }
        let mask_steps = options.mask_steps as usize;
        let enable_mask_steps: Vec<usize> = match &options.enable_mask_steps {
            Some(steps) => steps.iter().map(|s| *s as usize).collect(),
            None => (0..mask_steps).collect(),
        };
        if enable_mask_steps.is_empty() {
            return Err(Error::configuration("No mask steps enabled"));
        }
        if let Some(step) = enable_mask_steps.iter().find(|s| **s >= mask_steps) {
            return Err(Error::configuration(format!(
                "Mask step {step} out of range [0, {mask_steps})"
            )));
        }
        let double_columns = options
            .enable_double_columns
            .clone()
            .unwrap_or_else(|| (0..DOUBLE_COLUMNS).collect());
        if double_columns.is_empty() {
            return Err(Error::configuration("No double columns enabled"));
        }
        if let Some(dc) = double_columns.iter().find(|dc| **dc >= DOUBLE_COLUMNS) {
            return Err(Error::configuration(format!(
                "Double column {dc} out of range [0, {DOUBLE_COLUMNS})"
            )));
        }
        if options.digital_injection {
            let mut shift_masks = options
                .enable_shift_masks
                .iter()
                .chain(&options.disable_shift_masks);
            if let Some(name) =
                shift_masks.find(|n| INJECTION_CAPACITORS.iter().any(|c| n.eq_ignore_ascii_case(c)))
            {
                return Err(Error::configuration(format!(
                    "Digital injection cannot be used with '{name}' in the shift masks"
                )));
            }
            register.pixel_register(DIGITAL_INJECTION_MASK)?;
        }
        if options.fast_dc_loop && hooks.writes_registers() {
            return Err(Error::configuration(
                "Callbacks writing registers require the slow double column loop",
            ));
        }
        for name in options
            .enable_shift_masks
            .iter()
            .chain(&options.disable_shift_masks)
        {
            register.pixel_register(name)?;
        }
        for name in ["DIGHITIN_SEL", "Colpr_Addr"] {
            register.global_register(name)?;
        }

        let plsr_dac = match options
            .double_column_correction
            .resolve(register, &options.enable_shift_masks)?
        {
            Some(table) => Some(corrected_plsr_dac(register, &table, &double_columns)?),
            None => None,
        };
        let scan_command = if options.use_delay {
            let delay = calculate_wait_cycles(options.mask_steps)?;
            command.concat(&Command::zeros(delay))
        } else {
            command.clone()
        };
        Ok(ScanPlan {
            mask_steps,
            enable_mask_steps,
            double_columns,
            plsr_dac,
            scan_command,
        })
    }
}

fn corrected_plsr_dac(
    register: &RegisterFile,
    table: &[f64],
    double_columns: &[usize],
) -> Result<Vec<u64>> {
    let plsr_dac = register.global_register("PlsrDAC")?;
    let initial = plsr_dac.value();
    let mut values = vec![initial; DOUBLE_COLUMNS];
    for dc in double_columns {
        let correction = table.get(*dc).ok_or_else(|| {
            Error::configuration(format!(
                "PlsrDAC correction has {} entries, double column {dc} is not covered",
                table.len()
            ))
        })?;
        let value = initial as f64 + correction.round_ties_even();
        if !(0.0..=plsr_dac.max_value() as f64).contains(&value) {
            return Err(Error::configuration(format!(
                "Corrected PlsrDAC {value} of double column {dc} out of range"
            )));
        }
        values[*dc] = value as u64;
    }
    Ok(values)
}

/// Which columns the shift masks of a mask step cover.
enum MaskScope {
    /// Same mask in every double column, broadcast.
    AllDoubleColumns,
    /// Masks reset to their inactive value, broadcast.
    Inactive,
    /// Only the columns injected at double column `dc`, written to `write`.
    DoubleColumn { dc: usize, write: Vec<usize> },
}

struct ScanLoop<'a, 'h, T> {
    register: &'a mut RegisterFile,
    sender: &'a mut CommandSender<T>,
    options: &'a ScanLoopOptions,
    hooks: &'a mut ScanHooks<'h, T>,
    cancel: &'a CancellationToken,
    plan: ScanPlan,
}

/// Run an injection scan.
///
/// All options are validated before the first command is sent. The register
/// state is restored and the global configuration is written again when the
/// loop ends, also after a cancellation or an error. An error of the loop is
/// returned after this cleanup.
pub fn scan_loop<T: CommandTransport>(
    register: &mut RegisterFile,
    sender: &mut CommandSender<T>,
    command: &Command,
    options: &ScanLoopOptions,
    hooks: &mut ScanHooks<'_, T>,
    cancel: &CancellationToken,
) -> Result<()> {
    let plan = ScanPlan::new(register, command, options, hooks)?;
    let restore_point = register.create_restore_point(None);
    let mut scan = ScanLoop {
        register,
        sender,
        options,
        hooks,
        cancel,
        plan,
    };
    let result = scan.run();
    let cleanup = scan.cleanup(&restore_point);
    match (result, cleanup) {
        (Err(e), Err(cleanup_error)) => {
            fei4_log::warn!("Cleanup after failed scan loop failed: {}", cleanup_error);
            Err(e)
        }
        (Err(e), Ok(())) => Err(e),
        (Ok(()), cleanup) => cleanup,
    }
}

impl<T: CommandTransport> ScanLoop<'_, '_, T> {
    fn run(&mut self) -> Result<()> {
        self.register
            .set_global("DIGHITIN_SEL", u64::from(self.options.digital_injection))?;
        let mut commands = self.register.get_commands(CommandRequest::ConfMode)?;
        commands.extend(
            self.register
                .get_commands(CommandRequest::WrRegister("DIGHITIN_SEL".into()))?,
        );
        self.sender.send_commands(&commands, true)?;

        let steps = self.plan.enable_mask_steps.clone();
        let (first, last) = (steps[0] + 1, steps[steps.len() - 1] + 1);
        for step in steps {
            if self.cancel.is_cancelled() {
                fei4_log::info!("Scan loop cancelled before mask step {}", step + 1);
                break;
            }
            let scope = if self.options.same_mask_for_all_dc {
                MaskScope::AllDoubleColumns
            } else {
                MaskScope::Inactive
            };
            let mut commands = self.register.get_commands(CommandRequest::ConfMode)?;
            commands.extend(self.shift_mask_commands(step, scope)?);
            self.sender.send_commands(&commands, true)?;

            fei4_log::info!(
                "{} injection(s): mask step {} [{} - {}]",
                self.options.repeat_command,
                step + 1,
                first,
                last
            );
            if self.options.fast_dc_loop {
                self.fast_double_column_loop(step)?;
            } else {
                self.slow_double_column_loop(step)?;
            }
        }
        Ok(())
    }

    /// Set the shift masks of `step` and return the commands writing them.
    fn shift_mask_commands(&mut self, step: usize, scope: MaskScope) -> Result<Vec<Command>> {
        let digital_injection = self.options.digital_injection;
        let mut groups: Vec<(Vec<String>, u8, u8)> = vec![
            (self.options.disable_shift_masks.clone(), 1, 0),
            (self.options.enable_shift_masks.clone(), 0, 1),
        ];
        if digital_injection {
            groups.push((vec![DIGITAL_INJECTION_MASK.to_string()], 0, 1));
        }
        let mut commands = vec![];
        for (names, default, value) in groups {
            if names.is_empty() {
                continue;
            }
            let (mask, write) = match &scope {
                MaskScope::AllDoubleColumns => (
                    make_pixel_mask(
                        self.plan.mask_steps,
                        step,
                        default,
                        value,
                        None,
                        self.options.mask.as_ref(),
                    )?,
                    FrontEndWrite::new(PixelSelection::names(&names)).same_mask_for_all_dc(true),
                ),
                MaskScope::Inactive => (
                    PixelMatrix::filled(default),
                    FrontEndWrite::new(PixelSelection::names(&names)).same_mask_for_all_dc(true),
                ),
                MaskScope::DoubleColumn { dc, write } => (
                    make_pixel_mask(
                        self.plan.mask_steps,
                        step,
                        default,
                        value,
                        Some(enable_columns(*dc, digital_injection).as_slice()),
                        self.options.mask.as_ref(),
                    )?,
                    FrontEndWrite::new(PixelSelection::names(&names))
                        .double_columns(write.clone()),
                ),
            };
            for name in &names {
                self.register.set_pixel(name, &mask)?;
            }
            commands.extend(self.register.get_commands(write.into())?);
        }
        Ok(commands)
    }

    /// Write the masks of double column `dc`, clearing those of `previous`.
    fn write_column_masks(&mut self, step: usize, dc: usize, previous: Option<usize>) -> Result<()> {
        let digital_injection = self.options.digital_injection;
        let write: BTreeSet<usize> = previous
            .into_iter()
            .chain([dc])
            .flat_map(|dc| write_double_columns(dc, digital_injection))
            .collect();
        fei4_log::diagnostic!("Writing masks of double column {} to {:?}", dc, write);
        let scope = MaskScope::DoubleColumn {
            dc,
            write: write.into_iter().collect(),
        };
        let mut commands = self.register.get_commands(CommandRequest::ConfMode)?;
        commands.extend(self.shift_mask_commands(step, scope)?);
        self.sender.send_commands(&commands, true)
    }

    /// `ConfMode`, column address, optional PlsrDAC correction, `RunMode`.
    fn dc_address_command(&mut self, dc: usize) -> Result<Command> {
        let mut commands = self.register.get_commands(CommandRequest::ConfMode)?;
        self.register.set_global("Colpr_Addr", dc as u64)?;
        commands.extend(
            self.register
                .get_commands(CommandRequest::WrRegister("Colpr_Addr".into()))?,
        );
        if let Some(plsr_dac) = &self.plan.plsr_dac {
            self.register.set_global("PlsrDAC", plsr_dac[dc])?;
            commands.extend(
                self.register
                    .get_commands(CommandRequest::WrRegister("PlsrDAC".into()))?,
            );
        }
        commands.extend(self.register.get_commands(CommandRequest::RunMode)?);
        Ok(self.sender.concatenate_commands(&commands, true))
    }

    fn run_bol(&mut self, dc: usize) -> Result<()> {
        match self.hooks.bol.as_mut() {
            Some(hook) => hook.call(self.sender.transport_mut(), dc),
            None => Ok(()),
        }
    }

    fn run_eol(&mut self, dc: usize) -> Result<()> {
        match self.hooks.eol.as_mut() {
            Some(hook) => hook.call(self.sender.transport_mut(), dc),
            None => Ok(()),
        }
    }

    /// Stage `[dc address, scan command]` with the address as start sequence.
    fn stage(&mut self, dc_address: &Command) -> Result<usize> {
        let staged = dc_address.concat(&self.plan.scan_command);
        let transport = self.sender.transport_mut();
        transport.set_start_sequence_length(dc_address.len())?;
        transport.set_repeat(self.options.repeat_command)?;
        Ok(transport.set_command(&staged, true)?)
    }

    fn fast_double_column_loop(&mut self, step: usize) -> Result<()> {
        let same_mask = self.options.same_mask_for_all_dc;
        let repeat = self.options.repeat_command;
        let double_columns = self.plan.double_columns.clone();
        let first = double_columns[0];
        if !same_mask {
            self.write_column_masks(step, first, None)?;
        }
        let dc_address = self.dc_address_command(first)?;
        let mut length = self.stage(&dc_address)?;

        let mut previous = None;
        for dc in double_columns {
            if self.cancel.is_cancelled() {
                fei4_log::info!("Scan loop cancelled before double column {}", dc);
                break;
            }
            if let Some(previous) = previous {
                // The next address is prepared while the previous column is running.
                let dc_address = self.dc_address_command(dc)?;
                self.sender.wait_for_command(length, repeat)?;
                self.run_eol(previous)?;
                if same_mask {
                    self.sender
                        .transport_mut()
                        .set_command(&dc_address, false)?;
                } else {
                    self.sender.transport_mut().set_start_sequence_length(0)?;
                    self.write_column_masks(step, dc, Some(previous))?;
                    length = self.stage(&dc_address)?;
                }
            }
            self.run_bol(dc)?;
            self.sender.transport_mut().start_command()?;
            previous = Some(dc);
        }
        if let Some(previous) = previous {
            self.sender.wait_for_command(length, repeat)?;
            self.run_eol(previous)?;
        }
        let transport = self.sender.transport_mut();
        transport.set_start_sequence_length(0)?;
        transport.set_repeat(1)?;
        Ok(())
    }

    fn slow_double_column_loop(&mut self, step: usize) -> Result<()> {
        let mut previous = None;
        for dc in self.plan.double_columns.clone() {
            if self.cancel.is_cancelled() {
                fei4_log::info!("Scan loop cancelled before double column {}", dc);
                break;
            }
            if !self.options.same_mask_for_all_dc {
                self.write_column_masks(step, dc, previous)?;
            }
            let dc_address = self.dc_address_command(dc)?;
            self.sender.send_command(&dc_address, 1, true)?;
            self.run_bol(dc)?;
            self.sender
                .send_command(&self.plan.scan_command, self.options.repeat_command, true)?;
            self.run_eol(dc)?;
            previous = Some(dc);
        }
        Ok(())
    }

    /// Restore the register state and write it to the chip.
    fn cleanup(&mut self, restore_point: &str) -> Result<()> {
        self.register.restore(&RestoreOptions::named(restore_point))?;
        let transport = self.sender.transport_mut();
        transport.set_start_sequence_length(0)?;
        transport.set_repeat(1)?;
        self.sender
            .configure_global(self.register, fei4_register::GlobalSelection::Writable)?;
        if !self.options.restore_shift_masks {
            return Ok(());
        }
        let mut groups = vec![
            self.options.disable_shift_masks.clone(),
            self.options.enable_shift_masks.clone(),
        ];
        if self.register.pixel_register(DIGITAL_INJECTION_MASK).is_ok() {
            groups.push(vec![DIGITAL_INJECTION_MASK.to_string()]);
        }
        let mut commands = self.register.get_commands(CommandRequest::ConfMode)?;
        for names in groups.into_iter().filter(|names| !names.is_empty()) {
            let write = FrontEndWrite::new(PixelSelection::names(names));
            commands.extend(self.register.get_commands(write.into())?);
        }
        commands.extend(self.register.get_commands(CommandRequest::RunMode)?);
        self.sender.send_commands(&commands, true)
    }
}
