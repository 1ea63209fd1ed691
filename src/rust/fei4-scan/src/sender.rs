// Copyright 2025 The FE-I4 Scan Authors
// SPDX-License-Identifier: Apache-2.0

//! Sending commands through the transport and the configuration helpers built on it.
use crate::settings::ScanSettings;
use crate::transport::CommandTransport;
use crate::{Error, Result};
use fei4_register::{
    Command, CommandParams, CommandRequest, FrontEndWrite, GlobalSelection, PixelSelection,
    RegisterFile,
};

pub struct CommandSender<T> {
    transport: T,
    settings: ScanSettings,
}

impl<T: CommandTransport> CommandSender<T> {
    /// Sender over `transport`. The settings are sanitized first.
    pub fn new(transport: T, mut settings: ScanSettings) -> Result<Self> {
        for msg in settings.sanitize()? {
            fei4_log::warn!(
                "Scan setting `{}` is sanitized from {} to {}. Reason: {}",
                msg.field,
                msg.original,
                msg.sanitized,
                msg.reason
            );
        }
        Ok(CommandSender {
            transport,
            settings,
        })
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    pub fn settings(&self) -> &ScanSettings {
        &self.settings
    }

    /// Join commands into one.
    ///
    /// Without byte padding the commands are separated by the configured
    /// number of zero bits. With byte padding every command is padded with
    /// zeros to a multiple of eight bits instead.
    pub fn concatenate_commands(&self, commands: &[Command], byte_padding: bool) -> Command {
        let separator = Command::zeros(self.settings.zero_command_length());
        let mut parts = Vec::with_capacity(2 * commands.len());
        for (idx, command) in commands.iter().enumerate() {
            if byte_padding {
                parts.push(command.byte_padded());
                continue;
            }
            if idx > 0 {
                parts.push(separator.clone());
            }
            parts.push(command.clone());
        }
        Command::concat_all(&parts)
    }

    /// Write `command` to the command memory and start it `repeat` times.
    pub fn send_command(&mut self, command: &Command, repeat: u32, wait: bool) -> Result<()> {
        self.transport.set_repeat(repeat)?;
        let length = self.transport.set_command(command, true)?;
        self.transport.start_command()?;
        let result = if wait {
            self.wait_for_command(length, repeat)
        } else {
            Ok(())
        };
        if repeat != 1 {
            self.transport.set_repeat(1)?;
        }
        result
    }

    /// Send commands one after the other.
    ///
    /// With `concatenate`, as many commands as fit into the command memory are
    /// joined and sent at once.
    pub fn send_commands(&mut self, commands: &[Command], concatenate: bool) -> Result<()> {
        if !concatenate {
            for command in commands {
                self.send_command(command, 1, true)?;
            }
            return Ok(());
        }
        let capacity = self.settings.command_memory_bits();
        let separator = self.settings.zero_command_length();
        let mut batch: Vec<Command> = vec![];
        let mut batch_length = 0;
        for command in commands {
            if !batch.is_empty() && batch_length + separator + command.len() > capacity {
                let joined = self.concatenate_commands(&batch, false);
                self.send_command(&joined, 1, true)?;
                batch.clear();
            }
            batch_length = if batch.is_empty() {
                command.len()
            } else {
                batch_length + separator + command.len()
            };
            batch.push(command.clone());
        }
        if !batch.is_empty() {
            let joined = self.concatenate_commands(&batch, false);
            self.send_command(&joined, 1, true)?;
        }
        Ok(())
    }

    /// Wait until a command of `length` bits started `repeat` times has finished.
    pub fn wait_for_command(&mut self, length: usize, repeat: u32) -> Result<()> {
        let timeout = self.settings.command_timeout(length, repeat);
        if self.transport.wait_for_command(length, repeat, timeout)? {
            return Ok(());
        }
        fei4_log::warn!(
            "Command of {} bits repeated {} time(s) did not finish within {:?}",
            length,
            repeat,
            timeout
        );
        Err(Error::TransportTimeout {
            length,
            repeat,
            timeout,
        })
    }

    /// Write the selected global registers to the chip.
    pub fn configure_global(
        &mut self,
        register: &mut RegisterFile,
        selection: GlobalSelection,
    ) -> Result<()> {
        let mut commands = register.get_commands(CommandRequest::ConfMode)?;
        commands.extend(register.get_commands(CommandRequest::WrRegister(selection))?);
        commands.extend(register.get_commands(CommandRequest::RunMode)?);
        self.send_commands(&commands, true)
    }

    /// Write the selected pixel registers to the chip.
    pub fn configure_pixel(
        &mut self,
        register: &mut RegisterFile,
        selection: PixelSelection,
        same_mask_for_all_dc: bool,
    ) -> Result<()> {
        let write = FrontEndWrite::new(selection).same_mask_for_all_dc(same_mask_for_all_dc);
        let mut commands = register.get_commands(CommandRequest::ConfMode)?;
        commands.extend(register.get_commands(write.into())?);
        commands.extend(register.get_commands(CommandRequest::RunMode)?);
        self.send_commands(&commands, true)
    }

    pub fn configure_all(
        &mut self,
        register: &mut RegisterFile,
        same_mask_for_all_dc: bool,
    ) -> Result<()> {
        self.configure_global(register, GlobalSelection::Writable)?;
        self.configure_pixel(register, PixelSelection::All, same_mask_for_all_dc)
    }

    /// Reset all global registers of the chip to their power-up values.
    pub fn global_reset(&mut self, register: &mut RegisterFile) -> Result<()> {
        let mut commands = register.get_commands(CommandRequest::ConfMode)?;
        commands.extend(register.get_commands(CommandRequest::GlobalReset)?);
        self.send_commands(&commands, true)
    }

    pub fn reset_bunch_counter(&mut self, register: &mut RegisterFile) -> Result<()> {
        self.run_mode_command(register, "BCR")
    }

    pub fn reset_event_counter(&mut self, register: &mut RegisterFile) -> Result<()> {
        self.run_mode_command(register, "ECR")
    }

    fn run_mode_command(&mut self, register: &mut RegisterFile, name: &str) -> Result<()> {
        let mut commands = register.get_commands(CommandRequest::RunMode)?;
        commands.push(register.build_command(name, &CommandParams::new())?);
        self.send_commands(&commands, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{Call, FakeTransport};
    use fei4_register::ChipFlavor;
    use std::time::Duration;

    fn sender() -> CommandSender<FakeTransport> {
        CommandSender::new(FakeTransport::new(), ScanSettings::default()).unwrap()
    }

    fn bits(s: &str) -> Command {
        Command::from_bit_str(s).unwrap()
    }

    #[test]
    fn test_concatenate_commands() {
        let sender = sender();
        let commands = [bits("111"), bits("11"), bits("1")];
        assert_eq!(
            sender.concatenate_commands(&commands, false).to_string(),
            "11101101"
        );
        assert_eq!(
            sender.concatenate_commands(&commands, true).to_string(),
            "111000001100000010000000"
        );
        assert!(sender.concatenate_commands(&[], false).is_empty());
    }

    #[test]
    fn test_new_sanitizes_settings() {
        let settings = ScanSettings::new(Duration::from_nanos(25), Duration::ZERO, 0, 2048);
        let sender = CommandSender::new(FakeTransport::new(), settings).unwrap();
        assert_eq!(sender.settings().zero_command_length(), 1);
        assert_eq!(
            sender
                .concatenate_commands(&[bits("11"), bits("1")], false)
                .to_string(),
            "1101"
        );

        let settings = ScanSettings::new(Duration::from_nanos(25), Duration::ZERO, 1, 10);
        assert!(matches!(
            CommandSender::new(FakeTransport::new(), settings),
            Err(Error::Configuration(_))
        ));
        let settings = ScanSettings::new(Duration::ZERO, Duration::ZERO, 1, 2048);
        assert!(CommandSender::new(FakeTransport::new(), settings).is_err());
    }

    #[test]
    fn test_send_command_with_repeat() {
        let mut sender = sender();
        let command = bits("1010");
        sender.send_command(&command, 5, true).unwrap();
        assert_eq!(
            sender.transport().calls,
            vec![
                Call::SetRepeat(5),
                Call::SetCommand {
                    length: 4,
                    set_length: true
                },
                Call::Start {
                    repeat: 5,
                    memory: command.clone()
                },
                Call::Wait {
                    length: 4,
                    repeat: 5
                },
                Call::SetRepeat(1),
            ]
        );
    }

    #[test]
    fn test_send_command_timeout() {
        let mut transport = FakeTransport::new();
        transport.time_out = true;
        let mut sender = CommandSender::new(transport, ScanSettings::default()).unwrap();
        let err = sender.send_command(&bits("1010"), 2, true).unwrap_err();
        match err {
            Error::TransportTimeout {
                length,
                repeat,
                timeout,
            } => {
                assert_eq!((length, repeat), (4, 2));
                assert_eq!(timeout, Duration::from_nanos(200) + Duration::from_secs(1));
            }
            other => panic!("unexpected error {other:?}"),
        }
        // The repeat is reset even though the wait failed.
        assert_eq!(sender.transport().calls.last(), Some(&Call::SetRepeat(1)));
    }

    #[test]
    fn test_send_commands_batches_to_memory_size() {
        let settings = ScanSettings::new(Duration::from_nanos(25), Duration::ZERO, 1, 87);
        let mut sender = CommandSender::new(FakeTransport::new(), settings).unwrap();
        let commands = vec![Command::ones(39); 20];
        sender.send_commands(&commands, true).unwrap();
        let lengths: Vec<usize> = sender
            .transport()
            .starts()
            .map(|(_, memory)| memory.len())
            .collect();
        assert_eq!(lengths, vec![39 + 16 * 40, 39 + 2 * 40]);

        let mut sender = CommandSender::new(FakeTransport::new(), ScanSettings::default()).unwrap();
        sender.send_commands(&commands, false).unwrap();
        assert_eq!(sender.transport().starts().count(), 20);
    }

    #[test]
    fn test_configure_global() {
        let mut register = RegisterFile::builtin(ChipFlavor::Fei4b).unwrap();
        let mut sender = sender();
        sender
            .configure_global(&mut register, GlobalSelection::from("PlsrDAC"))
            .unwrap();
        let mut expected = register.get_commands(CommandRequest::ConfMode).unwrap();
        expected.extend(
            register
                .get_commands(CommandRequest::WrRegister("PlsrDAC".into()))
                .unwrap(),
        );
        expected.extend(register.get_commands(CommandRequest::RunMode).unwrap());
        let expected = sender.concatenate_commands(&expected, false);
        let starts: Vec<_> = sender.transport().starts().collect();
        assert_eq!(starts, vec![(1, &expected)]);
    }

    #[test]
    fn test_configure_all_restores_register_state() {
        let mut register = RegisterFile::builtin(ChipFlavor::Fei4a).unwrap();
        let globals = register.global_registers().to_vec();
        let mut sender = sender();
        sender.configure_all(&mut register, false).unwrap();
        assert!(sender.transport().starts().count() > 1);
        assert_eq!(register.global_registers(), globals.as_slice());
    }

    #[test]
    fn test_reset_counters() {
        let mut register = RegisterFile::builtin(ChipFlavor::Fei4b).unwrap();
        let mut sender = sender();
        sender.reset_bunch_counter(&mut register).unwrap();
        sender.reset_event_counter(&mut register).unwrap();
        sender.global_reset(&mut register).unwrap();
        let memories: Vec<String> = sender
            .transport()
            .starts()
            .map(|(_, memory)| memory.to_string())
            .collect();
        let run_mode = ["101101000", "1010", "1000", "111000"].concat();
        let conf_mode = ["101101000", "1010", "1000", "000111"].concat();
        assert_eq!(
            memories,
            vec![
                format!("{run_mode}0101100001"),
                format!("{run_mode}0101100010"),
                format!("{conf_mode}0{}", ["101101000", "1000", "1000"].concat()),
            ]
        );
    }
}
