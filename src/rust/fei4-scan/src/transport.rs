// Copyright 2025 The FE-I4 Scan Authors
// SPDX-License-Identifier: Apache-2.0

use fei4_register::Command;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Command memory and sequencer of the readout hardware.
///
/// The sequencer sends the first `start_sequence_length` bits of the command
/// memory once, followed by the rest of the command `repeat` times.
pub trait CommandTransport {
    /// Write `command` to the start of the command memory.
    ///
    /// With `set_length` the sequencer length is set to the length of the
    /// command; otherwise only the first bits of the memory are overwritten and
    /// the previous length is kept. Returns the length of the command in bits.
    fn set_command(&mut self, command: &Command, set_length: bool) -> anyhow::Result<usize>;

    fn set_repeat(&mut self, repeat: u32) -> anyhow::Result<()>;

    fn set_start_sequence_length(&mut self, length: usize) -> anyhow::Result<()>;

    fn start_command(&mut self) -> anyhow::Result<()>;

    /// Block until the sequencer is ready again.
    ///
    /// Returns `false` if the sequencer did not finish within `timeout`.
    fn wait_for_command(
        &mut self,
        length: usize,
        repeat: u32,
        timeout: Duration,
    ) -> anyhow::Result<bool>;
}

impl<T: CommandTransport + ?Sized> CommandTransport for &mut T {
    fn set_command(&mut self, command: &Command, set_length: bool) -> anyhow::Result<usize> {
        (**self).set_command(command, set_length)
    }

    fn set_repeat(&mut self, repeat: u32) -> anyhow::Result<()> {
        (**self).set_repeat(repeat)
    }

    fn set_start_sequence_length(&mut self, length: usize) -> anyhow::Result<()> {
        (**self).set_start_sequence_length(length)
    }

    fn start_command(&mut self) -> anyhow::Result<()> {
        (**self).start_command()
    }

    fn wait_for_command(
        &mut self,
        length: usize,
        repeat: u32,
        timeout: Duration,
    ) -> anyhow::Result<bool> {
        (**self).wait_for_command(length, repeat, timeout)
    }
}

/// Cooperative cancellation flag shared with the scan loop.
///
/// The scan loop only polls the flag between iterations; cancelling never
/// interrupts a command which is already running.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_token_is_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        std::thread::spawn(move || token.cancel()).join().unwrap();
        assert!(clone.is_cancelled());
    }
}
