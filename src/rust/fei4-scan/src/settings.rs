// Copyright 2025 The FE-I4 Scan Authors
// SPDX-License-Identifier: Apache-2.0

//! Settings of the command link used by the command sender.
use crate::{Error, Result};
use std::time::Duration;

/// Shortest command memory able to hold a `WrFrontEnd` command.
const MIN_COMMAND_MEMORY_BYTES: usize = 87;

#[derive(Debug, Clone)]
pub struct SanitizationChange {
    pub field: &'static str,
    pub original: String,
    pub sanitized: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanSettings {
    clock_period: Duration,
    timeout_margin: Duration,
    zero_command_length: usize,
    command_memory_bytes: usize,
}

impl Default for ScanSettings {
    fn default() -> Self {
        ScanSettings {
            clock_period: Duration::from_nanos(25),
            timeout_margin: Duration::from_secs(1),
            zero_command_length: 1,
            command_memory_bytes: 2048,
        }
    }
}

impl ScanSettings {
    pub fn new(
        clock_period: Duration,
        timeout_margin: Duration,
        zero_command_length: usize,
        command_memory_bytes: usize,
    ) -> Self {
        ScanSettings {
            clock_period,
            timeout_margin,
            zero_command_length,
            command_memory_bytes,
        }
    }

    /// Period of the 40 MHz command clock.
    pub fn clock_period(&self) -> Duration {
        self.clock_period
    }

    pub fn timeout_margin(&self) -> Duration {
        self.timeout_margin
    }

    /// Number of zero bits between concatenated commands.
    pub fn zero_command_length(&self) -> usize {
        self.zero_command_length
    }

    pub fn command_memory_bits(&self) -> usize {
        8 * self.command_memory_bytes
    }

    /// Time the sequencer needs for `length` bits sent `repeat` times, plus margin.
    pub fn command_timeout(&self, length: usize, repeat: u32) -> Duration {
        let cycles = u64::try_from(length)
            .unwrap_or(u64::MAX)
            .saturating_mul(u64::from(repeat));
        let nanos = self.clock_period.as_nanos().saturating_mul(u128::from(cycles));
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX)) + self.timeout_margin
    }

    pub fn sanitize(&mut self) -> Result<Vec<SanitizationChange>> {
        if self.clock_period.is_zero() {
            return Err(Error::configuration("Clock period must be positive"));
        }
        if self.command_memory_bytes < MIN_COMMAND_MEMORY_BYTES {
            return Err(Error::configuration(format!(
                "Command memory of {} bytes cannot hold a front end write",
                self.command_memory_bytes
            )));
        }
        let mut changes = vec![];
        if self.zero_command_length == 0 {
            changes.push(SanitizationChange {
                field: "zero_command_length",
                original: self.zero_command_length.to_string(),
                sanitized: "1".to_string(),
                reason: "Concatenated commands need at least one zero bit in between.".to_string(),
            });
            self.zero_command_length = 1;
        }
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_timeout() {
        let settings = ScanSettings::default();
        assert_eq!(
            settings.command_timeout(4000, 100),
            Duration::from_micros(10_000) + Duration::from_secs(1)
        );
        assert_eq!(settings.command_timeout(0, 100), Duration::from_secs(1));
    }

    #[test]
    fn test_sanitize() {
        let mut settings = ScanSettings::default();
        assert!(settings.sanitize().unwrap().is_empty());

        let mut settings = ScanSettings::new(Duration::from_nanos(25), Duration::ZERO, 0, 2048);
        let changes = settings.sanitize().unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].field, "zero_command_length");
        assert_eq!(changes[0].original, "0");
        assert_eq!(settings.zero_command_length(), 1);

        let mut settings = ScanSettings::new(Duration::ZERO, Duration::ZERO, 1, 2048);
        assert!(settings.sanitize().is_err());
        let mut settings = ScanSettings::new(Duration::from_nanos(25), Duration::ZERO, 1, 64);
        assert!(settings.sanitize().is_err());
    }
}
