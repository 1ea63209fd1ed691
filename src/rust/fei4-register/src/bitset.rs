// Copyright 2025 The FE-I4 Scan Authors
// SPDX-License-Identifier: Apache-2.0

//! Conversion of register values into the bit patterns shifted into the chip.
//!
//! Global registers are written as 16-bit words. Several registers can share
//! one word, and a register can span several words. The word is assembled with
//! bit 0 as the least significant bit and sent most significant bit first.
//!
//! Pixel registers are written one bit plane and one double column at a time.
//! The shift register of a double column runs up the even column and down the
//! odd column, which determines the order of the 672 payload bits.
use crate::command::{Bits, Command};
use crate::register_file::{GlobalRegister, PixelRegister, RegisterFile};
use crate::{DOUBLE_COLUMNS, Error, ROWS, Result};
use bitvec::prelude::*;

/// Width of a global register word.
pub const WORD_BITS: usize = 16;
/// Length of the pixel shift register of one double column.
pub const DOUBLE_COLUMN_BITS: usize = 2 * ROWS;

/// The value of `register` as `bitlength` bits, most significant bit first,
/// reversed for little-endian fields.
fn register_bits(register: &GlobalRegister) -> Vec<bool> {
    let width = usize::from(register.bitlength());
    let mut bits: Vec<bool> = (0..width)
        .rev()
        .map(|bit| (register.value() >> bit) & 1 == 1)
        .collect();
    if register.littleendian() {
        bits.reverse();
    }
    bits
}

/// Word bit position (bit 0 = LSB) of bit `j` of `register` in the word at `address`.
fn word_position(register: &GlobalRegister, address: u16, j: usize) -> Option<usize> {
    let position = 16 * (i64::from(register.address()) - i64::from(address))
        + i64::from(register.offset())
        + j as i64;
    (0..WORD_BITS as i64)
        .contains(&position)
        .then_some(position as usize)
}

impl RegisterFile {
    /// Bit pattern of the global register word at `address`, in transmission order.
    pub fn global_register_bitset(&self, address: u16) -> Result<Command> {
        let registers = self.global_registers_at(address);
        if registers.is_empty() {
            return Err(Error::validation(format!(
                "No global register at address {address}"
            )));
        }
        let mut word = [false; WORD_BITS];
        let mut register_littleendian = false;
        for register in registers {
            register_littleendian |= register.register_littleendian();
            for (j, bit) in register_bits(register).into_iter().enumerate() {
                if let Some(position) = word_position(register, address, j) {
                    word[position] |= bit;
                }
            }
        }
        // Most significant bit first
        let mut bits: Bits = word.iter().rev().copied().collect();
        if register_littleendian {
            bits.reverse();
        }
        Ok(Command::from_bits(bits))
    }

    pub fn global_register_bitsets(&self, addresses: &[u16]) -> Result<Vec<Command>> {
        addresses
            .iter()
            .map(|address| self.global_register_bitset(*address))
            .collect()
    }

    /// Decode a register word read back from the chip.
    ///
    /// Returns the values of all registers which lie completely inside the word
    /// at `address`, in definition order.
    pub fn decode_global_register_bitset(
        &self,
        address: u16,
        bitset: &Command,
    ) -> Result<Vec<(String, u64)>> {
        if bitset.len() != WORD_BITS {
            return Err(Error::validation(format!(
                "Register word must have {WORD_BITS} bits, got {}",
                bitset.len()
            )));
        }
        let registers = self.global_registers_at(address);
        let register_littleendian = registers.iter().any(|r| r.register_littleendian());
        let bits = if register_littleendian {
            bitset.reversed()
        } else {
            bitset.clone()
        };
        let mut word = [false; WORD_BITS];
        for (i, bit) in bits.bits().iter().by_vals().enumerate() {
            word[WORD_BITS - 1 - i] = bit;
        }
        let mut values = vec![];
        for register in registers {
            if register.addresses() != (address..address + 1) {
                continue;
            }
            let width = usize::from(register.bitlength());
            let mut reg_bits: Vec<bool> = (0..width)
                .map(|j| {
                    word_position(register, address, j)
                        .map(|p| word[p])
                        .unwrap_or_default()
                })
                .collect();
            if register.littleendian() {
                reg_bits.reverse();
            }
            let value = reg_bits
                .into_iter()
                .fold(0u64, |acc, b| (acc << 1) | u64::from(b));
            values.push((register.name().to_string(), value));
        }
        Ok(values)
    }

    /// Shift register payload of one bit plane of a pixel register in double column `dc`.
    pub fn pixel_register_bitset(&self, name: &str, bit_no: u8, dc: usize) -> Result<Command> {
        pixel_register_bitset(self.pixel_register(name)?, bit_no, dc)
    }
}

/// Shift register payload of bit plane `bit_no` of `register` in double column `dc`.
///
/// Column `2 * dc` is taken bottom to top and column `2 * dc + 1` top to bottom;
/// the resulting 672 bits are sent in reverse order, the last pixel of the
/// shift register first.
pub fn pixel_register_bitset(register: &PixelRegister, bit_no: u8, dc: usize) -> Result<Command> {
    if dc >= DOUBLE_COLUMNS {
        return Err(Error::validation(format!(
            "Double column {dc} out of range [0, {DOUBLE_COLUMNS})"
        )));
    }
    if bit_no >= register.bitlength() {
        return Err(Error::validation(format!(
            "Bit {bit_no} out of range for pixel register '{}' ({} bits)",
            register.name(),
            register.bitlength()
        )));
    }
    let matrix = register.value();
    let selected = |v: &u8| (v >> bit_no) & 1 == 1;
    let mut bits: Bits = BitVec::with_capacity(DOUBLE_COLUMN_BITS);
    bits.extend(matrix.column(2 * dc).iter().map(selected));
    bits.extend(matrix.column(2 * dc + 1).iter().rev().map(selected));
    bits.reverse();
    Ok(Command::from_bits(bits))
}
