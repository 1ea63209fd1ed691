// Copyright 2025 The FE-I4 Scan Authors
// SPDX-License-Identifier: Apache-2.0

//! The bit sequence exchanged with the command transport.
use crate::{Error, Result};
use bitvec::prelude::*;
use std::fmt;
use std::ops::Add;

pub type Bits = BitVec<u8, Msb0>;

/// An immutable, length-bearing bit sequence in transmission order.
///
/// Bit 0 of the sequence is sent first. Commands are built by the encoder
/// and combined with [`Command::concat`]; the bits themselves are never
/// modified in place once a command has been handed out.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Command {
    bits: Bits,
}

impl Command {
    pub fn empty() -> Self {
        Command { bits: Bits::new() }
    }

    pub fn from_bits(bits: Bits) -> Self {
        Command { bits }
    }

    pub fn zeros(length: usize) -> Self {
        Command {
            bits: Bits::repeat(false, length),
        }
    }

    pub fn ones(length: usize) -> Self {
        Command {
            bits: Bits::repeat(true, length),
        }
    }

    /// Parse a string of `0` and `1` characters, first character sent first.
    pub fn from_bit_str(bits: &str) -> Result<Self> {
        let mut out = Bits::with_capacity(bits.len());
        for c in bits.chars() {
            match c {
                '0' => out.push(false),
                '1' => out.push(true),
                _ => {
                    return Err(Error::encoding(format!(
                        "Invalid character '{c}' in bit string '{bits}'"
                    )));
                }
            }
        }
        Ok(Command { bits: out })
    }

    /// Encode `value` as `width` bits, most significant bit first.
    pub fn from_value(value: u64, width: usize) -> Result<Self> {
        if width < 64 && value >> width != 0 {
            return Err(Error::encoding(format!(
                "Value {value} does not fit into {width} bits"
            )));
        }
        let mut out = Bits::with_capacity(width);
        for bit in (0..width).rev() {
            out.push(bit < 64 && (value >> bit) & 1 == 1);
        }
        Ok(Command { bits: out })
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn bits(&self) -> &BitSlice<u8, Msb0> {
        &self.bits
    }

    pub fn bit(&self, index: usize) -> Option<bool> {
        self.bits.get(index).map(|b| *b)
    }

    pub fn count_ones(&self) -> usize {
        self.bits.count_ones()
    }

    /// Interpret the sequence as an unsigned integer, first bit most significant.
    pub fn to_value(&self) -> Option<u64> {
        if self.bits.len() > 64 {
            return None;
        }
        Some(
            self.bits
                .iter()
                .by_vals()
                .fold(0u64, |acc, b| (acc << 1) | u64::from(b)),
        )
    }

    pub fn concat(&self, other: &Command) -> Command {
        let mut bits = self.bits.clone();
        bits.extend_from_bitslice(&other.bits);
        Command { bits }
    }

    pub fn concat_all<'a>(commands: impl IntoIterator<Item = &'a Command>) -> Command {
        let mut bits = Bits::new();
        for command in commands {
            bits.extend_from_bitslice(&command.bits);
        }
        Command { bits }
    }

    pub fn reversed(&self) -> Command {
        let mut bits = self.bits.clone();
        bits.reverse();
        Command { bits }
    }

    /// Append zero bits up to the next multiple of eight.
    pub fn byte_padded(&self) -> Command {
        let padding = (8 - self.bits.len() % 8) % 8;
        let mut bits = self.bits.clone();
        bits.resize(self.bits.len() + padding, false);
        Command { bits }
    }

    /// Raw bytes as written to the command memory, zero padded at the end.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bits = self.bits.clone();
        bits.set_uninitialized(false);
        bits.into_vec()
    }
}

impl Add for &Command {
    type Output = Command;

    fn add(self, rhs: &Command) -> Command {
        self.concat(rhs)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for bit in self.bits.iter().by_vals() {
            f.write_str(if bit { "1" } else { "0" })?;
        }
        Ok(())
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.bits.len() <= 64 {
            write!(f, "Command({self})")
        } else {
            write!(f, "Command(len={})", self.bits.len())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_value_msb_first() {
        let cmd = Command::from_value(0b1011, 6).unwrap();
        assert_eq!(cmd.to_string(), "001011");
        assert_eq!(cmd.to_value(), Some(0b1011));
        assert!(Command::from_value(64, 6).is_err());
        assert_eq!(Command::from_value(0, 0).unwrap().len(), 0);
    }

    #[test]
    fn test_from_bit_str() {
        let cmd = Command::from_bit_str("101101000").unwrap();
        assert_eq!(cmd.len(), 9);
        assert_eq!(cmd.bit(0), Some(true));
        assert_eq!(cmd.bit(1), Some(false));
        assert!(Command::from_bit_str("10x").is_err());
    }

    #[test]
    fn test_concat_and_padding() {
        let a = Command::from_bit_str("101").unwrap();
        let b = Command::from_bit_str("11").unwrap();
        assert_eq!((&a + &b).to_string(), "10111");
        assert_eq!(a.byte_padded().to_string(), "10100000");
        assert_eq!(Command::zeros(8).byte_padded().len(), 8);
        assert_eq!(a.concat(&b).to_bytes(), vec![0b1011_1000]);
        assert_eq!(Command::concat_all([&a, &b, &a]).to_string(), "10111101");
    }

    #[test]
    fn test_reversed() {
        let cmd = Command::from_bit_str("1100").unwrap();
        assert_eq!(cmd.reversed().to_string(), "0011");
    }
}
