// Copyright 2025 The FE-I4 Scan Authors
// SPDX-License-Identifier: Apache-2.0

//! Register model and command encoder for the FE-I4 front-end chip.
//!
//! A [`RegisterFile`] is built once from a [`ChipDefinition`] and holds the
//! live value of every global and pixel register. Commands for the chip are
//! produced on demand from the register state by
//! [`RegisterFile::get_commands`] and [`RegisterFile::build_command`].

pub mod bitset;
pub mod builtin;
pub mod command;
pub mod definition;
pub mod encoder;
pub mod pixel_matrix;
pub mod register_file;
pub mod restore_point;

pub use command::Command;
pub use definition::{
    CalibrationParameters, ChipDefinition, ChipFlavor, CommandDef, GlobalRegisterDef,
    PixelRegisterDef, PixelStrobe,
};
pub use encoder::{
    CommandParams, CommandRequest, Fill, FrontEndWrite, ParameterValue, calculate_wait_cycles,
};
pub use pixel_matrix::{COLUMNS, DOUBLE_COLUMNS, PixelMatrix, ROWS};
pub use register_file::{
    GlobalRegister, GlobalSelection, PixelFileReader, PixelRegister, PixelSelection, PixelValue,
    RegisterFile,
};
pub use restore_point::RestoreOptions;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A value or a lookup was rejected. Values are never clamped.
    #[error("{0}")]
    Validation(String),

    /// The chip definition or a combination of options is inconsistent.
    #[error("{0}")]
    Configuration(String),

    /// A command template could not be resolved into a valid bit sequence.
    #[error("{0}")]
    Encoding(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }

    pub fn encoding(msg: impl Into<String>) -> Self {
        Error::Encoding(msg.into())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
