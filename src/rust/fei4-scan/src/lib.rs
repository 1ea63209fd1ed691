// Copyright 2025 The FE-I4 Scan Authors
// SPDX-License-Identifier: Apache-2.0

//! Scan execution for the FE-I4 front-end chip.
//!
//! The scan loop steps injection masks over the pixel matrix and addresses
//! one double column after the other, sending the caller's command through a
//! [`CommandTransport`]. The register state is restored when the loop ends,
//! also after a cancellation or a failure.

pub mod masks;
pub mod scan_loop;
pub mod sender;
pub mod settings;
pub mod transport;


pub use scan_loop::{ColumnHook, DoubleColumnCorrection, ScanHooks, ScanLoopOptions, scan_loop};
pub use sender::CommandSender;
pub use settings::{SanitizationChange, ScanSettings};
pub use transport::{CancellationToken, CommandTransport};

use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Register(#[from] fei4_register::Error),

    /// Inconsistent scan options. Raised before any command is sent.
    #[error("{0}")]
    Configuration(String),

    #[error(
        "Command of {length} bits repeated {repeat} time(s) did not finish within {timeout:?}"
    )]
    TransportTimeout {
        length: usize,
        repeat: u32,
        timeout: Duration,
    },

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
