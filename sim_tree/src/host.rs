// Copyright 2026 the Sim Tree Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Host surface: the hooks the engine calls back into the embedder with.
//!
//! A [`Host`] receives script output and breakpoints, and serves the
//! intrinsic calls the front-end bound as function descriptors before the
//! program was sealed. Intrinsics are identified by their symbol string;
//! they receive argument cells and produce a [`HostValue`], which lets an
//! intrinsic return a plain cell, a freshly allocated string, or a custom
//! iterator without ever touching engine internals.

use alloc::boxed::Box;
use alloc::string::String;
use core::fmt;

use crate::cell::Cell;
use crate::iterator::SimIterator;

/// Errors an intrinsic call can return.
#[derive(Debug)]
pub enum IntrinsicError {
    /// The symbol is unknown to the host. Surfaces as a throw naming the
    /// symbol.
    UnknownSymbol,
    /// The intrinsic failed; the message becomes the engine exception.
    Failed(String),
    /// The host requests a hard stop of the whole evaluation.
    Terminate,
}

impl fmt::Display for IntrinsicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownSymbol => write!(f, "unknown intrinsic"),
            Self::Failed(message) => write!(f, "{message}"),
            Self::Terminate => write!(f, "terminated by host"),
        }
    }
}

impl core::error::Error for IntrinsicError {}

/// A value produced by a host intrinsic.
pub enum HostValue {
    /// An already-packed cell.
    Cell(Cell),
    /// A string; the engine allocates it in the region and yields the
    /// string cell.
    Str(String),
    /// A custom iterator; the engine registers it and yields its handle
    /// cell, ready to drive a `for` source.
    Iterator(Box<dyn SimIterator>),
}

impl From<Cell> for HostValue {
    fn from(cell: Cell) -> Self {
        Self::Cell(cell)
    }
}

/// The embedding surface the engine calls out through.
///
/// All hooks default to no-ops (and intrinsics to
/// [`IntrinsicError::UnknownSymbol`]) so a minimal host is just a unit
/// struct.
pub trait Host {
    /// Script output (the debug node, print-style intrinsics).
    fn to_out(&mut self, message: &str) {
        let _ = message;
    }

    /// Diagnostics output (stack walks, uncaught-throw reports).
    fn to_err(&mut self, message: &str) {
        let _ = message;
    }

    /// A breakpoint was hit at `column`/`line`.
    fn break_point(&mut self, column: u32, line: u32) {
        let _ = (column, line);
    }

    /// Serves an intrinsic call bound as a function descriptor.
    fn intrinsic(&mut self, symbol: &str, args: &[Cell]) -> Result<HostValue, IntrinsicError> {
        let _ = (symbol, args);
        Err(IntrinsicError::UnknownSymbol)
    }
}

/// A host that swallows output and knows no intrinsics.
#[derive(Copy, Clone, Debug, Default)]
pub struct NullHost;

impl Host for NullHost {}

/// A host writing `to_out` to stdout and `to_err` to stderr.
#[cfg(feature = "std")]
#[derive(Copy, Clone, Debug, Default)]
pub struct StdHost;

#[cfg(feature = "std")]
impl Host for StdHost {
    fn to_out(&mut self, message: &str) {
        std::println!("{message}");
    }

    fn to_err(&mut self, message: &str) {
        std::eprintln!("{message}");
    }
}
