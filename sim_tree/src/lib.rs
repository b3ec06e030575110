// Copyright 2026 the Sim Tree Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! `sim_tree`: a tree-walking execution engine for a statically typed,
//! embeddable scripting language.
//!
//! The engine executes a prebuilt [`program::Program`] (a tree of typed
//! simulation nodes plus function and global-variable tables) against an
//! embedder-provided [`host::Host`]. The front-end (lexer, parser, type
//! inference, lowering) is out of scope: it hands a fully elaborated node
//! tree to [`build::ProgramBuilder`] and drives execution through
//! [`context::Context`].
//!
//! Non-local control flow (break/return/throw/terminate) is implemented
//! with an explicit stop-flag bitset checked between child evaluations,
//! not with unwinding. A failed run returns a zero cell and surfaces its
//! message through [`context::Context::get_exception`].
//!
//! ## Example
//!
//! ```
//! use sim_tree::build::ProgramBuilder;
//! use sim_tree::cell::{CellCast, ValueKind};
//! use sim_tree::context::{Config, Context};
//! use sim_tree::host::NullHost;
//! use sim_tree::program::{BinOp, LineInfo, NodeKind};
//!
//! let mut pb = ProgramBuilder::new();
//! let at = LineInfo::default();
//! let arg = pb.node(NodeKind::GetArgument { index: 0 }, at);
//! let one = pb.node(NodeKind::Const(1i32.into_cell()), at);
//! let sum = pb.node(
//!     NodeKind::Op2 { op: BinOp::Add, ty: ValueKind::Int, l: arg, r: one },
//!     at,
//! );
//! let ret = pb.node(NodeKind::Return { subexpr: Some(sum) }, at);
//! let inc = pb.function("inc", ret, 64)?;
//! let program = pb.finish()?;
//!
//! let mut host = NullHost;
//! let mut ctx = Context::new(&program, &mut host, Config::default());
//! let out = ctx.call(inc, &[7i32.into_cell()], 0);
//! assert_eq!(ctx.get_exception(), None);
//! assert_eq!(i32::from_cell(out), 8);
//! # Ok::<(), sim_tree::build::BuildError>(())
//! ```

#![no_std]

extern crate alloc;

#[cfg(any(feature = "std", test))]
extern crate std;

pub mod build;
pub mod cell;
pub mod context;
pub(crate) mod eval;
pub mod format;
pub mod host;
pub mod iterator;
pub(crate) mod policy;
pub mod pretty;
pub mod program;
pub(crate) mod region;
