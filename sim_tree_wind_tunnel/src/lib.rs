// Copyright 2026 the Sim Tree Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Criterion benchmarks for the `sim_tree` execution engine.
//!
//! The crate is bench-only: see `benches/engine.rs`.
