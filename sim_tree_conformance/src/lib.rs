// Copyright 2026 the Sim Tree Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Conformance tests for the `sim_tree` execution engine.
//!
//! The crate is test-only: everything lives in `tests/conformance.rs` and
//! exercises the public embedding surface, never engine internals.
