// Copyright 2026 the Sim Tree Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Rendering of value cells for diagnostics.
//!
//! The debug node routes its operand through here, driven by the
//! program's type-info record. Strings resolve against the context's
//! region, so runtime-allocated strings render the same way as interned
//! ones.

use alloc::format;
use alloc::string::String;

use crate::cell::{
    Cell, CellCast, Float2, Float3, Float4, Int2, Int3, Int4, Ptr, Range, StrRef, UInt2, UInt3,
    UInt4, URange, ValueKind,
};
use crate::context::Context;
use crate::region::LinearRegion;

/// Renders `value` as `kind` against a context (public diagnostic helper).
#[must_use]
pub fn render(ctx: &Context<'_>, kind: ValueKind, value: Cell) -> String {
    render_value(&ctx.region, kind, value)
}

pub(crate) fn render_value(region: &LinearRegion, kind: ValueKind, value: Cell) -> String {
    match kind {
        ValueKind::Bool => format!("{}", bool::from_cell(value)),
        ValueKind::Int => format!("{}", i32::from_cell(value)),
        ValueKind::UInt => format!("{}", u32::from_cell(value)),
        ValueKind::Int64 => format!("{}", i64::from_cell(value)),
        ValueKind::UInt64 => format!("{}", u64::from_cell(value)),
        ValueKind::Float => format!("{}", f32::from_cell(value)),
        ValueKind::Int2 => {
            let v = Int2::from_cell(value);
            format!("({},{})", v.x, v.y)
        }
        ValueKind::Int3 => {
            let v = Int3::from_cell(value);
            format!("({},{},{})", v.x, v.y, v.z)
        }
        ValueKind::Int4 => {
            let v = Int4::from_cell(value);
            format!("({},{},{},{})", v.x, v.y, v.z, v.w)
        }
        ValueKind::UInt2 => {
            let v = UInt2::from_cell(value);
            format!("({},{})", v.x, v.y)
        }
        ValueKind::UInt3 => {
            let v = UInt3::from_cell(value);
            format!("({},{},{})", v.x, v.y, v.z)
        }
        ValueKind::UInt4 => {
            let v = UInt4::from_cell(value);
            format!("({},{},{},{})", v.x, v.y, v.z, v.w)
        }
        ValueKind::Float2 => {
            let v = Float2::from_cell(value);
            format!("({},{})", v.x, v.y)
        }
        ValueKind::Float3 => {
            let v = Float3::from_cell(value);
            format!("({},{},{})", v.x, v.y, v.z)
        }
        ValueKind::Float4 => {
            let v = Float4::from_cell(value);
            format!("({},{},{},{})", v.x, v.y, v.z, v.w)
        }
        ValueKind::Range => {
            let v = Range::from_cell(value);
            format!("{}..{}", v.from, v.to)
        }
        ValueKind::URange => {
            let v = URange::from_cell(value);
            format!("{}..{}", v.from, v.to)
        }
        ValueKind::Str => {
            let r = StrRef::from_cell(value);
            if r.is_null() {
                String::from("null")
            } else {
                format!("\"{}\"", region.name_str(r))
            }
        }
        ValueKind::Pointer => {
            let p = Ptr::from_cell(value);
            if p.is_null() {
                String::from("null")
            } else {
                format!("*{:#x}", p.0)
            }
        }
        ValueKind::Block => String::from("block"),
    }
}
