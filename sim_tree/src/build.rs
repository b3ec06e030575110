// Copyright 2026 the Sim Tree Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Program builder: the surface the front-end emits into.
//!
//! The builder accumulates nodes, descriptors and interned names, then
//! validates the whole table in [`ProgramBuilder::finish`]. The engine
//! executes validated programs only; runtime code trusts node ids, frame
//! sizes and for-loop arities checked here.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use hashbrown::HashMap;

use crate::cell::{StrRef, ValueKind};
use crate::context::PROLOGUE_BYTES;
use crate::program::{
    FuncId, GlobalId, LineInfo, MAX_FOR_ITERATORS, NAME_POOL_BASE, Node, NodeId, NodeKind,
    Program, SimFunction, GlobalVariable, TypeInfo, TypeInfoId,
};
use crate::region::align_cell;

/// A program-construction error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BuildError {
    /// A node referenced a child id that does not exist.
    BadNodeId {
        /// The invalid node id.
        node: u32,
    },
    /// A call referenced a function id that does not exist.
    BadFuncId {
        /// The invalid function id.
        func: u32,
    },
    /// A node referenced a global id that does not exist.
    BadGlobalId {
        /// The invalid global id.
        global: u32,
    },
    /// A `for` node has zero sources, too many, or a slot-count mismatch.
    ForArity {
        /// Number of sources.
        sources: usize,
        /// Number of value slots.
        slots: usize,
    },
    /// A vector constructor has fewer than 2 or more than 4 lanes.
    VecCtorArity {
        /// Number of lane expressions.
        lanes: usize,
    },
    /// A function frame cannot hold the prologue, or is not cell-aligned.
    BadFrameSize {
        /// The offending frame size in bytes.
        stack_size: u32,
    },
    /// A debug node referenced a type-info record that does not exist.
    BadTypeInfoId {
        /// The invalid type-info id.
        type_info: u32,
    },
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadNodeId { node } => write!(f, "invalid node id {node}"),
            Self::BadFuncId { func } => write!(f, "invalid function id {func}"),
            Self::BadGlobalId { global } => write!(f, "invalid global id {global}"),
            Self::ForArity { sources, slots } => {
                write!(f, "bad for arity ({sources} sources, {slots} slots)")
            }
            Self::VecCtorArity { lanes } => write!(f, "bad vector arity ({lanes} lanes)"),
            Self::BadFrameSize { stack_size } => write!(f, "bad frame size {stack_size}"),
            Self::BadTypeInfoId { type_info } => {
                write!(f, "invalid type info id {type_info}")
            }
        }
    }
}

impl core::error::Error for BuildError {}

/// Accumulates a program; [`Self::finish`] validates and seals it.
#[derive(Default)]
pub struct ProgramBuilder {
    nodes: Vec<Node>,
    functions: Vec<SimFunction>,
    globals: Vec<GlobalVariable>,
    type_infos: Vec<TypeInfo>,
    name_pool: Vec<u8>,
    interned: HashMap<String, StrRef>,
}

impl ProgramBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `name`, returning the region offset every context resolves
    /// it at. Interning is idempotent per builder.
    pub fn intern(&mut self, name: &str) -> StrRef {
        if let Some(r) = self.interned.get(name) {
            return *r;
        }
        let r = StrRef(NAME_POOL_BASE + self.name_pool.len() as u32);
        self.name_pool.extend_from_slice(name.as_bytes());
        self.name_pool.push(0);
        self.interned.insert(String::from(name), r);
        r
    }

    /// Emits a node.
    pub fn node(&mut self, kind: NodeKind, at: LineInfo) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node { kind, at });
        id
    }

    /// Registers a type-info record.
    pub fn type_info(&mut self, ty: ValueKind, name: Option<&str>) -> TypeInfoId {
        let name = name.map(|n| self.intern(n));
        let id = TypeInfoId(self.type_infos.len() as u32);
        self.type_infos.push(TypeInfo { ty, name });
        id
    }

    /// Declares a global variable of `size` bytes with an optional init
    /// node.
    pub fn global(
        &mut self,
        name: &str,
        size: u32,
        init: Option<NodeId>,
        type_info: Option<TypeInfoId>,
    ) -> GlobalId {
        let name = self.intern(name);
        let id = GlobalId(self.globals.len() as u32);
        self.globals.push(GlobalVariable { name, size, init, type_info });
        id
    }

    /// Declares a function with `code` as its body and a frame of
    /// `stack_size` bytes (prologue included).
    pub fn function(
        &mut self,
        name: &str,
        code: NodeId,
        stack_size: u32,
    ) -> Result<FuncId, BuildError> {
        if stack_size < PROLOGUE_BYTES || stack_size != align_cell(stack_size) {
            return Err(BuildError::BadFrameSize { stack_size });
        }
        let name = self.intern(name);
        let id = FuncId(self.functions.len() as u32);
        self.functions.push(SimFunction { name, code, stack_size });
        Ok(id)
    }

    /// Binds a host intrinsic as a callable function descriptor: the body
    /// forwards `arity` argument cells to [`crate::host::Host::intrinsic`]
    /// under the function's own name and returns whatever it produces.
    pub fn host_function(&mut self, name: &str, arity: u32) -> Result<FuncId, BuildError> {
        let symbol = self.intern(name);
        let at = LineInfo::default();
        let args = (0..arity)
            .map(|i| self.node(NodeKind::GetArgument { index: i }, at))
            .collect();
        let call = self.node(NodeKind::HostCall { symbol, args }, at);
        let body = self.node(NodeKind::Return { subexpr: Some(call) }, at);
        self.function(name, body, PROLOGUE_BYTES)
    }

    /// Validates the accumulated tables and seals the program.
    pub fn finish(self) -> Result<Program, BuildError> {
        let node_count = self.nodes.len() as u32;
        let check_node = |id: NodeId| {
            if id.0 < node_count {
                Ok(())
            } else {
                Err(BuildError::BadNodeId { node: id.0 })
            }
        };

        let mut children = Vec::new();
        for node in &self.nodes {
            children.clear();
            node.kind.collect_children(&mut children);
            for child in &children {
                check_node(*child)?;
            }
            match &node.kind {
                NodeKind::Call { func, .. } => {
                    if func.0 as usize >= self.functions.len() {
                        return Err(BuildError::BadFuncId { func: func.0 });
                    }
                }
                NodeKind::GetGlobal { index } | NodeKind::GetGlobalR2V { index, .. } => {
                    if index.0 as usize >= self.globals.len() {
                        return Err(BuildError::BadGlobalId { global: index.0 });
                    }
                }
                NodeKind::For { sources, slots, .. } => {
                    if sources.is_empty()
                        || sources.len() > MAX_FOR_ITERATORS
                        || sources.len() != slots.len()
                    {
                        return Err(BuildError::ForArity {
                            sources: sources.len(),
                            slots: slots.len(),
                        });
                    }
                }
                NodeKind::VecCtorFloat { args } | NodeKind::VecCtorInt { args } => {
                    if args.len() < 2 || args.len() > 4 {
                        return Err(BuildError::VecCtorArity { lanes: args.len() });
                    }
                }
                NodeKind::Debug { type_info, .. } => {
                    if type_info.0 as usize >= self.type_infos.len() {
                        return Err(BuildError::BadTypeInfoId { type_info: type_info.0 });
                    }
                }
                _ => {}
            }
        }
        for f in &self.functions {
            check_node(f.code)?;
        }
        for g in &self.globals {
            if let Some(init) = g.init {
                check_node(init)?;
            }
        }

        Ok(Program {
            nodes: self.nodes,
            functions: self.functions,
            globals: self.globals,
            type_infos: self.type_infos,
            name_pool: self.name_pool,
        })
    }
}
