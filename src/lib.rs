//! Core data model, decoding and scheduling for the Revenant disassembly
//! engine.
//!
//! This library reconstructs an annotated program representation from a raw
//! firmware image: instructions, strings, constants and pointers. It is
//! retargetable: an instruction set is described as a table of bit-pattern
//! templates, and discovery is driven by following control-flow edges from a
//! set of seed addresses until no work remains.
//!
//! # Basic Usage
//!
//! ```rust,no_run
//! use revenant::{AddressSpace, Endianness, Engine, InstructionSet};
//!
//! // A two-instruction toy machine: one-byte NOP and RET.
//! const TABLE: &str = "
//! NOP  -    0 0 0 0 0 0 0 0
//! RET  >r   0 0 0 0 0 0 0 1
//! ";
//!
//! // Map the raw image at its load address.
//! let image = std::fs::read("path/to/firmware.bin").unwrap();
//! let mut asp = AddressSpace::new(Endianness::Big);
//! asp.map(&image, 0x1000).unwrap();
//!
//! // Compile the instruction table once.
//! let mut isa = InstructionSet::new(8).unwrap();
//! isa.load_table(TABLE).unwrap();
//!
//! // Seed the engine and run discovery to a fixpoint.
//! let mut engine = Engine::new(asp, isa);
//! engine.enqueue_instruction(0x1000);
//! let summary = engine.run();
//!
//! for leaf in engine.leaves() {
//!     println!("{:04x}-{:04x}  {}", leaf.lo, leaf.hi, leaf.rendered);
//! }
//! println!("{} unresolved items", summary.failures.len());
//! ```

pub mod memory;
pub mod annotations;
pub mod decoder;
pub mod flow;
pub mod engine;
pub mod directives;
pub mod format;

use std::fmt;

use serde::{Deserialize, Serialize};

/// Represents an address in a mapped space
pub type Address = u64;

pub use annotations::{AnnotationTree, Leaf, LeafKind, OverlapConflict};
pub use decoder::{DecodeCursor, DecodeError, DecodedIns, InstructionSet, TableError};
pub use directives::{DataDirective, DirectiveError, TextSpec};
pub use engine::{
    Engine, EngineState, FailureKind, HookCtx, HookError, ItemFailure, RunSummary, WorkItem,
    WorkKind,
};
pub use flow::{FlowAnalyzer, FlowEdge};
pub use format::ExportFormat;
pub use memory::{AddressSpace, MemError};

/// Byte order used for multi-byte reads in an address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Endianness {
    /// Most significant byte first
    Big,
    /// Least significant byte first
    Little,
}

impl fmt::Display for Endianness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endianness::Big => write!(f, "big-endian"),
            Endianness::Little => write!(f, "little-endian"),
        }
    }
}

/// Error type aggregating every failure the engine surfaces to callers
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Memory mapping or read error
    #[error("memory error: {0}")]
    Mem(#[from] MemError),

    /// Instruction table could not be compiled
    #[error("table error: {0}")]
    Table(#[from] TableError),

    /// A decode attempt failed
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// A new leaf collided with an existing one
    #[error("overlap conflict: {0}")]
    Overlap(#[from] OverlapConflict),

    /// A data directive could not claim its range
    #[error("directive error: {0}")]
    Directive(#[from] DirectiveError),

    /// A flow-check hook reported failure
    #[error("hook error: {0}")]
    Hook(#[from] HookError),
}
