//! Control-transfer edges derived from decoded instructions.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::decoder::DecodedIns;
use crate::Address;

/// One directed control-transfer relation out of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowEdge {
    /// Execution continues at the next instruction
    Fallthrough(Address),
    /// Direct transfer; conditional branches keep their fallthrough
    Jump { to: Address, conditional: bool },
    /// Subroutine call; `ret` is where the callee resumes the caller
    Call { to: Address, ret: Address },
    /// Subroutine return
    Return,
    /// Indirect transfer through a register or memory cell; recorded for
    /// diagnostics, never followed automatically. Counts as an
    /// unconditional transfer, so it suppresses fallthrough
    Unknown,
}

impl FlowEdge {
    /// The statically-known destination, if this edge has one.
    pub fn target(&self) -> Option<Address> {
        match self {
            FlowEdge::Fallthrough(a) => Some(*a),
            FlowEdge::Jump { to, .. } => Some(*to),
            FlowEdge::Call { to, .. } => Some(*to),
            FlowEdge::Return | FlowEdge::Unknown => None,
        }
    }
}

/// Applies the default flow rules to freshly decoded instructions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowAnalyzer {
    nonreturning: BTreeSet<Address>,
}

impl FlowAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare that calls to `addr` never return, suppressing the implied
    /// reachability of their return address.
    pub fn mark_nonreturning(&mut self, addr: Address) {
        self.nonreturning.insert(addr);
    }

    pub fn is_nonreturning(&self, addr: Address) -> bool {
        self.nonreturning.contains(&addr)
    }

    /// Complete an instruction's edge set: every instruction falls through
    /// unless it is an unconditional transfer (direct or indirect), a
    /// return, or a call to a target known never to return.
    pub fn finalize(&self, ins: &mut DecodedIns) {
        let suppressed = ins.flow.iter().any(|e| {
            matches!(
                e,
                FlowEdge::Jump {
                    conditional: false,
                    ..
                } | FlowEdge::Return
                    | FlowEdge::Unknown
            )
        }) || ins
            .flow
            .iter()
            .any(|e| matches!(e, FlowEdge::Call { to, .. } if self.is_nonreturning(*to)));
        if !suppressed {
            ins.flow.push(FlowEdge::Fallthrough(ins.hi));
        }
    }
}
