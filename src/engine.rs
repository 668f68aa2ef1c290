//! The worklist scheduler that drives discovery to a fixpoint.
//!
//! An [`Engine`] owns one address space, one annotation tree, one compiled
//! instruction set and one hook registry, all scoped to a single analysis
//! run. Callers seed the worklist with entry points; the engine pops one
//! request at a time, resolves it into a leaf, derives flow edges, runs any
//! matching flow-check hooks and enqueues every new target. Tree membership
//! is the visited set, so nothing is ever claimed twice and the loop always
//! reaches a fixpoint on a finite space. Failures never stop the run; they
//! are recorded per item and reported in the summary.

use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::annotations::{AnnotationTree, Leaf, LeafKind};
use crate::decoder::{DecodeError, DecodedIns, InstructionSet};
use crate::directives::{self, DataDirective, DirectiveError, TextSpec};
use crate::flow::{FlowAnalyzer, FlowEdge};
use crate::memory::{AddressSpace, MemError};
use crate::{Address, EngineError};

/// A flow-check hook could not complete; the instruction keeps its default
/// flow edges.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("{0}")]
pub struct HookError(pub String);

impl From<&str> for HookError {
    fn from(s: &str) -> Self {
        HookError(s.to_string())
    }
}

impl From<MemError> for HookError {
    fn from(e: MemError) -> Self {
        HookError(e.to_string())
    }
}

impl From<DirectiveError> for HookError {
    fn from(e: DirectiveError) -> Self {
        HookError(e.to_string())
    }
}

/// Callback bound to one flow-target address.
pub type FlowHook = Rc<dyn Fn(&mut HookCtx<'_>) -> Result<(), HookError>>;

/// What a worklist item asks for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorkKind {
    /// Decode one instruction
    Instruction,
    /// Lay down a data leaf
    Data(DataDirective),
}

/// One pending request on the worklist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub addr: Address,
    pub kind: WorkKind,
}

fn kind_matches(work: &WorkKind, leaf: &LeafKind) -> bool {
    match work {
        WorkKind::Instruction => matches!(leaf, LeafKind::Code { .. }),
        WorkKind::Data(d) => d.matches_leaf(leaf),
    }
}

/// Classification of a recorded per-item failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// Read outside every mapped segment
    UnmappedAddress,
    /// No template matched, or one rejected the bit pattern
    InvalidInstruction,
    /// A new leaf intersected an existing one of a different kind
    OverlapConflict,
    /// A flow-check hook failed; default flow analysis stood
    HookFailure,
    /// A data directive had unusable arguments
    BadDirective,
}

/// One unresolved worklist item, kept for the run summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub addr: Address,
    pub kind: FailureKind,
    pub detail: String,
}

/// What a run accomplished and what it could not resolve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Leaves owned by the tree
    pub claimed: usize,
    /// Worklist items processed
    pub steps: usize,
    pub failures: Vec<ItemFailure>,
    /// Instructions with indirect transfers needing external seeding
    pub indirect_sites: Vec<Address>,
}

/// Serializable snapshot of a run: the tree and the pending worklist.
///
/// Images, hooks and handlers are code or bulk input and are reattached by
/// the caller on resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineState {
    pub tree: AnnotationTree,
    pub worklist: VecDeque<WorkItem>,
    pub failures: Vec<ItemFailure>,
    pub indirect_sites: Vec<Address>,
    pub steps: usize,
}

/// Context handed to a flow-check hook.
///
/// Hooks may rewrite the instruction's edge set, consume trailing bytes by
/// advancing `ins.hi`, attach labels and comments, create data leaves, and
/// defer further work items.
pub struct HookCtx<'a> {
    pub asp: &'a AddressSpace,
    pub ins: &'a mut DecodedIns,
    tree: &'a mut AnnotationTree,
    ptr_width: u8,
    deferred: &'a mut Vec<WorkItem>,
}

impl<'a> HookCtx<'a> {
    pub fn set_label(&mut self, addr: Address, text: &str) {
        self.tree.set_label(addr, text);
    }

    pub fn set_line_comment(&mut self, addr: Address, text: &str) {
        self.tree.set_line_comment(addr, text);
    }

    /// Create a text leaf immediately and return it (for chained layouts
    /// where the next step depends on where the text ends).
    pub fn text(&mut self, addr: Address, spec: TextSpec) -> Result<Leaf, HookError> {
        let (leaf, _) = directives::run(
            self.asp,
            self.tree,
            self.ptr_width,
            addr,
            &DataDirective::Text(spec),
        )?;
        Ok(leaf)
    }

    pub fn defer(&mut self, item: WorkItem) {
        self.deferred.push(item);
    }

    pub fn defer_decode(&mut self, addr: Address) {
        self.defer(WorkItem {
            addr,
            kind: WorkKind::Instruction,
        });
    }

    pub fn defer_data(&mut self, addr: Address, directive: DataDirective) {
        self.defer(WorkItem {
            addr,
            kind: WorkKind::Data(directive),
        });
    }
}

/// One analysis run over one address space.
pub struct Engine {
    asp: AddressSpace,
    tree: AnnotationTree,
    isa: InstructionSet,
    analyzer: FlowAnalyzer,
    hooks: HashMap<Address, FlowHook>,
    worklist: VecDeque<WorkItem>,
    failures: Vec<ItemFailure>,
    indirect_sites: Vec<Address>,
    ptr_width: u8,
    steps: usize,
}

impl Engine {
    pub fn new(asp: AddressSpace, isa: InstructionSet) -> Self {
        Self {
            asp,
            tree: AnnotationTree::new(),
            isa,
            analyzer: FlowAnalyzer::new(),
            hooks: HashMap::new(),
            worklist: VecDeque::new(),
            failures: Vec::new(),
            indirect_sites: Vec::new(),
            ptr_width: 4,
            steps: 0,
        }
    }

    /// Resume a run from a saved snapshot. The caller re-maps images and
    /// re-registers hooks and handlers.
    pub fn with_state(asp: AddressSpace, isa: InstructionSet, state: EngineState) -> Self {
        let mut engine = Self::new(asp, isa);
        engine.tree = state.tree;
        engine.worklist = state.worklist;
        engine.failures = state.failures;
        engine.indirect_sites = state.indirect_sites;
        engine.steps = state.steps;
        engine
    }

    /// Snapshot the run for later resumption.
    pub fn state(&self) -> EngineState {
        EngineState {
            tree: self.tree.clone(),
            worklist: self.worklist.clone(),
            failures: self.failures.clone(),
            indirect_sites: self.indirect_sites.clone(),
            steps: self.steps,
        }
    }

    pub fn space(&self) -> &AddressSpace {
        &self.asp
    }

    pub fn tree(&self) -> &AnnotationTree {
        &self.tree
    }

    /// All leaves in address order (the query surface for renderers).
    pub fn leaves(&self) -> impl Iterator<Item = &Leaf> {
        self.tree.leaves()
    }

    /// Pending worklist items.
    pub fn pending(&self) -> usize {
        self.worklist.len()
    }

    pub fn set_address_mask(&mut self, mask: Address) {
        self.asp.set_mask(mask);
    }

    /// Pointer width consumed by the pointer directives.
    pub fn set_pointer_width(&mut self, width: u8) {
        self.ptr_width = width;
    }

    /// Declare that calls to `addr` never return.
    pub fn mark_nonreturning(&mut self, addr: Address) {
        self.analyzer.mark_nonreturning(addr);
    }

    /// Bind `hook` to flow-target `addr`; the last registration for an
    /// address wins.
    pub fn register_flow_hook<F>(&mut self, addr: Address, hook: F)
    where
        F: Fn(&mut HookCtx<'_>) -> Result<(), HookError> + 'static,
    {
        self.hooks.insert(addr, Rc::new(hook));
    }

    pub fn set_label(&mut self, addr: Address, text: &str) {
        self.tree.set_label(addr, text);
    }

    pub fn set_line_comment(&mut self, addr: Address, text: &str) {
        self.tree.set_line_comment(addr, text);
    }

    pub fn set_block_comment(&mut self, addr: Address, text: &str) {
        self.tree.set_block_comment(addr, text);
    }

    /// Seed (or augment) the worklist with an instruction decode.
    pub fn enqueue_instruction(&mut self, addr: Address) {
        self.worklist.push_back(WorkItem {
            addr,
            kind: WorkKind::Instruction,
        });
    }

    /// Seed (or augment) the worklist with a data directive.
    pub fn enqueue_data(&mut self, addr: Address, directive: DataDirective) {
        self.worklist.push_back(WorkItem {
            addr,
            kind: WorkKind::Data(directive),
        });
    }

    /// Lay down a text leaf now and return it.
    pub fn text(&mut self, addr: Address, spec: TextSpec) -> Result<Leaf, EngineError> {
        let addr = self.asp.canonicalize(addr);
        let (leaf, _) = directives::run(
            &self.asp,
            &mut self.tree,
            self.ptr_width,
            addr,
            &DataDirective::Text(spec),
        )?;
        Ok(leaf)
    }

    /// Lay down a constant leaf now and return it.
    pub fn const_value(
        &mut self,
        addr: Address,
        width: u8,
        hi: Option<Address>,
    ) -> Result<Leaf, EngineError> {
        let addr = self.asp.canonicalize(addr);
        let (leaf, _) = directives::run(
            &self.asp,
            &mut self.tree,
            self.ptr_width,
            addr,
            &DataDirective::Const { width, hi },
        )?;
        Ok(leaf)
    }

    /// Lay down a data-pointer leaf now and return it.
    pub fn data_ptr(&mut self, addr: Address) -> Result<Leaf, EngineError> {
        let addr = self.asp.canonicalize(addr);
        let (leaf, _) = directives::run(
            &self.asp,
            &mut self.tree,
            self.ptr_width,
            addr,
            &DataDirective::DataPtr,
        )?;
        Ok(leaf)
    }

    /// Lay down a code-pointer leaf, scheduling its target for decoding.
    pub fn code_ptr(&mut self, addr: Address) -> Result<Leaf, EngineError> {
        let addr = self.asp.canonicalize(addr);
        let (leaf, target) = directives::run(
            &self.asp,
            &mut self.tree,
            self.ptr_width,
            addr,
            &DataDirective::CodePtr,
        )?;
        if let Some(t) = target {
            self.push_instruction_target(t);
        }
        Ok(leaf)
    }

    /// Add an alias leaf rendering the one at `target`.
    pub fn link(&mut self, lo: Address, hi: Address, target: Address) {
        self.tree.link(lo, hi, target);
    }

    /// Process exactly one worklist item; returns whether work remains.
    pub fn step(&mut self) -> bool {
        let Some(item) = self.worklist.pop_front() else {
            return false;
        };
        self.steps += 1;
        let addr = self.asp.canonicalize(item.addr);

        let owner = self
            .tree
            .find(addr)
            .map(|l| (l.lo, l.hi, l.kind.tag(), kind_matches(&item.kind, &l.kind)));
        if let Some((lo, hi, tag, same)) = owner {
            if lo == addr && same {
                log::trace!("0x{:x} already owned, request is a no-op", addr);
            } else {
                self.record_failure(
                    addr,
                    FailureKind::OverlapConflict,
                    format!("request collides with {} leaf 0x{:x}-0x{:x}", tag, lo, hi),
                );
            }
            return !self.worklist.is_empty();
        }

        match item.kind {
            WorkKind::Instruction => self.step_instruction(addr),
            WorkKind::Data(directive) => self.step_data(addr, &directive),
        }
        !self.worklist.is_empty()
    }

    /// Drain the worklist and report what happened.
    pub fn run(&mut self) -> RunSummary {
        while self.step() {}
        let summary = self.summary();
        log::debug!(
            "run reached fixpoint: {} leaves, {} steps, {} failures",
            summary.claimed,
            summary.steps,
            summary.failures.len()
        );
        summary
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            claimed: self.tree.len(),
            steps: self.steps,
            failures: self.failures.clone(),
            indirect_sites: self.indirect_sites.clone(),
        }
    }

    /// Add line comments naming the source of every direct jump and call,
    /// so flow targets carry their cross-references.
    pub fn annotate_flow_comments(&mut self) {
        let mut notes: Vec<(Address, String)> = Vec::new();
        for leaf in self.tree.leaves() {
            if let LeafKind::Code { flow, .. } = &leaf.kind {
                for edge in flow {
                    let note = match edge {
                        FlowEdge::Jump { to, conditional } => {
                            let what = if *conditional { "branch" } else { "jump" };
                            (*to, format!("{} from 0x{:x}", what, leaf.lo))
                        }
                        FlowEdge::Call { to, .. } => (*to, format!("call from 0x{:x}", leaf.lo)),
                        _ => continue,
                    };
                    notes.push((self.asp.canonicalize(note.0), note.1));
                }
            }
        }
        for (addr, note) in notes {
            self.tree.set_line_comment(addr, &note);
        }
    }

    fn step_instruction(&mut self, addr: Address) {
        let outcome = match self.isa.decode(&self.asp, addr) {
            Ok(o) => o,
            Err(fail) => {
                let kind = match fail.error {
                    DecodeError::Mem(_) => FailureKind::UnmappedAddress,
                    _ => FailureKind::InvalidInstruction,
                };
                self.record_failure(addr, kind, fail.error.to_string());
                for item in fail.followups {
                    self.push_item(item);
                }
                return;
            }
        };
        let mut ins = outcome.ins;
        let mut deferred = outcome.followups;
        self.analyzer.finalize(&mut ins);

        let targets: Vec<Address> = ins
            .flow
            .iter()
            .filter_map(|e| e.target())
            .map(|t| self.asp.canonicalize(t))
            .collect();
        for target in targets {
            let Some(hook) = self.hooks.get(&target).cloned() else {
                continue;
            };
            let saved = ins.clone();
            let mark = deferred.len();
            let result = {
                let mut ctx = HookCtx {
                    asp: &self.asp,
                    ins: &mut ins,
                    tree: &mut self.tree,
                    ptr_width: self.ptr_width,
                    deferred: &mut deferred,
                };
                hook(&mut ctx)
            };
            if let Err(e) = result {
                ins = saved;
                deferred.truncate(mark);
                self.record_failure(
                    addr,
                    FailureKind::HookFailure,
                    format!("hook at 0x{:x}: {}", target, e),
                );
            }
        }

        let mut leaf = Leaf::new(
            ins.lo,
            ins.hi,
            LeafKind::Code {
                mnemonic: ins.mnemonic.clone(),
                operands: ins.operands.clone(),
                flow: ins.flow.clone(),
            },
        );
        leaf.compact = ins.compact;
        match self.tree.insert(leaf) {
            Ok(l) => log::debug!("claimed 0x{:x}-0x{:x}  {}", l.lo, l.hi, l.rendered),
            Err(conflict) => {
                self.record_failure(addr, FailureKind::OverlapConflict, conflict.to_string());
                return;
            }
        }

        for edge in &ins.flow {
            match edge {
                FlowEdge::Fallthrough(a) | FlowEdge::Jump { to: a, .. } => {
                    self.push_instruction_target(*a)
                }
                FlowEdge::Call { to, .. } => self.push_instruction_target(*to),
                FlowEdge::Unknown => self.indirect_sites.push(ins.lo),
                FlowEdge::Return => {}
            }
        }
        for item in deferred {
            self.push_item(item);
        }
    }

    fn step_data(&mut self, addr: Address, directive: &DataDirective) {
        match directives::run(&self.asp, &mut self.tree, self.ptr_width, addr, directive) {
            Ok((leaf, target)) => {
                log::debug!("claimed 0x{:x}-0x{:x}  {}", leaf.lo, leaf.hi, leaf.rendered);
                if let Some(t) = target {
                    self.push_instruction_target(t);
                }
            }
            Err(e) => {
                let kind = match &e {
                    DirectiveError::Mem(_) => FailureKind::UnmappedAddress,
                    DirectiveError::Overlap(_) => FailureKind::OverlapConflict,
                    _ => FailureKind::BadDirective,
                };
                self.record_failure(addr, kind, e.to_string());
            }
        }
    }

    fn push_instruction_target(&mut self, addr: Address) {
        let addr = self.asp.canonicalize(addr);
        if !self.tree.owns(addr) {
            self.worklist.push_back(WorkItem {
                addr,
                kind: WorkKind::Instruction,
            });
        }
    }

    fn push_item(&mut self, item: WorkItem) {
        let addr = self.asp.canonicalize(item.addr);
        if !self.tree.owns(addr) {
            self.worklist.push_back(WorkItem { addr, ..item });
        }
    }

    fn record_failure(&mut self, addr: Address, kind: FailureKind, detail: String) {
        log::warn!("item at 0x{:x} failed ({:?}): {}", addr, kind, detail);
        self.failures.push(ItemFailure { addr, kind, detail });
    }
}
