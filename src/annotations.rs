//! The annotated address space: leaves, the non-overlap tree, and
//! address-keyed metadata.
//!
//! A leaf claims one byte range and records how those bytes were
//! interpreted. The tree enforces that no two leaves claim overlapping
//! bytes; membership in it doubles as the "already visited" record for the
//! scheduler, so ownership checks are a single ordered-map lookup.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::flow::FlowEdge;
use crate::Address;

/// A rejected insertion: the new range intersects an existing leaf.
///
/// The first-created leaf always stays; callers decide what to do with the
/// conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("range 0x{new_lo:x}-0x{new_hi:x} overlaps existing leaf 0x{existing_lo:x}-0x{existing_hi:x}")]
pub struct OverlapConflict {
    pub new_lo: Address,
    pub new_hi: Address,
    pub existing_lo: Address,
    pub existing_hi: Address,
}

/// The interpretation attached to a claimed byte range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LeafKind {
    /// One decoded instruction and its outgoing flow edges
    Code {
        mnemonic: String,
        operands: Vec<String>,
        flow: Vec<FlowEdge>,
    },
    /// A character string (terminator and alignment padding included in the
    /// claimed range)
    Text { text: String },
    /// One or more constants of a fixed width
    Const { values: Vec<u64>, width: u8 },
    /// A pointer to data
    DataPtr { to: Address },
    /// A pointer to code
    CodePtr { to: Address },
    /// An alias rendering another leaf's text without owning bytes
    Link { to: Address },
}

impl LeafKind {
    /// Short tag naming the interpretation, stable for exports.
    pub fn tag(&self) -> &'static str {
        match self {
            LeafKind::Code { .. } => "code",
            LeafKind::Text { .. } => "text",
            LeafKind::Const { .. } => "const",
            LeafKind::DataPtr { .. } => "dataptr",
            LeafKind::CodePtr { .. } => "codeptr",
            LeafKind::Link { .. } => "link",
        }
    }

    fn render(&self) -> String {
        match self {
            LeafKind::Code { mnemonic, operands, .. } => {
                if operands.is_empty() {
                    mnemonic.clone()
                } else {
                    format!("{}\t{}", mnemonic, operands.join(","))
                }
            }
            LeafKind::Text { text } => format!("'{}'", text),
            LeafKind::Const { values, width } => {
                let rendered: Vec<String> = values
                    .iter()
                    .map(|v| format!("0x{:0w$x}", v, w = 2 * *width as usize))
                    .collect();
                format!(".const\t{}", rendered.join(","))
            }
            LeafKind::DataPtr { to } => format!(".dataptr\t0x{:x}", to),
            LeafKind::CodePtr { to } => format!(".codeptr\t0x{:x}", to),
            LeafKind::Link { to } => format!("-> 0x{:x}", to),
        }
    }
}

/// One annotated byte range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Leaf {
    pub lo: Address,
    pub hi: Address,
    pub kind: LeafKind,
    /// Pre-rendered text body, built once at creation
    pub rendered: String,
    /// Rendering hint only; no semantic weight
    pub compact: bool,
}

impl Leaf {
    pub fn new(lo: Address, hi: Address, kind: LeafKind) -> Self {
        let rendered = kind.render();
        Self {
            lo,
            hi,
            kind,
            rendered,
            compact: false,
        }
    }

    pub fn len(&self) -> u64 {
        self.hi - self.lo
    }

    pub fn is_empty(&self) -> bool {
        self.hi <= self.lo
    }
}

/// Ordered collection of non-overlapping leaves plus address-keyed
/// metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnnotationTree {
    leaves: BTreeMap<Address, Leaf>,
    /// Alias leaves, exempt from the overlap invariant
    links: Vec<Leaf>,
    labels: BTreeMap<Address, String>,
    line_comments: BTreeMap<Address, Vec<String>>,
    block_comments: BTreeMap<Address, String>,
}

impl AnnotationTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of owning (non-link) leaves.
    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Insert a leaf, rejecting any byte-range intersection with an
    /// existing non-link leaf. Link leaves bypass the check.
    pub fn insert(&mut self, leaf: Leaf) -> Result<&Leaf, OverlapConflict> {
        if matches!(leaf.kind, LeafKind::Link { .. }) {
            let pos = self.links.partition_point(|l| l.lo <= leaf.lo);
            self.links.insert(pos, leaf);
            return Ok(&self.links[pos]);
        }
        if let Some((_, prev)) = self.leaves.range(..leaf.hi).next_back() {
            if prev.hi > leaf.lo {
                return Err(OverlapConflict {
                    new_lo: leaf.lo,
                    new_hi: leaf.hi,
                    existing_lo: prev.lo,
                    existing_hi: prev.hi,
                });
            }
        }
        let lo = leaf.lo;
        self.leaves.insert(lo, leaf);
        Ok(&self.leaves[&lo])
    }

    /// The leaf starting exactly at `addr`.
    pub fn at(&self, addr: Address) -> Option<&Leaf> {
        self.leaves.get(&addr)
    }

    /// The leaf whose range contains `addr`, if any.
    pub fn find(&self, addr: Address) -> Option<&Leaf> {
        self.leaves
            .range(..=addr)
            .next_back()
            .map(|(_, l)| l)
            .filter(|l| l.hi > addr)
    }

    /// Whether some leaf owns the byte at `addr`.
    pub fn owns(&self, addr: Address) -> bool {
        self.find(addr).is_some()
    }

    /// Add an alias leaf at `lo..hi` rendering the leaf at `target`.
    pub fn link(&mut self, lo: Address, hi: Address, target: Address) -> &Leaf {
        let leaf = Leaf::new(lo, hi, LeafKind::Link { to: target });
        match self.insert(leaf) {
            Ok(l) => l,
            // Links never conflict
            Err(_) => unreachable!(),
        }
    }

    /// All leaves, links included, in address order.
    pub fn leaves(&self) -> impl Iterator<Item = &Leaf> {
        let mut owned = self.leaves.values().peekable();
        let mut links = self.links.iter().peekable();
        std::iter::from_fn(move || match (owned.peek(), links.peek()) {
            (Some(a), Some(b)) => {
                if a.lo <= b.lo {
                    owned.next()
                } else {
                    links.next()
                }
            }
            (Some(_), None) => owned.next(),
            (None, _) => links.next(),
        })
    }

    /// Resolve a leaf's display text; links render their target.
    pub fn render(&self, leaf: &Leaf) -> String {
        match leaf.kind {
            LeafKind::Link { to } => self
                .at(to)
                .map(|l| l.rendered.clone())
                .unwrap_or_else(|| leaf.rendered.clone()),
            _ => leaf.rendered.clone(),
        }
    }

    /// Attach a label; the last registration for an address wins.
    pub fn set_label(&mut self, addr: Address, text: &str) {
        self.labels.insert(addr, text.to_string());
    }

    pub fn label(&self, addr: Address) -> Option<&str> {
        self.labels.get(&addr).map(String::as_str)
    }

    /// Attach a line comment; comments accumulate per address.
    pub fn set_line_comment(&mut self, addr: Address, text: &str) {
        self.line_comments
            .entry(addr)
            .or_default()
            .push(text.to_string());
    }

    pub fn line_comments(&self, addr: Address) -> &[String] {
        self.line_comments
            .get(&addr)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Attach a block comment, replacing any previous one at this address.
    pub fn set_block_comment(&mut self, addr: Address, text: &str) {
        self.block_comments.insert(addr, text.to_string());
    }

    pub fn block_comment(&self, addr: Address) -> Option<&str> {
        self.block_comments.get(&addr).map(String::as_str)
    }
}
