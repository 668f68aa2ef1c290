//! Data directives: non-recursive leaf constructors for text, constants
//! and pointers.
//!
//! Directives size their leaf by inspecting content (a text directive
//! scans for its terminator, pointer directives read one machine pointer)
//! and then claim the range in the annotation tree. They never trigger further
//! discovery themselves; a code-pointer target is handed back to the
//! scheduler instead.

use serde::{Deserialize, Serialize};

use crate::annotations::{AnnotationTree, Leaf, LeafKind, OverlapConflict};
use crate::memory::{AddressSpace, MemError};
use crate::Address;

/// Errors raised while running a data directive
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectiveError {
    #[error("memory error: {0}")]
    Mem(#[from] MemError),

    #[error("overlap: {0}")]
    Overlap(#[from] OverlapConflict),

    /// Constant width not in {1, 2, 4}
    #[error("unsupported constant width {0}")]
    BadWidth(u8),

    /// Constant range does not divide into whole values
    #[error("const range 0x{lo:x}-0x{hi:x} is not a multiple of width {width}")]
    RaggedRange { lo: Address, hi: Address, width: u8 },

    /// Explicit end precedes the start address
    #[error("range 0x{lo:x}-0x{hi:x} is inverted")]
    InvertedRange { lo: Address, hi: Address },
}

/// Sizing and rendering options for a text leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSpec {
    /// Explicit end; when absent the directive scans for a NUL
    pub hi: Option<Address>,
    /// Claimed range is rounded up to this boundary
    pub align: u8,
    /// Also stop the scan at a newline (the newline stays in the text)
    pub split_nl: bool,
}

impl Default for TextSpec {
    fn default() -> Self {
        Self {
            hi: None,
            align: 1,
            split_nl: false,
        }
    }
}

impl TextSpec {
    pub fn with_hi(mut self, hi: Address) -> Self {
        self.hi = Some(hi);
        self
    }

    pub fn with_align(mut self, align: u8) -> Self {
        self.align = align;
        self
    }

    pub fn split_newline(mut self) -> Self {
        self.split_nl = true;
        self
    }
}

/// One queued data request; the non-code half of the worklist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DataDirective {
    Text(TextSpec),
    Const { width: u8, hi: Option<Address> },
    DataPtr,
    CodePtr,
}

impl DataDirective {
    /// Whether an existing leaf satisfies this directive (idempotent
    /// re-request).
    pub(crate) fn matches_leaf(&self, kind: &LeafKind) -> bool {
        matches!(
            (self, kind),
            (DataDirective::Text(_), LeafKind::Text { .. })
                | (DataDirective::Const { .. }, LeafKind::Const { .. })
                | (DataDirective::DataPtr, LeafKind::DataPtr { .. })
                | (DataDirective::CodePtr, LeafKind::CodePtr { .. })
        )
    }
}

/// Size a text leaf without claiming it: returns the claimed end (aligned,
/// terminator included) and the rendered characters. Shared by the text
/// directive and operand handlers that need to step over inline literals.
pub fn scan_text(
    asp: &AddressSpace,
    lo: Address,
    spec: &TextSpec,
) -> Result<(Address, String), DirectiveError> {
    let mut text = String::new();
    let content_hi = match spec.hi {
        Some(hi) => {
            if hi < lo {
                return Err(DirectiveError::InvertedRange { lo, hi });
            }
            for b in asp.read_bytes(lo, (hi - lo) as usize)? {
                push_escaped(&mut text, b);
            }
            hi
        }
        None => {
            let mut at = lo;
            loop {
                let b = asp.read_u8(at)?;
                at += 1;
                if b == 0 {
                    break;
                }
                push_escaped(&mut text, b);
                if spec.split_nl && b == b'\n' {
                    break;
                }
            }
            at
        }
    };
    let align = spec.align.max(1) as Address;
    let rem = content_hi % align;
    let hi = if rem == 0 {
        content_hi
    } else {
        content_hi + align - rem
    };
    Ok((hi, text))
}

fn push_escaped(out: &mut String, b: u8) {
    match b {
        b'\n' => out.push_str("\\n"),
        b'\t' => out.push_str("\\t"),
        b'\\' => out.push_str("\\\\"),
        b'\'' => out.push_str("\\'"),
        0x20..=0x7e => out.push(b as char),
        _ => out.push_str(&format!("\\x{:02x}", b)),
    }
}

/// Run one directive at `lo`: create the leaf (or return the existing one)
/// and, for a code pointer, hand back the target to be scheduled.
pub(crate) fn run(
    asp: &AddressSpace,
    tree: &mut AnnotationTree,
    ptr_width: u8,
    lo: Address,
    directive: &DataDirective,
) -> Result<(Leaf, Option<Address>), DirectiveError> {
    if let Some(existing) = tree.at(lo) {
        if directive.matches_leaf(&existing.kind) {
            log::trace!("directive at 0x{:x} already satisfied", lo);
            return Ok((existing.clone(), None));
        }
    }

    let (leaf, target) = match directive {
        DataDirective::Text(spec) => {
            let (hi, text) = scan_text(asp, lo, spec)?;
            (Leaf::new(lo, hi, LeafKind::Text { text }), None)
        }
        DataDirective::Const { width, hi } => {
            let width = *width;
            if !matches!(width, 1 | 2 | 4) {
                return Err(DirectiveError::BadWidth(width));
            }
            let hi = hi.unwrap_or(lo + width as Address);
            if hi <= lo || (hi - lo) % width as Address != 0 {
                return Err(DirectiveError::RaggedRange { lo, hi, width });
            }
            let mut values = Vec::new();
            let mut at = lo;
            while at < hi {
                values.push(asp.read(at, width as usize)?);
                at += width as Address;
            }
            (Leaf::new(lo, hi, LeafKind::Const { values, width }), None)
        }
        DataDirective::DataPtr => {
            let to = asp.read(lo, ptr_width as usize)?;
            (
                Leaf::new(lo, lo + ptr_width as Address, LeafKind::DataPtr { to }),
                None,
            )
        }
        DataDirective::CodePtr => {
            let to = asp.read(lo, ptr_width as usize)?;
            (
                Leaf::new(lo, lo + ptr_width as Address, LeafKind::CodePtr { to }),
                Some(to),
            )
        }
    };
    let leaf = tree.insert(leaf)?.clone();
    Ok((leaf, target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AddressSpace, Endianness};

    fn space(bytes: &[u8]) -> AddressSpace {
        let mut asp = AddressSpace::new(Endianness::Big);
        asp.map(bytes, 0x200).unwrap();
        asp
    }

    #[test]
    fn test_text_scans_to_nul() {
        let asp = space(b"HELLO\0rest");
        let mut tree = AnnotationTree::new();
        let (leaf, target) =
            run(&asp, &mut tree, 4, 0x200, &DataDirective::Text(TextSpec::default())).unwrap();
        assert_eq!(leaf.lo, 0x200);
        assert_eq!(leaf.hi, 0x206); // terminator claimed
        assert_eq!(leaf.rendered, "'HELLO'");
        assert!(target.is_none());
    }

    #[test]
    fn test_text_alignment_pads_odd_end() {
        // "ABC\0" ends at 0x204; 2-byte alignment claims one pad byte.
        let asp = space(b"ABC\0\0x");
        let mut tree = AnnotationTree::new();
        let spec = TextSpec::default().with_align(2);
        let (leaf, _) = run(&asp, &mut tree, 4, 0x200, &DataDirective::Text(spec)).unwrap();
        assert_eq!(leaf.hi, 0x204);

        let asp = space(b"AB\0\0x");
        let mut tree = AnnotationTree::new();
        let (leaf, _) = run(&asp, &mut tree, 4, 0x200, &DataDirective::Text(spec)).unwrap();
        // content ends at 0x203, padded to 0x204
        assert_eq!(leaf.hi, 0x204);
    }

    #[test]
    fn test_text_split_newline() {
        let asp = space(b"one\ntwo\0");
        let mut tree = AnnotationTree::new();
        let spec = TextSpec::default().split_newline();
        let (leaf, _) = run(&asp, &mut tree, 4, 0x200, &DataDirective::Text(spec)).unwrap();
        assert_eq!(leaf.hi, 0x204);
        assert_eq!(leaf.rendered, "'one\\n'");

        // The next call picks up after the newline.
        let (leaf, _) = run(&asp, &mut tree, 4, 0x204, &DataDirective::Text(spec)).unwrap();
        assert_eq!(leaf.rendered, "'two'");
        assert_eq!(leaf.hi, 0x208);
    }

    #[test]
    fn test_text_explicit_range() {
        let asp = space(b"ABCDEF");
        let mut tree = AnnotationTree::new();
        let spec = TextSpec::default().with_hi(0x204);
        let (leaf, _) = run(&asp, &mut tree, 4, 0x200, &DataDirective::Text(spec)).unwrap();
        assert_eq!(leaf.hi, 0x204);
        assert_eq!(leaf.rendered, "'ABCD'");
    }

    #[test]
    fn test_text_escapes_unprintable() {
        let asp = space(&[0x41, 0x07, 0x27, 0x00]);
        let mut tree = AnnotationTree::new();
        let (leaf, _) =
            run(&asp, &mut tree, 4, 0x200, &DataDirective::Text(TextSpec::default())).unwrap();
        assert_eq!(leaf.rendered, "'A\\x07\\''");
    }

    #[test]
    fn test_text_runs_off_map() {
        let asp = space(b"NOEND");
        let mut tree = AnnotationTree::new();
        let err = run(&asp, &mut tree, 4, 0x200, &DataDirective::Text(TextSpec::default()))
            .unwrap_err();
        assert!(matches!(err, DirectiveError::Mem(MemError::Unmapped(_))));
        assert!(tree.is_empty());
    }

    #[test]
    fn test_text_idempotent() {
        let asp = space(b"HI\0");
        let mut tree = AnnotationTree::new();
        let d = DataDirective::Text(TextSpec::default());
        let (first, _) = run(&asp, &mut tree, 4, 0x200, &d).unwrap();
        let (second, _) = run(&asp, &mut tree, 4, 0x200, &d).unwrap();
        assert_eq!(first, second);
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_const_single_and_range() {
        let asp = space(&[0x12, 0x34, 0x56, 0x78]);
        let mut tree = AnnotationTree::new();

        let (leaf, _) = run(
            &asp,
            &mut tree,
            4,
            0x200,
            &DataDirective::Const { width: 2, hi: None },
        )
        .unwrap();
        assert_eq!(leaf.hi, 0x202);
        assert_eq!(leaf.rendered, ".const\t0x1234");

        let (leaf, _) = run(
            &asp,
            &mut tree,
            4,
            0x202,
            &DataDirective::Const {
                width: 1,
                hi: Some(0x204),
            },
        )
        .unwrap();
        assert_eq!(leaf.rendered, ".const\t0x56,0x78");
    }

    #[test]
    fn test_const_bad_shapes() {
        let asp = space(&[0; 8]);
        let mut tree = AnnotationTree::new();
        assert_eq!(
            run(
                &asp,
                &mut tree,
                4,
                0x200,
                &DataDirective::Const { width: 3, hi: None }
            )
            .unwrap_err(),
            DirectiveError::BadWidth(3)
        );
        assert!(matches!(
            run(
                &asp,
                &mut tree,
                4,
                0x200,
                &DataDirective::Const {
                    width: 2,
                    hi: Some(0x203)
                }
            )
            .unwrap_err(),
            DirectiveError::RaggedRange { .. }
        ));
    }

    #[test]
    fn test_pointers() {
        let asp = space(&[0x00, 0x00, 0x30, 0x10, 0x00, 0x00, 0x40, 0x20]);
        let mut tree = AnnotationTree::new();

        let (leaf, target) = run(&asp, &mut tree, 4, 0x200, &DataDirective::DataPtr).unwrap();
        assert_eq!(leaf.kind, LeafKind::DataPtr { to: 0x3010 });
        assert_eq!(leaf.hi, 0x204);
        assert!(target.is_none());

        let (leaf, target) = run(&asp, &mut tree, 4, 0x204, &DataDirective::CodePtr).unwrap();
        assert_eq!(leaf.rendered, ".codeptr\t0x4020");
        assert_eq!(target, Some(0x4020));
    }

    #[test]
    fn test_kind_mismatch_is_a_conflict() {
        let asp = space(&[0x00, 0x00, 0x30, 0x10]);
        let mut tree = AnnotationTree::new();
        run(&asp, &mut tree, 4, 0x200, &DataDirective::DataPtr).unwrap();
        let err = run(
            &asp,
            &mut tree,
            4,
            0x200,
            &DataDirective::Const { width: 1, hi: None },
        )
        .unwrap_err();
        assert!(matches!(err, DirectiveError::Overlap(_)));
    }
}
