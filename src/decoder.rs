//! Table-driven instruction decoding.
//!
//! An instruction set is declared as text: one template per line, each a
//! mnemonic, an operand spec, and a bit pattern mixing fixed bits, named
//! fields and wildcards. `load_table` compiles the text once into immutable
//! per-word masks and field slices; nothing on the decode path ever touches
//! the textual form again.
//!
//! Matching picks the template with the most fixed bits among those whose
//! fixed bits agree with memory, breaking ties by declaration order. A
//! matched template's operand atoms then run in order: named fields render
//! as immediates, handler atoms dispatch through the handler table, and
//! flow markers (`>j`, `>jc`, `>c`, `>r`, `>i`) emit flow edges. Handlers
//! may consume additional words beyond the fixed header, so templates can
//! grow as they decode.

use std::collections::{BTreeMap, HashMap};

use crate::directives::{DataDirective, TextSpec};
use crate::engine::{WorkItem, WorkKind};
use crate::flow::FlowEdge;
use crate::memory::{AddressSpace, MemError};
use crate::Address;

/// Errors found while compiling a template table
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TableError {
    /// Word size other than 8 or 16 bits
    #[error("unsupported word size {0} (expected 8 or 16)")]
    BadWordSize(u32),

    /// Line is missing one of mnemonic, operand spec, pattern
    #[error("line {0}: template needs a mnemonic, an operand spec and a pattern")]
    Truncated(usize),

    /// Unparseable pattern token
    #[error("line {line}: bad pattern token '{token}'")]
    BadToken { line: usize, token: String },

    /// Pattern length is not a whole number of words
    #[error("line {line}: pattern is {bits} bits, not a multiple of the {word}-bit word")]
    Ragged { line: usize, bits: u32, word: u32 },

    /// Field does not fit in 64 bits
    #[error("line {line}: field '{name}' is wider than 64 bits")]
    FieldTooWide { line: usize, name: String },

    /// Operand atom is neither a field, a handler nor a flow marker
    #[error("line {line}: unknown operand atom '{atom}'")]
    UnknownAtom { line: usize, atom: String },
}

/// Errors raised while decoding one candidate address
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// No template's fixed bits match the bytes at the address
    #[error("no template matches at 0x{0:x}")]
    NoMatch(Address),

    /// A handler rejected the bit pattern
    #[error("template rejected at 0x{addr:x}: {reason}")]
    Rejected { addr: Address, reason: String },

    /// Handler asked for a field the template does not define
    #[error("template defines no field '{0}'")]
    MissingField(String),

    /// A flow marker ran with no destination assigned
    #[error("flow marker without a destination at 0x{0:x}")]
    MissingDest(Address),

    /// Memory ran out under the decode
    #[error("memory error: {0}")]
    Mem(#[from] MemError),
}

/// One decode attempt that did not produce an instruction. Deferred work
/// requested before the failure still reaches the scheduler, so a
/// rejecting template can hand off e.g. an inline text literal.
#[derive(Debug)]
pub struct DecodeFailure {
    pub addr: Address,
    pub error: DecodeError,
    pub followups: Vec<WorkItem>,
}

/// A successfully decoded instruction plus deferred follow-up requests.
#[derive(Debug)]
pub struct DecodeOutcome {
    pub ins: DecodedIns,
    pub followups: Vec<WorkItem>,
}

/// One decoded instruction, before it becomes a leaf.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedIns {
    pub lo: Address,
    /// One past the last byte consumed; grows while operands assemble
    pub hi: Address,
    pub mnemonic: String,
    pub operands: Vec<String>,
    pub flow: Vec<FlowEdge>,
    pub compact: bool,
    /// Destination set by operand handlers, consumed by flow markers
    pub dst: Option<Address>,
}

/// Operand assembly routine resolved through the handler table.
pub type OperandHandler = fn(&mut DecodeCursor<'_>) -> Result<Option<String>, DecodeError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlowMarker {
    Jump,
    CondJump,
    Call,
    Ret,
    Indirect,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum OperandAtom {
    /// Named field rendered as a hex immediate
    Field(String),
    /// Dispatch through the handler table
    Handler(String),
    Flow(FlowMarker),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldSlice {
    word: usize,
    shift: u32,
    width: u32,
}

#[derive(Debug, Clone)]
struct Template {
    mnemonic: String,
    atoms: Vec<OperandAtom>,
    /// Per-word (fixed-bit mask, expected value)
    words: Vec<(u64, u64)>,
    fields: Vec<(String, Vec<FieldSlice>)>,
    fixed_bits: u32,
}

/// A compiled, immutable instruction set.
#[derive(Debug)]
pub struct InstructionSet {
    word_bits: u32,
    templates: Vec<Template>,
    handlers: HashMap<String, OperandHandler>,
}

impl InstructionSet {
    /// Create an empty set decoding `word_bits`-wide memory words (8 or
    /// 16).
    pub fn new(word_bits: u32) -> Result<Self, TableError> {
        if !matches!(word_bits, 8 | 16) {
            return Err(TableError::BadWordSize(word_bits));
        }
        Ok(Self {
            word_bits,
            templates: Vec::new(),
            handlers: HashMap::new(),
        })
    }

    pub fn word_bits(&self) -> u32 {
        self.word_bits
    }

    fn word_bytes(&self) -> u64 {
        (self.word_bits / 8) as u64
    }

    /// Register an operand handler. Handlers must be registered before the
    /// tables that reference them are loaded.
    pub fn add_handler(&mut self, name: &str, handler: OperandHandler) {
        self.handlers.insert(name.to_string(), handler);
    }

    /// Compile template lines into the set. `#` starts a comment; blank
    /// lines are skipped. May be called repeatedly to layer tables.
    pub fn load_table(&mut self, text: &str) -> Result<(), TableError> {
        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let template = self.compile_line(line_no, line)?;
            log::trace!(
                "compiled template {} ({} fixed bits, {} words)",
                template.mnemonic,
                template.fixed_bits,
                template.words.len()
            );
            self.templates.push(template);
        }
        // Most fixed bits first; the stable sort keeps declaration order
        // among equals, so the first masked-compare hit is the winner.
        self.templates.sort_by_key(|t| std::cmp::Reverse(t.fixed_bits));
        Ok(())
    }

    fn compile_line(&self, line_no: usize, line: &str) -> Result<Template, TableError> {
        let mut tokens = line.split_whitespace();
        let mnemonic = tokens.next().ok_or(TableError::Truncated(line_no))?;
        let operand_spec = tokens.next().ok_or(TableError::Truncated(line_no))?;

        let mut words: Vec<(u64, u64)> = Vec::new();
        let mut fields: Vec<(String, Vec<FieldSlice>)> = Vec::new();
        let mut bit: u32 = 0;
        let mut fixed_bits: u32 = 0;
        let wb = self.word_bits;

        let mut push_slice = |fields: &mut Vec<(String, Vec<FieldSlice>)>,
                              name: &str,
                              slice: FieldSlice| {
            if let Some((_, slices)) = fields.iter_mut().find(|(n, _)| n == name) {
                slices.push(slice);
            } else {
                fields.push((name.to_string(), vec![slice]));
            }
        };

        let mut saw_pattern = false;
        for token in tokens {
            saw_pattern = true;
            match token {
                "0" | "1" | "?" => {
                    let word = (bit / wb) as usize;
                    if words.len() <= word {
                        words.push((0, 0));
                    }
                    if token != "?" {
                        let shift = wb - 1 - (bit % wb);
                        words[word].0 |= 1 << shift;
                        if token == "1" {
                            words[word].1 |= 1 << shift;
                        }
                        fixed_bits += 1;
                    }
                    bit += 1;
                }
                _ => {
                    let (name, width) = parse_field_token(line_no, token)?;
                    let total: u32 = fields
                        .iter()
                        .find(|(n, _)| n == name)
                        .map(|(_, s)| s.iter().map(|x| x.width).sum())
                        .unwrap_or(0);
                    if total + width > 64 {
                        return Err(TableError::FieldTooWide {
                            line: line_no,
                            name: name.to_string(),
                        });
                    }
                    let mut remaining = width;
                    while remaining > 0 {
                        let word = (bit / wb) as usize;
                        if words.len() <= word {
                            words.push((0, 0));
                        }
                        let offset = bit % wb;
                        let take = remaining.min(wb - offset);
                        push_slice(
                            &mut fields,
                            name,
                            FieldSlice {
                                word,
                                shift: wb - offset - take,
                                width: take,
                            },
                        );
                        bit += take;
                        remaining -= take;
                    }
                }
            }
        }
        if !saw_pattern {
            return Err(TableError::Truncated(line_no));
        }
        if bit % wb != 0 {
            return Err(TableError::Ragged {
                line: line_no,
                bits: bit,
                word: wb,
            });
        }

        let mut atoms = Vec::new();
        if operand_spec != "-" {
            for atom in operand_spec.split(',') {
                if let Some(marker) = atom.strip_prefix('>') {
                    let marker = match marker {
                        "j" => FlowMarker::Jump,
                        "jc" => FlowMarker::CondJump,
                        "c" => FlowMarker::Call,
                        "r" => FlowMarker::Ret,
                        "i" => FlowMarker::Indirect,
                        _ => {
                            return Err(TableError::UnknownAtom {
                                line: line_no,
                                atom: atom.to_string(),
                            })
                        }
                    };
                    atoms.push(OperandAtom::Flow(marker));
                } else if self.handlers.contains_key(atom) {
                    atoms.push(OperandAtom::Handler(atom.to_string()));
                } else if fields.iter().any(|(n, _)| n == atom) {
                    atoms.push(OperandAtom::Field(atom.to_string()));
                } else {
                    return Err(TableError::UnknownAtom {
                        line: line_no,
                        atom: atom.to_string(),
                    });
                }
            }
        }

        Ok(Template {
            mnemonic: mnemonic.to_string(),
            atoms,
            words,
            fields,
            fixed_bits,
        })
    }

    /// Decode one instruction at `at`.
    pub fn decode(
        &self,
        asp: &AddressSpace,
        at: Address,
    ) -> Result<DecodeOutcome, DecodeFailure> {
        let wb = self.word_bytes();
        let fail = |error| DecodeFailure {
            addr: at,
            error,
            followups: Vec::new(),
        };

        // The first word decides mapping errors; longer templates that run
        // off the mapped range simply do not match.
        let mut cache: Vec<u64> = Vec::new();
        match asp.read(at, wb as usize) {
            Ok(w) => cache.push(w),
            Err(e) => return Err(fail(DecodeError::Mem(e))),
        }

        let template = 'search: {
            'next: for t in &self.templates {
                for (i, &(mask, value)) in t.words.iter().enumerate() {
                    if cache.len() <= i {
                        match asp.read(at + i as u64 * wb, wb as usize) {
                            Ok(w) => cache.push(w),
                            Err(_) => continue 'next,
                        }
                    }
                    if cache[i] & mask != value {
                        continue 'next;
                    }
                }
                break 'search Some(t);
            }
            None
        };
        let Some(template) = template else {
            return Err(fail(DecodeError::NoMatch(at)));
        };

        let mut field_values = BTreeMap::new();
        for (name, slices) in &template.fields {
            let mut value: u64 = 0;
            for s in slices {
                let part = (cache[s.word] >> s.shift) & ((1u64 << s.width) - 1);
                value = (value << s.width) | part;
            }
            field_values.insert(name.clone(), value);
        }

        let mut cursor = DecodeCursor {
            asp,
            lo: at,
            hi: at + template.words.len() as u64 * wb,
            word_bytes: wb,
            fields: field_values,
            dst: None,
            compact: false,
            followups: Vec::new(),
        };

        let mut operands = Vec::new();
        let mut markers = Vec::new();
        for atom in &template.atoms {
            match atom {
                OperandAtom::Field(name) => {
                    let v = match cursor.field(name) {
                        Ok(v) => v,
                        Err(e) => {
                            return Err(DecodeFailure {
                                addr: at,
                                error: e,
                                followups: cursor.followups,
                            })
                        }
                    };
                    operands.push(format!("#0x{:x}", v));
                }
                OperandAtom::Handler(name) => {
                    let handler = self.handlers[name.as_str()];
                    match handler(&mut cursor) {
                        Ok(Some(text)) => operands.push(text),
                        Ok(None) => {}
                        Err(e) => {
                            return Err(DecodeFailure {
                                addr: at,
                                error: e,
                                followups: cursor.followups,
                            })
                        }
                    }
                }
                OperandAtom::Flow(m) => markers.push(*m),
            }
        }

        // Flow edges are built after all operands so destinations and the
        // final extent are settled.
        let mut flow = Vec::new();
        for m in markers {
            let edge = match m {
                FlowMarker::Ret => FlowEdge::Return,
                FlowMarker::Indirect => FlowEdge::Unknown,
                FlowMarker::Jump | FlowMarker::CondJump | FlowMarker::Call => {
                    let Some(to) = cursor.dst else {
                        return Err(DecodeFailure {
                            addr: at,
                            error: DecodeError::MissingDest(at),
                            followups: cursor.followups,
                        });
                    };
                    match m {
                        FlowMarker::Jump => FlowEdge::Jump {
                            to,
                            conditional: false,
                        },
                        FlowMarker::CondJump => FlowEdge::Jump {
                            to,
                            conditional: true,
                        },
                        _ => FlowEdge::Call {
                            to,
                            ret: cursor.hi,
                        },
                    }
                }
            };
            flow.push(edge);
        }

        Ok(DecodeOutcome {
            ins: DecodedIns {
                lo: at,
                hi: cursor.hi,
                mnemonic: template.mnemonic.clone(),
                operands,
                flow,
                compact: cursor.compact,
                dst: cursor.dst,
            },
            followups: cursor.followups,
        })
    }
}

fn parse_field_token<'a>(line_no: usize, token: &'a str) -> Result<(&'a str, u32), TableError> {
    let bad = || TableError::BadToken {
        line: line_no,
        token: token.to_string(),
    };
    let (name, width) = token.split_once(':').ok_or_else(bad)?;
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(bad());
    }
    let width: u32 = width.parse().map_err(|_| bad())?;
    if width == 0 {
        return Err(bad());
    }
    Ok((name, width))
}

/// Working state of one decode, handed to operand handlers.
pub struct DecodeCursor<'a> {
    asp: &'a AddressSpace,
    pub lo: Address,
    /// One past the bytes consumed so far; `take_word` advances it
    pub hi: Address,
    word_bytes: u64,
    fields: BTreeMap<String, u64>,
    pub dst: Option<Address>,
    pub compact: bool,
    followups: Vec<WorkItem>,
}

impl<'a> DecodeCursor<'a> {
    /// The extracted value of a named field.
    pub fn field(&self, name: &str) -> Result<u64, DecodeError> {
        self.fields
            .get(name)
            .copied()
            .ok_or_else(|| DecodeError::MissingField(name.to_string()))
    }

    /// Consume one more memory word past the current extent.
    pub fn take_word(&mut self) -> Result<u64, DecodeError> {
        let w = self.asp.read(self.hi, self.word_bytes as usize)?;
        self.hi += self.word_bytes;
        Ok(w)
    }

    /// The address space under the decode, for out-of-line reads.
    pub fn space(&self) -> &AddressSpace {
        self.asp
    }

    /// Assign the destination consumed by flow markers.
    pub fn set_dst(&mut self, addr: Address) {
        self.dst = Some(addr);
    }

    /// Build a rejection error for this decode.
    pub fn reject(&self, reason: &str) -> DecodeError {
        DecodeError::Rejected {
            addr: self.lo,
            reason: reason.to_string(),
        }
    }

    /// Ask the scheduler to decode `addr` once this item completes.
    pub fn defer_decode(&mut self, addr: Address) {
        self.followups.push(WorkItem {
            addr,
            kind: WorkKind::Instruction,
        });
    }

    /// Ask the scheduler to lay down a text leaf at `addr`.
    pub fn defer_text(&mut self, addr: Address, spec: TextSpec) {
        self.followups.push(WorkItem {
            addr,
            kind: WorkKind::Data(DataDirective::Text(spec)),
        });
    }

    /// Ask the scheduler to run an arbitrary follow-up item.
    pub fn defer(&mut self, item: WorkItem) {
        self.followups.push(item);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AddressSpace, Endianness};

    fn space(bytes: &[u8]) -> AddressSpace {
        let mut asp = AddressSpace::new(Endianness::Big);
        asp.map(bytes, 0x100).unwrap();
        asp
    }

    #[test]
    fn test_bad_word_size() {
        assert_eq!(
            InstructionSet::new(12).unwrap_err(),
            TableError::BadWordSize(12)
        );
    }

    #[test]
    fn test_ragged_pattern_rejected() {
        let mut isa = InstructionSet::new(8).unwrap();
        let err = isa.load_table("BAD - 0 1 0").unwrap_err();
        assert!(matches!(err, TableError::Ragged { bits: 3, .. }));
    }

    #[test]
    fn test_bad_token_rejected() {
        let mut isa = InstructionSet::new(8).unwrap();
        let err = isa.load_table("BAD - 0 1 2 0 0 0 0 0").unwrap_err();
        assert!(matches!(err, TableError::BadToken { .. }));
    }

    #[test]
    fn test_unknown_atom_rejected() {
        let mut isa = InstructionSet::new(8).unwrap();
        let err = isa.load_table("BAD nosuch 0 0 0 0 0 0 0 0").unwrap_err();
        assert_eq!(
            err,
            TableError::UnknownAtom {
                line: 1,
                atom: "nosuch".to_string()
            }
        );
    }

    #[test]
    fn test_comments_and_blanks_skipped() {
        let mut isa = InstructionSet::new(8).unwrap();
        isa.load_table("\n# header comment\nNOP - 0 0 0 0 0 0 0 0  # trailing\n\n")
            .unwrap();
        let out = isa.decode(&space(&[0x00]), 0x100).unwrap();
        assert_eq!(out.ins.mnemonic, "NOP");
        assert_eq!(out.ins.hi, 0x101);
    }

    #[test]
    fn test_field_extraction() {
        let mut isa = InstructionSet::new(8).unwrap();
        isa.load_table("LDI r,v 0 1 r:2 v:4").unwrap();
        let out = isa.decode(&space(&[0b0110_1011]), 0x100).unwrap();
        assert_eq!(out.ins.mnemonic, "LDI");
        assert_eq!(out.ins.operands, vec!["#0x2", "#0xb"]);
    }

    #[test]
    fn test_split_field_concatenates_msb_first() {
        // `a` is split around fixed bits; first occurrence is most
        // significant.
        let mut isa = InstructionSet::new(8).unwrap();
        isa.load_table("SPL a a:2 1 0 a:4").unwrap();
        let out = isa.decode(&space(&[0b1110_0101]), 0x100).unwrap();
        // a = 0b11 ++ 0b0101
        assert_eq!(out.ins.operands, vec!["#0x35"]);
    }

    #[test]
    fn test_field_crossing_word_boundary() {
        let mut isa = InstructionSet::new(8).unwrap();
        isa.load_table("WIDE n 0 0 0 0 n:12").unwrap();
        let out = isa.decode(&space(&[0x0a, 0xbc]), 0x100).unwrap();
        assert_eq!(out.ins.operands, vec!["#0xabc"]);
        assert_eq!(out.ins.hi, 0x102);
    }

    #[test]
    fn test_longest_match_wins() {
        let mut isa = InstructionSet::new(8).unwrap();
        isa.load_table("GEN n 1 1 1 1 n:4\nEXACT - 1 1 1 1 0 0 0 0")
            .unwrap();
        let out = isa.decode(&space(&[0xf0]), 0x100).unwrap();
        assert_eq!(out.ins.mnemonic, "EXACT");
        let out = isa.decode(&space(&[0xf5]), 0x100).unwrap();
        assert_eq!(out.ins.mnemonic, "GEN");
    }

    #[test]
    fn test_declaration_order_breaks_ties() {
        let mut isa = InstructionSet::new(8).unwrap();
        isa.load_table("FIRST - 1 0 1 0 ? ? ? ?\nSECOND - 1 0 1 0 ? ? ? ?")
            .unwrap();
        let out = isa.decode(&space(&[0xa7]), 0x100).unwrap();
        assert_eq!(out.ins.mnemonic, "FIRST");
    }

    #[test]
    fn test_no_match_reported() {
        let mut isa = InstructionSet::new(8).unwrap();
        isa.load_table("ONLY - 0 0 0 0 0 0 0 0").unwrap();
        let fail = isa.decode(&space(&[0xff]), 0x100).unwrap_err();
        assert_eq!(fail.error, DecodeError::NoMatch(0x100));
    }

    #[test]
    fn test_unmapped_first_word() {
        let isa = {
            let mut isa = InstructionSet::new(8).unwrap();
            isa.load_table("NOP - 0 0 0 0 0 0 0 0").unwrap();
            isa
        };
        let fail = isa.decode(&space(&[0x00]), 0x900).unwrap_err();
        assert!(matches!(fail.error, DecodeError::Mem(_)));
    }

    #[test]
    fn test_long_template_off_the_end_does_not_match() {
        let mut isa = InstructionSet::new(8).unwrap();
        isa.load_table("LONG n 1 1 1 1 0 0 0 0 n:8\nSHORT - 1 1 1 1 0 0 0 0")
            .unwrap();
        // Only one byte mapped: LONG cannot fetch its second word, SHORT
        // still matches.
        let out = isa.decode(&space(&[0xf0]), 0x100).unwrap();
        assert_eq!(out.ins.mnemonic, "SHORT");
    }

    #[test]
    fn test_sixteen_bit_words_big_endian() {
        let mut isa = InstructionSet::new(16).unwrap();
        isa.load_table("OP16 n 0 1 0 0 1 1 1 0 1 0 0 1 n:4").unwrap();
        let mut asp = AddressSpace::new(Endianness::Big);
        asp.map(&[0x4e, 0x96], 0x100).unwrap();
        let out = isa.decode(&asp, 0x100).unwrap();
        assert_eq!(out.ins.operands, vec!["#0x6"]);
        assert_eq!(out.ins.hi, 0x102);
    }

    fn take_count_words(cur: &mut DecodeCursor<'_>) -> Result<Option<String>, DecodeError> {
        let n = cur.field("n")?;
        for _ in 0..n {
            cur.take_word()?;
        }
        Ok(Some(format!("+{}", n)))
    }

    #[test]
    fn test_grow_as_you_decode() {
        let mut isa = InstructionSet::new(8).unwrap();
        isa.add_handler("ext", take_count_words);
        isa.load_table("EXT ext 0 0 1 0 n:4").unwrap();
        let out = isa
            .decode(&space(&[0x23, 0xaa, 0xbb, 0xcc, 0x00]), 0x100)
            .unwrap();
        assert_eq!(out.ins.hi, 0x104);
        assert_eq!(out.ins.operands, vec!["+3"]);
    }

    fn always_reject(cur: &mut DecodeCursor<'_>) -> Result<Option<String>, DecodeError> {
        cur.defer_decode(cur.hi + 4);
        Err(cur.reject("not a real encoding"))
    }

    #[test]
    fn test_rejection_keeps_deferred_work() {
        let mut isa = InstructionSet::new(8).unwrap();
        isa.add_handler("chk", always_reject);
        isa.load_table("TRAP chk 0 0 0 0 1 1 1 1").unwrap();
        let fail = isa.decode(&space(&[0x0f]), 0x100).unwrap_err();
        assert!(matches!(fail.error, DecodeError::Rejected { .. }));
        assert_eq!(fail.followups.len(), 1);
        assert_eq!(fail.followups[0].addr, 0x105);
    }

    fn dst_from_addr16(cur: &mut DecodeCursor<'_>) -> Result<Option<String>, DecodeError> {
        let target = (cur.field("ahi")? << 8) | cur.field("alo")?;
        cur.set_dst(target);
        Ok(Some(format!("0x{:04x}", target)))
    }

    #[test]
    fn test_flow_markers_emit_edges() {
        let mut isa = InstructionSet::new(8).unwrap();
        isa.add_handler("dst", dst_from_addr16);
        isa.load_table(
            "JMP dst,>j 0 0 0 1 0 0 0 0 ahi:8 alo:8\n\
             JSR dst,>c 0 0 0 1 0 0 1 0 ahi:8 alo:8\n\
             RET >r     0 0 0 0 0 0 0 1\n\
             JMPX >i    0 0 0 1 0 0 1 1",
        )
        .unwrap();

        let out = isa.decode(&space(&[0x10, 0x02, 0x34]), 0x100).unwrap();
        assert_eq!(
            out.ins.flow,
            vec![FlowEdge::Jump {
                to: 0x234,
                conditional: false
            }]
        );

        let out = isa.decode(&space(&[0x12, 0x02, 0x34]), 0x100).unwrap();
        assert_eq!(
            out.ins.flow,
            vec![FlowEdge::Call {
                to: 0x234,
                ret: 0x103
            }]
        );

        let out = isa.decode(&space(&[0x01]), 0x100).unwrap();
        assert_eq!(out.ins.flow, vec![FlowEdge::Return]);

        let out = isa.decode(&space(&[0x13]), 0x100).unwrap();
        assert_eq!(out.ins.flow, vec![FlowEdge::Unknown]);
    }

    #[test]
    fn test_flow_marker_without_dst_fails() {
        let mut isa = InstructionSet::new(8).unwrap();
        isa.load_table("JMP >j 0 0 0 1 0 0 0 0").unwrap();
        let fail = isa.decode(&space(&[0x10]), 0x100).unwrap_err();
        assert_eq!(fail.error, DecodeError::MissingDest(0x100));
    }
}
