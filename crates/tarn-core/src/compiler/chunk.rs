use super::opcode::OpCode;
use crate::error::Span;
use rustc_hash::FxHashMap;
use std::cell::Cell;
use std::fmt::Write as _;
use std::rc::Rc;

/// Sentinel operand written where a forward target is not yet known. No
/// operand may still hold it once compilation completes.
pub const PLACEHOLDER: i32 = -1;

/// Entry sentinel for a function descriptor whose body address is not yet
/// known.
pub const UNRESOLVED_ENTRY: usize = usize::MAX;

/// Compile-time descriptor of a function body. The entry address is patched
/// in place once the body has been emitted, which is why descriptors are
/// deduplicated by identity only.
#[derive(Debug)]
pub struct FunctionConstant {
    pub name: String,
    pub arity: usize,
    pub entry: Cell<usize>,
}

impl FunctionConstant {
    pub fn new(name: impl Into<String>, arity: usize) -> Self {
        Self {
            name: name.into(),
            arity,
            entry: Cell::new(UNRESOLVED_ENTRY),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Constant {
    Number(f64),
    Str(Rc<str>),
    Function(Rc<FunctionConstant>),
}

impl PartialEq for Constant {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Constant::Number(a), Constant::Number(b)) => a == b,
            (Constant::Str(a), Constant::Str(b)) => a == b,
            (Constant::Function(a), Constant::Function(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Dedup key for structurally equal constants
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
enum ConstKey {
    Number(u64),
    Str(Rc<str>),
}

/// Handle to one placeholder operand. Consumed by `Chunk::patch`, so every
/// placeholder is patched exactly once.
#[must_use = "an unpatched placeholder leaves a dangling jump"]
#[derive(Debug)]
pub struct PatchSlot {
    index: usize,
}

/// One compiled unit: flat instruction stream, constant pool, global symbol
/// table and per-slot spans.
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    /// Instruction stream: opcode slot followed by its operand slots. The
    /// program counter indexes this vector; jump targets are absolute.
    pub code: Vec<i32>,
    pub constants: Vec<Constant>,
    /// Global symbol table, index = slot in the global frame
    pub globals: Vec<String>,
    /// Parallel to `code`
    pub spans: Vec<Span>,
    const_index: FxHashMap<ConstKey, usize>,
}

impl Chunk {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reassemble a chunk from its stored parts (deserialization)
    pub(crate) fn from_parts(
        code: Vec<i32>,
        constants: Vec<Constant>,
        globals: Vec<String>,
        spans: Vec<Span>,
    ) -> Self {
        let mut chunk = Self {
            code,
            constants,
            globals,
            spans,
            const_index: FxHashMap::default(),
        };
        chunk.rebuild_constant_index();
        chunk
    }

    pub fn write_op(&mut self, op: OpCode, span: Span) {
        self.code.push(op as i32);
        self.spans.push(span);
    }

    pub fn write_operand(&mut self, value: i32, span: Span) {
        self.code.push(value);
        self.spans.push(span);
    }

    /// Write a placeholder operand and return its patch handle
    pub fn write_placeholder(&mut self, span: Span) -> PatchSlot {
        let index = self.code.len();
        self.code.push(PLACEHOLDER);
        self.spans.push(span);
        PatchSlot { index }
    }

    /// Resolve a placeholder to an explicit value
    pub fn patch(&mut self, slot: PatchSlot, value: i32) {
        debug_assert_eq!(self.code[slot.index], PLACEHOLDER);
        self.code[slot.index] = value;
    }

    /// Resolve a placeholder to the current end of the stream
    pub fn patch_to_here(&mut self, slot: PatchSlot) {
        let target = self.current_offset() as i32;
        self.patch(slot, target);
    }

    /// Add a constant, deduplicating structurally equal numbers and strings.
    /// Function descriptors are always appended.
    pub fn add_constant(&mut self, constant: Constant) -> usize {
        let key = match &constant {
            Constant::Number(n) => Some(ConstKey::Number(n.to_bits())),
            Constant::Str(s) => Some(ConstKey::Str(s.clone())),
            Constant::Function(_) => None,
        };

        if let Some(key) = key {
            if let Some(&index) = self.const_index.get(&key) {
                return index;
            }
            let index = self.constants.len();
            self.constants.push(constant);
            self.const_index.insert(key, index);
            index
        } else {
            self.constants.push(constant);
            self.constants.len() - 1
        }
    }

    pub fn current_offset(&self) -> usize {
        self.code.len()
    }

    pub fn get_span(&self, offset: usize) -> Span {
        if offset < self.spans.len() {
            self.spans[offset]
        } else {
            Span::default()
        }
    }

    /// Offsets of operand slots still holding the placeholder sentinel.
    /// Empty for a completely compiled chunk.
    pub fn unpatched_operands(&self) -> Vec<usize> {
        let mut unpatched = Vec::new();
        let mut offset = 0;
        while offset < self.code.len() {
            let op = match OpCode::from_i32(self.code[offset]) {
                Some(op) => op,
                None => break,
            };
            for i in 1..=op.operand_count() {
                if self.code.get(offset + i) == Some(&PLACEHOLDER) {
                    unpatched.push(offset + i);
                }
            }
            offset += 1 + op.operand_count();
        }
        unpatched
    }

    /// Constant-pool indices of function descriptors whose entry was never
    /// resolved. Empty for a completely compiled chunk.
    pub fn unresolved_function_entries(&self) -> Vec<usize> {
        self.constants
            .iter()
            .enumerate()
            .filter_map(|(i, c)| match c {
                Constant::Function(f) if f.entry.get() == UNRESOLVED_ENTRY => Some(i),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn rebuild_constant_index(&mut self) {
        self.const_index.clear();
        for (i, constant) in self.constants.iter().enumerate() {
            let key = match constant {
                Constant::Number(n) => ConstKey::Number(n.to_bits()),
                Constant::Str(s) => ConstKey::Str(s.clone()),
                Constant::Function(_) => continue,
            };
            self.const_index.entry(key).or_insert(i);
        }
    }

    fn format_constant(&self, idx: usize) -> String {
        match self.constants.get(idx) {
            Some(Constant::Number(n)) => {
                if n.fract() == 0.0 {
                    format!("{}", *n as i64)
                } else {
                    format!("{}", n)
                }
            }
            Some(Constant::Str(s)) => {
                let char_count = s.chars().count();
                if char_count > 32 {
                    let truncated: String = s.chars().take(29).collect();
                    format!("\"{}...\"", truncated)
                } else {
                    format!("\"{}\"", s)
                }
            }
            Some(Constant::Function(f)) => format!("<fn {} @{}>", f.name, f.entry.get()),
            None => format!("???[{}]", idx),
        }
    }

    /// Render the instruction stream for debugging
    pub fn disassemble(&self, name: &str) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "--- {} ---", name);
        let _ = writeln!(
            out,
            "{} slots, {} constants, {} globals",
            self.code.len(),
            self.constants.len(),
            self.globals.len()
        );
        let _ = writeln!(out);

        let mut offset = 0;
        while offset < self.code.len() {
            offset = self.disassemble_instruction(&mut out, offset);
        }

        out
    }

    fn disassemble_instruction(&self, out: &mut String, offset: usize) -> usize {
        let span = self.get_span(offset);
        if offset > 0 && span.start.line == self.get_span(offset - 1).start.line {
            let _ = write!(out, "{:04}      ", offset);
        } else {
            let _ = write!(out, "{:04} {:4} ", offset, span.start.line);
        }

        let op = match OpCode::from_i32(self.code[offset]) {
            Some(op) => op,
            None => {
                let _ = writeln!(out, "??? {}", self.code[offset]);
                return offset + 1;
            }
        };

        match op {
            OpCode::Constant => {
                let idx = self.code[offset + 1];
                let _ = writeln!(
                    out,
                    "{:<14} {}",
                    op.name(),
                    self.format_constant(idx as usize)
                );
            }
            OpCode::GetVar | OpCode::SetVar => {
                let depth = self.code[offset + 1];
                let index = self.code[offset + 2];
                let _ = writeln!(out, "{:<14} ({}, {})", op.name(), depth, index);
            }
            OpCode::GetGlobal | OpCode::SetGlobal => {
                let idx = self.code[offset + 1];
                let name = self
                    .globals
                    .get(idx as usize)
                    .map(String::as_str)
                    .unwrap_or("?");
                let _ = writeln!(out, "{:<14} [{}] {}", op.name(), idx, name);
            }
            OpCode::Jump | OpCode::JumpTrue | OpCode::JumpFalse => {
                let target = self.code[offset + 1];
                let _ = writeln!(out, "{:<14} @{}", op.name(), target);
            }
            OpCode::Call => {
                let argc = self.code[offset + 1];
                let _ = writeln!(out, "{:<14} ({})", op.name(), argc);
            }
            OpCode::EnterScope => {
                let size = self.code[offset + 1];
                let _ = writeln!(out, "{:<14} [{}]", op.name(), size);
            }
            _ => {
                let _ = writeln!(out, "{}", op.name());
            }
        }

        offset + 1 + op.operand_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_is_reported_then_patched() {
        let mut chunk = Chunk::new();
        chunk.write_op(OpCode::Jump, Span::default());
        let slot = chunk.write_placeholder(Span::default());
        assert_eq!(chunk.unpatched_operands(), vec![1]);

        chunk.write_op(OpCode::Null, Span::default());
        chunk.patch_to_here(slot);
        assert!(chunk.unpatched_operands().is_empty());
        assert_eq!(chunk.code[1], 3);
    }

    #[test]
    fn test_number_and_string_constants_dedup() {
        let mut chunk = Chunk::new();
        let a = chunk.add_constant(Constant::Number(2.0));
        let b = chunk.add_constant(Constant::Number(2.0));
        let c = chunk.add_constant(Constant::Str(Rc::from("x")));
        let d = chunk.add_constant(Constant::Str(Rc::from("x")));
        assert_eq!(a, b);
        assert_eq!(c, d);
        assert_eq!(chunk.constants.len(), 2);
    }

    #[test]
    fn test_function_constants_are_identity_deduped() {
        let mut chunk = Chunk::new();
        let a = chunk.add_constant(Constant::Function(Rc::new(FunctionConstant::new("f", 0))));
        let b = chunk.add_constant(Constant::Function(Rc::new(FunctionConstant::new("f", 0))));
        assert_ne!(a, b);
        assert_eq!(chunk.constants.len(), 2);
    }

    #[test]
    fn test_unresolved_function_entries() {
        let mut chunk = Chunk::new();
        let f = Rc::new(FunctionConstant::new("f", 1));
        chunk.add_constant(Constant::Function(f.clone()));
        assert_eq!(chunk.unresolved_function_entries(), vec![0]);
        f.entry.set(10);
        assert!(chunk.unresolved_function_entries().is_empty());
    }

    #[test]
    fn test_disassemble_walks_operand_widths() {
        let mut chunk = Chunk::new();
        let idx = chunk.add_constant(Constant::Number(1.0));
        chunk.write_op(OpCode::Constant, Span::default());
        chunk.write_operand(idx as i32, Span::default());
        chunk.write_op(OpCode::SetVar, Span::default());
        chunk.write_operand(0, Span::default());
        chunk.write_operand(0, Span::default());
        chunk.write_op(OpCode::Pop, Span::default());

        let text = chunk.disassemble("test");
        assert!(text.contains("const"));
        assert!(text.contains("set_var"));
        assert!(text.contains("pop"));
    }
}
