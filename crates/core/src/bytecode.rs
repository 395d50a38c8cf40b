//! Bytecode instruction set
//!
//! Instructions are a single opcode byte followed by zero or more
//! little-endian operands. Operand widths are fixed per opcode: indices,
//! counts and jump targets are `u32`, inline integer constants are `i64`
//! and inline float constants are `f64` bit patterns.
//!
//! [`CodeWriter`] appends instructions to a byte buffer and is the backing
//! store of the function builder. [`CodeReader`] is the decoding side used
//! by the interpreter and the validator.

use num_enum::TryFromPrimitive;

/// Opcode byte values.
///
/// The discriminants are part of the serialized module format and must not
/// be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum Op {
    // Constants
    LoadNull = 0x01,
    LoadTrue = 0x02,
    LoadFalse = 0x03,
    /// Push an inline 64-bit integer constant.
    LoadInt = 0x04,
    /// Push an inline float constant (f64 bit pattern).
    LoadFloat = 0x05,

    // Variable access
    /// Push the module member at index `u32`.
    LoadModule = 0x10,
    /// Pop into the module variable at index `u32`.
    StoreModule = 0x11,
    LoadParam = 0x12,
    StoreParam = 0x13,
    LoadLocal = 0x14,
    StoreLocal = 0x15,
    /// Push the current closure environment.
    LoadClosure = 0x16,
    /// Push the captured slot `idx` found `levels` parents up: `u32 u32`.
    LoadEnv = 0x17,
    StoreEnv = 0x18,
    /// Pop object, push its member named by the symbol at member index `u32`.
    LoadMember = 0x19,
    /// Pop value, pop object, store into the named member.
    StoreMember = 0x1a,
    /// Pop index, pop object, push `object[index]`.
    LoadIndex = 0x1b,
    /// Pop value, pop index, pop object, store `object[index] = value`.
    StoreIndex = 0x1c,

    // Arithmetic
    Add = 0x20,
    Sub = 0x21,
    Mul = 0x22,
    Div = 0x23,
    Mod = 0x24,
    Pow = 0x25,
    LShift = 0x26,
    RShift = 0x27,
    BitAnd = 0x28,
    BitOr = 0x29,
    BitXor = 0x2a,
    BitNot = 0x2b,
    UAdd = 0x2c,
    UNeg = 0x2d,
    LNot = 0x2e,

    // Comparison
    Gt = 0x30,
    Gte = 0x31,
    Lt = 0x32,
    Lte = 0x33,
    Eq = 0x34,
    NEq = 0x35,

    // Control flow
    Jmp = 0x40,
    JmpTrue = 0x41,
    JmpFalse = 0x42,
    JmpNull = 0x43,
    JmpNotNull = 0x44,
    Return = 0x45,
    /// Pop a message value and panic with an assertion failure.
    AssertFail = 0x46,

    // Calls
    /// Call the function below `u32` arguments.
    Call = 0x50,
    /// Pop object, push method-or-field and receiver-or-null for the symbol
    /// at member index `u32`.
    LoadMethod = 0x51,
    /// Call the (method, receiver) pair below `u32` arguments.
    CallMethod = 0x52,
    Pop = 0x53,
    /// Pop into the local slot `u32`.
    PopTo = 0x54,
    Dup = 0x55,

    // Closures
    /// Pop parent env (or null), create an environment with `u32` slots.
    MakeEnv = 0x60,
    /// Pop environment, pop function template, push closure function.
    MakeClosure = 0x61,

    // Containers
    /// Pop `u32` values, push an array.
    Array = 0x70,
    /// Pop `u32` values, push a tuple.
    Tuple = 0x71,
    /// Pop `u32` keys, push a set (hash table with null values).
    Set = 0x72,
    /// Pop `u32` key/value pairs, push a hash table.
    Map = 0x73,

    // String formatting
    /// Push a fresh string builder.
    Formatter = 0x78,
    /// Pop a value, append its display form to the builder below.
    AppendFormat = 0x79,
    /// Pop the builder, push the finished string.
    FormatResult = 0x7a,
}

/// Operand shapes. Every opcode has exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    None,
    /// One u32 (index or count).
    U32,
    /// Two u32s (environment level + slot).
    U32U32,
    /// One u32 branch target (byte offset into the code).
    Target,
    /// Inline i64 constant.
    I64,
    /// Inline f64 constant.
    F64,
}

impl Op {
    pub fn operands(self) -> OperandKind {
        use Op::*;
        match self {
            LoadInt => OperandKind::I64,
            LoadFloat => OperandKind::F64,
            LoadModule | StoreModule | LoadParam | StoreParam | LoadLocal | StoreLocal
            | LoadMember | StoreMember | Call | LoadMethod | CallMethod | PopTo | MakeEnv
            | Array | Tuple | Set | Map => OperandKind::U32,
            LoadEnv | StoreEnv => OperandKind::U32U32,
            Jmp | JmpTrue | JmpFalse | JmpNull | JmpNotNull => OperandKind::Target,
            _ => OperandKind::None,
        }
    }

    /// Encoded size of the instruction, including the opcode byte.
    pub fn encoded_size(self) -> usize {
        1 + match self.operands() {
            OperandKind::None => 0,
            OperandKind::U32 | OperandKind::Target => 4,
            OperandKind::U32U32 => 8,
            OperandKind::I64 | OperandKind::F64 => 8,
        }
    }
}

/// Appends encoded instructions to a byte buffer.
#[derive(Debug, Default)]
pub struct CodeWriter {
    code: Vec<u8>,
}

impl CodeWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn finish(self) -> Vec<u8> {
        self.code
    }

    pub fn op(&mut self, op: Op) {
        debug_assert_eq!(op.operands(), OperandKind::None);
        self.code.push(op as u8);
    }

    pub fn op_u32(&mut self, op: Op, operand: u32) {
        debug_assert!(matches!(
            op.operands(),
            OperandKind::U32 | OperandKind::Target
        ));
        self.code.push(op as u8);
        self.code.extend_from_slice(&operand.to_le_bytes());
    }

    pub fn op_u32_u32(&mut self, op: Op, a: u32, b: u32) {
        debug_assert_eq!(op.operands(), OperandKind::U32U32);
        self.code.push(op as u8);
        self.code.extend_from_slice(&a.to_le_bytes());
        self.code.extend_from_slice(&b.to_le_bytes());
    }

    pub fn op_i64(&mut self, op: Op, operand: i64) {
        debug_assert_eq!(op.operands(), OperandKind::I64);
        self.code.push(op as u8);
        self.code.extend_from_slice(&operand.to_le_bytes());
    }

    pub fn op_f64(&mut self, op: Op, operand: f64) {
        debug_assert_eq!(op.operands(), OperandKind::F64);
        self.code.push(op as u8);
        self.code.extend_from_slice(&operand.to_bits().to_le_bytes());
    }

    /// Overwrite the u32 operand of the instruction starting at `at`.
    /// Used by the builder to patch forward jump targets.
    pub fn patch_u32(&mut self, at: usize, operand: u32) {
        self.code[at + 1..at + 5].copy_from_slice(&operand.to_le_bytes());
    }
}

/// Decoding error: an unknown opcode byte or a truncated operand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    UnknownOpcode { offset: usize, byte: u8 },
    TruncatedOperand { offset: usize },
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::UnknownOpcode { offset, byte } => {
                write!(f, "unknown opcode 0x{byte:02x} at offset {offset}")
            }
            DecodeError::TruncatedOperand { offset } => {
                write!(f, "truncated operand for instruction at offset {offset}")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// Sequential instruction decoder over a code buffer.
#[derive(Debug, Clone, Copy)]
pub struct CodeReader<'a> {
    code: &'a [u8],
    pos: usize,
}

impl<'a> CodeReader<'a> {
    pub fn new(code: &'a [u8]) -> Self {
        Self { code, pos: 0 }
    }

    pub fn at(code: &'a [u8], pos: usize) -> Self {
        Self { code, pos }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn jump(&mut self, target: usize) {
        self.pos = target;
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.code.len()
    }

    pub fn read_op(&mut self) -> Result<Op, DecodeError> {
        let offset = self.pos;
        let byte = *self
            .code
            .get(self.pos)
            .ok_or(DecodeError::TruncatedOperand { offset })?;
        self.pos += 1;
        Op::try_from(byte).map_err(|_| DecodeError::UnknownOpcode { offset, byte })
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.read_bytes::<4>()?;
        Ok(u32::from_le_bytes(bytes))
    }

    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        let bytes = self.read_bytes::<8>()?;
        Ok(i64::from_le_bytes(bytes))
    }

    pub fn read_f64(&mut self) -> Result<f64, DecodeError> {
        let bytes = self.read_bytes::<8>()?;
        Ok(f64::from_bits(u64::from_le_bytes(bytes)))
    }

    fn read_bytes<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let offset = self.pos;
        let end = offset
            .checked_add(N)
            .filter(|&end| end <= self.code.len())
            .ok_or(DecodeError::TruncatedOperand { offset })?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.code[offset..end]);
        self.pos = end;
        Ok(out)
    }

    /// Skip over the operands of `op`, leaving the cursor at the next
    /// instruction.
    pub fn skip_operands(&mut self, op: Op) -> Result<(), DecodeError> {
        let size = op.encoded_size() - 1;
        let offset = self.pos;
        self.pos = offset
            .checked_add(size)
            .filter(|&end| end <= self.code.len())
            .ok_or(DecodeError::TruncatedOperand { offset })?;
        Ok(())
    }
}
