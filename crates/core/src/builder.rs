//! Module and function builders
//!
//! The builders are the assembler layer between a code generator (or a
//! test) and the raw [`CodeWriter`]: functions are assembled with symbolic
//! labels for forward jumps, and the module builder deduplicates constant
//! members so repeated symbols/strings share one member slot.

use crate::bytecode::{CodeWriter, Op, OperandKind};
use crate::module::{ConstantData, FunctionData, MemberData, ModuleData};
use std::collections::HashMap;

/// A branch target created by [`FunctionBuilder::label`].
///
/// Labels may be referenced before they are bound; binding patches all
/// pending references.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

#[derive(Debug)]
struct LabelState {
    /// Byte offset of the label, once bound.
    target: Option<u32>,
    /// Instruction offsets whose operand awaits the target.
    pending: Vec<usize>,
}

/// Assembles the bytecode of one function.
#[derive(Debug)]
pub struct FunctionBuilder {
    name: String,
    params: u32,
    locals: u32,
    writer: CodeWriter,
    labels: Vec<LabelState>,
}

impl FunctionBuilder {
    pub fn new(name: impl Into<String>, params: u32, locals: u32) -> Self {
        Self {
            name: name.into(),
            params,
            locals,
            writer: CodeWriter::new(),
            labels: Vec::new(),
        }
    }

    pub fn label(&mut self) -> Label {
        self.labels.push(LabelState {
            target: None,
            pending: Vec::new(),
        });
        Label(self.labels.len() - 1)
    }

    /// Bind `label` to the current code position.
    pub fn bind(&mut self, label: Label) {
        let target = self.writer.len() as u32;
        let state = &mut self.labels[label.0];
        assert!(state.target.is_none(), "label bound twice");
        state.target = Some(target);
        for at in state.pending.drain(..) {
            self.writer.patch_u32(at, target);
        }
    }

    pub fn op(&mut self, op: Op) -> &mut Self {
        self.writer.op(op);
        self
    }

    pub fn op_u32(&mut self, op: Op, operand: u32) -> &mut Self {
        self.writer.op_u32(op, operand);
        self
    }

    pub fn op_u32_u32(&mut self, op: Op, a: u32, b: u32) -> &mut Self {
        self.writer.op_u32_u32(op, a, b);
        self
    }

    pub fn load_int(&mut self, value: i64) -> &mut Self {
        self.writer.op_i64(Op::LoadInt, value);
        self
    }

    pub fn load_float(&mut self, value: f64) -> &mut Self {
        self.writer.op_f64(Op::LoadFloat, value);
        self
    }

    /// Emit a branch to `label`, patching later if it is not yet bound.
    pub fn branch(&mut self, op: Op, label: Label) -> &mut Self {
        debug_assert_eq!(op.operands(), OperandKind::Target);
        let at = self.writer.len();
        match self.labels[label.0].target {
            Some(target) => self.writer.op_u32(op, target),
            None => {
                self.writer.op_u32(op, u32::MAX);
                self.labels[label.0].pending.push(at);
            }
        }
        self
    }

    pub fn finish(self) -> FunctionData {
        for (index, label) in self.labels.iter().enumerate() {
            assert!(
                label.pending.is_empty(),
                "label {index} referenced but never bound"
            );
        }
        FunctionData {
            name: self.name,
            params: self.params,
            locals: self.locals,
            code: self.writer.finish(),
        }
    }
}

/// Assembles a [`ModuleData`], deduplicating constant members.
#[derive(Debug)]
pub struct ModuleBuilder {
    name: String,
    members: Vec<MemberData>,
    exports: Vec<(String, u32)>,
    initializer: Option<u32>,
    constant_index: HashMap<ConstantKey, u32>,
}

/// Hashable identity for constant deduplication. Floats are keyed by bit
/// pattern so that distinct NaNs stay distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ConstantKey {
    Null,
    Bool(bool),
    Integer(i64),
    Float(u64),
    String(String),
    Symbol(String),
}

fn constant_key(constant: &ConstantData) -> ConstantKey {
    match constant {
        ConstantData::Null => ConstantKey::Null,
        ConstantData::Bool(b) => ConstantKey::Bool(*b),
        ConstantData::Integer(i) => ConstantKey::Integer(*i),
        ConstantData::Float(f) => ConstantKey::Float(f.to_bits()),
        ConstantData::String(s) => ConstantKey::String(s.clone()),
        ConstantData::Symbol(s) => ConstantKey::Symbol(s.clone()),
    }
}

impl ModuleBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: Vec::new(),
            exports: Vec::new(),
            initializer: None,
            constant_index: HashMap::new(),
        }
    }

    fn push_member(&mut self, member: MemberData) -> u32 {
        let index = self.members.len() as u32;
        self.members.push(member);
        index
    }

    /// Add an import placeholder, resolved by the runtime linker.
    pub fn import(&mut self, module_name: impl Into<String>) -> u32 {
        self.push_member(MemberData::Import {
            module_name: module_name.into(),
        })
    }

    /// Add a mutable module variable.
    pub fn variable(&mut self, name: impl Into<String>, initial: Option<ConstantData>) -> u32 {
        self.push_member(MemberData::Variable {
            name: name.into(),
            initial,
        })
    }

    /// Add a function member.
    pub fn function(&mut self, function: FunctionData) -> u32 {
        self.push_member(MemberData::Function(function))
    }

    /// Add (or reuse) a constant member.
    pub fn constant(&mut self, constant: ConstantData) -> u32 {
        let key = constant_key(&constant);
        if let Some(&index) = self.constant_index.get(&key) {
            return index;
        }
        let index = self.push_member(MemberData::Constant(constant));
        self.constant_index.insert(key, index);
        index
    }

    /// Shorthand for the symbol constants used by member/method access.
    pub fn symbol(&mut self, name: impl Into<String>) -> u32 {
        self.constant(ConstantData::Symbol(name.into()))
    }

    pub fn string(&mut self, value: impl Into<String>) -> u32 {
        self.constant(ConstantData::String(value.into()))
    }

    /// Mark an existing member as exported under `name`.
    pub fn export(&mut self, name: impl Into<String>, member: u32) {
        self.exports.push((name.into(), member));
    }

    /// Add a function member and export it under its own name.
    pub fn exported_function(&mut self, function: FunctionData) -> u32 {
        let name = function.name.clone();
        let index = self.function(function);
        self.export(name, index);
        index
    }

    /// Set the module initializer (a function member).
    pub fn initializer(&mut self, member: u32) {
        assert!(self.initializer.is_none(), "initializer set twice");
        self.initializer = Some(member);
    }

    pub fn finish(self) -> ModuleData {
        ModuleData {
            name: self.name,
            members: self.members,
            exports: self.exports,
            initializer: self.initializer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_branch_is_patched() {
        let mut f = FunctionBuilder::new("f", 0, 0);
        let end = f.label();
        f.op(Op::LoadTrue);
        f.branch(Op::JmpTrue, end);
        f.op(Op::LoadNull);
        f.bind(end);
        f.op(Op::LoadNull);
        f.op(Op::Return);
        let data = f.finish();

        // Operand of JmpTrue (offset 1) must equal the bound position.
        let operand = u32::from_le_bytes(data.code[2..6].try_into().unwrap());
        assert_eq!(operand as usize, data.code.len() - 3);
    }

    #[test]
    fn test_backward_branch_uses_bound_target() {
        let mut f = FunctionBuilder::new("loop", 0, 0);
        let head = f.label();
        f.bind(head);
        f.branch(Op::Jmp, head);
        let data = f.finish();
        let operand = u32::from_le_bytes(data.code[1..5].try_into().unwrap());
        assert_eq!(operand, 0);
    }

    #[test]
    #[should_panic(expected = "never bound")]
    fn test_unbound_label_panics() {
        let mut f = FunctionBuilder::new("f", 0, 0);
        let label = f.label();
        f.branch(Op::Jmp, label);
        let _ = f.finish();
    }

    #[test]
    fn test_module_builder_dedups_constants() {
        let mut m = ModuleBuilder::new("m");
        let a = m.symbol("foo");
        let b = m.symbol("foo");
        let c = m.string("foo");
        assert_eq!(a, b);
        assert_ne!(a, c);

        let nan1 = m.constant(ConstantData::Float(f64::NAN));
        let nan2 = m.constant(ConstantData::Float(f64::NAN));
        assert_eq!(nan1, nan2);
    }

    #[test]
    fn test_module_builder_exports() {
        let mut f = FunctionBuilder::new("answer", 0, 0);
        f.load_int(42);
        f.op(Op::Return);

        let mut m = ModuleBuilder::new("m");
        let index = m.exported_function(f.finish());
        let module = m.finish();

        module.validate().unwrap();
        assert_eq!(module.exports, vec![("answer".to_string(), index)]);
    }
}
