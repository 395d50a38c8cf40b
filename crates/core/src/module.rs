//! Portable bytecode module format
//!
//! A [`ModuleData`] is the compiler/runtime boundary artifact: an ordered
//! list of members (imports, variables, functions, constants), an export
//! table mapping names to member indices, and an optional initializer
//! function. The runtime turns it into a live module object at load time.
//!
//! Module files are the bincode encoding of [`ModuleData`] behind a small
//! envelope (magic + format version) so that stale files fail loudly
//! instead of deserializing garbage.

use crate::bytecode::{CodeReader, Op, OperandKind};
use serde::{Deserialize, Serialize};

/// File magic for serialized modules.
pub const MODULE_MAGIC: [u8; 4] = *b"RILL";

/// Bumped whenever `ModuleData` or the instruction encoding changes.
pub const MODULE_FORMAT_VERSION: u8 = 3;

/// A primitive constant stored directly in the member list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConstantData {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Symbol(String),
}

/// A compiled user function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionData {
    pub name: String,
    /// Declared parameter count.
    pub params: u32,
    /// Local variable slot count.
    pub locals: u32,
    pub code: Vec<u8>,
}

/// One entry of a module's member list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MemberData {
    /// Placeholder replaced by the linker with the target module.
    Import { module_name: String },
    /// Mutable module-level variable.
    Variable {
        name: String,
        initial: Option<ConstantData>,
    },
    Function(FunctionData),
    Constant(ConstantData),
}

/// A complete bytecode module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleData {
    pub name: String,
    pub members: Vec<MemberData>,
    /// Export name -> member index.
    pub exports: Vec<(String, u32)>,
    /// Member index of the module initializer function, if any.
    pub initializer: Option<u32>,
}

/// Validation failure for a module description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid module: {}", self.message)
    }
}

impl std::error::Error for ValidationError {}

fn err(message: impl Into<String>) -> ValidationError {
    ValidationError {
        message: message.into(),
    }
}

impl ModuleData {
    /// Structural validation: names, index ranges and code well-formedness.
    ///
    /// The runtime calls this before materializing any heap objects so that
    /// the interpreter can rely on decoded operands being in range for the
    /// static parts of the module (member indices are checked here, dynamic
    /// indices at run time).
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(err("module name must not be empty"));
        }

        let member_count = self.members.len();
        for (name, index) in &self.exports {
            if name.is_empty() {
                return Err(err("export name must not be empty"));
            }
            if *index as usize >= member_count {
                return Err(err(format!(
                    "export '{name}' references member {index}, but module has {member_count} members"
                )));
            }
        }

        if let Some(init) = self.initializer {
            match self.members.get(init as usize) {
                Some(MemberData::Function(_)) => {}
                Some(_) => {
                    return Err(err(format!("initializer member {init} is not a function")));
                }
                None => return Err(err(format!("initializer member {init} is out of range"))),
            }
        }

        for (index, member) in self.members.iter().enumerate() {
            match member {
                MemberData::Import { module_name } => {
                    if module_name.is_empty() {
                        return Err(err(format!("import at member {index} has an empty name")));
                    }
                }
                MemberData::Variable { name, .. } => {
                    if name.is_empty() {
                        return Err(err(format!("variable at member {index} has an empty name")));
                    }
                }
                MemberData::Function(func) => {
                    validate_function(func, member_count)
                        .map_err(|e| err(format!("function '{}': {}", func.name, e.message)))?;
                }
                MemberData::Constant(_) => {}
            }
        }

        Ok(())
    }

    /// Serialize to the module file representation.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);
        out.extend_from_slice(&MODULE_MAGIC);
        out.push(MODULE_FORMAT_VERSION);
        let body = bincode::serialize(self).expect("module serialization cannot fail");
        out.extend_from_slice(&body);
        out
    }

    /// Parse and validate a module file.
    pub fn from_bytes(bytes: &[u8]) -> Result<ModuleData, ValidationError> {
        if bytes.len() < 5 || bytes[..4] != MODULE_MAGIC {
            return Err(err("not a rill module file (bad magic)"));
        }
        if bytes[4] != MODULE_FORMAT_VERSION {
            return Err(err(format!(
                "unsupported module format version {} (expected {})",
                bytes[4], MODULE_FORMAT_VERSION
            )));
        }
        let module: ModuleData = bincode::deserialize(&bytes[5..])
            .map_err(|e| err(format!("malformed module body: {e}")))?;
        module.validate()?;
        Ok(module)
    }
}

/// Walk a function's code, checking decodability, member index ranges,
/// local/param slot ranges and jump targets.
fn validate_function(func: &FunctionData, member_count: usize) -> Result<(), ValidationError> {
    let code = &func.code;
    if code.is_empty() {
        return Err(err("code must not be empty"));
    }

    // First pass: decode every instruction, record instruction starts and
    // collect jump targets.
    let mut starts = vec![false; code.len() + 1];
    let mut targets = Vec::new();
    let mut reader = CodeReader::new(code);
    while !reader.at_end() {
        starts[reader.pos()] = true;
        let op = reader
            .read_op()
            .map_err(|e| err(format!("bad code: {e}")))?;
        match op.operands() {
            OperandKind::None => {}
            OperandKind::U32 => {
                let operand = reader
                    .read_u32()
                    .map_err(|e| err(format!("bad code: {e}")))?;
                check_u32_operand(func, op, operand, member_count)?;
            }
            OperandKind::U32U32 => {
                reader
                    .read_u32()
                    .and_then(|_| reader.read_u32())
                    .map_err(|e| err(format!("bad code: {e}")))?;
            }
            OperandKind::Target => {
                let target = reader
                    .read_u32()
                    .map_err(|e| err(format!("bad code: {e}")))?;
                targets.push(target);
            }
            OperandKind::I64 => {
                reader
                    .read_i64()
                    .map_err(|e| err(format!("bad code: {e}")))?;
            }
            OperandKind::F64 => {
                reader
                    .read_f64()
                    .map_err(|e| err(format!("bad code: {e}")))?;
            }
        }
    }

    for target in targets {
        if (target as usize) >= code.len() || !starts[target as usize] {
            return Err(err(format!(
                "jump target {target} is not an instruction boundary"
            )));
        }
    }

    Ok(())
}

fn check_u32_operand(
    func: &FunctionData,
    op: Op,
    operand: u32,
    member_count: usize,
) -> Result<(), ValidationError> {
    match op {
        Op::LoadModule | Op::StoreModule | Op::LoadMember | Op::StoreMember | Op::LoadMethod => {
            if operand as usize >= member_count {
                return Err(err(format!(
                    "{op:?} references member {operand}, but module has {member_count} members"
                )));
            }
        }
        Op::LoadParam | Op::StoreParam => {
            if operand >= func.params {
                return Err(err(format!(
                    "{op:?} references parameter {operand}, function declares {}",
                    func.params
                )));
            }
        }
        Op::LoadLocal | Op::StoreLocal | Op::PopTo => {
            if operand >= func.locals {
                return Err(err(format!(
                    "{op:?} references local {operand}, function declares {}",
                    func.locals
                )));
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::CodeWriter;

    fn return_null_function(name: &str) -> FunctionData {
        let mut w = CodeWriter::new();
        w.op(Op::LoadNull);
        w.op(Op::Return);
        FunctionData {
            name: name.to_string(),
            params: 0,
            locals: 0,
            code: w.finish(),
        }
    }

    fn simple_module() -> ModuleData {
        ModuleData {
            name: "test".to_string(),
            members: vec![
                MemberData::Function(return_null_function("f")),
                MemberData::Constant(ConstantData::Integer(42)),
            ],
            exports: vec![("f".to_string(), 0)],
            initializer: None,
        }
    }

    #[test]
    fn test_validate_ok() {
        simple_module().validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_empty_name() {
        let mut module = simple_module();
        module.name.clear();
        assert!(module.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_export_index() {
        let mut module = simple_module();
        module.exports.push(("g".to_string(), 9));
        assert!(module.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_non_function_initializer() {
        let mut module = simple_module();
        module.initializer = Some(1);
        assert!(module.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_member_ref() {
        let mut w = CodeWriter::new();
        w.op_u32(Op::LoadModule, 7);
        w.op(Op::Return);
        let mut module = simple_module();
        module.members[0] = MemberData::Function(FunctionData {
            name: "f".to_string(),
            params: 0,
            locals: 0,
            code: w.finish(),
        });
        assert!(module.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_misaligned_jump() {
        let mut w = CodeWriter::new();
        // Jump into the middle of the LoadInt operand.
        w.op_u32(Op::Jmp, 6);
        w.op_i64(Op::LoadInt, 1);
        w.op(Op::Return);
        let mut module = simple_module();
        module.members[0] = MemberData::Function(FunctionData {
            name: "f".to_string(),
            params: 0,
            locals: 0,
            code: w.finish(),
        });
        assert!(module.validate().is_err());
    }

    #[test]
    fn test_file_roundtrip() {
        let module = simple_module();
        let bytes = module.to_bytes();
        let parsed = ModuleData::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, module);
    }

    #[test]
    fn test_file_rejects_bad_magic() {
        let mut bytes = simple_module().to_bytes();
        bytes[0] = b'X';
        assert!(ModuleData::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_file_rejects_version_mismatch() {
        let mut bytes = simple_module().to_bytes();
        bytes[4] = MODULE_FORMAT_VERSION + 1;
        assert!(ModuleData::from_bytes(&bytes).is_err());
    }
}
