//! Rill bytecode core
//!
//! The shared foundation between the Rill compiler and the runtime: the
//! instruction set ([`bytecode`]), the portable module format ([`module`])
//! and the assembler layer ([`builder`]). The runtime consumes modules
//! exclusively through [`module::ModuleData`]; nothing in this crate
//! depends on the virtual machine.

pub mod builder;
pub mod bytecode;
pub mod module;

pub use builder::{FunctionBuilder, Label, ModuleBuilder};
pub use bytecode::{CodeReader, CodeWriter, DecodeError, Op, OperandKind};
pub use module::{
    ConstantData, FunctionData, MemberData, ModuleData, ValidationError, MODULE_FORMAT_VERSION,
    MODULE_MAGIC,
};
