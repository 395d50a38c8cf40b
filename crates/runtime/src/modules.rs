//! Module registry and linker
//!
//! Loading a bytecode module materializes its members (constants,
//! variables, functions, import placeholders) into a live module object
//! and registers it under its unique name. Linking is lazy: the first
//! export lookup resolves the module, which walks its imports depth-first
//! with an explicit work stack, initializes dependencies before
//! dependents, rejects dependency cycles, and runs each initializer
//! exactly once. Exports never change after initialization.

use crate::error::{Error, ErrorKind, VmResult};
use crate::objects::array::Tuple;
use crate::objects::function::{Code, CodeFunctionTemplate, Function};
use crate::objects::hash_table::HashTable;
use crate::objects::module::{Module, UnresolvedImport};
use crate::objects::result::ResultObject;
use crate::objects::string::Str;
use crate::scheduler;
use crate::value::Value;
use crate::vm::Vm;
use rill_core::{ConstantData, MemberData, ModuleData};

/// Find a registered module object by name.
pub(crate) fn find_module(vm: &mut Vm, name: &str) -> VmResult<Option<Value>> {
    let key = Str::new(vm, name)?;
    let registry = HashTable::try_from(vm.modules).expect("module registry exists");
    Ok(registry.get(key))
}

/// Register a module object under its name; `MODULE_EXISTS` if taken.
pub(crate) fn register_module(vm: &mut Vm, module_value: Value) -> VmResult<()> {
    let module = Module::try_from(module_value)
        .ok_or(Error::new(ErrorKind::BadType, "expected a module"))?;
    let name = module.name();
    let registry = HashTable::try_from(vm.modules).expect("module registry exists");
    if registry.contains(name) {
        return Err(Error::new(
            ErrorKind::ModuleExists,
            "a module with this name is already registered",
        ));
    }
    let _module_root = vm.temp_root(module_value);
    let registry = HashTable::try_from(vm.modules).expect("module registry exists");
    registry.set(vm, name, module_value)?;
    tracing::debug!(
        name = %vm.module_name(module_value).unwrap_or_default(),
        "module registered"
    );
    Ok(())
}

/// Build a fully initialized native module from `(name, value)` pairs.
/// The member values must be rooted by the caller.
pub(crate) fn make_native_module(
    vm: &mut Vm,
    name: &str,
    members: &[(&str, Value)],
) -> VmResult<Value> {
    if name.is_empty() {
        return Err(Error::new(ErrorKind::BadArg, "module name must not be empty"));
    }

    let name_value = vm.make_interned_string(name)?;
    let _name_root = vm.temp_root(name_value);
    let members_tuple = Tuple::new(vm, members.len())?;
    let _members_root = vm.temp_root(members_tuple);
    let exports = HashTable::new(vm)?;
    let _exports_root = vm.temp_root(exports);

    for (index, (export_name, value)) in members.iter().enumerate() {
        Tuple::try_from(members_tuple)
            .expect("still a tuple")
            .set(index, *value)?;
        let symbol = vm.make_symbol(export_name)?;
        let _symbol_root = vm.temp_root(symbol);
        HashTable::try_from(exports)
            .expect("still a table")
            .set(vm, symbol, Value::small_int(index as i64))?;
    }

    let module_value = Module::new(vm, name_value, members_tuple, exports)?;
    Module::try_from(module_value)
        .expect("still a module")
        .set_initialized();
    Ok(module_value)
}

/// Materialize a validated bytecode module description and register it.
/// The module is linked and initialized lazily on first export lookup.
pub(crate) fn load_module(vm: &mut Vm, data: &ModuleData) -> VmResult<Value> {
    data.validate()
        .map_err(|e| Error::detailed(ErrorKind::BadSource, e.to_string()))?;

    if find_module(vm, &data.name)?.is_some() {
        return Err(Error::new(
            ErrorKind::ModuleExists,
            "a module with this name is already registered",
        ));
    }

    let name_value = vm.make_interned_string(&data.name)?;
    let _name_root = vm.temp_root(name_value);
    let members_tuple = Tuple::new(vm, data.members.len())?;
    let _members_root = vm.temp_root(members_tuple);
    let exports = HashTable::new(vm)?;
    let _exports_root = vm.temp_root(exports);

    // The module object is created up front so that function templates
    // can point back at it.
    let module_value = Module::new(vm, name_value, members_tuple, exports)?;
    let _module_root = vm.temp_root(module_value);

    for (index, member) in data.members.iter().enumerate() {
        let value = match member {
            MemberData::Import { module_name } => {
                let import_name = Str::new(vm, module_name)?;
                let _import_root = vm.temp_root(import_name);
                UnresolvedImport::new(vm, import_name)?
            }
            MemberData::Variable { initial, .. } => match initial {
                Some(constant) => constant_value(vm, constant)?,
                None => Value::null(),
            },
            MemberData::Function(func) => {
                let func_name = Str::new(vm, &func.name)?;
                let _func_name_root = vm.temp_root(func_name);
                let code = Code::new(vm, &func.code)?;
                let _code_root = vm.temp_root(code);
                let tmpl = CodeFunctionTemplate::new(
                    vm,
                    func_name,
                    module_value,
                    code,
                    func.params,
                    func.locals,
                )?;
                let _tmpl_root = vm.temp_root(tmpl);
                Function::new(vm, tmpl, Value::null())?
            }
            MemberData::Constant(constant) => constant_value(vm, constant)?,
        };
        Tuple::try_from(members_tuple)
            .expect("still a tuple")
            .set(index, value)?;
    }

    for (export_name, index) in &data.exports {
        let symbol = vm.make_symbol(export_name)?;
        let _symbol_root = vm.temp_root(symbol);
        HashTable::try_from(exports)
            .expect("still a table")
            .set(vm, symbol, Value::small_int(*index as i64))?;
    }

    if let Some(index) = data.initializer {
        let initializer = Tuple::try_from(members_tuple)
            .expect("still a tuple")
            .get(index as usize)?;
        Module::try_from(module_value)
            .expect("still a module")
            .set_initializer(initializer);
    }

    register_module(vm, module_value)?;
    tracing::debug!(name = %data.name, members = data.members.len(), "module loaded");
    Ok(module_value)
}

fn constant_value(vm: &mut Vm, constant: &ConstantData) -> VmResult<Value> {
    match constant {
        ConstantData::Null => Ok(Value::null()),
        ConstantData::Bool(b) => Ok(Value::from_bool(*b)),
        ConstantData::Integer(i) => vm.make_integer(*i),
        ConstantData::Float(f) => vm.make_float(*f),
        ConstantData::String(s) => Str::new(vm, s),
        ConstantData::Symbol(s) => vm.make_symbol(s),
    }
}

struct ResolveFrame {
    /// Rooted through the module registry.
    module: Value,
    next_member: usize,
}

/// Link and initialize `module_value` and everything it imports,
/// dependencies first. Cycles are rejected.
pub(crate) fn resolve_module(vm: &mut Vm, module_value: Value) -> VmResult<()> {
    let module = Module::try_from(module_value)
        .ok_or(Error::new(ErrorKind::BadType, "expected a module"))?;
    if module.initialized() {
        return Ok(());
    }

    let mut stack = vec![ResolveFrame {
        module: module_value,
        next_member: 0,
    }];

    'outer: while !stack.is_empty() {
        let depth = stack.len() - 1;
        let current_value = stack[depth].module;
        let current = Module::try_from(current_value).expect("frame holds a module");

        // Resolve pending imports, recursing into uninitialized targets.
        let members = current.members();
        while stack[depth].next_member < members.len() {
            let index = stack[depth].next_member;
            stack[depth].next_member += 1;

            let member = members.get(index)?;
            let Some(import) = UnresolvedImport::try_from(member) else {
                continue;
            };

            let import_name = import.module_name();
            let registry = HashTable::try_from(vm.modules).expect("module registry exists");
            let Some(target_value) = registry.get(import_name) else {
                let name = vm.string_value(import_name).unwrap_or_default();
                return Err(Error::detailed(
                    ErrorKind::ModuleNotFound,
                    format!("imported module '{name}' is not loaded"),
                ));
            };
            members.set(index, target_value)?;

            let target = Module::try_from(target_value).expect("registry holds modules");
            if target.initialized() {
                continue;
            }
            if stack.iter().any(|frame| frame.module.same(target_value)) {
                return Err(cycle_error(vm, &stack, target_value));
            }
            stack.push(ResolveFrame {
                module: target_value,
                next_member: 0,
            });
            continue 'outer;
        }

        // All imports resolved: run the initializer, then mark done.
        let initializer = current.initializer();
        if !initializer.is_null() {
            let name = vm.module_name(current_value).unwrap_or_default();
            tracing::debug!(module = %name, "running module initializer");
            let coroutine = scheduler::make_coroutine(vm, initializer, Value::null())?;
            let _coroutine_root = vm.temp_root(coroutine);
            let result = scheduler::run_to_completion(vm, coroutine).map_err(|e| {
                Error::detailed(
                    e.kind(),
                    format!("module initialization of '{name}' failed: {}", e.message()),
                )
            })?;
            let result = ResultObject::try_from(result)
                .ok_or(Error::new(ErrorKind::Internal, "initializer has no result"))?;
            if result.is_error() {
                let detail = vm
                    .debug_repr(result.raw_value())
                    .unwrap_or_else(|_| "<error>".to_string());
                return Err(Error::detailed(
                    ErrorKind::BadState,
                    format!("module initialization of '{name}' panicked: {detail}"),
                ));
            }
        }

        Module::try_from(current_value)
            .expect("frame holds a module")
            .set_initialized();
        stack.pop();
    }

    Ok(())
}

fn cycle_error(vm: &mut Vm, stack: &[ResolveFrame], target: Value) -> Error {
    let mut names: Vec<String> = Vec::new();
    let mut in_cycle = false;
    for frame in stack {
        if frame.module.same(target) {
            in_cycle = true;
        }
        if in_cycle {
            names.push(vm.module_name(frame.module).unwrap_or_default());
        }
    }
    names.push(vm.module_name(target).unwrap_or_default());
    Error::detailed(
        ErrorKind::BadState,
        format!(
            "modules form a forbidden dependency cycle: {}",
            names.join(" -> ")
        ),
    )
}
