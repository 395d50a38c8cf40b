//! Rill CLI
//!
//! Runs serialized bytecode modules (`.rlbc` files produced by the
//! compiler) on a fresh VM: load, link against `std`, call an exported
//! function to completion and print its result. `dump` prints a module's
//! member and export tables without executing anything.
//!
//! Exit codes: 0 on success, 1 on any failure.

use clap::Parser;
use rill_core::{MemberData, ModuleData};
use rill_runtime::{Scope, Vm, VmSettings};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "rill")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Rill bytecode runner", long_about = None)]
enum Cli {
    /// Run an exported function from a bytecode module
    Run {
        /// Input bytecode module (.rlbc)
        input: PathBuf,

        /// Exported function to call (defaults to `main`)
        #[arg(long, default_value = "main")]
        call: String,

        /// Skip loading the std module
        #[arg(long)]
        no_std: bool,
    },

    /// Print a module's member and export tables
    Dump {
        /// Input bytecode module (.rlbc)
        input: PathBuf,
    },
}

fn main() -> ExitCode {
    // RILL_LOG controls the filter, e.g. RILL_LOG=rill_runtime=trace.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("RILL_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = match Cli::parse() {
        Cli::Run { input, call, no_std } => run(&input, &call, no_std),
        Cli::Dump { input } => dump(&input),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}

/// Parse a size-like environment variable, warning on invalid values.
fn env_size(name: &str, default: usize) -> usize {
    match std::env::var(name) {
        Ok(text) => match text.parse::<usize>() {
            Ok(value) if value > 0 => value,
            _ => {
                tracing::warn!(variable = name, value = %text, "invalid size, using default");
                default
            }
        },
        Err(_) => default,
    }
}

fn vm_settings() -> VmSettings {
    let defaults = VmSettings::default();
    VmSettings {
        page_size: env_size("RILL_PAGE_SIZE", defaults.page_size),
        max_heap_size: env_size("RILL_MAX_HEAP", defaults.max_heap_size),
        enable_panic_stack_trace: std::env::var("RILL_PANIC_TRACE").is_ok(),
    }
}

fn read_module(path: &Path) -> Result<ModuleData, String> {
    let bytes =
        std::fs::read(path).map_err(|e| format!("cannot read {}: {e}", path.display()))?;
    ModuleData::from_bytes(&bytes).map_err(|e| e.to_string())
}

fn run(input: &Path, call: &str, no_std: bool) -> Result<(), String> {
    let data = read_module(input)?;
    let module_name = data.name.clone();

    let mut vm = Vm::with_settings(vm_settings()).map_err(|e| e.to_string())?;
    if !no_std {
        vm.load_std().map_err(|e| e.to_string())?;
    }
    vm.load_module(&data).map_err(|e| e.to_string())?;

    let scope = Scope::new(&vm);
    let function = scope.local(
        vm.get_export(&module_name, call)
            .map_err(|e| format!("export '{call}': {e}"))?,
    );

    let coroutine = scope.local(
        vm.make_coroutine(function.get(), rill_runtime::Value::null())
            .map_err(|e| e.to_string())?,
    );
    vm.coroutine_start(coroutine.get()).map_err(|e| e.to_string())?;
    vm.run_ready().map_err(|e| e.to_string())?;

    if !vm.coroutine_completed(coroutine.get()).map_err(|e| e.to_string())? {
        return Err(format!(
            "'{call}' suspended without completing (an async frame was never resumed)"
        ));
    }

    let result = scope.local(vm.coroutine_result(coroutine.get()).map_err(|e| e.to_string())?);
    if vm.result_is_success(result.get()).map_err(|e| e.to_string())? {
        let value = vm.result_value(result.get()).map_err(|e| e.to_string())?;
        let text = vm.debug_repr(value).map_err(|e| e.to_string())?;
        println!("{text}");
        Ok(())
    } else {
        let error = vm.result_error(result.get()).map_err(|e| e.to_string())?;
        let mut message = vm
            .debug_repr(error)
            .unwrap_or_else(|_| "<error>".to_string());
        if let Ok(Some(trace)) = vm.exception_trace(error) {
            message.push('\n');
            message.push_str(&trace);
        }
        Err(format!("'{call}' panicked: {message}"))
    }
}

fn dump(input: &Path) -> Result<(), String> {
    let data = read_module(input)?;

    println!("module {}", data.name);
    println!("members ({}):", data.members.len());
    for (index, member) in data.members.iter().enumerate() {
        match member {
            MemberData::Import { module_name } => {
                println!("  {index:4}: import {module_name}");
            }
            MemberData::Variable { name, initial } => {
                println!("  {index:4}: var {name} = {initial:?}");
            }
            MemberData::Function(func) => {
                println!(
                    "  {index:4}: func {} (params {}, locals {}, {} bytes)",
                    func.name,
                    func.params,
                    func.locals,
                    func.code.len()
                );
            }
            MemberData::Constant(constant) => {
                println!("  {index:4}: const {constant:?}");
            }
        }
    }

    println!("exports ({}):", data.exports.len());
    for (name, index) in &data.exports {
        println!("  {name} -> member {index}");
    }
    if let Some(index) = data.initializer {
        println!("initializer: member {index}");
    }
    Ok(())
}
