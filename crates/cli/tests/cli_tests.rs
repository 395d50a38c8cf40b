//! Runs the `rill` binary against freshly assembled module files.

use rill_core::{FunctionBuilder, ModuleBuilder, Op};
use std::path::PathBuf;
use std::process::Command;

fn rill_binary() -> Command {
    Command::new(env!("CARGO_BIN_EXE_rill"))
}

/// Serialize a simple module exporting `main() { return 40 + 2; }`.
fn write_answer_module(dir: &std::path::Path) -> PathBuf {
    let mut f = FunctionBuilder::new("main", 0, 0);
    f.load_int(40);
    f.load_int(2);
    f.op(Op::Add);
    f.op(Op::Return);

    let mut m = ModuleBuilder::new("answer");
    m.exported_function(f.finish());
    let data = m.finish();

    let path = dir.join("answer.rlbc");
    std::fs::write(&path, data.to_bytes()).expect("module file written");
    path
}

#[test]
fn test_run_prints_result_and_exits_zero() {
    let dir = tempfile::tempdir().unwrap();
    let module = write_answer_module(dir.path());

    let output = rill_binary()
        .arg("run")
        .arg(&module)
        .output()
        .expect("binary runs");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), "42");
}

#[test]
fn test_run_missing_export_fails() {
    let dir = tempfile::tempdir().unwrap();
    let module = write_answer_module(dir.path());

    let output = rill_binary()
        .arg("run")
        .arg(&module)
        .arg("--call")
        .arg("does_not_exist")
        .output()
        .expect("binary runs");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("does_not_exist"), "{stderr}");
}

#[test]
fn test_run_rejects_garbage_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("garbage.rlbc");
    std::fs::write(&path, b"not a module").unwrap();

    let output = rill_binary().arg("run").arg(&path).output().expect("binary runs");
    assert!(!output.status.success());
}

#[test]
fn test_dump_lists_members_and_exports() {
    let dir = tempfile::tempdir().unwrap();
    let module = write_answer_module(dir.path());

    let output = rill_binary().arg("dump").arg(&module).output().expect("binary runs");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("module answer"), "{stdout}");
    assert!(stdout.contains("func main"), "{stdout}");
    assert!(stdout.contains("main -> member 0"), "{stdout}");
}
