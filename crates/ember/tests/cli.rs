use std::path::PathBuf;
use std::process::Command;

use ember_contracts::{
    EMBER_ATTR_REPORT_SCHEMA_VERSION, EMBER_DECODE_REPORT_SCHEMA_VERSION,
    EMBER_PIPELINE_REPORT_SCHEMA_VERSION,
};
use serde_json::Value;

fn run_ember(args: &[&str]) -> std::process::Output {
    let exe = env!("CARGO_BIN_EXE_ember");
    Command::new(exe)
        .args(args)
        .env_remove("EMBER_PROFILE")
        .env("EMBER_ARENA_BYTES", "65536")
        .output()
        .expect("run ember")
}

fn parse_json_stdout(out: &std::process::Output) -> Value {
    serde_json::from_slice(&out.stdout).expect("parse stdout JSON")
}

fn tmp_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("ember-cli-{}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir.join(name)
}

#[test]
fn decode_json_text() {
    let out = run_ember(&["decode", "--format", "json", "--text", " -3.5 ,"]);
    assert_eq!(
        out.status.code(),
        Some(0),
        "stderr:\n{}",
        String::from_utf8_lossy(&out.stderr)
    );
    let v = parse_json_stdout(&out);
    assert_eq!(v["schema_version"], EMBER_DECODE_REPORT_SCHEMA_VERSION);
    assert_eq!(v["ok"], true);
    assert_eq!(v["format"], "json");
    assert_eq!(v["value"]["kind"], "float");
    assert_eq!(v["value"]["repr"], "-3.5");
    assert_eq!(v["consumed"], 5);
    assert!(v["error"].is_null());
}

#[test]
fn decode_hex_for_binary_formats() {
    let out = run_ember(&["decode", "--format", "msgpack", "--hex", "c3"]);
    assert_eq!(out.status.code(), Some(0));
    let v = parse_json_stdout(&out);
    assert_eq!(v["value"]["repr"], "True");

    let out = run_ember(&["decode", "--format", "cbor", "--hex", "19 03 e8"]);
    assert_eq!(out.status.code(), Some(0));
    let v = parse_json_stdout(&out);
    assert_eq!(v["value"]["kind"], "int");
    assert_eq!(v["value"]["repr"], "1000");
    assert_eq!(v["consumed"], 3);
}

#[test]
fn decode_failure_is_reported_with_exit_code_1() {
    let out = run_ember(&["decode", "--format", "cbor", "--hex", "80"]);
    assert_eq!(out.status.code(), Some(1));
    let v = parse_json_stdout(&out);
    assert_eq!(v["ok"], false);
    assert!(v["value"].is_null());
    assert!(v["error"].as_str().expect("error").contains("not a scalar"));
}

#[test]
fn decode_reads_input_files() {
    let path = tmp_path("null.json");
    std::fs::write(&path, b"null\n").expect("write input");
    let out = run_ember(&[
        "decode",
        "--format",
        "json",
        "--input",
        path.to_str().unwrap(),
    ]);
    assert_eq!(out.status.code(), Some(0));
    let v = parse_json_stdout(&out);
    assert_eq!(v["value"]["kind"], "none");
    assert_eq!(v["value"]["repr"], "None");
}

#[test]
fn usage_errors_exit_2() {
    let out = run_ember(&["decode", "--format", "json", "--hex", "zz"]);
    assert_eq!(out.status.code(), Some(2));
    assert!(out.stdout.is_empty());

    let out = run_ember(&["decode", "--format", "yaml", "--text", "1"]);
    assert_eq!(out.status.code(), Some(2));

    let out = run_ember(&["decode", "--format", "json"]);
    assert_eq!(out.status.code(), Some(2));
}

#[test]
fn pipeline_sums_every_item() {
    for capacity in ["0", "1", "8"] {
        let out = run_ember(&[
            "pipeline",
            "--producers",
            "3",
            "--items",
            "200",
            "--capacity",
            capacity,
            "--workers",
            "2",
        ]);
        assert_eq!(
            out.status.code(),
            Some(0),
            "capacity {capacity} stderr:\n{}",
            String::from_utf8_lossy(&out.stderr)
        );
        let v = parse_json_stdout(&out);
        assert_eq!(v["schema_version"], EMBER_PIPELINE_REPORT_SCHEMA_VERSION);
        assert_eq!(v["ok"], true);
        assert_eq!(v["sum"], 3 * 200 * 201 / 2);
        assert_eq!(v["expected"], v["sum"]);
        assert_eq!(v["received"], 600);
        assert_eq!(v["workers"], 2);
    }
}

#[test]
fn profile_flag_dumps_counters_to_stderr() {
    let out = run_ember(&[
        "--profile",
        "pipeline",
        "--producers",
        "1",
        "--items",
        "10",
        "--workers",
        "1",
    ]);
    assert_eq!(out.status.code(), Some(0));
    let stderr = String::from_utf8_lossy(&out.stderr);
    let line = stderr
        .lines()
        .find(|l| l.starts_with("ember_profile "))
        .expect("profile line");
    assert!(line.contains(" tasks_spawned=2"), "{line}");
    assert!(line.contains(" tasks_completed=2"), "{line}");
    assert!(line.contains(" chan_sends=10"), "{line}");
    assert!(line.contains(" chan_recvs=10"), "{line}");
}

#[test]
fn attr_lookup_hits_and_misses() {
    let out = run_ember(&[
        "attr",
        "--layout",
        "Point",
        "--field",
        "x:int",
        "--field",
        "y:float",
        "--set",
        "y=2.5",
        "--get",
        "y",
    ]);
    assert_eq!(
        out.status.code(),
        Some(0),
        "stderr:\n{}",
        String::from_utf8_lossy(&out.stderr)
    );
    let v = parse_json_stdout(&out);
    assert_eq!(v["schema_version"], EMBER_ATTR_REPORT_SCHEMA_VERSION);
    assert_eq!(v["value"]["repr"], "2.5");
    let fields = v["fields"].as_array().expect("fields[]");
    assert_eq!(fields.len(), 2);
    assert_eq!(fields[0]["offset"], 8);
    assert_eq!(fields[1]["offset"], 16);

    let out = run_ember(&["attr", "--field", "x:int", "--get", "z"]);
    assert_eq!(out.status.code(), Some(1));
    let v = parse_json_stdout(&out);
    assert_eq!(v["ok"], false);
    assert_eq!(v["error"], "attribute_not_found");
    assert!(v["value"].is_null());
}

#[test]
fn attr_rejects_kind_mismatch_on_set() {
    let out = run_ember(&["attr", "--field", "x:int", "--set", "x=true", "--get", "x"]);
    assert_eq!(out.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("--set x"), "{stderr}");
}
