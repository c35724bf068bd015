#![cfg(feature = "cli")]

use std::process::{Command, Output};

fn plugwire(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_plugwire"))
        .args(args)
        .output()
        .expect("plugwire binary should run")
}

fn stdout_json(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).expect("stdout should be one JSON document")
}

#[test]
fn encode_then_decode() {
    let encoded = plugwire(&[
        "encode",
        "--channel",
        "myplugin:chat",
        "--opcode",
        "4",
        "--request",
        "11",
        "--data",
        "68656c6c6f",
        "--format",
        "pretty",
    ]);
    assert!(encoded.status.success(), "{encoded:?}");
    let hex = String::from_utf8(encoded.stdout).unwrap();

    let decoded = plugwire(&["decode", hex.trim(), "--format", "json"]);
    assert!(decoded.status.success(), "{decoded:?}");
    let report = stdout_json(&decoded);
    assert_eq!(report["channel"], "myplugin:chat");
    assert_eq!(report["opcode"], 4);
    assert_eq!(report["kind"], "request");
    assert_eq!(report["transaction"], 11);
    assert_eq!(report["payload_size"], 5);
    assert_eq!(report["payload"], "hello");
}

#[test]
fn decode_rejects_garbage_with_data_invalid() {
    let output = plugwire(&["decode", "zz"]);
    assert_eq!(output.status.code(), Some(60));
    assert!(String::from_utf8_lossy(&output.stderr).contains("invalid frame hex"));

    // flags byte 0x03 sets both request and response
    let output = plugwire(&["decode", "03613a620003"]);
    assert_eq!(output.status.code(), Some(60));
}

#[test]
fn encode_rejects_bad_channel_with_usage() {
    let output = plugwire(&["encode", "--channel", "Not An Id"]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn ping_round_trip() {
    let output = plugwire(&["ping", "--nonce", "99", "--format", "json"]);
    assert!(output.status.success(), "{output:?}");
    let report = stdout_json(&output);
    assert_eq!(report["status"], "ok");
    assert_eq!(report["echoed"], 99);
    assert_eq!(report["channel"], "demo:ping");
}

#[test]
fn ping_drop_times_out() {
    let output = plugwire(&["ping", "--drop", "--timeout", "50ms", "--format", "json"]);
    assert_eq!(output.status.code(), Some(124));
    let report = stdout_json(&output);
    assert_eq!(report["status"], "timeout");
    assert!(report["echoed"].is_null());
}

#[test]
fn version_prints_name() {
    let output = plugwire(&["version"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).starts_with("plugwire "));
}
