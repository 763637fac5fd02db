//! Integration tests for the dstore binary

#![allow(deprecated)]

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::thread;
use tempfile::TempDir;

/// Serve one handshake answering `version`, then wait for the client to hang up.
fn one_shot_server(version: &'static str) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut writer = stream.try_clone().unwrap();
        let mut lines = BufReader::new(stream).lines();
        for _ in 0..3 {
            lines.next();
        }
        writeln!(writer, "{}", version).unwrap();
        for line in lines {
            match line {
                Ok(line) if line.contains("\"exit\"") => break,
                Ok(_) => continue,
                Err(_) => break,
            }
        }
    });
    port
}

fn unused_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn dstore(config_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("dstore").unwrap();
    cmd.env("DSTORE_CONFIG", config_dir.path().join("client.toml"))
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_cli_help() {
    let tmp = TempDir::new().unwrap();
    dstore(&tmp)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("probe").and(predicate::str::contains("launch")));
}

#[test]
fn test_probe_compatible_server() {
    let tmp = TempDir::new().unwrap();
    let port = one_shot_server("1.8.0");
    dstore(&tmp)
        .args(["probe", "--host", "127.0.0.1", "--port", &port.to_string()])
        .assert()
        .success()
        .stdout(predicate::str::contains("connected (server 1.8.0"));
}

#[test]
fn test_probe_incompatible_server_json() {
    let tmp = TempDir::new().unwrap();
    let port = one_shot_server("2.0.0");
    dstore(&tmp)
        .args(["probe", "--host", "127.0.0.1", "--port", &port.to_string(), "-f", "json"])
        .assert()
        .code(3)
        .stdout(predicate::str::contains("\"handshake_incompatible\""));
}

#[test]
fn test_probe_refused_port() {
    let tmp = TempDir::new().unwrap();
    let port = unused_port();
    dstore(&tmp)
        .args(["probe", "--host", "127.0.0.1", "--port", &port.to_string()])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("Make sure that the server is running"));
}

#[test]
fn test_launch_refused_daemon() {
    let tmp = TempDir::new().unwrap();
    let port = unused_port();
    dstore(&tmp)
        .args(["launch", "--host", "127.0.0.1", "--daemon-port", &port.to_string()])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("daemon is running"));
}

#[test]
fn test_malformed_config_fails() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join("client.toml"), "[daemon]\nport = \"x\"\n").unwrap();
    dstore(&tmp)
        .args(["probe", "--port", "1"])
        .assert()
        .code(1);
}
