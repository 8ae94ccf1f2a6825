// Cinder - Handheld Emulation Core
// Copyright (C) 2026 Cinder Team
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use std::path::PathBuf;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

const SNAPSHOT_MAGIC_LE: [u8; 4] = [0xEF, 0xBE, 0xFE, 0xCA];

fn temp_dir(prefix: &str) -> PathBuf {
    let nonce = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("cinder-tests-{prefix}-{nonce}"));
    std::fs::create_dir_all(&dir).expect("Failed to create temp dir");
    dir
}

fn cinder() -> Command {
    Command::new(env!("CARGO_BIN_EXE_cinder"))
}

#[test]
fn test_cli_help_lists_session_flags() {
    let output = cinder().arg("--help").output().expect("Failed to execute command");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("--flash"));
    assert!(stdout.contains("--resume"));
    assert!(stdout.contains("--suspend-to"));
    assert!(stdout.contains("--turbo"));
}

#[test]
fn test_cli_cold_boot_requires_flash_image() {
    let output = cinder()
        .args(["--run-for-ms", "10"])
        .output()
        .expect("Failed to execute command");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("storage image"), "{stderr}");
}

#[test]
fn test_cli_rejects_colliding_debug_ports() {
    let dir = temp_dir("ports");
    let config_path = dir.join("session.yaml");
    std::fs::write(
        &config_path,
        "gdb_port: 4444\nrdbg_port: 4444\n",
    )
    .expect("Failed to write config");

    let output = cinder()
        .args(["--config", config_path.to_str().unwrap(), "--run-for-ms", "10"])
        .output()
        .expect("Failed to execute command");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("must differ"), "{stderr}");

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_cli_run_suspend_then_resume() {
    let dir = temp_dir("suspend");
    let flash = dir.join("flash.img");
    std::fs::write(&flash, [0x5A; 64]).expect("Failed to write flash image");
    let snap = dir.join("machine.snap");

    let output = cinder()
        .args([
            "--flash",
            flash.to_str().unwrap(),
            "--turbo",
            "--run-for-ms",
            "50",
            "--suspend-to",
            snap.to_str().unwrap(),
        ])
        .output()
        .expect("Failed to execute command");
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );

    assert!(snap.exists());
    let image = std::fs::read(&snap).unwrap();
    assert_eq!(&image[..4], &SNAPSHOT_MAGIC_LE);

    let output = cinder()
        .args([
            "--resume",
            snap.to_str().unwrap(),
            "--turbo",
            "--run-for-ms",
            "20",
        ])
        .output()
        .expect("Failed to execute command");
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_cli_session_config_file() {
    let dir = temp_dir("config");
    let flash = dir.join("flash.img");
    std::fs::write(&flash, [0xA5; 64]).expect("Failed to write flash image");
    let config_path = dir.join("session.yaml");
    std::fs::write(
        &config_path,
        format!("storage_image: \"{}\"\nturbo: true\n", flash.display()),
    )
    .expect("Failed to write config");

    let output = cinder()
        .args(["--config", config_path.to_str().unwrap(), "--run-for-ms", "20"])
        .output()
        .expect("Failed to execute command");
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );

    let _ = std::fs::remove_dir_all(&dir);
}
