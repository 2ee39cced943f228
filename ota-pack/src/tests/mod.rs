// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use {
    crate::{eeprom::EepromImage, ExitCode},
    consts::{APP_SIZE, BASE_APP_ADDR},
    hub_ota::{
        crc,
        image::{ImageHeader, HEADER_LEN},
        records::{AppField, BootField, Records},
    },
    std::io::Write,
};

/// Pack a binary that is not a whole number of half-pages.
#[test]
fn pack_pads_payload_and_writes_header() {
    let input = create_file(&firmware(100));
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("hub_005.bin");
    let output = test([
        "pack",
        "-i",
        input.path().to_str().unwrap(),
        "-v",
        "5",
        "-o",
        out.to_str().unwrap(),
    ]);
    assert_eq!(output.exit_code, ExitCode(0));
    assert!(output.stderr.is_empty());

    let image = std::fs::read(&out).unwrap();
    assert_eq!(image.len(), HEADER_LEN + 128);
    let header = ImageHeader::parse(&image).unwrap();
    assert_eq!(header.version, 5);
    assert_eq!(header.crc, crc::checksum(&image[HEADER_LEN..]));
    assert!(image[8..HEADER_LEN].iter().all(|b| *b == 0));
    assert_eq!(&image[HEADER_LEN..HEADER_LEN + 100], firmware(100).as_slice());
    assert!(image[HEADER_LEN + 100..].iter().all(|b| *b == 0));

    assert!(output.stdout.contains("128"));
    assert!(output.stdout.contains(&format!("{:08x}", header.crc)));
}

#[test]
fn pack_rejects_zero_version() {
    let input = create_file(&firmware(64));
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.bin");
    let output = test([
        "pack",
        "-i",
        input.path().to_str().unwrap(),
        "-v",
        "0",
        "-o",
        out.to_str().unwrap(),
    ]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("--version must not be zero"));
    assert!(!out.exists());
}

#[test]
fn pack_rejects_empty_input() {
    let input = create_file(b"");
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.bin");
    let output = test([
        "pack",
        "-i",
        input.path().to_str().unwrap(),
        "-v",
        "1",
        "-o",
        out.to_str().unwrap(),
    ]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("input file is empty"));
}

#[test]
fn pack_rejects_binary_larger_than_application_region() {
    let input = create_file(&firmware(APP_SIZE as usize + 1));
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.bin");
    let output = test([
        "pack",
        "-i",
        input.path().to_str().unwrap(),
        "-v",
        "1",
        "-o",
        out.to_str().unwrap(),
    ]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("does not fit"));
}

#[test]
fn inspect_accepts_packed_image() {
    let payload = firmware(256);
    let header = ImageHeader {
        version: 7,
        crc: crc::checksum(&payload),
    };
    let input = create_file(&[header.to_bytes().as_slice(), payload.as_slice()].concat());
    let output = test(["inspect", "-i", input.path().to_str().unwrap()]);
    assert_eq!(output.exit_code, ExitCode(0));
    assert!(output.stdout.contains('7'));
    assert!(output.stdout.contains("(256)"));
    assert!(output.stdout.contains("ok"));
    assert!(output.stderr.is_empty());
}

/// A trailing byte added by the transport is tolerated.
#[test]
fn inspect_ignores_single_trailing_byte() {
    let payload = firmware(64);
    let header = ImageHeader {
        version: 2,
        crc: crc::checksum(&payload),
    };
    let input = create_file(&[header.to_bytes().as_slice(), payload.as_slice(), b"\n".as_slice()].concat());
    let output = test(["inspect", "-i", input.path().to_str().unwrap()]);
    assert_eq!(output.exit_code, ExitCode(0));
}

#[test]
fn inspect_detects_corrupt_payload() {
    let mut payload = firmware(128);
    let header = ImageHeader {
        version: 3,
        crc: crc::checksum(&payload),
    };
    payload[70] ^= 0x01;
    let input = create_file(&[header.to_bytes().as_slice(), payload.as_slice()].concat());
    let output = test(["inspect", "-i", input.path().to_str().unwrap()]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stdout.contains(&format!("{:08x}", crc::checksum(&payload))));
    assert!(output.stderr.contains("payload CRC mismatch"));
}

#[test]
fn inspect_rejects_ragged_payload() {
    let payload = firmware(100);
    let header = ImageHeader {
        version: 3,
        crc: crc::checksum(&payload),
    };
    let input = create_file(&[header.to_bytes().as_slice(), payload.as_slice()].concat());
    let output = test(["inspect", "-i", input.path().to_str().unwrap()]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("not a multiple of the half-page"));
}

#[test]
fn inspect_rejects_truncated_header() {
    let input = create_file(&[0x05, 0, 0, 0]);
    let output = test(["inspect", "-i", input.path().to_str().unwrap()]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("header too short"));
}

#[test]
fn inspect_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.bin");
    let output = test(["inspect", "-i", missing.to_str().unwrap()]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("failed to open input file"));
}

/// The generated EEPROM image is read back through the boot records.
#[test]
fn provision_lays_out_identity() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("eeprom.hex");
    let output = test([
        "provision",
        "--dev-id",
        "0x00C0FFEE",
        "--aes-key",
        "000102030405060708090a0b0c0d0e0f",
        "--pwd",
        "hunter2",
        "-o",
        out.to_str().unwrap(),
    ]);
    assert_eq!(output.exit_code, ExitCode(0));
    assert!(output.stdout.contains("00c0ffee"));
    assert!(output.stdout.contains("hub"));

    let hex = std::fs::read_to_string(&out).unwrap();
    assert!(hex.starts_with(":020000040808"));
    let mut records = Records::new(EepromImage::from_ihex(&hex).unwrap());

    let identity = records.identity().unwrap();
    assert_eq!(identity.dev_id, 0x00C0_FFEE);
    assert_eq!(&identity.dev_type[..4], b"hub\0");
    let aes_key: [u8; 16] = core::array::from_fn(|i| i as u8);
    assert_eq!(identity.aes_key, aes_key);
    assert_eq!(&identity.pwd[..8], b"hunter2\0");
    assert_eq!(records.boot(BootField::Vtor).unwrap(), BASE_APP_ADDR);

    // The application sees the same identity and runs its first-run setup.
    assert_eq!(records.app(AppField::DevId).unwrap(), 0x00C0_FFEE);
    assert_eq!(records.app(AppField::InitKey).unwrap(), 0);
    // The bootloader initialises itself on first boot.
    assert_eq!(records.boot(BootField::InitKey).unwrap(), 0);
}

#[test]
fn provision_rejects_short_aes_key() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("eeprom.hex");
    let output = test([
        "provision",
        "--dev-id",
        "1",
        "--aes-key",
        "0001",
        "--pwd",
        "x",
        "-o",
        out.to_str().unwrap(),
    ]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("--aes-key must be 16 bytes, got 2"));
    assert!(!out.exists());
}

#[test]
fn provision_rejects_long_dev_type() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("eeprom.hex");
    let output = test([
        "provision",
        "--dev-id",
        "1",
        "--dev-type",
        "hub-with-a-long-name",
        "--aes-key",
        "000102030405060708090a0b0c0d0e0f",
        "--pwd",
        "x",
        "-o",
        out.to_str().unwrap(),
    ]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("--dev-type"));
}

#[test]
fn unknown_command() {
    let output = test(["flash"]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stdout.is_empty());
    assert!(!output.stderr.is_empty());
}

fn firmware(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + 3) as u8).collect()
}

fn test<const N: usize>(args: [&str; N]) -> Output {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let exit_code = crate::main_args(
        std::iter::once("ota-pack").chain(args),
        &mut stdout,
        &mut stderr,
    );
    println!("* args: {:?}", args);
    println!("* exit_code: {:?}", exit_code);
    println!("* stdout:\n{}", String::from_utf8_lossy(&stdout));
    println!("* stderr:\n{}", String::from_utf8_lossy(&stderr));
    Output {
        exit_code,
        stdout: String::from_utf8(stdout).unwrap(),
        stderr: String::from_utf8(stderr).unwrap(),
    }
}

#[derive(Debug)]
struct Output {
    exit_code: ExitCode,
    stdout: String,
    stderr: String,
}

fn create_file(data: &[u8]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(data).unwrap();
    file
}
