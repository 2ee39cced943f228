// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! This build script writes `memory.x` into a directory where the linker can
//! always find it at build time. The layout comes from the `consts` crate so
//! the bootloader partition and the application region cannot drift apart.
//!
//! It also writes `ramfunc.x`, which stops the link if the flash erase and
//! program routines are not placed in RAM.

use consts::{BASE_APP_ADDR, BASE_BOOTLOADER_ADDR, RAM_BASE, RAM_SIZE};
use std::env;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

/// `#[no_mangle]` flash routines in `src/flash.rs`.
const RAM_ROUTINES: [&str; 2] = ["erase_page_ram", "program_half_page_ram"];

fn main() {
    let memory_x_content = format!(
        r##"
        BASE_BOOTLOADER_ADDR = {boot:#X};
        BASE_APP_ADDR = {app:#X};

        MEMORY
        {{
            /* The bootloader owns the first 32K, the application the rest */
            FLASH (rx) : ORIGIN = BASE_BOOTLOADER_ADDR, LENGTH = BASE_APP_ADDR - BASE_BOOTLOADER_ADDR
            RAM (rwx) : ORIGIN = {ram:#X}, LENGTH = {ram_len:#X}
        }}
        "##,
        boot = BASE_BOOTLOADER_ADDR,
        app = BASE_APP_ADDR,
        ram = RAM_BASE,
        ram_len = RAM_SIZE,
    );
    // Evaluated after `link.x` has placed `.data`, so the symbols resolve
    // to their run-time addresses.
    let ramfunc_x_content = RAM_ROUTINES
        .iter()
        .map(|symbol| {
            format!(
                "ASSERT({symbol} >= ORIGIN(RAM) && {symbol} < ORIGIN(RAM) + LENGTH(RAM), \
                 \"{symbol} must run from RAM, it is linked outside it\");\n"
            )
        })
        .collect::<String>();

    // Put `memory.x` in our output directory and ensure it's
    // on the linker search path.
    let out = &PathBuf::from(env::var_os("OUT_DIR").unwrap());
    File::create(out.join("memory.x"))
        .unwrap()
        .write_all(memory_x_content.as_bytes())
        .unwrap();
    File::create(out.join("ramfunc.x"))
        .unwrap()
        .write_all(ramfunc_x_content.as_bytes())
        .unwrap();
    println!("cargo:rustc-link-search={}", out.display());

    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=src/flash.rs");
    println!("cargo:rerun-if-changed=../consts/src/lib.rs");

    println!("cargo:rustc-link-arg-bins=--nmagic");
    println!("cargo:rustc-link-arg-bins=-Tlink.x");
    println!("cargo:rustc-link-arg-bins=-Tdefmt.x");
    println!("cargo:rustc-link-arg-bins=-Tramfunc.x");
}
