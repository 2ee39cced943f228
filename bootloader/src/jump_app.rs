// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later
use cortex_m::peripheral::NVIC;
use defmt::info;
use embassy_stm32::interrupt::Interrupt;

/// Boots the application whose vector table is at `vtor`.
///
/// # Safety
///
/// This modifies the stack pointer and reset vector and will run code placed in the application region.
pub unsafe fn jump_to_app(vtor: u32) -> ! {
    // Disable active interrupts
    cortex_m::interrupt::disable();
    NVIC::mask(Interrupt::USART2);
    NVIC::mask(Interrupt::TIM21);
    NVIC::mask(Interrupt::TIM2);

    let msp = *(vtor as *const u32);
    let rv = *((vtor + 4) as *const u32);

    info!("vtor = {=u32:x}, msp = {=u32:x}, rv = {=u32:x}", vtor, msp, rv);

    let scb = &*cortex_m::peripheral::SCB::PTR;
    scb.vtor.write(vtor);
    cortex_m::asm::dsb();
    cortex_m::interrupt::enable();

    // These instructions perform the following operations:
    //
    // * Modify control register to use MSP as stack pointer (clear spsel bit)
    // * Synchronize instruction barrier
    // * Initialize stack pointer from the application vector table
    // * Set link register to not return (0xFF)
    // * Jump to the application reset vector
    core::arch::asm!(
        "mrs {tmp}, CONTROL",
        "bics {tmp}, {spsel}",
        "msr CONTROL, {tmp}",
        "isb",
        "msr MSP, {msp}",
        "mov lr, {new_lr}",
        "bx {rv}",
        // `out(reg) _` is not permitted in a `noreturn` asm! call,
        // so instead use `in(reg) 0` and don't restore it afterwards.
        tmp = in(reg) 0,
        spsel = in(reg) 2,
        new_lr = in(reg) 0xFFFFFFFFu32,
        msp = in(reg) msp,
        rv = in(reg) rv,
        options(noreturn),
    );
}
