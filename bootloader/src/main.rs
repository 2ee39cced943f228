// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

#![no_std]
#![no_main]
mod backup;
mod eeprom;
mod flash;
mod jump_app;

use defmt_rtt as _;
// global logger
use embassy_stm32 as _;
// time driver
use panic_probe as _;

use backup::{take_reset_flags, BackupRegisters};
use consts::IWDG_TIMEOUT_US;
use defmt::{error, info, warn};
use eeprom::Eeprom;
use embassy_executor::Spawner;
use embassy_stm32::gpio::{Level, Output, Speed};
use embassy_stm32::usart::{self, BufferedUart};
use embassy_stm32::wdg::IndependentWatchdog;
use embassy_stm32::{bind_interrupts, peripherals};
use embassy_time::{Instant, Timer};
use flash::RamFlash;
use hub_ota::at::AtModem;
use hub_ota::boot::{self, BootReport};
use hub_ota::config::UpgradeConfig;
use hub_ota::flash::Programmer;
use hub_ota::poll::{Operation, Poll};
use hub_ota::records::Records;
use hub_ota::state::UpgradeState;
use hub_ota::upgrade::{Controller, Exit, Resources};
use jump_app::jump_to_app;
use static_cell::StaticCell;

bind_interrupts!(struct Irqs {
    USART2 => usart::BufferedInterruptHandler<peripherals::USART2>;
});

/// Main loop period, the watchdog is fed once per iteration.
const POLL_PERIOD_MS: u64 = 10;
const MODEM_BAUD: u32 = 38_400;
/// The modem reset line is active low.
const MODEM_RESET_PULSE_MS: u64 = 500;
/// Time the modem needs after reset before it answers `AT`.
const MODEM_STARTUP_MS: u64 = 5_000;

static MODEM_TX: StaticCell<[u8; 256]> = StaticCell::new();
static MODEM_RX: StaticCell<[u8; 512]> = StaticCell::new();

#[embassy_executor::main]
async fn main(_spawner: Spawner) {
    let p = embassy_stm32::init(Default::default());

    let mut wdg = IndependentWatchdog::new(p.IWDG, IWDG_TIMEOUT_US);
    #[cfg(not(feature = "debug"))]
    wdg.unleash();

    let reset = take_reset_flags();
    let mut scratch = BackupRegisters::new();
    let mut records = Records::new(Eeprom::new());
    info!("bootloader v{} reset {}", consts::BOOT_VERSION, reset);

    let report = match boot::start(&mut records, &mut scratch, reset) {
        Ok(report) => report,
        Err(e) => {
            error!("boot records unavailable: {}", e);
            BootReport {
                reset,
                ..Default::default()
            }
        }
    };

    let mut controller = match Controller::new(UpgradeConfig::default(), &mut records, &report) {
        Ok(controller) => controller,
        Err(e) => {
            error!("upgrade bookkeeping unavailable: {}", e);
            finish_and_jump(&mut records, &mut scratch);
        }
    };
    if controller.state() == UpgradeState::DoNothing {
        finish_and_jump(&mut records, &mut scratch);
    }

    let flash = match RamFlash::new() {
        Ok(flash) => flash,
        Err(e) => {
            error!("flash programming disabled: {}", e);
            abandon(&mut records, &mut scratch, &controller);
        }
    };

    let mut config_uart = usart::Config::default();
    config_uart.baudrate = MODEM_BAUD;
    let uart = match BufferedUart::new(
        p.USART2,
        Irqs,
        p.PA3,
        p.PA2,
        MODEM_TX.init([0; 256]),
        MODEM_RX.init([0; 512]),
        config_uart,
    ) {
        Ok(uart) => uart,
        Err(_) => {
            error!("modem uart config rejected");
            abandon(&mut records, &mut scratch, &controller);
        }
    };

    // Held high for as long as the bootloader runs.
    let mut modem_reset = Output::new(p.PA4, Level::Low, Speed::Low);
    Timer::after_millis(MODEM_RESET_PULSE_MS).await;
    modem_reset.set_high();
    wdg.pet();
    Timer::after_millis(MODEM_STARTUP_MS).await;

    let mut res = Resources {
        programmer: Programmer::new(flash),
        records,
        modem: AtModem::new(uart),
    };

    loop {
        wdg.pet();
        match controller.poll(&mut res, Instant::now().as_millis()) {
            Poll::Busy => Timer::after_millis(POLL_PERIOD_MS).await,
            Poll::Success(Exit::Boot) => break,
            Poll::Success(Exit::TestApp) => {
                info!("test run of the new application");
                break;
            }
            Poll::Timeout | Poll::Error => {
                warn!("upgrade aborted in {}", controller.state());
                break;
            }
        }
    }

    wdg.pet();
    finish_and_jump(&mut res.records, &mut scratch);
}

/// Give up on the upgrade this boot and start whatever application is there.
fn abandon(records: &mut Records<Eeprom>, scratch: &mut BackupRegisters, controller: &Controller) -> ! {
    let ctx = controller.context();
    if ctx.in_progress && ctx.state.is_critical() {
        error!("upgrade open in {}, application may be incomplete", ctx.state);
    } else {
        warn!("upgrade left in {}, open {}", ctx.state, ctx.in_progress);
    }
    finish_and_jump(records, scratch)
}

fn finish_and_jump(records: &mut Records<Eeprom>, scratch: &mut BackupRegisters) -> ! {
    if let Err(e) = boot::finish(records, &mut *scratch) {
        error!("application setup failed: {}", e);
    }
    let vtor = boot::app_vector_table(records);
    unsafe { jump_to_app(vtor) }
}
