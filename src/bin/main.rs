//! ESP32-S3 firmware driving an RN4870/1 BLE module.
//!
//! Wiring:
//! - UART1 TX GPIO17 -> module RX
//! - UART1 RX GPIO18 <- module TX
//! - GPIO4 -> module RST_N
//!
//! The module is reset, switched to command mode and queried for its
//! firmware version.

#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]

use embassy_executor::Spawner;
use embassy_time::{Duration, Timer};
use embedded_io_async::ErrorKind;
use esp_hal::Async;
use esp_hal::clock::CpuClock;
use esp_hal::gpio::{Level, Output, OutputConfig};
use esp_hal::timer::timg::TimerGroup;
use esp_hal::uart::{self, Uart, UartRx, UartTx};
use log::{error, info};
use rn487x_drivers::rn487x::{Config, Rn487x};
use rn487x_drivers::serial::{RxQueue, pump};

#[panic_handler]
fn panic(_: &core::panic::PanicInfo) -> ! {
    loop {}
}

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

static RX: RxQueue = RxQueue::new();

/// Transmit half of UART1 as an `embedded-io-async` writer.
struct ModuleTx(UartTx<'static, Async>);

impl embedded_io_async::ErrorType for ModuleTx {
    type Error = ErrorKind;
}

impl embedded_io_async::Write for ModuleTx {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.0.write_async(buf).await.map_err(|_| ErrorKind::Other)
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        self.0.flush_async().await.map_err(|_| ErrorKind::Other)
    }
}

/// Receive half of UART1 as an `embedded-io-async` reader.
struct ModuleRx(UartRx<'static, Async>);

impl embedded_io_async::ErrorType for ModuleRx {
    type Error = ErrorKind;
}

impl embedded_io_async::Read for ModuleRx {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.0.read_async(buf).await.map_err(|_| ErrorKind::Other)
    }
}

#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    esp_println::logger::init_logger_from_env();

    // Initialize ESP32-S3 peripherals and clock
    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    // Initialize the RTOS timer
    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    let ble_config = Config::from_env();

    let uart = Uart::new(
        peripherals.UART1,
        uart::Config::default().with_baudrate(ble_config.baudrate),
    )
    .expect("Failed to initialize UART1")
    .with_tx(peripherals.GPIO17)
    .with_rx(peripherals.GPIO18)
    .into_async();
    let (rx, tx) = uart.split();

    spawner
        .spawn(uart_rx_task(ModuleRx(rx)))
        .expect("Failed to spawn UART RX task");

    let reset = Output::new(peripherals.GPIO4, Level::High, OutputConfig::default());
    let mut ble = Rn487x::new(ble_config, ModuleTx(tx), &RX, Some(reset), None);

    for attempt in 1..=3 {
        match ble.init().await {
            Ok(()) => break,
            Err(e) => error!("RN487x init attempt {} failed: {}", attempt, e),
        }
    }

    match ble.version().await {
        Ok(version) => info!("RN487x firmware: {}", version),
        Err(e) => error!("Failed to read RN487x version: {}", e),
    }

    // Main loop: keep the system running
    loop {
        Timer::after(Duration::from_secs(1)).await;
    }
}

#[embassy_executor::task]
async fn uart_rx_task(rx: ModuleRx) {
    pump(rx, &RX).await;
}
