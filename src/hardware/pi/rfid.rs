//! MFRC522 RFID reader over SPI, grounded on the teacher's persistent-scanner
//! implementation in `rfid.rs`'s `raspberry_pi` submodule: one-time init with
//! a GPIO reset-pin toggle, 1MHz SPI_MODE_0, `wupa()`/`select()`/`hlta()` per
//! read, antenna gain maxed for range.

use std::thread;
use std::time::Duration;

use linux_embedded_hal::spidev::{SpiModeFlags, SpidevOptions};
use linux_embedded_hal::Spidev;
use mfrc522::comm::eh02::spi::{DummyDelay, DummyNSS, SpiInterface};
use mfrc522::{Mfrc522, RxGain};
use rppal::gpio::{Gpio, OutputPin};

use log::{error, warn};

type Scanner = Mfrc522<SpiInterface<Spidev, DummyNSS, DummyDelay>, mfrc522::Initialized>;

pub struct RfidReader {
    scanner: Scanner,
    _reset_pin: OutputPin,
}

impl RfidReader {
    pub fn open(spi_path: &str, reset_pin: u8) -> Result<Self, String> {
        let mut spi = Spidev::open(spi_path).map_err(|e| format!("open {spi_path}: {e:?}"))?;
        let options = SpidevOptions::new()
            .bits_per_word(8)
            .max_speed_hz(1_000_000)
            .mode(SpiModeFlags::SPI_MODE_0)
            .build();
        spi.configure(&options).map_err(|e| format!("configure spi: {e:?}"))?;

        let gpio = Gpio::new().map_err(|e| format!("gpio init: {e:?}"))?;
        let mut reset = gpio
            .get(u8::from(reset_pin))
            .map_err(|e| format!("reset pin {reset_pin}: {e:?}"))?
            .into_output();
        reset.set_high();
        reset.set_low();
        thread::sleep(Duration::from_millis(50));
        reset.set_high();
        thread::sleep(Duration::from_millis(50));

        let mfrc522 = Mfrc522::new(SpiInterface::new(spi))
            .init()
            .map_err(|e| format!("mfrc522 init: {e:?}"))?;

        let mut scanner = Self {
            scanner: mfrc522,
            _reset_pin: reset,
        };
        if let Err(e) = scanner.scanner.set_antenna_gain(RxGain::DB48) {
            warn!("could not raise antenna gain: {e:?}");
        }
        Ok(scanner)
    }

    /// One polling cycle. Returns the UID as a non-negative integer, or -1
    /// if no card is in field -- matches the facade contract in
    /// `SPEC_FULL.md` S4.1 (`read_card() -> i64`).
    pub fn read_card(&mut self) -> i64 {
        let atqa = match self.scanner.wupa().or_else(|_| self.scanner.reqa()) {
            Ok(atqa) => atqa,
            Err(_) => return -1,
        };

        match self.scanner.select(&atqa) {
            Ok(uid) => {
                let _ = self.scanner.hlta();
                uid_to_i64(uid.as_bytes())
            }
            Err(e) => {
                error!("rfid select failed: {e:?}");
                let _ = self.scanner.hlta();
                -1
            }
        }
    }
}

/// Folds an arbitrary-length UID into a non-negative i64, taking the low 4
/// bytes (the common case for MIFARE UIDs) as a big-endian u32.
fn uid_to_i64(bytes: &[u8]) -> i64 {
    let tail = &bytes[bytes.len().saturating_sub(4)..];
    let mut value: u32 = 0;
    for byte in tail {
        value = (value << 8) | u32::from(*byte);
    }
    i64::from(value)
}

#[cfg(test)]
mod tests {
    use super::uid_to_i64;

    #[test]
    fn uid_folds_to_non_negative_integer() {
        assert_eq!(uid_to_i64(&[0x00, 0x00, 0x00, 0x01]), 1);
        assert_eq!(uid_to_i64(&[0xDE, 0xAD, 0xBE, 0xEF]), 0xDEAD_BEEFu32 as i64);
    }
}
