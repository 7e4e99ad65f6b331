//! APA102/SK9822 "DotStar" LED strip driver over SPI, grounded on
//! `original_source/Firmware/DotstarController.py`: a 4-byte zero start
//! frame, one `[0xE0|brightness, b, g, r]` frame per LED, and a
//! `(n/16)+1`-byte zero end frame for SK9822 compatibility.

use linux_embedded_hal::spidev::{SpiModeFlags, SpidevOptions};
use linux_embedded_hal::Spidev;
use std::io::Write;

use crate::config::Rgb;

const NUM_LEDS: usize = 15;
const DEFAULT_BRIGHTNESS: u8 = 16;

pub struct DotstarStrip {
    spi: Spidev,
    leds: [Rgb; NUM_LEDS],
    brightness: u8,
}

impl DotstarStrip {
    pub fn open(spi_path: &str) -> Result<Self, String> {
        let mut spi = Spidev::open(spi_path).map_err(|e| format!("open {spi_path}: {e:?}"))?;
        let options = SpidevOptions::new()
            .bits_per_word(8)
            .max_speed_hz(1_000_000)
            .mode(SpiModeFlags::SPI_MODE_0)
            .build();
        spi.configure(&options).map_err(|e| format!("configure spi: {e:?}"))?;

        let mut strip = Self {
            spi,
            leds: [Rgb(0, 0, 0); NUM_LEDS],
            brightness: DEFAULT_BRIGHTNESS,
        };
        strip.fill(Rgb(0, 0, 0));
        strip.show();
        Ok(strip)
    }

    pub fn fill(&mut self, color: Rgb) {
        self.leds = [color; NUM_LEDS];
    }

    pub fn show(&mut self) {
        let mut frame = Vec::with_capacity(4 + NUM_LEDS * 4 + (NUM_LEDS / 16) + 1);
        frame.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);
        for Rgb(r, g, b) in self.leds {
            frame.extend_from_slice(&[0xE0 | self.brightness, b, g, r]);
        }
        frame.extend(std::iter::repeat(0x00).take(NUM_LEDS / 16 + 1));
        let _ = self.spi.write_all(&frame);
    }

    /// A single step of a rainbow cycle; callers advance this each tick to
    /// animate, rather than blocking the caller like the source's
    /// `rainbow_cycle` does.
    pub fn rainbow_step(&mut self, phase: u8) {
        for (i, led) in self.leds.iter_mut().enumerate() {
            let pos = ((i * 256 / NUM_LEDS) as u8).wrapping_add(phase);
            *led = wheel(pos);
        }
        self.show();
    }
}

fn wheel(pos: u8) -> Rgb {
    if pos < 85 {
        Rgb(255 - pos * 3, pos * 3, 0)
    } else if pos < 170 {
        let pos = pos - 85;
        Rgb(0, 255 - pos * 3, pos * 3)
    } else {
        let pos = pos - 170;
        Rgb(pos * 3, 0, 255 - pos * 3)
    }
}
