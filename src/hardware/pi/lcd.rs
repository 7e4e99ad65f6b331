//! Matrix-Orbital-compatible serial LCD driver, grounded on
//! `original_source/Firmware/RGBLCD.py`: a `0xFE`-prefixed command byte
//! protocol over UART at 9600 baud, with a settle delay after each command.
//! The facade layer above this (`Display Coordinator`, C3) is responsible
//! for write idempotence; this driver just speaks the wire protocol.

use std::io::Write;
use std::thread;
use std::time::Duration;

use rppal::uart::{Parity, Uart};

const CMD_PREFIX: u8 = 0xFE;
const CLEAR_SCREEN: u8 = 0x58;
const DISPLAY_ON: u8 = 0x42;
const SET_CURSOR_POS: u8 = 0x47;
const SET_RGB_COLOR: u8 = 0xD0;
const SET_LCD_SIZE: u8 = 0xD1;
const UNDERLINE_CURSOR_OFF: u8 = 0x4B;
const BLOCK_CURSOR_OFF: u8 = 0x54;
const AUTOSCROLL_ON: u8 = 0x51;
const SET_CONTRAST: u8 = 0x50;
const SET_BRIGHTNESS: u8 = 0x99;

const COMMAND_DELAY: Duration = Duration::from_millis(50);

pub struct SerialLcd {
    uart: Uart,
    cols: u8,
    rows: u8,
}

impl SerialLcd {
    pub fn open(tx_pin: u8) -> Result<Self, String> {
        // rppal's Uart targets /dev/serial0 et al.; tx_pin is recorded for
        // diagnostics since the mini-UART TX line is fixed per header.
        let _ = tx_pin;
        let mut uart = Uart::with_path("/dev/serial0", 9600, Parity::None, 8, 1)
            .map_err(|e| format!("open uart: {e:?}"))?;
        thread::sleep(Duration::from_millis(500));

        let mut lcd = Self { uart, cols: 16, rows: 2 };
        lcd.send(&[SET_LCD_SIZE, lcd.cols, lcd.rows]);
        lcd.send(&[CLEAR_SCREEN]);
        lcd.send(&[DISPLAY_ON, 0]);
        lcd.send(&[UNDERLINE_CURSOR_OFF]);
        lcd.send(&[BLOCK_CURSOR_OFF]);
        lcd.send(&[AUTOSCROLL_ON]);
        lcd.send(&[SET_CONTRAST, 200]);
        lcd.send(&[SET_BRIGHTNESS, 255]);
        lcd.set_rgb_color(255, 255, 255);
        Ok(lcd)
    }

    fn send(&mut self, bytes: &[u8]) {
        let mut data = Vec::with_capacity(bytes.len() + 1);
        data.push(CMD_PREFIX);
        data.extend_from_slice(bytes);
        let _ = self.uart.write(&data);
        thread::sleep(COMMAND_DELAY);
    }

    pub fn clear(&mut self) {
        self.send(&[CLEAR_SCREEN]);
    }

    pub fn set_rgb_color(&mut self, r: u8, g: u8, b: u8) {
        self.send(&[SET_RGB_COLOR, r, g, b]);
    }

    pub fn print_at(&mut self, text: &str, col: u8, row: u8) {
        self.send(&[SET_CURSOR_POS, col.clamp(1, self.cols), row.clamp(1, self.rows)]);
        thread::sleep(Duration::from_millis(20));
        let _ = self.uart.write(text.as_bytes());
    }

    pub fn two_line(&mut self, line1: &str, line2: &str, rgb: (u8, u8, u8)) {
        self.clear();
        self.set_rgb_color(rgb.0, rgb.1, rgb.2);
        self.print_at(line1, 1, 1);
        self.print_at(line2, 1, 2);
    }
}
