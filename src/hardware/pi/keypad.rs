//! 3x4 matrix keypad scanner, grounded on `original_source/Firmware/Keypad.py`:
//! one row driven low (active) at a time while the three columns are read
//! with pull-ups, active-low. Meta-key (`*`/`#`) edges are debounced by the
//! caller (`hardware::HardwareFacade::button_edge`), not here -- this module
//! only does the raw strobe-and-read.

use std::collections::HashSet;

use rppal::gpio::{Gpio, InputPin, OutputPin};

use crate::hardware::Key;

const KEY_LAYOUT: [[Key; 3]; 4] = [
    [Key::Digit(1), Key::Digit(2), Key::Digit(3)],
    [Key::Digit(4), Key::Digit(5), Key::Digit(6)],
    [Key::Digit(7), Key::Digit(8), Key::Digit(9)],
    [Key::Star, Key::Digit(0), Key::Hash],
];

pub struct Keypad {
    rows: Vec<OutputPin>,
    cols: Vec<InputPin>,
}

impl Keypad {
    pub fn open(row_pins: [u8; 4], col_pins: [u8; 3]) -> Result<Self, String> {
        let gpio = Gpio::new().map_err(|e| format!("gpio init: {e:?}"))?;
        let mut rows = Vec::with_capacity(4);
        for pin in row_pins {
            let mut out = gpio
                .get(pin)
                .map_err(|e| format!("row pin {pin}: {e:?}"))?
                .into_output();
            out.set_high();
            rows.push(out);
        }
        let mut cols = Vec::with_capacity(3);
        for pin in col_pins {
            let input = gpio
                .get(pin)
                .map_err(|e| format!("col pin {pin}: {e:?}"))?
                .into_input_pullup();
            cols.push(input);
        }
        Ok(Self { rows, cols })
    }

    pub fn scan(&mut self) -> HashSet<Key> {
        let mut pressed = HashSet::new();
        for (row_idx, row) in self.rows.iter_mut().enumerate() {
            row.set_low();
            for (col_idx, col) in self.cols.iter().enumerate() {
                if col.is_low() {
                    pressed.insert(KEY_LAYOUT[row_idx][col_idx]);
                }
            }
            row.set_high();
        }
        pressed
    }
}
