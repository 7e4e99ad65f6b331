//! In-memory hardware facade used off-Pi and in tests, generalizing the
//! teacher's `rfid::mock::MockRfidReader` (and the mock UID generator in
//! `rfid.rs`'s `mock_platform` submodule) from "just RFID" to every
//! peripheral the facade exposes. Nothing here touches real GPIO/SPI/UART;
//! state is plain fields a test (or a dev build with no peripherals wired
//! up) can drive directly via `inject_card`/`inject_keys`.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use log::info;

use crate::config::Rgb;
use crate::hardware::{BeepKind, HardwareFacade, Key};

const BUTTON_DEBOUNCE: Duration = Duration::from_millis(25);

#[derive(Debug, Default)]
pub struct MockHardware {
    next_card: i64,
    pressed_keys: HashSet<Key>,
    last_meta_seen: Option<(Key, Instant)>,
    last_edge_reported: Option<Key>,

    relay_on: bool,
    last_line1: String,
    last_line2: String,
    last_color: Rgb,
    lcd_writes: u32,

    beeps: Vec<BeepKind>,
}

impl MockHardware {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_card: -1,
            last_color: Rgb(0, 0, 0),
            ..Default::default()
        }
    }

    /// Places (or removes, with a negative id) a card in the virtual field.
    pub fn inject_card(&mut self, card_id: i64) {
        self.next_card = card_id;
    }

    pub fn inject_keys(&mut self, keys: impl IntoIterator<Item = Key>) {
        self.pressed_keys = keys.into_iter().collect();
    }

    pub fn clear_keys(&mut self) {
        self.pressed_keys.clear();
    }

    #[must_use]
    pub fn relay_is_on(&self) -> bool {
        self.relay_on
    }

    #[must_use]
    pub fn last_display(&self) -> (&str, &str, Rgb) {
        (&self.last_line1, &self.last_line2, self.last_color)
    }

    #[must_use]
    pub fn lcd_write_count(&self) -> u32 {
        self.lcd_writes
    }

    #[must_use]
    pub fn beeps(&self) -> &[BeepKind] {
        &self.beeps
    }
}

impl HardwareFacade for MockHardware {
    fn read_card(&mut self) -> i64 {
        self.next_card
    }

    fn keypad_scan(&mut self) -> HashSet<Key> {
        self.pressed_keys.clone()
    }

    fn button_edge(&mut self) -> (bool, HashSet<Key>) {
        let scan = self.keypad_scan();
        let meta = scan.iter().find(|k| matches!(k, Key::Star | Key::Hash)).copied();

        let edge = match meta {
            None => {
                self.last_meta_seen = None;
                self.last_edge_reported = None;
                false
            }
            Some(key) => {
                let now = Instant::now();
                let is_new_press = self.last_edge_reported != Some(key);
                let debounced = match self.last_meta_seen {
                    Some((seen_key, seen_at)) if seen_key == key => now.duration_since(seen_at) >= BUTTON_DEBOUNCE,
                    _ => {
                        self.last_meta_seen = Some((key, now));
                        false
                    }
                };
                if debounced && is_new_press {
                    self.last_edge_reported = Some(key);
                    true
                } else {
                    false
                }
            }
        };

        (edge, scan)
    }

    fn set_relay(&mut self, on: bool) {
        if self.relay_on != on {
            info!("mock relay -> {on}");
            self.relay_on = on;
        }
    }

    fn lcd_write(&mut self, line1: &str, line2: &str, backlight: Rgb) {
        if self.last_line1 == line1 && self.last_line2 == line2 && self.last_color == backlight {
            return;
        }
        self.last_line1 = line1.to_string();
        self.last_line2 = line2.to_string();
        self.last_color = backlight;
        self.lcd_writes += 1;
    }

    fn leds_fill(&mut self, _rgb: Rgb) {}

    fn leds_rainbow(&mut self) {}

    fn beep(&mut self, kind: BeepKind) {
        self.beeps.push(kind);
    }

    fn beep_start(&mut self, _freq_hz: f32, _duration_ms: u32, _count: u32) {}

    fn beep_stop(&mut self) {}

    fn tick(&mut self) {}

    fn mac_hex(&self) -> String {
        "de:ad:be:ef:00:01".replace(':', "")
    }

    fn ip_dotted(&self) -> String {
        "127.0.0.1".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lcd_write_is_idempotent() {
        let mut hw = MockHardware::new();
        hw.lcd_write("a", "b", Rgb(1, 2, 3));
        hw.lcd_write("a", "b", Rgb(1, 2, 3));
        assert_eq!(hw.lcd_write_count(), 1);
        hw.lcd_write("a", "c", Rgb(1, 2, 3));
        assert_eq!(hw.lcd_write_count(), 2);
    }

    #[test]
    fn relay_tracks_last_set_value() {
        let mut hw = MockHardware::new();
        assert!(!hw.relay_is_on());
        hw.set_relay(true);
        assert!(hw.relay_is_on());
        hw.set_relay(false);
        assert!(!hw.relay_is_on());
    }

    #[test]
    fn button_edge_requires_debounce_window() {
        let mut hw = MockHardware::new();
        hw.inject_keys([Key::Star]);
        let (edge, _) = hw.button_edge();
        assert!(!edge, "first observation should not report an edge yet");
    }
}
