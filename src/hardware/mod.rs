//! Hardware Facade (C1): a uniform, infallible interface over every
//! peripheral the appliance drives. Two implementations exist, selected at
//! compile time exactly the way the teacher selects `rfid::PlatformRfidReader`
//! in `rfid/mod.rs`, generalized from "just the RFID reader" to the whole
//! peripheral set: a real `pi::PiHardware` built from `rppal`/`linux-embedded-hal`
//! on Linux ARM targets, and an in-memory `mock::MockHardware` everywhere else
//! (or when `mock_hardware` is forced).

use std::collections::HashSet;

use crate::config::Rgb;

pub mod mock;

#[cfg(all(
    any(target_arch = "aarch64", target_arch = "arm"),
    target_os = "linux",
    feature = "hardware",
    not(feature = "mock_hardware")
))]
pub mod pi;

#[cfg(all(
    any(target_arch = "aarch64", target_arch = "arm"),
    target_os = "linux",
    feature = "hardware",
    not(feature = "mock_hardware")
))]
pub use pi::PiHardware as PlatformHardware;

#[cfg(not(all(
    any(target_arch = "aarch64", target_arch = "arm"),
    target_os = "linux",
    feature = "hardware",
    not(feature = "mock_hardware")
)))]
pub use mock::MockHardware as PlatformHardware;

/// Keys on the 3x4 matrix keypad: digits plus the two meta keys that escape
/// into the special modes (C6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Digit(u8),
    Star,
    Hash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeepKind {
    Success,
    Warning,
    Error,
    Alert,
}

/// Every method here is infallible from the caller's perspective: driver
/// errors are logged by the implementation and a safe default is returned
/// (-1, false, or "display left unchanged"). Hardware transients must never
/// propagate into the FSM (`SPEC_FULL.md` S4.1, S7).
pub trait HardwareFacade {
    /// One polling cycle of the RFID reader. Returns the UID as a
    /// non-negative integer when a tag is in field, else -1. Must return
    /// within a bounded internal timeout -- callers rely on this to hold
    /// the ~100ms tick budget.
    fn read_card(&mut self) -> i64;

    /// Currently pressed keys, undebounced. Completes within a tick.
    fn keypad_scan(&mut self) -> HashSet<Key>;

    /// Debounced (>=25ms) rising-edge detector for the `*`/`#` meta keys.
    /// Returns whether an edge occurred since the last call, plus the
    /// current raw scan.
    fn button_edge(&mut self) -> (bool, HashSet<Key>);

    /// Toggles relay and interlock together. Always idempotent: repeated
    /// calls with the same value perform no additional hardware writes.
    fn set_relay(&mut self, on: bool);

    /// Idempotent two-line write: implementations suppress serial traffic
    /// when the requested state matches the last committed state.
    fn lcd_write(&mut self, line1: &str, line2: &str, backlight: Rgb);

    fn leds_fill(&mut self, rgb: Rgb);
    fn leds_rainbow(&mut self);

    fn beep(&mut self, kind: BeepKind);
    fn beep_start(&mut self, freq_hz: f32, duration_ms: u32, count: u32);
    fn beep_stop(&mut self);

    /// Advances the buzzer's internal effect scheduler. Must be called
    /// once per main-loop iteration.
    fn tick(&mut self);

    fn mac_hex(&self) -> String;
    fn ip_dotted(&self) -> String;
}
