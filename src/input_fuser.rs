//! Input Fuser (C4): builds one `InputFrame` per tick from the Hardware
//! Facade's three concurrent sources (RFID, keypad, meta-key edges), and
//! owns PIN Verification (S4.7), which is invoked from here because it
//! needs the same "is this a freshly-presented card" bookkeeping the frame
//! assembly already does.

use std::thread;
use std::time::Duration;

use log::info;

use crate::api::AuthClient;
use crate::config::DisplayConfig;
use crate::display::DisplayCoordinator;
use crate::domain::{CardDetails, CardType, InputFrame};
use crate::hardware::{HardwareFacade, Key};

const PIN_LENGTH: usize = 4;
const PIN_ATTEMPTS: u32 = 3;
const KEY_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Requested by the Input Fuser when a meta key is pressed from
/// `IdleNoCard`; the main loop acts on it by switching into the
/// corresponding Special Mode and skipping FSM dispatch this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeRequest {
    None,
    CardReader,
    Certification,
}

pub struct InputFuser {
    previous_card_id: i64,
    previous_details: CardDetails,
    /// Cleared on any transition into or out of `AccessComplete` (S4.5,
    /// "Forced re-verification") so a card left in the reader is
    /// re-evaluated with a fresh PIN prompt.
    last_verified_card: Option<i64>,
}

impl Default for InputFuser {
    fn default() -> Self {
        Self {
            previous_card_id: -1,
            previous_details: CardDetails::unknown(),
            last_verified_card: None,
        }
    }
}

impl InputFuser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Forces the next presentation of any card to go through PIN
    /// verification again, per the "forced re-verification" rule.
    pub fn forget_verified_card(&mut self) {
        self.last_verified_card = None;
    }

    /// Builds this tick's `InputFrame`. `current_state_name` and `in_grace`
    /// let the fuser apply the PIN-verification-during-grace exemption and
    /// the `IdleNoCard`-only meta-key escape without the FSM itself having
    /// to reach back into input assembly.
    #[allow(clippy::too_many_arguments)]
    pub fn poll(
        &mut self,
        hw: &mut dyn HardwareFacade,
        auth: &AuthClient,
        display: &mut DisplayCoordinator,
        palette: &DisplayConfig,
        equipment_type_id: u32,
        current_state_name: &str,
        in_grace: bool,
    ) -> (InputFrame, ModeRequest) {
        let raw_card = hw.read_card();
        let card_id = if raw_card > 0 { raw_card } else { -1 };
        let (edge, raw_keys) = hw.button_edge();

        if current_state_name == "IdleNoCard" {
            if edge && raw_keys.contains(&Key::Star) {
                return (InputFrame::no_card(), ModeRequest::CardReader);
            }
            if edge && raw_keys.contains(&Key::Hash) {
                return (InputFrame::no_card(), ModeRequest::Certification);
            }
        }

        let card_removal = self.previous_card_id > 0 && card_id <= 0;
        let is_new_card = card_id > 0 && card_id != self.previous_card_id;

        let details = if is_new_card {
            let fresh = auth.get_card_details(card_id, equipment_type_id);
            self.previous_details = fresh.clone();
            fresh
        } else if card_id > 0 {
            self.previous_details.clone()
        } else {
            CardDetails::unknown()
        };

        let mut frame = InputFrame {
            card_id,
            card_type: details.card_type,
            user_is_authorized: false,
            user_authority_level: details.user_authority_level,
            button_pressed: edge,
            card_removal,
            pin: details.pin.clone(),
        };

        let needs_pin_check = current_state_name != "RunningNoCard"
            && !in_grace
            && is_new_card
            && details.user_is_authorized
            && matches!(details.card_type, CardType::User | CardType::Training | CardType::Proxy)
            && self.last_verified_card != Some(card_id);

        frame.user_is_authorized = if needs_pin_check {
            let ok = self.verify_pin(hw, display, palette, &details.pin, card_id);
            if ok {
                self.last_verified_card = Some(card_id);
            }
            ok
        } else if current_state_name == "RunningNoCard" || in_grace || self.last_verified_card == Some(card_id) {
            details.user_is_authorized
        } else {
            false
        };

        self.previous_card_id = card_id;
        (frame, ModeRequest::None)
    }

    /// Entry point for Special Modes (C6), which need the same PIN protocol
    /// to verify an admin card without going through `poll`'s frame assembly.
    pub fn verify_pin_now(
        &mut self,
        hw: &mut dyn HardwareFacade,
        display: &mut DisplayCoordinator,
        palette: &DisplayConfig,
        expected: &Option<String>,
        card_id: i64,
    ) -> bool {
        self.verify_pin(hw, display, palette, expected, card_id)
    }

    /// S4.7: collects a 4-digit PIN from the keypad, aborting if the card
    /// is removed mid-entry, masking input on the display, and allowing up
    /// to three mismatches before declaring the card unauthorized.
    fn verify_pin(
        &mut self,
        hw: &mut dyn HardwareFacade,
        display: &mut DisplayCoordinator,
        palette: &DisplayConfig,
        expected: &Option<String>,
        card_id: i64,
    ) -> bool {
        let unauth_color = crate::config::resolve_color(palette, "unauth_color");
        let auth_color = crate::config::resolve_color(palette, "auth_color");

        let Some(expected_pin) = expected else {
            info!("card {card_id}: no PIN on file, rejecting");
            return false;
        };
        if expected_pin == "-1" {
            info!("card {card_id}: sentinel PIN, rejecting");
            return false;
        }

        for attempt in 1..=PIN_ATTEMPTS {
            display.two_line(hw, "Please Enter Pin", &format!("Attempts: {attempt}"), auth_color);
            let mut entered = String::new();
            for _ in 0..PIN_LENGTH {
                match self.read_one_digit(hw, card_id) {
                    Some(digit) => {
                        entered.push(char::from(b'0' + digit));
                        display.two_line(hw, "Please Enter Pin", &"*".repeat(entered.len()), auth_color);
                    }
                    None => {
                        display.two_line(hw, "Card Removed", "", unauth_color);
                        return false;
                    }
                }
            }
            if &entered == expected_pin {
                return true;
            }
            display.two_line(hw, "Incorrect Pin", "", unauth_color);
            thread::sleep(Duration::from_millis(400));
        }
        false
    }

    /// Waits for a fresh digit key-press (debounced against key-repeat by
    /// requiring a release before the next capture), bailing out with
    /// `None` as soon as the card leaves the reader.
    fn read_one_digit(&self, hw: &mut dyn HardwareFacade, card_id: i64) -> Option<u8> {
        let mut last_seen: Option<u8> = None;
        loop {
            if hw.read_card() != card_id {
                return None;
            }
            let keys = hw.keypad_scan();
            let digit = keys.iter().find_map(|k| match k {
                Key::Digit(d) => Some(*d),
                _ => None,
            });
            match (digit, last_seen) {
                (Some(d), None) => return Some(d),
                (None, _) => last_seen = None,
                (Some(d), Some(prev)) if d != prev => return Some(d),
                _ => {}
            }
            thread::sleep(KEY_POLL_INTERVAL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DbConfig;
    use crate::hardware::mock::MockHardware;

    fn fuser_harness() -> (InputFuser, MockHardware, AuthClient, DisplayCoordinator, DisplayConfig) {
        (
            InputFuser::new(),
            MockHardware::new(),
            AuthClient::new(&DbConfig::default()),
            DisplayCoordinator::new(),
            DisplayConfig::default(),
        )
    }

    #[test]
    fn no_card_yields_sentinel_frame() {
        let (mut fuser, mut hw, auth, mut display, palette) = fuser_harness();
        let (frame, mode) = fuser.poll(&mut hw, &auth, &mut display, &palette, 1, "IdleNoCard", false);
        assert_eq!(frame.card_id, -1);
        assert!(!frame.has_card());
        assert_eq!(mode, ModeRequest::None);
    }

    #[test]
    fn star_from_idle_no_card_requests_card_reader_mode() {
        let (mut fuser, mut hw, auth, mut display, palette) = fuser_harness();
        hw.inject_keys([Key::Star]);
        // First poll only arms the debounce window; the edge fires once the
        // key has been observed across the debounce interval.
        let _ = fuser.poll(&mut hw, &auth, &mut display, &palette, 1, "IdleNoCard", false);
        std::thread::sleep(Duration::from_millis(30));
        let (_, mode) = fuser.poll(&mut hw, &auth, &mut display, &palette, 1, "IdleNoCard", false);
        assert_eq!(mode, ModeRequest::CardReader);
    }

    #[test]
    fn pin_verification_rejects_absent_and_sentinel_pins() {
        let (mut fuser, mut hw, _auth, mut display, palette) = fuser_harness();
        assert!(!fuser.verify_pin_now(&mut hw, &mut display, &palette, &None, 0xA1));
        assert!(!fuser.verify_pin_now(&mut hw, &mut display, &palette, &Some("-1".to_string()), 0xA1));
    }

    #[test]
    fn card_removal_is_detected_on_the_next_tick() {
        let (mut fuser, mut hw, auth, mut display, palette) = fuser_harness();
        hw.inject_card(42);
        let (frame, _) = fuser.poll(&mut hw, &auth, &mut display, &palette, 1, "RunningAuthUser", false);
        assert!(!frame.card_removal);
        hw.inject_card(-1);
        let (frame, _) = fuser.poll(&mut hw, &auth, &mut display, &palette, 1, "RunningAuthUser", false);
        assert!(frame.card_removal);
    }
}
