//! Display Coordinator (C3): idempotent LCD/LED presentation layer sitting
//! on top of the Hardware Facade. `HardwareFacade::lcd_write` already dedupes
//! identical writes (`SPEC_FULL.md` S9, "Display idempotence"); this module
//! adds the higher-level conveniences the FSM actually calls: centered
//! single-line messages, two-line layouts, the welcome banner (which
//! consults the Authorization Client), a scanning animation, and the grace
//! period progress bar.

use std::time::{Duration, Instant};

use crate::api::AuthClient;
use crate::config::Rgb;
use crate::hardware::HardwareFacade;

const LCD_WIDTH: usize = 16;
const ANIMATION_INTERVAL: Duration = Duration::from_millis(250);

pub struct DisplayCoordinator {
    anim_phase: u8,
    last_anim_update: Option<Instant>,
    grace_total: Duration,
    grace_start: Option<Instant>,
}

impl Default for DisplayCoordinator {
    fn default() -> Self {
        Self {
            anim_phase: 0,
            last_anim_update: None,
            grace_total: Duration::ZERO,
            grace_start: None,
        }
    }
}

impl DisplayCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// One centered line; the second line is left blank.
    pub fn message(&mut self, hw: &mut dyn HardwareFacade, text: &str, color: Rgb) {
        hw.lcd_write(&center(text), "", color);
    }

    pub fn two_line(&mut self, hw: &mut dyn HardwareFacade, line1: &str, line2: &str, color: Rgb) {
        hw.lcd_write(&fit(line1), &fit(line2), color);
    }

    /// "Welcome &lt;first name&gt;" / "Machine On", falling back to a bare
    /// "Welcome" if the name lookup fails.
    pub fn welcome(&mut self, hw: &mut dyn HardwareFacade, auth: &AuthClient, card_id: i64, color: Rgb) {
        let (name, _email) = auth.get_user(card_id);
        let first_name = name.split_whitespace().next().unwrap_or("Welcome");
        self.two_line(hw, &format!("Welcome {first_name}"), "Machine On", color);
    }

    /// Cycles 0-3 trailing dots, refreshing at most every 250ms so the
    /// LCD's slow serial link isn't hammered by a 100ms tick loop.
    pub fn scanning_animation(&mut self, hw: &mut dyn HardwareFacade, prefix: &str, color: Rgb) {
        let now = Instant::now();
        let due = match self.last_anim_update {
            None => true,
            Some(last) => now.duration_since(last) >= ANIMATION_INTERVAL,
        };
        if due {
            self.anim_phase = (self.anim_phase + 1) % 4;
            self.last_anim_update = Some(now);
        }
        let dots = ".".repeat(self.anim_phase as usize);
        self.message(hw, &format!("{prefix}{dots}"), color);
    }

    pub fn grace_timer_start(&mut self, total_seconds: u64) {
        self.grace_total = Duration::from_secs(total_seconds);
        self.grace_start = Some(Instant::now());
    }

    /// Renders "Insert Card" / a 10-segment progress bar with the seconds
    /// remaining, and returns the remaining seconds (0 once expired).
    pub fn grace_timer_update(&mut self, hw: &mut dyn HardwareFacade, color: Rgb) -> u64 {
        let Some(start) = self.grace_start else {
            return 0;
        };
        let elapsed = Instant::now().duration_since(start);
        let remaining = self.grace_total.saturating_sub(elapsed).as_secs();

        let filled = if self.grace_total.as_secs() == 0 {
            0
        } else {
            ((remaining * 10) / self.grace_total.as_secs().max(1)).min(10)
        };
        let bar: String = format!(
            "[{}{}] {}s",
            "#".repeat(filled as usize),
            "-".repeat(10 - filled as usize),
            remaining
        );
        self.two_line(hw, "Insert Card", &bar, color);
        remaining
    }
}

fn fit(text: &str) -> String {
    if text.len() >= LCD_WIDTH {
        text.chars().take(LCD_WIDTH).collect()
    } else {
        format!("{text:<LCD_WIDTH$}")
    }
}

fn center(text: &str) -> String {
    let text: String = text.chars().take(LCD_WIDTH).collect();
    let pad = LCD_WIDTH - text.len();
    let left = pad / 2;
    let right = pad - left;
    format!("{}{text}{}", " ".repeat(left), " ".repeat(right))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::MockHardware;

    #[test]
    fn message_centers_short_text() {
        let mut hw = MockHardware::new();
        let mut display = DisplayCoordinator::new();
        display.message(&mut hw, "Hi", Rgb(1, 2, 3));
        let (line1, _, _) = hw.last_display();
        assert_eq!(line1.len(), LCD_WIDTH);
        assert_eq!(line1.trim(), "Hi");
    }

    #[test]
    fn two_line_pads_to_width() {
        let mut hw = MockHardware::new();
        let mut display = DisplayCoordinator::new();
        display.two_line(&mut hw, "a", "b", Rgb(0, 0, 0));
        let (line1, line2, _) = hw.last_display();
        assert_eq!(line1.len(), LCD_WIDTH);
        assert_eq!(line2.len(), LCD_WIDTH);
    }

    #[test]
    fn grace_timer_counts_down_and_expires() {
        let mut hw = MockHardware::new();
        let mut display = DisplayCoordinator::new();
        display.grace_timer_start(0);
        let remaining = display.grace_timer_update(&mut hw, Rgb(0, 0, 0));
        assert_eq!(remaining, 0);
    }

    #[test]
    fn scanning_animation_cycles_dots_over_time() {
        let mut hw = MockHardware::new();
        let mut display = DisplayCoordinator::new();
        display.scanning_animation(&mut hw, "Scanning", Rgb(0, 0, 0));
        let (line1, _, _) = hw.last_display();
        assert!(line1.trim_end().starts_with("Scanning"));
    }
}
