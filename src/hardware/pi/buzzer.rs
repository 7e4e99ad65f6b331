//! Buzzer driver with an internal effect scheduler, grounded on
//! `original_source/PortalBox/Electronics/buzzer.py`: a buzz/beep state
//! machine advanced once per loop iteration (`tick`) rather than blocking,
//! driven over either PWM (tone) or a plain GPIO on/off toggle.

use rppal::gpio::{Gpio, OutputPin};
use rppal::pwm::{Channel, Polarity, Pwm};

use crate::hardware::BeepKind;

enum Drive {
    Pwm(Pwm),
    Gpio(OutputPin),
}

pub struct Buzzer {
    drive: Drive,
    on: bool,
    remaining_ticks: u32,
    toggle_every: u32,
    ticks_since_toggle: u32,
}

impl Buzzer {
    pub fn open_pwm(channel: Channel) -> Result<Self, String> {
        let pwm = Pwm::with_frequency(channel, 800.0, 0.5, Polarity::Normal, false)
            .map_err(|e| format!("pwm init: {e:?}"))?;
        Ok(Self {
            drive: Drive::Pwm(pwm),
            on: false,
            remaining_ticks: 0,
            toggle_every: 0,
            ticks_since_toggle: 0,
        })
    }

    pub fn open_gpio(pin: u8) -> Result<Self, String> {
        let gpio = Gpio::new().map_err(|e| format!("gpio init: {e:?}"))?;
        let out = gpio
            .get(pin)
            .map_err(|e| format!("buzzer pin {pin}: {e:?}"))?
            .into_output();
        Ok(Self {
            drive: Drive::Gpio(out),
            on: false,
            remaining_ticks: 0,
            toggle_every: 0,
            ticks_since_toggle: 0,
        })
    }

    fn set_on(&mut self, on: bool) {
        if self.on == on {
            return;
        }
        self.on = on;
        match &mut self.drive {
            Drive::Pwm(pwm) => {
                if on {
                    let _ = pwm.enable();
                } else {
                    let _ = pwm.disable();
                }
            }
            Drive::Gpio(pin) => {
                if on {
                    pin.set_high();
                } else {
                    pin.set_low();
                }
            }
        }
    }

    /// One-shot tone, duration expressed in ticks (the caller drives the
    /// scheduler at the main loop's ~100ms cadence).
    pub fn beep_start(&mut self, duration_ticks: u32, count: u32) {
        self.remaining_ticks = duration_ticks * count.max(1);
        self.toggle_every = duration_ticks.max(1);
        self.ticks_since_toggle = 0;
        self.set_on(true);
    }

    pub fn beep_stop(&mut self) {
        self.remaining_ticks = 0;
        self.set_on(false);
    }

    pub fn beep(&mut self, kind: BeepKind) {
        let (duration_ticks, count) = match kind {
            BeepKind::Success => (2, 1),
            BeepKind::Warning => (2, 2),
            BeepKind::Error => (1, 3),
            BeepKind::Alert => (1, 5),
        };
        self.beep_start(duration_ticks, count);
    }

    pub fn tick(&mut self) {
        if self.remaining_ticks == 0 {
            self.set_on(false);
            return;
        }
        self.ticks_since_toggle += 1;
        if self.ticks_since_toggle >= self.toggle_every {
            self.ticks_since_toggle = 0;
            self.set_on(!self.on);
        }
        self.remaining_ticks -= 1;
    }
}
