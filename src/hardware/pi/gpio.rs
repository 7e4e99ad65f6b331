//! Relay and interlock outputs: two GPIO pins toggled together, idempotent.

use rppal::gpio::{Gpio, OutputPin};

pub struct RelayInterlock {
    relay: OutputPin,
    interlock: OutputPin,
    on: bool,
}

impl RelayInterlock {
    pub fn open(relay_pin: u8, interlock_pin: u8) -> Result<Self, String> {
        let gpio = Gpio::new().map_err(|e| format!("gpio init: {e:?}"))?;
        let mut relay = gpio
            .get(relay_pin)
            .map_err(|e| format!("relay pin {relay_pin}: {e:?}"))?
            .into_output();
        let mut interlock = gpio
            .get(interlock_pin)
            .map_err(|e| format!("interlock pin {interlock_pin}: {e:?}"))?
            .into_output();
        relay.set_low();
        interlock.set_low();
        Ok(Self {
            relay,
            interlock,
            on: false,
        })
    }

    pub fn set(&mut self, on: bool) {
        if self.on == on {
            return;
        }
        self.on = on;
        if on {
            self.relay.set_high();
            self.interlock.set_high();
        } else {
            self.relay.set_low();
            self.interlock.set_low();
        }
    }
}
