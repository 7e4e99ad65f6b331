//! Real-hardware `HardwareFacade` implementation, composing the individual
//! peripheral drivers below. Mirrors the selection pattern the teacher uses
//! for `rfid::PlatformRfidReader`, generalized across the whole peripheral
//! set. Only compiled on Linux ARM targets with the `hardware` feature.

mod buzzer;
mod gpio;
mod keypad;
mod lcd;
mod leds;
mod rfid;

use std::collections::HashSet;
use std::time::{Duration, Instant};

use log::{error, warn};

use crate::config::{Config, Rgb};
use crate::hardware::{BeepKind, HardwareFacade, Key};

const BUTTON_DEBOUNCE: Duration = Duration::from_millis(25);

pub struct PiHardware {
    rfid: rfid::RfidReader,
    lcd: lcd::SerialLcd,
    leds: leds::DotstarStrip,
    buzzer: buzzer::Buzzer,
    keypad: keypad::Keypad,
    relay: gpio::RelayInterlock,

    last_line1: String,
    last_line2: String,
    last_color: Rgb,

    last_meta_seen: Option<(Key, Instant)>,
    last_edge_reported: Option<Key>,

    rainbow_phase: u8,
    mac: String,
    ip: String,
}

impl PiHardware {
    pub fn open(config: &Config) -> Result<Self, String> {
        let pins = &config.pins;
        let rfid = rfid::RfidReader::open("/dev/spidev0.0", pins.rfid_sda.0)?;
        let lcd = lcd::SerialLcd::open(pins.lcd_tx.0)?;
        let leds = leds::DotstarStrip::open("/dev/spidev0.1")?;
        let buzzer = if config.toggles.buzzer_pwm.0 {
            buzzer::Buzzer::open_pwm(rppal::pwm::Channel::Pwm0)?
        } else {
            buzzer::Buzzer::open_gpio(pins.buzzer_pin.0)?
        };
        let keypad = keypad::Keypad::open(
            [
                pins.keypad_2.0,
                pins.keypad_3.0,
                pins.keypad_4.0,
                pins.keypad_5.0,
            ],
            [pins.keypad_1.0, pins.keypad_6.0, pins.keypad_7.0],
        )?;
        let relay = gpio::RelayInterlock::open(pins.relay_pin.0, pins.interlock_pin.0)?;

        Ok(Self {
            rfid,
            lcd,
            leds,
            buzzer,
            keypad,
            relay,
            last_line1: String::new(),
            last_line2: String::new(),
            last_color: Rgb(0, 0, 0),
            last_meta_seen: None,
            last_edge_reported: None,
            rainbow_phase: 0,
            mac: read_mac_address(),
            ip: read_ip_address(),
        })
    }
}

impl HardwareFacade for PiHardware {
    fn read_card(&mut self) -> i64 {
        self.rfid.read_card()
    }

    fn keypad_scan(&mut self) -> HashSet<Key> {
        self.keypad.scan()
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
        self.relay.set(on);
    }

    fn lcd_write(&mut self, line1: &str, line2: &str, backlight: Rgb) {
        if self.last_line1 == line1 && self.last_line2 == line2 && self.last_color == backlight {
            return;
        }
        self.lcd.two_line(line1, line2, (backlight.0, backlight.1, backlight.2));
        self.last_line1 = line1.to_string();
        self.last_line2 = line2.to_string();
        self.last_color = backlight;
    }

    fn leds_fill(&mut self, rgb: Rgb) {
        self.leds.fill(rgb);
        self.leds.show();
    }

    fn leds_rainbow(&mut self) {
        self.rainbow_phase = self.rainbow_phase.wrapping_add(4);
        self.leds.rainbow_step(self.rainbow_phase);
    }

    fn beep(&mut self, kind: BeepKind) {
        self.buzzer.beep(kind);
    }

    fn beep_start(&mut self, _freq_hz: f32, duration_ms: u32, count: u32) {
        let duration_ticks = (duration_ms / 100).max(1);
        self.buzzer.beep_start(duration_ticks, count);
    }

    fn beep_stop(&mut self) {
        self.buzzer.beep_stop();
    }

    fn tick(&mut self) {
        self.buzzer.tick();
    }

    fn mac_hex(&self) -> String {
        self.mac.clone()
    }

    fn ip_dotted(&self) -> String {
        self.ip.clone()
    }
}

fn read_mac_address() -> String {
    for iface in ["eth0", "wlan0"] {
        let path = format!("/sys/class/net/{iface}/address");
        if let Ok(contents) = std::fs::read_to_string(&path) {
            return contents.trim().replace(':', "");
        }
    }
    warn!("could not read a MAC address from /sys/class/net; falling back to a zero address");
    "000000000000".to_string()
}

fn read_ip_address() -> String {
    match std::net::UdpSocket::bind("0.0.0.0:0").and_then(|socket| {
        socket.connect("8.8.8.8:80")?;
        socket.local_addr()
    }) {
        Ok(addr) => addr.ip().to_string(),
        Err(e) => {
            error!("could not determine local IP address: {e}");
            "0.0.0.0".to_string()
        }
    }
}
