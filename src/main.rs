//! Bootstrap & Config (C7) and the main coordination loop (`SPEC_FULL.md`
//! S2, S5): load configuration, bring up the hardware facade, register with
//! the registry, fetch this appliance's equipment profile, then run the
//! ~100ms tick loop handing input frames to either a Special Mode or the
//! Session State Machine.

use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use log::{info, warn};

use portal_box_lib::api::AuthClient;
use portal_box_lib::config::Config;
use portal_box_lib::display::DisplayCoordinator;
use portal_box_lib::hardware::HardwareFacade;
use portal_box_lib::input_fuser::{InputFuser, ModeRequest};
use portal_box_lib::modes::{run_card_reader_mode, run_certification_mode, ModeCollaborators};
use portal_box_lib::session::{Collaborators, Session, State};

const TICK: Duration = Duration::from_millis(100);

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    portal_box_lib::logging::init();

    let config = match Config::load(None) {
        Ok(config) => config,
        Err(e) => {
            log::error!("failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut hw = match open_hardware(&config) {
        Ok(hw) => hw,
        Err(e) => {
            log::error!("failed to initialize hardware: {e}");
            return ExitCode::FAILURE;
        }
    };

    let auth = AuthClient::new(&config.db);
    let mac = hw.mac_hex();

    info!("registering appliance {mac}");
    if auth.is_registered(&mac) == 0 {
        auth.register(&mac);
    }

    info!("fetching equipment profile for {mac}");
    let profile = auth.get_equipment_profile(&mac);
    info!("equipment profile: {} ({})", profile.type_name, profile.equipment_id);

    auth.record_ip(profile.equipment_id, &hw.ip_dotted());
    auth.log_started_status(profile.equipment_id);

    let mut display = DisplayCoordinator::new();
    let mut ctx = portal_box_lib::domain::SessionContext::new(profile.allow_proxy);
    let mut session = Session::new(&profile, Duration::from_secs(config.user_exp.grace_period));
    let mut fuser = InputFuser::new();

    hw.beep(portal_box_lib::hardware::BeepKind::Success);
    info!("entering main loop");

    loop {
        let (frame, mode) = fuser.poll(
            &mut *hw,
            &auth,
            &mut display,
            &config.display,
            profile.type_id,
            session.state().name(),
            session.is_grace(),
        );

        match mode {
            ModeRequest::CardReader => {
                let mut mc = ModeCollaborators {
                    hw: &mut *hw,
                    display: &mut display,
                    auth: &auth,
                    palette: &config.display,
                    fuser: &mut fuser,
                };
                run_card_reader_mode(&mut mc, profile.type_id);
                continue;
            }
            ModeRequest::Certification => {
                let mut mc = ModeCollaborators {
                    hw: &mut *hw,
                    display: &mut display,
                    auth: &auth,
                    palette: &config.display,
                    fuser: &mut fuser,
                };
                run_certification_mode(&mut mc, profile.type_id);
                continue;
            }
            ModeRequest::None => {}
        }

        let prev_state = session.state();
        let mut collaborators = Collaborators {
            hw: &mut *hw,
            display: &mut display,
            auth: &auth,
            palette: &config.display,
            profile: &profile,
        };
        session.tick(&mut ctx, &frame, &mut collaborators);

        // Forced re-verification (SPEC_FULL.md S4.5): a transition into or
        // out of AccessComplete re-arms PIN verification so a card left
        // resident in the reader across session end gets a fresh prompt
        // instead of riding the stale last-verified-card match.
        if prev_state != session.state()
            && (prev_state == State::AccessComplete || session.state() == State::AccessComplete)
        {
            fuser.forget_verified_card();
        }

        if session.is_grace() {
            display.grace_timer_update(&mut *hw, portal_box_lib::config::resolve_color(&config.display, "no_card_grace_color"));
        }

        if session.state() == State::Shutdown {
            warn!("shutdown card processed, exiting");
            hw.set_relay(false);
            return ExitCode::SUCCESS;
        }

        hw.tick();
        thread::sleep(TICK);
    }
}

#[cfg(all(
    any(target_arch = "aarch64", target_arch = "arm"),
    target_os = "linux",
    feature = "hardware",
    not(feature = "mock_hardware")
))]
fn open_hardware(config: &Config) -> Result<Box<dyn HardwareFacade>, String> {
    portal_box_lib::hardware::pi::PiHardware::open(config).map(|hw| Box::new(hw) as Box<dyn HardwareFacade>)
}

#[cfg(not(all(
    any(target_arch = "aarch64", target_arch = "arm"),
    target_os = "linux",
    feature = "hardware",
    not(feature = "mock_hardware")
)))]
fn open_hardware(_config: &Config) -> Result<Box<dyn HardwareFacade>, String> {
    Ok(Box::new(portal_box_lib::hardware::mock::MockHardware::new()))
}
