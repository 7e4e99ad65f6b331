//! Session State Machine (C5): the eleven-state machine governing equipment
//! power, server-side logging, and display requests (`SPEC_FULL.md` S4.5).
//!
//! `RunningUnknownCard`/`RunningUnauthCard` appear in
//! `original_source/Firmware/PortalFSM.py` as standalone state classes, but
//! per the expansion's resolution (`SPEC_FULL.md` S4.5, "Internal
//! transitional states") the corrected behavior folds `RunningUnknownCard`'s
//! card-evaluation into the `RunningNoCard` handler itself -- it never
//! becomes an independently observable tick-boundary state, which is also
//! what makes the state-bounce guard hold by construction: a card that
//! doesn't qualify for any exit simply leaves the dispatcher returning
//! `None`, so there is no `RunningNoCard -> RunningNoCard` transition event
//! to bounce through in the first place. `RunningUnauthCard` is the
//! superseded draft path and is not implemented at all.

use std::time::{Duration, Instant};

use log::info;

use crate::api::AuthClient;
use crate::config::{resolve_color, DisplayConfig};
use crate::display::DisplayCoordinator;
use crate::domain::{CardType, EquipmentProfile, InputFrame, SessionContext};
use crate::hardware::{BeepKind, HardwareFacade};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    IdleNoCard,
    IdleUnknownCard,
    IdleUnauthCard,
    RunningAuthUser,
    RunningProxyCard,
    RunningTrainingCard,
    RunningNoCard,
    RunningTimeout,
    IdleAuthCard,
    AccessComplete,
    Shutdown,
}

impl State {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::IdleNoCard => "IdleNoCard",
            Self::IdleUnknownCard => "IdleUnknownCard",
            Self::IdleUnauthCard => "IdleUnauthCard",
            Self::RunningAuthUser => "RunningAuthUser",
            Self::RunningProxyCard => "RunningProxyCard",
            Self::RunningTrainingCard => "RunningTrainingCard",
            Self::RunningNoCard => "RunningNoCard",
            Self::RunningTimeout => "RunningTimeout",
            Self::IdleAuthCard => "IdleAuthCard",
            Self::AccessComplete => "AccessComplete",
            Self::Shutdown => "Shutdown",
        }
    }

    /// Invariant (`SPEC_FULL.md` S3): equipment power is on in exactly these
    /// three states. Enforced centrally by `Session::tick` rather than
    /// trusted to each handler, so a missed `set_relay(false)` in some
    /// future state can never leave the equipment energized.
    #[must_use]
    pub fn powers_equipment(self) -> bool {
        matches!(
            self,
            Self::RunningAuthUser | Self::RunningProxyCard | Self::RunningTrainingCard
        )
    }

    #[must_use]
    pub fn is_grace(self) -> bool {
        matches!(self, Self::RunningNoCard | Self::RunningTimeout)
    }
}

/// Borrowed bundle of every external collaborator a state's `on_enter`/
/// dispatch logic might touch, threaded through instead of storing live
/// references on `Session` itself (S9, "State objects as data").
pub struct Collaborators<'a> {
    pub hw: &'a mut dyn HardwareFacade,
    pub display: &'a mut DisplayCoordinator,
    pub auth: &'a AuthClient,
    pub palette: &'a DisplayConfig,
    pub profile: &'a EquipmentProfile,
}

pub struct Session {
    state: State,
    grace_start: Instant,
    grace_duration: Duration,
    timeout_start: Instant,
    /// `None` means the equipment type's timeout is infinite (0 minutes).
    timeout_duration: Option<Duration>,
}

impl Session {
    #[must_use]
    pub fn new(profile: &EquipmentProfile, grace_period: Duration) -> Self {
        let now = Instant::now();
        Self {
            state: State::IdleNoCard,
            grace_start: now,
            grace_duration: grace_period,
            timeout_start: now,
            timeout_duration: if profile.timeout_minutes == 0 {
                None
            } else {
                Some(Duration::from_secs(u64::from(profile.timeout_minutes) * 60))
            },
        }
    }

    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    #[must_use]
    pub fn is_grace(&self) -> bool {
        self.state.is_grace()
    }

    fn grace_expired(&self) -> bool {
        Instant::now().duration_since(self.grace_start) >= self.grace_duration
    }

    /// Seconds remaining in the current grace window, for the display's
    /// progress bar; 0 once expired or when not in a grace state.
    #[must_use]
    pub fn grace_remaining_secs(&self) -> u64 {
        if !self.is_grace() {
            return 0;
        }
        self.grace_duration
            .saturating_sub(Instant::now().duration_since(self.grace_start))
            .as_secs()
    }

    fn timeout_expired(&self) -> bool {
        match self.timeout_duration {
            None => false,
            Some(limit) => Instant::now().duration_since(self.timeout_start) >= limit,
        }
    }

    /// Advances the FSM by one tick. Runs the current state's transition
    /// rule against `frame`; if it yields a next state, records history,
    /// runs the new state's `on_enter` side effects, and re-asserts the
    /// power invariant unconditionally.
    pub fn tick(&mut self, ctx: &mut SessionContext, frame: &InputFrame, c: &mut Collaborators) {
        if let Some(next) = self.transition(ctx, frame) {
            if next != self.state {
                ctx.last_state_name = self.state.name().to_string();
                info!("session: {} -> {}", self.state.name(), next.name());
                self.enter(next, ctx, frame, c);
                self.state = next;
            }
        }
        c.hw.set_relay(self.state.powers_equipment());
    }

    fn transition(&self, ctx: &SessionContext, frame: &InputFrame) -> Option<State> {
        match self.state {
            State::IdleNoCard => frame.has_card().then_some(State::IdleUnknownCard),

            State::IdleUnknownCard => Some(match frame.card_type {
                CardType::Shutdown => State::Shutdown,
                _ if frame.user_is_authorized => match frame.card_type {
                    CardType::Proxy => State::RunningProxyCard,
                    _ => State::RunningAuthUser,
                },
                _ => State::IdleUnauthCard,
            }),

            State::IdleUnauthCard => (!frame.has_card()).then_some(State::IdleNoCard),

            State::RunningAuthUser | State::RunningProxyCard | State::RunningTrainingCard => {
                if !frame.has_card() {
                    Some(State::RunningNoCard)
                } else if self.timeout_expired() {
                    Some(State::RunningTimeout)
                } else {
                    None
                }
            }

            State::RunningNoCard => {
                // Tie-break: grace expiry and button edge both lead here, so
                // order between them is immaterial; card removal/timers
                // never outrank an arriving card below.
                if self.grace_expired() || frame.button_pressed {
                    return Some(State::AccessComplete);
                }
                if frame.has_card() && frame.card_type != CardType::Invalid {
                    return Some(running_no_card_card_rule(ctx, frame));
                }
                None
            }

            State::RunningTimeout => {
                if frame.button_pressed {
                    Some(State::RunningNoCard)
                } else if !frame.has_card() {
                    Some(State::AccessComplete)
                } else if self.grace_expired() {
                    Some(State::IdleAuthCard)
                } else {
                    None
                }
            }

            State::IdleAuthCard => (!frame.has_card()).then_some(State::IdleNoCard),

            State::AccessComplete => Some(if frame.has_card() {
                State::IdleUnknownCard
            } else {
                State::IdleNoCard
            }),

            State::Shutdown => None,
        }
    }

    fn enter(&mut self, next: State, ctx: &mut SessionContext, frame: &InputFrame, c: &mut Collaborators) {
        match next {
            State::IdleNoCard => {
                c.hw.beep_stop();
                c.display.two_line(c.hw, "Present Card", "to Begin", resolve_color(c.palette, "sleep_color"));
            }

            State::IdleUnknownCard => {
                c.display.message(c.hw, "Processing Card...", resolve_color(c.palette, "process_color"));
            }

            State::IdleUnauthCard => {
                c.hw.beep(BeepKind::Error);
                c.auth.log_access_attempt(frame.card_id, c.profile.equipment_id, false);
                c.display.message(c.hw, "Unauthorized", resolve_color(c.palette, "unauth_color"));
            }

            State::RunningAuthUser => {
                c.hw.beep_stop();
                self.timeout_start = Instant::now();
                ctx.proxy_id = 0;
                ctx.training_id = 0;
                c.hw.beep(BeepKind::Success);
                if ctx.auth_user_id != frame.card_id {
                    c.auth.log_access_attempt(frame.card_id, c.profile.equipment_id, true);
                    ctx.auth_user_id = frame.card_id;
                    ctx.user_authority_level = frame.user_authority_level;
                    c.display.welcome(c.hw, c.auth, frame.card_id, resolve_color(c.palette, "auth_color"));
                }
            }

            State::RunningProxyCard => {
                c.hw.beep_stop();
                self.timeout_start = Instant::now();
                ctx.training_id = 0;
                if ctx.proxy_id != frame.card_id {
                    c.auth.log_access_attempt(frame.card_id, c.profile.equipment_id, true);
                }
                ctx.proxy_id = frame.card_id;
                c.hw.beep(BeepKind::Success);
                c.display.two_line(c.hw, "Proxy Access", "Machine On", resolve_color(c.palette, "proxy_color"));
            }

            State::RunningTrainingCard => {
                c.hw.beep_stop();
                self.timeout_start = Instant::now();
                ctx.proxy_id = 0;
                if ctx.training_id != frame.card_id {
                    c.auth.log_access_attempt(frame.card_id, c.profile.equipment_id, true);
                }
                ctx.training_id = frame.card_id;
                c.hw.beep(BeepKind::Success);
                c.display.two_line(c.hw, "Training Mode", "Machine On", resolve_color(c.palette, "training_color"));
            }

            State::RunningNoCard => {
                self.grace_start = Instant::now();
                c.display.grace_timer_start(self.grace_duration.as_secs());
                c.display.two_line(c.hw, "Grace Period", "Insert Card", resolve_color(c.palette, "no_card_grace_color"));
                c.hw.beep_start(500.0, 200, 3);
            }

            State::RunningTimeout => {
                self.grace_start = Instant::now();
                c.display.two_line(c.hw, "Time Expired!", "Remove Card", resolve_color(c.palette, "timeout_color"));
                c.hw.beep(BeepKind::Warning);
            }

            State::IdleAuthCard => {
                c.hw.beep_stop();
                c.auth.log_access_completion(ctx.auth_user_id, c.profile.equipment_id);
                c.display.two_line(c.hw, "Session Ended", "Remove Card", resolve_color(c.palette, "grace_timeout_color"));
                ctx.clear_session();
            }

            State::AccessComplete => {
                c.hw.beep_stop();
                c.auth.log_access_completion(ctx.auth_user_id, c.profile.equipment_id);
                c.display.message(c.hw, "Session Complete", resolve_color(c.palette, "sleep_color"));
                ctx.clear_session();
            }

            State::Shutdown => {
                c.hw.beep_stop();
                c.auth.log_shutdown_status(c.profile.equipment_id, frame.card_id.max(0));
                c.display.message(c.hw, "Shutting Down...", resolve_color(c.palette, "unauth_color"));
            }
        }
    }
}

/// S4.5 "Training transition rule" and "Proxy transition rule", evaluated
/// while resident in `RunningNoCard`.
fn running_no_card_card_rule(ctx: &SessionContext, frame: &InputFrame) -> State {
    if frame.card_id == ctx.auth_user_id {
        return State::RunningAuthUser;
    }
    if frame.card_type == CardType::User
        && ctx.user_authority_level >= 3
        && ctx.proxy_id <= 0
        && (ctx.training_id <= 0 || ctx.training_id == frame.card_id)
        && !frame.user_is_authorized
    {
        return State::RunningTrainingCard;
    }
    if frame.card_type == CardType::Proxy && ctx.training_id <= 0 && ctx.allow_proxy {
        return State::RunningProxyCard;
    }
    State::RunningNoCard
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DbConfig;
    use crate::hardware::mock::MockHardware;

    fn profile(timeout_minutes: u32, allow_proxy: bool) -> EquipmentProfile {
        EquipmentProfile {
            equipment_id: 1,
            type_id: 1,
            type_name: "Laser Cutter".to_string(),
            location_id: 1,
            location_name: "Shop".to_string(),
            timeout_minutes,
            allow_proxy,
            requires_training: false,
            requires_payment: false,
        }
    }

    fn harness() -> (MockHardware, AuthClient, DisplayCoordinator, DisplayConfig) {
        (
            MockHardware::new(),
            AuthClient::new(&DbConfig::default()),
            DisplayCoordinator::new(),
            DisplayConfig::default(),
        )
    }

    fn authorized_user_frame(card_id: i64) -> InputFrame {
        InputFrame {
            card_id,
            card_type: CardType::User,
            user_is_authorized: true,
            user_authority_level: 1,
            button_pressed: false,
            card_removal: false,
            pin: Some("1234".to_string()),
        }
    }

    #[test]
    fn happy_path_powers_equipment_and_logs_once() {
        let profile = profile(0, false);
        let mut session = Session::new(&profile, Duration::from_secs(10));
        let mut ctx = SessionContext::new(profile.allow_proxy);
        let (mut hw, auth, mut display, palette) = harness();

        let frame = authorized_user_frame(0xA1);
        let mut c = Collaborators {
            hw: &mut hw,
            display: &mut display,
            auth: &auth,
            palette: &palette,
            profile: &profile,
        };
        session.tick(&mut ctx, &frame, &mut c); // IdleNoCard -> IdleUnknownCard
        assert_eq!(session.state(), State::IdleUnknownCard);
        session.tick(&mut ctx, &frame, &mut c); // -> RunningAuthUser
        assert_eq!(session.state(), State::RunningAuthUser);
        assert!(hw.relay_is_on());
        assert_eq!(ctx.auth_user_id, 0xA1);
    }

    #[test]
    fn unauthorized_card_never_powers_equipment() {
        let profile = profile(0, false);
        let mut session = Session::new(&profile, Duration::from_secs(10));
        let mut ctx = SessionContext::new(profile.allow_proxy);
        let (mut hw, auth, mut display, palette) = harness();

        let mut frame = authorized_user_frame(0xB2);
        frame.user_is_authorized = false;
        let mut c = Collaborators {
            hw: &mut hw,
            display: &mut display,
            auth: &auth,
            palette: &palette,
            profile: &profile,
        };
        session.tick(&mut ctx, &frame, &mut c);
        session.tick(&mut ctx, &frame, &mut c);
        assert_eq!(session.state(), State::IdleUnauthCard);
        assert!(!hw.relay_is_on());

        frame.card_id = -1;
        frame.card_type = CardType::Invalid;
        session.tick(&mut ctx, &frame, &mut c);
        assert_eq!(session.state(), State::IdleNoCard);
    }

    #[test]
    fn grace_then_same_card_returns_to_running() {
        let profile = profile(0, false);
        let mut session = Session::new(&profile, Duration::from_secs(10));
        let mut ctx = SessionContext::new(profile.allow_proxy);
        let (mut hw, auth, mut display, palette) = harness();
        let mut c = Collaborators {
            hw: &mut hw,
            display: &mut display,
            auth: &auth,
            palette: &palette,
            profile: &profile,
        };

        let frame = authorized_user_frame(0xA1);
        session.tick(&mut ctx, &frame, &mut c);
        session.tick(&mut ctx, &frame, &mut c);
        assert_eq!(session.state(), State::RunningAuthUser);

        let mut removed = frame.clone();
        removed.card_id = -1;
        removed.card_type = CardType::Invalid;
        removed.user_is_authorized = false;
        removed.card_removal = true;
        session.tick(&mut ctx, &removed, &mut c);
        assert_eq!(session.state(), State::RunningNoCard);
        assert!(!hw.relay_is_on());

        session.tick(&mut ctx, &frame, &mut c);
        assert_eq!(session.state(), State::RunningAuthUser);
        assert!(hw.relay_is_on());
    }

    #[test]
    fn training_transfer_requires_admin_history_and_unauthorized_trainee() {
        let profile = profile(0, false);
        let mut session = Session::new(&profile, Duration::from_secs(10));
        let mut ctx = SessionContext::new(profile.allow_proxy);
        let (mut hw, auth, mut display, palette) = harness();
        let mut c = Collaborators {
            hw: &mut hw,
            display: &mut display,
            auth: &auth,
            palette: &palette,
            profile: &profile,
        };

        let mut admin_frame = authorized_user_frame(0xADM);
        admin_frame.user_authority_level = 3;
        session.tick(&mut ctx, &admin_frame, &mut c);
        session.tick(&mut ctx, &admin_frame, &mut c);
        assert_eq!(session.state(), State::RunningAuthUser);
        assert_eq!(ctx.user_authority_level, 3);

        let mut removed = admin_frame.clone();
        removed.card_id = -1;
        removed.card_type = CardType::Invalid;
        removed.user_is_authorized = false;
        session.tick(&mut ctx, &removed, &mut c);
        assert_eq!(session.state(), State::RunningNoCard);

        let mut trainee = authorized_user_frame(0x7E41);
        trainee.user_is_authorized = false;
        session.tick(&mut ctx, &trainee, &mut c);
        assert_eq!(session.state(), State::RunningTrainingCard);
        assert_eq!(ctx.training_id, 0x7E41);
        assert!(hw.relay_is_on());
    }

    #[test]
    fn disallowed_proxy_card_stays_in_grace_instead_of_bouncing() {
        let profile = profile(0, false); // allow_proxy = false
        let mut session = Session::new(&profile, Duration::from_secs(10));
        let mut ctx = SessionContext::new(profile.allow_proxy);
        let (mut hw, auth, mut display, palette) = harness();
        let mut c = Collaborators {
            hw: &mut hw,
            display: &mut display,
            auth: &auth,
            palette: &palette,
            profile: &profile,
        };

        let frame = authorized_user_frame(0xA1);
        session.tick(&mut ctx, &frame, &mut c);
        session.tick(&mut ctx, &frame, &mut c);
        let mut removed = frame.clone();
        removed.card_id = -1;
        removed.card_type = CardType::Invalid;
        removed.user_is_authorized = false;
        session.tick(&mut ctx, &removed, &mut c);
        assert_eq!(session.state(), State::RunningNoCard);

        let mut proxy_frame = authorized_user_frame(0xC3);
        proxy_frame.card_type = CardType::Proxy;
        proxy_frame.user_is_authorized = true;
        session.tick(&mut ctx, &proxy_frame, &mut c);
        // allow_proxy is false for this equipment -- the card is ignored and
        // the session stays in the grace window rather than bouncing
        // through an unauthorized-card path (S4.5 "Proxy transition rule").
        assert_eq!(session.state(), State::RunningNoCard);
        assert!(!hw.relay_is_on());
    }

    #[test]
    fn disqualified_card_left_in_reader_does_not_reset_the_grace_clock() {
        let profile = profile(0, false); // allow_proxy = false
        let mut session = Session::new(&profile, Duration::from_millis(80));
        let mut ctx = SessionContext::new(profile.allow_proxy);
        let (mut hw, auth, mut display, palette) = harness();
        let mut c = Collaborators {
            hw: &mut hw,
            display: &mut display,
            auth: &auth,
            palette: &palette,
            profile: &profile,
        };

        let frame = authorized_user_frame(0xA1);
        session.tick(&mut ctx, &frame, &mut c);
        session.tick(&mut ctx, &frame, &mut c);
        let mut removed = frame.clone();
        removed.card_id = -1;
        removed.card_type = CardType::Invalid;
        removed.user_is_authorized = false;
        session.tick(&mut ctx, &removed, &mut c);
        assert_eq!(session.state(), State::RunningNoCard);

        // An unauthorized, non-qualifying card sits in the reader across
        // several ticks. Each tick re-evaluates the no-op rule, but it must
        // not restart the grace timer -- only a real state change may do
        // that (S4.5 "stay in RunningNoCard and continue the grace
        // countdown", S8 "grace monotonicity").
        let mut disqualified = frame.clone();
        disqualified.card_id = 0xC3;
        disqualified.card_type = CardType::User;
        disqualified.user_is_authorized = false;
        disqualified.user_authority_level = 1;
        for _ in 0..3 {
            session.tick(&mut ctx, &disqualified, &mut c);
            assert_eq!(session.state(), State::RunningNoCard);
        }

        std::thread::sleep(Duration::from_millis(90));
        session.tick(&mut ctx, &disqualified, &mut c);
        assert_eq!(
            session.state(),
            State::AccessComplete,
            "grace should have expired instead of being restarted by the resident disqualified card"
        );
    }

    #[test]
    fn shutdown_card_forces_power_off_and_is_terminal() {
        let profile = profile(0, false);
        let mut session = Session::new(&profile, Duration::from_secs(10));
        let mut ctx = SessionContext::new(profile.allow_proxy);
        let (mut hw, auth, mut display, palette) = harness();
        let mut c = Collaborators {
            hw: &mut hw,
            display: &mut display,
            auth: &auth,
            palette: &palette,
            profile: &profile,
        };

        let mut frame = authorized_user_frame(0x99);
        frame.card_type = CardType::Shutdown;
        frame.user_is_authorized = false;
        session.tick(&mut ctx, &frame, &mut c);
        session.tick(&mut ctx, &frame, &mut c);
        assert_eq!(session.state(), State::Shutdown);
        assert!(!hw.relay_is_on());
        session.tick(&mut ctx, &frame, &mut c);
        assert_eq!(session.state(), State::Shutdown);
    }

    #[test]
    fn grace_expiry_without_card_reaches_access_complete_and_logs_once() {
        let profile = profile(0, false);
        let mut session = Session::new(&profile, Duration::from_millis(30));
        let mut ctx = SessionContext::new(profile.allow_proxy);
        let (mut hw, auth, mut display, palette) = harness();
        let mut c = Collaborators {
            hw: &mut hw,
            display: &mut display,
            auth: &auth,
            palette: &palette,
            profile: &profile,
        };

        let frame = authorized_user_frame(0xA1);
        session.tick(&mut ctx, &frame, &mut c);
        session.tick(&mut ctx, &frame, &mut c);
        assert_eq!(session.state(), State::RunningAuthUser);

        let mut removed = frame.clone();
        removed.card_id = -1;
        removed.card_type = CardType::Invalid;
        removed.user_is_authorized = false;
        removed.card_removal = true;
        session.tick(&mut ctx, &removed, &mut c);
        assert_eq!(session.state(), State::RunningNoCard);

        std::thread::sleep(Duration::from_millis(40));
        session.tick(&mut ctx, &removed, &mut c);
        assert_eq!(session.state(), State::AccessComplete);
        assert!(!hw.relay_is_on());
        assert_eq!(ctx.auth_user_id, 0); // cleared on entry to AccessComplete

        session.tick(&mut ctx, &removed, &mut c);
        assert_eq!(session.state(), State::IdleNoCard);
    }

    #[test]
    fn grace_timer_is_non_increasing_while_card_absent() {
        let profile = profile(0, false);
        let mut session = Session::new(&profile, Duration::from_millis(200));
        let mut ctx = SessionContext::new(profile.allow_proxy);
        let (mut hw, auth, mut display, palette) = harness();
        let mut c = Collaborators {
            hw: &mut hw,
            display: &mut display,
            auth: &auth,
            palette: &palette,
            profile: &profile,
        };

        let frame = authorized_user_frame(0xA1);
        session.tick(&mut ctx, &frame, &mut c);
        session.tick(&mut ctx, &frame, &mut c);
        let mut removed = frame.clone();
        removed.card_id = -1;
        removed.card_type = CardType::Invalid;
        removed.user_is_authorized = false;
        session.tick(&mut ctx, &removed, &mut c);

        let first = session.grace_remaining_secs();
        std::thread::sleep(Duration::from_millis(50));
        let second = session.grace_remaining_secs();
        assert!(second <= first);
    }
}
