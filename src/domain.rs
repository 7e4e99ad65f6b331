//! Core value types shared by the session state machine, the input fuser,
//! and the authorization client. See `SPEC_FULL.md` section 3.

use serde::{Deserialize, Serialize};

/// Equipment this appliance gates. Created once at bootstrap, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EquipmentProfile {
    pub equipment_id: u32,
    pub type_id: u32,
    pub type_name: String,
    pub location_id: u32,
    pub location_name: String,
    /// 0 means infinite (no inactivity timeout).
    pub timeout_minutes: u32,
    pub allow_proxy: bool,
    pub requires_training: bool,
    pub requires_payment: bool,
}

/// Card category as reported by the registry. `Invalid` stands both for "no
/// card" and "unknown card id" -- callers distinguish the two by the
/// accompanying card id (-1 for no card).
///
/// Wire values match `AxelsPlayground/Firmware/Database.py`'s `CardType`:
/// `-1` invalid, `1` shutdown, `2` proxy, `3` training, `4` user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardType {
    Invalid,
    Shutdown,
    Proxy,
    Training,
    User,
}

impl CardType {
    #[must_use]
    pub fn from_wire(value: i64) -> Self {
        match value {
            1 => Self::Shutdown,
            2 => Self::Proxy,
            3 => Self::Training,
            4 => Self::User,
            _ => Self::Invalid,
        }
    }
}

/// Server-derived details for a card, fetched once per read via
/// `AuthClient::get_card_details` and cached until the card changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardDetails {
    pub card_type: CardType,
    /// 1 = user, 2 = trainer, 3+ = admin.
    pub user_authority_level: u8,
    /// Computed server-side from requires_training x requires_payment x
    /// user_auth x balance x user_active (see `SPEC_FULL.md` S4.2).
    pub user_is_authorized: bool,
    /// Four-digit PIN, absent if the card has none assigned.
    pub pin: Option<String>,
}

impl CardDetails {
    #[must_use]
    pub fn unknown() -> Self {
        Self {
            card_type: CardType::Invalid,
            user_authority_level: 0,
            user_is_authorized: false,
            pin: None,
        }
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.user_authority_level >= 3
    }
}

/// Snapshot of all inputs observed during one tick, rebuilt from scratch
/// every iteration of the main loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFrame {
    /// -1 when no card is present.
    pub card_id: i64,
    pub card_type: CardType,
    pub user_is_authorized: bool,
    pub user_authority_level: u8,
    /// True exactly once, on the tick a meta-key edge is observed.
    pub button_pressed: bool,
    /// True when the previous frame had a card present and this one does not.
    pub card_removal: bool,
    pub pin: Option<String>,
}

impl InputFrame {
    #[must_use]
    pub fn no_card() -> Self {
        Self {
            card_id: -1,
            card_type: CardType::Invalid,
            user_is_authorized: false,
            user_authority_level: 0,
            button_pressed: false,
            card_removal: false,
            pin: None,
        }
    }

    #[must_use]
    pub fn has_card(&self) -> bool {
        self.card_id > 0
    }
}

/// Process-wide session history. Only ever mutated by state-entry code
/// running on the main loop -- no locking is required (see `SPEC_FULL.md`
/// S5, shared-resource policy).
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    pub auth_user_id: i64,
    pub proxy_id: i64,
    pub training_id: i64,
    pub user_authority_level: u8,
    pub allow_proxy: bool,
    pub last_state_name: String,
}

impl SessionContext {
    #[must_use]
    pub fn new(allow_proxy: bool) -> Self {
        Self {
            auth_user_id: 0,
            proxy_id: 0,
            training_id: 0,
            user_authority_level: 0,
            allow_proxy,
            last_state_name: String::new(),
        }
    }

    /// Entry to AccessComplete / IdleAuthCard clears the active session.
    pub fn clear_session(&mut self) {
        self.auth_user_id = 0;
        self.proxy_id = 0;
        self.training_id = 0;
        self.user_authority_level = 0;
    }
}

/// Reproduces the server-side authorization formula client-side so the FSM
/// never has to trust an opaque boolean alone for invariants/testing: see
/// `SPEC_FULL.md` S4.2 and `AxelsPlayground/Firmware/Database.py`'s
/// `is_user_authorized_for_equipment_type`.
#[must_use]
pub fn is_authorized(
    active: bool,
    requires_training: bool,
    requires_payment: bool,
    user_auth: bool,
    balance_positive: bool,
) -> bool {
    if !active {
        return false;
    }
    (requires_training && requires_payment && user_auth && balance_positive)
        || (requires_training && !requires_payment && user_auth)
        || (!requires_training && requires_payment && balance_positive)
        || (!requires_training && !requires_payment)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn card_type_wire_roundtrip() {
        assert_eq!(CardType::from_wire(1), CardType::Shutdown);
        assert_eq!(CardType::from_wire(2), CardType::Proxy);
        assert_eq!(CardType::from_wire(3), CardType::Training);
        assert_eq!(CardType::from_wire(4), CardType::User);
        assert_eq!(CardType::from_wire(-1), CardType::Invalid);
        assert_eq!(CardType::from_wire(99), CardType::Invalid);
    }

    #[test]
    fn authorization_formula_matches_all_four_branches() {
        // requires_training && requires_payment: needs user_auth && balance
        assert!(is_authorized(true, true, true, true, true));
        assert!(!is_authorized(true, true, true, true, false));
        assert!(!is_authorized(true, true, true, false, true));

        // requires_training && !requires_payment: needs user_auth only
        assert!(is_authorized(true, true, false, true, false));
        assert!(!is_authorized(true, true, false, false, false));

        // !requires_training && requires_payment: needs balance only
        assert!(is_authorized(true, false, true, false, true));
        assert!(!is_authorized(true, false, true, false, false));

        // neither required: always true while active
        assert!(is_authorized(true, false, false, false, false));

        // inactive always fails regardless of the rest
        assert!(!is_authorized(false, false, false, true, true));
    }
}
