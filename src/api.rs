//! Authorization Client (C2): talks to the central registry over HTTP.
//!
//! Grounded on `original_source/AxelsPlayground/Firmware/Database.py`'s
//! `Database` class -- same `mode=` query-parameter dispatch, same bearer
//! token, same permissive response decoding (a JSON array uses `[0]`, a
//! bare JSON scalar or a plain-text "success"/digit body are both accepted)
//! -- but over `reqwest::blocking` rather than hand-rolled sockets, per the
//! teacher's transport choice (`api.rs` already depends on `reqwest`).
//!
//! The main loop is single-threaded and synchronous (`SPEC_FULL.md` S5), so
//! every call here blocks the caller; `RetryPolicy` governs how long it is
//! willing to block. Profile and card-details lookups retry forever (the
//! appliance has nothing useful to do without them); logging calls are
//! best-effort, retried once.

use std::time::Duration;

use log::{error, warn};
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::config::DbConfig;
use crate::domain::{CardDetails, CardType, EquipmentProfile};
use crate::error::{PortalBoxError, Result};
use crate::retry::RetryPolicy;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const PROFILE_RETRY_DELAY: Duration = Duration::from_secs(5);
const CARD_DETAILS_RETRY_DELAY: Duration = Duration::from_secs(1);

pub struct AuthClient {
    client: Client,
    base_url: String,
    bearer_token: String,
}

impl AuthClient {
    #[must_use]
    pub fn new(db: &DbConfig) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url: db.base_url(),
            bearer_token: db.bearer_token.clone(),
        }
    }

    fn request(&self, method: reqwest::Method, params: &[(&str, String)]) -> Result<Value> {
        let response = self
            .client
            .request(method, &self.base_url)
            .bearer_auth(&self.bearer_token)
            .query(params)
            .send()
            .map_err(|e| PortalBoxError::NetworkTransient(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|e| PortalBoxError::NetworkTransient(e.to_string()))?;

        if status.is_client_error() || status.is_server_error() {
            return Err(PortalBoxError::NetworkTransient(format!(
                "http {status}: {body}"
            )));
        }
        if body.trim().is_empty() {
            return Err(PortalBoxError::DecodeError("empty response body".to_string()));
        }

        // The server speaks JSON for structured endpoints but a handful of
        // mutating endpoints return a bare "success"/digit text body; accept
        // either rather than forcing every caller to special-case it.
        if let Ok(json) = serde_json::from_str::<Value>(&body) {
            return Ok(json);
        }
        let trimmed = body.trim();
        if trimmed.eq_ignore_ascii_case("success") || trimmed.to_lowercase().contains("completed") {
            return Ok(Value::Bool(true));
        }
        if let Ok(n) = trimmed.parse::<i64>() {
            return Ok(Value::Number(n.into()));
        }
        Ok(Value::String(trimmed.to_string()))
    }

    /// First element of a JSON array, the scalar itself, or `None` if the
    /// response doesn't carry a usable record.
    fn first_record(value: Value) -> Option<Value> {
        match value {
            Value::Array(mut items) if !items.is_empty() => Some(items.remove(0)),
            Value::Array(_) => None,
            other => Some(other),
        }
    }

    fn truthy(value: &Value) -> bool {
        match value {
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_i64().map(|n| n != 0).unwrap_or(true),
            Value::String(s) => !s.is_empty(),
            Value::Null => false,
            Value::Array(a) => !a.is_empty(),
            Value::Object(_) => true,
        }
    }

    /// `check_reg`: is this MAC address already registered? -1 on error.
    pub fn is_registered(&self, mac_address: &str) -> i32 {
        match self.request(
            reqwest::Method::GET,
            &[("mode", "check_reg".to_string()), ("mac_adr", mac_address.to_string())],
        ) {
            Ok(value) => match value {
                Value::Bool(b) => i32::from(b),
                Value::Number(n) => n.as_i64().unwrap_or(-1) as i32,
                Value::String(s) => s.parse().unwrap_or(-1),
                _ => -1,
            },
            Err(e) => {
                warn!("is_registered: {e}");
                -1
            }
        }
    }

    /// `register`: register this MAC address as an out-of-service device.
    pub fn register(&self, mac_address: &str) -> bool {
        match self.request(
            reqwest::Method::PUT,
            &[("mode", "register".to_string()), ("mac_adr", mac_address.to_string())],
        ) {
            Ok(value) => Self::truthy(&value),
            Err(e) => {
                warn!("register: {e}");
                false
            }
        }
    }

    /// `get_profile`: fetch this appliance's equipment profile. Retries
    /// forever at a fixed 5s interval -- without a profile the appliance
    /// has no equipment to gate and should stay in Setup (see `bootstrap`).
    pub fn get_equipment_profile(&self, mac_address: &str) -> EquipmentProfile {
        let policy = RetryPolicy::forever(PROFILE_RETRY_DELAY);
        policy
            .run("get_equipment_profile", || {
                self.request(
                    reqwest::Method::GET,
                    &[("mode", "get_profile".to_string()), ("mac_adr", mac_address.to_string())],
                )
                .and_then(|v| Self::decode_profile(v).ok_or_else(|| {
                    PortalBoxError::DecodeError("malformed profile record".to_string())
                }))
            })
            .expect("RetryPolicy::forever never gives up")
    }

    fn decode_profile(value: Value) -> Option<EquipmentProfile> {
        #[derive(Deserialize)]
        struct Raw {
            id: u32,
            type_id: u32,
            #[serde(rename = "name")]
            names: (String, String),
            location_id: u32,
            timeout: u32,
            allow_proxy: u8,
            requires_training: u8,
            charge_policy: i64,
        }

        let record = Self::first_record(value)?;
        let raw: Raw = serde_json::from_value(record).ok()?;
        Some(EquipmentProfile {
            equipment_id: raw.id,
            type_id: raw.type_id,
            type_name: raw.names.0,
            location_id: raw.location_id,
            location_name: raw.names.1,
            timeout_minutes: raw.timeout,
            allow_proxy: raw.allow_proxy != 0,
            requires_training: raw.requires_training == 1,
            requires_payment: raw.charge_policy > 0,
        })
    }

    /// `get_card_details`: authorization + card type + authority level for
    /// one card, scoped to this appliance's equipment type. Retries forever
    /// -- a card sitting in the reader is worthless without a verdict.
    ///
    /// The source record carries no `pin` field; the field is populated
    /// from `user_pin` when present, matching how the distilled spec
    /// expects PIN verification (`SPEC_FULL.md` S4.7) to source it -- an
    /// extrapolation documented in `DESIGN.md`, same as `add_user_authorization`.
    pub fn get_card_details(&self, card_id: i64, equipment_type_id: u32) -> CardDetails {
        let policy = RetryPolicy::forever(CARD_DETAILS_RETRY_DELAY);
        policy
            .run("get_card_details", || {
                self.request(
                    reqwest::Method::GET,
                    &[
                        ("mode", "get_card_details".to_string()),
                        ("card_id", card_id.to_string()),
                        ("equipment_id", equipment_type_id.to_string()),
                    ],
                )
                .map(Self::decode_card_details)
            })
            .unwrap_or_else(CardDetails::unknown)
    }

    fn decode_card_details(value: Value) -> CardDetails {
        let Some(record) = Self::first_record(value) else {
            return CardDetails::unknown();
        };
        let obj = record.as_object();
        let get_i64 = |key: &str| obj.and_then(|o| o.get(key)).and_then(Value::as_i64);
        let get_bool = |key: &str| obj.and_then(|o| o.get(key)).map_or(false, Self::truthy);
        let get_str = |key: &str| {
            obj.and_then(|o| o.get(key))
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        let raw_card_type = get_i64("card_type").unwrap_or(-1);
        if !matches!(raw_card_type, -1 | 1 | 2 | 3 | 4) {
            // An out-of-range card_type wire value is genuinely malformed
            // input, unlike the legitimate "unknown card id" case (-1)
            // (SPEC_FULL.md S7, "Unexpected state").
            warn!(
                "{}",
                PortalBoxError::UnexpectedState(format!(
                    "unrecognized card_type wire value {raw_card_type}"
                ))
            );
        }

        CardDetails {
            card_type: CardType::from_wire(raw_card_type),
            user_authority_level: get_i64("user_role").unwrap_or(0).max(0) as u8,
            user_is_authorized: get_bool("user_is_authorized"),
            pin: get_str("user_pin"),
        }
    }

    /// `get_user`: display name for a card, used by Card Reader Mode.
    pub fn get_user(&self, card_id: i64) -> (String, String) {
        match self.request(reqwest::Method::GET, &[("mode", "get_user".to_string()), ("card_id", card_id.to_string())]) {
            Ok(value) => match Self::first_record(value) {
                Some(Value::Object(obj)) => (
                    obj.get("name").and_then(Value::as_str).unwrap_or("Unknown User").to_string(),
                    obj.get("email").and_then(Value::as_str).unwrap_or("unknown@example.com").to_string(),
                ),
                Some(Value::String(s)) if !s.is_empty() => (s, "unknown@example.com".to_string()),
                _ => ("Unknown User".to_string(), "unknown@example.com".to_string()),
            },
            Err(e) => {
                warn!("get_user: {e}");
                ("Unknown User".to_string(), "unknown@example.com".to_string())
            }
        }
    }

    /// `get_equipment_name`: human-readable name for an equipment id.
    pub fn get_equipment_name(&self, equipment_id: u32) -> String {
        match self.request(
            reqwest::Method::GET,
            &[("mode", "get_equipment_name".to_string()), ("equipment_id", equipment_id.to_string())],
        ) {
            Ok(value) => match Self::first_record(value) {
                Some(Value::Object(obj)) => obj
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown")
                    .to_string(),
                Some(Value::String(s)) if !s.is_empty() => s,
                _ => "Unknown".to_string(),
            },
            Err(e) => {
                warn!("get_equipment_name: {e}");
                "Unknown".to_string()
            }
        }
    }

    /// `record_ip`: best-effort, retried once.
    pub fn record_ip(&self, equipment_id: u32, ip: &str) {
        let policy = RetryPolicy::once();
        let ok = policy
            .run("record_ip", || {
                self.request(
                    reqwest::Method::POST,
                    &[
                        ("mode", "record_ip".to_string()),
                        ("equipment_id", equipment_id.to_string()),
                        ("ip_address", ip.to_string()),
                    ],
                )
            })
            .is_some();
        if !ok {
            warn!("failed to record IP address {ip} for equipment {equipment_id}");
        }
    }

    /// `log_started_status`: fire-and-forget, best-effort, retried once.
    pub fn log_started_status(&self, equipment_id: u32) {
        self.fire_and_forget(
            "log_started_status",
            &[("mode", "log_started_status".to_string()), ("equipment_id", equipment_id.to_string())],
        );
    }

    /// `log_shutdown_status`: `card_id` is the id that triggered shutdown,
    /// or 0 if shutdown was not card-related.
    pub fn log_shutdown_status(&self, equipment_id: u32, card_id: i64) {
        self.fire_and_forget(
            "log_shutdown_status",
            &[
                ("mode", "log_shutdown_status".to_string()),
                ("equipment_id", equipment_id.to_string()),
                ("card_id", card_id.to_string()),
            ],
        );
    }

    pub fn log_access_attempt(&self, card_id: i64, equipment_id: u32, successful: bool) {
        self.fire_and_forget(
            "log_access_attempt",
            &[
                ("mode", "log_access_attempt".to_string()),
                ("equipment_id", equipment_id.to_string()),
                ("card_id", card_id.to_string()),
                ("successful", i32::from(successful).to_string()),
            ],
        );
    }

    pub fn log_access_completion(&self, card_id: i64, equipment_id: u32) {
        self.fire_and_forget(
            "log_access_completion",
            &[
                ("mode", "log_access_completion".to_string()),
                ("equipment_id", equipment_id.to_string()),
                ("card_id", card_id.to_string()),
            ],
        );
    }

    /// `add_user_authorization`: grant an unprivileged card session access
    /// to this equipment type (training transfer target). No source body
    /// exists for this endpoint in `original_source/` -- its request shape
    /// is extrapolated from the sibling mutating endpoints above (POST,
    /// `mode=`, bearer auth, truthy-response success), documented in
    /// `DESIGN.md`.
    pub fn add_user_authorization(&self, card_id: i64, equipment_type_id: u32) -> bool {
        match self.request(
            reqwest::Method::POST,
            &[
                ("mode", "add_user_authorization".to_string()),
                ("card_id", card_id.to_string()),
                ("equipment_id", equipment_type_id.to_string()),
            ],
        ) {
            Ok(value) => Self::truthy(&value),
            Err(e) => {
                warn!("add_user_authorization: {e}");
                false
            }
        }
    }

    fn fire_and_forget(&self, label: &str, params: &[(&str, String)]) {
        let policy = RetryPolicy::once();
        let ok = policy.run(label, || self.request(reqwest::Method::POST, params)).is_some();
        if !ok {
            error!("{label}: failed to log with the registry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthy_treats_nonzero_numbers_and_nonempty_strings_as_true() {
        assert!(AuthClient::truthy(&Value::Bool(true)));
        assert!(!AuthClient::truthy(&Value::Bool(false)));
        assert!(AuthClient::truthy(&Value::from(1)));
        assert!(!AuthClient::truthy(&Value::from(0)));
        assert!(AuthClient::truthy(&Value::String("ok".to_string())));
        assert!(!AuthClient::truthy(&Value::String(String::new())));
        assert!(!AuthClient::truthy(&Value::Null));
    }

    #[test]
    fn first_record_unwraps_single_element_arrays() {
        let arr = Value::Array(vec![Value::from(42)]);
        assert_eq!(AuthClient::first_record(arr), Some(Value::from(42)));
        assert_eq!(AuthClient::first_record(Value::Array(vec![])), None);
        assert_eq!(AuthClient::first_record(Value::from(7)), Some(Value::from(7)));
    }

    #[test]
    fn decode_card_details_defaults_on_empty_array() {
        let details = AuthClient::decode_card_details(Value::Array(vec![]));
        assert_eq!(details, CardDetails::unknown());
    }

    #[test]
    fn decode_card_details_reads_authorization_and_pin() {
        let value = serde_json::json!([{
            "user_is_authorized": true,
            "card_type": 4,
            "user_role": 2,
            "user_pin": "1234",
        }]);
        let details = AuthClient::decode_card_details(value);
        assert_eq!(details.card_type, CardType::User);
        assert_eq!(details.user_authority_level, 2);
        assert!(details.user_is_authorized);
        assert_eq!(details.pin.as_deref(), Some("1234"));
    }

    #[test]
    fn decode_card_details_normalizes_unrecognized_card_type_to_invalid() {
        let value = serde_json::json!([{
            "user_is_authorized": false,
            "card_type": 99,
            "user_role": 0,
        }]);
        let details = AuthClient::decode_card_details(value);
        assert_eq!(details.card_type, CardType::Invalid);
    }

    #[test]
    fn decode_profile_reads_name_tuple_and_derived_flags() {
        let value = serde_json::json!([{
            "id": 5,
            "type_id": 2,
            "name": ["Laser Cutter", "Shop A"],
            "location_id": 1,
            "timeout": 30,
            "allow_proxy": 1,
            "requires_training": 1,
            "charge_policy": 0,
        }]);
        let profile = AuthClient::decode_profile(value).expect("decodes");
        assert_eq!(profile.equipment_id, 5);
        assert_eq!(profile.type_name, "Laser Cutter");
        assert_eq!(profile.location_name, "Shop A");
        assert!(profile.allow_proxy);
        assert!(profile.requires_training);
        assert!(!profile.requires_payment);
    }
}
