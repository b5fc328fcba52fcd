//! Authorization claims extraction
//!
//! Projects a decoded payload into typed authorization facts. Payloads come
//! from a remote issuer that may be misconfigured, so extraction never fails:
//! a claim with an unexpected shape is treated as absent and reported to the
//! diagnostics sink.
//!
//! Recognised claims:
//!
//! | Claim | Shape |
//! |-------|-------|
//! | `permissions` | list of strings |
//! | `roles` | list of strings, or of objects with a string `key` |
//! | `feature_flags` | object; values are `{"t": "b"\|"s"\|"i", "v": ...}` envelopes or raw JSON |
//! | `org_code` | string |
//! | `org_codes` | list of strings |
//! | `scp` / `scope` | list of strings / space-separated string |
//! | `sub` | string |

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::{Map, Value};

use super::codec::DecodedToken;
use crate::diagnostics::{AnomalyKind, Diagnostics, DiagnosticsSink};

/// Value of a single feature flag
#[derive(Debug, Clone, PartialEq)]
pub enum FlagValue {
    Boolean(bool),
    String(String),
    Integer(i64),
    /// Any other JSON value, passed through untouched
    Json(Value),
}

impl FlagValue {
    fn from_raw(value: &Value) -> Self {
        match value {
            Value::Bool(b) => Self::Boolean(*b),
            Value::String(s) => Self::String(s.clone()),
            Value::Number(n) => n.as_i64().map_or_else(|| Self::Json(value.clone()), Self::Integer),
            other => Self::Json(other.clone()),
        }
    }
}

/// Read-only projection of a token payload
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClaimsSnapshot {
    pub permissions: BTreeSet<String>,
    pub roles: BTreeSet<String>,
    pub feature_flags: BTreeMap<String, FlagValue>,
    pub organization_code: Option<String>,
    pub organizations: BTreeSet<String>,
    pub scopes: BTreeSet<String>,
    pub subject: Option<String>,
}

impl ClaimsSnapshot {
    #[must_use]
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }

    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    #[must_use]
    pub fn flag(&self, name: &str) -> Option<&FlagValue> {
        self.feature_flags.get(name)
    }

    /// Boolean flag value; `None` when absent or of another type
    #[must_use]
    pub fn boolean_flag(&self, name: &str) -> Option<bool> {
        match self.flag(name)? {
            FlagValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn string_flag(&self, name: &str) -> Option<&str> {
        match self.flag(name)? {
            FlagValue::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn integer_flag(&self, name: &str) -> Option<i64> {
        match self.flag(name)? {
            FlagValue::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

/// Identity facts from an ID token
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserProfile {
    pub id: Option<String>,
    pub email: Option<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub picture: Option<String>,
}

/// Maps decoded payloads to [`ClaimsSnapshot`]s, reporting anomalies
#[derive(Debug, Clone, Default)]
pub struct ClaimsExtractor {
    diagnostics: Diagnostics,
}

impl ClaimsExtractor {
    /// Extractor reporting to `sink` (or nowhere when `None`)
    #[must_use]
    pub fn new(sink: Option<Arc<dyn DiagnosticsSink>>) -> Self {
        Self { diagnostics: Diagnostics::new(sink) }
    }

    pub(crate) fn with_diagnostics(diagnostics: Diagnostics) -> Self {
        Self { diagnostics }
    }

    /// Extract a snapshot from a decoded token
    ///
    /// # Examples
    /// ```
    /// use serde_json::json;
    /// use tokenward_auth::auth::claims::ClaimsExtractor;
    /// use tokenward_auth::auth::codec::{decode, encode_unsigned};
    ///
    /// let raw = encode_unsigned(None, &json!({ "exp": 1, "permissions": ["read"] }));
    /// let snapshot = ClaimsExtractor::default().extract(&decode(&raw).unwrap());
    /// assert!(snapshot.has_permission("read"));
    /// ```
    #[must_use]
    pub fn extract(&self, token: &DecodedToken) -> ClaimsSnapshot {
        let payload = token.payload();

        ClaimsSnapshot {
            permissions: self.string_set(payload, "permissions", |v| v.as_str().map(str::to_owned)),
            roles: self.string_set(payload, "roles", role_key),
            feature_flags: self.feature_flags(payload),
            organization_code: self.optional_string(payload, "org_code"),
            organizations: self.string_set(payload, "org_codes", |v| v.as_str().map(str::to_owned)),
            scopes: self.scopes(payload),
            subject: self.optional_string(payload, "sub"),
        }
    }

    /// Extract identity facts from an ID token
    #[must_use]
    pub fn user_profile(&self, id_token: &DecodedToken) -> UserProfile {
        let payload = id_token.payload();
        UserProfile {
            id: self.optional_string(payload, "sub"),
            email: self.optional_string(payload, "email"),
            given_name: self.optional_string(payload, "given_name"),
            family_name: self.optional_string(payload, "family_name"),
            picture: self.optional_string(payload, "picture"),
        }
    }

    fn unexpected(&self, claim: &str, expected: &str, found: &Value) {
        self.diagnostics.report(
            AnomalyKind::UnexpectedClaimType,
            format!("claim '{claim}' expected {expected}, found {}", json_type(found)),
        );
    }

    fn optional_string(&self, payload: &Map<String, Value>, claim: &str) -> Option<String> {
        match payload.get(claim)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => {
                self.unexpected(claim, "string", other);
                None
            }
        }
    }

    fn string_set(
        &self,
        payload: &Map<String, Value>,
        claim: &str,
        item: impl Fn(&Value) -> Option<String>,
    ) -> BTreeSet<String> {
        let Some(value) = payload.get(claim) else {
            return BTreeSet::new();
        };
        let Value::Array(entries) = value else {
            if !value.is_null() {
                self.unexpected(claim, "list", value);
            }
            return BTreeSet::new();
        };

        let mut set = BTreeSet::new();
        let mut rejected = 0usize;
        for entry in entries {
            match item(entry) {
                Some(s) => {
                    set.insert(s);
                }
                None => rejected += 1,
            }
        }
        if rejected > 0 {
            self.diagnostics.report(
                AnomalyKind::UnexpectedClaimType,
                format!("claim '{claim}' had {rejected} entries of unexpected type"),
            );
        }
        set
    }

    fn scopes(&self, payload: &Map<String, Value>) -> BTreeSet<String> {
        if payload.contains_key("scp") {
            return self.string_set(payload, "scp", |v| v.as_str().map(str::to_owned));
        }
        self.optional_string(payload, "scope")
            .map(|s| s.split_whitespace().map(str::to_owned).collect())
            .unwrap_or_default()
    }

    fn feature_flags(&self, payload: &Map<String, Value>) -> BTreeMap<String, FlagValue> {
        let Some(value) = payload.get("feature_flags") else {
            return BTreeMap::new();
        };
        let Value::Object(flags) = value else {
            if !value.is_null() {
                self.unexpected("feature_flags", "object", value);
            }
            return BTreeMap::new();
        };

        let mut out = BTreeMap::new();
        for (name, raw) in flags {
            match typed_flag(raw) {
                Ok(flag) => {
                    out.insert(name.clone(), flag);
                }
                Err(reason) => self.diagnostics.report(
                    AnomalyKind::UnexpectedClaimType,
                    format!("feature flag '{name}' dropped: {reason}"),
                ),
            }
        }
        out
    }
}

fn role_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => obj.get("key").and_then(Value::as_str).map(str::to_owned),
        _ => None,
    }
}

/// Decode a `{"t": code, "v": value}` envelope, or pass a raw value through
fn typed_flag(raw: &Value) -> Result<FlagValue, String> {
    let Value::Object(obj) = raw else {
        return Ok(FlagValue::from_raw(raw));
    };
    let (Some(code), Some(value)) = (obj.get("t").and_then(Value::as_str), obj.get("v")) else {
        return Ok(FlagValue::Json(raw.clone()));
    };

    match (code, value) {
        ("b", Value::Bool(b)) => Ok(FlagValue::Boolean(*b)),
        ("s", Value::String(s)) => Ok(FlagValue::String(s.clone())),
        ("i", Value::Number(n)) if n.is_i64() => n
            .as_i64()
            .map(FlagValue::Integer)
            .ok_or_else(|| "integer out of range".to_string()),
        ("b" | "s" | "i", other) => {
            Err(format!("type code '{code}' does not match {} value", json_type(other)))
        }
        (unknown, _) => Err(format!("unknown type code '{unknown}'")),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}
