// Wire types for the REST API and the chat socket.
//
// Responses are decoded leniently: the backend owns these entities and the
// client only keeps transient copies, so missing fields fall back to
// defaults instead of failing the whole request.

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{FieldError, ValidationErrors};

/// Treat an explicit JSON `null` like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

/// Token pair returned by login. Both fields are optional on the wire so a
/// malformed success body can be reported instead of failing to decode.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenPair {
    pub access: Option<String>,
    pub refresh: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshRequest<'a> {
    pub refresh: &'a str,
}

/// Refresh response. `refresh` is only present when the server rotates
/// refresh tokens.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RefreshResponse {
    pub access: Option<String>,
    pub refresh: Option<String>,
}

/// Sign-up form.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Registration {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
}

impl Registration {
    /// Every field is required; all missing fields are reported together.
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = Vec::new();
        if self.first_name.trim().is_empty() {
            errors.push(FieldError::new("first_name", "First Name is required"));
        }
        if self.last_name.trim().is_empty() {
            errors.push(FieldError::new("last_name", "Last Name is required"));
        }
        if self.email.trim().is_empty() {
            errors.push(FieldError::new("email", "Email is required"));
        }
        if self.password.is_empty() {
            errors.push(FieldError::new("password", "Password is required"));
        }
        match ValidationErrors::from_vec(errors) {
            Some(errors) => Err(errors),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PasswordResetRequest<'a> {
    pub email: &'a str,
}

/// Error body used across the API. Auth endpoints report `{error, code}`;
/// event endpoints use `message`; framework errors use `detail`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
}

impl ApiErrorBody {
    /// First human-readable message present.
    pub fn text(&self) -> Option<&str> {
        self.message
            .as_deref()
            .or(self.error.as_deref())
            .or(self.detail.as_deref())
    }
}

/// Server error code for an unknown or invalid email.
pub const CODE_BAD_EMAIL: &str = "001";
/// Server error code for a wrong password.
pub const CODE_BAD_PASSWORD: &str = "003";

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Profile {
    #[serde(deserialize_with = "null_as_default")]
    pub first_name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub last_name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub email: String,
    pub birth_date: Option<String>,
    pub phone: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub roles: Vec<String>,
}

impl Profile {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

/// PATCH body for the profile. Absent fields are left unchanged server-side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventType {
    #[serde(deserialize_with = "null_as_default")]
    pub id: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Club {
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Event {
    #[serde(deserialize_with = "null_as_default")]
    pub id: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(deserialize_with = "null_as_default")]
    pub date: String,
    #[serde(deserialize_with = "null_as_default")]
    pub location: String,
    #[serde(rename = "type")]
    pub event_type: Option<EventType>,
    pub image: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub registered_count: u32,
    /// 0 means no member cap.
    #[serde(deserialize_with = "null_as_default")]
    pub max_members: u32,
    pub club: Option<Club>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub bonus: Option<serde_json::Value>,
}

impl Event {
    /// Parse `date` as either `YYYY-MM-DD` or an RFC 3339 timestamp.
    pub fn calendar_date(&self) -> Option<NaiveDate> {
        let raw = self.date.trim();
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive()))
    }

    /// Case-insensitive substring match on the event type name. Events
    /// without a type never match.
    pub fn matches_category(&self, category: &str) -> bool {
        let needle = category.to_lowercase();
        self.event_type
            .as_ref()
            .is_some_and(|t| t.name.to_lowercase().contains(&needle))
    }

    /// Remaining places, or `None` when the event has no member cap.
    pub fn spots_left(&self) -> Option<u32> {
        (self.max_members > 0).then(|| self.max_members.saturating_sub(self.registered_count))
    }
}

/// Create/edit form for an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EventDraft {
    pub title: String,
    pub description: String,
    pub date: String,
    pub location: String,
}

impl EventDraft {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let fields = [
            ("title", &self.title),
            ("description", &self.description),
            ("date", &self.date),
            ("location", &self.location),
        ];
        let errors = fields
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| FieldError::new(*name, "This field is required"))
            .collect();
        match ValidationErrors::from_vec(errors) {
            Some(errors) => Err(errors),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistrationReceipt {
    #[serde(default)]
    pub message: Option<String>,
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// Chat wire body, identical in both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatFrame {
    pub message: String,
}
