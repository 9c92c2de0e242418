// Typed REST surface for events, registrations and the user profile.
//
// Every call goes through the shared `SessionManager`, so authenticated
// endpoints get the refresh-and-retry behaviour for free.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::ClientError;
use crate::http::{ApiResponse, Method};
use crate::protocol::{Event, EventDraft, EventType, Profile, ProfileUpdate, RegistrationReceipt};
use crate::session::{to_json, SessionManager};

pub const PROFILE_PATH: &str = "/api/v1/auth/users/me/";
pub const EVENTS_PATH: &str = "/api/v1/events/events/";
pub const EVENT_TYPES_PATH: &str = "/api/v1/events/types/";

/// Shown when the server accepts a registration without a message.
pub const DEFAULT_REGISTERED_MESSAGE: &str = "You are registered!";

fn event_path(id: i64) -> String {
    format!("{EVENTS_PATH}{id}/")
}

fn register_path(id: i64) -> String {
    format!("/api/v1/events/register/{id}/")
}

#[derive(Clone)]
pub struct ApiClient {
    session: Arc<SessionManager>,
}

impl ApiClient {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    // -- Profile -------------------------------------------------------------

    pub async fn profile(&self) -> Result<Profile, ClientError> {
        let response = self
            .session
            .authorized_request(Method::Get, PROFILE_PATH, None)
            .await?;
        decode(response)
    }

    /// PATCH the profile and return the server's updated copy.
    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<Profile, ClientError> {
        let body = to_json(update)?;
        let response = self
            .session
            .authorized_request(Method::Patch, PROFILE_PATH, Some(body))
            .await?;
        decode(response)
    }

    // -- Events --------------------------------------------------------------

    pub async fn list_events(&self) -> Result<Vec<Event>, ClientError> {
        let response = self
            .session
            .public_request(Method::Get, EVENTS_PATH, None)
            .await?;
        let events: Vec<Event> = decode(response)?;
        debug!(count = events.len(), "fetched events");
        Ok(events)
    }

    /// Events whose type name contains `category`, ignoring case.
    pub async fn events_in_category(&self, category: &str) -> Result<Vec<Event>, ClientError> {
        let events = self.list_events().await?;
        Ok(events
            .into_iter()
            .filter(|e| e.matches_category(category))
            .collect())
    }

    pub async fn event(&self, id: i64) -> Result<Event, ClientError> {
        let response = self
            .session
            .public_request(Method::Get, &event_path(id), None)
            .await?;
        decode(response)
    }

    pub async fn create_event(&self, draft: &EventDraft) -> Result<Event, ClientError> {
        draft.validate()?;
        let body = to_json(draft)?;
        let response = self
            .session
            .authorized_request(Method::Post, EVENTS_PATH, Some(body))
            .await?;
        decode(response)
    }

    pub async fn update_event(&self, id: i64, draft: &EventDraft) -> Result<Event, ClientError> {
        draft.validate()?;
        let body = to_json(draft)?;
        let response = self
            .session
            .authorized_request(Method::Patch, &event_path(id), Some(body))
            .await?;
        decode(response)
    }

    pub async fn delete_event(&self, id: i64) -> Result<(), ClientError> {
        let response = self
            .session
            .authorized_request(Method::Delete, &event_path(id), None)
            .await?;
        check(&response)
    }

    /// Register the current user for an event. Returns the server's
    /// confirmation text.
    pub async fn register_for_event(&self, id: i64) -> Result<String, ClientError> {
        let response = self
            .session
            .authorized_request(Method::Post, &register_path(id), None)
            .await?;
        check(&response)?;
        let receipt: RegistrationReceipt = response.json().unwrap_or_default();
        Ok(receipt
            .message
            .unwrap_or_else(|| DEFAULT_REGISTERED_MESSAGE.to_string()))
    }

    pub async fn event_types(&self) -> Result<Vec<EventType>, ClientError> {
        let response = self
            .session
            .public_request(Method::Get, EVENT_TYPES_PATH, None)
            .await?;
        decode(response)
    }
}

// ---------------------------------------------------------------------------
// Response handling
// ---------------------------------------------------------------------------

fn check(response: &ApiResponse) -> Result<(), ClientError> {
    if response.is_success() {
        Ok(())
    } else {
        Err(ClientError::Server {
            status: response.status,
            message: response.error_message(),
        })
    }
}

fn decode<T: DeserializeOwned>(response: ApiResponse) -> Result<T, ClientError> {
    check(&response)?;
    response.json().map_err(|e| {
        warn!("unexpected response body: {e}");
        ClientError::Json(e.to_string())
    })
}
