// Error taxonomy shared by the session manager and the REST API.

use std::fmt;

use thiserror::Error;

/// One field-level problem, shown next to the offending input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        FieldError {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Non-empty collection of field errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrors(Vec<FieldError>);

impl ValidationErrors {
    /// Returns `None` when `errors` is empty.
    pub fn from_vec(errors: Vec<FieldError>) -> Option<Self> {
        if errors.is_empty() {
            None
        } else {
            Some(ValidationErrors(errors))
        }
    }

    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationErrors(vec![FieldError::new(field, message)])
    }

    pub fn fields(&self) -> &[FieldError] {
        &self.0
    }

    /// Message for `field`, if it has one.
    pub fn get(&self, field: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|e| e.field == field)
            .map(|e| e.message.as_str())
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}: {}", e.field, e.message)?;
        }
        Ok(())
    }
}

/// Credential problems. The display strings are stable identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("no-refresh-token")]
    NoRefreshToken,
    #[error("refresh-failed")]
    RefreshFailed,
    #[error("login-failed")]
    LoginFailed,
    #[error("not-logged-in")]
    NotLoggedIn,
    /// The request was still rejected after a token refresh.
    #[error("unauthorized")]
    Unauthorized,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),

    #[error("authentication error: {0}")]
    Auth(AuthError),

    #[error("network error: {0}")]
    Network(String),

    #[error("server returned {status}: {message}")]
    Server { status: u16, message: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("invalid JSON payload: {0}")]
    Json(String),
}

impl ClientError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        ClientError::Validation(ValidationErrors::single(field, message))
    }

    pub fn storage(err: anyhow::Error) -> Self {
        ClientError::Storage(format!("{err:#}"))
    }

    /// How a front end should present this error: validation errors inline
    /// next to their fields, everything else as one dismissible alert.
    pub fn surface(&self) -> Surface {
        match self {
            ClientError::Validation(errors) => Surface::Inline(errors.fields().to_vec()),
            ClientError::Auth(AuthError::NotLoggedIn) => Surface::Alert {
                title: "Not Authenticated",
                message: "Please log in first.".into(),
            },
            ClientError::Auth(AuthError::LoginFailed) => Surface::Alert {
                title: "Error",
                message: "Login failed.".into(),
            },
            ClientError::Auth(_) => Surface::Alert {
                title: "Session Expired",
                message: "Please log in again.".into(),
            },
            ClientError::Network(_) => Surface::Alert {
                title: "Error",
                message: "Something went wrong. Check your connection and retry.".into(),
            },
            ClientError::Server { message, .. } => Surface::Alert {
                title: "Error",
                message: message.clone(),
            },
            ClientError::Storage(_) => Surface::Alert {
                title: "Error",
                message: "An error occurred while storing your session.".into(),
            },
            ClientError::Json(_) => Surface::Alert {
                title: "Error",
                message: "The server sent an unexpected response.".into(),
            },
        }
    }
}

impl From<AuthError> for ClientError {
    fn from(err: AuthError) -> Self {
        ClientError::Auth(err)
    }
}

impl From<ValidationErrors> for ClientError {
    fn from(errors: ValidationErrors) -> Self {
        ClientError::Validation(errors)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Surface {
    Inline(Vec<FieldError>),
    Alert { title: &'static str, message: String },
}
