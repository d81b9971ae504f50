// src/error.rs

use reqwest::StatusCode;
use thiserror::Error;

use crate::payroll::BiweeklyPeriod;

#[derive(Error, Debug)]
pub enum RrhhError {
    #[error("HTTP request failed")]
    Request(#[from] reqwest::Error),

    #[error("JSON processing error")]
    Json(#[from] serde_json::Error),

    #[error("File I/O error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },

    #[error("URL parsing error")]
    UrlParse(#[from] url::ParseError),

    #[error("CSV export error")]
    Csv(#[from] csv::Error),

    #[error("Request timed out: the server did not respond")]
    Timeout,

    #[error("Session expired, please log in again")]
    SessionExpired,

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("No employee profile is linked to the current session")]
    MissingEmployee,

    #[error("API error: Status={status}, Message='{message}'")]
    Api { status: StatusCode, message: String },

    // The backend answered 200 but refused the operation (`exito: false`).
    #[error("Rejected by server: {message}")]
    Rejected { message: String },

    #[error("Invalid payload from server: {0}")]
    InvalidPayload(String),

    #[error("An attendance mark is already in progress")]
    MarkInFlight,

    #[error("Attendance cannot be marked right now: {0}")]
    MarkNotAllowed(String),

    #[error("Payroll period {period} has not closed yet (closes on {closes_on})")]
    PeriodNotClosed {
        period: BiweeklyPeriod,
        closes_on: chrono::NaiveDate,
    },

    #[error("Invalid period: {0}")]
    InvalidPeriod(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl RrhhError {
    /// Short text suitable for a user-facing notification.
    pub fn user_message(&self) -> String {
        match self {
            RrhhError::Api { message, .. } if !message.trim().is_empty() => message.clone(),
            RrhhError::Rejected { message } => message.clone(),
            RrhhError::Request(e) if e.is_connect() => {
                "Could not reach the server. Check your connection.".to_string()
            }
            other => other.to_string(),
        }
    }
}

// Helper to create context-aware IO errors
pub fn io_context<E: Into<std::io::Error>, S: Into<String>>(source: E, context: S) -> RrhhError {
    RrhhError::Io {
        source: source.into(),
        context: context.into(),
    }
}

pub type Result<T> = std::result::Result<T, RrhhError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_prefers_backend_text() {
        let err = RrhhError::Api {
            status: StatusCode::BAD_REQUEST,
            message: "Empleado inactivo".to_string(),
        };
        assert_eq!(err.user_message(), "Empleado inactivo");

        let err = RrhhError::Api {
            status: StatusCode::BAD_REQUEST,
            message: "   ".to_string(),
        };
        assert!(err.user_message().contains("400"));
    }

    #[test]
    fn io_context_keeps_context() {
        let err = io_context(
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
            "Failed to read state file",
        );
        assert_eq!(err.to_string(), "File I/O error: Failed to read state file");
    }
}
