//! Row-local checks that run before rendering.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::table::{Row, STATUS_SENT};

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_.%+-]+@[A-Za-z0-9_.-]+\.[A-Za-z]{2,}$")
        .expect("email pattern is valid")
});

/// Outcome of validating one row.
#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
    /// Status cell already holds the sent sentinel
    AlreadySent,
    /// Row cannot be sent; the recipient is included when known
    Invalid {
        email: Option<String>,
        reason: String,
    },
    Ok { email: String, name: String },
}

/// Structural check for an email address (ASCII local part, dotted domain).
pub fn is_valid_email(email: &str) -> bool {
    EMAIL.is_match(email)
}

/// Validate a row against the batch's status column.
pub fn validate(row: &Row, status_column: &str) -> Validation {
    if row.text(status_column).as_deref() == Some(STATUS_SENT) {
        return Validation::AlreadySent;
    }

    let Some(email) = row.text("email") else {
        return Validation::Invalid {
            email: None,
            reason: "Missing email address".to_string(),
        };
    };

    if !is_valid_email(&email) {
        return Validation::Invalid {
            email: Some(email),
            reason: "Invalid email format".to_string(),
        };
    }

    match row.text("name") {
        Some(name) => Validation::Ok { email, name },
        None => Validation::Invalid {
            email: Some(email),
            reason: "Missing name".to_string(),
        },
    }
}
