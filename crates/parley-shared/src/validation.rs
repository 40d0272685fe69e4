//! Client-side input checks. Everything here runs before a request is built.

use crate::constants::{MAX_UPLOAD_SIZE, MAX_USERNAME_LEN, MIN_USERNAME_LEN};
use crate::error::ValidationError;
use crate::types::{LoginRequest, Registration};

/// Trim the username and require both fields.
pub fn validate_login(username: &str, password: &str) -> Result<LoginRequest, ValidationError> {
    let username = username.trim();
    if username.is_empty() || password.is_empty() {
        return Err(ValidationError::MissingFields);
    }
    Ok(LoginRequest {
        username: username.to_string(),
        password: password.to_string(),
    })
}

/// Normalise a registration form: every field required, username lowercased.
pub fn validate_registration(form: &Registration) -> Result<Registration, ValidationError> {
    let normalized = Registration {
        full_name: form.full_name.trim().to_string(),
        username: form.username.trim().to_lowercase(),
        email: form.email.trim().to_string(),
        password: form.password.clone(),
    };

    if normalized.full_name.is_empty()
        || normalized.username.is_empty()
        || normalized.email.is_empty()
        || normalized.password.is_empty()
    {
        return Err(ValidationError::MissingFields);
    }

    validate_username(&normalized.username)?;
    Ok(normalized)
}

/// Length and charset rules the server applies to new usernames.
pub fn validate_username(username: &str) -> Result<(), ValidationError> {
    let len = username.chars().count();
    if len < MIN_USERNAME_LEN {
        return Err(ValidationError::UsernameTooShort {
            min: MIN_USERNAME_LEN,
        });
    }
    if len > MAX_USERNAME_LEN {
        return Err(ValidationError::UsernameTooLong {
            max: MAX_USERNAME_LEN,
        });
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
    {
        return Err(ValidationError::UsernameCharset);
    }
    Ok(())
}

/// Handle typed into "start chat". Only the minimum length is checked here;
/// the server decides whether the user exists.
pub fn validate_chat_handle(handle: &str) -> Result<String, ValidationError> {
    let trimmed = handle.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::InvalidUsername);
    }
    if trimmed.chars().count() < MIN_USERNAME_LEN {
        return Err(ValidationError::UsernameTooShort {
            min: MIN_USERNAME_LEN,
        });
    }
    Ok(trimmed.to_string())
}

pub fn validate_upload_size(size: u64) -> Result<(), ValidationError> {
    if size > MAX_UPLOAD_SIZE {
        return Err(ValidationError::FileTooLarge {
            size,
            max: MAX_UPLOAD_SIZE,
        });
    }
    Ok(())
}
