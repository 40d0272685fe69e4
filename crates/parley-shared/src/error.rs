use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Input rejected before any network call is attempted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Please fill in all fields")]
    MissingFields,

    #[error("Username must be at least {min} characters")]
    UsernameTooShort { min: usize },

    #[error("Username must not exceed {max} characters")]
    UsernameTooLong { max: usize },

    #[error("Username must be alphanumeric (letters and numbers only)")]
    UsernameCharset,

    #[error("Invalid username")]
    InvalidUsername,

    #[error("Cannot start chat with yourself")]
    SelfChat,

    #[error("Please select a chat first")]
    NoActiveChat,

    #[error("File size must be less than {max} bytes (got {size})")]
    FileTooLarge { size: u64, max: u64 },
}
