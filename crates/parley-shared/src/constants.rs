/// Key under which the bearer token is persisted locally
pub const TOKEN_KEY: &str = "chat_token";

/// Default base address of the chat API
pub const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Path prefix of the push channel endpoint (`/ws/{user_id}`)
pub const PUSH_PATH_PREFIX: &str = "/ws";

/// Path prefix shared by the endpoints that work without a credential
pub const AUTH_PATH_PREFIX: &str = "/auth/";

/// Push channel retry budget after an unclean close
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 5;

/// First reconnect delay in milliseconds; doubles on each attempt
pub const DEFAULT_RECONNECT_BASE_MS: u64 = 1000;

/// Idle time after the last keystroke before "stopped typing" is announced
pub const DEFAULT_TYPING_IDLE_MS: u64 = 1000;

/// Toast auto-dismiss delay in milliseconds
pub const DEFAULT_TOAST_MS: u64 = 5000;

/// Username length bounds enforced at registration and chat start
pub const MIN_USERNAME_LEN: usize = 3;
pub const MAX_USERNAME_LEN: usize = 20;

/// Maximum upload size in bytes (10 MiB)
pub const MAX_UPLOAD_SIZE: u64 = 10 * 1024 * 1024;
