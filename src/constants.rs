/// Provider event marker that prefixes every data-bearing upstream line.
pub const DATA_PREFIX: &str = "data: ";

/// Provider sentinel signalling the end of the upstream stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Path appended to a model's base URL for chat completions.
pub const CHAT_COMPLETIONS_PATH: &str = "/chat/completions";

/// Upstream defaults
pub const UPSTREAM_TOTAL_TIMEOUT_SECS: u64 = 300;
pub const UPSTREAM_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const MAX_UPSTREAM_LINE_BYTES: usize = 1024 * 1024;

/// Model connectivity check
pub const MODEL_CHECK_TIMEOUT_SECS: u64 = 15;
pub const MODEL_CHECK_PROMPT: &str = "hi";
pub const MODEL_CHECK_MAX_TOKENS: u32 = 5;
pub const MODEL_CHECK_ERROR_BODY_BYTES: usize = 512;

/// Hard ceiling on lines read from a single upstream stream.
pub const MAX_STREAM_LINES: usize = 100_000;

/// Buffered frames between a relay task and its SSE response.
pub const RELAY_CHANNEL_CAPACITY: usize = 100;
pub const SSE_KEEPALIVE_SECS: u64 = 15;

/// Chat defaults
pub const CHAT_SYSTEM_PROMPT: &str = "你是一个专业、友好、简洁的个人财务助手。请用中文回答。";
pub const CHAT_TEMPERATURE: f32 = 0.3;

/// History pagination
pub const DEFAULT_PAGE: i64 = 1;
pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

/// Header carrying the acting user id, set by the authentication layer.
pub const ACTING_USER_HEADER: &str = "x-user-id";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Date format for analysis ranges.
pub const ANALYSIS_DATE_FORMAT: &str = "%Y-%m-%d";

/// Database defaults
pub const DB_PRAGMAS: &[&str] = &[
    "PRAGMA journal_mode = WAL",
    "PRAGMA synchronous = NORMAL",
    "PRAGMA busy_timeout = 5000",
];

pub const DEFAULT_LOG_FILTER: &str = "pennywise=debug,tower_http=info";
pub const LOG_FILE_PREFIX: &str = "pennywise.log";
