// fetch
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;
pub const HTTP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

// decode
pub const DEFAULT_LOOKAHEAD: usize = 20;
pub const DEFAULT_MAX_ELEMENT_SIZE: u64 = 64 * 1024 * 1024;

// fade
pub const DEFAULT_FADE_MICROS: i64 = 1_000_000;

// channels between stages
pub const DEFAULT_CHANNEL_CAPACITY: usize = 4;
pub const COMMAND_CHANNEL_CAPACITY: usize = 32;
pub const EVENT_CHANNEL_CAPACITY: usize = 1;
