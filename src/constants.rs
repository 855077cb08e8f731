use std::time::Duration;

pub const AES_BLOCK_SIZE: usize = 16;
pub const AES_128_KEY_LEN: usize = 16;
pub const AES_256_KEY_LEN: usize = 32;

pub const HMAC_SHA256_LEN: usize = 32;

/// Labels appended to the master key before hashing to separate the
/// encryption and integrity sub keys.
pub const CRYPT_KEY_LABEL: &[u8] = b"cryptKey";
pub const MAC_KEY_LABEL: &[u8] = b"macKey";

/// Every deployment derives client keys with the same salt. Changing this
/// breaks every client key already registered.
pub const PASSWORD_SALT: &[u8] = b"salt";
pub const PBKDF2_SHA256_ITER: u32 = 4096;

pub const DEFAULT_AS_PORT: u16 = 8888;
pub const DEFAULT_TGS_PORT: u16 = 8889;

pub const DEFAULT_TICKET_LIFETIME: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_FRESHNESS_WINDOW: Duration = Duration::from_secs(60);

// Largest UDP payload over IPv4. Requests and replies are never fragmented
// by us, so anything larger is simply lost.
pub const DEFAULT_IO_MAX_SIZE: usize = 65_507;

pub const REPLY_OK: &str = "OK";

pub const DEFAULT_TICKET_CACHE: &str = "FILE:./data/client.cache";
pub const TICKET_CACHE_ENV: &str = "KRB_TICKET_CACHE";
