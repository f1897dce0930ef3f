pub mod signature;

pub use signature::{constant_time_eq, hmac_sha256_hex, verify_hmac_sha256_hex};
