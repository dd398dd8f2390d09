//! Process configuration shared by the local and server binaries.

use crate::codec::KEY_SIZE;
use crate::error::ConfigError;

/// Immutable per-process configuration. `upstream_host`/`upstream_port` are
/// only set for the local side; `credentials` are only meaningful for the
/// server side (`None` disables username/password authentication).
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_host: String,
    pub listen_port: u16,
    pub upstream_host: Option<String>,
    pub upstream_port: Option<u16>,
    pub key: [u8; KEY_SIZE],
    pub credentials: Option<(String, String)>,
}

/// Validates and converts a raw `--key` argument into the fixed-size key array
/// the codec requires.
pub fn parse_key(raw: &str) -> Result<[u8; KEY_SIZE], ConfigError> {
    let bytes = raw.as_bytes();
    if bytes.len() != KEY_SIZE {
        return Err(ConfigError::BadKeyLength(bytes.len()));
    }
    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(bytes);
    Ok(key)
}

/// Validates a `--port`/`--remote-port` argument. `u16` already bounds the
/// value at 65535; only `0` (not a valid TCP port to bind or dial) needs
/// rejecting here.
pub fn parse_port(raw: u16) -> Result<u16, ConfigError> {
    if raw == 0 {
        return Err(ConfigError::BadPort(
            "port must be between 1 and 65535, got 0".to_string(),
        ));
    }
    Ok(raw)
}

/// `(username, password)` configured only when both are non-empty, per the
/// "both empty disables method 0x02" rule.
pub fn credentials_from(username: &str, password: &str) -> Option<(String, String)> {
    if username.is_empty() || password.is_empty() {
        None
    } else {
        Some((username.to_string(), password.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_exactly_32_bytes() {
        let key = "01234567890123456789012345678901";
        assert_eq!(key.len(), 32);
        assert!(parse_key(key).is_ok());
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(parse_key("short").is_err());
        assert!(parse_key("0123456789012345678901234567890123").is_err());
    }

    #[test]
    fn accepts_nonzero_port() {
        assert_eq!(parse_port(1).unwrap(), 1);
        assert_eq!(parse_port(1080).unwrap(), 1080);
        assert_eq!(parse_port(65535).unwrap(), 65535);
    }

    #[test]
    fn rejects_zero_port() {
        assert!(parse_port(0).is_err());
    }

    #[test]
    fn both_empty_disables_user_pass() {
        assert_eq!(credentials_from("", ""), None);
    }

    #[test]
    fn one_empty_still_disables_user_pass() {
        assert_eq!(credentials_from("alice", ""), None);
        assert_eq!(credentials_from("", "secret"), None);
    }

    #[test]
    fn both_set_enables_user_pass() {
        assert_eq!(
            credentials_from("alice", "secret"),
            Some(("alice".to_string(), "secret".to_string()))
        );
    }
}
