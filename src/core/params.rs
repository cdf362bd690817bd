//! Validated session parameters: session kind and credentials.

use std::fmt;

use super::error::ConfigError;

/// Longest username the authentication frame accepts.
pub const MAX_USERNAME_LEN: usize = 32;
/// Longest password the authentication frame accepts.
pub const MAX_PASSWORD_LEN: usize = 32;

pub const DEFAULT_USERNAME: &str = "admin";

/// Four-byte session-type tag sent in the start-redirection request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionKind([u8; 4]);

impl SessionKind {
    pub const SOL: SessionKind = SessionKind(*b"SOL ");

    pub fn new(tag: &[u8]) -> Result<Self, ConfigError> {
        let bytes: [u8; 4] = tag
            .try_into()
            .map_err(|_| ConfigError::InvalidKind(tag.len()))?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0).trim_end())
    }
}

/// A string with an explicit upper bound on its byte length.
///
/// Construction fails instead of truncating. The bytes are zeroed when the
/// value is dropped.
#[derive(Clone, PartialEq, Eq)]
pub struct BoundedString {
    bytes: Vec<u8>,
}

impl BoundedString {
    pub fn new(field: &'static str, value: &str, max: usize) -> Result<Self, ConfigError> {
        if value.len() > max {
            return Err(ConfigError::TooLong {
                field,
                len: value.len(),
                max,
            });
        }
        Ok(Self {
            bytes: value.as_bytes().to_vec(),
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Drop for BoundedString {
    fn drop(&mut self) {
        self.bytes.iter_mut().for_each(|b| *b = 0);
    }
}

impl fmt::Debug for BoundedString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BoundedString({} bytes)", self.bytes.len())
    }
}

/// Username and password for the authentication phase.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: BoundedString,
    pub password: BoundedString,
}

/// Overwrite a secret held in a `String` before its buffer is released.
///
/// The buffer is kept in place, so the zeroed bytes are the last thing it
/// holds; the string is left empty.
pub fn scrub(secret: &mut String) {
    let mut bytes = std::mem::take(secret).into_bytes();
    bytes.fill(0);
    bytes.clear();
    // An empty byte vector is always valid UTF-8.
    *secret = String::from_utf8(bytes).unwrap_or_default();
}

impl Credentials {
    pub fn new(username: &str, password: &str) -> Result<Self, ConfigError> {
        let username = BoundedString::new("username", username, MAX_USERNAME_LEN)?;
        if username.is_empty() {
            return Err(ConfigError::Empty("username"));
        }
        let password = BoundedString::new("password", password, MAX_PASSWORD_LEN)?;
        Ok(Self { username, password })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_kind_must_be_four_bytes() {
        assert_eq!(SessionKind::new(b"SOL ").unwrap(), SessionKind::SOL);
        assert_eq!(SessionKind::new(b"SOL"), Err(ConfigError::InvalidKind(3)));
        assert_eq!(SessionKind::new(b"IDER "), Err(ConfigError::InvalidKind(5)));
        assert_eq!(SessionKind::SOL.to_string(), "SOL");
    }

    #[test]
    fn test_credentials_bounds() {
        let max = "p".repeat(MAX_PASSWORD_LEN);
        assert!(Credentials::new("admin", &max).is_ok());

        let long = "p".repeat(MAX_PASSWORD_LEN + 1);
        assert_eq!(
            Credentials::new("admin", &long).unwrap_err(),
            ConfigError::TooLong {
                field: "password",
                len: MAX_PASSWORD_LEN + 1,
                max: MAX_PASSWORD_LEN,
            }
        );

        let user = "u".repeat(MAX_USERNAME_LEN + 1);
        assert!(matches!(
            Credentials::new(&user, "x"),
            Err(ConfigError::TooLong { field: "username", .. })
        ));
    }

    #[test]
    fn test_empty_username_rejected() {
        assert_eq!(Credentials::new("", "x").unwrap_err(), ConfigError::Empty("username"));
        // An empty password is legal; the controller decides.
        assert!(Credentials::new("admin", "").is_ok());
    }

    #[test]
    fn test_scrub_zeroes_in_place() {
        let mut secret = String::from("hunter2");
        let ptr = secret.as_ptr();
        let capacity = secret.capacity();

        scrub(&mut secret);

        assert!(secret.is_empty());
        assert_eq!(secret.as_ptr(), ptr);
        assert_eq!(secret.capacity(), capacity);
        // SAFETY: the allocation is still owned by `secret` and its first
        // seven bytes were initialised before the scrub.
        let old = unsafe { std::slice::from_raw_parts(secret.as_ptr(), 7) };
        assert_eq!(old, [0u8; 7]);
    }

    #[test]
    fn test_debug_hides_password() {
        let creds = Credentials::new("admin", "hunter2").unwrap();
        let shown = format!("{creds:?}");
        assert!(!shown.contains("hunter2"));
    }
}
