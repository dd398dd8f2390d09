//! SOCKS5 method-selection and RFC 1929 username/password sub-negotiation,
//! run against one already-decrypted plaintext frame at a time.

pub const VERSION: u8 = 0x05;
pub const USER_PASS_VERSION: u8 = 0x01;

pub const METHOD_NO_AUTH: u8 = 0x00;
pub const METHOD_USER_PASS: u8 = 0x02;
pub const METHOD_NO_ACCEPTABLE: u8 = 0xFF;

pub const USER_PASS_SUCCESS: u8 = 0x00;
pub const USER_PASS_FAILURE: u8 = 0x01;

/// Outcome of one step of the auth state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Incomplete,
    Success,
    WaitUserPassAuth,
    Failed,
    Error,
}

/// Runs the method-selection and (if selected) username/password sub-negotiation
/// against a server's configured credentials.
pub struct AuthNeg {
    credentials: Option<(String, String)>,
}

impl AuthNeg {
    pub fn new(credentials: Option<(String, String)>) -> Self {
        AuthNeg { credentials }
    }

    /// Processes one decrypted greeting frame. Returns the resulting state and,
    /// when a reply should be written to the client, its encoded bytes.
    pub fn authenticate(&self, plaintext: &[u8]) -> (AuthState, Option<Vec<u8>>) {
        let size = plaintext.len();
        if size < 2 {
            return (AuthState::Incomplete, None);
        }
        if plaintext[0] != VERSION {
            return (AuthState::Error, None);
        }
        let nmethods = plaintext[1] as usize;
        if size < 2 + nmethods {
            return (AuthState::Incomplete, None);
        }
        if size > 2 + nmethods {
            return (AuthState::Error, None);
        }
        let methods = &plaintext[2..2 + nmethods];

        let selected = if self.credentials.is_some() {
            methods.contains(&METHOD_USER_PASS).then_some(METHOD_USER_PASS)
        } else {
            methods.contains(&METHOD_NO_AUTH).then_some(METHOD_NO_AUTH)
        };

        match selected {
            Some(METHOD_NO_AUTH) => (AuthState::Success, Some(vec![VERSION, METHOD_NO_AUTH])),
            Some(METHOD_USER_PASS) => (
                AuthState::WaitUserPassAuth,
                Some(vec![VERSION, METHOD_USER_PASS]),
            ),
            _ => (
                AuthState::Failed,
                Some(vec![VERSION, METHOD_NO_ACCEPTABLE]),
            ),
        }
    }

    /// Processes one decrypted username/password sub-negotiation frame.
    pub fn validate_user_pass(&self, plaintext: &[u8]) -> (AuthState, Option<Vec<u8>>) {
        let size = plaintext.len();
        if size < 2 {
            return (AuthState::Incomplete, None);
        }
        if plaintext[0] != USER_PASS_VERSION {
            return (AuthState::Error, None);
        }
        let ulen = plaintext[1] as usize;
        if size < 3 + ulen {
            return (AuthState::Incomplete, None);
        }
        let plen = plaintext[2 + ulen] as usize;
        if size < 3 + ulen + plen {
            return (AuthState::Incomplete, None);
        }
        if size > 3 + ulen + plen {
            return (AuthState::Error, None);
        }

        let username = &plaintext[2..2 + ulen];
        let password = &plaintext[3 + ulen..3 + ulen + plen];

        let matches = self
            .credentials
            .as_ref()
            .map(|(u, p)| u.as_bytes() == username && p.as_bytes() == password)
            .unwrap_or(false);

        if matches {
            (
                AuthState::Success,
                Some(vec![USER_PASS_VERSION, USER_PASS_SUCCESS]),
            )
        } else {
            (
                AuthState::Failed,
                Some(vec![USER_PASS_VERSION, USER_PASS_FAILURE]),
            )
        }
    }
}
