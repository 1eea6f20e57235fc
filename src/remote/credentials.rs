//! Credential shapes accepted by remote build servers

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::fmt;

/// A parsed credential, attached to every request as an Authorization header
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// `user:token`, sent as HTTP Basic
    Basic { user: String, token: String },
    /// Anything without a colon, sent as a bearer token
    Bearer(String),
}

impl Credential {
    /// Parse a raw credential string
    pub fn parse(raw: &str) -> Self {
        match raw.split_once(':') {
            Some((user, token)) => Credential::Basic {
                user: user.to_string(),
                token: token.to_string(),
            },
            None => Credential::Bearer(raw.to_string()),
        }
    }

    /// Value for the Authorization header
    pub fn header_value(&self) -> String {
        match self {
            Credential::Basic { user, token } => {
                format!("Basic {}", STANDARD.encode(format!("{}:{}", user, token)))
            }
            Credential::Bearer(token) => format!("Bearer {}", token),
        }
    }
}

// Never print secrets
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Basic { user, .. } => write!(f, "Basic({}:***)", user),
            Credential::Bearer(_) => f.write_str("Bearer(***)"),
        }
    }
}
