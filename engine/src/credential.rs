use std::fmt;

/// The user's Replicate API token. Never validated, only checked for being
/// blank before a request is made.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Value for the `Authorization` header
    pub fn header_value(&self) -> String {
        format!("Token {}", self.0.trim())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_blank() {
            f.write_str("Credential(<blank>)")
        } else {
            f.write_str("Credential(***)")
        }
    }
}
