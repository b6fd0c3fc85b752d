// Credential lookup for remote collaborators
//
// Tokens are resolved from:
// 1. System keychain (service "rcaledger", account "token/<name>")
// 2. Environment variable RCALEDGER_<NAME>_TOKEN (CI/headless)
//
// Tokens are NEVER stored in config.toml; the config only names the credential.

use std::env;

const KEYCHAIN_SERVICE: &str = "rcaledger";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    Keychain,
    Environment,
    None,
}

impl TokenSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenSource::Keychain => "keychain",
            TokenSource::Environment => "environment",
            TokenSource::None => "none",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TokenLookup {
    pub token: Option<String>,
    pub source: TokenSource,
}

/// `github` -> `RCALEDGER_GITHUB_TOKEN`. Non-alphanumerics become `_`.
pub fn env_var_name(credential: &str) -> String {
    let upper: String = credential
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("RCALEDGER_{}_TOKEN", upper)
}

#[cfg_attr(not(feature = "keychain"), allow(dead_code))]
fn keychain_account(credential: &str) -> String {
    format!("token/{}", credential.to_lowercase())
}

/// Resolve the token for a named credential.
pub fn get_token(credential: &str) -> TokenLookup {
    #[cfg(feature = "keychain")]
    {
        if let Ok(entry) = keyring::Entry::new(KEYCHAIN_SERVICE, &keychain_account(credential)) {
            if let Ok(token) = entry.get_password() {
                return TokenLookup {
                    token: Some(token),
                    source: TokenSource::Keychain,
                };
            }
        }
    }

    if let Ok(token) = env::var(env_var_name(credential)) {
        if !token.trim().is_empty() {
            return TokenLookup {
                token: Some(token),
                source: TokenSource::Environment,
            };
        }
    }

    TokenLookup {
        token: None,
        source: TokenSource::None,
    }
}

/// Like [`get_token`] but a missing token is an error naming where to put it.
pub fn require_token(credential: &str) -> Result<String, String> {
    get_token(credential).token.ok_or_else(|| {
        format!(
            "no token for credential '{}': set {} or store it with `rcaledger credential set {}`",
            credential,
            env_var_name(credential),
            credential
        )
    })
}

#[cfg(feature = "keychain")]
pub fn set_token(credential: &str, token: &str) -> Result<(), String> {
    let entry = keyring::Entry::new(KEYCHAIN_SERVICE, &keychain_account(credential))
        .map_err(|e| format!("Failed to create keychain entry: {}", e))?;
    entry
        .set_password(token)
        .map_err(|e| format!("Failed to store token in keychain: {}", e))
}

#[cfg(not(feature = "keychain"))]
pub fn set_token(_credential: &str, _token: &str) -> Result<(), String> {
    Err("Keychain support not enabled. Set RCALEDGER_<NAME>_TOKEN instead.".to_string())
}

#[cfg(feature = "keychain")]
pub fn delete_token(credential: &str) -> Result<(), String> {
    let entry = keyring::Entry::new(KEYCHAIN_SERVICE, &keychain_account(credential))
        .map_err(|e| format!("Failed to access keychain entry: {}", e))?;
    entry
        .delete_credential()
        .map_err(|e| format!("Failed to delete token from keychain: {}", e))
}

#[cfg(not(feature = "keychain"))]
pub fn delete_token(_credential: &str) -> Result<(), String> {
    Err("Keychain support not enabled.".to_string())
}
