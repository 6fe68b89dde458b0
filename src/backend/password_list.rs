use crate::config::ToolsConfig;
use tracing::{debug, warn};

/// Password list collector for archive extraction
///
/// Collects passwords from multiple sources in priority order:
/// 1. Run passwords (command line / config)
/// 2. Global password file (one password per line)
/// 3. Empty password (optional fallback)
#[derive(Debug, Clone, Default)]
pub struct PasswordList {
    passwords: Vec<String>,
}

impl PasswordList {
    /// Collect passwords from all configured sources, de-duplicated, in priority order
    pub async fn collect(tools: &ToolsConfig) -> Self {
        let mut passwords: Vec<String> = Vec::new();

        for pw in &tools.passwords {
            if !passwords.contains(pw) {
                passwords.push(pw.clone());
            }
        }

        if let Some(path) = &tools.password_file {
            match tokio::fs::read_to_string(path).await {
                Ok(file_content) => {
                    for line in file_content.lines() {
                        let pw = line.trim();
                        if !pw.is_empty() && !passwords.iter().any(|p| p == pw) {
                            passwords.push(pw.to_string());
                        }
                    }
                }
                Err(e) => warn!(?path, error = %e, "cannot read password file, ignoring it"),
            }
        }

        // Empty password last
        if tools.try_empty_password && !passwords.iter().any(|p| p.is_empty()) {
            passwords.push(String::new());
        }

        debug!(
            "collected {} unique passwords for extraction",
            passwords.len()
        );

        Self { passwords }
    }

    /// Build a list from explicit passwords, kept in the given order
    pub fn new(passwords: Vec<String>) -> Self {
        Self { passwords }
    }

    /// Get an iterator over passwords
    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.passwords.iter()
    }

    /// Check if there are any passwords to try
    pub fn is_empty(&self) -> bool {
        self.passwords.is_empty()
    }

    /// Get the number of passwords
    pub fn len(&self) -> usize {
        self.passwords.len()
    }
}
