//! Interactive credential prompting.
//!
//! Used when error analysis flags a credential failure and the behavior
//! profile allows pausing for input.  Storage of credentials is out of
//! scope here; callers decide what to do with the pair.

use std::io::{BufRead, Write};

use anyhow::{Context, Result};
use tracing::info;

#[derive(Debug, Default)]
pub struct CredentialPrompter;

impl CredentialPrompter {
    pub fn new() -> Self {
        Self
    }

    /// Prompt for a username/password pair for `service` on `host`.
    /// Returns `None` when the user aborts with an empty username.
    pub fn prompt(&self, service: &str, host: &str) -> Result<Option<(String, String)>> {
        let mut stdout = std::io::stdout();
        write!(stdout, "Username for {service} on {host} (empty to cancel): ")
            .context("writing credential prompt")?;
        stdout.flush().context("flushing credential prompt")?;

        let mut username = String::new();
        std::io::stdin()
            .lock()
            .read_line(&mut username)
            .context("reading username")?;
        let username = username.trim().to_string();
        if username.is_empty() {
            info!("credential prompt cancelled");
            return Ok(None);
        }

        let password = rpassword::prompt_password(format!("Password for {username}@{host}: "))
            .context("reading password")?;
        Ok(Some((username, password)))
    }
}
