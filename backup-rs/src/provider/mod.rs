//! Mail source seam
//!
//! The engine that talks to the actual mail service (IMAP, OAuth, rate
//! limits) lives outside this codebase; the backup queue and the discovery
//! endpoint only see this trait. The shipped implementation drains local
//! maildir-style drop directories, which is what the test suite and
//! air-gapped deployments use.

use anyhow::Result;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

#[cfg_attr(test, mockall::automock)]
#[axum::async_trait]
pub trait MailProvider: Send + Sync {
    /// Mailbox addresses that exist for a domain.
    async fn discover_users(&self, domain: &str) -> Result<Vec<String>>;

    /// Fetch (and consume) the new raw messages for a mailbox.
    async fn fetch_messages(&self, email: &str) -> Result<Vec<Vec<u8>>>;
}

/// Drop-directory provider: one directory per mailbox under the incoming
/// root, each holding raw `.eml` files. Fetching removes the files.
pub struct MaildirProvider {
    incoming_root: PathBuf,
}

impl MaildirProvider {
    pub fn new(incoming_root: PathBuf) -> Self {
        Self { incoming_root }
    }
}

#[axum::async_trait]
impl MailProvider for MaildirProvider {
    async fn discover_users(&self, domain: &str) -> Result<Vec<String>> {
        let suffix = format!("@{}", domain);
        let mut users = Vec::new();

        if !self.incoming_root.exists() {
            return Ok(users);
        }

        for entry in fs::read_dir(&self.incoming_root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if entry.path().is_dir() && name.ends_with(&suffix) {
                users.push(name);
            }
        }

        users.sort();
        Ok(users)
    }

    async fn fetch_messages(&self, email: &str) -> Result<Vec<Vec<u8>>> {
        let mailbox_dir = self.incoming_root.join(email);
        let mut messages = Vec::new();

        if !mailbox_dir.exists() {
            return Ok(messages);
        }

        for entry in fs::read_dir(&mailbox_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_file() {
                messages.push(fs::read(&path)?);
                fs::remove_file(&path)?;
            }
        }

        debug!("Fetched {} messages for {}", messages.len(), email);
        Ok(messages)
    }
}
