//! SSH key bookkeeping inside metadata bags.
//!
//! Keys live in a single metadata value as newline-separated
//! `<user>:<public key>` lines. Two keys can carry them on an instance:
//! the legacy `sshKeys` entry, which overrides the project-wide list, and
//! the newer `ssh-keys` entry, which is unioned with it. A project only ever
//! uses the legacy key.

use crate::error::GshError;
use crate::metadata::MetadataBag;
use crate::prompt::Confirm;

pub const SSH_KEYS_LEGACY_METADATA_KEY: &str = "sshKeys";
pub const SSH_KEYS_METADATA_KEY: &str = "ssh-keys";
pub const SSH_KEYS_BLOCK_METADATA_KEY: &str = "block-project-ssh-keys";

pub const MAX_METADATA_VALUE_SIZE_IN_BYTES: usize = 32768;
pub const SSH_KEY_PROPAGATION_TIMEOUT_SECONDS: u64 = 60;

/// Which of the two key-bearing metadata entries to operate on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyVariant {
    /// `sshKeys`: overrides project keys on an instance.
    Legacy,
    /// `ssh-keys`: unioned with project keys.
    Iam,
}

pub fn select_metadata_key(variant: KeyVariant) -> &'static str {
    match variant {
        KeyVariant::Legacy => SSH_KEYS_LEGACY_METADATA_KEY,
        KeyVariant::Iam => SSH_KEYS_METADATA_KEY,
    }
}

/// The key lines stored under `variant`, trimmed, without blanks.
pub fn extract_key_entries(bag: Option<&MetadataBag>, variant: KeyVariant) -> Vec<String> {
    let Some(value) = bag.and_then(|b| b.get(select_metadata_key(variant))) else {
        return Vec::new();
    };
    value
        .split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn has_block_project_keys_flag(bag: Option<&MetadataBag>) -> bool {
    bag.and_then(|b| b.get(SSH_KEYS_BLOCK_METADATA_KEY))
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

/// Byte ceiling for a serialized key list.
#[derive(Debug, Clone, Copy)]
pub struct KeyBudget {
    pub max_bytes: usize,
}

impl Default for KeyBudget {
    fn default() -> Self {
        Self {
            max_bytes: MAX_METADATA_VALUE_SIZE_IN_BYTES,
        }
    }
}

impl KeyBudget {
    /// Join `entries` with newlines, evicting from the head until the result
    /// fits.
    ///
    /// Every entry is charged its length plus one separator byte, so the
    /// joined value always stays strictly under `max_bytes`. Once an entry is
    /// rejected, all older ones are rejected as well. The user is asked to
    /// confirm each eviction; declining cancels the operation.
    pub fn build_value(
        &self,
        entries: &[String],
        confirm: &dyn Confirm,
    ) -> Result<String, GshError> {
        let mut kept: Vec<&str> = Vec::with_capacity(entries.len());
        let mut consumed = 0usize;
        let mut full = false;

        for entry in entries.iter().rev() {
            let cost = entry.len() + 1;
            if !full && consumed + cost <= self.max_bytes {
                consumed += cost;
                kept.push(entry);
                continue;
            }
            full = true;
            let message = format!(
                "The following SSH key will be removed from your metadata because the \
                 SSH keys metadata value has reached its maximum allowed size of {} bytes: {}",
                self.max_bytes, entry
            );
            if !confirm.confirm(&message)? {
                return Err(GshError::Cancelled);
            }
            tracing::info!(key = %entry, max_bytes = self.max_bytes, "evicting ssh key");
        }

        kept.reverse();
        Ok(kept.join("\n"))
    }

    /// Make sure `<user>:<public_key>` is listed under `variant`.
    ///
    /// Returns `true` if the bag was changed. A second call with the same
    /// arguments is a no-op. An entry that can never fit the budget is an
    /// error, raised before any prompt and with the bag untouched.
    pub fn upsert_key_entry(
        &self,
        bag: &mut MetadataBag,
        user: &str,
        public_key: &str,
        variant: KeyVariant,
        confirm: &dyn Confirm,
    ) -> Result<bool, GshError> {
        let entry = format!("{user}:{public_key}");
        let mut entries = extract_key_entries(Some(bag), variant);
        if entries.iter().any(|e| *e == entry) {
            return Ok(false);
        }
        if entry.len() + 1 > self.max_bytes {
            return Err(GshError::Key {
                message: format!(
                    "the key entry for {user} is {} bytes, which does not fit the \
                     {}-byte SSH keys metadata limit",
                    entry.len(),
                    self.max_bytes
                ),
            });
        }
        entries.push(entry);
        let value = self.build_value(&entries, confirm)?;
        bag.insert(select_metadata_key(variant), value);
        Ok(true)
    }
}
