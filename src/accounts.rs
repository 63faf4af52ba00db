//! Account-service key registration, the alternative to metadata keys.
//!
//! Users are keyed by the owner email of the authenticated account. Every
//! failure in here surfaces as [`GshError::AccountService`] so the caller can
//! fall back to metadata.

use facet::Facet;
use reqwest::{Client, RequestBuilder};

use crate::compute::rest::operation_result;
use crate::compute::wire::{ErrorBody, Operation};
use crate::error::GshError;
use crate::keys::format_entry;
use crate::util::{parse_rfc3339, unix_now};

pub const DEFAULT_ACCOUNTS_ENDPOINT: &str = "https://www.googleapis.com/clouduseraccounts/beta";

#[derive(Debug, Clone, Default, PartialEq, Eq, Facet)]
#[facet(default)]
pub struct PublicKeyRecord {
    #[facet(default, rename = "key")]
    pub value: String,
    #[facet(default)]
    pub fingerprint: String,
    #[facet(default, rename = "expirationTimestamp")]
    pub expiration_timestamp: String,
}

impl PublicKeyRecord {
    /// Keys without an expiration never expire; unparseable ones count as
    /// expired so they get replaced.
    pub fn is_expired(&self, now: u64) -> bool {
        if self.expiration_timestamp.is_empty() {
            return false;
        }
        parse_rfc3339(&self.expiration_timestamp).is_none_or(|t| t <= now)
    }
}

#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
pub struct UserRecord {
    #[facet(default)]
    pub name: String,
    #[facet(default)]
    pub owner: String,
    #[facet(default, rename = "publicKeys")]
    pub public_keys: Vec<PublicKeyRecord>,
}

#[allow(async_fn_in_trait)] // trait is internal-only
pub trait AccountService {
    async fn lookup_user(&self, email: &str) -> Result<Option<UserRecord>, GshError>;
    async fn create_user(&self, email: &str, user: &UserRecord) -> Result<UserRecord, GshError>;
    async fn upload_public_key(&self, email: &str, key: &str) -> Result<(), GshError>;
    async fn remove_public_key(&self, email: &str, fingerprint: &str) -> Result<(), GshError>;
}

/// Account name for an owner email: lowercased local part, restricted to
/// `[a-z0-9_-]`.
pub fn user_name_for(email: &str) -> String {
    let local = email.split('@').next().unwrap_or(email);
    local
        .chars()
        .map(|c| c.to_ascii_lowercase())
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

/// Register `public_key` for `email`, creating the user first if needed.
///
/// Returns `true` if a key was uploaded (and so may still be propagating).
pub async fn import_key<A: AccountService>(
    accounts: &A,
    email: &str,
    public_key: &str,
) -> Result<bool, GshError> {
    let user = match accounts.lookup_user(email).await? {
        Some(user) => user,
        None => {
            tracing::info!(%email, "creating account-service user");
            let record = UserRecord {
                name: user_name_for(email),
                owner: email.to_string(),
                public_keys: Vec::new(),
            };
            accounts.create_user(email, &record).await?
        }
    };

    let wanted = format_entry(public_key, false)?;
    let now = unix_now();
    let existing = user
        .public_keys
        .iter()
        .find(|k| format_entry(&k.value, false).is_ok_and(|v| v == wanted));

    match existing {
        Some(key) if !key.is_expired(now) => {
            tracing::debug!(fingerprint = %key.fingerprint, "key already registered");
            return Ok(false);
        }
        Some(key) => {
            tracing::info!(fingerprint = %key.fingerprint, "replacing expired key");
            accounts.remove_public_key(email, &key.fingerprint).await?;
        }
        None => {}
    }

    accounts.upload_public_key(email, public_key).await?;
    Ok(true)
}

// ── REST implementation ───────────────────────────────────

pub struct RestAccounts {
    client: Client,
    endpoint: String,
    project: String,
    token: Option<String>,
}

impl RestAccounts {
    pub fn new(endpoint: &str, project: &str, token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            project: project.to_string(),
            token,
        }
    }

    fn users_url(&self) -> String {
        format!("{}/projects/{}/global/users", self.endpoint, self.project)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<(u16, String), GshError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| account_error(format!("request failed: {e}")))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| account_error(format!("reading response failed: {e}")))?;
        Ok((status, text))
    }

    async fn mutate(&self, request: RequestBuilder) -> Result<(), GshError> {
        let (status, text) = self.send(request).await?;
        check_status(status, &text)?;
        let mut operation: Operation = facet_json::from_str(&text)
            .map_err(|e| account_error(format!("unexpected response: {e}")))?;
        while operation.status != "DONE" && !operation.self_link.is_empty() {
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
            let (status, text) = self.send(self.client.get(&operation.self_link)).await?;
            check_status(status, &text)?;
            operation = facet_json::from_str(&text)
                .map_err(|e| account_error(format!("unexpected response: {e}")))?;
        }
        operation_result("users", &operation).map_err(|e| account_error(e.to_string()))
    }
}

impl AccountService for RestAccounts {
    async fn lookup_user(&self, email: &str) -> Result<Option<UserRecord>, GshError> {
        let url = format!("{}/{}", self.users_url(), user_name_for(email));
        let (status, text) = self.send(self.client.get(&url)).await?;
        if status == 404 {
            return Ok(None);
        }
        check_status(status, &text)?;
        let user: UserRecord = facet_json::from_str(&text)
            .map_err(|e| account_error(format!("unexpected response: {e}")))?;
        Ok(Some(user))
    }

    async fn create_user(&self, email: &str, user: &UserRecord) -> Result<UserRecord, GshError> {
        let body = facet_json::to_string(user)
            .map_err(|e| account_error(format!("failed to encode user: {e}")))?;
        self.mutate(
            self.client
                .post(self.users_url())
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body),
        )
        .await?;
        self.lookup_user(email)
            .await?
            .ok_or_else(|| account_error(format!("user for {email} missing after creation")))
    }

    async fn upload_public_key(&self, email: &str, key: &str) -> Result<(), GshError> {
        let record = PublicKeyRecord {
            value: key.to_string(),
            ..Default::default()
        };
        let body = facet_json::to_string(&record)
            .map_err(|e| account_error(format!("failed to encode key: {e}")))?;
        let url = format!("{}/{}/addPublicKey", self.users_url(), user_name_for(email));
        self.mutate(
            self.client
                .post(url)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body),
        )
        .await
    }

    async fn remove_public_key(&self, email: &str, fingerprint: &str) -> Result<(), GshError> {
        let url = format!("{}/{}/removePublicKey", self.users_url(), user_name_for(email));
        self.mutate(self.client.post(url).query(&[("fingerprint", fingerprint)]))
            .await
    }
}

fn check_status(status: u16, text: &str) -> Result<(), GshError> {
    if (200..300).contains(&status) {
        return Ok(());
    }
    let message = match facet_json::from_str::<ErrorBody>(text) {
        Ok(body) if !body.error.message.is_empty() => body.error.message,
        _ => format!("HTTP {status}"),
    };
    Err(account_error(message))
}

fn account_error(message: impl Into<String>) -> GshError {
    GshError::AccountService {
        message: message.into(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::cell::RefCell;
    use std::collections::HashMap;

    use super::*;

    #[derive(Default)]
    pub(crate) struct FakeAccounts {
        pub users: RefCell<HashMap<String, UserRecord>>,
        pub unavailable: bool,
        pub uploads: RefCell<Vec<String>>,
        pub removals: RefCell<Vec<String>>,
    }

    impl FakeAccounts {
        pub fn unavailable() -> Self {
            Self {
                unavailable: true,
                ..Default::default()
            }
        }

        fn check(&self) -> Result<(), GshError> {
            if self.unavailable {
                return Err(account_error("API not enabled for project"));
            }
            Ok(())
        }
    }

    impl AccountService for FakeAccounts {
        async fn lookup_user(&self, email: &str) -> Result<Option<UserRecord>, GshError> {
            self.check()?;
            Ok(self.users.borrow().get(email).cloned())
        }

        async fn create_user(&self, email: &str, user: &UserRecord) -> Result<UserRecord, GshError> {
            self.check()?;
            self.users.borrow_mut().insert(email.to_string(), user.clone());
            Ok(user.clone())
        }

        async fn upload_public_key(&self, email: &str, key: &str) -> Result<(), GshError> {
            self.check()?;
            self.uploads.borrow_mut().push(key.to_string());
            if let Some(user) = self.users.borrow_mut().get_mut(email) {
                user.public_keys.push(PublicKeyRecord {
                    value: key.to_string(),
                    fingerprint: format!("fp-{}", user.public_keys.len()),
                    expiration_timestamp: String::new(),
                });
            }
            Ok(())
        }

        async fn remove_public_key(&self, email: &str, fingerprint: &str) -> Result<(), GshError> {
            self.check()?;
            self.removals.borrow_mut().push(fingerprint.to_string());
            if let Some(user) = self.users.borrow_mut().get_mut(email) {
                user.public_keys.retain(|k| k.fingerprint != fingerprint);
            }
            Ok(())
        }
    }

    const KEY: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAITest dana";

    #[test]
    fn user_names_from_email() {
        assert_eq!(user_name_for("Dana.Smith@example.com"), "dana_smith");
        assert_eq!(user_name_for("svc-1@proj.iam.gserviceaccount.com"), "svc-1");
    }

    #[test]
    fn expiry_rules() {
        let now = parse_rfc3339("2026-01-01T00:00:00Z").unwrap();
        let mut key = PublicKeyRecord::default();
        assert!(!key.is_expired(now));
        key.expiration_timestamp = "2030-01-01T00:00:00Z".into();
        assert!(!key.is_expired(now));
        key.expiration_timestamp = "2020-01-01T00:00:00Z".into();
        assert!(key.is_expired(now));
        key.expiration_timestamp = "garbage".into();
        assert!(key.is_expired(now));
    }

    #[tokio::test]
    async fn import_creates_user_and_uploads() {
        let accounts = FakeAccounts::default();
        let added = import_key(&accounts, "dana@example.com", KEY).await.unwrap();
        assert!(added);
        assert_eq!(accounts.users.borrow()["dana@example.com"].name, "dana");
        assert_eq!(accounts.uploads.borrow().as_slice(), [KEY]);
    }

    #[tokio::test]
    async fn import_reuses_unexpired_key() {
        let accounts = FakeAccounts::default();
        import_key(&accounts, "dana@example.com", KEY).await.unwrap();
        // Comment differences do not matter.
        let added = import_key(
            &accounts,
            "dana@example.com",
            "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAITest other-comment",
        )
        .await
        .unwrap();
        assert!(!added);
        assert_eq!(accounts.uploads.borrow().len(), 1);
    }

    #[tokio::test]
    async fn import_replaces_expired_key() {
        let accounts = FakeAccounts::default();
        accounts.users.borrow_mut().insert(
            "dana@example.com".into(),
            UserRecord {
                name: "dana".into(),
                owner: "dana@example.com".into(),
                public_keys: vec![PublicKeyRecord {
                    value: KEY.into(),
                    fingerprint: "old-fp".into(),
                    expiration_timestamp: "2001-01-01T00:00:00Z".into(),
                }],
            },
        );
        let added = import_key(&accounts, "dana@example.com", KEY).await.unwrap();
        assert!(added);
        assert_eq!(accounts.removals.borrow().as_slice(), ["old-fp"]);
        assert_eq!(accounts.uploads.borrow().len(), 1);
    }

    #[tokio::test]
    async fn import_surfaces_account_errors() {
        let err = import_key(&FakeAccounts::unavailable(), "dana@example.com", KEY)
            .await
            .unwrap_err();
        assert!(matches!(err, GshError::AccountService { .. }));
    }
}
