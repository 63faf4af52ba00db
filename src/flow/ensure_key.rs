//! Deciding where the caller's public key goes, and putting it there.
//!
//! Order of attempts for one invocation:
//! account service (if enabled) → project metadata → instance metadata.
//! Nothing carries over between invocations.

use crate::accounts::{self, AccountService};
use crate::compute::{ComputeApi, Instance, InstanceRef};
use crate::config::Context;
use crate::error::GshError;
use crate::progress;
use crate::prompt::Confirm;
use crate::ssh_keys::{KeyVariant, has_block_project_keys_flag, select_metadata_key};

/// The key entry to install: `<user>:<public_key>`.
#[derive(Debug, Clone, Copy)]
pub struct KeyRequest<'a> {
    pub user: &'a str,
    /// Public key with comment, as produced by `KeyStore::to_entry(true)`.
    pub public_key: &'a str,
}

/// Result of one placement attempt.
#[derive(Debug)]
pub enum KeyOutcome {
    Ready { added: bool },
    /// Writing project metadata failed; the key can still go on the instance.
    ProjectWriteFailed { project: String, error: GshError },
    /// The account service could not take the key; metadata is next.
    AccountServiceFailed { error: GshError },
}

/// Make sure the key is in the project-wide metadata.
///
/// Reading project metadata failing is fatal. Writing it failing is reported
/// as [`KeyOutcome::ProjectWriteFailed`] so the caller can fall back.
pub async fn ensure_key_in_project<C: ComputeApi>(
    ctx: &Context,
    api: &C,
    key: KeyRequest<'_>,
    confirm: &dyn Confirm,
) -> Result<KeyOutcome, GshError> {
    let mut bag = api.get_project_metadata(&ctx.project).await?;
    let added =
        ctx.budget
            .upsert_key_entry(&mut bag, key.user, key.public_key, KeyVariant::Legacy, confirm)?;
    if !added {
        tracing::debug!(project = %ctx.project, "key already in project metadata");
        return Ok(KeyOutcome::Ready { added: false });
    }

    let label = format!("Updating project ssh metadata [{}]", ctx.project);
    match progress::scoped(ctx.mode, &label, api.set_project_metadata(&ctx.project, &bag)).await {
        Ok(()) => {
            tracing::info!(project = %ctx.project, user = key.user, "added key to project metadata");
            Ok(KeyOutcome::Ready { added: true })
        }
        Err(error) => Ok(KeyOutcome::ProjectWriteFailed {
            project: ctx.project.clone(),
            error,
        }),
    }
}

/// Make sure the key is in the instance's own metadata under `variant`.
///
/// Any failure here is fatal.
pub async fn ensure_key_in_instance<C: ComputeApi>(
    ctx: &Context,
    api: &C,
    instance: &InstanceRef,
    variant: KeyVariant,
    key: KeyRequest<'_>,
    confirm: &dyn Confirm,
) -> Result<bool, GshError> {
    let mut bag = api.get_instance(instance).await?.metadata;
    let added = ctx
        .budget
        .upsert_key_entry(&mut bag, key.user, key.public_key, variant, confirm)?;
    if !added {
        tracing::debug!(%instance, "key already in instance metadata");
        return Ok(false);
    }

    let label = format!("Updating instance ssh metadata [{}]", instance.name);
    progress::scoped(ctx.mode, &label, api.set_instance_metadata(instance, &bag))
        .await
        .map_err(|e| match e {
            GshError::Api {
                resource,
                status,
                message,
            } => GshError::Api {
                resource,
                status,
                message: format!("could not add SSH key to instance metadata: {message}"),
            },
            other => other,
        })?;
    tracing::info!(
        %instance,
        key = select_metadata_key(variant),
        user = key.user,
        "added key to instance metadata"
    );
    Ok(true)
}

async fn try_account_service<A: AccountService>(
    ctx: &Context,
    accounts: &A,
    key: KeyRequest<'_>,
) -> KeyOutcome {
    let Some(email) = ctx.account.as_deref() else {
        return KeyOutcome::AccountServiceFailed {
            error: GshError::AccountService {
                message: "no account configured (set core.account)".into(),
            },
        };
    };
    let label = format!("Registering ssh key for [{email}]");
    match progress::scoped(ctx.mode, &label, accounts::import_key(accounts, email, key.public_key))
        .await
    {
        Ok(added) => KeyOutcome::Ready { added },
        Err(error) => KeyOutcome::AccountServiceFailed { error },
    }
}

/// Put the key wherever it will be honoured for `instance`.
///
/// `instance` is the already-fetched target; its metadata decides whether
/// project keys are blocked. Returns `true` if a key was added anywhere, in
/// which case the caller should allow time for propagation.
pub async fn ensure_ssh_key_exists<C: ComputeApi, A: AccountService>(
    ctx: &Context,
    api: &C,
    accounts: &A,
    target: &InstanceRef,
    instance: &Instance,
    key: KeyRequest<'_>,
    confirm: &dyn Confirm,
) -> Result<bool, GshError> {
    if ctx.use_account_service {
        match try_account_service(ctx, accounts, key).await {
            KeyOutcome::Ready { added } => return Ok(added),
            KeyOutcome::AccountServiceFailed { error }
            | KeyOutcome::ProjectWriteFailed { error, .. } => {
                tracing::warn!("account service unavailable, using metadata instead: {error}");
            }
        }
    }

    if has_block_project_keys_flag(Some(&instance.metadata)) {
        tracing::info!(%target, "project ssh keys are blocked, using instance metadata");
        return ensure_key_in_instance(ctx, api, target, KeyVariant::Legacy, key, confirm).await;
    }

    match ensure_key_in_project(ctx, api, key, confirm).await? {
        KeyOutcome::Ready { added } => Ok(added),
        KeyOutcome::ProjectWriteFailed { project, error } => {
            let error = GshError::SetProjectMetadata {
                project,
                message: error.to_string(),
            };
            tracing::warn!("{error}; adding the key to instance metadata instead");
            ensure_key_in_instance(ctx, api, target, KeyVariant::Iam, key, confirm).await
        }
        KeyOutcome::AccountServiceFailed { error } => Err(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::tests::FakeAccounts;
    use crate::compute::fake::FakeCompute;
    use crate::config::tests::test_context;
    use crate::metadata::MetadataBag;
    use crate::ssh_keys::KeyBudget;
    use crate::ssh_keys::tests::Recorder;

    const ALICE_KEY: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIAlice alice@laptop";

    fn target(name: &str) -> InstanceRef {
        InstanceRef {
            project: "myproj".into(),
            zone: "us-central1-a".into(),
            name: name.into(),
        }
    }

    fn instance_with(bag: MetadataBag) -> Instance {
        Instance {
            id: "42".into(),
            name: "vm".into(),
            status: "RUNNING".into(),
            metadata: bag,
            network_interfaces: Vec::new(),
        }
    }

    fn alice() -> KeyRequest<'static> {
        KeyRequest {
            user: "alice",
            public_key: ALICE_KEY,
        }
    }

    #[tokio::test]
    async fn project_without_keys_gets_one_entry() {
        let ctx = test_context();
        let api = FakeCompute::default();

        let outcome = ensure_key_in_project(&ctx, &api, alice(), &Recorder::yes())
            .await
            .unwrap();
        assert!(matches!(outcome, KeyOutcome::Ready { added: true }));

        let bag = api.project_bag("myproj");
        assert_eq!(bag.len(), 1);
        assert_eq!(bag.get("sshKeys"), Some(format!("alice:{ALICE_KEY}").as_str()));
    }

    #[tokio::test]
    async fn existing_key_is_left_alone() {
        let ctx = test_context();
        let existing = format!("alice:{ALICE_KEY}\nbob:ssh-rsa BBBB bob");
        let api = FakeCompute::default().with_project(
            "myproj",
            [("sshKeys", existing.as_str())].into_iter().collect(),
        );

        let outcome = ensure_key_in_project(&ctx, &api, alice(), &Recorder::yes())
            .await
            .unwrap();
        assert!(matches!(outcome, KeyOutcome::Ready { added: false }));
        assert_eq!(*api.project_writes.borrow(), 0);
        assert_eq!(api.project_bag("myproj").get("sshKeys"), Some(existing.as_str()));
    }

    #[tokio::test]
    async fn project_write_failure_is_an_outcome() {
        let ctx = test_context();
        let api = FakeCompute {
            deny_project_writes: true,
            ..Default::default()
        };
        let outcome = ensure_key_in_project(&ctx, &api, alice(), &Recorder::yes())
            .await
            .unwrap();
        match outcome {
            KeyOutcome::ProjectWriteFailed { project, error } => {
                assert_eq!(project, "myproj");
                assert!(error.to_string().contains("permission"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn blocked_project_keys_write_only_instance() {
        let ctx = test_context();
        let bag: MetadataBag = [("block-project-ssh-keys", "true")].into_iter().collect();
        let instance = instance_with(bag);
        let api = FakeCompute::default().with_instance("carol-vm", instance.clone());
        let key = KeyRequest {
            user: "carol",
            public_key: "ssh-ed25519 CCCC carol",
        };

        let added = ensure_ssh_key_exists(
            &ctx,
            &api,
            &FakeAccounts::default(),
            &target("carol-vm"),
            &instance,
            key,
            &Recorder::yes(),
        )
        .await
        .unwrap();

        assert!(added);
        assert_eq!(*api.project_writes.borrow(), 0);
        assert!(api.projects.borrow().is_empty());
        let bag = api.instance_bag("carol-vm");
        assert_eq!(bag.get("sshKeys"), Some("carol:ssh-ed25519 CCCC carol"));
        assert_eq!(bag.get("block-project-ssh-keys"), Some("true"));
    }

    #[tokio::test]
    async fn project_denied_falls_back_to_instance_iam_key() {
        let ctx = test_context();
        let instance = instance_with(MetadataBag::new());
        let api = FakeCompute {
            deny_project_writes: true,
            ..Default::default()
        }
        .with_instance("vm", instance.clone());

        let added = ensure_ssh_key_exists(
            &ctx,
            &api,
            &FakeAccounts::default(),
            &target("vm"),
            &instance,
            alice(),
            &Recorder::yes(),
        )
        .await
        .unwrap();

        assert!(added);
        assert_eq!(*api.project_writes.borrow(), 1);
        let bag = api.instance_bag("vm");
        assert_eq!(bag.get("ssh-keys"), Some(format!("alice:{ALICE_KEY}").as_str()));
        assert!(!bag.contains_key("sshKeys"));
    }

    #[tokio::test]
    async fn instance_write_failure_is_fatal() {
        let ctx = test_context();
        let bag: MetadataBag = [("block-project-ssh-keys", "TRUE")].into_iter().collect();
        let instance = instance_with(bag);
        // Not registered with the fake, so both the re-read and write fail.
        let api = FakeCompute::default();

        let err = ensure_ssh_key_exists(
            &ctx,
            &api,
            &FakeAccounts::default(),
            &target("ghost"),
            &instance,
            alice(),
            &Recorder::yes(),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("instances/ghost"));
    }

    #[tokio::test]
    async fn account_service_success_skips_metadata() {
        let mut ctx = test_context();
        ctx.use_account_service = true;
        let instance = instance_with(MetadataBag::new());
        let api = FakeCompute::default().with_instance("vm", instance.clone());
        let accounts = FakeAccounts::default();

        let added = ensure_ssh_key_exists(
            &ctx,
            &api,
            &accounts,
            &target("vm"),
            &instance,
            alice(),
            &Recorder::yes(),
        )
        .await
        .unwrap();

        assert!(added);
        assert_eq!(accounts.uploads.borrow().len(), 1);
        assert_eq!(*api.project_writes.borrow(), 0);
        assert_eq!(*api.instance_writes.borrow(), 0);
    }

    #[tokio::test]
    async fn account_service_failure_falls_through_to_project() {
        let mut ctx = test_context();
        ctx.use_account_service = true;
        let instance = instance_with(MetadataBag::new());
        let api = FakeCompute::default().with_instance("vm", instance.clone());

        let added = ensure_ssh_key_exists(
            &ctx,
            &api,
            &FakeAccounts::unavailable(),
            &target("vm"),
            &instance,
            alice(),
            &Recorder::yes(),
        )
        .await
        .unwrap();

        assert!(added);
        assert!(api.project_bag("myproj").get("sshKeys").is_some());
    }

    #[tokio::test]
    async fn eviction_prompt_decline_aborts_before_write() {
        let mut ctx = test_context();
        ctx.budget = KeyBudget { max_bytes: 100 };
        let old: String = std::iter::repeat_n('o', 90).collect();
        let api = FakeCompute::default().with_project(
            "myproj",
            [("sshKeys", format!("bob:{old}"))].into_iter().collect(),
        );

        let err = ensure_key_in_project(&ctx, &api, alice(), &Recorder::no())
            .await
            .unwrap_err();
        assert!(matches!(err, GshError::Cancelled));
        assert_eq!(*api.project_writes.borrow(), 0);
    }

    #[tokio::test]
    async fn eviction_accepted_writes_trimmed_value() {
        let mut ctx = test_context();
        ctx.budget = KeyBudget { max_bytes: 100 };
        let old: String = std::iter::repeat_n('o', 90).collect();
        let existing = format!("bob:{old}\ncarol:ssh-ed25519 CCCC");
        let api = FakeCompute::default().with_project(
            "myproj",
            [("sshKeys", existing.as_str())].into_iter().collect(),
        );
        let confirm = Recorder::yes();

        let outcome = ensure_key_in_project(&ctx, &api, alice(), &confirm)
            .await
            .unwrap();
        assert!(matches!(outcome, KeyOutcome::Ready { added: true }));
        assert_eq!(*api.project_writes.borrow(), 1);

        let expected = format!("carol:ssh-ed25519 CCCC\nalice:{ALICE_KEY}");
        assert_eq!(api.project_bag("myproj").get("sshKeys"), Some(expected.as_str()));
        let prompts = confirm.prompts.borrow();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains(&format!("bob:{old}")));
    }

    #[tokio::test]
    async fn key_already_on_blocked_instance_is_not_rewritten() {
        let ctx = test_context();
        let entry = format!("alice:{ALICE_KEY}");
        let bag: MetadataBag = [
            ("block-project-ssh-keys", "true"),
            ("sshKeys", entry.as_str()),
        ]
        .into_iter()
        .collect();
        let instance = instance_with(bag);
        let api = FakeCompute::default().with_instance("vm", instance.clone());

        let added = ensure_ssh_key_exists(
            &ctx,
            &api,
            &FakeAccounts::default(),
            &target("vm"),
            &instance,
            alice(),
            &Recorder::yes(),
        )
        .await
        .unwrap();

        assert!(!added);
        assert_eq!(*api.instance_writes.borrow(), 0);
        assert_eq!(*api.project_writes.borrow(), 0);
    }

    #[tokio::test]
    async fn key_already_under_iam_entry_is_not_rewritten() {
        let ctx = test_context();
        let entry = format!("alice:{ALICE_KEY}");
        let instance = instance_with([("ssh-keys", entry.as_str())].into_iter().collect());
        let api = FakeCompute::default().with_instance("vm", instance);

        let added = ensure_key_in_instance(
            &ctx,
            &api,
            &target("vm"),
            KeyVariant::Iam,
            alice(),
            &Recorder::yes(),
        )
        .await
        .unwrap();

        assert!(!added);
        assert_eq!(*api.instance_writes.borrow(), 0);
        assert_eq!(api.instance_bag("vm").get("ssh-keys"), Some(entry.as_str()));
    }
}
