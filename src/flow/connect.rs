//! `gsh ssh` and `gsh scp`: resolve the instance, place the key, shell out.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::time::Instant;

use super::ensure_key::{KeyRequest, ensure_ssh_key_exists};
use crate::accounts::AccountService;
use crate::compute::{ComputeApi, Instance, InstanceRef};
use crate::config::{Context, HostKeyChecking};
use crate::error::GshError;
use crate::keys::KeyStore;
use crate::progress::Waiting;
use crate::prompt::Confirm;
use crate::util::default_user;

const PROBE_INTERVAL: Duration = Duration::from_secs(5);
const PROBE_CONNECT_TIMEOUT_S: u64 = 5;

/// ssh's exit status for connection-level failures.
const SSH_CONNECTION_ERROR: i32 = 255;

// ── argument parsing ──────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub user: String,
    pub instance: String,
}

/// Parse `[USER@]INSTANCE`.
pub fn parse_target(arg: &str, default_user: &str) -> Result<RemoteTarget, GshError> {
    let (user, instance) = match arg.split_once('@') {
        None => (default_user, arg),
        Some((user, instance)) => {
            if user.is_empty() || instance.is_empty() || instance.contains('@') {
                return Err(GshError::argument(format!(
                    "expected argument of the form [USER@]INSTANCE, got '{arg}'"
                )));
            }
            (user, instance)
        }
    };
    if instance.is_empty() {
        return Err(GshError::argument("instance name must not be empty"));
    }
    Ok(RemoteTarget {
        user: user.to_string(),
        instance: instance.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileArg {
    Local(String),
    Remote { target: RemoteTarget, path: String },
}

/// `[USER@]INSTANCE:PATH` is remote, anything else is local. Paths starting
/// with `/` or `.` are always local so `./a:b` works.
pub fn parse_file_arg(arg: &str, default_user: &str) -> Result<FileArg, GshError> {
    if arg.starts_with('/') || arg.starts_with('.') {
        return Ok(FileArg::Local(arg.to_string()));
    }
    match arg.split_once(':') {
        Some((host, path)) => Ok(FileArg::Remote {
            target: parse_target(host, default_user)?,
            path: path.to_string(),
        }),
        None => Ok(FileArg::Local(arg.to_string())),
    }
}

/// A validated copy: one instance, remote on exactly one side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScpPlan {
    pub target: RemoteTarget,
    pub sources: Vec<FileArg>,
    pub destination: FileArg,
}

pub fn plan_scp(
    sources: &[String],
    destination: &str,
    default_user: &str,
) -> Result<ScpPlan, GshError> {
    if sources.is_empty() {
        return Err(GshError::argument("at least one source is required"));
    }
    let sources = sources
        .iter()
        .map(|s| parse_file_arg(s, default_user))
        .collect::<Result<Vec<_>, _>>()?;
    let destination = parse_file_arg(destination, default_user)?;

    let target = match &destination {
        FileArg::Remote { target, .. } => {
            if sources.iter().any(|s| matches!(s, FileArg::Remote { .. })) {
                return Err(GshError::argument(
                    "copying between two remote locations is not supported",
                ));
            }
            target.clone()
        }
        FileArg::Local(_) => {
            let mut remotes = sources.iter().map(|s| match s {
                FileArg::Remote { target, .. } => Some(target),
                FileArg::Local(_) => None,
            });
            let Some(Some(first)) = remotes.next() else {
                return Err(GshError::argument(
                    "either the sources or the destination must be remote ([USER@]INSTANCE:PATH)",
                ));
            };
            for other in remotes {
                match other {
                    Some(t) if t == first => {}
                    Some(_) => {
                        return Err(GshError::argument(
                            "all remote sources must refer to the same instance and user",
                        ));
                    }
                    None => {
                        return Err(GshError::argument(
                            "sources must be all remote or all local",
                        ));
                    }
                }
            }
            first.clone()
        }
    };

    Ok(ScpPlan {
        target,
        sources,
        destination,
    })
}

// ── command lines ─────────────────────────────────────────

/// Options shared by `ssh` and `scp`.
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    pub dry_run: bool,
    /// Skip key placement and host-key options; use the user's own ssh setup.
    pub plain: bool,
    pub internal_ip: bool,
    pub force_key_file_overwrite: bool,
    pub allow_passphrase: bool,
}

fn host_key_alias(instance: &Instance) -> String {
    format!("compute.{}", instance.id)
}

/// Whether `alias` already has an entry in the known-hosts file.
pub fn host_key_known(known_hosts: &Path, alias: &str) -> bool {
    let Ok(text) = std::fs::read_to_string(known_hosts) else {
        return false;
    };
    text.lines()
        .filter_map(|line| line.split_whitespace().next())
        .any(|hosts| hosts.split(',').any(|h| h == alias))
}

fn strict_host_key_checking(ctx: &Context, alias: &str) -> &'static str {
    match ctx.host_key_checking {
        HostKeyChecking::Yes => "yes",
        HostKeyChecking::No => "no",
        HostKeyChecking::Ask => "ask",
        HostKeyChecking::Auto => {
            if host_key_known(&ctx.known_hosts_file, alias) {
                "yes"
            } else {
                "no"
            }
        }
    }
}

fn common_options(ctx: &Context, instance: &Instance, plain: bool) -> Vec<String> {
    if plain {
        return Vec::new();
    }
    let alias = host_key_alias(instance);
    vec![
        "-i".into(),
        ctx.key_file.display().to_string(),
        "-o".into(),
        format!("UserKnownHostsFile={}", ctx.known_hosts_file.display()),
        "-o".into(),
        format!("HostKeyAlias={alias}"),
        "-o".into(),
        format!("StrictHostKeyChecking={}", strict_host_key_checking(ctx, &alias)),
        "-o".into(),
        "IdentitiesOnly=yes".into(),
        "-o".into(),
        "CheckHostIP=no".into(),
    ]
}

pub fn ssh_argv(
    ctx: &Context,
    instance: &Instance,
    target: &RemoteTarget,
    ip: &str,
    command: Option<&str>,
    extra: &[String],
    plain: bool,
) -> Vec<String> {
    let mut argv = vec!["ssh".to_string()];
    if command.is_none() {
        argv.push("-t".into());
    }
    argv.extend(common_options(ctx, instance, plain));
    argv.extend(extra.iter().cloned());
    argv.push(format!("{}@{ip}", target.user));
    if let Some(cmd) = command {
        argv.push("--".into());
        argv.push(cmd.to_string());
    }
    argv
}

pub fn scp_argv(
    ctx: &Context,
    instance: &Instance,
    plan: &ScpPlan,
    ip: &str,
    recurse: bool,
    compress: bool,
    plain: bool,
) -> Vec<String> {
    let render = |arg: &FileArg| match arg {
        FileArg::Local(path) => path.clone(),
        FileArg::Remote { target, path } => format!("{}@{ip}:{path}", target.user),
    };

    let mut argv = vec!["scp".to_string()];
    if recurse {
        argv.push("-r".into());
    }
    if compress {
        argv.push("-C".into());
    }
    argv.extend(common_options(ctx, instance, plain));
    argv.extend(plan.sources.iter().map(render));
    argv.push(render(&plan.destination));
    argv
}

fn probe_argv(ctx: &Context, instance: &Instance, target: &RemoteTarget, ip: &str) -> Vec<String> {
    let mut argv = vec!["ssh".to_string()];
    argv.extend(common_options(ctx, instance, false));
    argv.extend([
        "-o".into(),
        "BatchMode=yes".into(),
        "-o".into(),
        format!("ConnectTimeout={PROBE_CONNECT_TIMEOUT_S}"),
        format!("{}@{ip}", target.user),
        "--".into(),
        "true".into(),
    ]);
    argv
}

/// How to wait for a freshly added key before handing the terminal to ssh.
#[derive(Debug, PartialEq, Eq)]
enum PropagationWait {
    /// Poll a non-interactive `ssh ... true`, then run the command once.
    Probe(Vec<String>),
    /// The key needs a passphrase, which BatchMode can't supply: retry the
    /// command itself while it fails to connect.
    RetryCommand,
}

fn propagation_wait(
    ctx: &Context,
    instance: &Instance,
    target: &RemoteTarget,
    ip: &str,
    key_encrypted: bool,
) -> PropagationWait {
    if key_encrypted {
        PropagationWait::RetryCommand
    } else {
        PropagationWait::Probe(probe_argv(ctx, instance, target, ip))
    }
}

/// Render an argv for display, single-quoting anything unusual.
pub fn shell_join(argv: &[String]) -> String {
    argv.iter()
        .map(|a| {
            let safe = !a.is_empty()
                && a.chars()
                    .all(|c| c.is_ascii_alphanumeric() || "-_./=:@,+".contains(c));
            if safe {
                a.clone()
            } else {
                format!("'{}'", a.replace('\'', r"'\''"))
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// ── process execution ─────────────────────────────────────

fn spawn_error(argv: &[String], source: std::io::Error) -> GshError {
    GshError::Io {
        context: format!("running {}", argv[0]),
        source,
    }
}

async fn run_interactive(argv: &[String]) -> Result<i32, GshError> {
    tracing::debug!(command = %shell_join(argv), "running");
    let status = tokio::process::Command::new(&argv[0])
        .args(&argv[1..])
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await
        .map_err(|e| spawn_error(argv, e))?;
    Ok(status.code().unwrap_or(-1))
}

async fn run_captured(argv: &[String]) -> Result<i32, GshError> {
    let output = tokio::process::Command::new(&argv[0])
        .args(&argv[1..])
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| spawn_error(argv, e))?;
    let code = output.status.code().unwrap_or(-1);
    if code != 0 {
        tracing::debug!(
            code,
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "probe failed"
        );
    }
    Ok(code)
}

fn check_exit(argv: &[String], code: i32) -> Result<(), GshError> {
    match code {
        0 => Ok(()),
        SSH_CONNECTION_ERROR => Err(GshError::Network {
            message: format!("{} exited with status {code}", argv[0]),
        }),
        code => Err(GshError::Command {
            command: argv[0].clone(),
            code,
        }),
    }
}

/// Run `argv` until it gets past the connection stage or the propagation
/// timeout runs out. Only ssh's connection-failure status is retried; any
/// other exit is final.
async fn retry_until_connected(
    ctx: &Context,
    argv: &[String],
    instance: &str,
    captured: bool,
) -> Result<(), GshError> {
    let deadline = Instant::now() + ctx.propagation_timeout;
    let waiting = captured.then(|| Waiting::start(ctx.mode, "Waiting for SSH key to propagate"));

    let result = loop {
        let attempt = if captured {
            run_captured(argv).await
        } else {
            run_interactive(argv).await
        };
        let code = match attempt {
            Ok(code) => code,
            Err(e) => break Err(e),
        };
        if code != SSH_CONNECTION_ERROR {
            break check_exit(argv, code);
        }
        if Instant::now() + PROBE_INTERVAL > deadline {
            break Err(GshError::Network {
                message: format!(
                    "{instance} did not accept the key within {}s",
                    ctx.propagation_timeout.as_secs()
                ),
            });
        }
        tracing::debug!(%instance, "instance not reachable yet");
        tokio::time::sleep(PROBE_INTERVAL).await;
    };

    if let Some(waiting) = waiting {
        waiting.finish();
    }
    result
}

// ── flows ─────────────────────────────────────────────────

/// Collaborators a connection needs.
pub struct Connector<'a, C, A> {
    pub ctx: &'a Context,
    pub api: &'a C,
    pub accounts: &'a A,
    pub keys: &'a KeyStore,
    pub confirm: &'a dyn Confirm,
}

impl<C: ComputeApi, A: AccountService> Connector<'_, C, A> {
    fn instance_ref(&self, target: &RemoteTarget) -> InstanceRef {
        InstanceRef {
            project: self.ctx.project.clone(),
            zone: self.ctx.zone.clone(),
            name: target.instance.clone(),
        }
    }

    /// Make sure our key is usable on the instance. Returns whether any
    /// metadata was written.
    async fn place_key(
        &self,
        target: &RemoteTarget,
        instance_ref: &InstanceRef,
        instance: &Instance,
        opts: &ConnectOptions,
    ) -> Result<bool, GshError> {
        self.keys
            .ensure_keys_exist(opts.force_key_file_overwrite, opts.allow_passphrase)?;
        let public_key = self.keys.to_entry(true)?;
        let key = KeyRequest {
            user: &target.user,
            public_key: &public_key,
        };
        let added = ensure_ssh_key_exists(
            self.ctx,
            self.api,
            self.accounts,
            instance_ref,
            instance,
            key,
            self.confirm,
        )
        .await?;
        if added {
            tracing::info!(
                instance = %instance_ref,
                user = %target.user,
                fingerprint = %self.keys.fingerprint()?,
                "placed ssh key"
            );
        }
        Ok(added)
    }

    /// Fetch the instance, pick its address and, unless `plain`, place the
    /// key. Returns the instance, the address, and whether a key was added.
    async fn prepare(
        &self,
        target: &RemoteTarget,
        opts: &ConnectOptions,
    ) -> Result<(Instance, String, bool), GshError> {
        let instance_ref = self.instance_ref(target);
        let instance = self.api.get_instance(&instance_ref).await?;

        let ip = if opts.internal_ip {
            instance.internal_ip()
        } else {
            instance.external_ip()
        }
        .ok_or_else(|| GshError::Validation {
            message: format!(
                "instance [{}] in zone [{}] has no {} IP address",
                instance_ref.name,
                instance_ref.zone,
                if opts.internal_ip { "internal" } else { "external" }
            ),
        })?
        .to_string();

        if opts.plain {
            return Ok((instance, ip, false));
        }
        let added = self.place_key(target, &instance_ref, &instance, opts).await?;
        Ok((instance, ip, added))
    }

    /// Run the final ssh/scp command, first waiting for a just-added key.
    async fn run(
        &self,
        argv: &[String],
        instance: &Instance,
        target: &RemoteTarget,
        ip: &str,
        added: bool,
    ) -> Result<(), GshError> {
        if !added {
            return check_exit(argv, run_interactive(argv).await?);
        }
        let encrypted = self.keys.is_encrypted()?;
        match propagation_wait(self.ctx, instance, target, ip, encrypted) {
            PropagationWait::Probe(probe) => {
                retry_until_connected(self.ctx, &probe, &target.instance, true).await?;
                check_exit(argv, run_interactive(argv).await?)
            }
            PropagationWait::RetryCommand => {
                retry_until_connected(self.ctx, argv, &target.instance, false).await
            }
        }
    }

    /// `gsh add-key`: place the key without connecting.
    pub async fn add_key(&self, target: &str, opts: &ConnectOptions) -> Result<bool, GshError> {
        let target = parse_target(target, &default_user())?;
        let instance_ref = self.instance_ref(&target);
        let instance = self.api.get_instance(&instance_ref).await?;
        self.place_key(&target, &instance_ref, &instance, opts).await
    }

    pub async fn ssh(
        &self,
        target: &str,
        command: Option<&str>,
        extra: &[String],
        opts: &ConnectOptions,
    ) -> Result<(), GshError> {
        let target = parse_target(target, &default_user())?;
        let (instance, ip, added) = self.prepare(&target, opts).await?;
        let argv = ssh_argv(self.ctx, &instance, &target, &ip, command, extra, opts.plain);

        if opts.dry_run {
            println!("{}", shell_join(&argv));
            return Ok(());
        }
        self.run(&argv, &instance, &target, &ip, added).await
    }

    pub async fn scp(
        &self,
        sources: &[String],
        destination: &str,
        recurse: bool,
        compress: bool,
        opts: &ConnectOptions,
    ) -> Result<(), GshError> {
        let plan = plan_scp(sources, destination, &default_user())?;
        let (instance, ip, added) = self.prepare(&plan.target, opts).await?;
        let argv = scp_argv(self.ctx, &instance, &plan, &ip, recurse, compress, opts.plain);

        if opts.dry_run {
            println!("{}", shell_join(&argv));
            return Ok(());
        }
        self.run(&argv, &instance, &plan.target, &ip, added).await
    }
}
