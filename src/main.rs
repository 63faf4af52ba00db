use std::io::IsTerminal;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use gsh::accounts::RestAccounts;
use gsh::cli::{Cli, Command, ConnectArgs, OutputFormat};
use gsh::compute::rest::RestCompute;
use gsh::config::{self, Context, Overrides};
use gsh::flow::connect::{self, ConnectOptions, Connector};
use gsh::flow::container::{self, ContainerRequest};
use gsh::keys::KeyStore;
use gsh::logging;
use gsh::progress::OutputMode;
use gsh::prompt::{AssumeYes, Confirm, Interactive};
use gsh::util::default_user;

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    let interactive = std::io::stdin().is_terminal() && std::io::stderr().is_terminal();
    let mode = resolve_output_mode(cli.output, interactive, cli.verbose, cli.quiet);

    // Terminal layer stays off while spinners own stderr; tracing lines
    // break indicatif's redraws.
    let terminal_filter = match mode {
        OutputMode::Verbose => EnvFilter::new("debug"),
        OutputMode::Normal | OutputMode::Quiet | OutputMode::Silent => EnvFilter::new("off"),
        OutputMode::Plain => EnvFilter::from_default_env()
            .add_directive("gsh=info".parse().expect("valid log directive")),
    };

    let terminal_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(terminal_filter);

    // File layer: always captures gsh=debug, discards until activated
    let (file_writer, file_handle) = logging::DeferredFileWriter::new();
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer)
        .with_filter(EnvFilter::new("gsh=debug"));

    tracing_subscriber::registry()
        .with(terminal_layer)
        .with(file_layer)
        .init();

    let config = config::load_config(cli.config.as_deref())?;

    // Argument errors surface before any API call
    check_arguments(&cli.command)?;

    let ctx = Context::resolve(
        &config,
        Overrides {
            project: cli.project.clone(),
            zone: cli.zone.clone(),
            access_token: None,
        },
        mode,
    )?;

    if let Err(e) = file_handle.activate(&gsh::paths::logs_dir()) {
        tracing::debug!(error = %e, "file logging disabled");
    }
    tracing::debug!(project = %ctx.project, zone = %ctx.zone, "resolved context");

    let api = RestCompute::new(&ctx.compute_endpoint, ctx.access_token.clone())?;

    match cli.command {
        Command::CreateWithContainer {
            name,
            container_image,
            machine_type,
            container_env,
            container_arg,
            container_privileged,
            container_restart_policy,
            tags,
            boot_disk_size,
        } => {
            let request = ContainerRequest {
                name,
                image: container_image,
                machine_type,
                env: container_env,
                args: container_arg,
                privileged: container_privileged,
                restart_policy: container_restart_policy,
                tags,
                boot_disk_size,
            };
            container::create_with_container(&ctx, &api, &request).await?;
        }
        command => {
            let accounts =
                RestAccounts::new(&ctx.accounts_endpoint, &ctx.project, ctx.access_token.clone());
            let keys = KeyStore::new(&ctx.key_file, default_user());
            let confirm: Box<dyn Confirm> = if cli.quiet || !interactive {
                Box::new(AssumeYes)
            } else {
                Box::new(Interactive)
            };
            let connector = Connector {
                ctx: &ctx,
                api: &api,
                accounts: &accounts,
                keys: &keys,
                confirm: confirm.as_ref(),
            };
            let allow_passphrase = interactive && !cli.quiet;
            run_connect(&connector, command, allow_passphrase).await?;
        }
    }

    Ok(())
}

async fn run_connect(
    connector: &Connector<'_, RestCompute, RestAccounts>,
    command: Command,
    allow_passphrase: bool,
) -> miette::Result<()> {
    match command {
        Command::Ssh {
            target,
            command,
            connect,
            ssh_args,
        } => {
            let opts = connect_options(&connect, allow_passphrase);
            connector
                .ssh(&target, command.as_deref(), &ssh_args, &opts)
                .await?;
        }
        Command::Scp {
            mut paths,
            recurse,
            compress,
            connect,
        } => {
            let opts = connect_options(&connect, allow_passphrase);
            // clap guarantees at least two paths
            let destination = paths.pop().unwrap_or_default();
            connector
                .scp(&paths, &destination, recurse, compress, &opts)
                .await?;
        }
        Command::AddKey {
            target,
            force_key_file_overwrite,
        } => {
            let opts = ConnectOptions {
                force_key_file_overwrite,
                allow_passphrase,
                ..Default::default()
            };
            let added = connector.add_key(&target, &opts).await?;
            if added {
                println!("Added SSH key for {target}.");
            } else {
                println!("SSH key for {target} is already in place.");
            }
        }
        // handled in main
        Command::CreateWithContainer { .. } => {}
    }
    Ok(())
}

/// Checks that need no config or network.
fn check_arguments(command: &Command) -> miette::Result<()> {
    let user = default_user();
    match command {
        Command::Ssh { target, .. } | Command::AddKey { target, .. } => {
            connect::parse_target(target, &user)?;
        }
        Command::Scp { paths, .. } => {
            if let Some((destination, sources)) = paths.split_last() {
                connect::plan_scp(sources, destination, &user)?;
            }
        }
        Command::CreateWithContainer { .. } => {}
    }
    Ok(())
}

fn connect_options(args: &ConnectArgs, allow_passphrase: bool) -> ConnectOptions {
    ConnectOptions {
        dry_run: args.dry_run,
        plain: args.plain,
        internal_ip: args.internal_ip,
        force_key_file_overwrite: args.force_key_file_overwrite,
        allow_passphrase,
    }
}

/// Map `--output` plus `--verbose`/`--quiet` into the progress `OutputMode`.
fn resolve_output_mode(
    format: OutputFormat,
    interactive: bool,
    verbose: bool,
    quiet: bool,
) -> OutputMode {
    let format = match format {
        OutputFormat::Auto if interactive => OutputFormat::Interactive,
        OutputFormat::Auto => OutputFormat::Plain,
        other => other,
    };
    if quiet {
        OutputMode::Quiet
    } else if verbose {
        OutputMode::Verbose
    } else if format == OutputFormat::Plain {
        OutputMode::Plain
    } else {
        OutputMode::Normal
    }
}
