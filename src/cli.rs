use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::flow::container::RestartPolicy;

#[derive(Parser, Debug)]
#[command(
    name = "gsh",
    version,
    about = "SSH, SCP and container instances on Compute Engine"
)]
pub struct Cli {
    /// Path to config file (default: ~/.config/gsh/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Project to operate in (overrides core.project)
    #[arg(long, global = true)]
    pub project: Option<String>,

    /// Zone of the instance (overrides compute.zone)
    #[arg(long, global = true)]
    pub zone: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// No spinners; answer yes to every prompt
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Progress output style
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Auto)]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Spinners on a terminal, plain lines otherwise
    Auto,
    Interactive,
    Plain,
}

/// Flags shared by `ssh` and `scp`.
#[derive(Args, Debug, Clone)]
pub struct ConnectArgs {
    /// Print the ssh/scp command instead of running it
    #[arg(long)]
    pub dry_run: bool,

    /// Use your own ssh configuration; skip key placement
    #[arg(long)]
    pub plain: bool,

    /// Connect to the instance's internal IP
    #[arg(long)]
    pub internal_ip: bool,

    /// Regenerate the gsh keypair even if it exists
    #[arg(long)]
    pub force_key_file_overwrite: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Open an SSH session (or run a command) on an instance
    Ssh {
        /// [USER@]INSTANCE
        target: String,

        /// Run this command instead of an interactive shell
        #[arg(long)]
        command: Option<String>,

        #[command(flatten)]
        connect: ConnectArgs,

        /// Extra arguments passed to ssh
        #[arg(last = true)]
        ssh_args: Vec<String>,
    },

    /// Copy files to or from an instance
    Scp {
        /// Sources followed by the destination; remote paths are [USER@]INSTANCE:PATH
        #[arg(required = true, num_args = 2..)]
        paths: Vec<String>,

        /// Copy directories recursively
        #[arg(long)]
        recurse: bool,

        /// Enable compression
        #[arg(long)]
        compress: bool,

        #[command(flatten)]
        connect: ConnectArgs,
    },

    /// Make sure your public key is usable on an instance without connecting
    AddKey {
        /// [USER@]INSTANCE
        target: String,

        /// Regenerate the gsh keypair even if it exists
        #[arg(long)]
        force_key_file_overwrite: bool,
    },

    /// Create an instance that runs a container image on Container-Optimized OS
    CreateWithContainer {
        /// Instance name
        name: String,

        /// Docker image to run
        #[arg(long)]
        container_image: String,

        /// Machine type (default: n1-standard-1)
        #[arg(long)]
        machine_type: Option<String>,

        /// Environment variable for the container, KEY=VALUE (repeatable)
        #[arg(long = "container-env")]
        container_env: Vec<String>,

        /// Argument for the container entrypoint (repeatable)
        #[arg(long = "container-arg", allow_hyphen_values = true)]
        container_arg: Vec<String>,

        /// Run the container in privileged mode
        #[arg(long)]
        container_privileged: bool,

        /// What to do when the container exits
        #[arg(long, value_enum, default_value_t = RestartPolicy::Always)]
        container_restart_policy: RestartPolicy,

        /// Network tags, comma separated
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,

        /// Boot disk size, e.g. 20GB
        #[arg(long)]
        boot_disk_size: Option<String>,
    },
}
