//! `gsh create-with-container`: a Container-Optimized OS instance running
//! one Docker image.

use std::collections::{BTreeMap, HashSet};

use clap::ValueEnum;
use facet::Facet;

use crate::compute::ComputeApi;
use crate::compute::wire::{
    AttachedDisk, InitializeParams, InsertAccessConfig, InsertNetworkInterface, InstanceInsert,
    Tags,
};
use crate::config::Context;
use crate::error::GshError;
use crate::metadata::MetadataBag;
use crate::progress;
use crate::util::{parse_disk_size_gb, parse_key_value};

pub const CONTAINER_DECLARATION_KEY: &str = "gce-container-declaration";
pub const LOGGING_ENABLED_KEY: &str = "google-logging-enabled";
pub const COS_IMAGE_FAMILY: &str = "projects/cos-cloud/global/images/family/cos-stable";
pub const DEFAULT_MACHINE_TYPE: &str = "n1-standard-1";
const DEFAULT_BOOT_DISK_GB: u64 = 10;

const DECLARATION_HEADER: &str = "\
# DISCLAIMER:
# This container declaration format is not public API and may change without
# notice. Please use gsh or the Cloud Console to run containers on Compute
# Engine.

";

#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RestartPolicy {
    #[default]
    Always,
    OnFailure,
    Never,
}

impl RestartPolicy {
    fn as_declaration(self) -> &'static str {
        match self {
            Self::Always => "Always",
            Self::OnFailure => "OnFailure",
            Self::Never => "Never",
        }
    }
}

/// Raw `create-with-container` arguments, straight from the command line.
#[derive(Debug, Clone, Default)]
pub struct ContainerRequest {
    pub name: String,
    pub image: String,
    pub machine_type: Option<String>,
    pub env: Vec<String>,
    pub args: Vec<String>,
    pub privileged: bool,
    pub restart_policy: RestartPolicy,
    pub tags: Vec<String>,
    pub boot_disk_size: Option<String>,
}

// ── declaration ───────────────────────────────────────────

#[derive(Debug, Facet)]
struct Declaration {
    spec: PodSpec,
}

#[derive(Debug, Facet)]
struct PodSpec {
    containers: Vec<ContainerSpec>,
    #[facet(rename = "restartPolicy")]
    restart_policy: String,
}

#[derive(Debug, Facet)]
struct ContainerSpec {
    name: String,
    image: String,
    args: Vec<String>,
    env: Vec<EnvVar>,
    #[facet(rename = "securityContext")]
    security_context: SecurityContext,
    stdin: bool,
    tty: bool,
}

#[derive(Debug, Facet)]
struct EnvVar {
    name: String,
    value: String,
}

#[derive(Debug, Facet)]
struct SecurityContext {
    privileged: bool,
}

fn validate_name(name: &str) -> Result<(), GshError> {
    let valid = (1..=63).contains(&name.len())
        && name.starts_with(|c: char| c.is_ascii_lowercase())
        && !name.ends_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(GshError::argument(format!(
            "invalid instance name '{name}': use 1-63 lowercase letters, digits or '-', starting with a letter"
        )))
    }
}

fn parse_env(env: &[String]) -> Result<Vec<EnvVar>, GshError> {
    let mut seen = HashSet::new();
    let mut vars = Vec::with_capacity(env.len());
    for raw in env {
        let (name, value) = parse_key_value(raw)?;
        if !seen.insert(name.clone()) {
            return Err(GshError::argument(format!(
                "--container-env key '{name}' given more than once"
            )));
        }
        vars.push(EnvVar { name, value });
    }
    Ok(vars)
}

/// Render the `gce-container-declaration` metadata value.
pub fn render_declaration(request: &ContainerRequest) -> Result<String, GshError> {
    if request.image.trim().is_empty() {
        return Err(GshError::argument("--container-image is required"));
    }
    let declaration = Declaration {
        spec: PodSpec {
            containers: vec![ContainerSpec {
                name: request.name.clone(),
                image: request.image.clone(),
                args: request.args.clone(),
                env: parse_env(&request.env)?,
                security_context: SecurityContext {
                    privileged: request.privileged,
                },
                stdin: false,
                tty: false,
            }],
            restart_policy: request.restart_policy.as_declaration().into(),
        },
    };
    let yaml = facet_yaml::to_string(&declaration).map_err(|e| GshError::Validation {
        message: format!("rendering container declaration: {e}"),
    })?;
    let yaml = yaml.strip_prefix("---\n").unwrap_or(&yaml);
    Ok(format!("{DECLARATION_HEADER}{yaml}"))
}

/// Validate the request and build the instance insert body.
pub fn build_insert(ctx: &Context, request: &ContainerRequest) -> Result<InstanceInsert, GshError> {
    validate_name(&request.name)?;
    let declaration = render_declaration(request)?;

    let disk_gb = match &request.boot_disk_size {
        Some(size) => parse_disk_size_gb(size)?,
        None => DEFAULT_BOOT_DISK_GB,
    };
    if disk_gb < DEFAULT_BOOT_DISK_GB {
        return Err(GshError::argument(format!(
            "--boot-disk-size must be at least {DEFAULT_BOOT_DISK_GB}GB"
        )));
    }

    let machine_type = request
        .machine_type
        .as_deref()
        .unwrap_or(DEFAULT_MACHINE_TYPE);

    let metadata: MetadataBag = [
        (CONTAINER_DECLARATION_KEY, declaration.as_str()),
        (LOGGING_ENABLED_KEY, "true"),
    ]
    .into_iter()
    .collect();

    Ok(InstanceInsert {
        name: request.name.clone(),
        machine_type: format!("zones/{}/machineTypes/{machine_type}", ctx.zone),
        tags: Tags {
            items: request.tags.clone(),
        },
        labels: BTreeMap::from([("container-vm".to_string(), "cos-stable".to_string())]),
        metadata: metadata.to_wire(),
        disks: vec![AttachedDisk {
            boot: true,
            auto_delete: true,
            initialize_params: InitializeParams {
                source_image: COS_IMAGE_FAMILY.into(),
                disk_size_gb: disk_gb.to_string(),
            },
        }],
        network_interfaces: vec![InsertNetworkInterface {
            network: "global/networks/default".into(),
            access_configs: vec![InsertAccessConfig {
                name: "external-nat".into(),
                access_type: "ONE_TO_ONE_NAT".into(),
            }],
        }],
    })
}

pub async fn create_with_container<C: ComputeApi>(
    ctx: &Context,
    api: &C,
    request: &ContainerRequest,
) -> Result<(), GshError> {
    let insert = build_insert(ctx, request)?;
    let label = format!("Creating instance [{}] in [{}]", request.name, ctx.zone);
    progress::scoped(
        ctx.mode,
        &label,
        api.insert_instance(&ctx.project, &ctx.zone, &insert),
    )
    .await?;
    tracing::info!(
        instance = %request.name,
        zone = %ctx.zone,
        image = %request.image,
        "created container instance"
    );
    Ok(())
}
