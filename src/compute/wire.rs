//! Compute Engine v1 JSON shapes, limited to the fields gsh reads or writes.

use std::collections::BTreeMap;

use facet::Facet;

#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
pub struct MetadataItem {
    pub key: String,
    #[facet(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
pub struct Metadata {
    #[facet(default)]
    pub fingerprint: Option<String>,
    #[facet(default)]
    pub items: Vec<MetadataItem>,
}

#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
pub struct Project {
    #[facet(default)]
    pub name: String,
    #[facet(default, rename = "commonInstanceMetadata")]
    pub common_instance_metadata: Metadata,
}

#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
pub struct AccessConfig {
    #[facet(default, rename = "natIP")]
    pub nat_ip: Option<String>,
}

#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
pub struct NetworkInterface {
    #[facet(default, rename = "networkIP")]
    pub network_ip: Option<String>,
    #[facet(default, rename = "accessConfigs")]
    pub access_configs: Vec<AccessConfig>,
}

#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
pub struct Instance {
    #[facet(default)]
    pub id: String,
    #[facet(default)]
    pub name: String,
    #[facet(default)]
    pub status: String,
    #[facet(default)]
    pub metadata: Metadata,
    #[facet(default, rename = "networkInterfaces")]
    pub network_interfaces: Vec<NetworkInterface>,
}

// ── operations ─────────────────────────────────────────────

#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
pub struct OperationErrorItem {
    #[facet(default)]
    pub code: String,
    #[facet(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
pub struct OperationError {
    #[facet(default)]
    pub errors: Vec<OperationErrorItem>,
}

#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
pub struct Operation {
    #[facet(default)]
    pub name: String,
    #[facet(default)]
    pub status: String,
    #[facet(default, rename = "selfLink")]
    pub self_link: String,
    #[facet(default)]
    pub error: Option<OperationError>,
}

#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
pub struct ErrorDetail {
    #[facet(default)]
    pub code: u16,
    #[facet(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
pub struct ErrorBody {
    #[facet(default)]
    pub error: ErrorDetail,
}

// ── instances.insert ───────────────────────────────────────

#[derive(Debug, Clone, Facet)]
pub struct InitializeParams {
    #[facet(rename = "sourceImage")]
    pub source_image: String,
    #[facet(rename = "diskSizeGb")]
    pub disk_size_gb: String,
}

#[derive(Debug, Clone, Facet)]
pub struct AttachedDisk {
    pub boot: bool,
    #[facet(rename = "autoDelete")]
    pub auto_delete: bool,
    #[facet(rename = "initializeParams")]
    pub initialize_params: InitializeParams,
}

#[derive(Debug, Clone, Facet)]
pub struct InsertAccessConfig {
    pub name: String,
    #[facet(rename = "type")]
    pub access_type: String,
}

#[derive(Debug, Clone, Facet)]
pub struct InsertNetworkInterface {
    pub network: String,
    #[facet(rename = "accessConfigs")]
    pub access_configs: Vec<InsertAccessConfig>,
}

#[derive(Debug, Clone, Facet)]
pub struct Tags {
    pub items: Vec<String>,
}

#[derive(Debug, Clone, Facet)]
pub struct InstanceInsert {
    pub name: String,
    #[facet(rename = "machineType")]
    pub machine_type: String,
    pub tags: Tags,
    pub labels: BTreeMap<String, String>,
    pub metadata: Metadata,
    pub disks: Vec<AttachedDisk>,
    #[facet(rename = "networkInterfaces")]
    pub network_interfaces: Vec<InsertNetworkInterface>,
}
