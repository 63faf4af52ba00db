pub mod rest;
pub mod wire;

use std::fmt;

use crate::error::GshError;
use crate::metadata::MetadataBag;

/// Fully qualified instance name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceRef {
    pub project: String,
    pub zone: String,
    pub name: String,
}

impl fmt::Display for InstanceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "projects/{}/zones/{}/instances/{}",
            self.project, self.zone, self.name
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct NetworkInterface {
    pub internal_ip: Option<String>,
    pub external_ip: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Instance {
    pub id: String,
    pub name: String,
    pub status: String,
    pub metadata: MetadataBag,
    pub network_interfaces: Vec<NetworkInterface>,
}

impl Instance {
    /// First NAT address across all interfaces.
    pub fn external_ip(&self) -> Option<&str> {
        self.network_interfaces
            .iter()
            .find_map(|nic| nic.external_ip.as_deref())
    }

    pub fn internal_ip(&self) -> Option<&str> {
        self.network_interfaces
            .iter()
            .find_map(|nic| nic.internal_ip.as_deref())
    }

    pub(crate) fn from_wire(instance: wire::Instance) -> Self {
        Self {
            id: instance.id,
            name: instance.name,
            status: instance.status,
            metadata: MetadataBag::from_wire(instance.metadata),
            network_interfaces: instance
                .network_interfaces
                .into_iter()
                .map(|nic| NetworkInterface {
                    internal_ip: nic.network_ip,
                    external_ip: nic.access_configs.into_iter().find_map(|ac| ac.nat_ip),
                })
                .collect(),
        }
    }
}

/// Project and instance metadata reads/writes plus instance creation.
///
/// Writes replace the whole bag in one call; nothing here retries.
#[allow(async_fn_in_trait)] // trait is internal-only
pub trait ComputeApi {
    async fn get_project_metadata(&self, project: &str) -> Result<MetadataBag, GshError>;
    async fn set_project_metadata(&self, project: &str, bag: &MetadataBag)
    -> Result<(), GshError>;
    async fn get_instance(&self, instance: &InstanceRef) -> Result<Instance, GshError>;
    async fn set_instance_metadata(
        &self,
        instance: &InstanceRef,
        bag: &MetadataBag,
    ) -> Result<(), GshError>;
    async fn insert_instance(
        &self,
        project: &str,
        zone: &str,
        request: &wire::InstanceInsert,
    ) -> Result<(), GshError>;
}

#[cfg(test)]
pub(crate) mod fake {
    //! In-memory `ComputeApi` for flow tests.

    use std::cell::RefCell;
    use std::collections::HashMap;

    use super::*;

    #[derive(Default)]
    pub(crate) struct FakeCompute {
        pub projects: RefCell<HashMap<String, MetadataBag>>,
        pub instances: RefCell<HashMap<String, Instance>>,
        pub inserted: RefCell<Vec<wire::InstanceInsert>>,
        pub deny_project_writes: bool,
        pub project_writes: RefCell<usize>,
        pub instance_writes: RefCell<usize>,
    }

    impl FakeCompute {
        pub fn with_project(self, project: &str, bag: MetadataBag) -> Self {
            self.projects.borrow_mut().insert(project.to_string(), bag);
            self
        }

        pub fn with_instance(self, name: &str, instance: Instance) -> Self {
            self.instances.borrow_mut().insert(name.to_string(), instance);
            self
        }

        pub fn project_bag(&self, project: &str) -> MetadataBag {
            self.projects.borrow().get(project).cloned().unwrap_or_default()
        }

        pub fn instance_bag(&self, name: &str) -> MetadataBag {
            self.instances.borrow()[name].metadata.clone()
        }
    }

    impl ComputeApi for FakeCompute {
        async fn get_project_metadata(&self, project: &str) -> Result<MetadataBag, GshError> {
            Ok(self.project_bag(project))
        }

        async fn set_project_metadata(
            &self,
            project: &str,
            bag: &MetadataBag,
        ) -> Result<(), GshError> {
            *self.project_writes.borrow_mut() += 1;
            if self.deny_project_writes {
                return Err(GshError::Api {
                    resource: format!("projects/{project}"),
                    status: Some(403),
                    message: "Required 'compute.projects.setCommonInstanceMetadata' permission"
                        .into(),
                });
            }
            self.projects
                .borrow_mut()
                .insert(project.to_string(), bag.clone());
            Ok(())
        }

        async fn get_instance(&self, instance: &InstanceRef) -> Result<Instance, GshError> {
            self.instances
                .borrow()
                .get(&instance.name)
                .cloned()
                .ok_or_else(|| GshError::Api {
                    resource: instance.to_string(),
                    status: Some(404),
                    message: "not found".into(),
                })
        }

        async fn set_instance_metadata(
            &self,
            instance: &InstanceRef,
            bag: &MetadataBag,
        ) -> Result<(), GshError> {
            *self.instance_writes.borrow_mut() += 1;
            let mut instances = self.instances.borrow_mut();
            let Some(existing) = instances.get_mut(&instance.name) else {
                return Err(GshError::Api {
                    resource: instance.to_string(),
                    status: Some(404),
                    message: "not found".into(),
                });
            };
            existing.metadata = bag.clone();
            Ok(())
        }

        async fn insert_instance(
            &self,
            _project: &str,
            _zone: &str,
            request: &wire::InstanceInsert,
        ) -> Result<(), GshError> {
            self.inserted.borrow_mut().push(request.clone());
            Ok(())
        }
    }
}
