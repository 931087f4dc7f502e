//! Find-or-create reconciliation of prerequisite resources.
//!
//! Every resource is looked up by its deterministic name before anything is
//! created. A resource that exists but does not match the profile is reported
//! as a conflict and left untouched, so repeated runs converge on the same
//! set of resources without ever mutating something foreign.

use std::time::Duration;

use tracing::{debug, info};

use crate::error::ProvisionError;
use crate::inventory::{InventoryGateway, Resource, ResourceKind, ResourceSpec, Snapshot, bounded};
use crate::profile::ProvisioningProfile;

/// Result of [`Reconciler::ensure`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Ensured {
    /// The existing or newly created resource.
    pub resource: Resource,
    /// Whether this call created the resource.
    pub created: bool,
}

/// Network and ownership resources shared by every instance of a profile.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Prerequisites {
    /// Owning resource group.
    pub resource_group: Resource,
    /// VPC.
    pub vpc: Resource,
    /// Security group.
    pub security_group: Resource,
}

/// Idempotent find-or-create over an [`InventoryGateway`].
#[derive(Debug)]
pub struct Reconciler<'a, G> {
    gateway: &'a G,
    call_timeout: Duration,
}

impl<'a, G> Reconciler<'a, G>
where
    G: InventoryGateway,
{
    /// Creates a reconciler over `gateway`.
    #[must_use]
    pub const fn new(gateway: &'a G, call_timeout: Duration) -> Self {
        Self {
            gateway,
            call_timeout,
        }
    }

    /// Finds the resource named by `spec`, validating it is compatible, or
    /// creates it when absent.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::ResourceConflict`] when an incompatible
    /// resource already holds the name, and
    /// [`ProvisionError::InventoryUnavailable`] when the gateway fails.
    pub async fn ensure(&self, spec: &ResourceSpec) -> Result<Ensured, ProvisionError<G::Error>> {
        let kind = spec.kind();
        let name = spec.name();
        let existing = bounded(
            "find_resource",
            self.call_timeout,
            self.gateway.find_resource(kind, name),
        )
        .await
        .map_err(|err| ProvisionError::unavailable("find_resource", err))?;

        if let Some(resource) = existing {
            if let Some(reason) = spec.incompatibility(&resource) {
                return Err(ProvisionError::ResourceConflict {
                    kind,
                    name: name.to_owned(),
                    reason,
                });
            }
            debug!(%kind, name, id = %resource.id, "reusing existing resource");
            return Ok(Ensured {
                resource,
                created: false,
            });
        }

        let resource = bounded(
            "create_resource",
            self.call_timeout,
            self.gateway.create_resource(spec),
        )
        .await
        .map_err(|err| ProvisionError::unavailable("create_resource", err))?;
        info!(%kind, name, id = %resource.id, "created resource");
        Ok(Ensured {
            resource,
            created: true,
        })
    }

    /// Ensures the resource group, VPC, and security group, in that order.
    ///
    /// # Errors
    ///
    /// Propagates the first failure from [`Self::ensure`].
    pub async fn ensure_prerequisites(
        &self,
        profile: &ProvisioningProfile,
    ) -> Result<Prerequisites, ProvisionError<G::Error>> {
        let resource_group = self
            .ensure(&ResourceSpec::ResourceGroup {
                name: profile.resource_group_name.clone(),
            })
            .await?
            .resource;

        let vpc = self
            .ensure(&ResourceSpec::Vpc {
                name: profile.vpc_name(),
                cidr_block: profile.vpc_cidr.clone(),
                resource_group_id: resource_group.id.clone(),
            })
            .await?
            .resource;

        let security_group = self
            .ensure(&ResourceSpec::SecurityGroup {
                name: profile.security_group_name(),
                vpc_id: vpc.id.clone(),
                resource_group_id: resource_group.id.clone(),
                ingress_ports: profile.ingress_ports.clone(),
            })
            .await?
            .resource;

        Ok(Prerequisites {
            resource_group,
            vpc,
            security_group,
        })
    }

    /// Ensures the VSwitch serving `zone`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::ResourceConflict`] when the profile's VPC
    /// block is unusable or an incompatible VSwitch holds the name.
    pub async fn ensure_vswitch(
        &self,
        profile: &ProvisioningProfile,
        prerequisites: &Prerequisites,
        zone: &str,
    ) -> Result<Resource, ProvisionError<G::Error>> {
        let name = profile.vswitch_name(zone);
        let cidr_block =
            profile
                .vswitch_cidr(zone)
                .map_err(|err| ProvisionError::ResourceConflict {
                    kind: ResourceKind::VSwitch,
                    name: name.clone(),
                    reason: err.to_string(),
                })?;
        let ensured = self
            .ensure(&ResourceSpec::VSwitch {
                name,
                vpc_id: prerequisites.vpc.id.clone(),
                zone: zone.to_owned(),
                cidr_block,
            })
            .await?;
        Ok(ensured.resource)
    }

    /// Resolves the newest completed snapshot whose name starts with
    /// `prefix`. Equal creation times are broken by the larger id.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::SnapshotNotFound`] when nothing matches.
    pub async fn resolve_snapshot(&self, prefix: &str) -> Result<Snapshot, ProvisionError<G::Error>> {
        let snapshots = bounded(
            "find_snapshots",
            self.call_timeout,
            self.gateway.find_snapshots(prefix),
        )
        .await
        .map_err(|err| ProvisionError::unavailable("find_snapshots", err))?;

        let newest = snapshots
            .into_iter()
            .filter(|snapshot| snapshot.completed && snapshot.name.starts_with(prefix))
            .max_by(|left, right| {
                left.created_at
                    .cmp(&right.created_at)
                    .then_with(|| left.id.cmp(&right.id))
            })
            .ok_or_else(|| ProvisionError::SnapshotNotFound {
                prefix: prefix.to_owned(),
            })?;
        info!(snapshot_id = %newest.id, snapshot_name = %newest.name, "resolved data snapshot");
        Ok(newest)
    }
}
