//! Provisioned resource entity

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::ResourceState;
use crate::ids::{ExecutionId, ResourceId};

/// A resource declared by a spec and provisioned by a workflow step.
///
/// Identified logically by (app_name, name); the row survives redeploys and
/// its state only advances along the lifecycle in `ResourceState`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub app_name: String,
    /// Logical name from the spec's resources map
    pub name: String,
    /// Declared resource type (postgres, redis, s3-bucket, ...)
    pub resource_type: String,
    pub state: ResourceState,
    /// Execution that is provisioning (or last provisioned) this resource
    pub execution_id: Option<ExecutionId>,
    /// Post-provisioning attributes (connection strings, hostnames, ...)
    pub properties: BTreeMap<String, String>,
    /// Stable digest of the declared, normalized properties; used by the
    /// resolver to classify redeploys without comparing secret values
    pub fingerprint: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
