//! Application and spec entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ApplicationId, SpecId};

/// A deployed application, created on the first spec submission for a name
/// and persisting across redeploys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    pub id: ApplicationId,
    /// Unique application name (from spec metadata)
    pub name: String,
    /// Owning team
    pub team: Option<String>,
    /// Target environment
    pub environment: Option<String>,
    /// Latest submitted spec, if any
    pub latest_spec_id: Option<SpecId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An immutable spec submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecRecord {
    pub id: SpecId,
    pub app_name: String,
    /// The full structured spec document as submitted
    pub body: serde_json::Value,
    pub submitted_by: Option<String>,
    pub submitted_at: DateTime<Utc>,
}
