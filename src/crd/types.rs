//! Supporting types shared by every managed resource CRD

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type maintained by the reconciliation engine
pub const SYNCHRONIZED_CONDITION: &str = "Synchronized";

/// Lifecycle phase of a managed resource
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum ResourcePhase {
    /// Object has not been picked up by the controller yet
    #[default]
    #[serde(rename = "")]
    Uninitialized,
    /// Remote create request is being issued
    Creating,
    /// Remote resource exists but is still being provisioned
    Provisioning,
    /// Remote resource matches the spec
    Created,
    /// Spec changed and the remote resource is being updated
    Updating,
    /// Remote resource is being deleted
    Deleting,
    /// Remote resource is gone
    Deleted,
    /// Terminal failure; only a spec change or deletion moves the object on
    Failed,
}

impl ResourcePhase {
    /// Phases subject to the phase timeout
    pub fn is_transitioning(&self) -> bool {
        matches!(
            self,
            Self::Creating | Self::Provisioning | Self::Updating | Self::Deleting
        )
    }

    /// Phases in which the controller does nothing until the object changes
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Deleted | Self::Failed)
    }
}

impl std::fmt::Display for ResourcePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "Initializing"),
            Self::Creating => write!(f, "Creating"),
            Self::Provisioning => write!(f, "Provisioning"),
            Self::Created => write!(f, "Created"),
            Self::Updating => write!(f, "Updating"),
            Self::Deleting => write!(f, "Deleting"),
            Self::Deleted => write!(f, "Deleted"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Condition status following Kubernetes conventions
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl From<bool> for ConditionStatus {
    fn from(ok: bool) -> Self {
        if ok {
            Self::True
        } else {
            Self::False
        }
    }
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kubernetes-style condition for status reporting
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g., Synchronized)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition status changed
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::at(type_, status, reason, message, Utc::now())
    }

    /// Create a new condition stamped with the given time
    pub fn at(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
        time: DateTime<Utc>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: time,
        }
    }
}

/// Region where a remote resource lives
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct Location {
    /// Provider location code (e.g., ITBG-Bergamo)
    pub value: String,
}

/// Reference to another managed resource in the cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct ResourceReference {
    /// Name of the referenced object
    pub name: String,

    /// Namespace of the referenced object; defaults to the referrer's namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Observed state written by the reconciliation engine
///
/// Embedded in the status of every managed resource kind.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStatus {
    /// Current lifecycle phase
    #[serde(default)]
    pub phase: ResourcePhase,

    /// Human-readable outcome of the last transition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Identifier of the resource in the remote cloud API
    #[serde(
        default,
        rename = "resourceID",
        skip_serializing_if = "Option::is_none"
    )]
    pub resource_id: Option<String>,

    /// Generation of the spec last acted upon
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// When the current phase was entered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_start_time: Option<DateTime<Utc>>,

    /// Conditions representing the resource state
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl ResourceStatus {
    /// Create a new status with the given phase
    pub fn with_phase(phase: ResourcePhase) -> Self {
        Self {
            phase,
            ..Default::default()
        }
    }

    /// Set the message and return self for chaining
    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Set the remote identifier and return self for chaining
    pub fn resource_id(mut self, id: impl Into<String>) -> Self {
        self.resource_id = Some(id.into());
        self
    }

    /// Add a condition and return self for chaining
    pub fn condition(mut self, condition: Condition) -> Self {
        self.set_condition(condition);
        self
    }

    /// Insert or replace the condition of the same type
    ///
    /// The transition time is kept when the status value is unchanged.
    pub fn set_condition(&mut self, mut condition: Condition) {
        match self
            .conditions
            .iter_mut()
            .find(|c| c.type_ == condition.type_)
        {
            Some(existing) => {
                if existing.status == condition.status {
                    condition.last_transition_time = existing.last_transition_time;
                }
                *existing = condition;
            }
            None => self.conditions.push(condition),
        }
    }

    /// Look up a condition by type
    pub fn get_condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// The engine-maintained Synchronized condition
    pub fn synchronized(&self) -> Option<&Condition> {
        self.get_condition(SYNCHRONIZED_CONDITION)
    }
}
