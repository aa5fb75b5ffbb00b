use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Plan state machine. Transitions are only legal along the edges
/// encoded in [`PlanStatus::can_transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Creating,
    Initiating,
    Created,
    Available,
    Cloning,
    Migrating,
    DataTransFinished,
    Finished,
    Error,
    Deleting,
}

impl PlanStatus {
    /// Whether `self -> next` is a legal edge. Writing the current status
    /// again is always allowed; any state may move to `Error`.
    pub fn can_transition(self, next: PlanStatus) -> bool {
        use PlanStatus::*;
        if self == next || next == Error {
            return true;
        }
        matches!(
            (self, next),
            (Creating, Initiating)
                | (Creating, Available)
                | (Initiating, Created)
                | (Created, Available)
                | (Available, Cloning)
                | (Available, Migrating)
                | (Cloning, DataTransFinished)
                | (Cloning, Finished)
                | (Migrating, DataTransFinished)
                | (Migrating, Finished)
                | (DataTransFinished, Finished)
                | (Available, Deleting)
                | (Error, Deleting)
        )
    }

    /// Terminal for a single orchestration run.
    pub fn is_terminal(self) -> bool {
        matches!(self, PlanStatus::Finished | PlanStatus::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PlanStatus::Creating => "creating",
            PlanStatus::Initiating => "initiating",
            PlanStatus::Created => "created",
            PlanStatus::Available => "available",
            PlanStatus::Cloning => "cloning",
            PlanStatus::Migrating => "migrating",
            PlanStatus::DataTransFinished => "data_trans_finished",
            PlanStatus::Finished => "finished",
            PlanStatus::Error => "error",
            PlanStatus::Deleting => "deleting",
        }
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "creating" => Ok(PlanStatus::Creating),
            "initiating" => Ok(PlanStatus::Initiating),
            "created" => Ok(PlanStatus::Created),
            "available" => Ok(PlanStatus::Available),
            "cloning" => Ok(PlanStatus::Cloning),
            "migrating" => Ok(PlanStatus::Migrating),
            "data_trans_finished" => Ok(PlanStatus::DataTransFinished),
            "finished" => Ok(PlanStatus::Finished),
            "error" => Ok(PlanStatus::Error),
            "deleting" => Ok(PlanStatus::Deleting),
            other => Err(CoreError::UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanType {
    Clone,
    Migrate,
}

impl PlanType {
    pub fn as_str(self) -> &'static str {
        match self {
            PlanType::Clone => "clone",
            PlanType::Migrate => "migrate",
        }
    }
}

impl fmt::Display for PlanType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "clone" => Ok(PlanType::Clone),
            "migrate" => Ok(PlanType::Migrate),
            other => Err(CoreError::UnknownPlanType(other.to_string())),
        }
    }
}

/// Stack-engine status, as reported by the backing deployment service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StackStatus {
    #[serde(rename = "CREATE_IN_PROGRESS")]
    CreateInProgress,
    #[serde(rename = "CREATE_COMPLETE")]
    CreateComplete,
    #[serde(rename = "CREATE_FAILED")]
    CreateFailed,
    #[serde(rename = "DELETE_IN_PROGRESS")]
    DeleteInProgress,
    #[serde(rename = "DELETE_COMPLETE")]
    DeleteComplete,
    #[serde(rename = "DELETE_FAILED")]
    DeleteFailed,
}

impl StackStatus {
    pub fn is_create_terminal(self) -> bool {
        matches!(self, StackStatus::CreateComplete | StackStatus::CreateFailed)
    }

    /// Mirror a stack status into the plan status for a running deployment.
    pub fn mirror(self, plan_type: PlanType) -> PlanStatus {
        match self {
            StackStatus::CreateInProgress => match plan_type {
                PlanType::Clone => PlanStatus::Cloning,
                PlanType::Migrate => PlanStatus::Migrating,
            },
            StackStatus::CreateComplete => PlanStatus::Finished,
            _ => PlanStatus::Error,
        }
    }
}
