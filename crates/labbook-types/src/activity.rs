//! Activity record vocabulary shared by the activity store and the monitor
//! pipeline. Numeric values are bit-exact with the original implementation's
//! on-disk/log encoding (`records.py`) since activity logs are permanent
//! commit-message history and cannot be renumbered after the fact.

use serde::{Deserialize, Serialize};

/// Category of an activity record (one entry in the activity journal).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ActivityType {
    Note = 0,
    Environment = 1,
    Code = 2,
    InputData = 3,
    OutputData = 4,
    Milestone = 5,
    Branch = 6,
}

impl ActivityType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Note),
            1 => Some(Self::Environment),
            2 => Some(Self::Code),
            3 => Some(Self::InputData),
            4 => Some(Self::OutputData),
            5 => Some(Self::Milestone),
            6 => Some(Self::Branch),
            _ => None,
        }
    }
}

/// Category of a single detail attached to an activity record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ActivityDetailType {
    CodeExecuted = 0,
    Result = 1,
    Environment = 2,
    Code = 3,
    InputData = 4,
    OutputData = 5,
}

impl ActivityDetailType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::CodeExecuted),
            1 => Some(Self::Result),
            2 => Some(Self::Environment),
            3 => Some(Self::Code),
            4 => Some(Self::InputData),
            5 => Some(Self::OutputData),
            _ => None,
        }
    }
}

/// The action a detail represents against the section it touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityAction {
    Create,
    Edit,
    Delete,
    Execute,
    NoAccess,
}
