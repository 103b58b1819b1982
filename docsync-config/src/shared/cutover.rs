use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Name of the environment variable selecting the cutover basis.
pub const CUTOVER_BASIS_ENV_NAME: &str = "DOCSYNC_OPSTIME";

/// Date format of `firstOpTime`.
pub const FIRST_OP_TIME_FORMAT: &str = "%Y-%m-%d";

/// Which point in time separates copied documents from streamed ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CutoverBasis {
    /// No cutover time, the copy phase is skipped and streaming starts from now.
    #[default]
    None,
    /// Start of the previous UTC day.
    Yesterday,
    /// Midnight UTC of the configured `firstOpTime`.
    FirstOpTime,
}

impl CutoverBasis {
    /// Reads the basis from [`CUTOVER_BASIS_ENV_NAME`].
    ///
    /// An unset or empty variable selects [`CutoverBasis::None`].
    pub fn from_env() -> Result<Self, ValidationError> {
        match std::env::var(CUTOVER_BASIS_ENV_NAME) {
            Ok(value) => Self::try_from(value.as_str()),
            Err(_) => Ok(Self::None),
        }
    }
}

impl TryFrom<&str> for CutoverBasis {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim() {
            "" => Ok(Self::None),
            "1" => Ok(Self::Yesterday),
            "2" => Ok(Self::FirstOpTime),
            other => Err(ValidationError::InvalidCutoverBasis {
                name: CUTOVER_BASIS_ENV_NAME,
                value: other.to_owned(),
            }),
        }
    }
}

impl fmt::Display for CutoverBasis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Yesterday => write!(f, "yesterday"),
            Self::FirstOpTime => write!(f, "firstOpTime"),
        }
    }
}

/// Resolved cutover settings of a pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CutoverConfig {
    pub basis: CutoverBasis,
    /// Parsed `firstOpTime`, only consulted for [`CutoverBasis::FirstOpTime`].
    pub first_op_time: Option<NaiveDate>,
}

/// Parses a `firstOpTime` value.
pub fn parse_first_op_time(value: &str) -> Result<NaiveDate, ValidationError> {
    NaiveDate::parse_from_str(value.trim(), FIRST_OP_TIME_FORMAT)
        .map_err(|_| ValidationError::InvalidFirstOpTime(value.to_owned()))
}
