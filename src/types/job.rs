use serde::Deserialize;

use crate::error::ValidationError;

/// Largest magnitude a score may have and still be stored exactly in an
/// IEEE-754 double, the native score type of a sorted-set index.
pub const MAX_EXACT_SCORE: i64 = 1 << 53;

/// A validated unit of work: an opaque key and the millisecond timestamp from
/// which it may be claimed.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Job {
    pub key: String,
    pub eligible_at: i64,
}

/// A request to schedule a job, as received from a producer. Nothing about it
/// is trusted until it has been converted into a [`Job`].
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct ScheduleRequest {
    #[serde(default)]
    pub key: Option<String>,
    /// Absent means "already due".
    #[serde(default, alias = "eligibleAt", alias = "runAt")]
    pub eligible_at: Option<i64>,
}

impl ScheduleRequest {
    pub fn new(key: impl Into<String>, eligible_at: i64) -> Self {
        Self {
            key: Some(key.into()),
            eligible_at: Some(eligible_at),
        }
    }

    /// A request for a job that is due as soon as it is indexed.
    pub fn immediate(key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            eligible_at: None,
        }
    }
}

impl From<Job> for ScheduleRequest {
    fn from(job: Job) -> Self {
        Self::new(job.key, job.eligible_at)
    }
}

// Validation is implemented to fulfil the TryFrom trait, so a Job can only
// exist in a valid state.
impl TryFrom<ScheduleRequest> for Job {
    type Error = ValidationError;

    fn try_from(request: ScheduleRequest) -> Result<Self, Self::Error> {
        let key = match request.key {
            None => return Err(ValidationError::MissingKey),
            Some(key) if key.is_empty() => {
                return Err(ValidationError::EmptyKey)
            },
            Some(key) => key,
        };

        // Zero, negative and absent timestamps all mean "due now".
        let eligible_at = request.eligible_at.unwrap_or(0);
        if !(-MAX_EXACT_SCORE..=MAX_EXACT_SCORE).contains(&eligible_at) {
            return Err(ValidationError::ScoreOutOfRange(eligible_at));
        }

        Ok(Job { key, eligible_at })
    }
}
