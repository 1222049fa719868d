//! Worker identity within a launched job.

use serde::{Deserialize, Serialize};

/// Number of low bits of a job id that form the local job number.
const LOCAL_JOBID_BITS: u32 = 16;

/// Identity of one spawned worker: the job it belongs to and its rank.
///
/// The rank is called the *vpid* (virtual process id) throughout the
/// runtime; it is the worker's ordinal position within its job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessName {
    /// Job id as assigned by the launcher. The upper bits identify the
    /// launching daemon, the lower bits the job local to it.
    pub jobid: u32,
    /// Rank within the job.
    pub vpid: u32,
}

impl ProcessName {
    pub fn new(jobid: u32, vpid: u32) -> Self {
        Self { jobid, vpid }
    }

    /// The job number local to the launching daemon.
    ///
    /// This is the value used in on-disk output paths.
    pub fn local_jobid(&self) -> u32 {
        self.jobid & ((1 << LOCAL_JOBID_BITS) - 1)
    }
}

impl std::fmt::Display for ProcessName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{},{}]", self.jobid, self.vpid)
    }
}
