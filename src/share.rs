use crate::codec::bin_to_hex;
use crate::hash::HashResult;
use crate::job::Job;

/// A found share, ready to be sent back to the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareSubmission {
    pub miner_id: String,
    pub job_id: String,
    pub nonce: String,
    pub result: String,
}

impl ShareSubmission {
    pub fn new(job: &Job, found: &HashResult) -> Self {
        ShareSubmission {
            miner_id: job.miner_id.clone(),
            job_id: job.job_id.clone(),
            nonce: bin_to_hex(&found.nonce),
            result: bin_to_hex(&found.digest),
        }
    }
}
