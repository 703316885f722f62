use std::cmp::{Ordering, Reverse};

use crate::workflow::job::ManufacturingJob;
use crate::workflow::stages::Method;

/// Dispatch ordering over a set of jobs.
///
/// Eligible jobs are those of one method sitting at that method's dispatch
/// stage. Order: priority descending, then oldest creation first, then job id
/// so that the ordering is total and repeatable.
#[derive(Debug, Default, Clone, Copy)]
pub struct JobQueue;

impl JobQueue {
    pub fn is_eligible(job: &ManufacturingJob, method: Method) -> bool {
        job.method == method && job.current_stage == method.dispatch_stage()
    }

    /// Comparator placing the job to dispatch first at the front.
    pub fn dispatch_order(a: &ManufacturingJob, b: &ManufacturingJob) -> Ordering {
        (Reverse(a.priority), a.created_at, &a.job_id).cmp(&(
            Reverse(b.priority),
            b.created_at,
            &b.job_id,
        ))
    }

    pub fn next_eligible<'a, I>(jobs: I, method: Method) -> Option<&'a ManufacturingJob>
    where
        I: IntoIterator<Item = &'a ManufacturingJob>,
    {
        jobs.into_iter()
            .filter(|job| Self::is_eligible(job, method))
            .min_by(|a, b| Self::dispatch_order(a, b))
    }

    /// Eligible jobs of `method` in dispatch order.
    pub fn ordered<'a, I>(jobs: I, method: Method) -> Vec<&'a ManufacturingJob>
    where
        I: IntoIterator<Item = &'a ManufacturingJob>,
    {
        let mut eligible: Vec<&ManufacturingJob> = jobs
            .into_iter()
            .filter(|job| Self::is_eligible(job, method))
            .collect();
        eligible.sort_by(|a, b| Self::dispatch_order(a, b));
        eligible
    }
}
