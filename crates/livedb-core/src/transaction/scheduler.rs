//! Deferred-dependency scheduler: orders effects
//! (e.g. live-query graph runs) triggered during a transaction's
//! `mutate` block so they only run once every declared dependency has
//! completed, and flags a programmer-error cycle as a hard failure
//! rather than silently dropping work.

use crate::error::{CollectionError, Result};
use std::cell::RefCell;
use std::collections::HashMap;

pub type JobId = u64;

struct Job {
    id: JobId,
    dependencies: Vec<JobId>,
    run: Option<Box<dyn FnOnce()>>,
}

thread_local! {
    static QUEUES: RefCell<HashMap<u64, Vec<Job>>> = RefCell::new(HashMap::new());
    static NEXT_JOB_ID: RefCell<JobId> = const { RefCell::new(0) };
}

fn next_job_id() -> JobId {
    NEXT_JOB_ID.with(|n| {
        let mut n = n.borrow_mut();
        *n += 1;
        *n
    })
}

/// Enqueue a job under `context_id` (the owning transaction's id),
/// blocked on `dependencies` (job ids previously returned by this
/// function, within the same context). Returns the new job's id.
pub fn schedule(context_id: u64, dependencies: Vec<JobId>, run: impl FnOnce() + 'static) -> JobId {
    let id = next_job_id();
    QUEUES.with(|q| {
        q.borrow_mut().entry(context_id).or_default().push(Job {
            id,
            dependencies,
            run: Some(Box::new(run)),
        });
    });
    id
}

/// Repeatedly run every job in `context_id` whose dependencies have
/// all completed, until the queue drains. A pass that completes
/// nothing while jobs remain means a dependency cycle (or a
/// dependency id from another context) — a programmer error reported
/// as [`CollectionError::SchedulerUnresolvedDependencies`], after
/// which the context is abandoned.
pub fn flush(context_id: u64) -> Result<()> {
    let mut completed: std::collections::HashSet<JobId> = std::collections::HashSet::new();

    loop {
        let runnable_ids: Vec<JobId> = QUEUES.with(|q| {
            q.borrow()
                .get(&context_id)
                .map(|jobs| {
                    jobs.iter()
                        .filter(|j| j.run.is_some() && j.dependencies.iter().all(|d| completed.contains(d)))
                        .map(|j| j.id)
                        .collect()
                })
                .unwrap_or_default()
        });

        if runnable_ids.is_empty() {
            break;
        }

        for id in &runnable_ids {
            let job = QUEUES.with(|q| {
                q.borrow_mut()
                    .get_mut(&context_id)
                    .and_then(|jobs| jobs.iter_mut().find(|j| j.id == *id))
                    .and_then(|j| j.run.take())
            });
            if let Some(run) = job {
                run();
            }
            completed.insert(*id);
        }
    }

    let remaining = QUEUES.with(|q| {
        q.borrow()
            .get(&context_id)
            .map(|jobs| jobs.iter().any(|j| j.run.is_some()))
            .unwrap_or(false)
    });

    QUEUES.with(|q| {
        q.borrow_mut().remove(&context_id);
    });

    if remaining {
        return Err(CollectionError::SchedulerUnresolvedDependencies);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;
    use std::rc::Rc;

    #[test]
    fn jobs_run_in_dependency_order() {
        let order = Rc::new(StdRefCell::new(Vec::new()));
        let o1 = order.clone();
        let first = schedule(1, vec![], move || o1.borrow_mut().push(1));
        let o2 = order.clone();
        schedule(1, vec![first], move || o2.borrow_mut().push(2));
        flush(1).unwrap();
        assert_eq!(*order.borrow(), vec![1, 2]);
    }

    #[test]
    fn unresolved_dependency_is_an_error() {
        schedule(2, vec![999], || {});
        assert!(matches!(
            flush(2),
            Err(CollectionError::SchedulerUnresolvedDependencies)
        ));
    }
}
