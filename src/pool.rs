use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, mpsc};
use std::thread;

use crate::error::KiraError;

/// Runs one job, turning a panic into [`KiraError::WorkerPanic`] so a faulty
/// collaborator fails its own task rather than the whole pool.
pub fn catch_panic<R>(job: impl FnOnce() -> Result<R, KiraError>) -> Result<R, KiraError> {
    panic::catch_unwind(AssertUnwindSafe(job))
        .unwrap_or_else(|payload| Err(KiraError::WorkerPanic(panic_message(payload.as_ref()))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs `work` over `items` on one scoped thread per worker state.
///
/// `work` must not panic: a panic propagates out of the scope. Wrap fallible
/// collaborator calls in [`catch_panic`].
///
/// Each worker owns its state exclusively (a session, a client, or `()`), so
/// nothing mutable is shared between threads except the job queue. Results come
/// back in completion order; callers sort when they need determinism.
pub fn run_bounded<T, S, R, F>(items: Vec<T>, states: Vec<S>, work: F) -> Vec<R>
where
    T: Send,
    S: Send,
    R: Send,
    F: Fn(&mut S, T) -> R + Sync,
{
    if items.is_empty() || states.is_empty() {
        return Vec::new();
    }

    let workers = states.len().min(items.len());
    let queue = Mutex::new(items.into_iter().collect::<VecDeque<_>>());
    let (tx, rx) = mpsc::channel();

    thread::scope(|scope| {
        for mut state in states.into_iter().take(workers) {
            let tx = tx.clone();
            let queue = &queue;
            let work = &work;
            scope.spawn(move || {
                loop {
                    let next = match queue.lock() {
                        Ok(mut guard) => guard.pop_front(),
                        Err(poisoned) => poisoned.into_inner().pop_front(),
                    };
                    let Some(item) = next else {
                        break;
                    };
                    if tx.send(work(&mut state, item)).is_err() {
                        break;
                    }
                }
            });
        }
    });
    drop(tx);

    rx.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[test]
    fn every_item_produces_one_result() {
        let mut results = run_bounded((0..50).collect(), vec![(); 4], |_, item: u32| item * 2);
        results.sort();
        assert_eq!(results, (0..50).map(|item| item * 2).collect::<Vec<_>>());
    }

    #[test]
    fn concurrency_never_exceeds_worker_count() {
        let active = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        run_bounded((0..24).collect::<Vec<u32>>(), vec![(); 3], |_, _| {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(5));
            active.fetch_sub(1, Ordering::SeqCst);
        });
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[test]
    fn worker_state_is_not_shared() {
        let states = (0..4).map(|id| (id, Vec::new())).collect::<Vec<_>>();
        let results = run_bounded(
            (0..40).collect(),
            states,
            |(id, seen): &mut (usize, Vec<u32>), item: u32| {
                seen.push(item);
                (*id, seen.len())
            },
        );
        assert_eq!(results.len(), 40);
        let workers = results.iter().map(|(id, _)| *id).collect::<HashSet<_>>();
        assert!(workers.len() <= 4);
    }

    #[test]
    fn panicking_job_fails_only_itself() {
        let mut results = run_bounded((0..6).collect(), vec![(); 2], |_, item: u32| {
            (
                item,
                catch_panic(|| {
                    if item == 3 {
                        panic!("bad item {item}");
                    }
                    Ok(item)
                }),
            )
        });
        results.sort_by_key(|(item, _)| *item);
        assert_eq!(results.len(), 6);
        assert!(matches!(
            &results[3].1,
            Err(KiraError::WorkerPanic(message)) if message == "bad item 3"
        ));
        assert!(results.iter().filter(|(_, result)| result.is_ok()).count() == 5);
    }

    #[test]
    fn empty_inputs() {
        let results: Vec<u32> = run_bounded(Vec::<u32>::new(), vec![(); 2], |_, item| item);
        assert!(results.is_empty());
    }
}
