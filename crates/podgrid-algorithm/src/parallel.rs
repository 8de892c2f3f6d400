//! Bounded fan-out of independent CPU-bound work over scoped threads.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

/// Evaluate `f(0..pieces)` on at most `workers` threads, returning results in index order.
pub fn parallelize<T, F>(workers: usize, pieces: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Sync,
{
    if pieces == 0 {
        return Vec::new();
    }
    let workers = workers.clamp(1, pieces);
    if workers == 1 {
        return (0..pieces).map(&f).collect();
    }

    let next = AtomicUsize::new(0);
    let mut indexed: Vec<(usize, T)> = thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                scope.spawn(|| {
                    let mut out = Vec::new();
                    loop {
                        let i = next.fetch_add(1, Ordering::Relaxed);
                        if i >= pieces {
                            break;
                        }
                        out.push((i, f(i)));
                    }
                    out
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| match h.join() {
                Ok(out) => out,
                Err(panic) => std::panic::resume_unwind(panic),
            })
            .collect()
    });
    indexed.sort_by_key(|(i, _)| *i);
    indexed.into_iter().map(|(_, t)| t).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_order() {
        let out = parallelize(4, 100, |i| i * 2);
        assert_eq!(out, (0..100).map(|i| i * 2).collect::<Vec<_>>());
    }

    #[test]
    fn handles_more_workers_than_pieces() {
        assert_eq!(parallelize(16, 3, |i| i), vec![0, 1, 2]);
        assert!(parallelize(4, 0, |i| i).is_empty());
    }

    #[test]
    fn every_piece_runs_once() {
        let counter = AtomicUsize::new(0);
        parallelize(8, 1000, |_| counter.fetch_add(1, Ordering::Relaxed));
        assert_eq!(counter.load(Ordering::Relaxed), 1000);
    }
}
