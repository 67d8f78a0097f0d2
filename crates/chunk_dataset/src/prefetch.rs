//! Background prefetch over any owned iterator.

use crossbeam_channel::{bounded, Receiver};
use std::thread::{self, JoinHandle};

pub const DEFAULT_PREFETCH_DEPTH: usize = 2;

/// Items produced on a worker thread and handed over through a bounded channel.
///
/// Dropping the consumer disconnects the channel; the worker stops at its next send.
pub struct Prefetch<T> {
    rx: Option<Receiver<T>>,
    worker: Option<JoinHandle<()>>,
    depth: usize,
}

pub fn prefetch<I>(iter: I, depth: usize) -> Prefetch<I::Item>
where
    I: Iterator + Send + 'static,
    I::Item: Send + 'static,
{
    let depth = depth.max(1);
    let (tx, rx) = bounded(depth);
    let worker = thread::spawn(move || {
        for item in iter {
            if tx.send(item).is_err() {
                tracing::debug!("prefetch consumer dropped; stopping producer");
                break;
            }
        }
    });
    Prefetch {
        rx: Some(rx),
        worker: Some(worker),
        depth,
    }
}

impl<T> Prefetch<T> {
    pub fn depth(&self) -> usize {
        self.depth
    }
}

impl<T> Iterator for Prefetch<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.rx.as_ref()?.recv().ok()
    }
}

impl<T> Drop for Prefetch<T> {
    fn drop(&mut self) {
        self.rx.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::warn!("prefetch worker panicked");
            }
        }
    }
}
