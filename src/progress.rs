//! # Progress and cooperative cancellation
//!
//! The iterative reducers (t-SNE, UMAP) are written as explicit step machines
//! implementing [`StepReducer`]. A caller-controlled loop such as [`drive`] runs
//! one step at a time, checks the [`CancellationToken`] at each boundary and
//! reports a [`ProgressEvent`] after every completed step.

use crate::error::{Error, Result};
use crate::types::Point2D;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Reduction stage reported in progress events and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Pca,
    Tsne,
    Umap,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Pca => "pca",
            Stage::Tsne => "tsne",
            Stage::Umap => "umap",
        };
        f.write_str(name)
    }
}

/// `current` never decreases within a stage and never exceeds `total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub stage: Stage,
    pub current: usize,
    pub total: usize,
}

impl ProgressEvent {
    pub fn new(stage: Stage, current: usize, total: usize) -> Self {
        Self {
            stage,
            current: current.min(total),
            total,
        }
    }

    /// Completed fraction in `[0, 1]`. A zero total counts as complete.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.current as f64 / self.total as f64
        }
    }
}

/// Receiver of progress events. Implemented for every `FnMut(E)` closure.
pub trait ProgressSink<E> {
    fn report(&mut self, event: E);
}

impl<E, F> ProgressSink<E> for F
where
    F: FnMut(E),
{
    fn report(&mut self, event: E) {
        self(event)
    }
}

/// Sink that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl<E> ProgressSink<E> for NoProgress {
    fn report(&mut self, _event: E) {}
}

/// Shared flag used to request cooperative cancellation.
///
/// Clones observe the same flag, so a host can keep one handle and give another
/// to the running pipeline.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// An iterative reducer decomposed into discrete steps.
///
/// A step is the unit between two yield points: a batch of gradient iterations
/// for t-SNE, one epoch for UMAP.
pub trait StepReducer {
    fn stage(&self) -> Stage;

    /// Total amount of work in the unit reported by progress events.
    fn total(&self) -> usize;

    /// Work completed so far, same unit as [`StepReducer::total`].
    fn completed(&self) -> usize;

    fn is_done(&self) -> bool {
        self.completed() >= self.total()
    }

    /// Runs one step. Must not be called once [`StepReducer::is_done`] is true.
    fn step(&mut self) -> Result<()>;

    /// Consumes a finished reducer and returns one point per input row.
    fn into_embedding(self) -> Result<Vec<Point2D>>
    where
        Self: Sized;
}

/// Runs `reducer` to completion, yielding between steps.
///
/// Cancellation is checked before every step, so a request made from inside the
/// progress callback is honoured before the next step starts.
pub fn drive<R, S>(
    mut reducer: R,
    cancel: &CancellationToken,
    sink: &mut S,
) -> Result<Vec<Point2D>>
where
    R: StepReducer,
    S: ProgressSink<ProgressEvent> + ?Sized,
{
    let stage = reducer.stage();
    let total = reducer.total();
    while !reducer.is_done() {
        if cancel.is_cancelled() {
            info!("{} cancelled after {} of {}", stage, reducer.completed(), total);
            return Err(Error::Cancelled {
                stage,
                completed: reducer.completed(),
            });
        }
        reducer.step()?;
        sink.report(ProgressEvent::new(stage, reducer.completed(), total));
    }
    debug!("{} finished {} steps", stage, total);
    reducer.into_embedding()
}
