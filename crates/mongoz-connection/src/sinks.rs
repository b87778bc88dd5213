//! Host callbacks for `ConnectionManager::run_query`
//!
//! Both are called synchronously on the thread that called `run_query`.

use mongoz_core::{CollectionResult, Result};

/// Told when a load starts and when it has finished, whatever the outcome
pub trait LoadingSink {
    fn loading_started(&self);
    fn loading_finished(&self);
}

/// Receives the outcome of a load
pub trait ResultSink {
    fn deliver(&self, result: Result<CollectionResult>);
}

impl<F> ResultSink for F
where
    F: Fn(Result<CollectionResult>),
{
    fn deliver(&self, result: Result<CollectionResult>) {
        self(result)
    }
}

/// A `LoadingSink` for hosts without a loading indicator
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLoadingSink;

impl LoadingSink for NoLoadingSink {
    fn loading_started(&self) {}

    fn loading_finished(&self) {}
}

/// Calls `loading_finished` when dropped
pub(crate) struct LoadingGuard<'a> {
    sink: &'a dyn LoadingSink,
}

impl<'a> LoadingGuard<'a> {
    pub(crate) fn start(sink: &'a dyn LoadingSink) -> Self {
        sink.loading_started();
        Self { sink }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.sink.loading_finished();
    }
}
