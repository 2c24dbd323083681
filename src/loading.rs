use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::hooks::LoadingSink;

/// Reference-counted busy indicator.
///
/// Concurrent requests share one indicator: the sink sees `start` when the
/// first request begins and `finish` when the last one settles, with nothing
/// in between.
#[derive(Default)]
pub struct LoadingManager {
    count: Mutex<usize>,
    sink: RwLock<Option<Arc<dyn LoadingSink>>>,
}

impl LoadingManager {
    pub fn new(sink: Option<Arc<dyn LoadingSink>>) -> Self {
        Self {
            count: Mutex::new(0),
            sink: RwLock::new(sink),
        }
    }

    pub fn set_sink(&self, sink: Option<Arc<dyn LoadingSink>>) {
        *self.sink.write() = sink;
    }

    pub fn start(&self) {
        let first = {
            let mut count = self.count.lock();
            *count += 1;
            *count == 1
        };
        if first {
            if let Some(sink) = self.sink() {
                sink.start();
            }
        }
    }

    pub fn finish(&self) {
        let last = {
            let mut count = self.count.lock();
            if *count == 0 {
                false
            } else {
                *count -= 1;
                *count == 0
            }
        };
        if last {
            if let Some(sink) = self.sink() {
                sink.finish();
            }
        }
    }

    /// Signals a failure, unless another request still owns the indicator.
    pub fn error(&self) {
        if self.is_active() {
            return;
        }
        if let Some(sink) = self.sink() {
            sink.error();
        }
    }

    pub fn is_active(&self) -> bool {
        *self.count.lock() > 0
    }

    // Callbacks run outside the counter lock so a sink may call back in.
    fn sink(&self) -> Option<Arc<dyn LoadingSink>> {
        self.sink.read().clone()
    }
}

/// Keeps the indicator raised for as long as it lives.
pub(crate) struct LoadingGuard<'a> {
    manager: Option<&'a LoadingManager>,
}

impl<'a> LoadingGuard<'a> {
    pub(crate) fn start(manager: &'a LoadingManager, enabled: bool) -> Self {
        if enabled {
            manager.start();
        }
        Self {
            manager: enabled.then_some(manager),
        }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        if let Some(manager) = self.manager.take() {
            manager.finish();
        }
    }
}
