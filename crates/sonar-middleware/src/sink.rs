//! Logger sink used by the logging decorators.

use tracing::Dispatch;

/// Where logging middleware sends its events.
///
/// The default sink is the global `tracing` subscriber. A sink built from
/// a [`Dispatch`] scopes every event to that subscriber instead, which is
/// how callers inject their own logger.
#[derive(Clone, Default)]
pub struct LogSink {
    dispatch: Option<Dispatch>,
}

impl LogSink {
    /// Logs to the global subscriber.
    #[must_use]
    pub fn global() -> Self {
        Self::default()
    }

    /// Logs to the given dispatcher.
    #[must_use]
    pub fn new(dispatch: Dispatch) -> Self {
        Self {
            dispatch: Some(dispatch),
        }
    }

    /// Drops every event.
    #[must_use]
    pub fn discard() -> Self {
        Self::new(Dispatch::none())
    }

    /// Runs `emit` with this sink as the current subscriber.
    pub fn emit<F: FnOnce()>(&self, emit: F) {
        match &self.dispatch {
            Some(dispatch) => tracing::dispatcher::with_default(dispatch, emit),
            None => emit(),
        }
    }
}

impl std::fmt::Debug for LogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSink")
            .field("scoped", &self.dispatch.is_some())
            .finish()
    }
}
