use std::time::Duration;

use serde::Serialize;

/// Instruction to re-invoke reconciliation after a delay, without an error.
///
/// The zero value means "no explicit requeue": the pipeline moves on to the
/// next phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RequeueDirective {
    pub after: Option<Duration>,
}

impl RequeueDirective {
    pub const fn none() -> Self {
        Self { after: None }
    }

    pub const fn after(delay: Duration) -> Self {
        Self { after: Some(delay) }
    }

    pub const fn after_secs(secs: u64) -> Self {
        Self::after(Duration::from_secs(secs))
    }

    pub const fn after_millis(millis: u64) -> Self {
        Self::after(Duration::from_millis(millis))
    }

    pub const fn is_zero(&self) -> bool {
        self.after.is_none()
    }
}
