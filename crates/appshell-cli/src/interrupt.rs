//! Ctrl-C handling. An interrupt cancels the context of the fragment being
//! evaluated; with nothing running it ends the process.

use std::sync::{Arc, Mutex, PoisonError};

use appshell::Context;

/// Exit status of a process ended by SIGINT.
const INTERRUPTED_EXIT_CODE: i32 = 130;

/// The context of the evaluation in progress, shared with the signal
/// handler.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    current: Arc<Mutex<Option<Context>>>,
}

impl Interrupt {
    /// Installs the process-wide Ctrl-C handler.
    pub fn install() -> Result<Self, ctrlc::Error> {
        let interrupt = Self::default();
        let handler = interrupt.clone();
        ctrlc::set_handler(move || {
            if !handler.cancel() {
                std::process::exit(INTERRUPTED_EXIT_CODE);
            }
        })?;
        Ok(interrupt)
    }

    /// Starts an evaluation with a fresh context, cancellable until the
    /// returned guard is dropped.
    #[must_use]
    pub fn begin(&self) -> Evaluation<'_> {
        let ctx = Context::background();
        *self.lock() = Some(ctx.clone());
        Evaluation { interrupt: self, ctx }
    }

    /// Cancels the running evaluation; `false` when there is none.
    pub fn cancel(&self) -> bool {
        match self.lock().as_ref() {
            Some(ctx) => {
                tracing::debug!("interrupt: cancelling evaluation");
                ctx.cancel();
                true
            }
            None => false,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Context>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct Evaluation<'a> {
    interrupt: &'a Interrupt,
    ctx: Context,
}

impl Evaluation<'_> {
    #[must_use]
    pub fn context(&self) -> &Context {
        &self.ctx
    }
}

impl Drop for Evaluation<'_> {
    fn drop(&mut self) {
        *self.interrupt.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn interrupt_cancels_only_the_running_evaluation() {
        let interrupt = Interrupt::default();
        assert!(!interrupt.cancel());

        let first = interrupt.begin();
        assert!(interrupt.cancel());
        assert!(first.context().check().is_err());
        drop(first);
        assert!(!interrupt.cancel());

        let second = interrupt.begin();
        assert_eq!(second.context().check(), Ok(()));
    }
}
