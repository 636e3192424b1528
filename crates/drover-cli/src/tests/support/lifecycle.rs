//! Recording lifecycle handler used in place of the real controller.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::Write;
use std::process::ExitCode;

use crate::{LifecycleCommand, LifecycleContext, LifecycleError, LifecycleOutput};

#[derive(Default)]
pub(crate) struct TestLifecycle {
    calls: RefCell<Vec<LifecycleCommand>>,
    failures: RefCell<VecDeque<LifecycleError>>,
}

impl TestLifecycle {
    pub(crate) fn fail_next_with(&self, error: LifecycleError) {
        self.failures.borrow_mut().push_back(error);
    }

    pub(crate) fn calls(&self) -> Vec<LifecycleCommand> {
        self.calls.borrow().clone()
    }

    pub(crate) fn handle<W: Write, E: Write>(
        &self,
        command: LifecycleCommand,
        _context: LifecycleContext<'_>,
        output: &mut LifecycleOutput<W, E>,
    ) -> Result<ExitCode, LifecycleError> {
        self.calls.borrow_mut().push(command);
        if let Some(error) = self.failures.borrow_mut().pop_front() {
            return Err(error);
        }
        output.stdout_line(format_args!("lifecycle {command} handled"))?;
        Ok(ExitCode::SUCCESS)
    }
}
