//! Scoped resources and the collaborator seams used by test fixtures

use tracing::{debug, warn};

use crate::account::UserAccount;
use crate::artifact::TestInfo;
use crate::aut::Aut;
use crate::error::{HarnessError, HarnessResult};

type Release = Box<dyn FnOnce() -> HarnessResult<()>>;

/// Releases registered resources in reverse acquisition order.
///
/// Every release runs even if an earlier one failed; failures are logged and
/// returned. Dropping the stack releases whatever is left.
pub struct ScopeStack {
    scope: &'static str,
    entries: Vec<(String, Release)>,
}

impl ScopeStack {
    pub fn new(scope: &'static str) -> Self {
        Self {
            scope,
            entries: Vec::new(),
        }
    }

    /// Register a release action for a resource that was just acquired
    pub fn push<F>(&mut self, name: impl Into<String>, release: F)
    where
        F: FnOnce() -> HarnessResult<()> + 'static,
    {
        let name = name.into();
        debug!("[{}] acquired {}", self.scope, name);
        self.entries.push((name, Box::new(release)));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn release_all(&mut self) -> Vec<(String, HarnessError)> {
        let mut failures = Vec::new();
        while let Some((name, release)) = self.entries.pop() {
            debug!("[{}] releasing {}", self.scope, name);
            if let Err(e) = release() {
                warn!("[{}] failed to release {}: {}", self.scope, name, e);
                failures.push((name, e));
            }
        }
        failures
    }
}

impl Drop for ScopeStack {
    fn drop(&mut self) {
        self.release_all();
    }
}

/// GUI-automation collaborator that drives the application's windows
pub trait GuiDriver {
    /// Wait for the main window of `aut` to appear and prepare it
    fn wait_for_main_window(&mut self, aut: &Aut) -> HarnessResult<()>;

    /// Log `account` in through the main window
    fn authorize_user(&mut self, account: &UserAccount) -> HarnessResult<()>;
}

/// Test-case tracking collaborator
pub trait CaseTracker {
    fn init_session(&mut self) -> HarnessResult<()> {
        Ok(())
    }

    /// Record the outcome of one test
    fn record(&mut self, _test: &TestInfo, _passed: bool) -> HarnessResult<()> {
        Ok(())
    }

    fn finish_session(&mut self) -> HarnessResult<()> {
        Ok(())
    }
}

/// Tracker that records nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTracker;

impl CaseTracker for NullTracker {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_release_runs_in_reverse_order() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let mut stack = ScopeStack::new("function");
        for name in ["first", "second", "third"] {
            let order = order.clone();
            stack.push(name, move || {
                order.borrow_mut().push(name);
                Ok(())
            });
        }
        assert_eq!(stack.len(), 3);

        assert!(stack.release_all().is_empty());
        assert_eq!(*order.borrow(), vec!["third", "second", "first"]);
        assert!(stack.is_empty());
    }

    #[test]
    fn test_failed_release_does_not_stop_others() {
        let released = Rc::new(RefCell::new(0));
        let mut stack = ScopeStack::new("session");
        {
            let released = released.clone();
            stack.push("ok", move || {
                *released.borrow_mut() += 1;
                Ok(())
            });
        }
        stack.push("broken", || Err(HarnessError::Report("disk full".to_string())));

        let failures = stack.release_all();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "broken");
        assert_eq!(*released.borrow(), 1);
    }

    #[test]
    fn test_drop_releases_remaining() {
        let released = Rc::new(RefCell::new(false));
        {
            let mut stack = ScopeStack::new("function");
            let released = released.clone();
            stack.push("resource", move || {
                *released.borrow_mut() = true;
                Ok(())
            });
        }
        assert!(*released.borrow());
    }
}
