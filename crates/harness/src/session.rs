//! Test session - session-scope and function-scope fixtures
//!
//! ```text
//! Session::start                      TestContext (per test)
//!   1. report init                      1. capture log level
//!   2. test-management init             2. application log collection
//!   3. run-output directory             3. aut / main_window / main_screen
//!   4. automation server
//!
//! both scopes are ScopeStacks; teardown runs in reverse order on every
//! exit path
//! ```

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::account::UserAccount;
use crate::artifact::TestInfo;
use crate::aut::Aut;
use crate::capture::{ScreenCapture, SystemScreenCapture};
use crate::config::HarnessConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::failure::FailureReporter;
use crate::fixtures::{CaseTracker, GuiDriver, NullTracker, ScopeStack};
use crate::logging::LogControl;
use crate::logs::collect_application_logs;
use crate::report::{DirectoryReporter, Reporter};
use crate::server::AutomationServer;

/// Result of running a single test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRecord {
    pub name: String,
    pub success: bool,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub screenshot: Option<PathBuf>,
}

/// Result of a whole session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub aborted: Option<String>,
    pub results: Vec<TestRecord>,
}

/// Configures the collaborators of a [`Session`]
pub struct SessionBuilder {
    config: HarnessConfig,
    reporter: Option<Arc<dyn Reporter>>,
    tracker: Option<Box<dyn CaseTracker>>,
    capture: Option<Box<dyn ScreenCapture>>,
    logs: Option<LogControl>,
}

impl SessionBuilder {
    pub fn reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn tracker(mut self, tracker: Box<dyn CaseTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn capture(mut self, capture: Box<dyn ScreenCapture>) -> Self {
        self.capture = Some(capture);
        self
    }

    pub fn log_control(mut self, logs: LogControl) -> Self {
        self.logs = Some(logs);
        self
    }

    /// Acquire the session-scope resources
    pub fn start(self) -> HarnessResult<Session> {
        let config = self.config;
        let reporter = self
            .reporter
            .unwrap_or_else(|| Arc::new(DirectoryReporter::new(config.paths.report_dir.clone())));
        let tracker = self.tracker.unwrap_or_else(|| Box::new(NullTracker));
        let capture = self
            .capture
            .unwrap_or_else(|| Box::new(SystemScreenCapture::new(config.timeouts.capture())));
        let logs = self
            .logs
            .unwrap_or_else(|| LogControl::detached(&config.log_level));

        let mut session = Session {
            config,
            reporter,
            tracker: Rc::new(RefCell::new(tracker)),
            capture,
            logs: Arc::new(logs),
            server_port: None,
            scope: ScopeStack::new("session"),
            aborted: None,
            results: Vec::new(),
        };

        // A failure below drops the session, which releases what was acquired
        session.reporter.init()?;

        session.tracker.borrow_mut().init_session()?;
        let tracker = session.tracker.clone();
        session
            .scope
            .push("test management", move || tracker.borrow_mut().finish_session());

        std::fs::create_dir_all(&session.config.paths.run_root)?;
        info!("Run output in {}", session.config.paths.run_root.display());

        if session.config.server.binary_path.is_some() {
            let mut server = AutomationServer::start(&session.config.server, session.config.timeouts.kill_grace())?;
            session.server_port = Some(server.port());
            session.scope.push("automation server", move || server.stop());
        }

        Ok(session)
    }
}

/// A test session
pub struct Session {
    config: HarnessConfig,
    reporter: Arc<dyn Reporter>,
    tracker: Rc<RefCell<Box<dyn CaseTracker>>>,
    capture: Box<dyn ScreenCapture>,
    logs: Arc<LogControl>,
    server_port: Option<u16>,
    scope: ScopeStack,
    aborted: Option<String>,
    results: Vec<TestRecord>,
}

impl Session {
    pub fn builder(config: HarnessConfig) -> SessionBuilder {
        SessionBuilder {
            config,
            reporter: None,
            tracker: None,
            capture: None,
            logs: None,
        }
    }

    /// Start a session with default collaborators
    pub fn start(config: HarnessConfig) -> HarnessResult<Self> {
        Self::builder(config).start()
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn reporter(&self) -> &Arc<dyn Reporter> {
        &self.reporter
    }

    /// Port of the automation server, if one was started
    pub fn server_port(&self) -> Option<u16> {
        self.server_port
    }

    pub fn log_control(&self) -> &LogControl {
        &self.logs
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.is_some()
    }

    pub fn results(&self) -> &[TestRecord] {
        &self.results
    }

    /// Run one test body inside function-scope fixtures.
    ///
    /// On an error or panic from `body` a screenshot is attached to the
    /// report before teardown. The outcome of `body` is returned unchanged;
    /// panics are resumed after teardown.
    pub fn run_test<T, F>(&mut self, test: &TestInfo, body: F) -> anyhow::Result<T>
    where
        F: FnOnce(&mut TestContext<'_>) -> anyhow::Result<T>,
    {
        if let Some(reason) = &self.aborted {
            warn!("Skipping {}: session aborted", test.full_name());
            return Err(HarnessError::SessionAborted(reason.clone()).into());
        }

        let start = Instant::now();
        info!("Running {}", test.full_name());

        let mut ctx = TestContext::new(&self.config, test.clone(), self.logs.clone());

        let previous = self.logs.level();
        match self.logs.set_level(&self.config.log_level) {
            Ok(()) => {
                let logs = self.logs.clone();
                ctx.scope.push("log level", move || logs.set_level(&previous));
            }
            Err(e) => warn!("Keeping current log level: {}", e),
        }
        {
            let reporter = self.reporter.clone();
            let status_dir = self.config.paths.status_data_dir.clone();
            ctx.scope.push("application logs", move || {
                collect_application_logs(&status_dir, reporter.as_ref()).map(|_| ())
            });
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(&mut ctx)));

        let error = match &outcome {
            Ok(Ok(_)) => None,
            Ok(Err(e)) => Some(format!("{:#}", e)),
            Err(payload) => Some(panic_message(payload.as_ref())),
        };

        let screenshot = if error.is_some() {
            FailureReporter::new(&self.config.paths.run_root, self.capture.as_ref(), self.reporter.as_ref())
                .on_failure(test)
        } else {
            None
        };

        ctx.finish();

        let success = error.is_none();
        if let Err(e) = self.tracker.borrow_mut().record(test, success) {
            warn!("Failed to record result of {}: {}", test.full_name(), e);
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        match &error {
            None => info!("✓ {} ({} ms)", test.full_name(), duration_ms),
            Some(e) => error!("✗ {} - {}", test.full_name(), e),
        }
        self.results.push(TestRecord {
            name: test.full_name(),
            success,
            duration_ms,
            error,
            screenshot,
        });

        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                if let Some(fatal) = e.downcast_ref::<HarnessError>().filter(|h| h.is_fatal()) {
                    error!("Aborting session: {}", fatal);
                    self.aborted = Some(fatal.to_string());
                }
                Err(e)
            }
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    pub fn summary(&self) -> SessionSummary {
        let passed = self.results.iter().filter(|r| r.success).count();
        SessionSummary {
            total: self.results.len(),
            passed,
            failed: self.results.len() - passed,
            aborted: self.aborted.clone(),
            results: self.results.clone(),
        }
    }

    /// Write the session summary to `<report_dir>/test-results.json`
    pub fn write_results(&self) -> HarnessResult<PathBuf> {
        let dir = &self.config.paths.report_dir;
        std::fs::create_dir_all(dir)?;

        let path = dir.join("test-results.json");
        let json = serde_json::to_string_pretty(&self.summary())?;
        std::fs::write(&path, json)?;

        info!("Results written to: {}", path.display());
        Ok(path)
    }

    /// Release session-scope resources and return the summary
    pub fn finish(mut self) -> SessionSummary {
        self.release();
        let summary = self.summary();
        info!(
            "Test Results: {} passed, {} failed",
            summary.passed, summary.failed
        );
        summary
    }

    /// Release the session scope. Later calls find nothing left to release.
    fn release(&mut self) {
        if self.scope.is_empty() {
            return;
        }
        let failures = self.scope.release_all();
        debug!("Session released ({} failure(s))", failures.len());
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.release();
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

/// Function-scope fixtures handed to a test body
pub struct TestContext<'a> {
    config: &'a HarnessConfig,
    test: TestInfo,
    logs: Arc<LogControl>,
    user_account: Option<UserAccount>,
    user_data: Option<PathBuf>,
    auts: Vec<Aut>,
    scope: ScopeStack,
}

impl<'a> TestContext<'a> {
    fn new(config: &'a HarnessConfig, test: TestInfo, logs: Arc<LogControl>) -> Self {
        Self {
            config,
            test,
            logs,
            user_account: None,
            user_data: None,
            auts: Vec::new(),
            scope: ScopeStack::new("function"),
        }
    }

    pub fn test(&self) -> &TestInfo {
        &self.test
    }

    pub fn config(&self) -> &HarnessConfig {
        self.config
    }

    /// Log level captured for this test
    pub fn log_level(&self) -> String {
        self.logs.level()
    }

    /// Artifact directory of this test, created on first use
    pub fn artifact_dir(&self) -> HarnessResult<PathBuf> {
        let dir = self.test.artifact_dir(&self.config.paths.run_root);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// The account for this test: the one set with
    /// [`with_user_account`](Self::with_user_account) or the default account
    pub fn user_account(&self) -> UserAccount {
        self.user_account
            .clone()
            .unwrap_or_else(|| self.config.default_account())
    }

    pub fn with_user_account(&mut self, account: UserAccount) -> &mut Self {
        self.user_account = Some(account);
        self
    }

    pub fn user_data(&self) -> Option<&Path> {
        self.user_data.as_deref()
    }

    /// Use an existing user-data directory for the application
    pub fn with_user_data(&mut self, dir: impl Into<PathBuf>) -> HarnessResult<&mut Self> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(HarnessError::UserDataNotFound(dir));
        }
        self.user_data = Some(dir);
        Ok(self)
    }

    /// Application handle using this test's user-data directory
    pub fn aut(&mut self) -> HarnessResult<&mut Aut> {
        let user_data = self.user_data.clone();
        self.new_aut(user_data)
    }

    /// Additional application instance with its own user-data directory
    pub fn multiple_instance(&mut self, user_data: Option<PathBuf>) -> HarnessResult<&mut Aut> {
        if let Some(dir) = &user_data {
            if !dir.is_dir() {
                return Err(HarnessError::UserDataNotFound(dir.clone()));
            }
        }
        self.new_aut(user_data)
    }

    fn new_aut(&mut self, user_data: Option<PathBuf>) -> HarnessResult<&mut Aut> {
        if !self.config.aut.binary_path.exists() {
            return Err(HarnessError::ApplicationNotFound(self.config.aut.binary_path.clone()));
        }
        self.auts.push(Aut::new(self.config, user_data));
        let index = self.auts.len() - 1;
        Ok(&mut self.auts[index])
    }

    /// Launch the application and hand its main window to `driver`
    pub fn main_window(&mut self, driver: &mut dyn GuiDriver) -> HarnessResult<&mut Aut> {
        let aut = self.aut()?;
        aut.launch()?;
        driver.wait_for_main_window(aut)?;
        Ok(aut)
    }

    /// [`main_window`](Self::main_window) with this test's account logged in
    pub fn main_screen(&mut self, driver: &mut dyn GuiDriver) -> HarnessResult<&mut Aut> {
        let account = self.user_account();
        let aut = self.main_window(driver)?;
        driver.authorize_user(&account)?;
        Ok(aut)
    }

    /// Stop applications, then release the remaining fixtures
    fn finish(mut self) {
        for aut in self.auts.iter_mut().rev() {
            if let Err(e) = aut.detach().stop() {
                warn!("Failed to stop application: {}", e);
            }
        }
        self.scope.release_all();
    }
}
