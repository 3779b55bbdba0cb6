//! AUT Harness
//!
//! Session and process management for end-to-end UI tests of a desktop
//! application (the application under test, AUT):
//! - Finds and frees TCP ports, kills and runs processes
//! - Launches, attaches to and stops application instances
//! - Composes session and per-test fixtures with ordered teardown
//! - Captures a screenshot when a test fails and attaches application logs
//!   to the report
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Session                                                    │
//! │    ├── Reporter::init / CaseTracker::init_session           │
//! │    ├── run-output directory                                 │
//! │    ├── AutomationServer (free port, killed at teardown)     │
//! │    └── run_test(TestInfo, |ctx| ...)                        │
//! │          ├── TestContext: aut / main_window / main_screen   │
//! │          ├── FailureReporter (screenshot on error/panic)    │
//! │          └── application log collection                     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  system: find_process_by_port, find_free_port,              │
//! │          kill_process, execute, run                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod account;
pub mod artifact;
pub mod aut;
pub mod capture;
pub mod config;
pub mod error;
pub mod failure;
pub mod fixtures;
pub mod logging;
pub mod logs;
pub mod report;
pub mod server;
pub mod session;
pub mod system;

pub use account::UserAccount;
pub use artifact::TestInfo;
pub use aut::{Aut, AutStatus};
pub use config::HarnessConfig;
pub use error::{HarnessError, HarnessResult};
pub use fixtures::{CaseTracker, GuiDriver, NullTracker};
pub use report::{Attachment, AttachmentType, DirectoryReporter, MemoryReporter, Reporter};
pub use session::{Session, SessionSummary, TestContext};
