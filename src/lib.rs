//! Command-execution engine for a minimal interactive shell.
//!
//! A tokenized command line is classified into one of four shapes (simple,
//! background, redirected, piped) and run with the matching
//! fork/exec/pipe/redirect choreography. The [`Dispatcher`] owns the
//! lifecycle: [`Dispatcher::setup`] before the first command,
//! [`Dispatcher::dispatch`] per command, [`Dispatcher::teardown`] at exit.
//!
//! ```no_run
//! use forksh::{Config, Dispatcher};
//!
//! let mut sh = Dispatcher::new(Config::default());
//! sh.setup().unwrap();
//! sh.dispatch(&["printf", "a\\nb\\n", "|", "wc", "-l"]);
//! sh.teardown().unwrap();
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod reaper;
pub mod shape;
pub mod signals;
pub mod spawn;
pub mod wiring;

pub use config::{Config, ReapMode};
pub use dispatcher::{Dispatcher, Outcome};
pub use error::{ChildError, DispatchError, ShapeError};
pub use shape::{classify, plan, Plan, Shape};
pub use spawn::{ExitState, Os, SystemOs, ABNORMAL_EXIT};
