//! Remote command execution for tessera.
//!
//! This crate provides:
//! - A [`RemoteExecutor`] trait for running commands and moving files on an instance
//! - An ssh/scp implementation and an HTTP command-broker implementation
//! - A scripted executor for deterministic tests
//! - A [`Context`] carrying a deadline and cancellation flag through every call
//!
//! # Example
//!
//! ```no_run
//! use remote::{Context, Endpoint, RemoteExecutor, SshExecutor, SshOptions, StaticInventory};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let inventory = StaticInventory::new().with("ws1", Endpoint::host("10.0.0.7"));
//! let executor = SshExecutor::new(Arc::new(inventory), SshOptions::default());
//!
//! let ctx = Context::with_timeout(Duration::from_secs(30));
//! let result = executor.execute(&ctx, "ws1", "uname -a").unwrap();
//! println!("{}", result.stdout);
//! ```

pub mod context;
pub mod error;
pub mod executor;
mod process;
pub mod resolver;
pub mod types;

pub use context::{CancelHandle, Context};
pub use error::{Error, ErrorCategory, Result};
pub use executor::broker::BrokerExecutor;
pub use executor::scripted::{CallKind, Fault, RecordedCall, ScriptedExecutor};
pub use executor::ssh::{SshExecutor, SshOptions};
pub use executor::{RemoteExecutor, SharedExecutor};
pub use resolver::{InstanceResolver, StaticInventory};
pub use types::{Endpoint, ExecutionResult};
