#![cfg_attr(not(any(test, feature = "hosted")), no_std)]
#[cfg(any(test, feature = "hosted"))]
extern crate std;
extern crate alloc;

pub mod compat;
pub mod config;
pub mod error;
pub mod hal;
pub mod ipc;
pub mod kernel;
pub mod log;
pub mod sync;
pub mod utils;

pub use error::types::{Result, RtosError};
pub use kernel::task::Task;
pub use kernel::time::{FOREVER, Ticks};
