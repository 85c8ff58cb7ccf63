//! 兼容层模块
//!
//! 统一处理 no_std 和 hosted/test 环境的类型导入，
//! 避免在多个文件中重复编写条件编译代码。

#[cfg(not(any(test, feature = "hosted")))]
pub use alloc::{boxed::Box, string::String, sync::Arc, vec, vec::Vec};

#[cfg(any(test, feature = "hosted"))]
pub use std::{boxed::Box, string::String, sync::Arc, vec, vec::Vec};
