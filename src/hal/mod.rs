//! 硬件抽象层 (HAL)
//!
//! 内核只通过四个端口函数接触执行环境：起任务执行流、
//! 执行被推迟的调度、执行让出、收尾退出的任务。
//! hosted 端口用一个 std 线程模拟一个任务上下文；
//! 裸机端口把这四个函数接到上下文切换陷阱上。

pub mod traits;

#[cfg(any(test, feature = "hosted"))]
pub mod hosted;
#[cfg(not(any(test, feature = "hosted")))]
pub mod bare;

pub use traits::*;

#[cfg(any(test, feature = "hosted"))]
pub(crate) use hosted::{finish_task, request_reschedule, request_yield, spawn_task_thread};

#[cfg(not(any(test, feature = "hosted")))]
pub(crate) use bare::{finish_task, request_reschedule, request_yield, spawn_task_thread};
