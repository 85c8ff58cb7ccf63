//! 内核初始化与启动

use crate::config::PRIORITY_IDLE;
use crate::error::types::Result;
use crate::hal;
use crate::info;
use crate::kernel::state;
use crate::kernel::task::Task;

/// 把内核重置回上电状态并注册 Idle 任务
///
/// 可以反复调用（测试之间就是这么用的）：上一代的任务线程
/// 被废弃，内核状态整体清零。
pub fn kernel_init() {
    #[cfg(any(test, feature = "hosted"))]
    hal::hosted::retire_threads();
    state::reset();
    Task::builder("idle")
        .priority(PRIORITY_IDLE)
        .spawn(idle_body)
        .expect("idle task registration cannot fail on a fresh kernel");
}

#[cfg(any(test, feature = "hosted"))]
fn idle_body() {
    loop {
        if !hal::hosted::idle_wait() {
            return;
        }
    }
}

#[cfg(not(any(test, feature = "hosted")))]
fn idle_body() {
    loop {
        core::hint::spin_loop();
    }
}

/// 启动调度，任务体从这之后开始执行
pub fn kernel_start() -> Result<()> {
    state::enter(|k| k.is_running = true);
    info!("kernel started");
    hal::request_reschedule();
    Ok(())
}
