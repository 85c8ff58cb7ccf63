//! 内核核心：状态、任务、调度、时间与时间片

pub mod cpu;
pub mod scheduler;
pub mod state;
pub mod task;
pub mod taskset;
pub mod time;
pub mod timeshare;

use crate::hal;

/// 进入中断上下文
///
/// tick 源或端口在 ISR 入口调用，支持嵌套。
/// 处于中断上下文时阻塞类操作会被拒绝。
pub fn enter_interrupt() {
    state::enter(|k| k.interrupt_nesting += 1);
}

/// 退出中断上下文
///
/// 嵌套计数归零时执行一次被推迟的调度。
pub fn exit_interrupt() {
    let resched = state::enter(|k| {
        k.interrupt_nesting = k.interrupt_nesting.saturating_sub(1);
        k.interrupt_nesting == 0 && k.scheduler_locked == 0
    });
    if resched {
        hal::request_reschedule();
    }
}

/// 当前是否处于中断上下文
pub fn is_inside_interrupt() -> bool {
    state::enter(|k| k.interrupt_nesting > 0)
}
