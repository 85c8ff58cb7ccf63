//! 调度器
//!
//! 抢占式固定优先级调度：就绪集合里最高优先级的任务获得 CPU。
//! 就绪集合包含正在执行的任务，Idle（优先级 0）永远就绪，
//! 所以调度决策永远有结果。
//!
//! 调度决策本身只是改 `current`，真正的上下文切换由端口在
//! 被推迟的调度点（`hal::request_reschedule`）完成。

#[cfg(feature = "smp")]
pub mod smp;

use crate::error::types::{Result, RtosError};
use crate::hal;
use crate::kernel::state::{self, KernelState};
use crate::kernel::taskset::TaskSet;

#[cfg(feature = "smp")]
use crate::kernel::cpu;

use crate::config::PRIORITY_IDLE;

/// 正常调度决策：就绪集合里最高优先级的任务成为 current
///
/// 调度器被锁住时维持现状。
pub(crate) fn schedule(k: &mut KernelState) {
    if k.scheduler_locked > 0 {
        return;
    }
    #[cfg(not(feature = "smp"))]
    if let Some(priority) = k.ready.highest() {
        let id = k.tasks.id_at(priority);
        k.set_current(id);
    }
    #[cfg(feature = "smp")]
    smp::schedule_on(k, cpu::current_cpu());
}

/// 主动让出时的调度决策
///
/// 候选者是就绪集合里严格低于当前任务的优先级（Idle 和自己除外），
/// 没有更低的就绪任务时退回到"除自己外最高"；
/// 一个候选者都没有时当前任务继续执行。
pub(crate) fn schedule_for_yield(k: &mut KernelState) {
    if k.scheduler_locked > 0 {
        return;
    }
    let Some(current) = k.current_priority() else {
        schedule(k);
        return;
    };
    let mut candidates = k.ready;
    candidates.remove(PRIORITY_IDLE);
    candidates.remove(current);
    let lower = candidates.intersect(TaskSet::below(current));
    let pick = lower.highest().or_else(|| candidates.highest());
    if let Some(priority) = pick {
        let id = k.tasks.id_at(priority);
        k.set_current(id);
    }
}

/// 锁住调度器，支持嵌套
///
/// 锁住期间当前任务不会被换下，但中断照常响应。
pub fn lock_scheduler() {
    state::enter(|k| k.scheduler_locked += 1);
}

/// 解锁调度器
///
/// 计数归零时立即执行一次调度，把锁住期间被推迟的抢占补上。
/// 没锁就解报 Failed。
pub fn unlock_scheduler() -> Result<()> {
    let resched = state::enter(|k| {
        if k.scheduler_locked == 0 {
            return Err(RtosError::Failed);
        }
        k.scheduler_locked -= 1;
        Ok(k.scheduler_locked == 0 && k.interrupt_nesting == 0)
    })?;
    if resched {
        hal::request_reschedule();
    }
    Ok(())
}

pub fn is_scheduler_locked() -> bool {
    state::enter(|k| k.scheduler_locked > 0)
}

/// 主动把 CPU 让给更低优先级的就绪任务
///
/// 中断上下文或锁住的调度器下是空操作。
pub fn yield_priority() {
    let allowed = state::enter(|k| k.blocking_allowed() && k.current_id().is_some());
    if allowed {
        hal::request_yield();
    }
}
