//! 系统时间与延时
//!
//! 内核时间是一个按节拍递增的计数器，由端口的节拍源驱动 `tick()`。
//! 睡眠任务的唤醒时间做精确匹配（不是 >=），配合回绕算术，
//! `delay_until` 在计数器回绕后依然正确。

use crate::error::types::{Result, RtosError};
use crate::hal;
use crate::kernel::state;
use crate::kernel::task::TaskStatus;
use crate::kernel::timeshare;

/// 节拍计数类型
pub type Ticks = u32;

/// 永不超时
pub const FOREVER: Ticks = Ticks::MAX;

/// 当前内核时间（节拍数）
pub fn now() -> Ticks {
    state::enter(|k| k.time)
}

/// 睡 `ticks` 个节拍
///
/// # 返回值
/// - `Ok(())`: 睡满了
/// - `Err(RtosError::Aborted)`: 被 wakeup 强制叫醒
/// - `Err(RtosError::OperationNotPermitted)`: 中断上下文、锁住的调度器或 Idle 任务
pub fn delay(ticks: Ticks) -> Result<()> {
    delay_common(ticks, false)
}

/// 睡到绝对时间 `wake`（精确匹配，含回绕）
pub fn delay_until(wake: Ticks) -> Result<()> {
    delay_common(wake, true)
}

fn delay_common(arg: Ticks, absolute: bool) -> Result<()> {
    let id = state::enter(|k| {
        let id = k.current_id().ok_or(RtosError::OperationNotPermitted)?;
        let priority = k.current_priority().ok_or(RtosError::OperationNotPermitted)?;
        if priority == crate::config::PRIORITY_IDLE {
            return Err(RtosError::OperationNotPermitted);
        }
        if !k.blocking_allowed() {
            return Err(RtosError::OperationNotPermitted);
        }
        let wake = if absolute {
            arg
        } else {
            k.time.wrapping_add(arg)
        };
        if wake == k.time {
            // 零延时（或正好是现在）：什么都不做
            return Ok(None);
        }
        let tcb = k.tasks.get_mut(priority).ok_or(RtosError::Failed)?;
        tcb.status = TaskStatus::Sleeping;
        tcb.wake_up_time = wake;
        k.ready.remove(priority);
        k.sleepers.add(priority);
        if k.timeshare.contains(priority) {
            // 分时任务睡了，给排队的同伴让位
            timeshare::schedule_peer(k);
        }
        Ok(Some(id))
    })?;
    let Some(id) = id else {
        return Ok(());
    };

    hal::request_reschedule();

    state::enter(|k| {
        let Some(priority) = k.tasks.find_by_id(id) else {
            return Err(RtosError::Aborted);
        };
        let tcb = k.tasks.get_mut(priority).ok_or(RtosError::Failed)?;
        let status = tcb.status;
        tcb.status = TaskStatus::Active;
        match status {
            TaskStatus::Awakened => Err(RtosError::Aborted),
            _ => Ok(()),
        }
    })
}

/// 节拍处理，由端口的节拍源（或测试）调用
///
/// 依次做三件事：给当前分时任务记账、推进时间、唤醒到点的睡眠任务。
pub fn tick() {
    state::enter(|k| {
        timeshare::manage_running(k);
        k.time = k.time.wrapping_add(1);
        let now = k.time;
        for priority in k.sleepers.iter() {
            let due = k
                .tasks
                .get(priority)
                .is_some_and(|t| t.wake_up_time == now);
            if !due {
                continue;
            }
            let chan = k.tasks.get_mut(priority).and_then(|t| {
                t.status = TaskStatus::TimedOut;
                t.wait_for.take()
            });
            if let Some(chan) = chan {
                crate::sync::event::detach_waiter(k, chan, priority);
            }
            k.sleepers.remove(priority);
            k.ready.add(priority);
        }
    });
    hal::request_reschedule();
}
