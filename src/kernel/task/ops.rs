//! 任务生命周期操作
//!
//! 这些操作的共同模式：在一个临界区里完成全部状态变更，
//! 把"要不要调度"作为结果带出来，在临界区外执行被推迟的调度。

use super::{LINK_PREEMPTED, LINK_WAIT, Task, TaskStatus};
use crate::config::{PRIORITY_HIGHEST, PRIORITY_IDLE};
use crate::debug;
use crate::error::types::{Result, RtosError};
use crate::hal;
use crate::kernel::state::{self, KernelState};
use crate::kernel::taskset::Priority;
use crate::kernel::timeshare::fcfs;
use crate::sync::event;

#[cfg(feature = "smp")]
use crate::kernel::cpu::{self, CpuId};
#[cfg(feature = "smp")]
use crate::kernel::scheduler;

/// 把正在别的核上执行的任务赶下来
///
/// 状态机模型里相当于那个核被强制打断：清掉它的 current，
/// 调用方改完状态后负责让它重新调度（返回值就是那个核）。
#[cfg(feature = "smp")]
fn displace_from_other_cpu(k: &mut KernelState, priority: Priority) -> Option<CpuId> {
    let id = k.tasks.id_at(priority)?;
    let other = k.cpu.cpu_of(id)?;
    if other == cpu::current_cpu() {
        return None;
    }
    k.cpu.running.remove(priority);
    k.cpu.timeshare_cpus &= !(1 << other);
    k.cpu.set_current(other, None);
    Some(other)
}

#[cfg(not(feature = "smp"))]
fn displace_from_other_cpu(_k: &mut KernelState, _priority: Priority) -> Option<usize> {
    None
}

#[cfg(feature = "smp")]
fn reschedule_displaced(k: &mut KernelState, displaced: Option<CpuId>) {
    if let Some(cpu) = displaced {
        scheduler::smp::schedule_on(k, cpu);
    }
}

#[cfg(not(feature = "smp"))]
fn reschedule_displaced(_k: &mut KernelState, _displaced: Option<usize>) {}

/// 强制唤醒的集合与状态变更部分，挂起/结束任务时也要用
pub(crate) fn wakeup_inner(k: &mut KernelState, priority: Priority) -> Result<()> {
    let (status, chan) = {
        let tcb = k
            .tasks
            .get_mut(priority)
            .ok_or(RtosError::OperationNotPermitted)?;
        (tcb.status, tcb.wait_for)
    };
    match status {
        TaskStatus::Waiting | TaskStatus::Sleeping => {
            if let Some(chan) = chan {
                event::detach_waiter(k, chan, priority);
            }
            k.sleepers.remove(priority);
            k.ready.add(priority);
            let tcb = k.tasks.get_mut(priority).ok_or(RtosError::Failed)?;
            tcb.wait_for = None;
            tcb.status = TaskStatus::Awakened;
            Ok(())
        }
        _ => Err(RtosError::OperationNotPermitted),
    }
}

pub(crate) fn wakeup(task: Task) -> Result<()> {
    let resched = state::enter(|k| {
        let priority = k
            .tasks
            .find_by_id(task.0)
            .ok_or(RtosError::OperationNotPermitted)?;
        wakeup_inner(k, priority)?;
        Ok(k.reschedule_allowed())
    })?;
    if resched {
        hal::request_reschedule();
    }
    Ok(())
}

pub(crate) fn suspend(task: Task) -> Result<()> {
    let was_current = state::enter(|k| {
        let priority = k
            .tasks
            .find_by_id(task.0)
            .ok_or(RtosError::OperationNotPermitted)?;
        if priority == PRIORITY_IDLE {
            return Err(RtosError::OperationNotPermitted);
        }
        let is_current = k.current_id() == Some(task.0);
        // 挂起自己等于让出 CPU，中断上下文和锁住的调度器下都不行
        if is_current && !k.blocking_allowed() {
            return Err(RtosError::OperationNotPermitted);
        }
        let displaced = displace_from_other_cpu(k, priority);
        let status = k.tasks.get(priority).map(|t| t.status);
        if matches!(status, Some(TaskStatus::Waiting | TaskStatus::Sleeping)) {
            wakeup_inner(k, priority)?;
        }
        k.ready.remove(priority);
        if k.preempted.contains(priority) {
            let KernelState {
                preempted_list,
                tasks,
                ..
            } = k;
            fcfs::unlink(preempted_list, tasks, LINK_PREEMPTED, priority);
            k.preempted.remove(priority);
        }
        k.suspended.add(priority);
        if let Some(tcb) = k.tasks.get_mut(priority) {
            tcb.suspended = true;
        }
        reschedule_displaced(k, displaced);
        Ok(is_current && k.is_running)
    })?;
    if was_current {
        // 失去 CPU，直到 resume 之后才会从这里回来
        hal::request_reschedule();
    }
    Ok(())
}

pub(crate) fn resume(task: Task) -> Result<()> {
    let resched = state::enter(|k| {
        let priority = k
            .tasks
            .find_by_id(task.0)
            .ok_or(RtosError::OperationNotPermitted)?;
        if !k.suspended.contains(priority) {
            return Err(RtosError::OperationNotPermitted);
        }
        k.suspended.remove(priority);
        k.ready.add(priority);
        if let Some(tcb) = k.tasks.get_mut(priority) {
            tcb.suspended = false;
        }
        Ok(k.reschedule_allowed())
    })?;
    if resched {
        hal::request_reschedule();
    }
    Ok(())
}

/// 把任务从所有集合和 FIFO 链里摘除（注册表槽位由调用方处理）
pub(crate) fn detach_everywhere(k: &mut KernelState, priority: Priority) {
    let chan = k.tasks.get_mut(priority).and_then(|t| t.wait_for.take());
    if let Some(chan) = chan {
        event::detach_waiter(k, chan, priority);
    }
    if k.preempted.contains(priority) {
        let KernelState {
            preempted_list,
            tasks,
            ..
        } = k;
        fcfs::unlink(preempted_list, tasks, LINK_PREEMPTED, priority);
        k.preempted.remove(priority);
    }
    k.sleepers.remove(priority);
    k.ready.remove(priority);
    k.suspended.remove(priority);
    k.timeshare.remove(priority);
    #[cfg(feature = "smp")]
    k.cpu.running.remove(priority);
}

pub(crate) fn kill(task: Task) -> Result<()> {
    let (name, was_current, resched) = state::enter(|k| {
        let Some(priority) = k.tasks.find_by_id(task.0) else {
            // 已经结束，幂等
            return Ok(("", false, false));
        };
        if priority == PRIORITY_IDLE {
            return Err(RtosError::OperationNotPermitted);
        }
        let is_current = k.current_id() == Some(task.0);
        if is_current && !k.blocking_allowed() {
            return Err(RtosError::OperationNotPermitted);
        }
        let displaced = displace_from_other_cpu(k, priority);
        detach_everywhere(k, priority);
        let name = k.tasks.take(priority).map(|t| t.name).unwrap_or("");
        if is_current {
            k.set_current(None);
        }
        reschedule_displaced(k, displaced);
        Ok((name, is_current, k.reschedule_allowed()))
    })?;
    if !name.is_empty() {
        debug!("task {} killed", name);
    }
    if was_current || resched {
        // 自杀时这里不再返回：调度器不会再选中这个任务
        hal::request_reschedule();
    }
    Ok(())
}

pub(crate) fn change_priority(task: Task, new: Priority) -> Result<()> {
    let resched = state::enter(|k| {
        if new > PRIORITY_HIGHEST || new == PRIORITY_IDLE {
            return Err(RtosError::InvalidPriority);
        }
        let old = k
            .tasks
            .find_by_id(task.0)
            .ok_or(RtosError::OperationNotPermitted)?;
        if old == PRIORITY_IDLE {
            return Err(RtosError::OperationNotPermitted);
        }
        if old == new {
            return Ok(false);
        }
        if k.tasks.get(new).is_some() || k.priorities_in_use.contains(new) {
            return Err(RtosError::PriorityInUse);
        }

        let displaced = displace_from_other_cpu(k, old);

        // 注册表搬槽
        let mut tcb = k.tasks.take(old).ok_or(RtosError::Failed)?;
        tcb.priority = new;
        let chan = tcb.wait_for;
        let in_preempted = tcb.preempted;
        k.tasks.insert(tcb)?;

        // 所有位图集合里的成员关系跟着迁移
        for set in [
            &mut k.ready,
            &mut k.suspended,
            &mut k.timeshare,
            &mut k.preempted,
            &mut k.sleepers,
        ] {
            if set.contains(old) {
                set.remove(old);
                set.add(new);
            }
        }
        #[cfg(feature = "smp")]
        {
            if k.cpu.running.contains(old) {
                k.cpu.running.remove(old);
                k.cpu.running.add(new);
            }
            // 亲和性位跟着任务走，空出来的旧槽位恢复默认（允许）
            for allowed in k.cpu.allowed.iter_mut() {
                let was_allowed = allowed.contains(old);
                allowed.add(old);
                if was_allowed {
                    allowed.add(new);
                } else {
                    allowed.remove(new);
                }
            }
        }

        // 等待通道的集合成员和 FIFO 邻居指针都按新优先级修正
        if let Some(chan) = chan {
            let KernelState {
                events,
                semaphores,
                mutexes,
                tasks,
                ..
            } = k;
            if let Some(ev) = event::channel_event(events, semaphores, mutexes, chan) {
                ev.waiting.remove(old);
                ev.waiting.add(new);
                fcfs::rekey(&mut ev.wait_list, tasks, LINK_WAIT, old, new);
            }
        }
        if in_preempted {
            let KernelState {
                preempted_list,
                tasks,
                ..
            } = k;
            fcfs::rekey(preempted_list, tasks, LINK_PREEMPTED, old, new);
        }

        reschedule_displaced(k, displaced);
        Ok(k.reschedule_allowed())
    })?;
    if resched {
        hal::request_reschedule();
    }
    Ok(())
}
