//! 时间片（分时）调度
//!
//! 分时任务带一个按节拍扣减的执行额度，扣完后被移出就绪集合，
//! 排到"被抢占 FIFO"的队尾；只有当就绪集合里不再有分时任务时，
//! 队头才被补回就绪集合并重置额度。这样同为分时的任务不论优先级
//! 高低都能轮到 CPU，普通任务完全不受影响。
//!
//! FIFO 链是侵入式的：节点就在任务控制块里，存的是邻居的优先级，
//! 不需要任何分配。

use crate::config::TIMESHARE_PARALLEL_MAX;
use crate::error::types::{Result, RtosError};
use crate::hal;
use crate::kernel::state::{self, KernelState};
use crate::kernel::task::{LINK_PREEMPTED, Task};
use crate::kernel::taskset::Priority;
use crate::kernel::time::{FOREVER, Ticks};

/// 侵入式 FIFO 链的节点，存邻居的优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FcfsLink {
    pub prev: Option<Priority>,
    pub next: Option<Priority>,
}

impl FcfsLink {
    pub const fn new() -> Self {
        FcfsLink {
            prev: None,
            next: None,
        }
    }
}

/// 侵入式 FIFO 链表头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FcfsList {
    pub head: Option<Priority>,
    pub tail: Option<Priority>,
}

impl FcfsList {
    pub const fn new() -> Self {
        FcfsList {
            head: None,
            tail: None,
        }
    }
}

pub(crate) mod fcfs {
    //! FIFO 链操作。节点存在任务控制块的 `links[which]` 槽位里。

    use super::{FcfsLink, FcfsList};
    use crate::kernel::task::TaskArena;
    use crate::kernel::taskset::Priority;

    pub(crate) fn contains(
        list: &FcfsList,
        tasks: &TaskArena,
        which: usize,
        priority: Priority,
    ) -> bool {
        if list.head == Some(priority) {
            return true;
        }
        tasks
            .get(priority)
            .is_some_and(|t| t.links[which].prev.is_some() || t.links[which].next.is_some())
    }

    /// 追加到队尾，已在链上时是空操作
    pub(crate) fn append(
        list: &mut FcfsList,
        tasks: &mut TaskArena,
        which: usize,
        priority: Priority,
    ) {
        if contains(list, tasks, which, priority) {
            return;
        }
        let old_tail = list.tail;
        let Some(tcb) = tasks.get_mut(priority) else {
            return;
        };
        tcb.links[which] = FcfsLink {
            prev: old_tail,
            next: None,
        };
        match old_tail {
            Some(tail) => {
                if let Some(t) = tasks.get_mut(tail) {
                    t.links[which].next = Some(priority);
                }
            }
            None => list.head = Some(priority),
        }
        list.tail = Some(priority);
    }

    /// 从链上摘除，不在链上时是空操作
    pub(crate) fn unlink(
        list: &mut FcfsList,
        tasks: &mut TaskArena,
        which: usize,
        priority: Priority,
    ) {
        if !contains(list, tasks, which, priority) {
            return;
        }
        let (prev, next) = tasks
            .get(priority)
            .map(|t| (t.links[which].prev, t.links[which].next))
            .unwrap_or((None, None));
        match prev {
            Some(p) => {
                if let Some(t) = tasks.get_mut(p) {
                    t.links[which].next = next;
                }
            }
            None => list.head = next,
        }
        match next {
            Some(n) => {
                if let Some(t) = tasks.get_mut(n) {
                    t.links[which].prev = prev;
                }
            }
            None => list.tail = prev,
        }
        if let Some(t) = tasks.get_mut(priority) {
            t.links[which] = FcfsLink::new();
        }
    }

    pub(crate) fn pop_front(
        list: &mut FcfsList,
        tasks: &mut TaskArena,
        which: usize,
    ) -> Option<Priority> {
        let head = list.head?;
        unlink(list, tasks, which, head);
        Some(head)
    }

    /// 任务从 `old` 槽位搬到 `new` 之后修正链：
    /// 链头/链尾和邻居的指针还指着旧优先级
    pub(crate) fn rekey(
        list: &mut FcfsList,
        tasks: &mut TaskArena,
        which: usize,
        old: Priority,
        new: Priority,
    ) {
        let in_list = list.head == Some(old)
            || tasks
                .get(new)
                .is_some_and(|t| t.links[which].prev.is_some() || t.links[which].next.is_some());
        if !in_list {
            return;
        }
        let (prev, next) = tasks
            .get(new)
            .map(|t| (t.links[which].prev, t.links[which].next))
            .unwrap_or((None, None));
        match prev {
            Some(p) => {
                if let Some(t) = tasks.get_mut(p) {
                    t.links[which].next = Some(new);
                }
            }
            None => {
                if list.head == Some(old) {
                    list.head = Some(new);
                }
            }
        }
        match next {
            Some(n) => {
                if let Some(t) = tasks.get_mut(n) {
                    t.links[which].prev = Some(new);
                }
            }
            None => {
                if list.tail == Some(old) {
                    list.tail = Some(new);
                }
            }
        }
    }
}

/// 给当前任务记账：每个节拍最多扣一个额度，扣完就抢占
///
/// 由 tick 处理调用。水位线保证同一个节拍重入时不会重复扣。
pub(crate) fn manage_running(k: &mut KernelState) {
    let Some(priority) = k.current_priority() else {
        return;
    };
    if !k.timeshare.contains(priority) {
        return;
    }
    let now = k.time;
    let Some(tcb) = k.tasks.get_mut(priority) else {
        return;
    };
    if tcb.time_watermark != now
        && tcb.ticks_to_run != 0
        && tcb.ticks_to_run != FOREVER
    {
        tcb.ticks_to_run -= 1;
        tcb.time_watermark = now;
    }
    if tcb.ticks_to_run == 0 {
        preempt(k, priority);
        schedule_peer(k);
    }
}

/// 把额度用完的任务移出就绪集合，排到被抢占 FIFO 的队尾
pub(crate) fn preempt(k: &mut KernelState, priority: Priority) {
    if k.scheduler_locked > 0 {
        return;
    }
    if !k.ready.contains(priority) {
        return;
    }
    k.ready.remove(priority);
    k.preempted.add(priority);
    let KernelState {
        preempted_list,
        tasks,
        ..
    } = k;
    if let Some(tcb) = tasks.get_mut(priority) {
        tcb.preempted = true;
    }
    fcfs::append(preempted_list, tasks, LINK_PREEMPTED, priority);
}

/// 就绪集合里没有分时任务时，把 FIFO 队头补回来并重置额度
pub(crate) fn schedule_peer(k: &mut KernelState) {
    if k.scheduler_locked > 0 {
        return;
    }
    if k.ready.intersect(k.timeshare).count() >= TIMESHARE_PARALLEL_MAX {
        return;
    }
    let now = k.time;
    let KernelState {
        preempted_list,
        preempted,
        ready,
        tasks,
        ..
    } = k;
    if let Some(priority) = fcfs::pop_front(preempted_list, tasks, LINK_PREEMPTED) {
        preempted.remove(priority);
        ready.add(priority);
        if let Some(tcb) = tasks.get_mut(priority) {
            tcb.preempted = false;
            tcb.ticks_to_run = tcb.time_slice_ticks;
            tcb.time_watermark = now;
        }
    }
}

/// 当前任务主动把剩下的时间片让给排队的同伴
///
/// 没人排队、不是分时任务、或此刻不能调度时都是空操作。
pub fn yield_time_slice() {
    let resched = state::enter(|k| {
        if !k.blocking_allowed() {
            return false;
        }
        let Some(priority) = k.current_priority() else {
            return false;
        };
        if !k.timeshare.contains(priority) || k.preempted_list.head.is_none() {
            return false;
        }
        preempt(k, priority);
        schedule_peer(k);
        true
    });
    if resched {
        hal::request_reschedule();
    }
}

/// 任务的每轮时间片
pub fn get_time_slice(task: Task) -> Result<Ticks> {
    state::enter(|k| {
        let priority = k
            .tasks
            .find_by_id(task.0)
            .ok_or(RtosError::OperationNotPermitted)?;
        if !k.timeshare.contains(priority) {
            return Err(RtosError::OperationNotPermitted);
        }
        Ok(k.tasks.get(priority).ok_or(RtosError::Failed)?.time_slice_ticks)
    })
}

/// 改任务的每轮时间片，剩余额度只向下收紧
pub fn set_time_slice(task: Task, ticks: Ticks) -> Result<()> {
    state::enter(|k| {
        let priority = k
            .tasks
            .find_by_id(task.0)
            .ok_or(RtosError::OperationNotPermitted)?;
        if !k.timeshare.contains(priority) {
            return Err(RtosError::OperationNotPermitted);
        }
        let tcb = k.tasks.get_mut(priority).ok_or(RtosError::Failed)?;
        tcb.time_slice_ticks = ticks;
        if tcb.ticks_to_run > ticks {
            tcb.ticks_to_run = ticks;
        }
        Ok(())
    })
}

/// 任务本轮剩余的节拍额度
pub fn get_remaining_ticks(task: Task) -> Result<Ticks> {
    state::enter(|k| {
        let priority = k
            .tasks
            .find_by_id(task.0)
            .ok_or(RtosError::OperationNotPermitted)?;
        Ok(k.tasks.get(priority).ok_or(RtosError::Failed)?.ticks_to_run)
    })
}
