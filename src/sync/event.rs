//! 事件
//!
//! 事件是最底层的阻塞原语：一个等待集合加一个先来先服务的等待链。
//! 唤醒选择规则是"优先级优先、分时任务之间先来先服务"：
//! 取等待集合里的最高优先级，若它是分时任务则改取等待链的队头。
//! 信号量和互斥锁内嵌同一个控制块，复用这里的全部协议。

use crate::config::{MAX_EVENTS, MAX_MUTEXES, MAX_SEMAPHORES, PRIORITY_IDLE};
use crate::error::types::{Result, RtosError};
use crate::hal;
use crate::kernel::state::{self, KernelState};
use crate::kernel::task::{LINK_WAIT, TaskStatus};
use crate::kernel::taskset::{Priority, TaskSet};
use crate::kernel::time::{FOREVER, Ticks};
use crate::kernel::timeshare::{self, FcfsList, fcfs};
use crate::sync::mutex::MutexControl;
use crate::sync::semaphore::SemaphoreControl;

/// 等待通道：任务到底在等哪个原语
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitChannel {
    Event(usize),
    Semaphore(usize),
    Mutex(usize),
}

/// 事件控制块
pub(crate) struct EventControl {
    /// 正在等待的优先级集合
    pub waiting: TaskSet,
    /// 分时等待者的到达顺序链
    pub wait_list: FcfsList,
}

impl EventControl {
    pub(crate) const fn new() -> Self {
        EventControl {
            waiting: TaskSet::EMPTY,
            wait_list: FcfsList::new(),
        }
    }
}

/// 按等待通道找到对应的事件控制块
pub(crate) fn channel_event<'a>(
    events: &'a mut [Option<EventControl>; MAX_EVENTS],
    semaphores: &'a mut [Option<SemaphoreControl>; MAX_SEMAPHORES],
    mutexes: &'a mut [Option<MutexControl>; MAX_MUTEXES],
    chan: WaitChannel,
) -> Option<&'a mut EventControl> {
    match chan {
        WaitChannel::Event(i) => events.get_mut(i)?.as_mut(),
        WaitChannel::Semaphore(i) => semaphores.get_mut(i)?.as_mut().map(|s| &mut s.event),
        WaitChannel::Mutex(i) => mutexes.get_mut(i)?.as_mut().map(|m| &mut m.event),
    }
}

/// 把当前任务挂到等待通道上（状态变更部分，不含上下文切换）
///
/// 调用方在临界区外接着调 `hal::request_reschedule()`，
/// 回来后用 `finish_wait` 取结果。
pub(crate) fn wait_on(
    k: &mut KernelState,
    chan: WaitChannel,
    priority: Priority,
    timeout: Ticks,
) {
    let is_timeshared = k.timeshare.contains(priority);
    let wake = k.time.wrapping_add(timeout);
    {
        let KernelState {
            events,
            semaphores,
            mutexes,
            tasks,
            ..
        } = k;
        if let Some(ev) = channel_event(events, semaphores, mutexes, chan) {
            ev.waiting.add(priority);
            if is_timeshared {
                fcfs::append(&mut ev.wait_list, tasks, LINK_WAIT, priority);
            }
        }
    }
    if let Some(tcb) = k.tasks.get_mut(priority) {
        tcb.status = TaskStatus::Waiting;
        tcb.wait_for = Some(chan);
        tcb.wake_up_time = wake;
    }
    k.ready.remove(priority);
    if is_timeshared {
        timeshare::schedule_peer(k);
    }
    if timeout != FOREVER {
        k.sleepers.add(priority);
    }
}

/// 把任务从等待通道上摘下来（超时/强制唤醒/结束时用）
pub(crate) fn detach_waiter(k: &mut KernelState, chan: WaitChannel, priority: Priority) {
    let KernelState {
        events,
        semaphores,
        mutexes,
        tasks,
        ..
    } = k;
    if let Some(ev) = channel_event(events, semaphores, mutexes, chan) {
        ev.waiting.remove(priority);
        fcfs::unlink(&mut ev.wait_list, tasks, LINK_WAIT, priority);
    }
}

/// 按唤醒选择规则挑一个等待者并摘下来，不放回就绪集合
///
/// 互斥锁交接要在放回就绪之前先做天花板提升，所以放回由调用方做。
pub(crate) fn dequeue_waiter(k: &mut KernelState, chan: WaitChannel) -> Option<Priority> {
    let picked = {
        let highest = {
            let KernelState {
                events,
                semaphores,
                mutexes,
                ..
            } = k;
            channel_event(events, semaphores, mutexes, chan)?.waiting.highest()?
        };
        if k.timeshare.contains(highest) {
            // 分时任务之间先来先服务
            let KernelState {
                events,
                semaphores,
                mutexes,
                ..
            } = k;
            let ev = channel_event(events, semaphores, mutexes, chan)?;
            ev.wait_list.head.unwrap_or(highest)
        } else {
            highest
        }
    };
    detach_waiter(k, chan, picked);
    k.sleepers.remove(picked);
    if let Some(tcb) = k.tasks.get_mut(picked) {
        tcb.status = TaskStatus::Active;
        tcb.wait_for = None;
    }
    Some(picked)
}

/// 唤醒一个等待者并放回就绪集合
pub(crate) fn signal_one(k: &mut KernelState, chan: WaitChannel) -> Result<()> {
    let priority = dequeue_waiter(k, chan).ok_or(RtosError::TimedOut)?;
    k.ready.add(priority);
    Ok(())
}

/// 等待结束后把任务状态翻译成结果
pub(crate) fn finish_wait(k: &mut KernelState, id: usize) -> Result<()> {
    let priority = k.tasks.find_by_id(id).ok_or(RtosError::Aborted)?;
    let tcb = k.tasks.get_mut(priority).ok_or(RtosError::Failed)?;
    let status = tcb.status;
    tcb.status = TaskStatus::Active;
    tcb.wait_for = None;
    match status {
        TaskStatus::TimedOut => Err(RtosError::TimedOut),
        TaskStatus::Awakened => Err(RtosError::Aborted),
        _ => Ok(()),
    }
}

/// 当前任务能不能在这个通道上阻塞，能就返回 (任务 id, 优先级)
pub(crate) fn blocking_context(k: &KernelState) -> Result<(usize, Priority)> {
    let id = k.current_id().ok_or(RtosError::OperationNotPermitted)?;
    let priority = k
        .current_priority()
        .ok_or(RtosError::OperationNotPermitted)?;
    if priority == PRIORITY_IDLE || !k.blocking_allowed() {
        return Err(RtosError::OperationNotPermitted);
    }
    Ok((id, priority))
}

/// 事件句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventHandle(pub(crate) usize);

impl EventHandle {
    /// 创建事件，槽位用完报 Overflow
    pub fn new() -> Result<EventHandle> {
        state::enter(|k| {
            let slot = k
                .events
                .iter()
                .position(|e| e.is_none())
                .ok_or(RtosError::Overflow)?;
            k.events[slot] = Some(EventControl::new());
            Ok(EventHandle(slot))
        })
    }

    /// 等事件
    ///
    /// # 参数
    /// - `timeout`: 节拍数。0 立即返回 TimedOut，FOREVER 永等
    ///
    /// # 返回值
    /// - `Ok(())`: 被 signal 叫到
    /// - `Err(RtosError::TimedOut)`: 超时（含 timeout 为 0）
    /// - `Err(RtosError::Aborted)`: 被 wakeup 强制叫醒
    /// - `Err(RtosError::OperationNotPermitted)`: 中断上下文、锁住的调度器或 Idle 任务
    pub fn wait(&self, timeout: Ticks) -> Result<()> {
        let chan = WaitChannel::Event(self.0);
        let id = state::enter(|k| {
            if k.events.get(self.0).map(|e| e.is_none()).unwrap_or(true) {
                return Err(RtosError::OperationNotPermitted);
            }
            if timeout == 0 {
                return Err(RtosError::TimedOut);
            }
            let (id, priority) = blocking_context(k)?;
            wait_on(k, chan, priority, timeout);
            Ok(id)
        })?;

        hal::request_reschedule();

        state::enter(|k| finish_wait(k, id))
    }

    /// 唤醒一个等待者，没人等报 TimedOut
    pub fn signal(&self) -> Result<()> {
        let resched = state::enter(|k| {
            signal_one(k, WaitChannel::Event(self.0))?;
            Ok(k.reschedule_allowed())
        })?;
        if resched {
            hal::request_reschedule();
        }
        Ok(())
    }

    /// 唤醒所有等待者，返回叫醒的数量
    pub fn broadcast(&self) -> Result<usize> {
        let (count, resched) = state::enter(|k| {
            let mut count = 0;
            while signal_one(k, WaitChannel::Event(self.0)).is_ok() {
                count += 1;
            }
            (count, count > 0 && k.reschedule_allowed())
        });
        if resched {
            hal::request_reschedule();
        }
        Ok(count)
    }

    /// 销毁事件，还有人在等时报 Failed
    pub fn destroy(&self) -> Result<()> {
        state::enter(|k| {
            let ev = k
                .events
                .get(self.0)
                .and_then(|e| e.as_ref())
                .ok_or(RtosError::OperationNotPermitted)?;
            if !ev.waiting.is_empty() {
                return Err(RtosError::Failed);
            }
            k.events[self.0] = None;
            Ok(())
        })
    }
}
