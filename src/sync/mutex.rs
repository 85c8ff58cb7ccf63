//! 优先级天花板互斥锁
//!
//! 每把锁带一个"天花板"优先级：持有者被临时提升到天花板，
//! 比天花板低的任务永远抢不到持有者的 CPU，优先级反转从根上
//! 消除。提升就是把任务控制块从原槽位搬到天花板槽位，所以
//! 天花板优先级在锁存活期间被保留，任务创建和改优先级都不许用。
//!
//! 解锁必须按加锁的逆序（LIFO）：持有多把锁时只能先解天花板
//! 等于自己当前优先级的那把，否则提升链就乱了。

use crate::config::{PRIORITY_HIGHEST, PRIORITY_IDLE};
use crate::error::types::{Result, RtosError};
use crate::hal;
use crate::kernel::state::{self, KernelState};
use crate::kernel::task::TaskId;
use crate::kernel::taskset::Priority;
use crate::kernel::time::Ticks;
use crate::sync::event::{self, EventControl, WaitChannel};

/// 互斥锁控制块
pub(crate) struct MutexControl {
    pub event: EventControl,
    pub owner: Option<TaskId>,
    /// 天花板优先级，0 表示不提升
    pub ceiling: Priority,
    /// 持有者被提升前的原始优先级
    pub owner_priority: Priority,
    /// 重入深度（首次加锁之外的次数）
    pub extra_lock_count: u32,
    pub recursive: bool,
}

impl MutexControl {
    const fn new(ceiling: Priority, recursive: bool) -> Self {
        MutexControl {
            event: EventControl::new(),
            owner: None,
            ceiling,
            owner_priority: 0,
            extra_lock_count: 0,
            recursive,
        }
    }
}

/// 互斥锁句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mutex(pub(crate) usize);

impl Mutex {
    /// 创建互斥锁
    ///
    /// # 参数
    /// - `ceiling`: 天花板优先级，0 表示不做提升
    ///
    /// # 返回值
    /// - `Err(RtosError::InvalidPriority)`: 天花板超出范围
    /// - `Err(RtosError::PriorityInUse)`: 天花板优先级已被占用
    /// - `Err(RtosError::Overflow)`: 槽位用完
    pub fn new(ceiling: Priority) -> Result<Mutex> {
        Self::with_options(ceiling, false)
    }

    /// 创建可重入的互斥锁
    pub fn recursive(ceiling: Priority) -> Result<Mutex> {
        Self::with_options(ceiling, true)
    }

    fn with_options(ceiling: Priority, recursive: bool) -> Result<Mutex> {
        if ceiling > PRIORITY_HIGHEST {
            return Err(RtosError::InvalidPriority);
        }
        state::enter(|k| {
            if ceiling != PRIORITY_IDLE {
                // 天花板槽位必须真正空闲，提升时任务要搬进去
                if k.priorities_in_use.contains(ceiling) || k.tasks.get(ceiling).is_some() {
                    return Err(RtosError::PriorityInUse);
                }
            }
            let slot = k
                .mutexes
                .iter()
                .position(|m| m.is_none())
                .ok_or(RtosError::Overflow)?;
            k.mutexes[slot] = Some(MutexControl::new(ceiling, recursive));
            if ceiling != PRIORITY_IDLE {
                k.priorities_in_use.add(ceiling);
            }
            Ok(Mutex(slot))
        })
    }

    /// 加锁
    ///
    /// # 参数
    /// - `timeout`: 节拍数。0 不阻塞，FOREVER 永等
    ///
    /// # 返回值
    /// - `Ok(())`: 拿到锁（重入锁重复加锁也算）
    /// - `Err(RtosError::TimedOut)`: 超时（含 timeout 为 0 时锁被占）
    /// - `Err(RtosError::Aborted)`: 被 wakeup 强制叫醒
    /// - `Err(RtosError::Failed)`: 非重入锁的重复加锁
    /// - `Err(RtosError::Overflow)`: 重入计数已到上限
    /// - `Err(RtosError::OperationNotPermitted)`: 中断上下文、Idle 任务，
    ///   或真要等待时调度器被锁住。锁空闲时 timeout 为 0 的快路径
    ///   不受调度器锁影响
    pub fn lock(&self, timeout: Ticks) -> Result<()> {
        let chan = WaitChannel::Mutex(self.0);
        let id = state::enter(|k| {
            // 所有权绑定任务：必须有任务上下文，中断里和 Idle 都不行
            if k.interrupt_nesting > 0 {
                return Err(RtosError::OperationNotPermitted);
            }
            let id = k.current_id().ok_or(RtosError::OperationNotPermitted)?;
            let priority = k
                .current_priority()
                .ok_or(RtosError::OperationNotPermitted)?;
            if priority == PRIORITY_IDLE {
                return Err(RtosError::OperationNotPermitted);
            }
            let owner = {
                let m = k
                    .mutexes
                    .get(self.0)
                    .and_then(|m| m.as_ref())
                    .ok_or(RtosError::OperationNotPermitted)?;
                m.owner
            };
            match owner {
                None => {
                    claim(k, self.0, id, priority);
                    Ok(None)
                }
                Some(o) if o == id => {
                    let m = k.mutexes[self.0].as_mut().ok_or(RtosError::Failed)?;
                    if !m.recursive {
                        return Err(RtosError::Failed);
                    }
                    if m.extra_lock_count == u32::MAX {
                        return Err(RtosError::Overflow);
                    }
                    m.extra_lock_count += 1;
                    Ok(None)
                }
                Some(_) => {
                    if timeout == 0 {
                        return Err(RtosError::TimedOut);
                    }
                    // 阻塞规则只约束真要等待的路径
                    if !k.blocking_allowed() {
                        return Err(RtosError::OperationNotPermitted);
                    }
                    event::wait_on(k, chan, priority, timeout);
                    Ok(Some(id))
                }
            }
        })?;
        let Some(id) = id else {
            return Ok(());
        };

        hal::request_reschedule();

        // 交接时 unlock 已经把所有权和提升都办好了，这里只翻译结果
        state::enter(|k| event::finish_wait(k, id))
    }

    /// 解锁
    ///
    /// # 返回值
    /// - `Err(RtosError::Failed)`: 不是持有者，或违反 LIFO 解锁顺序。
    ///   报错时锁的状态不变
    /// - `Err(RtosError::OperationNotPermitted)`: 中断上下文（ISR 打断了
    ///   持有者，但锁不属于 ISR）
    pub fn unlock(&self) -> Result<()> {
        let resched = state::enter(|k| {
            if k.interrupt_nesting > 0 {
                return Err(RtosError::OperationNotPermitted);
            }
            let current = k.current_id().ok_or(RtosError::OperationNotPermitted)?;
            let (owner, ceiling, owner_priority, extra) = {
                let m = k
                    .mutexes
                    .get(self.0)
                    .and_then(|m| m.as_ref())
                    .ok_or(RtosError::OperationNotPermitted)?;
                (m.owner, m.ceiling, m.owner_priority, m.extra_lock_count)
            };
            if owner != Some(current) {
                return Err(RtosError::Failed);
            }
            if extra > 0 {
                let m = k.mutexes[self.0].as_mut().ok_or(RtosError::Failed)?;
                m.extra_lock_count -= 1;
                return Ok(false);
            }
            // 提升只在天花板高于持有者原优先级时发生过（和 claim 对应）
            let boosted = ceiling != PRIORITY_IDLE && ceiling > owner_priority;
            if boosted {
                let held = k.current_priority().ok_or(RtosError::Failed)?;
                // LIFO：最后加的锁先解
                if held != ceiling {
                    return Err(RtosError::Failed);
                }
                reregister(k, ceiling, owner_priority);
            }

            match event::dequeue_waiter(k, WaitChannel::Mutex(self.0)) {
                Some(next) => {
                    // 直接交接：先过户、先提升，再放回就绪
                    let next_id = k.tasks.id_at(next).ok_or(RtosError::Failed)?;
                    claim(k, self.0, next_id, next);
                    let m = k.mutexes[self.0].as_ref().ok_or(RtosError::Failed)?;
                    let run_at = if m.ceiling != PRIORITY_IDLE && m.ceiling > next {
                        m.ceiling
                    } else {
                        next
                    };
                    k.ready.add(run_at);
                    Ok(k.reschedule_allowed())
                }
                None => {
                    let m = k.mutexes[self.0].as_mut().ok_or(RtosError::Failed)?;
                    m.owner = None;
                    Ok(boosted && k.reschedule_allowed())
                }
            }
        })?;
        if resched {
            hal::request_reschedule();
        }
        Ok(())
    }

    /// 销毁互斥锁并释放天花板优先级，被持有时报 Failed
    pub fn destroy(&self) -> Result<()> {
        state::enter(|k| {
            let m = k
                .mutexes
                .get(self.0)
                .and_then(|m| m.as_ref())
                .ok_or(RtosError::OperationNotPermitted)?;
            if m.owner.is_some() || !m.event.waiting.is_empty() {
                return Err(RtosError::Failed);
            }
            let ceiling = m.ceiling;
            k.mutexes[self.0] = None;
            if ceiling != PRIORITY_IDLE {
                k.priorities_in_use.remove(ceiling);
            }
            Ok(())
        })
    }

    /// 当前持有者
    pub fn owner(&self) -> Option<TaskId> {
        state::enter(|k| k.mutexes.get(self.0).and_then(|m| m.as_ref())?.owner)
    }
}

/// 把锁记到 `id` 名下，需要时做天花板提升
fn claim(k: &mut KernelState, slot: usize, id: TaskId, priority: Priority) {
    let ceiling = {
        let Some(m) = k.mutexes[slot].as_mut() else {
            return;
        };
        m.owner = Some(id);
        m.owner_priority = priority;
        m.extra_lock_count = 0;
        m.ceiling
    };
    if ceiling != PRIORITY_IDLE && ceiling > priority {
        reregister(k, priority, ceiling);
    }
}

/// 把任务控制块从 `from` 槽位搬到 `to` 槽位（天花板提升/还原）
///
/// 就绪位跟着搬。分时集合的位不动：提升期间时间片记账暂停，
/// 还原后按原优先级继续。
fn reregister(k: &mut KernelState, from: Priority, to: Priority) {
    let Some(mut tcb) = k.tasks.take(from) else {
        return;
    };
    tcb.priority = to;
    // current 按任务 id 记录，搬槽不用动它
    let _ = k.tasks.insert(tcb);
    if k.ready.contains(from) {
        k.ready.remove(from);
        k.ready.add(to);
    }
    #[cfg(feature = "smp")]
    if k.cpu.running.contains(from) {
        k.cpu.running.remove(from);
        k.cpu.running.add(to);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::task::{Task, TaskStatus};
    use crate::kernel::time::FOREVER;
    use crate::utils::kernel_init;
    use serial_test::serial;

    // 测试里用 supervisor 把目标任务设成 current，再走公开 API 的
    // 快路径（不真正阻塞），状态可直接观察。

    fn make_current(priority: Priority) {
        state::enter(|k| {
            let id = k.tasks.id_at(priority);
            k.set_current(id);
        });
    }

    #[test]
    #[serial]
    fn test_ceiling_reserves_priority() {
        kernel_init();
        let m = Mutex::new(10).unwrap();
        let r = Task::builder("clash").priority(10).spawn(|| {});
        assert_eq!(r.unwrap_err(), RtosError::PriorityInUse);
        m.destroy().unwrap();
        // 销毁后优先级可用了
        Task::builder("ok").priority(10).spawn(|| {}).unwrap();
    }

    #[test]
    #[serial]
    fn test_ceiling_cannot_land_on_task() {
        kernel_init();
        Task::builder("t").priority(10).spawn(|| {}).unwrap();
        assert_eq!(Mutex::new(10).unwrap_err(), RtosError::PriorityInUse);
    }

    #[test]
    #[serial]
    fn test_lock_boosts_to_ceiling() {
        kernel_init();
        let task = Task::builder("t").priority(3).spawn(|| {}).unwrap();
        make_current(3);
        let m = Mutex::new(12).unwrap();
        m.lock(0).unwrap();
        // 持有期间任务住在天花板槽位
        assert_eq!(task.priority(), Some(12));
        state::enter(|k| {
            assert!(k.ready.contains(12));
            assert!(!k.ready.contains(3));
        });
        make_current(12);
        m.unlock().unwrap();
        assert_eq!(task.priority(), Some(3));
    }

    #[test]
    #[serial]
    fn test_low_ceiling_does_not_demote() {
        kernel_init();
        let task = Task::builder("t").priority(9).spawn(|| {}).unwrap();
        make_current(9);
        let m = Mutex::new(4).unwrap();
        m.lock(0).unwrap();
        assert_eq!(task.priority(), Some(9));
        m.unlock().unwrap();
        assert_eq!(task.priority(), Some(9));
    }

    #[test]
    #[serial]
    fn test_lifo_unlock_order_enforced() {
        kernel_init();
        let task = Task::builder("t").priority(2).spawn(|| {}).unwrap();
        make_current(2);
        let a = Mutex::new(8).unwrap();
        let b = Mutex::new(14).unwrap();
        a.lock(0).unwrap();
        make_current(8);
        b.lock(0).unwrap();
        make_current(14);
        // 先解 a 违反 LIFO，报错且状态不变
        assert_eq!(a.unlock().unwrap_err(), RtosError::Failed);
        assert_eq!(task.priority(), Some(14));
        b.unlock().unwrap();
        assert_eq!(task.priority(), Some(8));
        make_current(8);
        a.unlock().unwrap();
        assert_eq!(task.priority(), Some(2));
    }

    #[test]
    #[serial]
    fn test_non_recursive_relock_fails() {
        kernel_init();
        Task::builder("t").priority(5).spawn(|| {}).unwrap();
        make_current(5);
        let m = Mutex::new(0).unwrap();
        m.lock(0).unwrap();
        assert_eq!(m.lock(0).unwrap_err(), RtosError::Failed);
        m.unlock().unwrap();
    }

    #[test]
    #[serial]
    fn test_recursive_lock_counts() {
        kernel_init();
        let task = Task::builder("t").priority(5).spawn(|| {}).unwrap();
        make_current(5);
        let m = Mutex::recursive(0).unwrap();
        m.lock(0).unwrap();
        m.lock(0).unwrap();
        m.lock(0).unwrap();
        m.unlock().unwrap();
        m.unlock().unwrap();
        assert_eq!(m.owner(), Some(task.id()));
        m.unlock().unwrap();
        assert_eq!(m.owner(), None);
    }

    #[test]
    #[serial]
    fn test_handoff_boosts_next_owner() {
        kernel_init();
        Task::builder("holder").priority(5).spawn(|| {}).unwrap();
        let waiter = Task::builder("waiter").priority(3).spawn(|| {}).unwrap();
        make_current(5);
        let m = Mutex::new(12).unwrap();
        m.lock(0).unwrap();
        make_current(12);
        // waiter 挂到锁上
        state::enter(|k| event::wait_on(k, WaitChannel::Mutex(m.0), 3, FOREVER));
        m.unlock().unwrap();
        // 交接完成：waiter 直接以天花板优先级就绪
        assert_eq!(m.owner(), Some(waiter.id()));
        assert_eq!(waiter.priority(), Some(12));
        assert_eq!(waiter.status(), TaskStatus::Active);
        state::enter(|k| assert!(k.ready.contains(12)));
    }

    #[test]
    #[serial]
    fn test_handoff_prefers_highest_priority_waiter() {
        kernel_init();
        Task::builder("holder").priority(9).spawn(|| {}).unwrap();
        Task::builder("lo").priority(2).spawn(|| {}).unwrap();
        let hi = Task::builder("hi").priority(6).spawn(|| {}).unwrap();
        make_current(9);
        let m = Mutex::new(0).unwrap();
        m.lock(0).unwrap();
        state::enter(|k| {
            event::wait_on(k, WaitChannel::Mutex(m.0), 2, FOREVER);
            event::wait_on(k, WaitChannel::Mutex(m.0), 6, FOREVER);
        });
        m.unlock().unwrap();
        assert_eq!(m.owner(), Some(hi.id()));
    }

    #[test]
    #[serial]
    fn test_unlock_by_non_owner_fails() {
        kernel_init();
        Task::builder("a").priority(5).spawn(|| {}).unwrap();
        Task::builder("b").priority(6).spawn(|| {}).unwrap();
        make_current(5);
        let m = Mutex::new(0).unwrap();
        m.lock(0).unwrap();
        make_current(6);
        assert_eq!(m.unlock().unwrap_err(), RtosError::Failed);
    }

    #[test]
    #[serial]
    fn test_destroy_rules() {
        kernel_init();
        Task::builder("t").priority(5).spawn(|| {}).unwrap();
        make_current(5);
        let m = Mutex::new(0).unwrap();
        m.lock(0).unwrap();
        assert_eq!(m.destroy().unwrap_err(), RtosError::Failed);
        m.unlock().unwrap();
        m.destroy().unwrap();
    }

    #[test]
    #[serial]
    fn test_lock_in_interrupt_context_rejected() {
        kernel_init();
        Task::builder("t").priority(5).spawn(|| {}).unwrap();
        make_current(5);
        let m = Mutex::new(0).unwrap();
        crate::kernel::enter_interrupt();
        assert_eq!(m.lock(0).unwrap_err(), RtosError::OperationNotPermitted);
        crate::kernel::exit_interrupt();
    }

    #[test]
    #[serial]
    fn test_unlock_in_interrupt_context_rejected() {
        kernel_init();
        Task::builder("t").priority(5).spawn(|| {}).unwrap();
        make_current(5);
        let m = Mutex::new(0).unwrap();
        m.lock(0).unwrap();
        // ISR 打断了持有者：current 还是持有者，但锁不许在中断里还
        crate::kernel::enter_interrupt();
        assert_eq!(m.unlock().unwrap_err(), RtosError::OperationNotPermitted);
        crate::kernel::exit_interrupt();
        m.unlock().unwrap();
    }

    #[test]
    #[serial]
    fn test_zero_timeout_fast_path_ignores_scheduler_lock() {
        kernel_init();
        Task::builder("a").priority(5).spawn(|| {}).unwrap();
        Task::builder("b").priority(6).spawn(|| {}).unwrap();
        let m = Mutex::new(0).unwrap();
        crate::kernel::scheduler::lock_scheduler();

        // 锁空闲：不等待就不受调度器锁约束
        make_current(5);
        m.lock(0).unwrap();
        m.unlock().unwrap();

        // 有争用时 timeout 0 还是快路径（TimedOut），
        // 真要等待才因调度器锁被拒
        m.lock(0).unwrap();
        make_current(6);
        assert_eq!(m.lock(0).unwrap_err(), RtosError::TimedOut);
        assert_eq!(m.lock(10).unwrap_err(), RtosError::OperationNotPermitted);

        crate::kernel::scheduler::unlock_scheduler().unwrap();
        make_current(5);
        m.unlock().unwrap();
    }

    #[test]
    #[serial]
    fn test_recursive_relock_overflows_at_cap() {
        kernel_init();
        Task::builder("t").priority(5).spawn(|| {}).unwrap();
        make_current(5);
        let m = Mutex::recursive(0).unwrap();
        m.lock(0).unwrap();
        state::enter(|k| {
            k.mutexes[m.0].as_mut().unwrap().extra_lock_count = u32::MAX;
        });
        // 计数封顶时报 Overflow，而不是悄悄不记账
        assert_eq!(m.lock(0).unwrap_err(), RtosError::Overflow);
        state::enter(|k| {
            assert_eq!(k.mutexes[m.0].as_ref().unwrap().extra_lock_count, u32::MAX);
        });
    }
}
