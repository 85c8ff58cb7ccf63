//! 计数信号量
//!
//! get 在计数为正时从任何上下文都能走快路径；post 优先把名额
//! 直接交给等待者（直接交接，计数不动），没人等才加计数。

use crate::error::types::{Result, RtosError};
use crate::hal;
use crate::kernel::state;
use crate::kernel::time::Ticks;
use crate::sync::event::{self, EventControl, WaitChannel};

/// 计数上限
pub const SEMAPHORE_COUNT_MAX: u32 = u32::MAX;

/// 信号量控制块
pub(crate) struct SemaphoreControl {
    pub count: u32,
    pub event: EventControl,
}

impl SemaphoreControl {
    pub(crate) const fn new(initial: u32) -> Self {
        SemaphoreControl {
            count: initial,
            event: EventControl::new(),
        }
    }
}

/// 信号量句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Semaphore(pub(crate) usize);

impl Semaphore {
    /// 创建信号量，槽位用完报 Overflow
    pub fn new(initial: u32) -> Result<Semaphore> {
        state::enter(|k| {
            let slot = k
                .semaphores
                .iter()
                .position(|s| s.is_none())
                .ok_or(RtosError::Overflow)?;
            k.semaphores[slot] = Some(SemaphoreControl::new(initial));
            Ok(Semaphore(slot))
        })
    }

    /// 拿一个名额
    ///
    /// 计数为正时直接扣减返回，这条路径中断上下文也能走。
    ///
    /// # 参数
    /// - `timeout`: 节拍数。0 不阻塞，FOREVER 永等
    ///
    /// # 返回值
    /// - `Ok(())`: 拿到了
    /// - `Err(RtosError::TimedOut)`: 超时（含 timeout 为 0 时名额不够）
    /// - `Err(RtosError::Aborted)`: 被 wakeup 强制叫醒
    /// - `Err(RtosError::OperationNotPermitted)`: 要阻塞但上下文不允许
    pub fn get(&self, timeout: Ticks) -> Result<()> {
        let chan = WaitChannel::Semaphore(self.0);
        let id = state::enter(|k| {
            let sem = k
                .semaphores
                .get_mut(self.0)
                .and_then(|s| s.as_mut())
                .ok_or(RtosError::OperationNotPermitted)?;
            if sem.count > 0 {
                sem.count -= 1;
                return Ok(None);
            }
            if timeout == 0 {
                return Err(RtosError::TimedOut);
            }
            let (id, priority) = event::blocking_context(k)?;
            event::wait_on(k, chan, priority, timeout);
            Ok(Some(id))
        })?;
        let Some(id) = id else {
            return Ok(());
        };

        hal::request_reschedule();

        state::enter(|k| event::finish_wait(k, id))
    }

    /// 还一个名额
    ///
    /// 有人在等就直接交接给它（计数不动），没人等才加计数。
    ///
    /// # 返回值
    /// - `Err(RtosError::Overflow)`: 计数已到上限
    pub fn post(&self) -> Result<()> {
        let resched = state::enter(|k| {
            if k.semaphores
                .get(self.0)
                .map(|s| s.is_none())
                .unwrap_or(true)
            {
                return Err(RtosError::OperationNotPermitted);
            }
            if event::signal_one(k, WaitChannel::Semaphore(self.0)).is_ok() {
                // 直接交接
                return Ok(k.reschedule_allowed());
            }
            let sem = k.semaphores[self.0].as_mut().ok_or(RtosError::Failed)?;
            if sem.count == SEMAPHORE_COUNT_MAX {
                return Err(RtosError::Overflow);
            }
            sem.count += 1;
            Ok(false)
        })?;
        if resched {
            hal::request_reschedule();
        }
        Ok(())
    }

    /// 当前计数
    pub fn peek(&self) -> Result<u32> {
        state::enter(|k| {
            k.semaphores
                .get(self.0)
                .and_then(|s| s.as_ref())
                .map(|s| s.count)
                .ok_or(RtosError::OperationNotPermitted)
        })
    }

    /// 销毁信号量，还有人在等时报 Failed
    pub fn destroy(&self) -> Result<()> {
        state::enter(|k| {
            let sem = k
                .semaphores
                .get(self.0)
                .and_then(|s| s.as_ref())
                .ok_or(RtosError::OperationNotPermitted)?;
            if !sem.event.waiting.is_empty() {
                return Err(RtosError::Failed);
            }
            k.semaphores[self.0] = None;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::task::{Task, TaskStatus};
    use crate::kernel::time::FOREVER;
    use crate::utils::kernel_init;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_fast_path_counts_down() {
        kernel_init();
        let sem = Semaphore::new(2).unwrap();
        sem.get(0).unwrap();
        sem.get(0).unwrap();
        assert_eq!(sem.get(0).unwrap_err(), RtosError::TimedOut);
        assert_eq!(sem.peek().unwrap(), 0);
    }

    #[test]
    #[serial]
    fn test_post_increments_without_waiters() {
        kernel_init();
        let sem = Semaphore::new(0).unwrap();
        sem.post().unwrap();
        sem.post().unwrap();
        assert_eq!(sem.peek().unwrap(), 2);
    }

    #[test]
    #[serial]
    fn test_post_overflow() {
        kernel_init();
        let sem = Semaphore::new(SEMAPHORE_COUNT_MAX).unwrap();
        assert_eq!(sem.post().unwrap_err(), RtosError::Overflow);
    }

    #[test]
    #[serial]
    fn test_fast_path_works_in_interrupt_context() {
        kernel_init();
        let sem = Semaphore::new(1).unwrap();
        crate::kernel::enter_interrupt();
        sem.get(0).unwrap();
        sem.post().unwrap();
        crate::kernel::exit_interrupt();
    }

    #[test]
    #[serial]
    fn test_blocking_needs_task_context() {
        kernel_init();
        let sem = Semaphore::new(0).unwrap();
        assert_eq!(
            sem.get(FOREVER).unwrap_err(),
            RtosError::OperationNotPermitted
        );
    }

    #[test]
    #[serial]
    fn test_handoff_skips_count() {
        kernel_init();
        let task = Task::builder("waiter").priority(5).spawn(|| {}).unwrap();
        let sem = Semaphore::new(0).unwrap();
        // 手工把等待者挂上去
        state::enter(|k| event::wait_on(k, WaitChannel::Semaphore(sem.0), 5, FOREVER));
        sem.post().unwrap();
        // 名额直接交给了等待者，计数还是 0
        assert_eq!(sem.peek().unwrap(), 0);
        assert_eq!(task.status(), TaskStatus::Active);
        state::enter(|k| assert!(k.ready.contains(5)));
    }

    #[test]
    #[serial]
    fn test_waiter_timeout_leaves_count_alone() {
        kernel_init();
        let task = Task::builder("waiter").priority(5).spawn(|| {}).unwrap();
        let sem = Semaphore::new(0).unwrap();
        state::enter(|k| event::wait_on(k, WaitChannel::Semaphore(sem.0), 5, 2));
        crate::kernel::time::tick();
        crate::kernel::time::tick();
        assert_eq!(task.status(), TaskStatus::TimedOut);
        // 超时之后 post 没有等待者，走计数
        sem.post().unwrap();
        assert_eq!(sem.peek().unwrap(), 1);
    }

    #[test]
    #[serial]
    fn test_destroy_rules() {
        kernel_init();
        Task::builder("waiter").priority(5).spawn(|| {}).unwrap();
        let sem = Semaphore::new(0).unwrap();
        state::enter(|k| event::wait_on(k, WaitChannel::Semaphore(sem.0), 5, FOREVER));
        assert_eq!(sem.destroy().unwrap_err(), RtosError::Failed);
        state::enter(|k| {
            event::signal_one(k, WaitChannel::Semaphore(sem.0)).unwrap();
        });
        sem.destroy().unwrap();
        assert_eq!(sem.peek().unwrap_err(), RtosError::OperationNotPermitted);
    }
}
