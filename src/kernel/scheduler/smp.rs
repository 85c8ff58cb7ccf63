//! 多核调度
//!
//! 每个核独立做调度决策：候选者 = 就绪集合 ∩ 本核亲和集合 −
//! 别的核正在执行的任务，取其中最高优先级。任务优先级全局唯一，
//! 所以 `running` 位图就能表达"谁已经被哪个核拿走了"。
//!
//! 这里只是调度状态机：哪个核该跑哪个任务。核间打断（IPI）由
//! 端口负责，hosted/裸机端口目前都只驱动 0 号核。

use crate::config::{PRIORITY_IDLE, TIMESHARE_PARALLEL_MAX};
use crate::error::types::{Result, RtosError};
use crate::kernel::cpu::CpuId;
use crate::kernel::state::{self, KernelState};
use crate::kernel::task::Task;

/// 给 `cpu` 核做一次调度决策
pub(crate) fn schedule_on(k: &mut KernelState, cpu: CpuId) {
    if k.scheduler_locked > 0 {
        return;
    }
    // 本核正在跑的任务可以连任，别的核的不行
    let mut taken = k.cpu.running;
    if let Some(id) = k.cpu.current_id(cpu) {
        if let Some(p) = k.tasks.find_by_id(id) {
            taken.remove(p);
        }
    }
    let candidates = k.ready.intersect(k.cpu.allowed[cpu]).difference(taken);

    // 分时任务同时在跑的数量有上限，超了就只考虑普通任务
    let ts_running = k.cpu.running.intersect(k.timeshare);
    let candidates = if ts_running.count() >= TIMESHARE_PARALLEL_MAX {
        let keep = k
            .cpu
            .current_id(cpu)
            .and_then(|id| k.tasks.find_by_id(id))
            .filter(|p| k.timeshare.contains(*p));
        let mut c = candidates.difference(k.timeshare);
        if let Some(p) = keep {
            c.add(p);
        }
        c
    } else {
        candidates
    };

    // 先把旧任务的占用撤掉
    if let Some(id) = k.cpu.current_id(cpu) {
        if let Some(p) = k.tasks.find_by_id(id) {
            k.cpu.running.remove(p);
            if k.timeshare.contains(p) {
                k.cpu.timeshare_cpus &= !(1 << cpu);
            }
        }
    }
    k.cpu.set_current(cpu, None);

    if let Some(priority) = candidates.highest() {
        let id = k.tasks.id_at(priority);
        k.cpu.set_current(cpu, id);
        if priority != PRIORITY_IDLE {
            k.cpu.running.add(priority);
        }
        if k.timeshare.contains(priority) {
            k.cpu.timeshare_cpus |= 1 << cpu;
        }
    }
}

/// 限制任务只能在掩码指定的核上执行
///
/// 任务正在一个被禁掉的核上跑时不迁移，下次调度点生效。
pub fn restrict_task_to_cpus(task: Task, mask: u32) -> Result<()> {
    if mask == 0 {
        return Err(RtosError::OperationNotPermitted);
    }
    state::enter(|k| {
        let priority = k
            .tasks
            .find_by_id(task.id())
            .ok_or(RtosError::OperationNotPermitted)?;
        for (cpu, allowed) in k.cpu.allowed.iter_mut().enumerate() {
            if mask & (1 << cpu) != 0 {
                allowed.add(priority);
            } else {
                allowed.remove(priority);
            }
        }
        Ok(())
    })
}

/// 任务的亲和掩码
pub fn allowed_cpus(task: Task) -> Result<u32> {
    state::enter(|k| {
        let priority = k
            .tasks
            .find_by_id(task.id())
            .ok_or(RtosError::OperationNotPermitted)?;
        let mut mask = 0u32;
        for (cpu, allowed) in k.cpu.allowed.iter().enumerate() {
            if allowed.contains(priority) {
                mask |= 1 << cpu;
            }
        }
        Ok(mask)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::task::Task;
    use crate::utils::kernel_init;
    use serial_test::serial;

    fn current_of(cpu: CpuId) -> Option<usize> {
        state::enter(|k| {
            let id = k.cpu.current_id(cpu)?;
            k.tasks.find_by_id(id)
        })
    }

    #[test]
    #[serial]
    fn test_two_cpus_take_two_highest() {
        kernel_init();
        Task::builder("a").priority(3).spawn(|| {}).unwrap();
        Task::builder("b").priority(7).spawn(|| {}).unwrap();
        Task::builder("c").priority(5).spawn(|| {}).unwrap();
        state::enter(|k| {
            schedule_on(k, 0);
            schedule_on(k, 1);
        });
        assert_eq!(current_of(0), Some(7));
        assert_eq!(current_of(1), Some(5));
    }

    #[test]
    #[serial]
    fn test_same_task_never_on_two_cpus() {
        kernel_init();
        Task::builder("only").priority(9).spawn(|| {}).unwrap();
        state::enter(|k| {
            schedule_on(k, 0);
            schedule_on(k, 1);
        });
        assert_eq!(current_of(0), Some(9));
        // 1 号核只剩 Idle
        assert_eq!(current_of(1), Some(crate::config::PRIORITY_IDLE));
    }

    #[test]
    #[serial]
    fn test_affinity_is_respected() {
        kernel_init();
        let pinned = Task::builder("pinned").priority(9).spawn(|| {}).unwrap();
        Task::builder("other").priority(4).spawn(|| {}).unwrap();
        restrict_task_to_cpus(pinned, 0b10).unwrap();
        assert_eq!(allowed_cpus(pinned).unwrap() & 0b11, 0b10);
        state::enter(|k| {
            schedule_on(k, 0);
            schedule_on(k, 1);
        });
        // 最高优先级被钉在 1 号核上，0 号核拿次高的
        assert_eq!(current_of(0), Some(4));
        assert_eq!(current_of(1), Some(9));
    }

    #[test]
    #[serial]
    fn test_reschedule_picks_up_freed_task() {
        kernel_init();
        let a = Task::builder("a").priority(7).spawn(|| {}).unwrap();
        Task::builder("b").priority(5).spawn(|| {}).unwrap();
        state::enter(|k| {
            schedule_on(k, 0);
            schedule_on(k, 1);
        });
        assert_eq!(current_of(0), Some(7));
        a.kill().unwrap();
        state::enter(|k| schedule_on(k, 0));
        // 7 没了，5 还被 1 号核占着，0 号核回落到 Idle
        assert_eq!(current_of(0), Some(crate::config::PRIORITY_IDLE));
        assert_eq!(current_of(1), Some(5));
    }

    #[test]
    #[serial]
    fn test_timeshare_parallel_cap() {
        kernel_init();
        Task::builder("ts_a")
            .priority(6)
            .time_slice(5)
            .spawn(|| {})
            .unwrap();
        Task::builder("ts_b")
            .priority(4)
            .time_slice(5)
            .spawn(|| {})
            .unwrap();
        state::enter(|k| {
            schedule_on(k, 0);
            schedule_on(k, 1);
        });
        // 同时只允许一个分时任务在跑
        assert_eq!(current_of(0), Some(6));
        assert_eq!(current_of(1), Some(crate::config::PRIORITY_IDLE));
        state::enter(|k| {
            assert_eq!(k.cpu.running.intersect(k.timeshare).count(), 1);
        });
    }

    #[test]
    #[serial]
    fn test_zero_mask_rejected() {
        kernel_init();
        let t = Task::builder("t").priority(3).spawn(|| {}).unwrap();
        assert_eq!(
            restrict_task_to_cpus(t, 0).unwrap_err(),
            RtosError::OperationNotPermitted
        );
    }
}
