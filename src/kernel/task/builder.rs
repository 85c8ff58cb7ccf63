//! 任务构建器
//!
//! 提供链式 API 创建任务，支持设置优先级、时间片和栈大小。

use super::{Task, TaskControlBlock, alloc_task_id};
use crate::compat::Box;
use crate::config::{DEFAULT_STACK_SIZE, PRIORITY_HIGHEST};
use crate::error::types::{Result, RtosError};
use crate::hal;
use crate::kernel::state;
use crate::kernel::taskset::Priority;
use crate::kernel::time::Ticks;
use crate::{debug, info};

/// 任务构建器
///
/// # 示例
///
/// ```rust,ignore
/// use xenon_rtos::kernel::task::Task;
///
/// // 普通任务
/// let task = Task::builder("worker")
///     .priority(5)
///     .spawn(|| {
///         // 任务逻辑
///     });
///
/// // 分时任务：每轮 10 个节拍
/// let task = Task::builder("background")
///     .priority(3)
///     .time_slice(10)
///     .spawn(|| {});
/// ```
pub struct TaskBuilder {
    name: &'static str,
    priority: Option<Priority>,
    time_slice: Option<Ticks>,
    /// 栈大小只对 hosted 端口的任务线程生效
    stack_size: usize,
}

impl TaskBuilder {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            priority: None,
            time_slice: None,
            stack_size: DEFAULT_STACK_SIZE,
        }
    }

    /// 设置任务优先级
    ///
    /// 优先级必须系统内唯一：既没被任务占用，也没被互斥锁天花板保留。
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// 把任务标记为分时任务并设置每轮时间片
    ///
    /// # 参数
    /// - `ticks`: 每轮可执行的节拍数，用完后排到被抢占 FIFO 的队尾
    pub fn time_slice(mut self, ticks: Ticks) -> Self {
        self.time_slice = Some(ticks);
        self
    }

    /// 设置栈大小（字节），8 字节向上对齐
    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = (size + 7) & !7;
        self
    }

    /// 创建任务并注册到调度器
    ///
    /// # 返回值
    /// - `Ok(Task)`: 任务句柄
    /// - `Err(RtosError::InvalidPriority)`: 没设置优先级或超出范围
    /// - `Err(RtosError::PriorityInUse)`: 优先级已被任务或互斥锁天花板占用
    pub fn spawn<F>(self, body: F) -> Result<Task>
    where
        F: FnOnce() + Send + 'static,
    {
        let priority = self.priority.ok_or(RtosError::InvalidPriority)?;
        if priority > PRIORITY_HIGHEST {
            return Err(RtosError::InvalidPriority);
        }
        let id = alloc_task_id();
        let name = self.name;
        let time_slice = self.time_slice;

        state::enter(|k| {
            if k.priorities_in_use.contains(priority) {
                return Err(RtosError::PriorityInUse);
            }
            let mut tcb = TaskControlBlock::new(name, id, priority, Box::new(body));
            if let Some(slice) = time_slice {
                tcb.is_timeshared = true;
                tcb.time_slice_ticks = slice;
                tcb.ticks_to_run = slice;
                tcb.time_watermark = k.time;
            }
            k.tasks.insert(tcb)?;
            if time_slice.is_some() {
                k.timeshare.add(priority);
            }
            k.ready.add(priority);
            Ok(())
        })?;

        if let Err(e) = hal::spawn_task_thread(id, name, self.stack_size) {
            // 线程起不来就把注册也撤掉
            state::enter(|k| {
                k.ready.remove(priority);
                k.timeshare.remove(priority);
                k.tasks.take(priority);
            });
            crate::error!("task {} thread spawn failed", name);
            return Err(e);
        }

        if time_slice.is_some() {
            debug!("task {} created at priority {} (timeshared)", name, priority);
        } else {
            info!("task {} created at priority {}", name, priority);
        }
        Ok(Task(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::time::FOREVER;
    use crate::utils::kernel_init;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_builder_requires_priority() {
        kernel_init();
        let r = Task::builder("no_priority").spawn(|| {});
        assert_eq!(r.unwrap_err(), RtosError::InvalidPriority);
    }

    #[test]
    #[serial]
    fn test_builder_rejects_out_of_range() {
        kernel_init();
        let r = Task::builder("too_high").priority(32).spawn(|| {});
        assert_eq!(r.unwrap_err(), RtosError::InvalidPriority);
    }

    #[test]
    #[serial]
    fn test_priority_must_be_unique() {
        kernel_init();
        Task::builder("first").priority(4).spawn(|| {}).unwrap();
        let r = Task::builder("second").priority(4).spawn(|| {});
        assert_eq!(r.unwrap_err(), RtosError::PriorityInUse);
    }

    #[test]
    #[serial]
    fn test_timeshared_task_fields() {
        kernel_init();
        let task = Task::builder("ts")
            .priority(6)
            .time_slice(10)
            .spawn(|| {})
            .unwrap();
        state::enter(|k| {
            assert!(k.timeshare.contains(6));
            let tcb = k.tasks.get(6).unwrap();
            assert!(tcb.is_timeshared);
            assert_eq!(tcb.time_slice_ticks, 10);
            assert_eq!(tcb.ticks_to_run, 10);
        });
        assert_eq!(task.priority(), Some(6));
    }

    #[test]
    #[serial]
    fn test_plain_task_has_no_slice() {
        kernel_init();
        Task::builder("plain").priority(7).spawn(|| {}).unwrap();
        state::enter(|k| {
            assert!(!k.timeshare.contains(7));
            assert_eq!(k.tasks.get(7).unwrap().ticks_to_run, FOREVER);
        });
    }
}
