//! 任务管理
//!
//! 任务注册表是一个按优先级索引的槽位数组：一个优先级最多一个任务，
//! 优先级既是身份也是注册表下标。`Task` 句柄包的是一个单调递增、
//! 永不复用的任务 id，所以它在 `change_priority` 之后依然有效。

pub mod builder;
pub mod ops;

use core::sync::atomic::{AtomicUsize, Ordering};

use crate::compat::Box;
use crate::config::{PRIORITY_COUNT, PRIORITY_IDLE};
use crate::error::types::{Result, RtosError};
use crate::hal;
use crate::kernel::state;
use crate::kernel::taskset::Priority;
use crate::kernel::time::{FOREVER, Ticks};
use crate::kernel::timeshare::FcfsLink;
use crate::sync::event::WaitChannel;

pub use builder::TaskBuilder;

/// 任务 id，全局单调递增，跨 kernel_init 也不复用
pub type TaskId = usize;

static NEXT_TASK_ID: AtomicUsize = AtomicUsize::new(1);

pub(crate) fn alloc_task_id() -> TaskId {
    NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed)
}

/// 任务函数特征，支持 FnOnce 闭包
pub trait TaskFunction: Send + 'static {
    fn call(self: Box<Self>);
}

impl<F> TaskFunction for F
where
    F: FnOnce() + Send + 'static,
{
    fn call(self: Box<Self>) {
        (*self)()
    }
}

/// 任务状态
///
/// `suspended` 和 `preempted` 不在这里：它们是独立的布尔标记，
/// 可以和任何状态组合。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// 就绪或正在执行
    Active,
    /// 在某个等待通道上等待
    Waiting,
    /// 睡到某个唤醒时间
    Sleeping,
    /// 等待超时，调度回来后报告 TimedOut
    TimedOut,
    /// 被强制唤醒，调度回来后报告 Aborted
    Awakened,
    /// 已结束。注册表里不会出现这个状态，只用于对外报告
    Killed,
}

/// FIFO 链节点槽位：等待通道链
pub const LINK_WAIT: usize = 0;
/// FIFO 链节点槽位：被抢占任务链
pub const LINK_PREEMPTED: usize = 1;

/// 任务控制块
pub struct TaskControlBlock {
    pub name: &'static str,
    pub id: TaskId,
    pub priority: Priority,
    pub status: TaskStatus,
    pub suspended: bool,
    pub preempted: bool,

    /// 正在等待的通道
    pub wait_for: Option<WaitChannel>,
    /// 精确匹配的唤醒时间，只在 sleepers 集合里有意义
    pub wake_up_time: Ticks,

    pub is_timeshared: bool,
    /// 本轮剩余额度，FOREVER 表示不受时间片约束
    pub ticks_to_run: Ticks,
    /// 每轮补满的额度
    pub time_slice_ticks: Ticks,
    /// 最近一次扣减发生的节拍，保证每个节拍最多扣一次
    pub time_watermark: Ticks,

    /// FIFO 链节点（等待链 / 被抢占链），存的是邻居的优先级
    pub links: [FcfsLink; 2],

    /// 任务体，首次调度时被取走执行
    pub body: Option<Box<dyn TaskFunction>>,

    #[cfg(any(test, feature = "hosted"))]
    pub thread: Option<std::thread::Thread>,
}

impl TaskControlBlock {
    pub(crate) fn new(
        name: &'static str,
        id: TaskId,
        priority: Priority,
        body: Box<dyn TaskFunction>,
    ) -> Self {
        TaskControlBlock {
            name,
            id,
            priority,
            status: TaskStatus::Active,
            suspended: false,
            preempted: false,
            wait_for: None,
            wake_up_time: 0,
            is_timeshared: false,
            ticks_to_run: FOREVER,
            time_slice_ticks: FOREVER,
            time_watermark: 0,
            links: [FcfsLink::new(), FcfsLink::new()],
            body: Some(body),
            #[cfg(any(test, feature = "hosted"))]
            thread: None,
        }
    }
}

/// 任务注册表：每个优先级一个槽位
pub struct TaskArena {
    slots: [Option<TaskControlBlock>; PRIORITY_COUNT],
}

impl TaskArena {
    pub const fn new() -> Self {
        TaskArena {
            slots: [const { None }; PRIORITY_COUNT],
        }
    }

    #[inline]
    pub fn get(&self, priority: Priority) -> Option<&TaskControlBlock> {
        self.slots.get(priority)?.as_ref()
    }

    #[inline]
    pub fn get_mut(&mut self, priority: Priority) -> Option<&mut TaskControlBlock> {
        self.slots.get_mut(priority)?.as_mut()
    }

    /// 注册任务，槽位被占时报 PriorityInUse
    pub fn insert(&mut self, tcb: TaskControlBlock) -> Result<()> {
        let slot = self
            .slots
            .get_mut(tcb.priority)
            .ok_or(RtosError::InvalidPriority)?;
        if slot.is_some() {
            return Err(RtosError::PriorityInUse);
        }
        *slot = Some(tcb);
        Ok(())
    }

    pub fn take(&mut self, priority: Priority) -> Option<TaskControlBlock> {
        self.slots.get_mut(priority)?.take()
    }

    /// 按任务 id 找优先级。注册表最多 32 个槽位，线性扫描即可
    pub fn find_by_id(&self, id: TaskId) -> Option<Priority> {
        self.slots
            .iter()
            .position(|s| matches!(s, Some(t) if t.id == id))
    }

    #[inline]
    pub fn id_at(&self, priority: Priority) -> Option<TaskId> {
        Some(self.get(priority)?.id)
    }
}

/// 任务句柄
///
/// 只是一个任务 id，可以随意复制、跨任务传递。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Task(pub(crate) TaskId);

impl Task {
    /// 创建任务构建器
    pub fn builder(name: &'static str) -> TaskBuilder {
        TaskBuilder::new(name)
    }

    /// 创建任务的快捷方式
    pub fn create<F>(name: &'static str, priority: Priority, body: F) -> Result<Task>
    where
        F: FnOnce() + Send + 'static,
    {
        TaskBuilder::new(name).priority(priority).spawn(body)
    }

    /// 当前正在执行的任务
    pub fn current() -> Option<Task> {
        state::enter(|k| k.current_id()).map(Task)
    }

    /// 按优先级查任务
    pub fn from_priority(priority: Priority) -> Option<Task> {
        state::enter(|k| k.tasks.id_at(priority)).map(Task)
    }

    pub fn id(&self) -> TaskId {
        self.0
    }

    pub fn name(&self) -> Option<&'static str> {
        state::enter(|k| {
            let prio = k.tasks.find_by_id(self.0)?;
            Some(k.tasks.get(prio)?.name)
        })
    }

    /// 重命名任务，已结束的任务报 OperationNotPermitted
    pub fn set_name(&self, name: &'static str) -> Result<()> {
        state::enter(|k| {
            let prio = k
                .tasks
                .find_by_id(self.0)
                .ok_or(RtosError::OperationNotPermitted)?;
            let tcb = k.tasks.get_mut(prio).ok_or(RtosError::Failed)?;
            tcb.name = name;
            Ok(())
        })
    }

    /// 任务当前的优先级（change_priority 之后会变）
    pub fn priority(&self) -> Option<Priority> {
        state::enter(|k| k.tasks.find_by_id(self.0))
    }

    /// 任务状态，已结束的任务报告 Killed
    pub fn status(&self) -> TaskStatus {
        state::enter(|k| {
            k.tasks
                .find_by_id(self.0)
                .and_then(|p| k.tasks.get(p))
                .map(|t| t.status)
                .unwrap_or(TaskStatus::Killed)
        })
    }

    pub fn is_suspended(&self) -> bool {
        state::enter(|k| {
            k.tasks
                .find_by_id(self.0)
                .and_then(|p| k.tasks.get(p))
                .map(|t| t.suspended)
                .unwrap_or(false)
        })
    }

    /// 挂起任务，正在等待/睡眠的任务先以 Aborted 被强制唤醒
    pub fn suspend(&self) -> Result<()> {
        ops::suspend(*self)
    }

    /// 恢复被挂起的任务
    pub fn resume(&self) -> Result<()> {
        ops::resume(*self)
    }

    /// 强制唤醒正在等待/睡眠的任务，其等待以 Aborted 结束
    pub fn wakeup(&self) -> Result<()> {
        ops::wakeup(*self)
    }

    /// 结束任务。对已结束的任务是幂等的
    pub fn kill(&self) -> Result<()> {
        ops::kill(*self)
    }

    /// 改变任务优先级，所有集合成员关系跟着迁移
    pub fn change_priority(&self, new_priority: Priority) -> Result<()> {
        ops::change_priority(*self, new_priority)
    }

    /// 结束当前任务，不再返回
    pub fn kill_self() -> ! {
        if let Some(task) = Task::current() {
            let _ = task.kill();
        }
        // kill 已让出 CPU；到这里说明没有任务上下文，原地停住
        loop {
            core::hint::spin_loop();
        }
    }
}

/// 任务体返回后的收尾，等价于对自己调用 kill
pub(crate) fn exit_task(id: TaskId) {
    state::enter(|k| {
        let Some(prio) = k.tasks.find_by_id(id) else {
            return;
        };
        if prio == PRIORITY_IDLE {
            return;
        }
        ops::detach_everywhere(k, prio);
        k.tasks.take(prio);
        if k.current_id() == Some(id) {
            k.set_current(None);
        }
    });
    hal::finish_task();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::kernel_init;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_set_name_renames_live_task() {
        kernel_init();
        let task = Task::builder("before").priority(5).spawn(|| {}).unwrap();
        assert_eq!(task.name(), Some("before"));
        task.set_name("after").unwrap();
        assert_eq!(task.name(), Some("after"));
        // 改名不碰优先级和状态
        assert_eq!(task.priority(), Some(5));
        assert_eq!(task.status(), TaskStatus::Active);
    }

    #[test]
    #[serial]
    fn test_set_name_survives_change_priority() {
        kernel_init();
        let task = Task::builder("mover").priority(5).spawn(|| {}).unwrap();
        task.set_name("renamed").unwrap();
        task.change_priority(9).unwrap();
        assert_eq!(task.name(), Some("renamed"));
    }

    #[test]
    #[serial]
    fn test_set_name_rejects_killed_task() {
        kernel_init();
        let task = Task::builder("gone").priority(5).spawn(|| {}).unwrap();
        task.kill().unwrap();
        assert_eq!(
            task.set_name("zombie").unwrap_err(),
            RtosError::OperationNotPermitted
        );
    }
}
