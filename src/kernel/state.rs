//! 内核全局状态
//!
//! 所有可变内核状态集中在一个 `KernelState` 里，由 `spin::Once<Mutex<...>>`
//! 单例持有。每个内核操作在一次 [`enter`] 调用内完成全部状态变更：
//! `critical_section::with`（屏蔽中断）加内核大锁就是本内核的临界区。
//! 临界区从不嵌套、从不阻塞。

use spin::{Mutex, Once};

use crate::config::{MAX_EVENTS, MAX_MUTEXES, MAX_SEMAPHORES};
use crate::kernel::cpu::{self, CpuState};
use crate::kernel::task::{TaskArena, TaskId};
use crate::kernel::taskset::{Priority, TaskSet};
use crate::kernel::time::Ticks;
use crate::kernel::timeshare::FcfsList;
use crate::sync::event::EventControl;
use crate::sync::mutex::MutexControl;
use crate::sync::semaphore::SemaphoreControl;

pub(crate) struct KernelState {
    /// 自启动以来的节拍数，回绕是正常的
    pub time: Ticks,
    /// 中断嵌套深度，> 0 表示处于中断上下文
    pub interrupt_nesting: u32,
    /// 调度器锁嵌套计数
    pub scheduler_locked: u32,
    /// kernel_start 之后为 true，任务体只在这之后执行
    pub is_running: bool,

    /// 就绪集合（包含正在执行的任务）
    pub ready: TaskSet,
    /// 被挂起的任务
    pub suspended: TaskSet,
    /// 时间片（分时）任务
    pub timeshare: TaskSet,
    /// 用完时间片、在 FIFO 里排队的任务
    pub preempted: TaskSet,
    /// 设置了唤醒时间的任务（睡眠，或带限时的等待）
    pub sleepers: TaskSet,
    /// 被互斥锁天花板占用、不可分配给任务的优先级
    pub priorities_in_use: TaskSet,

    /// 被抢占任务的 FIFO
    pub preempted_list: FcfsList,

    /// 任务注册表：每个优先级一个槽位
    pub tasks: TaskArena,

    pub events: [Option<EventControl>; MAX_EVENTS],
    pub semaphores: [Option<SemaphoreControl>; MAX_SEMAPHORES],
    pub mutexes: [Option<MutexControl>; MAX_MUTEXES],

    pub cpu: CpuState,
}

impl KernelState {
    pub const fn new() -> Self {
        KernelState {
            time: 0,
            interrupt_nesting: 0,
            scheduler_locked: 0,
            is_running: false,
            ready: TaskSet::EMPTY,
            suspended: TaskSet::EMPTY,
            timeshare: TaskSet::EMPTY,
            preempted: TaskSet::EMPTY,
            sleepers: TaskSet::EMPTY,
            priorities_in_use: TaskSet::EMPTY,
            preempted_list: FcfsList::new(),
            tasks: TaskArena::new(),
            events: [const { None }; MAX_EVENTS],
            semaphores: [const { None }; MAX_SEMAPHORES],
            mutexes: [const { None }; MAX_MUTEXES],
            cpu: CpuState::new(),
        }
    }

    /// 本核正在执行的任务
    #[inline]
    pub fn current_id(&self) -> Option<TaskId> {
        self.cpu.current_id(cpu::current_cpu())
    }

    #[inline]
    pub fn set_current(&mut self, id: Option<TaskId>) {
        self.cpu.set_current(cpu::current_cpu(), id);
    }

    /// 本核正在执行的任务的优先级
    pub fn current_priority(&self) -> Option<Priority> {
        self.current_id().and_then(|id| self.tasks.find_by_id(id))
    }

    /// 阻塞类操作此刻是否被允许
    #[inline]
    pub fn blocking_allowed(&self) -> bool {
        self.interrupt_nesting == 0 && self.scheduler_locked == 0
    }

    /// 被推迟的调度此刻是否可以执行
    #[inline]
    pub fn reschedule_allowed(&self) -> bool {
        self.interrupt_nesting == 0 && self.scheduler_locked == 0
    }
}

static KERNEL: Once<Mutex<KernelState>> = Once::new();

fn kernel() -> &'static Mutex<KernelState> {
    KERNEL.call_once(|| Mutex::new(KernelState::new()))
}

/// 临界区：屏蔽中断并独占内核状态
pub(crate) fn enter<R>(f: impl FnOnce(&mut KernelState) -> R) -> R {
    critical_section::with(|_| {
        let mut guard = kernel().lock();
        f(&mut guard)
    })
}

/// 把内核状态整体重置回上电状态
pub(crate) fn reset() {
    enter(|k| *k = KernelState::new());
}
