//! CPU 状态：单核与多核（smp）两个变体
//!
//! 内核其余部分只通过这里的访问器了解"谁在哪个核上跑"，
//! 单核构建里这些访问器全部退化成对一个 `Option<TaskId>` 的读写。

use crate::kernel::task::TaskId;

#[cfg(feature = "smp")]
use crate::config::CPU_CORES;
#[cfg(feature = "smp")]
use crate::kernel::taskset::TaskSet;

pub type CpuId = usize;
/// 核位图，第 n 位代表第 n 个核
pub type CpuMask = u32;

/// 当前执行流所在的核
///
/// hosted 端口是单核仿真，永远是核 0；真实 smp 端口由 HAL 提供。
#[inline]
pub fn current_cpu() -> CpuId {
    0
}

#[cfg(not(feature = "smp"))]
pub struct CpuState {
    current: Option<TaskId>,
}

#[cfg(not(feature = "smp"))]
impl CpuState {
    pub const fn new() -> Self {
        CpuState { current: None }
    }

    #[inline]
    pub fn current_id(&self, _cpu: CpuId) -> Option<TaskId> {
        self.current
    }

    #[inline]
    pub fn set_current(&mut self, _cpu: CpuId, id: Option<TaskId>) {
        self.current = id;
    }
}

#[cfg(feature = "smp")]
pub struct CpuState {
    /// 各核正在执行的任务
    pub current: [Option<TaskId>; CPU_CORES],
    /// 各核允许执行的优先级集合（restrict_task_to_cpus 维护）
    pub allowed: [TaskSet; CPU_CORES],
    /// 所有核上正在执行的任务的并集
    pub running: TaskSet,
    /// 正在执行时间片任务的核
    pub timeshare_cpus: CpuMask,
}

#[cfg(feature = "smp")]
impl CpuState {
    pub const fn new() -> Self {
        CpuState {
            current: [None; CPU_CORES],
            allowed: [TaskSet::FULL; CPU_CORES],
            running: TaskSet::EMPTY,
            timeshare_cpus: 0,
        }
    }

    #[inline]
    pub fn current_id(&self, cpu: CpuId) -> Option<TaskId> {
        self.current[cpu]
    }

    #[inline]
    pub fn set_current(&mut self, cpu: CpuId, id: Option<TaskId>) {
        self.current[cpu] = id;
    }

    /// 找出正在执行指定任务的核
    pub fn cpu_of(&self, id: TaskId) -> Option<CpuId> {
        (0..CPU_CORES).find(|&cpu| self.current[cpu] == Some(id))
    }
}
