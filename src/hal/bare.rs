//! 裸机端口桩
//!
//! 真实端口把这四个函数接到架构的上下文切换机制上
//! （见 [`crate::hal::traits`]）：调度决策之后触发一次
//! 切换陷阱，在陷阱里保存/恢复任务上下文。

use crate::error::types::Result;
use crate::kernel::scheduler;
use crate::kernel::state;
use crate::kernel::task::TaskId;

pub(crate) fn request_reschedule() {
    state::enter(|k| scheduler::schedule(k));
    // TODO: 接 ContextSwitch::trigger_switch
}

pub(crate) fn request_yield() {
    state::enter(|k| scheduler::schedule_for_yield(k));
}

pub(crate) fn spawn_task_thread(_id: TaskId, _name: &'static str, _stack_size: usize) -> Result<()> {
    // 裸机端口在这里分配任务栈并构建初始上下文
    Ok(())
}

pub(crate) fn finish_task() {
    request_reschedule();
}
