//! 硬件抽象层 Trait 定义
//!
//! 裸机端口按架构实现这些 trait，再把 `bare` 模块的四个端口函数
//! 接到具体实现上。hosted 端口不走这里。

/// 上下文切换
pub trait ContextSwitch {
    /// 初始化任务栈
    ///
    /// 在任务栈上构建初始上下文，使任务可以被调度执行
    ///
    /// # 参数
    /// - `stack_top`: 栈顶指针（会被修改为初始化后的栈顶）
    /// - `entry`: 任务入口函数
    /// - `arg`: 传递给任务的参数
    fn init_task_stack(stack_top: &mut usize, entry: fn(usize), arg: usize);

    /// 触发上下文切换
    ///
    /// 通常通过触发 PendSV 一类的软中断来实现
    fn trigger_switch();

    /// 启动第一个任务
    fn start_first_task();
}

/// 节拍源
///
/// 周期性调用 `kernel::time::tick()` 的定时器。
pub trait TickSource {
    /// 初始化节拍源
    ///
    /// # 参数
    /// - `frequency`: 节拍频率（Hz），通常取 `config::TICKS_PER_SECOND`
    fn init(frequency: u32);

    /// 节拍中断处理，中断里用 `enter_interrupt`/`exit_interrupt` 包住
    fn tick_handler();
}

/// 空闲钩子
///
/// Idle 任务每圈调用一次，通常执行低功耗等待。
pub trait IdleHook {
    fn on_idle();
}
