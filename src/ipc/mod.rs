//! 任务间通信

pub mod queue;

// 重新导出常用类型
pub use queue::Queue;
