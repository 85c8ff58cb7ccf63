//! 同步原语
//!
//! 事件是所有阻塞原语的底座：信号量和互斥锁都内嵌一个事件控制块，
//! 共享同一套等待/唤醒协议。

pub mod event;
pub mod mutex;
pub mod semaphore;

// 重新导出常用类型
pub use event::EventHandle;
pub use mutex::Mutex;
pub use semaphore::Semaphore;
