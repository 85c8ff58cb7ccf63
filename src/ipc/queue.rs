//! 有界消息队列
//!
//! 两个信号量管名额（filled 管可取的消息数，empty 管剩余容量），
//! 环形缓冲只在一个自旋锁里做指针挪动。阻塞、超时、唤醒顺序
//! 全部继承信号量的协议，队列本身不再造一套。

use crate::error::types::{Result, RtosError};
use crate::kernel::state;
use crate::kernel::time::Ticks;
use crate::sync::Semaphore;

struct Ring<const N: usize> {
    head: usize,
    tail: usize,
    len: usize,
    buffer: [usize; N],
    destroyed: bool,
}

impl<const N: usize> Ring<N> {
    const fn new() -> Self {
        Ring {
            head: 0,
            tail: 0,
            len: 0,
            buffer: [0; N],
            destroyed: false,
        }
    }

    fn push_back(&mut self, value: usize) {
        self.buffer[self.tail] = value;
        self.tail = (self.tail + 1) % N;
        self.len += 1;
    }

    fn push_front(&mut self, value: usize) {
        self.head = (self.head + N - 1) % N;
        self.buffer[self.head] = value;
        self.len += 1;
    }

    fn pop_front(&mut self) -> usize {
        let value = self.buffer[self.head];
        self.head = (self.head + 1) % N;
        self.len -= 1;
        value
    }
}

/// 有界消息队列，消息是一个 `usize`（通常当指针或句柄用）
pub struct Queue<const N: usize> {
    ring: spin::Mutex<Ring<N>>,
    /// 可取的消息数
    filled: Semaphore,
    /// 剩余容量
    empty: Semaphore,
}

impl<const N: usize> Queue<N> {
    /// 创建队列
    ///
    /// # 返回值
    /// - `Err(RtosError::OperationNotPermitted)`: 容量为 0
    /// - `Err(RtosError::Overflow)`: 信号量槽位用完
    pub fn new() -> Result<Queue<N>> {
        if N == 0 {
            return Err(RtosError::OperationNotPermitted);
        }
        let filled = Semaphore::new(0)?;
        let empty = match Semaphore::new(N as u32) {
            Ok(s) => s,
            Err(e) => {
                let _ = filled.destroy();
                return Err(e);
            }
        };
        Ok(Queue {
            ring: spin::Mutex::new(Ring::new()),
            filled,
            empty,
        })
    }

    /// 入队到队尾
    ///
    /// # 参数
    /// - `timeout`: 等容量的节拍数。0 不阻塞，FOREVER 永等。
    ///   中断上下文只允许 0
    ///
    /// # 返回值
    /// - `Err(RtosError::TimedOut)`: 队满且等不到容量
    /// - `Err(RtosError::Failed)`: 中断上下文里带非零超时
    pub fn enqueue(&self, value: usize, timeout: Ticks) -> Result<()> {
        self.check_isr_timeout(timeout)?;
        self.empty.get(timeout)?;
        {
            let mut ring = self.ring.lock();
            if ring.destroyed {
                let _ = self.empty.post();
                return Err(RtosError::OperationNotPermitted);
            }
            ring.push_back(value);
        }
        self.filled.post()
    }

    /// 插队到队头（紧急消息）
    pub fn prepend(&self, value: usize, timeout: Ticks) -> Result<()> {
        self.check_isr_timeout(timeout)?;
        self.empty.get(timeout)?;
        {
            let mut ring = self.ring.lock();
            if ring.destroyed {
                let _ = self.empty.post();
                return Err(RtosError::OperationNotPermitted);
            }
            ring.push_front(value);
        }
        self.filled.post()
    }

    /// 出队
    ///
    /// # 参数
    /// - `timeout`: 等消息的节拍数。0 不阻塞，FOREVER 永等。
    ///   中断上下文只允许 0
    pub fn dequeue(&self, timeout: Ticks) -> Result<usize> {
        self.check_isr_timeout(timeout)?;
        self.filled.get(timeout)?;
        let value = {
            let mut ring = self.ring.lock();
            if ring.destroyed {
                let _ = self.filled.post();
                return Err(RtosError::OperationNotPermitted);
            }
            ring.pop_front()
        };
        self.empty.post()?;
        Ok(value)
    }

    /// 看一眼队头，不取走
    ///
    /// # 返回值
    /// - `Err(RtosError::Failed)`: 队列是空的
    pub fn peek(&self) -> Result<usize> {
        let ring = self.ring.lock();
        if ring.destroyed {
            return Err(RtosError::OperationNotPermitted);
        }
        if ring.len == 0 {
            return Err(RtosError::Failed);
        }
        Ok(ring.buffer[ring.head])
    }

    /// 当前消息数
    pub fn len(&self) -> usize {
        self.ring.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 销毁队列，里面还有消息时报 Failed
    pub fn destroy(&self) -> Result<()> {
        {
            let mut ring = self.ring.lock();
            if ring.destroyed {
                return Err(RtosError::OperationNotPermitted);
            }
            if ring.len > 0 {
                return Err(RtosError::Failed);
            }
            ring.destroyed = true;
        }
        let _ = self.filled.destroy();
        let _ = self.empty.destroy();
        Ok(())
    }

    fn check_isr_timeout(&self, timeout: Ticks) -> Result<()> {
        if timeout != 0 && state::enter(|k| k.interrupt_nesting > 0) {
            return Err(RtosError::Failed);
        }
        Ok(())
    }
}
