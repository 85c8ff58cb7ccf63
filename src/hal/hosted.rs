//! hosted 端口：每个任务一个 std 线程
//!
//! 调度器选中谁，谁的线程就被 unpark；其余任务线程停在 park 里。
//! 同一时刻最多一个任务线程在跑，和单核裸机行为一致。park 前
//! 总是先检查共享状态（自己是不是 current），所以 unpark 早到
//! 也不会丢：park 会立即返回再检查一遍。
//!
//! 测试之间内核会整体重置。线程没法安全地掐掉，所以用世代计数
//! 让旧任务线程自行退场：kernel_init 把世代加一并 unpark 所有
//! 记录在案的线程，还停在初始等待里的直接返回退出，已经跑起来
//! 的停住不再参与调度。任务 id 跨世代不复用，旧线程不会被误认。

use std::cell::Cell;
use std::string::String;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, Thread};
use std::vec::Vec;

use crate::error::types::{Result, RtosError};
use crate::kernel::scheduler;
use crate::kernel::state::{self, KernelState};
use crate::kernel::task::{self, TaskId};

static GENERATION: AtomicU64 = AtomicU64::new(0);
static PARKED_THREADS: StdMutex<Vec<Thread>> = StdMutex::new(Vec::new());

thread_local! {
    /// 本线程扮演的任务和所属世代，None 表示 supervisor/中断上下文
    static TASK_CONTEXT: Cell<Option<(TaskId, u64)>> = const { Cell::new(None) };
}

/// 废弃上一世代的全部任务线程（kernel_init 调用）
pub(crate) fn retire_threads() {
    GENERATION.fetch_add(1, Ordering::SeqCst);
    let threads: Vec<Thread> = {
        let mut guard = PARKED_THREADS.lock().unwrap();
        guard.drain(..).collect()
    };
    for t in threads {
        t.unpark();
    }
}

/// 给任务起一个执行流
pub(crate) fn spawn_task_thread(
    id: TaskId,
    name: &'static str,
    stack_size: usize,
) -> Result<()> {
    let generation = GENERATION.load(Ordering::SeqCst);
    let handle = thread::Builder::new()
        .name(String::from(name))
        .stack_size(stack_size)
        .spawn(move || trampoline(id, generation))
        .map_err(|_| RtosError::Failed)?
        .thread()
        .clone();
    PARKED_THREADS.lock().unwrap().push(handle.clone());
    state::enter(|k| {
        if let Some(p) = k.tasks.find_by_id(id) {
            if let Some(tcb) = k.tasks.get_mut(p) {
                tcb.thread = Some(handle);
            }
        }
    });
    Ok(())
}

fn trampoline(id: TaskId, generation: u64) {
    TASK_CONTEXT.with(|c| c.set(Some((id, generation))));
    // 初始等待：内核启动且轮到自己才起跑
    loop {
        if GENERATION.load(Ordering::SeqCst) != generation {
            return;
        }
        let go = state::enter(|k| k.is_running && k.current_id() == Some(id));
        if go {
            break;
        }
        thread::park();
    }
    let body = state::enter(|k| {
        let p = k.tasks.find_by_id(id)?;
        k.tasks.get_mut(p)?.body.take()
    });
    if let Some(body) = body {
        body.call();
    }
    // 任务体返回等于自杀
    task::exit_task(id);
}

fn current_thread(k: &KernelState) -> Option<Thread> {
    let id = k.current_id()?;
    let p = k.tasks.find_by_id(id)?;
    k.tasks.get(p)?.thread.clone()
}

fn switch_to(for_yield: bool) {
    let wake = state::enter(|k| {
        if for_yield {
            scheduler::schedule_for_yield(k);
        } else {
            scheduler::schedule(k);
        }
        current_thread(k)
    });
    if let Some(t) = wake {
        if t.id() != thread::current().id() {
            t.unpark();
        }
    }
    // supervisor/中断上下文只做决策，不停车
    let Some((id, generation)) = TASK_CONTEXT.with(|c| c.get()) else {
        return;
    };
    loop {
        if GENERATION.load(Ordering::SeqCst) != generation {
            park_forever();
        }
        let (alive, am_current) =
            state::enter(|k| (k.tasks.find_by_id(id).is_some(), k.current_id() == Some(id)));
        if am_current {
            return;
        }
        if !alive {
            // 被 kill 的任务不再回来
            park_forever();
        }
        thread::park();
    }
}

fn park_forever() -> ! {
    loop {
        thread::park();
    }
}

/// 执行被推迟的调度；调用方是任务线程且失去 CPU 时在这里停车
pub(crate) fn request_reschedule() {
    switch_to(false);
}

/// 执行主动让出
pub(crate) fn request_yield() {
    switch_to(true);
}

/// 任务收尾：把 CPU 交出去，调用方线程随后退出
pub(crate) fn finish_task() {
    let wake = state::enter(|k| {
        scheduler::schedule(k);
        current_thread(k)
    });
    if let Some(t) = wake {
        if t.id() != thread::current().id() {
            t.unpark();
        }
    }
    TASK_CONTEXT.with(|c| c.set(None));
}

/// Idle 任务每圈调用一次；返回 false 表示世代已换，该退出了
pub(crate) fn idle_wait() -> bool {
    let Some((id, generation)) = TASK_CONTEXT.with(|c| c.get()) else {
        return false;
    };
    if GENERATION.load(Ordering::SeqCst) != generation {
        return false;
    }
    let is_current = state::enter(|k| k.current_id() == Some(id));
    if is_current {
        thread::yield_now();
    } else {
        thread::park();
    }
    true
}

/// 协作式抢占点
///
/// hosted 端口没有真中断，长循环的任务体周期性调用这里，
/// 给被推迟的抢占一个生效的机会。
pub fn preemption_point() {
    switch_to(false);
}
