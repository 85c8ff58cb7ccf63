//! 信号量跨任务行为：阻塞、直接交接、抢占时机

use std::sync::mpsc;
use std::time::Duration;

use serial_test::serial;
use xenon_rtos::FOREVER;
use xenon_rtos::kernel::task::Task;
use xenon_rtos::sync::Semaphore;
use xenon_rtos::utils::{kernel_init, kernel_start};

#[test]
#[serial]
fn waiter_blocks_until_post_and_preempts_poster() {
    kernel_init();
    let sem = Semaphore::new(0).unwrap();
    let (tx, rx) = mpsc::channel::<&'static str>();

    // 高优先级先跑，在空信号量上睡下
    let tx_w = tx.clone();
    Task::builder("waiter")
        .priority(6)
        .spawn(move || {
            sem.get(FOREVER).unwrap();
            tx_w.send("got").unwrap();
        })
        .unwrap();

    // 低优先级补位，post 的瞬间被高优先级抢回去
    Task::builder("poster")
        .priority(3)
        .spawn(move || {
            tx.send("posted").unwrap();
            sem.post().unwrap();
            tx.send("poster resumed").unwrap();
        })
        .unwrap();

    kernel_start().unwrap();

    let timeout = Duration::from_secs(5);
    assert_eq!(rx.recv_timeout(timeout).unwrap(), "posted");
    // post 直接交接给等待者并立即抢占
    assert_eq!(rx.recv_timeout(timeout).unwrap(), "got");
    assert_eq!(rx.recv_timeout(timeout).unwrap(), "poster resumed");
    // 直接交接不动计数
    assert_eq!(sem.peek().unwrap(), 0);
}

#[test]
#[serial]
fn initial_count_admits_without_blocking() {
    kernel_init();
    let sem = Semaphore::new(2).unwrap();
    let (tx, rx) = mpsc::channel::<u32>();

    Task::builder("taker")
        .priority(5)
        .spawn(move || {
            sem.get(FOREVER).unwrap();
            sem.get(FOREVER).unwrap();
            tx.send(sem.peek().unwrap()).unwrap();
        })
        .unwrap();

    kernel_start().unwrap();
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 0);
}
