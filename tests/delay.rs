//! 延时精度：唤醒发生在精确的那个节拍上

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use serial_test::serial;
use xenon_rtos::kernel::task::{Task, TaskStatus};
use xenon_rtos::kernel::time;
use xenon_rtos::utils::{kernel_init, kernel_start};

fn wait_for_status(task: Task, status: TaskStatus) {
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while task.status() != status {
        assert!(std::time::Instant::now() < deadline, "status wait timed out");
        thread::yield_now();
    }
}

#[test]
#[serial]
fn delay_wakes_on_exact_tick() {
    kernel_init();
    let (tx, rx) = mpsc::channel::<u32>();

    let task = Task::builder("sleeper")
        .priority(5)
        .spawn(move || {
            time::delay(3).unwrap();
            tx.send(time::now()).unwrap();
        })
        .unwrap();

    kernel_start().unwrap();
    wait_for_status(task, TaskStatus::Sleeping);
    let armed_at = time::now();

    // 前两拍还睡着
    time::tick();
    time::tick();
    assert_eq!(task.status(), TaskStatus::Sleeping);
    assert!(rx.try_recv().is_err());

    // 第三拍准时醒
    time::tick();
    let woke_at = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(woke_at, armed_at.wrapping_add(3));
}

#[test]
#[serial]
fn wakeup_aborts_delay_early() {
    kernel_init();
    let (tx, rx) = mpsc::channel::<xenon_rtos::Result<()>>();

    let task = Task::builder("sleeper")
        .priority(5)
        .spawn(move || {
            tx.send(time::delay(1000)).unwrap();
        })
        .unwrap();

    kernel_start().unwrap();
    wait_for_status(task, TaskStatus::Sleeping);
    task.wakeup().unwrap();

    let r = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(r.unwrap_err(), xenon_rtos::RtosError::Aborted);
}
