//! 时间片轮转：两个分时任务在节拍驱动下轮流执行

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use serial_test::serial;
use xenon_rtos::hal::hosted::preemption_point;
use xenon_rtos::kernel::task::Task;
use xenon_rtos::kernel::time;
use xenon_rtos::utils::{kernel_init, kernel_start};

fn spawn_ts_counter(name: &'static str, priority: usize, slice: u32) -> Arc<AtomicUsize> {
    let counter = Arc::new(AtomicUsize::new(0));
    let c = counter.clone();
    Task::builder(name)
        .priority(priority)
        .time_slice(slice)
        .spawn(move || loop {
            c.fetch_add(1, Ordering::Relaxed);
            preemption_point();
        })
        .unwrap();
    counter
}

#[test]
#[serial]
fn both_timeshared_tasks_get_cpu_despite_priority_gap() {
    kernel_init();
    let low = spawn_ts_counter("ts_low", 3, 2);
    let high = spawn_ts_counter("ts_high", 8, 2);
    kernel_start().unwrap();

    // 不轮转的话低优先级永远拿不到 CPU
    let deadline = Instant::now() + Duration::from_secs(10);
    while low.load(Ordering::Relaxed) == 0 || high.load(Ordering::Relaxed) == 0 {
        assert!(Instant::now() < deadline, "rotation never happened");
        time::tick();
        thread::sleep(Duration::from_millis(1));
    }

    // 再轮几圈，两边都持续推进
    let (l0, h0) = (low.load(Ordering::Relaxed), high.load(Ordering::Relaxed));
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        time::tick();
        thread::sleep(Duration::from_millis(1));
        if low.load(Ordering::Relaxed) > l0 && high.load(Ordering::Relaxed) > h0 {
            break;
        }
        assert!(Instant::now() < deadline, "rotation stalled");
    }
}
