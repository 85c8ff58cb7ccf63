// 内核编译期配置

/// 最高可用优先级（优先级即位图中的位序号，0..=31）
pub const PRIORITY_HIGHEST: usize = 31;
/// 优先级槽位总数，也是任务注册表的长度
pub const PRIORITY_COUNT: usize = PRIORITY_HIGHEST + 1;
/// Idle 任务固定占用的优先级
pub const PRIORITY_IDLE: usize = 0;

/// 时钟节拍频率（Hz），只用于换算，内核本身只认节拍数
pub const TICKS_PER_SECOND: u32 = 1000;

pub const MAX_EVENTS: usize = 16;
pub const MAX_SEMAPHORES: usize = 16;
pub const MAX_MUTEXES: usize = 16;

/// hosted 端口下每个任务线程的栈大小
pub const DEFAULT_STACK_SIZE: usize = 64 * 1024;

/// smp 构建的核数与时间片任务并行上限
pub const CPU_CORES: usize = 4;
pub const TIMESHARE_PARALLEL_MAX: usize = 1;
