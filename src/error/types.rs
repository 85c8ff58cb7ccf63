/// 内核操作的统一返回码
///
/// `TimedOut` 和 `Aborted` 是正常的结束方式而不是故障：
/// 等待超时、或被 `Task::wakeup` 强制唤醒时返回它们，调用方按需匹配。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtosError {
    // 等待结束方式
    TimedOut,
    Aborted,

    // 真正的错误
    Failed,
    OperationNotPermitted,
    PriorityInUse,
    InvalidPriority,
    Overflow,
}

impl core::fmt::Display for RtosError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RtosError::TimedOut => write!(f, "Wait timed out"),
            RtosError::Aborted => write!(f, "Wait aborted by wakeup"),
            RtosError::Failed => write!(f, "Operation failed"),
            RtosError::OperationNotPermitted => write!(f, "Operation not permitted"),
            RtosError::PriorityInUse => write!(f, "Priority already in use"),
            RtosError::InvalidPriority => write!(f, "Invalid priority"),
            RtosError::Overflow => write!(f, "Counter overflow"),
        }
    }
}

pub type Result<T> = core::result::Result<T, RtosError>;
