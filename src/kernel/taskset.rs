//! 优先级位图集合
//!
//! 每个任务独占一个优先级，优先级就是位图中的位序号，
//! 所以一个 `u32` 就能表达"哪些任务就绪/挂起/睡眠"这类集合，
//! 取最高优先级成员是一条 `leading_zeros` 指令。

/// 优先级，同时也是任务注册表的槽位下标
pub type Priority = usize;

/// 优先级集合
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TaskSet(u32);

impl TaskSet {
    pub const EMPTY: TaskSet = TaskSet(0);
    pub const FULL: TaskSet = TaskSet(u32::MAX);

    pub const fn new() -> Self {
        TaskSet(0)
    }

    #[inline]
    pub fn add(&mut self, priority: Priority) {
        self.0 |= 1 << priority;
    }

    #[inline]
    pub fn remove(&mut self, priority: Priority) {
        self.0 &= !(1 << priority);
    }

    #[inline]
    pub fn contains(&self, priority: Priority) -> bool {
        self.0 & (1 << priority) != 0
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn union(self, other: TaskSet) -> TaskSet {
        TaskSet(self.0 | other.0)
    }

    #[inline]
    pub fn intersect(self, other: TaskSet) -> TaskSet {
        TaskSet(self.0 & other.0)
    }

    #[inline]
    pub fn difference(self, other: TaskSet) -> TaskSet {
        TaskSet(self.0 & !other.0)
    }

    #[inline]
    pub fn count(self) -> usize {
        self.0.count_ones() as usize
    }

    /// 集合中的最高优先级成员
    #[inline]
    pub fn highest(self) -> Option<Priority> {
        if self.0 == 0 {
            None
        } else {
            Some(31 - self.0.leading_zeros() as Priority)
        }
    }

    /// 严格低于 `priority` 的全部优先级
    #[inline]
    pub fn below(priority: Priority) -> TaskSet {
        TaskSet(!(u32::MAX << priority))
    }

    /// 按优先级升序遍历成员
    pub fn iter(self) -> impl Iterator<Item = Priority> {
        Bits(self.0)
    }
}

struct Bits(u32);

impl Iterator for Bits {
    type Item = Priority;

    fn next(&mut self) -> Option<Priority> {
        if self.0 == 0 {
            return None;
        }
        let p = self.0.trailing_zeros() as Priority;
        self.0 &= self.0 - 1;
        Some(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_remove_contains() {
        let mut set = TaskSet::new();
        assert!(set.is_empty());

        set.add(0);
        set.add(17);
        set.add(31);
        assert!(set.contains(0));
        assert!(set.contains(17));
        assert!(set.contains(31));
        assert!(!set.contains(16));

        set.remove(17);
        assert!(!set.contains(17));
        assert_eq!(set.count(), 2);
    }

    #[test]
    fn test_highest() {
        assert_eq!(TaskSet::EMPTY.highest(), None);

        let mut set = TaskSet::new();
        set.add(3);
        assert_eq!(set.highest(), Some(3));
        set.add(29);
        assert_eq!(set.highest(), Some(29));
        set.add(31);
        assert_eq!(set.highest(), Some(31));
        set.remove(31);
        assert_eq!(set.highest(), Some(29));
    }

    #[test]
    fn test_below_mask() {
        // 严格小于，不包含自身
        let below = TaskSet::below(5);
        assert!(below.contains(0));
        assert!(below.contains(4));
        assert!(!below.contains(5));
        assert!(TaskSet::below(0).is_empty());
    }

    #[test]
    fn test_set_operations() {
        let mut a = TaskSet::new();
        a.add(1);
        a.add(2);
        let mut b = TaskSet::new();
        b.add(2);
        b.add(3);

        assert_eq!(a.union(b).count(), 3);
        assert_eq!(a.intersect(b).highest(), Some(2));
        assert!(a.difference(b).contains(1));
        assert!(!a.difference(b).contains(2));
    }

    #[test]
    fn test_iter_ascending() {
        let mut set = TaskSet::new();
        set.add(7);
        set.add(1);
        set.add(30);
        let members: Vec<Priority> = set.iter().collect();
        assert_eq!(members, vec![1, 7, 30]);
    }
}
