use std::sync::Mutex;

/// 可复用对象池。
///
/// 取出的对象归调用者独占，用完放回即可被下一个调用者复用。
pub struct Pool<T> {
    idle: Mutex<Vec<T>>,
}

impl<T> Default for Pool<T> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Pool<T> {
    #[inline]
    pub const fn new() -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, value: T) {
        self.idle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(value)
    }

    pub fn pop(&self) -> Option<T> {
        self.idle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop()
    }

    /// 取出一个空闲对象，池空时用 `f` 新建。
    pub fn pop_or_else<E>(&self, f: impl FnOnce() -> Result<T, E>) -> Result<T, E> {
        match self.pop() {
            Some(value) => Ok(value),
            None => f(),
        }
    }

    pub fn idle(&self) -> usize {
        self.idle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

#[test]
fn test_reuse() {
    let pool = Pool::new();
    let mut created = 0;
    let mut make = || -> Result<usize, ()> {
        created += 1;
        Ok(created)
    };

    let a = pool.pop_or_else(&mut make).unwrap();
    let b = pool.pop_or_else(&mut make).unwrap();
    assert_eq!((a, b), (1, 2));

    pool.push(a);
    assert_eq!(pool.idle(), 1);
    assert_eq!(pool.pop_or_else(&mut make), Ok(1));
    assert_eq!(pool.idle(), 0);
    assert_eq!(created, 2);
}
