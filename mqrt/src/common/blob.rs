use std::{
    alloc::{alloc_zeroed, dealloc, Layout},
    ops::{Deref, DerefMut},
    ptr::NonNull,
    slice::{from_raw_parts, from_raw_parts_mut},
};

/// 对齐到 [ALIGN] 的零初始化主机存储，按任意 [Scalar](crate::Scalar) 类型重解释都是对齐的。
pub struct Blob {
    ptr: NonNull<u8>,
    len: usize,
}

pub const ALIGN: usize = 16;

unsafe impl Send for Blob {}
unsafe impl Sync for Blob {}

impl Blob {
    /// 分配 `size` 字节，分配失败时返回 `None`。
    pub fn zeroed(size: usize) -> Option<Self> {
        if size == 0 {
            return Some(Self {
                ptr: NonNull::<u128>::dangling().cast(),
                len: 0,
            });
        }
        let layout = Layout::from_size_align(size, ALIGN).ok()?;
        let ptr = NonNull::new(unsafe { alloc_zeroed(layout) })?;
        Some(Self { ptr, len: size })
    }
}

impl Drop for Blob {
    #[inline]
    fn drop(&mut self) {
        let &mut Blob { ptr, len } = self;
        if len != 0 {
            // 与分配时相同的布局
            unsafe { dealloc(ptr.as_ptr(), Layout::from_size_align_unchecked(len, ALIGN)) }
        }
    }
}

impl Deref for Blob {
    type Target = [u8];
    #[inline]
    fn deref(&self) -> &[u8] {
        unsafe { from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl DerefMut for Blob {
    #[inline]
    fn deref_mut(&mut self) -> &mut [u8] {
        unsafe { from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

#[test]
fn test_zeroed_and_aligned() {
    let mut blob = Blob::zeroed(100).unwrap();
    assert_eq!(blob.len(), 100);
    assert!(blob.iter().all(|&b| b == 0));
    assert_eq!(blob.as_ptr() as usize % ALIGN, 0);
    blob[99] = 7;
    assert_eq!(blob[99], 7);

    let empty = Blob::zeroed(0).unwrap();
    assert!(empty.is_empty());

    assert!(Blob::zeroed(usize::MAX).is_none());
}
