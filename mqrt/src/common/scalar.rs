use half::f16;
use std::{mem::size_of_val, slice};

/// 可以按字节在主机和设备之间搬运的纯数据类型。
///
/// # Safety
///
/// 实现者必须没有填充字节、没有指针，并且任意位模式都合法。
pub unsafe trait Scalar: Copy + Send + Sync + 'static {}

macro_rules! scalar {
    ($($ty:ty)*) => { $(unsafe impl Scalar for $ty {})* };
}

scalar!(u8 u16 u32 u64 i8 i16 i32 i64 f16 f32 f64);

// OpenCL 向量类型，如 float4
unsafe impl<T: Scalar, const N: usize> Scalar for [T; N] {}

#[inline]
pub(crate) fn as_bytes<T: Scalar>(data: &[T]) -> &[u8] {
    unsafe { slice::from_raw_parts(data.as_ptr().cast(), size_of_val(data)) }
}

#[inline]
pub(crate) fn as_bytes_mut<T: Scalar>(data: &mut [T]) -> &mut [u8] {
    unsafe { slice::from_raw_parts_mut(data.as_mut_ptr().cast(), size_of_val(data)) }
}
