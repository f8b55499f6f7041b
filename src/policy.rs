//! The element-move policy: how the tree relocates, clones and drops the
//! elements held in its leaves. The tree itself never touches `T` directly;
//! everything goes through one of these capabilities.

use crate::TreeError;

/// Relocation and destruction of element runs inside leaf buffers.
///
/// The policy is a marker type plugged into [`SeqTreeRaw`](crate::SeqTreeRaw);
/// the tree calls its static functions on raw element pointers. All source
/// elements of a move are left logically dead - only the destination run may
/// be read or dropped afterwards.
pub trait MovePolicy<T> {
    /// Relocate `n` elements from `src` to `dst`, walking from the first
    /// element upward. Correct when `dst <= src` or the ranges are disjoint.
    ///
    /// # Safety
    /// `src[..n]` must be initialized, `dst[..n]` writable.
    unsafe fn move_down(dst: *mut T, src: *mut T, n: usize);

    /// Relocate `n` elements from `src` to `dst`, walking from the last
    /// element downward. Correct when `dst >= src` or the ranges are disjoint.
    ///
    /// # Safety
    /// As for [`move_down`](Self::move_down).
    unsafe fn move_up(dst: *mut T, src: *mut T, n: usize);

    /// Drop `n` elements in place.
    ///
    /// # Safety
    /// `ptr[..n]` must be initialized; the elements are dead afterwards.
    unsafe fn drop_range(ptr: *mut T, n: usize);
}

/// The conservative policy: element-by-element relocation and real drops.
/// Correct for every `T`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SafeMoves;

impl<T> MovePolicy<T> for SafeMoves {
    unsafe fn move_down(mut dst: *mut T, mut src: *mut T, n: usize) {
        let limit = src.add(n);
        while src != limit {
            dst.write(src.read());
            dst = dst.add(1);
            src = src.add(1);
        }
    }

    unsafe fn move_up(dst: *mut T, src: *mut T, n: usize) {
        let mut i = n;
        while i > 0 {
            i -= 1;
            dst.add(i).write(src.add(i).read());
        }
    }

    unsafe fn drop_range(ptr: *mut T, n: usize) {
        std::ptr::drop_in_place(std::ptr::slice_from_raw_parts_mut(ptr, n));
    }
}

/// The memmove policy: runs are relocated with a single `ptr::copy` and
/// drops are a no-op. Only implemented for `T: Copy`, which rules out
/// elements with destructors.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FastMoves;

impl<T: Copy> MovePolicy<T> for FastMoves {
    unsafe fn move_down(dst: *mut T, src: *mut T, n: usize) {
        std::ptr::copy(src, dst, n);
    }

    unsafe fn move_up(dst: *mut T, src: *mut T, n: usize) {
        std::ptr::copy(src, dst, n);
    }

    unsafe fn drop_range(_ptr: *mut T, _n: usize) {}
}

/// Fallible cloning. The hook through which element copies made by the tree
/// (`fill`, `insert_from_slice`, `try_clone`, ...) can fail without tearing
/// the container.
pub trait TryClone: Sized {
    fn try_clone(&self) -> Result<Self, TreeError>;
}

macro_rules! trivial_try_clone {
    ($($t:ty),* $(,)?) => {
        $(impl TryClone for $t {
            #[inline]
            fn try_clone(&self) -> Result<Self, TreeError> {
                Ok(*self)
            }
        })*
    };
}

trivial_try_clone! {
    u8, u16, u32, u64, u128, usize,
    i8, i16, i32, i64, i128, isize,
    f32, f64, bool, char,
}

impl TryClone for String {
    fn try_clone(&self) -> Result<Self, TreeError> {
        Ok(self.clone())
    }
}

impl<T: TryClone> TryClone for Box<T> {
    fn try_clone(&self) -> Result<Self, TreeError> {
        Ok(Box::new((**self).try_clone()?))
    }
}

/// Construct up to `cap` elements into `dst` from the source, returning how
/// many were written. Stops early when the source runs dry. If the source
/// fails, every element already constructed by this call is dropped before
/// the failure is returned.
///
/// # Safety
/// `dst[..cap]` must be writable.
pub(crate) unsafe fn fill_elements<T, P, S>(
    dst: *mut T,
    cap: usize,
    src: &mut S,
) -> Result<usize, TreeError>
where
    P: MovePolicy<T>,
    S: Iterator<Item = Result<T, TreeError>>,
{
    let mut k = 0;
    while k < cap {
        match src.next() {
            Some(Ok(v)) => {
                dst.add(k).write(v);
                k += 1;
            }
            Some(Err(e)) => {
                P::drop_range(dst, k);
                return Err(e);
            }
            None => break,
        }
    }
    Ok(k)
}

/// The source length, if the iterator advertises it exactly.
pub(crate) fn known_len<S: Iterator>(src: &S) -> Option<usize> {
    let (lo, hi) = src.size_hint();
    if hi == Some(lo) {
        Some(lo)
    } else {
        None
    }
}
