//! Atomic views over plain state arrays for the parallel kernels.
//!
//! The engine owns its large arrays as `Vec<u32>` / `Vec<f64>` / `Vec<u8>`
//! and only needs atomic access inside a parallel region. Taking the view
//! through an exclusive borrow guarantees no plain-typed alias exists for
//! the lifetime of the region.

use portable_atomic::AtomicF64;
use std::sync::atomic::{AtomicU8, AtomicU32};

pub(crate) fn u32_slice(xs: &mut [u32]) -> &[AtomicU32] {
    // SAFETY: AtomicU32 has the same in-memory representation as u32, and
    // the exclusive borrow rules out non-atomic access while the view lives.
    unsafe { &*(xs as *mut [u32] as *const [AtomicU32]) }
}

pub(crate) fn u8_slice(xs: &mut [u8]) -> &[AtomicU8] {
    // SAFETY: as above, for u8.
    unsafe { &*(xs as *mut [u8] as *const [AtomicU8]) }
}

pub(crate) fn f64_slice(xs: &mut [f64]) -> &[AtomicF64] {
    // SAFETY: portable-atomic guarantees AtomicF64 matches the f64 layout;
    // the exclusive borrow rules out non-atomic access while the view lives.
    unsafe { &*(xs as *mut [f64] as *const [AtomicF64]) }
}
