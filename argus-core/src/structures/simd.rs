//! Runtime-dispatched SIMD kernels for boolean columns
//!
//! Predicate evaluation produces byte-per-element boolean columns; the hot
//! loops over them (conjunction, short-circuit probes, term membership,
//! bitset packing) are dispatched once at process start to the widest
//! instruction set the CPU supports:
//! - **x86-64**: AVX-512 (F+DQ+BW) → AVX2 → SSE4.2 → SSE2 → scalar
//! - **aarch64**: NEON → scalar
//!
//! The selected table is immutable after the first call to [`kernels`];
//! there is no per-call feature branching.
//!
//! Byte contract: inputs are byte arrays where any nonzero byte is "true";
//! outputs are always `0x00` or `0x01`. `invert_bool` is the only in-place
//! kernel; `and_bool`/`or_bool` write into their left operand, and the right
//! operand must not alias it.

use std::sync::OnceLock;

/// Instruction set selected at dispatch time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimdLevel {
    Avx512,
    Avx2,
    Sse42,
    Sse2,
    Neon,
    Ref,
}

/// The dispatch table. One instance lives in a `OnceLock`; every entry is a
/// plain function pointer chosen for [`SimdLevel`] at initialization.
pub struct BoolKernels {
    pub level: SimdLevel,
    pub all_true: fn(&[bool]) -> bool,
    pub all_false: fn(&[bool]) -> bool,
    pub invert_bool: fn(&mut [bool]),
    pub and_bool: fn(&mut [bool], &[bool]),
    pub or_bool: fn(&mut [bool], &[bool]),
    pub get_bitset_block: fn(&[bool]) -> u64,
    pub find_term_i8: fn(&[i8], i8) -> bool,
    pub find_term_i16: fn(&[i16], i16) -> bool,
    pub find_term_i32: fn(&[i32], i32) -> bool,
    pub find_term_i64: fn(&[i64], i64) -> bool,
    pub find_term_f32: fn(&[f32], f32) -> bool,
    pub find_term_f64: fn(&[f64], f64) -> bool,
}

static KERNELS: OnceLock<BoolKernels> = OnceLock::new();

/// The process-wide kernel table, built on first use.
pub fn kernels() -> &'static BoolKernels {
    KERNELS.get_or_init(|| {
        let table = build_kernels();
        log::info!("[simd] dispatch level: {:?}", table.level);
        table
    })
}

// ── Facade ────────────────────────────────────────────────────────────────

/// True iff every byte is nonzero. Empty input is all-true.
#[inline]
pub fn all_true(data: &[bool]) -> bool {
    (kernels().all_true)(data)
}

/// True iff every byte is zero. Empty input is all-false.
#[inline]
pub fn all_false(data: &[bool]) -> bool {
    (kernels().all_false)(data)
}

/// In-place boolean negation, canonicalizing to 0x00/0x01.
#[inline]
pub fn invert_bool(data: &mut [bool]) {
    (kernels().invert_bool)(data)
}

/// `lhs[i] = lhs[i] && rhs[i]`. Slices must have equal length.
#[inline]
pub fn and_bool(lhs: &mut [bool], rhs: &[bool]) {
    debug_assert_eq!(lhs.len(), rhs.len());
    (kernels().and_bool)(lhs, rhs)
}

/// `lhs[i] = lhs[i] || rhs[i]`. Slices must have equal length.
#[inline]
pub fn or_bool(lhs: &mut [bool], rhs: &[bool]) {
    debug_assert_eq!(lhs.len(), rhs.len());
    (kernels().or_bool)(lhs, rhs)
}

/// Pack up to 64 bools into one word, LSB-first; high bits of short inputs
/// are zero.
#[inline]
pub fn get_bitset_block(block: &[bool]) -> u64 {
    debug_assert!(block.len() <= 64);
    (kernels().get_bitset_block)(block)
}

/// Scalar types with a dispatched membership kernel.
pub trait TermScalar: Copy + PartialEq {
    fn find_term(haystack: &[Self], needle: Self) -> bool;
}

macro_rules! impl_term_scalar {
    ($($ty:ty => $field:ident),* $(,)?) => {
        $(impl TermScalar for $ty {
            #[inline]
            fn find_term(haystack: &[Self], needle: Self) -> bool {
                (kernels().$field)(haystack, needle)
            }
        })*
    };
}

impl_term_scalar!(
    i8 => find_term_i8,
    i16 => find_term_i16,
    i32 => find_term_i32,
    i64 => find_term_i64,
    f32 => find_term_f32,
    f64 => find_term_f64,
);

/// Linear membership probe over a small haystack (typically a term set of
/// at most 16 values).
#[inline]
pub fn find_term<T: TermScalar>(haystack: &[T], needle: T) -> bool {
    T::find_term(haystack, needle)
}

// ── Byte views ────────────────────────────────────────────────────────────

#[inline]
fn as_bytes(data: &[bool]) -> &[u8] {
    // bool is a single byte with value 0 or 1
    unsafe { std::slice::from_raw_parts(data.as_ptr() as *const u8, data.len()) }
}

#[inline]
fn as_bytes_mut(data: &mut [bool]) -> &mut [u8] {
    // kernels only ever write 0x00/0x01, preserving bool validity
    unsafe { std::slice::from_raw_parts_mut(data.as_mut_ptr() as *mut u8, data.len()) }
}

// ── Selection ─────────────────────────────────────────────────────────────

#[cfg(target_arch = "x86_64")]
fn detect_level() -> SimdLevel {
    if is_x86_feature_detected!("avx512f")
        && is_x86_feature_detected!("avx512dq")
        && is_x86_feature_detected!("avx512bw")
    {
        return SimdLevel::Avx512;
    }
    if is_x86_feature_detected!("avx2") {
        return SimdLevel::Avx2;
    }
    if is_x86_feature_detected!("sse4.2") {
        return SimdLevel::Sse42;
    }
    if is_x86_feature_detected!("sse2") {
        return SimdLevel::Sse2;
    }
    SimdLevel::Ref
}

#[cfg(target_arch = "aarch64")]
fn detect_level() -> SimdLevel {
    // NEON is baseline on aarch64
    SimdLevel::Neon
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
fn detect_level() -> SimdLevel {
    SimdLevel::Ref
}

fn build_kernels() -> BoolKernels {
    let level = detect_level();
    #[allow(unused_mut)]
    let mut table = BoolKernels {
        level,
        all_true: reference::all_true,
        all_false: reference::all_false,
        invert_bool: reference::invert_bool,
        and_bool: reference::and_bool,
        or_bool: reference::or_bool,
        get_bitset_block: reference::get_bitset_block,
        find_term_i8: reference::find_term::<i8>,
        find_term_i16: reference::find_term::<i16>,
        find_term_i32: reference::find_term::<i32>,
        find_term_i64: reference::find_term::<i64>,
        find_term_f32: reference::find_term::<f32>,
        find_term_f64: reference::find_term::<f64>,
    };

    #[cfg(target_arch = "x86_64")]
    {
        use SimdLevel::*;
        if matches!(level, Avx512 | Avx2 | Sse42 | Sse2) {
            // The short-probe and packing kernels measure fastest on SSE2
            // at every level, so they stay pinned there.
            table.all_true = x86::all_true_sse2;
            table.all_false = x86::all_false_sse2;
            table.invert_bool = x86::invert_bool_sse2;
            table.get_bitset_block = x86::get_bitset_block_sse2;
            table.and_bool = x86::and_bool_sse2;
            table.or_bool = x86::or_bool_sse2;
            table.find_term_i8 = x86::find_term_i8_sse2;
            table.find_term_i16 = x86::find_term_i16_sse2;
            table.find_term_i32 = x86::find_term_i32_sse2;
            table.find_term_f32 = x86::find_term_f32_sse2;
            table.find_term_f64 = x86::find_term_f64_sse2;
            // 64-bit integer equality needs SSE4.1; stays scalar below Sse42
        }
        if matches!(level, Avx512 | Avx2 | Sse42) {
            table.find_term_i64 = x86::find_term_i64_sse42;
        }
        if matches!(level, Avx512 | Avx2) {
            table.and_bool = x86::and_bool_avx2;
            table.or_bool = x86::or_bool_avx2;
            table.find_term_i8 = x86::find_term_i8_avx2;
            table.find_term_i16 = x86::find_term_i16_avx2;
            table.find_term_i32 = x86::find_term_i32_avx2;
            table.find_term_i64 = x86::find_term_i64_avx2;
            table.find_term_f32 = x86::find_term_f32_avx2;
            table.find_term_f64 = x86::find_term_f64_avx2;
        }
        if matches!(level, Avx512) {
            table.and_bool = x86::and_bool_avx512;
            table.or_bool = x86::or_bool_avx512;
            table.find_term_i8 = x86::find_term_i8_avx512;
            table.find_term_i16 = x86::find_term_i16_avx512;
            table.find_term_i32 = x86::find_term_i32_avx512;
            table.find_term_i64 = x86::find_term_i64_avx512;
            table.find_term_f32 = x86::find_term_f32_avx512;
            table.find_term_f64 = x86::find_term_f64_avx512;
        }
    }

    #[cfg(target_arch = "aarch64")]
    {
        if matches!(level, SimdLevel::Neon) {
            table.all_true = neon_shim::all_true;
            table.all_false = neon_shim::all_false;
            table.invert_bool = neon_shim::invert_bool;
            table.and_bool = neon_shim::and_bool;
            table.or_bool = neon_shim::or_bool;
            // find_term / get_bitset_block have no NEON variant yet
        }
    }

    table
}

// ── Scalar reference kernels ──────────────────────────────────────────────

pub(crate) mod reference {
    /// Reference `all_true`: fails on the first zero byte.
    pub fn all_true(data: &[bool]) -> bool {
        data.iter().all(|&b| b)
    }

    /// Reference `all_false`: fails on the first nonzero byte.
    pub fn all_false(data: &[bool]) -> bool {
        !data.iter().any(|&b| b)
    }

    pub fn invert_bool(data: &mut [bool]) {
        for b in data.iter_mut() {
            *b = !*b;
        }
    }

    pub fn and_bool(lhs: &mut [bool], rhs: &[bool]) {
        for (d, s) in lhs.iter_mut().zip(rhs) {
            *d = *d && *s;
        }
    }

    pub fn or_bool(lhs: &mut [bool], rhs: &[bool]) {
        for (d, s) in lhs.iter_mut().zip(rhs) {
            *d = *d || *s;
        }
    }

    pub fn get_bitset_block(block: &[bool]) -> u64 {
        let mut word = 0u64;
        for (i, &b) in block.iter().enumerate() {
            word |= (b as u64) << i;
        }
        word
    }

    pub fn find_term<T: Copy + PartialEq>(haystack: &[T], needle: T) -> bool {
        haystack.iter().any(|&v| v == needle)
    }
}

// ── x86-64 kernels ────────────────────────────────────────────────────────

#[cfg(target_arch = "x86_64")]
#[allow(unsafe_op_in_unsafe_fn)]
mod x86 {
    use std::arch::x86_64::*;

    use super::{as_bytes, as_bytes_mut};

    // ── SSE2 boolean kernels ──────────────────────────────────────────────

    #[target_feature(enable = "sse2")]
    unsafe fn all_true_impl(data: &[u8]) -> bool {
        let n = data.len();
        let p = data.as_ptr();
        let zero = _mm_setzero_si128();
        let mut i = 0;
        while i + 16 <= n {
            let v = _mm_loadu_si128(p.add(i) as *const _);
            // any zero byte breaks all-true
            if _mm_movemask_epi8(_mm_cmpeq_epi8(v, zero)) != 0 {
                return false;
            }
            i += 16;
        }
        data[i..].iter().all(|&b| b != 0)
    }

    #[target_feature(enable = "sse2")]
    unsafe fn all_false_impl(data: &[u8]) -> bool {
        let n = data.len();
        let p = data.as_ptr();
        let zero = _mm_setzero_si128();
        let mut i = 0;
        while i + 16 <= n {
            let v = _mm_loadu_si128(p.add(i) as *const _);
            if _mm_movemask_epi8(_mm_cmpeq_epi8(v, zero)) != 0xFFFF {
                return false;
            }
            i += 16;
        }
        !data[i..].iter().any(|&b| b != 0)
    }

    #[target_feature(enable = "sse2")]
    unsafe fn invert_bool_impl(data: &mut [u8]) {
        let n = data.len();
        let p = data.as_mut_ptr();
        let zero = _mm_setzero_si128();
        let one = _mm_set1_epi8(1);
        let mut i = 0;
        while i + 16 <= n {
            let v = _mm_loadu_si128(p.add(i) as *const _);
            let out = _mm_and_si128(_mm_cmpeq_epi8(v, zero), one);
            _mm_storeu_si128(p.add(i) as *mut _, out);
            i += 16;
        }
        for b in &mut data[i..] {
            *b = (*b == 0) as u8;
        }
    }

    #[target_feature(enable = "sse2")]
    unsafe fn and_bool_impl(lhs: &mut [u8], rhs: &[u8]) {
        let n = lhs.len().min(rhs.len());
        let lp = lhs.as_mut_ptr();
        let rp = rhs.as_ptr();
        let zero = _mm_setzero_si128();
        let one = _mm_set1_epi8(1);
        let mut i = 0;
        while i + 16 <= n {
            let a = _mm_loadu_si128(lp.add(i) as *const _);
            let b = _mm_loadu_si128(rp.add(i) as *const _);
            let dead = _mm_or_si128(_mm_cmpeq_epi8(a, zero), _mm_cmpeq_epi8(b, zero));
            _mm_storeu_si128(lp.add(i) as *mut _, _mm_andnot_si128(dead, one));
            i += 16;
        }
        while i < n {
            lhs[i] = (lhs[i] != 0 && rhs[i] != 0) as u8;
            i += 1;
        }
    }

    #[target_feature(enable = "sse2")]
    unsafe fn or_bool_impl(lhs: &mut [u8], rhs: &[u8]) {
        let n = lhs.len().min(rhs.len());
        let lp = lhs.as_mut_ptr();
        let rp = rhs.as_ptr();
        let zero = _mm_setzero_si128();
        let one = _mm_set1_epi8(1);
        let mut i = 0;
        while i + 16 <= n {
            let a = _mm_loadu_si128(lp.add(i) as *const _);
            let b = _mm_loadu_si128(rp.add(i) as *const _);
            let dead = _mm_and_si128(_mm_cmpeq_epi8(a, zero), _mm_cmpeq_epi8(b, zero));
            _mm_storeu_si128(lp.add(i) as *mut _, _mm_andnot_si128(dead, one));
            i += 16;
        }
        while i < n {
            lhs[i] = (lhs[i] != 0 || rhs[i] != 0) as u8;
            i += 1;
        }
    }

    #[target_feature(enable = "sse2")]
    unsafe fn get_bitset_block_impl(data: &[u8]) -> u64 {
        if data.len() < 64 {
            let mut word = 0u64;
            for (i, &b) in data.iter().enumerate() {
                word |= ((b != 0) as u64) << i;
            }
            return word;
        }
        let p = data.as_ptr();
        let zero = _mm_setzero_si128();
        let mut word = 0u64;
        for lane in 0..4 {
            let v = _mm_loadu_si128(p.add(lane * 16) as *const _);
            let m = _mm_movemask_epi8(_mm_cmpeq_epi8(v, zero)) as u32;
            word |= ((!m & 0xFFFF) as u64) << (lane * 16);
        }
        word
    }

    // Safe shims: only installed in the table after feature detection.

    pub fn all_true_sse2(data: &[bool]) -> bool {
        unsafe { all_true_impl(as_bytes(data)) }
    }

    pub fn all_false_sse2(data: &[bool]) -> bool {
        unsafe { all_false_impl(as_bytes(data)) }
    }

    pub fn invert_bool_sse2(data: &mut [bool]) {
        unsafe { invert_bool_impl(as_bytes_mut(data)) }
    }

    pub fn and_bool_sse2(lhs: &mut [bool], rhs: &[bool]) {
        unsafe { and_bool_impl(as_bytes_mut(lhs), as_bytes(rhs)) }
    }

    pub fn or_bool_sse2(lhs: &mut [bool], rhs: &[bool]) {
        unsafe { or_bool_impl(as_bytes_mut(lhs), as_bytes(rhs)) }
    }

    pub fn get_bitset_block_sse2(block: &[bool]) -> u64 {
        unsafe { get_bitset_block_impl(as_bytes(block)) }
    }

    // ── AVX2 boolean kernels ──────────────────────────────────────────────

    #[target_feature(enable = "avx2")]
    unsafe fn and_bool_avx2_impl(lhs: &mut [u8], rhs: &[u8]) {
        let n = lhs.len().min(rhs.len());
        let lp = lhs.as_mut_ptr();
        let rp = rhs.as_ptr();
        let zero = _mm256_setzero_si256();
        let one = _mm256_set1_epi8(1);
        let mut i = 0;
        while i + 32 <= n {
            let a = _mm256_loadu_si256(lp.add(i) as *const _);
            let b = _mm256_loadu_si256(rp.add(i) as *const _);
            let dead = _mm256_or_si256(_mm256_cmpeq_epi8(a, zero), _mm256_cmpeq_epi8(b, zero));
            _mm256_storeu_si256(lp.add(i) as *mut _, _mm256_andnot_si256(dead, one));
            i += 32;
        }
        while i < n {
            lhs[i] = (lhs[i] != 0 && rhs[i] != 0) as u8;
            i += 1;
        }
    }

    #[target_feature(enable = "avx2")]
    unsafe fn or_bool_avx2_impl(lhs: &mut [u8], rhs: &[u8]) {
        let n = lhs.len().min(rhs.len());
        let lp = lhs.as_mut_ptr();
        let rp = rhs.as_ptr();
        let zero = _mm256_setzero_si256();
        let one = _mm256_set1_epi8(1);
        let mut i = 0;
        while i + 32 <= n {
            let a = _mm256_loadu_si256(lp.add(i) as *const _);
            let b = _mm256_loadu_si256(rp.add(i) as *const _);
            let dead = _mm256_and_si256(_mm256_cmpeq_epi8(a, zero), _mm256_cmpeq_epi8(b, zero));
            _mm256_storeu_si256(lp.add(i) as *mut _, _mm256_andnot_si256(dead, one));
            i += 32;
        }
        while i < n {
            lhs[i] = (lhs[i] != 0 || rhs[i] != 0) as u8;
            i += 1;
        }
    }

    pub fn and_bool_avx2(lhs: &mut [bool], rhs: &[bool]) {
        unsafe { and_bool_avx2_impl(as_bytes_mut(lhs), as_bytes(rhs)) }
    }

    pub fn or_bool_avx2(lhs: &mut [bool], rhs: &[bool]) {
        unsafe { or_bool_avx2_impl(as_bytes_mut(lhs), as_bytes(rhs)) }
    }

    // ── AVX-512 boolean kernels ───────────────────────────────────────────

    #[target_feature(enable = "avx512f", enable = "avx512bw")]
    unsafe fn and_bool_avx512_impl(lhs: &mut [u8], rhs: &[u8]) {
        let n = lhs.len().min(rhs.len());
        let lp = lhs.as_mut_ptr();
        let rp = rhs.as_ptr();
        let zero = _mm512_setzero_si512();
        let mut i = 0;
        while i + 64 <= n {
            let a = _mm512_loadu_si512(lp.add(i) as *const _);
            let b = _mm512_loadu_si512(rp.add(i) as *const _);
            let k = _mm512_cmpneq_epi8_mask(a, zero) & _mm512_cmpneq_epi8_mask(b, zero);
            _mm512_storeu_si512(lp.add(i) as *mut _, _mm512_maskz_set1_epi8(k, 1));
            i += 64;
        }
        while i < n {
            lhs[i] = (lhs[i] != 0 && rhs[i] != 0) as u8;
            i += 1;
        }
    }

    #[target_feature(enable = "avx512f", enable = "avx512bw")]
    unsafe fn or_bool_avx512_impl(lhs: &mut [u8], rhs: &[u8]) {
        let n = lhs.len().min(rhs.len());
        let lp = lhs.as_mut_ptr();
        let rp = rhs.as_ptr();
        let zero = _mm512_setzero_si512();
        let mut i = 0;
        while i + 64 <= n {
            let a = _mm512_loadu_si512(lp.add(i) as *const _);
            let b = _mm512_loadu_si512(rp.add(i) as *const _);
            let k = _mm512_cmpneq_epi8_mask(a, zero) | _mm512_cmpneq_epi8_mask(b, zero);
            _mm512_storeu_si512(lp.add(i) as *mut _, _mm512_maskz_set1_epi8(k, 1));
            i += 64;
        }
        while i < n {
            lhs[i] = (lhs[i] != 0 || rhs[i] != 0) as u8;
            i += 1;
        }
    }

    pub fn and_bool_avx512(lhs: &mut [bool], rhs: &[bool]) {
        unsafe { and_bool_avx512_impl(as_bytes_mut(lhs), as_bytes(rhs)) }
    }

    pub fn or_bool_avx512(lhs: &mut [bool], rhs: &[bool]) {
        unsafe { or_bool_avx512_impl(as_bytes_mut(lhs), as_bytes(rhs)) }
    }

    // ── find_term ─────────────────────────────────────────────────────────
    //
    // The haystack is a term set (at most a few dozen values), the needle a
    // row value; one match anywhere decides membership.

    macro_rules! find_term_sse2_int {
        ($name:ident, $shim:ident, $ty:ty, $lanes:expr, $set1:ident, $cmpeq:ident) => {
            #[target_feature(enable = "sse2")]
            unsafe fn $name(haystack: &[$ty], needle: $ty) -> bool {
                let n = haystack.len();
                let p = haystack.as_ptr();
                let target = $set1(needle as _);
                let mut i = 0;
                while i + $lanes <= n {
                    let v = _mm_loadu_si128(p.add(i) as *const _);
                    if _mm_movemask_epi8($cmpeq(v, target)) != 0 {
                        return true;
                    }
                    i += $lanes;
                }
                haystack[i..].iter().any(|&v| v == needle)
            }

            pub fn $shim(haystack: &[$ty], needle: $ty) -> bool {
                unsafe { $name(haystack, needle) }
            }
        };
    }

    find_term_sse2_int!(find_term_i8_sse2_impl, find_term_i8_sse2, i8, 16, _mm_set1_epi8, _mm_cmpeq_epi8);
    find_term_sse2_int!(find_term_i16_sse2_impl, find_term_i16_sse2, i16, 8, _mm_set1_epi16, _mm_cmpeq_epi16);
    find_term_sse2_int!(find_term_i32_sse2_impl, find_term_i32_sse2, i32, 4, _mm_set1_epi32, _mm_cmpeq_epi32);

    #[target_feature(enable = "sse2")]
    unsafe fn find_term_f32_sse2_impl(haystack: &[f32], needle: f32) -> bool {
        let n = haystack.len();
        let p = haystack.as_ptr();
        let target = _mm_set1_ps(needle);
        let mut i = 0;
        while i + 4 <= n {
            let v = _mm_loadu_ps(p.add(i));
            if _mm_movemask_ps(_mm_cmpeq_ps(v, target)) != 0 {
                return true;
            }
            i += 4;
        }
        haystack[i..].iter().any(|&v| v == needle)
    }

    pub fn find_term_f32_sse2(haystack: &[f32], needle: f32) -> bool {
        unsafe { find_term_f32_sse2_impl(haystack, needle) }
    }

    #[target_feature(enable = "sse2")]
    unsafe fn find_term_f64_sse2_impl(haystack: &[f64], needle: f64) -> bool {
        let n = haystack.len();
        let p = haystack.as_ptr();
        let target = _mm_set1_pd(needle);
        let mut i = 0;
        while i + 2 <= n {
            let v = _mm_loadu_pd(p.add(i));
            if _mm_movemask_pd(_mm_cmpeq_pd(v, target)) != 0 {
                return true;
            }
            i += 2;
        }
        haystack[i..].iter().any(|&v| v == needle)
    }

    pub fn find_term_f64_sse2(haystack: &[f64], needle: f64) -> bool {
        unsafe { find_term_f64_sse2_impl(haystack, needle) }
    }

    #[target_feature(enable = "sse4.1")]
    unsafe fn find_term_i64_sse42_impl(haystack: &[i64], needle: i64) -> bool {
        let n = haystack.len();
        let p = haystack.as_ptr();
        let target = _mm_set1_epi64x(needle);
        let mut i = 0;
        while i + 2 <= n {
            let v = _mm_loadu_si128(p.add(i) as *const _);
            if _mm_movemask_epi8(_mm_cmpeq_epi64(v, target)) != 0 {
                return true;
            }
            i += 2;
        }
        haystack[i..].iter().any(|&v| v == needle)
    }

    pub fn find_term_i64_sse42(haystack: &[i64], needle: i64) -> bool {
        unsafe { find_term_i64_sse42_impl(haystack, needle) }
    }

    macro_rules! find_term_avx2_int {
        ($name:ident, $shim:ident, $ty:ty, $lanes:expr, $set1:ident, $cmpeq:ident) => {
            #[target_feature(enable = "avx2")]
            unsafe fn $name(haystack: &[$ty], needle: $ty) -> bool {
                let n = haystack.len();
                let p = haystack.as_ptr();
                let target = $set1(needle as _);
                let mut i = 0;
                while i + $lanes <= n {
                    let v = _mm256_loadu_si256(p.add(i) as *const _);
                    if _mm256_movemask_epi8($cmpeq(v, target)) != 0 {
                        return true;
                    }
                    i += $lanes;
                }
                haystack[i..].iter().any(|&v| v == needle)
            }

            pub fn $shim(haystack: &[$ty], needle: $ty) -> bool {
                unsafe { $name(haystack, needle) }
            }
        };
    }

    find_term_avx2_int!(find_term_i8_avx2_impl, find_term_i8_avx2, i8, 32, _mm256_set1_epi8, _mm256_cmpeq_epi8);
    find_term_avx2_int!(find_term_i16_avx2_impl, find_term_i16_avx2, i16, 16, _mm256_set1_epi16, _mm256_cmpeq_epi16);
    find_term_avx2_int!(find_term_i32_avx2_impl, find_term_i32_avx2, i32, 8, _mm256_set1_epi32, _mm256_cmpeq_epi32);
    find_term_avx2_int!(find_term_i64_avx2_impl, find_term_i64_avx2, i64, 4, _mm256_set1_epi64x, _mm256_cmpeq_epi64);

    #[target_feature(enable = "avx")]
    unsafe fn find_term_f32_avx2_impl(haystack: &[f32], needle: f32) -> bool {
        let n = haystack.len();
        let p = haystack.as_ptr();
        let target = _mm256_set1_ps(needle);
        let mut i = 0;
        while i + 8 <= n {
            let v = _mm256_loadu_ps(p.add(i));
            if _mm256_movemask_ps(_mm256_cmp_ps::<_CMP_EQ_OQ>(v, target)) != 0 {
                return true;
            }
            i += 8;
        }
        haystack[i..].iter().any(|&v| v == needle)
    }

    pub fn find_term_f32_avx2(haystack: &[f32], needle: f32) -> bool {
        unsafe { find_term_f32_avx2_impl(haystack, needle) }
    }

    #[target_feature(enable = "avx")]
    unsafe fn find_term_f64_avx2_impl(haystack: &[f64], needle: f64) -> bool {
        let n = haystack.len();
        let p = haystack.as_ptr();
        let target = _mm256_set1_pd(needle);
        let mut i = 0;
        while i + 4 <= n {
            let v = _mm256_loadu_pd(p.add(i));
            if _mm256_movemask_pd(_mm256_cmp_pd::<_CMP_EQ_OQ>(v, target)) != 0 {
                return true;
            }
            i += 4;
        }
        haystack[i..].iter().any(|&v| v == needle)
    }

    pub fn find_term_f64_avx2(haystack: &[f64], needle: f64) -> bool {
        unsafe { find_term_f64_avx2_impl(haystack, needle) }
    }

    macro_rules! find_term_avx512_int {
        ($name:ident, $shim:ident, $ty:ty, $lanes:expr, $set1:ident, $cmpeq_mask:ident) => {
            #[target_feature(enable = "avx512f", enable = "avx512bw")]
            unsafe fn $name(haystack: &[$ty], needle: $ty) -> bool {
                let n = haystack.len();
                let p = haystack.as_ptr();
                let target = $set1(needle as _);
                let mut i = 0;
                while i + $lanes <= n {
                    let v = _mm512_loadu_si512(p.add(i) as *const _);
                    if $cmpeq_mask(v, target) != 0 {
                        return true;
                    }
                    i += $lanes;
                }
                haystack[i..].iter().any(|&v| v == needle)
            }

            pub fn $shim(haystack: &[$ty], needle: $ty) -> bool {
                unsafe { $name(haystack, needle) }
            }
        };
    }

    find_term_avx512_int!(find_term_i8_avx512_impl, find_term_i8_avx512, i8, 64, _mm512_set1_epi8, _mm512_cmpeq_epi8_mask);
    find_term_avx512_int!(find_term_i16_avx512_impl, find_term_i16_avx512, i16, 32, _mm512_set1_epi16, _mm512_cmpeq_epi16_mask);
    find_term_avx512_int!(find_term_i32_avx512_impl, find_term_i32_avx512, i32, 16, _mm512_set1_epi32, _mm512_cmpeq_epi32_mask);
    find_term_avx512_int!(find_term_i64_avx512_impl, find_term_i64_avx512, i64, 8, _mm512_set1_epi64, _mm512_cmpeq_epi64_mask);

    #[target_feature(enable = "avx512f")]
    unsafe fn find_term_f32_avx512_impl(haystack: &[f32], needle: f32) -> bool {
        let n = haystack.len();
        let p = haystack.as_ptr();
        let target = _mm512_set1_ps(needle);
        let mut i = 0;
        while i + 16 <= n {
            let v = _mm512_loadu_ps(p.add(i));
            if _mm512_cmp_ps_mask::<_CMP_EQ_OQ>(v, target) != 0 {
                return true;
            }
            i += 16;
        }
        haystack[i..].iter().any(|&v| v == needle)
    }

    pub fn find_term_f32_avx512(haystack: &[f32], needle: f32) -> bool {
        unsafe { find_term_f32_avx512_impl(haystack, needle) }
    }

    #[target_feature(enable = "avx512f")]
    unsafe fn find_term_f64_avx512_impl(haystack: &[f64], needle: f64) -> bool {
        let n = haystack.len();
        let p = haystack.as_ptr();
        let target = _mm512_set1_pd(needle);
        let mut i = 0;
        while i + 8 <= n {
            let v = _mm512_loadu_pd(p.add(i));
            if _mm512_cmp_pd_mask::<_CMP_EQ_OQ>(v, target) != 0 {
                return true;
            }
            i += 8;
        }
        haystack[i..].iter().any(|&v| v == needle)
    }

    pub fn find_term_f64_avx512(haystack: &[f64], needle: f64) -> bool {
        unsafe { find_term_f64_avx512_impl(haystack, needle) }
    }
}

// ── NEON kernels ──────────────────────────────────────────────────────────

#[cfg(target_arch = "aarch64")]
#[allow(unsafe_op_in_unsafe_fn)]
mod neon_shim {
    use std::arch::aarch64::*;

    use super::{as_bytes, as_bytes_mut};

    #[target_feature(enable = "neon")]
    unsafe fn all_true_impl(data: &[u8]) -> bool {
        let n = data.len();
        let p = data.as_ptr();
        let mut i = 0;
        while i + 16 <= n {
            let v = vld1q_u8(p.add(i));
            // vceqzq produces 0xFF where the byte is zero
            if vmaxvq_u8(vceqzq_u8(v)) != 0 {
                return false;
            }
            i += 16;
        }
        data[i..].iter().all(|&b| b != 0)
    }

    #[target_feature(enable = "neon")]
    unsafe fn all_false_impl(data: &[u8]) -> bool {
        let n = data.len();
        let p = data.as_ptr();
        let mut i = 0;
        while i + 16 <= n {
            if vmaxvq_u8(vld1q_u8(p.add(i))) != 0 {
                return false;
            }
            i += 16;
        }
        !data[i..].iter().any(|&b| b != 0)
    }

    #[target_feature(enable = "neon")]
    unsafe fn invert_bool_impl(data: &mut [u8]) {
        let n = data.len();
        let p = data.as_mut_ptr();
        let one = vdupq_n_u8(1);
        let mut i = 0;
        while i + 16 <= n {
            let v = vld1q_u8(p.add(i));
            vst1q_u8(p.add(i), vandq_u8(vceqzq_u8(v), one));
            i += 16;
        }
        for b in &mut data[i..] {
            *b = (*b == 0) as u8;
        }
    }

    #[target_feature(enable = "neon")]
    unsafe fn and_bool_impl(lhs: &mut [u8], rhs: &[u8]) {
        let n = lhs.len().min(rhs.len());
        let lp = lhs.as_mut_ptr();
        let rp = rhs.as_ptr();
        let one = vdupq_n_u8(1);
        let mut i = 0;
        while i + 16 <= n {
            let a = vld1q_u8(lp.add(i));
            let b = vld1q_u8(rp.add(i));
            let dead = vorrq_u8(vceqzq_u8(a), vceqzq_u8(b));
            vst1q_u8(lp.add(i), vbicq_u8(one, dead));
            i += 16;
        }
        while i < n {
            lhs[i] = (lhs[i] != 0 && rhs[i] != 0) as u8;
            i += 1;
        }
    }

    #[target_feature(enable = "neon")]
    unsafe fn or_bool_impl(lhs: &mut [u8], rhs: &[u8]) {
        let n = lhs.len().min(rhs.len());
        let lp = lhs.as_mut_ptr();
        let rp = rhs.as_ptr();
        let one = vdupq_n_u8(1);
        let mut i = 0;
        while i + 16 <= n {
            let a = vld1q_u8(lp.add(i));
            let b = vld1q_u8(rp.add(i));
            let dead = vandq_u8(vceqzq_u8(a), vceqzq_u8(b));
            vst1q_u8(lp.add(i), vbicq_u8(one, dead));
            i += 16;
        }
        while i < n {
            lhs[i] = (lhs[i] != 0 || rhs[i] != 0) as u8;
            i += 1;
        }
    }

    pub fn all_true(data: &[bool]) -> bool {
        unsafe { all_true_impl(as_bytes(data)) }
    }

    pub fn all_false(data: &[bool]) -> bool {
        unsafe { all_false_impl(as_bytes(data)) }
    }

    pub fn invert_bool(data: &mut [bool]) {
        unsafe { invert_bool_impl(as_bytes_mut(data)) }
    }

    pub fn and_bool(lhs: &mut [bool], rhs: &[bool]) {
        unsafe { and_bool_impl(as_bytes_mut(lhs), as_bytes(rhs)) }
    }

    pub fn or_bool(lhs: &mut [bool], rhs: &[bool]) {
        unsafe { or_bool_impl(as_bytes_mut(lhs), as_bytes(rhs)) }
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    #[test]
    fn test_dispatch_table_is_stable() {
        let first = kernels().level;
        assert_eq!(kernels().level, first);
    }

    #[test]
    fn test_all_true_all_false_edges() {
        assert!(all_true(&[]));
        assert!(all_false(&[]));
        assert!(all_true(&[true; 100]));
        assert!(!all_true(&[true, false, true]));
        assert!(all_false(&[false; 100]));
        assert!(!all_false(&[false, true]));
    }

    #[test]
    fn test_invert_is_involution() {
        let mut data: Vec<bool> = (0..1000).map(|i| i % 3 == 0).collect();
        let orig = data.clone();
        invert_bool(&mut data);
        assert!(data.iter().zip(&orig).all(|(a, b)| *a != *b));
        invert_bool(&mut data);
        assert_eq!(data, orig);
    }

    #[test]
    fn test_and_or_canonical() {
        let mut lhs = vec![true, true, false, false, true];
        let rhs = vec![true, false, true, false, true];
        and_bool(&mut lhs, &rhs);
        assert_eq!(lhs, vec![true, false, false, false, true]);

        let mut lhs = vec![true, true, false, false];
        let rhs = vec![true, false, true, false];
        or_bool(&mut lhs, &rhs);
        assert_eq!(lhs, vec![true, true, true, false]);
    }

    #[test]
    fn test_and_commutes_on_canonical_input() {
        let mut rng = StdRng::seed_from_u64(7);
        let a: Vec<bool> = (0..513).map(|_| rng.gen_bool(0.5)).collect();
        let b: Vec<bool> = (0..513).map(|_| rng.gen_bool(0.5)).collect();

        let mut ab = a.clone();
        and_bool(&mut ab, &b);
        let mut ba = b.clone();
        and_bool(&mut ba, &a);
        assert_eq!(ab, ba);
    }

    #[test]
    fn test_get_bitset_block_roundtrip() {
        // full block round-trips exactly; short blocks zero-pad high bits
        let block: Vec<bool> = (0..64).map(|i| i % 7 == 0).collect();
        let word = get_bitset_block(&block);
        for (i, &b) in block.iter().enumerate() {
            assert_eq!((word >> i) & 1 == 1, b, "bit {}", i);
        }

        let short = vec![true, false, true];
        let word = get_bitset_block(&short);
        assert_eq!(word, 0b101);
    }

    #[test]
    fn test_find_term_types() {
        assert!(find_term(&[1i32, 5, 9, 42], 42));
        assert!(!find_term(&[1i32, 5, 9, 42], 7));
        assert!(find_term(&[1i64 << 40, -3, 0], -3));
        assert!(find_term(&[1.5f32, 2.5, 3.5], 2.5));
        assert!(!find_term(&[1.5f64, 2.5], 0.0));
        assert!(find_term(&[-1i8, 0, 1], -1));
        assert!(find_term(&[300i16, -300], -300));
        assert!(!find_term::<i32>(&[], 1));
    }

    /// Dispatched kernels agree with the scalar reference on random input
    /// across awkward lengths (vector remainders, sub-block sizes).
    #[test]
    fn test_dispatched_matches_reference() {
        let mut rng = StdRng::seed_from_u64(0xA16);
        let lengths = [1usize, 2, 3, 15, 16, 17, 63, 64, 65, 100, 511, 1024, 4097, 10_000];

        for &len in &lengths {
            let data: Vec<bool> = (0..len).map(|_| rng.gen_bool(0.7)).collect();
            assert_eq!(all_true(&data), reference::all_true(&data), "all_true len={}", len);
            assert_eq!(all_false(&data), reference::all_false(&data), "all_false len={}", len);

            let rhs: Vec<bool> = (0..len).map(|_| rng.gen_bool(0.5)).collect();
            let mut simd_out = data.clone();
            and_bool(&mut simd_out, &rhs);
            let mut ref_out = data.clone();
            reference::and_bool(&mut ref_out, &rhs);
            assert_eq!(simd_out, ref_out, "and_bool len={}", len);

            let mut simd_out = data.clone();
            or_bool(&mut simd_out, &rhs);
            let mut ref_out = data.clone();
            reference::or_bool(&mut ref_out, &rhs);
            assert_eq!(simd_out, ref_out, "or_bool len={}", len);

            let mut simd_out = data.clone();
            invert_bool(&mut simd_out);
            let mut ref_out = data.clone();
            reference::invert_bool(&mut ref_out);
            assert_eq!(simd_out, ref_out, "invert_bool len={}", len);

            let block = &data[..len.min(64)];
            assert_eq!(
                get_bitset_block(block),
                reference::get_bitset_block(block),
                "get_bitset_block len={}",
                block.len()
            );

            let ints: Vec<i32> = (0..len).map(|_| rng.gen_range(-50..50)).collect();
            let needle = rng.gen_range(-50..50);
            assert_eq!(
                find_term(&ints, needle),
                reference::find_term(&ints, needle),
                "find_term_i32 len={}",
                len
            );

            let longs: Vec<i64> = (0..len).map(|_| rng.gen_range(-50..50)).collect();
            let needle = rng.gen_range(-50i64..50);
            assert_eq!(
                find_term(&longs, needle),
                reference::find_term(&longs, needle),
                "find_term_i64 len={}",
                len
            );
        }
    }
}
