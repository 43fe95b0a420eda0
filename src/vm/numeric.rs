//! Numeric edge cases: trapping float-to-int truncation, NaN
//! canonicalization, and the Wasm flavors of float min/max.

use crate::error::Trap;
use crate::model::ValType;

/// Canonical quiet-NaN bit patterns; every produced float NaN is rewritten to
/// these for cross-host determinism.
pub const F32_CANONICAL_NAN: u32 = 0x7FC0_0000;
pub const F64_CANONICAL_NAN: u64 = 0x7FF8_0000_0000_0000;

/// Cast a raw slot to a declared value type: 32-bit types keep only their low
/// word, zero-extended.
#[inline]
pub(crate) fn cast_value(bits: u64, ty: ValType) -> u64 {
    match ty {
        ValType::I32 | ValType::F32 => bits & 0xFFFF_FFFF,
        ValType::I64 | ValType::F64 => bits,
    }
}

#[inline]
pub(crate) fn canonical_f32(x: f32) -> u64 {
    if x.is_nan() {
        F32_CANONICAL_NAN as u64
    } else {
        x.to_bits() as u64
    }
}

#[inline]
pub(crate) fn canonical_f64(x: f64) -> u64 {
    if x.is_nan() {
        F64_CANONICAL_NAN
    } else {
        x.to_bits()
    }
}

/// Wasm `min`: NaN if either operand is NaN; −0 beats +0.
pub(crate) fn fmin32(a: f32, b: f32) -> f32 {
    if a.is_nan() || b.is_nan() {
        return f32::NAN;
    }
    if a == b {
        return if a.is_sign_negative() { a } else { b };
    }
    if a < b {
        a
    } else {
        b
    }
}

/// Wasm `max`: NaN if either operand is NaN; +0 beats −0.
pub(crate) fn fmax32(a: f32, b: f32) -> f32 {
    if a.is_nan() || b.is_nan() {
        return f32::NAN;
    }
    if a == b {
        return if a.is_sign_positive() { a } else { b };
    }
    if a > b {
        a
    } else {
        b
    }
}

pub(crate) fn fmin64(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        return f64::NAN;
    }
    if a == b {
        return if a.is_sign_negative() { a } else { b };
    }
    if a < b {
        a
    } else {
        b
    }
}

pub(crate) fn fmax64(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        return f64::NAN;
    }
    if a == b {
        return if a.is_sign_positive() { a } else { b };
    }
    if a > b {
        a
    } else {
        b
    }
}

/* ----- Trapping truncations -----
 *
 * NaN traps as an invalid conversion; a finite value whose truncation falls
 * outside the destination range traps as integer overflow. The bounds are
 * open or closed so that any value that truncates into range is admitted.
 */

pub(crate) fn trunc_f32_to_i32(f: f32) -> Result<u64, Trap> {
    if f.is_nan() {
        return Err(Trap::InvalidIntConversion);
    }
    if !(-2147483648.0..2147483648.0).contains(&f) {
        return Err(Trap::IntegerOverflow);
    }
    Ok((f as i32) as u32 as u64)
}

pub(crate) fn trunc_f32_to_u32(f: f32) -> Result<u64, Trap> {
    if f.is_nan() {
        return Err(Trap::InvalidIntConversion);
    }
    if !(f > -1.0 && f < 4294967296.0) {
        return Err(Trap::IntegerOverflow);
    }
    Ok((f as u32) as u64)
}

pub(crate) fn trunc_f64_to_i32(f: f64) -> Result<u64, Trap> {
    if f.is_nan() {
        return Err(Trap::InvalidIntConversion);
    }
    if !(f > -2147483649.0 && f < 2147483648.0) {
        return Err(Trap::IntegerOverflow);
    }
    Ok((f as i32) as u32 as u64)
}

pub(crate) fn trunc_f64_to_u32(f: f64) -> Result<u64, Trap> {
    if f.is_nan() {
        return Err(Trap::InvalidIntConversion);
    }
    if !(f > -1.0 && f < 4294967296.0) {
        return Err(Trap::IntegerOverflow);
    }
    Ok((f as u32) as u64)
}

pub(crate) fn trunc_f32_to_i64(f: f32) -> Result<u64, Trap> {
    if f.is_nan() {
        return Err(Trap::InvalidIntConversion);
    }
    if !(-9223372036854775808.0..9223372036854775808.0).contains(&f) {
        return Err(Trap::IntegerOverflow);
    }
    Ok((f as i64) as u64)
}

pub(crate) fn trunc_f32_to_u64(f: f32) -> Result<u64, Trap> {
    if f.is_nan() {
        return Err(Trap::InvalidIntConversion);
    }
    if !(f > -1.0 && f < 18446744073709551616.0) {
        return Err(Trap::IntegerOverflow);
    }
    Ok(f as u64)
}

pub(crate) fn trunc_f64_to_i64(f: f64) -> Result<u64, Trap> {
    if f.is_nan() {
        return Err(Trap::InvalidIntConversion);
    }
    if !(-9223372036854775808.0..9223372036854775808.0).contains(&f) {
        return Err(Trap::IntegerOverflow);
    }
    Ok((f as i64) as u64)
}

pub(crate) fn trunc_f64_to_u64(f: f64) -> Result<u64, Trap> {
    if f.is_nan() {
        return Err(Trap::InvalidIntConversion);
    }
    if !(f > -1.0 && f < 18446744073709551616.0) {
        return Err(Trap::IntegerOverflow);
    }
    Ok(f as u64)
}
