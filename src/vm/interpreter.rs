//! The dispatch loop: a flat interpreter over function body bytes.
//!
//! Structured control flow is handled without a control-flow graph. Branches
//! to non-loop targets set `break_depth` and the loop fast-forwards over the
//! skipped instructions (consuming their immediates) until enough `end`
//! boundaries have passed; branches to loops rewind the instruction pointer
//! to the loop header.

use std::sync::Arc;

use crate::binary::{cursor::Cursor, leb128};
use crate::error::{Trap, VmError};
use crate::model::{FuncSource, ValType};
use crate::vm::frame::{Block, BlockKind, Frame};
use crate::vm::instance::Instance;
use crate::vm::numeric;
use crate::vm::opcode as op;
use crate::vm::{MAX_BLOCKS, MAX_BR_TABLE_TARGETS, MAX_FRAMES, PAGE_SIZE};

/* ----- Immediate readers -----
 *
 * These operate on the raw body bytes at the caller-held instruction pointer
 * and advance it past the immediate. Malformed or truncated immediates trap.
 */

fn read_uleb32(code: &[u8], ip: &mut usize) -> Result<u32, Trap> {
    let tail = code.get(*ip..).ok_or(Trap::LebOverflow)?;
    let mut cur = Cursor::new(tail);
    let v = leb128::read_uleb_u32(&mut cur).map_err(|_| Trap::LebOverflow)?;
    *ip += cur.offset();
    Ok(v)
}

fn read_sleb32(code: &[u8], ip: &mut usize) -> Result<i32, Trap> {
    let tail = code.get(*ip..).ok_or(Trap::LebOverflow)?;
    let mut cur = Cursor::new(tail);
    let v = leb128::read_sleb_i32(&mut cur).map_err(|_| Trap::LebOverflow)?;
    *ip += cur.offset();
    Ok(v)
}

fn read_sleb64(code: &[u8], ip: &mut usize) -> Result<i64, Trap> {
    let tail = code.get(*ip..).ok_or(Trap::LebOverflow)?;
    let mut cur = Cursor::new(tail);
    let v = leb128::read_sleb_i64(&mut cur).map_err(|_| Trap::LebOverflow)?;
    *ip += cur.offset();
    Ok(v)
}

fn read_u8_imm(code: &[u8], ip: &mut usize) -> Result<u8, Trap> {
    let b = *code.get(*ip).ok_or(Trap::LebOverflow)?;
    *ip += 1;
    Ok(b)
}

fn read_f32_imm(code: &[u8], ip: &mut usize) -> Result<u32, Trap> {
    let end = ip.checked_add(4).ok_or(Trap::LebOverflow)?;
    let b = code.get(*ip..end).ok_or(Trap::LebOverflow)?;
    let v = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
    *ip = end;
    Ok(v)
}

fn read_f64_imm(code: &[u8], ip: &mut usize) -> Result<u64, Trap> {
    let end = ip.checked_add(8).ok_or(Trap::LebOverflow)?;
    let b = code.get(*ip..end).ok_or(Trap::LebOverflow)?;
    let v = u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]);
    *ip = end;
    Ok(v)
}

fn skip_fixed(code: &[u8], ip: &mut usize, n: usize) -> Result<(), Trap> {
    let end = ip.checked_add(n).ok_or(Trap::LebOverflow)?;
    if end > code.len() {
        return Err(Trap::LebOverflow);
    }
    *ip = end;
    Ok(())
}

/// Blocktype immediate: 0x40 is the empty type, otherwise a value type.
fn read_block_type(code: &[u8], ip: &mut usize) -> Result<Option<ValType>, VmError> {
    let b = read_u8_imm(code, ip)?;
    if b == 0x40 {
        return Ok(None);
    }
    ValType::from_byte(b)
        .map(Some)
        .ok_or(VmError::InvalidBlockType)
}

/// Advance the instruction pointer past a skipped opcode's immediates.
/// Every immediate-carrying opcode must be listed here; a branch that
/// crosses one with a stale pointer desynchronizes the whole stream.
fn skip_immediates(code: &[u8], ip: &mut usize, opcode: u8) -> Result<(), VmError> {
    match opcode {
        op::I32_CONST => {
            read_sleb32(code, ip)?;
        }
        op::I64_CONST => {
            read_sleb64(code, ip)?;
        }
        op::F32_CONST => skip_fixed(code, ip, 4)?,
        op::F64_CONST => skip_fixed(code, ip, 8)?,
        op::BR | op::BR_IF | op::CALL | op::GET_LOCAL..=op::SET_GLOBAL => {
            read_uleb32(code, ip)?;
        }
        op::BR_TABLE => {
            let count = read_uleb32(code, ip)? as usize;
            if count > MAX_BR_TABLE_TARGETS {
                return Err(Trap::TooManyBrTableTargets.into());
            }
            for _ in 0..count {
                read_uleb32(code, ip)?;
            }
            read_uleb32(code, ip)?; // default target
        }
        op::CALL_INDIRECT => {
            read_uleb32(code, ip)?;
            skip_fixed(code, ip, 1)?;
        }
        op::I32_LOAD..=op::I64_STORE32 => {
            read_uleb32(code, ip)?;
            read_uleb32(code, ip)?;
        }
        op::MEMORY_SIZE | op::MEMORY_GROW => skip_fixed(code, ip, 1)?,
        op::PREFIX_FC => {
            read_uleb32(code, ip)?;
        }
        _ => {}
    }
    Ok(())
}

impl Instance {
    #[inline]
    fn current_frame(&self) -> Result<&Frame, Trap> {
        self.frames.last().ok_or(Trap::FrameUnderflow)
    }

    #[inline]
    fn current_frame_mut(&mut self) -> Result<&mut Frame, Trap> {
        self.frames.last_mut().ok_or(Trap::FrameUnderflow)
    }

    /// True while unwinding toward a branch target.
    #[inline]
    fn inoperative(&self) -> bool {
        self.break_depth > -1
    }

    fn push_block(&mut self, block: Block) -> Result<(), Trap> {
        if self.blocks.len() == MAX_BLOCKS {
            return Err(Trap::BlockOverflow);
        }
        self.blocks.push(block);
        Ok(())
    }

    fn pop_block(&mut self) -> Result<Block, Trap> {
        if self.blocks.len() <= self.current_frame()?.base_block_index {
            return Err(Trap::BlockUnderflow);
        }
        self.blocks.pop().ok_or(Trap::BlockUnderflow)
    }

    /// Push a frame for a locally-defined function whose arguments are
    /// already on the stack, and zero its declared locals.
    pub(crate) fn setup_frame(&mut self, fn_idx: usize) -> Result<(), VmError> {
        let module = Arc::clone(&self.module);
        let func = module
            .functions
            .get(fn_idx)
            .ok_or(VmError::FuncNotFound)?;
        let body = match &func.source {
            FuncSource::Local(body) => body,
            FuncSource::Import { .. } => return Err(VmError::FuncNotFound),
        };
        let n_params = func.sig.params.len();
        if self.stack.sp() < n_params {
            return Err(Trap::StackUnderflow.into());
        }
        if self.frames.len() == MAX_FRAMES {
            return Err(Trap::FrameOverflow.into());
        }
        self.frames
            .push(Frame::new(fn_idx, self.stack.sp() - n_params, self.blocks.len()));
        self.stack.extend_zeroed(body.local_slots())?;
        Ok(())
    }

    /// Dispatch a call through the unified index space: imports go to the
    /// host, local functions get a frame.
    fn invoke_function(&mut self, fn_idx: usize) -> Result<(), VmError> {
        let is_import = self
            .module
            .functions
            .get(fn_idx)
            .ok_or(VmError::FuncNotFound)?
            .is_import();
        if is_import {
            self.call_host(fn_idx)
        } else {
            self.setup_frame(fn_idx)
        }
    }

    /// Call a host import: pop the argument slots in reverse into declaration
    /// order, run the callable, push the result when the signature declares
    /// one, and surface a host error as a trap.
    pub(crate) fn call_host(&mut self, fn_idx: usize) -> Result<(), VmError> {
        let module = Arc::clone(&self.module);
        let func = module
            .functions
            .get(fn_idx)
            .ok_or(VmError::FuncNotFound)?;
        let callable = match self.host_functions.get(fn_idx) {
            Some(Some(f)) => Arc::clone(f),
            _ => match &func.source {
                FuncSource::Import { module: m, field } => {
                    return Err(VmError::UnresolvedImport {
                        module: m.clone(),
                        field: field.clone(),
                    })
                }
                FuncSource::Local(_) => return Err(VmError::FuncNotFound),
            },
        };

        let mut args = vec![0u64; func.sig.params.len()];
        for slot in args.iter_mut().rev() {
            *slot = self.stack.pop()?;
        }
        let ret = (callable.as_ref())(self, &args).map_err(VmError::from)?;
        if !func.sig.results.is_empty() {
            self.stack.push(ret)?;
        }
        Ok(())
    }

    /// Branch out of `depth + 1` enclosing blocks. A loop target rewinds to
    /// the loop header; any other target starts unwinding.
    fn block_jump(&mut self, depth: usize) -> Result<(), VmError> {
        if depth >= self.blocks.len() {
            return Err(Trap::InvalidBreakDepth.into());
        }
        let target = self.blocks.len() - 1 - depth;
        if target < self.current_frame()?.base_block_index {
            return Err(Trap::BreakOutOfFunction.into());
        }
        let block = self.blocks[target];
        if block.kind == BlockKind::Loop {
            // Keep the loop block itself; everything nested inside is gone.
            self.blocks.truncate(target + 1);
            self.stack.truncate(block.base_pointer);
            self.current_frame_mut()?.ip = block.label_pointer;
        } else {
            self.break_depth = depth as isize;
        }
        Ok(())
    }

    /* ----- Linear memory access ----- */

    /// Resolve a memarg: read align (ignored) and offset immediates, pop the
    /// base address, and bounds-check the access width.
    fn mem_addr(&mut self, code: &[u8], ip: &mut usize, width: usize) -> Result<usize, VmError> {
        let _align = read_uleb32(code, ip)?;
        let offset = read_uleb32(code, ip)?;
        let base = self.stack.pop()? as u32;
        let ea = base as u64 + offset as u64;
        if ea + width as u64 > self.memory.len() as u64 {
            return Err(Trap::OutOfBoundsMemoryAccess.into());
        }
        Ok(ea as usize)
    }

    fn load2(&self, a: usize) -> u16 {
        u16::from_le_bytes([self.memory[a], self.memory[a + 1]])
    }

    fn load4(&self, a: usize) -> u32 {
        u32::from_le_bytes([
            self.memory[a],
            self.memory[a + 1],
            self.memory[a + 2],
            self.memory[a + 3],
        ])
    }

    fn load8(&self, a: usize) -> u64 {
        u64::from_le_bytes([
            self.memory[a],
            self.memory[a + 1],
            self.memory[a + 2],
            self.memory[a + 3],
            self.memory[a + 4],
            self.memory[a + 5],
            self.memory[a + 6],
            self.memory[a + 7],
        ])
    }

    fn store2(&mut self, a: usize, v: u16) {
        self.memory[a..a + 2].copy_from_slice(&v.to_le_bytes());
    }

    fn store4(&mut self, a: usize, v: u32) {
        self.memory[a..a + 4].copy_from_slice(&v.to_le_bytes());
    }

    fn store8(&mut self, a: usize, v: u64) {
        self.memory[a..a + 8].copy_from_slice(&v.to_le_bytes());
    }

    fn exec_load(&mut self, opcode: u8, code: &[u8], ip: &mut usize) -> Result<(), VmError> {
        let width = match opcode {
            op::I32_LOAD8_S | op::I32_LOAD8_U | op::I64_LOAD8_S | op::I64_LOAD8_U => 1,
            op::I32_LOAD16_S | op::I32_LOAD16_U | op::I64_LOAD16_S | op::I64_LOAD16_U => 2,
            op::I64_LOAD | op::F64_LOAD => 8,
            _ => 4,
        };
        let a = self.mem_addr(code, ip, width)?;
        let v = match opcode {
            op::I32_LOAD | op::F32_LOAD => self.load4(a) as u64,
            op::I64_LOAD | op::F64_LOAD => self.load8(a),
            op::I32_LOAD8_S => self.memory[a] as i8 as i32 as u32 as u64,
            op::I32_LOAD8_U => self.memory[a] as u64,
            op::I32_LOAD16_S => self.load2(a) as i16 as i32 as u32 as u64,
            op::I32_LOAD16_U => self.load2(a) as u64,
            op::I64_LOAD8_S => self.memory[a] as i8 as i64 as u64,
            op::I64_LOAD8_U => self.memory[a] as u64,
            op::I64_LOAD16_S => self.load2(a) as i16 as i64 as u64,
            op::I64_LOAD16_U => self.load2(a) as u64,
            op::I64_LOAD32_S => self.load4(a) as i32 as i64 as u64,
            op::I64_LOAD32_U => self.load4(a) as u64,
            _ => return Err(Trap::UnknownOpcode.into()),
        };
        self.stack.push(v)?;
        Ok(())
    }

    fn exec_store(&mut self, opcode: u8, code: &[u8], ip: &mut usize) -> Result<(), VmError> {
        let width = match opcode {
            op::I32_STORE8 | op::I64_STORE8 => 1,
            op::I32_STORE16 | op::I64_STORE16 => 2,
            op::I64_STORE | op::F64_STORE => 8,
            _ => 4,
        };
        let v = self.stack.pop()?;
        let a = self.mem_addr(code, ip, width)?;
        match opcode {
            op::I32_STORE | op::F32_STORE | op::I64_STORE32 => self.store4(a, v as u32),
            op::I64_STORE | op::F64_STORE => self.store8(a, v),
            op::I32_STORE8 | op::I64_STORE8 => self.memory[a] = v as u8,
            op::I32_STORE16 | op::I64_STORE16 => self.store2(a, v as u16),
            _ => return Err(Trap::UnknownOpcode.into()),
        }
        Ok(())
    }

    /* ----- Numeric families ----- */

    fn exec_i32_cmp(&mut self, opcode: u8) -> Result<(), VmError> {
        let c = if opcode == op::I32_EQZ {
            (self.stack.pop()? as u32 == 0) as u64
        } else {
            let b = self.stack.pop()? as u32;
            let a = self.stack.pop()? as u32;
            let (sa, sb) = (a as i32, b as i32);
            (match opcode {
                op::I32_EQ => a == b,
                op::I32_NE => a != b,
                op::I32_LT_S => sa < sb,
                op::I32_LT_U => a < b,
                op::I32_GT_S => sa > sb,
                op::I32_GT_U => a > b,
                op::I32_LE_S => sa <= sb,
                op::I32_LE_U => a <= b,
                op::I32_GE_S => sa >= sb,
                op::I32_GE_U => a >= b,
                _ => return Err(Trap::UnknownOpcode.into()),
            }) as u64
        };
        self.stack.push(c)?;
        Ok(())
    }

    fn exec_i64_cmp(&mut self, opcode: u8) -> Result<(), VmError> {
        let c = if opcode == op::I64_EQZ {
            (self.stack.pop()? == 0) as u64
        } else {
            let b = self.stack.pop()?;
            let a = self.stack.pop()?;
            let (sa, sb) = (a as i64, b as i64);
            (match opcode {
                op::I64_EQ => a == b,
                op::I64_NE => a != b,
                op::I64_LT_S => sa < sb,
                op::I64_LT_U => a < b,
                op::I64_GT_S => sa > sb,
                op::I64_GT_U => a > b,
                op::I64_LE_S => sa <= sb,
                op::I64_LE_U => a <= b,
                op::I64_GE_S => sa >= sb,
                op::I64_GE_U => a >= b,
                _ => return Err(Trap::UnknownOpcode.into()),
            }) as u64
        };
        self.stack.push(c)?;
        Ok(())
    }

    fn exec_f32_cmp(&mut self, opcode: u8) -> Result<(), VmError> {
        let b = f32::from_bits(self.stack.pop()? as u32);
        let a = f32::from_bits(self.stack.pop()? as u32);
        let c = match opcode {
            op::F32_EQ => a == b,
            op::F32_NE => a != b,
            op::F32_LT => a < b,
            op::F32_GT => a > b,
            op::F32_LE => a <= b,
            op::F32_GE => a >= b,
            _ => return Err(Trap::UnknownOpcode.into()),
        };
        self.stack.push(c as u64)?;
        Ok(())
    }

    fn exec_f64_cmp(&mut self, opcode: u8) -> Result<(), VmError> {
        let b = f64::from_bits(self.stack.pop()?);
        let a = f64::from_bits(self.stack.pop()?);
        let c = match opcode {
            op::F64_EQ => a == b,
            op::F64_NE => a != b,
            op::F64_LT => a < b,
            op::F64_GT => a > b,
            op::F64_LE => a <= b,
            op::F64_GE => a >= b,
            _ => return Err(Trap::UnknownOpcode.into()),
        };
        self.stack.push(c as u64)?;
        Ok(())
    }

    fn exec_i32_arith(&mut self, opcode: u8) -> Result<(), VmError> {
        if matches!(opcode, op::I32_CLZ | op::I32_CTZ | op::I32_POPCNT) {
            let v = self.stack.pop()? as u32;
            let r = match opcode {
                op::I32_CLZ => v.leading_zeros(),
                op::I32_CTZ => v.trailing_zeros(),
                _ => v.count_ones(),
            };
            self.stack.push(r as u64)?;
            return Ok(());
        }
        let b = self.stack.pop()? as u32;
        let a = self.stack.pop()? as u32;
        let (sa, sb) = (a as i32, b as i32);
        let r: u32 = match opcode {
            op::I32_ADD => a.wrapping_add(b),
            op::I32_SUB => a.wrapping_sub(b),
            op::I32_MUL => a.wrapping_mul(b),
            op::I32_DIV_S => {
                if sb == 0 {
                    return Err(Trap::IntegerDivideByZero.into());
                }
                if sa == i32::MIN && sb == -1 {
                    return Err(Trap::IntegerOverflow.into());
                }
                (sa / sb) as u32
            }
            op::I32_DIV_U => {
                if b == 0 {
                    return Err(Trap::IntegerDivideByZero.into());
                }
                a / b
            }
            op::I32_REM_S => {
                if sb == 0 {
                    return Err(Trap::IntegerDivideByZero.into());
                }
                sa.wrapping_rem(sb) as u32
            }
            op::I32_REM_U => {
                if b == 0 {
                    return Err(Trap::IntegerDivideByZero.into());
                }
                a % b
            }
            op::I32_AND => a & b,
            op::I32_OR => a | b,
            op::I32_XOR => a ^ b,
            op::I32_SHL => a.wrapping_shl(b),
            op::I32_SHR_S => sa.wrapping_shr(b) as u32,
            op::I32_SHR_U => a.wrapping_shr(b),
            op::I32_ROTL => a.rotate_left(b),
            op::I32_ROTR => a.rotate_right(b),
            _ => return Err(Trap::UnknownOpcode.into()),
        };
        self.stack.push(r as u64)?;
        Ok(())
    }

    fn exec_i64_arith(&mut self, opcode: u8) -> Result<(), VmError> {
        if matches!(opcode, op::I64_CLZ | op::I64_CTZ | op::I64_POPCNT) {
            let v = self.stack.pop()?;
            let r = match opcode {
                op::I64_CLZ => v.leading_zeros(),
                op::I64_CTZ => v.trailing_zeros(),
                _ => v.count_ones(),
            };
            self.stack.push(r as u64)?;
            return Ok(());
        }
        let b = self.stack.pop()?;
        let a = self.stack.pop()?;
        let (sa, sb) = (a as i64, b as i64);
        let r: u64 = match opcode {
            op::I64_ADD => a.wrapping_add(b),
            op::I64_SUB => a.wrapping_sub(b),
            op::I64_MUL => a.wrapping_mul(b),
            op::I64_DIV_S => {
                if sb == 0 {
                    return Err(Trap::IntegerDivideByZero.into());
                }
                if sa == i64::MIN && sb == -1 {
                    return Err(Trap::IntegerOverflow.into());
                }
                (sa / sb) as u64
            }
            op::I64_DIV_U => {
                if b == 0 {
                    return Err(Trap::IntegerDivideByZero.into());
                }
                a / b
            }
            op::I64_REM_S => {
                if sb == 0 {
                    return Err(Trap::IntegerDivideByZero.into());
                }
                sa.wrapping_rem(sb) as u64
            }
            op::I64_REM_U => {
                if b == 0 {
                    return Err(Trap::IntegerDivideByZero.into());
                }
                a % b
            }
            op::I64_AND => a & b,
            op::I64_OR => a | b,
            op::I64_XOR => a ^ b,
            op::I64_SHL => a.wrapping_shl(b as u32),
            op::I64_SHR_S => sa.wrapping_shr(b as u32) as u64,
            op::I64_SHR_U => a.wrapping_shr(b as u32),
            op::I64_ROTL => a.rotate_left(b as u32),
            op::I64_ROTR => a.rotate_right(b as u32),
            _ => return Err(Trap::UnknownOpcode.into()),
        };
        self.stack.push(r)?;
        Ok(())
    }

    fn exec_f32_arith(&mut self, opcode: u8) -> Result<(), VmError> {
        match opcode {
            // Sign-bit ops work on raw bits and preserve NaN payloads.
            op::F32_ABS => {
                let bits = self.stack.pop()? as u32;
                self.stack.push((bits & 0x7FFF_FFFF) as u64)?;
            }
            op::F32_NEG => {
                let bits = self.stack.pop()? as u32;
                self.stack.push((bits ^ 0x8000_0000) as u64)?;
            }
            op::F32_COPYSIGN => {
                let b = self.stack.pop()? as u32;
                let a = self.stack.pop()? as u32;
                self.stack
                    .push(((a & 0x7FFF_FFFF) | (b & 0x8000_0000)) as u64)?;
            }
            op::F32_CEIL | op::F32_FLOOR | op::F32_TRUNC | op::F32_NEAREST | op::F32_SQRT => {
                let x = f32::from_bits(self.stack.pop()? as u32);
                let r = match opcode {
                    op::F32_CEIL => x.ceil(),
                    op::F32_FLOOR => x.floor(),
                    op::F32_TRUNC => x.trunc(),
                    op::F32_NEAREST => x.round_ties_even(),
                    _ => x.sqrt(),
                };
                self.stack.push(numeric::canonical_f32(r))?;
            }
            _ => {
                let b = f32::from_bits(self.stack.pop()? as u32);
                let a = f32::from_bits(self.stack.pop()? as u32);
                let r = match opcode {
                    op::F32_ADD => a + b,
                    op::F32_SUB => a - b,
                    op::F32_MUL => a * b,
                    op::F32_DIV => a / b,
                    op::F32_MIN => numeric::fmin32(a, b),
                    op::F32_MAX => numeric::fmax32(a, b),
                    _ => return Err(Trap::UnknownOpcode.into()),
                };
                self.stack.push(numeric::canonical_f32(r))?;
            }
        }
        Ok(())
    }

    fn exec_f64_arith(&mut self, opcode: u8) -> Result<(), VmError> {
        match opcode {
            op::F64_ABS => {
                let bits = self.stack.pop()?;
                self.stack.push(bits & 0x7FFF_FFFF_FFFF_FFFF)?;
            }
            op::F64_NEG => {
                let bits = self.stack.pop()?;
                self.stack.push(bits ^ 0x8000_0000_0000_0000)?;
            }
            op::F64_COPYSIGN => {
                let b = self.stack.pop()?;
                let a = self.stack.pop()?;
                self.stack
                    .push((a & 0x7FFF_FFFF_FFFF_FFFF) | (b & 0x8000_0000_0000_0000))?;
            }
            op::F64_CEIL | op::F64_FLOOR | op::F64_TRUNC | op::F64_NEAREST | op::F64_SQRT => {
                let x = f64::from_bits(self.stack.pop()?);
                let r = match opcode {
                    op::F64_CEIL => x.ceil(),
                    op::F64_FLOOR => x.floor(),
                    op::F64_TRUNC => x.trunc(),
                    op::F64_NEAREST => x.round_ties_even(),
                    _ => x.sqrt(),
                };
                self.stack.push(numeric::canonical_f64(r))?;
            }
            _ => {
                let b = f64::from_bits(self.stack.pop()?);
                let a = f64::from_bits(self.stack.pop()?);
                let r = match opcode {
                    op::F64_ADD => a + b,
                    op::F64_SUB => a - b,
                    op::F64_MUL => a * b,
                    op::F64_DIV => a / b,
                    op::F64_MIN => numeric::fmin64(a, b),
                    op::F64_MAX => numeric::fmax64(a, b),
                    _ => return Err(Trap::UnknownOpcode.into()),
                };
                self.stack.push(numeric::canonical_f64(r))?;
            }
        }
        Ok(())
    }

    fn exec_conversion(&mut self, opcode: u8) -> Result<(), VmError> {
        let v = match opcode {
            op::I32_WRAP_I64 => self.stack.pop()? as u32 as u64,
            op::I32_TRUNC_F32_S => {
                numeric::trunc_f32_to_i32(f32::from_bits(self.stack.pop()? as u32))?
            }
            op::I32_TRUNC_F32_U => {
                numeric::trunc_f32_to_u32(f32::from_bits(self.stack.pop()? as u32))?
            }
            op::I32_TRUNC_F64_S => {
                numeric::trunc_f64_to_i32(f64::from_bits(self.stack.pop()?))?
            }
            op::I32_TRUNC_F64_U => {
                numeric::trunc_f64_to_u32(f64::from_bits(self.stack.pop()?))?
            }
            op::I64_EXTEND_I32_S => self.stack.pop()? as u32 as i32 as i64 as u64,
            op::I64_EXTEND_I32_U => self.stack.pop()? as u32 as u64,
            op::I64_TRUNC_F32_S => {
                numeric::trunc_f32_to_i64(f32::from_bits(self.stack.pop()? as u32))?
            }
            op::I64_TRUNC_F32_U => {
                numeric::trunc_f32_to_u64(f32::from_bits(self.stack.pop()? as u32))?
            }
            op::I64_TRUNC_F64_S => {
                numeric::trunc_f64_to_i64(f64::from_bits(self.stack.pop()?))?
            }
            op::I64_TRUNC_F64_U => {
                numeric::trunc_f64_to_u64(f64::from_bits(self.stack.pop()?))?
            }
            op::F32_CONVERT_I32_S => {
                numeric::canonical_f32(self.stack.pop()? as u32 as i32 as f32)
            }
            op::F32_CONVERT_I32_U => numeric::canonical_f32(self.stack.pop()? as u32 as f32),
            op::F32_CONVERT_I64_S => numeric::canonical_f32(self.stack.pop()? as i64 as f32),
            op::F32_CONVERT_I64_U => numeric::canonical_f32(self.stack.pop()? as f32),
            op::F32_DEMOTE_F64 => {
                numeric::canonical_f32(f64::from_bits(self.stack.pop()?) as f32)
            }
            op::F64_CONVERT_I32_S => {
                numeric::canonical_f64(self.stack.pop()? as u32 as i32 as f64)
            }
            op::F64_CONVERT_I32_U => numeric::canonical_f64(self.stack.pop()? as u32 as f64),
            op::F64_CONVERT_I64_S => numeric::canonical_f64(self.stack.pop()? as i64 as f64),
            op::F64_CONVERT_I64_U => numeric::canonical_f64(self.stack.pop()? as f64),
            op::F64_PROMOTE_F32 => {
                numeric::canonical_f64(f32::from_bits(self.stack.pop()? as u32) as f64)
            }
            // Reinterprets keep the bit pattern; the untyped slot already is
            // the bit pattern, so there is nothing to do.
            op::I32_REINTERPRET_F32
            | op::I64_REINTERPRET_F64
            | op::F32_REINTERPRET_I32
            | op::F64_REINTERPRET_I64 => return Ok(()),
            _ => return Err(Trap::UnknownOpcode.into()),
        };
        self.stack.push(v)?;
        Ok(())
    }

    fn exec_sign_extension(&mut self, opcode: u8) -> Result<(), VmError> {
        let v = self.stack.pop()?;
        let r = match opcode {
            op::I32_EXTEND8_S => (v as u8 as i8 as i32) as u32 as u64,
            op::I32_EXTEND16_S => (v as u16 as i16 as i32) as u32 as u64,
            op::I64_EXTEND8_S => (v as u8 as i8 as i64) as u64,
            op::I64_EXTEND16_S => (v as u16 as i16 as i64) as u64,
            op::I64_EXTEND32_S => (v as u32 as i32 as i64) as u64,
            _ => return Err(Trap::UnknownOpcode.into()),
        };
        self.stack.push(r)?;
        Ok(())
    }

    /// Saturating truncations behind the 0xFC prefix: NaN maps to 0,
    /// out-of-range values clamp to the destination bounds.
    fn exec_trunc_sat(&mut self, code: &[u8], ip: &mut usize) -> Result<(), VmError> {
        let sub = read_uleb32(code, ip)?;
        let v = match sub {
            0 => f32::from_bits(self.stack.pop()? as u32) as i32 as u32 as u64,
            1 => f32::from_bits(self.stack.pop()? as u32) as u32 as u64,
            2 => f64::from_bits(self.stack.pop()?) as i32 as u32 as u64,
            3 => f64::from_bits(self.stack.pop()?) as u32 as u64,
            4 => f32::from_bits(self.stack.pop()? as u32) as i64 as u64,
            5 => f32::from_bits(self.stack.pop()? as u32) as u64,
            6 => f64::from_bits(self.stack.pop()?) as i64 as u64,
            7 => f64::from_bits(self.stack.pop()?) as u64,
            _ => return Err(Trap::UnknownOpcode.into()),
        };
        self.stack.push(v)?;
        Ok(())
    }

    /* ----- The loop ----- */

    /// Run until the frame pushed by the caller (and everything it calls)
    /// has popped, then return the single result slot (0 for void).
    pub(crate) fn interpret(&mut self) -> Result<u64, VmError> {
        let module = Arc::clone(&self.module);
        loop {
            let frame = *self.current_frame()?;
            let func = module
                .functions
                .get(frame.fn_idx)
                .ok_or(VmError::FuncNotFound)?;
            let code: &[u8] = match &func.source {
                FuncSource::Local(body) => &body.code,
                FuncSource::Import { .. } => return Err(VmError::FuncNotFound),
            };

            // Implicit return: the ip has passed the body's terminating end.
            if frame.ip >= code.len() {
                let has_result = !func.sig.results.is_empty();
                let mut ret = 0u64;
                if has_result {
                    ret = numeric::cast_value(self.stack.peek()?, func.sig.results[0]);
                }
                self.stack.truncate(frame.base_pointer);
                self.blocks.truncate(frame.base_block_index);
                if has_result {
                    self.stack.push(ret)?;
                }
                self.frames.pop().ok_or(Trap::FrameUnderflow)?;
                self.break_depth = -1;
                if self.frames.is_empty() {
                    return Ok(ret);
                }
                continue;
            }

            let opcode = code[frame.ip];
            let mut ip = frame.ip + 1;

            // While unwinding, everything except a block boundary is
            // fast-forwarded: immediates are consumed, nothing executes.
            if self.inoperative()
                && !matches!(
                    opcode,
                    op::BLOCK | op::LOOP | op::IF | op::ELSE | op::END
                )
            {
                skip_immediates(code, &mut ip, opcode)?;
                self.current_frame_mut()?.ip = ip;
                continue;
            }

            // Charge before executing so a failed charge commits nothing.
            let cost = self.gas_policy.cost_for_op(opcode);
            self.burn_gas(cost)?;

            match opcode {
                op::UNREACHABLE => return Err(Trap::Unreachable.into()),
                op::NOP => {}

                op::BLOCK | op::LOOP => {
                    let rt = read_block_type(code, &mut ip)?;
                    let kind = if opcode == op::BLOCK {
                        BlockKind::Block
                    } else {
                        BlockKind::Loop
                    };
                    self.push_block(Block {
                        label_pointer: ip,
                        kind,
                        return_type: rt,
                        base_pointer: self.stack.sp(),
                        execute_else: false,
                    })?;
                    if self.inoperative() {
                        self.break_depth += 1;
                    }
                }

                op::IF => {
                    let rt = read_block_type(code, &mut ip)?;
                    if self.inoperative() {
                        // Placeholder so the matching end/else attributes to
                        // this nested construct.
                        self.push_block(Block {
                            label_pointer: ip,
                            kind: BlockKind::If,
                            return_type: rt,
                            base_pointer: self.stack.sp(),
                            execute_else: false,
                        })?;
                        self.break_depth += 1;
                    } else {
                        let cond = self.stack.pop()? as u32;
                        self.push_block(Block {
                            label_pointer: ip,
                            kind: BlockKind::If,
                            return_type: rt,
                            base_pointer: self.stack.sp(),
                            execute_else: cond == 0,
                        })?;
                        if cond == 0 {
                            self.break_depth = 0;
                        }
                    }
                }

                op::ELSE => {
                    let block = self.pop_block()?;
                    if block.kind != BlockKind::If {
                        return Err(Trap::NoMatchingIf.into());
                    }
                    self.push_block(Block {
                        label_pointer: block.label_pointer,
                        kind: BlockKind::Else,
                        return_type: block.return_type,
                        base_pointer: block.base_pointer,
                        execute_else: false,
                    })?;
                    if block.execute_else {
                        // The false-condition skip ends here.
                        self.break_depth -= 1;
                    } else if !self.inoperative() {
                        // The then-branch ran; skip the else body.
                        self.break_depth = 0;
                    }
                    // Already unwinding past the whole construct: no change.
                }

                op::END => {
                    let block = self.pop_block()?;
                    let finishing = if self.inoperative() {
                        self.break_depth -= 1;
                        !self.inoperative()
                    } else {
                        true
                    };
                    if finishing {
                        match block.return_type {
                            Some(ty) if self.stack.sp() > block.base_pointer => {
                                let v = numeric::cast_value(self.stack.peek()?, ty);
                                self.stack.truncate(block.base_pointer);
                                self.stack.push(v)?;
                            }
                            Some(_) => {}
                            None => self.stack.truncate(block.base_pointer),
                        }
                    }
                }

                op::BR => {
                    let depth = read_uleb32(code, &mut ip)? as usize;
                    self.current_frame_mut()?.ip = ip;
                    self.block_jump(depth)?;
                    continue;
                }

                op::BR_IF => {
                    let depth = read_uleb32(code, &mut ip)? as usize;
                    self.current_frame_mut()?.ip = ip;
                    let cond = self.stack.pop()? as u32;
                    if cond != 0 {
                        self.block_jump(depth)?;
                    }
                    continue;
                }

                op::BR_TABLE => {
                    let count = read_uleb32(code, &mut ip)? as usize;
                    if count > MAX_BR_TABLE_TARGETS {
                        return Err(Trap::TooManyBrTableTargets.into());
                    }
                    let mut targets = Vec::with_capacity(count);
                    for _ in 0..count {
                        targets.push(read_uleb32(code, &mut ip)? as usize);
                    }
                    let default = read_uleb32(code, &mut ip)? as usize;
                    self.current_frame_mut()?.ip = ip;
                    let idx = self.stack.pop()? as u32 as usize;
                    let depth = targets.get(idx).copied().unwrap_or(default);
                    self.block_jump(depth)?;
                    continue;
                }

                op::RETURN => {
                    // Branch to the function boundary: park the ip past the
                    // body and let the frame-pop path settle the result.
                    self.current_frame_mut()?.ip = code.len();
                    continue;
                }

                op::CALL => {
                    let fidx = read_uleb32(code, &mut ip)? as usize;
                    self.current_frame_mut()?.ip = ip;
                    self.invoke_function(fidx)?;
                    continue;
                }

                op::CALL_INDIRECT => {
                    let type_idx = read_uleb32(code, &mut ip)? as usize;
                    let _table = read_u8_imm(code, &mut ip)?;
                    self.current_frame_mut()?.ip = ip;
                    let elem_idx = self.stack.pop()? as u32 as usize;
                    let fidx = module
                        .table_elems
                        .get(elem_idx)
                        .copied()
                        .flatten()
                        .ok_or(Trap::OutOfBoundsTableAccess)? as usize;
                    let expected = module
                        .types
                        .get(type_idx)
                        .ok_or(Trap::IndirectCallTypeMismatch)?;
                    let callee = module
                        .functions
                        .get(fidx)
                        .ok_or(VmError::FuncNotFound)?;
                    if &callee.sig != expected {
                        return Err(Trap::IndirectCallTypeMismatch.into());
                    }
                    self.invoke_function(fidx)?;
                    continue;
                }

                op::DROP => {
                    self.stack.pop()?;
                }

                op::SELECT => {
                    let cond = self.stack.pop()? as u32;
                    let second = self.stack.pop()?;
                    let first = self.stack.pop()?;
                    self.stack.push(if cond != 0 { first } else { second })?;
                }

                op::GET_LOCAL => {
                    let idx = read_uleb32(code, &mut ip)? as usize;
                    let v = self.stack.get(frame.base_pointer + idx)?;
                    self.stack.push(v)?;
                }

                op::SET_LOCAL => {
                    let idx = read_uleb32(code, &mut ip)? as usize;
                    let v = self.stack.pop()?;
                    self.stack.set(frame.base_pointer + idx, v)?;
                }

                op::TEE_LOCAL => {
                    let idx = read_uleb32(code, &mut ip)? as usize;
                    let v = self.stack.peek()?;
                    self.stack.set(frame.base_pointer + idx, v)?;
                }

                op::GET_GLOBAL => {
                    let idx = read_uleb32(code, &mut ip)? as usize;
                    let v = self
                        .globals
                        .get(idx)
                        .copied()
                        .ok_or(Trap::OutOfBoundsMemoryAccess)?;
                    self.stack.push(v)?;
                }

                op::SET_GLOBAL => {
                    let idx = read_uleb32(code, &mut ip)? as usize;
                    let v = self.stack.pop()?;
                    let slot = self
                        .globals
                        .get_mut(idx)
                        .ok_or(Trap::OutOfBoundsMemoryAccess)?;
                    *slot = v;
                }

                op::I32_LOAD..=op::I64_LOAD32_U => self.exec_load(opcode, code, &mut ip)?,
                op::I32_STORE..=op::I64_STORE32 => self.exec_store(opcode, code, &mut ip)?,

                op::MEMORY_SIZE => {
                    let _reserved = read_u8_imm(code, &mut ip)?;
                    self.stack.push((self.memory.len() / PAGE_SIZE) as u64)?;
                }

                op::MEMORY_GROW => {
                    let _reserved = read_u8_imm(code, &mut ip)?;
                    let delta = self.stack.pop()? as u32;
                    match self.grow_memory(delta)? {
                        Some(prev) => self.stack.push(prev as u64)?,
                        None => self.stack.push(0xFFFF_FFFF)?,
                    }
                }

                op::I32_CONST => {
                    let v = read_sleb32(code, &mut ip)?;
                    self.stack.push(v as u32 as u64)?;
                }
                op::I64_CONST => {
                    let v = read_sleb64(code, &mut ip)?;
                    self.stack.push(v as u64)?;
                }
                op::F32_CONST => {
                    let bits = read_f32_imm(code, &mut ip)?;
                    self.stack.push(bits as u64)?;
                }
                op::F64_CONST => {
                    let bits = read_f64_imm(code, &mut ip)?;
                    self.stack.push(bits)?;
                }

                op::I32_EQZ..=op::I32_GE_U => self.exec_i32_cmp(opcode)?,
                op::I64_EQZ..=op::I64_GE_U => self.exec_i64_cmp(opcode)?,
                op::F32_EQ..=op::F32_GE => self.exec_f32_cmp(opcode)?,
                op::F64_EQ..=op::F64_GE => self.exec_f64_cmp(opcode)?,
                op::I32_CLZ..=op::I32_ROTR => self.exec_i32_arith(opcode)?,
                op::I64_CLZ..=op::I64_ROTR => self.exec_i64_arith(opcode)?,
                op::F32_ABS..=op::F32_COPYSIGN => self.exec_f32_arith(opcode)?,
                op::F64_ABS..=op::F64_COPYSIGN => self.exec_f64_arith(opcode)?,
                op::I32_WRAP_I64..=op::F64_REINTERPRET_I64 => self.exec_conversion(opcode)?,
                op::I32_EXTEND8_S..=op::I64_EXTEND32_S => self.exec_sign_extension(opcode)?,
                op::PREFIX_FC => self.exec_trunc_sat(code, &mut ip)?,

                _ => return Err(Trap::UnknownOpcode.into()),
            }

            self.current_frame_mut()?.ip = ip;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uleb_reader_advances_ip() {
        let code = [0xE5, 0x8E, 0x26, 0x0B];
        let mut ip = 0;
        assert_eq!(read_uleb32(&code, &mut ip).unwrap(), 624485);
        assert_eq!(ip, 3);
    }

    #[test]
    fn skip_crosses_br_table_vector() {
        // br_table with 3 targets + default, then a trailing byte.
        let code = [0x03, 0x00, 0x01, 0x02, 0x00, 0xAA];
        let mut ip = 0;
        skip_immediates(&code, &mut ip, op::BR_TABLE).unwrap();
        assert_eq!(ip, 5);
    }

    #[test]
    fn skip_crosses_memarg_and_call_indirect() {
        let code = [0x02, 0x10, /* call_indirect: */ 0x01, 0x00];
        let mut ip = 0;
        skip_immediates(&code, &mut ip, op::I32_LOAD).unwrap();
        assert_eq!(ip, 2);
        skip_immediates(&code, &mut ip, op::CALL_INDIRECT).unwrap();
        assert_eq!(ip, 4);
    }

    #[test]
    fn skip_truncated_immediate_traps() {
        let code = [0x80]; // unfinished LEB
        let mut ip = 0;
        assert!(skip_immediates(&code, &mut ip, op::I32_CONST).is_err());
    }
}
