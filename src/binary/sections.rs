//! Section-level module parser: section ids and ordering, payload decoders,
//! and the index-space resolution that turns raw sections into a `Module`.

use std::collections::HashMap;

use super::{
    cursor::Cursor,
    leb128,
    reader::{read_len_prefixed_bytes, read_name, read_vec},
    DecodeError, Result,
};
use crate::model::{
    DataSegment, Export, ExportKind, FuncBody, FuncSource, FuncType, Function, GlobalType,
    GlobalVar, Import, ImportKind, Limits, LocalDecl, MemoryType, Module, TableType, ValType,
};

/// Wasm magic bytes `\0asm`, little-endian.
const MAGIC: u32 = 0x6D73_6100;
/// Binary format version 1.
const VERSION: u32 = 0x0000_0001;

/// Standard section identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionId {
    Custom = 0,
    Type = 1,
    Import = 2,
    Function = 3,
    Table = 4,
    Memory = 5,
    Global = 6,
    Export = 7,
    Start = 8,
    Element = 9,
    Code = 10,
    Data = 11,
}

impl SectionId {
    pub fn from_byte(b: u8) -> Option<Self> {
        Some(match b {
            0 => SectionId::Custom,
            1 => SectionId::Type,
            2 => SectionId::Import,
            3 => SectionId::Function,
            4 => SectionId::Table,
            5 => SectionId::Memory,
            6 => SectionId::Global,
            7 => SectionId::Export,
            8 => SectionId::Start,
            9 => SectionId::Element,
            10 => SectionId::Code,
            11 => SectionId::Data,
            _ => return None,
        })
    }
}

/* ---------- Type decoding helpers ---------- */

fn read_val_type(cur: &mut Cursor) -> Result<ValType> {
    let b = cur.read_u8()?;
    ValType::from_byte(b).ok_or(DecodeError::Malformed {
        offset: cur.offset(),
        msg: "invalid value type",
    })
}

fn read_limits(cur: &mut Cursor) -> Result<Limits> {
    let flag = cur.read_u8()?;
    match flag {
        0x00 => {
            let min = leb128::read_uleb_u32(cur)?;
            Ok(Limits { min, max: None })
        }
        0x01 => {
            let min = leb128::read_uleb_u32(cur)?;
            let max = leb128::read_uleb_u32(cur)?;
            if max < min {
                return Err(DecodeError::Malformed {
                    offset: cur.offset(),
                    msg: "limits max < min",
                });
            }
            Ok(Limits {
                min,
                max: Some(max),
            })
        }
        _ => Err(DecodeError::Malformed {
            offset: cur.offset(),
            msg: "invalid limits flag",
        }),
    }
}

fn read_func_type(cur: &mut Cursor) -> Result<FuncType> {
    let form = cur.read_u8()?;
    if form != 0x60 {
        return Err(DecodeError::Malformed {
            offset: cur.offset(),
            msg: "expected functype (0x60)",
        });
    }
    let params = read_vec(cur, read_val_type)?;
    let results = read_vec(cur, read_val_type)?;
    if results.len() > 1 {
        return Err(DecodeError::Malformed {
            offset: cur.offset(),
            msg: "MVP allows at most one result",
        });
    }
    Ok(FuncType { params, results })
}

fn read_table_type(cur: &mut Cursor) -> Result<TableType> {
    let elem = cur.read_u8()?;
    if elem != 0x70 {
        return Err(DecodeError::Malformed {
            offset: cur.offset(),
            msg: "invalid table element type (expected funcref)",
        });
    }
    let limits = read_limits(cur)?;
    Ok(TableType { limits })
}

fn read_memory_type(cur: &mut Cursor) -> Result<MemoryType> {
    let limits = read_limits(cur)?;
    if limits.min > crate::vm::MAX_PAGES {
        return Err(DecodeError::Malformed {
            offset: cur.offset(),
            msg: "memory minimum exceeds page cap",
        });
    }
    if let Some(max) = limits.max {
        if max > crate::vm::MAX_PAGES {
            return Err(DecodeError::Malformed {
                offset: cur.offset(),
                msg: "memory maximum exceeds page cap",
            });
        }
    }
    Ok(MemoryType { limits })
}

fn read_global_type(cur: &mut Cursor) -> Result<GlobalType> {
    let val_type = read_val_type(cur)?;
    let mutable = match cur.read_u8()? {
        0x00 => false,
        0x01 => true,
        _ => {
            return Err(DecodeError::Malformed {
                offset: cur.offset(),
                msg: "invalid mutability flag",
            })
        }
    };
    Ok(GlobalType { val_type, mutable })
}

/// Parse and evaluate a constant initializer expression. Only the five
/// constant opcodes plus the terminating `end` are admitted; `get_global`
/// may reference only globals declared earlier.
fn read_init_expr(cur: &mut Cursor, globals: &[GlobalVar]) -> Result<(u64, ValType)> {
    let mut last: Option<(u64, ValType)> = None;
    loop {
        let op = cur.read_u8()?;
        match op {
            0x41 => {
                let v = leb128::read_sleb_i32(cur)?;
                last = Some((v as u32 as u64, ValType::I32));
            }
            0x42 => {
                let v = leb128::read_sleb_i64(cur)?;
                last = Some((v as u64, ValType::I64));
            }
            0x43 => {
                let bits = cur.read_u32_le()?;
                last = Some((bits as u64, ValType::F32));
            }
            0x44 => {
                let bits = cur.read_u64_le()?;
                last = Some((bits, ValType::F64));
            }
            0x23 => {
                let idx = leb128::read_uleb_u32(cur)?;
                let g = globals
                    .get(idx as usize)
                    .ok_or(DecodeError::IndexOutOfRange {
                        context: "get_global in initializer",
                        index: idx,
                    })?;
                last = Some((g.init, g.ty.val_type));
            }
            0x0B => break,
            _ => {
                return Err(DecodeError::Malformed {
                    offset: cur.offset(),
                    msg: "invalid initializer opcode",
                })
            }
        }
    }
    last.ok_or(DecodeError::Malformed {
        offset: cur.offset(),
        msg: "empty initializer expression",
    })
}

fn read_i32_offset(cur: &mut Cursor, globals: &[GlobalVar], what: &'static str) -> Result<u32> {
    let (bits, ty) = read_init_expr(cur, globals)?;
    if ty != ValType::I32 {
        return Err(DecodeError::Malformed {
            offset: cur.offset(),
            msg: what,
        });
    }
    Ok(bits as u32)
}

/* ---------- Section payload readers ---------- */

fn read_import_section(cur: &mut Cursor) -> Result<Vec<Import>> {
    read_vec(cur, |c| {
        let module = read_name(c)?;
        let field = read_name(c)?;
        let kind = match c.read_u8()? {
            0x00 => ImportKind::Func {
                type_idx: leb128::read_uleb_u32(c)?,
            },
            0x01 => ImportKind::Table(read_table_type(c)?),
            0x02 => ImportKind::Memory(read_memory_type(c)?),
            0x03 => ImportKind::Global(read_global_type(c)?),
            _ => {
                return Err(DecodeError::Malformed {
                    offset: c.offset(),
                    msg: "invalid import kind",
                })
            }
        };
        Ok(Import {
            module,
            field,
            kind,
        })
    })
}

fn read_export_section(cur: &mut Cursor) -> Result<HashMap<String, Export>> {
    let count = leb128::read_uleb_u32(cur)? as usize;
    let mut out = HashMap::with_capacity(count.min(1024));
    for _ in 0..count {
        let name = read_name(cur)?;
        let kind_byte = cur.read_u8()?;
        let kind = ExportKind::from_byte(kind_byte).ok_or(DecodeError::Malformed {
            offset: cur.offset(),
            msg: "invalid export kind",
        })?;
        let index = leb128::read_uleb_u32(cur)?;
        out.insert(name, Export { kind, index });
    }
    Ok(out)
}

fn read_code_entry(cur: &mut Cursor) -> Result<FuncBody> {
    let body_size = leb128::read_uleb_u32(cur)? as usize;
    let body_bytes = cur.read_bytes(body_size)?;
    let mut sub = Cursor::new(body_bytes);

    let locals = read_vec(&mut sub, |c| {
        let count = leb128::read_uleb_u32(c)?;
        let val_type = read_val_type(c)?;
        Ok(LocalDecl { count, val_type })
    })?;

    let rest = sub.remaining();
    if rest == 0 {
        return Err(DecodeError::Malformed {
            offset: sub.offset(),
            msg: "missing function end",
        });
    }
    let code_with_end = sub.read_bytes(rest)?;
    if code_with_end[rest - 1] != 0x0B {
        return Err(DecodeError::Malformed {
            offset: sub.offset(),
            msg: "missing function end",
        });
    }
    // The terminating `end` is dropped: the interpreter's implicit-return
    // check is "instruction pointer past the stored bytes".
    Ok(FuncBody {
        locals,
        code: code_with_end[..rest - 1].to_vec(),
    })
}

/* ---------- Top-level parser ---------- */

/// Parse a complete binary module and resolve its index spaces.
pub fn parse_module(bytes: &[u8]) -> Result<Module> {
    let mut cur = Cursor::new(bytes);

    if cur.read_u32_le().map_err(|_| DecodeError::InvalidMagic)? != MAGIC {
        return Err(DecodeError::InvalidMagic);
    }
    if cur.read_u32_le().map_err(|_| DecodeError::InvalidVersion)? != VERSION {
        return Err(DecodeError::InvalidVersion);
    }

    let mut types: Vec<FuncType> = Vec::new();
    let mut imports: Vec<Import> = Vec::new();
    let mut func_type_indices: Vec<u32> = Vec::new();
    let mut tables: Vec<TableType> = Vec::new();
    let mut memories: Vec<MemoryType> = Vec::new();
    let mut globals: Vec<GlobalVar> = Vec::new();
    let mut exports: HashMap<String, Export> = HashMap::new();
    let mut start: Option<u32> = None;
    let mut elements: Vec<(u32, u32, Vec<u32>)> = Vec::new();
    let mut codes: Vec<FuncBody> = Vec::new();
    let mut data: Vec<DataSegment> = Vec::new();
    let mut custom_sections: Vec<String> = Vec::new();

    let mut last_id: u8 = 0;
    while !cur.is_eof() {
        let id_byte = cur.read_u8()?;
        let id = SectionId::from_byte(id_byte)
            .ok_or(DecodeError::UnknownSectionId { id: id_byte })?;
        let payload_len = leb128::read_uleb_u32(&mut cur)? as usize;
        let payload = cur.read_bytes(payload_len)?;
        let mut pcur = Cursor::new(payload);

        if id == SectionId::Custom {
            custom_sections.push(read_name(&mut pcur)?);
            // The payload after the name is opaque; skip it.
            pcur.skip(pcur.remaining())?;
            continue;
        }

        // Standard sections occur at most once, in increasing id order.
        if id_byte == last_id {
            return Err(DecodeError::DuplicateSection { id: id_byte });
        }
        if id_byte < last_id {
            return Err(DecodeError::SectionOutOfOrder { id: id_byte });
        }
        last_id = id_byte;

        match id {
            SectionId::Type => types = read_vec(&mut pcur, read_func_type)?,
            SectionId::Import => imports = read_import_section(&mut pcur)?,
            SectionId::Function => {
                func_type_indices = read_vec(&mut pcur, leb128::read_uleb_u32)?
            }
            SectionId::Table => {
                tables = read_vec(&mut pcur, read_table_type)?;
                if tables.len() > 1 {
                    return Err(DecodeError::Malformed {
                        offset: pcur.offset(),
                        msg: "multiple tables not supported in MVP",
                    });
                }
            }
            SectionId::Memory => {
                memories = read_vec(&mut pcur, read_memory_type)?;
                if memories.len() > 1 {
                    return Err(DecodeError::Malformed {
                        offset: pcur.offset(),
                        msg: "multiple memories not supported in MVP",
                    });
                }
            }
            SectionId::Global => {
                let count = leb128::read_uleb_u32(&mut pcur)? as usize;
                for _ in 0..count {
                    let ty = read_global_type(&mut pcur)?;
                    let (init, init_ty) = read_init_expr(&mut pcur, &globals)?;
                    if init_ty != ty.val_type {
                        return Err(DecodeError::Malformed {
                            offset: pcur.offset(),
                            msg: "global initializer type mismatch",
                        });
                    }
                    globals.push(GlobalVar { ty, init });
                }
            }
            SectionId::Export => exports = read_export_section(&mut pcur)?,
            SectionId::Start => start = Some(leb128::read_uleb_u32(&mut pcur)?),
            SectionId::Element => {
                let count = leb128::read_uleb_u32(&mut pcur)? as usize;
                for _ in 0..count {
                    let table_idx = leb128::read_uleb_u32(&mut pcur)?;
                    let offset =
                        read_i32_offset(&mut pcur, &globals, "table offset must be i32")?;
                    let funcs = read_vec(&mut pcur, leb128::read_uleb_u32)?;
                    elements.push((table_idx, offset, funcs));
                }
            }
            SectionId::Code => codes = read_vec(&mut pcur, read_code_entry)?,
            SectionId::Data => {
                let count = leb128::read_uleb_u32(&mut pcur)? as usize;
                for _ in 0..count {
                    let mem_idx = leb128::read_uleb_u32(&mut pcur)?;
                    if mem_idx != 0 {
                        return Err(DecodeError::IndexOutOfRange {
                            context: "data segment memory index",
                            index: mem_idx,
                        });
                    }
                    let offset =
                        read_i32_offset(&mut pcur, &globals, "data offset must be i32")?;
                    let init = read_len_prefixed_bytes(&mut pcur)?;
                    data.push(DataSegment { offset, init });
                }
            }
            SectionId::Custom => unreachable!(),
        }

        if pcur.remaining() != 0 {
            return Err(DecodeError::Malformed {
                offset: pcur.offset(),
                msg: "section payload not fully consumed",
            });
        }
    }

    /* ----- Index-space resolution ----- */

    // Functions: imports first, then defined functions.
    let mut functions: Vec<Function> = Vec::new();
    for imp in &imports {
        if let ImportKind::Func { type_idx } = imp.kind {
            let sig = types
                .get(type_idx as usize)
                .ok_or(DecodeError::IndexOutOfRange {
                    context: "import type index",
                    index: type_idx,
                })?
                .clone();
            functions.push(Function {
                sig,
                source: FuncSource::Import {
                    module: imp.module.clone(),
                    field: imp.field.clone(),
                },
            });
        }
    }
    if func_type_indices.len() != codes.len() {
        return Err(DecodeError::Malformed {
            offset: bytes.len(),
            msg: "function and code section length mismatch",
        });
    }
    for (type_idx, body) in func_type_indices.iter().zip(codes.into_iter()) {
        let sig = types
            .get(*type_idx as usize)
            .ok_or(DecodeError::IndexOutOfRange {
                context: "function type index",
                index: *type_idx,
            })?
            .clone();
        functions.push(Function {
            sig,
            source: FuncSource::Local(body),
        });
    }

    // Table: apply element segments at their resolved offsets.
    let table = tables.first().copied();
    let mut table_elems: Vec<Option<u32>> =
        vec![None; table.map(|t| t.limits.min as usize).unwrap_or(0)];
    for (table_idx, offset, funcs) in elements {
        if table_idx != 0 || table.is_none() {
            return Err(DecodeError::IndexOutOfRange {
                context: "element table index",
                index: table_idx,
            });
        }
        let end = offset as u64 + funcs.len() as u64;
        if end > table_elems.len() as u64 {
            return Err(DecodeError::ElementPlacementOverflow);
        }
        for (i, fidx) in funcs.into_iter().enumerate() {
            if fidx as usize >= functions.len() {
                return Err(DecodeError::IndexOutOfRange {
                    context: "element function index",
                    index: fidx,
                });
            }
            table_elems[offset as usize + i] = Some(fidx);
        }
    }

    // Export and start indices must land inside their index spaces.
    for export in exports.values() {
        let (space, len) = match export.kind {
            ExportKind::Func => ("export function index", functions.len()),
            ExportKind::Table => ("export table index", tables.len()),
            ExportKind::Memory => ("export memory index", memories.len()),
            ExportKind::Global => ("export global index", globals.len()),
        };
        if export.index as usize >= len {
            return Err(DecodeError::IndexOutOfRange {
                context: space,
                index: export.index,
            });
        }
    }
    if let Some(idx) = start {
        if idx as usize >= functions.len() {
            return Err(DecodeError::IndexOutOfRange {
                context: "start function index",
                index: idx,
            });
        }
    }

    Ok(Module {
        types,
        imports,
        functions,
        table,
        table_elems,
        memory: memories.first().copied(),
        globals,
        exports,
        start,
        data,
        custom_sections,
    })
}
