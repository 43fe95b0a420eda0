//! Shared test support: a minimal Wasm binary encoder, a host resolver, and
//! canned modules reused across the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use wasmeter::{
    FreeGasPolicy, Gas, GasPolicy, HostFunction, ImportResolver, Instance, Module, Trap, VmError,
};

pub const I32: u8 = 0x7F;
pub const I64: u8 = 0x7E;
pub const F32: u8 = 0x7D;
pub const F64: u8 = 0x7C;

/// Unsigned LEB128 encoding.
pub fn uleb(mut v: u64) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let mut b = (v & 0x7F) as u8;
        v >>= 7;
        if v != 0 {
            b |= 0x80;
        }
        out.push(b);
        if v == 0 {
            break;
        }
    }
    out
}

/// Signed LEB128 encoding.
pub fn sleb(mut v: i64) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let b = (v & 0x7F) as u8;
        v >>= 7;
        let sign = b & 0x40 != 0;
        let done = (v == 0 && !sign) || (v == -1 && sign);
        out.push(if done { b } else { b | 0x80 });
        if done {
            break;
        }
    }
    out
}

/// Builds Wasm binaries section by section, in the prescribed order.
#[derive(Default)]
pub struct ModuleBuilder {
    types: Vec<Vec<u8>>,
    imports: Vec<Vec<u8>>,
    func_types: Vec<u32>,
    table_min: Option<u32>,
    memory: Option<(u32, Option<u32>)>,
    globals: Vec<Vec<u8>>,
    exports: Vec<Vec<u8>>,
    start: Option<u32>,
    elements: Vec<Vec<u8>>,
    codes: Vec<Vec<u8>>,
    data: Vec<Vec<u8>>,
}

impl ModuleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_type(&mut self, params: &[u8], results: &[u8]) -> u32 {
        let mut e = vec![0x60];
        e.extend(uleb(params.len() as u64));
        e.extend_from_slice(params);
        e.extend(uleb(results.len() as u64));
        e.extend_from_slice(results);
        self.types.push(e);
        (self.types.len() - 1) as u32
    }

    pub fn import_func(&mut self, module: &str, field: &str, type_idx: u32) {
        let mut e = Vec::new();
        e.extend(uleb(module.len() as u64));
        e.extend_from_slice(module.as_bytes());
        e.extend(uleb(field.len() as u64));
        e.extend_from_slice(field.as_bytes());
        e.push(0x00);
        e.extend(uleb(type_idx as u64));
        self.imports.push(e);
    }

    /// Add a defined function; `body` carries the instruction bytes without
    /// the terminating `end`, which is appended here.
    pub fn add_func(&mut self, type_idx: u32, locals: &[(u32, u8)], body: &[u8]) {
        self.func_types.push(type_idx);
        let mut inner = Vec::new();
        inner.extend(uleb(locals.len() as u64));
        for (count, ty) in locals {
            inner.extend(uleb(*count as u64));
            inner.push(*ty);
        }
        inner.extend_from_slice(body);
        inner.push(0x0B);
        let mut e = uleb(inner.len() as u64);
        e.extend(inner);
        self.codes.push(e);
    }

    pub fn table(&mut self, min: u32) {
        self.table_min = Some(min);
    }

    pub fn memory(&mut self, min: u32, max: Option<u32>) {
        self.memory = Some((min, max));
    }

    pub fn add_global(&mut self, val_type: u8, mutable: bool, init_expr: &[u8]) {
        let mut e = vec![val_type, mutable as u8];
        e.extend_from_slice(init_expr);
        e.push(0x0B);
        self.globals.push(e);
    }

    pub fn export(&mut self, name: &str, kind: u8, idx: u32) {
        let mut e = Vec::new();
        e.extend(uleb(name.len() as u64));
        e.extend_from_slice(name.as_bytes());
        e.push(kind);
        e.extend(uleb(idx as u64));
        self.exports.push(e);
    }

    pub fn export_func(&mut self, name: &str, idx: u32) {
        self.export(name, 0x00, idx);
    }

    pub fn start(&mut self, idx: u32) {
        self.start = Some(idx);
    }

    pub fn elem(&mut self, offset: u32, funcs: &[u32]) {
        let mut e = vec![0x00, 0x41];
        e.extend(sleb(offset as i64));
        e.push(0x0B);
        e.extend(uleb(funcs.len() as u64));
        for f in funcs {
            e.extend(uleb(*f as u64));
        }
        self.elements.push(e);
    }

    pub fn data(&mut self, offset: u32, bytes: &[u8]) {
        let mut e = vec![0x00, 0x41];
        e.extend(sleb(offset as i64));
        e.push(0x0B);
        e.extend(uleb(bytes.len() as u64));
        e.extend_from_slice(bytes);
        self.data.push(e);
    }

    pub fn build(&self) -> Vec<u8> {
        fn section(out: &mut Vec<u8>, id: u8, payload: &[u8]) {
            out.push(id);
            out.extend(uleb(payload.len() as u64));
            out.extend_from_slice(payload);
        }
        fn entries(list: &[Vec<u8>]) -> Vec<u8> {
            let mut p = uleb(list.len() as u64);
            for e in list {
                p.extend_from_slice(e);
            }
            p
        }

        let mut out = vec![0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00];
        if !self.types.is_empty() {
            section(&mut out, 1, &entries(&self.types));
        }
        if !self.imports.is_empty() {
            section(&mut out, 2, &entries(&self.imports));
        }
        if !self.func_types.is_empty() {
            let mut p = uleb(self.func_types.len() as u64);
            for t in &self.func_types {
                p.extend(uleb(*t as u64));
            }
            section(&mut out, 3, &p);
        }
        if let Some(min) = self.table_min {
            let mut p = vec![0x01, 0x70, 0x00];
            p.extend(uleb(min as u64));
            section(&mut out, 4, &p);
        }
        if let Some((min, max)) = self.memory {
            let mut p = vec![0x01];
            match max {
                Some(max) => {
                    p.push(0x01);
                    p.extend(uleb(min as u64));
                    p.extend(uleb(max as u64));
                }
                None => {
                    p.push(0x00);
                    p.extend(uleb(min as u64));
                }
            }
            section(&mut out, 5, &p);
        }
        if !self.globals.is_empty() {
            section(&mut out, 6, &entries(&self.globals));
        }
        if !self.exports.is_empty() {
            section(&mut out, 7, &entries(&self.exports));
        }
        if let Some(idx) = self.start {
            section(&mut out, 8, &uleb(idx as u64));
        }
        if !self.elements.is_empty() {
            section(&mut out, 9, &entries(&self.elements));
        }
        if !self.codes.is_empty() {
            section(&mut out, 10, &entries(&self.codes));
        }
        if !self.data.is_empty() {
            section(&mut out, 11, &entries(&self.data));
        }
        out
    }
}

/* ----- Host resolver ----- */

fn host(
    f: impl Fn(&mut Instance, &[u64]) -> Result<u64, Trap> + Send + Sync + 'static,
) -> Arc<HostFunction> {
    Arc::new(f)
}

/// Resolver covering every import the test modules declare.
pub struct TestResolver;

impl ImportResolver for TestResolver {
    fn get_function(&self, module: &str, field: &str) -> Option<Arc<HostFunction>> {
        match (module, field) {
            ("env", "add") => Some(host(|_vm, args| Ok(args[0].wrapping_add(args[1])))),
            ("env", "boom") => Some(host(|_vm, _args| Err(Trap::Unreachable))),
            ("env", "sum_mem") => Some(host(|vm, args| {
                let ptr = args[0] as usize;
                let len = args[1] as usize;
                let mut buf = vec![0u8; len];
                let (n, _short) = vm.mem_read(&mut buf, ptr);
                Ok(buf[..n].iter().map(|&b| b as u64).sum())
            })),
            _ => None,
        }
    }
}

/* ----- Instance helpers ----- */

pub fn instance(bytes: &[u8]) -> Instance {
    instance_with_gas(bytes, Box::new(FreeGasPolicy), Gas::new(0)).expect("instantiation failed")
}

pub fn instance_with_gas(
    bytes: &[u8],
    policy: Box<dyn GasPolicy>,
    gas: Gas,
) -> Result<Instance, VmError> {
    let module = Arc::new(Module::decode(bytes).expect("decode failed"));
    Instance::new(module, policy, gas, &TestResolver)
}

pub fn invoke_named(vm: &mut Instance, name: &str, args: &[u64]) -> Result<u64, VmError> {
    let idx = vm
        .function_index(name)
        .unwrap_or_else(|| panic!("export {name} not found"));
    vm.invoke(idx, args)
}

/* ----- Canned modules ----- */

/// `calc() -> i32` returning −1.
pub fn calc_module() -> Vec<u8> {
    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[], &[I32]);
    b.add_func(t, &[], &[0x41, 0x7F]); // i32.const -1
    b.export_func("calc", 0);
    b.build()
}

/// `isPrime(n: i32) -> i32`: 2 if divisible by two, 3 if by three, 1 if
/// prime, 0 otherwise (trial division by odd candidates).
pub fn is_prime_module() -> Vec<u8> {
    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[I32], &[I32]);
    #[rustfmt::skip]
    let body = [
        0x20, 0x00,             // local.get n
        0x41, 0x02,             // i32.const 2
        0x70,                   // i32.rem_u
        0x45,                   // i32.eqz
        0x04, 0x40,             // if
        0x41, 0x02,             //   i32.const 2
        0x0F,                   //   return
        0x0B,                   // end
        0x20, 0x00,             // local.get n
        0x41, 0x03,             // i32.const 3
        0x70,                   // i32.rem_u
        0x45,                   // i32.eqz
        0x04, 0x40,             // if
        0x41, 0x03,             //   i32.const 3
        0x0F,                   //   return
        0x0B,                   // end
        0x41, 0x05,             // i32.const 5
        0x21, 0x01,             // local.set i
        0x02, 0x40,             // block
        0x03, 0x40,             //   loop
        0x20, 0x01,             //     local.get i
        0x20, 0x01,             //     local.get i
        0x6C,                   //     i32.mul
        0x20, 0x00,             //     local.get n
        0x4B,                   //     i32.gt_u
        0x0D, 0x01,             //     br_if 1  (i*i > n: done)
        0x20, 0x00,             //     local.get n
        0x20, 0x01,             //     local.get i
        0x70,                   //     i32.rem_u
        0x45,                   //     i32.eqz
        0x04, 0x40,             //     if
        0x41, 0x00,             //       i32.const 0
        0x0F,                   //       return
        0x0B,                   //     end
        0x20, 0x01,             //     local.get i
        0x41, 0x02,             //     i32.const 2
        0x6A,                   //     i32.add
        0x21, 0x01,             //     local.set i
        0x0C, 0x00,             //     br 0  (continue loop)
        0x0B,                   //   end loop
        0x0B,                   // end block
        0x41, 0x01,             // i32.const 1
    ];
    b.add_func(t, &[(1, I32)], &body);
    b.export_func("isPrime", 0);
    b.build()
}

/// `(memory 1 3)` with `grow() -> ()` growing by two pages.
pub fn memory_grow_module() -> Vec<u8> {
    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[], &[]);
    b.memory(1, Some(3));
    b.add_func(t, &[], &[0x41, 0x02, 0x40, 0x00, 0x1A]); // i32.const 2; memory.grow; drop
    b.export_func("grow", 0);
    b.build()
}
