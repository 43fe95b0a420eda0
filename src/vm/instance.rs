//! Per-execution state materialized from a module: linear memory, globals,
//! the three fixed-size stacks, the gas counter, and resolved host imports.

use std::sync::Arc;

use crate::error::{Trap, VmError};
use crate::host::{HostFunction, ImportResolver};
use crate::model::{Export, ExportKind, Module};
use crate::vm::frame::{Block, Frame};
use crate::vm::gas::{Gas, GasPolicy};
use crate::vm::stack::ValueStack;
use crate::vm::{MAX_PAGES, PAGE_SIZE};

/// An executable materialization of a module. Exclusive to one caller for the
/// duration of each `invoke`; the module itself may be shared across
/// instances.
pub struct Instance {
    pub(crate) module: Arc<Module>,
    pub(crate) stack: ValueStack,
    pub(crate) frames: Vec<Frame>,
    pub(crate) blocks: Vec<Block>,
    /// −1 while executing; ≥ 0 while unwinding that many enclosing blocks.
    pub(crate) break_depth: isize,
    pub(crate) globals: Vec<u64>,
    pub(crate) memory: Vec<u8>,
    pub(crate) gas: Gas,
    pub(crate) gas_policy: Box<dyn GasPolicy>,
    /// Parallel to the function index space: `Some` for resolved imports.
    pub(crate) host_functions: Vec<Option<Arc<HostFunction>>>,
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("module", &self.module)
            .field("stack", &self.stack)
            .field("frames", &self.frames)
            .field("blocks", &self.blocks)
            .field("break_depth", &self.break_depth)
            .field("globals", &self.globals)
            .field("memory_len", &self.memory.len())
            .field("gas", &self.gas)
            .field("host_functions_count", &self.host_functions.len())
            .finish()
    }
}

impl Instance {
    /// Materialize an instance: allocate and initialize linear memory
    /// (charging the gas policy for the initial pages before touching them),
    /// resolve function imports, and run the start function if one is
    /// declared. The gas counter may arrive pre-consumed; a budget already
    /// insufficient for the initial allocation fails here.
    pub fn new(
        module: Arc<Module>,
        gas_policy: Box<dyn GasPolicy>,
        gas: Gas,
        resolver: &dyn ImportResolver,
    ) -> Result<Self, VmError> {
        let globals = module.globals.iter().map(|g| g.init).collect();
        let mut vm = Instance {
            module: Arc::clone(&module),
            stack: ValueStack::new(),
            frames: Vec::new(),
            blocks: Vec::new(),
            break_depth: -1,
            globals,
            memory: Vec::new(),
            gas,
            gas_policy,
            host_functions: Vec::new(),
        };

        let min_pages = module.min_pages();
        if min_pages > 0 {
            let cost = vm.gas_policy.cost_for_malloc(min_pages);
            vm.burn_gas(cost)?;
            vm.memory = vec![0u8; min_pages as usize * PAGE_SIZE];
        }
        for seg in &module.data {
            let end = seg.offset as u64 + seg.init.len() as u64;
            if end > vm.memory.len() as u64 {
                return Err(Trap::OutOfBoundsMemoryAccess.into());
            }
            vm.memory[seg.offset as usize..end as usize].copy_from_slice(&seg.init);
        }

        for func in &module.functions {
            match &func.source {
                crate::model::FuncSource::Import { module: m, field } => {
                    let resolved = resolver.get_function(m, field).ok_or_else(|| {
                        VmError::UnresolvedImport {
                            module: m.clone(),
                            field: field.clone(),
                        }
                    })?;
                    vm.host_functions.push(Some(resolved));
                }
                crate::model::FuncSource::Local(_) => vm.host_functions.push(None),
            }
        }

        if let Some(start) = module.start {
            let sig = &module.functions[start as usize].sig;
            if !sig.params.is_empty() {
                return Err(VmError::WrongNumberOfArgs);
            }
            vm.invoke(start as usize, &[])?;
        }

        Ok(vm)
    }

    /// Look up an export by name.
    pub fn export(&self, name: &str) -> Option<Export> {
        self.module.exports.get(name).copied()
    }

    /// Look up an exported function by name; the returned index lives in the
    /// unified import+local function index space.
    pub fn function_index(&self, name: &str) -> Option<usize> {
        match self.export(name) {
            Some(Export {
                kind: ExportKind::Func,
                index,
            }) => Some(index as usize),
            _ => None,
        }
    }

    /// Invoke a function by index. Validates the argument count, runs the
    /// interpreter to completion, and returns the single result slot (0 for a
    /// void signature). Traps are caught here and returned as error values;
    /// the execution stacks are reset on entry so a trapped instance can be
    /// invoked again. Gas carries across invocations.
    pub fn invoke(&mut self, fn_index: usize, args: &[u64]) -> Result<u64, VmError> {
        let (is_import, has_result, n_params) = {
            let func = self
                .module
                .functions
                .get(fn_index)
                .ok_or(VmError::FuncNotFound)?;
            (
                func.is_import(),
                !func.sig.results.is_empty(),
                func.sig.params.len(),
            )
        };
        if n_params != args.len() {
            return Err(VmError::WrongNumberOfArgs);
        }

        self.stack.reset();
        self.frames.clear();
        self.blocks.clear();
        self.break_depth = -1;

        for &arg in args {
            self.stack.push(arg)?;
        }
        if is_import {
            self.call_host(fn_index)?;
            return Ok(if has_result { self.stack.pop()? } else { 0 });
        }
        self.setup_frame(fn_index)?;
        self.interpret()
    }

    /// Current linear memory length in bytes (always a page multiple).
    pub fn mem_size(&self) -> usize {
        self.memory.len()
    }

    /// Copy bytes out of linear memory into `buf`, starting at `offset`.
    /// Returns the byte count actually copied and whether the read came up
    /// short of `buf.len()`. Never grows memory.
    pub fn mem_read(&self, buf: &mut [u8], offset: usize) -> (usize, bool) {
        let available = self.memory.len().saturating_sub(offset);
        let n = buf.len().min(available);
        if n > 0 {
            buf[..n].copy_from_slice(&self.memory[offset..offset + n]);
        }
        (n, n < buf.len())
    }

    /// Copy `data` into linear memory at `offset`. Returns the byte count
    /// actually written and whether the write was truncated. Never grows
    /// memory.
    pub fn mem_write(&mut self, data: &[u8], offset: usize) -> (usize, bool) {
        let available = self.memory.len().saturating_sub(offset);
        let n = data.len().min(available);
        if n > 0 {
            self.memory[offset..offset + n].copy_from_slice(&data[..n]);
        }
        (n, n < data.len())
    }

    /// Grow linear memory by `delta` pages, charging the gas policy's
    /// allocation cost first. Returns the previous page count, or `None` when
    /// the declared maximum (or the 65536-page cap) would be exceeded.
    pub fn grow_memory(&mut self, delta: u32) -> Result<Option<u32>, VmError> {
        let current = (self.memory.len() / PAGE_SIZE) as u32;
        let cap = self.module.max_pages().unwrap_or(MAX_PAGES).min(MAX_PAGES);
        let new = match current.checked_add(delta) {
            Some(n) if n <= cap => n,
            _ => return Ok(None),
        };
        // The growth happens only if the charge succeeds.
        let cost = self.gas_policy.cost_for_malloc(delta);
        self.burn_gas(cost)?;
        self.memory.resize(new as usize * PAGE_SIZE, 0);
        Ok(Some(current))
    }

    /// Gas consumed so far.
    pub fn gas_used(&self) -> u64 {
        self.gas.used
    }

    /// Charge `cost` units. The counter is left untouched when the charge
    /// would exceed the limit or overflow.
    pub(crate) fn burn_gas(&mut self, cost: u64) -> Result<(), VmError> {
        let used = self
            .gas
            .used
            .checked_add(cost)
            .ok_or(VmError::OutOfGas)?;
        if used > self.gas.limit {
            return Err(VmError::OutOfGas);
        }
        self.gas.used = used;
        Ok(())
    }
}
