//! Gas metering: exact-budget exhaustion, allocation charges, and
//! construction-time failures.

mod common;

use common::{instance_with_gas, invoke_named};
use wasmeter::{FreeGasPolicy, Gas, SimpleGasPolicy, VmError};

#[test]
fn exact_budget_succeeds_one_less_fails() {
    // Measure the cost of a full run under the 1-per-op policy, then replay
    // with exactly that budget and with one unit less.
    let bytes = common::is_prime_module();
    let mut vm =
        instance_with_gas(&bytes, Box::new(SimpleGasPolicy), Gas::new(u64::MAX)).unwrap();
    invoke_named(&mut vm, "isPrime", &[10007]).unwrap();
    let cost = vm.gas_used();
    assert!(cost > 0);

    let mut vm = instance_with_gas(&bytes, Box::new(SimpleGasPolicy), Gas::new(cost)).unwrap();
    assert_eq!(invoke_named(&mut vm, "isPrime", &[10007]).unwrap(), 1);
    assert_eq!(vm.gas_used(), cost);

    let mut vm =
        instance_with_gas(&bytes, Box::new(SimpleGasPolicy), Gas::new(cost - 1)).unwrap();
    assert_eq!(
        invoke_named(&mut vm, "isPrime", &[10007]).unwrap_err(),
        VmError::OutOfGas
    );
    // The failed charge leaves the counter at the limit, not past it.
    assert_eq!(vm.gas_used(), cost - 1);
}

#[test]
fn memory_grow_charges_per_page() {
    // (memory 1 3), grow() runs 3 opcodes and grows by 2 pages:
    // 1024 (initial page) + 2*1024 (growth) + 3 (opcodes).
    let bytes = common::memory_grow_module();

    let mut vm =
        instance_with_gas(&bytes, Box::new(SimpleGasPolicy), Gas::new(1024 * 3 + 3)).unwrap();
    invoke_named(&mut vm, "grow", &[]).unwrap();
    assert_eq!(vm.gas_used(), 1024 * 3 + 3);
    assert_eq!(vm.mem_size(), 3 * 65536);

    let mut vm =
        instance_with_gas(&bytes, Box::new(SimpleGasPolicy), Gas::new(1024 * 3 + 2)).unwrap();
    assert_eq!(
        invoke_named(&mut vm, "grow", &[]).unwrap_err(),
        VmError::OutOfGas
    );
}

#[test]
fn construction_fails_when_budget_cannot_cover_initial_pages() {
    let bytes = common::memory_grow_module();
    let err = instance_with_gas(&bytes, Box::new(SimpleGasPolicy), Gas::new(1023)).unwrap_err();
    assert_eq!(err, VmError::OutOfGas);
}

#[test]
fn preconsumed_gas_counts_against_the_limit() {
    let bytes = common::memory_grow_module();
    let gas = Gas {
        used: 5000,
        limit: 5500,
    };
    let err = instance_with_gas(&bytes, Box::new(SimpleGasPolicy), gas).unwrap_err();
    assert_eq!(err, VmError::OutOfGas);

    let gas = Gas {
        used: 5000,
        limit: 9000,
    };
    let vm = instance_with_gas(&bytes, Box::new(SimpleGasPolicy), gas).unwrap();
    assert_eq!(vm.gas_used(), 6024);
}

#[test]
fn free_policy_runs_on_empty_budget() {
    let bytes = common::is_prime_module();
    let mut vm = instance_with_gas(&bytes, Box::new(FreeGasPolicy), Gas::new(0)).unwrap();
    assert_eq!(invoke_named(&mut vm, "isPrime", &[10007]).unwrap(), 1);
    assert_eq!(vm.gas_used(), 0);
}

#[test]
fn gas_accumulates_across_invocations() {
    let bytes = common::calc_module();
    let mut vm =
        instance_with_gas(&bytes, Box::new(SimpleGasPolicy), Gas::new(1000)).unwrap();
    invoke_named(&mut vm, "calc", &[]).unwrap();
    let after_one = vm.gas_used();
    invoke_named(&mut vm, "calc", &[]).unwrap();
    assert_eq!(vm.gas_used(), after_one * 2);
}

#[test]
fn skipped_instructions_are_not_charged() {
    // calc(c): block; local.get c; br_if 0; nop x4; end — the four nops are
    // executed on the fall-through path and skipped on the branch path.
    let mut b = common::ModuleBuilder::new();
    let t = b.add_type(&[common::I32], &[]);
    #[rustfmt::skip]
    b.add_func(t, &[], &[
        0x02, 0x40,             // block
        0x20, 0x00,             //   local.get 0
        0x0D, 0x00,             //   br_if 0
        0x01, 0x01, 0x01, 0x01, //   nop; nop; nop; nop
        0x0B,                   // end
    ]);
    b.export_func("calc", 0);
    let bytes = b.build();

    let mut vm =
        instance_with_gas(&bytes, Box::new(SimpleGasPolicy), Gas::new(1000)).unwrap();
    invoke_named(&mut vm, "calc", &[0]).unwrap();
    let fallthrough = vm.gas_used();

    let mut vm =
        instance_with_gas(&bytes, Box::new(SimpleGasPolicy), Gas::new(1000)).unwrap();
    invoke_named(&mut vm, "calc", &[1]).unwrap();
    let branched = vm.gas_used();

    assert_eq!(fallthrough, branched + 4);
}
