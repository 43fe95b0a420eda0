//! Property tests: LEB128 round-trips, memory I/O round-trips, and
//! execution determinism.

mod common;

use proptest::prelude::*;

use common::{instance, invoke_named, ModuleBuilder, I32};
use wasmeter::binary::{cursor::Cursor, leb128};
use wasmeter::{Gas, SimpleGasPolicy};

fn add_module() -> Vec<u8> {
    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[I32, I32], &[I32]);
    b.add_func(t, &[], &[0x20, 0x00, 0x20, 0x01, 0x6A]);
    b.export_func("add", 0);
    b.build()
}

proptest! {
    #[test]
    fn uleb_roundtrip(v in any::<u32>()) {
        let encoded = common::uleb(v as u64);
        let mut cur = Cursor::new(&encoded);
        prop_assert_eq!(leb128::read_uleb_u32(&mut cur).unwrap(), v);
        prop_assert_eq!(cur.remaining(), 0);
    }

    #[test]
    fn sleb_roundtrip_i32(v in any::<i32>()) {
        let encoded = common::sleb(v as i64);
        let mut cur = Cursor::new(&encoded);
        prop_assert_eq!(leb128::read_sleb_i32(&mut cur).unwrap(), v);
        prop_assert_eq!(cur.remaining(), 0);
    }

    #[test]
    fn sleb_roundtrip_i64(v in any::<i64>()) {
        let encoded = common::sleb(v);
        let mut cur = Cursor::new(&encoded);
        prop_assert_eq!(leb128::read_sleb_i64(&mut cur).unwrap(), v);
        prop_assert_eq!(cur.remaining(), 0);
    }

    #[test]
    fn mem_write_read_roundtrip(
        bytes in proptest::collection::vec(any::<u8>(), 0..256),
        offset in 0usize..65536,
    ) {
        let mut b = ModuleBuilder::new();
        b.memory(1, None);
        let mut vm = instance(&b.build());

        let (written, short) = vm.mem_write(&bytes, offset);
        let mut back = vec![0u8; bytes.len()];
        let (read, _) = vm.mem_read(&mut back, offset);
        prop_assert_eq!(written, read);
        prop_assert_eq!(&back[..written], &bytes[..written]);
        prop_assert_eq!(short, offset + bytes.len() > vm.mem_size());
    }

    #[test]
    fn add_matches_wrapping_semantics(a in any::<u32>(), b in any::<u32>()) {
        let bytes = add_module();
        let mut vm = instance(&bytes);
        let got = invoke_named(&mut vm, "add", &[a as u64, b as u64]).unwrap();
        prop_assert_eq!(got, a.wrapping_add(b) as u64);
    }

    #[test]
    fn invoke_is_deterministic(n in 1u32..20000) {
        let bytes = common::is_prime_module();
        let mut vm1 = common::instance_with_gas(
            &bytes,
            Box::new(SimpleGasPolicy),
            Gas::new(u64::MAX),
        ).unwrap();
        let mut vm2 = common::instance_with_gas(
            &bytes,
            Box::new(SimpleGasPolicy),
            Gas::new(u64::MAX),
        ).unwrap();
        let r1 = invoke_named(&mut vm1, "isPrime", &[n as u64]).unwrap();
        let r2 = invoke_named(&mut vm2, "isPrime", &[n as u64]).unwrap();
        prop_assert_eq!(r1, r2);
        prop_assert_eq!(vm1.gas_used(), vm2.gas_used());
    }
}
