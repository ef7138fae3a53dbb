//! End-to-end tests: compile Wasm text, run it through the machine, and
//! check results, traps, limits, suspension, and snapshots.

use cinder_compiler::SimpleGasPolicy;
use cinder_vm::{
    Environment, ExitError, ImportFunc, ImportResolver, NopResolver, StateNode, Trap,
    VirtualMachine,
};
use std::sync::Arc;
use tempfile::TempDir;

// ============================================================
// Helpers
// ============================================================

fn build(source: &str) -> Vec<u8> {
    wat::parse_str(source).expect("valid test module")
}

fn machine(source: &str) -> VirtualMachine {
    machine_with(source, Environment::default())
}

fn machine_with(source: &str, environment: Environment) -> VirtualMachine {
    VirtualMachine::new(&build(source), environment, &NopResolver, None).expect("machine")
}

fn metered(source: &str, environment: Environment, gas_per: i64) -> VirtualMachine {
    let policy = SimpleGasPolicy {
        gas_per_instruction: gas_per,
    };
    VirtualMachine::new(&build(source), environment, &NopResolver, Some(&policy))
        .expect("machine")
}

/// Run the exported `main` with the given parameters.
fn run_main(vm: &mut VirtualMachine, params: &[i64]) -> Result<i64, ExitError> {
    let entry = vm.get_function_export("main").expect("main export");
    vm.run(entry, params)
}

fn eval(source: &str, params: &[i64]) -> Result<i64, ExitError> {
    run_main(&mut machine(source), params)
}

struct TestResolver;

impl ImportResolver for TestResolver {
    fn resolve_func(&self, module: &str, field: &str) -> ImportFunc {
        match (module, field) {
            ("env", "ping") => Arc::new(|vm: &mut VirtualMachine| vm.active_frame().locals()[0] + 1),
            ("env", "peek") => Arc::new(|vm: &mut VirtualMachine| {
                let addr = vm.active_frame().locals()[0] as u32 as usize;
                vm.memory[addr] as i64
            }),
            ("env", "boom") => Arc::new(|_vm: &mut VirtualMachine| panic!("boom import")),
            _ => panic!("unknown import {module}.{field}"),
        }
    }

    fn resolve_global(&self, _module: &str, _field: &str) -> i64 {
        640
    }
}

// ============================================================
// Straight-line arithmetic
// ============================================================

#[test]
fn const_add_returns_seven() {
    let result = eval(
        r#"(module
            (func $main (result i32)
                i32.const 3
                i32.const 4
                i32.add)
            (export "main" (func $main)))"#,
        &[],
    );
    assert_eq!(result, Ok(7));
}

#[test]
fn i32_results_are_sign_extended() {
    let result = eval(
        r#"(module
            (func $main (result i32)
                i32.const 3
                i32.const 5
                i32.sub)
            (export "main" (func $main)))"#,
        &[],
    );
    assert_eq!(result, Ok(-2));
}

#[test]
fn i32_division_by_zero_traps() {
    let result = eval(
        r#"(module
            (func $main (result i32)
                i32.const 10
                i32.const 0
                i32.div_s)
            (export "main" (func $main)))"#,
        &[],
    );
    let err = result.unwrap_err();
    assert_eq!(err, ExitError::Trap(Trap::DivisionByZero));
    assert!(err.to_string().contains("integer division by zero"));
}

#[test]
fn i32_min_div_minus_one_traps_signed_overflow() {
    let result = eval(
        r#"(module
            (func $main (result i32)
                i32.const -2147483648
                i32.const -1
                i32.div_s)
            (export "main" (func $main)))"#,
        &[],
    );
    assert_eq!(result, Err(ExitError::Trap(Trap::IntegerOverflow)));
}

#[test]
fn i32_min_rem_minus_one_is_zero() {
    let result = eval(
        r#"(module
            (func $main (result i32)
                i32.const -2147483648
                i32.const -1
                i32.rem_s)
            (export "main" (func $main)))"#,
        &[],
    );
    assert_eq!(result, Ok(0));
}

#[test]
fn unsigned_division_uses_unsigned_operands() {
    let result = eval(
        r#"(module
            (func $main (result i32)
                i32.const -4
                i32.const 2
                i32.div_u)
            (export "main" (func $main)))"#,
        &[],
    );
    // 0xFFFFFFFC / 2 = 0x7FFFFFFE
    assert_eq!(result, Ok(0x7FFF_FFFE));
}

#[test]
fn shift_amounts_are_masked_by_width() {
    let result = eval(
        r#"(module
            (func $main (result i32)
                i32.const 1
                i32.const 33
                i32.shl)
            (export "main" (func $main)))"#,
        &[],
    );
    assert_eq!(result, Ok(2));
}

#[test]
fn bit_counting_ops() {
    let result = eval(
        r#"(module
            (func $main (result i32)
                i32.const 16
                i32.clz
                i32.const 16
                i32.ctz
                i32.add
                i32.const 255
                i32.popcnt
                i32.add)
            (export "main" (func $main)))"#,
        &[],
    );
    // clz(16)=27, ctz(16)=4, popcnt(255)=8
    assert_eq!(result, Ok(39));
}

#[test]
fn comparisons_produce_zero_or_one() {
    let result = eval(
        r#"(module
            (func $main (result i32)
                i32.const -1
                i32.const 1
                i32.lt_s
                i32.const -1
                i32.const 1
                i32.lt_u
                i32.sub)
            (export "main" (func $main)))"#,
        &[],
    );
    // Signed: -1 < 1 is 1. Unsigned: 0xFFFFFFFF < 1 is 0.
    assert_eq!(result, Ok(1));
}

#[test]
fn i64_arithmetic_is_full_width() {
    let result = eval(
        r#"(module
            (func $main (result i64)
                i64.const 4294967296
                i64.const 3
                i64.mul)
            (export "main" (func $main)))"#,
        &[],
    );
    assert_eq!(result, Ok(3 << 32));
}

#[test]
fn i64_division_by_zero_traps() {
    let result = eval(
        r#"(module
            (func $main (result i64)
                i64.const 1
                i64.const 0
                i64.div_u)
            (export "main" (func $main)))"#,
        &[],
    );
    assert_eq!(result, Err(ExitError::Trap(Trap::DivisionByZero)));
}

#[test]
fn wrap_and_extend_conversions() {
    let result = eval(
        r#"(module
            (func $main (result i64)
                i64.const -1
                i32.wrap_i64
                i64.extend_i32_u)
            (export "main" (func $main)))"#,
        &[],
    );
    assert_eq!(result, Ok(0xFFFF_FFFF));
}

#[test]
fn select_picks_by_condition() {
    let source = r#"(module
        (func $main (param i32) (result i32)
            i32.const 5
            i32.const 7
            local.get 0
            select)
        (export "main" (func $main)))"#;
    assert_eq!(eval(source, &[1]), Ok(5));
    assert_eq!(eval(source, &[0]), Ok(7));
}

#[test]
fn unreachable_traps() {
    let result = eval(
        r#"(module
            (func $main unreachable)
            (export "main" (func $main)))"#,
        &[],
    );
    assert_eq!(result, Err(ExitError::Trap(Trap::Unreachable)));
}

// ============================================================
// Floats
// ============================================================

#[test]
fn f64_add_produces_bit_pattern_result() {
    let result = eval(
        r#"(module
            (func $main (result f64)
                f64.const 1.5
                f64.const 2.25
                f64.add)
            (export "main" (func $main)))"#,
        &[],
    )
    .unwrap();
    assert_eq!(f64::from_bits(result as u64), 3.75);
}

#[test]
fn f32_mul() {
    let result = eval(
        r#"(module
            (func $main (result f32)
                f32.const 1.5
                f32.const 4
                f32.mul)
            (export "main" (func $main)))"#,
        &[],
    )
    .unwrap();
    assert_eq!(f32::from_bits(result as u32), 6.0);
}

#[test]
fn f64_nearest_rounds_ties_to_even() {
    let source = r#"(module
        (func $main (param f64) (result f64)
            local.get 0
            f64.nearest)
        (export "main" (func $main)))"#;
    let half = 2.5f64.to_bits() as i64;
    let result = eval(source, &[half]).unwrap();
    assert_eq!(f64::from_bits(result as u64), 2.0);
}

#[test]
fn f64_comparison_and_conversion() {
    let result = eval(
        r#"(module
            (func $main (result i32)
                f64.const 2.5
                i32.trunc_f64_s
                f64.const 1.0
                f64.const 2.0
                f64.lt
                i32.add)
            (export "main" (func $main)))"#,
        &[],
    );
    assert_eq!(result, Ok(3));
}

#[test]
fn disabled_floating_point_traps() {
    let mut vm = machine_with(
        r#"(module
            (func $main (result f64)
                f64.const 1.5
                f64.const 2.5
                f64.add)
            (export "main" (func $main)))"#,
        Environment {
            disable_floating_point: true,
            ..Environment::default()
        },
    );
    let result = run_main(&mut vm, &[]);
    assert_eq!(result, Err(ExitError::Trap(Trap::FloatingPointDisabled)));
}

// ============================================================
// Control flow
// ============================================================

#[test]
fn if_else_merges_through_phi() {
    let source = r#"(module
        (func $main (param i32) (result i32)
            local.get 0
            if (result i32)
                i32.const 10
            else
                i32.const 20
            end)
        (export "main" (func $main)))"#;
    assert_eq!(eval(source, &[1]), Ok(10));
    assert_eq!(eval(source, &[0]), Ok(20));
}

#[test]
fn block_result_survives_conditional_branch() {
    let source = r#"(module
        (func $main (param i32) (result i32)
            block (result i32)
                i32.const 5
                local.get 0
                br_if 0
                drop
                i32.const 9
            end)
        (export "main" (func $main)))"#;
    assert_eq!(eval(source, &[1]), Ok(5));
    assert_eq!(eval(source, &[0]), Ok(9));
}

#[test]
fn loop_computes_factorial() {
    let source = r#"(module
        (func $main (param i64) (result i64)
            (local i64)
            i64.const 1
            local.set 1
            block
                loop
                    local.get 0
                    i64.eqz
                    br_if 1
                    local.get 0
                    local.get 1
                    i64.mul
                    local.set 1
                    local.get 0
                    i64.const 1
                    i64.sub
                    local.set 0
                    br 0
                end
            end
            local.get 1)
        (export "main" (func $main)))"#;
    assert_eq!(eval(source, &[5]), Ok(120));
    assert_eq!(eval(source, &[0]), Ok(1));
    assert_eq!(eval(source, &[20]), Ok(2_432_902_008_176_640_000));
}

#[test]
fn br_table_selects_case_or_default() {
    let source = r#"(module
        (func $main (param i32) (result i32)
            block
                block
                    block
                        local.get 0
                        br_table 0 1 2
                    end
                    i32.const 10
                    return
                end
                i32.const 20
                return
            end
            i32.const 30)
        (export "main" (func $main)))"#;
    assert_eq!(eval(source, &[0]), Ok(10));
    assert_eq!(eval(source, &[1]), Ok(20));
    assert_eq!(eval(source, &[2]), Ok(30));
    assert_eq!(eval(source, &[99]), Ok(30));
    assert_eq!(eval(source, &[-1]), Ok(30));
}

#[test]
fn early_return_skips_the_rest() {
    let result = eval(
        r#"(module
            (func $main (result i32)
                i32.const 1
                return
                unreachable)
            (export "main" (func $main)))"#,
        &[],
    );
    assert_eq!(result, Ok(1));
}

// ============================================================
// Calls
// ============================================================

#[test]
fn direct_call_passes_arguments_and_returns() {
    let result = eval(
        r#"(module
            (func $add (param i32 i32) (result i32)
                local.get 0
                local.get 1
                i32.add)
            (func $main (result i32)
                i32.const 30
                i32.const 12
                call $add)
            (export "main" (func $main)))"#,
        &[],
    );
    assert_eq!(result, Ok(42));
}

#[test]
fn recursion_computes_fibonacci() {
    let source = r#"(module
        (func $fib (param i64) (result i64)
            local.get 0
            i64.const 2
            i64.lt_s
            if (result i64)
                local.get 0
            else
                local.get 0
                i64.const 1
                i64.sub
                call $fib
                local.get 0
                i64.const 2
                i64.sub
                call $fib
                i64.add
            end)
        (func $main (param i64) (result i64)
            local.get 0
            call $fib)
        (export "main" (func $main)))"#;
    assert_eq!(eval(source, &[10]), Ok(55));
}

#[test]
fn runaway_recursion_overflows_the_call_stack() {
    let result = eval(
        r#"(module
            (func $main call $main)
            (export "main" (func $main)))"#,
        &[],
    );
    assert_eq!(result, Err(ExitError::Trap(Trap::CallStackOverflow)));
}

#[test]
fn max_call_stack_depth_bounds_recursion() {
    let mut vm = machine_with(
        r#"(module
            (func $main call $main)
            (export "main" (func $main)))"#,
        Environment {
            max_call_stack_depth: 4,
            ..Environment::default()
        },
    );
    let result = run_main(&mut vm, &[]);
    assert_eq!(result, Err(ExitError::Trap(Trap::CallStackOverflow)));
}

#[test]
fn max_value_slots_bounds_recursion() {
    let mut vm = machine_with(
        r#"(module
            (func $main call $main)
            (export "main" (func $main)))"#,
        Environment {
            max_value_slots: 16,
            ..Environment::default()
        },
    );
    let result = run_main(&mut vm, &[]);
    assert_eq!(result, Err(ExitError::Trap(Trap::MaxValueSlotsExceeded)));
}

#[test]
fn max_value_slots_bounds_the_entry_frame() {
    // The limit applies to the ignited frame itself, not just to frames
    // pushed by calls, and surfaces as a trap rather than a panic.
    let mut vm = machine_with(
        r#"(module
            (func $main (param i64) (local i64))
            (export "main" (func $main)))"#,
        Environment {
            max_value_slots: 1,
            ..Environment::default()
        },
    );
    let result = run_main(&mut vm, &[7]);
    assert_eq!(result, Err(ExitError::Trap(Trap::MaxValueSlotsExceeded)));
    assert!(vm.exited);
    assert_eq!(vm.current_frame, -1);
}

#[test]
fn call_indirect_dispatches_through_the_table() {
    let source = r#"(module
        (type $t (func (result i32)))
        (table 2 funcref)
        (elem (i32.const 0) $a $b)
        (func $a (result i32) (i32.const 11))
        (func $b (result i32) (i32.const 22))
        (func $main (param i32) (result i32)
            local.get 0
            call_indirect (type $t))
        (export "main" (func $main)))"#;
    assert_eq!(eval(source, &[0]), Ok(11));
    assert_eq!(eval(source, &[1]), Ok(22));
}

#[test]
fn call_indirect_arity_mismatch_traps() {
    let result = eval(
        r#"(module
            (type $void (func))
            (table 1 funcref)
            (elem (i32.const 0) $a)
            (func $a (result i32) (i32.const 1))
            (func $main
                i32.const 0
                call_indirect (type $void))
            (export "main" (func $main)))"#,
        &[],
    );
    let err = result.unwrap_err();
    assert_eq!(err, ExitError::Trap(Trap::TypeMismatch));
    assert!(err.to_string().contains("type mismatch"));
}

#[test]
fn call_indirect_to_an_unfilled_slot_traps() {
    let result = eval(
        r#"(module
            (type $t (func (result i32)))
            (table 2 funcref)
            (elem (i32.const 0) $a)
            (func $a (result i32) (i32.const 1))
            (func $main (result i32)
                i32.const 1
                call_indirect (type $t))
            (export "main" (func $main)))"#,
        &[],
    );
    assert_eq!(result, Err(ExitError::Trap(Trap::UninitializedTableEntry)));
}

#[test]
fn call_indirect_out_of_table_traps() {
    let result = eval(
        r#"(module
            (type $t (func (result i32)))
            (table 1 funcref)
            (elem (i32.const 0) $a)
            (func $a (result i32) (i32.const 1))
            (func $main (result i32)
                i32.const 5
                call_indirect (type $t))
            (export "main" (func $main)))"#,
        &[],
    );
    assert_eq!(result, Err(ExitError::Trap(Trap::UndefinedTableEntry)));
}

// ============================================================
// Memory
// ============================================================

#[test]
fn store_then_load_round_trips() {
    let result = eval(
        r#"(module
            (memory 1)
            (func $main (result i32)
                i32.const 16
                i32.const -2
                i32.store
                i32.const 16
                i32.load)
            (export "main" (func $main)))"#,
        &[],
    );
    assert_eq!(result, Ok(-2));
}

#[test]
fn subword_loads_extend_correctly() {
    let source = r#"(module
        (memory 1)
        (func $main (result i32)
            i32.const 16
            i32.const -2
            i32.store
            i32.const 16
            i32.load8_u
            i32.const 16
            i32.load8_s
            i32.add)
        (export "main" (func $main)))"#;
    // 254 + (-2)
    assert_eq!(eval(source, &[]), Ok(252));
}

#[test]
fn i64_subword_store_and_load() {
    let result = eval(
        r#"(module
            (memory 1)
            (func $main (result i64)
                i32.const 8
                i64.const 65535
                i64.store16
                i32.const 8
                i64.load32_u)
            (export "main" (func $main)))"#,
        &[],
    );
    assert_eq!(result, Ok(65535));
}

#[test]
fn data_segments_initialize_memory() {
    let result = eval(
        r#"(module
            (memory 1)
            (data (i32.const 8) "\2a")
            (func $main (result i32)
                i32.const 8
                i32.load8_u)
            (export "main" (func $main)))"#,
        &[],
    );
    assert_eq!(result, Ok(42));
}

#[test]
fn out_of_bounds_access_traps() {
    let result = eval(
        r#"(module
            (memory 1)
            (func $main (result i32)
                i32.const 65533
                i32.load)
            (export "main" (func $main)))"#,
        &[],
    );
    assert_eq!(result, Err(ExitError::Trap(Trap::MemoryOutOfBounds)));
}

#[test]
fn current_memory_reports_pages() {
    let result = eval(
        r#"(module
            (memory 3)
            (func $main (result i32) memory.size)
            (export "main" (func $main)))"#,
        &[],
    );
    assert_eq!(result, Ok(3));
}

#[test]
fn grow_memory_returns_old_page_count() {
    let mut vm = machine(
        r#"(module
            (memory 1)
            (func $main (result i32)
                i32.const 2
                memory.grow)
            (export "main" (func $main)))"#,
    );
    assert_eq!(run_main(&mut vm, &[]), Ok(1));
    assert_eq!(vm.memory.len(), 3 * 65536);
}

#[test]
fn grow_memory_beyond_the_cap_returns_minus_one() {
    let mut vm = machine_with(
        r#"(module
            (memory 1)
            (func $main (result i32)
                i32.const 2
                memory.grow)
            (export "main" (func $main)))"#,
        Environment {
            max_memory_pages: 1,
            ..Environment::default()
        },
    );
    assert_eq!(run_main(&mut vm, &[]), Ok(-1));
    assert_eq!(vm.memory.len(), 65536);
}

#[test]
fn memory_stays_page_aligned() {
    let mut vm = machine(
        r#"(module
            (memory 1)
            (func $main (result i32)
                i32.const 4
                memory.grow)
            (export "main" (func $main)))"#,
    );
    run_main(&mut vm, &[]).unwrap();
    assert_eq!(vm.memory.len() % 65536, 0);
}

// ============================================================
// Globals
// ============================================================

#[test]
fn globals_read_and_write() {
    let result = eval(
        r#"(module
            (global $g (mut i64) (i64.const 10))
            (func $main (result i64)
                global.get $g
                i64.const 5
                i64.add
                global.set $g
                global.get $g)
            (export "main" (func $main)))"#,
        &[],
    );
    assert_eq!(result, Ok(15));
}

#[test]
fn global_init_can_reference_imported_globals() {
    let bytes = build(
        r#"(module
            (import "env" "magic" (global i64))
            (global $g i64 (global.get 0))
            (func $main (result i64) global.get $g)
            (export "main" (func $main)))"#,
    );
    let mut vm =
        VirtualMachine::new(&bytes, Environment::default(), &TestResolver, None).unwrap();
    assert_eq!(run_main(&mut vm, &[]), Ok(640));
}

#[test]
fn exports_resolve_by_kind() {
    let vm = machine(
        r#"(module
            (global $g i64 (i64.const 1))
            (func $main)
            (export "main" (func $main))
            (export "g" (global $g)))"#,
    );
    assert_eq!(vm.get_function_export("main"), Some(0));
    assert_eq!(vm.get_global_export("g"), Some(0));
    assert_eq!(vm.get_function_export("g"), None);
    assert_eq!(vm.get_function_export("missing"), None);
}

// ============================================================
// Imports and suspension
// ============================================================

#[test]
fn host_import_reads_locals_and_returns() {
    let bytes = build(
        r#"(module
            (import "env" "ping" (func $ping (param i64) (result i64)))
            (func $main (param i64) (result i64)
                local.get 0
                call $ping)
            (export "main" (func $main)))"#,
    );
    let mut vm =
        VirtualMachine::new(&bytes, Environment::default(), &TestResolver, None).unwrap();
    assert_eq!(run_main(&mut vm, &[41]), Ok(42));
    assert!(vm.delegate.is_none());
}

#[test]
fn host_import_sees_machine_memory() {
    let bytes = build(
        r#"(module
            (import "env" "peek" (func $peek (param i32) (result i64)))
            (memory 1)
            (data (i32.const 5) "\07")
            (func $main (result i64)
                i32.const 5
                call $peek)
            (export "main" (func $main)))"#,
    );
    let mut vm =
        VirtualMachine::new(&bytes, Environment::default(), &TestResolver, None).unwrap();
    assert_eq!(run_main(&mut vm, &[]), Ok(7));
}

#[test]
fn host_panic_becomes_an_exit_error() {
    let bytes = build(
        r#"(module
            (import "env" "boom" (func $boom (param i64) (result i64)))
            (func $main (result i64)
                i64.const 0
                call $boom)
            (export "main" (func $main)))"#,
    );
    let mut vm =
        VirtualMachine::new(&bytes, Environment::default(), &TestResolver, None).unwrap();
    match run_main(&mut vm, &[]) {
        Err(ExitError::HostPanic(message)) => assert!(message.contains("boom")),
        other => panic!("expected host panic, got {other:?}"),
    }
}

#[test]
#[should_panic(expected = "func import not allowed")]
fn nop_resolver_rejects_modules_with_imports() {
    machine(
        r#"(module
            (import "env" "ping" (func (param i64) (result i64))))"#,
    );
}

#[test]
fn run_with_gas_limit_bounds_activations() {
    let source = r#"(module
        (import "env" "ping" (func $ping (param i64) (result i64)))
        (func $main (result i64)
            i64.const 1
            call $ping
            call $ping)
        (export "main" (func $main)))"#;
    let bytes = build(source);

    let mut bounded =
        VirtualMachine::new(&bytes, Environment::default(), &TestResolver, None).unwrap();
    let entry = bounded.get_function_export("main").unwrap();
    assert_eq!(
        bounded.run_with_gas_limit(entry, 1, &[]),
        Err(ExitError::Trap(Trap::GasLimitExceeded))
    );

    let mut roomy =
        VirtualMachine::new(&bytes, Environment::default(), &TestResolver, None).unwrap();
    let entry = roomy.get_function_export("main").unwrap();
    assert_eq!(roomy.run_with_gas_limit(entry, 16, &[]), Ok(3));
}

// ============================================================
// Gas
// ============================================================

#[test]
fn gas_accumulates_per_block() {
    let mut vm = metered(
        r#"(module
            (func $main (result i32)
                i32.const 3
                i32.const 4
                i32.add)
            (export "main" (func $main)))"#,
        Environment::default(),
        1,
    );
    assert_eq!(run_main(&mut vm, &[]), Ok(7));
    assert!(vm.gas > 0);
    assert!(!vm.gas_limit_exceeded);
}

#[test]
fn gas_limit_trap_mode_aborts_the_run() {
    let mut vm = metered(
        r#"(module
            (func $main (result i64)
                (local i64)
                loop
                    local.get 0
                    i64.const 1
                    i64.add
                    local.set 0
                    br 0
                end
                unreachable)
            (export "main" (func $main)))"#,
        Environment {
            gas_limit: 50,
            ..Environment::default()
        },
        1,
    );
    let err = run_main(&mut vm, &[]).unwrap_err();
    assert_eq!(err, ExitError::Trap(Trap::GasLimitExceeded));
    assert!(vm.exited);
}

#[test]
fn gas_limit_suspend_mode_parks_the_machine() {
    let mut vm = metered(
        r#"(module
            (func $main (result i32)
                i32.const 1
                i32.const 2
                i32.add
                i32.const 3
                i32.add
                i32.const 4
                i32.add
                i32.const 5
                i32.add
                i32.const 6
                i32.add)
            (export "main" (func $main)))"#,
        Environment {
            gas_limit: 5,
            return_on_gas_limit_exceeded: true,
            ..Environment::default()
        },
        1,
    );
    let result = run_main(&mut vm, &[]);
    assert!(result.is_ok(), "suspension is not an error: {result:?}");
    assert!(vm.gas_limit_exceeded);
    assert!(!vm.exited);
    assert!(vm.gas <= 5);
}

#[test]
fn gas_counter_is_monotonic_across_a_run() {
    let mut vm = metered(
        r#"(module
            (func $tick (result i64) (i64.const 1))
            (func $main (result i64)
                call $tick
                call $tick
                i64.add)
            (export "main" (func $main)))"#,
        Environment::default(),
        2,
    );
    assert_eq!(run_main(&mut vm, &[]), Ok(2));
    let after_first = vm.gas;
    assert!(after_first > 0);
}

// ============================================================
// Driver misuse
// ============================================================

#[test]
#[should_panic(expected = "param count mismatch")]
fn ignite_with_wrong_arity_panics() {
    let mut vm = machine(
        r#"(module
            (func $main (param i64))
            (export "main" (func $main)))"#,
    );
    vm.ignite(0, &[]);
}

#[test]
#[should_panic(expected = "attempting to execute an exited machine")]
fn executing_an_exited_machine_panics() {
    let mut vm = machine(r#"(module (func $main) (export "main" (func $main)))"#);
    vm.execute();
}

#[test]
fn stack_trace_names_active_frames() {
    let mut vm = machine(
        r#"(module
            (func $inner unreachable)
            (func $main call $inner)
            (export "main" (func $main)))"#,
    );
    let result = run_main(&mut vm, &[]);
    assert!(result.is_err());
    let trace = vm.stack_trace();
    assert!(trace.contains("inner"));
    assert!(trace.contains("main"));
    assert!(trace.contains("begin stack trace"));
}

// ============================================================
// Determinism and persistence
// ============================================================

#[test]
fn identical_runs_return_identical_values() {
    let source = r#"(module
        (func $main (param i64) (result i64)
            (local i64)
            i64.const 1
            local.set 1
            block
                loop
                    local.get 0
                    i64.eqz
                    br_if 1
                    local.get 0
                    local.get 1
                    i64.mul
                    local.set 1
                    local.get 0
                    i64.const 1
                    i64.sub
                    local.set 0
                    br 0
                end
            end
            local.get 1)
        (export "main" (func $main)))"#;
    assert_eq!(eval(source, &[12]), eval(source, &[12]));
}

#[test]
fn save_then_load_restores_observable_state() {
    let tmp = TempDir::new().unwrap();
    let source = r#"(module
        (memory 1)
        (global $g (mut i64) (i64.const 3))
        (func $main (result i64)
            i32.const 0
            i64.const 99
            i64.store
            global.get $g)
        (export "main" (func $main)))"#;

    let mut vm = machine(source);
    assert_eq!(run_main(&mut vm, &[]), Ok(3));
    vm.save_state(tmp.path()).unwrap();

    let mut restored = machine(source);
    restored.load_state(tmp.path()).unwrap();
    assert_eq!(restored.return_value, 3);
    assert_eq!(restored.memory[0], 99);
    assert!(restored.exited);
    assert_eq!(
        StateNode::capture(&restored).id,
        StateNode::capture(&vm).id
    );
}

#[test]
fn environment_round_trips_with_the_state() {
    let tmp = TempDir::new().unwrap();
    let mut vm = machine_with(
        r#"(module (func $main) (export "main" (func $main)))"#,
        Environment {
            gas_limit: 123,
            ..Environment::default()
        },
    );
    run_main(&mut vm, &[]).unwrap();
    vm.save_state(tmp.path()).unwrap();
    let env = Environment::read_from(tmp.path()).unwrap();
    assert_eq!(env.gas_limit, 123);
}
