use rill_vm::consts::VmParams;
use rill_vm::host::CaptureHost;
use rill_vm::prelude::*;

fn new_vm() -> Vm<CaptureHost> {
    Vm::with_host(CaptureHost::default(), VmParams::default())
}

/// `[1]` bound to local 2, self-inserted so the list is its own element.
fn emit_self_cycle(buf: &mut ByteCodeBuffer) {
    buf.push_op(Opcode::ConstI8);
    buf.push_operands(&[1, 3]);
    buf.push_op(Opcode::ListBuild);
    buf.push_operands(&[3, 1, 2]);
    buf.push_op(Opcode::Retain);
    buf.push_operand(2);
    buf.push_op(Opcode::ConstI8);
    buf.push_operands(&[0, 3]);
    buf.push_op(Opcode::IndexSet);
    buf.push_operands(&[2, 3, 2]);
}

#[test]
fn acyclic_program_reports_no_cycles() {
    let mut vm = new_vm();

    let mut buf = ByteCodeBuffer::new();
    buf.push_op(Opcode::ConstI8);
    buf.push_operands(&[1, 3]);
    buf.push_op(Opcode::ListBuild);
    buf.push_operands(&[3, 1, 2]);
    buf.push_op(Opcode::Release);
    buf.push_operand(2);
    buf.push_op(Opcode::End);
    buf.push_operand(NO_MAIN_LOCAL);
    buf.main_local_size = 4;

    vm.eval(buf).expect("eval");
    assert!(!vm.collect_cycles());
    assert_eq!(vm.heap().live_objects(), 0);
    assert_eq!(vm.heap().rc_balance(), 0);
}

#[test]
fn self_referencing_list_is_collected() {
    let mut vm = new_vm();

    let mut buf = ByteCodeBuffer::new();
    emit_self_cycle(&mut buf);
    // Drop the variable; the self-reference keeps the cell alive.
    buf.push_op(Opcode::Release);
    buf.push_operand(2);
    buf.push_op(Opcode::End);
    buf.push_operand(NO_MAIN_LOCAL);
    buf.main_local_size = 4;

    vm.eval(buf).expect("eval");
    assert_eq!(vm.heap().live_objects(), 1);

    assert!(vm.collect_cycles());
    assert_eq!(vm.heap().live_objects(), 0);
    assert_eq!(vm.heap().rc_balance(), 0);
    vm.heap().check_integrity().unwrap();
}

#[test]
fn two_cell_cycle_is_collected() {
    // a = [b]; b = [a]
    let mut vm = new_vm();

    let mut buf = ByteCodeBuffer::new();
    // a = [none]
    buf.push_op(Opcode::NoneOp);
    buf.push_operand(4);
    buf.push_op(Opcode::ListBuild);
    buf.push_operands(&[4, 1, 2]);
    // b = [a], retaining a for the element reference
    buf.push_op(Opcode::Retain);
    buf.push_operand(2);
    buf.push_op(Opcode::Copy);
    buf.push_operands(&[2, 4]);
    buf.push_op(Opcode::ListBuild);
    buf.push_operands(&[4, 1, 3]);
    // a[0] = b
    buf.push_op(Opcode::Retain);
    buf.push_operand(3);
    buf.push_op(Opcode::ConstI8);
    buf.push_operands(&[0, 4]);
    buf.push_op(Opcode::IndexSet);
    buf.push_operands(&[2, 4, 3]);
    buf.push_op(Opcode::Release);
    buf.push_operand(2);
    buf.push_op(Opcode::Release);
    buf.push_operand(3);
    buf.push_op(Opcode::End);
    buf.push_operand(NO_MAIN_LOCAL);
    buf.main_local_size = 5;

    vm.eval(buf).expect("eval");
    assert_eq!(vm.heap().live_objects(), 2);

    assert!(vm.collect_cycles());
    assert_eq!(vm.heap().live_objects(), 0);
    assert_eq!(vm.heap().rc_balance(), 0);
    vm.heap().check_integrity().unwrap();
}

#[test]
fn returned_value_release_balances_the_counter() {
    // The program returns a heap value; the embedder releases it.
    let mut vm = new_vm();

    let mut buf = ByteCodeBuffer::new();
    buf.push_op(Opcode::ConstI8);
    buf.push_operands(&[1, 3]);
    buf.push_op(Opcode::ListBuild);
    buf.push_operands(&[3, 1, 2]);
    buf.push_op(Opcode::End);
    buf.push_operand(2);
    buf.main_local_size = 4;

    let result = vm.eval(buf).expect("eval");
    assert!(result.is_pointer());
    assert_eq!(vm.heap().live_objects(), 1);
    vm.release(result);
    assert_eq!(vm.heap().live_objects(), 0);
    assert_eq!(vm.heap().rc_balance(), 0);
}

#[test]
fn heap_integrity_after_churn() {
    // Allocate and free enough lists to exercise span merging and reuse.
    let mut vm = new_vm();

    let mut buf = ByteCodeBuffer::new();
    buf.push_op(Opcode::ConstI8);
    buf.push_operands(&[0, 2]); // i
    let limit = buf.push_const_value(Value::from_f64(500.0));
    buf.push_op(Opcode::ConstOp);
    buf.push_operand_u16(limit);
    buf.push_operand(3);
    let body_pc = buf.next_pc();
    buf.push_op(Opcode::ConstI8);
    buf.push_operands(&[1, 5]);
    buf.push_op(Opcode::ListBuild);
    buf.push_operands(&[5, 1, 4]);
    buf.push_op(Opcode::Release);
    buf.push_operand(4);
    let range_pc = buf.next_pc();
    buf.push_op(Opcode::ForRange);
    buf.push_operands(&[2, 3]);
    buf.push_operand_i16(body_pc as i16 - range_pc as i16);
    buf.push_op(Opcode::End);
    buf.push_operand(NO_MAIN_LOCAL);
    buf.main_local_size = 6;

    vm.eval(buf).expect("eval");
    vm.heap().check_integrity().unwrap();
    assert_eq!(vm.heap().live_objects(), 0);
    assert_eq!(vm.heap().rc_balance(), 0);
}

#[test]
fn heap_page_cap_surfaces_out_of_memory() {
    let mut vm = Vm::with_host(
        CaptureHost::default(),
        VmParams {
            max_heap_pages: 0,
            ..VmParams::default()
        },
    );

    let mut buf = ByteCodeBuffer::new();
    buf.push_op(Opcode::ConstI8);
    buf.push_operands(&[1, 3]);
    buf.push_op(Opcode::ListBuild);
    buf.push_operands(&[3, 1, 2]);
    buf.push_op(Opcode::End);
    buf.push_operand(NO_MAIN_LOCAL);
    buf.main_local_size = 4;

    let err = vm.eval(buf).unwrap_err();
    assert!(matches!(err, VmError::OutOfMemory));
}

#[test]
fn retain_release_round_trip_leaves_rc_unchanged() {
    let mut vm = new_vm();

    let mut buf = ByteCodeBuffer::new();
    buf.push_op(Opcode::ConstI8);
    buf.push_operands(&[1, 3]);
    buf.push_op(Opcode::ListBuild);
    buf.push_operands(&[3, 1, 2]);
    buf.push_op(Opcode::End);
    buf.push_operand(2);
    buf.main_local_size = 4;

    let v = vm.eval(buf).expect("eval");
    let before = vm.heap().rc_balance();
    vm.retain(v);
    vm.release(v);
    vm.retain(v);
    vm.release(v);
    assert_eq!(vm.heap().rc_balance(), before);
    vm.release(v);
    assert_eq!(vm.heap().rc_balance(), 0);
    assert_eq!(vm.heap().live_objects(), 0);
}

#[test]
fn collector_spares_reachable_objects() {
    // A live acyclic list must survive a sweep.
    let mut vm = new_vm();

    let mut buf = ByteCodeBuffer::new();
    buf.push_op(Opcode::ConstI8);
    buf.push_operands(&[1, 3]);
    buf.push_op(Opcode::ListBuild);
    buf.push_operands(&[3, 1, 2]);
    buf.push_op(Opcode::End);
    buf.push_operand(2);
    buf.main_local_size = 4;

    let result = vm.eval(buf).expect("eval");
    assert!(!vm.collect_cycles());
    assert_eq!(vm.heap().live_objects(), 1);
    vm.release(result);
    assert_eq!(vm.heap().rc_balance(), 0);
}
