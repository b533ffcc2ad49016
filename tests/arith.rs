use rill_vm::consts::VmParams;
use rill_vm::host::CaptureHost;
use rill_vm::prelude::*;

fn new_vm() -> Vm<CaptureHost> {
    Vm::with_host(CaptureHost::default(), VmParams::default())
}

fn nat_print(vm: &mut Vm<CaptureHost>, args: *const Value, _num_args: u8) -> Value {
    let v = unsafe { *args };
    let line = format!("{}\n", vm.value_to_string(v));
    vm.host_mut().write_stdout(&line);
    Value::none()
}

/// `print <slot>` through a call frame at `start`.
fn emit_print(buf: &mut ByteCodeBuffer, slot: u8, start: u8, sym: u16) {
    buf.push_op(Opcode::Copy);
    buf.push_operands(&[slot, start + 2]);
    buf.push_op(Opcode::CallSym0);
    buf.push_operands(&[start, 1]);
    buf.push_operand_u16(sym);
}

#[test]
fn arithmetic_and_print() {
    // print 1 + 2 * 3
    let mut vm = new_vm();
    let print = vm.register_native("print", nat_print);

    let mut buf = ByteCodeBuffer::new();
    buf.push_op(Opcode::ConstI8);
    buf.push_operands(&[2, 2]);
    buf.push_op(Opcode::ConstI8);
    buf.push_operands(&[3, 3]);
    buf.push_op(Opcode::Mul);
    buf.push_operands(&[2, 3, 4]);
    buf.push_op(Opcode::ConstI8);
    buf.push_operands(&[1, 5]);
    buf.push_op(Opcode::Add);
    buf.push_operands(&[5, 4, 6]);
    emit_print(&mut buf, 6, 7, print as u16);
    buf.push_op(Opcode::End);
    buf.push_operand(NO_MAIN_LOCAL);
    buf.main_local_size = 10;

    let result = vm.eval(buf).expect("eval");
    assert!(result.is_none());
    assert_eq!(vm.host().out, "7\n");
    assert_eq!(vm.heap().rc_balance(), 0);
    assert_eq!(vm.heap().live_objects(), 0);
}

#[test]
fn division_modulo_pow() {
    let mut vm = new_vm();
    let print = vm.register_native("print", nat_print);

    let mut buf = ByteCodeBuffer::new();
    buf.push_op(Opcode::ConstI8);
    buf.push_operands(&[7, 2]);
    buf.push_op(Opcode::ConstI8);
    buf.push_operands(&[2, 3]);
    buf.push_op(Opcode::Div);
    buf.push_operands(&[2, 3, 4]);
    emit_print(&mut buf, 4, 8, print as u16);
    buf.push_op(Opcode::Mod);
    buf.push_operands(&[2, 3, 5]);
    emit_print(&mut buf, 5, 8, print as u16);
    buf.push_op(Opcode::Pow);
    buf.push_operands(&[3, 2, 6]);
    emit_print(&mut buf, 6, 8, print as u16);
    buf.push_op(Opcode::End);
    buf.push_operand(NO_MAIN_LOCAL);
    buf.main_local_size = 11;

    vm.eval(buf).expect("eval");
    assert_eq!(vm.host().out, "3.5\n1\n128\n");
}

#[test]
fn bitwise_and_shifts() {
    let mut vm = new_vm();
    let print = vm.register_native("print", nat_print);

    let mut buf = ByteCodeBuffer::new();
    buf.push_op(Opcode::ConstI8);
    buf.push_operands(&[6, 2]);
    buf.push_op(Opcode::ConstI8);
    buf.push_operands(&[3, 3]);
    buf.push_op(Opcode::BitAnd);
    buf.push_operands(&[2, 3, 4]);
    emit_print(&mut buf, 4, 8, print as u16);
    buf.push_op(Opcode::BitXor);
    buf.push_operands(&[2, 3, 5]);
    emit_print(&mut buf, 5, 8, print as u16);
    buf.push_op(Opcode::Shl);
    buf.push_operands(&[2, 3, 6]);
    emit_print(&mut buf, 6, 8, print as u16);
    buf.push_op(Opcode::End);
    buf.push_operand(NO_MAIN_LOCAL);
    buf.main_local_size = 11;

    vm.eval(buf).expect("eval");
    assert_eq!(vm.host().out, "2\n5\n48\n");
}

#[test]
fn add_falls_back_to_string_concat() {
    let mut vm = new_vm();
    let print = vm.register_native("print", nat_print);

    let mut buf = ByteCodeBuffer::new();
    let hello = buf.intern_str("x=");
    let idx = buf.push_const_value(hello);
    buf.push_op(Opcode::ConstOp);
    buf.push_operand_u16(idx);
    buf.push_operand(2);
    buf.push_op(Opcode::ConstI8);
    buf.push_operands(&[9, 3]);
    buf.push_op(Opcode::Add);
    buf.push_operands(&[2, 3, 4]);
    emit_print(&mut buf, 4, 5, print as u16);
    buf.push_op(Opcode::Release);
    buf.push_operand(4);
    buf.push_op(Opcode::End);
    buf.push_operand(NO_MAIN_LOCAL);
    buf.main_local_size = 8;

    vm.eval(buf).expect("eval");
    assert_eq!(vm.host().out, "x=9\n");
    assert_eq!(vm.heap().live_objects(), 0);
    assert_eq!(vm.heap().rc_balance(), 0);
}

#[test]
fn none_and_bool_coerce_in_arithmetic() {
    let mut vm = new_vm();
    let print = vm.register_native("print", nat_print);

    let mut buf = ByteCodeBuffer::new();
    buf.push_op(Opcode::NoneOp);
    buf.push_operand(2);
    buf.push_op(Opcode::True);
    buf.push_operand(3);
    buf.push_op(Opcode::Add);
    buf.push_operands(&[2, 3, 4]);
    emit_print(&mut buf, 4, 5, print as u16);
    buf.push_op(Opcode::End);
    buf.push_operand(NO_MAIN_LOCAL);
    buf.main_local_size = 8;

    vm.eval(buf).expect("eval");
    assert_eq!(vm.host().out, "1\n");
}

#[test]
fn comparison_of_non_numbers_panics() {
    let mut vm = new_vm();

    let mut buf = ByteCodeBuffer::new();
    buf.push_debug_sym(0, 0, NULL_ID);
    buf.push_op(Opcode::True);
    buf.push_operand(2);
    buf.push_op(Opcode::ConstI8);
    buf.push_operands(&[1, 3]);
    buf.push_op(Opcode::Lt);
    buf.push_operands(&[2, 3, 4]);
    buf.push_op(Opcode::End);
    buf.push_operand(NO_MAIN_LOCAL);
    buf.main_local_size = 5;

    let err = vm.eval(buf).unwrap_err();
    assert_eq!(err.panic_reason(), Some(PanicReason::TypeMismatch));
}

#[test]
fn mixed_equality() {
    let mut vm = new_vm();
    let print = vm.register_native("print", nat_print);

    let mut buf = ByteCodeBuffer::new();
    let a = buf.intern_str("hi");
    let ia = buf.push_const_value(a);
    let b = buf.intern_str("hi");
    let ib = buf.push_const_value(b);
    buf.push_op(Opcode::ConstOp);
    buf.push_operand_u16(ia);
    buf.push_operand(2);
    buf.push_op(Opcode::ConstOp);
    buf.push_operand_u16(ib);
    buf.push_operand(3);
    // Distinct slices with equal contents compare equal.
    buf.push_op(Opcode::Eq);
    buf.push_operands(&[2, 3, 4]);
    emit_print(&mut buf, 4, 6, print as u16);
    // A number and none are not equal.
    buf.push_op(Opcode::ConstI8);
    buf.push_operands(&[0, 5]);
    buf.push_op(Opcode::NoneOp);
    buf.push_operand(2);
    buf.push_op(Opcode::Neq);
    buf.push_operands(&[5, 2, 4]);
    emit_print(&mut buf, 4, 6, print as u16);
    buf.push_op(Opcode::End);
    buf.push_operand(NO_MAIN_LOCAL);
    buf.main_local_size = 9;

    vm.eval(buf).expect("eval");
    assert_eq!(vm.host().out, "true\ntrue\n");
}

#[test]
fn neg_and_not() {
    let mut vm = new_vm();
    let print = vm.register_native("print", nat_print);

    let mut buf = ByteCodeBuffer::new();
    buf.push_op(Opcode::ConstI8);
    buf.push_operands(&[5, 2]);
    buf.push_op(Opcode::Neg);
    buf.push_operands(&[2, 3]);
    emit_print(&mut buf, 3, 6, print as u16);
    buf.push_op(Opcode::False);
    buf.push_operand(4);
    buf.push_op(Opcode::Not);
    buf.push_operands(&[4, 5]);
    emit_print(&mut buf, 5, 6, print as u16);
    buf.push_op(Opcode::End);
    buf.push_operand(NO_MAIN_LOCAL);
    buf.main_local_size = 9;

    vm.eval(buf).expect("eval");
    assert_eq!(vm.host().out, "-5\ntrue\n");
}
