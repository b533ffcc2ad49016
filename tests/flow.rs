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

fn emit_print(buf: &mut ByteCodeBuffer, slot: u8, start: u8, sym: u16) {
    buf.push_op(Opcode::Copy);
    buf.push_operands(&[slot, start + 2]);
    buf.push_op(Opcode::CallSym0);
    buf.push_operands(&[start, 1]);
    buf.push_operand_u16(sym);
}

#[test]
fn recursion_grows_the_stack() {
    // func f(n): if n == 0: return 0 else: return f(n-1) + 1
    // print f(10000)
    let mut vm = new_vm();
    let print = vm.register_native("print", nat_print);
    let f = vm.func_id("f");

    let mut buf = ByteCodeBuffer::new();
    // main
    let n = buf.push_const_value(Value::from_f64(10000.0));
    buf.push_op(Opcode::ConstOp);
    buf.push_operand_u16(n);
    buf.push_operand(4);
    buf.push_op(Opcode::CallSym1);
    buf.push_operands(&[2, 1]);
    buf.push_operand_u16(f as u16);
    emit_print(&mut buf, 2, 5, print as u16);
    buf.push_op(Opcode::End);
    buf.push_operand(NO_MAIN_LOCAL);

    // f(n), frame: 0 ret, 1 info, 2 n
    let f_pc = buf.next_pc();
    buf.push_op(Opcode::ConstI8);
    buf.push_operands(&[0, 3]);
    buf.push_op(Opcode::EqNum);
    buf.push_operands(&[2, 3, 4]);
    let branch_pc = buf.next_pc();
    buf.push_op(Opcode::JumpNotCond);
    buf.push_operand(4);
    buf.push_operand_i16(0); // patched to the else branch
    buf.push_op(Opcode::Ret1);
    buf.push_operand(3);
    let else_pc = buf.next_pc();
    buf.set_operand_u16(branch_pc + 2, (else_pc - branch_pc) as u16);
    buf.push_op(Opcode::ConstI8);
    buf.push_operands(&[1, 5]);
    buf.push_op(Opcode::Sub);
    buf.push_operands(&[2, 5, 6]);
    buf.push_op(Opcode::Copy);
    buf.push_operands(&[6, 9]);
    buf.push_op(Opcode::CallSym1);
    buf.push_operands(&[7, 1]);
    buf.push_operand_u16(f as u16);
    buf.push_op(Opcode::Add);
    buf.push_operands(&[7, 5, 10]);
    buf.push_op(Opcode::Ret1);
    buf.push_operand(10);

    buf.main_local_size = 8;
    vm.register_func("f", f_pc, 1, 11);

    vm.eval(buf).expect("eval");
    assert_eq!(vm.host().out, "10000\n");
    // Deep recursion cannot fit the initial allocation.
    assert!(vm.stack().len() > VmParams::default().initial_stack_len);
    assert_eq!(vm.heap().rc_balance(), 0);
}

#[test]
fn stack_growth_has_a_limit() {
    // Infinite recursion must surface StackOverflow, not abort.
    let mut vm = Vm::with_host(
        CaptureHost::default(),
        VmParams {
            max_stack_len: 4096,
            ..VmParams::default()
        },
    );
    let f = vm.func_id("f");

    let mut buf = ByteCodeBuffer::new();
    buf.push_op(Opcode::CallSym0);
    buf.push_operands(&[2, 0]);
    buf.push_operand_u16(f as u16);
    buf.push_op(Opcode::End);
    buf.push_operand(NO_MAIN_LOCAL);
    let f_pc = buf.next_pc();
    buf.push_op(Opcode::CallSym0);
    buf.push_operands(&[2, 0]);
    buf.push_operand_u16(f as u16);
    buf.push_op(Opcode::Ret0);
    buf.main_local_size = 4;
    vm.register_func("f", f_pc, 0, 4);

    let err = vm.eval(buf).unwrap_err();
    assert!(matches!(err, VmError::StackOverflow));
}

#[test]
fn for_range_loops() {
    // sum 0..5
    let mut vm = new_vm();
    let print = vm.register_native("print", nat_print);

    let mut buf = ByteCodeBuffer::new();
    buf.push_op(Opcode::ConstI8);
    buf.push_operands(&[0, 2]); // i
    buf.push_op(Opcode::ConstI8);
    buf.push_operands(&[5, 3]); // limit
    buf.push_op(Opcode::ConstI8);
    buf.push_operands(&[0, 4]); // sum
    let body_pc = buf.next_pc();
    buf.push_op(Opcode::Add);
    buf.push_operands(&[4, 2, 4]);
    let range_pc = buf.next_pc();
    buf.push_op(Opcode::ForRange);
    buf.push_operands(&[2, 3]);
    buf.push_operand_i16(body_pc as i16 - range_pc as i16);
    emit_print(&mut buf, 4, 5, print as u16);
    buf.push_op(Opcode::End);
    buf.push_operand(NO_MAIN_LOCAL);
    buf.main_local_size = 8;

    vm.eval(buf).expect("eval");
    assert_eq!(vm.host().out, "10\n");
}

#[test]
fn call0_discards_a_heap_result() {
    // A function that builds and returns a list, called for effect only.
    let mut vm = new_vm();
    let f = vm.func_id("mklist");

    let mut buf = ByteCodeBuffer::new();
    buf.push_op(Opcode::CallSym0);
    buf.push_operands(&[2, 0]);
    buf.push_operand_u16(f as u16);
    buf.push_op(Opcode::End);
    buf.push_operand(NO_MAIN_LOCAL);
    let f_pc = buf.next_pc();
    buf.push_op(Opcode::ConstI8);
    buf.push_operands(&[1, 2]);
    buf.push_op(Opcode::ListBuild);
    buf.push_operands(&[2, 1, 3]);
    buf.push_op(Opcode::Ret1);
    buf.push_operand(3);
    buf.main_local_size = 5;
    vm.register_func("mklist", f_pc, 0, 4);

    vm.eval(buf).expect("eval");
    assert_eq!(vm.heap().live_objects(), 0);
    assert_eq!(vm.heap().rc_balance(), 0);
}

#[test]
fn unbound_symbol_panics() {
    let mut vm = new_vm();
    let ghost = vm.func_id("ghost");

    let mut buf = ByteCodeBuffer::new();
    buf.push_debug_sym(0, 0, NULL_ID);
    buf.push_op(Opcode::CallSym0);
    buf.push_operands(&[2, 0]);
    buf.push_operand_u16(ghost as u16);
    buf.push_op(Opcode::End);
    buf.push_operand(NO_MAIN_LOCAL);
    buf.main_local_size = 4;

    let err = vm.eval(buf).unwrap_err();
    assert_eq!(err.panic_reason(), Some(PanicReason::UnboundSymbol));
}

#[test]
fn arity_mismatch_is_fatal() {
    let mut vm = new_vm();
    let f = vm.func_id("f");

    let mut buf = ByteCodeBuffer::new();
    buf.push_debug_sym(0, 0, NULL_ID);
    buf.push_op(Opcode::ConstI8);
    buf.push_operands(&[1, 4]);
    buf.push_op(Opcode::CallSym0);
    buf.push_operands(&[2, 1]);
    buf.push_operand_u16(f as u16);
    buf.push_op(Opcode::End);
    buf.push_operand(NO_MAIN_LOCAL);
    let f_pc = buf.next_pc();
    buf.push_op(Opcode::Ret0);
    buf.main_local_size = 5;
    vm.register_func("f", f_pc, 2, 5);

    let err = vm.eval(buf).unwrap_err();
    assert_eq!(err.panic_reason(), Some(PanicReason::ArityMismatch));
}

/// Native that re-enters the interpreter to invoke a user callable with one
/// argument, printing the result (the comparator pattern).
fn nat_apply(vm: &mut Vm<CaptureHost>, args: *const Value, _num_args: u8) -> Value {
    let (callee, arg) = unsafe { (*args, *args.add(1)) };
    match vm.call_value(callee, &[arg]) {
        Ok(result) => {
            let line = format!("{}\n", vm.value_to_string(result));
            vm.host_mut().write_stdout(&line);
            vm.release(result);
            Value::none()
        }
        Err(_) => Value::from_error_tag(0),
    }
}

#[test]
fn native_reenters_the_interpreter() {
    let mut vm = new_vm();
    let apply = vm.register_native("apply", nat_apply);
    vm.ensure_tag("applyFailed");

    let mut buf = ByteCodeBuffer::new();
    // lambda doubling its argument
    buf.push_op(Opcode::LambdaBuild);
    let lambda_pc_patch = buf.next_pc();
    buf.push_operand_u16(0); // patched
    buf.push_operands(&[1, 6, 2]);
    buf.push_op(Opcode::ConstI8);
    buf.push_operands(&[21, 3]);
    // apply(lambda, 21)
    buf.push_op(Opcode::CopyRetainSrc);
    buf.push_operands(&[2, 6]);
    buf.push_op(Opcode::Copy);
    buf.push_operands(&[3, 7]);
    buf.push_op(Opcode::CallSym0);
    buf.push_operands(&[4, 2]);
    buf.push_operand_u16(apply as u16);
    buf.push_op(Opcode::Release);
    buf.push_operand(6);
    buf.push_op(Opcode::Release);
    buf.push_operand(2);
    buf.push_op(Opcode::End);
    buf.push_operand(NO_MAIN_LOCAL);

    // lambda body: frame 0 ret, 1 info, 2 x, 3 callee
    let body_pc = buf.next_pc();
    buf.set_operand_u16(lambda_pc_patch, body_pc as u16);
    buf.push_op(Opcode::ConstI8);
    buf.push_operands(&[2, 4]);
    buf.push_op(Opcode::Mul);
    buf.push_operands(&[2, 4, 5]);
    buf.push_op(Opcode::Release);
    buf.push_operand(3);
    buf.push_op(Opcode::Ret1);
    buf.push_operand(5);

    buf.main_local_size = 8;
    vm.eval(buf).expect("eval");
    assert_eq!(vm.host().out, "42\n");
    assert_eq!(vm.heap().live_objects(), 0);
    assert_eq!(vm.heap().rc_balance(), 0);
}
