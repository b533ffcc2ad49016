use rill_vm::consts::VmParams;
use rill_vm::host::CaptureHost;
use rill_vm::prelude::*;

fn new_vm() -> Vm<CaptureHost> {
    Vm::with_host(CaptureHost::default(), VmParams::default())
}

#[test]
fn missing_end_op_is_rejected() {
    let mut vm = new_vm();
    let mut buf = ByteCodeBuffer::new();
    buf.push_op(Opcode::ConstI8);
    buf.push_operands(&[1, 2]);
    buf.main_local_size = 3;

    let err = vm.eval(buf).unwrap_err();
    assert!(matches!(err, VmError::NoEndOp));
}

#[test]
fn panic_without_debug_symbols_reports_no_debug_sym() {
    let mut vm = new_vm();
    let mut buf = ByteCodeBuffer::new();
    buf.push_op(Opcode::True);
    buf.push_operand(2);
    buf.push_op(Opcode::Throw);
    buf.push_operand(2);
    buf.push_op(Opcode::End);
    buf.push_operand(NO_MAIN_LOCAL);
    buf.main_local_size = 3;

    let err = vm.eval(buf).unwrap_err();
    assert!(matches!(err, VmError::NoDebugSym(_)));
}

#[test]
fn throw_builds_a_two_frame_trace() {
    // main calls boom(), which throws error#bad on source line 4.
    let mut vm = new_vm();
    let bad = vm.ensure_tag("bad");
    let boom = vm.func_id("boom");

    let mut buf = ByteCodeBuffer::new();
    buf.src = "var x = 1\nboom()\n\nthrow error#bad\n".to_string();

    // main, declared at offset 10 ("boom()")
    buf.push_debug_sym(0, 10, NULL_ID);
    buf.push_op(Opcode::CallSym0);
    buf.push_operands(&[2, 0]);
    buf.push_operand_u16(boom as u16);
    buf.push_op(Opcode::End);
    buf.push_operand(NO_MAIN_LOCAL);

    // boom(): the throw sits at offset 18 (line 4, col 1)
    let boom_pc = buf.next_pc();
    buf.push_debug_sym(boom_pc, 18, boom);
    let err_const = buf.push_const_value(Value::from_error_tag(bad));
    buf.push_op(Opcode::ConstOp);
    buf.push_operand_u16(err_const);
    buf.push_operand(2);
    buf.push_op(Opcode::Throw);
    buf.push_operand(2);
    buf.push_op(Opcode::Ret0);

    buf.main_local_size = 4;
    vm.register_func("boom", boom_pc, 0, 3);

    let err = vm.eval(buf).unwrap_err();
    assert_eq!(err.panic_reason(), Some(PanicReason::UserError));
    assert!(err.to_string().contains("bad"));

    let trace = err.trace();
    assert_eq!(trace.len(), 2);
    assert_eq!(trace[0].func_name, "boom");
    assert_eq!((trace[0].line, trace[0].col), (4, 1));
    assert_eq!(trace[1].func_name, "main");
    assert_eq!((trace[1].line, trace[1].col), (2, 1));
}

#[test]
fn out_of_bounds_panic_points_at_main() {
    let mut vm = new_vm();

    let mut buf = ByteCodeBuffer::new();
    buf.src = "xs[9]".to_string();
    buf.push_debug_sym(0, 0, NULL_ID);
    buf.push_op(Opcode::ConstI8);
    buf.push_operands(&[1, 3]);
    buf.push_op(Opcode::ListBuild);
    buf.push_operands(&[3, 1, 2]);
    buf.push_op(Opcode::ConstI8);
    buf.push_operands(&[9, 3]);
    buf.push_op(Opcode::IndexGet);
    buf.push_operands(&[2, 3, 4]);
    buf.push_op(Opcode::End);
    buf.push_operand(NO_MAIN_LOCAL);
    buf.main_local_size = 5;

    let err = vm.eval(buf).unwrap_err();
    assert_eq!(err.panic_reason(), Some(PanicReason::OutOfBounds));
    let trace = err.trace();
    assert_eq!(trace.len(), 1);
    assert_eq!(trace[0].func_name, "main");
    assert_eq!((trace[0].line, trace[0].col), (1, 1));
}

#[test]
fn trace_renders_one_frame_per_line() {
    use rill_vm::backtrace::{format_trace, StackFrame};

    let frames = vec![
        StackFrame {
            func_name: "boom".into(),
            line: 4,
            col: 1,
        },
        StackFrame {
            func_name: "main".into(),
            line: 2,
            col: 1,
        },
    ];
    assert_eq!(format_trace(&frames), "boom:4:1\nmain:2:1");
}
