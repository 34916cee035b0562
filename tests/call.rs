use chadsembler::{assemble, FaultKind, MachineConfig, OutputEvent, RunOutcome, Vm};
use pretty_assertions::assert_eq;

fn run(src: &str) -> Vm {
    let program = assemble(src, &MachineConfig::default()).unwrap();
    let mut vm = Vm::from_program(&program).unwrap();
    vm.run(10_000);
    vm
}

#[test]
fn call_ret_balance() {
    let vm = run("
        LDA #0
        CALL inc
        CALL inc
        OUT
        HLT
inc:    ADD #1
        RET
");
    let snap = vm.snapshot();
    assert_eq!(snap.acc, 2);
    assert_eq!(snap.sp, 100); // stack empty again
    // the last CALL (at 2) left its return address in the top cell
    assert_eq!(snap.memory[99], 3);
    assert_eq!(vm.io().output, vec![OutputEvent::Number(2)]);
}

#[test]
fn nested_call_overflows_single_cell_stack() {
    let src = "
!STACK=1
        CALL a
        HLT
a:      CALL b
        RET
b:      RET
";
    let program = assemble(src, &MachineConfig::default()).unwrap();
    let mut vm = Vm::from_program(&program).unwrap();
    let r = vm.run(100);
    let RunOutcome::Faulted(fault) = r.outcome else {
        panic!("expected a fault, got {:?}", r.outcome);
    };
    assert_eq!(fault.kind, FaultKind::StackOverflow { sp: 99 });
    assert_eq!(fault.pc, 2);
}

#[test]
fn unbounded_recursion_faults() {
    let vm = run("rec: CALL rec");
    let fault = vm.fault().unwrap();
    assert_eq!(fault.kind, FaultKind::StackOverflow { sp: 90 });
    assert_eq!(vm.cycles(), 11);
    // all ten frames hold the same return address
    let snap = vm.snapshot();
    assert!(snap.memory[90..].iter().all(|&ret| ret == 1));
}

#[test]
fn ret_on_empty_stack() {
    let vm = run("RET");
    let fault = vm.fault().unwrap();
    assert_eq!(fault.kind, FaultKind::StackUnderflow);
    assert_eq!(fault.pc, 0);
}

#[test]
fn procedure_with_register_argument() {
    // square R1 into ACC
    let vm = run("
        LDA #7, R1
        CALL square
        OUT
        HLT
square: LDA %R1
        MUL %R1
        RET
");
    assert_eq!(vm.io().output, vec![OutputEvent::Number(49)]);
}
