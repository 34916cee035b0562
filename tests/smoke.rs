use chadsembler::{assemble, BufferedIo, MachineConfig, OutputEvent, RunOutcome, Status, StepResult, Vm};
use pretty_assertions::assert_eq;

#[test]
fn lmc_add_and_store() {
    let program = assemble("LDA 5\nADD 6\nSTA 7\nHLT", &MachineConfig::default()).unwrap();
    let mut vm = Vm::from_program(&program).unwrap();
    vm.poke(5, 3).unwrap();
    vm.poke(6, 4).unwrap();

    let r = vm.run(100);
    assert_eq!(r.outcome, RunOutcome::Halted);
    assert_eq!(r.cycles, 4);
    assert_eq!(vm.peek(7).unwrap(), 7);
    assert_eq!(vm.acc(), 7);
    assert_eq!(vm.status(), Status::Halted);
}

#[test]
fn halted_is_terminal() {
    let program = assemble("HLT", &MachineConfig::default()).unwrap();
    let mut vm = Vm::from_program(&program).unwrap();
    assert_eq!(vm.status(), Status::Ready);
    assert_eq!(vm.step(), StepResult::Halted);
    assert_eq!(vm.step(), StepResult::Halted);
    assert_eq!(vm.cycles(), 1);
    assert_eq!(vm.run(10).cycles, 0);
}

#[test]
fn countdown() {
    let src = "
        INP
loop:   OUT
        SUB #1
        BRP loop
        HLT
";
    let program = assemble(src, &MachineConfig::default()).unwrap();
    let mut vm = Vm::load_with_io(&program, &program.config, BufferedIo::with_input([3])).unwrap();
    assert_eq!(vm.run(1_000).outcome, RunOutcome::Halted);
    let out: Vec<OutputEvent> = vm.io_mut().take_output();
    assert_eq!(
        out,
        vec![
            OutputEvent::Number(3),
            OutputEvent::Number(2),
            OutputEvent::Number(1),
            OutputEvent::Number(0),
        ]
    );
    assert_eq!(vm.acc(), -1);
}

#[test]
fn empty_cells_halt() {
    // memory beyond the program is zero, which decodes as HLT
    let program = assemble("NOP\nNOP", &MachineConfig::default()).unwrap();
    let mut vm = Vm::from_program(&program).unwrap();
    let r = vm.run(100);
    assert_eq!(r.outcome, RunOutcome::Halted);
    assert_eq!(r.cycles, 3);
    assert_eq!(vm.snapshot().pc, 3);
}
