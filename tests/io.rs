use chadsembler::{
    assemble, BufferedIo, IoChannel, MachineConfig, OutputEvent, RunOutcome, Status, StepResult, Vm, VmError,
};
use pretty_assertions::assert_eq;

#[test]
fn input_suspends_and_resumes() {
    let program = assemble("INP\nHLT", &MachineConfig::default()).unwrap();
    let mut vm = Vm::from_program(&program).unwrap();

    let r = vm.run(100);
    assert_eq!(r.outcome, RunOutcome::NeedsInput);
    assert_eq!(vm.status(), Status::Running);
    assert!(vm.awaiting_input());
    // asking again without input changes nothing
    assert_eq!(vm.step(), StepResult::NeedsInput);

    vm.resume_with_input(42).unwrap();
    assert!(!vm.awaiting_input());
    assert_eq!(vm.run(100).outcome, RunOutcome::Halted);
    assert_eq!(vm.acc(), 42);
}

#[test]
fn resume_without_pending_input() {
    let program = assemble("HLT", &MachineConfig::default()).unwrap();
    let mut vm = Vm::from_program(&program).unwrap();
    assert_eq!(vm.resume_with_input(1), Err(VmError::NotAwaitingInput));
}

#[test]
fn queued_input_into_memory() {
    let program = assemble("INP @x\nLDA x\nOUT\nHLT\nx DAT", &MachineConfig::default()).unwrap();
    let mut vm = Vm::load_with_io(&program, &program.config, BufferedIo::with_input([7])).unwrap();
    assert_eq!(vm.run(100).outcome, RunOutcome::Halted);
    assert_eq!(vm.io().output, vec![OutputEvent::Number(7)]);
    assert_eq!(vm.peek(4).unwrap(), 7);
}

#[test]
fn input_arriving_later_is_picked_up_by_step() {
    let program = assemble("INP R1\nHLT", &MachineConfig::default()).unwrap();
    let mut vm = Vm::from_program(&program).unwrap();
    assert_eq!(vm.step(), StepResult::NeedsInput);
    vm.io_mut().push_input(-9);
    assert_eq!(vm.step(), StepResult::Continue);
    assert_eq!(vm.snapshot().registers[0], -9);
    assert_eq!(vm.step(), StepResult::Halted);
}

#[test]
fn outputs_in_program_order() {
    let program = assemble("OUT #72\nOUTC #72\nOUTC #105\nOUTB #5\nHLT", &MachineConfig::default()).unwrap();
    let mut vm = Vm::from_program(&program).unwrap();
    vm.run(100);
    assert_eq!(
        vm.io().output,
        vec![
            OutputEvent::Number(72),
            OutputEvent::Char('H'),
            OutputEvent::Char('i'),
            OutputEvent::Binary(format!("{:032b}", 5)),
        ]
    );
    assert_eq!(vm.io().transcript(), format!("72\nHi{:032b}\n", 5));
}

#[test]
fn input_is_masked_to_the_word() {
    let cfg = MachineConfig {
        memory_size: 32,
        register_count: 0,
        stack_region: 4,
        word_width: 16,
        ..MachineConfig::default()
    };
    let program = assemble("INP\nHLT", &cfg).unwrap();
    let mut vm = Vm::from_program(&program).unwrap();
    vm.run(10);
    vm.resume_with_input(70_000).unwrap();
    // 70000 = 0x11170
    assert_eq!(vm.acc(), 0x1170);
}

/// A channel that answers every request with the same value and counts outputs.
struct Constant {
    value: i64,
    seen: usize,
}

impl IoChannel for Constant {
    fn provide_input(&mut self) -> Option<i64> {
        Some(self.value)
    }

    fn consume_output(&mut self, _event: OutputEvent) {
        self.seen += 1;
    }
}

#[test]
fn custom_channel() {
    let program = assemble("INP\nOUT\nADD #1\nOUT\nHLT", &MachineConfig::default()).unwrap();
    let mut vm = Vm::load_with_io(&program, &program.config, Constant { value: 10, seen: 0 }).unwrap();
    assert_eq!(vm.run(100).outcome, RunOutcome::Halted);
    assert_eq!(vm.io().seen, 2);
    assert_eq!(vm.acc(), 11);
}
