use chadsembler::{assemble, ConfigError, MachineConfig, RunOutcome, Vm};
use pretty_assertions::assert_eq;

#[test]
fn defaults() {
    let cfg = MachineConfig::default();
    assert_eq!(
        (cfg.memory_size, cfg.register_count, cfg.clock_speed, cfg.stack_region, cfg.word_width),
        (100, 4, 0, 10, 32)
    );
    assert_eq!(cfg.stack_base(), 90);
}

#[test]
fn validation_errors() {
    let cfg = |f: fn(&mut MachineConfig)| {
        let mut c = MachineConfig::default();
        f(&mut c);
        c.validate()
    };
    assert_eq!(cfg(|c| c.memory_size = 0), Err(ConfigError::EmptyMemory));
    assert_eq!(cfg(|c| c.word_width = 65), Err(ConfigError::WordWidth(65)));
    assert_eq!(
        cfg(|c| c.stack_region = 101),
        Err(ConfigError::StackTooLarge { stack: 101, memory: 100 })
    );
    assert!(cfg(|c| c.register_count = 0).is_ok());
}

#[test]
fn config_roundtrips_through_json_with_defaults() {
    let cfg: MachineConfig = serde_json::from_str(r#"{ "memory_size": 64 }"#).unwrap();
    assert_eq!(cfg.memory_size, 64);
    assert_eq!(cfg.register_count, 4);
}

#[test]
fn no_general_registers() {
    let cfg = MachineConfig {
        register_count: 0,
        ..MachineConfig::default()
    };
    assert!(assemble("LDA #1, R1", &cfg).is_err());
    let program = assemble("LDA #2\nADD #3\nHLT", &cfg).unwrap();
    let mut vm = Vm::from_program(&program).unwrap();
    assert_eq!(vm.run(10).outcome, RunOutcome::Halted);
    assert_eq!(vm.acc(), 5);
    assert!(vm.snapshot().registers.is_empty());
}

#[test]
fn wide_words() {
    let program = assemble(
        "!WIDTH=64\nLDA big\nADD #1\nHLT\nbig DAT 9223372036854775806",
        &MachineConfig::default(),
    )
    .unwrap();
    let mut vm = Vm::from_program(&program).unwrap();
    vm.run(10);
    assert_eq!(vm.acc(), i64::MAX);
}
