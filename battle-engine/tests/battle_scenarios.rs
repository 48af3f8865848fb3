//! End-to-end battles against the fake backend

use battle_engine::{
    run_battle, BattleConfig, BotSpec, CancelToken, ConfigError, EngineConfig, Outcome, RunError,
};
use r2_backend::fake::{FakeOpener, FakeScript};
use r2_backend::Target;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("battle_engine=debug")
        .with_test_writer()
        .try_init();
}

fn battle(max_rounds: u64, sources: &[&str]) -> BattleConfig {
    BattleConfig {
        arena_size: 4096,
        max_rounds,
        bots: sources
            .iter()
            .enumerate()
            .map(|(i, src)| BotSpec::new(i as u64 + 1, format!("bot{}", i), *src, "x86", 32))
            .collect(),
    }
}

#[test]
fn test_first_instruction_trap_ends_round_zero() {
    init_tracing();
    let opener = FakeOpener::default();
    let config = battle(100, &["int3", "jmp $"]);

    let report = run_battle(&opener, &config, &EngineConfig::default(), &CancelToken::new()).unwrap();

    assert_eq!(report.outcome, Outcome::TerminatedByBot { bot: 0, round: 0 });
    assert_eq!(report.trace.round_count(), 1);
    assert_eq!(report.trace.rounds()[0].bot, 0);
    assert_eq!(report.trace.text().matches("# ROUND ").count(), 1);
    assert_eq!(opener.released(), 1);
}

#[test]
fn test_harmless_bots_play_every_round() {
    let opener = FakeOpener::default();
    let config = battle(10, &["jmp $", "jmp $"]);

    let report = run_battle(&opener, &config, &EngineConfig::default(), &CancelToken::new()).unwrap();

    assert_eq!(report.outcome, Outcome::MaxRoundsReached { rounds: 10 });
    let order: Vec<usize> = report.trace.rounds().iter().map(|r| r.bot).collect();
    assert_eq!(order, vec![0, 1, 0, 1, 0, 1, 0, 1, 0, 1]);
    assert!(report.warnings.is_empty());
}

#[test]
fn test_second_bot_can_lose() {
    let opener = FakeOpener::default();
    let config = battle(100, &["nop\nnop\njmp $", "nop\nud2"]);

    let report = run_battle(&opener, &config, &EngineConfig::default(), &CancelToken::new()).unwrap();

    // beta: round 1 runs nop, round 3 runs ud2
    assert_eq!(report.outcome, Outcome::TerminatedByBot { bot: 1, round: 3 });
    assert_eq!(report.trace.round_count(), 4);
}

#[test]
fn test_round_robin_over_three_bots() {
    let opener = FakeOpener::default();
    let config = battle(7, &["jmp $", "jmp $", "jmp $"]);

    let report = run_battle(&opener, &config, &EngineConfig::default(), &CancelToken::new()).unwrap();

    let order: Vec<usize> = report.trace.rounds().iter().map(|r| r.bot).collect();
    assert_eq!(order, vec![0, 1, 2, 0, 1, 2, 0]);
    let bases: Vec<&str> = report.trace.rounds().iter().take(3).map(|r| r.pc.as_str()).collect();
    assert_eq!(bases, vec!["0x00000032", "0x00000064", "0x00000096"]);
}

#[test]
fn test_zero_rounds_is_an_immediate_draw() {
    let opener = FakeOpener::default();
    let config = battle(0, &["int3", "int3"]);

    let report = run_battle(&opener, &config, &EngineConfig::default(), &CancelToken::new()).unwrap();

    assert_eq!(report.outcome, Outcome::MaxRoundsReached { rounds: 0 });
    assert_eq!(report.trace.round_count(), 0);
    assert!(!report.trace.text().contains("# ROUND"));
}

#[test]
fn test_identical_battles_produce_identical_traces() {
    let config = battle(20, &["inc a0\njmp $", "nop\nnop\nnop\njmp $"]);

    let first = run_battle(&FakeOpener::default(), &config, &EngineConfig::default(), &CancelToken::new())
        .unwrap();
    let second = run_battle(&FakeOpener::default(), &config, &EngineConfig::default(), &CancelToken::new())
        .unwrap();

    assert_eq!(first.trace.text(), second.trace.text());
    assert_eq!(first.trace.rounds(), second.trace.rounds());
}

#[test]
fn test_backend_failure_keeps_partial_trace() {
    let opener = FakeOpener::new(FakeScript {
        fail_on_step: Some(3),
        ..FakeScript::default()
    });
    let config = battle(10, &["jmp $", "jmp $"]);

    let failure = run_battle(&opener, &config, &EngineConfig::default(), &CancelToken::new()).unwrap_err();

    assert!(matches!(failure.error, RunError::Backend(_)));
    assert_eq!(failure.trace.round_count(), 3);
    assert!(failure.trace.text().contains("# ROUND 3, BOT 1"));
    assert_eq!(opener.opened(), 1);
    assert_eq!(opener.released(), 1);
}

#[test]
fn test_unexpected_flag_value_does_not_stop_the_battle() {
    let opener = FakeOpener::new(FakeScript {
        flag_after_step: vec![(2, "theend".to_string(), 2)],
        ..FakeScript::default()
    });
    let config = battle(10, &["jmp $", "jmp $"]);

    let report = run_battle(&opener, &config, &EngineConfig::default(), &CancelToken::new()).unwrap();

    assert_eq!(report.outcome, Outcome::MaxRoundsReached { rounds: 10 });
    assert_eq!(report.trace.round_count(), 10);
    // the flag keeps its odd value for the rest of the battle
    assert_eq!(report.warnings.len(), 8);
    assert_eq!(report.warnings[0].round, 2);
    assert_eq!(report.warnings[0].bot, 0);
    assert_eq!(report.warnings[0].value, "0x2");
}

#[test]
fn test_assembly_failure_aborts_and_releases() {
    let opener = FakeOpener::default();
    let config = battle(10, &["jmp $", "mov eax, ebx"]);

    let failure = run_battle(&opener, &config, &EngineConfig::default(), &CancelToken::new()).unwrap_err();

    match &failure.error {
        RunError::Assembly { bot, .. } => assert_eq!(*bot, 1),
        other => panic!("expected assembly error, got {:?}", other),
    }
    assert_eq!(failure.error.reason(), "err building bot");
    assert!(failure.trace.text().contains("# Assembling the bots"));
    assert_eq!(opener.released(), opener.opened());
}

#[test]
fn test_bytecode_longer_than_stride_is_a_config_error() {
    let opener = FakeOpener::default();
    let config = battle(10, &["nop\nnop\nnop\nnop", "jmp $"]);
    let engine = EngineConfig {
        stride: 3,
        ..EngineConfig::default()
    };

    let failure = run_battle(&opener, &config, &engine, &CancelToken::new()).unwrap_err();

    assert!(matches!(
        failure.error,
        RunError::Config(ConfigError::BytecodeExceedsStride { bot: 0, len: 4, stride: 3 })
    ));
    assert!(!opener.journal().iter().any(|cmd| cmd.starts_with("wx ")));
}

#[test]
fn test_oversized_arena_is_an_allocation_error() {
    let opener = FakeOpener::new(FakeScript {
        max_arena: 1024,
        ..FakeScript::default()
    });
    let config = battle(10, &["jmp $"]);

    let failure = run_battle(&opener, &config, &EngineConfig::default(), &CancelToken::new()).unwrap_err();

    assert!(matches!(failure.error, RunError::ArenaAllocation { size: 4096, .. }));
    assert_eq!(opener.opened(), 0);
}

#[test]
fn test_misreported_arena_is_an_allocation_error() {
    let opener = FakeOpener::new(FakeScript {
        misreported_size: Some(512),
        ..FakeScript::default()
    });
    let config = battle(10, &["jmp $"]);

    let failure = run_battle(&opener, &config, &EngineConfig::default(), &CancelToken::new()).unwrap_err();

    assert!(matches!(failure.error, RunError::ArenaAllocation { .. }));
    assert_eq!(opener.released(), 1);
}

#[test]
fn test_invalid_battle_never_opens_a_backend() {
    let opener = FakeOpener::default();
    let config = battle(10, &[]);

    let failure = run_battle(&opener, &config, &EngineConfig::default(), &CancelToken::new()).unwrap_err();

    assert!(matches!(failure.error, RunError::Config(ConfigError::NoBots)));
    assert_eq!(opener.opened(), 0);
}

#[test]
fn test_round_commands_follow_the_protocol() {
    let opener = FakeOpener::default();
    let config = battle(1, &["nop\njmp $", "jmp $"]);

    run_battle(&opener, &config, &EngineConfig::default(), &CancelToken::new()).unwrap();

    let journal = opener.journal();
    assert_eq!(journal[0], "?v $s");
    let step = journal.iter().position(|c| c == "aes").unwrap();
    assert_eq!(journal[step - 4], "e asm.arch=x86");
    assert_eq!(journal[step - 3], "e asm.bits=32");
    assert!(journal[step - 2].starts_with("aer pc=0x00000032;"));
    assert_eq!(journal[step - 1], "aer~$(arn PC)~[1]");
    assert_eq!(journal[step + 1], "aerR");
    assert_eq!(journal[step + 2], "pxc 100 @ 0x32");
    assert_eq!(journal[step + 3], "?v theend");
    assert_eq!(Target::Arena(config.arena_size).to_string(), "malloc://4096");
}
