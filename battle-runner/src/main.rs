use anyhow::{bail, Context, Result};
use battle_engine::{CancelToken, EngineConfig};
use battle_runner::{preview_bot, run_battles, FileStore};
use clap::{Parser, Subcommand};
use r2_backend::{PipeOptions, R2Opener};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "battle-runner", about = "Run assembly bot battles on radare2")]
struct Cli {
    /// Directory holding battles/ and traces/.
    #[arg(long, default_value = ".")]
    store: PathBuf,

    /// radare2 executable.
    #[arg(long, default_value = "r2")]
    r2: PathBuf,

    /// Distance between bot base addresses in the arena.
    #[arg(long, default_value_t = battle_engine::config::DEFAULT_STRIDE)]
    stride: u64,

    /// Bytes of arena dumped into the trace after every round.
    #[arg(long, default_value_t = battle_engine::config::DEFAULT_DUMP_WINDOW)]
    dump_window: u64,

    /// Per-command backend timeout in milliseconds (0 waits forever).
    #[arg(long, default_value_t = 10_000)]
    step_timeout_ms: u64,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Run battles and store their traces.
    Run {
        /// Battle ids; independent battles run in parallel.
        #[arg(required = true)]
        ids: Vec<u64>,
    },
    /// Show the bytecode and disassembly of one bot.
    Preview {
        /// Battle the bot is entered in.
        battle: u64,
        /// Bot id.
        bot: u64,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let timeout = match cli.step_timeout_ms {
        0 => None,
        ms => Some(Duration::from_millis(ms)),
    };
    let opener = R2Opener::new(PipeOptions {
        program: cli.r2.clone(),
        timeout,
    });
    let store = FileStore::new(&cli.store);

    match cli.command {
        Cmd::Run { ids } => {
            let config = EngineConfig {
                stride: cli.stride,
                dump_window: cli.dump_window,
            };
            let results = run_battles(&store, &opener, &ids, &config, &CancelToken::new());

            let mut failed = 0;
            for (id, result) in results {
                match result {
                    Ok(report) => println!("battle {}: {}", id, report.outcome),
                    Err(e) => {
                        failed += 1;
                        tracing::error!("battle {} failed: {}", id, e);
                        println!("battle {}: {}", id, e.reason());
                    }
                }
            }
            if failed > 0 {
                bail!("{} of {} battles failed", failed, ids.len());
            }
        }
        Cmd::Preview { battle, bot } => {
            let preview = preview_bot(&store, &opener, battle, bot)
                .with_context(|| format!("Failed to preview bot {} of battle {}", bot, battle))?;
            println!("> {}", preview.assemble_command);
            println!("{}", preview.bytecode_hex);
            println!("> {}", preview.disassemble_command);
            println!("{}", preview.disassembly);
        }
    }

    Ok(())
}
