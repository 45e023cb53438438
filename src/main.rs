use std::error::Error;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use ledger_eng::csv::{read_commands, write_balances};
use ledger_eng::{Amount, Batch, Ledger, LedgerConfig, RetryPolicy};
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// 100 years; longer ttls cannot be subtracted from the current time.
const MAX_PENDING_TTL_SECS: u64 = 100 * 365 * 24 * 60 * 60;

#[derive(Parser, Debug)]
#[command(name = "ledger-eng")]
#[command(about = "Replay a csv of ledger commands and print user balances")]
struct Cli {
    /// Commands file with columns `type,user,peer,tx,amount`.
    path: PathBuf,

    /// Balance of accounts opened for registered users.
    #[arg(long, env = "LEDGER_STARTING_BALANCE", default_value = "1000")]
    starting_balance: Amount,

    /// Attempts per operation on write conflicts.
    #[arg(long, env = "LEDGER_MAX_ATTEMPTS", default_value_t = 5)]
    max_attempts: u32,

    /// Age in seconds after which pending transfers expire (0 disables expiry).
    #[arg(
        long,
        env = "LEDGER_PENDING_TTL_SECS",
        default_value_t = 86_400,
        value_parser = clap::value_parser!(u64).range(0..=MAX_PENDING_TTL_SECS)
    )]
    pending_ttl_secs: u64,
}

impl Cli {
    fn config(&self) -> LedgerConfig {
        let retry = RetryPolicy {
            max_attempts: self.max_attempts,
            ..RetryPolicy::default()
        };
        let ttl = (self.pending_ttl_secs > 0).then(|| Duration::from_secs(self.pending_ttl_secs));
        LedgerConfig::default()
            .with_starting_balance(self.starting_balance)
            .with_retry(retry)
            .with_pending_ttl(ttl)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse()?))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    if cli.path.extension().is_none_or(|ext| ext != "csv") {
        warn!(path = %cli.path.display(), "input file seems to not be a csv file");
    }

    let commands = read_commands(cli.path.clone())?;
    let config = cli.config();
    let sweep_every = config.pending_ttl.map(|ttl| ttl.min(Duration::from_secs(60)));
    let ledger = Ledger::in_memory(config);
    let sweeper = sweep_every.map(|every| ledger.spawn_expiry_sweeper(every));
    let mut batch = Batch::new(ledger);
    let (cmd_sender, cmd_receiver) = tokio::sync::mpsc::channel(16);

    let reader = tokio::task::spawn_blocking(move || {
        for result in commands {
            match result {
                Ok(command) => {
                    if cmd_sender.blocking_send(command).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("{e}");
                }
            }
        }
    });

    batch.run(ReceiverStream::new(cmd_receiver)).await;
    reader.await?;
    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }

    let balances = batch.balances().await?;
    write_balances(&balances, io::stdout().lock())?;
    Ok(())
}
