use std::env;
use std::path::Path;
use std::process;
use std::sync::Arc;

use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;
use wallet_ledger::config::{LogFormat, fetch_config};
use wallet_ledger::csv::{read_operations, write_wallets};
use wallet_ledger::notify::TracingSink;
use wallet_ledger::replay::Replay;
use wallet_ledger::{Engine, MemoryStore};

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() {
    let config = match fetch_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            process::exit(2);
        }
    };
    init_tracing(config.log_format);

    let Some(path) = env::args().nth(1) else {
        eprintln!("usage: wallet-ledger <operations.csv>");
        process::exit(2);
    };

    if !path.ends_with(".csv") {
        warn!(path, "input file seems to not be a csv file");
    }

    let operations = match read_operations(Path::new(&path)) {
        Ok(operations) => operations,
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    };

    let store = MemoryStore::with_lock_timeout(config.lock_timeout);
    let engine = Engine::new(Arc::new(store)).with_notifier(Arc::new(TracingSink));
    let mut replay = Replay::new(engine);
    let (op_sender, op_receiver) = tokio::sync::mpsc::channel(16);

    tokio::spawn(async move {
        for result in operations {
            match result {
                Ok(op) => {
                    if op_sender.send(op).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("{e}");
                }
            }
        }
    });

    replay.run(ReceiverStream::new(op_receiver)).await;

    let written = match replay.wallets().await {
        Ok(wallets) => write_wallets(std::io::stdout().lock(), &wallets),
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    };
    if let Err(e) = written {
        eprintln!("{e}");
        process::exit(1);
    }
}
