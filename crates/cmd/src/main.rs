// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::Value;
use snafu::{ResultExt, Whatever};
use stash_common_telemetry::{
    logging::{LogFormat, LoggingOptions, init_global_logging},
    set_panic_hook,
};
use stash_queue::{BoxError, FlushAction, Queue, QueueBuilder, Record, Registry};
use stash_store::{DBStore, StoreConfig};

/// Package author information from Cargo.toml
const AUTHOR: &str = env!("CARGO_PKG_AUTHORS");

#[derive(Debug, Parser)]
#[clap(
name = "stash",
about= "Inspect and drive durable record queues",
author = AUTHOR,
version)]
struct Cli {
    /// SQLite database holding the queues
    #[arg(long, global = true, default_value = "stash.db")]
    db: PathBuf,

    /// Log level filter, e.g. `debug` or `info,stash_queue=trace`
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[arg(long, global = true, value_enum, default_value_t = Format::Text)]
    log_format: Format,

    #[command(subcommand)]
    commands: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    Text,
    Json,
}

impl From<Format> for LogFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Text => Self::Text,
            Format::Json => Self::Json,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    Push(PushArgs),
    List(QueueArgs),
    Len(QueueArgs),
    Flush(QueueArgs),
    Destroy(DestroyArgs),
    Queues,
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r#"

Append JSON objects to a queue, then print its length.
Examples:

stash push events '{"kind":"click"}' '{"kind":"view"}'

"#)]
struct PushArgs {
    queue:   String,
    #[arg(required = true)]
    records: Vec<String>,

    /// Reject pushes once the queue holds this many records
    #[arg(long)]
    max_length: Option<usize>,
}

impl PushArgs {
    async fn run(&self, session: &Session) -> Result<(), Whatever> {
        let values = self
            .records
            .iter()
            .map(|raw| {
                serde_json::from_str::<Value>(raw)
                    .with_whatever_context(|_| format!("invalid JSON: {raw}"))
            })
            .collect::<Result<Vec<_>, Whatever>>()?;

        let mut builder = session.builder(&self.queue);
        if let Some(max_length) = self.max_length {
            builder = builder.max_length(max_length);
        }
        let queue = builder.open(&session.registry).await;

        for value in &values {
            queue
                .push(value)
                .await
                .with_whatever_context(|_| format!("push to {} failed", self.queue))?;
        }
        print_len(&queue).await
    }
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
struct QueueArgs {
    queue: String,
}

impl QueueArgs {
    async fn open(&self, session: &Session) -> Queue {
        session.builder(&self.queue).open(&session.registry).await
    }

    async fn list(&self, session: &Session) -> Result<(), Whatever> {
        let queue = self.open(session).await;
        let records = queue
            .list()
            .await
            .with_whatever_context(|_| format!("list of {} failed", self.queue))?;
        for record in &records {
            print_record(record)?;
        }
        Ok(())
    }

    async fn len(&self, session: &Session) -> Result<(), Whatever> {
        print_len(&self.open(session).await).await
    }

    /// Print every record, then clear the queue.
    async fn flush(&self, session: &Session) -> Result<(), Whatever> {
        let queue = self.open(session).await;
        queue
            .flush_with(Arc::new(|records: Vec<Record>| async move {
                for record in &records {
                    println!("{}", serde_json::to_string(record)?);
                }
                Ok::<_, BoxError>(FlushAction::Clear)
            }))
            .await
            .with_whatever_context(|_| format!("flush of {} failed", self.queue))
    }
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Stop a queue and delete its records.
Examples:

stash destroy events
stash destroy events --keep

")]
struct DestroyArgs {
    queue: String,

    /// Keep the stored records
    #[arg(long)]
    keep: bool,
}

impl DestroyArgs {
    async fn run(&self, session: &Session) -> Result<(), Whatever> {
        let queue = session.builder(&self.queue).open(&session.registry).await;
        queue
            .destroy(!self.keep)
            .await
            .with_whatever_context(|_| format!("destroy of {} failed", self.queue))
    }
}

/// Database and registry shared by one command.
struct Session {
    db:       DBStore,
    registry: Registry,
}

impl Session {
    async fn open(path: &Path) -> Result<Self, Whatever> {
        let config = StoreConfig::builder()
            .db_path(path.to_path_buf())
            .max_connections(1)
            .build();
        let db = DBStore::connect(&config)
            .await
            .with_whatever_context(|_| format!("failed to open {}", path.display()))?;
        tracing::debug!(path = %path.display(), "Opened queue database");
        let registry = Registry::new(db.clone());
        Ok(Self { db, registry })
    }

    /// Queues opened from the command line never flush on their own.
    fn builder(&self, name: &str) -> QueueBuilder { QueueBuilder::new(name).flush_at(usize::MAX) }

    async fn close(self) {
        self.registry.shutdown().await;
        self.db.close().await;
    }
}

fn print_record(record: &Record) -> Result<(), Whatever> {
    let line = serde_json::to_string(record).whatever_context("failed to encode record")?;
    println!("{line}");
    Ok(())
}

async fn print_len(queue: &Queue) -> Result<(), Whatever> {
    let len = queue
        .len()
        .await
        .with_whatever_context(|_| format!("length of {} failed", queue.name()))?;
    println!("{len}");
    Ok(())
}

async fn list_queues(session: &Session) -> Result<(), Whatever> {
    let names = session
        .db
        .namespaces()
        .await
        .whatever_context("failed to list queues")?;
    for name in names {
        println!("{name}");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Whatever> {
    let cli = Cli::parse();

    let logging = LoggingOptions::builder()
        .level(cli.log_level.clone())
        .log_format(cli.log_format.into())
        .stderr(true)
        .build();
    let _guards =
        init_global_logging("stash", &logging).whatever_context("failed to initialize logging")?;
    set_panic_hook();

    let session = Session::open(&cli.db).await?;
    let result = match &cli.commands {
        Commands::Push(args) => args.run(&session).await,
        Commands::List(args) => args.list(&session).await,
        Commands::Len(args) => args.len(&session).await,
        Commands::Flush(args) => args.flush(&session).await,
        Commands::Destroy(args) => args.run(&session).await,
        Commands::Queues => list_queues(&session).await,
    };
    session.close().await;
    result
}
