use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::debug;

use crate::client::PlaudClient;
use crate::config::BridgeConfig;
use crate::model::{ListFilesParams, TrashFilter};
use crate::telemetry::logging::LogLevel;

#[derive(Parser, Debug)]
#[command(name = "plaud-bridge")]
#[command(about = "Query Plaud recordings through the signed-in Plaud Desktop app")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Log verbosity (overrides PLAUD_LOG_LEVEL)
    #[arg(long, value_enum, global = true)]
    pub log_level: Option<LogLevel>,

    /// Write logs to this file instead of stderr (overrides PLAUD_LOG_FILE)
    #[arg(long, global = true)]
    pub log_file: Option<String>,

    /// Inspector port of the desktop app (overrides PLAUD_DEBUG_PORT)
    #[arg(long, global = true)]
    pub port: Option<u16>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check that the desktop app is reachable and signed in
    Check,
    /// List recordings
    List {
        #[arg(long, default_value_t = 0)]
        skip: u32,

        #[arg(short = 'n', long, default_value_t = 100)]
        limit: u32,

        #[arg(long, value_enum, default_value_t = TrashArg::All)]
        trash: TrashArg,
    },
    /// Print the total number of recordings
    Count,
    /// Show metadata for one recording
    File { id: String },
    /// Show the raw detail record, including content references
    Detail { id: String },
    /// Print a recording's transcript segments
    Transcript {
        id: String,

        /// Print only the joined text
        #[arg(long)]
        text: bool,
    },
    /// Print a recording's AI summary
    Summary { id: String },
    /// List recordings started within the last N days
    Recent {
        #[arg(short, long, default_value_t = 7)]
        days: u32,
    },
    /// Search titles and transcripts of recent recordings
    Search {
        query: String,

        #[arg(short, long, default_value_t = 30)]
        days: u32,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum TrashArg {
    All,
    Trashed,
    Untrashed,
}

impl From<TrashArg> for TrashFilter {
    fn from(value: TrashArg) -> Self {
        match value {
            TrashArg::All => TrashFilter::All,
            TrashArg::Trashed => TrashFilter::Trashed,
            TrashArg::Untrashed => TrashFilter::Untrashed,
        }
    }
}

impl Cli {
    /// Folds command-line overrides into the environment configuration.
    pub fn apply(&self, config: &mut BridgeConfig) {
        if let Some(level) = self.log_level {
            config.log_level = Some(format!("{level:?}").to_ascii_lowercase());
        }
        if let Some(file) = &self.log_file {
            config.log_file = Some(file.clone());
        }
        if let Some(port) = self.port {
            config.debug_port = port;
        }
    }
}

pub async fn run(command: Commands, config: &BridgeConfig) -> Result<()> {
    let client = PlaudClient::from_config(config);
    debug!(?command, "running command");
    match command {
        Commands::Check => emit(&client.check_connection().await),
        Commands::List { skip, limit, trash } => {
            let params = ListFilesParams {
                skip,
                limit,
                trash: trash.into(),
                ..ListFilesParams::default()
            };
            emit(&client.list_files(&params).await?)
        }
        Commands::Count => emit(&serde_json::json!({ "total": client.file_count().await? })),
        Commands::File { id } => emit(&client.file(&id).await?),
        Commands::Detail { id } => emit(&client.file_detail(&id).await?),
        Commands::Transcript { id, text } => {
            let segments = client.transcript(&id).await?;
            if text {
                println!("{}", crate::model::transcript_text(&segments));
                Ok(())
            } else {
                emit(&segments)
            }
        }
        Commands::Summary { id } => emit(&client.summary(&id).await?),
        Commands::Recent { days } => emit(&client.recent_files(days).await?),
        Commands::Search { query, days } => emit(&client.search(&query, days).await?),
    }
}

fn emit<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
