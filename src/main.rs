use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use callbook::cli::{conference, contact, record, resolve, show, watch};
use callbook::config::Config;
use callbook::service::{ConversationService, Sources};
use callbook::store::CallStore;

#[derive(Parser)]
#[command(name = "callbook")]
#[command(about = "Groups call history and live calls into per-contact conversations")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "callbook.yaml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve and list conversations, most recent first
    Resolve {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show one conversation (key, contact name or number)
    Show { query: String },

    /// Add a finished call to the history
    Record {
        /// Account the call went through
        #[arg(short, long)]
        account: String,

        /// Peer number or SIP address, as the engine reported it
        #[arg(short, long)]
        peer: String,

        /// Directory contact id, if known
        #[arg(long)]
        contact_id: Option<i64>,

        /// Start time (RFC 3339), defaults to now minus duration
        #[arg(long)]
        start: Option<String>,

        /// Duration in seconds
        #[arg(short, long, default_value_t = 0)]
        duration: i64,

        #[arg(long)]
        incoming: bool,

        #[arg(long)]
        missed: bool,

        #[arg(long)]
        call_id: Option<String>,
    },

    /// Directory management
    Contact {
        #[command(subcommand)]
        command: ContactCommands,
    },

    /// Live conference management
    Conference {
        #[command(subcommand)]
        command: ConferenceCommands,
    },

    /// Rebuild and print conversations whenever the database changes
    Watch {
        /// Poll interval in milliseconds
        #[arg(long, default_value_t = 1000)]
        interval: u64,
    },
}

#[derive(Subcommand)]
enum ContactCommands {
    /// Add or rename a directory contact
    Add {
        /// Positive directory id
        id: i64,
        /// Display name
        name: String,
        #[arg(long)]
        photo: Option<i64>,
    },
}

#[derive(Args)]
struct Leg {
    /// Call id of the leg
    #[arg(long)]
    call_id: String,
    #[arg(short, long)]
    account: String,
    #[arg(short, long)]
    peer: String,
    #[arg(long)]
    contact_id: Option<i64>,
}

impl From<Leg> for conference::LegArgs {
    fn from(leg: Leg) -> Self {
        Self {
            call_id: leg.call_id,
            account: leg.account,
            peer: leg.peer,
            contact_id: leg.contact_id,
        }
    }
}

#[derive(Subcommand)]
enum ConferenceCommands {
    /// Start a conference with its primary call
    Start {
        id: String,
        #[command(flatten)]
        leg: Leg,
    },
    /// Add a call to a running conference
    Join {
        id: String,
        #[command(flatten)]
        leg: Leg,
    },
    /// End a conference
    End { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config
    let config = Config::load(&cli.config).unwrap_or_default();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Initialize store
    let db_path = config.database_path();
    let store = Arc::new(
        CallStore::open(&db_path)
            .with_context(|| format!("Failed to open database {}", db_path.display()))?,
    );

    let service = ConversationService::new(Sources::from_store(store.clone()), &config);

    match cli.command {
        Commands::Resolve { json } => {
            resolve::run(&service, json).await?;
        }
        Commands::Show { query } => {
            show::run(&service, &query).await?;
        }
        Commands::Record {
            account,
            peer,
            contact_id,
            start,
            duration,
            incoming,
            missed,
            call_id,
        } => {
            record::run(
                &store,
                record::RecordArgs {
                    account,
                    peer,
                    contact_id,
                    start,
                    duration,
                    incoming,
                    missed,
                    call_id,
                },
            )?;
        }
        Commands::Contact { command } => match command {
            ContactCommands::Add { id, name, photo } => {
                contact::add(&store, id, name, photo)?;
            }
        },
        Commands::Conference { command } => match command {
            ConferenceCommands::Start { id, leg } => {
                conference::start(&store, &id, leg.into())?;
            }
            ConferenceCommands::Join { id, leg } => {
                conference::join(&store, &id, leg.into())?;
            }
            ConferenceCommands::End { id } => {
                conference::end(&store, &id)?;
            }
        },
        Commands::Watch { interval } => {
            watch::run(store.clone(), &service, Duration::from_millis(interval.max(50))).await?;
        }
    }

    Ok(())
}
