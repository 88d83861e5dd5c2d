//! Tabletop CLI
//!
//! Thin wrapper around tabletop-core for command-line usage.
//!
//! ## Usage
//!
//! ```bash
//! # Sign a join token for a room
//! tabletop token create --room r1 --secret s3cret --ttl-secs 600
//!
//! # Check a token
//! tabletop token verify --secret s3cret <token>
//!
//! # Generate role keys for a room and print its share links
//! tabletop keys generate --room r1
//!
//! # Print one link again
//! tabletop keys link --room r1 --spectator
//!
//! # Store a link someone shared with you
//! tabletop keys import --room r1 '#s=<key>&rk=<publicKey>'
//!
//! # Play a short two-peer game locally
//! tabletop simulate --deck-size 40 --opening-hand 7 --draws 3
//! ```

mod simulate;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use clap::{Args, Parser, Subcommand};
use tabletop_core::logging::{init_logging, JsonlTarget};
use tabletop_core::{
    create_join_token, verify_join_token, EngineConfig, JoinTokenPayload, RoleLink, RoomId,
    RoomKeyStore, RoomKeys, VerifyOptions,
};

use simulate::SimulateOptions;

/// Tabletop Sync - replicated card tables with private hands
#[derive(Parser)]
#[command(name = "tabletop")]
#[command(version = "0.1.0")]
#[command(about = "Tabletop Sync - replicated card tables with private hands")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Data directory (default: ~/.tabletop)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Engine config file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Also write JSONL logs into this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Peer name used for the JSONL log file
    #[arg(long, global = true, default_value = "cli")]
    peer: String,

    #[command(flatten)]
    overrides: ConfigOverrides,

    #[command(subcommand)]
    command: Commands,
}

/// Flags layered over the config file
#[derive(Args, Debug, Default)]
struct ConfigOverrides {
    /// Starting life total for new players
    #[arg(long, global = true)]
    starting_life: Option<i32>,

    /// Clock skew tolerated when verifying join tokens (ms)
    #[arg(long, global = true)]
    token_skew_ms: Option<u64>,

    /// How long an optimistic intent may stay pending (seconds)
    #[arg(long, global = true)]
    intent_retry_window_secs: Option<u64>,
}

impl ConfigOverrides {
    fn apply(&self, config: &mut EngineConfig) {
        if let Some(life) = self.starting_life {
            config.starting_life = life;
        }
        if let Some(skew) = self.token_skew_ms {
            config.token_skew_ms = skew;
        }
        if let Some(window) = self.intent_retry_window_secs {
            config.intent_retry_window_secs = window;
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Join token management
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },

    /// Room role keys and share links
    Keys {
        #[command(subcommand)]
        action: KeysAction,
    },

    /// Run a two-peer game in-process and print what each viewer sees
    Simulate {
        /// Room ID for the simulated table
        #[arg(long, default_value = "sim")]
        room: String,

        /// Cards in each player's library
        #[arg(long, default_value_t = 40)]
        deck_size: u32,

        /// Cards drawn at the start
        #[arg(long, default_value_t = 7)]
        opening_hand: u32,

        /// Single-card draws after the opening hand
        #[arg(long, default_value_t = 1)]
        draws: u32,

        /// Secret the simulated server signs join tokens with
        #[arg(long, default_value = "simulation-secret")]
        secret: String,
    },
}

#[derive(Subcommand)]
enum TokenAction {
    /// Sign a join token
    Create {
        /// Room ID the token admits to
        #[arg(long)]
        room: String,

        /// Shared HMAC secret
        #[arg(long)]
        secret: String,

        /// Lifetime in seconds
        #[arg(long, default_value_t = 3600)]
        ttl_secs: u64,

        /// Optional nonce carried in the payload
        #[arg(long)]
        nonce: Option<String>,
    },

    /// Verify a join token and print its payload
    Verify {
        /// The token to check
        token: String,

        /// Shared HMAC secret
        #[arg(long)]
        secret: String,

        /// Tolerated clock skew in ms (default: from config)
        #[arg(long)]
        skew_ms: Option<u64>,
    },
}

#[derive(Subcommand)]
enum KeysAction {
    /// Generate player and spectator keys for a room
    Generate {
        #[arg(long)]
        room: String,

        /// Replace keys that already exist
        #[arg(long)]
        force: bool,
    },

    /// Print a share link for a room
    Link {
        #[arg(long)]
        room: String,

        /// Print the spectator link instead of the player link
        #[arg(long)]
        spectator: bool,
    },

    /// Store a link fragment received from someone else
    Import {
        #[arg(long)]
        room: String,

        /// Fragment such as `#k=<key>` or `#s=<key>&rk=<publicKey>`
        fragment: String,
    },

    /// List rooms with stored keys
    List,
}

/// Set up logging based on verbosity level
fn setup_logging(cli: &Cli) -> Result<()> {
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let jsonl = cli.log_dir.as_deref().map(|dir| JsonlTarget {
        dir,
        peer: &cli.peer,
    });
    if let Some(path) = init_logging(filter, jsonl)? {
        eprintln!("Writing JSONL logs to {}", path.display());
    }
    Ok(())
}

/// Get the default data directory (~/.tabletop)
fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tabletop")
}

fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    cli.overrides.apply(&mut config);
    config.validate()?;
    Ok(config)
}

fn open_key_store(data_dir: &Path) -> Result<RoomKeyStore> {
    Ok(RoomKeyStore::open(data_dir.join("keys.json"))?)
}

fn format_expiry(exp_ms: i64) -> String {
    match Utc.timestamp_millis_opt(exp_ms).single() {
        Some(at) => at.to_rfc3339(),
        None => format!("{exp_ms} (out of range)"),
    }
}

fn print_links(room_id: &RoomId, keys: &RoomKeys) -> Result<()> {
    println!("Room: {}", room_id);
    if let Some(link) = keys.player_link() {
        println!("  Player link:    {}", link.to_fragment());
    }
    if let Some(link) = keys.spectator_link(room_id)? {
        println!("  Spectator link: {}", link.to_fragment());
    }
    if let Some(public_key) = keys.signing_public_key(room_id)? {
        println!("  Signing key:    {}", public_key);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli)?;
    let config = load_config(&cli)?;
    let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);

    match cli.command {
        Commands::Token { action } => match action {
            TokenAction::Create {
                room,
                secret,
                ttl_secs,
                nonce,
            } => {
                let mut payload = JoinTokenPayload::expiring_in(RoomId::new(room), Duration::from_secs(ttl_secs));
                payload.nonce = nonce;
                let token = create_join_token(&payload, secret.as_bytes())?;
                println!("{}", token);
            }

            TokenAction::Verify {
                token,
                secret,
                skew_ms,
            } => {
                let options = VerifyOptions {
                    now_ms: None,
                    skew_ms: skew_ms.unwrap_or(config.token_skew_ms),
                };
                match verify_join_token(Some(&token), secret.as_bytes(), options) {
                    Ok(payload) => {
                        println!("Token valid");
                        println!("  Room: {}", payload.room_id);
                        println!("  Expires: {}", format_expiry(payload.exp));
                        if let Some(nonce) = payload.nonce {
                            println!("  Nonce: {}", nonce);
                        }
                    }
                    Err(e) => anyhow::bail!("Token rejected: {}", e),
                }
            }
        },

        Commands::Keys { action } => {
            let mut store = open_key_store(&data_dir)?;
            match action {
                KeysAction::Generate { room, force } => {
                    let room_id = RoomId::new(room);
                    let keys = if force {
                        let keys = RoomKeys::generate();
                        store.insert(room_id.clone(), keys.clone())?;
                        keys
                    } else {
                        store.get_or_generate(&room_id)?
                    };
                    print_links(&room_id, &keys)?;
                }

                KeysAction::Link { room, spectator } => {
                    let room_id = RoomId::new(room);
                    let keys = store
                        .get(&room_id)
                        .with_context(|| format!("No keys stored for room {}", room_id))?;
                    let link = if spectator {
                        keys.spectator_link(&room_id)?
                    } else {
                        keys.player_link()
                    };
                    match link {
                        Some(link) => println!("{}", link.to_fragment()),
                        None => anyhow::bail!(
                            "Room {} has no {} key",
                            room_id,
                            if spectator { "spectator" } else { "player" }
                        ),
                    }
                }

                KeysAction::Import { room, fragment } => {
                    let room_id = RoomId::new(room);
                    let link = RoleLink::parse_fragment(&fragment)?;
                    let role = match &link {
                        RoleLink::Player { .. } => "player",
                        RoleLink::Spectator { .. } => "spectator",
                    };
                    let mut keys = store.get(&room_id).cloned().unwrap_or_default();
                    keys.absorb(link);
                    store.insert(room_id.clone(), keys)?;
                    println!("Stored {} key for room {}", role, room_id);
                }

                KeysAction::List => {
                    let rooms: Vec<_> = store.rooms().collect();
                    if rooms.is_empty() {
                        println!("No rooms with stored keys.");
                    } else {
                        println!("Rooms ({}):", rooms.len());
                        for (room_id, keys) in rooms {
                            let mut roles = Vec::new();
                            if keys.player_key.is_some() {
                                roles.push("player");
                            }
                            if keys.spectator_key.is_some() {
                                roles.push("spectator");
                            }
                            println!("  {} [{}]", room_id, roles.join(", "));
                        }
                    }
                }
            }
        }

        Commands::Simulate {
            room,
            deck_size,
            opening_hand,
            draws,
            secret,
        } => {
            let options = SimulateOptions {
                room_id: RoomId::new(room),
                deck_size,
                opening_hand,
                draws,
                secret,
            };
            let report = simulate::run(&options, &config).await?;

            println!(
                "Simulated room {} (deck {}, opening hand {}, {} extra draws)",
                options.room_id, deck_size, opening_hand, draws
            );
            println!();
            for viewer in &report.viewers {
                println!("{} sees:", viewer.viewer);
                for hand in &viewer.hands {
                    println!(
                        "  {} hand: {} cards ({} known)",
                        hand.owner, hand.size, hand.known
                    );
                }
            }
            println!();
            println!("Log events received: {}", report.log_events);
            println!(
                "Public boards agree: {}",
                if report.boards_agree { "yes" } else { "no" }
            );
        }
    }

    Ok(())
}
