use std::fmt;
use std::io::Read;

use rewards_core::model::UserId;
use serde::Serialize;
use services::{AppServices, Clock, CompletionRequest, NewContent, NewUser, RewardsConfig};
use tracing::info;

mod seed;

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidNumber { flag: &'static str, raw: String },
    InvalidDbUrl { raw: String },
    InvalidOffset { raw: String },
    MissingFlag { flag: &'static str },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidNumber { flag, raw } => write!(f, "invalid {flag} value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidOffset { raw } => {
                write!(f, "invalid REWARDS_UTC_OFFSET_MINUTES value: {raw}")
            }
            ArgsError::MissingFlag { flag } => write!(f, "{flag} is required"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn parse_number(value: String, flag: &'static str) -> Result<u32, ArgsError> {
    value
        .parse()
        .map_err(|_| ArgsError::InvalidNumber { flag, raw: value })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  rewards complete         [--db <sqlite_url>] [--json <request>]   # else reads stdin");
    eprintln!("  rewards snapshot         [--db <sqlite_url>] [--secret <value>]");
    eprintln!("  rewards leaderboard      [--db <sqlite_url>] [--user <id>] [--page <n>] [--page-size <n>]");
    eprintln!("  rewards stats            [--db <sqlite_url>] --user <id>");
    eprintln!("  rewards register-user    [--db <sqlite_url>] [--json <user>]");
    eprintln!("  rewards register-content [--db <sqlite_url>] [--json <item>]");
    eprintln!("  rewards seed             [--db <sqlite_url>] [--secret <value>]");
    eprintln!();
    eprintln!("Defaults:");
    eprintln!("  --db {DEFAULT_DB_URL}");
    eprintln!("  --page 1");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  REWARDS_DB_URL, REWARDS_RANKING_SECRET, REWARDS_UTC_OFFSET_MINUTES, RUST_LOG");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Complete,
    Snapshot,
    Leaderboard,
    Stats,
    RegisterUser,
    RegisterContent,
    Seed,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "complete" => Some(Self::Complete),
            "snapshot" => Some(Self::Snapshot),
            "leaderboard" => Some(Self::Leaderboard),
            "stats" => Some(Self::Stats),
            "register-user" => Some(Self::RegisterUser),
            "register-content" => Some(Self::RegisterContent),
            "seed" => Some(Self::Seed),
            _ => None,
        }
    }

    fn accepts(self, flag: &str) -> bool {
        match flag {
            "--db" => true,
            "--json" => matches!(
                self,
                Self::Complete | Self::RegisterUser | Self::RegisterContent
            ),
            "--secret" => matches!(self, Self::Snapshot | Self::Seed),
            "--user" => matches!(self, Self::Leaderboard | Self::Stats),
            "--page" | "--page-size" => self == Self::Leaderboard,
            _ => false,
        }
    }
}

struct Args {
    db_url: String,
    json: Option<String>,
    secret: Option<String>,
    user: Option<String>,
    page: u32,
    page_size: Option<u32>,
}

impl Args {
    fn parse(cmd: Command, args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut parsed = Self {
            db_url: std::env::var("REWARDS_DB_URL")
                .ok()
                .map_or_else(default_db_url, normalize_sqlite_url),
            json: None,
            secret: std::env::var("REWARDS_RANKING_SECRET").ok(),
            user: None,
            page: 1,
            page_size: None,
        };

        while let Some(arg) = args.next() {
            if matches!(arg.as_str(), "--help" | "-h") {
                print_usage();
                std::process::exit(0);
            }
            if !cmd.accepts(&arg) {
                return Err(ArgsError::UnknownArg(arg));
            }
            match arg.as_str() {
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    parsed.db_url = normalize_sqlite_url(value);
                }
                "--json" => parsed.json = Some(require_value(args, "--json")?),
                "--secret" => parsed.secret = Some(require_value(args, "--secret")?),
                "--user" => parsed.user = Some(require_value(args, "--user")?),
                "--page" => parsed.page = parse_number(require_value(args, "--page")?, "--page")?,
                "--page-size" => {
                    let value = require_value(args, "--page-size")?;
                    parsed.page_size = Some(parse_number(value, "--page-size")?);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        if cmd == Command::Stats && parsed.user.is_none() {
            return Err(ArgsError::MissingFlag { flag: "--user" });
        }
        Ok(parsed)
    }

    /// The `--json` payload, or all of stdin when the flag is absent.
    fn payload(&self) -> Result<String, std::io::Error> {
        match &self.json {
            Some(json) => Ok(json.clone()),
            None => {
                let mut buf = String::new();
                std::io::stdin().read_to_string(&mut buf)?;
                Ok(buf)
            }
        }
    }
}

const DEFAULT_DB_URL: &str = "sqlite:rewards.sqlite3";

/// `DEFAULT_DB_URL` resolved against the working directory.
fn default_db_url() -> String {
    normalize_sqlite_url(DEFAULT_DB_URL.into())
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = std::path::Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn load_config() -> Result<RewardsConfig, Box<dyn std::error::Error>> {
    let mut config = RewardsConfig::default()
        .with_ranking_secret(std::env::var("REWARDS_RANKING_SECRET").ok());
    if let Ok(raw) = std::env::var("REWARDS_UTC_OFFSET_MINUTES") {
        let minutes: i32 = raw
            .trim()
            .parse()
            .map_err(|_| ArgsError::InvalidOffset { raw: raw.clone() })?;
        config = config.with_offset_minutes(minutes)?;
    }
    Ok(config)
}

fn print_json(value: &impl Serialize) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv = std::env::args().skip(1);

    let cmd = match argv.next() {
        None => {
            print_usage();
            return Ok(());
        }
        Some(first) if matches!(first.as_str(), "--help" | "-h") => {
            print_usage();
            return Ok(());
        }
        Some(first) => Command::from_arg(&first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };

    let parsed = Args::parse(cmd, &mut argv).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;
    let config = load_config()?;

    // Open + migrate SQLite at startup. Keep this in the binary glue so core/services stay pure.
    prepare_sqlite_file(&parsed.db_url)?;
    let services = AppServices::new_sqlite(&parsed.db_url, Clock::default_clock(), config).await?;
    info!(db = %parsed.db_url, command = ?cmd, "rewards store ready");

    match cmd {
        Command::Complete => {
            let request: CompletionRequest = serde_json::from_str(&parsed.payload()?)?;
            let outcome = services.progress().record_completion(&request).await?;
            print_json(&outcome)?;
        }
        Command::Snapshot => {
            let run = services.ranking().run(parsed.secret.as_deref()).await?;
            print_json(&run)?;
        }
        Command::Leaderboard => {
            let requester = parsed.user.as_deref().map(UserId::new).transpose()?;
            let page = services
                .leaderboard()
                .page(requester.as_ref(), parsed.page, parsed.page_size)
                .await?;
            print_json(&page)?;
        }
        Command::Stats => {
            let user = UserId::new(parsed.user.as_deref().unwrap_or_default())?;
            let stats = services.achievements().stats(&user).await?;
            print_json(&stats)?;
        }
        Command::RegisterUser => {
            let new: NewUser = serde_json::from_str(&parsed.payload()?)?;
            let user = services.registration().register_user(&new).await?;
            print_json(&user)?;
        }
        Command::RegisterContent => {
            let new: NewContent = serde_json::from_str(&parsed.payload()?)?;
            let item = services.registration().register_content(&new).await?;
            print_json(&item)?;
        }
        Command::Seed => {
            let report = seed::run(&services, parsed.secret.as_deref()).await?;
            print_json(&report)?;
        }
    }
    Ok(())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run().await {
        // At this layer (binary glue), printing once is fine.
        eprintln!("{err}");
        std::process::exit(2);
    }
}
