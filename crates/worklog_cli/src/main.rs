//! Command-line front end for saved connection profiles.
//!
//! # Responsibility
//! - Manage the profile registry from a terminal.
//! - Probe and activate profiles through `ConnectionManager`.

use clap::{Args, Parser, Subcommand};
use log::warn;
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use worklog_core::model::secret::REDACTED;
use worklog_core::{
    core_version, init_logging, BackendKind, ConnectionManager, ConnectionProfile, CoreConfig,
    PoolSettings, Secret,
};

#[derive(Parser, Debug)]
#[command(name = "worklog", version, about = "Manage worklog database connections")]
struct Cli {
    /// Profile registry file (overrides WORKLOG_PROFILES)
    #[arg(long, global = true)]
    profiles: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Inspect and edit saved profiles
    #[command(subcommand)]
    Profiles(ProfilesCommand),
    /// Probe a saved profile without activating it
    Test { name: String },
    /// Switch the active backend to a saved profile
    Activate { name: String },
    /// Show the active profile and registry location
    Status,
    /// Print the core version
    Version,
}

#[derive(Subcommand, Debug)]
enum ProfilesCommand {
    List,
    Show { name: String },
    Add(AddArgs),
    Remove { name: String },
}

#[derive(Args, Debug)]
struct AddArgs {
    name: String,
    /// document_store | mysql | postgres | embedded
    #[arg(long, value_parser = parse_kind)]
    kind: BackendKind,
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    #[arg(long)]
    database: Option<String>,
    #[arg(long)]
    username: Option<String>,
    #[arg(long)]
    password: Option<String>,
    #[arg(long)]
    project_id: Option<String>,
    #[arg(long)]
    endpoint: Option<String>,
    #[arg(long)]
    credentials_path: Option<PathBuf>,
    /// SQLite file for embedded profiles; omitted means in-memory
    #[arg(long)]
    path: Option<PathBuf>,
    #[arg(long)]
    max_pool_size: Option<u32>,
}

fn parse_kind(value: &str) -> Result<BackendKind, String> {
    BackendKind::parse(value).ok_or_else(|| {
        let known: Vec<&str> = BackendKind::ALL.iter().map(|kind| kind.as_str()).collect();
        format!("unknown backend kind `{value}`; expected {}", known.join("|"))
    })
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Command::Version = cli.command {
        println!("worklog {}", core_version());
        return ExitCode::SUCCESS;
    }

    let mut config = CoreConfig::from_env();
    if let Some(path) = cli.profiles.clone() {
        config.profiles_path = path;
    }
    if let Err(err) = init_logging(&config.log_level, &config.log_dir) {
        eprintln!("logging disabled: {err}");
    }

    match run(cli.command, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command, config: &CoreConfig) -> Result<(), Box<dyn Error>> {
    let manager = ConnectionManager::open(config)?;
    match command {
        Command::Profiles(command) => run_profiles(command, &manager)?,
        Command::Test { name } => {
            let profile = manager
                .registry()
                .get(&name)
                .ok_or_else(|| format!("no saved profile named `{name}`"))?;
            if manager.test_connection(&profile) {
                println!("{name}: reachable ({})", profile.target_summary());
            } else {
                return Err(format!("{name}: not reachable ({})", profile.target_summary()).into());
            }
        }
        Command::Activate { name } => {
            let report = manager.activate(&name)?;
            println!(
                "active: {} ({}) in {} ms{}",
                report.profile,
                report.kind.label(),
                report.duration.as_millis(),
                if report.provisioned { ", schema created" } else { "" }
            );
            if !report.persistence.is_saved() {
                println!("warning: active profile was not saved to disk");
            }
        }
        Command::Status => {
            let registry = manager.registry();
            match registry.store_path() {
                Some(path) => println!("registry: {}", path.display()),
                None => println!("registry: in memory"),
            }
            match registry.active() {
                Some(profile) => println!(
                    "active: {} ({}) {}",
                    profile.name,
                    profile.kind.label(),
                    profile.target_summary()
                ),
                None => println!("active: none"),
            }
        }
        Command::Version => {}
    }

    if let Err(err) = manager.shutdown() {
        warn!("event=cli_shutdown module=cli status=error error={err}");
    }
    Ok(())
}

fn run_profiles(command: ProfilesCommand, manager: &ConnectionManager) -> Result<(), Box<dyn Error>> {
    let registry = manager.registry();
    match command {
        ProfilesCommand::List => {
            for profile in registry.list() {
                let marker = if profile.active { "*" } else { " " };
                println!(
                    "{marker} {:<20} {:<14} {}",
                    profile.name,
                    profile.kind.as_str(),
                    profile.target_summary()
                );
            }
        }
        ProfilesCommand::Show { name } => {
            let profile = registry
                .get(&name)
                .ok_or_else(|| format!("no saved profile named `{name}`"))?;
            let pool = profile.effective_pool();
            println!("name:     {}", profile.name);
            println!("kind:     {}", profile.kind.label());
            println!("target:   {}", profile.target_summary());
            println!("user:     {}", profile.username.as_deref().unwrap_or("-"));
            println!(
                "password: {}",
                if profile.password.is_some() { REDACTED } else { "-" }
            );
            println!(
                "pool:     max={} min_idle={} connect_timeout={}ms",
                pool.max_size,
                pool.min_idle,
                pool.connect_timeout.as_millis()
            );
            println!("active:   {}", profile.active);
        }
        ProfilesCommand::Add(args) => {
            let profile = build_profile(args);
            let persistence = registry.add(profile)?;
            if !persistence.is_saved() {
                println!("warning: profile kept in memory only");
            }
        }
        ProfilesCommand::Remove { name } => {
            let persistence = registry.remove(&name)?;
            if !persistence.is_saved() {
                println!("warning: removal kept in memory only");
            }
        }
    }
    Ok(())
}

fn build_profile(args: AddArgs) -> ConnectionProfile {
    let mut profile = ConnectionProfile::new(args.name, args.kind);
    profile.host = args.host;
    profile.port = args.port;
    profile.database = args
        .database
        .or_else(|| args.path.map(|path| path.to_string_lossy().into_owned()));
    profile.username = args.username;
    profile.password = args.password.map(Secret::new);
    profile.project_id = args.project_id;
    profile.endpoint = args.endpoint;
    profile.credentials_path = args.credentials_path;
    profile.pool = PoolSettings {
        max_pool_size: args.max_pool_size,
        ..PoolSettings::default()
    };
    profile
}
