//! offline-cache CLI - install, activate, inspect and serve offline asset stores.

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use offline_cache::{
    AppConfig, AssetCacheController, CacheStorage, DiskCacheStorage, HttpNetwork, Registration,
    format_age, format_bytes,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Serve,
    Install,
    Activate,
    List,
}

#[derive(Debug, Default)]
struct CliConfig {
    command: Option<Command>,
    config_path: Option<PathBuf>,
    origin: Option<String>,
    cache_name: Option<String>,
    listen: Option<String>,
    store: Option<PathBuf>,
}

#[derive(Debug)]
enum ParsedArgs {
    Run(CliConfig),
    Help,
}

fn parse_args(args: &[String]) -> Result<ParsedArgs, String> {
    let mut cli = CliConfig::default();

    let mut i = 0;
    while i < args.len() {
        let arg = args[i].as_str();
        let mut value = || {
            i += 1;
            args.get(i)
                .cloned()
                .ok_or_else(|| format!("Missing value for {arg}"))
        };
        match arg {
            "-c" | "--config" => cli.config_path = Some(PathBuf::from(value()?)),
            "-o" | "--origin" => cli.origin = Some(value()?),
            "-n" | "--cache-name" => cli.cache_name = Some(value()?),
            "-l" | "--listen" => cli.listen = Some(value()?),
            "-s" | "--store" => cli.store = Some(PathBuf::from(value()?)),
            "-h" | "--help" => return Ok(ParsedArgs::Help),
            "serve" if cli.command.is_none() => cli.command = Some(Command::Serve),
            "install" if cli.command.is_none() => cli.command = Some(Command::Install),
            "activate" if cli.command.is_none() => cli.command = Some(Command::Activate),
            "list" if cli.command.is_none() => cli.command = Some(Command::List),
            _ => return Err(format!("Unknown argument: {arg}")),
        }
        i += 1;
    }

    Ok(ParsedArgs::Run(cli))
}

fn print_usage() {
    eprintln!("Usage: offline-cache [OPTIONS] [serve|install|activate|list]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  serve                 Install, activate, then proxy the origin (default)");
    eprintln!("  install               Pre-cache the manifest into the current store");
    eprintln!("  activate              Delete stores other than the current one");
    eprintln!("  list                  Show stores and their contents");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -c, --config <FILE>   TOML configuration file");
    eprintln!("  -o, --origin <URL>    Application scope URL");
    eprintln!("  -n, --cache-name <N>  Current store identifier");
    eprintln!("  -l, --listen <ADDR>   Proxy address as host:port");
    eprintln!("  -s, --store <DIR>     Store root directory");
    eprintln!("  -h, --help            Show this help");
}

/// Splits `host:port`; IPv6 hosts must be bracketed (`[::1]:8080`).
fn parse_listen(listen: &str) -> offline_cache::Result<(String, u16)> {
    let invalid = || offline_cache::Error::Config(format!("listen address: {listen}"));
    let (host, port) = listen.rsplit_once(':').ok_or_else(invalid)?;
    let host = match host.strip_prefix('[') {
        Some(bracketed) => bracketed.strip_suffix(']').ok_or_else(invalid)?,
        None if host.contains(':') => return Err(invalid()),
        None => host,
    };
    if host.is_empty() {
        return Err(invalid());
    }
    let port = port
        .parse()
        .map_err(|e| offline_cache::Error::Config(format!("listen port {port}: {e}")))?;
    Ok((host.to_string(), port))
}

fn load_config(cli: &CliConfig) -> offline_cache::Result<AppConfig> {
    let mut config = match &cli.config_path {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::new(),
    };
    if let Some(origin) = &cli.origin {
        config.controller.scope.clone_from(origin);
    }
    if let Some(name) = &cli.cache_name {
        config.controller.cache_name.clone_from(name);
    }
    if let Some(store) = &cli.store {
        config.paths.store_dir.clone_from(store);
    }
    if let Some(listen) = &cli.listen {
        (config.server.host, config.server.port) = parse_listen(listen)?;
    }
    config.controller.validate()?;
    Ok(config)
}

type DiskController = AssetCacheController<DiskCacheStorage, HttpNetwork, Registration>;

fn build_controller(
    config: &AppConfig,
) -> offline_cache::Result<(Arc<Registration>, DiskController)> {
    let scope = config.controller.scope_url()?;
    let registration = Arc::new(Registration::new());
    let controller = AssetCacheController::new(
        config.controller.clone(),
        Arc::new(DiskCacheStorage::new(&config.paths.store_dir)),
        Arc::new(HttpNetwork::new(scope, &config.network)?),
        Arc::clone(&registration),
    );
    Ok((registration, controller))
}

async fn install(config: &AppConfig) -> offline_cache::Result<()> {
    let (registration, controller) = build_controller(config)?;
    let report = registration.run_install(&controller).await?;
    println!(
        "Installed {} assets ({}) into {}",
        report.entries,
        format_bytes(report.bytes),
        report.cache_name
    );
    Ok(())
}

async fn activate(config: &AppConfig) -> offline_cache::Result<()> {
    let (_registration, controller) = build_controller(config)?;
    let deleted = controller.activate().await?;
    if deleted.is_empty() {
        println!("No stale stores");
    } else {
        for name in &deleted {
            println!("Deleted {name}");
        }
    }
    Ok(())
}

async fn list(config: &AppConfig) -> offline_cache::Result<()> {
    let storage = DiskCacheStorage::new(&config.paths.store_dir);
    let names = storage.keys().await?;
    if names.is_empty() {
        println!("No stores in {}", config.paths.store_dir.display());
        return Ok(());
    }

    let now = chrono::Utc::now();
    for name in names {
        let entries = storage.entries(&name).await?;
        let bytes: u64 = entries.iter().map(offline_cache::CacheEntry::size).sum();
        let marker = if name == config.controller.cache_name {
            "*"
        } else {
            " "
        };
        let updated = entries
            .iter()
            .map(|e| e.stored_at)
            .max()
            .map_or_else(|| "empty".to_string(), |t| format_age(t, now));
        println!(
            "{marker} {name}  {} entries  {}  updated {updated}",
            entries.len(),
            format_bytes(bytes)
        );
        for entry in &entries {
            println!("    {} ({})", entry.key, format_bytes(entry.size()));
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> offline_cache::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().skip(1).collect();
    let cli = match parse_args(&args) {
        Ok(ParsedArgs::Run(cli)) => cli,
        Ok(ParsedArgs::Help) => {
            print_usage();
            return Ok(());
        }
        Err(msg) => {
            eprintln!("{msg}");
            print_usage();
            std::process::exit(1);
        }
    };
    let config = load_config(&cli)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => offline_cache::server::run(config).await,
        Command::Install => install(&config).await,
        Command::Activate => activate(&config).await,
        Command::List => list(&config).await,
    }
}

// ============================================================================
// Tests
// ============================================================================
