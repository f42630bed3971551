//! `fldelay` - CLI for flightdelay
//!
//! This binary runs the lookup service and provides client and maintenance
//! commands against it.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use chrono::Utc;
use clap::Parser;

use flightdelay::cli::{
    CacheCommand, CheckCommand, Cli, Command, ConfigCommand, LookupCommand, RegisterCommand,
    StatusCommand, TierCommand,
};
use flightdelay::client::{self, LookupClient};
use flightdelay::fanout::{check_flights, Route};
use flightdelay::lookup::{LookupRequest, LookupResponse, Source};
use flightdelay::stats::StatResult;
use flightdelay::{init_logging, server, Config, Storage};

type CliResult = Result<(), Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() -> CliResult {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    // Load configuration
    let mut config = Config::load_from(cli.config.clone())?;

    match cli.command {
        Command::Serve(cmd) => {
            if let Some(bind) = cmd.bind {
                config.server.bind_address = bind;
                config.validate()?;
            }
            server::serve(&config).await?;
            Ok(())
        }
        Command::Register(cmd) => handle_register(&config, &cmd).await,
        Command::Lookup(cmd) => handle_lookup(&config, cmd).await,
        Command::Check(cmd) => handle_check(&config, cmd).await,
        Command::Status(cmd) => handle_status(&config, &cmd),
        Command::Tier(cmd) => handle_tier(&config, &cmd),
        Command::Cache(cmd) => handle_cache(&config, &cmd),
        Command::Config(cmd) => handle_config(&config, cmd),
    }
}

/// A client with an identity: configured, saved, or freshly registered.
async fn identified_client(config: &Config) -> Result<LookupClient, Box<dyn std::error::Error>> {
    let mut lookup_client = LookupClient::new(&config.client)?;
    if lookup_client.identity_id().is_some() {
        return Ok(lookup_client);
    }

    let path = Config::identity_path();
    if let Some(saved) = client::load_identity(&path)? {
        return Ok(lookup_client.with_identity(saved));
    }

    let id = lookup_client.ensure_identity().await?;
    client::save_identity(&path, &id)?;
    eprintln!("Registered new identity {id} (saved to {})", path.display());
    Ok(lookup_client)
}

async fn handle_register(config: &Config, cmd: &RegisterCommand) -> CliResult {
    let lookup_client = LookupClient::new(&config.client)?;
    let registered = lookup_client.register().await?;

    println!("Identity:     {}", registered.identity_id);
    println!("Daily limit:  {}", registered.daily_limit);

    if cmd.save {
        let path = Config::identity_path();
        client::save_identity(&path, &registered.identity_id)?;
        println!("Saved to:     {}", path.display());
    }
    Ok(())
}

async fn handle_lookup(config: &Config, cmd: LookupCommand) -> CliResult {
    let lookup_client = identified_client(config).await?;
    let identity = lookup_client.identity_id().unwrap_or_default().to_string();

    let request =
        LookupRequest::new(identity, cmd.flight.clone()).with_route(cmd.origin, cmd.destination);
    let response = lookup_client.lookup(&request).await?;

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_response(&cmd.flight, &response);
    }
    Ok(())
}

fn print_response(flight: &str, response: &LookupResponse) {
    let source = match response.source {
        Source::Cache => "cache",
        Source::Api => "fresh",
    };
    println!("{flight} ({source})");

    match &response.stats {
        StatResult::Summary(summary) => {
            println!("  Flights:      {}", summary.sample_size);
            println!("  Avg delay:    {} min", summary.avg_delay);
            println!("  Range:        {} to {} min", summary.min_delay, summary.max_delay);
            println!("  Middle half:  {} to {} min", summary.p25, summary.p75);
            println!("  Cancelled:    {}", summary.cancelled_count);
        }
        StatResult::Insufficient(insufficient) => {
            println!("  {}", insufficient.reason);
        }
    }

    if let Some(usage) = response.usage {
        println!("  Usage today:  {}/{}", usage.today, usage.limit);
    }
}

async fn handle_check(config: &Config, cmd: CheckCommand) -> CliResult {
    let lookup_client = identified_client(config).await?;
    let identity = lookup_client.identity_id().unwrap_or_default().to_string();
    let route = Route {
        origin: cmd.origin,
        destination: cmd.destination,
    };

    let report = check_flights(&lookup_client, &identity, &cmd.flights, &route).await;

    for check in &report.checks {
        match (&check.outcome, check.avg_delay()) {
            (Ok(_), Some(avg)) => {
                let marker = if check.is_delayed() { "LATE" } else { "ok" };
                println!("{:<10} {avg:>4} min  {marker}", check.flight_number);
            }
            (Ok(response), None) => {
                let reason = match &response.stats {
                    StatResult::Insufficient(i) => i.reason.as_str(),
                    StatResult::Summary(_) => "no data",
                };
                println!("{:<10} {reason}", check.flight_number);
            }
            (Err(e), _) => println!("{:<10} error: {e}", check.flight_number),
        }
    }

    if report.has_data {
        println!();
        if report.any_delayed {
            println!("At least one flight usually runs late.");
        } else {
            println!("All flights with data usually arrive on time.");
        }
    }
    Ok(())
}

fn handle_status(config: &Config, cmd: &StatusCommand) -> CliResult {
    let storage = Storage::open(config.database_path())?;
    let stats = storage.stats(Utc::now(), config.cache_ttl())?;

    if cmd.json {
        let status = serde_json::json!({
            "database_path": storage.path(),
            "identities": stats.total_identities,
            "cache_entries": stats.cache_entries,
            "fresh_cache_entries": stats.fresh_cache_entries,
            "db_size_bytes": stats.db_size_bytes,
            "daily_limit": config.quota.daily_limit,
            "cache_ttl_days": config.cache.ttl_days,
            "upstream_key_configured": config.upstream.api_key.is_some(),
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("fldelay status");
        println!("--------------");
        println!("Database:       {}", storage.path().display());
        println!("Size:           {} bytes", stats.db_size_bytes);
        println!("Identities:     {}", stats.total_identities);
        println!(
            "Cache entries:  {} ({} fresh)",
            stats.cache_entries, stats.fresh_cache_entries
        );
        println!("Daily limit:    {}", config.quota.daily_limit);
        println!("Cache TTL:      {} days", config.cache.ttl_days);
        println!(
            "Upstream key:   {}",
            if config.upstream.api_key.is_some() {
                "configured"
            } else {
                "missing"
            }
        );
    }
    Ok(())
}

fn handle_tier(config: &Config, cmd: &TierCommand) -> CliResult {
    let storage = Storage::open(config.database_path())?;
    if storage.set_tier(&cmd.identity_id, cmd.tier)? {
        println!("{} is now {}", cmd.identity_id, cmd.tier);
        Ok(())
    } else {
        Err(format!("identity not found: {}", cmd.identity_id).into())
    }
}

fn handle_cache(config: &Config, cmd: &CacheCommand) -> CliResult {
    match cmd {
        CacheCommand::Prune => {
            let storage = Storage::open(config.database_path())?;
            let pruned = storage.prune_cache(Utc::now(), config.cache_ttl())?;
            println!("Pruned {pruned} stale cache entries.");
        }
    }
    Ok(())
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> CliResult {
    match cmd {
        ConfigCommand::Show { json } => {
            let config = config.redacted();
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Server]");
                println!("  Bind address:       {}", config.server.bind_address);
                println!();
                println!("[Storage]");
                println!("  Database path:      {}", config.database_path().display());
                println!(
                    "  Prune every (h):    {}",
                    config.storage.prune_interval_hours
                );
                println!();
                println!("[Upstream]");
                println!("  Base URL:           {}", config.upstream.base_url);
                println!(
                    "  API key:            {}",
                    config.upstream.api_key.as_deref().unwrap_or("(not set)")
                );
                println!("  History (days):     {}", config.upstream.history_days);
                println!("  Timeout (s):        {}", config.upstream.timeout_secs);
                println!();
                println!("[Quota]");
                println!("  Daily limit:        {}", config.quota.daily_limit);
                println!();
                println!("[Cache]");
                println!("  TTL (days):         {}", config.cache.ttl_days);
                println!();
                println!("[Client]");
                println!("  Service URL:        {}", config.client.service_url);
                println!(
                    "  Identity:           {}",
                    config.client.identity_id.as_deref().unwrap_or("(not set)")
                );
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => println!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}
