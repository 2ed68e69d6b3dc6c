// icinga2rt: Bridges Icinga 2 notifications to Request Tracker tickets.
//
// One process, three modes: the long-running bridge loop, one-shot cache
// import/export, and example-config emission.

use bridge::cache::Cache;
use bridge::config;
use bridge::engine::{TicketUpdater, UpdateError};
use bridge::mapping;
use clap::{Arg, ArgAction, Command};
use icinga_client::{FilterSet, Notification};
use rt_client::{RestClient, TicketClient};
use std::io::Write;
use std::path::Path;
use std::process::exit;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Queue name registered with the Icinga events API.
const ICINGA_QUEUE_NAME: &str = "icinga2rt";

/// How often a failed ticket action is attempted before the notification is
/// dropped as a dead letter.
const ACTION_RETRIES: u32 = 3;
const ACTION_RETRY_PAUSE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() {
    let matches = Command::new("icinga2rt")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Bridges Icinga 2 notifications to Request Tracker tickets")
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("PATH")
                .default_value("/etc/bytemine/icinga2rt.json")
                .help("configuration file"),
        )
        .arg(
            Arg::new("example")
                .long("example")
                .action(ArgAction::SetTrue)
                .help("write example configuration to the current directory and quit"),
        )
        .arg(
            Arg::new("exportCache")
                .long("exportCache")
                .value_name("PATH")
                .help("export contents of cache to this file ('-' for stdout), and quit"),
        )
        .arg(
            Arg::new("importCache")
                .long("importCache")
                .value_name("PATH")
                .help("import contents of cache from this file ('-' for stdin), and quit"),
        )
        .arg(
            Arg::new("debug")
                .long("debug")
                .action(ArgAction::SetTrue)
                .help("debug mode, print log messages"),
        )
        .arg(
            Arg::new("debugevents")
                .long("debugevents")
                .action(ArgAction::SetTrue)
                .help("print received events"),
        )
        .get_matches();

    let default_level = if matches.get_flag("debug") {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    if matches.get_flag("example") {
        write_examples();
        return;
    }

    let config_path = Path::new(
        matches
            .get_one::<String>("config")
            .expect("config has a default"),
    );
    let conf = match config::load(config_path) {
        Ok(conf) => conf,
        Err(e) => {
            eprintln!("FATAL: init: {e}");
            exit(1);
        }
    };
    if let Err(e) = config::check(&conf) {
        eprintln!("FATAL: init: {e}");
        exit(1);
    }

    let cache = match Cache::open(Path::new(&conf.cache.file)) {
        Ok(cache) => cache,
        Err(e) => {
            eprintln!("FATAL: init: opening cache {}: {e}", conf.cache.file);
            exit(1);
        }
    };

    if let Some(path) = matches.get_one::<String>("exportCache") {
        export_cache(&cache, path);
        return;
    }
    if let Some(path) = matches.get_one::<String>("importCache") {
        import_cache(cache, path);
        return;
    }

    run(conf, cache, matches.get_flag("debugevents")).await;
}

// ---------------------------------------------------------------------------
// One-shot modes
// ---------------------------------------------------------------------------

fn write_examples() {
    if let Err(e) = config::save(Path::new("icinga2rt.json.example"), &config::example()) {
        eprintln!("FATAL: init: {e}");
        exit(1);
    }
    if let Err(e) = std::fs::write("mappings.csv.example", mapping::EXAMPLE_MAPPINGS) {
        eprintln!("FATAL: init: writing mappings.csv.example: {e}");
        exit(1);
    }
    info!("wrote icinga2rt.json.example and mappings.csv.example");
}

fn export_cache(cache: &Cache, path: &str) {
    let result = if path == "-" {
        cache.write_to(&mut std::io::stdout().lock())
    } else {
        std::fs::File::create(path)
            .map_err(Into::into)
            .and_then(|file| {
                let mut writer = std::io::BufWriter::new(file);
                let count = cache.write_to(&mut writer)?;
                writer.flush()?;
                Ok(count)
            })
    };

    match result {
        Ok(records) => info!(records, "cache exported"),
        Err(e) => {
            eprintln!("FATAL: export: {e}");
            exit(1);
        }
    }
}

fn import_cache(mut cache: Cache, path: &str) {
    let result = if path == "-" {
        cache.read_from(&mut std::io::stdin().lock())
    } else {
        std::fs::File::open(path)
            .map_err(Into::into)
            .and_then(|file| cache.read_from(&mut std::io::BufReader::new(file)))
    };

    match result {
        Ok(records) => info!(records, "cache imported"),
        Err(e) => {
            eprintln!("FATAL: import: {e}");
            exit(1);
        }
    }
}

// ---------------------------------------------------------------------------
// Bridge loop
// ---------------------------------------------------------------------------

async fn run(conf: config::Config, cache: Cache, debug_events: bool) {
    info!(version = env!("CARGO_PKG_VERSION"), "icinga2rt starting");

    let mappings = match mapping::load_mappings(Path::new(&conf.ticket.mappings)) {
        Ok(mappings) => mappings,
        Err(e) => {
            eprintln!("FATAL: init: loading mappings {}: {e}", conf.ticket.mappings);
            exit(1);
        }
    };
    info!(rules = mappings.len(), "mappings loaded");

    let rt = match RestClient::new(&conf.rt.url, &conf.rt.user, &conf.rt.password, conf.rt.insecure)
    {
        Ok(client) => client,
        Err(e) => {
            eprintln!("FATAL: init: {e}");
            exit(1);
        }
    };

    let mut updater = TicketUpdater::new(
        cache,
        rt,
        mappings,
        conf.ticket.nobody.clone(),
        conf.ticket.queue.clone(),
        conf.ticket.closed_status.clone(),
    );

    let icinga = match icinga_client::Client::new(
        &conf.icinga.url,
        &conf.icinga.user,
        &conf.icinga.password,
        conf.icinga.insecure,
    ) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("FATAL: init: {e}");
            exit(1);
        }
    };

    let local_filter = conf
        .icinga
        .local_filter
        .as_ref()
        .and_then(config::LocalFilter::to_set);

    let mut stream = match icinga
        .event_stream_with_backoff(conf.icinga.retries, ICINGA_QUEUE_NAME, &conf.icinga.filter)
        .await
    {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!("FATAL: init: {e}");
            exit(1);
        }
    };
    info!(url = %conf.icinga.url, "connected to icinga");

    loop {
        let notification = match stream.next().await {
            Ok(Some(notification)) => notification,
            Ok(None) => {
                debug!("event stream ended, trying to reconnect to icinga");
                stream = reconnect(&icinga, &conf).await;
                continue;
            }
            Err(e) => {
                debug!(error = %e, "event stream failed, trying to reconnect to icinga");
                stream = reconnect(&icinga, &conf).await;
                continue;
            }
        };

        if debug_events {
            debug!(
                event = %serde_json::to_string(&notification).unwrap_or_default(),
                "event stream"
            );
        }

        if let Some(filter) = &local_filter {
            if !admitted(filter, &notification) {
                continue;
            }
        }

        if let Err(e) = process(&mut updater, &notification).await {
            eprintln!("FATAL: main: {e}");
            exit(1);
        }
    }
}

/// Reopen the event stream with the configured backoff; fatal when the
/// retries are exhausted.
async fn reconnect(icinga: &icinga_client::Client, conf: &config::Config) -> icinga_client::EventStream {
    match icinga
        .event_stream_with_backoff(conf.icinga.retries, ICINGA_QUEUE_NAME, &conf.icinga.filter)
        .await
    {
        Ok(stream) => {
            info!("reconnected to icinga");
            stream
        }
        Err(e) => {
            eprintln!("FATAL: main: {e}");
            exit(1);
        }
    }
}

fn admitted(filter: &FilterSet, notification: &Notification) -> bool {
    if filter.matches(notification) {
        return true;
    }
    debug!(
        host = %notification.host,
        service = %notification.service,
        "notification dropped by local filter"
    );
    false
}

/// Run one engine update with bounded retries for ticket-backend failures.
///
/// Cache errors abort immediately. After the last failed attempt the
/// notification is logged as a dead letter and dropped; the cache was not
/// touched, so the next event for this check re-derives its state cleanly.
async fn process<C: TicketClient>(
    updater: &mut TicketUpdater<C>,
    notification: &Notification,
) -> Result<(), UpdateError> {
    let mut last_error = None;

    for attempt in 1..=ACTION_RETRIES {
        match updater.update(notification).await {
            Ok(()) => return Ok(()),
            Err(e @ UpdateError::Cache(_)) => return Err(e),
            Err(UpdateError::Ticket(e)) => {
                warn!(attempt, error = %e, "ticket action failed");
                last_error = Some(e);
                if attempt < ACTION_RETRIES {
                    tokio::time::sleep(ACTION_RETRY_PAUSE).await;
                }
            }
        }
    }

    error!(
        event = %serde_json::to_string(notification).unwrap_or_default(),
        error = %last_error.expect("at least one attempt was made"),
        "dropping notification after repeated ticket failures"
    );
    Ok(())
}
