use anyhow::Context;
use clap::{Arg, ArgAction, ArgMatches, Command};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::process;
use tokio_util::sync::CancellationToken;

use synsweep::{
    config::SweepConfig,
    output::{MetadataTable, OutputConfig, OutputFormat, OutputManager},
    ExecutionMode, SweepEngine, SweepSpec, TeardownMode,
};

/// Exit status after Ctrl+C
const EXIT_CANCELLED: i32 = 130;

fn build_cli() -> Command {
    Command::new("synsweep")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Sweep IPv4 subnets for listening TCP ports with half-open SYN probes")
        .arg(
            Arg::new("subnet")
                .value_name("SUBNET")
                .help("Subnet definition, e.g. 10.1.134, 10.1.132:134 or 10.1.132,134")
                .required(true)
                .num_args(1..)
                .index(1),
        )
        .arg(
            Arg::new("start-ip")
                .short('s')
                .long("start-ip")
                .value_name("OCTET")
                .help("First host octet for octets left open in a subnet definition")
                .value_parser(clap::value_parser!(u8)),
        )
        .arg(
            Arg::new("end-ip")
                .short('e')
                .long("end-ip")
                .value_name("OCTET")
                .help("Last host octet for octets left open in a subnet definition")
                .value_parser(clap::value_parser!(u8)),
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .help("Destination port; repeat for several. Default 5989")
                .value_parser(clap::value_parser!(u16).range(1..))
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("no-threads")
                .long("no-threads")
                .help("Probe one endpoint at a time")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("concurrency")
                .short('c')
                .long("concurrency")
                .value_name("COUNT")
                .help("Maximum number of probes in flight")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("timeout")
                .short('t')
                .long("timeout")
                .value_name("MS")
                .help("Per-probe timeout in milliseconds")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("retries")
                .long("retries")
                .value_name("COUNT")
                .help("Re-probe endpoints that did not answer up to COUNT more times")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("teardown")
                .long("teardown")
                .value_name("FLAGS")
                .help("Flags used to reset a half-open connection")
                .value_parser(["rst", "rst-ack"]),
        )
        .arg(
            Arg::new("metadata")
                .short('m')
                .long("metadata")
                .value_name("FILE")
                .help("JSON file of endpoint metadata keyed by ip:port")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("FILE")
                .help("Configuration file (default ~/.synsweep.toml)")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("connect-fallback")
                .long("connect-fallback")
                .help("Use full TCP connects when raw sockets are not permitted")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .help("Print the report as JSON")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("FILE")
                .help("Write the report to FILE instead of stdout")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("no-color")
                .long("no-color")
                .help("Disable colored output")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("ulimit")
                .short('u')
                .long("ulimit")
                .value_name("LIMIT")
                .help("Raise the open file limit to this value")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Log every probe")
                .action(ArgAction::SetTrue),
        )
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .init();
}

// Ulimit adjustment for Unix systems
#[cfg(unix)]
fn adjust_ulimit_size(ulimit: Option<u64>) -> u64 {
    use rlimit::Resource;

    if let Some(limit) = ulimit {
        if Resource::NOFILE.set(limit, limit).is_ok() {
            log::info!("Raised open file limit to {}", limit);
        } else {
            eprintln!("{}", "[!] Failed to set ulimit value.".bright_red());
        }
    }

    match Resource::NOFILE.get() {
        Ok((soft, _)) => soft,
        Err(_) => {
            log::warn!("Could not read the open file limit");
            u64::MAX
        }
    }
}

#[cfg(not(unix))]
fn adjust_ulimit_size(_ulimit: Option<u64>) -> u64 {
    u64::MAX
}

/// Config file values overridden by whatever was given on the command line
fn resolve_config(matches: &ArgMatches) -> anyhow::Result<SweepConfig> {
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => SweepConfig::from_toml_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => SweepConfig::load_default_config(),
    };

    if let Some(&start_ip) = matches.get_one::<u8>("start-ip") {
        config.start_ip = start_ip;
    }
    if let Some(&end_ip) = matches.get_one::<u8>("end-ip") {
        config.end_ip = end_ip;
    }
    if let Some(ports) = matches.get_many::<u16>("port") {
        config.ports = ports.copied().collect();
    }
    if matches.get_flag("no-threads") {
        config.mode = ExecutionMode::Sequential;
    }
    if let Some(&concurrency) = matches.get_one::<usize>("concurrency") {
        config.concurrency = concurrency;
    }
    if let Some(&timeout) = matches.get_one::<u64>("timeout") {
        config.timeout = timeout;
    }
    if let Some(&retries) = matches.get_one::<u32>("retries") {
        config.retries = retries;
    }
    if let Some(teardown) = matches.get_one::<String>("teardown") {
        config.teardown = teardown.parse::<TeardownMode>()?;
    }
    if matches.get_flag("connect-fallback") {
        config.connect_fallback = true;
    }

    config.validate()?;
    Ok(config)
}

async fn run(matches: &ArgMatches) -> anyhow::Result<i32> {
    let config = resolve_config(matches)?;

    let subnets: Vec<String> = matches
        .get_many::<String>("subnet")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();
    let spec = SweepSpec::from_config(subnets, &config);
    spec.validate()?;

    let fd_limit = adjust_ulimit_size(matches.get_one::<u64>("ulimit").copied());
    if config.mode == ExecutionMode::Concurrent && (config.concurrency as u64) > fd_limit {
        log::warn!(
            "Concurrency {} exceeds the open file limit {}; consider --ulimit",
            config.concurrency,
            fd_limit
        );
    }

    let metadata = match matches.get_one::<PathBuf>("metadata") {
        Some(path) => Some(
            MetadataTable::from_json_file(path)
                .with_context(|| format!("loading metadata {}", path.display()))?,
        ),
        None => None,
    };

    let verbose = matches.get_flag("verbose");
    let mut engine = SweepEngine::new(config.clone())?;
    if !verbose {
        let progress = ProgressBar::new(0);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
                .context("progress bar template")?
                .progress_chars("#>-"),
        );
        engine = engine.with_progress(progress);
    }

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_token.cancel();
        }
    });

    let report = engine
        .sweep(&spec, config.mode, cancel, metadata.as_ref())
        .await?;

    let output = OutputManager::new(OutputConfig {
        format: if matches.get_flag("json") {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        },
        file: matches.get_one::<PathBuf>("output").cloned(),
        colored: !matches.get_flag("no-color"),
        metadata_supplied: metadata.is_some(),
    });
    output.write_report(&report, &spec)?;

    Ok(if report.cancelled { EXIT_CANCELLED } else { 0 })
}

#[tokio::main]
async fn main() {
    let matches = build_cli().get_matches();
    init_logging(matches.get_flag("verbose"));

    match run(&matches).await {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("{} {:#}", "[!] Error:".bright_red(), e);
            process::exit(1);
        }
    }
}
