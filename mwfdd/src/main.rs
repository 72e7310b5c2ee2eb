use std::process;

use clap::{Arg, Command};
use log::{error, info, LevelFilter};
use tokio::signal;

mod config;
mod daemon;

use config::Config;
use daemon::Daemon;

#[tokio::main]
async fn main() {
    let matches = Command::new("mwfdd")
        .version(env!("CARGO_PKG_VERSION"))
        .about("mwfdd - multi-worker content-centric forwarding daemon")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("/etc/mwfd/mwfdd.conf"),
        )
        .arg(
            Arg::new("workers")
                .short('w')
                .long("workers")
                .value_name("N")
                .help("Override the configured worker count"),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").unwrap();
    let mut config = match Config::load(config_path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load configuration: {err:#}");
            process::exit(1);
        }
    };
    if let Some(workers) = matches.get_one::<String>("workers") {
        match workers.parse() {
            Ok(workers) => config.forwarding.workers = workers,
            Err(_) => {
                eprintln!("invalid worker count: {workers}");
                process::exit(1);
            }
        }
    }

    let level = config
        .logging
        .level
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::Info);
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    info!("starting mwfdd");
    info!("config file: {config_path}");

    let mut daemon = Daemon::new(config);
    if let Err(err) = daemon.start() {
        error!("failed to start daemon: {err:#}");
        process::exit(1);
    }
    info!("mwfdd started");

    signal::ctrl_c().await.expect("listen for ctrl-c");

    info!("shutting down mwfdd");
    daemon.stop();
}
