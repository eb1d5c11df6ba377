/* src/main.rs */

use log::{error, info};
use photodrop::ingest::coordinator::UploadCoordinator;
use photodrop::ingest::reaper::spawn_reaper;
use photodrop::ingest::stats::format_file_size;
use photodrop::server;
use photodrop::setup::check::validate_server_config;
use photodrop::setup::config::Config;
use photodrop::setup::gen_conf::{generate_default_config, lan_ipv4_addresses};
use photodrop::setup::logging::init_logging;
use std::env;
use std::process::ExitCode;
use std::sync::Arc;

const DEFAULT_CONFIG: &str = "photodrop.toml";

fn print_banner(config: &Config) {
    let port = config.network.port;
    info!("> Photodrop is up.");
    info!("   - Upload folder: {}", config.upload_dir().display());
    info!("   - Max file size: {}", format_file_size(config.upload.max_file_size));
    info!("   - I/O chunk size: {}", format_file_size(config.upload.io_chunk_size as u64));
    info!("   - On this computer: http://localhost:{}", port);
    let mut lan = lan_ipv4_addresses();
    if lan.is_empty() {
        lan.push(config.network.address.clone());
    }
    for ip in lan {
        info!("   - From your phone: http://{}:{}", ip, port);
    }
}

async fn run(config_path: &str) -> Result<(), String> {
    let config = Config::from_file(config_path)?;
    init_logging(&config.setup.log_level);
    validate_server_config(&config)?;

    let coordinator = Arc::new(UploadCoordinator::from_config(&config));
    let reaper = spawn_reaper(coordinator.clone(), config.sweep_interval(), config.chunk_ttl());
    print_banner(&config);

    let served = server::serve(&config, coordinator).await;
    reaper.abort();
    served
}

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();

    if args.len() == 1 {
        return match generate_default_config(DEFAULT_CONFIG) {
            Ok(()) => {
                println!("> Default config generated. Use '-c {}' to run.", DEFAULT_CONFIG);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("! Could not write {}: {}", DEFAULT_CONFIG, e);
                ExitCode::FAILURE
            }
        };
    }

    if args.len() == 3 && args[1] == "-c" {
        return match run(&args[2]).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!("! {}", e);
                eprintln!("\nApplication Error: {}\n", e);
                ExitCode::FAILURE
            }
        };
    }

    println!("! Invalid usage. Use '-c <config_path>' to run or no arguments to generate a default config.");
    ExitCode::FAILURE
}
