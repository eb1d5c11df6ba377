/* src/setup/gen_conf.rs */

use super::config::{DEFAULT_MAX_FILE_SIZE, DEFAULT_PORT};
use pnet::datalink;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

const LOOPBACK: &str = "127.0.0.1";

// All non-loopback IPv4 addresses across network interfaces.
pub fn lan_ipv4_addresses() -> Vec<String> {
    datalink::interfaces()
        .into_iter()
        .flat_map(|iface| iface.ips)
        .filter(|ip| ip.is_ipv4() && !ip.ip().is_loopback())
        .map(|ip| ip.ip().to_string())
        .collect()
}

// Scans for available IPv4 addresses and prompts the user to select one.
fn select_ip_address() -> Result<String, String> {
    let ipv4_addrs = lan_ipv4_addresses();

    match ipv4_addrs.len() {
        0 => {
            println!("> No network interfaces with a valid IPv4 address found. Falling back to {}.", LOOPBACK);
            Ok(LOOPBACK.to_string())
        }
        1 => {
            let ip = ipv4_addrs[0].clone();
            println!("> Found a single IPv4 address: {}. Using it.", ip);
            Ok(ip)
        }
        _ => {
            println!("> Multiple IPv4 addresses found. Please choose the one phones will reach:");
            for (i, ip) in ipv4_addrs.iter().enumerate() {
                println!("  {}) {}", i + 1, ip);
            }

            loop {
                print!("> Enter the number of the IP address to use: ");
                io::stdout().flush().map_err(|e| e.to_string())?;

                let mut input = String::new();
                let read = io::stdin().read_line(&mut input).map_err(|e| e.to_string())?;
                if read == 0 {
                    return Err("stdin closed before an address was selected".to_string());
                }

                match input.trim().parse::<usize>() {
                    Ok(n) if n > 0 && n <= ipv4_addrs.len() => {
                        let selected_ip = ipv4_addrs[n - 1].clone();
                        println!("> You selected: {}", selected_ip);
                        return Ok(selected_ip);
                    }
                    _ => {
                        println!(
                            "! Invalid selection. Please enter a number between 1 and {}.",
                            ipv4_addrs.len()
                        );
                    }
                }
            }
        }
    }
}

pub fn render_default_config(address: &str) -> String {
    format!(
        r#"[setup]
log_level = "info"

[network]
listen = "0.0.0.0"
address = "{}"
port = {}

[storage]
upload_dir = "uploads"
temp_dir = "temp"

[upload]
max_file_size = {}
io_chunk_size = 32768
batch_timeout_secs = 10
metadata_timeout_ms = 2000
normalize_extensions = false

[rate_limit]
max_requests = 600
window_secs = 60

[sweep]
interval_secs = 300
chunk_ttl_secs = 3600
"#,
        address, DEFAULT_PORT, DEFAULT_MAX_FILE_SIZE
    )
}

// Generates a default configuration file after prompting the user to select an IP address.
pub fn generate_default_config<P: AsRef<Path>>(path: P) -> Result<(), String> {
    let selected_ip = select_ip_address()?;
    let content = render_default_config(&selected_ip);

    let mut file = File::create(path.as_ref())
        .map_err(|e| format!("Failed to create '{}': {}", path.as_ref().display(), e))?;
    file.write_all(content.as_bytes())
        .map_err(|e| format!("Failed to write default config: {}", e))?;
    println!("+ Default configuration file created successfully.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::config::Config;

    #[test]
    fn rendered_default_config_parses_back() {
        let cfg = Config::from_toml(&render_default_config("192.168.0.7")).unwrap();
        assert_eq!(cfg.network.address, "192.168.0.7");
        assert_eq!(cfg.network.port, DEFAULT_PORT);
        assert_eq!(cfg.upload.max_file_size, DEFAULT_MAX_FILE_SIZE);
        assert_eq!(cfg.storage.temp_dir, "temp");
    }
}
