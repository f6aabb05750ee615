//! Command line front end for the Wi-Fi driver HAL.
//!
//! Usage:
//!   wifi-hal [--config <path>] <command>
//!
//! The exit status is 0 on success or the HAL error code on failure.

use log::{debug, error};
use std::path::PathBuf;
use std::process::exit;

use wifi_driver_hal::{hal, FirmwareMode, HalConfig, HalError, WifiHal};

/// Parsed command.
#[derive(Debug, Clone, PartialEq)]
enum Command {
    Load,
    Unload,
    FwPath(FirmwareMode),
    ChangeFwPath(String),
    Probe,
    Status,
}

struct Args {
    config: Option<PathBuf>,
    command: Command,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = parse_args();

    let config = match &args.config {
        Some(path) => HalConfig::load(path),
        None => HalConfig::from_env(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            exit(1);
        }
    };

    let mut wifi = WifiHal::host(config);
    exit(run(&mut wifi, args.command));
}

fn run(wifi: &mut WifiHal, command: Command) -> i32 {
    match command {
        Command::Load => hal::load_driver(wifi),
        Command::Unload => hal::unload_driver(wifi),
        Command::FwPath(mode) => match wifi.fw_path(mode) {
            Ok(path) => {
                println!("{}", path);
                0
            }
            Err(e) => report(e),
        },
        Command::ChangeFwPath(path) => hal::change_fw_path(wifi, Some(&path)),
        Command::Probe => match wifi.probe() {
            Ok(d) => {
                println!(
                    "{} ({} {}) module={} path={}",
                    d.vendor_name, d.bus, d.match_id, d.module_name, d.module_path
                );
                0
            }
            Err(e) => report(e),
        },
        Command::Status => {
            let ctx = wifi.context();
            let status_property = &ctx.config.status_property;
            let status = ctx.platform.props.get(status_property);
            let profile = if ctx.config.profile.is_multi_vendor() {
                "multi-vendor"
            } else {
                "fixed"
            };
            println!("profile: {}", profile);
            println!(
                "vendor:  {}",
                wifi.current_vendor().as_deref().unwrap_or("(none)")
            );
            println!(
                "{}: {}",
                status_property,
                status.as_deref().unwrap_or("(unset)")
            );
            0
        }
    }
}

fn report(e: HalError) -> i32 {
    error!("{}", e);
    e.code()
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut config = None;
    let mut rest = Vec::new();

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" | "-c" => match iter.next() {
                Some(path) => config = Some(PathBuf::from(path)),
                None => usage_error(&args[0], "--config needs a path"),
            },
            "--help" | "-h" => {
                print_usage(&args[0]);
                exit(0);
            }
            _ => rest.push(arg.as_str()),
        }
    }

    let command = match rest.as_slice() {
        ["load"] => Command::Load,
        ["unload"] => Command::Unload,
        ["fw-path", mode] => match mode.parse::<FirmwareMode>() {
            Ok(mode) => Command::FwPath(mode),
            Err(e) => usage_error(&args[0], &e.to_string()),
        },
        ["change-fw-path", path] => Command::ChangeFwPath(path.to_string()),
        ["probe"] => Command::Probe,
        ["status"] => Command::Status,
        [] => usage_error(&args[0], "missing command"),
        other => usage_error(&args[0], &format!("unknown command: {}", other.join(" "))),
    };

    debug!("wifi-hal {:?}", command);
    Args { config, command }
}

fn print_usage(program: &str) {
    println!("Wi-Fi driver HAL");
    println!();
    println!("Usage:");
    println!("  {} [OPTIONS] <COMMAND>", program);
    println!();
    println!("Commands:");
    println!("  load                  Power up, identify the chip and load its driver");
    println!("  unload                Unload the driver and power down");
    println!("  fw-path <sta|ap|p2p>  Print the firmware image for a mode");
    println!("  change-fw-path <path> Point the driver at another firmware image");
    println!("  probe                 Identify the chip without loading anything");
    println!("  status                Show the stored vendor and driver status");
    println!();
    println!("Options:");
    println!("  --config, -c <path>   Configuration file (default: $WIFI_HAL_CONFIG)");
    println!("  --help, -h            Show this help");
}

fn usage_error(program: &str, msg: &str) -> ! {
    eprintln!("Error: {}", msg);
    eprintln!();
    print_usage(program);
    exit(2);
}
