//! simple-usb
//!
//! Command line front end for the client library: read a device's serial
//! number, dump its descriptors and pipes, or watch it come and go.

mod config;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use client::{Connection, Dispatcher, RusbHost, observer_fn};
use common::{hex_dump, setup_logging};
use protocol::{
    Configuration, DescriptorType, DeviceDescriptor, DeviceIdentity, MatchFilter, PipeProperties,
    STRING_DESCRIPTOR_BUFFER_LEN, StringDescriptor,
};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};

/// How long one libusb event pump waits before checking for shutdown
const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Parser, Debug)]
#[command(name = "simple-usb")]
#[command(author, version, about = "Talk to a USB device by vendor and product id")]
#[command(long_about = "
Open a USB device by vendor/product id, read its descriptors and strings,
list its pipes, or watch for it to arrive and depart.

EXAMPLES:
    # Print the serial number of the default device (05ac:1281)
    simple-usb serial

    # Dump every descriptor of another device as JSON
    simple-usb --vendor 1234 --product 5678 inspect --json

    # Report arrivals and departures until Ctrl+C
    simple-usb --log-level debug watch

CONFIGURATION:
    The client looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/simple-usb/client.toml
    3. /etc/simple-usb/client.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Vendor id in hex, overrides the config file
    #[arg(long, value_name = "HEX", value_parser = config::parse_usb_id)]
    vendor: Option<u16>,

    /// Product id in hex, overrides the config file
    #[arg(long, value_name = "HEX", value_parser = config::parse_usb_id)]
    product: Option<u16>,

    /// Open the N-th interface instead of the first
    #[arg(long, value_name = "N")]
    interface: Option<usize>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Connect and print the serial number string (default)
    Serial,
    /// Dump the device descriptor, strings, pipes and configurations
    Inspect {
        /// Print the dump as JSON
        #[arg(long)]
        json: bool,
    },
    /// Report matching devices as they arrive and depart
    Watch,
}

/// Target device and interface after merging config and flags
#[derive(Debug, Clone, Copy)]
struct Target {
    filter: MatchFilter,
    interface_index: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle --save-config flag early (before loading config)
    if args.save_config {
        let config = config::ClientConfig::default();
        let path = config::ClientConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        config::load_config(path).context("Failed to load configuration")?
    } else {
        config::ClientConfig::load_or_default()
    };

    // Use CLI log level if specified, otherwise use config value
    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.client.log_level);

    setup_logging(log_level).context("Failed to setup logging")?;

    info!("simple-usb v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", log_level);

    let configured = config.filter();
    let target = Target {
        filter: MatchFilter::new(
            args.vendor.unwrap_or(configured.vendor_id),
            args.product.unwrap_or(configured.product_id),
        ),
        interface_index: args.interface.unwrap_or(config.device.interface_index),
    };
    info!("Target device: {}", target.filter);

    let host = RusbHost::new().context("Failed to initialize libusb")?;

    match args.command.unwrap_or(Command::Serial) {
        Command::Serial => tokio::task::spawn_blocking(move || run_serial(host, target))
            .await
            .context("Serial task panicked")??,
        Command::Inspect { json } => {
            tokio::task::spawn_blocking(move || run_inspect(host, target, json))
                .await
                .context("Inspect task panicked")??
        }
        Command::Watch => run_watch(host, target).await?,
    }

    Ok(())
}

fn connect(host: RusbHost, target: Target) -> Result<Connection<RusbHost>> {
    let mut conn = Connection::new(host);
    conn.connect_interface(
        target.filter.vendor_id,
        target.filter.product_id,
        target.interface_index,
    )
    .with_context(|| format!("Failed to connect to {}", target.filter))?;
    Ok(conn)
}

fn run_serial(host: RusbHost, target: Target) -> Result<()> {
    let mut conn = connect(host, target)?;

    let device = conn
        .device_descriptor()
        .context("Failed to read device descriptor")?;
    println!("Device descriptor:");
    print!("{}", hex_dump(&device.to_bytes()));

    let Some(index) = device.serial_number_string_index() else {
        bail!("Device {} has no serial number string", target.filter);
    };

    let mut raw = [0u8; STRING_DESCRIPTOR_BUFFER_LEN];
    let length = conn
        .get_descriptor(DescriptorType::String, index, &mut raw)
        .into_result()
        .context("Failed to read serial number descriptor")?;
    println!("Serial number descriptor:");
    print!("{}", hex_dump(&raw[..length]));

    let serial = StringDescriptor::new(&raw[..length])
        .context("Failed to decode serial number")?
        .decode_utf16();
    println!("Serial number: {}", serial);

    conn.close();
    Ok(())
}

#[derive(Debug, Serialize)]
struct InspectReport {
    identity: Option<DeviceIdentity>,
    device: DeviceDescriptor,
    manufacturer: Option<String>,
    product: Option<String>,
    serial_number: Option<String>,
    languages: Vec<u16>,
    pipes: Vec<PipeProperties>,
    configurations: Vec<Configuration>,
}

fn run_inspect(host: RusbHost, target: Target, json: bool) -> Result<()> {
    let mut conn = connect(host, target)?;

    let device = conn
        .device_descriptor()
        .context("Failed to read device descriptor")?;

    let languages = conn.languages().unwrap_or_else(|e| {
        warn!("Failed to read language ids: {}", e);
        Vec::new()
    });

    let configurations = conn
        .configurations()
        .context("Failed to read configurations")?;

    let report = InspectReport {
        identity: conn.identity(),
        manufacturer: conn.manufacturer().context("Failed to read manufacturer")?,
        product: conn.product().context("Failed to read product")?,
        serial_number: conn.serial_number().context("Failed to read serial number")?,
        pipes: conn.all_pipes().context("Failed to enumerate pipes")?,
        device,
        languages,
        configurations,
    };
    conn.close();

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize report")?
        );
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &InspectReport) {
    let d = &report.device;
    let text = |s: &Option<String>| s.clone().unwrap_or_else(|| "-".to_string());

    println!(
        "Device {:04x}:{:04x} (identity {})",
        d.vendor_id,
        d.product_id,
        report
            .identity
            .map(|i| i.to_string())
            .unwrap_or_else(|| "-".to_string())
    );
    println!("  USB version:   {:x}.{:02x}", d.usb_version >> 8, d.usb_version & 0xff);
    println!("  Class:         {:#04x}/{:#04x}/{:#04x}", d.class, d.subclass, d.protocol);
    println!("  Max packet:    {}", d.max_packet_size);
    println!("  Manufacturer:  {}", text(&report.manufacturer));
    println!("  Product:       {}", text(&report.product));
    println!("  Serial number: {}", text(&report.serial_number));
    println!("  Languages:     {:04x?}", report.languages);
    print!("{}", hex_dump(&d.to_bytes()));

    println!("Pipes:");
    for (index, pipe) in report.pipes.iter().enumerate() {
        println!(
            "  {}: endpoint {} {:?} {:?}, max packet {}, interval {}",
            index, pipe.endpoint, pipe.direction, pipe.kind, pipe.max_packet_size, pipe.interval
        );
    }

    for config in &report.configurations {
        let c = &config.descriptor;
        println!(
            "Configuration {}: {} interface(s), attributes {:#04x}, max power {} mA",
            c.configuration_value,
            c.num_interfaces,
            c.attributes,
            c.max_power as u32 * 2
        );
        print!("{}", hex_dump(&config.to_bytes()));
        for interface in &config.interfaces {
            let i = &interface.descriptor;
            println!(
                "  Interface {} alt {}: class {:#04x}/{:#04x}/{:#04x}, {} endpoint(s)",
                i.interface_number,
                i.alternate_setting,
                i.class,
                i.subclass,
                i.protocol,
                i.num_endpoints
            );
            for ep in &interface.endpoints {
                println!(
                    "    Endpoint {:#04x}: {:?} {:?}, max packet {}, interval {}",
                    ep.endpoint_address,
                    ep.direction(),
                    ep.kind(),
                    ep.max_packet_size,
                    ep.interval
                );
            }
        }
    }
}

async fn run_watch(host: RusbHost, target: Target) -> Result<()> {
    if !RusbHost::has_hotplug() {
        bail!("libusb on this platform does not support hotplug notifications");
    }

    let running = Arc::new(AtomicBool::new(true));
    let mut worker = {
        let running = Arc::clone(&running);
        tokio::task::spawn_blocking(move || -> Result<()> {
            let observer = observer_fn(
                |mut conn: Connection<RusbHost>| match conn.serial_number() {
                    Ok(Some(serial)) => println!(
                        "Device {} connected, serial number {}",
                        conn.identity().map(|i| i.to_string()).unwrap_or_default(),
                        serial
                    ),
                    Ok(None) => println!(
                        "Device {} connected without serial number",
                        conn.identity().map(|i| i.to_string()).unwrap_or_default()
                    ),
                    Err(e) => warn!("Failed to read serial number: {}", e),
                },
                |identity: DeviceIdentity| println!("Device {} disconnected", identity),
            );

            let mut dispatcher = Dispatcher::watch_interface(
                host.clone(),
                target.filter,
                target.interface_index,
                observer,
            )
            .context("Failed to install device watches")?;

            while running.load(Ordering::Relaxed) {
                host.handle_events(Some(EVENT_POLL_INTERVAL))
                    .context("Failed to handle USB events")?;
            }

            dispatcher.stop();
            Ok(())
        })
    };

    println!("Watching for {} (Ctrl+C to stop)", target.filter);

    tokio::select! {
        result = signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl+C")?;
            info!("Shutting down...");
            running.store(false, Ordering::Relaxed);
            (&mut worker).await.context("Watch task panicked")??;
        }
        result = &mut worker => {
            result.context("Watch task panicked")??;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["simple-usb"]);
        assert!(args.command.is_none());
        assert!(args.vendor.is_none());
        assert!(!args.save_config);
    }

    #[test]
    fn test_args_ids_and_subcommand() {
        let args = Args::parse_from([
            "simple-usb",
            "--vendor",
            "0x1234",
            "--product",
            "abcd",
            "--interface",
            "1",
            "inspect",
            "--json",
        ]);
        assert_eq!(args.vendor, Some(0x1234));
        assert_eq!(args.product, Some(0xabcd));
        assert_eq!(args.interface, Some(1));
        assert_eq!(args.command, Some(Command::Inspect { json: true }));
    }

    #[test]
    fn test_args_reject_bad_id() {
        assert!(Args::try_parse_from(["simple-usb", "--vendor", "nothex"]).is_err());
    }
}
