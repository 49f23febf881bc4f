//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

// Standalone VRRPv2 daemon: a single interface, a single VRID, configured
// entirely from the command line. This is a didactic harness around the
// library's `VrrpTarget`/`LinuxVif`, not the full router-manager-driven
// daemon described in spec section 1 (Xrl, the template tree, and
// multi-protocol sequencing are out of scope here, per spec section 1).

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "vrrpd", version, about = "VRRPv2 redundancy engine")]
struct Cli {
    /// Interface to run on (e.g. eth0).
    #[arg(short, long)]
    interface: String,

    /// Virtual router identifier (1..255).
    #[arg(long)]
    vrid: u8,

    /// Election priority (1..254).
    #[arg(long, default_value_t = 100)]
    priority: u8,

    /// Advertisement interval in seconds (1..255).
    #[arg(long, default_value_t = 1)]
    interval: u8,

    /// Disable preemption of a lower-priority incumbent master.
    #[arg(long)]
    no_preempt: bool,

    /// Protected address, optionally `addr/prefix` (repeatable).
    #[arg(long = "address", required = true)]
    addresses: Vec<String>,
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive("vrrpd=info".parse().unwrap())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}

fn parse_address(spec: &str) -> Result<(Ipv4Addr, Option<u8>), String> {
    match spec.split_once('/') {
        Some((addr, prefix)) => {
            let addr = addr
                .parse::<Ipv4Addr>()
                .map_err(|e| format!("invalid address {addr}: {e}"))?;
            let prefix = prefix
                .parse::<u8>()
                .map_err(|e| format!("invalid prefix {prefix}: {e}"))?;
            Ok((addr, Some(prefix)))
        }
        None => {
            let addr = spec
                .parse::<Ipv4Addr>()
                .map_err(|e| format!("invalid address {spec}: {e}"))?;
            Ok((addr, None))
        }
    }
}

#[cfg(target_os = "linux")]
fn main() {
    use tokio::sync::mpsc;
    use vrrpd::target::{ConfigField, VrrpTarget};
    use vrrpd::vif::{LinuxVif, RawFrame};

    init_tracing();
    let cli = Cli::parse();

    let mut vif = match LinuxVif::new(&cli.interface) {
        Ok(vif) => vif,
        Err(error) => {
            eprintln!("failed to open {}: {error}", cli.interface);
            std::process::exit(1);
        }
    };
    if let Err(error) = vif.refresh() {
        warn!(%error, "failed to read interface state at startup");
    }
    let vif = Arc::new(vif);

    let mut target = VrrpTarget::new();
    if let Err(error) = target.add_instance(&cli.interface, cli.vrid, vif.clone())
    {
        error!(%error, "failed to create instance");
        std::process::exit(1);
    }
    if let Err(error) =
        target.configure(&cli.interface, cli.vrid, ConfigField::Priority(cli.priority))
    {
        error!(%error, "rejected priority");
        std::process::exit(1);
    }
    target
        .configure(&cli.interface, cli.vrid, ConfigField::Interval(cli.interval))
        .unwrap();
    target
        .configure(
            &cli.interface,
            cli.vrid,
            ConfigField::Preempt(!cli.no_preempt),
        )
        .unwrap();
    for spec in &cli.addresses {
        match parse_address(spec) {
            Ok((addr, prefix)) => {
                if let Err(error) = target.configure(
                    &cli.interface,
                    cli.vrid,
                    ConfigField::AddAddress { addr, prefix },
                ) {
                    error!(%error, "rejected address");
                    std::process::exit(1);
                }
            }
            Err(message) => {
                error!(%message, "rejected address");
                std::process::exit(1);
            }
        }
    }
    if let Err(error) =
        target.configure(&cli.interface, cli.vrid, ConfigField::Enable(true))
    {
        error!(%error, "failed to enable instance");
        std::process::exit(1);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to create async runtime");

    runtime.block_on(async move {
        let (frame_tx, mut frame_rx) = mpsc::unbounded_channel();
        let rx_vif = vif.clone();
        std::thread::spawn(move || loop {
            match rx_vif.recv_blocking() {
                Ok(Some(frame)) => {
                    if frame_tx.send(frame).is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(error) => {
                    error!(%error, "raw socket receive failed");
                    std::thread::sleep(Duration::from_millis(500));
                }
            }
        });

        info!(interface = %cli.interface, vrid = cli.vrid, "vrrpd started");
        loop {
            tokio::select! {
                Some(frame) = frame_rx.recv() => {
                    match frame {
                        RawFrame::Advertisement(src, payload) => {
                            if let Err(error) = target.on_frame(&cli.interface, src, &payload) {
                                warn!(%error, "dropped advertisement");
                            }
                        }
                        RawFrame::BadTtl { vrid: Some(vrid) } => {
                            target.record_ttl_error(&cli.interface, vrid);
                        }
                        RawFrame::BadTtl { vrid: None } => {}
                    }
                }
                event = target.next_timer_event() => {
                    if event.is_none() {
                        break;
                    }
                }
            }
        }
    });
}

#[cfg(not(target_os = "linux"))]
fn main() {
    eprintln!(
        "vrrpd's raw-socket interface facade is only implemented for Linux; \
         see vrrpd::vif::TestVif for a platform-independent in-memory double"
    );
    std::process::exit(1);
}
