use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::*;
use serde_json::json;

use x54x_core::bus::testbus::Testbus;
use x54x_core::bus::Address;
use x54x_core::config::{AdapterConfig, AdapterModel};
use x54x_core::hostadapter::aha154x::{CMD_EXTBIOS, CMD_MBENABLE};
use x54x_core::hostadapter::ccb::{Ccb, CcbOpcode, Direction, CCB_OFFSET_HOST_STATUS};
use x54x_core::hostadapter::mailbox::{MailboxFormat, MBI_SUCCESS};
use x54x_core::hostadapter::{HostAdapter, CMD_INQUIRY, CMD_RETCONF, CMD_RETDEVS};
use x54x_core::initiator::{self, Initiator};
use x54x_core::scsi::targets::ScsiTargets;

type Adapter = HostAdapter<Testbus, ScsiTargets>;

/// Guest memory layout used while probing
const MAILBOX_ADDR: Address = 0x1000;
const CCB_ADDR: Address = 0x2000;
const BUFFER_ADDR: Address = 0x10000;
const MAILBOX_COUNT: u8 = 4;

/// Largest transfer of 512-byte blocks that still fits below 16 MB
const MAX_READ_BLOCKS: u16 = 0x7F00;

#[derive(Parser)]
#[command(about = "Probes SCSI disk images through an emulated x54x host adapter")]
struct Args {
    /// Disk image to attach, as ID=PATH (LUN 0)
    #[arg(long = "disk", value_parser = parse_disk)]
    disks: Vec<(u8, PathBuf)>,

    /// Adapter configuration file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Adapter model, when no configuration file is given
    #[arg(long, default_value = "aha1542cf")]
    model: AdapterModel,

    #[arg(long, value_parser = parse_port)]
    base: Option<u16>,

    #[arg(long)]
    irq: Option<u8>,

    #[arg(long)]
    dma: Option<u8>,

    #[arg(long)]
    host_id: Option<u8>,

    /// Blocks to read from the start of each disk
    #[arg(long, default_value_t = 1)]
    blocks: u16,

    /// Print the findings as JSON
    #[arg(long)]
    json: bool,
}

fn parse_disk(s: &str) -> Result<(u8, PathBuf)> {
    let Some((id, path)) = s.split_once('=') else {
        bail!("Expected ID=PATH, got '{}'", s);
    };
    Ok((id.parse().context("Invalid SCSI ID")?, PathBuf::from(path)))
}

fn parse_port(s: &str) -> Result<u16> {
    let hex = s.trim_start_matches("0x").trim_start_matches("0X");
    u16::from_str_radix(hex, 16).with_context(|| format!("Invalid I/O port '{}'", s))
}

fn build_config(args: &Args) -> Result<AdapterConfig> {
    let mut config = match args.config.as_deref() {
        Some(path) => AdapterConfig::load(path)?,
        None => AdapterConfig::new(args.model),
    };
    if let Some(base) = args.base {
        config.base = base;
    }
    if let Some(irq) = args.irq {
        config.irq = irq;
    }
    if let Some(dma) = args.dma {
        config.dma = dma;
    }
    if let Some(host_id) = args.host_id {
        config.host_id = host_id;
    }
    config.validate()?;
    Ok(config)
}

fn ascii(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim_end().to_string()
}

/// Issues one CDB and returns the data-in bytes, or None if the target
/// did not complete it
fn scsi_in(
    adapter: &mut Adapter,
    init: &mut Initiator,
    target: u8,
    cdb: &[u8],
    len: usize,
) -> Result<Option<Vec<u8>>> {
    let mut ccb = Ccb::new(CcbOpcode::Initiator, target, 0, cdb);
    ccb.direction = Direction::In;
    ccb.data_len = len as u32;
    ccb.data_ptr = BUFFER_ADDR;

    let mbi = init.execute(adapter, CCB_ADDR, &ccb)?;
    if mbi.completion != MBI_SUCCESS {
        let host_status = adapter.host().peek(CCB_ADDR + CCB_OFFSET_HOST_STATUS, 1)[0];
        debug!(
            "Target {}: CDB {:02X} completion {:02X}, host status {:02X}",
            target, cdb[0], mbi.completion, host_status
        );
        return Ok(None);
    }
    Ok(Some(adapter.host().peek(BUFFER_ADDR, len)))
}

/// Lifts the AHA-154x mailbox lock the BIOS sets when extended
/// translation is active
fn unlock_mailbox(adapter: &mut Adapter) -> Result<()> {
    if adapter.model().is_buslogic() {
        return Ok(());
    }
    let Ok(info) = initiator::command(adapter, CMD_EXTBIOS, &[]) else {
        return Ok(());
    };
    if info[1] != 0 {
        debug!("Mailbox interface locked, code {:02X}", info[1]);
        initiator::command(adapter, CMD_MBENABLE, &[0, info[1]])?;
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();
    let args = Args::parse();
    if args.blocks == 0 || args.blocks > MAX_READ_BLOCKS {
        bail!("Block count must be 1..={}", MAX_READ_BLOCKS);
    }

    let config = build_config(&args)?;
    let mut targets = ScsiTargets::new();
    for (id, path) in &args.disks {
        if *id == config.host_id {
            bail!("SCSI ID {} is taken by the host adapter", id);
        }
        targets.attach_hdd_at(path, *id, 0)?;
        info!("Attached {} at ID {}", path.display(), id);
    }

    let mut adapter = HostAdapter::new(config, Testbus::new(), targets)?;
    initiator::hard_reset(&mut adapter)?;

    let fw = initiator::command(&mut adapter, CMD_INQUIRY, &[])?;
    let conf = initiator::command(&mut adapter, CMD_RETCONF, &[])?;
    let devices = initiator::command(&mut adapter, CMD_RETDEVS, &[])?;
    info!(
        "{} at {:04X}, IRQ {}, DMA {:?}, host ID {}, firmware '{}'",
        adapter.name(),
        adapter.base(),
        adapter.irq(),
        adapter.dma(),
        adapter.host_id(),
        ascii(&fw)
    );
    debug!("Configuration reply {:02X?}, LUN bitmaps {:02X?}", conf, devices);

    unlock_mailbox(&mut adapter)?;
    let format = if adapter.model().is_buslogic() {
        MailboxFormat::Extended32
    } else {
        MailboxFormat::Legacy24
    };
    let mut init = Initiator::init(&mut adapter, format, MAILBOX_COUNT, MAILBOX_ADDR)?;

    let mut found = vec![];
    for target in 0..=adapter.max_target_id() {
        if target == adapter.host_id() {
            continue;
        }
        let Some(inquiry) = scsi_in(
            &mut adapter,
            &mut init,
            target,
            &[0x12, 0, 0, 0, 36, 0],
            36,
        )?
        else {
            continue;
        };
        let Some(capacity) = scsi_in(
            &mut adapter,
            &mut init,
            target,
            &[0x25, 0, 0, 0, 0, 0, 0, 0, 0, 0],
            8,
        )?
        else {
            warn!("Target {} did not report its capacity", target);
            continue;
        };
        let last_lba = u32::from_be_bytes(capacity[0..4].try_into()?);
        let block_size = u32::from_be_bytes(capacity[4..8].try_into()?);

        let [c0, c1] = args.blocks.to_be_bytes();
        let len = args.blocks as usize * block_size as usize;
        let data = scsi_in(
            &mut adapter,
            &mut init,
            target,
            &[0x28, 0, 0, 0, 0, 0, 0, c0, c1, 0],
            len,
        )?;
        let sum = data
            .as_deref()
            .map(|d| d.iter().fold(0u32, |acc, &b| acc.wrapping_add(b as u32)));

        let vendor = ascii(&inquiry[8..16]);
        let product = ascii(&inquiry[16..32]);
        let revision = ascii(&inquiry[32..36]);
        if !args.json {
            println!(
                "ID {}: {} {} {} - {} blocks of {} bytes, read checksum {}",
                target,
                vendor,
                product,
                revision,
                last_lba as u64 + 1,
                block_size,
                sum.map_or_else(|| "failed".to_string(), |s| format!("{:08X}", s))
            );
        }
        let image = adapter
            .scsi()
            .get_disk_imagefn(target, 0)
            .map(|p| p.display().to_string());
        found.push(json!({
            "id": target,
            "image": image,
            "vendor": vendor,
            "product": product,
            "revision": revision,
            "blocks": last_lba as u64 + 1,
            "block_size": block_size,
            "checksum": sum,
        }));
    }

    if args.json {
        let report = json!({
            "adapter": adapter.name(),
            "firmware": ascii(&fw),
            "targets": found,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if found.is_empty() {
        println!("No targets found");
    }
    Ok(())
}
