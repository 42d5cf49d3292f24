use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use aircard::{Directory, Discovery, DiscoveryOptions, Node, UdpTransport};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let transport = UdpTransport::bind()?;
    let discovery = Discovery::new(Arc::clone(&transport), DiscoveryOptions::default());

    let (tx, rx) = mpsc::channel();
    discovery.on_card_discovered(move |card| {
        let _ = tx.send(card);
    });
    discovery.start()?;

    println!("Looking for cards (60 s)...");
    let card = rx.recv_timeout(Duration::from_secs(60))?;
    discovery.stop();

    if let Some(info) = card.info() {
        println!(
            "Found {} card at {} (mac {}, firmware {}, {} blocks{})",
            info.kind,
            info.ip,
            info.mac_string(),
            info.version,
            info.capacity_blocks,
            if info.ap_mode { ", AP mode" } else { "" }
        );
    }

    for (index, partition) in card.partitions()?.iter().enumerate() {
        println!(
            "Partition {}: {} start={} length={}",
            index, partition.kind, partition.start_lba, partition.length
        );
    }

    let volume = Arc::new(card.filesystem(0)?);
    let root = Directory::root(volume);

    println!("Root directory:");
    let mut first_file = None;
    for node in root.list(false)? {
        match &node {
            Node::Directory(dir) => println!("{:20} <DIR>", dir.name()),
            Node::File(file) => {
                println!("{:20}       {:>10} bytes", file.name(), file.size());
                if first_file.is_none() {
                    first_file = Some(file.clone());
                }
            }
        }
    }

    if let Some(file) = first_file {
        let target = std::path::PathBuf::from(file.name());
        let written = file.download(&target)?;
        println!("Downloaded '{}' ({} bytes)", target.display(), written);
    }

    Ok(())
}
