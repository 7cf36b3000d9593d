//! Probe command - check whether capture can start

use anyhow::Result;
use clap::Args;
use dupcap_core::encode::nvenc_available;
use dupcap_core::{Backend, MemoryBackend};

use super::SyntheticSize;

/// Arguments for the probe command
#[derive(Args)]
pub struct ProbeArgs {
    /// Probe a generated desktop of the given size instead of the real one
    #[arg(long, value_name = "WxH")]
    pub synthetic: Option<SyntheticSize>,
}

/// Run the probe command
pub fn probe(args: ProbeArgs) -> Result<()> {
    match args.synthetic {
        Some(size) => report(&MemoryBackend::synthetic(size.width, size.height)),
        None => {
            #[cfg(windows)]
            {
                report(&dupcap_core::DxgiBackend::new()?)
            }
            #[cfg(not(windows))]
            {
                Err(super::no_native_backend())
            }
        }
    }
}

fn report<B: Backend>(backend: &B) -> Result<()> {
    println!("dupcap System Probe");
    println!("===================");
    println!();
    println!("Backend: {}", backend.name());

    let capturable = backend.can_capture();
    if capturable {
        println!("Desktop: capturable");
    } else {
        println!("Desktop: NOT capturable (secure desktop, lock screen or UAC prompt)");
    }

    match backend.outputs() {
        Ok(outputs) => {
            let attached = outputs.iter().filter(|o| o.attached).count();
            println!("Outputs: {} ({} attached)", outputs.len(), attached);
        }
        Err(e) => println!("Outputs: enumeration failed: {}", e),
    }

    if nvenc_available() {
        println!("H.264:   NVENC available");
    } else {
        println!("H.264:   NVENC not available (build with --features nvenc)");
    }

    Ok(())
}
