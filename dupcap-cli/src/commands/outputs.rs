//! Outputs command - list display outputs

use anyhow::{Context, Result};
use clap::Args;
use dupcap_core::{Backend, MemoryBackend, OutputInfo};
use serde::Serialize;

use super::SyntheticSize;

/// Arguments for the outputs command
#[derive(Args)]
pub struct OutputsArgs {
    /// Print the outputs as JSON
    #[arg(long)]
    pub json: bool,

    /// List a generated desktop of the given size instead of the real one
    #[arg(long, value_name = "WxH")]
    pub synthetic: Option<SyntheticSize>,
}

/// JSON row: the output plus its capture size
#[derive(Serialize)]
struct OutputEntry<'a> {
    #[serde(flatten)]
    info: &'a OutputInfo,
    width: u32,
    height: u32,
}

/// List all outputs
pub fn outputs(args: OutputsArgs) -> Result<()> {
    match args.synthetic {
        Some(size) => list(&MemoryBackend::synthetic(size.width, size.height), args.json),
        None => {
            #[cfg(windows)]
            {
                list(&dupcap_core::DxgiBackend::new()?, args.json)
            }
            #[cfg(not(windows))]
            {
                Err(super::no_native_backend())
            }
        }
    }
}

fn list<B: Backend>(backend: &B, json: bool) -> Result<()> {
    let outputs = backend.outputs().context("Failed to enumerate outputs")?;

    if json {
        let entries: Vec<OutputEntry<'_>> = outputs
            .iter()
            .map(|info| {
                let (width, height) = info.dimensions();
                OutputEntry {
                    info,
                    width,
                    height,
                }
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if outputs.is_empty() {
        println!("No outputs found.");
        return Ok(());
    }

    println!("Outputs ({}):", backend.name());
    println!();
    println!(
        "{:<8} {:<14} {:<32} {:>11} {:>10}",
        "INDEX", "NAME", "ADAPTER", "SIZE", "ATTACHED"
    );
    println!("{}", "-".repeat(79));

    for info in &outputs {
        let (width, height) = info.dimensions();
        println!(
            "{:<8} {:<14} {:<32} {:>11} {:>10}",
            format!("{}:{}", info.adapter, info.output),
            truncate(&info.name, 14),
            truncate(&info.adapter_name, 32),
            format!("{}x{}", width, height),
            if info.attached { "yes" } else { "no" }
        );
    }

    println!();
    println!("Capture one with: dupcap capture --adapter <A> --output <O>");

    Ok(())
}

/// Truncate a string to max length, adding ellipsis if needed
fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
