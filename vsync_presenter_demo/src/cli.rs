//! CLI definitions using clap

use clap::{Parser, ValueEnum};

#[derive(Parser)]
#[command(name = "vsync-demo")]
#[command(version, about = "Drive the vsync presenter on a simulated display and report the counters")]
pub struct Cli {
    /// Display backend
    #[arg(long, short = 'b', value_enum, default_value = "console")]
    pub backend: BackendKind,

    /// Frames to render before the exit fade
    #[arg(long, short = 'n', default_value = "180")]
    pub frames: u32,

    /// Drop frames instead of waiting for the flip
    #[arg(long)]
    pub non_blocking: bool,

    /// Double buffering instead of triple
    #[arg(long)]
    pub double_buffer: bool,

    /// Switch to this geometry halfway through, e.g. 320x240
    #[arg(long, value_parser = parse_geometry)]
    pub switch_to: Option<(u32, u32)>,

    /// Deflicker strength applied after the boot fade (0-100)
    #[arg(long, default_value = "0")]
    pub deflicker: u8,

    /// Skip the boot and exit fades
    #[arg(long)]
    pub no_fade: bool,

    // === Console options ===
    /// PAL timing instead of NTSC
    #[arg(long)]
    pub pal: bool,

    /// Component cable: progressive scan at full height
    #[arg(long)]
    pub progressive: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// Console video interface, interrupt-driven retraces
    Console,
    /// Page-flip display, polled flip completion events
    PageFlip,
}

fn parse_geometry(value: &str) -> Result<(u32, u32), String> {
    let (width, height) = value.split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{}'", value))?;
    let width = width.trim().parse().map_err(|e| format!("bad width '{}': {}", width, e))?;
    let height = height.trim().parse().map_err(|e| format!("bad height '{}': {}", height, e))?;
    Ok((width, height))
}
