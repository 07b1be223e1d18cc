//! Vsync presenter demo
//!
//! Renders a moving bar on one of the simulated displays: boot fade-in, a
//! render loop with an optional live mode switch, then the exit fade. Prints
//! the presentation and hardware counters at the end.
//!
//! # Usage
//!
//! ```bash
//! vsync-demo
//! vsync-demo --pal --switch-to 320x240 --deflicker 60
//! vsync-demo -b page-flip --non-blocking --switch-to 1920x1080
//! ```

mod cli;

use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use vsync_presenter::vsync::render::{
    DisplayDevice, FrameBuffer, TerminalAction, TransitionSignal,
};
use vsync_presenter::vsync::{Engine, Error, FramePresenter, PresentConfig, Result};
use vsync_presenter::{present_info, present_warn};
use vsync_presenter_backends::{
    print_present_report, ConnectorInfo, ConsoleDisplay, ConsoleSettings, HardwareCounters,
    PageFlipDisplay, TvStandard,
};

use cli::{BackendKind, Cli};

/// Bar width as a fraction of the screen
const BAR_FRACTION: u32 = 8;

fn main() -> Result<()> {
    let cli = Cli::parse();
    Engine::initialize()?;

    let config = PresentConfig {
        vsync: !cli.non_blocking,
        triple_buffering: !cli.double_buffer,
        deflicker_strength: cli.deflicker,
        fade_in: !cli.no_fade,
        exit_fade: !cli.no_fade,
        ..Default::default()
    };

    let (device, counters) = open_device(&cli)?;
    let mut presenter = FramePresenter::new(device, config)?;

    run(&cli, &mut presenter)?;
    if let Some(mode) = presenter.current_mode() {
        present_info!("vsync::demo", "Done after {} retraces, last mode {}", presenter.frame_counter(), mode);
    }
    presenter.shutdown();

    print_present_report(presenter.device_name(), &presenter.stats(), Some(&counters.snapshot()));

    Engine::shutdown();
    Ok(())
}

/// Build the backend directly so its hardware counters stay reachable
fn open_device(cli: &Cli) -> Result<(Box<dyn DisplayDevice>, Arc<HardwareCounters>)> {
    match cli.backend {
        BackendKind::Console => {
            let settings = ConsoleSettings {
                standard: if cli.pal { TvStandard::Pal } else { TvStandard::Ntsc },
                progressive_cable: cli.progressive,
            };
            let display = ConsoleDisplay::new(settings)?;
            let counters = display.counters();
            Ok((Box::new(display), counters))
        }
        BackendKind::PageFlip => {
            if cli.pal || cli.progressive {
                present_warn!("vsync::demo", "--pal and --progressive only apply to the console backend");
            }
            let display = PageFlipDisplay::new(ConnectorInfo::default())?;
            let counters = display.counters();
            Ok((Box::new(display), counters))
        }
    }
}

fn run(cli: &Cli, presenter: &mut FramePresenter) -> Result<()> {
    let switch_at = cli.frames / 2;

    for frame in 0..cli.frames {
        if frame == switch_at {
            if let Some((width, height)) = cli.switch_to {
                presenter.request_mode(width, height)?;
            }
        }

        presenter.pace();
        let slot = match presenter.acquire() {
            Ok(slot) => slot,
            // Non-blocking and every slot busy: skip this frame
            Err(Error::DeviceBusy) => continue,
            Err(e) => return Err(e),
        };
        draw_bar(presenter.buffer_mut(slot)?, frame);
        presenter.submit_frame(slot)?;

        while let Some(signal) = presenter.take_transition_signal() {
            present_info!("vsync::demo", "{:?} at retrace {}", signal, presenter.frame_counter());
        }
    }

    presenter.begin_exit();
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        presenter.pace();
        match presenter.take_transition_signal() {
            Some(TransitionSignal::FadeOutComplete(TerminalAction::Exit)) => {
                present_info!("vsync::demo", "Exit fade complete at retrace {}", presenter.frame_counter());
                return Ok(());
            }
            Some(_) => {}
            None => std::thread::sleep(Duration::from_millis(1)),
        }
    }
    present_warn!("vsync::demo", "Exit fade did not complete in time");
    Ok(())
}

/// Black frame with a bright vertical bar sweeping left to right
fn draw_bar(buffer: &mut FrameBuffer, frame: u32) {
    buffer.clear_black();

    let width = buffer.width();
    let bar = (width / BAR_FRACTION).max(1);
    let x = frame.wrapping_mul(4) % width;
    let bpp = buffer.format().bytes_per_pixel() as usize;
    let start = x as usize * bpp;
    let end = (x + bar).min(width) as usize * bpp;

    for y in 0..buffer.height() {
        if let Some(row) = buffer.row_mut(y) {
            row[start..end].fill(0xff);
        }
    }
}
