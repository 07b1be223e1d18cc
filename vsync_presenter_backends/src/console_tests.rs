use super::*;
use serial_test::serial;
use std::time::Instant;

fn ntsc() -> ConsoleDisplay {
    ConsoleDisplay::new(ConsoleSettings::default()).unwrap()
}

fn xfb(device: &ConsoleDisplay, width: u32, height: u32) -> FrameBuffer {
    let stride = device.capabilities().limits.stride_for(width, PixelFormat::Yuyv422);
    FrameBuffer::allocate(width, height, stride, PixelFormat::Yuyv422).unwrap()
}

fn deadline() -> Instant {
    Instant::now() + Duration::from_millis(500)
}

// ============================================================================
// Capabilities and modes
// ============================================================================

#[test]
#[serial]
fn test_ntsc_capabilities() {
    let device = ntsc();
    let caps = device.capabilities();
    assert_eq!(caps.preferred.size(), UVec2::new(640, 480));
    assert_eq!(caps.preferred.refresh, RefreshDescriptor::new(ScanMode::Interlaced, 59_940));
    assert_eq!(caps.preferred.format, PixelFormat::Yuyv422);
    assert_eq!(caps.settle_retraces, 2);
    assert!(caps.has(DisplayFeatures::INTERRUPT_RETRACE | DisplayFeatures::COPY_FILTER));
    assert!(!caps.has(DisplayFeatures::PROGRESSIVE));
    assert!(device.is_scanning());
}

#[test]
#[serial]
fn test_pal_capabilities() {
    let settings = ConsoleSettings { standard: TvStandard::Pal, progressive_cable: false };
    let device = ConsoleDisplay::new(settings).unwrap();
    let caps = device.capabilities();
    assert_eq!(caps.limits.max_height, 576);
    assert_eq!(caps.preferred.refresh.millihertz, 50_000);
    assert_eq!(device.refresh_for(640, 288), RefreshDescriptor::new(ScanMode::DoubleStrike, 50_080));
}

#[test]
#[serial]
fn test_scan_mode_follows_height() {
    let device = ntsc();
    assert_eq!(device.refresh_for(640, 240).scan, ScanMode::DoubleStrike);
    assert_eq!(device.refresh_for(640, 240).millihertz, 59_826);
    assert_eq!(device.refresh_for(640, 242).scan, ScanMode::Interlaced);

    let component = ConsoleSettings { progressive_cable: true, ..Default::default() };
    let device = ConsoleDisplay::new(component).unwrap();
    assert_eq!(device.refresh_for(640, 480).scan, ScanMode::Progressive);
    assert!(device.capabilities().has(DisplayFeatures::PROGRESSIVE));
}

#[test]
#[serial]
fn test_mode_set_validation() {
    let mut device = ntsc();
    let good = DisplayMode::new(320, 240, device.refresh_for(320, 240), PixelFormat::Yuyv422);
    assert_eq!(device.mode_set(&good).unwrap(), ModeSetOutcome::Applied);

    let wrong_rate = DisplayMode { refresh: RefreshDescriptor::new(ScanMode::Progressive, 60_000), ..good };
    assert_eq!(device.mode_set(&wrong_rate).unwrap(), ModeSetOutcome::Unsupported);

    let unaligned = DisplayMode { width: 330, ..good };
    assert_eq!(device.mode_set(&unaligned).unwrap(), ModeSetOutcome::Unsupported);

    let rgb = DisplayMode { format: PixelFormat::Xrgb8888, ..good };
    assert_eq!(device.mode_set(&rgb).unwrap(), ModeSetOutcome::Unsupported);
    assert_eq!(device.hardware_stats().mode_sets, 1);
}

#[test]
#[serial]
fn test_register_rejects_foreign_buffers() {
    let mut device = ntsc();
    let rgb = FrameBuffer::allocate(640, 480, 2560, PixelFormat::Xrgb8888).unwrap();
    assert!(matches!(device.register_buffer(&rgb), Err(Error::BufferAllocationFailed(_))));

    let odd_stride = FrameBuffer::allocate(640, 480, 1284, PixelFormat::Yuyv422).unwrap();
    assert!(matches!(device.register_buffer(&odd_stride), Err(Error::BufferAllocationFailed(_))));

    let fine = xfb(&device, 640, 480);
    assert!(device.register_buffer(&fine).is_ok());
}

// ============================================================================
// VI thread
// ============================================================================

#[test]
#[serial]
fn test_flip_latched_at_retrace() {
    let mut device = ntsc();
    let signal = RetraceSignal::new(device.capabilities().preferred.refresh);
    device.attach_retrace(signal.clone());

    let front = device.register_buffer(&xfb(&device, 640, 480)).unwrap();
    let back = device.register_buffer(&xfb(&device, 640, 480)).unwrap();
    device.set_scanout(front).unwrap();
    assert_eq!(device.scanout(), Some(front));

    signal.arm(1, back);
    device.request_flip(back).unwrap();
    // One latch register
    assert_eq!(device.request_flip(front), Err(Error::DeviceBusy));

    assert!(signal.wait_confirmed(1, deadline()));
    assert_eq!(device.scanout(), Some(back));
    assert!(signal.confirmed_frame() >= 1);

    let stats = device.hardware_stats();
    assert_eq!(stats.flips_latched, 1);
    assert_eq!(stats.flips_refused, 1);
    assert!(stats.retraces >= 1);
}

#[test]
#[serial]
fn test_retraces_and_pre_retraces_delivered() {
    let mut device = ntsc();
    let signal = RetraceSignal::new(device.capabilities().preferred.refresh);
    device.attach_retrace(signal.clone());

    assert!(signal.wait_pre_retrace(0, deadline()));
    assert!(signal.wait_retrace(2, deadline()));

    device.detach_retrace();
    let frame = signal.frame();
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(signal.frame(), frame);
}

#[test]
#[serial]
fn test_unregister_clears_latch() {
    let mut device = ntsc();
    let handle = device.register_buffer(&xfb(&device, 320, 240)).unwrap();
    device.request_flip(handle).unwrap();
    device.unregister_buffer(handle);

    assert!(device.request_flip(handle).is_err());
    assert!(device.set_scanout(handle).is_err());
}

// ============================================================================
// Copy filter and blanking
// ============================================================================

#[test]
#[serial]
fn test_deflicker_only_in_interlaced_modes() {
    let mut device = ntsc();
    let filter = DisplayFilter { deflicker_strength: 100, ..Default::default() };

    let interlaced = device.capabilities().preferred;
    device.mode_set(&interlaced).unwrap();
    device.set_display_filter(&filter).unwrap();
    assert_eq!(device.filter_taps(), [8, 8, 10, 12, 10, 8, 8]);

    let double_strike = DisplayMode::new(640, 240, device.refresh_for(640, 240), PixelFormat::Yuyv422);
    device.mode_set(&double_strike).unwrap();
    device.set_display_filter(&filter).unwrap();
    assert_eq!(device.filter_taps(), [0, 0, 21, 22, 21, 0, 0]);
}

#[test]
#[serial]
fn test_starts_blanked() {
    let mut device = ntsc();
    assert!(device.is_blanked());
    device.set_blank(false);
    assert!(!device.is_blanked());
}
