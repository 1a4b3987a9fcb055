// =============================================================================
// TRI-FRAME - minimal Vulkan frame driver
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  main (config, logging, single error handler)                   │
// │    └── WinitEvents (window + non-blocking event pump)           │
// │          └── VulkanDevice (instance, surface, queue)            │
// │                └── Engine                                       │
// │                      ├── SurfaceResources (swapchain, fbs)      │
// │                      ├── PipelineSlots (compiled pipelines)     │
// │                      └── FrameLoop (sync ring, per frame work)  │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. Pump window events (Escape / close = quit, Space = next pipeline)
// 2. Wait for this slot's fence, reset it
// 3. Acquire swapchain image
// 4. Re-record the command buffer and submit
// 5. Present
//
// =============================================================================

mod backend;
mod config;
mod engine;
mod error;
mod frame;
mod window;

use anyhow::{bail, Result};
use backend::VulkanDevice;
use config::Config;
use engine::{Engine, EngineSettings};
use window::WinitEvents;

fn main() -> Result<()> {
    // Load configuration from config.toml
    let config = Config::load();

    init_logging(&config);
    log::info!("Starting tri-frame");
    log::info!("Present mode: {}", config.graphics.present_mode);

    let mut events = WinitEvents::open(&config.window)?;

    let enable_validation = cfg!(debug_assertions) && config.debug.validation_layers;
    let device = VulkanDevice::new(&config.window.title, enable_validation, events.window())?;

    let mut engine = Engine::new(device, EngineSettings::from_config(&config));
    if !engine.init() {
        bail!("Engine initialization failed");
    }

    // Every fatal error ends up here: shut down in order, then report it
    let result = engine.run(&mut events);
    engine.cleanup();

    match result {
        Ok(frames) => {
            log::info!("Exited cleanly after {} frames", frames);
            Ok(())
        }
        Err(e) => {
            log::error!("Fatal: {}", e);
            Err(e.into())
        }
    }
}

/// env_logger at the configured level; RUST_LOG still wins
fn init_logging(config: &Config) {
    use env_logger::Builder;

    let mut builder = Builder::new();
    builder.filter_level(config.log_level());
    builder.parse_default_env();
    builder.init();
}
