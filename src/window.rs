// =============================================================================
// WINDOW - winit window and non-blocking event pump
// =============================================================================
//
// The engine owns the loop, so winit is pumped once between frames instead of
// driving rendering through RedrawRequested.

use anyhow::{bail, Context, Result};
use std::time::Duration;
use winit::{
    application::ApplicationHandler,
    event::{ElementState, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    platform::pump_events::{EventLoopExtPumpEvents, PumpStatus},
    window::{Window, WindowAttributes, WindowId},
};

use crate::config::WindowConfig;
use crate::engine::{EngineEvent, EventSource};

/// Map a key press to an engine event. Releases and auto-repeats are ignored.
pub fn translate_key(key: PhysicalKey, state: ElementState, repeat: bool) -> Option<EngineEvent> {
    if state != ElementState::Pressed || repeat {
        return None;
    }
    match key {
        PhysicalKey::Code(KeyCode::Escape) => Some(EngineEvent::Quit),
        PhysicalKey::Code(KeyCode::Space) => Some(EngineEvent::CyclePipeline),
        _ => None,
    }
}

struct WindowHost {
    attributes: WindowAttributes,
    /// Set once resumed() created the window, taken by WinitEvents::open
    window: Option<Window>,
    created: bool,
    create_error: Option<winit::error::OsError>,
    events: Vec<EngineEvent>,
}

impl ApplicationHandler for WindowHost {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.created {
            return;
        }

        match event_loop.create_window(self.attributes.clone()) {
            Ok(window) => {
                self.window = Some(window);
                self.created = true;
            }
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                self.create_error = Some(e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.events.push(EngineEvent::Quit);
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if let Some(e) = translate_key(event.physical_key, event.state, event.repeat) {
                    log::debug!("Key {:?} -> {:?}", event.physical_key, e);
                    self.events.push(e);
                }
            }
            _ => {}
        }
    }
}

pub struct WinitEvents {
    // Declared before the event loop so it is dropped first
    window: Window,
    event_loop: EventLoop<()>,
    host: WindowHost,
}

impl WinitEvents {
    /// Create the event loop and a fixed-size window
    pub fn open(config: &WindowConfig) -> Result<Self> {
        let mut event_loop = EventLoop::new().context("Failed to create event loop")?;

        // The surface is never rebuilt, so the window must not change size
        let attributes = WindowAttributes::default()
            .with_title(&config.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(config.width, config.height))
            .with_resizable(false);

        let mut host = WindowHost {
            attributes,
            window: None,
            created: false,
            create_error: None,
            events: Vec::new(),
        };

        // Pump until the platform delivers resumed() and the window exists
        let window = loop {
            let status = event_loop.pump_app_events(Some(Duration::ZERO), &mut host);
            if let Some(e) = host.create_error.take() {
                return Err(e).context("Failed to create window");
            }
            if let Some(window) = host.window.take() {
                break window;
            }
            if let PumpStatus::Exit(code) = status {
                bail!("Event loop exited with code {} before a window was created", code);
            }
        };

        log::info!(
            "Window: {}x{} '{}'",
            config.width,
            config.height,
            config.title
        );

        Ok(Self {
            window,
            event_loop,
            host,
        })
    }

    pub fn window(&self) -> &Window {
        &self.window
    }
}

impl EventSource for WinitEvents {
    fn poll_events(&mut self, events: &mut Vec<EngineEvent>) {
        let status = self
            .event_loop
            .pump_app_events(Some(Duration::ZERO), &mut self.host);
        events.append(&mut self.host.events);
        if let PumpStatus::Exit(_) = status {
            events.push(EngineEvent::Quit);
        }
    }
}
