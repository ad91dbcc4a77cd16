// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use turntable_core::{init_tracing, AppCfg, DEFAULT_CONFIG_PATH};
use turntable_platform::{render_size, window_attributes};
use turntable_render::{RenderSize, Renderer, SceneDesc};
use turntable_render_vk::VkRenderer;
use tracing::{error, info};

use turntable_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

mod scene;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Texture image; overrides `[assets] texture`
    #[arg(long)]
    texture: Option<PathBuf>,
    /// Force Vulkan validation on
    #[arg(long, conflicts_with = "no_validation")]
    validation: bool,
    /// Force Vulkan validation off
    #[arg(long)]
    no_validation: bool,
}

impl Args {
    fn apply(&self, cfg: &mut AppCfg) {
        if let Some(t) = &self.texture {
            cfg.assets.texture = Some(t.clone());
        }
        if self.validation {
            cfg.render.validation = true;
        } else if self.no_validation {
            cfg.render.validation = false;
        }
    }
}

// field order: the renderer must drop before the window it presents to
struct App {
    renderer: Option<VkRenderer>,
    window: Option<Window>,
    /// Consumed when the window is first created.
    scene: Option<SceneDesc>,
    cfg: AppCfg,
    render_size: RenderSize,
    paused: bool,
    frames: u32,
    last_fps_instant: std::time::Instant,
    failure: Option<anyhow::Error>,
}

impl App {
    fn new(cfg: AppCfg, scene: SceneDesc) -> Self {
        App {
            renderer: None,
            window: None,
            scene: Some(scene),
            render_size: RenderSize {
                width: cfg.window.width,
                height: cfg.window.height,
            },
            cfg,
            paused: false,
            frames: 0,
            last_fps_instant: std::time::Instant::now(),
            failure: None,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("{err:#}");
        self.failure = Some(err);
        self.renderer = None;
        self.window = None;
        event_loop.exit();
    }

    fn create(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = event_loop
            .create_window(window_attributes(&self.cfg.window.title, self.render_size))
            .context("create_window")?;
        self.render_size = render_size(window.inner_size());
        let scene = self.scene.take().context("renderer already initialized")?;
        let renderer = VkRenderer::new(&window, &window, self.render_size, scene)
            .context("vulkan initialization")?;
        self.renderer = Some(renderer);
        self.window = Some(window);
        Ok(())
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.create(event_loop) {
                self.fail(event_loop, e);
                return;
            }
            info!("renderer ready at {}x{}", self.render_size.width, self.render_size.height);
        }

        event_loop.set_control_flow(ControlFlow::Poll);
        self.paused = self.render_size.is_empty();
        info!("resumed → paused={}", self.paused);

        if !self.paused {
            if let Some(w) = &self.window {
                w.request_redraw();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.renderer = None;
                self.window = None;
                event_loop.exit();
            }

            WindowEvent::Resized(new_size) => {
                self.render_size = render_size(new_size);
                let now_paused = self.render_size.is_empty();
                if self.paused != now_paused {
                    self.paused = now_paused;
                    info!(
                        "Resized → {}x{} (paused={})",
                        self.render_size.width, self.render_size.height, self.paused
                    );
                }

                if !self.paused {
                    let res = match &mut self.renderer {
                        Some(r) => r.resize(self.render_size),
                        None => Ok(()),
                    };
                    if let Err(e) = res {
                        self.fail(event_loop, e);
                        return;
                    }
                    if let Some(w) = &self.window {
                        w.request_redraw();
                    }
                }
            }

            WindowEvent::RedrawRequested => {
                if self.paused {
                    return;
                }
                let res = match &mut self.renderer {
                    Some(r) => r.render(),
                    None => return,
                };
                match res {
                    Ok(()) => self.frames = self.frames.saturating_add(1),
                    Err(e) => self.fail(event_loop, e.context("render")),
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.renderer.is_none() {
            return;
        }

        if self.paused {
            // minimized: sleep until the next resize
            event_loop.set_control_flow(ControlFlow::Wait);
            self.frames = 0;
            return;
        }

        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        let now = std::time::Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn run(args: Args) -> Result<()> {
    let mut cfg = AppCfg::load(&args.config)?;
    args.apply(&mut cfg);
    let scene = scene::build_scene(&cfg, turntable_render_vk::builtin_shaders())?;

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App::new(cfg, scene);
    event_loop.run_app(&mut app)?;

    match app.failure.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();
    match run(args) {
        Ok(()) => {
            info!("clean shutdown");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_config() {
        let args = Args::parse_from(["turntable", "--texture", "crate.png", "--no-validation"]);
        let mut cfg = AppCfg::default();
        cfg.render.validation = true;
        args.apply(&mut cfg);
        assert_eq!(cfg.assets.texture, Some(PathBuf::from("crate.png")));
        assert!(!cfg.render.validation);
        assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG_PATH));
    }

    #[test]
    fn validation_flags_conflict() {
        assert!(Args::try_parse_from(["turntable", "--validation", "--no-validation"]).is_err());
    }

    #[test]
    fn no_flags_leave_config_alone() {
        let args = Args::parse_from(["turntable"]);
        let mut cfg = AppCfg::default();
        cfg.render.validation = true;
        args.apply(&mut cfg);
        assert!(cfg.render.validation);
        assert!(cfg.assets.texture.is_none());
    }
}
