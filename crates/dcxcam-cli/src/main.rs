mod config;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use config::Config;
use dcxcam_core::{AcquisitionController, PixelType, QueueSink, SequenceParams};
use dcxcam_hw::sensors::list_sensors;
use dcxcam_hw::{Frame, SimCamera};
use image::{GrayImage, ImageBuffer, Luma};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "dcxcam", about = "DCx camera acquisition host (simulated sensor)")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List known sensor profiles
    Sensors,
    /// Initialize the camera and print its properties
    Info,
    /// Capture a single frame to a PNG file
    Snap {
        #[arg(short, long, default_value = "snap.png")]
        output: PathBuf,
        /// Pixel type ("8bit" or "16bit")
        #[arg(long)]
        pixel_type: Option<String>,
    },
    /// Acquire a bounded sequence and print a summary
    Sequence {
        #[arg(short = 'n', long, default_value_t = 10)]
        frames: u64,
        /// Requested interval between frames (advisory)
        #[arg(long, default_value_t = 0.0)]
        interval_ms: f64,
        /// End the sequence when the queue is full instead of clearing it
        #[arg(long)]
        stop_on_overflow: bool,
        #[arg(long)]
        queue_capacity: Option<usize>,
    },
    /// Acquire continuously until Ctrl-C
    Live {
        #[arg(long, default_value_t = 0.0)]
        interval_ms: f64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Sensors => {
            for profile in list_sensors() {
                let s = &profile.sensor;
                let (clk_min, clk_max) = profile.timing.pixel_clock_mhz;
                println!(
                    "{:<10} {}x{}  bits {:?}  binning {:?}  clock {clk_min}-{clk_max} MHz  {}",
                    s.model, s.max_width, s.max_height, s.bit_depths, s.binning, s.name
                );
            }
        }
        Commands::Info => {
            let (_sink, ctl) = open_camera(&config, config.queue_capacity)?;
            println!("{}", serde_json::to_string_pretty(&ctl.properties())?);
        }
        Commands::Snap { output, pixel_type } => {
            let (_sink, mut ctl) = open_camera(&config, config.queue_capacity)?;
            if let Some(pixel_type) = pixel_type {
                ctl.set_pixel_type_str(&pixel_type)?;
            }
            ctl.snap_image().context("snap failed")?;
            let frame = ctl.image_buffer();
            save_png(&frame, &output)?;
            println!(
                "{}x{} {}-bit frame saved to {}",
                frame.width,
                frame.height,
                frame.bit_depth,
                output.display()
            );
        }
        Commands::Sequence {
            frames,
            interval_ms,
            stop_on_overflow,
            queue_capacity,
        } => {
            let capacity = queue_capacity.unwrap_or(config.queue_capacity);
            let (sink, mut ctl) = open_camera(&config, capacity)?;
            let consumer = spawn_consumer(sink.clone());

            ctl.start_sequence(SequenceParams::new(frames, interval_ms, stop_on_overflow))?;
            while !ctl.wait_for_completion(Duration::from_secs(1)) {
                tracing::debug!(frames = ctl.frames_acquired(), "sequence running");
            }

            let consumed = consumer
                .join()
                .map_err(|_| anyhow!("consumer thread panicked"))?;
            let stats = sink.stats();
            let summary = serde_json::json!({
                "camera": ctl.label(),
                "requested": frames,
                "published": ctl.frames_acquired(),
                "consumed": consumed.frames,
                "mean_brightness": consumed.mean_brightness(),
                "overflows": stats.overflows,
                "queue_clears": stats.clears,
                "fps": ctl.fps(),
                "error": ctl.last_error().map(|e| e.to_string()),
                "last_metadata": consumed
                    .last_metadata
                    .as_deref()
                    .and_then(|m| serde_json::from_str::<serde_json::Value>(m).ok()),
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Live { interval_ms } => {
            let (sink, mut ctl) = open_camera(&config, config.queue_capacity)?;
            ctl.start_continuous(interval_ms)?;
            println!("acquiring, press Ctrl-C to stop");

            let ctrl_c = tokio::signal::ctrl_c();
            tokio::pin!(ctrl_c);
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    res = &mut ctrl_c => {
                        res.context("waiting for Ctrl-C")?;
                        break;
                    }
                    _ = ticker.tick() => {
                        let mut drained = 0;
                        while sink.pop().is_some() {
                            drained += 1;
                        }
                        println!(
                            "frames {:>6}  fps {:>6.1}  drained {drained}",
                            ctl.frames_acquired(),
                            ctl.fps()
                        );
                        if !ctl.is_capturing() {
                            break;
                        }
                    }
                }
            }

            ctl.stop()?;
            if let Some(e) = ctl.last_error() {
                return Err(anyhow!(e).context("acquisition ended with error"));
            }
            println!("stopped after {} frames", ctl.frames_acquired());
        }
    }

    Ok(())
}

/// Build a simulated camera for the configured sensor and initialize it.
fn open_camera(config: &Config, queue_capacity: usize) -> Result<(Arc<QueueSink>, AcquisitionController)> {
    let model = &config.camera.sensor_model;
    let sim = SimCamera::for_model(model)
        .ok_or_else(|| anyhow!("unknown sensor model {model}"))?
        .with_frame_period(Duration::from_millis(config.frame_period_ms));
    let sink = Arc::new(QueueSink::new(queue_capacity));
    let mut ctl = AcquisitionController::new(Arc::new(sim), sink.clone(), config.camera.clone());
    ctl.initialize()
        .with_context(|| format!("initializing {model}"))?;
    tracing::info!(
        model = %model,
        width = ctl.image_width(),
        height = ctl.image_height(),
        "camera ready"
    );
    Ok((sink, ctl))
}

struct Consumed {
    frames: u64,
    brightness_sum: f64,
    last_metadata: Option<String>,
}

impl Consumed {
    fn mean_brightness(&self) -> f64 {
        if self.frames == 0 {
            0.0
        } else {
            self.brightness_sum / self.frames as f64
        }
    }
}

/// Drain the queue on a separate thread until the acquisition finishes.
fn spawn_consumer(sink: Arc<QueueSink>) -> std::thread::JoinHandle<Consumed> {
    std::thread::spawn(move || {
        let mut consumed = Consumed {
            frames: 0,
            brightness_sum: 0.0,
            last_metadata: None,
        };
        while !sink.is_drained() {
            if let Some(image) = sink.pop_timeout(Duration::from_millis(100)) {
                consumed.frames += 1;
                consumed.brightness_sum += f64::from(image.frame.avg_brightness());
                consumed.last_metadata = Some(image.metadata);
            }
        }
        consumed
    })
}

fn save_png(frame: &Frame, path: &Path) -> Result<()> {
    if frame.bit_depth == PixelType::Mono8.bit_depth() {
        let img = GrayImage::from_raw(frame.width, frame.height, frame.data.clone())
            .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", frame.width, frame.height))?;
        img.save(path)?;
    } else {
        let img: ImageBuffer<Luma<u16>, Vec<u16>> =
            ImageBuffer::from_raw(frame.width, frame.height, frame.to_u16())
                .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", frame.width, frame.height))?;
        img.save(path)?;
    }
    Ok(())
}
