use anyhow::{Context, Result};
use clap::Parser;
use fieldguard::actuator::{self, ActuatorBank, DigitalOutput, DryRunOutput, SysfsGpio};
use fieldguard::capture::{CameraDescriptor, WebcamCapture};
use fieldguard::config::DefenseConfig;
use fieldguard::control::{ControlLoop, ShutdownReason, StopSignal};
use fieldguard::error::{HardwareFault, SourceFault};
use fieldguard::perception;
use fieldguard::policy::OverlapMode;
use fieldguard::source::{DetectionPipeline, FrameProvider, ProviderFactory, TimedSource};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file; flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Camera device index or stream URL
    #[arg(long)]
    camera: Option<String>,

    /// Path to the detection model (ONNX file)
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// Confidence a target detection must exceed
    #[arg(short, long)]
    threshold: Option<f32>,

    /// Seconds the deterrents stay on per activation
    #[arg(short, long)]
    duration: Option<f64>,

    /// Comma-separated labels that trigger the deterrents
    #[arg(long, value_delimiter = ',')]
    targets: Option<Vec<String>>,

    /// Qualifying detections during an activation: `ignore` or `extend`
    #[arg(long)]
    overlap: Option<OverlapMode>,

    /// Target frames per second (0 = as fast as possible)
    #[arg(long)]
    fps: Option<u32>,

    /// Log actuator changes instead of driving GPIO lines
    #[arg(long)]
    dry_run: bool,

    /// Validate the configuration and exit
    #[arg(long)]
    check_config: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

impl Args {
    fn apply(&self, config: &mut DefenseConfig) {
        if let Some(camera) = &self.camera {
            config.source.camera = camera.clone();
        }
        if let Some(model) = &self.model {
            config.detection.model = model.clone();
        }
        if let Some(threshold) = self.threshold {
            config.detection.threshold = threshold;
        }
        if let Some(duration) = self.duration {
            config.activation.duration_secs = duration;
        }
        if let Some(targets) = &self.targets {
            config.detection.targets = targets.clone();
        }
        if let Some(overlap) = self.overlap {
            config.activation.overlap = overlap;
        }
        if let Some(fps) = self.fps {
            config.source.fps = fps;
        }
        if self.dry_run {
            config.gpio.dry_run = true;
        }
    }
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    let mut config = match &args.config {
        Some(path) => DefenseConfig::load(path)?,
        None => DefenseConfig::default(),
    };
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    tracing::info!("Fieldguard starting");
    tracing::info!("Camera: {}", config.source.camera);
    tracing::info!("Targets: {}", config.detection.targets.join(", "));
    tracing::info!(
        "Threshold: >{}, activation: {}s, overlap: {}",
        config.detection.threshold,
        config.activation.duration_secs,
        config.activation.overlap
    );

    if args.check_config {
        println!("configuration ok");
        return Ok(ExitCode::SUCCESS);
    }

    let bank = ActuatorBank::new(open_outputs(&config)?)
        .context("Failed to start actuator timer")?;

    let stop = StopSignal::new();
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || {
        tracing::info!("Stop requested");
        handler_stop.request();
    })
    .context("Failed to install stop handler")?;

    let source = TimedSource::new(
        provider_factory(&config),
        config.frame_timeout(),
        config.open_timeout(),
    );

    tracing::info!("Press Ctrl+C to stop");
    let mut control = ControlLoop::new(
        source,
        bank,
        config.policy(),
        config.loop_settings(),
        stop,
    );
    let outcome = control.run();

    let stats = &outcome.stats;
    tracing::info!(
        "Processed {} frames, {} activations, {} transient faults, {} re-acquisitions",
        stats.frames,
        stats.activations,
        stats.transient_faults,
        stats.reacquisitions
    );

    if let Err(fault) = &outcome.release {
        tracing::error!("Actuators may still be energized: {}", fault);
        eprintln!("UNRECOVERABLE: actuator release failed: {}", fault);
        return Ok(ExitCode::from(2));
    }

    match &outcome.reason {
        ShutdownReason::StopRequested => {
            tracing::info!("Stopped cleanly");
            Ok(ExitCode::SUCCESS)
        }
        ShutdownReason::Fatal(reason) => {
            tracing::error!("Stopped: {}", reason);
            eprintln!("Error: {}", reason);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn open_outputs(config: &DefenseConfig) -> Result<Vec<Box<dyn DigitalOutput>>> {
    let outputs = actuator::open_all(
        &config.actuators,
        |actuator| -> Result<Box<dyn DigitalOutput>, HardwareFault> {
            if config.gpio.dry_run {
                return Ok(Box::new(DryRunOutput::new(&actuator.name)));
            }
            let gpio = SysfsGpio::open(
                &config.gpio.sysfs_root,
                &actuator.name,
                actuator.pin,
                actuator.active_low,
            )?;
            Ok(Box::new(gpio))
        },
    )
    .context("Failed to open actuators")?;
    Ok(outputs)
}

/// Camera and model are built on the detection worker thread
fn provider_factory(config: &DefenseConfig) -> ProviderFactory {
    let model_path = config.detection.model.clone();
    let params = config.yolo_params();
    let camera = CameraDescriptor::parse(&config.source.camera);
    let (width, height) = (config.source.width, config.source.height);

    Arc::new(move || -> Result<Box<dyn FrameProvider>, SourceFault> {
        let model = perception::create_default_model(&model_path, params.clone())
            .map_err(|e| SourceFault::InferenceFailure(format!("{:#}", e)))?;
        let camera = camera.clone();
        let pipeline =
            DetectionPipeline::new(move || WebcamCapture::open(&camera, width, height), model)?;
        Ok(Box::new(pipeline) as Box<dyn FrameProvider>)
    })
}
