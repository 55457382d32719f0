use anyhow::{Context, Result, anyhow};
use avatalk::audio::capture::{CpalAudioSource, list_devices, suppress_audio_warnings};
use avatalk::audio::capture_buffer::CaptureBuffer;
use avatalk::audio::playback::CpalAudioOutput;
use avatalk::audio::recorder::AudioSourceConfig;
use avatalk::cli::{Cli, Commands};
use avatalk::config::Config;
use avatalk::lipsync::{LipSyncDriver, SharedBlendShapes, VISEME_COUNT};
use avatalk::pipeline::{Collaborators, PipelineState, TurnController};
use avatalk::providers::cartesia::{CartesiaClient, VoiceControls};
use avatalk::providers::deepgram::DeepgramClient;
use avatalk::providers::groq::GroqClient;
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    // Must run before any thread exists.
    suppress_audio_warnings();

    let cli = Cli::parse();
    init_logging(cli.verbose);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("fatal: failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "info,avatalk=debug",
        _ => "info,avatalk=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = load_config(cli.config.as_deref())?;
    apply_cli_overrides(&mut config, &cli);
    config.validate()?;

    match cli.command {
        Some(Commands::Devices) => list_audio_devices(),
        Some(Commands::Config) => print_config(&config),
        None => converse(config, cli.tick).await,
    }
}

fn load_config(custom_path: Option<&std::path::Path>) -> Result<Config> {
    let config = match custom_path {
        Some(path) => Config::load(path)?,
        None => {
            let default_path = Config::default_path();
            Config::load_or_default(&default_path)
                .with_context(|| format!("Failed to load {}", default_path.display()))?
        }
    };

    Ok(config.with_env_overrides())
}

fn apply_cli_overrides(config: &mut Config, cli: &Cli) {
    if let Some(device) = &cli.device {
        config.audio.device = Some(device.clone());
    }
    if let Some(device) = &cli.output_device {
        config.audio.output_device = Some(device.clone());
    }
    if let Some(dir) = &cli.artifacts {
        config.pipeline.artifacts_dir = Some(dir.clone());
    }
    if cli.no_artifacts {
        config.pipeline.save_artifacts = false;
    }
    if let Some(timeout) = cli.request_timeout {
        config.pipeline.request_timeout_secs = timeout.as_secs().max(1);
    }
}

fn list_audio_devices() -> Result<()> {
    let devices = list_devices()?;

    if devices.is_empty() {
        return Err(anyhow!("No audio input devices found"));
    }

    println!("Available audio input devices:");
    for (idx, device) in devices.iter().enumerate() {
        println!("  [{idx}] {device}");
    }

    Ok(())
}

fn print_config(config: &Config) -> Result<()> {
    let mut shown = config.clone();
    for key in [
        &mut shown.stt.api_key,
        &mut shown.llm.api_key,
        &mut shown.tts.api_key,
    ] {
        if key.is_some() {
            *key = Some("<redacted>".to_string());
        }
    }
    print!("{}", toml::to_string(&shown)?);
    Ok(())
}

fn collaborators(config: &Config) -> Result<Collaborators> {
    let mut stt = DeepgramClient::new(config.stt.api_key.clone().unwrap_or_default())?;
    if let Some(url) = &config.stt.url {
        stt = stt.with_url(url);
    }
    if let Some(model) = &config.stt.model {
        stt = stt.with_model(model);
    }

    let mut llm = GroqClient::new(config.llm.api_key.clone().unwrap_or_default())?;
    if let Some(url) = &config.llm.url {
        llm = llm.with_url(url);
    }
    if let Some(model) = &config.llm.model {
        llm = llm.with_model(model);
    }

    let mut tts = CartesiaClient::new(config.tts.api_key.clone().unwrap_or_default())?
        .with_sample_rate(config.tts.sample_rate)
        .with_controls(VoiceControls {
            rate: config.tts.rate,
            clarity: config.tts.clarity,
            volume: config.tts.volume,
        });
    if let Some(url) = &config.tts.url {
        tts = tts.with_url(url);
    }
    if let Some(model) = &config.tts.model {
        tts = tts.with_model(model);
    }
    if let Some(voice) = &config.tts.voice_id {
        tts = tts.with_voice(voice);
    }

    let output = CpalAudioOutput::new(config.audio.output_device.as_deref())?;

    Ok(Collaborators {
        stt: Arc::new(stt),
        llm: Arc::new(llm),
        tts: Arc::new(tts),
        output: Arc::new(output),
    })
}

async fn converse(config: Config, tick: Duration) -> Result<()> {
    let collaborators = collaborators(&config)?;

    let source = CpalAudioSource::with_config(
        config.audio.device.as_deref(),
        AudioSourceConfig {
            sample_rate: config.audio.capture_sample_rate,
        },
    )?;
    let capture = CaptureBuffer::new(Box::new(source), config.max_capture());

    // Headless: weights are computed but not rendered anywhere.
    let driver = LipSyncDriver::new(
        config.lipsync_config(),
        Box::new(SharedBlendShapes::new(VISEME_COUNT)),
        Box::new(config.viseme_source()),
    );

    let mut controller =
        TurnController::new(config.controller_config(), collaborators, capture, driver)
            .with_artifacts(config.artifact_store());
    controller.start()?;
    tracing::info!(
        version = %avatalk::version_string(),
        "Conversation started, press Ctrl+C to stop"
    );

    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut last = Instant::now();

    let outcome = loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("Interrupted");
                break Ok(());
            }
            _ = interval.tick() => {
                let now = Instant::now();
                controller.tick(now - last);
                last = now;

                if controller.state() == PipelineState::Idle
                    && let Some(e) = controller.last_error()
                {
                    break Err(anyhow!("Conversation halted: {e}"));
                }
            }
        }
    };

    controller.shutdown();
    outcome
}
