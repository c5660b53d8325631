mod audio;
mod capture;
mod config;

use crate::capture::RealtimeCapture;
use crate::config::Config;
use anyhow::{Context, Result};
use clap::Parser;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FrameCount, StreamConfig};
use interview_core::capture::{CaptureEvent, SpeechCapture};
use interview_core::examiner::{ExaminerClient, run_exchange};
use interview_core::language::LanguageMode;
use interview_core::report::FinalReport;
use interview_core::session::{InterviewSession, SessionStatus};
use interview_core::{Command, SessionEvent};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::fmt::time::ChronoLocal;

#[derive(Parser)]
struct Cli {
    /// Interview language (en or ja)
    #[arg(long, default_value = "en")]
    language: String,
    /// Session length in minutes
    #[arg(long, default_value_t = 5)]
    minutes: u32,
    /// Input device name; defaults to the system default microphone
    #[arg(long)]
    device: Option<String>,
}

struct Microphone {
    stream: cpal::Stream,
    sample_rate: f64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("Failed to load application configuration")?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    let args = Cli::parse();
    let language = LanguageMode::from_str(&args.language).map_err(|e| anyhow::anyhow!(e))?;
    let minutes = args.minutes;

    // Microphone frames flow through this channel into the capture adapter's
    // websocket pump. A missing device is not fatal: the session will refuse
    // to start and say why.
    let (audio_tx, audio_rx) = mpsc::channel::<Vec<f32>>(1024);
    let microphone = match setup_microphone(args.device.clone(), audio_tx) {
        Ok(microphone) => Some(microphone),
        Err(e) => {
            tracing::warn!("microphone unavailable: {e:#}");
            None
        }
    };
    let supported = microphone.is_some();
    let input_sample_rate = microphone
        .as_ref()
        .map(|m| m.sample_rate)
        .unwrap_or(audio::CAPTURE_PCM16_SAMPLE_RATE);
    // The cpal stream must stay alive for as long as we want callbacks.
    let _mic_stream = microphone.map(|m| m.stream);

    let (event_tx, mut event_rx) = mpsc::channel::<SessionEvent>(256);
    let (command_tx, mut command_rx) = mpsc::channel::<Command>(64);
    let (capture_tx, mut capture_rx) = mpsc::channel::<CaptureEvent>(64);

    let capture = RealtimeCapture::new(
        config.openai_api_key.clone(),
        config.transcribe_model.clone(),
        language,
        supported,
        audio_rx,
        input_sample_rate,
        capture_tx,
    );
    let examiner = Arc::new(ExaminerClient::new(
        config.openai_api_key.clone(),
        config.chat_model.clone(),
    ));

    // The session task is the single serialization point: every tick, capture
    // snapshot, exchange completion and user keystroke goes through here one
    // at a time.
    let session_commands = command_tx.clone();
    let session_task = tokio::spawn(async move {
        let mut session = InterviewSession::new(supported);
        let mut announced = 0u32;
        while let Some(event) = event_rx.recv().await {
            if let Err(e) = session.handle(event, &session_commands).await {
                tracing::error!("session error: {e}");
            }
            let remaining = session.remaining_seconds();
            if session.status() == SessionStatus::Active
                && matches!(remaining, 60 | 30 | 10)
                && remaining != announced
            {
                announced = remaining;
                println!("  [{remaining}s left]");
            }
        }
    });

    // Command executor: owns the capture adapter and dispatches exchange
    // calls without ever blocking on them, so a slow collaborator cannot
    // hold up a stop or a quit.
    let exchange_events = event_tx.clone();
    let command_task = tokio::spawn(async move {
        let mut capture = capture;
        while let Some(command) = command_rx.recv().await {
            match command {
                Command::StartCapture => {
                    if let Err(e) = capture.start().await {
                        tracing::error!("failed to start capture: {e:#}");
                        let _ = exchange_events.send(SessionEvent::CaptureEnded).await;
                    }
                }
                Command::StopCapture => {
                    if let Err(e) = capture.stop().await {
                        tracing::warn!("failed to stop capture: {e:#}");
                    }
                }
                command @ (Command::OpenExchange { .. }
                | Command::SubmitExchange { .. }
                | Command::CloseExchange { .. }) => {
                    let examiner = Arc::clone(&examiner);
                    let events = exchange_events.clone();
                    tokio::spawn(async move {
                        if let Some(event) = run_exchange(examiner.as_ref(), command).await {
                            let _ = events.send(event).await;
                        }
                    });
                }
                Command::ShowQuestion { sequence, text } => println!("\nQ{sequence}: {text}"),
                Command::ShowEvaluation(text) => {
                    if !text.is_empty() {
                        println!("  feedback: {text}");
                    }
                }
                Command::ShowReport(report) => print_report(&report),
                Command::ShowError(text) => println!("! {text}"),
                Command::SessionClosed => println!("session ended, type `start` for a new one."),
            }
        }
    });

    // Capture events feed the same serialized session channel.
    let capture_events = event_tx.clone();
    let capture_pump = tokio::spawn(async move {
        while let Some(event) = capture_rx.recv().await {
            let mapped = match event {
                CaptureEvent::Transcript(text) => SessionEvent::Transcript(text),
                CaptureEvent::Ended => SessionEvent::CaptureEnded,
                CaptureEvent::Error(e) => {
                    tracing::warn!("capture error: {e}");
                    SessionEvent::CaptureEnded
                }
            };
            if capture_events.send(mapped).await.is_err() {
                break;
            }
        }
    });

    // The 1 Hz drive for the session countdown.
    let tick_events = event_tx.clone();
    let timer_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(
            tokio::time::Instant::now() + Duration::from_secs(1),
            Duration::from_secs(1),
        );
        loop {
            interval.tick().await;
            if tick_events.send(SessionEvent::Tick).await.is_err() {
                break;
            }
        }
    });

    // User controls from stdin; each line maps onto exactly one session event.
    let control_events = event_tx.clone();
    let control_task = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let event = match line.trim() {
                "" => continue,
                "start" => SessionEvent::Start { language, minutes },
                "submit" | "s" => SessionEvent::Submit,
                "finish" | "f" => SessionEvent::Finish,
                "quit" | "q" => SessionEvent::Quit,
                "mic" | "m" => SessionEvent::ToggleCapture,
                other => {
                    println!("unknown command `{other}` (start, submit, finish, mic, quit)");
                    continue;
                }
            };
            if control_events.send(event).await.is_err() {
                break;
            }
        }
    });

    println!("mock interview — speak your answers, `submit` to send, `finish` to end early, `quit` to abandon.");
    event_tx
        .send(SessionEvent::Start { language, minutes })
        .await
        .context("failed to queue session start")?;

    tokio::select! {
        _ = session_task => {},
        _ = command_task => {},
        _ = capture_pump => {},
        _ = timer_task => {},
        _ = control_task => {},
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl-C, shutting down...");
        }
    }
    tracing::info!("Shutting down...");
    Ok(())
}

fn setup_microphone(
    device_name: Option<String>,
    audio_tx: mpsc::Sender<Vec<f32>>,
) -> Result<Microphone> {
    let host = cpal::default_host();
    let device = match device_name {
        Some(name) => host
            .input_devices()
            .context("failed to enumerate input devices")?
            .find(|d| d.name().is_ok_and(|n| n == name))
            .ok_or_else(|| anyhow::anyhow!("input device {name} not found"))?,
        None => host
            .default_input_device()
            .context("no default audio input device")?,
    };
    tracing::info!("Using input device: {:?}", device.name()?);

    let default_config = device
        .default_input_config()
        .context("Failed to get default input config")?;
    let stream_config = StreamConfig {
        channels: default_config.channels(),
        sample_rate: default_config.sample_rate(),
        buffer_size: cpal::BufferSize::Fixed(FrameCount::from(audio::INPUT_CHUNK_SIZE as u32)),
    };
    let channel_count = stream_config.channels as usize;
    let sample_rate = stream_config.sample_rate.0 as f64;
    tracing::info!("Input stream config: {:?}", &stream_config);

    let input_data_fn = move |data: &[f32], _: &cpal::InputCallbackInfo| {
        let frame = audio::downmix_to_mono(data, channel_count);
        if audio_tx.try_send(frame).is_err() {
            tracing::warn!("audio channel full, dropping a frame");
        }
    };
    let stream = device.build_input_stream(
        &stream_config,
        input_data_fn,
        move |err| tracing::error!("An error occurred on input stream: {err}"),
        None,
    )?;
    stream.play()?;

    Ok(Microphone { stream, sample_rate })
}

fn print_report(report: &FinalReport) {
    println!("\n========= interview report =========");
    println!("score: {}/100", report.score);
    println!("{}", report.summary);
    if !report.strengths.is_empty() {
        println!("what went well:");
        for item in &report.strengths {
            println!("  + {item}");
        }
    }
    if !report.improvements.is_empty() {
        println!("what to work on:");
        for item in &report.improvements {
            println!("  - {item}");
        }
    }
    println!("advice: {}", report.advice);
    println!("====================================");
}
