//! `quickcall call`, `quickcall serve` and `quickcall gateway` handlers.

use std::io::Write;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::debug;

use super::{CallArgs, GatewayArgs, ServeArgs};
use crate::config::{ClientConfig, GatewayConfig, ServerConfig};
use crate::error::CallError;
use crate::session::{CallSessionManager, SessionEvent, StartOutcome};
use crate::transport::webrtc::SampleTrack;
use crate::transport::{LocalMediaStream, MediaConstraints};
use crate::util::format_elapsed;

/// One 20ms Opus frame of silence.
const OPUS_SILENCE: [u8; 3] = [0xF8, 0xFF, 0xFE];
const OPUS_FRAME: Duration = Duration::from_millis(20);

pub async fn handle_call(args: CallArgs) -> Result<(), CallError> {
    let mut config = match &args.config {
        Some(path) => ClientConfig::from_toml_file(path)?,
        None => ClientConfig::from_env()?,
    };
    if let Some(url) = args.session_url {
        config = config.with_session_url(url);
    }
    if let Some(voice) = args.voice {
        config = config.with_voice(voice);
    }
    if args.video {
        config = config.with_media(MediaConstraints::audio_and_video());
    }

    let manager = CallSessionManager::with_webrtc(config)?;
    let mut events = manager.subscribe();

    eprintln!("Calling with voice {}...", manager.voice().display_name());
    if manager.start_call().await? == StartOutcome::AlreadyInProgress {
        return Err(CallError::InvalidState("A call is already in progress".into()));
    }
    eprintln!("Connected. Press Ctrl+C to hang up.");

    let pump = manager.local_stream().map(spawn_silence_pump);
    let hang_up = async {
        match args.duration {
            Some(secs) => time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(hang_up);

    let mut shown = String::new();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = &mut hang_up => break,
            event = events.recv() => match event {
                Ok(SessionEvent::TranscriptUpdated(text)) => {
                    print_transcript(&text, &mut shown);
                }
                Ok(SessionEvent::Tick { elapsed_seconds }) => {
                    debug!(elapsed = %format_elapsed(elapsed_seconds), "Call timer");
                }
                Ok(SessionEvent::ConnectivityDegraded(state)) => {
                    eprintln!("\nConnection {state}; hang up and call again if audio stops.");
                }
                Ok(SessionEvent::Failed { message }) => {
                    eprintln!("\nCall failed: {message}");
                    break;
                }
                Ok(SessionEvent::CallEnded { .. }) => break,
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
        }
    }

    let elapsed = manager.elapsed_seconds();
    manager.end_call().await;
    if let Some(pump) = pump {
        pump.abort();
    }
    println!();
    eprintln!("Call ended after {}", format_elapsed(elapsed));
    Ok(())
}

pub async fn handle_serve(args: ServeArgs) -> Result<(), CallError> {
    let mut config = ServerConfig::from_env()?;
    if let Some(addr) = args.bind {
        config.bind_addr = addr;
    }
    if let Some(url) = args.upstream {
        config = config.with_upstream_url(url);
    }
    crate::server::serve(config).await
}

pub async fn handle_gateway(args: GatewayArgs) -> Result<(), CallError> {
    let mut config = GatewayConfig::from_env()?;
    if let Some(addr) = args.bind {
        config.bind_addr = addr;
    }
    match args.keepalive {
        Some(0) => {
            return Err(CallError::Configuration(
                "Keepalive interval must be at least one second".into(),
            ))
        }
        Some(secs) => config.keepalive_interval = Duration::from_secs(secs),
        None => {}
    }
    crate::gateway::serve(config).await
}

/// Print the part of `text` not yet on screen. A replaced transcript is
/// reprinted on a new line.
fn print_transcript(text: &str, shown: &mut String) {
    let mut stdout = std::io::stdout();
    match text.strip_prefix(shown.as_str()) {
        Some(rest) => {
            let _ = write!(stdout, "{rest}");
        }
        None => {
            let _ = write!(stdout, "\n{text}");
        }
    }
    let _ = stdout.flush();
    *shown = text.to_string();
}

/// Keep the audio tracks fed with silence so the gateway sees a live stream.
fn spawn_silence_pump(stream: LocalMediaStream) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(OPUS_FRAME);
        loop {
            interval.tick().await;
            for track in stream.audio_tracks() {
                let Some(sample) = track.as_any().downcast_ref::<SampleTrack>() else {
                    continue;
                };
                if let Err(error) = sample.write_sample(&OPUS_SILENCE, OPUS_FRAME).await {
                    debug!(error = %error, "Silence pump stopped");
                    return;
                }
            }
        }
    })
}
