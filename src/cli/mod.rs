//! CLI entry point for quickcall.

pub mod call;

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::types::VoiceSelection;

/// Realtime voice call client
#[derive(Parser, Debug)]
#[command(name = "quickcall", version, about = "Realtime voice calls over WebRTC")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Place a call and print the live transcript
    Call(CallArgs),
    /// Run the credential-minting server
    Serve(ServeArgs),
    /// Run a local realtime gateway that answers offers itself
    Gateway(GatewayArgs),
}

/// Arguments for the `call` subcommand.
#[derive(Parser, Debug)]
pub struct CallArgs {
    /// Voice for the call (alloy, ash, ballad, coral, echo, sage, shimmer, verse)
    #[arg(short, long)]
    pub voice: Option<VoiceSelection>,

    /// Hang up after this many seconds
    #[arg(short, long)]
    pub duration: Option<u64>,

    /// Also send a video track
    #[arg(long)]
    pub video: bool,

    /// Credential endpoint (overrides QUICKCALL_SESSION_URL)
    #[arg(long)]
    pub session_url: Option<String>,

    /// TOML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

/// Arguments for the `serve` subcommand.
#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Listen address (overrides QUICKCALL_BIND_ADDR)
    #[arg(short, long)]
    pub bind: Option<SocketAddr>,

    /// Upstream API base URL (overrides QUICKCALL_UPSTREAM_URL)
    #[arg(long)]
    pub upstream: Option<String>,
}

/// Arguments for the `gateway` subcommand.
#[derive(Parser, Debug)]
pub struct GatewayArgs {
    /// Listen address (overrides QUICKCALL_GATEWAY_BIND_ADDR)
    #[arg(short, long)]
    pub bind: Option<SocketAddr>,

    /// Seconds between keepalive pings on the control channel
    #[arg(long)]
    pub keepalive: Option<u64>,
}

impl Cli {
    /// Parse CLI arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn parse_call_with_defaults() {
        let cli = Cli::try_parse_from(["quickcall", "call"]).unwrap();
        match cli.command {
            Commands::Call(args) => {
                assert!(args.voice.is_none());
                assert!(args.duration.is_none());
                assert!(!args.video);
                assert!(args.session_url.is_none());
            }
            other => panic!("expected Call, got {other:?}"),
        }
    }

    #[test]
    fn parse_call_with_all_options() {
        let cli = Cli::try_parse_from([
            "quickcall",
            "call",
            "-v",
            "coral",
            "-d",
            "30",
            "--video",
            "--session-url",
            "http://localhost:8081/api/session",
        ])
        .unwrap();
        match cli.command {
            Commands::Call(args) => {
                assert_eq!(args.voice, Some(VoiceSelection::Coral));
                assert_eq!(args.duration, Some(30));
                assert!(args.video);
                assert_eq!(
                    args.session_url.as_deref(),
                    Some("http://localhost:8081/api/session")
                );
            }
            other => panic!("expected Call, got {other:?}"),
        }
    }

    #[test]
    fn parse_serve_bind() {
        let cli = Cli::try_parse_from(["quickcall", "serve", "--bind", "0.0.0.0:9000"]).unwrap();
        match cli.command {
            Commands::Serve(args) => {
                assert_eq!(args.bind.map(|addr| addr.port()), Some(9000));
                assert!(args.upstream.is_none());
            }
            other => panic!("expected Serve, got {other:?}"),
        }
    }

    #[test]
    fn parse_gateway_options() {
        let cli = Cli::try_parse_from([
            "quickcall",
            "gateway",
            "--bind",
            "127.0.0.1:8000",
            "--keepalive",
            "5",
        ])
        .unwrap();
        match cli.command {
            Commands::Gateway(args) => {
                assert_eq!(args.bind.map(|addr| addr.port()), Some(8000));
                assert_eq!(args.keepalive, Some(5));
            }
            other => panic!("expected Gateway, got {other:?}"),
        }
    }

    #[test]
    fn unknown_voice_is_error() {
        assert!(Cli::try_parse_from(["quickcall", "call", "--voice", "robot"]).is_err());
    }

    #[test]
    fn parse_missing_subcommand_is_error() {
        assert!(Cli::try_parse_from(["quickcall"]).is_err());
    }
}
