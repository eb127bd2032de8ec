//! Manual trigger for the backend webhook API.
//!
//! Injects test events so a running `gate-monitor` has something to react to.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use external_services::{
    AccessOutcome, AccessStatus, ApiResponse, FaceImage, GateAccessRequest, RequestEventType,
    WebhookClient, API_BASE_URL,
};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "webhook-tester")]
#[command(about = "Send test events to the gate backend webhook API")]
struct Cli {
    /// API base URL
    #[arg(long, env = "GATE_API_BASE_URL", default_value = API_BASE_URL)]
    api_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Broadcast a message to every connected stream client
    Broadcast {
        #[arg(default_value = "Test broadcast from webhook-tester")]
        message: String,
    },

    /// Inject a synthetic gate event
    GateAccess {
        #[arg(value_enum)]
        kind: EventKind,

        gate_id: String,

        /// Defaults to the gate id
        #[arg(long)]
        camera_id: Option<String>,

        #[arg(long)]
        user_id: Option<i64>,

        #[arg(long)]
        confidence: Option<f64>,

        #[arg(long)]
        message: Option<String>,
    },

    /// Upload a face image through the live recognition path
    Face {
        image: PathBuf,

        gate_id: String,

        /// Defaults to the gate id
        #[arg(long)]
        camera_id: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum EventKind {
    Granted,
    Denied,
    Exit,
}

impl EventKind {
    fn request_type(self) -> RequestEventType {
        match self {
            EventKind::Granted => RequestEventType::AccessGranted,
            EventKind::Denied => RequestEventType::AccessDenied,
            EventKind::Exit => RequestEventType::ExitCompleted,
        }
    }

    fn default_message(self) -> &'static str {
        match self {
            EventKind::Granted => "Access granted",
            EventKind::Denied => "Access denied",
            EventKind::Exit => "Exit completed",
        }
    }
}

fn gate_access_request(
    kind: EventKind,
    gate_id: String,
    camera_id: Option<String>,
    user_id: Option<i64>,
    confidence: Option<f64>,
    message: Option<String>,
) -> GateAccessRequest {
    let access_result = match kind {
        EventKind::Exit => None,
        EventKind::Granted => Some(AccessOutcome {
            status: AccessStatus::Success,
            confidence,
            reason: None,
        }),
        EventKind::Denied => Some(AccessOutcome {
            status: AccessStatus::Failed,
            confidence,
            reason: Some("Face not recognized".to_string()),
        }),
    };

    GateAccessRequest {
        event_type: kind.request_type(),
        camera_id: camera_id.unwrap_or_else(|| gate_id.clone()),
        gate_id,
        user_id,
        access_result,
        message: message.unwrap_or_else(|| kind.default_message().to_string()),
    }
}

fn report<T: Serialize>(response: &ApiResponse<T>) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(response)?);
    if !response.success {
        bail!(
            "request failed: {}",
            response.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let client = WebhookClient::with_base_url(cli.api_url);
    info!("Using API at {}", client.base_url());

    match cli.command {
        Command::Broadcast { message } => report(&client.test_broadcast(&message).await),
        Command::GateAccess {
            kind,
            gate_id,
            camera_id,
            user_id,
            confidence,
            message,
        } => {
            let request =
                gate_access_request(kind, gate_id, camera_id, user_id, confidence, message);
            report(&client.send_gate_access_event(&request).await)
        }
        Command::Face {
            image,
            gate_id,
            camera_id,
        } => {
            let image = FaceImage::from_path(&image)?;
            let camera_id = camera_id.unwrap_or_else(|| gate_id.clone());
            report(&client.trigger_gate_access(image, &gate_id, &camera_id).await)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_api_url_flag() {
        let cli = Cli::try_parse_from([
            "webhook-tester",
            "--api-url",
            "http://localhost:8000/api/v1",
            "broadcast",
        ])
        .unwrap();
        assert_eq!(cli.api_url, "http://localhost:8000/api/v1");
        assert!(matches!(cli.command, Command::Broadcast { ref message } if message.starts_with("Test broadcast")));
    }

    #[test]
    fn test_denied_request_defaults() {
        let request = gate_access_request(EventKind::Denied, "2".to_string(), None, None, None, None);
        assert_eq!(request.event_type, RequestEventType::AccessDenied);
        assert_eq!(request.camera_id, "2");
        assert_eq!(request.message, "Access denied");
        assert_eq!(
            request.access_result.map(|r| r.status),
            Some(AccessStatus::Failed)
        );
    }

    #[test]
    fn test_exit_request_has_no_result() {
        let request = gate_access_request(
            EventKind::Exit,
            "1".to_string(),
            Some("cam-9".to_string()),
            Some(4),
            None,
            Some("bye".to_string()),
        );
        assert_eq!(request.camera_id, "cam-9");
        assert_eq!(request.user_id, Some(4));
        assert!(request.access_result.is_none());
    }

    #[test]
    fn test_report_failure_is_error() {
        let failed: ApiResponse<()> = ApiResponse::failure("HTTP error! status: 500");
        assert!(report(&failed).is_err());
        assert!(report(&ApiResponse::ok(())).is_ok());
    }
}
