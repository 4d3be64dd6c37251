//! Demo server: one supervised session on a loopback protocol.
//!
//! Run with: cargo run -p status-server-demo [config.json]
//!
//! Then open http://localhost:3000 to watch the login flow. The loopback
//! "device" shows a QR payload, pretends it was scanned after a few seconds
//! and then opens the session. Push a fake inbound message with:
//!
//! ```text
//! curl -X POST localhost:3000/loopback/inbound \
//!      -H 'content-type: application/json' \
//!      -d '{"from":"6281234567890@s.whatsapp.net","text":"menu"}'
//! ```

use std::{
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::Context;
use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::Html,
    routing::{get, post},
};
use courier_core::{
    ConnectOptions, ConnectionError, Credential, EventSink, InboundMessage, MessageHandler,
    ProtocolClient, ProtocolConnector, SaveError, SendError, SupervisorConfig, credential::now,
};
use courier_session::{ConnectionSupervisor, EventDispatcher, open_store};
use courier_transport::{HttpState, router};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// How long the loopback device waits before "scanning" the QR code.
const SCAN_DELAY: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let path = std::env::args()
        .nth(1)
        .map_or_else(|| PathBuf::from("courier.json"), PathBuf::from);
    let config = SupervisorConfig::load(&path)
        .and_then(SupervisorConfig::apply_env)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    config.validate()?;

    let store = open_store(&config.storage)
        .await
        .context("Failed to open credential store")?;
    let connector = Arc::new(LoopbackConnector::default());
    let handle = ConnectionSupervisor::spawn(&config, store, connector.clone());

    handle.on_inbound(Arc::new(MenuHandler {
        dispatcher: handle.dispatcher().clone(),
    }))?;
    handle.start().await?;

    // Build router
    let app = Router::new()
        .route("/", get(index_handler))
        .route("/loopback/inbound", post(inject_inbound))
        .with_state(connector)
        .merge(router(HttpState::new(handle.clone(), &config.recipient_domain)))
        .layer(CorsLayer::permissive());

    // Start server
    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
    tracing::info!("Server listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    handle.stop().await?;
    tracing::info!("Shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for ctrl-c: {e}");
    }
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

#[derive(Deserialize)]
struct InjectRequest {
    from: String,
    text: String,
}

/// POST /loopback/inbound
async fn inject_inbound(
    State(connector): State<Arc<LoopbackConnector>>,
    Json(request): Json<InjectRequest>,
) -> StatusCode {
    let Some(sink) = connector.current_sink() else {
        return StatusCode::CONFLICT;
    };

    let message = InboundMessage::incoming(
        Uuid::new_v4().simple().to_string(),
        request.from,
        now(),
        request.text,
    );
    match sink.messages(vec![message]).await {
        Ok(()) => StatusCode::ACCEPTED,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

// ============================================================================
// Loopback protocol
// ============================================================================

/// Connector for a device that lives in this process.
#[derive(Default)]
struct LoopbackConnector {
    sink: Mutex<Option<EventSink>>,
}

impl LoopbackConnector {
    fn current_sink(&self) -> Option<EventSink> {
        self.sink.lock().ok().and_then(|sink| sink.clone())
    }
}

#[async_trait]
impl ProtocolConnector for LoopbackConnector {
    fn init_credential(&self) -> Credential {
        Credential::new(json!({
            "noiseKey": Uuid::new_v4().to_string(),
            "signedIdentityKey": Uuid::new_v4().to_string(),
        }))
    }

    async fn connect(
        &self,
        credential: Credential,
        options: &ConnectOptions,
        events: EventSink,
    ) -> Result<Arc<dyn ProtocolClient>, ConnectionError> {
        tracing::info!(
            client = %options.client_name,
            version = %options.client_version,
            registered = credential.registered,
            "Loopback device connecting"
        );

        *self
            .sink
            .lock()
            .map_err(|_| ConnectionError::Refused("loopback state poisoned".into()))? =
            Some(events.clone());

        tokio::spawn(async move {
            if let Err(e) = handshake(credential, events).await {
                tracing::warn!("Loopback handshake aborted: {e}");
            }
        });

        Ok(Arc::new(LoopbackClient))
    }
}

/// Show a QR code, "scan" it, rotate keys, then open.
async fn handshake(mut credential: Credential, events: EventSink) -> Result<(), SaveError> {
    if !credential.registered {
        events
            .qr(format!("2@{}", Uuid::new_v4().simple()))
            .await?;
        tokio::time::sleep(SCAN_DELAY).await;

        credential.registered = true;
        credential.set_key("pre-key", "1", Some(json!(Uuid::new_v4().to_string())));
        events.credentials_updated(credential).await?;
    }
    events.open().await?;
    Ok(())
}

struct LoopbackClient;

#[async_trait]
impl ProtocolClient for LoopbackClient {
    async fn send(&self, recipient: &str, body: &str) -> Result<(), SendError> {
        tracing::info!(recipient, body, "Loopback send");
        Ok(())
    }

    async fn disconnect(&self) {
        tracing::info!("Loopback device disconnected");
    }
}

// ============================================================================
// Auto-reply
// ============================================================================

const MENU: &str = "*Courier demo*\n\n\
Reply with a number:\n\
1. Opening hours\n\
2. Contact\n\n\
Type *0* to see this menu again.";

/// Replies to every text with a fixed menu.
struct MenuHandler {
    dispatcher: EventDispatcher,
}

fn reply_for(text: &str) -> &'static str {
    match text.trim().to_lowercase().as_str() {
        "0" | "menu" | "hi" | "hello" => MENU,
        "1" => "We are open Monday to Friday, 09:00 to 17:00.\n\nType *0* to go back to the menu.",
        "2" => "Write to support@example.com.\n\nType *0* to go back to the menu.",
        _ => "Invalid option. Type *0* to see the menu.",
    }
}

#[async_trait]
impl MessageHandler for MenuHandler {
    async fn on_message(&self, message: InboundMessage) {
        let reply = reply_for(&message.body);
        if let Err(e) = self.dispatcher.send(&message.sender, reply).await {
            tracing::warn!(sender = %message.sender, "Failed to reply: {e}");
        }
    }
}

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>Courier - Session</title>
    <script src="https://cdn.jsdelivr.net/npm/qrcodejs@1.0.0/qrcode.min.js"></script>
    <style>
        body {
            margin: 0;
            padding: 20px;
            background: #1e1e1e;
            color: #d4d4d4;
            font-family: system-ui, sans-serif;
        }
        h1 { color: #fff; margin-bottom: 10px; }
        #qr { background: #fff; padding: 16px; display: inline-block; }
        .hidden { display: none !important; }
        .connected { color: #4a4; }
        .disconnected { color: #a44; }
    </style>
</head>
<body>
    <h1>Courier Session</h1>
    <div id="status">Loading...</div>
    <pre id="error"></pre>
    <div id="qr" class="hidden"></div>

    <script>
        const status = document.getElementById('status');
        const error = document.getElementById('error');
        const qrBox = document.getElementById('qr');
        const qr = new QRCode(qrBox, { width: 256, height: 256 });

        const events = new EventSource('/status/events');
        events.addEventListener('status', (event) => {
            const s = JSON.parse(event.data);
            status.textContent = `${s.session_key}: ${s.state} (${s.phase}, retry ${s.retry_attempt})`;
            status.className = s.state === 'connected' ? 'connected' : 'disconnected';
            error.textContent = s.last_error || '';

            if (s.qr_payload) {
                qr.makeCode(s.qr_payload);
                qrBox.classList.remove('hidden');
            } else {
                qrBox.classList.add('hidden');
            }
        });
    </script>
</body>
</html>
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_menu_replies() {
        assert_eq!(reply_for(" Menu "), MENU);
        assert!(reply_for("1").contains("Monday"));
        assert!(reply_for("42").starts_with("Invalid option"));
    }
}
