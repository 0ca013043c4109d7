// ABOUTME: WebSocket endpoint attaching a browser terminal to the project's sandbox shell
// ABOUTME: Access is checked before the upgrade; raw shell bytes flow both ways without framing

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::{IntoResponse, Response},
};
use futures::{future, SinkExt, StreamExt};
use tracing::{debug, warn};

use crate::auth::CurrentUser;
use crate::response::ApiError;
use crate::AppState;

/// Upgrade to a terminal session
///
/// GET /api/projects/{project_id}/terminal
pub async fn open_terminal(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(project_id): Path<String>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    // Refuse before the handshake so no shell is ever opened
    if let Err(e) = state
        .sandboxes
        .service
        .authorize(&project_id, &current_user.id)
        .await
    {
        return ApiError(e).into_response();
    }

    let ws = match upgrade {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    ws.on_upgrade(move |socket| bridge_socket(socket, state, current_user.id, project_id))
}

async fn bridge_socket(socket: WebSocket, state: AppState, user_id: String, project_id: String) {
    let (sender, receiver) = socket.split();

    let inbound = receiver
        .take_while(|msg| future::ready(matches!(msg, Ok(m) if !matches!(m, Message::Close(_)))))
        .filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Binary(bytes)) => Some(bytes.to_vec()),
                Ok(Message::Text(text)) => Some(text.as_str().as_bytes().to_vec()),
                _ => None,
            })
        })
        .boxed();

    let outbound = Box::pin(sender.with(|bytes: Vec<u8>| {
        future::ready(Ok::<_, axum::Error>(Message::Binary(bytes.into())))
    }));

    match state
        .sandboxes
        .terminal
        .serve(&user_id, &project_id, inbound, outbound)
        .await
    {
        Ok(outcome) => debug!(
            "Terminal session for project {} ended: {:?}",
            project_id, outcome
        ),
        Err(e) => warn!("Terminal session for project {} refused: {}", project_id, e),
    }
}
