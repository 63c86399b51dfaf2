//! Signaling Session
//!
//! Framed-JSON bidirectional transport to the vogo server over WebSocket,
//! authenticated with HTTP basic auth on the upgrade request. Reads are
//! cancellable: `recv` races the socket against a [`CancellationToken`], so a
//! cancelled parent unblocks a pending read within one scheduling quantum.

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use vogo_common::IceCandidate;

use crate::error::ClientError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Server origin plus the basic-auth credential pair.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub base_url: String,
    pub username: String,
    pub password: String,
}

impl Credentials {
    fn basic_header(&self) -> String {
        use base64::engine::general_purpose::STANDARD;
        use base64::Engine;
        format!(
            "Basic {}",
            STANDARD.encode(format!("{}:{}", self.username, self.password))
        )
    }
}

/// One signaling session, split into independently owned halves so a reader
/// task and a writer task can run concurrently.
pub struct SignalingSession {
    sender: SignalingSender,
    receiver: SignalingReceiver,
}

pub struct SignalingSender {
    sink: SplitSink<WsStream, Message>,
    closed: bool,
}

pub struct SignalingReceiver {
    stream: SplitStream<WsStream>,
}

impl SignalingSession {
    /// Dial the server and upgrade, carrying basic auth in the request
    /// headers. `endpoint` is `/call` or `/answer/{caller}`.
    pub async fn connect(
        credentials: &Credentials,
        endpoint: &str,
    ) -> Result<Self, ClientError> {
        let url = ws_url(&credentials.base_url, endpoint);
        debug!(url = %url, "dialing signaling session");

        let mut request = url
            .into_client_request()
            .map_err(ClientError::transport)?;
        request.headers_mut().insert(
            AUTHORIZATION,
            credentials
                .basic_header()
                .parse()
                .map_err(ClientError::transport)?,
        );

        let (socket, _) = connect_async(request).await.map_err(connect_error)?;
        let (sink, stream) = socket.split();
        Ok(Self {
            sender: SignalingSender { sink, closed: false },
            receiver: SignalingReceiver { stream },
        })
    }

    pub fn split(self) -> (SignalingSender, SignalingReceiver) {
        (self.sender, self.receiver)
    }
}

impl SignalingSender {
    /// Serialize and write one frame.
    pub async fn send<T: Serialize>(&mut self, value: &T) -> Result<(), ClientError> {
        let text = serde_json::to_string(value).map_err(ClientError::protocol)?;
        self.sink
            .send(Message::Text(text.into()))
            .await
            .map_err(ClientError::transport)
    }

    /// Close the transport. Idempotent; any blocked reader on the other half
    /// unblocks with a transport error.
    pub async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let _ = self.sink.send(Message::Close(None)).await;
        }
    }
}

impl SignalingReceiver {
    /// Read one frame into `T`, honoring cancellation.
    pub async fn recv<T: DeserializeOwned>(
        &mut self,
        token: &CancellationToken,
    ) -> Result<T, ClientError> {
        loop {
            tokio::select! {
                () = token.cancelled() => return Err(ClientError::Cancelled),
                msg = self.stream.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        return serde_json::from_str(&text).map_err(ClientError::protocol);
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return Err(match frame {
                            Some(frame) => ClientError::from_close_code(frame.code.into()),
                            None => ClientError::Transport("session closed".into()),
                        });
                    }
                    Some(Ok(_)) => {} // ping/pong/binary
                    Some(Err(e)) => return Err(ClientError::transport(e)),
                    None => return Err(ClientError::Transport("connection closed".into())),
                }
            }
        }
    }
}

/// Continuously read candidate frames and publish them to `tx`. The
/// end-of-candidates sentinel, cancellation, or any read error drops `tx`,
/// which closes the channel for the consumer.
///
/// Read errors are not fatal here: the broker closes the session once the
/// exchange is done, and whether enough candidates made it across is judged
/// by the peer connection itself (`Connected` or `Failed`).
pub async fn read_candidates(
    mut receiver: SignalingReceiver,
    token: CancellationToken,
    tx: mpsc::Sender<IceCandidate>,
) {
    loop {
        let candidate: IceCandidate = match receiver.recv(&token).await {
            Ok(c) => c,
            Err(ClientError::Cancelled) => return,
            Err(e) => {
                warn!(error = %e, "signaling read ended");
                return;
            }
        };
        if candidate.is_end_of_candidates() {
            debug!("remote gathering completed");
            return;
        }
        if tx.send(candidate).await.is_err() {
            // consumer gone; the session is tearing down
            return;
        }
    }
}

/// Forward locally gathered candidates to the server as they arrive. Channel
/// closure means gathering finished, which is relayed as the sentinel.
pub async fn send_candidates(
    sender: &mut SignalingSender,
    token: &CancellationToken,
    rx: &mut mpsc::Receiver<IceCandidate>,
) -> Result<(), ClientError> {
    loop {
        tokio::select! {
            () = token.cancelled() => return Ok(()),
            candidate = rx.recv() => match candidate {
                Some(c) => {
                    sender.send(&c).await?;
                    debug!("sent candidate");
                }
                None => {
                    sender.send(&IceCandidate::end_of_candidates()).await?;
                    debug!("local gathering completed");
                    return Ok(());
                }
            }
        }
    }
}

fn ws_url(base_url: &str, endpoint: &str) -> String {
    let base = base_url
        .replacen("https://", "wss://", 1)
        .replacen("http://", "ws://", 1);
    format!("{}{}", base.trim_end_matches('/'), endpoint)
}

fn connect_error(err: tungstenite::Error) -> ClientError {
    match err {
        tungstenite::Error::Http(response) if response.status() == 401 => ClientError::Auth,
        other => ClientError::transport(other),
    }
}
