use std::sync::Arc;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::config::SessionConfig;
use crate::error::{LifelineError, Result};
use crate::net::protocol::{
    ClientMessage, InboundMessage, MediaBlob, RealtimeInput, ServerMessage, Setup,
    ToolResponseMessage,
};
use crate::net::{Connector, OpenRequest, TransportHandle};
use crate::session::events::{EventSender, SessionEvent};

enum Outbound {
    Text(String),
    Close,
}

/// Opens WebSocket sessions against the live dialogue endpoint.
pub struct LiveConnector {
    endpoint: String,
    api_key: String,
}

impl LiveConnector {
    pub fn new(config: &SessionConfig) -> Result<Self> {
        Ok(Self {
            endpoint: config.endpoint.clone(),
            api_key: config.resolve_api_key()?,
        })
    }

    fn url(&self) -> String {
        let sep = if self.endpoint.contains('?') { '&' } else { '?' };
        format!("{}{sep}key={}", self.endpoint, self.api_key)
    }
}

impl Connector for LiveConnector {
    fn open(
        &mut self,
        request: OpenRequest,
        events: EventSender,
    ) -> Result<Arc<dyn TransportHandle>> {
        let setup = ClientMessage::Setup(Setup::from_request(&request)).to_json()?;
        let (transport, outbound_rx) = LiveTransport::new();

        tracing::info!("connecting to {} ({})", self.endpoint, request.model);
        tokio::runtime::Handle::try_current()
            .map_err(|e| LifelineError::Connection(format!("no async runtime: {e}")))?
            .spawn(run_connection(self.url(), setup, outbound_rx, events));

        Ok(Arc::new(transport))
    }
}

/// Queues outbound messages for the connection task.
pub struct LiveTransport {
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl LiveTransport {
    fn new() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { outbound: tx }, rx)
    }

    fn enqueue(&self, msg: &ClientMessage) -> Result<()> {
        let text = msg.to_json()?;
        self.outbound
            .send(Outbound::Text(text))
            .map_err(|_| LifelineError::Send("connection is closed".to_string()))
    }
}

impl TransportHandle for LiveTransport {
    fn send_realtime_input(&self, media: MediaBlob) -> Result<()> {
        self.enqueue(&ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![media],
        }))
    }

    fn send_tool_response(&self, response: ToolResponseMessage) -> Result<()> {
        self.enqueue(&ClientMessage::ToolResponse(response))
    }

    fn close(&self) {
        let _ = self.outbound.send(Outbound::Close);
    }
}

async fn run_connection(
    url: String,
    setup: String,
    outbound: mpsc::UnboundedReceiver<Outbound>,
    events: EventSender,
) {
    let (ws, _response) = match connect_async(url.as_str()).await {
        Ok(pair) => pair,
        Err(e) => {
            events.send(SessionEvent::ConnectionError(format!(
                "failed to connect: {e}"
            )));
            return;
        }
    };

    let (mut writer, reader) = ws.split();

    if let Err(e) = writer.send(Message::text(setup)).await {
        events.send(SessionEvent::ConnectionError(format!(
            "failed to send setup: {e}"
        )));
        return;
    }

    tracing::debug!("websocket open, setup sent");
    events.send(SessionEvent::ConnectionOpened);

    pump(writer, reader, outbound, &events).await;
}

/// Move queued messages out and inbound frames in until either side ends.
async fn pump<W, R>(
    writer: W,
    reader: R,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: &EventSender,
) where
    W: Sink<Message, Error = WsError>,
    R: Stream<Item = std::result::Result<Message, WsError>>,
{
    let mut writer = std::pin::pin!(writer);
    let mut reader = std::pin::pin!(reader);

    loop {
        tokio::select! {
            cmd = outbound.recv() => match cmd {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = writer.send(Message::text(text)).await {
                        events.send(SessionEvent::ConnectionError(format!(
                            "websocket send failed: {e}"
                        )));
                        break;
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = writer.send(Message::Close(None)).await;
                    tracing::debug!("websocket closed locally");
                    break;
                }
            },
            frame = reader.next() => match frame {
                Some(Ok(Message::Text(text))) => dispatch(text.as_str(), events),
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => dispatch(text, events),
                    Err(e) => tracing::warn!("dropping non-UTF-8 binary frame: {e}"),
                },
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.as_str().to_string())
                        .filter(|r| !r.is_empty());
                    tracing::info!(
                        "websocket closed by peer: {}",
                        reason.as_deref().unwrap_or("no reason")
                    );
                    events.send(SessionEvent::ConnectionClosed { reason });
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    events.send(SessionEvent::ConnectionError(format!(
                        "websocket error: {e}"
                    )));
                    break;
                }
                None => {
                    events.send(SessionEvent::ConnectionClosed { reason: None });
                    break;
                }
            }
        }
    }
}

fn dispatch(text: &str, events: &EventSender) {
    let msg = match ServerMessage::parse(text) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::warn!("{e}");
            return;
        }
    };

    if msg.is_setup_complete() {
        tracing::debug!("setup acknowledged by peer");
    }
    if msg.go_away.is_some() {
        tracing::warn!("peer announced it will close the connection soon");
    }
    if msg.is_interrupted() {
        tracing::debug!("agent turn interrupted by the caller");
    }

    events.send(SessionEvent::MessageReceived(InboundMessage::from(msg)));
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::net::TcpListener;

    use super::*;
    use crate::net::protocol::Modality;
    use crate::session::events::Envelope;

    fn request() -> OpenRequest {
        OpenRequest {
            model: "models/test".to_string(),
            modality: Modality::Audio,
            voice: "Puck".to_string(),
            system_instruction: "stay calm".to_string(),
            tools: Vec::new(),
        }
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<Envelope>) -> SessionEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for event"))
            .unwrap_or_else(|| panic!("event channel closed"))
            .event
    }

    #[test]
    fn url_appends_key() {
        let connector = LiveConnector {
            endpoint: "wss://example.test/ws".to_string(),
            api_key: "abc".to_string(),
        };
        assert_eq!(connector.url(), "wss://example.test/ws?key=abc");

        let connector = LiveConnector {
            endpoint: "wss://example.test/ws?alt=json".to_string(),
            api_key: "abc".to_string(),
        };
        assert_eq!(connector.url(), "wss://example.test/ws?alt=json&key=abc");
    }

    #[test]
    fn send_after_close_is_send_error() {
        let (transport, rx) = LiveTransport::new();
        drop(rx);
        let result = transport.send_realtime_input(MediaBlob {
            mime_type: "audio/pcm;rate=16000".to_string(),
            data: String::new(),
        });
        assert!(matches!(result, Err(LifelineError::Send(_))));
        transport.close();
    }

    #[tokio::test]
    async fn round_trip_against_local_server() {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        let addr = listener.local_addr().unwrap_or_else(|e| panic!("{e}"));

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap_or_else(|e| panic!("{e}"));
            let mut ws = tokio_tungstenite::accept_async(stream)
                .await
                .unwrap_or_else(|e| panic!("{e}"));

            let setup = ws
                .next()
                .await
                .unwrap_or_else(|| panic!("no setup"))
                .unwrap_or_else(|e| panic!("{e}"));
            let setup: serde_json::Value =
                serde_json::from_str(setup.to_text().unwrap_or_else(|e| panic!("{e}")))
                    .unwrap_or_else(|e| panic!("{e}"));
            assert_eq!(setup["setup"]["model"], "models/test");

            ws.send(Message::text(
                json!({"serverContent": {"modelTurn": {"parts": [{"inlineData": {"data": "AAA="}}]}}})
                    .to_string(),
            ))
            .await
            .unwrap_or_else(|e| panic!("{e}"));
            ws.send(Message::binary(
                json!({"toolCall": {"functionCalls": [{"id": "1", "name": "reportEmergency", "args": {}}]}})
                    .to_string()
                    .into_bytes(),
            ))
            .await
            .unwrap_or_else(|e| panic!("{e}"));

            let input = ws
                .next()
                .await
                .unwrap_or_else(|| panic!("no input"))
                .unwrap_or_else(|e| panic!("{e}"));
            let input: serde_json::Value =
                serde_json::from_str(input.to_text().unwrap_or_else(|e| panic!("{e}")))
                    .unwrap_or_else(|e| panic!("{e}"));
            assert_eq!(
                input["realtimeInput"]["mediaChunks"][0]["mimeType"],
                "audio/pcm;rate=16000"
            );

            ws.close(None).await.unwrap_or_else(|e| panic!("{e}"));
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut connector = LiveConnector {
            endpoint: format!("ws://{addr}"),
            api_key: "test".to_string(),
        };
        let transport = connector
            .open(request(), EventSender::new(tx))
            .unwrap_or_else(|e| panic!("{e}"));

        assert_eq!(next_event(&mut rx).await, SessionEvent::ConnectionOpened);

        let SessionEvent::MessageReceived(audio) = next_event(&mut rx).await else {
            panic!("expected audio message");
        };
        assert_eq!(audio.audio(), Some("AAA="));

        let SessionEvent::MessageReceived(call) = next_event(&mut rx).await else {
            panic!("expected tool call message");
        };
        assert_eq!(call.tool_calls()[0].name, "reportEmergency");

        transport
            .send_realtime_input(MediaBlob {
                mime_type: "audio/pcm;rate=16000".to_string(),
                data: "AAAA".to_string(),
            })
            .unwrap_or_else(|e| panic!("{e}"));

        assert_eq!(
            next_event(&mut rx).await,
            SessionEvent::ConnectionClosed { reason: None }
        );
        server.await.unwrap_or_else(|e| panic!("{e}"));
    }

    #[tokio::test]
    async fn first_write_failure_ends_the_connection() {
        let writer = futures_util::sink::unfold((), |(), _msg: Message| async {
            Err::<(), _>(WsError::ConnectionClosed)
        });
        let reader = futures_util::stream::pending::<std::result::Result<Message, WsError>>();

        let (transport, outbound_rx) = LiveTransport::new();
        for _ in 0..3 {
            transport
                .send_realtime_input(MediaBlob {
                    mime_type: "audio/pcm;rate=16000".to_string(),
                    data: "AAAA".to_string(),
                })
                .unwrap_or_else(|e| panic!("{e}"));
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::time::timeout(
            Duration::from_secs(5),
            pump(writer, reader, outbound_rx, &EventSender::new(tx)),
        )
        .await
        .unwrap_or_else(|_| panic!("pump kept running after a failed write"));

        assert!(matches!(
            next_event(&mut rx).await,
            SessionEvent::ConnectionError(_)
        ));
        assert!(rx.try_recv().is_err());
        assert!(matches!(
            transport.send_realtime_input(MediaBlob {
                mime_type: "audio/pcm;rate=16000".to_string(),
                data: String::new(),
            }),
            Err(LifelineError::Send(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_endpoint_reports_connection_error() {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        let addr = listener.local_addr().unwrap_or_else(|e| panic!("{e}"));
        drop(listener);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut connector = LiveConnector {
            endpoint: format!("ws://{addr}"),
            api_key: "test".to_string(),
        };
        let _transport = connector
            .open(request(), EventSender::new(tx))
            .unwrap_or_else(|e| panic!("{e}"));

        assert!(matches!(
            next_event(&mut rx).await,
            SessionEvent::ConnectionError(_)
        ));
    }
}
