use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::commands::{
    CommandFrame, OpenUrlPayload, SetImagePayload, SetStatePayload, SetTitlePayload, Target,
    TargetRepr,
};
use crate::error::Error;
use crate::events::Event;
use crate::registration::RegistrationParams;

/// Handle for sending commands to the host.
///
/// All writers share one mpsc channel feeding a single socket-writer task,
/// so command frames never interleave mid-frame.
#[derive(Debug, Clone)]
pub struct CommandSink {
    tx: mpsc::UnboundedSender<String>,
}

impl CommandSink {
    /// Wrap an existing channel. Tests use this to capture outbound frames
    /// without a live socket.
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self { tx }
    }

    fn send<P: Serialize>(&self, frame: &CommandFrame<'_, P>) -> Result<(), Error> {
        let json = serde_json::to_string(frame)?;
        self.tx
            .send(json)
            .map_err(|_| Error::CommandChannelClosed)
    }

    /// Open a URL in the user's default browser. Plugin-scoped, no context.
    pub fn open_url(&self, url: &str) -> Result<(), Error> {
        self.send(&CommandFrame {
            event: "openUrl",
            context: None,
            payload: OpenUrlPayload { url },
        })
    }

    /// A command handle bound to one button context.
    pub fn for_context(&self, context: impl Into<String>) -> Client {
        Client {
            sink: self.clone(),
            context: context.into(),
        }
    }
}

/// Command handle bound to a single button context.
#[derive(Debug, Clone)]
pub struct Client {
    sink: CommandSink,
    context: String,
}

impl Client {
    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn sink(&self) -> &CommandSink {
        &self.sink
    }

    pub fn set_title(&self, title: &str) -> Result<(), Error> {
        self.sink.send(&CommandFrame {
            event: "setTitle",
            context: Some(&self.context),
            payload: SetTitlePayload {
                title,
                target: TargetRepr(Target::HardwareAndSoftware),
            },
        })
    }

    pub fn set_state(&self, state: u8) -> Result<(), Error> {
        self.sink.send(&CommandFrame {
            event: "setState",
            context: Some(&self.context),
            payload: SetStatePayload { state },
        })
    }

    pub fn set_image(&self, image: &str) -> Result<(), Error> {
        self.sink.send(&CommandFrame {
            event: "setImage",
            context: Some(&self.context),
            payload: SetImagePayload {
                image,
                target: TargetRepr(Target::HardwareAndSoftware),
            },
        })
    }

    pub fn send_to_property_inspector(&self, payload: &serde_json::Value) -> Result<(), Error> {
        self.sink.send(&CommandFrame {
            event: "sendToPropertyInspector",
            context: Some(&self.context),
            payload,
        })
    }

    pub fn open_url(&self, url: &str) -> Result<(), Error> {
        self.sink.open_url(url)
    }
}

/// Receiver of decoded host events. Ends when the host closes the socket.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl EventStream {
    pub fn new(rx: mpsc::UnboundedReceiver<Event>) -> Self {
        Self { rx }
    }

    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}

/// A registered connection to the host.
pub struct Connection {
    pub commands: CommandSink,
    pub events: EventStream,
}

#[derive(Serialize)]
struct RegisterFrame<'a> {
    event: &'a str,
    uuid: &'a str,
}

/// Dial the host, perform the registration handshake, and spawn the
/// reader/writer tasks.
pub async fn connect(params: &RegistrationParams) -> Result<Connection, Error> {
    let url = format!("ws://127.0.0.1:{}", params.port);
    let (ws, _) = connect_async(&url).await?;
    let (mut write, mut read) = ws.split();

    let register = serde_json::to_string(&RegisterFrame {
        event: &params.register_event,
        uuid: &params.plugin_uuid,
    })?;
    write.send(Message::Text(register.into())).await?;

    let (command_tx, mut command_rx) = mpsc::unbounded_channel::<String>();
    let (event_tx, event_rx) = mpsc::unbounded_channel::<Event>();

    tokio::spawn(async move {
        while let Some(frame) = command_rx.recv().await {
            if let Err(e) = write.send(Message::Text(frame.into())).await {
                tracing::error!("failed to write command frame: {e}");
                break;
            }
        }
    });

    tokio::spawn(async move {
        while let Some(message) = read.next().await {
            let message = match message {
                Ok(m) => m,
                Err(e) => {
                    tracing::error!("host socket read error: {e}");
                    break;
                }
            };

            match message {
                Message::Text(txt) => match serde_json::from_str::<Event>(txt.as_str()) {
                    Ok(event) => {
                        if event_tx.send(event).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("dropping undecodable event frame: {e}");
                    }
                },
                Message::Close(_) => {
                    tracing::info!("host closed the connection");
                    break;
                }
                // Ping/pong are answered by tungstenite; binary frames are
                // not part of the protocol.
                _ => {}
            }
        }
    });

    Ok(Connection {
        commands: CommandSink::new(command_tx),
        events: EventStream::new(event_rx),
    })
}
