// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! OSC transport: a UDP sender per engine and async receivers feeding the app loop.

use pushpin_osc::{Message, LOCALHOST};
use rosc::{decoder, encoder, OscMessage, OscPacket, OscType};
use std::collections::HashMap;
use std::net::{SocketAddr, UdpSocket};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// Largest datagram accepted from a peer.
const RECV_BUFFER: usize = decoder::MTU;

#[derive(Debug, Error)]
pub enum OscError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("OSC encode error: {0}")]
    Encode(#[from] rosc::OscError),
    #[error("Invalid address: {0}")]
    InvalidAddress(#[from] std::net::AddrParseError),
}

fn local_addr(port: u16) -> Result<SocketAddr, OscError> {
    Ok(format!("{}:{}", LOCALHOST, port).parse()?)
}

/// Sends OSC messages to one engine.
#[derive(Debug)]
pub struct OscClient {
    socket: UdpSocket,
    target: SocketAddr,
}

impl OscClient {
    /// Client sending to `127.0.0.1:<port>`.
    pub fn new(port: u16) -> Result<Self, OscError> {
        let socket = UdpSocket::bind(local_addr(0)?)?;
        Ok(Self {
            socket,
            target: local_addr(port)?,
        })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    pub fn send_raw(&self, addr: &str, args: Vec<OscType>) -> Result<(), OscError> {
        let packet = OscPacket::Message(OscMessage {
            addr: addr.to_string(),
            args,
        });
        let bytes = encoder::encode(&packet)?;
        self.socket.send_to(&bytes, self.target)?;
        Ok(())
    }

    pub fn send(&self, message: &Message) -> Result<(), OscError> {
        trace!("-> {} {:?}", message.address, message.value);
        let osc = message.to_osc();
        self.send_raw(&osc.addr, osc.args)
    }

    /// Send several messages, logging failures instead of stopping.
    pub fn send_all<'a>(&self, messages: impl IntoIterator<Item = &'a Message>) {
        for message in messages {
            if let Err(e) = self.send(message) {
                warn!("Failed to send {} to {}: {}", message.address, self.target, e);
            }
        }
    }
}

/// Maps exact OSC addresses to handler targets.
#[derive(Debug, Clone)]
pub struct Dispatcher<T> {
    routes: HashMap<String, Vec<T>>,
}

impl<T> Default for Dispatcher<T> {
    fn default() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }
}

impl<T: PartialEq> Dispatcher<T> {
    pub fn map(&mut self, address: impl Into<String>, target: T) {
        let targets = self.routes.entry(address.into()).or_default();
        if !targets.contains(&target) {
            targets.push(target);
        }
    }

    pub fn targets(&self, address: &str) -> &[T] {
        self.routes.get(address).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn clear(&mut self) {
        self.routes.clear();
    }
}

/// Flatten a packet into its messages, descending into bundles.
pub fn flatten_packet(packet: OscPacket) -> Vec<OscMessage> {
    match packet {
        OscPacket::Message(msg) => vec![msg],
        OscPacket::Bundle(bundle) => bundle.content.into_iter().flat_map(flatten_packet).collect(),
    }
}

/// A message received on one of the app's sockets.
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound<S> {
    pub source: S,
    pub message: OscMessage,
}

/// Bind `127.0.0.1:<port>` for [`listen`].
pub async fn bind(port: u16) -> Result<tokio::net::UdpSocket, OscError> {
    let socket = tokio::net::UdpSocket::bind(local_addr(port)?).await?;
    info!("Listening for OSC on port {}", port);
    Ok(socket)
}

/// Receive packets forever, forwarding each message tagged with `source`.
///
/// Returns when the receiving side of `tx` is dropped.
pub async fn listen<S: Clone>(
    socket: tokio::net::UdpSocket,
    source: S,
    tx: mpsc::UnboundedSender<Inbound<S>>,
) {
    let mut buf = vec![0u8; RECV_BUFFER];
    loop {
        let size = match socket.recv_from(&mut buf).await {
            Ok((size, _peer)) => size,
            Err(e) => {
                warn!("OSC receive failed: {}", e);
                continue;
            }
        };
        let packet = match decoder::decode_udp(&buf[..size]) {
            Ok((_rest, packet)) => packet,
            Err(e) => {
                debug!("Dropping undecodable OSC packet: {}", e);
                continue;
            }
        };
        for message in flatten_packet(packet) {
            trace!("<- {} {:?}", message.addr, message.args);
            let inbound = Inbound {
                source: source.clone(),
                message,
            };
            if tx.send(inbound).is_err() {
                debug!("OSC receiver closed, stopping listener");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pushpin_osc::MessageValue;
    use rosc::{OscBundle, OscTime};

    #[test]
    fn test_dispatcher_exact_match() {
        let mut d = Dispatcher::default();
        d.map("/a", 1);
        d.map("/a", 2);
        d.map("/a", 1);
        d.map("/b", 3);
        assert_eq!(d.targets("/a"), &[1, 2]);
        assert_eq!(d.targets("/b"), &[3]);
        assert!(d.targets("/a/b").is_empty());
        assert_eq!(d.len(), 2);
        d.clear();
        assert!(d.is_empty());
    }

    #[test]
    fn test_flatten_nested_bundle() {
        let msg = |addr: &str| {
            OscPacket::Message(OscMessage {
                addr: addr.to_string(),
                args: vec![],
            })
        };
        let time = OscTime {
            seconds: 0,
            fractional: 1,
        };
        let packet = OscPacket::Bundle(OscBundle {
            timetag: time,
            content: vec![
                msg("/one"),
                OscPacket::Bundle(OscBundle {
                    timetag: time,
                    content: vec![msg("/two"), msg("/three")],
                }),
            ],
        });
        let addrs: Vec<String> = flatten_packet(packet).into_iter().map(|m| m.addr).collect();
        assert_eq!(addrs, vec!["/one", "/two", "/three"]);
    }

    #[tokio::test]
    async fn test_client_reaches_listener() {
        let socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(listen(socket, "engine", tx));

        let client = OscClient::new(port).unwrap();
        client
            .send(&Message::new("/param/a/osc/1/param2", Some(MessageValue::Float(0.25))))
            .unwrap();

        let inbound = rx.recv().await.unwrap();
        assert_eq!(inbound.source, "engine");
        assert_eq!(inbound.message.addr, "/param/a/osc/1/param2");
        assert_eq!(inbound.message.args, vec![OscType::Float(0.25)]);
        task.abort();
    }
}
