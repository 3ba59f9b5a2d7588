//! Server network layer: UDP transport and routing of sessions to rooms.
//!
//! The main loop owns the `RoomRegistry` and turns datagrams into room
//! messages. Rooms never touch the socket; they push `GameMessage`s to the
//! sender task, which resolves session ids to addresses.

use crate::client_manager::ClientManager;
use crate::room::{RoomContext, RoomMessage, RoomRegistry};
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{JoinRequest, Packet, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};

/// Messages sent from network tasks to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    ClientTimeout { client_id: u32, map: String },
    Shutdown,
}

/// Messages sent from rooms (and the main loop) to the sender task
#[derive(Debug)]
pub enum GameMessage {
    /// Deliver to a live session; dropped silently if the session is gone.
    SendPacket { packet: Packet, client_id: u32 },
    /// Deliver to a raw address, used before a session exists.
    SendTo { packet: Packet, addr: SocketAddr },
    /// Forget the session once everything queued before this has gone out.
    DropClient { client_id: u32 },
}

/// Transport settings that are not game rules.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub max_clients: usize,
    pub default_map: String,
    pub heartbeat_timeout: Duration,
}

/// Main server coordinating the socket, sessions and rooms
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    rooms: RoomRegistry,
    settings: ServerSettings,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: Option<mpsc::UnboundedReceiver<GameMessage>>,
}

impl Server {
    pub async fn new(
        addr: &str,
        settings: ServerSettings,
        context: RoomContext,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new(settings.max_clients))),
            rooms: RoomRegistry::new(context, game_tx.clone()),
            settings,
            server_tx,
            server_rx,
            game_tx,
            game_rx: Some(game_rx),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Sender for stopping the main loop from outside.
    pub fn control(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 4096];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => match deserialize::<Packet>(&buffer[..len]) {
                        Ok(packet) => {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        }
                        Err(_) => warn!("Failed to deserialize packet from {}", addr),
                    },
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes the outgoing packet queue
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let clients = Arc::clone(&self.clients);
        let Some(mut game_rx) = self.game_rx.take() else {
            return;
        };

        tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                match message {
                    GameMessage::SendPacket { packet, client_id } => {
                        let addr = clients.read().await.get_addr(client_id);
                        match addr {
                            Some(addr) => {
                                if let Err(e) = send_packet_impl(&socket, &packet, addr).await {
                                    error!("Failed to send to client {}: {}", client_id, e);
                                }
                            }
                            None => debug!("Dropping packet for closed session {}", client_id),
                        }
                    }
                    GameMessage::SendTo { packet, addr } => {
                        if let Err(e) = send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    GameMessage::DropClient { client_id } => {
                        clients.write().await.remove_client(&client_id);
                    }
                }
            }
        });
    }

    /// Spawns task that monitors session heartbeats
    fn spawn_timeout_checker(&self) {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();
        let timeout = self.settings.heartbeat_timeout;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = clients.write().await.check_timeouts(timeout);

                for client in timed_out {
                    info!("Session {} ({}) timed out", client.id, client.identity);
                    let message = ServerMessage::ClientTimeout {
                        client_id: client.id,
                        map: client.map,
                    };
                    if let Err(e) = server_tx.send(message) {
                        error!("Failed to send timeout message: {}", e);
                        return;
                    }
                }
            }
        });
    }

    fn send_to(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.game_tx.send(GameMessage::SendTo { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn refuse(&self, addr: SocketAddr, reason: impl Into<String>) {
        self.send_to(
            Packet::Disconnected {
                reason: reason.into(),
            },
            addr,
        );
    }

    fn route(&self, map: &str, message: RoomMessage) {
        match self.rooms.get(map) {
            Some(room) => {
                if !room.send(message) {
                    warn!("Room for {} stopped, message discarded", map);
                }
            }
            None => warn!("No running room for {}", map),
        }
    }

    /// Processes incoming packets and forwards them to rooms
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Connect {
                client_version,
                join,
            } => self.handle_connect(client_version, join, addr).await,

            Packet::Heartbeat { .. } => {
                let mut clients = self.clients.write().await;
                if let Some(client_id) = clients.find_client_by_addr(addr) {
                    clients.touch(client_id);
                }
            }

            Packet::Intent(intent) => {
                let session = {
                    let mut clients = self.clients.write().await;
                    clients.find_client_by_addr(addr).and_then(|client_id| {
                        clients.touch(client_id);
                        clients.get(client_id).map(|c| (client_id, c.map.clone()))
                    })
                };

                match session {
                    Some((client_id, map)) => {
                        self.route(&map, RoomMessage::Intent { client_id, intent })
                    }
                    None => debug!("Intent from unknown address {}", addr),
                }
            }

            Packet::Disconnect => {
                let removed = {
                    let mut clients = self.clients.write().await;
                    clients
                        .find_client_by_addr(addr)
                        .and_then(|client_id| clients.remove_client(&client_id))
                };

                if let Some(client) = removed {
                    self.route(
                        &client.map,
                        RoomMessage::Leave {
                            client_id: client.id,
                        },
                    );
                }
            }

            _ => {
                warn!("Unexpected packet type from client at {}", addr);
            }
        }
    }

    async fn handle_connect(&mut self, client_version: u32, mut join: JoinRequest, addr: SocketAddr) {
        info!(
            "Client {} connecting from {} (version: {})",
            join.identity, addr, client_version
        );

        if client_version != PROTOCOL_VERSION {
            self.refuse(addr, "Unsupported client version");
            return;
        }

        // A fresh connect from a known address replaces its old session. The
        // room keeps the player through grace so the join below resumes it.
        let existing = {
            let mut clients = self.clients.write().await;
            clients
                .find_client_by_addr(addr)
                .and_then(|client_id| clients.remove_client(&client_id))
        };
        if let Some(client) = existing {
            info!("Replacing session {} from {}", client.id, addr);
            self.route(
                &client.map,
                RoomMessage::ConnectionLost {
                    client_id: client.id,
                },
            );
        }

        if join.map.trim().is_empty() {
            join.map = self.settings.default_map.clone();
        }
        let room = match self.rooms.get_or_create(&join.map) {
            Ok(room) => room,
            Err(e) => {
                warn!("Refusing {}: {}", join.identity, e);
                self.refuse(addr, e.to_string());
                return;
            }
        };

        let client_id = {
            let mut clients = self.clients.write().await;
            clients.add_client(addr, &join.identity, &join.map)
        };
        let Some(client_id) = client_id else {
            self.refuse(addr, "Server full");
            return;
        };

        self.send_to(Packet::Connected { client_id }, addr);
        if !room.send(RoomMessage::Join {
            client_id,
            request: join,
        }) {
            error!("Room {} is not running", room.map);
            self.clients.write().await.remove_client(&client_id);
            self.refuse(addr, "Room unavailable");
        }
    }

    /// Main server loop
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        info!("Server started successfully");

        loop {
            match self.server_rx.recv().await {
                Some(ServerMessage::PacketReceived { packet, addr }) => {
                    self.handle_packet(packet, addr).await;
                }
                Some(ServerMessage::ClientTimeout { client_id, map }) => {
                    self.route(&map, RoomMessage::ConnectionLost { client_id });
                }
                Some(ServerMessage::Shutdown) | None => {
                    info!("Server shutting down");
                    break;
                }
            }
        }

        self.shutdown();
        Ok(())
    }

    /// Stops every room. Safe to call more than once.
    pub fn shutdown(&mut self) {
        self.rooms.shutdown();
    }
}

async fn send_packet_impl(
    socket: &UdpSocket,
    packet: &Packet,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error>> {
    let data = serialize(packet)?;
    socket.send_to(&data, addr).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn test_server_message_creation() {
        let packet = Packet::Heartbeat { timestamp: 12 };
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 8080);

        let msg = ServerMessage::PacketReceived {
            packet: packet.clone(),
            addr,
        };

        match msg {
            ServerMessage::PacketReceived { packet: p, addr: a } => {
                assert_eq!(a, addr);
                assert_eq!(p, packet);
            }
            _ => panic!("Unexpected message type"),
        }
    }

    #[test]
    fn test_client_timeout_message() {
        let msg = ServerMessage::ClientTimeout {
            client_id: 42,
            map: "meadow".to_string(),
        };

        match msg {
            ServerMessage::ClientTimeout { client_id, map } => {
                assert_eq!(client_id, 42);
                assert_eq!(map, "meadow");
            }
            _ => panic!("Unexpected message type"),
        }
    }

    #[test]
    fn test_game_message_send_packet() {
        let msg = GameMessage::SendPacket {
            packet: Packet::Connected { client_id: 123 },
            client_id: 123,
        };

        match msg {
            GameMessage::SendPacket { packet, client_id } => {
                assert_eq!(client_id, 123);
                assert_eq!(packet, Packet::Connected { client_id: 123 });
            }
            _ => panic!("Unexpected message type"),
        }
    }

    #[test]
    fn test_channel_preserves_order() {
        let (tx, mut rx) = mpsc::unbounded_channel::<GameMessage>();
        tx.send(GameMessage::SendPacket {
            packet: Packet::Kicked {
                reason: "bye".to_string(),
            },
            client_id: 5,
        })
        .unwrap();
        tx.send(GameMessage::DropClient { client_id: 5 }).unwrap();

        assert!(matches!(
            rx.try_recv().unwrap(),
            GameMessage::SendPacket { client_id: 5, .. }
        ));
        assert!(matches!(
            rx.try_recv().unwrap(),
            GameMessage::DropClient { client_id: 5 }
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_packet_impl_roundtrip() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let packet = Packet::Notice {
            message: "hello".to_string(),
        };

        send_packet_impl(&server, &packet, client.local_addr().unwrap())
            .await
            .unwrap();

        let mut buf = [0u8; 1024];
        let (len, from) = client.recv_from(&mut buf).await.unwrap();
        assert_eq!(from, server.local_addr().unwrap());
        assert_eq!(deserialize::<Packet>(&buf[..len]).unwrap(), packet);
    }
}
