//! Room tasks and the registry that creates them on demand.
//!
//! Each room runs as one tokio task that owns its `RoomState` outright. Client
//! messages, coordination bus events, grace timers and the tick interval are
//! all funnelled through a single `select!`, so the state never needs a lock.
//! After every event the room's outbox is handed to the network sender.

use crate::bus::{Bus, BusEvent, RoomId};
use crate::config::GameConfig;
use crate::content::{ContentError, MapSource, Registry};
use crate::game::{LeaveReason, Outgoing, RoomState};
use crate::network::GameMessage;
use log::{debug, error, info, warn};
use shared::{Intent, JoinRequest};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};

/// Messages delivered to a room task.
#[derive(Debug)]
pub enum RoomMessage {
    Join {
        client_id: u32,
        request: JoinRequest,
    },
    Intent {
        client_id: u32,
        intent: Intent,
    },
    /// The client said goodbye; its player is removed immediately.
    Leave {
        client_id: u32,
    },
    /// The transport stopped hearing from the client; its player is held
    /// for the grace period.
    ConnectionLost {
        client_id: u32,
    },
    GraceExpired {
        identity: String,
        epoch: u64,
    },
    Shutdown,
}

/// Cheap handle for sending messages to a running room.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    pub id: RoomId,
    pub map: String,
    sender: mpsc::UnboundedSender<RoomMessage>,
}

impl RoomHandle {
    /// Returns false once the room task has stopped.
    pub fn send(&self, message: RoomMessage) -> bool {
        self.sender.send(message).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

struct Room {
    state: RoomState,
    inbox: mpsc::UnboundedReceiver<RoomMessage>,
    /// Kept so grace timers can post back into the inbox.
    timers: mpsc::UnboundedSender<RoomMessage>,
    bus_events: mpsc::UnboundedReceiver<BusEvent>,
    outbound: mpsc::UnboundedSender<GameMessage>,
    started: Instant,
}

impl Room {
    fn now(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    async fn run(mut self) {
        let mut ticker = interval(Duration::from_millis(self.state.config.tick_ms.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("Room {} ({}) started", self.state.id, self.state.map.key);

        loop {
            tokio::select! {
                message = self.inbox.recv() => match message {
                    Some(RoomMessage::Shutdown) | None => break,
                    Some(message) => self.handle_message(message),
                },
                Some(event) = self.bus_events.recv() => {
                    self.state.handle_bus_event(event);
                },
                _ = ticker.tick() => {
                    let now = self.now();
                    self.state.tick(now);
                    if self.state.tick % 200 == 0 && self.state.connected_count() > 0 {
                        debug!(
                            "Room {} tick {}: {} connected, {} enemies",
                            self.state.id,
                            self.state.tick,
                            self.state.connected_count(),
                            self.state.enemies.len()
                        );
                    }
                },
            }
            self.flush();
        }

        let identities: Vec<String> = self.state.players.keys().cloned().collect();
        for identity in identities {
            self.state.remove_player(&identity, LeaveReason::Consented);
        }
        self.flush();
        self.state.bus.unregister_room(self.state.id);
        info!("Room {} stopped", self.state.id);
    }

    fn handle_message(&mut self, message: RoomMessage) {
        let now = self.now();
        match message {
            RoomMessage::Join { client_id, request } => {
                if let Err(e) = self.state.join(client_id, &request, now) {
                    info!(
                        "Room {}: join of {} refused: {}",
                        self.state.id, request.identity, e
                    );
                }
            }
            RoomMessage::Intent { client_id, intent } => {
                self.state.handle_intent(client_id, intent, now);
            }
            RoomMessage::Leave { client_id } => self.state.leave(client_id),
            RoomMessage::ConnectionLost { client_id } => {
                if let Some((identity, epoch)) = self.state.disconnect(client_id) {
                    self.schedule_grace(identity, epoch);
                }
            }
            RoomMessage::GraceExpired { identity, epoch } => {
                if self.state.expire_grace(&identity, epoch) {
                    info!(
                        "Room {}: grace period for {} ran out",
                        self.state.id, identity
                    );
                }
            }
            RoomMessage::Shutdown => {}
        }
    }

    fn schedule_grace(&self, identity: String, epoch: u64) {
        let inbox = self.timers.clone();
        let grace = Duration::from_millis(self.state.config.grace_period_ms);
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let _ = inbox.send(RoomMessage::GraceExpired { identity, epoch });
        });
    }

    /// Hands queued packets and session drops to the network sender.
    fn flush(&mut self) {
        let outbox = self.state.outbox.take();
        let messages = outbox
            .packets
            .into_iter()
            .map(|Outgoing { client_id, packet }| GameMessage::SendPacket { packet, client_id })
            .chain(
                outbox
                    .drops
                    .into_iter()
                    .map(|client_id| GameMessage::DropClient { client_id }),
            );
        for message in messages {
            if let Err(e) = self.outbound.send(message) {
                error!("Room {}: failed to queue outgoing message: {}", self.state.id, e);
                return;
            }
        }
    }
}

/// Shared inputs every room is built from.
#[derive(Clone)]
pub struct RoomContext {
    pub bus: Arc<Bus>,
    pub maps: Arc<dyn MapSource>,
    pub registry: Arc<Registry>,
    pub config: Arc<GameConfig>,
    pub admin_token: Option<String>,
}

/// Running rooms by map key. A room is started the first time a client asks
/// for its map.
pub struct RoomRegistry {
    rooms: HashMap<String, RoomHandle>,
    context: RoomContext,
    outbound: mpsc::UnboundedSender<GameMessage>,
}

impl RoomRegistry {
    pub fn new(context: RoomContext, outbound: mpsc::UnboundedSender<GameMessage>) -> Self {
        Self {
            rooms: HashMap::new(),
            context,
            outbound,
        }
    }

    pub fn get(&self, map: &str) -> Option<&RoomHandle> {
        self.rooms.get(map).filter(|room| !room.is_closed())
    }

    /// Returns the room for `map`, starting it if needed. Must be called from
    /// within a tokio runtime.
    pub fn get_or_create(&mut self, map: &str) -> Result<RoomHandle, ContentError> {
        if let Some(room) = self.get(map) {
            return Ok(room.clone());
        }

        let data = self.context.maps.load_map(map)?;
        let (bus_tx, bus_events) = mpsc::unbounded_channel();
        let id = self.context.bus.register_room(bus_tx);
        let mut state = RoomState::new(
            id,
            data,
            Arc::clone(&self.context.registry),
            Arc::clone(&self.context.config),
            Arc::clone(&self.context.bus),
        )
        .with_admin_token(self.context.admin_token.clone());
        state.start();

        let (sender, inbox) = mpsc::unbounded_channel();
        let room = Room {
            state,
            inbox,
            timers: sender.clone(),
            bus_events,
            outbound: self.outbound.clone(),
            started: Instant::now(),
        };
        tokio::spawn(room.run());

        let handle = RoomHandle {
            id,
            map: map.to_string(),
            sender,
        };
        self.rooms.insert(map.to_string(), handle.clone());
        Ok(handle)
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Asks every room to save its players and stop.
    pub fn shutdown(&mut self) {
        for (map, room) in self.rooms.drain() {
            if !room.send(RoomMessage::Shutdown) {
                warn!("Room for {} already stopped", map);
            }
        }
    }
}
