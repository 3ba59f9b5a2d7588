//! Authoritative room state: players, enemies, coins and the intents that
//! mutate them.
//!
//! `RoomState` is plain synchronous data. The room task in `room` owns it,
//! feeds it messages and bus events in arrival order, calls `tick` on an
//! interval and ships whatever ended up in the `Outbox`. Time is always passed
//! in as milliseconds since the room started.

use crate::bus::{Bus, BusEvent, PartyError, RoomId};
use crate::config::GameConfig;
use crate::content::{MapData, Registry};
use crate::entity::{Enemy, PendingCoin, PendingRespawn, Player, SpawnOrigin};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::geometry::{point_in_polygon, Vector2};
use shared::{Direction, Intent, JoinRequest, MapInfo, Packet, PartyTarget, RoomSnapshot};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;

const NICKNAME_MAX_LEN: usize = 16;
const RANDOM_POINT_ATTEMPTS: usize = 16;

#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    pub client_id: u32,
    pub packet: Packet,
}

/// Everything the room wants the transport to do after processing a message
/// or a tick.
#[derive(Debug, Default)]
pub struct Outbox {
    pub packets: Vec<Outgoing>,
    /// Sessions whose connection should be closed after their packets go out.
    pub drops: Vec<u32>,
}

impl Outbox {
    /// Queues a packet for one session.
    pub fn send(&mut self, client_id: u32, packet: Packet) {
        self.packets.push(Outgoing { client_id, packet });
    }

    /// Marks a session for disconnection. Duplicates are ignored.
    pub fn drop_client(&mut self, client_id: u32) {
        if !self.drops.contains(&client_id) {
            self.drops.push(client_id);
        }
    }

    /// Empties the outbox, returning everything queued so far.
    pub fn take(&mut self) -> Outbox {
        std::mem::take(self)
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty() && self.drops.is_empty()
    }

    /// Packets queued for one session, in order.
    pub fn for_client(&self, client_id: u32) -> impl Iterator<Item = &Packet> {
        self.packets
            .iter()
            .filter(move |o| o.client_id == client_id)
            .map(|o| &o.packet)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JoinError {
    #[error("Invalid credentials")]
    BadCredentials,
    #[error("Missing identity")]
    MissingIdentity,
    #[error("Already connected in another room")]
    AlreadyOnline,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LeaveReason {
    Consented,
    GraceExpired,
    Kicked(String),
}

/// Something a player's weapon can hit, for per-target cooldowns.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HitTarget {
    Enemy(u32),
    Player(String),
}

pub struct RoomState {
    pub id: RoomId,
    pub map: MapData,
    pub registry: Arc<Registry>,
    pub config: Arc<GameConfig>,
    pub(crate) bus: Arc<Bus>,
    admin_token: Option<String>,

    /// Keyed by persistent identity.
    pub players: BTreeMap<String, Player>,
    /// Live session id -> identity.
    pub(crate) sessions: HashMap<u32, String>,
    pub enemies: BTreeMap<u32, Enemy>,
    pub coins: Vec<PendingCoin>,
    pub(crate) respawns: Vec<PendingRespawn>,

    /// (attacker identity, target) -> time of the last landed hit
    pub(crate) weapon_hits: HashMap<(String, HitTarget), u64>,
    /// (enemy id, player identity) -> time of the last landed hit
    pub(crate) enemy_hits: HashMap<(u32, String), u64>,

    next_enemy_id: u32,
    next_coin_id: u32,

    pub tick: u64,
    pub(crate) last_tick_at: Option<u64>,
    pub(crate) last_snapshot_at: u64,
    pub(crate) last_party_sync_at: u64,
    pub(crate) last_profile_push_at: u64,

    pub(crate) rng: StdRng,
    pub outbox: Outbox,
}

impl RoomState {
    /// Creates an empty room for `map`.
    ///
    /// Enemies are not spawned until [`RoomState::start`] is called, and the
    /// random generator is seeded from entropy unless [`RoomState::with_seed`]
    /// overrides it.
    pub fn new(
        id: RoomId,
        map: MapData,
        registry: Arc<Registry>,
        config: Arc<GameConfig>,
        bus: Arc<Bus>,
    ) -> Self {
        Self {
            id,
            map,
            registry,
            config,
            bus,
            admin_token: None,
            players: BTreeMap::new(),
            sessions: HashMap::new(),
            enemies: BTreeMap::new(),
            coins: Vec::new(),
            respawns: Vec::new(),
            weapon_hits: HashMap::new(),
            enemy_hits: HashMap::new(),
            next_enemy_id: 0,
            next_coin_id: 0,
            tick: 0,
            last_tick_at: None,
            last_snapshot_at: 0,
            last_party_sync_at: 0,
            last_profile_push_at: 0,
            rng: StdRng::from_entropy(),
            outbox: Outbox::default(),
        }
    }

    /// Makes spawning and coin drops reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Sets the credential that grants admin privileges on join. An empty
    /// token disables privileges entirely.
    pub fn with_admin_token(mut self, token: Option<String>) -> Self {
        self.admin_token = token.filter(|t| !t.is_empty());
        self
    }

    /// Populates the initial enemies from the map's spawn definitions, or
    /// random spawns when it has none.
    pub fn start(&mut self) {
        let defined = self.map.enemy_spawns.clone();
        if defined.is_empty() {
            let types = self.map.random_spawns.enemy_types.clone();
            if !types.is_empty() {
                for _ in 0..self.map.random_spawns.count {
                    let enemy_type = &types[self.rng.gen_range(0..types.len())];
                    let position = self.random_point();
                    self.spawn_enemy(
                        enemy_type,
                        position,
                        SpawnOrigin::Random,
                        self.config.fallback_respawn_ms,
                    );
                }
            }
        } else {
            for def in defined {
                let point = self.map.bounds.clamp(Vector2::new(def.x, def.y));
                self.spawn_enemy(
                    &def.enemy_type,
                    point,
                    SpawnOrigin::Defined {
                        spawn_id: def.id,
                        point,
                    },
                    def.respawn_ms,
                );
            }
        }
        info!(
            "Room {} ({}) started with {} enemies",
            self.id,
            self.map.key,
            self.enemies.len()
        );
    }

    /// Returns the new enemy id, or `None` for an unknown enemy type.
    pub fn spawn_enemy(
        &mut self,
        enemy_type: &str,
        position: Vector2,
        origin: SpawnOrigin,
        respawn_ms: u64,
    ) -> Option<u32> {
        let Some(template) = self.registry.enemy(enemy_type) else {
            warn!(
                "Room {}: unknown enemy type `{}`, skipping spawn",
                self.id, enemy_type
            );
            return None;
        };
        self.next_enemy_id += 1;
        let id = self.next_enemy_id;
        let enemy = Enemy::spawn(id, enemy_type, template, origin, position, respawn_ms);
        self.enemies.insert(id, enemy);
        Some(id)
    }

    pub(crate) fn next_coin_id(&mut self) -> u32 {
        self.next_coin_id += 1;
        self.next_coin_id
    }

    /// A uniformly random point inside the bounds, avoiding neutral zones
    /// when possible.
    pub(crate) fn random_point(&mut self) -> Vector2 {
        let bounds = self.map.bounds;
        let mut point = self.map.spawn_point;
        for _ in 0..RANDOM_POINT_ATTEMPTS {
            point = Vector2::new(
                self.rng.gen_range(0.0..=bounds.width),
                self.rng.gen_range(0.0..=bounds.height),
            );
            if !self.in_neutral_zone(point) {
                break;
            }
        }
        point
    }

    /// Whether `point` lies inside any of the map's safe polygons.
    pub fn in_neutral_zone(&self, point: Vector2) -> bool {
        self.map
            .neutral_zones
            .iter()
            .any(|zone| point_in_polygon(point, zone))
    }

    /// Static map description sent in `Welcome`.
    pub fn map_info(&self) -> MapInfo {
        MapInfo {
            map: self.map.key.clone(),
            bounds: self.map.bounds,
            spawn_point: self.map.spawn_point,
            neutral_zones: self.map.neutral_zones.clone(),
            objects: self.map.object_views(&self.registry),
        }
    }

    pub fn player(&self, identity: &str) -> Option<&Player> {
        self.players.get(identity)
    }

    pub fn player_mut(&mut self, identity: &str) -> Option<&mut Player> {
        self.players.get_mut(identity)
    }

    /// Identity bound to a live session.
    pub fn identity_of(&self, client_id: u32) -> Option<&str> {
        self.sessions.get(&client_id).map(String::as_str)
    }

    /// Number of live sessions. Players in their grace period are not counted.
    pub fn connected_count(&self) -> usize {
        self.sessions.len()
    }

    /// Builds the periodic world snapshot.
    ///
    /// Disconnected players are included so clients can keep drawing them
    /// while the grace period runs.
    pub fn snapshot(&self, now: u64) -> RoomSnapshot {
        RoomSnapshot {
            tick: self.tick,
            timestamp: now,
            players: self.players.values().map(Player::snapshot).collect(),
            enemies: self.enemies.values().map(Enemy::snapshot).collect(),
        }
    }

    // Delivery

    /// Queues a packet for the identity's live session, if it has one.
    pub(crate) fn send_to(&mut self, identity: &str, packet: Packet) {
        if let Some(player) = self.players.get(identity) {
            if !player.disconnected {
                self.outbox.send(player.session_id, packet);
            }
        }
    }

    /// Queues a packet for every live session in the room.
    pub(crate) fn broadcast(&mut self, packet: Packet) {
        for player in self.players.values().filter(|p| !p.disconnected) {
            self.outbox.send(player.session_id, packet.clone());
        }
    }

    /// Sends a private notice.
    pub(crate) fn notice(&mut self, identity: &str, message: impl Into<String>) {
        self.send_to(
            identity,
            Packet::Notice {
                message: message.into(),
            },
        );
    }

    // Lifecycle

    /// Admits a session. Rejections queue a `Disconnected` packet and drop
    /// the session.
    pub fn join(&mut self, client_id: u32, request: &JoinRequest, now: u64) -> Result<(), JoinError> {
        let result = self.try_join(client_id, request, now);
        if let Err(e) = &result {
            warn!(
                "Room {}: rejected session {} ({}): {}",
                self.id, client_id, request.identity, e
            );
            self.outbox.send(
                client_id,
                Packet::Disconnected {
                    reason: e.to_string(),
                },
            );
            self.outbox.drop_client(client_id);
        }
        result
    }

    /// Validates credentials and identity, then either resumes a player in
    /// their grace period or creates one from the saved profile.
    fn try_join(&mut self, client_id: u32, request: &JoinRequest, now: u64) -> Result<(), JoinError> {
        let privileged = match (&request.admin_token, &self.admin_token) {
            (None, _) => false,
            (Some(given), Some(expected)) if given == expected => true,
            (Some(_), _) => return Err(JoinError::BadCredentials),
        };
        let identity = request.identity.trim();
        if identity.is_empty() {
            return Err(JoinError::MissingIdentity);
        }

        if self.players.contains_key(identity) {
            self.resume(client_id, identity, privileged);
            return Ok(());
        }
        match self.bus.room_of(identity) {
            Some(room) if room != self.id => return Err(JoinError::AlreadyOnline),
            _ => {}
        }

        let position = request
            .spawn
            .filter(|p| p.is_finite())
            .map(|p| self.map.bounds.clamp(p))
            .unwrap_or(self.map.spawn_point);
        let nickname = sanitize(&request.nickname, NICKNAME_MAX_LEN, "Adventurer");
        let skin = sanitize(&request.skin, NICKNAME_MAX_LEN, "default");

        let mut player = Player::new(client_id, identity, &nickname, &skin, position);
        player.privileged = privileged;
        if let Some(profile) = self.bus.load_profile(identity) {
            player.restore(&profile);
            debug!("Restored profile for {}", identity);
        }
        player.reset_anchor(now);
        player.last_regen_at = now;

        self.bus.attach(identity, self.id);
        self.bus.save_profile(identity, player.to_profile());
        let party = self.bus.party_of(identity);
        player.set_party(party.as_ref());

        info!(
            "Room {}: {} ({}) joined as session {} at ({:.0}, {:.0})",
            self.id, nickname, identity, client_id, position.x, position.y
        );
        self.players.insert(identity.to_string(), player);
        self.sessions.insert(client_id, identity.to_string());

        self.outbox.send(client_id, Packet::Welcome(self.map_info()));
        self.outbox.send(client_id, Packet::PartyUpdate { party: party.clone() });
        if let Some(party) = party {
            self.bus.refresh_party(&party.id);
        }
        Ok(())
    }

    /// Binds a new session to an identity already in the room. A disconnected
    /// player resumes untouched; a live duplicate loses its old session.
    fn resume(&mut self, client_id: u32, identity: &str, privileged: bool) {
        let Some(player) = self.players.get_mut(identity) else {
            return;
        };
        let previous = player.session_id;
        let was_connected = !player.disconnected;
        player.session_id = client_id;
        player.disconnected = false;
        player.privileged = privileged;
        // Invalidates any pending grace timer.
        player.grace_epoch += 1;
        let party = player.party_id.clone();

        if was_connected && previous != client_id {
            self.outbox.send(
                previous,
                Packet::Disconnected {
                    reason: "Signed in from another session".to_string(),
                },
            );
            self.outbox.drop_client(previous);
        }
        self.sessions.remove(&previous);
        self.sessions.insert(client_id, identity.to_string());
        info!(
            "Room {}: {} resumed on session {} (was {})",
            self.id, identity, client_id, previous
        );

        self.outbox.send(client_id, Packet::Welcome(self.map_info()));
        let view = self.bus.party_of(identity);
        self.outbox.send(client_id, Packet::PartyUpdate { party: view });
        if let Some(party) = party {
            self.bus.refresh_party(&party);
        }
    }

    /// Marks the session's player disconnected and returns the identity and
    /// grace epoch the caller should wait on.
    pub fn disconnect(&mut self, client_id: u32) -> Option<(String, u64)> {
        let identity = self.sessions.remove(&client_id)?;
        let player = self.players.get_mut(&identity)?;
        player.disconnected = true;
        player.is_attacking = false;
        player.grace_epoch += 1;
        info!(
            "Room {}: {} lost connection, holding for grace period",
            self.id, identity
        );
        Some((identity, player.grace_epoch))
    }

    /// Removes the player if it is still disconnected under the same epoch.
    pub fn expire_grace(&mut self, identity: &str, epoch: u64) -> bool {
        let expired = self
            .players
            .get(identity)
            .map(|p| p.disconnected && p.grace_epoch == epoch)
            .unwrap_or(false);
        if expired {
            self.remove_player(identity, LeaveReason::GraceExpired);
        }
        expired
    }

    /// Consented leave: immediate removal.
    pub fn leave(&mut self, client_id: u32) {
        if let Some(identity) = self.sessions.get(&client_id).cloned() {
            self.remove_player(&identity, LeaveReason::Consented);
        }
    }

    /// Disciplinary removal.
    ///
    /// The live session receives `Kicked` and is dropped. The profile and
    /// party membership are deleted rather than saved.
    pub fn kick(&mut self, identity: &str, reason: &str) {
        if let Some(player) = self.players.get(identity) {
            if !player.disconnected {
                let session = player.session_id;
                self.outbox.send(
                    session,
                    Packet::Kicked {
                        reason: reason.to_string(),
                    },
                );
                self.outbox.drop_client(session);
            }
        }
        self.remove_player(identity, LeaveReason::Kicked(reason.to_string()));
    }

    /// Full cleanup. Safe to call more than once.
    pub fn remove_player(&mut self, identity: &str, reason: LeaveReason) {
        let Some(player) = self.players.remove(identity) else {
            return;
        };
        if self.sessions.get(&player.session_id).map(String::as_str) == Some(identity) {
            self.sessions.remove(&player.session_id);
        }

        match self.bus.leave_party(identity) {
            Ok(()) | Err(PartyError::NotInParty) => {}
            Err(e) => warn!("Leaving party for {} failed: {}", identity, e),
        }
        match &reason {
            LeaveReason::Kicked(_) => self.bus.delete_profile(identity),
            _ => self.bus.save_profile(identity, player.to_profile()),
        }
        self.bus.detach(identity, self.id);

        self.weapon_hits.retain(|(attacker, target), _| {
            attacker != identity && *target != HitTarget::Player(identity.to_string())
        });
        self.enemy_hits.retain(|(_, target), _| target != identity);

        info!("Room {}: removed {} ({:?})", self.id, identity, reason);
    }

    // Intents

    /// Dispatches one client intent.
    ///
    /// Intents from unknown sessions are ignored. Malformed values are
    /// dropped by the individual handlers, and policy failures are answered
    /// with a private notice at most.
    pub fn handle_intent(&mut self, client_id: u32, intent: Intent, now: u64) {
        let Some(identity) = self.sessions.get(&client_id).cloned() else {
            debug!("Room {}: intent from unknown session {}", self.id, client_id);
            return;
        };
        match intent {
            Intent::Move {
                x,
                y,
                direction,
                timestamp,
            } => self.move_player(&identity, x, y, direction, timestamp, now),
            Intent::Attack { direction } => self.attack(&identity, direction, now),
            Intent::BuyWeapon { key } => self.buy_weapon(&identity, &key),
            Intent::BuyPotion => self.buy_potion(&identity),
            Intent::UsePotion => self.use_potion(&identity),
            Intent::ToggleWeapon => {
                if let Some(player) = self.players.get_mut(&identity) {
                    player.weapon_visible = !player.weapon_visible;
                }
            }
            Intent::Chat { text } => self.chat(&identity, &text),
            Intent::PartyInvite { target_id } => {
                let result = self.bus.invite(&identity, &target_id);
                self.report(&identity, result, Some("Invitation sent"));
            }
            Intent::PartyResponse { from_id, accept } => {
                let result = self.bus.respond(&identity, &from_id, accept);
                self.report(&identity, result, None);
            }
            Intent::PartyLeave => {
                let result = self.bus.leave_party(&identity);
                self.report(&identity, result, Some("You left the party"));
            }
            Intent::PartyRename { name } => {
                let result = self.bus.rename_party(&identity, &name);
                self.report(&identity, result, None);
            }
            Intent::PartyKick { target } => {
                let resolved = match target {
                    PartyTarget::Session(session) => self.sessions.get(&session).cloned(),
                    PartyTarget::Identity(target) => Some(target),
                };
                let Some(target) = resolved else {
                    self.notice(&identity, PartyError::NotMember.to_string());
                    return;
                };
                let result = self.bus.kick_from_party(&identity, &target);
                self.report(&identity, result, None);
            }
            Intent::PartyDisband => {
                let result = self.bus.disband_party(&identity);
                self.report(&identity, result, None);
            }
            Intent::AdminKick { target_id } => self.admin_kick(&identity, &target_id),
        }
    }

    /// Turns a party operation result into a notice.
    fn report(&mut self, identity: &str, result: Result<(), PartyError>, ok: Option<&str>) {
        match result {
            Ok(()) => {
                if let Some(message) = ok {
                    self.notice(identity, message);
                }
            }
            Err(e) => self.notice(identity, e.to_string()),
        }
    }

    /// Accepts the claimed position if it is reachable from the anchor in
    /// the elapsed time, otherwise moves the player as far as allowed along
    /// the same direction.
    pub fn move_player(
        &mut self,
        identity: &str,
        x: f32,
        y: f32,
        direction: Direction,
        timestamp: u64,
        now: u64,
    ) {
        let target = Vector2::new(x, y);
        if !target.is_finite() {
            debug!("Dropping non-finite move from {}", identity);
            return;
        }
        let config = Arc::clone(&self.config);
        let bounds = self.map.bounds;
        let Some(player) = self.players.get_mut(identity) else {
            return;
        };
        if player.dead {
            return;
        }

        let server_elapsed = now.saturating_sub(player.anchor_server_time);
        let elapsed = match player.anchor_timestamp {
            Some(previous) => timestamp
                .saturating_sub(previous)
                .min(server_elapsed + config.move_clock_slack_ms),
            None => server_elapsed,
        }
        .min(config.max_move_window_ms);

        let allowed =
            config.player_speed * (elapsed as f32 / 1000.0) * config.move_tolerance;
        let delta = target.sub(&player.anchor);
        let accepted = if delta.magnitude() > allowed {
            debug!(
                "Clamping move for {}: {:.1} > {:.1}",
                identity,
                delta.magnitude(),
                allowed
            );
            player.anchor.add(&delta.normalize().scale(allowed))
        } else {
            target
        };

        player.position = bounds.clamp(accepted);
        player.direction = direction;
        player.anchor = player.position;
        player.anchor_timestamp = Some(timestamp);
        player.anchor_server_time = now;
    }

    /// Starts a swing. Repeats during an active swing are ignored, and a
    /// player without a weapon is handed the starting one.
    pub fn attack(&mut self, identity: &str, direction: Direction, now: u64) {
        let starting_weapon = self.config.starting_weapon.clone();
        let Some(player) = self.players.get_mut(identity) else {
            return;
        };
        if player.dead || player.is_attacking {
            return;
        }
        player.is_attacking = true;
        player.attack_direction = direction;
        player.direction = direction;
        player.attack_started_at = now;
        if player.weapon.is_none() {
            player.weapon = Some(starting_weapon);
        }
        player.weapon_visible = true;
    }

    /// Buys and equips a weapon if the player can afford it and does not
    /// already own it. Every outcome is reported back as a notice.
    fn buy_weapon(&mut self, identity: &str, key: &str) {
        let Some(template) = self.registry.weapon(key).cloned() else {
            warn!("{} tried to buy unknown weapon `{}`", identity, key);
            self.notice(identity, "That weapon does not exist");
            return;
        };
        let Some(player) = self.players.get_mut(identity) else {
            return;
        };
        let message = if template.price == 0 {
            "That weapon is not for sale".to_string()
        } else if player.weapon.as_deref() == Some(key) {
            format!("You already own the {}", template.name)
        } else if player.gold < template.price {
            format!("The {} costs {} gold", template.name, template.price)
        } else {
            player.gold -= template.price;
            player.weapon = Some(key.to_string());
            player.weapon_visible = true;
            info!("{} bought {} for {}", identity, key, template.price);
            format!("You bought the {}", template.name)
        };
        self.notice(identity, message);
    }

    /// Trades gold for one potion.
    fn buy_potion(&mut self, identity: &str) {
        let price = self.config.potion_price;
        let Some(player) = self.players.get_mut(identity) else {
            return;
        };
        let message = if player.gold < price {
            format!("A potion costs {} gold", price)
        } else {
            player.gold -= price;
            player.potions += 1;
            format!("You now carry {} potions", player.potions)
        };
        self.notice(identity, message);
    }

    /// Consumes a potion into the heal pool. The pool drains over the
    /// following ticks rather than healing instantly.
    fn use_potion(&mut self, identity: &str) {
        let fraction = self.config.potion_heal_fraction;
        let Some(player) = self.players.get_mut(identity) else {
            return;
        };
        if player.dead {
            return;
        }
        let failure = if player.potions == 0 {
            Some("You have no potions")
        } else if player.hp >= player.max_hp {
            Some("You are already at full health")
        } else {
            None
        };
        match failure {
            Some(message) => self.notice(identity, message),
            None => {
                player.potions -= 1;
                player.heal_pool += (player.max_hp as f32 * fraction).round() as i32;
            }
        }
    }

    /// Broadcasts locally and relays to every other room through the bus.
    fn chat(&mut self, identity: &str, text: &str) {
        let message: String = text.trim().chars().take(self.config.chat_max_len).collect();
        if message.is_empty() {
            return;
        }
        let Some(nickname) = self.players.get(identity).map(|p| p.nickname.clone()) else {
            return;
        };
        self.broadcast(Packet::Chat {
            sender_id: Some(identity.to_string()),
            nickname: nickname.clone(),
            message: message.clone(),
        });
        self.bus
            .relay_chat(Some(self.id), Some(identity), &nickname, &message);
    }

    /// Privileged kick. Targets outside this room are handed to the bus.
    fn admin_kick(&mut self, identity: &str, target: &str) {
        let privileged = self
            .players
            .get(identity)
            .map(|p| p.privileged)
            .unwrap_or(false);
        if !privileged {
            warn!("{} attempted an admin kick without privileges", identity);
            return;
        }
        let reason = "Removed by an administrator";
        if self.players.contains_key(target) {
            self.kick(target, reason);
            self.notice(identity, format!("Kicked {}", target));
        } else if self.bus.kick(target, reason) {
            self.notice(identity, format!("Kicked {}", target));
        } else {
            self.notice(identity, format!("{} is offline; profile wiped", target));
        }
        info!("{} kicked {}", identity, target);
    }

    // Bus events

    /// Applies an event pushed by the bus to this room's players.
    pub fn handle_bus_event(&mut self, event: BusEvent) {
        match event {
            BusEvent::PartyChanged { identity, party } => {
                if let Some(player) = self.players.get_mut(&identity) {
                    player.set_party(party.as_ref());
                    self.send_to(&identity, Packet::PartyUpdate { party });
                }
            }
            BusEvent::PartyInvite {
                target,
                from_id,
                from_nickname,
            } => self.send_to(
                &target,
                Packet::PartyInvite {
                    from_id,
                    from_nickname,
                },
            ),
            BusEvent::Chat {
                sender_id,
                nickname,
                message,
            } => self.broadcast(Packet::Chat {
                sender_id,
                nickname,
                message,
            }),
            BusEvent::Notice { identity, message } => self.notice(&identity, message),
            BusEvent::PlayerDied { identity, nickname } => {
                self.broadcast(Packet::PlayerDied { identity, nickname })
            }
            BusEvent::Leaderboard(entries) => self.broadcast(Packet::Leaderboard { entries }),
            BusEvent::Kick { identity, reason } => self.kick(&identity, &reason),
        }
    }

    // Death and respawn

    /// Marks the player dead, schedules the respawn and announces the death
    /// to every room.
    pub(crate) fn kill_player(&mut self, identity: &str, now: u64) {
        let respawn_ms = self.config.player_respawn_ms;
        let Some(player) = self.players.get_mut(identity) else {
            return;
        };
        player.hp = 0;
        player.dead = true;
        player.is_attacking = false;
        player.respawn_at = Some(now + respawn_ms);
        let nickname = player.nickname.clone();
        info!("Room {}: {} died", self.id, nickname);
        self.bus.announce_death(identity, &nickname);
    }

    /// Revives at the map spawn point with full health and a fresh movement
    /// anchor.
    pub(crate) fn respawn_player(&mut self, identity: &str, now: u64) {
        let spawn = self.map.spawn_point;
        if let Some(player) = self.players.get_mut(identity) {
            player.dead = false;
            player.respawn_at = None;
            player.hp = player.max_hp;
            player.heal_pool = 0;
            player.position = spawn;
            player.last_damage_at = None;
            player.last_regen_at = now;
            player.reset_anchor(now);
            debug!("Room {}: {} respawned", self.id, identity);
        }
    }
}

/// Trimmed and truncated, or `fallback` when nothing is left.
fn sanitize(value: &str, max_len: usize, fallback: &str) -> String {
    let trimmed: String = value.trim().chars().take(max_len).collect();
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed
    }
}
