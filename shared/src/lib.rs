//! Wire protocol and pure game rules shared between the authoritative server
//! and clients.
//!
//! Everything that both sides must compute identically lives here: melee hit
//! geometry, the experience curve, reward splitting and the 2D helpers they
//! use. The `Packet` enum is the complete set of datagrams exchanged over UDP,
//! encoded with bincode.

pub mod combat;
pub mod geometry;
pub mod leveling;
pub mod reward;

use geometry::{Bounds, Vector2};
use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: u32 = 1;
pub const PLAYER_SPEED: f32 = 300.0;
pub const DEFAULT_MAX_HEALTH: i32 = 100;

/// Four-way facing used by players, enemies and hitboxes.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Direction {
    Up,
    #[default]
    Down,
    Left,
    Right,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    // Client to server
    Connect {
        client_version: u32,
        join: JoinRequest,
    },
    Heartbeat {
        timestamp: u64,
    },
    Intent(Intent),
    Disconnect,

    // Server to client
    Connected {
        client_id: u32,
    },
    Welcome(MapInfo),
    Snapshot(RoomSnapshot),
    Chat {
        sender_id: Option<String>,
        nickname: String,
        message: String,
    },
    Notice {
        message: String,
    },
    CoinDrop {
        id: u32,
        x: f32,
        y: f32,
    },
    CoinCollected {
        id: u32,
    },
    PartyInvite {
        from_id: String,
        from_nickname: String,
    },
    PartyUpdate {
        party: Option<PartyView>,
    },
    Leaderboard {
        entries: Vec<LeaderboardEntry>,
    },
    PlayerDied {
        identity: String,
        nickname: String,
    },
    Kicked {
        reason: String,
    },
    Disconnected {
        reason: String,
    },
}

/// Join-time parameters carried by `Packet::Connect`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct JoinRequest {
    /// Persistent identity, stable across reconnects.
    pub identity: String,
    pub nickname: String,
    pub skin: String,
    pub map: String,
    pub spawn: Option<Vector2>,
    pub admin_token: Option<String>,
}

/// Discrete client intent, always applied to the sender's own player.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Intent {
    Move {
        x: f32,
        y: f32,
        direction: Direction,
        timestamp: u64,
    },
    Attack {
        direction: Direction,
    },
    BuyWeapon {
        key: String,
    },
    BuyPotion,
    UsePotion,
    ToggleWeapon,
    Chat {
        text: String,
    },
    PartyInvite {
        target_id: String,
    },
    PartyResponse {
        from_id: String,
        accept: bool,
    },
    PartyLeave,
    PartyRename {
        name: String,
    },
    PartyKick {
        target: PartyTarget,
    },
    PartyDisband,
    AdminKick {
        target_id: String,
    },
}

/// A party kick may name a member by live session id or persistent identity.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum PartyTarget {
    Session(u32),
    Identity(String),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RosterEntry {
    pub identity: String,
    pub nickname: String,
    pub level: u32,
    pub hp: i32,
    pub max_hp: i32,
    pub online: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PartyView {
    pub id: String,
    pub name: String,
    pub owner: String,
    pub members: Vec<RosterEntry>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LeaderboardEntry {
    pub identity: String,
    pub nickname: String,
    pub level: u32,
    pub xp: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PlayerSnapshot {
    pub session_id: u32,
    pub identity: String,
    pub nickname: String,
    pub skin: String,
    pub x: f32,
    pub y: f32,
    pub direction: Direction,
    pub hp: i32,
    pub max_hp: i32,
    pub level: u32,
    pub xp: u64,
    pub combat_bonus: i32,
    pub weapon: Option<String>,
    pub weapon_visible: bool,
    pub gold: u64,
    pub potions: u32,
    pub heal_pool: i32,
    pub dead: bool,
    pub is_attacking: bool,
    pub attack_direction: Direction,
    pub party_id: Option<String>,
    pub party_owner: bool,
    pub party_name: Option<String>,
    pub party_roster: Vec<RosterEntry>,
    pub disconnected: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct EnemySnapshot {
    pub id: u32,
    pub enemy_type: String,
    pub x: f32,
    pub y: f32,
    pub direction: Direction,
    pub hp: i32,
    pub max_hp: i32,
    pub is_attacking: bool,
    pub attack_direction: Direction,
    pub dead: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RoomSnapshot {
    pub tick: u64,
    pub timestamp: u64,
    pub players: Vec<PlayerSnapshot>,
    pub enemies: Vec<EnemySnapshot>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PlacedObjectView {
    pub object_type: String,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Static map layout sent once after a successful join.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MapInfo {
    pub map: String,
    pub bounds: Bounds,
    pub spawn_point: Vector2,
    pub neutral_zones: Vec<Vec<Vector2>>,
    pub objects: Vec<PlacedObjectView>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bincode::{deserialize, serialize};

    fn join() -> JoinRequest {
        JoinRequest {
            identity: "id-1".to_string(),
            nickname: "Ayla".to_string(),
            skin: "knight".to_string(),
            map: "meadow".to_string(),
            spawn: Some(Vector2::new(10.0, 20.0)),
            admin_token: None,
        }
    }

    #[test]
    fn test_packet_serialization_connect() {
        let packet = Packet::Connect {
            client_version: PROTOCOL_VERSION,
            join: join(),
        };
        let serialized = serialize(&packet).unwrap();
        let deserialized: Packet = deserialize(&serialized).unwrap();
        assert_eq!(deserialized, packet);
    }

    #[test]
    fn test_packet_serialization_move_intent() {
        let packet = Packet::Intent(Intent::Move {
            x: 100.0,
            y: 130.0,
            direction: Direction::Down,
            timestamp: 456789,
        });
        let serialized = serialize(&packet).unwrap();
        match deserialize::<Packet>(&serialized).unwrap() {
            Packet::Intent(Intent::Move {
                x,
                y,
                direction,
                timestamp,
            }) => {
                assert_eq!(x, 100.0);
                assert_eq!(y, 130.0);
                assert_eq!(direction, Direction::Down);
                assert_eq!(timestamp, 456789);
            }
            other => panic!("Wrong packet type after deserialization: {:?}", other),
        }
    }

    #[test]
    fn test_out_of_range_direction_rejected() {
        let packet = Packet::Intent(Intent::Attack {
            direction: Direction::Right,
        });
        let mut bytes = serialize(&packet).unwrap();
        // The Direction tag is the trailing little-endian u32.
        let last = bytes.len() - 1;
        bytes[last] = 9;
        assert!(deserialize::<Packet>(&bytes).is_err());
    }

    #[test]
    fn test_truncated_packet_rejected() {
        let bytes = serialize(&Packet::Connect {
            client_version: 1,
            join: join(),
        })
        .unwrap();
        assert!(deserialize::<Packet>(&bytes[..bytes.len() / 2]).is_err());
    }
}
