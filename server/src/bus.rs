//! Process-wide coordination shared by every room.
//!
//! The bus exclusively owns profiles, parties, pending invites and the record
//! of which room hosts each online identity. Rooms call its operation-level
//! methods and never see the maps themselves. Anything that affects another
//! room is pushed as a `BusEvent` onto that room's channel, so each room still
//! applies every change from its own task.

use log::{debug, info};
use shared::{LeaderboardEntry, PartyView, RosterEntry};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

pub type RoomId = u32;

/// Persistent per-identity snapshot, restored on (re)join.
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub nickname: String,
    pub skin: String,
    pub level: u32,
    pub xp: u64,
    pub gold: u64,
    pub hp: i32,
    pub max_hp: i32,
    pub weapon: Option<String>,
    pub potions: u32,
    pub heal_pool: i32,
    pub party_id: Option<String>,
    pub party_owner: bool,
    pub party_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Party {
    /// Equal to the owner's identity.
    pub id: String,
    pub name: String,
    pub members: Vec<String>,
}

impl Party {
    pub fn owner(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    PartyChanged {
        identity: String,
        party: Option<PartyView>,
    },
    PartyInvite {
        target: String,
        from_id: String,
        from_nickname: String,
    },
    Chat {
        sender_id: Option<String>,
        nickname: String,
        message: String,
    },
    Notice {
        identity: String,
        message: String,
    },
    PlayerDied {
        identity: String,
        nickname: String,
    },
    Leaderboard(Vec<LeaderboardEntry>),
    Kick {
        identity: String,
        reason: String,
    },
}

/// Party policy violations. The message is shown to the caller as a notice.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PartyError {
    #[error("You cannot invite yourself")]
    SelfTarget,
    #[error("Only the party owner can do that")]
    NotOwner,
    #[error("You are not in a party")]
    NotInParty,
    #[error("That player is already in a party")]
    TargetInParty,
    #[error("That player is not online")]
    TargetOffline,
    #[error("The party is full")]
    PartyFull,
    #[error("That invitation is no longer valid")]
    NoInvite,
    #[error("That player is not in your party")]
    NotMember,
    #[error("Party names must be 1 to {0} characters")]
    InvalidName(usize),
}

#[derive(Default)]
struct BusState {
    profiles: HashMap<String, Profile>,
    parties: HashMap<String, Party>,
    /// target identity -> inviter identities, oldest first
    invites: HashMap<String, Vec<String>>,
    presence: HashMap<String, RoomId>,
    rooms: HashMap<RoomId, mpsc::UnboundedSender<BusEvent>>,
    next_room_id: RoomId,
}

impl BusState {
    fn push(&self, room: RoomId, event: BusEvent) {
        if let Some(sender) = self.rooms.get(&room) {
            if sender.send(event).is_err() {
                debug!("Room {} is gone, dropping bus event", room);
            }
        }
    }

    fn push_to_identity(&self, identity: &str, event: BusEvent) {
        if let Some(room) = self.presence.get(identity) {
            self.push(*room, event);
        }
    }

    fn party_id_of(&self, identity: &str) -> Option<&str> {
        self.parties
            .values()
            .find(|p| p.members.iter().any(|m| m == identity))
            .map(|p| p.id.as_str())
    }

    fn nickname_of(&self, identity: &str) -> String {
        self.profiles
            .get(identity)
            .map(|p| p.nickname.clone())
            .unwrap_or_else(|| identity.to_string())
    }

    fn view(&self, party: &Party) -> PartyView {
        let members = party
            .members
            .iter()
            .map(|identity| {
                let profile = self.profiles.get(identity);
                RosterEntry {
                    identity: identity.clone(),
                    nickname: profile
                        .map(|p| p.nickname.clone())
                        .unwrap_or_else(|| identity.clone()),
                    level: profile.map(|p| p.level).unwrap_or(1),
                    hp: profile.map(|p| p.hp).unwrap_or(0),
                    max_hp: profile.map(|p| p.max_hp).unwrap_or(0),
                    online: self.presence.contains_key(identity),
                }
            })
            .collect();
        PartyView {
            id: party.id.clone(),
            name: party.name.clone(),
            owner: party.owner().to_string(),
            members,
        }
    }

    fn set_profile_party(&mut self, identity: &str, party: Option<(&str, bool, &str)>) {
        if let Some(profile) = self.profiles.get_mut(identity) {
            profile.party_id = party.map(|(id, _, _)| id.to_string());
            profile.party_owner = party.map(|(_, owner, _)| owner).unwrap_or(false);
            profile.party_name = party.map(|(_, _, name)| name.to_string());
        }
    }

    /// Pushes the current roster to every member and syncs their profiles.
    fn publish(&mut self, party_id: &str) {
        let Some(party) = self.parties.get(party_id).cloned() else {
            return;
        };
        let view = self.view(&party);
        for member in &party.members {
            let is_owner = member == party.owner();
            self.set_profile_party(
                member,
                Some((party.id.as_str(), is_owner, party.name.as_str())),
            );
            self.push_to_identity(
                member,
                BusEvent::PartyChanged {
                    identity: member.clone(),
                    party: Some(view.clone()),
                },
            );
        }
    }

    fn clear_membership(&mut self, identity: &str) {
        self.set_profile_party(identity, None);
        self.push_to_identity(
            identity,
            BusEvent::PartyChanged {
                identity: identity.to_string(),
                party: None,
            },
        );
    }

    fn disband(&mut self, party_id: &str) {
        if let Some(party) = self.parties.remove(party_id) {
            info!("Party {} disbanded", party.id);
            for member in &party.members {
                self.clear_membership(member);
                self.push_to_identity(
                    member,
                    BusEvent::Notice {
                        identity: member.clone(),
                        message: format!("Party \"{}\" was disbanded", party.name),
                    },
                );
            }
        }
    }

    /// Removes a non-owner member, disbanding when one or fewer remain.
    fn remove_member(&mut self, party_id: &str, identity: &str) {
        let remaining = match self.parties.get_mut(party_id) {
            Some(party) => {
                party.members.retain(|m| m != identity);
                party.members.len()
            }
            None => return,
        };
        self.clear_membership(identity);
        if remaining <= 1 {
            self.disband(party_id);
        } else {
            self.publish(party_id);
        }
    }
}

pub struct Bus {
    state: Mutex<BusState>,
    max_party_size: usize,
    party_name_max_len: usize,
}

impl Bus {
    pub fn new(max_party_size: usize, party_name_max_len: usize) -> Self {
        Self {
            state: Mutex::new(BusState::default()),
            max_party_size,
            party_name_max_len,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        // Every operation leaves the maps consistent before it can panic.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // Rooms and presence

    pub fn register_room(&self, sender: mpsc::UnboundedSender<BusEvent>) -> RoomId {
        let mut state = self.lock();
        state.next_room_id += 1;
        let id = state.next_room_id;
        state.rooms.insert(id, sender);
        id
    }

    pub fn unregister_room(&self, room: RoomId) {
        let mut state = self.lock();
        state.rooms.remove(&room);
        state.presence.retain(|_, r| *r != room);
    }

    pub fn attach(&self, identity: &str, room: RoomId) {
        self.lock().presence.insert(identity.to_string(), room);
    }

    /// Clears presence only if `identity` is still attached to `room`.
    pub fn detach(&self, identity: &str, room: RoomId) {
        let mut state = self.lock();
        if state.presence.get(identity) == Some(&room) {
            state.presence.remove(identity);
            state.invites.remove(identity);
            for pending in state.invites.values_mut() {
                pending.retain(|f| f != identity);
            }
        }
    }

    pub fn room_of(&self, identity: &str) -> Option<RoomId> {
        self.lock().presence.get(identity).copied()
    }

    // Profiles

    pub fn load_profile(&self, identity: &str) -> Option<Profile> {
        self.lock().profiles.get(identity).cloned()
    }

    /// Overwrites the stored profile. Party fields stay owned by the bus.
    pub fn save_profile(&self, identity: &str, mut profile: Profile) {
        let mut state = self.lock();
        match state.party_id_of(identity).map(str::to_string) {
            Some(party_id) => {
                let party = &state.parties[&party_id];
                profile.party_owner = party.owner() == identity;
                profile.party_name = Some(party.name.clone());
                profile.party_id = Some(party_id);
            }
            None => {
                profile.party_id = None;
                profile.party_owner = false;
                profile.party_name = None;
            }
        }
        state.profiles.insert(identity.to_string(), profile);
    }

    pub fn delete_profile(&self, identity: &str) {
        if self.lock().profiles.remove(identity).is_some() {
            info!("Deleted profile for {}", identity);
        }
    }

    pub fn update_vitals(&self, identity: &str, hp: i32, max_hp: i32) {
        if let Some(profile) = self.lock().profiles.get_mut(identity) {
            profile.hp = hp;
            profile.max_hp = max_hp;
        }
    }

    // Parties

    pub fn party_of(&self, identity: &str) -> Option<PartyView> {
        let state = self.lock();
        let party_id = state.party_id_of(identity)?;
        state.parties.get(party_id).map(|p| state.view(p))
    }

    pub fn party(&self, party_id: &str) -> Option<Party> {
        self.lock().parties.get(party_id).cloned()
    }

    /// Records a pending invitation and delivers it to the target's room.
    pub fn invite(&self, from: &str, target: &str) -> Result<(), PartyError> {
        if from == target {
            return Err(PartyError::SelfTarget);
        }
        let mut state = self.lock();
        if let Some(party_id) = state.party_id_of(from) {
            let party = &state.parties[party_id];
            if party.owner() != from {
                return Err(PartyError::NotOwner);
            }
            if party.members.len() >= self.max_party_size {
                return Err(PartyError::PartyFull);
            }
        }
        if state.party_id_of(target).is_some() {
            return Err(PartyError::TargetInParty);
        }
        if !state.presence.contains_key(target) {
            return Err(PartyError::TargetOffline);
        }

        let pending = state.invites.entry(target.to_string()).or_default();
        if !pending.iter().any(|f| f == from) {
            pending.push(from.to_string());
        }
        let from_nickname = state.nickname_of(from);
        state.push_to_identity(
            target,
            BusEvent::PartyInvite {
                target: target.to_string(),
                from_id: from.to_string(),
                from_nickname,
            },
        );
        debug!("{} invited {} to a party", from, target);
        Ok(())
    }

    /// Accepts or refuses a pending invitation. Eligibility is re-checked at
    /// acceptance: the inviter must still be online, the target must still be
    /// solo, and the inviter must still be solo or an owner with room to spare.
    pub fn respond(&self, target: &str, from: &str, accept: bool) -> Result<(), PartyError> {
        let mut state = self.lock();
        let had_invite = match state.invites.get_mut(target) {
            Some(pending) => {
                let before = pending.len();
                pending.retain(|f| f != from);
                pending.len() != before
            }
            None => false,
        };
        if !had_invite {
            return Err(PartyError::NoInvite);
        }

        if !accept {
            let nickname = state.nickname_of(target);
            state.push_to_identity(
                from,
                BusEvent::Notice {
                    identity: from.to_string(),
                    message: format!("{} declined your party invite", nickname),
                },
            );
            return Ok(());
        }

        if !state.presence.contains_key(from) {
            return Err(PartyError::TargetOffline);
        }
        if state.party_id_of(target).is_some() {
            return Err(PartyError::TargetInParty);
        }
        let party_id = match state.party_id_of(from).map(str::to_string) {
            Some(party_id) => {
                let party = &state.parties[&party_id];
                if party.owner() != from {
                    return Err(PartyError::NoInvite);
                }
                if party.members.len() >= self.max_party_size {
                    return Err(PartyError::PartyFull);
                }
                party_id
            }
            None => {
                let name = format!("{}'s party", state.nickname_of(from));
                state.parties.insert(
                    from.to_string(),
                    Party {
                        id: from.to_string(),
                        name,
                        members: vec![from.to_string()],
                    },
                );
                info!("Party {} created", from);
                from.to_string()
            }
        };

        if let Some(party) = state.parties.get_mut(&party_id) {
            party.members.push(target.to_string());
        }
        state.invites.remove(target);
        state.publish(&party_id);
        Ok(())
    }

    /// Leaving as owner disbands the party; otherwise the member is removed
    /// and the party disbands once one or fewer members remain.
    pub fn leave_party(&self, identity: &str) -> Result<(), PartyError> {
        let mut state = self.lock();
        let party_id = state
            .party_id_of(identity)
            .map(str::to_string)
            .ok_or(PartyError::NotInParty)?;
        if party_id == identity {
            state.disband(&party_id);
        } else {
            state.remove_member(&party_id, identity);
        }
        Ok(())
    }

    pub fn rename_party(&self, identity: &str, name: &str) -> Result<(), PartyError> {
        let name = name.trim();
        let length = name.chars().count();
        if length == 0 || length > self.party_name_max_len {
            return Err(PartyError::InvalidName(self.party_name_max_len));
        }
        let mut state = self.lock();
        let party = state
            .parties
            .values_mut()
            .find(|p| p.members.iter().any(|m| m == identity))
            .ok_or(PartyError::NotInParty)?;
        if party.owner() != identity {
            return Err(PartyError::NotOwner);
        }
        party.name = name.to_string();
        let party_id = party.id.clone();
        state.publish(&party_id);
        Ok(())
    }

    pub fn kick_from_party(&self, owner: &str, target: &str) -> Result<(), PartyError> {
        let mut state = self.lock();
        let party_id = state
            .party_id_of(owner)
            .map(str::to_string)
            .ok_or(PartyError::NotInParty)?;
        if party_id != owner {
            return Err(PartyError::NotOwner);
        }
        if target == owner || state.party_id_of(target) != Some(party_id.as_str()) {
            return Err(PartyError::NotMember);
        }
        state.push_to_identity(
            target,
            BusEvent::Notice {
                identity: target.to_string(),
                message: "You were removed from the party".to_string(),
            },
        );
        state.remove_member(&party_id, target);
        Ok(())
    }

    pub fn disband_party(&self, owner: &str) -> Result<(), PartyError> {
        let mut state = self.lock();
        let party_id = state
            .party_id_of(owner)
            .map(str::to_string)
            .ok_or(PartyError::NotInParty)?;
        if party_id != owner {
            return Err(PartyError::NotOwner);
        }
        state.disband(&party_id);
        Ok(())
    }

    /// Re-sends the roster (with current profile vitals) to every member.
    pub fn refresh_party(&self, party_id: &str) {
        self.lock().publish(party_id);
    }

    // Relay

    /// Global chat; the origin room has already delivered it locally.
    pub fn relay_chat(
        &self,
        origin: Option<RoomId>,
        sender_id: Option<&str>,
        nickname: &str,
        message: &str,
    ) {
        let state = self.lock();
        for room in state.rooms.keys().filter(|r| Some(**r) != origin) {
            state.push(
                *room,
                BusEvent::Chat {
                    sender_id: sender_id.map(str::to_string),
                    nickname: nickname.to_string(),
                    message: message.to_string(),
                },
            );
        }
    }

    pub fn announce_death(&self, identity: &str, nickname: &str) {
        let state = self.lock();
        for room in state.rooms.keys() {
            state.push(
                *room,
                BusEvent::PlayerDied {
                    identity: identity.to_string(),
                    nickname: nickname.to_string(),
                },
            );
        }
    }

    /// Disciplinary kick. Online identities are removed by their room; the
    /// profile of an offline identity is wiped here. Returns whether the
    /// identity was online.
    pub fn kick(&self, identity: &str, reason: &str) -> bool {
        let mut state = self.lock();
        if state.presence.contains_key(identity) {
            state.push_to_identity(
                identity,
                BusEvent::Kick {
                    identity: identity.to_string(),
                    reason: reason.to_string(),
                },
            );
            true
        } else {
            state.profiles.remove(identity);
            false
        }
    }

    // Leaderboard

    pub fn leaderboard(&self, size: usize) -> Vec<LeaderboardEntry> {
        let state = self.lock();
        let mut entries: Vec<LeaderboardEntry> = state
            .profiles
            .iter()
            .map(|(identity, p)| LeaderboardEntry {
                identity: identity.clone(),
                nickname: p.nickname.clone(),
                level: p.level,
                xp: p.xp,
            })
            .collect();
        entries.sort_by(|a, b| {
            b.level
                .cmp(&a.level)
                .then(b.xp.cmp(&a.xp))
                .then(a.identity.cmp(&b.identity))
        });
        entries.truncate(size);
        entries
    }

    pub fn broadcast_leaderboard(&self, size: usize) {
        let entries = self.leaderboard(size);
        let state = self.lock();
        for room in state.rooms.keys() {
            state.push(*room, BusEvent::Leaderboard(entries.clone()));
        }
    }
}

/// Periodically pushes the leaderboard to every room.
pub async fn run_leaderboard(bus: Arc<Bus>, every: Duration, size: usize) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        bus.broadcast_leaderboard(size);
    }
}
