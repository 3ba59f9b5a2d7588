//! Reward recipient selection and party sharing.
//!
//! Callers pass only living candidates. Nothing here touches entity state; the
//! result is a list of allocations the simulation then applies.

use crate::geometry::Vector2;

pub const DEFAULT_TIE_TOLERANCE: f32 = 8.0;
pub const DEFAULT_SHARE_RADIUS: f32 = 640.0;

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate<K> {
    pub id: K,
    pub position: Vector2,
    pub party_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Allocation<K> {
    pub id: K,
    pub amount: u64,
    /// True when the amount came from splitting with party members.
    pub shared: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct RewardRules {
    pub tie_tolerance: f32,
    pub share_radius: f32,
}

impl Default for RewardRules {
    fn default() -> Self {
        Self {
            tie_tolerance: DEFAULT_TIE_TOLERANCE,
            share_radius: DEFAULT_SHARE_RADIUS,
        }
    }
}

pub fn ceil_share(amount: u64, recipients: usize) -> u64 {
    if recipients == 0 {
        return 0;
    }
    let n = recipients as u64;
    (amount + n - 1) / n
}

pub fn floor_share(amount: u64, recipients: usize) -> u64 {
    if recipients == 0 {
        return 0;
    }
    amount / recipients as u64
}

/// Candidates within `range` of `origin` whose distance is within `tolerance`
/// of the nearest one, nearest first.
pub fn nearest_tied<'a, K>(
    candidates: &'a [Candidate<K>],
    origin: Vector2,
    range: f32,
    tolerance: f32,
) -> Vec<&'a Candidate<K>> {
    let mut in_range: Vec<(f32, &Candidate<K>)> = candidates
        .iter()
        .map(|c| (c.position.distance(&origin), c))
        .filter(|(d, _)| *d <= range)
        .collect();
    in_range.sort_by(|a, b| a.0.total_cmp(&b.0));

    let Some(&(nearest, _)) = in_range.first() else {
        return Vec::new();
    };
    in_range
        .into_iter()
        .take_while(|(d, _)| *d <= nearest + tolerance)
        .map(|(_, c)| c)
        .collect()
}

/// Members of `party_id` within `radius` of `origin`.
pub fn party_members_in_range<'a, K>(
    candidates: &'a [Candidate<K>],
    party_id: &str,
    origin: Vector2,
    radius: f32,
) -> Vec<&'a Candidate<K>> {
    candidates
        .iter()
        .filter(|c| c.party_id.as_deref() == Some(party_id))
        .filter(|c| c.position.distance(&origin) <= radius)
        .collect()
}

fn all_same_party<K>(tied: &[&Candidate<K>]) -> bool {
    match tied.first().and_then(|c| c.party_id.as_deref()) {
        Some(first) => tied.iter().all(|c| c.party_id.as_deref() == Some(first)),
        None => false,
    }
}

fn push_merged<K: PartialEq>(allocations: &mut Vec<Allocation<K>>, allocation: Allocation<K>) {
    if let Some(existing) = allocations.iter_mut().find(|a| a.id == allocation.id) {
        existing.amount += allocation.amount;
        existing.shared |= allocation.shared;
    } else {
        allocations.push(allocation);
    }
}

/// Splits `amount` among the living candidates of `recipient`'s party that are
/// within the share radius. Solo recipients keep everything.
fn split_with_party<K: Clone + PartialEq>(
    candidates: &[Candidate<K>],
    recipient: &Candidate<K>,
    amount: u64,
    origin: Vector2,
    share_radius: f32,
    round_up: bool,
) -> Vec<Allocation<K>> {
    let Some(party_id) = recipient.party_id.as_deref() else {
        return vec![Allocation {
            id: recipient.id.clone(),
            amount,
            shared: false,
        }];
    };

    let mut members = party_members_in_range(candidates, party_id, origin, share_radius);
    if !members.iter().any(|m| m.id == recipient.id) {
        members.push(recipient);
    }
    if members.len() <= 1 {
        return vec![Allocation {
            id: recipient.id.clone(),
            amount,
            shared: false,
        }];
    }

    let share = if round_up {
        ceil_share(amount, members.len())
    } else {
        floor_share(amount, members.len())
    };
    members
        .into_iter()
        .map(|m| Allocation {
            id: m.id.clone(),
            amount: share,
            shared: true,
        })
        .collect()
}

/// Gold for an event at `origin` (enemy death or coin pickup).
///
/// Tied-nearest candidates split evenly (rounded up) unless they are all in
/// the same party, in which case the party is one recipient. Each recipient
/// in a party then splits again with party members near the event.
pub fn plan_gold<K: Clone + PartialEq>(
    candidates: &[Candidate<K>],
    origin: Vector2,
    amount: u64,
    range: f32,
    rules: RewardRules,
) -> Vec<Allocation<K>> {
    let tied = nearest_tied(candidates, origin, range, rules.tie_tolerance);
    if tied.is_empty() || amount == 0 {
        return Vec::new();
    }

    let recipients: Vec<&Candidate<K>> = if tied.len() > 1 && all_same_party(&tied) {
        vec![tied[0]]
    } else {
        tied
    };
    let per_recipient = ceil_share(amount, recipients.len());

    let mut allocations = Vec::new();
    for recipient in recipients {
        for allocation in split_with_party(
            candidates,
            recipient,
            per_recipient,
            origin,
            rules.share_radius,
            true,
        ) {
            push_merged(&mut allocations, allocation);
        }
    }
    allocations
}

/// Experience for a kill at `origin`. Party members in range get an equal
/// floored share; the remainder is dropped.
pub fn plan_xp<K: Clone + PartialEq>(
    killer: &Candidate<K>,
    candidates: &[Candidate<K>],
    origin: Vector2,
    amount: u64,
    share_radius: f32,
) -> Vec<Allocation<K>> {
    if amount == 0 {
        return Vec::new();
    }
    split_with_party(candidates, killer, amount, origin, share_radius, false)
}
