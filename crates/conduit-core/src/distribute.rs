//! Deterministic allocation helpers shared by the resource algorithms.
//!
//! Higher priority values are served first. Within one priority tier,
//! [`split_even`] water-fills: the amount is divided evenly, members that
//! need less than their share are filled and the rest is divided again, and
//! an indivisible remainder is handed out one unit at a time in position
//! order. [`take_ordered`] drains sources greedily by priority, then
//! position.
//!
//! Participants of a channel take a [`Role`], and flows between roles run in
//! the order of [`FLOWS`].

use crate::position::Position;

// ---------------------------------------------------------------------------
// Roles
// ---------------------------------------------------------------------------

/// How a participant takes part in a channel, from the directions its faces
/// are connected for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Extract only.
    Provider,
    /// Insert only.
    Consumer,
    /// Insert and extract.
    Buffer,
}

impl Role {
    pub fn from_flags(insert: bool, extract: bool) -> Option<Role> {
        match (insert, extract) {
            (true, true) => Some(Role::Buffer),
            (true, false) => Some(Role::Consumer),
            (false, true) => Some(Role::Provider),
            (false, false) => None,
        }
    }
}

/// Source and destination roles, in the order flows run. Providers serve
/// consumers before buffers; buffers only cover what consumers still need
/// and never feed each other.
pub const FLOWS: [(Role, Role); 3] = [
    (Role::Provider, Role::Consumer),
    (Role::Provider, Role::Buffer),
    (Role::Buffer, Role::Consumer),
];

// ---------------------------------------------------------------------------
// Allocation
// ---------------------------------------------------------------------------

/// One participant in an allocation: how much it can take (or give).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Claim {
    pub priority: i32,
    pub pos: Position,
    pub amount: u64,
}

impl Claim {
    pub fn new(priority: i32, pos: Position, amount: u64) -> Self {
        Self { priority, pos, amount }
    }
}

/// Indices of `claims` ordered by descending priority, then ascending
/// position. Ties beyond that keep their input order.
fn service_order(claims: &[Claim]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..claims.len()).collect();
    order.sort_by(|&a, &b| {
        claims[b]
            .priority
            .cmp(&claims[a].priority)
            .then(claims[a].pos.cmp(&claims[b].pos))
    });
    order
}

/// Distribute up to `total` among `claims`, never exceeding a claim's
/// amount. Returns the allocation per claim, in input order.
pub fn split_even(total: u64, claims: &[Claim]) -> Vec<u64> {
    let mut given = vec![0u64; claims.len()];
    let mut remaining = total;
    let order = service_order(claims);

    let mut start = 0;
    while start < order.len() && remaining > 0 {
        let priority = claims[order[start]].priority;
        let end = order[start..]
            .iter()
            .position(|&i| claims[i].priority != priority)
            .map_or(order.len(), |len| start + len);

        let mut active: Vec<usize> = order[start..end]
            .iter()
            .copied()
            .filter(|&i| claims[i].amount > 0)
            .collect();
        while !active.is_empty() && remaining > 0 {
            let share = remaining / active.len() as u64;
            if share == 0 {
                for &i in &active {
                    if remaining == 0 {
                        break;
                    }
                    given[i] += 1;
                    remaining -= 1;
                }
                break;
            }
            for &i in &active {
                let take = share.min(claims[i].amount - given[i]);
                given[i] += take;
                remaining -= take;
            }
            active.retain(|&i| given[i] < claims[i].amount);
        }
        start = end;
    }
    given
}

/// Take up to `total` from `claims`, draining each fully before moving to
/// the next in service order. Returns the amount taken per claim.
pub fn take_ordered(total: u64, claims: &[Claim]) -> Vec<u64> {
    let mut taken = vec![0u64; claims.len()];
    let mut remaining = total;
    for i in service_order(claims) {
        if remaining == 0 {
            break;
        }
        let take = remaining.min(claims[i].amount);
        taken[i] = take;
        remaining -= take;
    }
    taken
}

/// Sum of all claim amounts, saturating at `u64::MAX`.
pub fn total(claims: &[Claim]) -> u64 {
    claims.iter().fold(0u64, |sum, c| sum.saturating_add(c.amount))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::WorldId;
    use proptest::prelude::*;

    fn at(x: i32) -> Position {
        Position::new(WorldId(0), x, 0, 0)
    }

    #[test]
    fn equal_priority_splits_evenly() {
        let claims = [Claim::new(50, at(0), 40), Claim::new(50, at(1), 40)];
        assert_eq!(split_even(80, &claims), vec![40, 40]);
        assert_eq!(split_even(50, &claims), vec![25, 25]);
    }

    #[test]
    fn remainder_goes_by_position() {
        let claims = [Claim::new(50, at(2), 10), Claim::new(50, at(1), 10), Claim::new(50, at(3), 10)];
        assert_eq!(split_even(5, &claims), vec![2, 2, 1]);
    }

    #[test]
    fn small_claims_are_filled_and_rest_redistributed() {
        let claims = [Claim::new(50, at(0), 5), Claim::new(50, at(1), 100)];
        assert_eq!(split_even(60, &claims), vec![5, 55]);
    }

    #[test]
    fn higher_priority_fills_first() {
        let claims = [Claim::new(10, at(0), 40), Claim::new(90, at(1), 40)];
        assert_eq!(split_even(50, &claims), vec![10, 40]);
    }

    #[test]
    fn take_ordered_drains_by_priority_then_position() {
        let claims = [Claim::new(50, at(1), 50), Claim::new(50, at(0), 30), Claim::new(70, at(9), 5)];
        assert_eq!(take_ordered(60, &claims), vec![25, 30, 5]);
    }

    #[test]
    fn roles_from_flags() {
        assert_eq!(Role::from_flags(true, true), Some(Role::Buffer));
        assert_eq!(Role::from_flags(false, true), Some(Role::Provider));
        assert_eq!(Role::from_flags(false, false), None);
        assert!(FLOWS.iter().all(|&(from, to)| (from, to) != (Role::Buffer, Role::Buffer)));
    }

    #[test]
    fn total_saturates() {
        let claims = [Claim::new(50, at(0), u64::MAX), Claim::new(50, at(1), 10)];
        assert_eq!(total(&claims), u64::MAX);
        assert_eq!(split_even(u64::MAX, &claims), vec![u64::MAX - 10, 10]);
    }

    proptest! {
        #[test]
        fn split_even_never_overfills(
            total in 0u64..500,
            amounts in proptest::collection::vec((0i32..3, 0u64..100), 0..8),
        ) {
            let claims: Vec<Claim> = amounts
                .iter()
                .enumerate()
                .map(|(i, (p, a))| Claim::new(*p, at(i as i32), *a))
                .collect();
            let given = split_even(total, &claims);
            for (g, c) in given.iter().zip(&claims) {
                prop_assert!(*g <= c.amount);
            }
            let sum: u64 = given.iter().sum();
            prop_assert_eq!(sum, total.min(super::total(&claims)));
        }
    }
}
