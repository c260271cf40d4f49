//! Unit and factory actions, and the run-length queue codec.
//!
//! The external engine consumes action queues as tuples of
//! `(kind, direction, resource, amount, repeat, n)`. Internally the engine
//! works with one action per simulated turn; queues are expanded on input and
//! re-compressed on output.

use serde::{Deserialize, Serialize};

/// Movement directions. `Center` is a stand-still.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// No movement.
    Center,
    /// Negative y.
    North,
    /// Positive x.
    East,
    /// Positive y.
    South,
    /// Negative x.
    West,
}

impl Direction {
    /// The four actual moves in wire order.
    pub const MOVES: [Direction; 4] = [
        Direction::North,
        Direction::East,
        Direction::South,
        Direction::West,
    ];

    /// Grid delta for this direction.
    #[must_use]
    pub const fn delta(self) -> (i32, i32) {
        match self {
            Direction::Center => (0, 0),
            Direction::North => (0, -1),
            Direction::East => (1, 0),
            Direction::South => (0, 1),
            Direction::West => (-1, 0),
        }
    }

    /// Wire index (0 = center, 1 = north, 2 = east, 3 = south, 4 = west).
    #[must_use]
    pub const fn index(self) -> i32 {
        match self {
            Direction::Center => 0,
            Direction::North => 1,
            Direction::East => 2,
            Direction::South => 3,
            Direction::West => 4,
        }
    }

    /// Inverse of [`Direction::index`]; out-of-range values become `Center`.
    #[must_use]
    pub const fn from_index(idx: i32) -> Direction {
        match idx {
            1 => Direction::North,
            2 => Direction::East,
            3 => Direction::South,
            4 => Direction::West,
            _ => Direction::Center,
        }
    }

    /// The opposite direction.
    #[must_use]
    pub const fn opposite(self) -> Direction {
        match self {
            Direction::Center => Direction::Center,
            Direction::North => Direction::South,
            Direction::East => Direction::West,
            Direction::South => Direction::North,
            Direction::West => Direction::East,
        }
    }
}

/// Transferable resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resource {
    /// Raw ice, processed into water by factories.
    Ice,
    /// Raw ore, processed into metal by factories.
    Ore,
    /// Keeps factories alive and grows lichen.
    Water,
    /// Builds robots.
    Metal,
    /// Moves, digs, everything.
    Power,
}

impl Resource {
    /// Wire index.
    #[must_use]
    pub const fn index(self) -> i32 {
        match self {
            Resource::Ice => 0,
            Resource::Ore => 1,
            Resource::Water => 2,
            Resource::Metal => 3,
            Resource::Power => 4,
        }
    }

    /// Inverse of [`Resource::index`]; out-of-range values become `Ice`.
    #[must_use]
    pub const fn from_index(idx: i32) -> Resource {
        match idx {
            1 => Resource::Ore,
            2 => Resource::Water,
            3 => Resource::Metal,
            4 => Resource::Power,
            _ => Resource::Ice,
        }
    }
}

/// Unit action kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    /// Move one cell (or stand still with `Center`).
    Move,
    /// Give a resource to an adjacent unit or the factory underneath.
    Transfer,
    /// Take a resource from the factory underneath.
    Pickup,
    /// Dig rubble/lichen/resource on the current cell.
    Dig,
    /// Self-destruct, rubbling the current cell.
    SelfDestruct,
    /// Idle until power reaches the given amount (opponent queues only).
    Recharge,
}

/// One action tuple in a unit's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitAction {
    /// What to do.
    pub kind: ActionKind,
    /// Direction operand (moves and transfers).
    pub direction: Direction,
    /// Resource operand (transfers and pickups).
    pub resource: Resource,
    /// Amount operand (transfers, pickups, recharge target).
    pub amount: i32,
    /// Whether the action re-enqueues itself after executing `n` times.
    pub repeat: i32,
    /// Execution count for this tuple.
    pub n: i32,
}

impl UnitAction {
    /// A stand-still no-op.
    #[must_use]
    pub const fn no_move() -> Self {
        Self {
            kind: ActionKind::Move,
            direction: Direction::Center,
            resource: Resource::Ice,
            amount: 0,
            repeat: 0,
            n: 1,
        }
    }

    /// A move in `direction`.
    #[must_use]
    pub const fn movement(direction: Direction) -> Self {
        Self {
            kind: ActionKind::Move,
            direction,
            resource: Resource::Ice,
            amount: 0,
            repeat: 0,
            n: 1,
        }
    }

    /// A transfer of `amount` of `resource` toward `direction`.
    #[must_use]
    pub const fn transfer(direction: Direction, resource: Resource, amount: i32) -> Self {
        Self {
            kind: ActionKind::Transfer,
            direction,
            resource,
            amount,
            repeat: 0,
            n: 1,
        }
    }

    /// A pickup of `amount` of `resource` from the factory underneath.
    #[must_use]
    pub const fn pickup(resource: Resource, amount: i32) -> Self {
        Self {
            kind: ActionKind::Pickup,
            direction: Direction::Center,
            resource,
            amount,
            repeat: 0,
            n: 1,
        }
    }

    /// A dig on the current cell.
    #[must_use]
    pub const fn dig() -> Self {
        Self {
            kind: ActionKind::Dig,
            direction: Direction::Center,
            resource: Resource::Ice,
            amount: 0,
            repeat: 0,
            n: 1,
        }
    }

    /// A self-destruct on the current cell.
    #[must_use]
    pub const fn self_destruct() -> Self {
        Self {
            kind: ActionKind::SelfDestruct,
            direction: Direction::Center,
            resource: Resource::Ice,
            amount: 0,
            repeat: 0,
            n: 1,
        }
    }

    /// Whether two actions do the same thing, ignoring repeat/count fields
    /// and any operands the kind does not use.
    #[must_use]
    pub fn same_effect(&self, other: &UnitAction) -> bool {
        if self.kind != other.kind {
            return false;
        }
        match self.kind {
            ActionKind::Move => self.direction == other.direction,
            ActionKind::Transfer => {
                self.direction == other.direction
                    && self.resource == other.resource
                    && self.amount == other.amount
            }
            ActionKind::Pickup => self.resource == other.resource && self.amount == other.amount,
            ActionKind::Dig | ActionKind::SelfDestruct => true,
            ActionKind::Recharge => self.amount == other.amount,
        }
    }

    /// Wire tuple form.
    #[must_use]
    pub fn to_wire(&self) -> [i32; 6] {
        let kind = match self.kind {
            ActionKind::Move => 0,
            ActionKind::Transfer => 1,
            ActionKind::Pickup => 2,
            ActionKind::Dig => 3,
            ActionKind::SelfDestruct => 4,
            ActionKind::Recharge => 5,
        };
        [
            kind,
            self.direction.index(),
            self.resource.index(),
            self.amount,
            self.repeat,
            self.n,
        ]
    }

    /// Parse a wire tuple. Returns `None` for unknown kinds.
    #[must_use]
    pub fn from_wire(w: [i32; 6]) -> Option<Self> {
        let kind = match w[0] {
            0 => ActionKind::Move,
            1 => ActionKind::Transfer,
            2 => ActionKind::Pickup,
            3 => ActionKind::Dig,
            4 => ActionKind::SelfDestruct,
            5 => ActionKind::Recharge,
            _ => return None,
        };
        Some(Self {
            kind,
            direction: Direction::from_index(w[1]),
            resource: Resource::from_index(w[2]),
            amount: w[3],
            repeat: w[4],
            n: w[5],
        })
    }
}

/// The single action token a factory may emit per turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FactoryAction {
    /// Build a light robot.
    BuildLight,
    /// Build a heavy robot.
    BuildHeavy,
    /// Water lichen.
    Water,
    /// Do nothing.
    None,
}

impl FactoryAction {
    /// Wire index (0 = light, 1 = heavy, 2 = water).
    #[must_use]
    pub const fn to_wire(self) -> Option<i32> {
        match self {
            FactoryAction::BuildLight => Some(0),
            FactoryAction::BuildHeavy => Some(1),
            FactoryAction::Water => Some(2),
            FactoryAction::None => None,
        }
    }
}

/// Expand a compressed queue into one action per future step, capped at
/// `max_len` entries.
///
/// `recharge_steps(target)` estimates how many steps a recharge action will
/// occupy; the count in the wire tuple can undercount because opponent power
/// spend is not tracked.
pub fn expand_queue(
    raw: &[UnitAction],
    max_len: usize,
    recharge_steps: impl Fn(i32) -> i32,
) -> Vec<UnitAction> {
    let mut queue: Vec<UnitAction> = raw.to_vec();
    let mut expanded = Vec::with_capacity(max_len);
    let mut idx = 0;
    while idx < queue.len() {
        let mut spec = queue[idx];
        idx += 1;

        let mut n = spec.n;
        if spec.kind == ActionKind::Recharge {
            n = n.max(recharge_steps(spec.amount));
        }
        for j in (1..=n).rev() {
            let mut entry = spec;
            entry.n = j;
            expanded.push(entry);
            if expanded.len() >= max_len {
                return expanded;
            }
        }
        if spec.repeat > 0 {
            // Last item in queue is repeating: keep the expansion finite by
            // reducing the re-enqueued count to one.
            if idx == queue.len() {
                spec.repeat = 1;
            }
            let mut requeued = spec;
            requeued.n = spec.repeat;
            queue.push(requeued);
        }
    }
    expanded
}

/// Run-length compress a per-step action list for emission.
///
/// Consecutive same-effect actions collapse into one tuple with an
/// incremented count. The result is capped at `max_len` entries. If the tail
/// action is repeatable (move, dig, power pickup, power transfer) its repeat
/// flag is set so the queue keeps doing something sensible after it runs dry,
/// and a trailing back-and-forth move pair is marked as a repeating cycle.
///
/// A water pickup anywhere past the head truncates the emitted queue: the
/// queue is public information and telegraphing a water run invites a
/// blockade.
#[must_use]
pub fn compress_queue(actions: &[UnitAction], max_len: usize) -> Vec<UnitAction> {
    let mut out: Vec<UnitAction> = Vec::new();
    let mut i = 0;
    while i < actions.len() {
        let spec = actions[i];
        if i > 0 && spec.kind == ActionKind::Pickup && spec.resource == Resource::Water {
            break;
        }
        let mut j = i + 1;
        while j < actions.len() && spec.same_effect(&actions[j]) {
            j += 1;
        }
        let mut entry = spec;
        entry.n = (j - i) as i32;
        out.push(entry);
        i = j;
    }

    out.truncate(max_len);

    if let Some(last) = out.last().copied() {
        let repeatable = matches!(last.kind, ActionKind::Move | ActionKind::Dig)
            || (last.kind == ActionKind::Pickup && last.resource == Resource::Power)
            || (last.kind == ActionKind::Transfer && last.resource == Resource::Power);
        if repeatable {
            out.last_mut().expect("non-empty").repeat = 1;
        }

        // A trailing A->B, B->A move pair becomes a repeating shuttle.
        if out.len() >= 2 && last.kind == ActionKind::Move {
            let prev = out[out.len() - 2];
            if prev.kind == ActionKind::Move
                && prev.n == 1
                && prev.direction != Direction::Center
                && prev.direction == last.direction.opposite()
            {
                let len = out.len();
                out[len - 1].repeat = 1;
                out[len - 2].repeat = 1;
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq_effects(q: &[UnitAction]) -> Vec<(ActionKind, Direction, Resource, i32)> {
        q.iter()
            .map(|a| (a.kind, a.direction, a.resource, a.amount))
            .collect()
    }

    #[test]
    fn test_same_effect_ignores_counts() {
        let mut a = UnitAction::movement(Direction::North);
        let mut b = UnitAction::movement(Direction::North);
        a.n = 3;
        b.n = 1;
        b.repeat = 1;
        assert!(a.same_effect(&b));
        assert!(!a.same_effect(&UnitAction::movement(Direction::South)));
        assert!(UnitAction::dig().same_effect(&UnitAction::dig()));
    }

    #[test]
    fn test_expand_then_compress_is_identity() {
        let raw = vec![
            UnitAction {
                n: 3,
                ..UnitAction::movement(Direction::East)
            },
            UnitAction {
                n: 2,
                ..UnitAction::dig()
            },
            UnitAction::transfer(Direction::North, Resource::Ice, 100),
        ];
        let expanded = expand_queue(&raw, 20, |_| 0);
        assert_eq!(expanded.len(), 6);
        let compressed = compress_queue(&expanded, 20);
        assert_eq!(seq_effects(&expanded), seq_effects(&expand_queue(&compressed, 20, |_| 0)));
    }

    #[test]
    fn test_compress_is_fixed_point() {
        let per_step = vec![
            UnitAction::movement(Direction::North),
            UnitAction::movement(Direction::North),
            UnitAction::dig(),
        ];
        let once = compress_queue(&per_step, 20);
        let twice = compress_queue(&once, 20);
        // Compressing an already-minimal queue only re-derives counts from
        // the collapsed entries, so entry effects and order are unchanged.
        assert_eq!(seq_effects(&once), seq_effects(&twice));
    }

    #[test]
    fn test_expand_repeat_requeues() {
        let raw = vec![UnitAction {
            repeat: 2,
            n: 1,
            ..UnitAction::dig()
        }];
        let expanded = expand_queue(&raw, 5, |_| 0);
        assert_eq!(expanded.len(), 5);
        assert!(expanded.iter().all(|a| a.kind == ActionKind::Dig));
    }

    #[test]
    fn test_compress_caps_length() {
        let mut per_step = Vec::new();
        for k in 0..30 {
            per_step.push(if k % 2 == 0 {
                UnitAction::dig()
            } else {
                UnitAction::movement(Direction::North)
            });
        }
        assert_eq!(compress_queue(&per_step, 20).len(), 20);
    }

    #[test]
    fn test_compress_hides_water_pickup() {
        let per_step = vec![
            UnitAction::movement(Direction::North),
            UnitAction::pickup(Resource::Water, 50),
            UnitAction::movement(Direction::South),
        ];
        let out = compress_queue(&per_step, 20);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, ActionKind::Move);
    }

    #[test]
    fn test_compress_repeat_tail() {
        let per_step = vec![UnitAction::dig(), UnitAction::dig()];
        let out = compress_queue(&per_step, 20);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].n, 2);
        assert_eq!(out[0].repeat, 1);
    }

    #[test]
    fn test_compress_oscillation_pair() {
        let per_step = vec![
            UnitAction::dig(),
            UnitAction::movement(Direction::East),
            UnitAction::movement(Direction::West),
        ];
        let out = compress_queue(&per_step, 20);
        assert_eq!(out.len(), 3);
        assert_eq!(out[1].repeat, 1);
        assert_eq!(out[2].repeat, 1);
    }

    #[test]
    fn test_wire_roundtrip() {
        let a = UnitAction::transfer(Direction::West, Resource::Power, 120);
        assert_eq!(UnitAction::from_wire(a.to_wire()), Some(a));
        assert_eq!(UnitAction::from_wire([9, 0, 0, 0, 0, 1]), None);
    }
}
