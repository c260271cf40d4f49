//! Grid pathfinding: exact incremental search and a greedy estimator.
//!
//! [`Board::dist`] is a multi-source Dijkstra/A* hybrid. Per-cell search
//! state is cached on the cells themselves and stamped with a monotonically
//! increasing generation id, so starting a new search invalidates every
//! cached entry in O(1).
//!
//! [`naive_cost`] is a much cheaper greedy approximation used for power
//! budgeting in hot paths; it never explores alternatives and is therefore a
//! valid upper bound on the exact cost.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use tracing::warn;

use crate::board::{Board, CellId, Step, UnitId, UNREACHABLE};
use crate::cell::SearchScratch;
use crate::math::Fixed;

/// Options for [`Board::dist`].
#[derive(Default, Clone, Copy)]
pub struct DistOptions<'a> {
    /// Terminal cell; also enables the A* heuristic.
    pub dest_cell: Option<CellId>,
    /// Terminal predicate; the first satisfying popped cell wins.
    pub dest_cond: Option<&'a dyn Fn(&Board, Step, CellId) -> bool>,
    /// Cells (other than sources) that must not be traversed.
    pub avoid_cond: Option<&'a dyn Fn(&Board, Step, CellId) -> bool>,
    /// Override for the mover's base move cost.
    pub unit_move_cost: Option<i64>,
    /// Override for the mover's rubble cost rate, in hundredths.
    pub unit_rubble_rate_centi: Option<i32>,
    /// Abandon the search once the cheapest frontier cost exceeds this.
    pub cost_lim: Option<i64>,
    /// Abandon branches at or beyond this many hops.
    pub dist_lim: Option<i32>,
}

/// Internal terminal handling for factory-center destinations.
#[derive(Clone, Copy)]
enum FactoryDest {
    /// Plain cell destination.
    Plain,
    /// Own factory: stop on any unclaimed footprint cell, and do not route
    /// through the rest of the footprint.
    Own(crate::board::FactoryId, Option<UnitId>),
    /// Opposing factory: stop when adjacent to the footprint.
    Opp(crate::board::FactoryId),
}

impl Board {
    /// Best-first search from `sources` to a destination cell or condition.
    ///
    /// Returns `(cost, hops, destination)`, or `(UNREACHABLE, UNREACHABLE,
    /// None)` when no terminal cell is reachable. Step cost accumulates as
    /// `floor(move_cost + rubble_rate * rubble)` using rubble projected at
    /// `step`. When `unit` is `None` the heavier class's constants apply
    /// (planning-time estimates before a mover is chosen).
    ///
    /// The search caches `(cost, hops, predecessor)` on each visited cell;
    /// callers needing the route walk predecessors via [`Board::last_route`].
    pub fn dist(
        &mut self,
        step: Step,
        sources: &[CellId],
        unit: Option<UnitId>,
        opts: DistOptions<'_>,
    ) -> (i64, i32, Option<CellId>) {
        let i = self.idx(step);
        self.search_generation += 1;
        let generation = self.search_generation;

        let unit_team = unit.map(|u| self.unit(u).team);
        let (default_move, default_rate) = match unit {
            Some(u) => {
                let spec = self.rules.class(self.unit(u).class);
                (i64::from(spec.move_cost), spec.rubble_movement_cost_centi)
            }
            None => (
                i64::from(self.rules.heavy.move_cost),
                self.rules.heavy.rubble_movement_cost_centi,
            ),
        };
        let move_cost = opts.unit_move_cost.unwrap_or(default_move);
        let rubble_rate = opts.unit_rubble_rate_centi.unwrap_or(default_rate);

        // Factory-center destinations get terminal handling for the whole
        // footprint: a unit cannot stand on a hostile footprint at all, and
        // on its own factory any free footprint cell is as good as the
        // center.
        let mut factory_dest = FactoryDest::Plain;
        let mut avoid_own_dest_factory = None;
        if let (Some(dest), None) = (opts.dest_cell, opts.dest_cond.map(|_| ())) {
            if let (true, Some(team)) = (self.cell(dest).factory_center, unit_team) {
                let fid = self.cell(dest).factory_id.expect("center has factory");
                if self.factory(fid).team == team {
                    factory_dest = FactoryDest::Own(fid, unit);
                    if opts.avoid_cond.is_none() {
                        // Cannot route "through" the destination factory when
                        // a footprint cell may be claimed by someone else.
                        avoid_own_dest_factory = Some(fid);
                    }
                } else {
                    factory_dest = FactoryDest::Opp(fid);
                }
            }
        }

        let heuristic = |b: &Board, c: CellId| -> i64 {
            opts.dest_cell
                .map_or(0, |dest| move_cost * i64::from(b.man_dist(c, dest)))
        };

        // (astar, cost, hops, unique, cell); Reverse for a min-heap.
        let mut heap: BinaryHeap<Reverse<(i64, i64, i32, u64, CellId)>> = BinaryHeap::new();
        let mut unique: u64 = 0;
        for &src in sources {
            self.cells[src as usize].search = SearchScratch {
                generation,
                cost: 0,
                hops: 0,
                prev: None,
            };
            unique += 1;
            heap.push(Reverse((heuristic(self, src), 0, 0, unique, src)));
        }

        let mut nodes_popped: u32 = 0;
        let mut warned = false;

        while let Some(Reverse((_, cost, hops, _, cell))) = heap.pop() {
            nodes_popped += 1;
            if !warned && nodes_popped > self.config.search_node_warn_limit && i == 0 && unit.is_some()
            {
                warned = true;
                warn!(
                    step,
                    unit = ?unit,
                    nodes = nodes_popped,
                    dest = ?opts.dest_cell,
                    "path search exploring unusually many nodes"
                );
            }

            // Best remaining frontier option is over budget: give up.
            if opts.cost_lim.is_some_and(|lim| cost > lim) {
                return (UNREACHABLE, UNREACHABLE as i32, None);
            }

            // Terminal check.
            let terminal = match factory_dest {
                FactoryDest::Plain => {
                    opts.dest_cell == Some(cell)
                        || opts.dest_cond.is_some_and(|f| f(self, step, cell))
                }
                FactoryDest::Own(fid, u) => {
                    self.cell(cell).factory_id == Some(fid)
                        && self
                            .assigned_unit(cell, step)
                            .map_or(true, |a| Some(a) == u)
                }
                FactoryDest::Opp(fid) => self.man_dist_factory(cell, fid) <= 1,
            };
            if terminal {
                return (cost, hops, Some(cell));
            }

            if let Some(lim) = opts.dist_lim {
                if hops >= lim {
                    continue;
                }
                if let (Some(dest), None) = (opts.dest_cell, opts.dest_cond.map(|_| ())) {
                    if hops + self.man_dist(cell, dest) > lim {
                        continue;
                    }
                }
            }

            // Source cells may always be departed; everything else consults
            // the avoidance predicate after the terminal check.
            if hops > 0 {
                if opts.avoid_cond.is_some_and(|f| f(self, step, cell)) {
                    continue;
                }
                if avoid_own_dest_factory.is_some_and(|fid| self.cell(cell).factory_id == Some(fid)) {
                    continue;
                }
            }

            for neighbor in self.neighbors(cell) {
                // Opposing factory footprints are impassable.
                if let (Some(team), Some(fid)) = (unit_team, self.cell(neighbor).factory_id) {
                    if self.factory(fid).team != team {
                        continue;
                    }
                }

                // Rubble at future hops is unknown at `step`; use the
                // current projection.
                let rubble = self.cell(neighbor).rubble[i];
                let step_cost = (Fixed::from_num(move_cost)
                    + Fixed::from_num(rubble_rate) / Fixed::from_num(100)
                        * Fixed::from_num(rubble))
                .floor()
                .to_num::<i64>();
                let new_cost = cost + step_cost;
                let new_hops = hops + 1;

                let scratch = &mut self.cells[neighbor as usize].search;
                if scratch.generation != generation {
                    *scratch = SearchScratch {
                        generation,
                        cost: i64::MAX,
                        hops: i32::MAX,
                        prev: None,
                    };
                }
                if new_cost < scratch.cost {
                    *scratch = SearchScratch {
                        generation,
                        cost: new_cost,
                        hops: new_hops,
                        prev: Some(cell),
                    };
                    unique += 1;
                    let astar = new_cost + heuristic(self, neighbor);
                    heap.push(Reverse((astar, new_cost, new_hops, unique, neighbor)));
                }
            }
        }

        if warned {
            warn!(step, "path search exhausted frontier without a destination");
        }
        (UNREACHABLE, UNREACHABLE as i32, None)
    }

    /// Reconstruct the route of the most recent [`Board::dist`] call, from a
    /// source to `dest` inclusive. Empty if `dest` was not reached by that
    /// search.
    #[must_use]
    pub fn last_route(&self, dest: CellId) -> Vec<CellId> {
        let generation = self.search_generation;
        let mut route = Vec::new();
        let mut cur = Some(dest);
        while let Some(c) = cur {
            let scratch = &self.cells[c as usize].search;
            if scratch.generation != generation {
                return Vec::new();
            }
            route.push(c);
            cur = scratch.prev;
        }
        route.reverse();
        route
    }

    /// [`Board::dist`] plus route reconstruction.
    pub fn route(
        &mut self,
        step: Step,
        sources: &[CellId],
        unit: Option<UnitId>,
        opts: DistOptions<'_>,
    ) -> Vec<CellId> {
        let (_, _, dest) = self.dist(step, sources, unit, opts);
        dest.map_or_else(Vec::new, |d| self.last_route(d))
    }
}

/// Greedy walking cost around an opposing factory's perimeter from
/// `src` to `dest`, in the given rotational direction.
fn perimeter_cost(
    board: &Board,
    step: Step,
    uid: UnitId,
    factory: crate::board::FactoryId,
    src: CellId,
    dest: CellId,
    clockwise: bool,
    route: Option<&mut Vec<CellId>>,
) -> i64 {
    let i = board.idx(step);
    let spec = *board.rules.class(board.unit(uid).class);
    let f = board.factory(factory);
    let (fx, fy) = (f.x, f.y);
    let mut cost: i64 = 0;
    let mut local_route = Vec::new();
    let mut cell = Some(src);
    let mut guard = 0;
    while let Some(cur) = cell {
        if cur == dest {
            break;
        }
        guard += 1;
        if guard > 64 {
            // Walked the full perimeter without meeting dest; bail out.
            return UNREACHABLE;
        }
        let c = board.cell(cur);
        let next = if board.man_dist_factory(cur, factory) == 2 && c.x != fx && c.y != fy {
            // Corner of the perimeter ring.
            match (c.x > fx, c.y > fy, clockwise) {
                (true, true, true) => board.neighbor(cur, -1, 0), // southeast
                (true, true, false) => board.neighbor(cur, 0, -1),
                (true, false, true) => board.neighbor(cur, 0, 1), // northeast
                (true, false, false) => board.neighbor(cur, -1, 0),
                (false, true, true) => board.neighbor(cur, 0, -1), // southwest
                (false, true, false) => board.neighbor(cur, 1, 0),
                (false, false, true) => board.neighbor(cur, 1, 0), // northwest
                (false, false, false) => board.neighbor(cur, 0, 1),
            }
        } else if c.x + 2 == fx {
            // West edge.
            board.neighbor(cur, 0, if clockwise { -1 } else { 1 })
        } else if c.x - 2 == fx {
            board.neighbor(cur, 0, if clockwise { 1 } else { -1 })
        } else if c.y + 2 == fy {
            board.neighbor(cur, if clockwise { 1 } else { -1 }, 0)
        } else {
            board.neighbor(cur, if clockwise { -1 } else { 1 }, 0)
        };
        if let Some(n) = next {
            cost += i64::from(spec.move_power_cost(board.cell(n).rubble[i]));
            local_route.push(n);
        }
        cell = next;
    }
    if cell.is_none() {
        return UNREACHABLE;
    }
    if let Some(out) = route {
        out.extend(local_route);
    }
    cost
}

/// Greedy straight-line cost estimate from `src` to `dest` for `uid`.
///
/// At each step picks, among neighbors that make progress toward the
/// destination, the one with least rubble; detours around opposing factory
/// footprints along whichever perimeter direction is cheaper. Never explores
/// alternatives, so the result is an upper bound on [`Board::dist`].
///
/// With `is_factory`, any cell of the destination's factory terminates the
/// walk.
#[must_use]
pub fn naive_cost(board: &Board, step: Step, uid: UnitId, src: CellId, dest: CellId, is_factory: bool) -> i64 {
    naive_walk(board, step, uid, src, dest, is_factory, None)
}

/// The route the greedy estimator would take. Used for decoy queues, not
/// for real movement.
#[must_use]
pub fn naive_route(board: &Board, step: Step, uid: UnitId, src: CellId, dest: CellId) -> Vec<CellId> {
    let mut route = vec![src];
    naive_walk(board, step, uid, src, dest, false, Some(&mut route));
    route
}

fn naive_walk(
    board: &Board,
    step: Step,
    uid: UnitId,
    src: CellId,
    dest: CellId,
    is_factory: bool,
    mut route: Option<&mut Vec<CellId>>,
) -> i64 {
    let i = board.idx(step);
    let unit = board.unit(uid);
    let team = unit.team;
    let spec = *board.rules.class(unit.class);
    let dest_factory = board.cell(dest).factory_id;

    let mut cost: i64 = 0;
    let mut prev: Option<CellId> = None;
    let mut cell = src;
    let mut cur_dist = board.man_dist(src, dest);
    let mut in_opp_factory: Option<(crate::board::FactoryId, CellId)> = None;

    loop {
        if cell == dest {
            break;
        }
        if is_factory
            && dest_factory.is_some()
            && board.cell(cell).factory_id == dest_factory
        {
            break;
        }

        let cell_factory = board.cell(cell).factory_id;
        if in_opp_factory.is_none() {
            if let (Some(fid), Some(p)) = (cell_factory, prev) {
                if board.factory(fid).team != team {
                    // Entered a hostile footprint in the straight-line walk;
                    // back the step out and settle up when we exit the far
                    // side.
                    in_opp_factory = Some((fid, p));
                    cost -= i64::from(spec.move_cost);
                    if let Some(r) = route.as_deref_mut() {
                        r.pop();
                    }
                }
            }
        }

        // Step to the progress-making neighbor with least rubble.
        let mut best: Option<(CellId, i32)> = None;
        let toward = board.neighbor_toward(cell, dest);
        for n in std::iter::once(toward).chain(board.neighbors(cell)) {
            if board.man_dist(n, dest) < cur_dist {
                let rubble = board.cell(n).rubble[i];
                if best.map_or(true, |(_, r)| rubble < r) {
                    best = Some((n, rubble));
                }
            }
        }
        let Some((next, rubble)) = best else {
            return UNREACHABLE;
        };
        prev = Some(cell);
        cell = next;
        cur_dist -= 1;

        if in_opp_factory.is_none() {
            cost += i64::from(spec.move_power_cost(rubble));
            if let Some(r) = route.as_deref_mut() {
                r.push(cell);
            }
        }

        if let Some((fid, entry_prev)) = in_opp_factory {
            let exited = board
                .cell(cell)
                .factory_id
                .map_or(true, |f| board.factory(f).team == team);
            if exited {
                let cw = perimeter_cost(board, step, uid, fid, entry_prev, cell, true, None);
                let ccw = perimeter_cost(board, step, uid, fid, entry_prev, cell, false, None);
                if let Some(r) = route.as_deref_mut() {
                    perimeter_cost(board, step, uid, fid, entry_prev, cell, cw <= ccw, Some(r));
                } else {
                    cost += cw.min(ccw);
                }
                in_opp_factory = None;
            }
        }
    }
    cost
}
