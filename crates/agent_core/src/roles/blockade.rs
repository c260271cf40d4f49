//! Blockade: a paired interception screen between an opposing water courier
//! and the starving factory it is trying to save.
//!
//! The pair runs a small choreography: the primary decides each turn whether
//! to push into the courier, slide sideways to stay between it and the
//! factory, swap with its partner, or chill; the secondary mirrors the
//! primary's motion one slot behind. Scripted follow-ups (`next_goals`) and
//! forced directions live in per-turn scratch fields that never persist.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::actions::{ActionKind, Direction, Resource};
use crate::board::{Board, CellId, FactoryId, Step, UnitId, UNREACHABLE};
use crate::pathfinding::DistOptions;
use crate::roles::{Goal, Phase, Role};
use crate::rules::RobotClass;

/// One scripted choreography step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    /// Trade cells with the partner.
    Swap,
    /// Hold position.
    Chill,
    /// Move in a fixed direction.
    Dir(Direction),
}

/// Blockade role state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blockade {
    /// Home (ice-conflict) factory.
    pub factory: FactoryId,
    /// The courier being intercepted; `None` while anticipating the next one.
    pub target_unit: Option<UnitId>,
    /// The factory the courier is trying to reach.
    pub target_factory: FactoryId,
    /// The other half of the pair, once recruited.
    pub partner: Option<UnitId>,
    /// Factory the last courier loaded up at; anticipation watches it.
    pub last_courier_factory: Option<FactoryId>,
    /// Real step the courier was last confirmed.
    pub last_courier_step: Step,
    /// Current sub-destination; `None` re-derives from geometry.
    pub goal: Option<Goal>,

    /// Scripted follow-up moves for the next turns.
    #[serde(skip)]
    pub next_goals: Option<(Step, Vec<Script>)>,
    /// Direction this unit must take this step, bypassing pathfinding.
    #[serde(skip)]
    pub force_direction: Option<(Step, Direction)>,
    /// Direction the primary is dodging a threat in, mirrored by the partner.
    #[serde(skip)]
    pub avoid: Option<Direction>,
    /// The primary is mid-push; the partner pushes with it.
    #[serde(skip)]
    pub push: bool,
    /// Head straight at the goal, ignoring rubble (set when the courier is
    /// about to outpace us).
    #[serde(skip)]
    pub straightline: bool,
    /// Goal cell decided earlier this simulated turn.
    #[serde(skip)]
    pub goal_cell_cache: Option<CellId>,
    /// Primary/secondary verdict for this real turn.
    #[serde(skip)]
    pub is_primary_cache: Option<bool>,
}

impl Blockade {
    /// Whether the current goal points home.
    #[must_use]
    pub fn goal_is_factory(&self) -> bool {
        self.goal == Some(Goal::Factory(self.factory))
    }
}

fn queue_shows_water_pickup(board: &Board, opp: UnitId) -> bool {
    board.unit(opp).action_queue.iter().take(5).any(|a| {
        a.kind == ActionKind::Pickup && a.resource == Resource::Water && a.amount >= 5
    })
}

fn carries_or_fetches_water(board: &Board, opp: UnitId, i: usize) -> bool {
    board.unit(opp).water[i] >= 5 || queue_shows_water_pickup(board, opp)
}

/// The cell the blockade is working against: the courier's, or the factory
/// it last loaded at while anticipating.
pub(crate) fn opp_cell(board: &Board, r: &Blockade) -> CellId {
    match r.target_unit {
        Some(t) => board.unit_cell(t, board.step),
        None => {
            let f = r.last_courier_factory.expect("anticipation has a watch factory");
            board.factory_center(f)
        }
    }
}

/// Which of the pair leads. Adjacent pairs near the courier lead by
/// proximity; otherwise the lower id leads.
pub(crate) fn is_primary(board: &Board, uid: UnitId, r: &mut Blockade) -> bool {
    if let Some(cached) = r.is_primary_cache {
        return cached;
    }
    let mut primary = true;
    if let Some(partner) = r.partner.filter(|p| board.units.contains_key(p)) {
        let step = board.step;
        let cur = board.unit_cell(uid, step);
        let par = board.unit_cell(partner, step);
        let opp = opp_cell(board, r);
        if board.man_dist(cur, par) == 1
            && (board.man_dist(cur, opp) < 10 || board.man_dist(par, opp) < 10)
        {
            primary = board.man_dist(cur, opp) < board.man_dist(par, opp);
        } else {
            primary = uid < partner;
        }
    }
    r.is_primary_cache = Some(primary);
    primary
}

fn make(factory: FactoryId, target: UnitId, target_factory: FactoryId, partner: Option<UnitId>, last_factory: Option<FactoryId>, step: Step) -> Role {
    Role::Blockade(Blockade {
        factory,
        target_unit: Some(target),
        target_factory,
        partner,
        last_courier_factory: last_factory,
        last_courier_step: step,
        goal: Some(Goal::Factory(factory)),
        next_goals: None,
        force_direction: None,
        avoid: None,
        push: false,
        straightline: false,
        goal_cell_cache: None,
        is_primary_cache: None,
    })
}

/// A light at an ice-conflict factory intercepts an inbound water courier.
pub fn from_transition_block_water_transporter(
    board: &mut Board,
    uid: UnitId,
    step: Step,
) -> Option<Role> {
    let i = board.idx(step);
    if i != 0 || board.unit(uid).class != RobotClass::Light {
        return None;
    }
    if matches!(
        board.unit(uid).role.as_ref().map(Role::kind),
        Some(crate::roles::RoleKind::Blockade | crate::roles::RoleKind::WaterTransporter)
    ) {
        return None;
    }
    let cur = board.unit_cell(uid, step);
    let factory = crate::roles::home_factory(board, uid, step);
    let target_factory = board
        .factory(factory)
        .mode
        .as_ref()
        .and_then(crate::modes::Mode::ice_conflict_target)?;
    if !board.factories.contains_key(&target_factory) || board.man_dist_factory(cur, factory) >= 5 {
        return None;
    }

    let blockades: Vec<UnitId> = board
        .factory_units(factory, step)
        .into_iter()
        .filter(|&u| {
            board.unit(u).class == RobotClass::Light
                && matches!(&board.unit(u).role, Some(Role::Blockade(_)))
        })
        .collect();
    if blockades.len() >= 2 {
        return None;
    }

    for opp in board.opp_units() {
        if board.unit(opp).class != RobotClass::Light
            || !carries_or_fetches_water(board, opp, i)
            || board.cell(board.unit_cell(opp, step)).factory_id == Some(target_factory)
        {
            continue;
        }
        let mut partner = None;
        let mut already_blockaded = false;
        for &b in &blockades {
            if let Some(Role::Blockade(br)) = &board.unit(b).role {
                if br.target_unit == Some(opp) {
                    if br.partner.is_some() {
                        already_blockaded = true;
                    } else {
                        partner = Some(b);
                    }
                }
            }
        }
        if already_blockaded {
            continue;
        }
        if let Some(p) = partner {
            if let Some(Role::Blockade(pr)) = &mut board.unit_mut(p).role {
                pr.partner = Some(uid);
            }
        }
        let last_factory = board
            .strategy
            .unit_stats
            .get(&opp)
            .and_then(|s| s.last_factory_id);
        info!(unit = uid, target = opp, "blockading water courier");
        return Some(make(factory, opp, target_factory, partner, last_factory, step));
    }
    None
}

/// An active blockade retargets to a courier making better progress than its
/// current one.
pub fn from_transition_block_different_water_transporter(
    board: &mut Board,
    uid: UnitId,
    step: Step,
) -> Option<Role> {
    let i = board.idx(step);
    if i != 0 || board.unit(uid).class != RobotClass::Light {
        return None;
    }
    let Some(Role::Blockade(mut r)) = board.unit(uid).role.clone() else {
        return None;
    };
    let cur = board.unit_cell(uid, step);
    let ocell = opp_cell(board, &r);
    // Already locked in a good screen: no churn.
    if r.target_unit.is_some() && engaged(board, uid, &mut r, step) {
        return None;
    }

    let factory = crate::roles::home_factory(board, uid, step);
    let blockades: Vec<UnitId> = board
        .factory_units(factory, step)
        .into_iter()
        .filter(|&u| {
            board.unit(u).class == RobotClass::Light
                && matches!(&board.unit(u).role, Some(Role::Blockade(_)))
        })
        .collect();

    let cur_route = match r.target_unit {
        Some(t) => {
            let max_len = board.man_dist_factory(ocell, r.target_factory).min(10).max(1);
            board.future_route(t, max_len as usize, None, Some(r.target_factory), true)
        }
        None => vec![ocell],
    };
    let progress = |route: &[CellId]| -> (i32, i32) {
        let start = board.man_dist_factory(route[0], r.target_factory);
        let end = board.man_dist_factory(*route.last().expect("non-empty"), r.target_factory);
        let rate = if route.len() == 1 {
            0
        } else {
            100 * (start - end) / (route.len() as i32 - 1)
        };
        (end, rate)
    };
    let (cur_end, cur_rate) = progress(&cur_route);

    for opp in board.opp_units() {
        if board.unit(opp).class != RobotClass::Light
            || r.target_unit == Some(opp)
            || !carries_or_fetches_water(board, opp, i)
            || board.cell(board.unit_cell(opp, step)).factory_id == Some(r.target_factory)
        {
            continue;
        }
        let opp_pos = board.unit_cell(opp, step);
        let max_len = board.man_dist_factory(opp_pos, r.target_factory).min(10).max(1);
        let opp_route = board.future_route(opp, max_len as usize, None, Some(r.target_factory), true);
        let (opp_end, opp_rate) = progress(&opp_route);
        let opp_dist = board.man_dist(cur, board.unit_cell(opp, board.step));
        let better = (opp_end <= cur_end - 2 && opp_rate >= cur_rate)
            || (opp_rate == 100 && cur_rate <= 0 && opp_end <= cur_end && opp_dist <= 20);
        if !better {
            continue;
        }
        let mut partner = None;
        let mut already_blockaded = false;
        for &b in &blockades {
            if b == uid {
                continue;
            }
            if let Some(Role::Blockade(br)) = &board.unit(b).role {
                if br.target_unit == Some(opp) {
                    if br.partner.is_some() {
                        already_blockaded = true;
                    } else {
                        partner = Some(b);
                    }
                }
            }
        }
        if already_blockaded {
            continue;
        }
        if let Some(p) = partner {
            if let Some(Role::Blockade(pr)) = &mut board.unit_mut(p).role {
                pr.partner = Some(uid);
            }
        }
        info!(unit = uid, old = ?r.target_unit, new = opp, "blockade retargets");
        let last_factory = board
            .strategy
            .unit_stats
            .get(&opp)
            .and_then(|s| s.last_factory_id);
        return Some(make(factory, opp, r.target_factory, partner.or(r.partner), last_factory, step));
    }
    None
}

pub(crate) fn is_valid(board: &mut Board, uid: UnitId, r: &mut Blockade, step: Step) -> bool {
    let i = board.idx(step);
    if i > 0 {
        return true;
    }

    // Drop the partner link if they were reassigned.
    if let Some(p) = r.partner {
        let still_paired = matches!(
            board.get_unit(p).and_then(|u| u.role.as_ref()),
            Some(Role::Blockade(pr)) if pr.target_factory == r.target_factory
        );
        if !still_paired {
            r.partner = None;
        }
    }

    let factory_ok = board.factories.contains_key(&r.factory);
    let target_factory_ok = board.factories.contains_key(&r.target_factory);
    let target_is_valid = factory_ok
        && target_factory_ok
        && r.target_unit.is_some_and(|t| {
            board.units.contains_key(&t)
                && carries_or_fetches_water(board, t, i)
                && board.cell(board.unit_cell(t, step)).factory_id != Some(r.target_factory)
        });

    if target_is_valid {
        r.last_courier_step = step;
        let t = r.target_unit.expect("checked");
        let prev_prev_water = board
            .strategy
            .unit_stats
            .get(&t)
            .map_or(0, |s| s.prev_prev_water);
        let t_cell = board.unit_cell(t, step);
        if board.unit(t).water[i] > prev_prev_water {
            if let Some(f) = board.cell(t_cell).factory_id {
                r.last_courier_factory = Some(f);
            }
        }
    } else if r.last_courier_step + 1 == step && factory_ok && target_factory_ok {
        // The courier vanished (delivered or died); keep the screen up and
        // anticipate the next one.
        r.target_unit = None;
        r.goal = Some(Goal::Factory(r.factory));
        info!(unit = uid, "blockade transitions to anticipation");
    }

    let anticipation_is_valid = factory_ok
        && target_factory_ok
        && r.last_courier_factory.is_some_and(|f| board.factories.contains_key(&f))
        && step < r.last_courier_step + 150
        && board.factory(r.target_factory).water[i] < board.config.blockade_anticipation_water;

    target_is_valid || anticipation_is_valid
}

/// The projected route the courier takes to the target factory, starting
/// from its committed queue and finished by a low-rubble-preferring path.
pub(crate) fn target_route(board: &mut Board, uid: UnitId, r: &Blockade, step: Step) -> Vec<CellId> {
    let cur = board.unit_cell(uid, step);
    let ocell = opp_cell(board, r);
    let max_len = board.man_dist_factory(ocell, r.target_factory).min(10).max(1) as usize;
    let mut route = match r.target_unit {
        Some(t) => board.future_route(t, max_len, None, Some(r.target_factory), true),
        None => vec![ocell],
    };

    // At standoff range assume they may reroute: replan from their next real
    // move instead of trusting the stale queue.
    if let Some(t) = r.target_unit {
        if route.contains(&cur) && board.man_dist(cur, ocell) == 2 {
            route = vec![ocell];
            let (next_cell, _) =
                board.goal_to_move(step, t, board.factory_center(r.target_factory), None);
            if next_cell != ocell {
                route.push(next_cell);
            }
        }
    }

    if let Some(idx) = route
        .iter()
        .position(|&c| board.man_dist_factory(c, r.target_factory) <= 1)
    {
        route.truncate(idx + 1);
    }
    let end = *route.last().expect("non-empty");
    if board.cell(end).factory_id != Some(r.target_factory) {
        let target_factory = r.target_factory;
        let my_team = board.me.id;
        let tail = board.route(
            step,
            &[end],
            r.target_unit,
            DistOptions {
                dest_cell: Some(board.factory_center(target_factory)),
                dest_cond: Some(&move |b: &Board, _s: Step, c: CellId| {
                    b.cell(c).factory_id == Some(target_factory)
                }),
                avoid_cond: Some(&move |b: &Board, _s: Step, c: CellId| {
                    b.cell(c).factory_id.is_some_and(|f| b.factory(f).team == my_team)
                }),
                unit_move_cost: Some(80),
                unit_rubble_rate_centi: Some(300),
                ..DistOptions::default()
            },
        );
        if !tail.is_empty() {
            route.pop();
            route.extend(tail);
        }
    }
    if board
        .cell(*route.last().expect("non-empty"))
        .factory_id
        == Some(r.target_factory)
    {
        route
    } else {
        Vec::new()
    }
}

/// Interception-post score; all features scaled by 100.
fn goal_cell_score(board: &mut Board, uid: UnitId, r: &Blockade, step: Step, cell: CellId, route: &[CellId]) -> i64 {
    let i = board.idx(step);
    let cur = board.unit_cell(uid, step);
    let ocell = opp_cell(board, r);
    let c = board.cell(cell).clone();

    let self_dist = i64::from(board.man_dist(cell, cur));
    let o_dist = i64::from(board.man_dist(cell, ocell));
    let own_factory_dist = i64::from(board.man_dist_factory(cell, r.factory));
    let opp_factory_dist = i64::from(board.man_dist_factory(cell, r.target_factory));
    let rubble = i64::from(c.rubble[i] / 20 * 20);
    let adj_rubble: i64 = board
        .neighbors(cell)
        .into_iter()
        .map(|n| i64::from(board.cell(n).rubble[i] / 20 * 20))
        .sum();
    let mut traffic: i64 = 0;
    for n in std::iter::once(cell).chain(board.neighbors(cell)) {
        let (lt, ht) = board.traffic(n);
        traffic += 50 * i64::from(lt + ht) / 1000;
    }
    let mut other_opp_factory_dist = 100i64;
    for f in board.opp_factories() {
        if f == r.target_factory {
            continue;
        }
        other_opp_factory_dist =
            other_opp_factory_dist.min(i64::from(board.man_dist_factory(cell, f)));
    }
    let tf = board.factory(r.target_factory);
    let factory_dx = i64::from(((c.x - tf.x).abs() - 1).max(0));
    let factory_dy = i64::from(((c.y - tf.y).abs() - 1).max(0));
    let in_route = i64::from((factory_dx > 0 && factory_dy > 0) || route.contains(&cell));
    let par_dist = match r.partner.filter(|p| board.units.contains_key(p)) {
        Some(p) => i64::from(board.man_dist(cell, board.unit_cell(p, step))),
        None => 10,
    };

    let mut score: i64 = 0;
    score += self_dist * -25;
    score += i64::from(self_dist == 0) * 300;
    score += i64::from(par_dist <= 1) * 200;
    score += own_factory_dist.min(2) * 50;
    score += own_factory_dist.max(3) * -50;
    score += opp_factory_dist.min(8) * 500;
    score += opp_factory_dist.max(12) * -50;
    score += rubble * -10;
    score += adj_rubble * -10 / 4;
    score += traffic * -12;
    score += other_opp_factory_dist.min(6) * 200;
    score += other_opp_factory_dist.min(25) * 300;
    score += in_route * 500;
    score += i64::from(self_dist <= o_dist - 2) * 10_000;
    score
}

/// Cells where the pair could set its screen, diagonal-forward of the
/// courier's projected route.
pub(crate) fn route_candidates(board: &mut Board, uid: UnitId, r: &Blockade, step: Step) -> Vec<CellId> {
    let route = target_route(board, uid, r, step);
    let mut candidates = std::collections::BTreeSet::new();
    let mut prev: Option<CellId> = route.first().copied();
    let tf_center = board.factory_center(r.target_factory);
    let footprint_d = |b: &Board, cell: CellId| {
        let c = b.cell(cell);
        let t = b.cell(tf_center);
        (((c.x - t.x).abs() - 1).max(0), ((c.y - t.y).abs() - 1).max(0))
    };
    for &cell in &route {
        if board.cell(cell).factory_id.is_some_and(|f| board.factory(f).team != board.me.id) {
            prev = Some(cell);
            continue;
        }
        let Some(p) = prev else { continue };
        let (pdx, pdy) = footprint_d(board, p);
        for n in std::iter::once(cell).chain(board.neighbors(cell)) {
            if board.assigned_unit(n, step).is_some() {
                continue;
            }
            if board.cell(n).factory_id.is_some_and(|f| board.factory(f).team != board.me.id) {
                continue;
            }
            if board.man_dist(n, p) != 2 {
                continue;
            }
            let (ndx, ndy) = footprint_d(board, n);
            if (ndx < pdx && ndy < pdy)
                || (ndx < pdx && ndy == 0 && pdy == 0)
                || (ndy < pdy && ndx == 0 && pdx == 0)
            {
                candidates.insert(n);
            }
        }
        prev = Some(cell);
    }

    // A pair that has already linked up may take any route cell directly.
    if let Some(p) = r.partner.filter(|p| board.units.contains_key(p)) {
        let cur = board.unit_cell(uid, step);
        let oc = i64::from(board.man_dist(cur, opp_cell(board, r)));
        let cp = i64::from(board.man_dist(cur, board.unit_cell(p, step)));
        if oc / 2 - 1 + cp < oc / 2 + 1 {
            candidates.extend(route.iter().copied().filter(|&c| !board.cell(c).has_factory()));
        }
    }
    candidates.into_iter().collect()
}

pub(crate) fn best_goal_cell(board: &mut Board, uid: UnitId, r: &Blockade, step: Step) -> CellId {
    let route = target_route(board, uid, r, step);
    let candidates = route_candidates(board, uid, r, step);
    let mut best: Option<(i64, CellId)> = None;
    for cell in candidates {
        let score = goal_cell_score(board, uid, r, step, cell, &route);
        if best.map_or(true, |(bs, _)| score > bs) {
            best = Some((score, cell));
        }
    }
    best.map_or_else(|| opp_cell(board, r), |(_, cell)| cell)
}

/// An engaged pair is adjacent, screening the factory, and within reach of
/// the courier.
pub(crate) fn engaged(board: &Board, uid: UnitId, r: &mut Blockade, step: Step) -> bool {
    let Some(p) = r.partner.filter(|p| board.units.contains_key(p)) else {
        return false;
    };
    let cur = board.unit_cell(uid, step);
    let par = board.unit_cell(p, step);
    let ocell = opp_cell(board, r);
    let tf = board.factory_center(r.target_factory);
    board.man_dist(cur, par) == 1
        && board.man_dist(cur, ocell) <= 5
        && board
            .neighbors(cur)
            .into_iter()
            .chain(board.neighbors(par))
            .any(|c| board.is_between(c, ocell, tf))
}

fn set_partner_scripts(board: &mut Board, partner: Option<UnitId>, step: Step, scripts: &[Script]) {
    let Some(p) = partner.filter(|p| board.units.contains_key(p)) else {
        return;
    };
    if let Some(Role::Blockade(pr)) = &mut board.unit_mut(p).role {
        pr.next_goals = Some((step + 1, scripts.to_vec()));
    }
}

/// Dodge direction when a heavier/charged threat closes on the pair: both
/// units shift the same way, keeping the screen, avoiding the threat's
/// probable cells, and staying between courier and factory.
fn goal_cell_avoid_threat(
    board: &mut Board,
    uid: UnitId,
    r: &mut Blockade,
    step: Step,
) -> Option<CellId> {
    if board.idx(step) != 0 {
        return None;
    }
    let partner = r.partner?;
    let cur = board.unit_cell(uid, step);
    let par = board.unit_cell(partner, step);
    let ocell = opp_cell(board, r);
    let min_power = board.unit(uid).power[0].min(board.unit(partner).power[0]);

    let mut threats = Vec::new();
    for n in board.neighbors(cur).into_iter().chain(board.neighbors(par)) {
        if let Some(t) = board.unit_at(n, board.step, Some(board.opp.id)) {
            let tu = board.unit(t);
            if tu.class == RobotClass::Heavy || tu.power[0] >= min_power {
                if !threats.contains(&t) {
                    threats.push(t);
                }
            }
        }
    }
    if threats.is_empty() {
        return None;
    }

    let mut possible = std::collections::BTreeSet::new();
    let mut probable = std::collections::BTreeSet::new();
    for &t in &threats {
        let tcell = board.unit_cell(t, step);
        for n in board.neighbors(tcell) {
            if !board.cell(n).has_factory()
                || board.cell(n).factory_id.is_some_and(|f| board.factory(f).team == board.opp.id)
            {
                possible.insert(n);
            }
            if let Some(mine) = board.unit_at(n, step, Some(board.me.id)) {
                let tu = board.unit(t);
                let mu = board.unit(mine);
                if tu.power[0] > mu.power[0]
                    || (tu.class == RobotClass::Heavy && mu.class == RobotClass::Light)
                {
                    probable.insert(n);
                }
            }
        }
        let head = board.unit(t).action_queue.first().copied();
        if let Some(a) = head.filter(|a| a.kind == ActionKind::Move && a.direction != Direction::Center)
        {
            let (dx, dy) = a.direction.delta();
            if let Some(n) = board.neighbor(tcell, dx, dy) {
                probable.insert(n);
            }
        } else if board.unit(t).class == RobotClass::Heavy {
            probable.insert(tcell);
        }
    }

    // Cutoff cells: the open neighbors of the footprint cell nearest the
    // courier.
    let mut nearest = board.factory_center(r.target_factory);
    let mut min_d = i32::MAX;
    for cell in board.factory_cells(r.target_factory) {
        let d = board.man_dist(cell, ocell);
        if d < min_d {
            nearest = cell;
            min_d = d;
        }
    }
    let cutoff_cells: Vec<CellId> = board
        .neighbors(nearest)
        .into_iter()
        .filter(|&c| !board.cell(c).has_factory())
        .collect();

    let tf = board.factory_center(r.target_factory);
    let mut best: Option<(i64, Direction, CellId)> = None;
    for direction in Direction::MOVES {
        let (dx, dy) = direction.delta();
        let Some(next1) = board.neighbor(cur, dx, dy) else { continue };
        let Some(next2) = board.neighbor(par, dx, dy) else { continue };
        if board.unit_at(next1, step + 1, None).is_some()
            || board.unit_at(next2, step + 1, None).is_some()
        {
            continue;
        }
        let hostile = |c: CellId| {
            board.cell(c).factory_id.is_some_and(|f| board.factory(f).team != board.me.id)
        };
        if hostile(next1) || hostile(next2) {
            continue;
        }
        let still_between = board
            .neighbors(next1)
            .into_iter()
            .chain(board.neighbors(next2))
            .any(|c| board.is_between(c, ocell, tf));
        if !still_between {
            continue;
        }

        let mut worst_cutoff_diff = i64::MAX;
        for &cutoff in &cutoff_cells {
            let own = i64::from(board.man_dist(cutoff, next1));
            let part = i64::from(board.man_dist(cutoff, next2));
            let opp = i64::from(board.man_dist(cutoff, ocell));
            worst_cutoff_diff = worst_cutoff_diff.min(opp - own.min(part));
        }
        let new_opp_dist = board.man_dist(next1, ocell).min(board.man_dist(next2, ocell));
        let fdist = board
            .man_dist_factory(next1, r.target_factory)
            .min(board.man_dist_factory(next2, r.target_factory));

        // Scores scaled by 100.
        let mut score: i64 = 10_000;
        if possible.contains(&next1) {
            score -= 1_000;
        }
        if possible.contains(&next2) {
            score -= 1_000;
        }
        if probable.contains(&next1) {
            score -= 20_000;
        }
        if probable.contains(&next2) {
            score -= 20_000;
        }
        score += match new_opp_dist {
            1 => 100,
            2 => 150,
            3 => 100,
            _ => 0,
        };
        for n in std::iter::once(ocell).chain(board.neighbors(ocell)) {
            if board.is_between(next1, n, tf) {
                score += if n == ocell { 50 } else { 25 };
            }
            if board.is_between(next2, n, tf) {
                score += if n == ocell { 50 } else { 25 };
            }
        }
        if worst_cutoff_diff <= -1 {
            score -= 20_000;
        } else if worst_cutoff_diff == 0 {
            score -= 5_000;
        } else if worst_cutoff_diff == 1 {
            score -= 2_000;
        }
        if fdist == 1 {
            score -= 300;
        } else if fdist == 2 {
            score -= 50;
        }
        for n in board.neighbors(next1).into_iter().chain(board.neighbors(next2)) {
            if probable.contains(&n) {
                score -= 500;
            }
            if let Some(other) = board.unit_at(n, step, Some(board.opp.id)) {
                let ou = board.unit(other);
                if (ou.power[0] > min_power || ou.class == RobotClass::Heavy)
                    && !threats.contains(&other)
                {
                    score -= 20_000;
                }
            }
        }
        if best.map_or(true, |(bs, _, _)| score > bs) {
            best = Some((score, direction, next1));
        }
    }

    let (_, direction, next_cell) = best?;
    info!(unit = uid, ?direction, "blockade pair dodges threat");
    r.avoid = Some(direction);
    r.force_direction = Some((step, direction));
    r.next_goals = Some((step + 1, vec![Script::Swap, Script::Chill]));
    set_partner_scripts(board, r.partner, step, &[Script::Swap, Script::Chill]);
    r.goal_cell_cache = Some(next_cell);
    Some(next_cell)
}

pub(crate) fn goal_cell(board: &mut Board, uid: UnitId, r: &mut Blockade, step: Step) -> CellId {
    let i = board.idx(step);
    let cur = board.unit_cell(uid, step);
    let ocell = opp_cell(board, r);
    let opp_nonfactory = match board.cell(ocell).factory_id {
        Some(f) => board.factory_neighbor_toward(f, cur),
        None => ocell,
    };
    let opp_dist = board.man_dist(cur, ocell);

    if cur == board.factory_center(r.factory) {
        return opp_nonfactory;
    }
    if let Some(Goal::Factory(f)) = r.goal {
        return board.factory_center(f);
    }

    // Scripted follow-ups from a previous push/slide/dodge run first.
    if let Some((ng_step, scripts)) = r.next_goals.clone() {
        if step >= ng_step && r.partner.is_some() && !scripts.is_empty() {
            let partner = r.partner.expect("checked");
            let cell = match scripts[0] {
                Script::Swap if board.units.contains_key(&partner) => {
                    board.unit_cell(partner, step)
                }
                Script::Swap | Script::Chill => cur,
                Script::Dir(d) => {
                    let (dx, dy) = d.delta();
                    board.neighbor(cur, dx, dy).unwrap_or(cur)
                }
            };
            r.force_direction = Some((step, board.direction_to(cur, cell)));
            if scripts.len() > 1 {
                r.next_goals = Some((ng_step, scripts[1..].to_vec()));
            }
            r.goal_cell_cache = Some(cell);
            return cell;
        }
    }

    if let Some(cached) = r.goal_cell_cache {
        return cached;
    }

    let mut primary_on_the_move = false;
    let par_cell = r
        .partner
        .filter(|p| board.units.contains_key(p))
        .map(|p| board.unit_cell(p, step));
    if let Some(par) = par_cell {
        let partner = r.partner.expect("checked");
        let min_power = board.unit(uid).power[0].min(board.unit(partner).power[0]);
        let tf = board.factory_center(r.target_factory);

        if r.target_unit.is_some() && engaged(board, uid, r, step) {
            r.goal_cell_cache = Some(cur);

            if is_primary(board, uid, r) {
                if let Some(cell) = goal_cell_avoid_threat(board, uid, r, step) {
                    return cell;
                }
                let target = r.target_unit.expect("engaged");
                let (cc, oc, tc) =
                    (board.cell(cur).clone(), board.cell(ocell).clone(), board.cell(tf).clone());
                let opp_dx = oc.x - cc.x;
                let opp_dy = oc.y - cc.y;
                let fd = |c: &crate::cell::Cell| {
                    (((c.x - tc.x).abs() - 1).max(0), ((c.y - tc.y).abs() - 1).max(0))
                };
                let (opp_fdx, opp_fdy) = fd(&oc);
                let (fdx, fdy) = fd(&cc);

                // Slide: diagonal courier, stay square to the factory.
                if (1..=2).contains(&opp_dx.abs()) && (1..=2).contains(&opp_dy.abs()) {
                    let slide_worthwhile =
                        opp_fdx <= fdx || opp_fdy <= fdy || fdx <= 4 || fdy <= 4;
                    let enough_power = !((opp_dx.abs() == 2 || opp_dy.abs() == 2)
                        && min_power <= board.unit(target).power[0] + 3);
                    if slide_worthwhile && enough_power {
                        let mut best: Option<(i64, CellId)> = None;
                        for n in board.neighbors(cur) {
                            if board.man_dist(n, ocell) < opp_dist
                                && board.unit_at(n, step + 1, None).is_none()
                                && board.is_between(n, ocell, tf)
                                && !board
                                    .cell(n)
                                    .factory_id
                                    .is_some_and(|f| board.factory(f).team != board.me.id)
                            {
                                let nc = board.cell(n);
                                let (nfdx, nfdy) = fd(nc);
                                let ncdx = i64::from((nc.x - tc.x).abs());
                                let ncdy = i64::from((nc.y - tc.y).abs());
                                // Scores scaled by 10 for the center-line
                                // tie-break.
                                let score =
                                    10 * i64::from(nfdx.min(nfdy)) + ncdx.min(ncdy);
                                if best.map_or(true, |(bs, _)| score > bs) {
                                    best = Some((score, n));
                                }
                            }
                        }
                        if let Some((_, cell)) = best {
                            debug!(unit = uid, "blockade primary slides");
                            let d = board.direction_to(cur, cell);
                            r.next_goals = Some((step + 1, vec![Script::Dir(d)]));
                            set_partner_scripts(board, r.partner, step, &[Script::Dir(d)]);
                            r.goal_cell_cache = Some(cell);
                            return cell;
                        }
                    }
                }

                // Partner directly behind: shift the line toward the factory.
                let sec_dx = oc.x - board.cell(par).x;
                let sec_dy = oc.y - board.cell(par).y;
                if sec_dx == 2 * opp_dx && sec_dy == 2 * opp_dy {
                    for n in board.neighbors(cur) {
                        if n != par
                            && board.unit_at(n, step + 1, None).is_none()
                            && board.man_dist_factory(n, r.target_factory)
                                <= board.man_dist_factory(cur, r.target_factory)
                            && !board
                                .cell(n)
                                .factory_id
                                .is_some_and(|f| board.factory(f).team != board.me.id)
                        {
                            debug!(unit = uid, "blockade primary slides in-line");
                            r.next_goals = Some((step + 1, vec![Script::Chill]));
                            set_partner_scripts(board, r.partner, step, &[Script::Chill]);
                            r.goal_cell_cache = Some(n);
                            return n;
                        }
                    }
                }

                // Push A: adjacent courier in the better spot.
                if opp_dist == 1 && opp_fdx <= fdx && opp_fdy <= fdy {
                    if board.unit_at(opp_nonfactory, step + 1, None).is_none() {
                        debug!(unit = uid, "blockade primary pushes");
                        let d = board.direction_to(cur, ocell);
                        r.next_goals = Some((step + 1, vec![Script::Dir(d)]));
                        set_partner_scripts(board, r.partner, step, &[Script::Dir(d)]);
                        r.push = true;
                        r.goal_cell_cache = Some(opp_nonfactory);
                        return opp_nonfactory;
                    }
                }

                // Push B: one-cell gap near the factory, power advantage.
                if opp_dist == 2
                    && fdx <= 2
                    && fdy <= 2
                    && (oc.x == cc.x || oc.y == cc.y)
                    && board.unit(uid).power[i] >= board.unit(target).power[i]
                {
                    let toward = board.neighbor_toward(cur, ocell);
                    if board.unit_at(toward, step + 1, None).is_none() {
                        debug!(unit = uid, "blockade primary closes the gap");
                        r.next_goals = Some((step + 1, vec![Script::Swap, Script::Chill]));
                        set_partner_scripts(board, r.partner, step, &[Script::Swap, Script::Chill]);
                        r.push = true;
                        r.goal_cell_cache = Some(toward);
                        return toward;
                    }
                }

                // Still a workable post? Swap under threat, else chill.
                let candidates = route_candidates(board, uid, r, step);
                if opp_dist == 1
                    || candidates.contains(&cur)
                    || candidates.contains(&par)
                    || (opp_dist == 2
                        && [cur, par].iter().any(|&c| board.is_between(c, ocell, tf)))
                {
                    let mut threat_exists = false;
                    for n in board.neighbors(cur).into_iter().chain(board.neighbors(par)) {
                        if let Some(t) = board.unit_at(n, step, Some(board.opp.id)) {
                            let tu = board.unit(t);
                            if tu.class == RobotClass::Light {
                                let spec = *tu.spec(&board.rules);
                                let into_cur = board.man_dist(n, cur) == 1
                                    && tu.power[i]
                                        >= spec.move_power_cost(board.cell(cur).rubble[i]);
                                let into_par = board.man_dist(n, par) == 1
                                    && tu.power[i]
                                        >= spec.move_power_cost(board.cell(par).rubble[i]);
                                if into_cur || into_par {
                                    threat_exists = true;
                                    break;
                                }
                            }
                        }
                    }
                    r.next_goals = Some((step + 1, vec![Script::Chill]));
                    set_partner_scripts(board, r.partner, step, &[Script::Chill]);
                    if threat_exists {
                        debug!(unit = uid, "blockade primary swaps");
                        r.goal_cell_cache = Some(par);
                    } else {
                        debug!(unit = uid, "blockade primary chills");
                    }
                    return r.goal_cell_cache.expect("set above");
                }
                // Need to keep up with the courier; fall through to routing.
                primary_on_the_move = true;
                r.goal_cell_cache = None;
            } else {
                // Secondary mirrors the primary.
                let primary_moved = board.unit(partner).pos[i + 1].is_some();
                if primary_moved {
                    let (p_avoid, p_push) = match &board.unit(partner).role {
                        Some(Role::Blockade(pr)) => (pr.avoid, pr.push),
                        _ => (None, false),
                    };
                    if let Some(d) = p_avoid {
                        let (dx, dy) = d.delta();
                        let cell = board.neighbor(cur, dx, dy).unwrap_or(cur);
                        r.force_direction = Some((step, d));
                        r.goal_cell_cache = Some(cell);
                        debug!(unit = uid, "blockade secondary dodges with primary");
                        return cell;
                    }
                    if p_push {
                        let pc = board.cell(par);
                        let occ = board.cell(ocell);
                        let dx = (occ.x - pc.x).signum();
                        let dy = (occ.y - pc.y).signum();
                        let mut cell = board.neighbor(cur, dx, dy).unwrap_or(par);
                        if board.cell(cell).factory_id.is_some_and(|f| board.factory(f).team != board.me.id)
                        {
                            cell = par;
                        }
                        r.goal_cell_cache = Some(cell);
                        debug!(unit = uid, "blockade secondary pushes with primary");
                        return cell;
                    }
                    r.goal_cell_cache = Some(par);
                    debug!(unit = uid, "blockade secondary follows");
                    return par;
                }
                r.goal_cell_cache = Some(cur);
                return cur;
            }
        } else if r.target_unit.is_some()
            && board.man_dist(cur, par) <= 2
            && board
                .neighbors(cur)
                .into_iter()
                .chain(board.neighbors(par))
                .any(|c| board.is_between(c, ocell, tf))
            && opp_dist > 5
        {
            // Courier far off but screen in place: hold and charge.
            let target = r.target_unit.expect("checked");
            if min_power <= board.unit(target).power[0] {
                let quiet = board.threat_units(cur, 1, 1, true, true).is_empty()
                    && board.threat_units(par, 1, 1, true, true).is_empty();
                if quiet {
                    r.next_goals = Some((step + 1, vec![Script::Chill]));
                    set_partner_scripts(board, r.partner, step, &[Script::Chill]);
                    r.goal_cell_cache = Some(cur);
                    return cur;
                }
            }
        }

        // Secondary linking up: flank the primary's post.
        if !is_primary(board, uid, r) {
            let partner_chasing = matches!(
                board.unit(partner).role.clone(),
                Some(Role::Blockade(pr)) if pr.target_unit.map(Goal::Unit) == pr.goal && pr.target_unit.is_some()
            );
            if partner_chasing {
                let par_goal = match board.unit(partner).role.clone() {
                    Some(Role::Blockade(mut pr)) => best_goal_cell(board, partner, &mut pr, step),
                    _ => par,
                };
                let pg = board.cell(par_goal).clone();
                let dx = pg.x - board.cell(tf).x;
                let dy = pg.y - board.cell(tf).y;
                let mut best: Option<(i64, CellId)> = None;
                for n in board.neighbors(par_goal) {
                    if board.assigned_unit(n, step).is_some() {
                        continue;
                    }
                    if board.cell(n).factory_id.is_some_and(|f| board.factory(f).team != board.me.id)
                    {
                        continue;
                    }
                    let mut score =
                        -crate::pathfinding::naive_cost(board, step, uid, cur, n, false);
                    if dx.abs() >= dy.abs() + 2 && board.cell(n).x == pg.x {
                        score += 4;
                    } else if dy.abs() >= dx.abs() + 2 && board.cell(n).y == pg.y {
                        score += 4;
                    }
                    if best.map_or(true, |(bs, _)| score > bs) {
                        best = Some((score, n));
                    }
                }
                if let Some((_, cell)) = best {
                    maybe_straightline(board, uid, r, step, cell);
                    r.goal_cell_cache = Some(cell);
                    debug!(unit = uid, cell, "blockade secondary takes the flank");
                    return cell;
                }
            }
        }
    }

    // Unpaired (or repositioning) routing against the courier's route.
    let route = target_route(board, uid, r, step);
    let opp_factory_dist = board.man_dist_factory(ocell, r.target_factory);
    let own_factory_dist = board.man_dist_factory(cur, r.target_factory);
    let chosen = if route.is_empty() {
        opp_nonfactory
    } else if opp_factory_dist <= own_factory_dist {
        let toward = board.neighbor_toward(cur, board.factory_center(r.target_factory));
        let outpowered = r
            .target_unit
            .is_some_and(|t| board.unit(uid).power[0] > board.unit(t).power[0] + 5);
        if outpowered && !board.cell(toward).has_factory() {
            toward
        } else if route.len() >= 2 {
            route[route.len() - 2]
        } else {
            opp_nonfactory
        }
    } else if opp_dist > 3 {
        if route.len() >= 4 {
            best_goal_cell(board, uid, r, step)
        } else {
            opp_nonfactory
        }
    } else if opp_dist >= 2 {
        if i == 0 && route.len() >= 4 {
            best_goal_cell(board, uid, r, step)
        } else {
            opp_nonfactory
        }
    } else if route.len() >= 2 {
        route[route.len() - 2]
    } else {
        opp_nonfactory
    };

    maybe_straightline(board, uid, r, step, chosen);

    // A primary stepping into its partner is really a swap; just hold.
    if primary_on_the_move {
        if let Some(par) = par_cell {
            if board.neighbor_toward(cur, chosen) == par {
                r.goal_cell_cache = Some(cur);
                return cur;
            }
        }
    }
    if let Some(par) = par_cell {
        if is_primary(board, uid, r) && board.man_dist(cur, par) == 1 && chosen == par {
            r.goal_cell_cache = Some(cur);
            return cur;
        }
    }
    r.goal_cell_cache = Some(chosen);
    chosen
}

/// When the courier is about to beat us to the goal, drop the rubble
/// avoidance and race it in a straight line.
fn maybe_straightline(board: &Board, uid: UnitId, r: &mut Blockade, step: Step, goal: CellId) {
    let i = board.idx(step);
    let cur = board.unit_cell(uid, step);
    let Some(t) = r.target_unit else { return };
    let ocell = board.unit_cell(t, board.step);
    if board.unit(t).water[0] >= 5
        && board.man_dist(cur, goal) > 2
        && board.man_dist(ocell, goal) - 2 <= board.man_dist(cur, goal)
        && board.unit(uid).power[i] - board.unit(t).power[i] >= 10
    {
        r.straightline = true;
        debug!(unit = uid, cell = goal, "blockade straightlines");
    }
}

pub(crate) fn update_goal(board: &mut Board, uid: UnitId, r: &mut Blockade, step: Step) {
    let i = board.idx(step);
    let cur_power = board.unit(uid).power[i];
    let Some(Goal::Factory(_)) = r.goal else {
        // Heading for the courier already; recharge handles the power side.
        return;
    };
    let spec = *board.unit(uid).spec(&board.rules);
    if cur_power >= spec.battery_capacity - 3 {
        r.goal = r.target_unit.map(Goal::Unit);
        return;
    }

    let cur = board.unit_cell(uid, step);
    let ocell = opp_cell(board, r);
    let goal_cell = best_goal_cell(board, uid, r, step);
    let home = board.factory_center(r.factory);

    let dist_c2f = board.man_dist(cur, home);
    let dist_f2g = board.man_dist(home, goal_cell);
    let dist_c2g = board.man_dist(cur, goal_cell);

    // Between couriers, keep charging unless the post is getting far.
    if r.target_unit.is_none()
        && !(cur_power >= 120
            && 2 * dist_c2f >= board.man_dist_factory(ocell, r.target_factory))
    {
        return;
    }

    let full_minus_trip = |cost_f2g: i64, cost_c2g: i64, power_gain: i64| {
        i64::from(spec.battery_capacity) - cost_f2g
            <= i64::from(cur_power) - cost_c2g + power_gain + 3
    };
    let gain_for = |board: &Board, dist_diff: i32, start_delay: i32| -> i64 {
        if dist_diff <= 0 {
            return 0;
        }
        let start = step + start_delay.max(0) as u32;
        i64::from(board.unit(uid).power_gain_span(&board.rules, start, start + dist_diff as u32))
    };

    let naive_c2g = crate::pathfinding::naive_cost(board, step, uid, cur, goal_cell, false);
    let naive_f2g = crate::pathfinding::naive_cost(board, step, uid, home, goal_cell, false);
    if full_minus_trip(naive_f2g, naive_c2g, gain_for(board, dist_c2f + dist_f2g - dist_c2g, dist_c2g)) {
        let (cost_c2g, hops_c2g, _) = board.dist(
            step,
            &[cur],
            Some(uid),
            DistOptions { dest_cell: Some(goal_cell), ..DistOptions::default() },
        );
        let (cost_f2g, hops_f2g, _) = board.dist(
            step,
            &[home],
            Some(uid),
            DistOptions { dest_cell: Some(goal_cell), ..DistOptions::default() },
        );
        if cost_c2g != UNREACHABLE
            && cost_f2g != UNREACHABLE
            && full_minus_trip(cost_f2g, cost_c2g, gain_for(board, dist_c2f + hops_f2g - hops_c2g, hops_c2g))
        {
            // Enough margin to take the post directly.
            r.goal = r.target_unit.map(Goal::Unit);
            if i == 0 {
                debug!(unit = uid, cell = goal_cell, "blockade heads out");
            }
            return;
        }
    }

    // A loaded courier already closing in: no time to shop for power.
    if let Some(t) = r.target_unit {
        if board.unit(t).water[0] >= 5 {
            let opp_power = super::attacker::projected_power(board, t);
            let pickup_dist =
                board.man_dist_factory(cur, r.factory) + 1 + board.man_dist(home, goal_cell);
            if pickup_dist >= board.man_dist_factory(ocell, r.target_factory)
                && cur_power >= opp_power
            {
                r.goal = Some(Goal::Unit(t));
                if i == 0 {
                    debug!(unit = uid, "blockade intercepts without topping up");
                }
            }
        }
    }
}

pub(crate) fn do_phase(
    board: &mut Board,
    uid: UnitId,
    r: &mut Blockade,
    step: Step,
    phase: Phase,
) -> Option<crate::actions::UnitAction> {
    let role = Role::Blockade(r.clone());
    match phase {
        Phase::Move => {
            let goal = if let Some((fd_step, d)) = r.force_direction {
                if fd_step == step {
                    let (dx, dy) = d.delta();
                    let cur = board.unit_cell(uid, step);
                    board.neighbor(cur, dx, dy).unwrap_or(cur)
                } else {
                    goal_cell(board, uid, r, step)
                }
            } else {
                goal_cell(board, uid, r, step)
            };
            let role = Role::Blockade(r.clone());
            let action = crate::roles::do_move_to(board, uid, step, goal, &role);
            // Lock a stand-still whenever the courier is anywhere near so
            // later phases cannot wander this unit off its post.
            if action.is_none() {
                if let Some(t) = r.target_unit {
                    let opp = board.unit_cell(t, board.step);
                    if board.man_dist(board.unit_cell(uid, step), opp) <= 20 {
                        return board.unit_do_no_move(uid, step);
                    }
                }
            }
            action
        }
        Phase::Dig => None,
        Phase::Pickup => crate::roles::do_power_pickup(board, uid, step, &role, None, None),
        Phase::Transfer => crate::roles::do_transfer_resource_to_factory(board, uid, step, &role),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scratch_never_persists() {
        let b = Blockade {
            factory: 0,
            target_unit: Some(4),
            target_factory: 1,
            partner: Some(5),
            last_courier_factory: Some(1),
            last_courier_step: 40,
            goal: None,
            next_goals: Some((41, vec![Script::Swap])),
            force_direction: Some((41, Direction::North)),
            avoid: Some(Direction::East),
            push: true,
            straightline: true,
            goal_cell_cache: Some(9),
            is_primary_cache: Some(true),
        };
        let bytes = bincode::serialize(&b).unwrap();
        let back: Blockade = bincode::deserialize(&bytes).unwrap();
        assert!(back.next_goals.is_none());
        assert!(back.force_direction.is_none());
        assert!(!back.push);
        assert!(!back.straightline);
        assert_eq!(back.partner, Some(5));
        assert_eq!(back.last_courier_step, 40);
    }

    #[test]
    fn test_goal_is_factory() {
        let mut b = Blockade {
            factory: 3,
            target_unit: None,
            target_factory: 1,
            partner: None,
            last_courier_factory: Some(1),
            last_courier_step: 0,
            goal: Some(Goal::Factory(3)),
            next_goals: None,
            force_direction: None,
            avoid: None,
            push: false,
            straightline: false,
            goal_cell_cache: None,
            is_primary_cache: None,
        };
        assert!(b.goal_is_factory());
        b.goal = None;
        assert!(!b.goal_is_factory());
    }
}
