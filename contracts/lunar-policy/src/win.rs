//! Victory evaluation.
//!
//! Pure over a player snapshot: nothing is read from or written to storage,
//! and ties are broken only by EV, REP and name, so the same snapshot always
//! yields the same `WinEvaluation`.
//!
//! ## Rules
//! 1. A player qualifies when `ev >= ev_threshold` and `rep >= rep_threshold`;
//!    a threshold of 0 switches its dimension off.
//! 2. Nobody qualifies and the call is not forced → game continues.
//! 3. The candidate pool is the qualifiers, or everybody on a forced call
//!    where nobody qualified.
//! 4. Pool order: EV desc, REP desc, name asc.
//! 5. The leader is the first in that order. Everybody in the pool sharing
//!    the leader's `ev + rep` is tied with it.
//!    One → `Single` (threshold) / `Tiebreaker` (forced). Several →
//!    `Cooperative`.

use core::cmp::Ordering;

use soroban_sdk::{Env, Vec};

use crate::{Player, VictoryType, WinEvaluation, WinThresholds};

/// Combined score used to decide ties, widened to `i128`.
pub fn score(player: &Player) -> i128 {
    i128::from(player.ev) + i128::from(player.rep)
}

/// Whether `player` clears every threshold that is switched on.
pub fn meets_threshold(player: &Player, thresholds: &WinThresholds) -> bool {
    let ev_ok = thresholds.ev_threshold == 0 || player.ev >= i64::from(thresholds.ev_threshold);
    let rep_ok =
        thresholds.rep_threshold == 0 || player.rep >= i64::from(thresholds.rep_threshold);
    ev_ok && rep_ok
}

/// Decide the winners of a player snapshot; `force` ranks everybody when nobody qualified.
pub fn evaluate_winners(
    env: &Env,
    players: &Vec<Player>,
    thresholds: &WinThresholds,
    force: bool,
) -> WinEvaluation {
    let mut qualifiers: Vec<Player> = Vec::new(env);
    for player in players.iter() {
        if meets_threshold(&player, thresholds) {
            qualifiers.push_back(player);
        }
    }

    let threshold_met = !qualifiers.is_empty();
    if !threshold_met && !force {
        return undecided(env, false);
    }

    let pool = if threshold_met { qualifiers } else { players.clone() };
    let ranked = rank(env, &pool);

    let top = match ranked.first() {
        Some(top) => top,
        // Forced end with nobody seated
        None => return undecided(env, true),
    };
    let top_score = score(&top);

    let mut tied: Vec<Player> = Vec::new(env);
    for player in ranked.iter() {
        if score(&player) == top_score {
            tied.push_back(player);
        }
    }

    if tied.len() == 1 {
        let mut winners = Vec::new(env);
        winners.push_back(top);
        WinEvaluation {
            winners,
            victory_type: if threshold_met {
                VictoryType::Single
            } else {
                VictoryType::Tiebreaker
            },
            ended: true,
            threshold_met,
        }
    } else {
        WinEvaluation {
            winners: tied,
            victory_type: VictoryType::Cooperative,
            ended: true,
            threshold_met,
        }
    }
}

fn undecided(env: &Env, ended: bool) -> WinEvaluation {
    WinEvaluation {
        winners: Vec::new(env),
        victory_type: VictoryType::NoWinner,
        ended,
        threshold_met: false,
    }
}

fn standing(a: &Player, b: &Player) -> Ordering {
    b.ev
        .cmp(&a.ev)
        .then_with(|| b.rep.cmp(&a.rep))
        .then_with(|| a.name.cmp(&b.name))
}

/// Stable insertion sort into leaderboard order.
fn rank(env: &Env, pool: &Vec<Player>) -> Vec<Player> {
    let mut ranked: Vec<Player> = Vec::new(env);
    for player in pool.iter() {
        let mut insert_at = ranked.len();
        for (i, other) in ranked.iter().enumerate() {
            if standing(&player, &other) == Ordering::Less {
                insert_at = i as u32;
                break;
            }
        }
        ranked.insert(insert_at, player);
    }
    ranked
}
