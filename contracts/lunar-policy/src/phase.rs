//! Round/phase transition table and the version gate.
//!
//! ```text
//! Setup (round 0) ──advance_phase──▶ Governance (1)
//! Governance (N)  ──advance_phase──▶ Operations (N)
//! Operations (N)  ──advance_phase──▶ Governance (N+1)
//! Operations (N)  ──advance_round──▶ Governance (N+1)   + settlement
//! ```
//!
//! Every mutation is a compare-and-increment on `GameState::version`: the
//! caller names the version it last saw, and the transition is produced only
//! if that still matches. Nothing here touches storage, so the contract can
//! read, check, apply and write back as one all-or-nothing step.

use crate::{GameState, LunarError, Phase};

/// Reject the call unless `expected_version` is the stored version.
pub fn check_version(state: &GameState, expected_version: u32) -> Result<(), LunarError> {
    if state.version != expected_version {
        return Err(LunarError::StaleVersion);
    }
    Ok(())
}

fn next_version(version: u32) -> Result<u32, LunarError> {
    version.checked_add(1).ok_or(LunarError::VersionOverflow)
}

/// Phase and round reached by `advance_phase` from `state`.
pub fn next_phase(state: &GameState) -> (Phase, u32) {
    match state.phase {
        // "Begin round 1"
        Phase::Setup => (Phase::Governance, state.round.saturating_add(1)),
        Phase::Governance => (Phase::Operations, state.round),
        Phase::Operations => (Phase::Governance, state.round.saturating_add(1)),
    }
}

/// Version-gated commit that keeps phase and round as they are.
pub fn try_commit(state: &GameState, expected_version: u32) -> Result<GameState, LunarError> {
    check_version(state, expected_version)?;
    Ok(GameState {
        round: state.round,
        phase: state.phase,
        version: next_version(state.version)?,
    })
}

/// Version-gated `advance_phase`.
pub fn try_advance(state: &GameState, expected_version: u32) -> Result<GameState, LunarError> {
    check_version(state, expected_version)?;
    let (phase, round) = next_phase(state);
    Ok(GameState {
        round,
        phase,
        version: next_version(state.version)?,
    })
}

/// Version-gated `advance_round`. Only legal while in Operations.
pub fn try_close_round(state: &GameState, expected_version: u32) -> Result<GameState, LunarError> {
    check_version(state, expected_version)?;
    if state.phase != Phase::Operations {
        return Err(LunarError::WrongPhase);
    }
    Ok(GameState {
        round: state.round.saturating_add(1),
        phase: Phase::Governance,
        version: next_version(state.version)?,
    })
}

/// Phase gate for game actions.
pub fn require_phase(state: &GameState, phase: Phase) -> Result<(), LunarError> {
    if state.phase != phase {
        return Err(LunarError::WrongPhase);
    }
    Ok(())
}
