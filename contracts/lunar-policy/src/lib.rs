#![no_std]

//! # Lunar Policy
//!
//! Authoritative backend for the Lunar Policy Gaming board game. Facilitators
//! seat players, who accrue two resources, EV (economic value) and REP
//! (reputation), by building infrastructure and trading under contracts.
//!
//! ## Game flow
//! 1. A facilitator opens a session (`Setup`, round 0, version 0) and seats
//!    players.
//! 2. `advance_phase` begins round 1 in `Governance`, where contracts
//!    between players are signed and closed.
//! 3. `advance_phase` moves to `Operations`, where infrastructure is built.
//! 4. `advance_round` settles the round (facility yield minus maintenance,
//!    then contract payments) and opens `Governance` of the next round.
//!    `advance_phase` from `Operations` skips settlement.
//! 5. Once any player crosses the configured EV/REP thresholds the game is
//!    locked; a facilitator calls `end_game` to record the result. `end_game`
//!    with `force` ranks everybody when nobody has qualified.
//!
//! ## Concurrency
//! Every mutating call carries the session version the caller last saw.
//! A mismatch fails with `StaleVersion` and changes nothing; a match applies
//! the call and bumps the version by exactly one. Callers refetch
//! `get_dashboard_summary` and retry.

pub mod phase;
pub mod win;

use soroban_sdk::{
    contract, contracterror, contractevent, contractimpl, contracttype, panic_with_error,
    Address, BytesN, Env, String, Vec,
};

// ═══════════════════════════════════════════════════════════════════════════════
//  Contract Events
// ═══════════════════════════════════════════════════════════════════════════════

#[contractevent]
pub struct EvGameStarted {
    pub session_id: u32,
    pub facilitator: Address,
}

#[contractevent]
pub struct EvPlayerAdded {
    pub session_id: u32,
    pub player_id: u32,
    pub name: String,
}

#[contractevent]
pub struct EvPlayerEdited {
    pub session_id: u32,
    pub player_id: u32,
    pub name: String,
}

#[contractevent]
pub struct EvManualAdjustment {
    pub session_id: u32,
    pub player_id: u32,
    pub ev_delta: i64,
    pub rep_delta: i64,
    pub reason: String,
}

#[contractevent]
pub struct EvInfrastructureBuilt {
    pub session_id: u32,
    pub infrastructure_id: u32,
    pub owner: u32,
    pub cost: i64,
}

#[contractevent]
pub struct EvContractCreated {
    pub session_id: u32,
    pub contract_id: u32,
    pub party_a: u32,
    pub party_b: u32,
    pub ev_per_round: i64,
}

#[contractevent]
pub struct EvContractEnded {
    pub session_id: u32,
    pub contract_id: u32,
    pub breached_by: Option<u32>,
}

#[contractevent]
pub struct EvPhaseAdvanced {
    pub session_id: u32,
    pub round: u32,
    pub phase: u32,
    pub version: u32,
}

#[contractevent]
pub struct EvRoundSettled {
    pub session_id: u32,
    pub round: u32,
    pub facilities: u32,
    pub payments: u32,
}

/// Advisory: the automatic evaluation now reports a winner and game actions
/// are locked until a facilitator calls `end_game`.
#[contractevent]
pub struct EvThresholdReached {
    pub session_id: u32,
    pub victory_type: u32,
    pub winner_count: u32,
}

#[contractevent]
pub struct EvGameEnded {
    pub session_id: u32,
    pub victory_type: u32,
    pub winner_count: u32,
    pub forced: bool,
}

// ═══════════════════════════════════════════════════════════════════════════════
//  Errors
// ═══════════════════════════════════════════════════════════════════════════════

#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum LunarError {
    GameNotFound = 1,
    SessionAlreadyExists = 2,
    NotAuthorized = 3,
    AdminNotSet = 4,
    SettingsNotSet = 5,
    /// Caller's version no longer matches; refetch and retry.
    StaleVersion = 6,
    VersionOverflow = 7,
    WrongPhase = 8,
    GameAlreadyEnded = 9,
    GameLocked = 10,
    NoWinnerYet = 11,
    PlayerNotFound = 12,
    TooManyPlayers = 13,
    InvalidName = 14,
    InvalidAmount = 15,
    InsufficientEv = 16,
    SelfContract = 17,
    ContractNotFound = 18,
    ContractAlreadyEnded = 19,
    NotAParty = 20,
    InvalidSettings = 21,
}

// ═══════════════════════════════════════════════════════════════════════════════
//  Game types
// ═══════════════════════════════════════════════════════════════════════════════

#[contracttype]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum Phase {
    Setup = 0,
    Governance = 1,
    Operations = 2,
}

#[contracttype]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum VictoryType {
    NoWinner = 0,
    /// Unique top scorer among threshold qualifiers.
    Single = 1,
    /// Unique top scorer of a forced ranking.
    Tiebreaker = 2,
    Cooperative = 3,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GameState {
    pub round: u32,
    pub phase: Phase,
    pub version: u32,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Player {
    pub id: u32,
    pub name: String,
    pub ev: i64,
    pub rep: i64,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InfrastructurePlan {
    pub name: String,
    pub cost: i64,
    pub yield_ev: i64,
    pub maintenance_ev: i64,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Infrastructure {
    pub id: u32,
    pub owner: u32,
    pub name: String,
    pub yield_ev: i64,
    pub maintenance_ev: i64,
    pub built_round: u32,
}

/// `party_a` pays `ev_per_round` to `party_b` at every settlement.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ContractTerms {
    pub party_a: u32,
    pub party_b: u32,
    pub ev_per_round: i64,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PlayerContract {
    pub id: u32,
    pub party_a: u32,
    pub party_b: u32,
    pub ev_per_round: i64,
    pub created_round: u32,
    pub active: bool,
    pub breached_by: Option<u32>,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WinEvaluation {
    pub winners: Vec<Player>,
    pub victory_type: VictoryType,
    pub ended: bool,
    pub threshold_met: bool,
}

/// Per-call options for `evaluate_winners`; unset thresholds fall back to
/// the configured ones.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EvaluationOptions {
    pub force: bool,
    pub ev_threshold: Option<u32>,
    pub rep_threshold: Option<u32>,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WinThresholds {
    pub ev_threshold: u32,
    pub rep_threshold: u32,
}

/// Fixed at deployment.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GameSettings {
    pub win: WinThresholds,
    pub starting_ev: i64,
    pub starting_rep: i64,
    pub honor_rep_bonus: i64,
    pub breach_rep_penalty: i64,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LunarGame {
    pub facilitator: Address,
    pub state: GameState,
    pub players: Vec<Player>,
    pub infrastructure: Vec<Infrastructure>,
    pub contracts: Vec<PlayerContract>,
    pub next_player_id: u32,
    pub next_infrastructure_id: u32,
    pub next_contract_id: u32,
    pub finished: bool,
    pub outcome: Option<WinEvaluation>,
}

/// Everything a dashboard needs in one read.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DashboardSummary {
    pub session_id: u32,
    pub facilitator: Address,
    pub state: GameState,
    pub players: Vec<Player>,
    pub infrastructure: Vec<Infrastructure>,
    pub contracts: Vec<PlayerContract>,
    pub evaluation: WinEvaluation,
    pub finished: bool,
}

#[contracttype]
#[derive(Clone)]
enum StorageKey {
    Admin,
    Settings,
    Facilitators,
    Game(u32),
}

// ═══════════════════════════════════════════════════════════════════════════════
//  Constants
// ═══════════════════════════════════════════════════════════════════════════════

const MAX_PLAYERS: u32 = 32;
const MAX_NAME_LEN: u32 = 64;

// Ledger rate is approximately 5 seconds per ledger on Stellar
const LEDGER_RATE_SECS: u32 = 5;

// A session may run over a whole term: 120 days
const GAME_TTL_SECONDS: u32 = 120 * 24 * 60 * 60;
const GAME_TTL_LEDGERS: u32 = GAME_TTL_SECONDS / LEDGER_RATE_SECS;

// ═══════════════════════════════════════════════════════════════════════════════
//  Contract
// ═══════════════════════════════════════════════════════════════════════════════

#[contract]
pub struct LunarPolicyContract;

#[contractimpl]
impl LunarPolicyContract {
    // ───────────────────────────────────────────────────────────────────────────
    //  Public: Constructor & Sessions
    // ───────────────────────────────────────────────────────────────────────────

    pub fn __constructor(env: Env, admin: Address, settings: GameSettings) {
        if settings.honor_rep_bonus < 0 || settings.breach_rep_penalty < 0 {
            panic_with_error!(&env, LunarError::InvalidSettings);
        }
        env.storage().instance().set(&StorageKey::Admin, &admin);
        env.storage().instance().set(&StorageKey::Settings, &settings);
        let facilitators: Vec<Address> = Vec::new(&env);
        env.storage()
            .instance()
            .set(&StorageKey::Facilitators, &facilitators);
    }

    pub fn start_game(
        env: Env,
        caller: Address,
        session_id: u32,
    ) -> Result<GameState, LunarError> {
        Self::require_facilitator(&env, &caller)?;

        let key = StorageKey::Game(session_id);
        if env.storage().persistent().has(&key) {
            return Err(LunarError::SessionAlreadyExists);
        }

        let game = LunarGame {
            facilitator: caller.clone(),
            state: GameState {
                round: 0,
                phase: Phase::Setup,
                version: 0,
            },
            players: Vec::new(&env),
            infrastructure: Vec::new(&env),
            contracts: Vec::new(&env),
            next_player_id: 1,
            next_infrastructure_id: 1,
            next_contract_id: 1,
            finished: false,
            outcome: None,
        };

        EvGameStarted {
            session_id,
            facilitator: caller,
        }
        .publish(&env);

        Self::write_game(&env, session_id, &game);
        Ok(game.state)
    }

    // ───────────────────────────────────────────────────────────────────────────
    //  Public: Players
    // ───────────────────────────────────────────────────────────────────────────

    pub fn add_player(
        env: Env,
        caller: Address,
        session_id: u32,
        expected_version: u32,
        name: String,
    ) -> Result<u32, LunarError> {
        Self::require_facilitator(&env, &caller)?;
        let settings = Self::load_settings(&env)?;
        let mut game = Self::read_game(&env, session_id)?;
        let next = phase::try_commit(&game.state, expected_version)?;
        Self::require_unlocked(&env, &game, &settings)?;

        Self::check_name(&name)?;
        if game.players.len() >= MAX_PLAYERS {
            return Err(LunarError::TooManyPlayers);
        }

        let player_id = game.next_player_id;
        game.next_player_id += 1;
        game.players.push_back(Player {
            id: player_id,
            name: name.clone(),
            ev: settings.starting_ev,
            rep: settings.starting_rep,
        });
        game.state = next;

        EvPlayerAdded {
            session_id,
            player_id,
            name,
        }
        .publish(&env);

        Self::write_game(&env, session_id, &game);
        Ok(player_id)
    }

    /// Rename a player. Allowed while the game is locked.
    pub fn edit_player(
        env: Env,
        caller: Address,
        session_id: u32,
        expected_version: u32,
        player_id: u32,
        name: String,
    ) -> Result<(), LunarError> {
        Self::require_facilitator(&env, &caller)?;
        let mut game = Self::read_game(&env, session_id)?;
        let next = phase::try_commit(&game.state, expected_version)?;
        Self::require_active(&game)?;

        Self::check_name(&name)?;
        let idx = Self::player_index(&game, player_id)?;
        let mut player = Self::player_at(&game, idx)?;
        player.name = name.clone();
        game.players.set(idx, player);
        game.state = next;

        EvPlayerEdited {
            session_id,
            player_id,
            name,
        }
        .publish(&env);

        Self::write_game(&env, session_id, &game);
        Ok(())
    }

    /// Facilitator correction of a player's resources. Either delta may be
    /// negative and the result may drop below zero, but a sum outside `i64`
    /// fails with `InvalidAmount`. Allowed while the game is locked.
    pub fn manual_adjustment(
        env: Env,
        caller: Address,
        session_id: u32,
        expected_version: u32,
        player_id: u32,
        ev_delta: i64,
        rep_delta: i64,
        reason: String,
    ) -> Result<Player, LunarError> {
        Self::require_facilitator(&env, &caller)?;
        let mut game = Self::read_game(&env, session_id)?;
        let next = phase::try_commit(&game.state, expected_version)?;
        Self::require_active(&game)?;

        let idx = Self::player_index(&game, player_id)?;
        let mut player = Self::player_at(&game, idx)?;
        player.ev = player.ev.checked_add(ev_delta).ok_or(LunarError::InvalidAmount)?;
        player.rep = player.rep.checked_add(rep_delta).ok_or(LunarError::InvalidAmount)?;
        game.players.set(idx, player.clone());
        game.state = next;

        EvManualAdjustment {
            session_id,
            player_id,
            ev_delta,
            rep_delta,
            reason,
        }
        .publish(&env);

        Self::write_game(&env, session_id, &game);
        Ok(player)
    }

    // ───────────────────────────────────────────────────────────────────────────
    //  Public: Infrastructure & Contracts
    // ───────────────────────────────────────────────────────────────────────────

    /// Build a facility for `owner` during Operations. The owner pays `cost`
    /// now and receives `yield_ev - maintenance_ev` at every settlement.
    pub fn build_infrastructure(
        env: Env,
        caller: Address,
        session_id: u32,
        expected_version: u32,
        owner: u32,
        plan: InfrastructurePlan,
    ) -> Result<u32, LunarError> {
        Self::require_facilitator(&env, &caller)?;
        let settings = Self::load_settings(&env)?;
        let mut game = Self::read_game(&env, session_id)?;
        let next = phase::try_commit(&game.state, expected_version)?;
        Self::require_unlocked(&env, &game, &settings)?;
        phase::require_phase(&game.state, Phase::Operations)?;

        Self::check_name(&plan.name)?;
        if plan.cost < 0 || plan.yield_ev < 0 || plan.maintenance_ev < 0 {
            return Err(LunarError::InvalidAmount);
        }

        let idx = Self::player_index(&game, owner)?;
        let mut player = Self::player_at(&game, idx)?;
        if player.ev < plan.cost {
            return Err(LunarError::InsufficientEv);
        }
        player.ev -= plan.cost;
        game.players.set(idx, player);

        let infrastructure_id = game.next_infrastructure_id;
        game.next_infrastructure_id += 1;
        game.infrastructure.push_back(Infrastructure {
            id: infrastructure_id,
            owner,
            name: plan.name,
            yield_ev: plan.yield_ev,
            maintenance_ev: plan.maintenance_ev,
            built_round: game.state.round,
        });
        game.state = next;

        EvInfrastructureBuilt {
            session_id,
            infrastructure_id,
            owner,
            cost: plan.cost,
        }
        .publish(&env);

        Self::write_game(&env, session_id, &game);
        Ok(infrastructure_id)
    }

    /// Sign a contract between two players during Governance.
    pub fn create_contract(
        env: Env,
        caller: Address,
        session_id: u32,
        expected_version: u32,
        terms: ContractTerms,
    ) -> Result<u32, LunarError> {
        Self::require_facilitator(&env, &caller)?;
        let settings = Self::load_settings(&env)?;
        let mut game = Self::read_game(&env, session_id)?;
        let next = phase::try_commit(&game.state, expected_version)?;
        Self::require_unlocked(&env, &game, &settings)?;
        phase::require_phase(&game.state, Phase::Governance)?;

        if terms.party_a == terms.party_b {
            return Err(LunarError::SelfContract);
        }
        if terms.ev_per_round < 0 {
            return Err(LunarError::InvalidAmount);
        }
        Self::player_index(&game, terms.party_a)?;
        Self::player_index(&game, terms.party_b)?;

        let contract_id = game.next_contract_id;
        game.next_contract_id += 1;
        game.contracts.push_back(PlayerContract {
            id: contract_id,
            party_a: terms.party_a,
            party_b: terms.party_b,
            ev_per_round: terms.ev_per_round,
            created_round: game.state.round,
            active: true,
            breached_by: None,
        });
        game.state = next;

        EvContractCreated {
            session_id,
            contract_id,
            party_a: terms.party_a,
            party_b: terms.party_b,
            ev_per_round: terms.ev_per_round,
        }
        .publish(&env);

        Self::write_game(&env, session_id, &game);
        Ok(contract_id)
    }

    /// Close a contract during Governance. Honoured contracts reward both
    /// parties with REP; a breach costs the breaching party REP.
    pub fn end_contract(
        env: Env,
        caller: Address,
        session_id: u32,
        expected_version: u32,
        contract_id: u32,
        breached_by: Option<u32>,
    ) -> Result<(), LunarError> {
        Self::require_facilitator(&env, &caller)?;
        let settings = Self::load_settings(&env)?;
        let mut game = Self::read_game(&env, session_id)?;
        let next = phase::try_commit(&game.state, expected_version)?;
        Self::require_unlocked(&env, &game, &settings)?;
        phase::require_phase(&game.state, Phase::Governance)?;

        let cidx = Self::contract_index(&game, contract_id)?;
        let mut agreement = game
            .contracts
            .get(cidx)
            .ok_or(LunarError::ContractNotFound)?;
        if !agreement.active {
            return Err(LunarError::ContractAlreadyEnded);
        }

        match breached_by {
            Some(breacher) => {
                if breacher != agreement.party_a && breacher != agreement.party_b {
                    return Err(LunarError::NotAParty);
                }
                Self::credit(&mut game, breacher, 0, -settings.breach_rep_penalty)?;
            }
            None => {
                Self::credit(&mut game, agreement.party_a, 0, settings.honor_rep_bonus)?;
                Self::credit(&mut game, agreement.party_b, 0, settings.honor_rep_bonus)?;
            }
        }

        agreement.active = false;
        agreement.breached_by = breached_by;
        game.contracts.set(cidx, agreement);
        game.state = next;

        EvContractEnded {
            session_id,
            contract_id,
            breached_by,
        }
        .publish(&env);

        Self::write_game(&env, session_id, &game);
        Ok(())
    }

    // ───────────────────────────────────────────────────────────────────────────
    //  Public: Phase & Round
    // ───────────────────────────────────────────────────────────────────────────

    pub fn advance_phase(
        env: Env,
        caller: Address,
        session_id: u32,
        expected_version: u32,
    ) -> Result<GameState, LunarError> {
        Self::require_facilitator(&env, &caller)?;
        let settings = Self::load_settings(&env)?;
        let mut game = Self::read_game(&env, session_id)?;
        let next = phase::try_advance(&game.state, expected_version)?;
        Self::require_unlocked(&env, &game, &settings)?;

        game.state = next;
        Self::publish_phase(&env, session_id, &game.state);

        Self::write_game(&env, session_id, &game);
        Ok(game.state)
    }

    /// Settle the round and open Governance of the next one. Only from
    /// Operations.
    pub fn advance_round(
        env: Env,
        caller: Address,
        session_id: u32,
        expected_version: u32,
    ) -> Result<GameState, LunarError> {
        Self::require_facilitator(&env, &caller)?;
        let settings = Self::load_settings(&env)?;
        let mut game = Self::read_game(&env, session_id)?;
        let next = phase::try_close_round(&game.state, expected_version)?;
        Self::require_unlocked(&env, &game, &settings)?;

        let settled_round = game.state.round;
        let (facilities, payments) = Self::settle(&mut game)?;
        game.state = next;

        EvRoundSettled {
            session_id,
            round: settled_round,
            facilities,
            payments,
        }
        .publish(&env);
        Self::publish_phase(&env, session_id, &game.state);

        let evaluation = win::evaluate_winners(&env, &game.players, &settings.win, false);
        if evaluation.ended {
            EvThresholdReached {
                session_id,
                victory_type: evaluation.victory_type as u32,
                winner_count: evaluation.winners.len(),
            }
            .publish(&env);
        }

        Self::write_game(&env, session_id, &game);
        Ok(game.state)
    }

    // ───────────────────────────────────────────────────────────────────────────
    //  Public: Victory
    // ───────────────────────────────────────────────────────────────────────────

    /// Record the result and finish the game. Without `force` this only
    /// succeeds once somebody met the thresholds.
    pub fn end_game(
        env: Env,
        caller: Address,
        session_id: u32,
        expected_version: u32,
        force: bool,
    ) -> Result<WinEvaluation, LunarError> {
        Self::require_facilitator(&env, &caller)?;
        let settings = Self::load_settings(&env)?;
        let mut game = Self::read_game(&env, session_id)?;
        let next = phase::try_commit(&game.state, expected_version)?;
        Self::require_active(&game)?;

        let evaluation = win::evaluate_winners(&env, &game.players, &settings.win, force);
        if !evaluation.ended {
            return Err(LunarError::NoWinnerYet);
        }

        game.finished = true;
        game.outcome = Some(evaluation.clone());
        game.state = next;

        EvGameEnded {
            session_id,
            victory_type: evaluation.victory_type as u32,
            winner_count: evaluation.winners.len(),
            forced: force,
        }
        .publish(&env);

        Self::write_game(&env, session_id, &game);
        Ok(evaluation)
    }

    /// Read-only evaluation of the current standings.
    pub fn evaluate_winners(
        env: Env,
        session_id: u32,
        options: EvaluationOptions,
    ) -> Result<WinEvaluation, LunarError> {
        let settings = Self::load_settings(&env)?;
        let game = Self::read_game(&env, session_id)?;
        let thresholds = WinThresholds {
            ev_threshold: options.ev_threshold.unwrap_or(settings.win.ev_threshold),
            rep_threshold: options.rep_threshold.unwrap_or(settings.win.rep_threshold),
        };
        Ok(win::evaluate_winners(&env, &game.players, &thresholds, options.force))
    }

    // ───────────────────────────────────────────────────────────────────────────
    //  Public: Read & Admin
    // ───────────────────────────────────────────────────────────────────────────

    pub fn get_game_state(env: Env, session_id: u32) -> Result<GameState, LunarError> {
        Ok(Self::read_game(&env, session_id)?.state)
    }

    /// Snapshot for dashboards. Finished games report their recorded result,
    /// running games the automatic evaluation.
    pub fn get_dashboard_summary(
        env: Env,
        session_id: u32,
    ) -> Result<DashboardSummary, LunarError> {
        let settings = Self::load_settings(&env)?;
        let game = Self::read_game(&env, session_id)?;
        let evaluation = match game.outcome {
            Some(outcome) => outcome,
            None => win::evaluate_winners(&env, &game.players, &settings.win, false),
        };
        Ok(DashboardSummary {
            session_id,
            facilitator: game.facilitator,
            state: game.state,
            players: game.players,
            infrastructure: game.infrastructure,
            contracts: game.contracts,
            evaluation,
            finished: game.finished,
        })
    }

    pub fn get_settings(env: Env) -> Result<GameSettings, LunarError> {
        Self::load_settings(&env)
    }

    pub fn get_admin(env: Env) -> Result<Address, LunarError> {
        Self::load_admin(&env)
    }

    pub fn set_admin(env: Env, new_admin: Address) -> Result<(), LunarError> {
        let admin = Self::load_admin(&env)?;
        admin.require_auth();
        env.storage().instance().set(&StorageKey::Admin, &new_admin);
        Ok(())
    }

    pub fn get_facilitators(env: Env) -> Vec<Address> {
        Self::load_facilitators(&env)
    }

    pub fn add_facilitator(env: Env, facilitator: Address) -> Result<(), LunarError> {
        let admin = Self::load_admin(&env)?;
        admin.require_auth();
        let mut facilitators = Self::load_facilitators(&env);
        if !facilitators.contains(&facilitator) {
            facilitators.push_back(facilitator);
            env.storage()
                .instance()
                .set(&StorageKey::Facilitators, &facilitators);
        }
        Ok(())
    }

    pub fn remove_facilitator(env: Env, facilitator: Address) -> Result<(), LunarError> {
        let admin = Self::load_admin(&env)?;
        admin.require_auth();
        let mut facilitators = Self::load_facilitators(&env);
        if let Some(idx) = facilitators.first_index_of(&facilitator) {
            facilitators.remove(idx);
            env.storage()
                .instance()
                .set(&StorageKey::Facilitators, &facilitators);
        }
        Ok(())
    }

    pub fn upgrade(env: Env, new_wasm_hash: BytesN<32>) -> Result<(), LunarError> {
        let admin = Self::load_admin(&env)?;
        admin.require_auth();
        env.deployer().update_current_contract_wasm(new_wasm_hash);
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    //  Internal: Settlement
    // ═══════════════════════════════════════════════════════════════════════════

    /// Facility yield minus maintenance, then contract payments. Balances may
    /// go negative. Returns (facilities settled, payments made).
    fn settle(game: &mut LunarGame) -> Result<(u32, u32), LunarError> {
        let mut facilities = 0u32;
        for facility in game.infrastructure.clone().iter() {
            let net = facility.yield_ev.saturating_sub(facility.maintenance_ev);
            Self::credit(game, facility.owner, net, 0)?;
            facilities += 1;
        }

        let mut payments = 0u32;
        for agreement in game.contracts.clone().iter() {
            if !agreement.active {
                continue;
            }
            Self::credit(game, agreement.party_a, -agreement.ev_per_round, 0)?;
            Self::credit(game, agreement.party_b, agreement.ev_per_round, 0)?;
            payments += 1;
        }
        Ok((facilities, payments))
    }

    fn credit(
        game: &mut LunarGame,
        player_id: u32,
        ev_delta: i64,
        rep_delta: i64,
    ) -> Result<(), LunarError> {
        let idx = Self::player_index(game, player_id)?;
        let mut player = Self::player_at(game, idx)?;
        player.ev = player.ev.checked_add(ev_delta).ok_or(LunarError::InvalidAmount)?;
        player.rep = player.rep.checked_add(rep_delta).ok_or(LunarError::InvalidAmount)?;
        game.players.set(idx, player);
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    //  Internal: Guards
    // ═══════════════════════════════════════════════════════════════════════════

    fn require_facilitator(env: &Env, caller: &Address) -> Result<(), LunarError> {
        caller.require_auth();
        let admin = Self::load_admin(env)?;
        if *caller == admin || Self::load_facilitators(env).contains(caller) {
            return Ok(());
        }
        Err(LunarError::NotAuthorized)
    }

    fn require_active(game: &LunarGame) -> Result<(), LunarError> {
        if game.finished {
            return Err(LunarError::GameAlreadyEnded);
        }
        Ok(())
    }

    /// Game actions stop as soon as the automatic evaluation reports a winner.
    fn require_unlocked(
        env: &Env,
        game: &LunarGame,
        settings: &GameSettings,
    ) -> Result<(), LunarError> {
        Self::require_active(game)?;
        if win::evaluate_winners(env, &game.players, &settings.win, false).ended {
            return Err(LunarError::GameLocked);
        }
        Ok(())
    }

    fn check_name(name: &String) -> Result<(), LunarError> {
        if name.len() == 0 || name.len() > MAX_NAME_LEN {
            return Err(LunarError::InvalidName);
        }
        Ok(())
    }

    fn player_index(game: &LunarGame, player_id: u32) -> Result<u32, LunarError> {
        for (i, player) in game.players.iter().enumerate() {
            if player.id == player_id {
                return Ok(i as u32);
            }
        }
        Err(LunarError::PlayerNotFound)
    }

    fn player_at(game: &LunarGame, idx: u32) -> Result<Player, LunarError> {
        game.players.get(idx).ok_or(LunarError::PlayerNotFound)
    }

    fn contract_index(game: &LunarGame, contract_id: u32) -> Result<u32, LunarError> {
        for (i, agreement) in game.contracts.iter().enumerate() {
            if agreement.id == contract_id {
                return Ok(i as u32);
            }
        }
        Err(LunarError::ContractNotFound)
    }

    fn publish_phase(env: &Env, session_id: u32, state: &GameState) {
        EvPhaseAdvanced {
            session_id,
            round: state.round,
            phase: state.phase as u32,
            version: state.version,
        }
        .publish(env);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    //  Internal: Storage
    // ═══════════════════════════════════════════════════════════════════════════

    fn read_game(env: &Env, session_id: u32) -> Result<LunarGame, LunarError> {
        env.storage()
            .persistent()
            .get(&StorageKey::Game(session_id))
            .ok_or(LunarError::GameNotFound)
    }

    fn write_game(env: &Env, session_id: u32, game: &LunarGame) {
        let key = StorageKey::Game(session_id);
        env.storage().persistent().set(&key, game);
        env.storage()
            .persistent()
            .extend_ttl(&key, GAME_TTL_LEDGERS, GAME_TTL_LEDGERS);
        // Keep instance storage (admin, settings, facilitators) alive
        env.storage()
            .instance()
            .extend_ttl(GAME_TTL_LEDGERS, GAME_TTL_LEDGERS);
    }

    fn load_admin(env: &Env) -> Result<Address, LunarError> {
        env.storage()
            .instance()
            .get(&StorageKey::Admin)
            .ok_or(LunarError::AdminNotSet)
    }

    fn load_settings(env: &Env) -> Result<GameSettings, LunarError> {
        env.storage()
            .instance()
            .get(&StorageKey::Settings)
            .ok_or(LunarError::SettingsNotSet)
    }

    fn load_facilitators(env: &Env) -> Vec<Address> {
        env.storage()
            .instance()
            .get(&StorageKey::Facilitators)
            .unwrap_or_else(|| Vec::new(env))
    }
}
