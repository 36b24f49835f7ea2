//! # Entity State Machines
//!
//! One decide-only state machine per workflow entity.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │   (state, action, payload) ──► machine ──► Transition { before,        │
//! │                                   │                    after,          │
//! │                                   │                    effects }       │
//! │                                   └──► CoreError (state + action named)│
//! │                                                                         │
//! │   The engine loads `before`, persists `after`, applies `effects`       │
//! │   (stock ops, cash movements) and writes one audit event, all in a     │
//! │   single unit of work.                                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each machine declares its legal (state, action) pairs in
//! [`StateMachine::allows`]; that table is the only place legality lives.

use serde::Serialize;
use std::fmt;

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::types::{EntityType, StockOp};

pub mod cash_session;
pub mod day_close;
pub mod inventory_count;
pub mod sale;
pub mod transfer;

pub use cash_session::MovementKind;

/// Legality table of one entity.
pub trait StateMachine {
    type State: Copy + Eq + fmt::Display;
    type Action: Copy + Eq + fmt::Display;

    const ENTITY: EntityType;

    /// Whether `action` may be performed from `state`.
    fn allows(state: Self::State, action: Self::Action) -> bool;

    /// Rejects an illegal action, naming the exact state and action.
    fn ensure(state: Self::State, action: Self::Action) -> CoreResult<()> {
        if Self::allows(state, action) {
            Ok(())
        } else {
            Err(CoreError::invalid_transition(Self::ENTITY, state, action))
        }
    }
}

/// Cash drawer movement requested by a sale (settlement or refund).
///
/// Applied to the actor's OPEN session at the sale's store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CashEffect {
    pub kind: MovementKind,
    pub amount: Money,
}

/// Side effect of a transition, applied by the engine in the same unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "effect", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Effect {
    Stock(StockOp),
    Cash(CashEffect),
}

/// Outcome of a legal action: snapshots for the audit log plus effects.
#[derive(Debug, Clone)]
pub struct Transition<T> {
    pub before: T,
    pub after: T,
    pub effects: Vec<Effect>,
}

impl<T> Transition<T> {
    pub fn new(before: T, after: T) -> Self {
        Self {
            before,
            after,
            effects: Vec::new(),
        }
    }

    pub fn with_effects(mut self, effects: Vec<Effect>) -> Self {
        self.effects = effects;
        self
    }

    pub fn stock_ops(&self) -> impl Iterator<Item = &StockOp> {
        self.effects.iter().filter_map(|e| match e {
            Effect::Stock(op) => Some(op),
            Effect::Cash(_) => None,
        })
    }

    pub fn cash_effects(&self) -> impl Iterator<Item = &CashEffect> {
        self.effects.iter().filter_map(|e| match e {
            Effect::Cash(c) => Some(c),
            Effect::Stock(_) => None,
        })
    }
}
