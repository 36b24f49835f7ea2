//! # Mutation Gateway
//!
//! The single write path. Each call is exactly one of: a fresh execution,
//! a verbatim replay of a stored response, or a conflict.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          execute(actor, mutation)                       │
//! │                                                                         │
//! │  fingerprint = sha256(normalize({transaction_id, command}))             │
//! │                                                                         │
//! │  ┌── uow #1 (claim) ─────────────────────────────────────────────────┐  │
//! │  │  INSERT in_progress ... ON CONFLICT DO NOTHING                    │  │
//! │  │    inserted                      → run                            │  │
//! │  │    existing, other fingerprint   → 409 KEY_REUSED                 │  │
//! │  │    existing, completed           → replay stored response         │  │
//! │  │    existing, in_progress, stale  → reclaim → run                  │  │
//! │  │    existing, in_progress         → 409 IN_PROGRESS                │  │
//! │  └───────────────────────────────────────────────────────────────────┘  │
//! │                                                                         │
//! │  ┌── uow #2 (run) ───────────────────────────────────────────────────┐  │
//! │  │  scope ─► service ─► verify stock ─► audit ─► complete ─► COMMIT  │  │
//! │  └───────────────────────────────────────────────────────────────────┘  │
//! │        │ error: rolled back                                             │
//! │        ▼                                                                │
//! │  ┌── uow #3 (settle) ────────────────────────────────────────────────┐  │
//! │  │  422 + store_business_rejections → complete(422) + REJECTED audit │  │
//! │  │  anything else                   → delete in_progress claim       │  │
//! │  └───────────────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Claiming commits before the transition runs so a concurrent identical
//! request observes the claim and gets `IDEMPOTENCY_REQUEST_IN_PROGRESS`
//! rather than running the mutation a second time. Run and settle then
//! happen on a spawned task, so dropping the caller's future after the
//! claim still ends in a completed or released record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use mercato_core::fingerprint::fingerprint;
use mercato_core::validation::{validate_idempotency_key, validate_transaction_id};
use mercato_core::Actor;
use mercato_db::{
    AuditResult, ClaimOutcome, Database, IdempotencyRecord, IdempotencyScope, IdempotencyState,
    NewAuditEvent, UnitOfWork,
};

use crate::command::{Command, MUTATION_METHOD};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::scope::authorize;
use crate::services::{self, Applied, Context};

/// One client mutation request.
#[derive(Debug, Clone)]
pub struct Mutation {
    pub endpoint: String,
    pub method: String,
    pub idempotency_key: String,
    pub transaction_id: String,
    pub trace_id: String,
    /// What is fingerprinted.
    pub body: Value,
    pub command: Command,
}

impl Mutation {
    /// Builds a mutation whose fingerprinted body is the command itself
    /// plus the transaction id.
    pub fn from_command(
        command: Command,
        idempotency_key: impl Into<String>,
        transaction_id: impl Into<String>,
    ) -> EngineResult<Self> {
        let transaction_id = transaction_id.into();
        let body = json!({
            "transaction_id": transaction_id,
            "command": serde_json::to_value(&command)?,
        });
        Ok(Self::new(command, idempotency_key, transaction_id, body))
    }

    /// Builds a mutation that fingerprints the body exactly as the client sent it.
    pub fn new(
        command: Command,
        idempotency_key: impl Into<String>,
        transaction_id: impl Into<String>,
        body: Value,
    ) -> Self {
        Mutation {
            endpoint: command.route(),
            method: MUTATION_METHOD.to_string(),
            idempotency_key: idempotency_key.into(),
            transaction_id: transaction_id.into(),
            trace_id: Uuid::new_v4().to_string(),
            body,
            command,
        }
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = trace_id.into();
        self
    }

    fn scope<'a>(&'a self, tenant_id: &'a str) -> IdempotencyScope<'a> {
        IdempotencyScope {
            tenant_id,
            endpoint: &self.endpoint,
            method: &self.method,
            key: &self.idempotency_key,
        }
    }
}

/// The response a client receives; identical on replay except for `replayed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationOutcome {
    pub status: u16,
    pub body: Value,
    pub replayed: bool,
}

impl MutationOutcome {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

enum Claim {
    Run,
    Replay(MutationOutcome),
}

/// Entry point for every state-changing request.
#[derive(Clone)]
pub struct MutationGateway {
    db: Database,
    config: EngineConfig,
}

impl MutationGateway {
    pub fn new(db: Database, config: EngineConfig) -> Self {
        MutationGateway { db, config }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs `mutation` at most once per (tenant, endpoint, method, key).
    ///
    /// `Ok` carries either the fresh response or the stored one. A stored
    /// 422 comes back as `Ok` with that status so the caller can send it
    /// verbatim.
    pub async fn execute(&self, actor: &Actor, mutation: Mutation) -> EngineResult<MutationOutcome> {
        validate_idempotency_key(&mutation.idempotency_key)?;
        validate_transaction_id(&mutation.transaction_id)?;

        let fp = fingerprint(&mutation.body);
        let now = Utc::now();

        match self.claim(actor, &mutation, &fp, now).await? {
            Claim::Replay(outcome) => return Ok(outcome),
            Claim::Run => {}
        }

        // the claim is committed: run and settle on a task of its own so a
        // caller that goes away cannot strand it in_progress
        let gateway = self.clone();
        let owner = actor.clone();
        let claimed = mutation.clone();
        let task = tokio::spawn(async move {
            match gateway.run(&owner, &claimed, now).await {
                Ok(outcome) => Ok(outcome),
                Err(err) => gateway.settle_failure(&owner, &claimed, err).await,
            }
        });

        match task.await {
            Ok(result) => result,
            Err(join_err) => {
                error!(
                    error = %join_err,
                    endpoint = %mutation.endpoint,
                    trace_id = %mutation.trace_id,
                    "Mutation task aborted"
                );
                if let Err(release_err) = self.release(mutation.scope(&actor.tenant_id)).await {
                    error!(error = %release_err, "Failed to release idempotency claim");
                }
                Err(EngineError::TaskAborted(join_err.to_string()))
            }
        }
    }

    /// Deletes completed records past the retention window.
    pub async fn prune_completed(&self) -> EngineResult<u64> {
        let cutoff = Utc::now() - self.config.idempotency.retention();
        let mut uow = self.db.begin().await?;
        let pruned = uow.idempotency().prune_completed(cutoff).await?;
        uow.commit().await?;
        if pruned > 0 {
            info!(pruned, "Pruned completed idempotency records");
        }
        Ok(pruned)
    }

    async fn claim(
        &self,
        actor: &Actor,
        mutation: &Mutation,
        fp: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<Claim> {
        let scope = mutation.scope(&actor.tenant_id);
        let mut uow = self.db.begin().await?;
        let outcome = uow
            .idempotency()
            .claim(scope, fp, &mutation.transaction_id, now)
            .await?;

        let claim = match outcome {
            ClaimOutcome::Claimed => Claim::Run,
            ClaimOutcome::Existing(record) => self.resolve_existing(&mut uow, mutation, record, fp, now).await?,
        };
        uow.commit().await?;
        Ok(claim)
    }

    async fn resolve_existing(
        &self,
        uow: &mut UnitOfWork,
        mutation: &Mutation,
        record: IdempotencyRecord,
        fp: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<Claim> {
        if record.fingerprint != fp {
            warn!(
                tenant_id = %record.tenant_id,
                endpoint = %mutation.endpoint,
                idempotency_key = %mutation.idempotency_key,
                "Idempotency key reused with a different payload"
            );
            return Err(EngineError::IdempotencyKeyReused);
        }

        match record.state {
            IdempotencyState::Completed => {
                debug!(
                    endpoint = %mutation.endpoint,
                    idempotency_key = %mutation.idempotency_key,
                    "Replaying stored response"
                );
                Ok(Claim::Replay(stored_outcome(&record)?))
            }
            IdempotencyState::InProgress => {
                let stale_before = now - self.config.idempotency.in_progress_timeout();
                let reclaimed = uow
                    .idempotency()
                    .reclaim_stale(record.id, fp, &mutation.transaction_id, stale_before, now)
                    .await?;
                if reclaimed {
                    warn!(
                        endpoint = %mutation.endpoint,
                        idempotency_key = %mutation.idempotency_key,
                        claimed_at = %record.created_at,
                        "Reclaimed abandoned in-progress request"
                    );
                    Ok(Claim::Run)
                } else {
                    Err(EngineError::IdempotencyInProgress)
                }
            }
        }
    }

    async fn run(&self, actor: &Actor, mutation: &Mutation, now: DateTime<Utc>) -> EngineResult<MutationOutcome> {
        let mut uow = self.db.begin().await?;
        authorize(&mut uow, actor, &mutation.command).await?;

        let ctx = Context {
            actor,
            config: &self.config,
            action: mutation.command.action(),
            now,
        };
        let applied = services::apply(&mut uow, &ctx, &mutation.command).await?;
        uow.stock().verify_all(&actor.tenant_id, &applied.scopes).await?;
        record_events(&mut uow, actor, mutation, &applied, now).await?;

        let status = if mutation.command.is_create() { 201 } else { 200 };
        let body = json!({
            "transaction_id": mutation.transaction_id,
            "trace_id": mutation.trace_id,
            "data": applied.data,
        });
        uow.idempotency()
            .complete(mutation.scope(&actor.tenant_id), status, &body.to_string(), now)
            .await?;
        uow.commit().await?;

        info!(
            tenant_id = %actor.tenant_id,
            endpoint = %mutation.endpoint,
            action = %ctx.action,
            trace_id = %mutation.trace_id,
            "Mutation committed"
        );
        Ok(MutationOutcome {
            status,
            body,
            replayed: false,
        })
    }

    /// The run's unit of work is already rolled back; decide what the ledger keeps.
    async fn settle_failure(
        &self,
        actor: &Actor,
        mutation: &Mutation,
        err: EngineError,
    ) -> EngineResult<MutationOutcome> {
        let scope = mutation.scope(&actor.tenant_id);
        let keep = err.is_business_rejection() && self.config.idempotency.store_business_rejections;

        if keep {
            match self.store_rejection(actor, mutation, &err).await {
                Ok(outcome) => return Ok(outcome),
                Err(store_err) => {
                    error!(error = %store_err, endpoint = %mutation.endpoint, "Failed to store rejection");
                }
            }
        }

        if err.is_internal() {
            error!(
                error = %err,
                endpoint = %mutation.endpoint,
                trace_id = %mutation.trace_id,
                "Mutation failed"
            );
        } else {
            debug!(
                code = err.code(),
                endpoint = %mutation.endpoint,
                trace_id = %mutation.trace_id,
                "Mutation rejected"
            );
        }

        if let Err(release_err) = self.release(scope).await {
            error!(
                error = %release_err,
                idempotency_key = %mutation.idempotency_key,
                "Failed to release idempotency claim"
            );
        }
        Err(err)
    }

    async fn release(&self, scope: IdempotencyScope<'_>) -> EngineResult<()> {
        let mut uow = self.db.begin().await?;
        uow.idempotency().release(scope).await?;
        uow.commit().await?;
        Ok(())
    }

    async fn store_rejection(
        &self,
        actor: &Actor,
        mutation: &Mutation,
        err: &EngineError,
    ) -> EngineResult<MutationOutcome> {
        let now = Utc::now();
        let status = err.http_status();
        let body = serde_json::to_value(err.body(&mutation.trace_id))?;

        let mut uow = self.db.begin().await?;
        let command = &mutation.command;
        uow.audit()
            .record(NewAuditEvent {
                tenant_id: &actor.tenant_id,
                actor_id: &actor.user_id,
                actor_role: actor.role.as_str(),
                action: &command.action(),
                entity_type: command.entity_type().as_str(),
                entity_id: command.target_id().unwrap_or_default(),
                before: None,
                after: Some(body.clone()),
                transaction_id: &mutation.transaction_id,
                trace_id: &mutation.trace_id,
                result: AuditResult::Rejected,
                created_at: now,
            })
            .await?;
        uow.idempotency()
            .complete(mutation.scope(&actor.tenant_id), status, &body.to_string(), now)
            .await?;
        uow.commit().await?;

        debug!(endpoint = %mutation.endpoint, status, "Stored business rejection");
        Ok(MutationOutcome {
            status,
            body,
            replayed: false,
        })
    }
}

async fn record_events(
    uow: &mut UnitOfWork,
    actor: &Actor,
    mutation: &Mutation,
    applied: &Applied,
    now: DateTime<Utc>,
) -> EngineResult<()> {
    for event in &applied.events {
        uow.audit()
            .record(NewAuditEvent {
                tenant_id: &actor.tenant_id,
                actor_id: &actor.user_id,
                actor_role: actor.role.as_str(),
                action: &event.action,
                entity_type: event.entity_type.as_str(),
                entity_id: &event.entity_id,
                before: event.before.clone(),
                after: Some(event.after.clone()),
                transaction_id: &mutation.transaction_id,
                trace_id: &mutation.trace_id,
                result: AuditResult::Success,
                created_at: now,
            })
            .await?;
    }
    Ok(())
}

fn stored_outcome(record: &IdempotencyRecord) -> EngineResult<MutationOutcome> {
    let status = record
        .response_status
        .and_then(|s| u16::try_from(s).ok())
        .ok_or_else(|| EngineError::InvariantViolation(format!("record {} completed without a status", record.id)))?;
    let body = match &record.response_body {
        Some(raw) => serde_json::from_str(raw)?,
        None => Value::Null,
    };
    Ok(MutationOutcome {
        status,
        body,
        replayed: true,
    })
}
