//! # Customer Context
//!
//! A seated customer device: the session it holds and whether that session
//! is still good.
//!
//! ## Invalidation
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  pushed table change ─▶ SessionWatch ─▶ Valid / Invalidated            │
//! │  missed events      ─▶ Unknown ─▶ refresh() ─▶ validate_session        │
//! │                                                                         │
//! │  A device that was offline during a clear learns of it on its next     │
//! │  refresh() or rehydrate(), not before.                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use tracing::{debug, info};

use tavola_core::session::{self, JoinRequest};
use tavola_core::{Actor, ActiveSession, ChangeFilter, ChangeTable, Order};
use tavola_sync::{SessionState, SessionWatch, Subscription};

use crate::commands::orders::{self, OrderLine};
use crate::commands::tables;
use crate::error::{EngineError, EngineResult};
use crate::Engine;

/// Session state held by one customer device.
pub struct CustomerContext {
    shop_id: String,
    table_id: String,
    session: ActiveSession,
    watch: SessionWatch,
    subscription: Subscription,
}

impl std::fmt::Debug for CustomerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomerContext")
            .field("table_id", &self.table_id)
            .field("session_id", &self.session.session_id)
            .field("state", &self.watch.state())
            .finish()
    }
}

impl CustomerContext {
    /// Joins a table and starts watching it.
    pub async fn join(engine: &Engine, table_id: &str, request: JoinRequest) -> EngineResult<Self> {
        let outcome = tables::join_with(engine, table_id, request).await?;
        let session_id = outcome.session.session_id;
        Self::attach(engine, table_id, &session_id)
            .await?
            .ok_or_else(|| EngineError::SessionInvalid {
                table_id: table_id.to_string(),
                session_id,
            })
    }

    /// Restores a context from a session id kept on the device.
    ///
    /// `None` when the session is no longer seated at the table.
    pub async fn rehydrate(engine: &Engine, table_id: &str, session_id: &str) -> EngineResult<Option<Self>> {
        let context = Self::attach(engine, table_id, session_id).await?;
        match &context {
            Some(_) => debug!(table_id = %table_id, session_id = %session_id, "Session restored"),
            None => info!(table_id = %table_id, session_id = %session_id, "Stored session no longer valid"),
        }
        Ok(context)
    }

    async fn attach(engine: &Engine, table_id: &str, session_id: &str) -> EngineResult<Option<Self>> {
        // subscribe before the read so nothing committed after it is missed
        let subscription = engine.subscribe(ChangeFilter::row(ChangeTable::Tables, table_id));
        let table = engine.db().tables().get_by_id(table_id).await?;

        let session = match session::find_session(&table, session_id) {
            Some(session) => session.clone(),
            None => return Ok(None),
        };
        let watch = SessionWatch::new(&table, session_id);
        if watch.state() != SessionState::Valid {
            return Ok(None);
        }

        Ok(Some(CustomerContext {
            shop_id: table.shop_id.clone(),
            table_id: table.id,
            session,
            watch,
            subscription,
        }))
    }

    pub fn table_id(&self) -> &str {
        &self.table_id
    }

    pub fn session(&self) -> &ActiveSession {
        &self.session
    }

    pub fn state(&self) -> SessionState {
        self.watch.state()
    }

    /// The actor commands run as for this device.
    pub fn actor(&self) -> Actor {
        Actor::customer(&self.session.session_id, &self.session.display_name)
    }

    /// Applies every queued delivery and returns the resulting state.
    pub fn poll(&mut self) -> SessionState {
        for delivery in self.subscription.drain() {
            self.watch.apply(&delivery);
        }
        self.watch.state()
    }

    /// Resolves an `Unknown` state with a pull check against the store.
    pub async fn refresh(&mut self, engine: &Engine) -> EngineResult<SessionState> {
        let state = self.poll();
        if state != SessionState::Unknown {
            return Ok(state);
        }

        let valid = tables::validate_session(engine, &self.table_id, &self.session.session_id).await?;
        Ok(self.watch.confirm(valid))
    }

    /// Places an order at this table as this session.
    pub async fn place_order(&self, engine: &Engine, lines: &[OrderLine]) -> EngineResult<Order> {
        orders::place_order(engine, &self.shop_id, Some(&self.table_id), lines, &self.actor()).await
    }

    /// Orders this session has placed, oldest first.
    pub async fn my_orders(&self, engine: &Engine) -> EngineResult<Vec<Order>> {
        Ok(engine
            .db()
            .orders()
            .list_for_session(&self.session.session_id)
            .await?)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
