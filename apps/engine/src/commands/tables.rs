//! # Table Commands
//!
//! Seating customers at a table and emptying it again.
//!
//! ## Session Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   EMPTY ──join (OTP ok)──▶ OCCUPIED [s1] ──join──▶ OCCUPIED [s1, s2]   │
//! │     ▲                                                     │            │
//! │     └──────── clear / settle_table / last cancel ─────────┘            │
//! │                                                                         │
//! │   A clear is one write: every seated device sees the same change     │
//! │   and its session stops validating.                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::{debug, info, warn};

use tavola_core::session::{self, JoinOutcome, JoinRequest};
use tavola_core::{Actor, CoreError, DiningTable, TableStatus};
use tavola_db::commit;
use tavola_db::repository::{settings, tables};

use crate::error::{EngineError, EngineResult};
use crate::Engine;

/// Seats a new customer session at a table.
pub async fn join(
    engine: &Engine,
    table_id: &str,
    otp: Option<&str>,
    display_name: &str,
) -> EngineResult<JoinOutcome> {
    join_with(
        engine,
        table_id,
        JoinRequest {
            otp: otp.map(str::to_string),
            display_name: display_name.to_string(),
            previous_session_id: None,
        },
    )
    .await
}

/// Seats a customer, or hands back the session the device already holds.
///
/// A device that reloads with a session still seated at the table gets it
/// back without an OTP and without a write. Otherwise the code is checked
/// and a new session appended; a wrong code changes nothing.
pub async fn join_with(engine: &Engine, table_id: &str, request: JoinRequest) -> EngineResult<JoinOutcome> {
    let now = Utc::now();
    let mut tx = engine.db().begin().await?;
    let before = tables::fetch(&mut tx, table_id).await?;

    if let Some(previous) = request.previous_session_id.as_deref() {
        if session::is_session_valid(&before, previous) {
            if let Some(existing) = session::find_session(&before, previous) {
                debug!(table_id = %table_id, session_id = %previous, "Session rejoined");
                return Ok(JoinOutcome {
                    table_id: before.id.clone(),
                    session: existing.clone(),
                    rejoined: true,
                });
            }
        }
    }

    let shop = settings::fetch(&mut tx, &before.shop_id).await?;
    let table_code = tables::fetch_otp(&mut tx, table_id).await?;
    if let Err(e) = session::verify_otp(&shop, table_id, table_code.as_deref(), request.otp.as_deref()) {
        warn!(table_id = %table_id, "Join refused: wrong admission code");
        return Err(e.into());
    }

    let mut after = before.clone();
    let seated = session::join(&mut after, session::new_session_id(), &request.display_name, now)?;
    let after = tables::update(&mut tx, &before, after).await?;
    commit(tx).await?;

    info!(
        table_id = %table_id,
        session_id = %seated.session_id,
        seated = after.active_sessions.len(),
        "Customer joined table"
    );
    Ok(JoinOutcome {
        table_id: after.id,
        session: seated,
        rejoined: false,
    })
}

/// Empties a table and ends every session on it.
///
/// Clearing an already empty table writes nothing.
pub async fn clear(engine: &Engine, table_id: &str) -> EngineResult<DiningTable> {
    let now = Utc::now();
    let mut tx = engine.db().begin().await?;
    let before = tables::fetch(&mut tx, table_id).await?;

    if before.status == TableStatus::Empty && before.active_sessions.is_empty() {
        debug!(table_id = %table_id, "Table already empty");
        return Ok(before);
    }

    let after = clear_in(&mut tx, &before, now).await?;
    commit(tx).await?;
    Ok(after)
}

/// Clears `table` inside the caller's transaction.
pub(crate) async fn clear_in(
    conn: &mut SqliteConnection,
    table: &DiningTable,
    now: DateTime<Utc>,
) -> EngineResult<DiningTable> {
    let mut after = table.clone();
    let removed = session::clear(&mut after, now);
    let after = tables::update(conn, table, after).await?;

    info!(table_id = %table.id, sessions = removed.len(), "Table cleared");
    Ok(after)
}

/// Whether `session_id` is still seated at an occupied table.
///
/// Devices call this on launch and after reconnecting, before trusting a
/// cached session.
pub async fn validate_session(engine: &Engine, table_id: &str, session_id: &str) -> EngineResult<bool> {
    match engine.db().tables().get_by_id(table_id).await {
        Ok(table) => Ok(session::is_session_valid(&table, session_id)),
        Err(tavola_db::DbError::NotFound { .. }) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Issues a new admission code for a table. Staff only.
///
/// Seated sessions are unaffected; only new joins need the new code.
pub async fn rotate_otp(engine: &Engine, table_id: &str, actor: &Actor) -> EngineResult<String> {
    if !actor.is_staff() {
        return Err(CoreError::Forbidden {
            actor: actor.name.clone(),
            action: "rotate table codes",
        }
        .into());
    }

    let mut tx = engine.db().begin().await?;
    let table = tables::fetch(&mut tx, table_id).await?;
    let otp = session::generate_otp();
    tables::set_otp(&mut tx, &table.id, &otp, Utc::now()).await?;
    commit(tx).await?;

    info!(table_id = %table_id, actor = %actor.name, "Table code rotated");
    Ok(otp)
}

/// Current admission code, for the staff display.
pub async fn otp(engine: &Engine, table_id: &str) -> EngineResult<String> {
    engine.db().tables().otp(table_id).await.map_err(|e| match e {
        tavola_db::DbError::NotFound { .. } => EngineError::not_found("Table", table_id),
        other => other.into(),
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{chef, engine, table, waiter, SHOP};
    use tavola_core::{ChangeFilter, ChangeTable};
    use tavola_sync::Delivery;

    async fn require_otp(engine: &Engine) {
        let mut shop = engine.db().settings().get(SHOP).await.unwrap();
        shop.otp_enabled = true;
        shop.per_table_otp = true;
        engine.db().settings().save(&shop).await.unwrap();
    }

    #[tokio::test]
    async fn test_join_checks_table_code() {
        let engine = engine().await;
        require_otp(&engine).await;
        let t1 = table(&engine, "T1").await;
        let code = otp(&engine, &t1.id).await.unwrap();

        let err = join(&engine, &t1.id, Some("000000x"), "Meera").await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidOtp { .. }));
        let err = join(&engine, &t1.id, None, "Meera").await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidOtp { .. }));

        let untouched = engine.db().tables().get_by_id(&t1.id).await.unwrap();
        assert_eq!(untouched.status, TableStatus::Empty);
        assert!(untouched.active_sessions.is_empty());
        assert_eq!(untouched.sync_version, t1.sync_version);

        let seated = join(&engine, &t1.id, Some(&code), "Meera").await.unwrap();
        assert!(!seated.rejoined);
        assert!(validate_session(&engine, &t1.id, &seated.session.session_id)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_joins_keep_order() {
        let engine = engine().await;
        let t1 = table(&engine, "T1").await;

        let first = join(&engine, &t1.id, None, "Meera").await.unwrap();
        let second = join(&engine, &t1.id, None, "Kabir").await.unwrap();

        let seated = engine.db().tables().get_by_id(&t1.id).await.unwrap();
        assert_eq!(seated.status, TableStatus::Occupied);
        let ids: Vec<_> = seated.active_sessions.iter().map(|s| s.session_id.clone()).collect();
        assert_eq!(ids, vec![first.session.session_id, second.session.session_id]);
        assert_eq!(seated.active_sessions[1].display_name, "Kabir");
    }

    #[tokio::test]
    async fn test_join_rejects_blank_name() {
        let engine = engine().await;
        let t1 = table(&engine, "T1").await;
        let err = join(&engine, &t1.id, None, "   ").await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_rejoin_reuses_session_without_write() {
        let engine = engine().await;
        require_otp(&engine).await;
        let t1 = table(&engine, "T1").await;
        let code = otp(&engine, &t1.id).await.unwrap();
        let seated = join(&engine, &t1.id, Some(&code), "Meera").await.unwrap();
        let before = engine.db().tables().get_by_id(&t1.id).await.unwrap();

        let again = join_with(
            &engine,
            &t1.id,
            JoinRequest {
                otp: None,
                display_name: "Meera".into(),
                previous_session_id: Some(seated.session.session_id.clone()),
            },
        )
        .await
        .unwrap();

        assert!(again.rejoined);
        assert_eq!(again.session, seated.session);
        let after = engine.db().tables().get_by_id(&t1.id).await.unwrap();
        assert_eq!(after.sync_version, before.sync_version);

        // a session that was cleared must go through the code again
        clear(&engine, &t1.id).await.unwrap();
        let err = join_with(
            &engine,
            &t1.id,
            JoinRequest {
                otp: None,
                display_name: "Meera".into(),
                previous_session_id: Some(seated.session.session_id.clone()),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidOtp { .. }));
    }

    #[tokio::test]
    async fn test_clear_is_one_change() {
        let engine = engine().await;
        let t1 = table(&engine, "T1").await;
        let a = join(&engine, &t1.id, None, "Meera").await.unwrap();
        join(&engine, &t1.id, None, "Kabir").await.unwrap();
        engine.publish_pending().await.unwrap();

        let mut sub = engine.subscribe(ChangeFilter::row(ChangeTable::Tables, &t1.id));
        let cleared = clear(&engine, &t1.id).await.unwrap();
        assert_eq!(cleared.status, TableStatus::Empty);
        assert!(cleared.active_sessions.is_empty());
        engine.publish_pending().await.unwrap();

        let deliveries = sub.drain();
        assert_eq!(deliveries.len(), 1);
        let Delivery::Change(event) = &deliveries[0] else {
            panic!("expected a change");
        };
        let image = event.new_row.as_ref().and_then(|r| r.as_table()).unwrap();
        assert!(image.active_sessions.is_empty());
        assert_eq!(image.status, TableStatus::Empty);

        assert!(!validate_session(&engine, &t1.id, &a.session.session_id)
            .await
            .unwrap());

        // clearing again writes nothing
        let again = clear(&engine, &t1.id).await.unwrap();
        assert_eq!(again.sync_version, cleared.sync_version);
        engine.publish_pending().await.unwrap();
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_validate_unknown_table() {
        let engine = engine().await;
        assert!(!validate_session(&engine, "no-such-table", "s").await.unwrap());
    }

    #[tokio::test]
    async fn test_rotate_otp() {
        let engine = engine().await;
        require_otp(&engine).await;
        let t1 = table(&engine, "T1").await;
        let old = otp(&engine, &t1.id).await.unwrap();
        let seated = join(&engine, &t1.id, Some(&old), "Meera").await.unwrap();

        let err = rotate_otp(&engine, &t1.id, &Actor::customer("s", "Meera"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));

        let mut new = rotate_otp(&engine, &t1.id, &waiter()).await.unwrap();
        while new == old {
            new = rotate_otp(&engine, &t1.id, &chef()).await.unwrap();
        }
        assert_eq!(otp(&engine, &t1.id).await.unwrap(), new);

        let err = join(&engine, &t1.id, Some(&old), "Kabir").await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidOtp { .. }));
        join(&engine, &t1.id, Some(&new), "Kabir").await.unwrap();

        assert!(validate_session(&engine, &t1.id, &seated.session.session_id)
            .await
            .unwrap());
    }
}
