//! NOTIFY ingestion state machine.
//!
//! Every NOTIFY is applied inside one immediate database transaction:
//!
//! 1. Ensure the observation row (confirms only ever rise)
//! 2. Ensure the job row while the transaction is incomplete
//! 3. Attribute balance entries to users via the address table
//! 4. Promote the job once attribution succeeds
//! 5. Insert one credit row per attributed user and add to their balance
//! 6. Finalize the observation row (complete latches, processed set)
//!
//! Crediting happens at most once per `(txid, user)`: the credit branch
//! only runs while the observation is not yet complete, and the credit
//! row's uniqueness constraint aborts the whole transaction on a replay
//! that slips past that guard.

use crate::amount::parse_int_string;
use crate::{BrokerError, CoinSettings, Result};
use broker_db::{
    AddressQueries, BalanceQueries, Database, DbError, JobQueries, TxQueries,
    JOB_STATE_OBSERVED,
};
use broker_proto::Notify;
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

/// Outcome of one processed NOTIFY, for logging and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOutcome {
    /// Users credited by this delivery.
    pub credited_users: usize,
    /// Whether the observation is complete after this delivery.
    pub complete: bool,
}

/// The NOTIFY handler.
#[derive(Clone)]
pub struct IngestPipeline {
    db: Database,
    settings: CoinSettings,
}

impl IngestPipeline {
    pub fn new(db: Database, settings: CoinSettings) -> Self {
        Self { db, settings }
    }

    /// Handler entry point: decode, process, and produce the reply bytes.
    ///
    /// Undecodable payloads are logged and dropped (empty reply, the
    /// connection stays up). A duplicate credit aborts the transaction
    /// but still replies normally so the wallet does not retransmit
    /// forever.
    pub fn handle(&self, payload: &[u8]) -> Vec<u8> {
        let notify: Notify = match serde_json::from_slice(payload) {
            Ok(notify) => notify,
            Err(e) => {
                warn!("dropping undecodable NOTIFY payload: {e}");
                return Vec::new();
            }
        };
        let raw = String::from_utf8_lossy(payload);

        match self.process(&notify, &raw) {
            Ok(outcome) => {
                debug!(
                    txid = %notify.txid,
                    confirmations = notify.confirmations,
                    credited = outcome.credited_users,
                    complete = outcome.complete,
                    "NOTIFY processed"
                );
                b"Received NOTIFY".to_vec()
            }
            Err(BrokerError::Db(DbError::DuplicateCredit { txid, user_id })) => {
                error!(%txid, %user_id, "duplicate credit attempt; transaction aborted");
                b"Received NOTIFY".to_vec()
            }
            Err(e) => {
                error!(txid = %notify.txid, "NOTIFY failed: {e}");
                format!("NOTIFY failed: {e}").into_bytes()
            }
        }
    }

    /// Apply one NOTIFY. `raw_payload` is recorded on a newly created job.
    pub fn process(&self, notify: &Notify, raw_payload: &str) -> Result<IngestOutcome> {
        let threshold = self.settings.confirm_threshold;

        // Amounts are pure functions of the payload; parse them before
        // touching the database so a malformed balance aborts cleanly.
        let mut amounts: Vec<Decimal> = Vec::with_capacity(notify.balances.len());
        for entry in &notify.balances {
            amounts.push(parse_int_string(&entry.balance, self.settings.decimal_precision)?);
        }

        let outcome = self.db.with_txn(|conn| {
            // 1. Ensure the observation row; confirms never decrease.
            let was_complete = conn
                .find_tx_row(&notify.txid)?
                .map(|row| row.complete)
                .unwrap_or(false);
            conn.upsert_tx_row(&notify.txid, notify.confirmations)?;

            // 2. Ensure the job row while the observation is incomplete.
            if !was_complete
                && notify.confirmations >= 0
                && conn.find_job(&notify.txid)?.is_none()
            {
                conn.insert_job(&notify.txid, &notify.coin, raw_payload)?;
            }

            // 3. Attribute balance entries to users. Within one NOTIFY a
            // later entry for the same address overwrites the earlier one.
            let mut attributed: Vec<(String, String, Decimal)> = Vec::new();
            if !was_complete && notify.confirmations >= threshold {
                for (entry, amount) in notify.balances.iter().zip(&amounts) {
                    let Some(owner) = conn.find_address(&entry.address)? else {
                        debug!(address = %entry.address, "unmapped address; skipping");
                        continue;
                    };
                    match attributed.iter_mut().find(|(a, _, _)| a == &entry.address) {
                        Some(slot) => {
                            slot.1 = owner.user_id;
                            slot.2 = *amount;
                        }
                        None => attributed.push((entry.address.clone(), owner.user_id, *amount)),
                    }
                }
            }

            // 4. Promote the job to the first attributed user.
            if let Some((_, first_user, _)) = attributed.first() {
                let job_observed = conn
                    .find_job(&notify.txid)?
                    .map(|job| job.state == JOB_STATE_OBSERVED)
                    .unwrap_or(false);
                if job_observed {
                    conn.promote_job(&notify.txid, first_user)?;
                }
            }

            // 5. Credit each attributed user exactly once.
            for (_, user_id, amount) in &attributed {
                conn.insert_credit_row(&notify.txid, user_id, amount, notify.confirmations)?;
                let balance = conn.add_to_balance(user_id, amount)?;
                info!(
                    txid = %notify.txid,
                    user_id = %user_id,
                    %amount,
                    %balance,
                    "credited user"
                );
            }

            // 6. Finalize the observation row. `processed` tracks
            // completion: below the threshold there is nothing to apply.
            let complete = notify.confirmations >= threshold;
            conn.finalize_tx_row(
                &notify.txid,
                notify.confirmations,
                complete,
                complete,
                notify.blockhash.as_deref(),
            )?;

            Ok(IngestOutcome {
                credited_users: attributed.len(),
                complete: was_complete || complete,
            })
        })?;

        Ok(outcome)
    }
}
