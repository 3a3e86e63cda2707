//! Queries over `user_wallet_job`.

use crate::{now_secs, Result};
use rusqlite::{params, Connection, OptionalExtension};

/// Job observed, user attribution not yet possible.
pub const JOB_STATE_OBSERVED: i32 = 0;
/// Job attributed to a user and processed.
pub const JOB_STATE_PROCESSED: i32 = 3;

/// One row of `user_wallet_job`. `job` is the txid it tracks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRow {
    pub job: String,
    pub state: i32,
    pub coin: String,
    pub data: String,
    pub user_id: Option<String>,
    pub result: Option<String>,
}

/// Trait for querying and storing credit-workflow jobs.
pub trait JobQueries {
    fn find_job(&self, job: &str) -> Result<Option<JobRow>>;

    /// Insert a new job in the observed state.
    fn insert_job(&self, job: &str, coin: &str, data: &str) -> Result<()>;

    /// Transition an observed job to processed, recording the attributed
    /// user. Returns false if the job was not in the observed state; the
    /// transition is monotonic.
    fn promote_job(&self, job: &str, user_id: &str) -> Result<bool>;
}

impl JobQueries for Connection {
    fn find_job(&self, job: &str) -> Result<Option<JobRow>> {
        Ok(self
            .query_row(
                "SELECT job, state, type, data, userid, result
                 FROM user_wallet_job WHERE job = ?1",
                params![job],
                |row| {
                    Ok(JobRow {
                        job: row.get(0)?,
                        state: row.get(1)?,
                        coin: row.get(2)?,
                        data: row.get(3)?,
                        user_id: row.get(4)?,
                        result: row.get(5)?,
                    })
                },
            )
            .optional()?)
    }

    fn insert_job(&self, job: &str, coin: &str, data: &str) -> Result<()> {
        let now = now_secs();
        self.execute(
            "INSERT INTO user_wallet_job (job, state, type, data, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![job, JOB_STATE_OBSERVED, coin, data, now],
        )?;
        Ok(())
    }

    fn promote_job(&self, job: &str, user_id: &str) -> Result<bool> {
        let updated = self.execute(
            "UPDATE user_wallet_job
             SET state = ?2, userid = ?3, result = 'okay', updated_at = ?4
             WHERE job = ?1 AND state = ?5",
            params![job, JOB_STATE_PROCESSED, user_id, now_secs(), JOB_STATE_OBSERVED],
        )?;
        Ok(updated > 0)
    }
}
