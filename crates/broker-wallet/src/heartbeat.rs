//! HEARTBEAT handling: per-coin wallet status upserts.

use crate::Result;
use broker_db::{Database, StatusQueries, StatusRow};
use broker_proto::Heartbeat;
use tracing::{debug, warn};

/// The HEARTBEAT handler. Pure upsert; concurrent heartbeats for the same
/// coin are last-writer-wins, which is fine for snapshots.
#[derive(Clone)]
pub struct StatusUpdater {
    db: Database,
}

impl StatusUpdater {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Handler entry point: decode, upsert, produce the reply bytes.
    pub fn handle(&self, payload: &[u8]) -> Vec<u8> {
        let heartbeat: Heartbeat = match serde_json::from_slice(payload) {
            Ok(heartbeat) => heartbeat,
            Err(e) => {
                warn!("dropping undecodable HEARTBEAT payload: {e}");
                return Vec::new();
            }
        };

        match self.process(&heartbeat) {
            Ok(()) => {
                debug!(
                    coin = %heartbeat.coin,
                    online = heartbeat.online,
                    synced = heartbeat.synced,
                    blockheight = heartbeat.blockheight,
                    "HEARTBEAT processed"
                );
                b"Received HEARTBEAT".to_vec()
            }
            Err(e) => {
                warn!(coin = %heartbeat.coin, "HEARTBEAT failed: {e}");
                format!("HEARTBEAT failed: {e}").into_bytes()
            }
        }
    }

    /// Upsert the status snapshot for one coin.
    pub fn process(&self, heartbeat: &Heartbeat) -> Result<()> {
        self.db.with_txn(|conn| {
            conn.upsert_status(&StatusRow {
                coin: heartbeat.coin.clone(),
                online: heartbeat.online,
                synced: heartbeat.synced,
                crawling: heartbeat.crawling,
                blockheight: heartbeat.blockheight,
                blockhash: heartbeat.best_block_hash.clone(),
                blocktime: heartbeat.blocktime,
                updated_at: 0, // stamped by the gateway
            })
        })?;
        Ok(())
    }
}
