//! Scheduled survey delivery.

use log::{error, info};
use std::time::Duration;
use teloxide::prelude::*;
use tokio::task::JoinHandle;

use crate::broadcast;
use crate::db;
use crate::AppState;

const TICK: Duration = Duration::from_secs(60);

/// Wake once a minute and deliver every survey whose scheduled time has
/// passed. `take_due_surveys` clears the schedule column while collecting, so
/// each delivery fires exactly once even if a broadcast later fails.
pub fn spawn(bot: Bot, state: AppState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(TICK);
        loop {
            ticker.tick().await;
            let due = match db::db_call(state.cfg.db_path.clone(), move |conn| {
                db::take_due_surveys(&conn, db::now_ts())
            })
            .await
            {
                Ok(due) => due,
                Err(e) => {
                    error!("scheduler store error: {:?}", e);
                    continue;
                }
            };

            for survey_id in due {
                match broadcast::broadcast_survey(&bot, &state, survey_id).await {
                    Ok(Some(outcome)) => info!(
                        "scheduled delivery of '{}': {} sent, {} failed",
                        outcome.survey_name, outcome.sent, outcome.failed
                    ),
                    Ok(None) => info!("scheduled survey {} vanished before delivery", survey_id),
                    Err(e) => error!("scheduled delivery of survey {} failed: {:?}", survey_id, e),
                }
            }
        }
    })
}
