//! Survey delivery: fan the invitation out to every known group.

use anyhow::Result;
use log::{error, info, warn};
use teloxide::prelude::*;

use crate::config::ONBOARDING_SURVEY;
use crate::db;
use crate::AppState;

pub fn deep_link(bot_username: &str, survey_id: i64, group_id: i64) -> String {
    format!(
        "https://t.me/{}?start=survey_{}_{}",
        bot_username, survey_id, group_id
    )
}

/// The onboarding survey is advertised to every joiner anyway; pinning its
/// broadcast would just churn the pinned message.
pub fn should_pin(survey_name: &str) -> bool {
    survey_name != ONBOARDING_SURVEY
}

#[derive(Debug)]
pub struct BroadcastOutcome {
    pub survey_name: String,
    pub sent: usize,
    pub failed: usize,
}

/// Send the invitation to all known groups. Each destination is independent:
/// one failing group is logged and skipped, the rest still receive the
/// message. Returns None when the survey id no longer exists.
pub async fn broadcast_survey(
    bot: &Bot,
    state: &AppState,
    survey_id: i64,
) -> Result<Option<BroadcastOutcome>> {
    let (survey, groups) = db::db_call(state.cfg.db_path.clone(), move |conn| {
        Ok((db::get_survey(&conn, survey_id)?, db::all_groups(&conn)?))
    })
    .await?;

    let Some(survey) = survey else {
        return Ok(None);
    };

    let mut sent = 0usize;
    let mut failed = 0usize;
    for (group_id, _title) in groups {
        let link = deep_link(&state.bot_username, survey.id, group_id);
        let text = format!(
            "Dear members, please take the survey \"{}\":\n{}",
            survey.name, link
        );
        match bot.send_message(ChatId(group_id), text).await {
            Ok(message) => {
                sent += 1;
                if should_pin(&survey.name) {
                    if let Err(e) = bot.pin_chat_message(ChatId(group_id), message.id).await {
                        warn!("failed to pin invitation in group {}: {}", group_id, e);
                    }
                }
            }
            Err(e) => {
                failed += 1;
                error!("failed to deliver survey {} to group {}: {}", survey.id, group_id, e);
            }
        }
    }

    info!(
        "broadcast of '{}' done: {} sent, {} failed",
        survey.name, sent, failed
    );
    Ok(Some(BroadcastOutcome { survey_name: survey.name, sent, failed }))
}

/// Test-mode preview: the invitation goes to the invoking admin only.
pub async fn preview_survey(bot: &Bot, state: &AppState, survey_id: i64, admin_id: i64) -> Result<bool> {
    let survey =
        db::db_call(state.cfg.db_path.clone(), move |conn| db::get_survey(&conn, survey_id)).await?;
    let Some(survey) = survey else {
        return Ok(false);
    };
    let link = deep_link(&state.bot_username, survey.id, admin_id);
    bot.send_message(
        ChatId(admin_id),
        format!(
            "Test mode is ON, preview only.\nSurvey \"{}\":\n{}",
            survey.name, link
        ),
    )
    .await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deep_link_matches_start_payload_format() {
        let link = deep_link("pollgate_bot", 7, -1001234);
        assert_eq!(link, "https://t.me/pollgate_bot?start=survey_7_-1001234");
        // the payload side of the link parses back to the same ids
        let payload = link.split("start=").nth(1).unwrap();
        assert_eq!(crate::survey::parse_deep_link(payload), Some((7, -1001234)));
    }

    #[test]
    fn onboarding_survey_is_never_pinned() {
        assert!(!should_pin(ONBOARDING_SURVEY));
        assert!(should_pin("Quarterly feedback"));
    }
}
