//! Captcha gate for new group members.
//!
//! A joiner is restricted, shown one correct token among five decoys, and
//! removed on timeout. Every pending user owns one cancellable timer task;
//! the gate registry is the single authority on whether an expiry may still
//! fire, which keeps the success path and a late timer from double-removing.

use anyhow::Result;
use log::{error, info, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::{ChatPermissions, InlineKeyboardButton, InlineKeyboardMarkup, Message};
use url::Url;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::broadcast;
use crate::callback::{button, CallbackAction};
use crate::config::ONBOARDING_SURVEY;
use crate::db;
use crate::plugin::Feature;
use crate::AppState;

const TOKEN_LEN: usize = 5;
const DECOYS: usize = 5;
const WARN_LEAD_SECS: u64 = 60;

struct Challenge {
    token: String,
    timer: Option<JoinHandle<()>>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum CaptchaOutcome {
    Passed,
    Wrong,
    Stale,
}

/// In-memory registry of open challenges keyed by (user, chat). The sqlite
/// `pending_captcha` table mirrors it for the message-suppression path and
/// survives restarts; the registry owns the tokens and timers.
#[derive(Clone, Default)]
pub struct CaptchaGate {
    inner: Arc<Mutex<HashMap<(i64, i64), Challenge>>>,
}

impl CaptchaGate {
    pub fn issue(&self, user_id: i64, chat_id: i64, token: String) {
        let mut map = self.inner.lock().expect("captcha gate poisoned");
        if let Some(old) = map.insert((user_id, chat_id), Challenge { token, timer: None }) {
            if let Some(handle) = old.timer {
                handle.abort();
            }
        }
    }

    pub fn attach_timer(&self, user_id: i64, chat_id: i64, handle: JoinHandle<()>) {
        let mut map = self.inner.lock().expect("captcha gate poisoned");
        if let Some(challenge) = map.get_mut(&(user_id, chat_id)) {
            challenge.timer = Some(handle);
        } else {
            // challenge resolved between spawn and attach
            handle.abort();
        }
    }

    /// Success path: a correct answer removes the entry and cancels the
    /// timer atomically with respect to `take_expired`.
    pub fn check(&self, user_id: i64, chat_id: i64, answer: &str) -> CaptchaOutcome {
        let mut map = self.inner.lock().expect("captcha gate poisoned");
        match map.get(&(user_id, chat_id)) {
            None => CaptchaOutcome::Stale,
            Some(challenge) if challenge.token != answer => CaptchaOutcome::Wrong,
            Some(_) => {
                if let Some(challenge) = map.remove(&(user_id, chat_id)) {
                    if let Some(handle) = challenge.timer {
                        handle.abort();
                    }
                }
                CaptchaOutcome::Passed
            }
        }
    }

    /// Expiry path: the timer claims the entry. False means the user already
    /// passed (or another firing won), so the caller must not remove anyone.
    pub fn take_expired(&self, user_id: i64, chat_id: i64) -> bool {
        self.inner
            .lock()
            .expect("captcha gate poisoned")
            .remove(&(user_id, chat_id))
            .is_some()
    }

    pub fn is_open(&self, user_id: i64, chat_id: i64) -> bool {
        self.inner
            .lock()
            .expect("captcha gate poisoned")
            .contains_key(&(user_id, chat_id))
    }

    pub fn abort_all(&self) {
        let mut map = self.inner.lock().expect("captcha gate poisoned");
        for (_, challenge) in map.drain() {
            if let Some(handle) = challenge.timer {
                handle.abort();
            }
        }
    }
}

fn gen_token() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();
    (0..TOKEN_LEN)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

/// One correct token plus five distinct decoys, shuffled.
pub fn challenge_options() -> (String, Vec<String>) {
    let correct = gen_token();
    let mut options = vec![correct.clone()];
    while options.len() < DECOYS + 1 {
        let decoy = gen_token();
        if !options.contains(&decoy) {
            options.push(decoy);
        }
    }
    options.shuffle(&mut rand::thread_rng());
    (correct, options)
}

pub fn challenge_keyboard(user_id: i64, options: &[String]) -> InlineKeyboardMarkup {
    let rows = options
        .chunks(3)
        .map(|chunk| {
            chunk
                .iter()
                .map(|token| {
                    button(token, CallbackAction::Captcha { user_id, token: token.clone() })
                })
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();
    InlineKeyboardMarkup::new(rows)
}

fn member_permissions() -> ChatPermissions {
    ChatPermissions::SEND_MESSAGES
        | ChatPermissions::SEND_MEDIA_MESSAGES
        | ChatPermissions::SEND_POLLS
        | ChatPermissions::SEND_OTHER_MESSAGES
        | ChatPermissions::ADD_WEB_PAGE_PREVIEWS
}

pub async fn on_new_members(bot: Bot, state: AppState, msg: Message) -> Result<()> {
    let Some(members) = msg.new_chat_members().map(|m| m.to_vec()) else {
        return Ok(());
    };
    let chat_id = msg.chat.id.0;
    let title = msg.chat.title().unwrap_or("unknown group").to_string();

    let title_db = title.clone();
    db::db_call(state.cfg.db_path.clone(), move |conn| {
        db::upsert_group(&conn, chat_id, &title_db)
    })
    .await?;

    for user in members {
        if user.is_bot {
            continue;
        }
        let user_id = user.id.0 as i64;
        let username = user.username.clone();

        let (join_survey, welcome) = db::db_call(state.cfg.db_path.clone(), move |conn| {
            db::touch_user(&conn, user_id, username.as_deref())?;
            let assigned = match db::join_survey(&conn, chat_id)? {
                Some(id) => Some(id),
                None => db::get_survey_id_by_name(&conn, ONBOARDING_SURVEY)?,
            };
            Ok((assigned, db::welcome_message(&conn)?))
        })
        .await?;

        let greeting = welcome.replace("{username}", &user.full_name());
        if let Some(survey_id) = join_survey {
            let link = broadcast::deep_link(&state.bot_username, survey_id, chat_id);
            let kb = InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::url(
                "Take the survey",
                Url::parse(&link)?,
            )]]);
            bot.send_message(msg.chat.id, greeting).reply_markup(kb).await?;
        } else {
            bot.send_message(msg.chat.id, greeting).await?;
        }

        if state.cfg.captcha_enabled {
            issue_challenge(&bot, &state, chat_id, &user.full_name(), user_id).await?;
        }
    }
    Ok(())
}

async fn issue_challenge(
    bot: &Bot,
    state: &AppState,
    chat_id: i64,
    display_name: &str,
    user_id: i64,
) -> Result<()> {
    if let Err(e) = bot
        .restrict_chat_member(ChatId(chat_id), UserId(user_id as u64), ChatPermissions::empty())
        .await
    {
        error!("failed to restrict user {} in chat {}: {}", user_id, chat_id, e);
    }
    db::db_call(state.cfg.db_path.clone(), move |conn| {
        db::add_pending(&conn, user_id, chat_id)
    })
    .await?;

    let (correct, options) = challenge_options();
    state.captcha.issue(user_id, chat_id, correct.clone());

    bot.send_message(
        ChatId(chat_id),
        format!(
            "{}, please verify you are human within {} minutes.\nTap this code: {}",
            display_name, state.cfg.captcha_timeout_mins, correct
        ),
    )
    .reply_markup(challenge_keyboard(user_id, &options))
    .await?;

    let handle = spawn_expiry_timer(bot.clone(), state.clone(), user_id, chat_id, display_name.to_string());
    state.captcha.attach_timer(user_id, chat_id, handle);
    info!("captcha issued for user {} in chat {}", user_id, chat_id);
    Ok(())
}

fn spawn_expiry_timer(
    bot: Bot,
    state: AppState,
    user_id: i64,
    chat_id: i64,
    display_name: String,
) -> JoinHandle<()> {
    let timeout = Duration::from_secs(state.cfg.captcha_timeout_mins as u64 * 60);
    tokio::spawn(async move {
        let warn_lead = if timeout.as_secs() > WARN_LEAD_SECS {
            Duration::from_secs(WARN_LEAD_SECS)
        } else {
            Duration::ZERO
        };

        sleep(timeout - warn_lead).await;
        if !warn_lead.is_zero() && state.captcha.is_open(user_id, chat_id) {
            let _ = bot
                .send_message(
                    ChatId(chat_id),
                    format!("⚠️ {}, one minute left to complete the verification!", display_name),
                )
                .await;
        }
        sleep(warn_lead).await;

        // the gate entry is the removal ticket; losing it means the user
        // passed in the meantime
        if !state.captcha.take_expired(user_id, chat_id) {
            return;
        }

        let still_pending = db::db_call(state.cfg.db_path.clone(), move |conn| {
            db::remove_pending(&conn, user_id, chat_id)
        })
        .await
        .unwrap_or_else(|e| {
            error!("failed to clear pending record for user {}: {:?}", user_id, e);
            false
        });
        if !still_pending {
            return;
        }

        info!("captcha expired, removing user {} from chat {}", user_id, chat_id);
        let target = UserId(user_id as u64);
        match bot.ban_chat_member(ChatId(chat_id), target).await {
            Ok(_) => {
                // lift the ban so the user may rejoin later
                if let Err(e) = bot.unban_chat_member(ChatId(chat_id), target).await {
                    warn!("failed to unban user {} in chat {}: {}", user_id, chat_id, e);
                }
                let _ = bot
                    .send_message(
                        ChatId(chat_id),
                        format!("{} was removed: the verification was not completed in time.", display_name),
                    )
                    .await;
            }
            Err(e) => {
                // pending state is already cleared, so nobody stays locked out
                error!("failed to remove user {} from chat {}: {}", user_id, chat_id, e);
            }
        }
    })
}

pub async fn handle_captcha_callback(
    bot: Bot,
    state: AppState,
    q: CallbackQuery,
    action: CallbackAction,
) -> Result<()> {
    let CallbackAction::Captcha { user_id, token } = action else {
        return Ok(());
    };
    if q.from.id.0 as i64 != user_id {
        bot.answer_callback_query(q.id.clone())
            .text("This challenge is not for you.")
            .await?;
        return Ok(());
    }
    let Some(message) = q.message.as_ref().and_then(|m| m.regular_message()).cloned() else {
        bot.answer_callback_query(q.id.clone()).await?;
        return Ok(());
    };
    let chat_id = message.chat.id.0;

    match state.captcha.check(user_id, chat_id, &token) {
        CaptchaOutcome::Wrong => {
            bot.answer_callback_query(q.id.clone()).text("Wrong code, try again.").await?;
        }
        CaptchaOutcome::Stale => {
            bot.answer_callback_query(q.id.clone())
                .text("This challenge has already expired.")
                .await?;
        }
        CaptchaOutcome::Passed => {
            bot.answer_callback_query(q.id.clone()).await?;
            db::db_call(state.cfg.db_path.clone(), move |conn| {
                db::remove_pending(&conn, user_id, chat_id)
            })
            .await?;
            if let Err(e) = bot
                .restrict_chat_member(ChatId(chat_id), UserId(user_id as u64), member_permissions())
                .await
            {
                error!("failed to lift restriction for user {} in chat {}: {}", user_id, chat_id, e);
            }
            bot.edit_message_text(
                message.chat.id,
                message.id,
                format!("✅ {} passed the verification. Welcome!", q.from.full_name()),
            )
            .await?;
            info!("captcha passed by user {} in chat {}", user_id, chat_id);
        }
    }
    Ok(())
}

/// Group traffic that is not a join event: suppress messages from users who
/// still owe a captcha, otherwise record activity.
pub async fn handle_group_message(bot: Bot, state: AppState, msg: Message) -> Result<()> {
    let Some(user) = msg.from.clone() else {
        return Ok(());
    };
    let user_id = user.id.0 as i64;
    let chat_id = msg.chat.id.0;
    let title = msg.chat.title().unwrap_or("unknown group").to_string();

    let pending = db::db_call(state.cfg.db_path.clone(), move |conn| {
        db::upsert_group(&conn, chat_id, &title)?;
        db::touch_user(&conn, user_id, user.username.as_deref())?;
        db::is_pending(&conn, user_id, chat_id)
    })
    .await?;

    if pending {
        if let Err(e) = bot.delete_message(msg.chat.id, msg.id).await {
            warn!("failed to delete message from pending user {}: {}", user_id, e);
        }
        bot.send_message(
            msg.chat.id,
            "❌ You cannot post here until you complete the verification above.",
        )
        .await?;
    }
    Ok(())
}

pub struct GroupGateFeature;

impl Feature for GroupGateFeature {
    fn name(&self) -> &'static str {
        "groups"
    }

    fn schema(&self) -> crate::plugin::Schema {
        dptree::entry()
            .branch(
                Update::filter_message().branch(
                    dptree::filter(|m: Message| m.chat.is_group() || m.chat.is_supergroup())
                        .branch(
                            dptree::filter(|m: Message| m.new_chat_members().is_some()).endpoint(
                                |bot: Bot, state: AppState, msg: Message| async move {
                                    if let Err(e) = on_new_members(bot, state, msg).await {
                                        error!("join handler error: {:?}", e);
                                    }
                                    Ok::<(), anyhow::Error>(())
                                },
                            ),
                        )
                        .endpoint(|bot: Bot, state: AppState, msg: Message| async move {
                            if let Err(e) = handle_group_message(bot, state, msg).await {
                                error!("group message handler error: {:?}", e);
                            }
                            Ok::<(), anyhow::Error>(())
                        }),
                ),
            )
            .branch(
                Update::filter_callback_query()
                    .chain(dptree::filter_map(|q: CallbackQuery| {
                        q.data.as_deref().and_then(CallbackAction::parse)
                    }))
                    .branch(
                        dptree::filter(|a: CallbackAction| a.is_captcha_action()).endpoint(
                            |bot: Bot, state: AppState, q: CallbackQuery, a: CallbackAction| async move {
                                if let Err(e) = handle_captcha_callback(bot, state, q, a).await {
                                    error!("captcha callback handler error: {:?}", e);
                                }
                                Ok::<(), anyhow::Error>(())
                            },
                        ),
                    ),
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use teloxide::types::InlineKeyboardButtonKind;

    #[test]
    fn challenge_has_one_correct_among_six() {
        for _ in 0..50 {
            let (correct, options) = challenge_options();
            assert_eq!(options.len(), DECOYS + 1);
            assert_eq!(options.iter().filter(|o| **o == correct).count(), 1);
            assert!(options.iter().all(|o| o.len() == TOKEN_LEN));
            assert!(options
                .iter()
                .all(|o| o.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())));
        }
    }

    #[test]
    fn keyboard_carries_every_option() {
        let (_, options) = challenge_options();
        let kb = challenge_keyboard(9, &options);
        let data: Vec<String> = kb
            .inline_keyboard
            .iter()
            .flatten()
            .filter_map(|b| match &b.kind {
                InlineKeyboardButtonKind::CallbackData(d) => Some(d.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(data.len(), options.len());
        for token in &options {
            assert!(data.contains(&format!("v1:cap:9:{}", token)));
        }
    }

    #[test]
    fn gate_check_outcomes() {
        let gate = CaptchaGate::default();
        gate.issue(1, -10, "AAAAA".into());
        assert_eq!(gate.check(1, -10, "BBBBB"), CaptchaOutcome::Wrong);
        assert!(gate.is_open(1, -10));
        assert_eq!(gate.check(1, -10, "AAAAA"), CaptchaOutcome::Passed);
        assert!(!gate.is_open(1, -10));
        assert_eq!(gate.check(1, -10, "AAAAA"), CaptchaOutcome::Stale);
    }

    #[test]
    fn expiry_claims_entry_exactly_once() {
        let gate = CaptchaGate::default();
        gate.issue(2, -10, "CCCCC".into());
        assert!(gate.take_expired(2, -10));
        // a racing second firing, or a late correct answer, finds nothing
        assert!(!gate.take_expired(2, -10));
        assert_eq!(gate.check(2, -10, "CCCCC"), CaptchaOutcome::Stale);
    }

    #[test]
    fn passing_blocks_later_expiry() {
        let gate = CaptchaGate::default();
        gate.issue(3, -10, "DDDDD".into());
        assert_eq!(gate.check(3, -10, "DDDDD"), CaptchaOutcome::Passed);
        assert!(!gate.take_expired(3, -10));
    }

    #[test]
    fn challenges_are_scoped_per_chat() {
        let gate = CaptchaGate::default();
        gate.issue(4, -10, "EEEEE".into());
        gate.issue(4, -20, "FFFFF".into());
        assert_eq!(gate.check(4, -10, "EEEEE"), CaptchaOutcome::Passed);
        assert!(gate.is_open(4, -20));
    }
}
