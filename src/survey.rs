//! Survey-taking state machine.
//!
//! A deep link `.../{bot}?start=survey_{survey_id}_{group_id}` enters the
//! flow; questions are then walked strictly in order, answers accumulate in
//! the conversation state and are flushed to the export sink in one write at
//! the end.

use anyhow::Result;
use log::{error, info, warn};
use std::collections::BTreeSet;
use teloxide::prelude::*;
// `crate::state::Requester` (a struct) shadows the glob-imported teloxide
// `Requester` trait below; re-import the trait anonymously so its request
// methods (send_message, etc.) stay in scope.
use teloxide::prelude::Requester as _;
use teloxide::types::{BotCommand, InlineKeyboardMarkup, Message};
use tokio::task;

use crate::callback::{button, CallbackAction};
use crate::db::{self, QuestionKind};
use crate::export::{self, Submission};
use crate::plugin::Feature;
use crate::state::{Flow, Origin, Requester, TakeFlow};
use crate::AppState;

/// `survey_{survey_id}_{group_id}` -> ids. Strict: any extra or non-numeric
/// segment is rejected.
pub fn parse_deep_link(payload: &str) -> Option<(i64, i64)> {
    let rest = payload.strip_prefix("survey_")?;
    let (survey, group) = rest.split_once('_')?;
    Some((survey.parse().ok()?, group.parse().ok()?))
}

pub async fn handle_start(bot: Bot, state: AppState, msg: Message) -> Result<()> {
    let Some(user) = msg.from.clone() else {
        return Ok(());
    };
    let user_id = user.id.0 as i64;
    let text = msg.text().unwrap_or_default().to_string();
    let payload = text.split_whitespace().nth(1).unwrap_or("").to_string();

    let username = user.username.clone();
    db::db_call(state.cfg.db_path.clone(), move |conn| {
        db::touch_user(&conn, user_id, username.as_deref())
    })
    .await?;

    if payload.is_empty() {
        let template = db::db_call(state.cfg.db_path.clone(), move |conn| db::welcome_message(&conn))
            .await?;
        let welcome = template.replace("{username}", &user.full_name());
        bot.send_message(msg.chat.id, welcome).await?;
        return Ok(());
    }

    let Some((survey_id, group_id)) = parse_deep_link(&payload) else {
        bot.send_message(msg.chat.id, "That survey link is not valid.").await?;
        return Ok(());
    };

    let loaded = db::db_call(state.cfg.db_path.clone(), move |conn| {
        let survey = db::get_survey(&conn, survey_id)?;
        let questions = db::questions_for_survey(&conn, survey_id)?;
        let group = db::group_title(&conn, group_id)?;
        Ok((survey, questions, group))
    })
    .await?;

    let (Some(survey), questions, group) = loaded else {
        bot.send_message(msg.chat.id, "Survey not found.").await?;
        return Ok(());
    };
    if questions.is_empty() {
        bot.send_message(msg.chat.id, "This survey has no questions yet.").await?;
        return Ok(());
    }
    if survey.time_limit.map(|t| t < db::now_ts()).unwrap_or(false) {
        bot.send_message(msg.chat.id, "This survey is closed.").await?;
        return Ok(());
    }

    let origin = match group {
        Some(title) => Origin::Group { id: group_id, title },
        None => Origin::Private,
    };

    info!(
        "user {} starts survey '{}' (id {}) from {}",
        user_id,
        survey.name,
        survey.id,
        origin.id_label()
    );

    state.flows.set(
        user_id,
        Flow::Take(TakeFlow {
            survey_id: survey.id,
            survey_name: survey.name,
            anonymous: survey.anonymous,
            requester: Requester {
                user_id,
                first_name: user.first_name.clone(),
                last_name: user.last_name.clone().unwrap_or_default(),
                username: user.username.clone().unwrap_or_default(),
            },
            origin,
            questions,
            index: 0,
            responses: Vec::new(),
            picked: BTreeSet::new(),
        }),
    );

    send_question(&bot, &state, user_id).await
}

pub fn single_keyboard(q_index: usize, options: &[String]) -> InlineKeyboardMarkup {
    let rows = options
        .iter()
        .enumerate()
        .map(|(i, option)| {
            vec![button(option, CallbackAction::Answer { question: q_index, option: i })]
        })
        .collect::<Vec<_>>();
    InlineKeyboardMarkup::new(rows)
}

pub fn multi_keyboard(
    q_index: usize,
    options: &[String],
    picked: &BTreeSet<usize>,
) -> InlineKeyboardMarkup {
    let mut rows = options
        .iter()
        .enumerate()
        .map(|(i, option)| {
            let label = if picked.contains(&i) {
                format!("✅ {}", option)
            } else {
                option.clone()
            };
            vec![button(label, CallbackAction::Toggle { question: q_index, option: i })]
        })
        .collect::<Vec<_>>();
    rows.push(vec![button("Confirm", CallbackAction::Confirm { question: q_index })]);
    InlineKeyboardMarkup::new(rows)
}

/// Present the current question, or finish the run when past the last one.
pub async fn send_question(bot: &Bot, state: &AppState, user_id: i64) -> Result<()> {
    let Some(Flow::Take(flow)) = state.flows.get(user_id) else {
        return Ok(());
    };

    if flow.is_done() {
        return finish_run(bot, state, user_id, flow).await;
    }

    let q = &flow.questions[flow.index];
    let chat = ChatId(user_id);
    match q.kind {
        QuestionKind::Single => {
            bot.send_message(chat, q.text.clone())
                .reply_markup(single_keyboard(flow.index, &q.options))
                .await?;
        }
        QuestionKind::Multi => {
            bot.send_message(chat, format!("{}\n\nPick any that apply, then press Confirm.", q.text))
                .reply_markup(multi_keyboard(flow.index, &q.options, &flow.picked))
                .await?;
        }
        QuestionKind::Text => {
            bot.send_message(chat, format!("{}\n\nReply with your answer.", q.text))
                .await?;
        }
    }
    Ok(())
}

async fn finish_run(bot: &Bot, state: &AppState, user_id: i64, flow: TakeFlow) -> Result<()> {
    let submission = if flow.anonymous {
        Submission {
            user_id: String::new(),
            first_name: String::new(),
            last_name: String::new(),
            username: String::new(),
            group_id: flow.origin.id_label(),
            group_name: flow.origin.title_label().to_string(),
            date: db::format_ts(db::now_ts()),
            survey_name: flow.survey_name.clone(),
        }
    } else {
        Submission {
            user_id: flow.requester.user_id.to_string(),
            first_name: flow.requester.first_name.clone(),
            last_name: flow.requester.last_name.clone(),
            username: flow.requester.username.clone(),
            group_id: flow.origin.id_label(),
            group_name: flow.origin.title_label().to_string(),
            date: db::format_ts(db::now_ts()),
            survey_name: flow.survey_name.clone(),
        }
    };

    let data_dir = state.cfg.data_dir.clone();
    let rows = flow.responses.clone();
    task::spawn_blocking(move || export::append_rows(&data_dir, &submission, &rows))
        .await
        .map_err(|e| anyhow::anyhow!("export task join failed: {}", e))??;

    info!(
        "survey '{}' completed by user {} ({} answers)",
        flow.survey_name,
        user_id,
        flow.responses.len()
    );

    state.flows.clear(user_id);
    bot.send_message(ChatId(user_id), "Thank you for your answers! They have been recorded.")
        .await?;
    Ok(())
}

pub async fn handle_take_callback(
    bot: Bot,
    state: AppState,
    q: CallbackQuery,
    action: CallbackAction,
) -> Result<()> {
    bot.answer_callback_query(q.id.clone()).await?;
    let user_id = q.from.id.0 as i64;

    let Some(Flow::Take(flow)) = state.flows.get(user_id) else {
        bot.send_message(
            ChatId(user_id),
            "No active survey. Use an invitation link to start one.",
        )
        .await?;
        return Ok(());
    };

    match action {
        CallbackAction::Answer { question, option } => {
            if question != flow.index {
                bot.send_message(ChatId(user_id), "That question was already answered.").await?;
                return Ok(());
            }
            let Some(q_def) = flow.current_question() else {
                bot.send_message(ChatId(user_id), "Question not found.").await?;
                return Ok(());
            };
            let Some(choice) = q_def.options.get(option).cloned() else {
                bot.send_message(ChatId(user_id), "That option is no longer available.").await?;
                return Ok(());
            };
            let q_text = q_def.text.clone();
            state.flows.update(user_id, |f| {
                if let Flow::Take(t) = f {
                    t.push_answer(q_text.clone(), choice.clone());
                }
            });
            bot.send_message(ChatId(user_id), format!("You chose: {}", choice)).await?;
            send_question(&bot, &state, user_id).await?;
        }
        CallbackAction::Toggle { question, option } => {
            if question != flow.index {
                bot.send_message(ChatId(user_id), "That question was already answered.").await?;
                return Ok(());
            }
            let Some(q_def) = flow.current_question() else {
                bot.send_message(ChatId(user_id), "Question not found.").await?;
                return Ok(());
            };
            if option >= q_def.options.len() {
                bot.send_message(ChatId(user_id), "That option is no longer available.").await?;
                return Ok(());
            }
            let mut picked = flow.picked.clone();
            state.flows.update(user_id, |f| {
                if let Flow::Take(t) = f {
                    t.toggle(option);
                    picked = t.picked.clone();
                }
            });
            // refresh the checkmarks in place
            if let Some(m) = q.message.as_ref().and_then(|m| m.regular_message()) {
                if let Err(e) = bot
                    .edit_message_reply_markup(m.chat.id, m.id)
                    .reply_markup(multi_keyboard(question, &q_def.options, &picked))
                    .await
                {
                    warn!("toggle keyboard refresh failed for user {}: {}", user_id, e);
                }
            }
        }
        CallbackAction::Confirm { question } => {
            if question != flow.index {
                bot.send_message(ChatId(user_id), "That question was already answered.").await?;
                return Ok(());
            }
            let Some(q_def) = flow.current_question() else {
                bot.send_message(ChatId(user_id), "Question not found.").await?;
                return Ok(());
            };
            if flow.picked.is_empty() {
                bot.send_message(ChatId(user_id), "Select at least one option first.").await?;
                return Ok(());
            }
            let answer = flow
                .picked
                .iter()
                .filter_map(|i| q_def.options.get(*i))
                .cloned()
                .collect::<Vec<_>>()
                .join(", ");
            let q_text = q_def.text.clone();
            state.flows.update(user_id, |f| {
                if let Flow::Take(t) = f {
                    t.push_answer(q_text.clone(), answer.clone());
                }
            });
            bot.send_message(ChatId(user_id), format!("Your choice: {}", answer)).await?;
            send_question(&bot, &state, user_id).await?;
        }
        _ => {}
    }
    Ok(())
}

pub async fn handle_take_text(bot: Bot, state: AppState, msg: Message) -> Result<()> {
    let Some(user) = msg.from.as_ref() else {
        return Ok(());
    };
    let user_id = user.id.0 as i64;
    let Some(answer) = msg.text().map(|t| t.trim().to_string()) else {
        return Ok(());
    };

    let Some(Flow::Take(flow)) = state.flows.get(user_id) else {
        return Ok(());
    };
    let Some(q_def) = flow.current_question() else {
        return Ok(());
    };
    let q_text = q_def.text.clone();
    state.flows.update(user_id, |f| {
        if let Flow::Take(t) = f {
            t.push_answer(q_text.clone(), answer.clone());
        }
    });
    send_question(&bot, &state, user_id).await
}

fn awaiting_text_answer(state: &AppState, msg: &Message) -> bool {
    let Some(user) = msg.from.as_ref() else {
        return false;
    };
    matches!(
        state.flows.get(user.id.0 as i64),
        Some(Flow::Take(flow)) if flow.awaiting_text()
    )
}

pub struct SurveyFeature;

impl Feature for SurveyFeature {
    fn name(&self) -> &'static str {
        "survey"
    }

    fn commands(&self) -> Vec<BotCommand> {
        vec![BotCommand::new("start", "Show the welcome message or open a survey link")]
    }

    fn schema(&self) -> crate::plugin::Schema {
        dptree::entry()
            .branch(
                Update::filter_message()
                    .branch(
                        dptree::filter(|m: Message| {
                            m.chat.is_private()
                                && m.text()
                                    .map(|t| t == "/start" || t.starts_with("/start "))
                                    .unwrap_or(false)
                        })
                        .endpoint(|bot: Bot, state: AppState, msg: Message| async move {
                            if let Err(e) = handle_start(bot, state, msg).await {
                                error!("survey start handler error: {:?}", e);
                            }
                            Ok::<(), anyhow::Error>(())
                        }),
                    )
                    .branch(
                        dptree::filter(|state: AppState, m: Message| {
                            m.chat.is_private() && awaiting_text_answer(&state, &m)
                        })
                        .endpoint(|bot: Bot, state: AppState, msg: Message| async move {
                            if let Err(e) = handle_take_text(bot, state, msg).await {
                                error!("survey text handler error: {:?}", e);
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
                        dptree::filter(|a: CallbackAction| a.is_take_action()).endpoint(
                            |bot: Bot, state: AppState, q: CallbackQuery, a: CallbackAction| async move {
                                if let Err(e) = handle_take_callback(bot, state, q, a).await {
                                    error!("survey callback handler error: {:?}", e);
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

    fn callbacks(kb: &InlineKeyboardMarkup) -> Vec<String> {
        kb.inline_keyboard
            .iter()
            .flatten()
            .filter_map(|b| match &b.kind {
                InlineKeyboardButtonKind::CallbackData(data) => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn deep_link_parses_strictly() {
        assert_eq!(parse_deep_link("survey_3_-100123"), Some((3, -100123)));
        assert_eq!(parse_deep_link("survey_3"), None);
        assert_eq!(parse_deep_link("survey_a_b"), None);
        assert_eq!(parse_deep_link("poll_3_4"), None);
        assert_eq!(parse_deep_link(""), None);
        // a third id segment makes the group id non-numeric
        assert_eq!(parse_deep_link("survey_1_2_3"), None);
    }

    #[test]
    fn single_keyboard_one_button_per_option() {
        let kb = single_keyboard(2, &["Yes".into(), "No".into()]);
        let data = callbacks(&kb);
        assert_eq!(data, vec!["v1:ans:2:0", "v1:ans:2:1"]);
    }

    #[test]
    fn multi_keyboard_marks_picked_and_ends_with_confirm() {
        let mut picked = BTreeSet::new();
        picked.insert(1);
        let kb = multi_keyboard(0, &["a".into(), "b".into()], &picked);
        let labels: Vec<&str> = kb.inline_keyboard.iter().flatten().map(|b| b.text.as_str()).collect();
        assert_eq!(labels, vec!["a", "✅ b", "Confirm"]);
        let data = callbacks(&kb);
        assert_eq!(data.last().unwrap(), "v1:cfm:0");
    }
}
