//! Admin wizard: survey creation, editing, delivery and group configuration.
//!
//! The menu and every picker are inline keyboards; the ids ride inside the
//! callback data, so only the steps that genuinely wait for typed input keep
//! conversation state. A text step that finds the wrong state aborts back to
//! the menu instead of guessing.

use anyhow::Result;
use log::{error, info};
use teloxide::prelude::*;
use teloxide::types::{
    BotCommand, InlineKeyboardMarkup, InputFile, MaybeInaccessibleMessage, Message,
};
use tokio::task;

use crate::broadcast;
use crate::callback::{button, CallbackAction};
use crate::db::{self, QuestionKind};
use crate::export;
use crate::plugin::Feature;
use crate::state::{AdminFlow, Flow};
use crate::AppState;

const MIN_OPTIONS: usize = 2;

fn menu_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![
            button("📝 Create survey", CallbackAction::CreateSurvey),
            button("✏️ Edit survey", CallbackAction::EditMenu),
        ],
        vec![
            button("📋 List surveys", CallbackAction::ListSurveys),
            button("🗑 Delete survey", CallbackAction::DeleteMenu),
        ],
        vec![
            button("📤 Broadcast survey", CallbackAction::BroadcastMenu),
            button("📊 Send results", CallbackAction::ResultsMenu),
        ],
        vec![
            button("⏰ Scheduled surveys", CallbackAction::ScheduledList),
            button("🔍 Filter surveys", CallbackAction::FilterSurveys),
        ],
        vec![
            button("🚪 Join survey", CallbackAction::JoinConfigMenu),
            button("👋 Welcome message", CallbackAction::SetWelcome),
        ],
        vec![
            button("🧪 Test mode", CallbackAction::ToggleTestMode),
            button("📈 Analytics", CallbackAction::Analytics),
        ],
    ])
}

fn back_row() -> Vec<teloxide::types::InlineKeyboardButton> {
    vec![button("⬅️ Back to menu", CallbackAction::Menu)]
}

fn kind_keyboard(survey_id: i64) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![
            button(
                QuestionKind::Single.label(),
                CallbackAction::PickKind { survey_id, kind: QuestionKind::Single },
            ),
            button(
                QuestionKind::Multi.label(),
                CallbackAction::PickKind { survey_id, kind: QuestionKind::Multi },
            ),
        ],
        vec![
            button(
                QuestionKind::Text.label(),
                CallbackAction::PickKind { survey_id, kind: QuestionKind::Text },
            ),
            button("Finish adding questions", CallbackAction::FinishQuestions { survey_id }),
        ],
    ])
}

fn settings_keyboard(survey_id: i64) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![button("⏳ Set time limit", CallbackAction::SetTimeLimit { survey_id })],
        vec![button("🙈 Toggle anonymity", CallbackAction::ToggleAnonymous { survey_id })],
        vec![button("🏷 Add tags", CallbackAction::AddTags { survey_id })],
        vec![button("📅 Schedule delivery", CallbackAction::Schedule { survey_id })],
        vec![button("✅ Finish", CallbackAction::FinishCreation { survey_id })],
    ])
}

fn edit_action_keyboard(survey_id: i64) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![button("Rename survey", CallbackAction::RenameSurvey { survey_id })],
        vec![button("Edit questions", CallbackAction::EditQuestions { survey_id })],
        back_row(),
    ])
}

fn question_action_keyboard(question_id: i64) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![
            button("Change text", CallbackAction::RetextQuestion { question_id }),
            button("Change options", CallbackAction::ReoptionsQuestion { question_id }),
        ],
        vec![button("Delete question", CallbackAction::DeleteQuestion { question_id })],
        back_row(),
    ])
}

fn survey_list_keyboard<F>(surveys: &[(i64, String)], make: F) -> InlineKeyboardMarkup
where
    F: Fn(i64) -> CallbackAction,
{
    let mut rows: Vec<Vec<teloxide::types::InlineKeyboardButton>> = surveys
        .iter()
        .map(|(id, name)| vec![button(shorten_label(name, 50), make(*id))])
        .collect();
    rows.push(back_row());
    InlineKeyboardMarkup::new(rows)
}

fn shorten_label(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let trimmed: String = s.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", trimmed)
}

/// Comma-separated operator input -> trimmed, non-empty items.
fn parse_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

async fn send_or_edit(
    bot: &Bot,
    chat_id: ChatId,
    message: Option<MaybeInaccessibleMessage>,
    text: String,
    markup: Option<InlineKeyboardMarkup>,
) -> Result<()> {
    if let Some(msg) = message.as_ref().and_then(|m| m.regular_message()) {
        let mut req = bot.edit_message_text(chat_id, msg.id, text);
        if let Some(kb) = markup {
            req = req.reply_markup(kb);
        }
        req.await?;
    } else {
        let mut req = bot.send_message(chat_id, text);
        if let Some(kb) = markup {
            req = req.reply_markup(kb);
        }
        req.await?;
    }
    Ok(())
}

async fn show_menu(
    bot: &Bot,
    chat_id: ChatId,
    message: Option<MaybeInaccessibleMessage>,
) -> Result<()> {
    send_or_edit(bot, chat_id, message, "🛠 Admin menu. Pick an action:".to_string(), Some(menu_keyboard()))
        .await
}

pub async fn handle_admin_command(bot: Bot, state: AppState, msg: Message) -> Result<()> {
    let Some(user) = msg.from.as_ref() else {
        return Ok(());
    };
    let user_id = user.id.0 as i64;
    if !state.cfg.is_admin(user_id) {
        bot.send_message(msg.chat.id, "You do not have access to the admin functions.")
            .await?;
        return Ok(());
    }
    // entering the menu always discards whatever wizard was in flight
    state.flows.clear(user_id);
    show_menu(&bot, msg.chat.id, None).await
}

/// A wizard text step found without its prerequisite data: discard and
/// return to the menu rather than resuming something half-built.
async fn abort_to_menu(bot: &Bot, state: &AppState, user_id: i64, reason: &str) -> Result<()> {
    state.flows.clear(user_id);
    bot.send_message(ChatId(user_id), format!("{} The action was cancelled.", reason))
        .await?;
    show_menu(bot, ChatId(user_id), None).await
}

pub async fn handle_admin_text(bot: Bot, state: AppState, msg: Message) -> Result<()> {
    let Some(user) = msg.from.as_ref() else {
        return Ok(());
    };
    let user_id = user.id.0 as i64;
    if !state.cfg.is_admin(user_id) {
        return Ok(());
    }
    let Some(text) = msg.text().map(|t| t.trim().to_string()) else {
        return Ok(());
    };
    let Some(Flow::Admin(flow)) = state.flows.get(user_id) else {
        return Ok(());
    };
    let chat = msg.chat.id;

    match flow {
        AdminFlow::AwaitName => {
            if text.is_empty() {
                bot.send_message(chat, "The name cannot be empty. Enter a survey name.").await?;
                return Ok(());
            }
            let name = text.clone();
            let created = db::db_call(state.cfg.db_path.clone(), move |conn| {
                if db::survey_exists(&conn, &name)? {
                    Ok(None)
                } else {
                    Ok(Some(db::add_survey(&conn, &name)?))
                }
            })
            .await?;
            match created {
                None => {
                    bot.send_message(
                        chat,
                        format!("A survey named '{}' already exists. Enter another name.", text),
                    )
                    .await?;
                }
                Some(survey_id) => {
                    info!("survey '{}' created with id {}", text, survey_id);
                    state.flows.clear(user_id);
                    bot.send_message(
                        chat,
                        format!("Survey '{}' created. Add a question:", text),
                    )
                    .reply_markup(kind_keyboard(survey_id))
                    .await?;
                }
            }
        }
        AdminFlow::AwaitQuestionText { survey_id, survey_name, kind } => {
            if text.is_empty() {
                bot.send_message(chat, "Enter the question text.").await?;
                return Ok(());
            }
            if kind.has_options() {
                state.flows.set(
                    user_id,
                    Flow::Admin(AdminFlow::AwaitQuestionOptions {
                        survey_id,
                        survey_name,
                        kind,
                        text: text.clone(),
                    }),
                );
                bot.send_message(chat, "Enter the answer options, separated by commas.").await?;
            } else {
                let q_text = text.clone();
                let stored = db::db_call(state.cfg.db_path.clone(), move |conn| {
                    if db::get_survey(&conn, survey_id)?.is_none() {
                        return Ok(false);
                    }
                    db::add_question(&conn, survey_id, &q_text, kind, &[])?;
                    Ok(true)
                })
                .await?;
                if !stored {
                    return abort_to_menu(&bot, &state, user_id, "The survey no longer exists.").await;
                }
                state.flows.clear(user_id);
                bot.send_message(chat, "Question added. Add another or finish:")
                    .reply_markup(kind_keyboard(survey_id))
                    .await?;
            }
        }
        AdminFlow::AwaitQuestionOptions { survey_id, survey_name: _, kind, text: q_text } => {
            let options = parse_list(&text);
            if options.len() < MIN_OPTIONS {
                bot.send_message(
                    chat,
                    format!("Enter at least {} options, separated by commas.", MIN_OPTIONS),
                )
                .await?;
                return Ok(());
            }
            let stored = db::db_call(state.cfg.db_path.clone(), move |conn| {
                if db::get_survey(&conn, survey_id)?.is_none() {
                    return Ok(false);
                }
                db::add_question(&conn, survey_id, &q_text, kind, &options)?;
                Ok(true)
            })
            .await?;
            if !stored {
                return abort_to_menu(&bot, &state, user_id, "The survey no longer exists.").await;
            }
            state.flows.clear(user_id);
            bot.send_message(chat, "Question with options added. Add another or finish:")
                .reply_markup(kind_keyboard(survey_id))
                .await?;
        }
        AdminFlow::AwaitTimeLimitHours { survey_id, survey_name } => {
            let Ok(hours) = text.parse::<i64>() else {
                bot.send_message(chat, "Enter a whole number of hours.").await?;
                return Ok(());
            };
            if hours <= 0 {
                bot.send_message(chat, "Enter a whole number of hours.").await?;
                return Ok(());
            }
            let limit = db::now_ts() + hours * 3600;
            db::db_call(state.cfg.db_path.clone(), move |conn| {
                db::set_survey_time_limit(&conn, survey_id, Some(limit))
            })
            .await?;
            state.flows.clear(user_id);
            bot.send_message(
                chat,
                format!("Survey closes at {} (UTC). Configure '{}':", db::format_ts(limit), survey_name),
            )
            .reply_markup(settings_keyboard(survey_id))
            .await?;
        }
        AdminFlow::AwaitTags { survey_id, survey_name } => {
            let tags = parse_list(&text);
            if tags.is_empty() {
                bot.send_message(chat, "Enter at least one tag.").await?;
                return Ok(());
            }
            let count = tags.len();
            db::db_call(state.cfg.db_path.clone(), move |conn| {
                for tag in &tags {
                    db::add_tag(&conn, survey_id, tag)?;
                }
                Ok(())
            })
            .await?;
            state.flows.clear(user_id);
            bot.send_message(chat, format!("Added {} tag(s). Configure '{}':", count, survey_name))
                .reply_markup(settings_keyboard(survey_id))
                .await?;
        }
        AdminFlow::AwaitSchedule { survey_id, survey_name } => {
            let Some(at) = db::parse_stamp(&text) else {
                bot.send_message(chat, "Invalid format. Enter the date and time as DD.MM.YYYY HH:MM.")
                    .await?;
                return Ok(());
            };
            db::db_call(state.cfg.db_path.clone(), move |conn| {
                db::set_survey_schedule(&conn, survey_id, Some(at))
            })
            .await?;
            state.flows.clear(user_id);
            bot.send_message(
                chat,
                format!(
                    "Survey will be delivered on {} (UTC). Configure '{}':",
                    db::format_ts(at),
                    survey_name
                ),
            )
            .reply_markup(settings_keyboard(survey_id))
            .await?;
        }
        AdminFlow::AwaitRename { survey_id, old_name } => {
            if text.is_empty() {
                bot.send_message(chat, "The name cannot be empty. Enter a new name.").await?;
                return Ok(());
            }
            let new_name = text.clone();
            let renamed = db::db_call(state.cfg.db_path.clone(), move |conn| {
                if db::survey_exists(&conn, &new_name)? {
                    return Ok(None);
                }
                Ok(Some(db::rename_survey(&conn, survey_id, &new_name)?))
            })
            .await?;
            match renamed {
                None => {
                    bot.send_message(
                        chat,
                        format!("A survey named '{}' already exists. Enter another name.", text),
                    )
                    .await?;
                }
                Some(false) => {
                    return abort_to_menu(&bot, &state, user_id, "The survey no longer exists.").await;
                }
                Some(true) => {
                    // keep the results file mapped to the new name
                    let data_dir = state.cfg.data_dir.clone();
                    let old = old_name.clone();
                    let new = text.clone();
                    task::spawn_blocking(move || export::rename_results(&data_dir, &old, &new))
                        .await
                        .map_err(|e| anyhow::anyhow!("export rename task join failed: {}", e))??;
                    info!("survey {} renamed from '{}' to '{}'", survey_id, old_name, text);
                    state.flows.clear(user_id);
                    bot.send_message(chat, format!("Survey renamed to '{}'.", text)).await?;
                    show_menu(&bot, chat, None).await?;
                }
            }
        }
        AdminFlow::AwaitQuestionRetext { question_id } => {
            if text.is_empty() {
                bot.send_message(chat, "Enter the new question text.").await?;
                return Ok(());
            }
            let new_text = text.clone();
            let updated = db::db_call(state.cfg.db_path.clone(), move |conn| {
                db::update_question_text(&conn, question_id, &new_text)
            })
            .await?;
            state.flows.clear(user_id);
            if updated {
                bot.send_message(chat, "Question text updated.").await?;
            } else {
                bot.send_message(chat, "Question not found.").await?;
            }
            show_menu(&bot, chat, None).await?;
        }
        AdminFlow::AwaitQuestionReoptions { question_id } => {
            let options = parse_list(&text);
            if options.len() < MIN_OPTIONS {
                bot.send_message(
                    chat,
                    format!("Enter at least {} options, separated by commas.", MIN_OPTIONS),
                )
                .await?;
                return Ok(());
            }
            let updated = db::db_call(state.cfg.db_path.clone(), move |conn| {
                db::update_question_options(&conn, question_id, &options)
            })
            .await?;
            state.flows.clear(user_id);
            if updated {
                bot.send_message(chat, "Answer options updated.").await?;
            } else {
                bot.send_message(chat, "Question not found.").await?;
            }
            show_menu(&bot, chat, None).await?;
        }
        AdminFlow::AwaitWelcome => {
            let template = text.clone();
            db::db_call(state.cfg.db_path.clone(), move |conn| {
                db::set_setting(&conn, "welcome_message", &template)
            })
            .await?;
            state.flows.clear(user_id);
            bot.send_message(chat, "Welcome message updated.").await?;
            show_menu(&bot, chat, None).await?;
        }
        AdminFlow::AwaitFilter => {
            let keyword = text.clone();
            let matches = db::db_call(state.cfg.db_path.clone(), move |conn| {
                db::filter_surveys(&conn, &keyword)
            })
            .await?;
            state.flows.clear(user_id);
            if matches.is_empty() {
                bot.send_message(chat, "No surveys match.").await?;
            } else {
                bot.send_message(chat, format!("Matching surveys:\n{}", matches.join("\n")))
                    .await?;
            }
            show_menu(&bot, chat, None).await?;
        }
    }
    Ok(())
}

pub async fn handle_admin_callback(
    bot: Bot,
    state: AppState,
    q: CallbackQuery,
    action: CallbackAction,
) -> Result<()> {
    let user_id = q.from.id.0 as i64;
    if !state.cfg.is_admin(user_id) {
        bot.answer_callback_query(q.id.clone()).text("You do not have access.").await?;
        return Ok(());
    }
    bot.answer_callback_query(q.id.clone()).await?;
    let chat = ChatId(user_id);
    let message = q.message.clone();

    match action {
        CallbackAction::Menu => {
            state.flows.clear(user_id);
            show_menu(&bot, chat, message).await?;
        }
        CallbackAction::CreateSurvey => {
            state.flows.set(user_id, Flow::Admin(AdminFlow::AwaitName));
            send_or_edit(&bot, chat, message, "Enter a name for the new survey.".to_string(), None)
                .await?;
        }
        CallbackAction::ListSurveys => {
            let surveys =
                db::db_call(state.cfg.db_path.clone(), |conn| db::list_surveys(&conn)).await?;
            let text = if surveys.is_empty() {
                "No surveys found.".to_string()
            } else {
                format!(
                    "Surveys:\n{}",
                    surveys.iter().map(|(_, n)| n.as_str()).collect::<Vec<_>>().join("\n")
                )
            };
            send_or_edit(
                &bot,
                chat,
                message,
                text,
                Some(InlineKeyboardMarkup::new(vec![back_row()])),
            )
            .await?;
        }
        CallbackAction::EditMenu => {
            pick_survey(&bot, &state, chat, message, "Pick a survey to edit:", |id| {
                CallbackAction::EditSurvey { survey_id: id }
            })
            .await?;
        }
        CallbackAction::DeleteMenu => {
            pick_survey(&bot, &state, chat, message, "Pick a survey to delete:", |id| {
                CallbackAction::DeleteSurvey { survey_id: id }
            })
            .await?;
        }
        CallbackAction::ResultsMenu => {
            pick_survey(&bot, &state, chat, message, "Pick a survey to get results for:", |id| {
                CallbackAction::SendResults { survey_id: id }
            })
            .await?;
        }
        CallbackAction::BroadcastMenu => {
            pick_survey(&bot, &state, chat, message, "Pick a survey to broadcast:", |id| {
                CallbackAction::Broadcast { survey_id: id }
            })
            .await?;
        }
        CallbackAction::EditSurvey { survey_id } => {
            let survey = db::db_call(state.cfg.db_path.clone(), move |conn| {
                db::get_survey(&conn, survey_id)
            })
            .await?;
            match survey {
                None => not_found(&bot, chat, message).await?,
                Some(survey) => {
                    send_or_edit(
                        &bot,
                        chat,
                        message,
                        format!("Editing '{}'. What should change?", survey.name),
                        Some(edit_action_keyboard(survey_id)),
                    )
                    .await?;
                }
            }
        }
        CallbackAction::RenameSurvey { survey_id } => {
            let survey = db::db_call(state.cfg.db_path.clone(), move |conn| {
                db::get_survey(&conn, survey_id)
            })
            .await?;
            match survey {
                None => not_found(&bot, chat, message).await?,
                Some(survey) => {
                    state.flows.set(
                        user_id,
                        Flow::Admin(AdminFlow::AwaitRename { survey_id, old_name: survey.name }),
                    );
                    send_or_edit(&bot, chat, message, "Enter the new survey name.".to_string(), None)
                        .await?;
                }
            }
        }
        CallbackAction::EditQuestions { survey_id } => {
            let questions = db::db_call(state.cfg.db_path.clone(), move |conn| {
                db::questions_for_survey(&conn, survey_id)
            })
            .await?;
            let mut rows: Vec<Vec<teloxide::types::InlineKeyboardButton>> = questions
                .iter()
                .map(|question| {
                    vec![button(
                        shorten_label(&question.text, 50),
                        CallbackAction::EditQuestion { question_id: question.id },
                    )]
                })
                .collect();
            rows.push(vec![button("➕ Add question", CallbackAction::AddQuestion { survey_id })]);
            rows.push(back_row());
            let text = if questions.is_empty() {
                "This survey has no questions yet.".to_string()
            } else {
                "Pick a question to edit:".to_string()
            };
            send_or_edit(&bot, chat, message, text, Some(InlineKeyboardMarkup::new(rows))).await?;
        }
        CallbackAction::AddQuestion { survey_id } => {
            send_or_edit(
                &bot,
                chat,
                message,
                "Add a question:".to_string(),
                Some(kind_keyboard(survey_id)),
            )
            .await?;
        }
        CallbackAction::EditQuestion { question_id } => {
            let question = db::db_call(state.cfg.db_path.clone(), move |conn| {
                db::get_question(&conn, question_id)
            })
            .await?;
            match question {
                None => not_found(&bot, chat, message).await?,
                Some(question) => {
                    send_or_edit(
                        &bot,
                        chat,
                        message,
                        format!("Question: {}\nWhat should change?", question.text),
                        Some(question_action_keyboard(question_id)),
                    )
                    .await?;
                }
            }
        }
        CallbackAction::RetextQuestion { question_id } => {
            state.flows.set(user_id, Flow::Admin(AdminFlow::AwaitQuestionRetext { question_id }));
            send_or_edit(&bot, chat, message, "Enter the new question text.".to_string(), None)
                .await?;
        }
        CallbackAction::ReoptionsQuestion { question_id } => {
            let question = db::db_call(state.cfg.db_path.clone(), move |conn| {
                db::get_question(&conn, question_id)
            })
            .await?;
            match question {
                None => not_found(&bot, chat, message).await?,
                Some(question) if !question.kind.has_options() => {
                    send_or_edit(
                        &bot,
                        chat,
                        message,
                        "This is a free-text question, it has no options.".to_string(),
                        Some(question_action_keyboard(question_id)),
                    )
                    .await?;
                }
                Some(_) => {
                    state
                        .flows
                        .set(user_id, Flow::Admin(AdminFlow::AwaitQuestionReoptions { question_id }));
                    send_or_edit(
                        &bot,
                        chat,
                        message,
                        "Enter the new options, separated by commas.".to_string(),
                        None,
                    )
                    .await?;
                }
            }
        }
        CallbackAction::DeleteQuestion { question_id } => {
            let deleted = db::db_call(state.cfg.db_path.clone(), move |conn| {
                db::delete_question(&conn, question_id)
            })
            .await?;
            let text = if deleted { "Question deleted." } else { "Question not found." };
            send_or_edit(
                &bot,
                chat,
                message,
                text.to_string(),
                Some(InlineKeyboardMarkup::new(vec![back_row()])),
            )
            .await?;
        }
        CallbackAction::DeleteSurvey { survey_id } => {
            let deleted = db::db_call(state.cfg.db_path.clone(), move |conn| {
                let name = db::get_survey(&conn, survey_id)?.map(|s| s.name);
                if name.is_some() {
                    db::delete_survey(&conn, survey_id)?;
                }
                Ok(name)
            })
            .await?;
            let text = match deleted {
                Some(name) => {
                    info!("survey '{}' (id {}) deleted", name, survey_id);
                    format!("Survey '{}' deleted.", name)
                }
                None => "Survey not found.".to_string(),
            };
            send_or_edit(
                &bot,
                chat,
                message,
                text,
                Some(InlineKeyboardMarkup::new(vec![back_row()])),
            )
            .await?;
        }
        CallbackAction::SendResults { survey_id } => {
            let survey = db::db_call(state.cfg.db_path.clone(), move |conn| {
                db::get_survey(&conn, survey_id)
            })
            .await?;
            match survey {
                None => not_found(&bot, chat, message).await?,
                Some(survey) => {
                    let path = export::results_path(&state.cfg.data_dir, &survey.name);
                    if path.exists() {
                        bot.send_document(chat, InputFile::file(path))
                            .caption(format!("Results of '{}'", survey.name))
                            .await?;
                    } else {
                        send_or_edit(
                            &bot,
                            chat,
                            message,
                            format!("No results yet for '{}'.", survey.name),
                            Some(InlineKeyboardMarkup::new(vec![back_row()])),
                        )
                        .await?;
                    }
                }
            }
        }
        CallbackAction::Broadcast { survey_id } => {
            let test_mode =
                db::db_call(state.cfg.db_path.clone(), |conn| db::test_mode(&conn)).await?;
            let text = if test_mode {
                if broadcast::preview_survey(&bot, &state, survey_id, user_id).await? {
                    "Preview sent (test mode is ON).".to_string()
                } else {
                    "Survey not found.".to_string()
                }
            } else {
                match broadcast::broadcast_survey(&bot, &state, survey_id).await? {
                    None => "Survey not found.".to_string(),
                    Some(outcome) if outcome.sent + outcome.failed == 0 => {
                        "The bot is not in any group yet.".to_string()
                    }
                    Some(outcome) => format!(
                        "Survey '{}' sent to {} group(s), {} failed.",
                        outcome.survey_name, outcome.sent, outcome.failed
                    ),
                }
            };
            bot.send_message(chat, text).await?;
        }
        CallbackAction::ScheduledList => {
            let scheduled =
                db::db_call(state.cfg.db_path.clone(), |conn| db::scheduled_surveys(&conn)).await?;
            let text = if scheduled.is_empty() {
                "No scheduled surveys.".to_string()
            } else {
                let lines: Vec<String> = scheduled
                    .iter()
                    .map(|(_, name, at)| format!("{} at {}", name, db::format_ts(*at)))
                    .collect();
                format!("Scheduled surveys:\n{}", lines.join("\n"))
            };
            send_or_edit(
                &bot,
                chat,
                message,
                text,
                Some(InlineKeyboardMarkup::new(vec![back_row()])),
            )
            .await?;
        }
        CallbackAction::JoinConfigMenu => {
            let groups = db::db_call(state.cfg.db_path.clone(), |conn| db::all_groups(&conn)).await?;
            if groups.is_empty() {
                send_or_edit(
                    &bot,
                    chat,
                    message,
                    "The bot does not know any groups yet.".to_string(),
                    Some(InlineKeyboardMarkup::new(vec![back_row()])),
                )
                .await?;
            } else {
                let mut rows: Vec<Vec<teloxide::types::InlineKeyboardButton>> = groups
                    .iter()
                    .map(|(id, title)| {
                        let label = if title.is_empty() { id.to_string() } else { title.clone() };
                        vec![button(
                            shorten_label(&label, 50),
                            CallbackAction::JoinPickGroup { group_id: *id },
                        )]
                    })
                    .collect();
                rows.push(back_row());
                send_or_edit(
                    &bot,
                    chat,
                    message,
                    "Pick a group to configure its join survey:".to_string(),
                    Some(InlineKeyboardMarkup::new(rows)),
                )
                .await?;
            }
        }
        CallbackAction::JoinPickGroup { group_id } => {
            let surveys =
                db::db_call(state.cfg.db_path.clone(), |conn| db::list_surveys(&conn)).await?;
            if surveys.is_empty() {
                send_or_edit(
                    &bot,
                    chat,
                    message,
                    "No surveys found.".to_string(),
                    Some(InlineKeyboardMarkup::new(vec![back_row()])),
                )
                .await?;
            } else {
                let kb = survey_list_keyboard(&surveys, |survey_id| CallbackAction::JoinAssign {
                    group_id,
                    survey_id,
                });
                send_or_edit(
                    &bot,
                    chat,
                    message,
                    "Pick the survey new members will be offered:".to_string(),
                    Some(kb),
                )
                .await?;
            }
        }
        CallbackAction::JoinAssign { group_id, survey_id } => {
            let assigned = db::db_call(state.cfg.db_path.clone(), move |conn| {
                let Some(survey) = db::get_survey(&conn, survey_id)? else {
                    return Ok(None);
                };
                db::set_join_survey(&conn, group_id, survey_id)?;
                Ok(Some((survey.name, db::group_title(&conn, group_id)?.unwrap_or_default())))
            })
            .await?;
            let text = match assigned {
                None => "Survey not found.".to_string(),
                Some((survey_name, group_title)) => {
                    info!("join survey for group {} set to {}", group_id, survey_id);
                    format!(
                        "New members of '{}' will now be offered '{}'.",
                        if group_title.is_empty() { group_id.to_string() } else { group_title },
                        survey_name
                    )
                }
            };
            send_or_edit(
                &bot,
                chat,
                message,
                text,
                Some(InlineKeyboardMarkup::new(vec![back_row()])),
            )
            .await?;
        }
        CallbackAction::PickKind { survey_id, kind } => {
            let survey = db::db_call(state.cfg.db_path.clone(), move |conn| {
                db::get_survey(&conn, survey_id)
            })
            .await?;
            match survey {
                None => not_found(&bot, chat, message).await?,
                Some(survey) => {
                    state.flows.set(
                        user_id,
                        Flow::Admin(AdminFlow::AwaitQuestionText {
                            survey_id,
                            survey_name: survey.name,
                            kind,
                        }),
                    );
                    send_or_edit(
                        &bot,
                        chat,
                        message,
                        format!("{}: enter the question text.", kind.label()),
                        None,
                    )
                    .await?;
                }
            }
        }
        CallbackAction::FinishQuestions { survey_id } => {
            let survey = db::db_call(state.cfg.db_path.clone(), move |conn| {
                db::get_survey(&conn, survey_id)
            })
            .await?;
            match survey {
                None => not_found(&bot, chat, message).await?,
                Some(survey) => {
                    send_or_edit(
                        &bot,
                        chat,
                        message,
                        format!("Configure '{}' before finishing:", survey.name),
                        Some(settings_keyboard(survey_id)),
                    )
                    .await?;
                }
            }
        }
        CallbackAction::SetTimeLimit { survey_id } => {
            with_survey_prompt(
                &bot,
                &state,
                user_id,
                chat,
                message,
                survey_id,
                "Enter the number of hours the survey stays open.",
                |name| AdminFlow::AwaitTimeLimitHours { survey_id, survey_name: name },
            )
            .await?;
        }
        CallbackAction::ToggleAnonymous { survey_id } => {
            let toggled = db::db_call(state.cfg.db_path.clone(), move |conn| {
                let Some(survey) = db::get_survey(&conn, survey_id)? else {
                    return Ok(None);
                };
                db::set_survey_anonymous(&conn, survey_id, !survey.anonymous)?;
                Ok(Some((survey.name, !survey.anonymous)))
            })
            .await?;
            match toggled {
                None => not_found(&bot, chat, message).await?,
                Some((name, anonymous)) => {
                    let status = if anonymous { "anonymous" } else { "not anonymous" };
                    send_or_edit(
                        &bot,
                        chat,
                        message,
                        format!("Survey '{}' is now {}. Configure it:", name, status),
                        Some(settings_keyboard(survey_id)),
                    )
                    .await?;
                }
            }
        }
        CallbackAction::AddTags { survey_id } => {
            with_survey_prompt(
                &bot,
                &state,
                user_id,
                chat,
                message,
                survey_id,
                "Enter tags, separated by commas.",
                |name| AdminFlow::AwaitTags { survey_id, survey_name: name },
            )
            .await?;
        }
        CallbackAction::Schedule { survey_id } => {
            with_survey_prompt(
                &bot,
                &state,
                user_id,
                chat,
                message,
                survey_id,
                "Enter the delivery date and time as DD.MM.YYYY HH:MM (UTC).",
                |name| AdminFlow::AwaitSchedule { survey_id, survey_name: name },
            )
            .await?;
        }
        CallbackAction::FinishCreation { survey_id } => {
            let survey = db::db_call(state.cfg.db_path.clone(), move |conn| {
                db::get_survey(&conn, survey_id)
            })
            .await?;
            match survey {
                None => not_found(&bot, chat, message).await?,
                Some(survey) => {
                    state.flows.clear(user_id);
                    let kb = InlineKeyboardMarkup::new(vec![
                        vec![button("📤 Broadcast now", CallbackAction::Broadcast { survey_id })],
                        back_row(),
                    ]);
                    send_or_edit(
                        &bot,
                        chat,
                        message,
                        format!("Survey '{}' is ready.", survey.name),
                        Some(kb),
                    )
                    .await?;
                }
            }
        }
        CallbackAction::SetWelcome => {
            state.flows.set(user_id, Flow::Admin(AdminFlow::AwaitWelcome));
            send_or_edit(
                &bot,
                chat,
                message,
                "Enter the welcome message ({username} will be substituted).".to_string(),
                None,
            )
            .await?;
        }
        CallbackAction::ToggleTestMode => {
            let enabled = db::db_call(state.cfg.db_path.clone(), |conn| {
                let current = db::test_mode(&conn)?;
                db::set_test_mode(&conn, !current)?;
                Ok(!current)
            })
            .await?;
            let text = if enabled {
                "Test mode is now ON: broadcasts become admin-only previews."
            } else {
                "Test mode is now OFF."
            };
            send_or_edit(
                &bot,
                chat,
                message,
                text.to_string(),
                Some(InlineKeyboardMarkup::new(vec![back_row()])),
            )
            .await?;
        }
        CallbackAction::Analytics => {
            let cutoff = db::now_ts() - 30 * 86400;
            let active = db::db_call(state.cfg.db_path.clone(), move |conn| {
                db::active_users_since(&conn, cutoff)
            })
            .await?;
            send_or_edit(
                &bot,
                chat,
                message,
                format!("Active users in the last 30 days: {}", active),
                Some(InlineKeyboardMarkup::new(vec![back_row()])),
            )
            .await?;
        }
        CallbackAction::FilterSurveys => {
            state.flows.set(user_id, Flow::Admin(AdminFlow::AwaitFilter));
            send_or_edit(
                &bot,
                chat,
                message,
                "Enter a keyword or tag to search for.".to_string(),
                None,
            )
            .await?;
        }
        // take-flow and captcha actions are routed to their own features
        _ => {}
    }
    Ok(())
}

async fn not_found(
    bot: &Bot,
    chat: ChatId,
    message: Option<MaybeInaccessibleMessage>,
) -> Result<()> {
    send_or_edit(
        bot,
        chat,
        message,
        "Survey not found.".to_string(),
        Some(InlineKeyboardMarkup::new(vec![back_row()])),
    )
    .await
}

async fn pick_survey<F>(
    bot: &Bot,
    state: &AppState,
    chat: ChatId,
    message: Option<MaybeInaccessibleMessage>,
    prompt: &str,
    make: F,
) -> Result<()>
where
    F: Fn(i64) -> CallbackAction,
{
    let surveys = db::db_call(state.cfg.db_path.clone(), |conn| db::list_surveys(&conn)).await?;
    if surveys.is_empty() {
        send_or_edit(
            bot,
            chat,
            message,
            "No surveys found.".to_string(),
            Some(InlineKeyboardMarkup::new(vec![back_row()])),
        )
        .await
    } else {
        send_or_edit(
            bot,
            chat,
            message,
            prompt.to_string(),
            Some(survey_list_keyboard(&surveys, make)),
        )
        .await
    }
}

async fn with_survey_prompt<F>(
    bot: &Bot,
    state: &AppState,
    user_id: i64,
    chat: ChatId,
    message: Option<MaybeInaccessibleMessage>,
    survey_id: i64,
    prompt: &str,
    make_flow: F,
) -> Result<()>
where
    F: FnOnce(String) -> AdminFlow,
{
    let survey =
        db::db_call(state.cfg.db_path.clone(), move |conn| db::get_survey(&conn, survey_id)).await?;
    match survey {
        None => not_found(bot, chat, message).await,
        Some(survey) => {
            state.flows.set(user_id, Flow::Admin(make_flow(survey.name)));
            send_or_edit(bot, chat, message, prompt.to_string(), None).await
        }
    }
}

fn is_admin_command(m: &Message) -> bool {
    m.text()
        .map(|t| t == "/admin" || t.starts_with("/admin "))
        .unwrap_or(false)
}

fn in_admin_flow(state: &AppState, m: &Message) -> bool {
    m.from
        .as_ref()
        .map(|u| matches!(state.flows.get(u.id.0 as i64), Some(Flow::Admin(_))))
        .unwrap_or(false)
}

pub struct AdminFeature;

impl Feature for AdminFeature {
    fn name(&self) -> &'static str {
        "admin"
    }

    fn commands(&self) -> Vec<BotCommand> {
        vec![BotCommand::new("admin", "Open the admin menu")]
    }

    fn schema(&self) -> crate::plugin::Schema {
        dptree::entry()
            .branch(
                Update::filter_message()
                    .branch(
                        dptree::filter(|m: Message| m.chat.is_private() && is_admin_command(&m))
                            .endpoint(|bot: Bot, state: AppState, msg: Message| async move {
                                if let Err(e) = handle_admin_command(bot, state, msg).await {
                                    error!("admin command handler error: {:?}", e);
                                }
                                Ok::<(), anyhow::Error>(())
                            }),
                    )
                    .branch(
                        dptree::filter(|state: AppState, m: Message| {
                            m.chat.is_private() && in_admin_flow(&state, &m)
                        })
                        .endpoint(|bot: Bot, state: AppState, msg: Message| async move {
                            if let Err(e) = handle_admin_text(bot, state, msg).await {
                                error!("admin text handler error: {:?}", e);
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
                        dptree::filter(|a: CallbackAction| a.is_admin_action()).endpoint(
                            |bot: Bot, state: AppState, q: CallbackQuery, a: CallbackAction| async move {
                                if let Err(e) = handle_admin_callback(bot, state, q, a).await {
                                    error!("admin callback handler error: {:?}", e);
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
                InlineKeyboardButtonKind::CallbackData(d) => Some(d.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn menu_covers_core_actions() {
        let data = callbacks(&menu_keyboard());
        for expected in [
            "v1:adm:create",
            "v1:adm:edit",
            "v1:adm:list",
            "v1:adm:delete",
            "v1:adm:cast",
            "v1:adm:results",
            "v1:adm:sched",
            "v1:adm:filter",
            "v1:adm:join",
            "v1:adm:welcome",
            "v1:adm:test",
            "v1:adm:stats",
        ] {
            assert!(data.iter().any(|d| d == expected), "missing menu action: {}", expected);
        }
    }

    #[test]
    fn kind_keyboard_offers_all_kinds_and_finish() {
        let data = callbacks(&kind_keyboard(5));
        assert!(data.contains(&"v1:wiz:kind:5:single".to_string()));
        assert!(data.contains(&"v1:wiz:kind:5:multi".to_string()));
        assert!(data.contains(&"v1:wiz:kind:5:text".to_string()));
        assert!(data.contains(&"v1:wiz:fin:5".to_string()));
    }

    #[test]
    fn settings_keyboard_ends_with_finish() {
        let data = callbacks(&settings_keyboard(3));
        assert_eq!(data.last().unwrap(), "v1:wiz:done:3");
        assert!(data.contains(&"v1:wiz:sched:3".to_string()));
        assert!(data.contains(&"v1:wiz:anon:3".to_string()));
    }

    #[test]
    fn survey_list_keyboard_has_back_button() {
        let surveys = vec![(1, "A".to_string()), (2, "B".to_string())];
        let kb = survey_list_keyboard(&surveys, |id| CallbackAction::DeleteSurvey { survey_id: id });
        let data = callbacks(&kb);
        assert_eq!(data, vec!["v1:sur:del:1", "v1:sur:del:2", "v1:adm:menu"]);
    }

    #[test]
    fn shorten_label_caps_length() {
        assert_eq!(shorten_label("short", 10), "short");
        let long = "a".repeat(60);
        let shortened = shorten_label(&long, 50);
        assert_eq!(shortened.chars().count(), 50);
        assert!(shortened.ends_with("..."));
    }

    #[test]
    fn parse_list_trims_and_drops_empties() {
        assert_eq!(parse_list(" a ,, b,c , "), vec!["a", "b", "c"]);
        assert!(parse_list(" , ,").is_empty());
    }

    #[test]
    fn admin_command_match_is_exact() {
        for (text, expected) in [
            ("/admin", true),
            ("/admin extra", true),
            ("/administrate", false),
            ("admin", false),
        ] {
            let matches = text == "/admin" || text.starts_with("/admin ");
            assert_eq!(matches, expected, "{}", text);
        }
    }
}
