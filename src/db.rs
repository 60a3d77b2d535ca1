use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use time::OffsetDateTime;
use tokio::task;

use crate::config::{Config, ONBOARDING_SURVEY};

pub fn now_ts() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

/// Operator-facing timestamp format, also used in export rows.
const STAMP_FORMAT: &[time::format_description::FormatItem<'static>] =
    time::macros::format_description!("[day].[month].[year] [hour]:[minute]");

pub fn format_ts(ts: i64) -> String {
    OffsetDateTime::from_unix_timestamp(ts)
        .ok()
        .and_then(|t| t.format(&STAMP_FORMAT).ok())
        .unwrap_or_else(|| ts.to_string())
}

/// Parse the fixed `DD.MM.YYYY HH:MM` operator format as UTC. Returns None on
/// any deviation; callers re-prompt instead of guessing.
pub fn parse_stamp(input: &str) -> Option<i64> {
    time::PrimitiveDateTime::parse(input.trim(), &STAMP_FORMAT)
        .ok()
        .map(|t| t.assume_utc().unix_timestamp())
}

// Run sqlite work off the async executor (rusqlite is not Send/Sync)
pub async fn db_call<T, F>(db_path: String, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(Connection) -> Result<T> + Send + 'static,
{
    task::spawn_blocking(move || {
        let conn = Connection::open(db_path)?;
        f(conn)
    })
    .await
    .context("sqlite task join failed")?
}

pub fn create_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS surveys (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT NOT NULL UNIQUE,
  anonymous INTEGER NOT NULL DEFAULT 0,
  time_limit INTEGER,
  scheduled_at INTEGER,
  created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS questions (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  survey_id INTEGER NOT NULL,
  text TEXT NOT NULL,
  kind TEXT NOT NULL,
  options TEXT NOT NULL DEFAULT '[]'
);

CREATE TABLE IF NOT EXISTS survey_tags (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  survey_id INTEGER NOT NULL,
  tag TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS groups (
  chat_id INTEGER PRIMARY KEY,
  title TEXT
);

CREATE TABLE IF NOT EXISTS group_settings (
  chat_id INTEGER PRIMARY KEY,
  join_survey_id INTEGER
);

CREATE TABLE IF NOT EXISTS pending_captcha (
  user_id INTEGER NOT NULL,
  chat_id INTEGER NOT NULL,
  PRIMARY KEY (user_id, chat_id)
);

CREATE TABLE IF NOT EXISTS users (
  user_id INTEGER PRIMARY KEY,
  username TEXT,
  last_seen INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS settings (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL
);
"#,
    )?;
    Ok(())
}

/// Seed runtime-editable settings and the onboarding survey. Idempotent.
pub fn seed_defaults(conn: &Connection, welcome: &str, test_mode: bool) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO settings(key, value) VALUES('welcome_message', ?1)",
        params![welcome],
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO settings(key, value) VALUES('test_mode', ?1)",
        params![if test_mode { "1" } else { "0" }],
    )?;

    if !survey_exists(conn, ONBOARDING_SURVEY)? {
        let survey_id = add_survey(conn, ONBOARDING_SURVEY)?;
        for text in [
            "Who are you? (self-employed, business owner, employee)",
            "Where are you from? (region of activity)",
            "What do you hope to get from this community?",
            "What could you offer to other members?",
            "Anything else you would like to share?",
        ] {
            add_question(conn, survey_id, text, QuestionKind::Text, &[])?;
        }
    }
    Ok(())
}

pub async fn init(cfg: &Config) -> Result<()> {
    let welcome = cfg.welcome_template.clone();
    let test_mode = cfg.test_mode;
    db_call(cfg.db_path.clone(), move |conn| {
        create_schema(&conn)?;
        seed_defaults(&conn, &welcome, test_mode)?;
        Ok(())
    })
    .await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionKind {
    Single,
    Multi,
    Text,
}

impl QuestionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            QuestionKind::Single => "single",
            QuestionKind::Multi => "multi",
            QuestionKind::Text => "text",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "single" => Some(QuestionKind::Single),
            "multi" => Some(QuestionKind::Multi),
            "text" => Some(QuestionKind::Text),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            QuestionKind::Single => "Single choice",
            QuestionKind::Multi => "Multiple choice",
            QuestionKind::Text => "Free text",
        }
    }

    pub fn has_options(self) -> bool {
        !matches!(self, QuestionKind::Text)
    }
}

#[derive(Debug, Clone)]
pub struct Survey {
    pub id: i64,
    pub name: String,
    pub anonymous: bool,
    pub time_limit: Option<i64>,
    pub scheduled_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Question {
    pub id: i64,
    pub text: String,
    pub kind: QuestionKind,
    pub options: Vec<String>,
}

// --- Surveys ---

pub fn add_survey(conn: &Connection, name: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO surveys(name, created_at) VALUES(?1, ?2)",
        params![name, now_ts()],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn survey_exists(conn: &Connection, name: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row("SELECT id FROM surveys WHERE name=?1", params![name], |r| r.get(0))
        .optional()?;
    Ok(found.is_some())
}

pub fn get_survey(conn: &Connection, survey_id: i64) -> Result<Option<Survey>> {
    conn.query_row(
        "SELECT id, name, anonymous, time_limit, scheduled_at FROM surveys WHERE id=?1",
        params![survey_id],
        |r| {
            Ok(Survey {
                id: r.get(0)?,
                name: r.get(1)?,
                anonymous: r.get::<_, i64>(2)? == 1,
                time_limit: r.get(3)?,
                scheduled_at: r.get(4)?,
            })
        },
    )
    .optional()
}

pub fn get_survey_id_by_name(conn: &Connection, name: &str) -> Result<Option<i64>> {
    conn.query_row("SELECT id FROM surveys WHERE name=?1", params![name], |r| r.get(0))
        .optional()
}

pub fn list_surveys(conn: &Connection) -> Result<Vec<(i64, String)>> {
    let mut stmt = conn.prepare("SELECT id, name FROM surveys ORDER BY id")?;
    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(r) = rows.next()? {
        out.push((r.get(0)?, r.get(1)?));
    }
    Ok(out)
}

pub fn rename_survey(conn: &Connection, survey_id: i64, new_name: &str) -> Result<bool> {
    let n = conn.execute(
        "UPDATE surveys SET name=?2 WHERE id=?1",
        params![survey_id, new_name],
    )?;
    Ok(n > 0)
}

pub fn set_survey_anonymous(conn: &Connection, survey_id: i64, anonymous: bool) -> Result<()> {
    conn.execute(
        "UPDATE surveys SET anonymous=?2 WHERE id=?1",
        params![survey_id, if anonymous { 1 } else { 0 }],
    )?;
    Ok(())
}

pub fn set_survey_time_limit(conn: &Connection, survey_id: i64, limit: Option<i64>) -> Result<()> {
    conn.execute(
        "UPDATE surveys SET time_limit=?2 WHERE id=?1",
        params![survey_id, limit],
    )?;
    Ok(())
}

pub fn set_survey_schedule(conn: &Connection, survey_id: i64, at: Option<i64>) -> Result<()> {
    conn.execute(
        "UPDATE surveys SET scheduled_at=?2 WHERE id=?1",
        params![survey_id, at],
    )?;
    Ok(())
}

/// Delete a survey together with its questions and tags.
pub fn delete_survey(conn: &Connection, survey_id: i64) -> Result<bool> {
    let n = conn.execute("DELETE FROM surveys WHERE id=?1", params![survey_id])?;
    conn.execute("DELETE FROM questions WHERE survey_id=?1", params![survey_id])?;
    conn.execute("DELETE FROM survey_tags WHERE survey_id=?1", params![survey_id])?;
    Ok(n > 0)
}

pub fn add_tag(conn: &Connection, survey_id: i64, tag: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO survey_tags(survey_id, tag) VALUES(?1, ?2)",
        params![survey_id, tag],
    )?;
    Ok(())
}

pub fn filter_surveys(conn: &Connection, keyword: &str) -> Result<Vec<String>> {
    let pattern = format!("%{}%", keyword);
    let mut stmt = conn.prepare(
        r#"
SELECT DISTINCT s.name FROM surveys s
LEFT JOIN survey_tags t ON s.id = t.survey_id
WHERE s.name LIKE ?1 OR t.tag LIKE ?1
ORDER BY s.name
"#,
    )?;
    let mut rows = stmt.query(params![pattern])?;
    let mut out = Vec::new();
    while let Some(r) = rows.next()? {
        out.push(r.get(0)?);
    }
    Ok(out)
}

pub fn scheduled_surveys(conn: &Connection) -> Result<Vec<(i64, String, i64)>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, scheduled_at FROM surveys WHERE scheduled_at IS NOT NULL ORDER BY scheduled_at",
    )?;
    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(r) = rows.next()? {
        out.push((r.get(0)?, r.get(1)?, r.get(2)?));
    }
    Ok(out)
}

/// Collect surveys whose scheduled time has passed and clear the schedule so
/// each delivery fires exactly once.
pub fn take_due_surveys(conn: &Connection, now: i64) -> Result<Vec<i64>> {
    let mut stmt =
        conn.prepare("SELECT id FROM surveys WHERE scheduled_at IS NOT NULL AND scheduled_at <= ?1")?;
    let mut rows = stmt.query(params![now])?;
    let mut due = Vec::new();
    while let Some(r) = rows.next()? {
        due.push(r.get(0)?);
    }
    for id in &due {
        conn.execute("UPDATE surveys SET scheduled_at=NULL WHERE id=?1", params![id])?;
    }
    Ok(due)
}

// --- Questions ---

pub fn add_question(
    conn: &Connection,
    survey_id: i64,
    text: &str,
    kind: QuestionKind,
    options: &[String],
) -> Result<i64> {
    let options_json = serde_json::to_string(options)?;
    conn.execute(
        "INSERT INTO questions(survey_id, text, kind, options) VALUES(?1, ?2, ?3, ?4)",
        params![survey_id, text, kind.as_str(), options_json],
    )?;
    Ok(conn.last_insert_rowid())
}

fn question_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<(i64, String, String, String)> {
    Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
}

fn decode_question(id: i64, text: String, kind: String, options: String) -> Result<Question> {
    let kind = QuestionKind::parse(&kind)
        .ok_or_else(|| anyhow::anyhow!("unknown question kind '{}' for question {}", kind, id))?;
    let options: Vec<String> = serde_json::from_str(&options)
        .with_context(|| format!("bad options payload for question {}", id))?;
    Ok(Question { id, text, kind, options })
}

/// Questions in presentation order (insertion order, id ascending).
pub fn questions_for_survey(conn: &Connection, survey_id: i64) -> Result<Vec<Question>> {
    let mut stmt = conn
        .prepare("SELECT id, text, kind, options FROM questions WHERE survey_id=?1 ORDER BY id ASC")?;
    let mut rows = stmt.query(params![survey_id])?;
    let mut out = Vec::new();
    while let Some(r) = rows.next()? {
        let (id, text, kind, options) = question_from_row(r)?;
        out.push(decode_question(id, text, kind, options)?);
    }
    Ok(out)
}

pub fn get_question(conn: &Connection, question_id: i64) -> Result<Option<Question>> {
    let row = conn
        .query_row(
            "SELECT id, text, kind, options FROM questions WHERE id=?1",
            params![question_id],
            question_from_row,
        )
        .optional()?;
    match row {
        Some((id, text, kind, options)) => Ok(Some(decode_question(id, text, kind, options)?)),
        None => Ok(None),
    }
}

pub fn update_question_text(conn: &Connection, question_id: i64, text: &str) -> Result<bool> {
    let n = conn.execute(
        "UPDATE questions SET text=?2 WHERE id=?1",
        params![question_id, text],
    )?;
    Ok(n > 0)
}

pub fn update_question_options(
    conn: &Connection,
    question_id: i64,
    options: &[String],
) -> Result<bool> {
    let options_json = serde_json::to_string(options)?;
    let n = conn.execute(
        "UPDATE questions SET options=?2 WHERE id=?1",
        params![question_id, options_json],
    )?;
    Ok(n > 0)
}

pub fn delete_question(conn: &Connection, question_id: i64) -> Result<bool> {
    let n = conn.execute("DELETE FROM questions WHERE id=?1", params![question_id])?;
    Ok(n > 0)
}

// --- Groups ---

pub fn upsert_group(conn: &Connection, chat_id: i64, title: &str) -> Result<()> {
    conn.execute(
        r#"
INSERT INTO groups(chat_id, title) VALUES(?1, ?2)
ON CONFLICT(chat_id) DO UPDATE SET title=excluded.title
"#,
        params![chat_id, title],
    )?;
    Ok(())
}

pub fn all_groups(conn: &Connection) -> Result<Vec<(i64, String)>> {
    let mut stmt = conn.prepare("SELECT chat_id, COALESCE(title, '') FROM groups ORDER BY title")?;
    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(r) = rows.next()? {
        out.push((r.get(0)?, r.get(1)?));
    }
    Ok(out)
}

pub fn group_title(conn: &Connection, chat_id: i64) -> Result<Option<String>> {
    conn.query_row(
        "SELECT COALESCE(title, '') FROM groups WHERE chat_id=?1",
        params![chat_id],
        |r| r.get(0),
    )
    .optional()
}

/// Replace-if-exists assignment of the survey sent to new members of a group.
pub fn set_join_survey(conn: &Connection, chat_id: i64, survey_id: i64) -> Result<()> {
    conn.execute(
        r#"
INSERT INTO group_settings(chat_id, join_survey_id) VALUES(?1, ?2)
ON CONFLICT(chat_id) DO UPDATE SET join_survey_id=excluded.join_survey_id
"#,
        params![chat_id, survey_id],
    )?;
    Ok(())
}

pub fn join_survey(conn: &Connection, chat_id: i64) -> Result<Option<i64>> {
    let row: Option<Option<i64>> = conn
        .query_row(
            "SELECT join_survey_id FROM group_settings WHERE chat_id=?1",
            params![chat_id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(row.flatten())
}

// --- Pending captcha ---

pub fn add_pending(conn: &Connection, user_id: i64, chat_id: i64) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO pending_captcha(user_id, chat_id) VALUES(?1, ?2)",
        params![user_id, chat_id],
    )?;
    Ok(())
}

pub fn remove_pending(conn: &Connection, user_id: i64, chat_id: i64) -> Result<bool> {
    let n = conn.execute(
        "DELETE FROM pending_captcha WHERE user_id=?1 AND chat_id=?2",
        params![user_id, chat_id],
    )?;
    Ok(n > 0)
}

pub fn is_pending(conn: &Connection, user_id: i64, chat_id: i64) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM pending_captcha WHERE user_id=?1 AND chat_id=?2",
            params![user_id, chat_id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn pending_chats_for_user(conn: &Connection, user_id: i64) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare("SELECT chat_id FROM pending_captcha WHERE user_id=?1")?;
    let mut rows = stmt.query(params![user_id])?;
    let mut out = Vec::new();
    while let Some(r) = rows.next()? {
        out.push(r.get(0)?);
    }
    Ok(out)
}

// --- Users ---

pub fn touch_user(conn: &Connection, user_id: i64, username: Option<&str>) -> Result<()> {
    conn.execute(
        r#"
INSERT INTO users(user_id, username, last_seen) VALUES(?1, ?2, ?3)
ON CONFLICT(user_id) DO UPDATE SET
  last_seen=excluded.last_seen,
  username=COALESCE(excluded.username, users.username)
"#,
        params![user_id, username, now_ts()],
    )?;
    Ok(())
}

pub fn active_users_since(conn: &Connection, cutoff: i64) -> Result<i64> {
    let n = conn.query_row(
        "SELECT COUNT(*) FROM users WHERE last_seen >= ?1",
        params![cutoff],
        |r| r.get(0),
    )?;
    Ok(n)
}

// --- Settings ---

pub fn get_setting(conn: &Connection, key: &str) -> Result<Option<String>> {
    conn.query_row("SELECT value FROM settings WHERE key=?1", params![key], |r| r.get(0))
        .optional()
}

pub fn set_setting(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "REPLACE INTO settings(key, value) VALUES(?1, ?2)",
        params![key, value],
    )?;
    Ok(())
}

pub fn welcome_message(conn: &Connection) -> Result<String> {
    Ok(get_setting(conn, "welcome_message")?
        .unwrap_or_else(|| crate::config::DEFAULT_WELCOME.to_string()))
}

pub fn test_mode(conn: &Connection) -> Result<bool> {
    Ok(get_setting(conn, "test_mode")?.as_deref() == Some("1"))
}

pub fn set_test_mode(conn: &Connection, enabled: bool) -> Result<()> {
    set_setting(conn, "test_mode", if enabled { "1" } else { "0" })
}

// --- rusqlite optional helper ---
pub trait OptionalRow<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalRow<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        create_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn survey_names_are_unique() {
        let conn = test_conn();
        add_survey(&conn, "Feedback").unwrap();
        assert!(survey_exists(&conn, "Feedback").unwrap());
        assert!(add_survey(&conn, "Feedback").is_err());
        // case-sensitive match: a different casing is a different survey
        assert!(!survey_exists(&conn, "feedback").unwrap());
    }

    #[test]
    fn question_order_is_insertion_order() {
        let conn = test_conn();
        let sid = add_survey(&conn, "Q").unwrap();
        add_question(&conn, sid, "first", QuestionKind::Text, &[]).unwrap();
        add_question(
            &conn,
            sid,
            "second",
            QuestionKind::Single,
            &["Yes".into(), "No".into()],
        )
        .unwrap();
        let qs = questions_for_survey(&conn, sid).unwrap();
        assert_eq!(qs.len(), 2);
        assert_eq!(qs[0].text, "first");
        assert_eq!(qs[1].kind, QuestionKind::Single);
        assert_eq!(qs[1].options, vec!["Yes".to_string(), "No".to_string()]);
    }

    #[test]
    fn options_survive_commas() {
        let conn = test_conn();
        let sid = add_survey(&conn, "Q").unwrap();
        let qid = add_question(
            &conn,
            sid,
            "pick",
            QuestionKind::Multi,
            &["a, with comma".into(), "b".into()],
        )
        .unwrap();
        let q = get_question(&conn, qid).unwrap().unwrap();
        assert_eq!(q.options[0], "a, with comma");
    }

    #[test]
    fn delete_survey_cascades() {
        let conn = test_conn();
        let sid = add_survey(&conn, "Gone").unwrap();
        add_question(&conn, sid, "q", QuestionKind::Text, &[]).unwrap();
        add_tag(&conn, sid, "tag").unwrap();
        assert!(delete_survey(&conn, sid).unwrap());
        assert!(questions_for_survey(&conn, sid).unwrap().is_empty());
        assert!(get_survey(&conn, sid).unwrap().is_none());
        // second delete is a not-found no-op
        assert!(!delete_survey(&conn, sid).unwrap());
    }

    #[test]
    fn join_survey_upsert_replaces() {
        let conn = test_conn();
        let a = add_survey(&conn, "A").unwrap();
        let b = add_survey(&conn, "B").unwrap();
        set_join_survey(&conn, -100, a).unwrap();
        set_join_survey(&conn, -100, b).unwrap();
        assert_eq!(join_survey(&conn, -100).unwrap(), Some(b));
        assert_eq!(join_survey(&conn, -200).unwrap(), None);
    }

    #[test]
    fn pending_roundtrip() {
        let conn = test_conn();
        add_pending(&conn, 7, -1).unwrap();
        add_pending(&conn, 7, -2).unwrap();
        assert!(is_pending(&conn, 7, -1).unwrap());
        assert_eq!(pending_chats_for_user(&conn, 7).unwrap().len(), 2);
        assert!(remove_pending(&conn, 7, -1).unwrap());
        assert!(!remove_pending(&conn, 7, -1).unwrap());
        assert!(!is_pending(&conn, 7, -1).unwrap());
    }

    #[test]
    fn due_surveys_fire_once() {
        let conn = test_conn();
        let sid = add_survey(&conn, "Later").unwrap();
        set_survey_schedule(&conn, sid, Some(100)).unwrap();
        assert_eq!(take_due_surveys(&conn, 50).unwrap(), Vec::<i64>::new());
        assert_eq!(take_due_surveys(&conn, 100).unwrap(), vec![sid]);
        assert_eq!(take_due_surveys(&conn, 200).unwrap(), Vec::<i64>::new());
        assert!(get_survey(&conn, sid).unwrap().unwrap().scheduled_at.is_none());
    }

    #[test]
    fn filter_matches_name_and_tag() {
        let conn = test_conn();
        let a = add_survey(&conn, "Customer feedback").unwrap();
        let _b = add_survey(&conn, "Quarterly").unwrap();
        add_tag(&conn, a, "quality").unwrap();
        assert_eq!(filter_surveys(&conn, "feedback").unwrap(), vec!["Customer feedback"]);
        assert_eq!(filter_surveys(&conn, "quality").unwrap(), vec!["Customer feedback"]);
        assert_eq!(filter_surveys(&conn, "nope").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn stamp_parse_and_format_agree() {
        let ts = parse_stamp("05.03.2026 14:45").unwrap();
        assert_eq!(format_ts(ts), "05.03.2026 14:45");
        assert!(parse_stamp("2026-03-05 14:45").is_none());
        assert!(parse_stamp("tomorrow").is_none());
        assert!(parse_stamp("32.01.2026 10:00").is_none());
    }

    #[test]
    fn seed_defaults_is_idempotent() {
        let conn = test_conn();
        seed_defaults(&conn, "Hi, {username}!", false).unwrap();
        seed_defaults(&conn, "other", true).unwrap();
        assert_eq!(welcome_message(&conn).unwrap(), "Hi, {username}!");
        assert!(!test_mode(&conn).unwrap());
        let sid = get_survey_id_by_name(&conn, ONBOARDING_SURVEY).unwrap().unwrap();
        assert_eq!(questions_for_survey(&conn, sid).unwrap().len(), 5);
    }
}
