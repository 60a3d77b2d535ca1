//! Structured callback-data codec.
//!
//! Every inline button carries one of these actions, encoded as a versioned,
//! colon-delimited string. Parsing is strict: anything that does not match the
//! current scheme is dropped instead of being guessed at, so renamed surveys
//! or stale keyboards can never smuggle a wrong id through positional
//! splitting.

use teloxide::types::InlineKeyboardButton;

use crate::db::QuestionKind;

const VERSION: &str = "v1";

#[derive(Debug, Clone, PartialEq)]
pub enum CallbackAction {
    // survey taking
    Answer { question: usize, option: usize },
    Toggle { question: usize, option: usize },
    Confirm { question: usize },
    // captcha
    Captcha { user_id: i64, token: String },
    // admin menu
    Menu,
    CreateSurvey,
    ListSurveys,
    EditMenu,
    DeleteMenu,
    ResultsMenu,
    BroadcastMenu,
    ScheduledList,
    JoinConfigMenu,
    SetWelcome,
    ToggleTestMode,
    Analytics,
    FilterSurveys,
    // survey pickers
    EditSurvey { survey_id: i64 },
    DeleteSurvey { survey_id: i64 },
    SendResults { survey_id: i64 },
    Broadcast { survey_id: i64 },
    RenameSurvey { survey_id: i64 },
    EditQuestions { survey_id: i64 },
    AddQuestion { survey_id: i64 },
    // question pickers
    EditQuestion { question_id: i64 },
    RetextQuestion { question_id: i64 },
    ReoptionsQuestion { question_id: i64 },
    DeleteQuestion { question_id: i64 },
    // join-survey configuration
    JoinPickGroup { group_id: i64 },
    JoinAssign { group_id: i64, survey_id: i64 },
    // creation wizard
    PickKind { survey_id: i64, kind: QuestionKind },
    FinishQuestions { survey_id: i64 },
    SetTimeLimit { survey_id: i64 },
    ToggleAnonymous { survey_id: i64 },
    AddTags { survey_id: i64 },
    Schedule { survey_id: i64 },
    FinishCreation { survey_id: i64 },
}

impl CallbackAction {
    pub fn encode(&self) -> String {
        use CallbackAction::*;
        let body = match self {
            Answer { question, option } => format!("ans:{}:{}", question, option),
            Toggle { question, option } => format!("tog:{}:{}", question, option),
            Confirm { question } => format!("cfm:{}", question),
            Captcha { user_id, token } => format!("cap:{}:{}", user_id, token),
            Menu => "adm:menu".to_string(),
            CreateSurvey => "adm:create".to_string(),
            ListSurveys => "adm:list".to_string(),
            EditMenu => "adm:edit".to_string(),
            DeleteMenu => "adm:delete".to_string(),
            ResultsMenu => "adm:results".to_string(),
            BroadcastMenu => "adm:cast".to_string(),
            ScheduledList => "adm:sched".to_string(),
            JoinConfigMenu => "adm:join".to_string(),
            SetWelcome => "adm:welcome".to_string(),
            ToggleTestMode => "adm:test".to_string(),
            Analytics => "adm:stats".to_string(),
            FilterSurveys => "adm:filter".to_string(),
            EditSurvey { survey_id } => format!("sur:edit:{}", survey_id),
            DeleteSurvey { survey_id } => format!("sur:del:{}", survey_id),
            SendResults { survey_id } => format!("sur:res:{}", survey_id),
            Broadcast { survey_id } => format!("sur:cast:{}", survey_id),
            RenameSurvey { survey_id } => format!("sur:ren:{}", survey_id),
            EditQuestions { survey_id } => format!("sur:qs:{}", survey_id),
            AddQuestion { survey_id } => format!("sur:addq:{}", survey_id),
            EditQuestion { question_id } => format!("q:edit:{}", question_id),
            RetextQuestion { question_id } => format!("q:text:{}", question_id),
            ReoptionsQuestion { question_id } => format!("q:opts:{}", question_id),
            DeleteQuestion { question_id } => format!("q:del:{}", question_id),
            JoinPickGroup { group_id } => format!("join:grp:{}", group_id),
            JoinAssign { group_id, survey_id } => format!("join:set:{}:{}", group_id, survey_id),
            PickKind { survey_id, kind } => format!("wiz:kind:{}:{}", survey_id, kind.as_str()),
            FinishQuestions { survey_id } => format!("wiz:fin:{}", survey_id),
            SetTimeLimit { survey_id } => format!("wiz:tl:{}", survey_id),
            ToggleAnonymous { survey_id } => format!("wiz:anon:{}", survey_id),
            AddTags { survey_id } => format!("wiz:tags:{}", survey_id),
            Schedule { survey_id } => format!("wiz:sched:{}", survey_id),
            FinishCreation { survey_id } => format!("wiz:done:{}", survey_id),
        };
        format!("{}:{}", VERSION, body)
    }

    pub fn parse(data: &str) -> Option<Self> {
        use CallbackAction::*;
        let parts: Vec<&str> = data.split(':').collect();
        if parts.first() != Some(&VERSION) {
            return None;
        }
        let action = match parts.as_slice() {
            [_, "ans", q, o] => Answer {
                question: q.parse().ok()?,
                option: o.parse().ok()?,
            },
            [_, "tog", q, o] => Toggle {
                question: q.parse().ok()?,
                option: o.parse().ok()?,
            },
            [_, "cfm", q] => Confirm { question: q.parse().ok()? },
            [_, "cap", uid, token] => Captcha {
                user_id: uid.parse().ok()?,
                token: (*token).to_string(),
            },
            [_, "adm", "menu"] => Menu,
            [_, "adm", "create"] => CreateSurvey,
            [_, "adm", "list"] => ListSurveys,
            [_, "adm", "edit"] => EditMenu,
            [_, "adm", "delete"] => DeleteMenu,
            [_, "adm", "results"] => ResultsMenu,
            [_, "adm", "cast"] => BroadcastMenu,
            [_, "adm", "sched"] => ScheduledList,
            [_, "adm", "join"] => JoinConfigMenu,
            [_, "adm", "welcome"] => SetWelcome,
            [_, "adm", "test"] => ToggleTestMode,
            [_, "adm", "stats"] => Analytics,
            [_, "adm", "filter"] => FilterSurveys,
            [_, "sur", "edit", id] => EditSurvey { survey_id: id.parse().ok()? },
            [_, "sur", "del", id] => DeleteSurvey { survey_id: id.parse().ok()? },
            [_, "sur", "res", id] => SendResults { survey_id: id.parse().ok()? },
            [_, "sur", "cast", id] => Broadcast { survey_id: id.parse().ok()? },
            [_, "sur", "ren", id] => RenameSurvey { survey_id: id.parse().ok()? },
            [_, "sur", "qs", id] => EditQuestions { survey_id: id.parse().ok()? },
            [_, "sur", "addq", id] => AddQuestion { survey_id: id.parse().ok()? },
            [_, "q", "edit", id] => EditQuestion { question_id: id.parse().ok()? },
            [_, "q", "text", id] => RetextQuestion { question_id: id.parse().ok()? },
            [_, "q", "opts", id] => ReoptionsQuestion { question_id: id.parse().ok()? },
            [_, "q", "del", id] => DeleteQuestion { question_id: id.parse().ok()? },
            [_, "join", "grp", gid] => JoinPickGroup { group_id: gid.parse().ok()? },
            [_, "join", "set", gid, sid] => JoinAssign {
                group_id: gid.parse().ok()?,
                survey_id: sid.parse().ok()?,
            },
            [_, "wiz", "kind", sid, kind] => PickKind {
                survey_id: sid.parse().ok()?,
                kind: QuestionKind::parse(kind)?,
            },
            [_, "wiz", "fin", sid] => FinishQuestions { survey_id: sid.parse().ok()? },
            [_, "wiz", "tl", sid] => SetTimeLimit { survey_id: sid.parse().ok()? },
            [_, "wiz", "anon", sid] => ToggleAnonymous { survey_id: sid.parse().ok()? },
            [_, "wiz", "tags", sid] => AddTags { survey_id: sid.parse().ok()? },
            [_, "wiz", "sched", sid] => Schedule { survey_id: sid.parse().ok()? },
            [_, "wiz", "done", sid] => FinishCreation { survey_id: sid.parse().ok()? },
            _ => return None,
        };
        Some(action)
    }

    /// Actions handled by the survey-taking state machine.
    pub fn is_take_action(&self) -> bool {
        matches!(
            self,
            CallbackAction::Answer { .. } | CallbackAction::Toggle { .. } | CallbackAction::Confirm { .. }
        )
    }

    pub fn is_captcha_action(&self) -> bool {
        matches!(self, CallbackAction::Captcha { .. })
    }

    /// Everything else belongs to the admin wizard.
    pub fn is_admin_action(&self) -> bool {
        !self.is_take_action() && !self.is_captcha_action()
    }
}

pub fn button(label: impl Into<String>, action: CallbackAction) -> InlineKeyboardButton {
    InlineKeyboardButton::callback(label.into(), action.encode())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn representative_actions_roundtrip() {
        for action in [
            CallbackAction::Answer { question: 3, option: 1 },
            CallbackAction::Captcha { user_id: 42, token: "A1B2C".into() },
            CallbackAction::JoinAssign { group_id: -1001234, survey_id: 7 },
            CallbackAction::PickKind { survey_id: 9, kind: QuestionKind::Multi },
            CallbackAction::Menu,
        ] {
            let encoded = action.encode();
            assert_eq!(CallbackAction::parse(&encoded), Some(action), "{}", encoded);
        }
    }

    #[test]
    fn rejects_malformed_and_foreign_data() {
        assert_eq!(CallbackAction::parse(""), None);
        assert_eq!(CallbackAction::parse("ans:1:2"), None); // unversioned
        assert_eq!(CallbackAction::parse("v1:ans:x:2"), None); // non-numeric
        assert_eq!(CallbackAction::parse("v1:ans:1:2:3"), None); // extra segment
        assert_eq!(CallbackAction::parse("v2:ans:1:2"), None); // future version
        assert_eq!(CallbackAction::parse("v1:wiz:kind:1:poll"), None); // unknown kind
    }

    #[test]
    fn routing_classes_partition_the_space() {
        let take = CallbackAction::Toggle { question: 0, option: 0 };
        let cap = CallbackAction::Captcha { user_id: 1, token: "T".into() };
        let adm = CallbackAction::DeleteSurvey { survey_id: 1 };
        assert!(take.is_take_action() && !take.is_admin_action());
        assert!(cap.is_captcha_action() && !cap.is_admin_action());
        assert!(adm.is_admin_action() && !adm.is_take_action());
    }

    #[test]
    fn captcha_payload_fits_callback_data_limit() {
        let a = CallbackAction::Captcha { user_id: i64::MAX, token: "ZZZZZ".into() };
        assert!(a.encode().len() <= 64);
    }
}
