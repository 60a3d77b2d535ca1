//! Per-user conversation state.
//!
//! Every multi-step flow (taking a survey, the admin wizard) keeps its
//! progress here, keyed by the user id of the private chat driving it. The
//! store is in-memory only; a restart resets every active flow.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use crate::db::{Question, QuestionKind};

#[derive(Debug, Clone, PartialEq)]
pub enum Origin {
    Private,
    Group { id: i64, title: String },
}

impl Origin {
    pub fn id_label(&self) -> String {
        match self {
            Origin::Private => "private".to_string(),
            Origin::Group { id, .. } => id.to_string(),
        }
    }

    pub fn title_label(&self) -> &str {
        match self {
            Origin::Private => "private",
            Origin::Group { title, .. } => title,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResponseRow {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Clone, Default)]
pub struct Requester {
    pub user_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
}

/// A survey run. The question list is snapshotted at entry so concurrent
/// edits by an admin never shift indices under an active run.
#[derive(Debug, Clone)]
pub struct TakeFlow {
    pub survey_id: i64,
    pub survey_name: String,
    pub anonymous: bool,
    pub requester: Requester,
    pub origin: Origin,
    pub questions: Vec<Question>,
    pub index: usize,
    pub responses: Vec<ResponseRow>,
    pub picked: BTreeSet<usize>,
}

impl TakeFlow {
    pub fn current_question(&self) -> Option<&Question> {
        self.questions.get(self.index)
    }

    pub fn is_done(&self) -> bool {
        self.index >= self.questions.len()
    }

    pub fn awaiting_text(&self) -> bool {
        self.current_question()
            .map(|q| q.kind == QuestionKind::Text)
            .unwrap_or(false)
    }

    /// Record one answer for the current question and move on.
    pub fn push_answer(&mut self, question: String, answer: String) {
        self.responses.push(ResponseRow { question, answer });
        self.index += 1;
        self.picked.clear();
    }

    /// Flip membership of an option in the current multi-choice selection.
    pub fn toggle(&mut self, option: usize) {
        if !self.picked.remove(&option) {
            self.picked.insert(option);
        }
    }
}

/// One variant per admin wizard step, carrying only the data valid for that
/// step. A handler that finds the wrong variant aborts the wizard instead of
/// guessing.
#[derive(Debug, Clone)]
pub enum AdminFlow {
    AwaitName,
    AwaitQuestionText {
        survey_id: i64,
        survey_name: String,
        kind: QuestionKind,
    },
    AwaitQuestionOptions {
        survey_id: i64,
        survey_name: String,
        kind: QuestionKind,
        text: String,
    },
    AwaitTimeLimitHours {
        survey_id: i64,
        survey_name: String,
    },
    AwaitTags {
        survey_id: i64,
        survey_name: String,
    },
    AwaitSchedule {
        survey_id: i64,
        survey_name: String,
    },
    AwaitRename {
        survey_id: i64,
        old_name: String,
    },
    AwaitQuestionRetext {
        question_id: i64,
    },
    AwaitQuestionReoptions {
        question_id: i64,
    },
    AwaitWelcome,
    AwaitFilter,
}

#[derive(Debug, Clone)]
pub enum Flow {
    Take(TakeFlow),
    Admin(AdminFlow),
}

/// Conversation state store. One active flow per user; read-modify-write is
/// atomic per participant, different participants never contend for long.
#[derive(Clone, Default)]
pub struct FlowStore {
    inner: Arc<Mutex<HashMap<i64, Flow>>>,
}

impl FlowStore {
    pub fn get(&self, user_id: i64) -> Option<Flow> {
        self.inner.lock().expect("flow store poisoned").get(&user_id).cloned()
    }

    pub fn set(&self, user_id: i64, flow: Flow) {
        self.inner.lock().expect("flow store poisoned").insert(user_id, flow);
    }

    /// Apply `f` to the user's flow in place. Returns false when no flow is
    /// active (the caller decides how to recover).
    pub fn update<F>(&self, user_id: i64, f: F) -> bool
    where
        F: FnOnce(&mut Flow),
    {
        let mut map = self.inner.lock().expect("flow store poisoned");
        match map.get_mut(&user_id) {
            Some(flow) => {
                f(flow);
                true
            }
            None => false,
        }
    }

    pub fn take(&self, user_id: i64) -> Option<Flow> {
        self.inner.lock().expect("flow store poisoned").remove(&user_id)
    }

    pub fn clear(&self, user_id: i64) {
        self.inner.lock().expect("flow store poisoned").remove(&user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn take_flow(n_questions: usize) -> TakeFlow {
        let questions = (0..n_questions)
            .map(|i| Question {
                id: i as i64 + 1,
                text: format!("q{}", i),
                kind: QuestionKind::Single,
                options: vec!["Yes".into(), "No".into()],
            })
            .collect();
        TakeFlow {
            survey_id: 1,
            survey_name: "Feedback".into(),
            anonymous: false,
            requester: Requester::default(),
            origin: Origin::Private,
            questions,
            index: 0,
            responses: Vec::new(),
            picked: BTreeSet::new(),
        }
    }

    #[test]
    fn store_set_get_clear() {
        let store = FlowStore::default();
        assert!(store.get(1).is_none());
        store.set(1, Flow::Admin(AdminFlow::AwaitName));
        assert!(matches!(store.get(1), Some(Flow::Admin(AdminFlow::AwaitName))));
        store.clear(1);
        assert!(store.get(1).is_none());
    }

    #[test]
    fn update_reports_missing_flow() {
        let store = FlowStore::default();
        assert!(!store.update(5, |_| {}));
        store.set(5, Flow::Take(take_flow(1)));
        assert!(store.update(5, |f| {
            if let Flow::Take(t) = f {
                t.push_answer("q0".into(), "Yes".into());
            }
        }));
        match store.get(5) {
            Some(Flow::Take(t)) => {
                assert!(t.is_done());
                assert_eq!(t.responses.len(), 1);
            }
            other => panic!("unexpected flow: {:?}", other.is_some()),
        }
    }

    #[test]
    fn participants_do_not_share_state() {
        let store = FlowStore::default();
        store.set(1, Flow::Take(take_flow(2)));
        store.set(2, Flow::Admin(AdminFlow::AwaitWelcome));
        store.clear(1);
        assert!(store.get(1).is_none());
        assert!(matches!(store.get(2), Some(Flow::Admin(AdminFlow::AwaitWelcome))));
    }

    #[test]
    fn toggle_is_an_involution() {
        let mut flow = take_flow(1);
        flow.toggle(0);
        flow.toggle(1);
        assert_eq!(flow.picked.len(), 2);
        flow.toggle(0);
        assert!(!flow.picked.contains(&0));
        assert!(flow.picked.contains(&1));
        flow.toggle(0);
        flow.toggle(0);
        assert!(!flow.picked.contains(&0));
    }

    #[test]
    fn advancing_clears_selection() {
        let mut flow = take_flow(2);
        flow.toggle(1);
        flow.push_answer("q0".into(), "No".into());
        assert!(flow.picked.is_empty());
        assert_eq!(flow.index, 1);
        assert!(!flow.is_done());
    }
}
