//! Feature modules behind a fixed interface.
//!
//! Each feature contributes a dptree branch and its bot commands. Discovery
//! is this explicit registry, not directory scanning; the dispatcher in
//! `main` folds every feature's schema into one handler tree.

use teloxide::types::BotCommand;

pub type Schema = teloxide::dispatching::UpdateHandler<anyhow::Error>;

pub trait Feature: Send + Sync {
    fn name(&self) -> &'static str;

    fn commands(&self) -> Vec<BotCommand> {
        Vec::new()
    }

    fn schema(&self) -> Schema;

    fn on_load(&self) {}

    fn on_unload(&self) {}
}

/// Registration order doubles as dispatch order: the captcha gate must see
/// group traffic before anything else, and admin text steps must be offered
/// the message before the survey flow's free-text fallback.
pub fn registry() -> Vec<Box<dyn Feature>> {
    vec![
        Box::new(crate::captcha::GroupGateFeature),
        Box::new(crate::admin::AdminFeature),
        Box::new(crate::survey::SurveyFeature),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_names_are_unique() {
        let features = registry();
        let mut names: Vec<&str> = features.iter().map(|f| f.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), features.len());
    }

    #[test]
    fn registry_exposes_entry_commands() {
        let commands: Vec<String> = registry()
            .iter()
            .flat_map(|f| f.commands())
            .map(|c| c.command)
            .collect();
        assert!(commands.contains(&"start".to_string()));
        assert!(commands.contains(&"admin".to_string()));
    }
}
