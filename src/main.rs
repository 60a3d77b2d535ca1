use anyhow::Result;
use dotenvy::dotenv;
use log::info;
use std::sync::Arc;
use teloxide::prelude::*;

mod admin;
mod broadcast;
mod callback;
mod captcha;
mod config;
mod db;
mod export;
mod plugin;
mod scheduler;
mod state;
mod survey;

use captcha::CaptchaGate;
use config::Config;
use state::FlowStore;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub flows: FlowStore,
    pub captcha: CaptchaGate,
    pub bot_username: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    pretty_env_logger::init();

    let cfg = Config::from_env()?;
    db::init(&cfg).await?;

    let bot = Bot::new(cfg.bot_token.clone());
    let me = bot.get_me().await?;

    let state = AppState {
        cfg: Arc::new(cfg),
        flows: FlowStore::default(),
        captcha: CaptchaGate::default(),
        bot_username: me.username().to_string(),
    };

    let features = plugin::registry();
    let mut commands = Vec::new();
    let mut handler: plugin::Schema = dptree::entry();
    for feature in &features {
        feature.on_load();
        commands.extend(feature.commands());
        handler = handler.branch(feature.schema());
        info!("feature loaded: {}", feature.name());
    }
    bot.set_my_commands(commands).await?;

    let _scheduler = scheduler::spawn(bot.clone(), state.clone());

    info!(
        "Bot @{} started. {} admin(s), captcha {}",
        state.bot_username,
        state.cfg.admin_ids.len(),
        if state.cfg.captcha_enabled { "enabled" } else { "disabled" }
    );

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state.clone()])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    state.captcha.abort_all();
    for feature in &features {
        feature.on_unload();
    }

    Ok(())
}
