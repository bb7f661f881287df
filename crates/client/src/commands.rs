// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Command implementations for the `chatsync` binary.

use std::time::Duration;

use chatsync_core::{Message, SqliteStore};
use tracing::{debug, info};

use crate::cli::{Cli, Command};
use crate::config::{default_config_path, Config};
use crate::error::{Error, Result};
use crate::sync::{ConversationUpdate, EngineHandle, SyncEngine, WebSocketTransport};

/// Connect timeout for the initial connection of a one-shot command.
const CONNECT_WAIT: Duration = Duration::from_secs(30);

pub async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    let store = SqliteStore::open(&config.store_path()?)?;
    let (engine, handle) = SyncEngine::new(&config, WebSocketTransport::new(), store)?;
    let task = tokio::spawn(engine.run());

    let result = match cli.command {
        Command::Watch { conversations } => watch(&handle, &conversations).await,
        Command::Send {
            conversation,
            text,
            timeout,
        } => send(&handle, &conversation, &text, Duration::from_secs(timeout)).await,
    };

    handle.shutdown();
    if let Err(e) = task.await {
        debug!(error = %e, "engine task ended abnormally");
    }
    result
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => match default_config_path() {
            Some(path) => Config::load_or_default(&path)?,
            None => Config::default(),
        },
    };
    if let Some(url) = &cli.url {
        config.connection.url = url.clone();
        config.validate()?;
    }
    Ok(config)
}

async fn wait_connected(handle: &EngineHandle) -> Result<()> {
    handle.connect()?;
    tokio::time::timeout(CONNECT_WAIT, handle.wait_connected())
        .await
        .map_err(|_| Error::Timeout("connection".to_string()))
}

async fn watch(handle: &EngineHandle, conversations: &[String]) -> Result<()> {
    for conversation in conversations {
        handle.events().on_message(conversation, print_message);
    }
    handle.events().on_conversation_update(|update| match update {
        ConversationUpdate::Title {
            conversation_id,
            title,
        } => println!("[{conversation_id}] title: {title}"),
        ConversationUpdate::GenerationComplete {
            conversation_id,
            message_id,
            success,
            error,
        } => match (success, error) {
            (true, _) => println!("[{conversation_id}] {message_id} complete"),
            (false, Some(error)) => println!("[{conversation_id}] {message_id} failed: {error}"),
            (false, None) => println!("[{conversation_id}] {message_id} failed"),
        },
        ConversationUpdate::SubscriptionLost {
            conversation_id,
            reason,
        } => eprintln!("[{conversation_id}] subscription lost: {reason}"),
    });

    wait_connected(handle).await?;
    for conversation in conversations {
        for message in handle.messages(conversation).await? {
            print_message(&message);
        }
        handle.subscribe(conversation).await?;
        info!(conversation = %conversation, "watching");
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("interrupted"),
        Err(e) => debug!(error = %e, "failed to listen for ctrl-c"),
    }
    Ok(())
}

async fn send(
    handle: &EngineHandle,
    conversation: &str,
    text: &str,
    timeout: Duration,
) -> Result<()> {
    let message = handle.send_message(conversation, text).await?;
    let local_id = message.local_id.clone().unwrap_or_else(|| message.id.clone());
    wait_connected(handle).await?;

    let summary = tokio::time::timeout(timeout, handle.sync_now(conversation))
        .await
        .map_err(|_| Error::Timeout("sync".to_string()))??;
    debug!(
        synced = summary.synced,
        conflicts = summary.conflicts,
        "sync finished"
    );

    let stored = handle
        .messages(conversation)
        .await?
        .into_iter()
        .find(|m| m.local_id.as_deref() == Some(local_id.as_str()) || m.id == local_id);
    match stored {
        Some(message) => print_message(&message),
        None => println!("{local_id} (absorbed by server copy)"),
    }
    Ok(())
}

fn print_message(message: &Message) {
    println!(
        "[{}] #{} {} {} ({}): {}",
        message.conversation_id,
        message.sequence_number,
        message.id,
        message.role,
        message.sync_status,
        message.contents
    );
}
