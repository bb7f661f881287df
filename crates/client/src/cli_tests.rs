// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use yare::parameterized;

#[test]
fn parses_watch_with_several_conversations() {
    let cli = Cli::try_parse_from(["chatsync", "watch", "c1", "c2"]).unwrap();
    match cli.command {
        Command::Watch { conversations } => assert_eq!(conversations, vec!["c1", "c2"]),
        Command::Send { .. } => unreachable!("parsed as send"),
    }
    assert!(!cli.verbose);
}

#[test]
fn parses_send_with_global_flags() {
    let cli = Cli::try_parse_from([
        "chatsync",
        "send",
        "c1",
        "Hello there",
        "-v",
        "--url",
        "wss://chat.example.com/ws",
    ])
    .unwrap();
    assert!(cli.verbose);
    assert_eq!(cli.url.as_deref(), Some("wss://chat.example.com/ws"));
    match cli.command {
        Command::Send {
            conversation,
            text,
            timeout,
        } => {
            assert_eq!(conversation, "c1");
            assert_eq!(text, "Hello there");
            assert_eq!(timeout, 30);
        }
        Command::Watch { .. } => unreachable!("parsed as watch"),
    }
}

#[parameterized(
    watch_without_conversation = { &["chatsync", "watch"] },
    send_without_text = { &["chatsync", "send", "c1"] },
    unknown_command = { &["chatsync", "listen", "c1"] },
)]
fn rejects_incomplete_commands(args: &[&str]) {
    assert!(Cli::try_parse_from(args).is_err());
}
