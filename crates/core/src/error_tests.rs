// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    not_found = { Error::MessageNotFound("m1".into()), "message not found: m1" },
    invalid_input = { Error::InvalidInput("empty conversation id".into()), "empty conversation id" },
    corrupted = { Error::CorruptedData("bad row".into()), "corrupted data: bad row" },
)]
fn error_display(error: Error, expected: &str) {
    assert_eq!(error.to_string(), expected);
}

#[test]
fn validation_errors_carry_hints() {
    let role = Error::InvalidRole("robot".into()).to_string();
    assert!(role.contains("'robot'"));
    assert!(role.contains("hint: valid roles are: user, assistant, system"));

    let status = Error::InvalidSyncStatus("done".into()).to_string();
    assert!(status.contains("hint: valid statuses are: pending, synced, conflict"));
}

#[test]
fn io_error_converts() {
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
    let error: Error = io.into();
    assert!(matches!(error, Error::Io(_)));
    assert!(error.to_string().starts_with("io error:"));
}
