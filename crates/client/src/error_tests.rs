// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use std::time::Duration;

#[test]
fn test_wrapped_errors_keep_their_message() {
    let err: Error = SubscribeError::Timeout(Duration::from_secs(10)).into();
    assert_eq!(err.to_string(), "subscribe failed: no subscribe ack within 10s");

    let err: Error = SyncError::Server("slow down".to_string()).into();
    assert_eq!(err.to_string(), "sync failed: server error: slow down");

    let err: Error = EngineError::Stopped.into();
    assert_eq!(err.to_string(), "sync engine has stopped");
}

#[test]
fn test_no_data_dir_has_hint() {
    assert!(Error::NoDataDir.to_string().contains("hint:"));
}
