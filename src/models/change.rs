// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Per-document change records emitted by live subscriptions.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Added => "added",
            ChangeKind::Modified => "modified",
            ChangeKind::Removed => "removed",
        }
    }
}

/// One change to one document in a watched query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent<T> {
    pub kind: ChangeKind,
    pub id: String,
    pub data: T,
}

impl<T> ChangeEvent<T> {
    pub fn added(id: impl Into<String>, data: T) -> Self {
        Self {
            kind: ChangeKind::Added,
            id: id.into(),
            data,
        }
    }

    pub fn modified(id: impl Into<String>, data: T) -> Self {
        Self {
            kind: ChangeKind::Modified,
            id: id.into(),
            data,
        }
    }

    pub fn removed(id: impl Into<String>, data: T) -> Self {
        Self {
            kind: ChangeKind::Removed,
            id: id.into(),
            data,
        }
    }
}
