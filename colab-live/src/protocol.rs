//! Editor action protocol.
//!
//! Clients send JSON text frames shaped as a discriminated envelope:
//! ```text
//! { "actionType": <tag>, ...fields of that action }
//! ```
//!
//! | Tag | Action      | Fields                                   |
//! |-----|-------------|------------------------------------------|
//! | 1   | FocusItem   | groupId, itemId                          |
//! | 2   | UnfocusItem | groupId, itemId                          |
//! | 3   | UpdateColor | userId, color                            |
//! | 4   | AddGroup    |                                          |
//! | 5   | EditGroup   | groupId, text                            |
//! | 6   | AddItem     | groupId                                  |
//! | 7   | DeleteGroup | groupId                                  |
//! | 8   | DeleteItem  | groupId, itemId                          |
//! | 9   | EditItem    | groupId, itemId, description, quantity   |
//!
//! `groupIndex`/`itemIndex` are accepted as aliases of `groupId`/`itemId`
//! (older editor pages still send them). `quantity` is a string; it is
//! parsed when the edit is applied. Unknown extra keys are ignored.

use std::fmt;

use colab_core::{GroupId, ItemId, UserId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Numeric action tags as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ActionKind {
    FocusItem = 1,
    UnfocusItem = 2,
    UpdateColor = 3,
    AddGroup = 4,
    EditGroup = 5,
    AddItem = 6,
    DeleteGroup = 7,
    DeleteItem = 8,
    EditItem = 9,
}

impl ActionKind {
    pub fn from_tag(tag: i64) -> Option<Self> {
        let kind = match tag {
            1 => Self::FocusItem,
            2 => Self::UnfocusItem,
            3 => Self::UpdateColor,
            4 => Self::AddGroup,
            5 => Self::EditGroup,
            6 => Self::AddItem,
            7 => Self::DeleteGroup,
            8 => Self::DeleteItem,
            9 => Self::EditItem,
            _ => return None,
        };
        Some(kind)
    }

    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::FocusItem => "FocusItem",
            Self::UnfocusItem => "UnfocusItem",
            Self::UpdateColor => "UpdateColor",
            Self::AddGroup => "AddGroup",
            Self::EditGroup => "EditGroup",
            Self::AddItem => "AddItem",
            Self::DeleteGroup => "DeleteGroup",
            Self::DeleteItem => "DeleteItem",
            Self::EditItem => "EditItem",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded client action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    FocusItem { group_id: GroupId, item_id: ItemId },
    UnfocusItem { group_id: GroupId, item_id: ItemId },
    UpdateColor { user_id: UserId, color: String },
    AddGroup,
    EditGroup { group_id: GroupId, text: String },
    AddItem { group_id: GroupId },
    DeleteGroup { group_id: GroupId },
    DeleteItem { group_id: GroupId, item_id: ItemId },
    EditItem {
        group_id: GroupId,
        item_id: ItemId,
        description: String,
        quantity: String,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Malformed action envelope: {0}")]
    MalformedEnvelope(String),
    #[error("Action envelope has no actionType")]
    MissingActionType,
    #[error("actionType is not an integer: {0}")]
    InvalidActionType(String),
    #[error("Unknown action type {0}")]
    UnknownAction(i64),
    #[error("Invalid {action} payload: {reason}")]
    InvalidPayload { action: ActionKind, reason: String },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemRef {
    #[serde(alias = "groupIndex")]
    group_id: GroupId,
    #[serde(alias = "itemIndex")]
    item_id: ItemId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupRef {
    #[serde(alias = "groupIndex")]
    group_id: GroupId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupText {
    #[serde(alias = "groupIndex")]
    group_id: GroupId,
    text: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ColorChange {
    user_id: UserId,
    color: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemEdit {
    #[serde(alias = "groupIndex")]
    group_id: GroupId,
    #[serde(alias = "itemIndex")]
    item_id: ItemId,
    description: String,
    quantity: String,
}

fn payload<T: DeserializeOwned>(action: ActionKind, value: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(value).map_err(|e| ProtocolError::InvalidPayload {
        action,
        reason: e.to_string(),
    })
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::FocusItem { .. } => ActionKind::FocusItem,
            Self::UnfocusItem { .. } => ActionKind::UnfocusItem,
            Self::UpdateColor { .. } => ActionKind::UpdateColor,
            Self::AddGroup => ActionKind::AddGroup,
            Self::EditGroup { .. } => ActionKind::EditGroup,
            Self::AddItem { .. } => ActionKind::AddItem,
            Self::DeleteGroup { .. } => ActionKind::DeleteGroup,
            Self::DeleteItem { .. } => ActionKind::DeleteItem,
            Self::EditItem { .. } => ActionKind::EditItem,
        }
    }

    /// Decode one text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::MalformedEnvelope(e.to_string()))?;
        let Some(envelope) = value.as_object() else {
            return Err(ProtocolError::MalformedEnvelope(
                "expected a JSON object".to_string(),
            ));
        };
        let raw = envelope
            .get("actionType")
            .ok_or(ProtocolError::MissingActionType)?;
        let tag = raw
            .as_i64()
            .ok_or_else(|| ProtocolError::InvalidActionType(raw.to_string()))?;
        let kind = ActionKind::from_tag(tag).ok_or(ProtocolError::UnknownAction(tag))?;

        let action = match kind {
            ActionKind::FocusItem => {
                let p: ItemRef = payload(kind, value)?;
                Self::FocusItem { group_id: p.group_id, item_id: p.item_id }
            }
            ActionKind::UnfocusItem => {
                let p: ItemRef = payload(kind, value)?;
                Self::UnfocusItem { group_id: p.group_id, item_id: p.item_id }
            }
            ActionKind::UpdateColor => {
                let p: ColorChange = payload(kind, value)?;
                Self::UpdateColor { user_id: p.user_id, color: p.color }
            }
            ActionKind::AddGroup => Self::AddGroup,
            ActionKind::EditGroup => {
                let p: GroupText = payload(kind, value)?;
                Self::EditGroup { group_id: p.group_id, text: p.text }
            }
            ActionKind::AddItem => {
                let p: GroupRef = payload(kind, value)?;
                Self::AddItem { group_id: p.group_id }
            }
            ActionKind::DeleteGroup => {
                let p: GroupRef = payload(kind, value)?;
                Self::DeleteGroup { group_id: p.group_id }
            }
            ActionKind::DeleteItem => {
                let p: ItemRef = payload(kind, value)?;
                Self::DeleteItem { group_id: p.group_id, item_id: p.item_id }
            }
            ActionKind::EditItem => {
                let p: ItemEdit = payload(kind, value)?;
                Self::EditItem {
                    group_id: p.group_id,
                    item_id: p.item_id,
                    description: p.description,
                    quantity: p.quantity,
                }
            }
        };
        Ok(action)
    }

    /// Encode as a wire envelope, using the canonical field names.
    pub fn encode(&self) -> String {
        let tag = self.kind().tag();
        let value = match self {
            Self::FocusItem { group_id, item_id }
            | Self::UnfocusItem { group_id, item_id }
            | Self::DeleteItem { group_id, item_id } => {
                json!({ "actionType": tag, "groupId": group_id, "itemId": item_id })
            }
            Self::UpdateColor { user_id, color } => {
                json!({ "actionType": tag, "userId": user_id, "color": color })
            }
            Self::AddGroup => json!({ "actionType": tag }),
            Self::EditGroup { group_id, text } => {
                json!({ "actionType": tag, "groupId": group_id, "text": text })
            }
            Self::AddItem { group_id } | Self::DeleteGroup { group_id } => {
                json!({ "actionType": tag, "groupId": group_id })
            }
            Self::EditItem {
                group_id,
                item_id,
                description,
                quantity,
            } => json!({
                "actionType": tag,
                "groupId": group_id,
                "itemId": item_id,
                "description": description,
                "quantity": quantity,
            }),
        };
        value.to_string()
    }
}
