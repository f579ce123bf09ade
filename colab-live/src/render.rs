//! View fragments sent to editors.
//!
//! Sessions never build markup themselves; they call a [`ViewRenderer`] with
//! typed arguments and forward whatever it returns verbatim. [`HtmlRenderer`]
//! is the stock implementation and emits htmx out-of-band swaps against the
//! editor page's element ids:
//!
//! | Element | Id |
//! |---|---|
//! | group container | `#groups` |
//! | one group | `#group-{group}` |
//! | item list of a group | `#items-{group}` |
//! | one item | `#item-{group}-{item}` |
//! | online collaborators | `#collaborators` |
//! | save state | `#save-state` |

use std::fmt::Write;

use colab_core::{CheckState, Group, Item, List};

use crate::presence::PresenceEntry;

/// How a fragment is applied on the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Swap {
    /// Append to the parent container.
    Append,
    /// Replace the existing element.
    Replace,
    /// Remove the existing element.
    Delete,
    /// Replace the element, highlighted in a collaborator's colour.
    Focus,
    /// Replace the element, clearing any highlight.
    Unfocus,
}

pub trait ViewRenderer: Send + Sync {
    fn render_group(&self, group: &Group, swap: Swap) -> String;

    fn render_item(&self, group: &Group, item: &Item, color: &str, swap: Swap) -> String;

    fn render_presence(&self, presence: &[PresenceEntry]) -> String;

    fn render_save_indicator(&self, list: &List, dirty: bool) -> String;
}

/// htmx fragment renderer.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlRenderer;

impl HtmlRenderer {
    pub fn new() -> Self {
        Self
    }

    fn item_element(&self, out: &mut String, group: &Group, item: &Item, color: &str, oob: Option<&str>) {
        let id = format!("item-{}-{}", group.id, item.id);
        let _ = write!(
            out,
            r#"<li id="{id}" class="item {state}" data-group-id="{gid}" data-item-id="{iid}" data-order="{order}""#,
            state = check_class(item.checked),
            gid = group.id,
            iid = item.id,
            order = item.order,
        );
        if let Some(oob) = oob {
            let _ = write!(out, r#" hx-swap-oob="{oob}""#);
        }
        if !color.is_empty() {
            let color = escape_html(color);
            let _ = write!(out, r#" data-color="{color}" style="outline: 2px solid {color}""#);
        }
        let _ = write!(
            out,
            r#"><input class="description" name="description" value="{desc}"><input class="quantity" name="quantity" type="number" value="{qty}"></li>"#,
            desc = escape_html(&item.description),
            qty = item.quantity,
        );
    }

    fn group_element(&self, out: &mut String, group: &Group, oob: Option<&str>) {
        let _ = write!(out, r#"<section id="group-{}" class="group""#, group.id);
        if let Some(oob) = oob {
            let _ = write!(out, r#" hx-swap-oob="{oob}""#);
        }
        let _ = write!(
            out,
            r#"><input class="group-name" name="text" value="{name}"><ul id="items-{id}">"#,
            name = escape_html(&group.name),
            id = group.id,
        );
        for item in &group.items {
            self.item_element(out, group, item, "", None);
        }
        out.push_str("</ul></section>");
    }
}

impl ViewRenderer for HtmlRenderer {
    fn render_group(&self, group: &Group, swap: Swap) -> String {
        let mut out = String::new();
        let target = format!("#group-{}", group.id);
        match swap {
            Swap::Append => {
                out.push_str(r##"<div hx-swap-oob="beforeend:#groups">"##);
                self.group_element(&mut out, group, None);
                out.push_str("</div>");
            }
            Swap::Replace | Swap::Focus | Swap::Unfocus => {
                self.group_element(&mut out, group, Some(&format!("outerHTML:{target}")));
            }
            Swap::Delete => {
                let _ = write!(
                    out,
                    r#"<section id="group-{}" hx-swap-oob="delete:{target}"></section>"#,
                    group.id
                );
            }
        }
        out
    }

    fn render_item(&self, group: &Group, item: &Item, color: &str, swap: Swap) -> String {
        let mut out = String::new();
        let target = format!("#item-{}-{}", group.id, item.id);
        match swap {
            Swap::Append => {
                let _ = write!(out, r##"<div hx-swap-oob="beforeend:#items-{}">"##, group.id);
                self.item_element(&mut out, group, item, color, None);
                out.push_str("</div>");
            }
            Swap::Replace | Swap::Focus => {
                self.item_element(&mut out, group, item, color, Some(&format!("outerHTML:{target}")));
            }
            Swap::Unfocus => {
                self.item_element(&mut out, group, item, "", Some(&format!("outerHTML:{target}")));
            }
            Swap::Delete => {
                let _ = write!(
                    out,
                    r#"<li id="item-{}-{}" hx-swap-oob="delete:{target}"></li>"#,
                    group.id, item.id
                );
            }
        }
        out
    }

    fn render_presence(&self, presence: &[PresenceEntry]) -> String {
        let mut out = String::from(r##"<ul id="collaborators" hx-swap-oob="outerHTML:#collaborators">"##);
        for entry in presence {
            let _ = write!(
                out,
                r#"<li class="collaborator" data-user-id="{id}" style="color: {color}">{name}</li>"#,
                id = entry.user_id,
                color = escape_html(&entry.color),
                name = escape_html(&entry.display_name),
            );
        }
        out.push_str("</ul>");
        out
    }

    fn render_save_indicator(&self, list: &List, dirty: bool) -> String {
        let (class, label) = if dirty {
            ("dirty", "Unsaved changes")
        } else {
            ("saved", "All changes saved")
        };
        format!(
            r##"<span id="save-state" class="{class}" data-list-id="{}" hx-swap-oob="outerHTML:#save-state">{label}</span>"##,
            list.id
        )
    }
}

fn check_class(state: CheckState) -> &'static str {
    match state {
        CheckState::Unchecked => "unchecked",
        CheckState::Partial => "partial",
        CheckState::Checked => "checked",
    }
}

/// Escape text for use in element content and quoted attribute values.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
