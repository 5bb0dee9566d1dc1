use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ===== MESSAGE TYPES =====

/// Request sent by the renderer. `id` correlates the reply envelope.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UpMsgRequest {
    pub id: u64,
    pub msg: UpMsg,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum UpMsg {
    GetChildren {
        view_id: String,
        parent_handle: Option<TreeItemHandle>,
    },
    ResolveTreeItem {
        view_id: String,
        handle: TreeItemHandle,
    },
    SetVisible {
        view_id: String,
        visible: bool,
    },
    SetSelectionAndFocus {
        view_id: String,
        selected_handles: Vec<TreeItemHandle>,
        focused_handle: Option<TreeItemHandle>,
    },
    SetExpanded {
        view_id: String,
        handle: TreeItemHandle,
        expanded: bool,
    },
    SetCheckboxState {
        view_id: String,
        updates: Vec<CheckboxUpdate>,
    },
    Reveal {
        view_id: String,
        handle: Option<TreeItemHandle>,
        #[serde(default)]
        options: RevealOptions,
    },
    HandleDrag {
        view_id: String,
        source_handles: Vec<TreeItemHandle>,
        operation_id: String,
    },
    HandleDrop {
        destination_view_id: String,
        request_id: u64,
        transfer: DataTransferDto,
        target_handle: Option<TreeItemHandle>,
        operation_id: Option<String>,
        source_view_id: Option<String>,
        source_handles: Option<Vec<TreeItemHandle>>,
    },
    /// Reply to `DownMsg::ResolveDropFileData`. `data` is base64, `None` when the
    /// renderer no longer holds the bytes.
    DropFileData {
        query_id: u64,
        data: Option<String>,
    },
}

/// Message sent to the renderer. `id` is set only when replying to an `UpMsgRequest`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DownMsgEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub msg: DownMsg,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum DownMsg {
    /// `items: None` means the whole tree was invalidated and the root must be re-fetched.
    Refresh {
        view_id: String,
        items: Option<BTreeMap<TreeItemHandle, ItemDescriptor>>,
    },
    Reveal {
        view_id: String,
        target: Option<RevealTarget>,
        options: RevealOptions,
    },
    SetMessage {
        view_id: String,
        message: String,
    },
    SetTitle {
        view_id: String,
        title: String,
        description: Option<String>,
    },
    SetBadge {
        view_id: String,
        badge: Option<ViewBadge>,
    },
    DisposeTree {
        view_id: String,
    },
    ResolveDropFileData {
        view_id: String,
        request_id: u64,
        item_id: String,
        query_id: u64,
    },
    Children {
        view_id: String,
        parent_handle: Option<TreeItemHandle>,
        items: Option<Vec<ItemDescriptor>>,
    },
    ResolvedItem {
        view_id: String,
        handle: TreeItemHandle,
        item: Option<ItemDescriptor>,
    },
    DragData {
        view_id: String,
        operation_id: String,
        transfer: Option<DataTransferDto>,
    },
    DropHandled {
        view_id: String,
        request_id: u64,
        handled: bool,
    },
    Ack,
    Error {
        view_id: Option<String>,
        message: String,
        /// The view is gone; the renderer should drop its local state for it.
        stale_view: bool,
    },
}

// ===== TREE ITEM TYPES =====

/// Opaque identity of one tree node, stable across refreshes.
pub type TreeItemHandle = String;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CollapsibleState {
    #[default]
    None,
    Collapsed,
    Expanded,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AccessibilityInformation {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ThemeIcon {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommandDescriptor {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tooltip: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<serde_json::Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CheckboxDescriptor {
    pub is_checked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tooltip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accessibility_information: Option<AccessibilityInformation>,
}

/// Rendered snapshot of one tree node as the renderer sees it.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ItemDescriptor {
    pub handle: TreeItemHandle,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_handle: Option<TreeItemHandle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tooltip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_dark: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme_icon: Option<ThemeIcon>,
    #[serde(default)]
    pub collapsible_state: CollapsibleState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accessibility_information: Option<AccessibilityInformation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkbox: Option<CheckboxDescriptor>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ViewBadge {
    pub value: u64,
    pub tooltip: String,
}

// ===== REVEAL TYPES =====

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RevealOptions {
    pub select: bool,
    pub focus: bool,
    /// Number of levels to expand below the revealed item, at most `MAX_EXPAND`.
    pub expand: u8,
}

impl RevealOptions {
    pub const MAX_EXPAND: u8 = 3;

    pub fn clamped(self) -> Self {
        Self {
            expand: self.expand.min(Self::MAX_EXPAND),
            ..self
        }
    }
}

impl Default for RevealOptions {
    fn default() -> Self {
        Self {
            select: true,
            focus: false,
            expand: 0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RevealTarget {
    pub item: ItemDescriptor,
    /// Ancestors ordered from the root down to the immediate parent.
    pub parent_chain: Vec<ItemDescriptor>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CheckboxUpdate {
    pub handle: TreeItemHandle,
    pub is_checked: bool,
}

// ===== DATA TRANSFER TYPES =====

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DataTransferDto {
    pub items: Vec<DataTransferItemDto>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DataTransferItemDto {
    pub mime_type: String,
    #[serde(default)]
    pub as_string: String,
    /// Present for file entries; the bytes stay on the renderer until requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<DataTransferFileDto>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DataTransferFileDto {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

// ===== CONFIG TYPES =====

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct HostConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub refresh: RefreshSection,
    #[serde(default)]
    pub views: Vec<ViewSection>,
}

impl HostConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn view(&self, view_id: &str) -> Option<&ViewSection> {
        self.views.iter().find(|view| view.id == view_id)
    }
}

// AppSection carries the config format version so older files can be migrated
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AppSection {
    pub version: String,
}

impl AppSection {
    /// Current configuration format version
    pub const CURRENT_VERSION: &'static str = "1.0.0";

    pub fn is_supported_version(&self) -> bool {
        matches!(self.version.as_str(), "1.0.0")
    }

    pub fn needs_migration(&self) -> bool {
        self.version != Self::CURRENT_VERSION
    }

    pub fn migration_strategy(&self) -> MigrationStrategy {
        match self.version.as_str() {
            "1.0.0" => MigrationStrategy::None,
            _ => MigrationStrategy::Recreate,
        }
    }
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            version: Self::CURRENT_VERSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MigrationStrategy {
    None,            // No migration needed
    Upgrade(String), // Automatic upgrade with description
    Recreate,        // Unknown version, create new config
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9231,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RefreshSection {
    /// Window during which change notifications are coalesced into one flush.
    pub debounce_ms: u64,
}

impl Default for RefreshSection {
    fn default() -> Self {
        Self { debounce_ms: 200 }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ViewSection {
    pub id: String,
    pub root: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub can_select_many: bool,
    #[serde(default = "default_true")]
    pub watch: bool,
    #[serde(default)]
    pub accept_drops: bool,
    #[serde(default)]
    pub show_hidden: bool,
    /// Gitignore-style patterns, relative to `root`, hidden from the tree.
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl ViewSection {
    pub fn new(id: impl Into<String>, root: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            root: root.into(),
            title: None,
            can_select_many: false,
            watch: true,
            accept_drops: false,
            show_hidden: false,
            exclude: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

// ===== UTILITY FUNCTIONS =====

/// Last non-empty path segment of a URI or path, `None` for an empty input.
pub fn uri_basename(uri: &str) -> Option<&str> {
    uri.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_descriptor_uses_camel_case_and_skips_absent_fields() {
        let item = ItemDescriptor {
            handle: "0/0:src".to_string(),
            parent_handle: None,
            label: Some("src".to_string()),
            resource_uri: Some("file:///tmp/src".to_string()),
            collapsible_state: CollapsibleState::Collapsed,
            checkbox: Some(CheckboxDescriptor {
                is_checked: true,
                ..Default::default()
            }),
            ..Default::default()
        };

        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["resourceUri"], "file:///tmp/src");
        assert_eq!(json["collapsibleState"], "Collapsed");
        assert_eq!(json["checkbox"]["isChecked"], true);
        assert!(json.get("parentHandle").is_none());
        assert!(json.get("tooltip").is_none());
    }

    #[test]
    fn refresh_without_items_means_whole_tree() {
        let envelope = DownMsgEnvelope {
            id: None,
            msg: DownMsg::Refresh {
                view_id: "files".to_string(),
                items: None,
            },
        };

        let json = serde_json::to_value(&envelope).unwrap();
        assert!(json.get("id").is_none());
        assert_eq!(json["msg"]["type"], "refresh");
        assert_eq!(json["msg"]["viewId"], "files");
        assert!(json["msg"]["items"].is_null());
    }

    #[test]
    fn up_msg_parses_from_renderer_json() {
        let text = r#"{"id":7,"msg":{"type":"setSelectionAndFocus","viewId":"files","selectedHandles":["0/0:a"],"focusedHandle":"0/0:a"}}"#;
        let request: UpMsgRequest = serde_json::from_str(text).unwrap();

        assert_eq!(request.id, 7);
        assert_eq!(
            request.msg,
            UpMsg::SetSelectionAndFocus {
                view_id: "files".to_string(),
                selected_handles: vec!["0/0:a".to_string()],
                focused_handle: Some("0/0:a".to_string()),
            }
        );
    }

    #[test]
    fn reveal_options_default_and_clamp() {
        let options = RevealOptions::default();
        assert!(options.select);
        assert!(!options.focus);
        assert_eq!(options.expand, 0);

        let clamped = RevealOptions {
            expand: 9,
            ..options
        }
        .clamped();
        assert_eq!(clamped.expand, RevealOptions::MAX_EXPAND);
    }

    #[test]
    fn badge_equality_includes_tooltip() {
        let a = ViewBadge { value: 3, tooltip: "3 changes".to_string() };
        let b = ViewBadge { value: 3, tooltip: "three".to_string() };
        assert_ne!(a, b);
    }

    #[test]
    fn host_config_fills_defaults() {
        let config = HostConfig::from_toml_str(
            r#"
            [[views]]
            id = "files"
            root = "/tmp"
            "#,
        )
        .unwrap();

        assert_eq!(config.app.version, AppSection::CURRENT_VERSION);
        assert!(!config.app.needs_migration());
        assert_eq!(config.refresh.debounce_ms, 200);
        assert_eq!(config.server.port, 9231);
        let view = config.view("files").unwrap();
        assert!(view.watch);
        assert!(!view.accept_drops);
    }

    #[test]
    fn unknown_config_version_is_recreated() {
        let section = AppSection { version: "0.3.0".to_string() };
        assert!(!section.is_supported_version());
        assert_eq!(section.migration_strategy(), MigrationStrategy::Recreate);
    }

    #[test]
    fn basename_of_uri() {
        assert_eq!(uri_basename("file:///tmp/project/main.rs"), Some("main.rs"));
        assert_eq!(uri_basename("file:///tmp/project/"), Some("project"));
        assert_eq!(uri_basename(""), None);
    }
}
