//! Data roles for item models.
//!
//! Roles define what type of data is being requested or set on a model item.
//! Each item can have multiple pieces of data associated with it, distinguished
//! by their role.

use std::any::Any;
use std::sync::Arc;

/// Standard roles for accessing different aspects of item data.
///
/// When querying data from a model via `ItemModel::data()`, the role specifies
/// what information is being requested. Each item can have data for multiple
/// roles.
///
/// Proxies also use roles to identify columns: the column identity of a
/// source column is its horizontal header data under a caller-chosen role.
///
/// # Example
///
/// ```
/// use graft::model::ItemRole;
///
/// assert_eq!(ItemRole::User(3).value(), 259);
/// assert_eq!(ItemRole::from_value(259), Some(ItemRole::User(3)));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ItemRole {
    /// Primary text to display. Should return `String`.
    Display = 0,

    /// Icon or decoration to show.
    Decoration = 1,

    /// Value for editing (may be richer than display text). Type depends on item.
    Edit = 2,

    /// Tooltip text shown on hover. Should return `String`.
    ToolTip = 3,

    /// Text shown in status bar when item is selected. Should return `String`.
    StatusTip = 4,

    /// Extended "What's This?" help text. Should return `String`.
    WhatsThis = 5,

    /// Check state for checkable items. Should return `CheckState`.
    CheckState = 10,

    /// First role available for application-specific data.
    /// Use `ItemRole::User(n)` for custom roles where n >= 0.
    User(u32) = 256,
}

impl ItemRole {
    /// Returns `true` if this is a user-defined role.
    #[inline]
    pub fn is_user_role(&self) -> bool {
        matches!(self, ItemRole::User(_))
    }

    /// Returns the numeric value of this role.
    ///
    /// Standard roles have fixed values 0-255.
    /// User roles have values >= 256.
    pub fn value(&self) -> u32 {
        match self {
            ItemRole::Display => 0,
            ItemRole::Decoration => 1,
            ItemRole::Edit => 2,
            ItemRole::ToolTip => 3,
            ItemRole::StatusTip => 4,
            ItemRole::WhatsThis => 5,
            ItemRole::CheckState => 10,
            ItemRole::User(n) => 256 + n,
        }
    }

    /// Creates an ItemRole from a numeric value.
    ///
    /// Returns `None` for reserved but undefined role values.
    pub fn from_value(value: u32) -> Option<Self> {
        match value {
            0 => Some(ItemRole::Display),
            1 => Some(ItemRole::Decoration),
            2 => Some(ItemRole::Edit),
            3 => Some(ItemRole::ToolTip),
            4 => Some(ItemRole::StatusTip),
            5 => Some(ItemRole::WhatsThis),
            10 => Some(ItemRole::CheckState),
            6..=255 => None,
            n => Some(ItemRole::User(n - 256)),
        }
    }

    /// Returns the conventional name of a standard role.
    pub fn standard_name(&self) -> Option<&'static str> {
        match self {
            ItemRole::Display => Some("display"),
            ItemRole::Decoration => Some("decoration"),
            ItemRole::Edit => Some("edit"),
            ItemRole::ToolTip => Some("toolTip"),
            ItemRole::StatusTip => Some("statusTip"),
            ItemRole::WhatsThis => Some("whatsThis"),
            ItemRole::CheckState => Some("checkState"),
            ItemRole::User(_) => None,
        }
    }
}

/// Check state for checkable items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CheckState {
    /// Item is unchecked.
    #[default]
    Unchecked,
    /// Item is partially checked (for tri-state checkboxes).
    PartiallyChecked,
    /// Item is checked.
    Checked,
}

impl CheckState {
    /// Returns `true` if the item is checked (fully or partially).
    pub fn is_checked(&self) -> bool {
        !matches!(self, CheckState::Unchecked)
    }

    /// Toggles between Unchecked and Checked.
    /// PartiallyChecked becomes Unchecked.
    pub fn toggle(&self) -> CheckState {
        match self {
            CheckState::Unchecked => CheckState::Checked,
            CheckState::PartiallyChecked | CheckState::Checked => CheckState::Unchecked,
        }
    }
}

/// Type-erased container for item data.
///
/// `ItemData` can hold any type of data associated with an item role.
/// It provides type-safe access through the `as_*` methods and the
/// generic `downcast` method. Custom payloads are reference counted, so
/// cloning never loses data.
///
/// # Example
///
/// ```
/// use graft::model::ItemData;
///
/// let data = ItemData::from("Hello");
/// assert_eq!(data.as_string(), Some("Hello"));
///
/// let data = ItemData::new(42u32);
/// assert_eq!(data.downcast::<u32>(), Some(&42));
/// ```
#[derive(Debug, Clone, Default)]
pub enum ItemData {
    /// No data.
    #[default]
    None,
    /// String data (for Display, ToolTip, etc.).
    String(String),
    /// Integer data.
    Int(i64),
    /// Floating point data.
    Float(f64),
    /// Boolean data.
    Bool(bool),
    /// Check state data.
    CheckState(CheckState),
    /// Custom data (type-erased).
    Custom(Arc<dyn Any + Send + Sync>),
}

impl PartialEq for ItemData {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ItemData::None, ItemData::None) => true,
            (ItemData::String(a), ItemData::String(b)) => a == b,
            (ItemData::Int(a), ItemData::Int(b)) => a == b,
            (ItemData::Float(a), ItemData::Float(b)) => a == b,
            (ItemData::Bool(a), ItemData::Bool(b)) => a == b,
            (ItemData::CheckState(a), ItemData::CheckState(b)) => a == b,
            // Opaque payloads are only equal to themselves
            (ItemData::Custom(a), ItemData::Custom(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl ItemData {
    /// Creates new custom data from any type.
    pub fn new<T: Any + Send + Sync + 'static>(value: T) -> Self {
        ItemData::Custom(Arc::new(value))
    }

    /// Returns `true` if this is `ItemData::None`.
    pub fn is_none(&self) -> bool {
        matches!(self, ItemData::None)
    }

    /// Returns `true` if this contains some data.
    pub fn is_some(&self) -> bool {
        !self.is_none()
    }

    /// Attempts to get the data as a string slice.
    pub fn as_string(&self) -> Option<&str> {
        match self {
            ItemData::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Attempts to get the data as an owned string.
    pub fn into_string(self) -> Option<String> {
        match self {
            ItemData::String(s) => Some(s),
            _ => None,
        }
    }

    /// Attempts to get the data as an integer.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ItemData::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Attempts to get the data as a float.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            ItemData::Float(n) => Some(*n),
            _ => None,
        }
    }

    /// Attempts to get the data as a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ItemData::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Attempts to get the data as check state.
    pub fn as_check_state(&self) -> Option<CheckState> {
        match self {
            ItemData::CheckState(s) => Some(*s),
            _ => None,
        }
    }

    /// Attempts to downcast custom data to the specified type.
    pub fn downcast<T: Any>(&self) -> Option<&T> {
        match self {
            ItemData::Custom(data) => data.downcast_ref::<T>(),
            _ => None,
        }
    }
}

impl From<String> for ItemData {
    fn from(s: String) -> Self {
        ItemData::String(s)
    }
}

impl From<&str> for ItemData {
    fn from(s: &str) -> Self {
        ItemData::String(s.to_string())
    }
}

impl From<i64> for ItemData {
    fn from(n: i64) -> Self {
        ItemData::Int(n)
    }
}

impl From<i32> for ItemData {
    fn from(n: i32) -> Self {
        ItemData::Int(n as i64)
    }
}

impl From<f64> for ItemData {
    fn from(n: f64) -> Self {
        ItemData::Float(n)
    }
}

impl From<bool> for ItemData {
    fn from(b: bool) -> Self {
        ItemData::Bool(b)
    }
}

impl From<CheckState> for ItemData {
    fn from(s: CheckState) -> Self {
        ItemData::CheckState(s)
    }
}

impl From<Option<String>> for ItemData {
    fn from(opt: Option<String>) -> Self {
        match opt {
            Some(s) => ItemData::String(s),
            None => ItemData::None,
        }
    }
}
