//! Text dumps of item model trees.
//!
//! Use [`ModelTreeDebug`] to see what a proxy exposes:
//!
//! ```
//! use graft::model::{ModelTreeDebug, TreeModel};
//!
//! let model = TreeModel::<String>::new();
//! let root = model.add_root("root".to_string());
//! model.add_child(root, "leaf".to_string());
//!
//! let dump = ModelTreeDebug::new().format(&model);
//! assert!(dump.contains("leaf"));
//! ```

use std::fmt::Write;

use super::index::ModelIndex;
use super::traits::ItemModel;

/// Style options for tree dumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TreeStyle {
    /// ASCII characters for tree branches.
    Ascii,
    /// Unicode box-drawing characters.
    #[default]
    Unicode,
    /// Compact single-line representation.
    Compact,
}

/// Configuration for tree dumps.
#[derive(Debug, Clone)]
pub struct TreeFormatOptions {
    /// The style of tree visualization.
    pub style: TreeStyle,
    /// Whether to show node ids reported by the model.
    pub show_ids: bool,
    /// Whether to show every column instead of column 0 only.
    pub show_columns: bool,
    /// Maximum depth to traverse (None for unlimited).
    pub max_depth: Option<usize>,
    /// Indent size for each level.
    pub indent_size: usize,
}

impl Default for TreeFormatOptions {
    fn default() -> Self {
        Self {
            style: TreeStyle::default(),
            show_ids: false,
            show_columns: false,
            max_depth: None,
            indent_size: 2,
        }
    }
}

impl TreeFormatOptions {
    /// Create options for detailed output.
    pub fn detailed() -> Self {
        Self {
            show_ids: true,
            show_columns: true,
            ..Default::default()
        }
    }
}

/// Renders the rows a model exposes as an indented tree.
///
/// Walking a proxy creates mapping entries for every visited node, exactly
/// like a view expanding the whole tree would.
#[derive(Debug, Clone, Default)]
pub struct ModelTreeDebug {
    options: TreeFormatOptions,
}

impl ModelTreeDebug {
    /// Create a new dumper with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a dumper with custom options.
    pub fn with_options(options: TreeFormatOptions) -> Self {
        Self { options }
    }

    /// Format every row of the model.
    pub fn format(&self, model: &dyn ItemModel) -> String {
        self.format_subtree(model, &ModelIndex::invalid())
    }

    /// Format the rows below `parent`.
    pub fn format_subtree(&self, model: &dyn ItemModel, parent: &ModelIndex) -> String {
        let mut output = String::new();
        let rows = model.row_count(parent);
        if rows == 0 {
            output.push_str("(empty)\n");
        }
        for row in 0..rows {
            let index = model.index(row, 0, parent);
            self.format_node(model, &index, 1, row + 1 == rows, &mut output);
        }
        output
    }

    fn format_node(
        &self,
        model: &dyn ItemModel,
        index: &ModelIndex,
        depth: usize,
        is_last: bool,
        output: &mut String,
    ) {
        if let Some(max) = self.options.max_depth
            && depth > max
        {
            return;
        }

        output.push_str(&self.build_prefix(depth, is_last));
        output.push_str(&cell_text(model, index));
        if self.options.show_columns {
            let parent = model.parent(index);
            for column in 1..model.column_count(&parent) {
                let cell = model.index(index.row(), column, &parent);
                let _ = write!(output, " | {}", cell_text(model, &cell));
            }
        }
        if self.options.show_ids
            && let Some(id) = model.node_id(index)
        {
            let _ = write!(output, " [{id}]");
        }
        output.push('\n');

        let rows = model.row_count(index);
        for row in 0..rows {
            let child = model.index(row, 0, index);
            self.format_node(model, &child, depth + 1, row + 1 == rows, output);
        }
    }

    /// Build the prefix string for a tree node.
    fn build_prefix(&self, depth: usize, is_last: bool) -> String {
        let (branch, corner, last) = match self.options.style {
            TreeStyle::Ascii => ("|", "+-- ", "`-- "),
            TreeStyle::Unicode => ("\u{2502}", "\u{251c}\u{2500}\u{2500} ", "\u{2514}\u{2500}\u{2500} "),
            TreeStyle::Compact => ("", "- ", "- "),
        };

        let mut prefix = String::new();
        for _ in 1..depth {
            prefix.push_str(branch);
            prefix.push_str(&" ".repeat(self.options.indent_size));
        }
        prefix.push_str(if is_last { last } else { corner });
        prefix
    }
}

fn cell_text(model: &dyn ItemModel, index: &ModelIndex) -> String {
    match model.display_text(index) {
        Some(text) if !text.is_empty() => text,
        _ => "(none)".to_string(),
    }
}
