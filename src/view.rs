//! Log view model
//!
//! Tagged-variant tree over the resolution log, rendered through a renderer
//! capability. The CLI uses the string renderer; a host UI would supply its
//! own.

use crate::apply::ResolvedDiagnostic;
use crate::store::display_path;
use std::path::PathBuf;

/// One node in the log view tree.
#[derive(Debug, Clone)]
pub enum ViewNode {
    /// Command entry points surfaced by the host layer.
    Controls,
    Summary {
        total: usize,
        fixed: usize,
        unfixed: usize,
    },
    FileGroup {
        file: PathBuf,
        children: Vec<ViewNode>,
    },
    DiagnosticLeaf(ResolvedDiagnostic),
}

/// Build the view tree: controls, summary, then one group per file in
/// first-recorded order.
pub fn build_tree(records: &[ResolvedDiagnostic]) -> Vec<ViewNode> {
    let fixed = records.iter().filter(|r| r.fixed).count();
    let mut nodes = vec![
        ViewNode::Controls,
        ViewNode::Summary {
            total: records.len(),
            fixed,
            unfixed: records.len() - fixed,
        },
    ];

    let mut groups: Vec<(PathBuf, Vec<ViewNode>)> = Vec::new();
    for record in records {
        let file = &record.diagnostic.file;
        match groups.iter_mut().find(|(f, _)| f == file) {
            Some((_, children)) => children.push(ViewNode::DiagnosticLeaf(record.clone())),
            None => groups.push((
                file.clone(),
                vec![ViewNode::DiagnosticLeaf(record.clone())],
            )),
        }
    }
    nodes.extend(
        groups
            .into_iter()
            .map(|(file, children)| ViewNode::FileGroup { file, children }),
    );
    nodes
}

/// Rendering capability the tree is generic over.
pub trait TreeRenderer {
    fn node(&mut self, depth: usize, text: &str);
}

/// Walk the tree depth-first into a renderer.
pub fn render(nodes: &[ViewNode], show_full_path: bool, out: &mut impl TreeRenderer) {
    render_at(nodes, 0, show_full_path, out);
}

fn render_at(nodes: &[ViewNode], depth: usize, show_full_path: bool, out: &mut impl TreeRenderer) {
    for node in nodes {
        match node {
            ViewNode::Controls => out.node(depth, "[run] [stop] [clear-log] [export-log]"),
            ViewNode::Summary {
                total,
                fixed,
                unfixed,
            } => out.node(
                depth,
                &format!("{total} diagnostic(s): {fixed} fixed, {unfixed} unfixed"),
            ),
            ViewNode::FileGroup { file, children } => {
                out.node(depth, &display_path(file, show_full_path));
                render_at(children, depth + 1, show_full_path, out);
            }
            ViewNode::DiagnosticLeaf(record) => {
                let d = &record.diagnostic;
                out.node(
                    depth,
                    &format!(
                        "{}:{} {} {} ({})",
                        d.line,
                        d.column,
                        d.code,
                        d.message,
                        if record.fixed { "Fixed" } else { "Unfixed" }
                    ),
                );
            }
        }
    }
}

/// Renderer that indents into plain text lines.
#[derive(Debug, Default)]
pub struct StringRenderer {
    lines: Vec<String>,
}

impl StringRenderer {
    pub fn into_string(self) -> String {
        self.lines.join("\n")
    }
}

impl TreeRenderer for StringRenderer {
    fn node(&mut self, depth: usize, text: &str) {
        self.lines.push(format!("{}{}", "  ".repeat(depth), text));
    }
}
