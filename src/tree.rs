use crate::error::{ImportError, TreeError};
use serde_json::{Map, Value};
use std::fmt;

pub const ROOT_NAME: &str = "root";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileNode {
    File {
        name: String,
        path: String,
        content: String,
    },
    Directory {
        name: String,
        path: String,
        children: Vec<FileNode>,
    },
}

impl FileNode {
    pub fn name(&self) -> &str {
        match self {
            FileNode::File { name, .. } | FileNode::Directory { name, .. } => name,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            FileNode::File { path, .. } | FileNode::Directory { path, .. } => path,
        }
    }
}

/// A project layout hanging off the synthetic `root` directory.
///
/// Only the root's children are stored; the root itself has no name in any
/// node path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectTree {
    children: Vec<FileNode>,
}

impl ProjectTree {
    pub fn children(&self) -> &[FileNode] {
        &self.children
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Parses a JSON object of `path -> content` and builds a tree from it.
    ///
    /// Nothing is returned unless the whole input is accepted, so a caller that
    /// only swaps its tree on `Ok` keeps its previous state on failure.
    pub fn import(input: &str) -> Result<Self, ImportError> {
        let value: Value = serde_json::from_str(input)?;
        let Value::Object(map) = value else {
            return Err(ImportError::NotAnObject);
        };
        Ok(Self::from_artifacts(&map)?)
    }

    /// Builds a tree from a flat artifact map, then applies root promotion.
    ///
    /// Non-string values are stored pretty-printed. A later entry for the same
    /// path overwrites the earlier content in place.
    pub fn from_artifacts(artifacts: &Map<String, Value>) -> Result<Self, TreeError> {
        let mut children = Vec::new();
        for (path, value) in artifacts {
            insert(&mut children, path, coerce_content(value))?;
        }
        Ok(Self {
            children: promote_main(children),
        })
    }

    pub fn contains_file(&self, path: &str) -> bool {
        self.files().iter().any(|(file, _)| file == path)
    }

    pub fn content(&self, path: &str) -> Option<&str> {
        self.files()
            .into_iter()
            .find(|(file, _)| file == path)
            .map(|(_, content)| content)
    }

    /// Returns a copy with the content of the file at `path` replaced.
    ///
    /// A path that matches no file (including a directory path) leaves the
    /// copy identical to `self`.
    pub fn with_content(&self, path: &str, content: impl Into<String>) -> ProjectTree {
        let mut tree = self.clone();
        tree.set_content(path, content);
        tree
    }

    /// In-place variant of [`ProjectTree::with_content`]. Returns whether a
    /// file matched.
    pub fn set_content(&mut self, path: &str, content: impl Into<String>) -> bool {
        match file_content_mut(&mut self.children, path) {
            Some(slot) => {
                *slot = content.into();
                true
            }
            None => false,
        }
    }

    /// Every file as `(relative path, content)`, depth-first pre-order in
    /// stored child order.
    pub fn files(&self) -> Vec<(String, &str)> {
        let mut files = Vec::new();
        collect_files(&self.children, "", &mut files);
        files
    }

    pub fn to_artifacts(&self) -> Map<String, Value> {
        self.files()
            .into_iter()
            .map(|(path, content)| (path, Value::String(content.to_string())))
            .collect()
    }
}

fn coerce_content(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

fn insert(children: &mut Vec<FileNode>, path: &str, content: String) -> Result<(), TreeError> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let Some((file_name, dirs)) = segments.split_last() else {
        return Err(TreeError::EmptyPath);
    };

    let mut level = children;
    for (depth, segment) in dirs.iter().enumerate() {
        let dir_path = segments[..=depth].join("/");
        let idx = match level.iter().position(|node| node.name() == *segment) {
            Some(idx) => idx,
            None => {
                level.push(FileNode::Directory {
                    name: segment.to_string(),
                    path: dir_path.clone(),
                    children: Vec::new(),
                });
                level.len() - 1
            }
        };
        level = match &mut level[idx] {
            FileNode::Directory { children, .. } => children,
            FileNode::File { .. } => return Err(TreeError::PathConflict { path: dir_path }),
        };
    }

    let file_path = segments.join("/");
    match level.iter_mut().find(|node| node.name() == *file_name) {
        Some(FileNode::File {
            content: existing, ..
        }) => *existing = content,
        Some(FileNode::Directory { .. }) => {
            return Err(TreeError::PathConflict { path: file_path });
        }
        None => level.push(FileNode::File {
            name: file_name.to_string(),
            path: file_path,
            content,
        }),
    }
    Ok(())
}

// Generated projects often arrive wrapped in a single `Main/` directory.
fn promote_main(mut children: Vec<FileNode>) -> Vec<FileNode> {
    let wrapped = children.len() == 1
        && matches!(
            &children[0],
            FileNode::Directory { name, .. } if name.eq_ignore_ascii_case("main")
        );
    if !wrapped {
        return children;
    }

    match children.pop() {
        Some(FileNode::Directory {
            name,
            children: inner,
            ..
        }) => {
            let prefix = format!("{name}/");
            inner
                .into_iter()
                .map(|node| strip_path_prefix(node, &prefix))
                .collect()
        }
        other => other.into_iter().collect(),
    }
}

fn strip_path_prefix(node: FileNode, prefix: &str) -> FileNode {
    match node {
        FileNode::File {
            name,
            path,
            content,
        } => FileNode::File {
            name,
            path: strip(&path, prefix),
            content,
        },
        FileNode::Directory {
            name,
            path,
            children,
        } => FileNode::Directory {
            name,
            path: strip(&path, prefix),
            children: children
                .into_iter()
                .map(|child| strip_path_prefix(child, prefix))
                .collect(),
        },
    }
}

fn strip(path: &str, prefix: &str) -> String {
    path.strip_prefix(prefix).unwrap_or(path).to_string()
}

fn file_content_mut<'a>(nodes: &'a mut [FileNode], target: &str) -> Option<&'a mut String> {
    for node in nodes {
        match node {
            FileNode::File { path, content, .. } if path.as_str() == target => {
                return Some(content);
            }
            FileNode::Directory { children, .. } => {
                if let Some(found) = file_content_mut(children, target) {
                    return Some(found);
                }
            }
            FileNode::File { .. } => {}
        }
    }
    None
}

fn collect_files<'a>(nodes: &'a [FileNode], parent: &str, out: &mut Vec<(String, &'a str)>) {
    for node in nodes {
        let path = if parent.is_empty() {
            node.name().to_string()
        } else {
            format!("{parent}/{}", node.name())
        };
        match node {
            FileNode::File { content, .. } => out.push((path, content.as_str())),
            FileNode::Directory { children, .. } => collect_files(children, &path, out),
        }
    }
}

impl fmt::Display for ProjectTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{ROOT_NAME}/")?;
        write_nodes(f, &self.children, "")
    }
}

fn write_nodes(f: &mut fmt::Formatter<'_>, nodes: &[FileNode], indent: &str) -> fmt::Result {
    for (i, node) in nodes.iter().enumerate() {
        let last = i + 1 == nodes.len();
        let branch = if last { "└── " } else { "├── " };
        match node {
            FileNode::File { name, content, .. } => {
                writeln!(f, "{indent}{branch}{name} ({} bytes)", content.len())?;
            }
            FileNode::Directory { name, children, .. } => {
                writeln!(f, "{indent}{branch}{name}/")?;
                let nested = format!("{indent}{}", if last { "    " } else { "│   " });
                write_nodes(f, children, &nested)?;
            }
        }
    }
    Ok(())
}
