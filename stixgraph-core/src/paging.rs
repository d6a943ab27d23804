//! Cursor-based paging
//!
//! Lists come back as relay-style connections: a page of edges, each with
//! an opaque cursor, plus `page_info` telling whether more pages exist.

use serde::{Deserialize, Serialize};

use crate::DEFAULT_PAGE_SIZE;

/// Field a listing is ordered by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderBy {
    #[default]
    CreatedAt,
    Name,
}

/// Arguments for one page request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagingArgs {
    /// Maximum edges to return
    pub first: usize,
    /// Resume after this cursor
    pub after: Option<String>,
    pub order_by: OrderBy,
    pub order_asc: bool,
    /// Case-insensitive substring matched against the searchable fields
    pub search: Option<String>,
}

impl Default for PagingArgs {
    fn default() -> Self {
        Self {
            first: DEFAULT_PAGE_SIZE,
            after: None,
            order_by: OrderBy::CreatedAt,
            order_asc: true,
            search: None,
        }
    }
}

impl PagingArgs {
    pub fn first(mut self, first: usize) -> Self {
        self.first = first;
        self
    }

    pub fn after(mut self, cursor: Option<String>) -> Self {
        self.after = cursor;
        self
    }

    pub fn search(mut self, search: &str) -> Self {
        self.search = Some(search.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge<T> {
    pub node: T,
    pub cursor: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    pub start_cursor: Option<String>,
    pub end_cursor: Option<String>,
    pub has_next_page: bool,
    pub has_previous_page: bool,
    pub global_count: usize,
}

/// One page of a listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection<T> {
    pub edges: Vec<Edge<T>>,
    pub page_info: PageInfo,
}

impl<T> Connection<T> {
    pub fn empty() -> Self {
        Self {
            edges: Vec::new(),
            page_info: PageInfo::default(),
        }
    }

    /// Cursor of the last edge on this page
    pub fn last_cursor(&self) -> Option<&str> {
        self.edges.last().map(|e| e.cursor.as_str())
    }

    /// Convert every node, dropping edges the conversion rejects
    pub fn filter_map<U, F>(self, f: F) -> Connection<U>
    where
        F: Fn(T) -> Option<U>,
    {
        Connection {
            edges: self
                .edges
                .into_iter()
                .filter_map(|e| {
                    let cursor = e.cursor;
                    f(e.node).map(|node| Edge { node, cursor })
                })
                .collect(),
            page_info: self.page_info,
        }
    }

    pub fn nodes(&self) -> impl Iterator<Item = &T> {
        self.edges.iter().map(|e| &e.node)
    }
}

/// Wrap an already-materialised list as a connection
///
/// `limit == 0` means "no limit": every node is returned on one page.
pub fn build_pagination<T>(
    limit: usize,
    offset: usize,
    nodes: Vec<T>,
    global_count: usize,
) -> Connection<T> {
    let total = nodes.len();
    let edges: Vec<Edge<T>> = nodes
        .into_iter()
        .enumerate()
        .skip(offset)
        .take(if limit == 0 { usize::MAX } else { limit })
        .map(|(idx, node)| Edge {
            node,
            cursor: offset_cursor(idx + 1),
        })
        .collect();

    let end = offset + edges.len();
    Connection {
        page_info: PageInfo {
            start_cursor: edges.first().map(|e| e.cursor.clone()),
            end_cursor: edges.last().map(|e| e.cursor.clone()),
            has_next_page: end < total,
            has_previous_page: offset > 0,
            global_count,
        },
        edges,
    }
}

fn offset_cursor(position: usize) -> String {
    format!("offset:{position}")
}
