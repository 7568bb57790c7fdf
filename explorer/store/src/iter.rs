use crate::{store::object_from_row, StoreError};
use explorer_core::Object;
use parking_lot::Mutex;
use rusqlite::{params_from_iter, types::Value, Connection};
use std::{collections::VecDeque, sync::Arc};

/// Lazily iterates over the results of an object query.
///
/// Rows are read a page at a time, so the store's connection is only held while a page is
/// fetched. Writes that land between pages may shift later pages; an iterator cannot be resumed
/// once closed, and a fresh query must be issued instead.
pub struct ObjectIter {
    conn: Arc<Mutex<Connection>>,
    sql: String,
    params: Vec<Value>,
    offset: usize,
    remaining: Option<usize>,
    page: VecDeque<Object>,
    done: bool,
}

const PAGE_SIZE: usize = 256;

impl ObjectIter {
    pub(crate) fn new(
        conn: Arc<Mutex<Connection>>,
        sql: String,
        params: Vec<Value>,
        offset: usize,
        limit: Option<usize>,
    ) -> Self {
        Self {
            conn,
            sql,
            params,
            offset,
            remaining: limit,
            page: VecDeque::new(),
            done: limit == Some(0),
        }
    }

    pub(crate) fn empty(conn: Arc<Mutex<Connection>>) -> Self {
        Self::new(conn, String::new(), Vec::new(), 0, Some(0))
    }

    /// Iterates over rows that have already been read.
    pub(crate) fn buffered(conn: Arc<Mutex<Connection>>, objects: VecDeque<Object>) -> Self {
        Self {
            page: objects,
            done: true,
            ..Self::empty(conn)
        }
    }

    /// Stops the iteration, releasing any buffered rows.
    pub fn close(&mut self) {
        self.done = true;
        self.page.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.done && self.page.is_empty()
    }

    fn fetch_page(&mut self) -> Result<(), StoreError> {
        let size = self
            .remaining
            .map(|n| n.min(PAGE_SIZE))
            .unwrap_or(PAGE_SIZE);
        let sql = format!("{} LIMIT {} OFFSET {}", self.sql, size, self.offset);

        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(self.params.iter()), object_from_row)?
            .collect::<Result<VecDeque<_>, _>>()?;
        drop(stmt);
        drop(conn);

        let n = rows.len();
        self.offset += n;
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= n;
            if *remaining == 0 {
                self.done = true;
            }
        }
        if n < size {
            self.done = true;
        }
        self.page = rows;
        Ok(())
    }
}

impl Iterator for ObjectIter {
    type Item = Result<Object, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.page.is_empty() {
            if self.done {
                return None;
            }
            if let Err(error) = self.fetch_page() {
                self.close();
                return Some(Err(error));
            }
        }
        self.page.pop_front().map(Ok)
    }
}

impl std::fmt::Debug for ObjectIter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectIter")
            .field("sql", &self.sql)
            .field("offset", &self.offset)
            .field("remaining", &self.remaining)
            .field("done", &self.done)
            .finish()
    }
}
