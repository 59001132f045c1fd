//! In-memory `QueryRunner` that records statements and replays canned rows.

#![allow(dead_code)]

use pgmodel::{OrmResult, QueryRunner, Row, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Default)]
pub struct Recorder {
    statements: Mutex<Vec<String>>,
    responses: Mutex<VecDeque<Vec<Row>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the rows returned by the next statement. Statements without a
    /// queued response return no rows.
    pub fn respond(&self, rows: Vec<Row>) -> &Self {
        self.responses.lock().unwrap().push_back(rows);
        self
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<String> {
        self.statements.lock().unwrap().last().cloned()
    }
}

impl QueryRunner for Recorder {
    async fn query(&self, sql: &str) -> OrmResult<Vec<Row>> {
        self.statements.lock().unwrap().push(sql.to_string());
        Ok(self.responses.lock().unwrap().pop_front().unwrap_or_default())
    }
}

/// Build text rows the way the simple-query protocol returns them.
/// `None` cells are SQL NULL.
pub fn text_rows(columns: &[&str], rows: &[&[Option<&str>]]) -> Vec<Row> {
    let columns: Arc<[String]> = columns.iter().map(|c| c.to_string()).collect();
    rows.iter()
        .map(|cells| {
            let values = cells
                .iter()
                .map(|cell| match cell {
                    Some(s) => Value::Text(s.to_string()),
                    None => Value::Null,
                })
                .collect();
            Row::new(Arc::clone(&columns), values)
        })
        .collect()
}
