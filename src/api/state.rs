//! Shared state for API handlers.

use crate::search::QueryEngine;
use crate::store::Store;

/// Everything the query routes need.
pub struct ApiState {
    pub engine: QueryEngine,
    pub store: Store,
}

impl ApiState {
    pub fn new(engine: QueryEngine, store: Store) -> Self {
        Self { engine, store }
    }
}
