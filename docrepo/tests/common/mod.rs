#![allow(dead_code)]

use std::sync::Arc;

use docrepo::{memory::InMemoryStore, prelude::*};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Entity)]
pub struct Customer {
    pub id: i64,
    pub name: String,
    pub age: i32,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Customer {
    pub fn new(name: &str, age: i32) -> Self {
        Self { id: 0, name: name.to_string(), age, tags: Vec::new() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Entity)]
#[entity(collection = "purchase_orders")]
pub struct Order {
    #[entity(id)]
    pub number: String,
    pub customer_id: i64,
    pub total: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Entity)]
pub struct Ticket {
    pub id: bson::Uuid,
    pub title: String,
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
        .try_init();
}

/// A context over a fresh store with its own name resolver.
pub fn context() -> DocumentContext<InMemoryStore> {
    init_tracing();

    DocumentContext::new(InMemoryStore::new())
        .with_resolver(Arc::new(CollectionNameResolver::new(NamingConvention::default())))
}
