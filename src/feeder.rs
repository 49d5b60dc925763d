use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::formatter::{Category, JsonFormatter, Point};

/// Приемник готовых записей.
#[async_trait]
pub trait Feeder: Send + Sync {
    async fn feed(&self, category: Category, points: Vec<Point>) -> Result<()>;
}

/// Печатает записи в stdout, по одной JSON строке на запись.
#[derive(Debug, Default, Clone)]
pub struct LogFeeder;

#[async_trait]
impl Feeder for LogFeeder {
    async fn feed(&self, category: Category, points: Vec<Point>) -> Result<()> {
        debug!(?category, count = points.len(), "Отправка записей");
        for point in &points {
            println!("{}", JsonFormatter::to_json_compact(point)?);
        }
        Ok(())
    }
}

/// Хранит записи в памяти; используется в тестах.
#[derive(Debug, Default, Clone)]
pub struct MemoryFeeder {
    batches: Arc<Mutex<Vec<(Category, Vec<Point>)>>>,
}

impl MemoryFeeder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> Vec<(Category, Vec<Point>)> {
        self.batches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Все записи категории, в порядке поступления.
    pub fn points(&self, category: Category) -> Vec<Point> {
        self.batches()
            .into_iter()
            .filter(|(c, _)| *c == category)
            .flat_map(|(_, points)| points)
            .collect()
    }
}

#[async_trait]
impl Feeder for MemoryFeeder {
    async fn feed(&self, category: Category, points: Vec<Point>) -> Result<()> {
        self.batches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((category, points));
        Ok(())
    }
}
