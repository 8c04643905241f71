//! Row Decoration Pipeline
//!
//! A fixed, ordered list of named decorators. Each one looks at an item and
//! returns its own field set; the pipeline merges the sets into the row in
//! registration order, later stages overriding earlier ones on conflicts.

use super::{RowData, RowFields};
use crate::data::GridItem;
use crate::error::{Error, Result};
use tracing::debug;

/// Anything that can fill in a row for an item
pub trait RowDecorator<T: GridItem> {
    fn decorate(&self, item: &T, row: &mut RowData);
}

/// Leaves rows as produced by the communicator (key and hierarchy metadata only)
pub struct NoDecoration;

impl<T: GridItem> RowDecorator<T> for NoDecoration {
    fn decorate(&self, _item: &T, _row: &mut RowData) {}
}

type Stage<T> = Box<dyn Fn(&T) -> RowFields + Send>;

/// Named row decorators applied in order
pub struct RowPipeline<T: GridItem> {
    stages: Vec<(String, Stage<T>)>,
}

impl<T: GridItem> RowPipeline<T> {
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    /// Append a named stage; names must be unique
    pub fn add(
        &mut self,
        name: impl Into<String>,
        stage: impl Fn(&T) -> RowFields + Send + 'static,
    ) -> Result<()> {
        let name = name.into();
        if self.stages.iter().any(|(existing, _)| existing == &name) {
            return Err(Error::invalid_state(format!(
                "Row decorator '{name}' is already registered"
            )));
        }
        self.stages.push((name, Box::new(stage)));
        Ok(())
    }

    /// Remove a stage by name
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.stages.len();
        self.stages.retain(|(existing, _)| existing != name);
        self.stages.len() != before
    }

    /// Stage names in application order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl<T: GridItem> Default for RowPipeline<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: GridItem> RowDecorator<T> for RowPipeline<T> {
    fn decorate(&self, item: &T, row: &mut RowData) {
        for (name, stage) in &self.stages {
            for (field, value) in stage(item) {
                if row.fields.insert(field.clone(), value).is_some() {
                    debug!("Row decorator '{}' overrides field '{}'", name, field);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn fields(pairs: &[(&str, Value)]) -> RowFields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_stages_merge_in_order() {
        let mut pipeline = RowPipeline::<u32>::new();
        pipeline
            .add("value", |n: &u32| fields(&[("value", Value::from(*n)), ("label", Value::from("first"))]))
            .expect("add");
        pipeline
            .add("label", |_: &u32| fields(&[("label", Value::from("second"))]))
            .expect("add");

        let mut row = RowData::new("1");
        pipeline.decorate(&5, &mut row);
        assert_eq!(row.fields["value"], 5);
        assert_eq!(row.fields["label"], "second");
        assert_eq!(pipeline.names().collect::<Vec<_>>(), vec!["value", "label"]);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut pipeline = RowPipeline::<u32>::new();
        pipeline.add("a", |_: &u32| RowFields::new()).expect("add");
        let result = pipeline.add("a", |_: &u32| RowFields::new());
        assert!(matches!(result, Err(Error::InvalidState { .. })));
    }

    #[test]
    fn test_remove_stage() {
        let mut pipeline = RowPipeline::<u32>::new();
        pipeline.add("a", |_: &u32| RowFields::new()).expect("add");
        assert!(pipeline.remove("a"));
        assert!(!pipeline.remove("a"));
        assert!(pipeline.is_empty());
    }
}
