//! Column
//!
//! A column is a plain value: an id, a header, a renderer strategy and its
//! sorting capabilities. Renderers differ only in the fields they contribute
//! to a row.

use crate::communication::RowFields;
use crate::data::{Comparator, GridItem, QuerySortOrder, SortDirection};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Produces a plain string for an item
pub type TextProvider<T> = Arc<dyn Fn(&T) -> String + Send + Sync>;

/// Produces an arbitrary JSON value for an item
pub type ValueProvider<T> = Arc<dyn Fn(&T) -> Value + Send + Sync>;

/// How a column turns an item into row fields
#[derive(Clone)]
pub enum Renderer<T> {
    /// Plain text, stored under the column id
    Text(TextProvider<T>),
    /// Client-side template; each property is stored as `<column>_<property>`
    Template {
        template: String,
        properties: Vec<(String, ValueProvider<T>)>,
    },
    /// Client component state, stored under the column id
    Component(ValueProvider<T>),
}

impl<T> Renderer<T> {
    pub fn text(f: impl Fn(&T) -> String + Send + Sync + 'static) -> Self {
        Renderer::Text(Arc::new(f))
    }

    pub fn template(template: impl Into<String>) -> Self {
        Renderer::Template {
            template: template.into(),
            properties: Vec::new(),
        }
    }

    /// Add a template property; ignored for other renderers
    pub fn with_property(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&T) -> Value + Send + Sync + 'static,
    ) -> Self {
        if let Renderer::Template { properties, .. } = &mut self {
            properties.push((name.into(), Arc::new(f)));
        }
        self
    }

    pub fn component(f: impl Fn(&T) -> Value + Send + Sync + 'static) -> Self {
        Renderer::Component(Arc::new(f))
    }

    fn kind(&self) -> &'static str {
        match self {
            Renderer::Text(_) => "text",
            Renderer::Template { .. } => "template",
            Renderer::Component(_) => "component",
        }
    }
}

/// Client-facing description of a column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ColumnInfo {
    pub id: String,
    pub header: String,
    pub renderer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    pub sortable: bool,
}

/// A grid column
#[derive(Clone)]
pub struct Column<T: GridItem> {
    id: String,
    header: String,
    renderer: Renderer<T>,
    sortable: bool,
    comparator: Option<Comparator<T>>,
    sort_properties: Vec<String>,
}

impl<T: GridItem> Column<T> {
    pub fn new(id: impl Into<String>, renderer: Renderer<T>) -> Self {
        let id = id.into();
        Self {
            header: id.clone(),
            id,
            renderer,
            sortable: true,
            comparator: None,
            sort_properties: Vec::new(),
        }
    }

    /// Text column from a string provider
    pub fn text(id: impl Into<String>, f: impl Fn(&T) -> String + Send + Sync + 'static) -> Self {
        Self::new(id, Renderer::text(f))
    }

    pub fn with_header(mut self, header: impl Into<String>) -> Self {
        self.header = header.into();
        self
    }

    pub fn with_sortable(mut self, sortable: bool) -> Self {
        self.sortable = sortable;
        self
    }

    pub fn with_comparator(mut self, f: impl Fn(&T, &T) -> std::cmp::Ordering + Send + Sync + 'static) -> Self {
        self.comparator = Some(Arc::new(f));
        self
    }

    /// Properties forwarded to back-end providers when sorting by this column
    pub fn with_sort_properties<S: Into<String>>(mut self, properties: impl IntoIterator<Item = S>) -> Self {
        self.sort_properties = properties.into_iter().map(Into::into).collect();
        self
    }

    // ==================== Getters ====================

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn header(&self) -> &str {
        &self.header
    }

    pub fn renderer(&self) -> &Renderer<T> {
        &self.renderer
    }

    pub fn renderer_kind(&self) -> &'static str {
        self.renderer.kind()
    }

    pub fn is_sortable(&self) -> bool {
        self.sortable
    }

    pub fn sort_properties(&self) -> &[String] {
        &self.sort_properties
    }

    /// In-memory comparator: the explicit one, or rendered text for text columns
    pub fn comparator(&self) -> Option<Comparator<T>> {
        if let Some(comparator) = &self.comparator {
            return Some(comparator.clone());
        }
        match &self.renderer {
            Renderer::Text(text) => {
                let text = text.clone();
                Some(Arc::new(move |a: &T, b: &T| text(a).cmp(&text(b))))
            }
            _ => None,
        }
    }

    /// Back-end sort orders for this column in `direction`
    pub fn sort_orders(&self, direction: SortDirection) -> Vec<QuerySortOrder> {
        self.sort_properties
            .iter()
            .map(|property| QuerySortOrder {
                property: property.clone(),
                direction,
            })
            .collect()
    }

    /// Whether the column can sort with the given kind of provider
    pub fn can_sort(&self, in_memory: bool) -> bool {
        self.sortable
            && if in_memory {
                self.comparator().is_some()
            } else {
                !self.sort_properties.is_empty()
            }
    }

    /// Description sent to the client when the column set changes
    pub fn info(&self, in_memory: bool) -> ColumnInfo {
        let template = match &self.renderer {
            Renderer::Template { template, .. } => Some(template.clone()),
            _ => None,
        };
        ColumnInfo {
            id: self.id.clone(),
            header: self.header.clone(),
            renderer: self.renderer.kind().to_string(),
            template,
            sortable: self.can_sort(in_memory),
        }
    }

    /// Fields this column contributes to an item's row
    pub fn render(&self, item: &T) -> RowFields {
        let mut fields = RowFields::new();
        match &self.renderer {
            Renderer::Text(text) => {
                fields.insert(self.id.clone(), Value::from(text(item)));
            }
            Renderer::Template { properties, .. } => {
                for (name, value) in properties {
                    fields.insert(format!("{}_{}", self.id, name), value(item));
                }
            }
            Renderer::Component(value) => {
                fields.insert(self.id.clone(), value(item));
            }
        }
        fields
    }
}

impl<T: GridItem> std::fmt::Debug for Column<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Column")
            .field("id", &self.id)
            .field("header", &self.header)
            .field("renderer", &self.renderer.kind())
            .field("sortable", &self.sortable)
            .field("sort_properties", &self.sort_properties)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;

    #[test]
    fn test_text_column_sorts_by_rendered_text() {
        let column = Column::<u32>::text("name", |n| format!("item {n}"));
        let comparator = column.comparator().expect("text comparator");
        assert_eq!(comparator(&10, &9), Ordering::Less);
        assert!(column.can_sort(true));
        assert!(!column.can_sort(false));
    }

    #[test]
    fn test_explicit_comparator_wins() {
        let column = Column::<u32>::text("name", |n| format!("item {n}")).with_comparator(|a, b| a.cmp(b));
        let comparator = column.comparator().expect("comparator");
        assert_eq!(comparator(&10, &9), Ordering::Greater);
    }

    #[test]
    fn test_template_fields_are_prefixed() {
        let column = Column::<u32>::new(
            "badge",
            Renderer::template("<b>[[item.badge_value]]</b>")
                .with_property("value", |n: &u32| Value::from(*n * 2))
                .with_property("odd", |n: &u32| Value::from(n % 2 == 1)),
        );
        let fields = column.render(&3);
        assert_eq!(fields["badge_value"], 6);
        assert_eq!(fields["badge_odd"], true);
        assert!(column.comparator().is_none());
        assert!(!column.can_sort(true));
        let info = column.info(true);
        assert_eq!(info.renderer, "template");
        assert_eq!(info.template.as_deref(), Some("<b>[[item.badge_value]]</b>"));
    }

    #[test]
    fn test_back_end_sort_orders() {
        let column = Column::<u32>::new("age", Renderer::component(|n: &u32| Value::from(*n)))
            .with_sort_properties(["age", "id"]);
        let orders = column.sort_orders(SortDirection::Descending);
        assert_eq!(orders, vec![QuerySortOrder::desc("age"), QuerySortOrder::desc("id")]);
        assert!(column.can_sort(false));
        assert!(!column.with_sortable(false).can_sort(false));
    }
}
