use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::WorkflowError;

/// One label from the category enumeration.
///
/// A `Category` on its own is just a label; membership is checked against a
/// [`CategorySet`] by [`crate::select`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Category(String);

impl Category {
  pub fn new(label: impl Into<String>) -> Self {
    Self(label.into())
  }

  pub fn label(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for Category {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// The closed, non-empty category enumeration of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct CategorySet {
  categories: Vec<Category>,
}

impl CategorySet {
  /// Build a set from labels. Order is preserved.
  pub fn new<I, S>(labels: I) -> Result<Self, WorkflowError>
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let labels: Vec<String> = labels.into_iter().map(Into::into).collect();
    medalflow_config::validate_categories(&labels)?;

    Ok(Self {
      categories: labels.into_iter().map(Category).collect(),
    })
  }

  pub fn contains(&self, category: &Category) -> bool {
    self.categories.contains(category)
  }

  /// Look up a member by label.
  pub fn get(&self, label: &str) -> Option<&Category> {
    self.categories.iter().find(|c| c.label() == label)
  }

  pub fn as_slice(&self) -> &[Category] {
    &self.categories
  }

  pub fn iter(&self) -> std::slice::Iter<'_, Category> {
    self.categories.iter()
  }

  pub fn len(&self) -> usize {
    self.categories.len()
  }

  /// Always false; kept for API symmetry with `len`.
  pub fn is_empty(&self) -> bool {
    self.categories.is_empty()
  }
}

impl TryFrom<Vec<String>> for CategorySet {
  type Error = WorkflowError;

  fn try_from(labels: Vec<String>) -> Result<Self, Self::Error> {
    Self::new(labels)
  }
}

impl From<CategorySet> for Vec<String> {
  fn from(set: CategorySet) -> Self {
    set.categories.into_iter().map(|c| c.0).collect()
  }
}

impl<'a> IntoIterator for &'a CategorySet {
  type Item = &'a Category;
  type IntoIter = std::slice::Iter<'a, Category>;

  fn into_iter(self) -> Self::IntoIter {
    self.iter()
  }
}
