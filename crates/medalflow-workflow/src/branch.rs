use std::fmt;

use serde::{Deserialize, Serialize};

use crate::category::{Category, CategorySet};
use crate::error::WorkflowError;

/// Prefix shared by every category handler node id.
const HANDLER_PREFIX: &str = "calc_";

/// Node id of the handler that processes one category.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandlerId(String);

impl HandlerId {
  pub fn for_category(category: &Category) -> Self {
    Self(format!("{}{}", HANDLER_PREFIX, category.label()))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for HandlerId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl AsRef<str> for HandlerId {
  fn as_ref(&self) -> &str {
    &self.0
  }
}

/// Map a category to the handler that must run for it.
///
/// Pure and total over `categories`. A category outside the set is a
/// programming error upstream (the picker only ever returns members) and is
/// reported as [`WorkflowError::UnknownCategory`].
pub fn select(categories: &CategorySet, category: &Category) -> Result<HandlerId, WorkflowError> {
  if !categories.contains(category) {
    return Err(WorkflowError::UnknownCategory(category.label().to_string()));
  }
  Ok(HandlerId::for_category(category))
}
