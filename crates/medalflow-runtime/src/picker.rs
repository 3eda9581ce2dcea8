//! Category picker.

use std::sync::{Mutex, PoisonError};

use medalflow_workflow::{Category, CategorySet};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Picks one category uniformly at random.
///
/// Owns its RNG so a seeded picker yields a reproducible sequence.
#[derive(Debug)]
pub struct CategoryPicker {
  categories: CategorySet,
  rng: Mutex<StdRng>,
}

impl CategoryPicker {
  /// A picker seeded from OS entropy.
  pub fn new(categories: CategorySet) -> Self {
    Self::with_rng(categories, StdRng::from_entropy())
  }

  /// A picker with a fixed seed.
  pub fn seeded(categories: CategorySet, seed: u64) -> Self {
    Self::with_rng(categories, StdRng::seed_from_u64(seed))
  }

  fn with_rng(categories: CategorySet, rng: StdRng) -> Self {
    Self {
      categories,
      rng: Mutex::new(rng),
    }
  }

  pub fn categories(&self) -> &CategorySet {
    &self.categories
  }

  pub fn pick(&self) -> Category {
    let members = self.categories.as_slice();
    // CategorySet is never empty, so the range is never empty
    let index = self
      .rng
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .gen_range(0..members.len());
    members[index].clone()
  }
}
