//! Caching implementations for district types.

use crate::cache::Cacheable;

use super::types::DistrictDetail;

impl Cacheable for DistrictDetail {
  fn cache_key(&self) -> String {
    self.slug.clone()
  }

  fn entity_type() -> &'static str {
    "district"
  }
}
