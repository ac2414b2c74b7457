//! 仓储层
//!
//! 实体存储接口、内存实现与类型化读取。

pub mod memory;
pub mod traits;
pub mod typed;

pub use memory::InMemoryEntityStore;
pub use traits::{Collection, EntityStore, ListQuery, Predicate, SortField};
pub use typed::{Entity, Fetched, Repository};
