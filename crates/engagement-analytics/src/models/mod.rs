//! 数据模型
//!
//! 实体存储中各集合的类型化记录定义。

mod entities;
mod enums;

pub use entities::*;
pub use enums::*;
