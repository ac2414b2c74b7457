//! 枚举类型定义
//!
//! 实体存储中的枚举字段以 snake_case 字符串存储。
//! 无法识别的取值统一映射为 `Unknown`，不会导致整条记录解析失败。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 用户生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    New,
    Activated,
    Engaged,
    PowerUser,
    AtRisk,
    Dormant,
    Returning,
    #[serde(other)]
    Unknown,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Activated => "activated",
            Self::Engaged => "engaged",
            Self::PowerUser => "power_user",
            Self::AtRisk => "at_risk",
            Self::Dormant => "dormant",
            Self::Returning => "returning",
            Self::Unknown => "unknown",
        }
    }
}

/// 积分等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Bronze,
    Silver,
    Gold,
    Platinum,
    Diamond,
    #[serde(other)]
    Unknown,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bronze => "bronze",
            Self::Silver => "silver",
            Self::Gold => "gold",
            Self::Platinum => "platinum",
            Self::Diamond => "diamond",
            Self::Unknown => "unknown",
        }
    }
}

/// 徽章稀有度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BadgeRarity {
    Common,
    Uncommon,
    Rare,
    Epic,
    Legendary,
    #[serde(other)]
    Unknown,
}

impl BadgeRarity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Common => "common",
            Self::Uncommon => "uncommon",
            Self::Rare => "rare",
            Self::Epic => "epic",
            Self::Legendary => "legendary",
            Self::Unknown => "unknown",
        }
    }
}

macro_rules! impl_display {
    ($($ty:ty),*) => {
        $(
            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(self.as_str())
                }
            }
        )*
    };
}

impl_display!(LifecycleState, Tier, BadgeRarity);
