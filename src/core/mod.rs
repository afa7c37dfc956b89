//! 核心层：错误类型、分发协调器、按配置装配的构建器

pub mod builder;
pub mod dispatch;
pub mod error;

pub use builder::{ChatBuilder, ChatRuntime};
pub use dispatch::{DispatchCoordinator, Lane, LaneClient, Turn};
pub use error::ChatError;
