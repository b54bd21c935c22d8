//! ExecutionContext - Store / Channel 呼び出しに明示的に渡すスコープ
//!
//! グローバルな「デフォルトコンテキスト」は持たず、呼び出し側が必ず値を渡します。
//! in-memory 実装はこの scope ごとにデータを分離します（マルチテナント対応）。

use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_SCOPE: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionContext {
    scope: String,
}

impl ExecutionContext {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
        }
    }

    /// スケジューラ自身が使う既定のスコープ
    pub fn system() -> Self {
        Self::new(DEFAULT_SCOPE)
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }
}

impl fmt::Display for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.scope)
    }
}
