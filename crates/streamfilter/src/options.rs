//! フィルタのオプション
//!
//! JS 側からはプレーンなオブジェクト（camelCase）として渡される。
//!
//! ```json
//! { "restore": true, "passthrough": false, "itemMode": "object", "highWaterMark": 16 }
//! ```

use alloc::string::ToString;

use serde::{Deserialize, Serialize};
use streamfilter_core::{StreamFilterError, DEFAULT_HIGH_WATER_MARK};

/// アイテムの扱い
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemMode {
    /// 任意の値
    Object,
    /// 生のバイトチャンク（文字列を含む）
    #[default]
    Bytes,
}

/// フィルタのオプション（すべて省略可能）
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamFilterOptions {
    /// 一致したアイテムを restore チャンネルへ迂回する
    pub restore: bool,
    /// restore チャンネルを外部 writer にも開く（`restore` が必要）
    pub passthrough: bool,
    pub item_mode: ItemMode,
    /// passthrough の `write` が `false` を返し始めるキュー長
    pub high_water_mark: Option<usize>,
}

impl StreamFilterOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_restore(mut self, restore: bool) -> Self {
        self.restore = restore;
        self
    }

    pub fn with_passthrough(mut self, passthrough: bool) -> Self {
        self.passthrough = passthrough;
        self
    }

    pub fn with_item_mode(mut self, item_mode: ItemMode) -> Self {
        self.item_mode = item_mode;
        self
    }

    pub fn with_high_water_mark(mut self, high_water_mark: usize) -> Self {
        self.high_water_mark = Some(high_water_mark);
        self
    }

    /// passthrough は restore と組み合わせたときだけ有効
    pub fn is_passthrough(&self) -> bool {
        self.restore && self.passthrough
    }

    pub fn effective_high_water_mark(&self) -> usize {
        self.high_water_mark.unwrap_or(DEFAULT_HIGH_WATER_MARK)
    }

    /// 構築前の検証
    ///
    /// # エラー
    /// - `InvalidOptions`: `highWaterMark` が 0
    pub fn validate(&self) -> Result<(), StreamFilterError> {
        if self.high_water_mark == Some(0) {
            return Err(StreamFilterError::InvalidOptions(
                "highWaterMark must be greater than zero".to_string(),
            ));
        }
        if self.passthrough && !self.restore {
            tracing::warn!("passthrough is ignored without restore");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = StreamFilterOptions::new();
        assert!(!options.restore);
        assert!(!options.is_passthrough());
        assert_eq!(options.item_mode, ItemMode::Bytes);
        assert_eq!(options.effective_high_water_mark(), DEFAULT_HIGH_WATER_MARK);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_passthrough_requires_restore() {
        let options = StreamFilterOptions::new().with_passthrough(true);
        assert!(!options.is_passthrough());
        assert!(options.with_restore(true).is_passthrough());
    }

    #[test]
    fn test_zero_high_water_mark_is_rejected() {
        let err = StreamFilterOptions::new()
            .with_high_water_mark(0)
            .validate()
            .unwrap_err();
        assert_eq!(err.code(), "E_BAD_OPTIONS");
    }

    #[test]
    fn test_parse_camel_case_json() {
        let options: StreamFilterOptions = serde_json::from_str(
            r#"{"restore":true,"passthrough":true,"itemMode":"object","highWaterMark":4}"#,
        )
        .unwrap();
        assert!(options.restore);
        assert!(options.is_passthrough());
        assert_eq!(options.item_mode, ItemMode::Object);
        assert_eq!(options.high_water_mark, Some(4));
        assert_eq!(options.effective_high_water_mark(), 4);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_empty_json_is_default() {
        let options: StreamFilterOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options, StreamFilterOptions::default());
    }

    #[test]
    fn test_unknown_item_mode_is_rejected() {
        assert!(serde_json::from_str::<StreamFilterOptions>(r#"{"itemMode":"stream"}"#).is_err());
    }
}
