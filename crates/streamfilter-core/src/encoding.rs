//! アイテムに付随するエンコーディングタグ

use alloc::string::String;

/// エンコーディングタグ（例: `"utf8"`, `"buffer"`）
///
/// コアはこの値を解釈せず、アイテムと一緒に運ぶだけ。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Encoding(String);

impl Encoding {
    /// タグから生成する
    pub fn new(tag: impl Into<String>) -> Self {
        Encoding(tag.into())
    }

    /// タグ文字列
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Encoding {
    fn from(tag: &str) -> Self {
        Encoding::new(tag)
    }
}

impl From<String> for Encoding {
    fn from(tag: String) -> Self {
        Encoding(tag)
    }
}

impl core::fmt::Display for Encoding {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
