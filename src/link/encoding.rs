//! 宽松的 Base64 编解码
//!
//! 订阅内容常见 URL 安全字母表、缺失 padding、夹带换行等情况，
//! 统一在这里处理。

use crate::error::{Error, Result};
use base64::Engine;
use base64::alphabet;
use base64::engine::DecodePaddingMode;
use base64::engine::general_purpose::{
    GeneralPurpose, GeneralPurposeConfig, STANDARD, URL_SAFE_NO_PAD,
};

const PERMISSIVE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_allow_trailing_bits(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// 解码为 UTF-8 文本：`-`/`_` 转换为标准字母表，补齐 `=` 到 4 的倍数
pub fn decode(input: &str) -> Result<String> {
    let mut normalized: String = input
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();

    while normalized.len() % 4 != 0 {
        normalized.push('=');
    }

    let bytes = PERMISSIVE.decode(normalized.as_bytes())?;
    String::from_utf8(bytes).map_err(|e| Error::Base64(e.to_string()))
}

/// 标准字母表编码（带 padding）
pub fn encode(input: &str) -> String {
    STANDARD.encode(input.as_bytes())
}

/// URL 安全字母表编码（无 padding），用于 SIP002 用户信息和 SSR
pub fn encode_url_safe(input: &str) -> String {
    URL_SAFE_NO_PAD.encode(input.as_bytes())
}
