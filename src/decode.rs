//! Robust decoding of captured process output.
//!
//! Validator tools write diagnostics in whatever encoding their locale
//! dictates. Captured bytes are decoded with a fixed chain: strict UTF-8,
//! then the host's legacy encoding (strict), then lossy UTF-8 with
//! replacement characters. The result is always valid text.
//!
//! The legacy encoding is the codeset named by the first of `LC_ALL`,
//! `LC_CTYPE` and `LANG` that is set, e.g. `de_DE.ISO-8859-15@euro`. A
//! missing codeset, a UTF-8 one, or one that is not ASCII compatible selects
//! Windows-1252, a superset of Latin-1 that also covers the usual Windows
//! console code page. Windows-1252 maps every byte, so on such hosts the
//! replacement step is only reached through multi-byte legacy encodings.

use std::sync::OnceLock;

use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};

/// Which step of the chain produced the text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodedWith {
    Utf8,
    LegacyCodePage,
    Replacement,
}

/// Decode bytes into text, reporting which step succeeded.
pub fn decode_with_source(bytes: &[u8]) -> (String, DecodedWith) {
    decode_with(bytes, host_legacy_encoding())
}

/// Decode bytes into trimmed text.
pub fn decode_output(bytes: &[u8]) -> String {
    let (text, _) = decode_with_source(bytes);
    text.trim().to_string()
}

/// Same chain as [`decode_with_source`] with an explicit legacy encoding
pub fn decode_with(bytes: &[u8], legacy: &'static Encoding) -> (String, DecodedWith) {
    if let Ok(text) = std::str::from_utf8(bytes) {
        return (text.to_string(), DecodedWith::Utf8);
    }
    if let Some(text) = legacy.decode_without_bom_handling_and_without_replacement(bytes) {
        return (text.into_owned(), DecodedWith::LegacyCodePage);
    }
    (
        String::from_utf8_lossy(bytes).into_owned(),
        DecodedWith::Replacement,
    )
}

/// Legacy encoding of this process's locale, resolved once
pub fn host_legacy_encoding() -> &'static Encoding {
    static HOST: OnceLock<&'static Encoding> = OnceLock::new();
    HOST.get_or_init(|| {
        let locale = ["LC_ALL", "LC_CTYPE", "LANG"]
            .into_iter()
            .filter_map(|name| std::env::var(name).ok())
            .find(|value| !value.is_empty());
        legacy_encoding_for(locale.as_deref())
    })
}

/// Legacy encoding for a POSIX locale name such as `ja_JP.SJIS`
pub fn legacy_encoding_for(locale: Option<&str>) -> &'static Encoding {
    locale
        .and_then(|locale| locale.split_once('.'))
        .map(|(_, rest)| rest.split('@').next().unwrap_or(rest))
        .and_then(|codeset| Encoding::for_label(codeset.as_bytes()))
        .filter(|encoding| *encoding != UTF_8 && encoding.is_ascii_compatible())
        .unwrap_or(WINDOWS_1252)
}
