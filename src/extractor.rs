//-
// Copyright (c) 2024, Jason Lingle
//
// This file is part of Mailcore.
//
// Mailcore is free software: you can  redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Mailcore is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Mailcore. If not, see <http://www.gnu.org/licenses/>.

//! Turning message parts into text for full-text indexing.

use std::collections::BTreeMap;
use std::io::Read;

use encoding_rs::Encoding;
use lazy_static::lazy_static;
use log::warn;
use regex::Regex;

use crate::support::error::Error;

/// What the caller knows about a part beyond its MIME type.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContentHints {
    pub charset: Option<String>,
    pub file_name: Option<String>,
}

/// The result of extracting a part.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedContent {
    /// The text of the part, if it has any.
    pub text: Option<String>,
    pub metadata: BTreeMap<String, Vec<String>>,
}

pub trait TextExtractor: Send + Sync {
    /// Whether this extractor does anything at all with `mime_type`.
    fn applicable(&self, mime_type: &str) -> bool;

    fn extract_content(
        &self,
        input: &mut dyn Read,
        mime_type: &str,
        hints: &ContentHints,
    ) -> Result<ParsedContent, Error>;
}

/// Extracts `text/*` parts by decoding them from their charset, and nothing
/// else.
///
/// The charset comes from the hints if present, then from a `charset`
/// parameter on the MIME type, and is otherwise assumed to be UTF-8.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn applicable(&self, mime_type: &str) -> bool {
        media_type(mime_type).starts_with("text/")
    }

    fn extract_content(
        &self,
        input: &mut dyn Read,
        mime_type: &str,
        hints: &ContentHints,
    ) -> Result<ParsedContent, Error> {
        let mut metadata = BTreeMap::new();
        if let Some(ref file_name) = hints.file_name {
            metadata.insert("file_name".to_owned(), vec![file_name.clone()]);
        }

        if !self.applicable(mime_type) {
            return Ok(ParsedContent {
                text: None,
                metadata,
            });
        }

        let mut raw = Vec::new();
        input.read_to_end(&mut raw)?;

        let label = hints
            .charset
            .clone()
            .or_else(|| charset_parameter(mime_type))
            .unwrap_or_else(|| "utf-8".to_owned());
        let encoding = Encoding::for_label_no_replacement(label.as_bytes())
            .unwrap_or_else(|| {
                warn!("Unknown charset {:?}, decoding as UTF-8", label);
                encoding_rs::UTF_8
            });

        let (text, _, had_errors) = encoding.decode(&raw);
        if had_errors {
            warn!(
                "Malformed {} content in {} part",
                encoding.name(),
                mime_type
            );
        }

        metadata.insert("charset".to_owned(), vec![encoding.name().to_owned()]);
        Ok(ParsedContent {
            text: Some(text.into_owned()),
            metadata,
        })
    }
}

fn media_type(mime_type: &str) -> String {
    mime_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

lazy_static! {
    static ref CHARSET_PARAMETER: Regex =
        Regex::new(r#"(?i);\s*charset\s*=\s*"?([^";\s]+)"?"#).unwrap();
}

fn charset_parameter(mime_type: &str) -> Option<String> {
    CHARSET_PARAMETER
        .captures(mime_type)
        .map(|c| c[1].to_owned())
}

#[cfg(test)]
mod test {
    use super::*;

    fn extract(
        content: &[u8],
        mime_type: &str,
        charset: Option<&str>,
    ) -> ParsedContent {
        PlainTextExtractor
            .extract_content(
                &mut &content[..],
                mime_type,
                &ContentHints {
                    charset: charset.map(str::to_owned),
                    file_name: None,
                },
            )
            .unwrap()
    }

    #[test]
    fn utf8_by_default() {
        assert_eq!(
            Some("Grüße".to_owned()),
            extract("Grüße".as_bytes(), "text/plain", None).text
        );
    }

    #[test]
    fn charset_from_hint_or_parameter() {
        assert_eq!(
            Some("Jørn".to_owned()),
            extract(b"J\xF8rn", "text/plain", Some("ISO-8859-1")).text
        );
        assert_eq!(
            Some("Jørn".to_owned()),
            extract(b"J\xF8rn", "Text/Plain; charset=\"iso-8859-1\"", None)
                .text
        );
    }

    #[test]
    fn unknown_charset_falls_back() {
        crate::init_test_log();
        assert_eq!(
            Some("plain".to_owned()),
            extract(b"plain", "text/plain", Some("x-klingon")).text
        );
    }

    #[test]
    fn non_text_has_no_content() {
        let parsed = PlainTextExtractor
            .extract_content(
                &mut &b"\x89PNG"[..],
                "image/png",
                &ContentHints {
                    charset: None,
                    file_name: Some("cat.png".to_owned()),
                },
            )
            .unwrap();
        assert_eq!(None, parsed.text);
        assert_eq!(vec!["cat.png".to_owned()], parsed.metadata["file_name"]);
        assert!(!PlainTextExtractor.applicable("application/pdf"));
        assert!(PlainTextExtractor.applicable("TEXT/HTML; charset=utf-8"));
    }

    #[test]
    fn charset_parameter_parsing() {
        assert_eq!(
            Some("UTF-8".to_owned()),
            charset_parameter("text/plain; format=flowed; Charset=UTF-8")
        );
        assert_eq!(
            Some("koi8-r".to_owned()),
            charset_parameter("text/plain;charset=\"koi8-r\"")
        );
        assert_eq!(None, charset_parameter("text/plain"));
    }
}
