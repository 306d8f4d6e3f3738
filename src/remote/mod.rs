//! Remote catalog seam / 远端目录接口
//!
//! Wire shapes for the hymnal catalog API plus the conversion into local
//! records. Wire values are ephemeral: converted immediately on receipt,
//! never cached and never compared by identity.

use std::collections::BTreeMap;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};
use crate::models::{HymnIdentifier, HymnRecord, HymnType, Verse, VerseType};

pub mod hymnal_net;

pub use hymnal_net::HymnalNetClient;

/// Remote fetch interface / 远端获取接口
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Fetch one hymn by identifier / 按标识符获取诗歌
    async fn fetch_hymn(&self, id: &HymnIdentifier) -> SyncResult<HymnalNetJson>;

    /// Paginated free-text search / 分页全文搜索
    async fn search(&self, query: &str, page: Option<u32>) -> SyncResult<SongResultsPage>;
}

/// Wire representation of one hymn / 诗歌的网络表示
///
/// Carries generic name-keyed metadata groups rather than first-class
/// fields; the conversion below maps them onto [`HymnRecord`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HymnalNetJson {
    pub title: String,
    #[serde(rename = "metaData", default)]
    pub meta_data: Vec<MetaDatum>,
    #[serde(default)]
    pub lyrics: Vec<VerseBlock>,
}

/// 元数据组
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaDatum {
    pub name: String,
    #[serde(default)]
    pub data: Vec<Datum>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Datum {
    pub value: String,
    #[serde(default)]
    pub path: Option<String>,
}

/// 诗节块
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerseBlock {
    #[serde(rename = "verseType")]
    pub verse_type: String,
    #[serde(rename = "verseContent", default)]
    pub verse_content: Vec<String>,
}

/// One page of remote search results / 远端搜索结果页
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SongResultsPage {
    #[serde(rename = "data", default)]
    pub results: Vec<SongResult>,
    #[serde(rename = "hasmorepages", default)]
    pub has_more_pages: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SongResult {
    pub name: String,
    pub path: String,
}

/// Hymn path pattern, e.g. "/en/hymn/h/1151" or "/hymn/ch/40?gb=1"
/// 诗歌路径模式
static HYMN_PATH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^/(?:[a-z]{2}/)?hymn/([a-zA-Z]+)/(\d+[a-z]?)(?:\?(.*))?$").expect("valid regex")
});

/// Parse a catalog path back into an identifier / 解析目录路径为标识符
///
/// Unparseable paths are Malformed-Reference: the caller logs and skips the
/// offending row, it never fails a whole batch.
pub fn parse_hymn_path(path: &str) -> SyncResult<HymnIdentifier> {
    let caps = HYMN_PATH_RE
        .captures(path.trim())
        .ok_or_else(|| SyncError::MalformedReference(path.to_string()))?;

    let prefix = caps.get(1).map(|m| m.as_str()).unwrap_or("");
    let hymn_type = HymnType::from_prefix(prefix)
        .ok_or_else(|| SyncError::MalformedReference(path.to_string()))?;
    let number = caps.get(2).map(|m| m.as_str()).unwrap_or("").to_string();

    let mut query_params = BTreeMap::new();
    if let Some(raw) = caps.get(3) {
        for pair in raw.as_str().split('&').filter(|p| !p.is_empty()) {
            match pair.split_once('=') {
                Some((k, v)) => {
                    query_params.insert(k.to_string(), v.to_string());
                }
                None => return Err(SyncError::MalformedReference(path.to_string())),
            }
        }
    }

    Ok(HymnIdentifier::with_params(hymn_type, number, query_params))
}

/// Wire titles come prefixed ("Hymn: Minoru's song"); strip it once here so
/// everything downstream sees the clean title.
fn clean_title(raw: &str) -> String {
    raw.trim()
        .strip_prefix("Hymn: ")
        .unwrap_or(raw.trim())
        .to_string()
}

fn parse_verse_type(raw: &str) -> VerseType {
    match raw {
        "verse" => VerseType::Verse,
        "chorus" => VerseType::Chorus,
        "copyright" => VerseType::Copyright,
        "note" => VerseType::Note,
        "doNotDisplay" => VerseType::DoNotDisplay,
        _ => VerseType::Other,
    }
}

impl HymnalNetJson {
    fn group(&self, name: &str) -> Option<&MetaDatum> {
        self.meta_data.iter().find(|g| g.name.eq_ignore_ascii_case(name))
    }

    fn first_value(&self, name: &str) -> Option<String> {
        self.group(name)
            .and_then(|g| g.data.first())
            .map(|d| d.value.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn joined_values(&self, name: &str) -> Option<String> {
        let group = self.group(name)?;
        let values: Vec<&str> = group
            .data
            .iter()
            .map(|d| d.value.trim())
            .filter(|v| !v.is_empty())
            .collect();
        if values.is_empty() {
            None
        } else {
            Some(values.join("; "))
        }
    }

    fn first_path(&self, name: &str) -> Option<String> {
        self.group(name)
            .and_then(|g| g.data.iter().find_map(|d| d.path.clone()))
            .filter(|p| !p.is_empty())
    }

    /// Cross-reference groups carry catalog paths; rows that fail to parse
    /// are logged and skipped / 交叉引用组；解析失败的行跳过
    fn linked_identifiers(&self, name: &str) -> Vec<HymnIdentifier> {
        let Some(group) = self.group(name) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for datum in &group.data {
            let Some(path) = datum.path.as_deref() else {
                continue;
            };
            match parse_hymn_path(path) {
                Ok(id) => out.push(id),
                Err(e) => {
                    tracing::warn!("Skipping {} reference: {}", name, e);
                }
            }
        }
        out
    }

    /// Convert the wire payload into a persisted record / 转换为本地记录
    pub fn into_record(self, id: &HymnIdentifier) -> SyncResult<HymnRecord> {
        let verses: Vec<Verse> = self
            .lyrics
            .iter()
            .map(|block| Verse {
                verse_type: parse_verse_type(&block.verse_type),
                lines: block.verse_content.clone(),
            })
            .collect();

        Ok(HymnRecord {
            identifier: id.clone(),
            title: clean_title(&self.title),
            language: id.hymn_type.language(),
            category: self.first_value("Category"),
            subcategory: self.first_value("Subcategory"),
            author: self.first_value("Lyrics"),
            composer: self.first_value("Music"),
            key: self.first_value("Key"),
            time: self.first_value("Time"),
            meter: self.first_value("Meter"),
            scriptures: self.joined_values("Scriptures"),
            hymn_code: self.first_value("Hymn Code"),
            lead_sheet_url: self.first_path("Lead Sheet"),
            piano_sheet_url: self.first_path("Piano Sheet"),
            languages: self.linked_identifiers("Languages"),
            relevant: self.linked_identifiers("Relevant"),
            verses,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn datum(value: &str, path: Option<&str>) -> Datum {
        Datum {
            value: value.to_string(),
            path: path.map(|p| p.to_string()),
        }
    }

    #[test]
    fn test_parse_hymn_path() {
        let id = parse_hymn_path("/en/hymn/h/1151").unwrap();
        assert_eq!(id, HymnIdentifier::new(HymnType::Classic, "1151"));

        let id = parse_hymn_path("/hymn/ns/152").unwrap();
        assert_eq!(id, HymnIdentifier::new(HymnType::NewSong, "152"));

        let id = parse_hymn_path("/en/hymn/ch/40?gb=1").unwrap();
        assert_eq!(id.hymn_type, HymnType::Chinese);
        assert_eq!(id.query_params.get("gb").map(String::as_str), Some("1"));

        assert!(matches!(
            parse_hymn_path("/en/song/xx/1"),
            Err(SyncError::MalformedReference(_))
        ));
        assert!(matches!(
            parse_hymn_path("/en/hymn/zzzz/1"),
            Err(SyncError::MalformedReference(_))
        ));
    }

    #[test]
    fn test_into_record_strips_title_prefix() {
        let wire = HymnalNetJson {
            title: "Hymn: Minoru's song".to_string(),
            meta_data: Vec::new(),
            lyrics: vec![VerseBlock {
                verse_type: "verse".to_string(),
                verse_content: vec!["In the bosom of the Father".to_string()],
            }],
        };
        let id = HymnIdentifier::new(HymnType::Classic, "1151");
        let record = wire.into_record(&id).unwrap();
        assert_eq!(record.title, "Minoru's song");
        assert_eq!(record.verses.len(), 1);
        assert_eq!(record.verses[0].verse_type, VerseType::Verse);
    }

    #[test]
    fn test_into_record_maps_metadata_groups() {
        let wire = HymnalNetJson {
            title: "Hymn: O the joy".to_string(),
            meta_data: vec![
                MetaDatum {
                    name: "Category".to_string(),
                    data: vec![datum("Experience of Christ", None)],
                },
                MetaDatum {
                    name: "Lyrics".to_string(),
                    data: vec![datum("A. B. Simpson", None)],
                },
                MetaDatum {
                    name: "Music".to_string(),
                    data: vec![datum("W. J. Kirkpatrick", None)],
                },
                MetaDatum {
                    name: "Scriptures".to_string(),
                    data: vec![datum("Phil. 3:8", None), datum("John 15:5", None)],
                },
                MetaDatum {
                    name: "Languages".to_string(),
                    data: vec![
                        datum("詩歌(繁)", Some("/en/hymn/ch/33")),
                        datum("broken", Some("/not/a/hymn")),
                    ],
                },
            ],
            lyrics: Vec::new(),
        };
        let id = HymnIdentifier::new(HymnType::Classic, "33");
        let record = wire.into_record(&id).unwrap();
        assert_eq!(record.category.as_deref(), Some("Experience of Christ"));
        assert_eq!(record.author.as_deref(), Some("A. B. Simpson"));
        assert_eq!(record.composer.as_deref(), Some("W. J. Kirkpatrick"));
        assert_eq!(record.scriptures.as_deref(), Some("Phil. 3:8; John 15:5"));
        // 坏引用被跳过，批次不受影响
        assert_eq!(record.languages.len(), 1);
        assert_eq!(record.languages[0].hymn_type, HymnType::Chinese);
    }

    #[test]
    fn test_unknown_verse_type_maps_to_other() {
        assert_eq!(parse_verse_type("bridge"), VerseType::Other);
        assert_eq!(parse_verse_type("doNotDisplay"), VerseType::DoNotDisplay);
    }
}
