use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Preferred content language / 内容语言
///
/// Drives two things: which catalogs a bare-number query fans out to, and
/// the +3 ranking boost for rows matching the caller's preferred language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    English,
    Dutch,
    German,
    Chinese,
    ChineseSimplified,
    Cebuano,
    Tagalog,
    French,
    Spanish,
    Korean,
    Japanese,
    Indonesian,
    Farsi,
    Russian,
    Portuguese,
    Hebrew,
    Slovak,
    Estonian,
    Arabic,
    Italian,
    Polish,
    Czech,
    Ukrainian,
    Romanian,
    Vietnamese,
    Thai,
    Burmese,
    Swahili,
    Hungarian,
    Greek,
}

impl Language {
    /// Catalogs probed when a bare catalog number is typed / 纯数字查询命中的歌本集合
    ///
    /// English has several parallel catalogs sharing one number space;
    /// most languages have a single songbook.
    pub fn catalog_types(&self) -> Vec<HymnType> {
        match self {
            Language::English => vec![
                HymnType::Classic,
                HymnType::NewTune,
                HymnType::NewSong,
                HymnType::Children,
                HymnType::HowardHigashi,
            ],
            Language::Chinese => vec![HymnType::Chinese, HymnType::ChineseSupplement],
            Language::ChineseSimplified => vec![
                HymnType::ChineseSimplified,
                HymnType::ChineseSupplementSimplified,
            ],
            other => HymnType::all()
                .iter()
                .copied()
                .filter(|t| t.language() == *other)
                .collect(),
        }
    }
}

/// Hymn catalog / 歌本类别
///
/// Each variant is one published catalog with its own number space. The
/// short alphabetic prefix is what users type for direct lookups ("ns152",
/// "ch40") and what identifiers render as in logs and cache keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HymnType {
    Classic,
    NewTune,
    NewSong,
    Children,
    HowardHigashi,
    BeFilled,
    Dutch,
    German,
    Chinese,
    ChineseSimplified,
    ChineseSupplement,
    ChineseSupplementSimplified,
    Cebuano,
    Tagalog,
    French,
    Spanish,
    Korean,
    Japanese,
    Indonesian,
    Farsi,
    Russian,
    Portuguese,
    Hebrew,
    Slovak,
    Estonian,
    Arabic,
    Liederbuch,
    Liedboek,
    BlueSongbook,
    Italian,
    Polish,
    Czech,
    Ukrainian,
    Romanian,
    Vietnamese,
    Thai,
    Burmese,
    Swahili,
    Hungarian,
    Greek,
}

/// Prefix lookup table, built once / 前缀查找表
static PREFIX_TABLE: Lazy<HashMap<&'static str, HymnType>> =
    Lazy::new(|| HymnType::all().iter().map(|t| (t.prefix(), *t)).collect());

impl HymnType {
    pub fn all() -> &'static [HymnType] {
        &[
            HymnType::Classic,
            HymnType::NewTune,
            HymnType::NewSong,
            HymnType::Children,
            HymnType::HowardHigashi,
            HymnType::BeFilled,
            HymnType::Dutch,
            HymnType::German,
            HymnType::Chinese,
            HymnType::ChineseSimplified,
            HymnType::ChineseSupplement,
            HymnType::ChineseSupplementSimplified,
            HymnType::Cebuano,
            HymnType::Tagalog,
            HymnType::French,
            HymnType::Spanish,
            HymnType::Korean,
            HymnType::Japanese,
            HymnType::Indonesian,
            HymnType::Farsi,
            HymnType::Russian,
            HymnType::Portuguese,
            HymnType::Hebrew,
            HymnType::Slovak,
            HymnType::Estonian,
            HymnType::Arabic,
            HymnType::Liederbuch,
            HymnType::Liedboek,
            HymnType::BlueSongbook,
            HymnType::Italian,
            HymnType::Polish,
            HymnType::Czech,
            HymnType::Ukrainian,
            HymnType::Romanian,
            HymnType::Vietnamese,
            HymnType::Thai,
            HymnType::Burmese,
            HymnType::Swahili,
            HymnType::Hungarian,
            HymnType::Greek,
        ]
    }

    /// Catalog prefix code / 歌本前缀代码
    pub fn prefix(&self) -> &'static str {
        match self {
            HymnType::Classic => "h",
            HymnType::NewTune => "nt",
            HymnType::NewSong => "ns",
            HymnType::Children => "c",
            HymnType::HowardHigashi => "lb",
            HymnType::BeFilled => "bf",
            HymnType::Dutch => "hd",
            HymnType::German => "de",
            HymnType::Chinese => "ch",
            HymnType::ChineseSimplified => "chx",
            HymnType::ChineseSupplement => "ts",
            HymnType::ChineseSupplementSimplified => "tsx",
            HymnType::Cebuano => "cb",
            HymnType::Tagalog => "ht",
            HymnType::French => "hf",
            HymnType::Spanish => "hs",
            HymnType::Korean => "hk",
            HymnType::Japanese => "hj",
            HymnType::Indonesian => "hin",
            HymnType::Farsi => "hfa",
            HymnType::Russian => "hru",
            HymnType::Portuguese => "hpt",
            HymnType::Hebrew => "hhe",
            HymnType::Slovak => "hsk",
            HymnType::Estonian => "het",
            HymnType::Arabic => "har",
            HymnType::Liederbuch => "lde",
            HymnType::Liedboek => "lbk",
            HymnType::BlueSongbook => "sb",
            HymnType::Italian => "hit",
            HymnType::Polish => "hpl",
            HymnType::Czech => "hcs",
            HymnType::Ukrainian => "huk",
            HymnType::Romanian => "hro",
            HymnType::Vietnamese => "hvn",
            HymnType::Thai => "hth",
            HymnType::Burmese => "hmy",
            HymnType::Swahili => "hsw",
            HymnType::Hungarian => "hhu",
            HymnType::Greek => "hel",
        }
    }

    /// 歌本内容语言
    pub fn language(&self) -> Language {
        match self {
            HymnType::Classic
            | HymnType::NewTune
            | HymnType::NewSong
            | HymnType::Children
            | HymnType::HowardHigashi
            | HymnType::BeFilled
            | HymnType::BlueSongbook => Language::English,
            HymnType::Dutch | HymnType::Liedboek => Language::Dutch,
            HymnType::German | HymnType::Liederbuch => Language::German,
            HymnType::Chinese | HymnType::ChineseSupplement => Language::Chinese,
            HymnType::ChineseSimplified | HymnType::ChineseSupplementSimplified => {
                Language::ChineseSimplified
            }
            HymnType::Cebuano => Language::Cebuano,
            HymnType::Tagalog => Language::Tagalog,
            HymnType::French => Language::French,
            HymnType::Spanish => Language::Spanish,
            HymnType::Korean => Language::Korean,
            HymnType::Japanese => Language::Japanese,
            HymnType::Indonesian => Language::Indonesian,
            HymnType::Farsi => Language::Farsi,
            HymnType::Russian => Language::Russian,
            HymnType::Portuguese => Language::Portuguese,
            HymnType::Hebrew => Language::Hebrew,
            HymnType::Slovak => Language::Slovak,
            HymnType::Estonian => Language::Estonian,
            HymnType::Arabic => Language::Arabic,
            HymnType::Italian => Language::Italian,
            HymnType::Polish => Language::Polish,
            HymnType::Czech => Language::Czech,
            HymnType::Ukrainian => Language::Ukrainian,
            HymnType::Romanian => Language::Romanian,
            HymnType::Vietnamese => Language::Vietnamese,
            HymnType::Thai => Language::Thai,
            HymnType::Burmese => Language::Burmese,
            HymnType::Swahili => Language::Swahili,
            HymnType::Hungarian => Language::Hungarian,
            HymnType::Greek => Language::Greek,
        }
    }

    /// Display label for generated result rows / 生成结果行的显示名称
    pub fn label(&self) -> &'static str {
        match self {
            HymnType::Classic => "Hymn",
            HymnType::NewTune => "New tune",
            HymnType::NewSong => "New song",
            HymnType::Children => "Children's song",
            HymnType::HowardHigashi => "Long Beach song",
            HymnType::BeFilled => "Be filled",
            HymnType::Dutch => "Dutch hymn",
            HymnType::German => "German hymn",
            HymnType::Chinese => "Chinese hymn",
            HymnType::ChineseSimplified => "Chinese hymn (simplified)",
            HymnType::ChineseSupplement => "Chinese supplement",
            HymnType::ChineseSupplementSimplified => "Chinese supplement (simplified)",
            HymnType::Cebuano => "Cebuano hymn",
            HymnType::Tagalog => "Tagalog hymn",
            HymnType::French => "French hymn",
            HymnType::Spanish => "Spanish hymn",
            HymnType::Korean => "Korean hymn",
            HymnType::Japanese => "Japanese hymn",
            HymnType::Indonesian => "Indonesian hymn",
            HymnType::Farsi => "Farsi hymn",
            HymnType::Russian => "Russian hymn",
            HymnType::Portuguese => "Portuguese hymn",
            HymnType::Hebrew => "Hebrew hymn",
            HymnType::Slovak => "Slovak hymn",
            HymnType::Estonian => "Estonian hymn",
            HymnType::Arabic => "Arabic hymn",
            HymnType::Liederbuch => "Liederbuch",
            HymnType::Liedboek => "Liedboek",
            HymnType::BlueSongbook => "Blue songbook",
            HymnType::Italian => "Italian hymn",
            HymnType::Polish => "Polish hymn",
            HymnType::Czech => "Czech hymn",
            HymnType::Ukrainian => "Ukrainian hymn",
            HymnType::Romanian => "Romanian hymn",
            HymnType::Vietnamese => "Vietnamese hymn",
            HymnType::Thai => "Thai hymn",
            HymnType::Burmese => "Burmese hymn",
            HymnType::Swahili => "Swahili hymn",
            HymnType::Hungarian => "Hungarian hymn",
            HymnType::Greek => "Greek hymn",
        }
    }

    /// Resolve a catalog from its prefix code (case-insensitive) / 按前缀解析歌本
    pub fn from_prefix(prefix: &str) -> Option<HymnType> {
        PREFIX_TABLE.get(prefix.to_ascii_lowercase().as_str()).copied()
    }
}

/// Composite content key / 内容复合键
///
/// `query_params` is a BTreeMap so equality and hashing are independent of
/// the order parameters were supplied in. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HymnIdentifier {
    pub hymn_type: HymnType,
    pub number: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub query_params: BTreeMap<String, String>,
}

impl HymnIdentifier {
    pub fn new(hymn_type: HymnType, number: impl Into<String>) -> Self {
        Self {
            hymn_type,
            number: number.into(),
            query_params: BTreeMap::new(),
        }
    }

    pub fn with_params(
        hymn_type: HymnType,
        number: impl Into<String>,
        query_params: BTreeMap<String, String>,
    ) -> Self {
        Self {
            hymn_type,
            number: number.into(),
            query_params,
        }
    }
}

impl fmt::Display for HymnIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.hymn_type.prefix(), self.number)?;
        let mut sep = '?';
        for (k, v) in &self.query_params {
            write!(f, "{}{}={}", sep, k, v)?;
            sep = '&';
        }
        Ok(())
    }
}

/// 诗节类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerseType {
    Verse,
    Chorus,
    Other,
    Copyright,
    Note,
    DoNotDisplay,
}

/// One structured verse block / 诗节
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verse {
    pub verse_type: VerseType,
    pub lines: Vec<String>,
}

/// Persisted hymn record / 持久化的诗歌记录
///
/// Created by reconciliation, replaced whole on save, never mutated
/// field-by-field. Column layout is the cache store's concern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HymnRecord {
    pub identifier: HymnIdentifier,
    pub title: String,
    pub verses: Vec<Verse>,
    pub language: Language,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub subcategory: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub composer: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub meter: Option<String>,
    #[serde(default)]
    pub scriptures: Option<String>,
    #[serde(default)]
    pub hymn_code: Option<String>,
    #[serde(default)]
    pub lead_sheet_url: Option<String>,
    #[serde(default)]
    pub piano_sheet_url: Option<String>,
    /// Same hymn in other languages / 其他语言版本
    #[serde(default)]
    pub languages: Vec<HymnIdentifier>,
    /// Related hymns (new tunes, alternates) / 相关诗歌
    #[serde(default)]
    pub relevant: Vec<HymnIdentifier>,
}

impl HymnRecord {
    /// Concatenated lyric text for full-text indexing / 用于全文索引的歌词文本
    ///
    /// Copyright and hidden blocks are not indexed.
    pub fn lyrics_text(&self) -> String {
        let mut out = String::new();
        for verse in &self.verses {
            match verse.verse_type {
                VerseType::Copyright | VerseType::DoNotDisplay => continue,
                _ => {}
            }
            for line in &verse.lines {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(line);
            }
        }
        out
    }
}

/// UI-facing hymn / 面向界面的诗歌
///
/// Invariant: `title` is never empty. Records that would violate this are
/// treated as absent during conversion, not as an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hymn {
    pub identifier: HymnIdentifier,
    pub title: String,
    pub verses: Vec<Verse>,
    pub language: Language,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub author: Option<String>,
    pub composer: Option<String>,
    pub key: Option<String>,
    pub time: Option<String>,
    pub meter: Option<String>,
    pub scriptures: Option<String>,
    pub hymn_code: Option<String>,
    pub lead_sheet_url: Option<String>,
    pub piano_sheet_url: Option<String>,
    pub languages: Vec<HymnIdentifier>,
    pub relevant: Vec<HymnIdentifier>,
}

impl Hymn {
    /// Convert a persisted record, enforcing the non-empty-title invariant
    /// 转换持久化记录；标题为空视为缺失
    pub fn from_record(record: HymnRecord) -> Option<Hymn> {
        if record.title.trim().is_empty() {
            return None;
        }
        Some(Hymn {
            identifier: record.identifier,
            title: record.title,
            verses: record.verses,
            language: record.language,
            category: record.category,
            subcategory: record.subcategory,
            author: record.author,
            composer: record.composer,
            key: record.key,
            time: record.time,
            meter: record.meter,
            scriptures: record.scriptures,
            hymn_code: record.hymn_code,
            lead_sheet_url: record.lead_sheet_url,
            piano_sheet_url: record.piano_sheet_url,
            languages: record.languages,
            relevant: record.relevant,
        })
    }
}

/// Lightweight search result row / 搜索结果行
///
/// Two rows are the same row iff their identifiers are equal; the most
/// recently seen title wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub identifier: HymnIdentifier,
    pub title: String,
}

/// A local full-text match with its raw match-info blob / 本地全文命中
#[derive(Debug, Clone, PartialEq)]
pub struct FullTextHit {
    pub identifier: HymnIdentifier,
    pub title: String,
    pub language: Language,
    /// Per-column match counts as little-endian u32s / 每列匹配计数
    pub match_info: Vec<u8>,
}
