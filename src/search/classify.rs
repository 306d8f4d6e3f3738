//! Query classification / 查询分类
//!
//! Runs before the aggregator. Catalog shortcuts bypass full-text search
//! entirely:
//! - up to 6 digits → catalog number across the types implied by the
//!   caller's preferred language
//! - more than 6 digits → internal hymn-code lookup
//! - short alphabetic prefix + digits → direct type+number lookup
//! - everything else → full-text search

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{HymnIdentifier, HymnType, Language};

static CATALOG_NUMBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{1,6}$").expect("valid regex"));
static HYMN_CODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{7,}$").expect("valid regex"));
static TYPE_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([a-zA-Z]{1,3})(\d{1,6})$").expect("valid regex"));

/// Where a query should be routed / 查询路由
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryRoute {
    /// Direct lookups, resolved without full-text search / 直接查找
    DirectLookup(Vec<HymnIdentifier>),
    /// Lookup by internal numeric code / 按内部编码查找
    HymnCode(String),
    /// Free-text search / 全文搜索
    FullText(String),
}

/// Classify a query; `None` for an empty one / 分类查询；空查询返回None
pub fn classify(query: &str, preferred: Language) -> Option<QueryRoute> {
    let query = query.trim();
    if query.is_empty() {
        return None;
    }

    if CATALOG_NUMBER_RE.is_match(query) {
        let ids = preferred
            .catalog_types()
            .into_iter()
            .map(|t| HymnIdentifier::new(t, query))
            .collect();
        return Some(QueryRoute::DirectLookup(ids));
    }

    if HYMN_CODE_RE.is_match(query) {
        return Some(QueryRoute::HymnCode(query.to_string()));
    }

    if let Some(caps) = TYPE_PREFIX_RE.captures(query) {
        let prefix = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        let number = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        if let Some(hymn_type) = HymnType::from_prefix(prefix) {
            return Some(QueryRoute::DirectLookup(vec![HymnIdentifier::new(
                hymn_type, number,
            )]));
        }
        // 未知前缀回退到全文搜索
    }

    Some(QueryRoute::FullText(query.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_query_is_none() {
        assert_eq!(classify("", Language::English), None);
        assert_eq!(classify("   ", Language::English), None);
    }

    #[test]
    fn test_catalog_number_fans_out_by_language() {
        match classify("1151", Language::English) {
            Some(QueryRoute::DirectLookup(ids)) => {
                assert_eq!(ids.len(), 5);
                assert_eq!(ids[0], HymnIdentifier::new(HymnType::Classic, "1151"));
                assert!(ids.iter().all(|id| id.number == "1151"));
            }
            other => panic!("unexpected route: {:?}", other),
        }

        match classify("40", Language::Chinese) {
            Some(QueryRoute::DirectLookup(ids)) => {
                assert_eq!(ids[0].hymn_type, HymnType::Chinese);
            }
            other => panic!("unexpected route: {:?}", other),
        }
    }

    #[test]
    fn test_long_number_is_hymn_code() {
        assert_eq!(
            classify("5671234", Language::English),
            Some(QueryRoute::HymnCode("5671234".to_string()))
        );
        // 六位数仍是目录号
        assert!(matches!(
            classify("999999", Language::English),
            Some(QueryRoute::DirectLookup(_))
        ));
    }

    #[test]
    fn test_type_prefix_lookup() {
        assert_eq!(
            classify("ns152", Language::English),
            Some(QueryRoute::DirectLookup(vec![HymnIdentifier::new(
                HymnType::NewSong,
                "152"
            )]))
        );
        assert_eq!(
            classify("CH40", Language::English),
            Some(QueryRoute::DirectLookup(vec![HymnIdentifier::new(
                HymnType::Chinese,
                "40"
            )]))
        );
    }

    #[test]
    fn test_unknown_prefix_falls_back_to_full_text() {
        assert_eq!(
            classify("zz12", Language::English),
            Some(QueryRoute::FullText("zz12".to_string()))
        );
    }

    #[test]
    fn test_free_text_routes_to_full_text() {
        assert_eq!(
            classify("amazing grace", Language::English),
            Some(QueryRoute::FullText("amazing grace".to_string()))
        );
        assert_eq!(
            classify("o the joy 3", Language::English),
            Some(QueryRoute::FullText("o the joy 3".to_string()))
        );
    }
}
