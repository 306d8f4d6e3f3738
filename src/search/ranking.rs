//! Local relevance ranking / 本地相关性排序
//!
//! Each local full-text row carries a match-info blob: little-endian u32
//! slots laid out in equal-width groups, one group per indexed column in
//! declaration order (title first, then lyrics), the leading slot of each
//! group being that column's match count.
//!
//! rank = 2 × title + lyrics + 3 × language-match. Sort is descending and
//! stable: equal-rank rows keep their encounter order. Two equal rows
//! swapping order between runs is a regression, not noise.

use crate::models::{FullTextHit, Language, SearchHit};

/// Indexed columns, in declaration order / 索引列数（声明顺序）
const COLUMNS: usize = 2;

const TITLE_WEIGHT: u64 = 2;
const LANGUAGE_BOOST: u64 = 3;

/// Decoded match-info counts / 解码后的匹配计数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchInfo {
    slots: Vec<u32>,
}

impl MatchInfo {
    pub fn parse(blob: &[u8]) -> MatchInfo {
        let slots = blob
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        MatchInfo { slots }
    }

    /// Match count for one column / 某列的匹配计数
    pub fn column_count(&self, column: usize) -> u32 {
        if self.slots.is_empty() {
            return 0;
        }
        let stride = self.slots.len() / COLUMNS;
        if stride == 0 {
            return 0;
        }
        self.slots.get(column * stride).copied().unwrap_or(0)
    }

    pub fn title_count(&self) -> u32 {
        self.column_count(0)
    }

    pub fn lyrics_count(&self) -> u32 {
        self.column_count(1)
    }
}

/// 单行得分
pub fn rank(hit: &FullTextHit, preferred: Language) -> u64 {
    let info = MatchInfo::parse(&hit.match_info);
    let language_boost = if hit.language == preferred {
        LANGUAGE_BOOST
    } else {
        0
    };
    TITLE_WEIGHT * info.title_count() as u64 + info.lyrics_count() as u64 + language_boost
}

/// Rank, truncate, and strip score state / 排序、截断并剥离评分状态
///
/// Runs entirely offline against the local index; pagination state is never
/// consulted here.
pub fn rank_hits(hits: Vec<FullTextHit>, preferred: Language, limit: usize) -> Vec<SearchHit> {
    let mut scored: Vec<(u64, FullTextHit)> = hits
        .into_iter()
        .map(|hit| (rank(&hit, preferred), hit))
        .collect();

    // 稳定排序：同分保持原顺序
    scored.sort_by_key(|(score, _)| std::cmp::Reverse(*score));
    scored.truncate(limit);

    scored
        .into_iter()
        .map(|(_, hit)| SearchHit {
            identifier: hit.identifier,
            title: hit.title,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HymnIdentifier, HymnType};

    fn blob(slots: &[u32]) -> Vec<u8> {
        let mut out = Vec::with_capacity(slots.len() * 4);
        for slot in slots {
            out.extend_from_slice(&slot.to_le_bytes());
        }
        out
    }

    fn hit(number: &str, language: Language, slots: &[u32]) -> FullTextHit {
        FullTextHit {
            identifier: HymnIdentifier::new(HymnType::Classic, number),
            title: format!("Hymn {}", number),
            language,
            match_info: blob(slots),
        }
    }

    #[test]
    fn test_match_info_wide_and_narrow_layouts() {
        // 每列四个槽位
        let wide = MatchInfo::parse(&blob(&[1, 0, 0, 0, 2, 0, 0, 0]));
        assert_eq!(wide.title_count(), 1);
        assert_eq!(wide.lyrics_count(), 2);

        // 每列一个槽位
        let narrow = MatchInfo::parse(&blob(&[0, 5]));
        assert_eq!(narrow.title_count(), 0);
        assert_eq!(narrow.lyrics_count(), 5);

        let empty = MatchInfo::parse(&[]);
        assert_eq!(empty.title_count(), 0);
    }

    #[test]
    fn test_rank_formula() {
        // title=1, lyrics=2, 首选语言: 2*1 + 2 + 3 = 7
        let preferred = hit("1", Language::English, &[1, 0, 0, 0, 2, 0, 0, 0]);
        assert_eq!(rank(&preferred, Language::English), 7);

        // title=0, lyrics=5, 非首选语言: 0 + 5 + 0 = 5
        let other = hit("2", Language::Chinese, &[0, 5]);
        assert_eq!(rank(&other, Language::English), 5);

        let ranked = rank_hits(
            vec![other.clone(), preferred.clone()],
            Language::English,
            50,
        );
        assert_eq!(ranked[0].identifier.number, "1");
        assert_eq!(ranked[1].identifier.number, "2");
    }

    #[test]
    fn test_huge_counts_do_not_overflow() {
        let loud = hit("1", Language::English, &[u32::MAX, u32::MAX]);
        assert_eq!(
            rank(&loud, Language::English),
            2 * u32::MAX as u64 + u32::MAX as u64 + 3
        );
    }

    #[test]
    fn test_sort_is_stable_for_equal_ranks() {
        // 同分（都为 2*1+0+3=5）按输入顺序输出
        let hits: Vec<FullTextHit> = (0..10)
            .map(|i| hit(&i.to_string(), Language::English, &[1, 0]))
            .collect();
        let ranked = rank_hits(hits, Language::English, 50);
        let numbers: Vec<&str> = ranked.iter().map(|h| h.identifier.number.as_str()).collect();
        assert_eq!(
            numbers,
            vec!["0", "1", "2", "3", "4", "5", "6", "7", "8", "9"]
        );
    }

    #[test]
    fn test_truncates_to_limit() {
        let hits: Vec<FullTextHit> = (0..80)
            .map(|i| hit(&i.to_string(), Language::English, &[1, 0]))
            .collect();
        let ranked = rank_hits(hits, Language::English, 50);
        assert_eq!(ranked.len(), 50);
    }
}
