//! Merge collected items and drop duplicates by canonical URL

use crate::model::{ContentCategory, ContentItem};
use std::collections::{BTreeMap, HashSet};
use tracing::info;
use url::Url;

const TRACKING_PARAMS: [&str; 4] = ["fbclid", "gclid", "ref", "ref_src"];

/// Canonical form of a content URL
///
/// Scheme and host are lowercased, fragments, tracking parameters and a
/// trailing path slash are removed. Unparseable input is only trimmed.
pub fn canonical_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(mut url) = Url::parse(trimmed) else {
        return trimmed.to_string();
    };

    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !key.starts_with("utm_") && !TRACKING_PARAMS.contains(&key.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }

    url.to_string()
}

/// Deduplicated items grouped by declared category
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartitionedContent {
    partitions: BTreeMap<ContentCategory, Vec<ContentItem>>,
}

impl PartitionedContent {
    pub fn items(&self, category: ContentCategory) -> &[ContentItem] {
        self.partitions.get(&category).map_or(&[], Vec::as_slice)
    }

    pub fn company(&self) -> &[ContentItem] {
        self.items(ContentCategory::Company)
    }

    /// Sector and macro items, the input to the market context
    pub fn contextual(&self) -> Vec<ContentItem> {
        ContentCategory::ALL
            .iter()
            .filter(|c| c.is_contextual())
            .flat_map(|c| self.items(*c).iter().cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.partitions.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_items(self) -> Vec<ContentItem> {
        self.partitions.into_values().flatten().collect()
    }
}

/// Removes duplicate items within each category partition
///
/// The first occurrence of a canonical URL wins and input order is kept,
/// so deduplicating an already deduplicated batch changes nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentDeduplicator;

impl ContentDeduplicator {
    pub fn new() -> Self {
        Self
    }

    pub fn deduplicate(&self, items: impl IntoIterator<Item = ContentItem>) -> PartitionedContent {
        let mut grouped: BTreeMap<ContentCategory, Vec<ContentItem>> = BTreeMap::new();
        for item in items {
            grouped.entry(item.category).or_default().push(item);
        }

        let mut partitions = BTreeMap::new();
        for (category, group) in grouped {
            let before = group.len();
            let unique = dedup_by_url(group);
            info!("Deduplicated {category}: {before} -> {}", unique.len());
            partitions.insert(category, unique);
        }
        PartitionedContent { partitions }
    }
}

fn dedup_by_url(items: Vec<ContentItem>) -> Vec<ContentItem> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(canonical_url(&item.url)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn item(url: &str, source: &str, category: ContentCategory) -> ContentItem {
        ContentItem::new(
            url,
            NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            "text",
            source,
            category,
        )
    }

    #[test]
    fn test_canonical_url() {
        assert_eq!(
            canonical_url("HTTPS://CafeF.vn/tin-tuc/hpg.chn/?utm_source=tg&id=5#top"),
            "https://cafef.vn/tin-tuc/hpg.chn?id=5"
        );
        assert_eq!(canonical_url("https://t.me/vnmacro/10?fbclid=x"), "https://t.me/vnmacro/10");
        assert_eq!(canonical_url("  not a url "), "not a url");
    }

    #[test]
    fn test_same_url_from_two_sources_is_one_item() {
        let items = vec![
            item("https://cafef.vn/a", "cafef", ContentCategory::Company),
            item("https://cafef.vn/a/", "telegram relay", ContentCategory::Company),
            item("https://cafef.vn/b", "cafef", ContentCategory::Company),
            item("https://t.me/macro/1", "macro", ContentCategory::Macro),
        ];
        let partitioned = ContentDeduplicator::new().deduplicate(items);

        assert_eq!(partitioned.company().len(), 2);
        assert_eq!(partitioned.company()[0].source_name, "cafef");
        assert_eq!(partitioned.items(ContentCategory::Macro).len(), 1);
        assert!(partitioned.items(ContentCategory::Sector).is_empty());
        assert_eq!(partitioned.contextual().len(), 1);
        assert_eq!(partitioned.len(), 3);
    }

    #[test]
    fn test_deduplication_is_idempotent() {
        let items = vec![
            item("https://a.vn/1", "s1", ContentCategory::Sector),
            item("https://a.vn/1#x", "s2", ContentCategory::Sector),
            item("https://a.vn/2", "s1", ContentCategory::Company),
            item("https://a.vn/2", "s1", ContentCategory::Company),
        ];
        let dedup = ContentDeduplicator::new();
        let once = dedup.deduplicate(items);
        let twice = dedup.deduplicate(once.clone().into_items());
        assert_eq!(once, twice);
    }
}
