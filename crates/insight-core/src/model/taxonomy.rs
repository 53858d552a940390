//! Sector classification taxonomy and the symbol mapping

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// One classification code at one level (1 broad .. 4 narrow)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationNode {
    pub code: String,
    pub local_name: String,
    #[serde(default)]
    pub english_name: String,
    pub level: u8,
}

impl ClassificationNode {
    pub fn new(
        code: impl Into<String>,
        local_name: impl Into<String>,
        english_name: impl Into<String>,
        level: u8,
    ) -> Self {
        Self {
            code: code.into(),
            local_name: local_name.into(),
            english_name: english_name.into(),
            level,
        }
    }
}

/// A traded symbol and its classification chain, broad to narrow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolClassification {
    pub symbol: String,
    pub company_name: String,
    #[serde(default)]
    pub classification_codes: Vec<String>,
    #[serde(default)]
    pub classification_names: Vec<String>,
}

/// Raw taxonomy as delivered by a provider or stored snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonomySnapshot {
    #[serde(default)]
    pub nodes: Vec<ClassificationNode>,
    #[serde(default)]
    pub symbols: Vec<SymbolClassification>,
}

impl TaxonomySnapshot {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Loaded, indexed taxonomy
///
/// Symbols are keyed by their uppercase form. Entries without any
/// classification code are not mapped.
#[derive(Debug, Clone, Default)]
pub struct ClassificationTaxonomy {
    nodes: Vec<ClassificationNode>,
    codes: HashSet<String>,
    symbols: BTreeMap<String, SymbolClassification>,
}

impl ClassificationTaxonomy {
    pub fn from_snapshot(snapshot: TaxonomySnapshot) -> Self {
        let mut nodes = snapshot.nodes;
        nodes.sort_by(|a, b| a.level.cmp(&b.level).then_with(|| a.code.cmp(&b.code)));
        nodes.dedup_by(|a, b| a.code == b.code && a.level == b.level);

        let codes = nodes.iter().map(|n| n.code.clone()).collect();
        let symbols = snapshot
            .symbols
            .into_iter()
            .filter(|s| !s.classification_codes.is_empty())
            .map(|mut s| {
                s.symbol = normalize_symbol(&s.symbol);
                (s.symbol.clone(), s)
            })
            .collect();

        Self {
            nodes,
            codes,
            symbols,
        }
    }

    pub fn to_snapshot(&self) -> TaxonomySnapshot {
        TaxonomySnapshot {
            nodes: self.nodes.clone(),
            symbols: self.symbols.values().cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[ClassificationNode] {
        &self.nodes
    }

    pub fn nodes_at_level(&self, level: u8) -> impl Iterator<Item = &ClassificationNode> {
        self.nodes.iter().filter(move |n| n.level == level)
    }

    pub fn node(&self, code: &str) -> Option<&ClassificationNode> {
        self.nodes.iter().find(|n| n.code == code)
    }

    pub fn contains_code(&self, code: &str) -> bool {
        self.codes.contains(code)
    }

    /// Case-insensitive symbol lookup
    pub fn lookup_symbol(&self, symbol: &str) -> Option<&SymbolClassification> {
        self.symbols.get(&normalize_symbol(symbol))
    }

    pub fn symbols(&self) -> impl Iterator<Item = &SymbolClassification> {
        self.symbols.values()
    }

    pub fn symbol_count(&self) -> usize {
        self.symbols.len()
    }

    /// Count of nodes per level, levels 1 through 4
    pub fn level_counts(&self) -> [usize; 4] {
        let mut counts = [0; 4];
        for node in &self.nodes {
            if (1..=4).contains(&node.level) {
                counts[usize::from(node.level) - 1] += 1;
            }
        }
        counts
    }
}

/// Uppercase, trimmed symbol form used for every lookup
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}

#[cfg(test)]
pub(crate) fn sample_taxonomy() -> ClassificationTaxonomy {
    ClassificationTaxonomy::from_snapshot(TaxonomySnapshot {
        nodes: vec![
            ClassificationNode::new("8000", "Tài chính", "Financials", 1),
            ClassificationNode::new("2000", "Công nghiệp", "Industrials", 1),
            ClassificationNode::new("8300", "Ngân hàng", "Banks", 2),
            ClassificationNode::new("8350", "Ngân hàng", "Banks", 3),
            ClassificationNode::new("8355", "Ngân hàng", "Banks", 4),
            ClassificationNode::new("1700", "Tài nguyên Cơ bản", "Basic Resources", 2),
        ],
        symbols: vec![
            SymbolClassification {
                symbol: "ACB".to_string(),
                company_name: "Ngân hàng TMCP Á Châu".to_string(),
                classification_codes: vec!["8000".into(), "8300".into(), "8350".into(), "8355".into()],
                classification_names: vec!["Tài chính".into(), "Ngân hàng".into(), "Ngân hàng".into(), "Ngân hàng".into()],
            },
            SymbolClassification {
                symbol: "hpg".to_string(),
                company_name: "Công ty Cổ phần Tập đoàn Hòa Phát".to_string(),
                classification_codes: vec!["1000".into(), "1700".into()],
                classification_names: vec!["Nguyên vật liệu".into(), "Tài nguyên Cơ bản".into()],
            },
            SymbolClassification {
                symbol: "VCB".to_string(),
                company_name: "Ngân hàng TMCP Ngoại thương Việt Nam".to_string(),
                classification_codes: vec!["8000".into(), "8300".into()],
                classification_names: vec!["Tài chính".into(), "Ngân hàng".into()],
            },
            SymbolClassification {
                symbol: "NOCODE".to_string(),
                company_name: "Unclassified".to_string(),
                classification_codes: vec![],
                classification_names: vec![],
            },
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbols_are_normalized_and_filtered() {
        let taxonomy = sample_taxonomy();
        assert_eq!(taxonomy.symbol_count(), 3);
        assert!(taxonomy.lookup_symbol(" Hpg ").is_some());
        assert!(taxonomy.lookup_symbol("NOCODE").is_none());
    }

    #[test]
    fn test_codes_and_levels() {
        let taxonomy = sample_taxonomy();
        assert!(taxonomy.contains_code("8355"));
        assert!(!taxonomy.contains_code("9999"));
        assert_eq!(taxonomy.level_counts(), [2, 2, 1, 1]);
        assert_eq!(taxonomy.nodes_at_level(1).count(), 2);
        assert_eq!(taxonomy.node("1700").map(|n| n.level), Some(2));
    }

    #[test]
    fn test_snapshot_round_trip_keeps_mapping() {
        let taxonomy = sample_taxonomy();
        let reloaded = ClassificationTaxonomy::from_snapshot(taxonomy.to_snapshot());
        assert_eq!(reloaded.symbol_count(), taxonomy.symbol_count());
        assert_eq!(reloaded.nodes().len(), taxonomy.nodes().len());
    }
}
