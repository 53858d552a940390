//! SQLite store over sqlx

use super::InsightStore;
use crate::api::{MarketDataProvider, PriceBar};
use crate::error::{InsightError, Result};
use crate::model::{
    ClassificationNode, ConsolidatedStockInsight, ContentItem, SymbolClassification, TaxonomySnapshot,
    normalize_symbol,
};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS content_items (
    url TEXT PRIMARY KEY,
    published_date TEXT NOT NULL,
    raw_text TEXT NOT NULL,
    source_name TEXT NOT NULL,
    category TEXT NOT NULL,
    collected_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS taxonomy_nodes (
    code TEXT NOT NULL,
    level INTEGER NOT NULL,
    local_name TEXT NOT NULL,
    english_name TEXT NOT NULL,
    PRIMARY KEY (code, level)
);
CREATE TABLE IF NOT EXISTS symbol_classifications (
    symbol TEXT PRIMARY KEY,
    company_name TEXT NOT NULL,
    classification_codes TEXT NOT NULL,
    classification_names TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS insights (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    symbol TEXT NOT NULL,
    status TEXT NOT NULL,
    overall_sentiment TEXT NOT NULL,
    majority_sentiment TEXT NOT NULL,
    confidence_score REAL NOT NULL,
    mention_count INTEGER NOT NULL,
    recommendation TEXT NOT NULL,
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_insights_run ON insights (run_id);
CREATE TABLE IF NOT EXISTS mentions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    symbol TEXT NOT NULL,
    source_name TEXT NOT NULL,
    url TEXT NOT NULL,
    published_date TEXT NOT NULL,
    sentiment TEXT NOT NULL,
    confidence TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS price_bars (
    symbol TEXT NOT NULL,
    date TEXT NOT NULL,
    open REAL NOT NULL,
    high REAL NOT NULL,
    low REAL NOT NULL,
    close REAL NOT NULL,
    volume INTEGER NOT NULL,
    PRIMARY KEY (symbol, date)
);
CREATE TABLE IF NOT EXISTS companies (
    symbol TEXT PRIMARY KEY,
    company_name TEXT NOT NULL,
    classification_codes TEXT NOT NULL,
    classification_names TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
";

fn date_text(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn parse_date(text: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .map_err(|e| InsightError::Store(format!("bad stored date '{text}': {e}")))
}

/// [`InsightStore`] backed by a SQLite database
///
/// Tables are created on connect. Also serves stored bars as a
/// [`MarketDataProvider`].
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `database_url`
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    /// Private in-memory database on a single connection
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::with_pool(pool).await
    }

    pub async fn with_pool(pool: SqlitePool) -> Result<Self> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(&self) -> Result<()> {
        // sqlx runs one statement per query
        for statement in SCHEMA.split(';') {
            let stmt = statement.trim();
            if !stmt.is_empty() {
                sqlx::query(stmt).execute(&self.pool).await?;
            }
        }
        debug!("SQLite schema ready");
        Ok(())
    }
}

#[async_trait]
impl InsightStore for SqliteStore {
    async fn content_exists(&self, url: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM content_items WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn insert_content_items(&self, items: &[ContentItem]) -> Result<usize> {
        let collected_at = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;
        for item in items {
            inserted += sqlx::query(
                "INSERT OR IGNORE INTO content_items
                 (url, published_date, raw_text, source_name, category, collected_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&item.url)
            .bind(date_text(item.published_date))
            .bind(&item.raw_text)
            .bind(&item.source_name)
            .bind(item.category.as_str())
            .bind(&collected_at)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }
        tx.commit().await?;
        Ok(usize::try_from(inserted).unwrap_or(usize::MAX))
    }

    async fn load_taxonomy_snapshot(&self) -> Result<Option<TaxonomySnapshot>> {
        let node_rows = sqlx::query(
            "SELECT code, level, local_name, english_name FROM taxonomy_nodes ORDER BY level, code",
        )
        .fetch_all(&self.pool)
        .await?;
        if node_rows.is_empty() {
            return Ok(None);
        }

        let mut nodes = Vec::with_capacity(node_rows.len());
        for row in node_rows {
            let level: i64 = row.try_get("level")?;
            nodes.push(ClassificationNode::new(
                row.try_get::<String, _>("code")?,
                row.try_get::<String, _>("local_name")?,
                row.try_get::<String, _>("english_name")?,
                u8::try_from(level).unwrap_or(0),
            ));
        }

        let symbol_rows = sqlx::query(
            "SELECT symbol, company_name, classification_codes, classification_names
             FROM symbol_classifications ORDER BY symbol",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut symbols = Vec::with_capacity(symbol_rows.len());
        for row in symbol_rows {
            let codes: String = row.try_get("classification_codes")?;
            let names: String = row.try_get("classification_names")?;
            symbols.push(SymbolClassification {
                symbol: row.try_get("symbol")?,
                company_name: row.try_get("company_name")?,
                classification_codes: serde_json::from_str(&codes)?,
                classification_names: serde_json::from_str(&names)?,
            });
        }

        Ok(Some(TaxonomySnapshot { nodes, symbols }))
    }

    async fn save_taxonomy_snapshot(&self, snapshot: &TaxonomySnapshot) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM taxonomy_nodes").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM symbol_classifications").execute(&mut *tx).await?;

        for node in &snapshot.nodes {
            sqlx::query(
                "INSERT OR REPLACE INTO taxonomy_nodes (code, level, local_name, english_name)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(&node.code)
            .bind(i64::from(node.level))
            .bind(&node.local_name)
            .bind(&node.english_name)
            .execute(&mut *tx)
            .await?;
        }
        for entry in &snapshot.symbols {
            sqlx::query(
                "INSERT OR REPLACE INTO symbol_classifications
                 (symbol, company_name, classification_codes, classification_names)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(normalize_symbol(&entry.symbol))
            .bind(&entry.company_name)
            .bind(serde_json::to_string(&entry.classification_codes)?)
            .bind(serde_json::to_string(&entry.classification_names)?)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        info!(
            "Saved taxonomy snapshot: {} nodes, {} symbols",
            snapshot.nodes.len(),
            snapshot.symbols.len()
        );
        Ok(())
    }

    async fn insert_insights(&self, run_id: Uuid, insights: &[ConsolidatedStockInsight]) -> Result<usize> {
        let run_id = run_id.to_string();
        let created_at = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        for insight in insights {
            sqlx::query(
                "INSERT INTO insights
                 (run_id, symbol, status, overall_sentiment, majority_sentiment, confidence_score,
                  mention_count, recommendation, payload, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&run_id)
            .bind(&insight.symbol)
            .bind(insight.status.as_str())
            .bind(insight.overall_sentiment.as_str())
            .bind(insight.majority_sentiment.as_str())
            .bind(insight.confidence_score)
            .bind(i64::try_from(insight.mention_count).unwrap_or(i64::MAX))
            .bind(insight.recommendation.to_string())
            .bind(serde_json::to_string(insight)?)
            .bind(&created_at)
            .execute(&mut *tx)
            .await?;

            for mention in &insight.source_mentions {
                sqlx::query(
                    "INSERT INTO mentions
                     (run_id, symbol, source_name, url, published_date, sentiment, confidence)
                     VALUES (?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(&run_id)
                .bind(&insight.symbol)
                .bind(&mention.source_name)
                .bind(&mention.url)
                .bind(date_text(mention.published_date))
                .bind(mention.sentiment.as_str())
                .bind(mention.confidence.as_str())
                .execute(&mut *tx)
                .await?;
            }
        }
        tx.commit().await?;
        Ok(insights.len())
    }

    async fn latest_price_date(&self, symbol: &str) -> Result<Option<NaiveDate>> {
        let row = sqlx::query("SELECT MAX(date) AS latest FROM price_bars WHERE symbol = ?")
            .bind(normalize_symbol(symbol))
            .fetch_one(&self.pool)
            .await?;
        let latest: Option<String> = row.try_get("latest")?;
        latest.as_deref().map(parse_date).transpose()
    }

    async fn insert_price_bars(&self, symbol: &str, bars: &[PriceBar]) -> Result<usize> {
        let symbol = normalize_symbol(symbol);
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;
        for bar in bars {
            inserted += sqlx::query(
                "INSERT OR IGNORE INTO price_bars (symbol, date, open, high, low, close, volume)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&symbol)
            .bind(date_text(bar.date))
            .bind(bar.open)
            .bind(bar.high)
            .bind(bar.low)
            .bind(bar.close)
            .bind(i64::try_from(bar.volume).unwrap_or(i64::MAX))
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }
        tx.commit().await?;
        Ok(usize::try_from(inserted).unwrap_or(usize::MAX))
    }

    async fn upsert_companies(&self, companies: &[SymbolClassification]) -> Result<usize> {
        let updated_at = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;
        for company in companies {
            sqlx::query(
                "INSERT INTO companies
                 (symbol, company_name, classification_codes, classification_names, updated_at)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT(symbol) DO UPDATE SET
                    company_name = excluded.company_name,
                    classification_codes = excluded.classification_codes,
                    classification_names = excluded.classification_names,
                    updated_at = excluded.updated_at",
            )
            .bind(normalize_symbol(&company.symbol))
            .bind(&company.company_name)
            .bind(serde_json::to_string(&company.classification_codes)?)
            .bind(serde_json::to_string(&company.classification_names)?)
            .bind(&updated_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(companies.len())
    }
}

#[async_trait]
impl MarketDataProvider for SqliteStore {
    async fn history(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<PriceBar>> {
        let rows = sqlx::query(
            "SELECT date, open, high, low, close, volume FROM price_bars
             WHERE symbol = ? AND date >= ? AND date <= ?
             ORDER BY date",
        )
        .bind(normalize_symbol(symbol))
        .bind(date_text(start))
        .bind(date_text(end))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<PriceBar> {
                let date: String = row.try_get("date")?;
                let volume: i64 = row.try_get("volume")?;
                Ok(PriceBar {
                    date: parse_date(&date)?,
                    open: row.try_get("open")?,
                    high: row.try_get("high")?,
                    low: row.try_get("low")?,
                    close: row.try_get("close")?,
                    volume: u64::try_from(volume).unwrap_or(0),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        AnalysisStatus, Catalysts, ConfidenceLevel, ContentCategory, InsightMetadata, PriceTrend,
        Recommendation, Sentiment, SentimentDistribution, SourceMention, TargetScenarios,
        TimeHorizon, sample_taxonomy,
    };
    use crate::store::memory::bar;

    fn insight(symbol: &str, urls: &[&str]) -> ConsolidatedStockInsight {
        let date = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        let source_mentions: Vec<SourceMention> = urls
            .iter()
            .map(|url| SourceMention {
                source_name: "cafef".to_string(),
                url: (*url).to_string(),
                published_date: date,
                sentiment: Sentiment::Positive,
                confidence: ConfidenceLevel::High,
                narrative: "Lãi tăng".to_string(),
                key_points: vec!["Tín dụng".to_string()],
                risks: vec![],
                item_summary: String::new(),
            })
            .collect();
        ConsolidatedStockInsight {
            symbol: symbol.to_string(),
            company_name: format!("Company {symbol}"),
            classification_codes: vec!["8300".to_string()],
            status: AnalysisStatus::Success,
            overall_sentiment: Sentiment::Positive,
            majority_sentiment: Sentiment::Positive,
            confidence_score: 0.75,
            mention_count: urls.len(),
            sentiment_distribution: SentimentDistribution {
                positive: urls.len(),
                negative: 0,
                neutral: 0,
            },
            recommendation: Recommendation::Buy,
            narrative: "Triển vọng tốt".to_string(),
            investment_thesis: String::new(),
            industry_context: String::new(),
            macro_context: String::new(),
            price_context: String::new(),
            drivers: vec!["NIM".to_string()],
            risks: vec![],
            opportunities: vec![],
            time_horizon: TimeHorizon::MediumTerm,
            target_scenarios: TargetScenarios::default(),
            catalysts: Catalysts::default(),
            research_quality: String::new(),
            data_freshness: String::new(),
            price_trend: PriceTrend::unavailable(symbol, "no price data in lookback window"),
            source_mentions,
            metadata: InsightMetadata {
                sources_count: 1,
                earliest_date: Some(date),
                latest_date: Some(date),
                consolidated_at: Utc::now(),
            },
            error: None,
        }
    }

    #[tokio::test]
    async fn test_content_round_trip_skips_duplicates() {
        let store = SqliteStore::in_memory().await.unwrap();
        let date = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        let item = ContentItem::new("https://cafef.vn/a", date, "text", "cafef", ContentCategory::Company);

        assert!(!store.content_exists(&item.url).await.unwrap());
        assert_eq!(store.insert_content_items(&[item.clone()]).await.unwrap(), 1);
        assert_eq!(store.insert_content_items(&[item.clone()]).await.unwrap(), 0);
        assert!(store.content_exists(&item.url).await.unwrap());
    }

    #[tokio::test]
    async fn test_taxonomy_snapshot_persists_across_connections() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("insight.db").display());
        let snapshot = sample_taxonomy().to_snapshot();

        {
            let store = SqliteStore::connect(&url).await.unwrap();
            assert!(store.load_taxonomy_snapshot().await.unwrap().is_none());
            store.save_taxonomy_snapshot(&snapshot).await.unwrap();
        }

        let reopened = SqliteStore::connect(&url).await.unwrap();
        let loaded = reopened.load_taxonomy_snapshot().await.unwrap().unwrap();
        assert_eq!(loaded.nodes.len(), snapshot.nodes.len());
        assert_eq!(loaded.symbols.len(), 3);
        assert_eq!(loaded.symbols[0].symbol, "ACB");
        assert_eq!(loaded.symbols[0].classification_codes.len(), 4);
    }

    #[tokio::test]
    async fn test_price_bars_latest_date_and_history() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert!(store.latest_price_date("HPG").await.unwrap().is_none());

        let inserted = store
            .insert_price_bars("hpg", &[bar(3, 25.0, 1_000), bar(4, 25.4, 1_500)])
            .await
            .unwrap();
        assert_eq!(inserted, 2);
        assert_eq!(store.insert_price_bars("HPG", &[bar(4, 25.4, 1_500)]).await.unwrap(), 0);
        assert_eq!(
            store.latest_price_date("HPG").await.unwrap(),
            NaiveDate::from_ymd_opt(2025, 3, 4)
        );

        let bars = store
            .history(
                "HPG",
                NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
                NaiveDate::from_ymd_opt(2025, 3, 31).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(bars, vec![bar(3, 25.0, 1_000), bar(4, 25.4, 1_500)]);
    }

    #[tokio::test]
    async fn test_upsert_companies_updates_in_place() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut companies = sample_taxonomy().to_snapshot().symbols;
        assert_eq!(store.upsert_companies(&companies).await.unwrap(), 3);

        companies[0].company_name = "ACB Bank".to_string();
        store.upsert_companies(&companies[..1]).await.unwrap();

        let row = sqlx::query("SELECT COUNT(*) AS n, MAX(company_name) AS name FROM companies WHERE symbol = 'ACB'")
            .fetch_one(store.pool())
            .await
            .unwrap();
        let n: i64 = row.try_get("n").unwrap();
        let name: String = row.try_get("name").unwrap();
        assert_eq!(n, 1);
        assert_eq!(name, "ACB Bank");
    }

    #[tokio::test]
    async fn test_insights_and_mentions_are_stored_per_run() {
        let store = SqliteStore::in_memory().await.unwrap();
        let run_id = Uuid::new_v4();
        let insights = vec![
            insight("ACB", &["https://cafef.vn/1", "https://cafef.vn/2"]),
            insight("HPG", &["https://cafef.vn/3"]),
        ];

        assert_eq!(store.insert_insights(run_id, &insights).await.unwrap(), 2);
        store
            .insert_insights(Uuid::new_v4(), &insights[..1])
            .await
            .unwrap();

        let row = sqlx::query("SELECT COUNT(*) AS n FROM insights WHERE run_id = ?")
            .bind(run_id.to_string())
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(row.try_get::<i64, _>("n").unwrap(), 2);
        let row = sqlx::query("SELECT COUNT(*) AS n FROM mentions WHERE run_id = ?")
            .bind(run_id.to_string())
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(row.try_get::<i64, _>("n").unwrap(), 3);

        let row = sqlx::query(
            "SELECT payload, recommendation FROM insights WHERE run_id = ? AND symbol = 'ACB'",
        )
        .bind(run_id.to_string())
        .fetch_one(store.pool())
        .await
        .unwrap();
        let payload: String = row.try_get("payload").unwrap();
        let stored: ConsolidatedStockInsight = serde_json::from_str(&payload).unwrap();
        assert_eq!(stored.symbol, "ACB");
        assert_eq!(stored.mention_count, 2);
        assert_eq!(stored.sentiment_distribution.positive, 2);
        assert_eq!(stored.recommendation, Recommendation::Buy);
        assert_eq!(stored.source_mentions, insights[0].source_mentions);
        assert_eq!(stored.price_trend, insights[0].price_trend);
        assert_eq!(row.try_get::<String, _>("recommendation").unwrap(), Recommendation::Buy.to_string());
    }
}
