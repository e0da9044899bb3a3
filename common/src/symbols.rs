use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use tracing::{error, info};

use crate::models::Symbol;

pub const DEFAULT_QUOTE: &str = "USDT";

/// Read-only supplier of the pairs to ingest, in ingestion order.
#[async_trait]
pub trait SymbolSource: Send + Sync {
    async fn load(&self) -> Result<Vec<Symbol>>;
}

/// Fixed list, e.g. from the command line.
pub struct StaticSymbols {
    entries: Vec<String>,
    quote: String,
}

impl StaticSymbols {
    pub fn new(entries: Vec<String>, quote: impl Into<String>) -> Self {
        StaticSymbols {
            entries,
            quote: quote.into(),
        }
    }
}

#[async_trait]
impl SymbolSource for StaticSymbols {
    async fn load(&self) -> Result<Vec<Symbol>> {
        Ok(to_pairs(self.entries.iter().map(String::as_str), &self.quote))
    }
}

/// One base asset or pair per line; blank lines and `#` comments skipped.
pub struct FileSymbols {
    path: PathBuf,
    quote: String,
}

impl FileSymbols {
    pub fn new(path: impl Into<PathBuf>, quote: impl Into<String>) -> Self {
        FileSymbols {
            path: path.into(),
            quote: quote.into(),
        }
    }
}

#[async_trait]
impl SymbolSource for FileSymbols {
    async fn load(&self) -> Result<Vec<Symbol>> {
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read symbols file {}", self.path.display()))?;
        let entries = content
            .lines()
            .map(|line| line.split('#').next().unwrap_or_default().trim())
            .filter(|line| !line.is_empty());
        Ok(to_pairs(entries, &self.quote))
    }
}

/// Binance-listed assets from the `cryptos` table.
pub struct PostgresSymbols {
    db_url: String,
    enabled_only: bool,
    quote: String,
}

const BINANCE_ASSETS_QUERY: &str = "SELECT c.symbol
    FROM cryptos c
    JOIN exchanges_cryptos ec ON c.id = ec.crypto_id
    JOIN exchanges e ON ec.exchange_id = e.id
    WHERE LOWER(e.name) LIKE '%binance%'
    ORDER BY c.id";

const ENABLED_BINANCE_ASSETS_QUERY: &str = "SELECT c.symbol
    FROM cryptos c
    JOIN exchanges_cryptos ec ON c.id = ec.crypto_id
    JOIN exchanges e ON ec.exchange_id = e.id
    WHERE LOWER(e.name) LIKE '%binance%'
    AND c.is_enabled = 1
    ORDER BY c.id";

impl PostgresSymbols {
    pub fn new(db_url: impl Into<String>, enabled_only: bool, quote: impl Into<String>) -> Self {
        PostgresSymbols {
            db_url: db_url.into(),
            enabled_only,
            quote: quote.into(),
        }
    }

    fn query(&self) -> &'static str {
        if self.enabled_only {
            ENABLED_BINANCE_ASSETS_QUERY
        } else {
            BINANCE_ASSETS_QUERY
        }
    }
}

#[async_trait]
impl SymbolSource for PostgresSymbols {
    async fn load(&self) -> Result<Vec<Symbol>> {
        let (client, connection) = tokio_postgres::connect(&self.db_url, tls_connector()?)
            .await
            .context("failed to connect to symbol database")?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                error!(error = %err, "symbol database connection error");
            }
        });

        let rows = client
            .query(self.query(), &[])
            .await
            .context("failed to query enabled symbols")?;
        let assets: Vec<String> = rows
            .iter()
            .map(|row| row.try_get::<_, String>(0))
            .collect::<Result<_, _>>()
            .context("unexpected symbol column type")?;
        info!(
            count = assets.len(),
            enabled_only = self.enabled_only,
            "loaded symbols from database"
        );
        Ok(to_pairs(assets.iter().map(String::as_str), &self.quote))
    }
}

/// TLS is negotiated when the server offers it; `sslmode=disable` in the
/// url still connects in plain text.
fn tls_connector() -> Result<MakeTlsConnector> {
    let connector = TlsConnector::builder()
        .build()
        .context("failed to build TLS connector")?;
    Ok(MakeTlsConnector::new(connector))
}

/// Appends the quote suffix, keeps first-seen order and drops duplicates.
pub fn to_pairs<'a>(entries: impl IntoIterator<Item = &'a str>, quote: &str) -> Vec<Symbol> {
    let mut seen = HashSet::new();
    entries
        .into_iter()
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| Symbol::with_quote(entry, quote))
        .filter(|symbol| seen.insert(symbol.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_symbols_get_the_quote_suffix() {
        let source = StaticSymbols::new(vec!["btc".into(), "ETHUSDT".into()], DEFAULT_QUOTE);
        let symbols = source.load().await.unwrap();
        assert_eq!(
            symbols,
            vec![Symbol::new("BTCUSDT"), Symbol::new("ETHUSDT")]
        );
    }

    #[tokio::test]
    async fn file_symbols_skip_comments_and_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("symbols.txt");
        fs::write(&path, "# majors\nBTC\n\nETH  # second\nbtc\nSOL\n").unwrap();
        let symbols = FileSymbols::new(&path, "USDT").load().await.unwrap();
        assert_eq!(
            symbols,
            vec![
                Symbol::new("BTCUSDT"),
                Symbol::new("ETHUSDT"),
                Symbol::new("SOLUSDT"),
            ]
        );
    }

    #[tokio::test]
    async fn missing_symbols_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileSymbols::new(dir.path().join("absent.txt"), "USDT");
        assert!(source.load().await.is_err());
    }

    #[test]
    fn tls_connector_builds_with_system_roots() {
        assert!(tls_connector().is_ok());
    }

    #[test]
    fn enabled_filter_selects_query() {
        assert!(PostgresSymbols::new("postgres://x", true, "USDT")
            .query()
            .contains("is_enabled = 1"));
        assert!(!PostgresSymbols::new("postgres://x", false, "USDT")
            .query()
            .contains("is_enabled"));
    }
}
