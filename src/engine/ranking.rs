//! Trading-value leaderboard.
//!
//! Resolves realtime quotes for a fixed watch-list through the shared
//! fallback resolver, ranks them by trading value and keeps the board for
//! a short TTL. Symbols that only got a synthetic quote are left off the
//! board rather than ranked on placeholder numbers.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::{RankingsConfig, WatchlistEntry};
use crate::sources::fallback::FallbackResolver;
use crate::types::{RankingBoard, RealtimeQuote, StockRanking};

struct CachedBoard {
    board: RankingBoard,
    stored_at: DateTime<Utc>,
}

pub struct RankingService {
    resolver: Arc<FallbackResolver>,
    watchlist: Vec<WatchlistEntry>,
    limit: usize,
    ttl: ChronoDuration,
    cache: RwLock<Option<CachedBoard>>,
}

impl RankingService {
    pub fn new(
        resolver: Arc<FallbackResolver>,
        watchlist: Vec<WatchlistEntry>,
        limit: usize,
        ttl: Duration,
    ) -> Self {
        Self {
            resolver,
            watchlist,
            limit: limit.max(1),
            ttl: ChronoDuration::from_std(ttl).unwrap_or(ChronoDuration::zero()),
            cache: RwLock::new(None),
        }
    }

    pub fn from_config(resolver: Arc<FallbackResolver>, cfg: &RankingsConfig) -> Self {
        Self::new(
            resolver,
            cfg.watchlist.clone(),
            cfg.limit,
            Duration::from_secs(cfg.ttl_secs),
        )
    }

    pub fn watchlist(&self) -> &[WatchlistEntry] {
        &self.watchlist
    }

    /// Current board, served from cache unless stale or `force_refresh`.
    pub async fn rankings(&self, force_refresh: bool) -> RankingBoard {
        if !force_refresh {
            if let Some(cached) = self.cache.read().await.as_ref() {
                if Utc::now() - cached.stored_at < self.ttl {
                    debug!(count = cached.board.count, "Rankings cache hit");
                    return cached.board.clone();
                }
            }
        }

        let started = Instant::now();
        info!(symbols = self.watchlist.len(), force_refresh, "Collecting rankings");

        let quotes = join_all(
            self.watchlist
                .iter()
                .map(|entry| self.resolver.resolve_realtime(&entry.symbol, entry.market)),
        )
        .await;

        let rankings = rank_quotes(self.watchlist.iter().zip(quotes), self.limit);
        let board = RankingBoard {
            count: rankings.len(),
            rankings,
            generated_at: Utc::now(),
        };

        info!(
            ranked = board.count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Rankings collected"
        );

        // An empty board means every source is down; retry on the next call.
        if board.rankings.is_empty() {
            warn!("No genuine quotes for any watch-list symbol");
        } else if self.ttl > ChronoDuration::zero() {
            *self.cache.write().await = Some(CachedBoard {
                board: board.clone(),
                stored_at: Utc::now(),
            });
        }

        board
    }
}

/// Drop synthetic or malformed quotes, sort by trading value (descending,
/// stable so ties keep watch-list order), number from 1 and keep `limit`.
fn rank_quotes<'a>(
    entries: impl Iterator<Item = (&'a WatchlistEntry, RealtimeQuote)>,
    limit: usize,
) -> Vec<StockRanking> {
    let mut genuine: Vec<(&WatchlistEntry, RealtimeQuote)> = entries
        .filter(|(entry, quote)| {
            let keep = !quote.synthetic && quote.is_well_formed();
            if !keep {
                debug!(symbol = %entry.symbol, "Skipping symbol without a genuine quote");
            }
            keep
        })
        .collect();

    genuine.sort_by(|(_, a), (_, b)| b.trading_value.total_cmp(&a.trading_value));

    genuine
        .into_iter()
        .take(limit)
        .enumerate()
        .map(|(i, (entry, quote))| StockRanking {
            rank: i + 1,
            symbol: entry.symbol.clone(),
            name: entry.name.clone(),
            market: entry.market,
            current_price: quote.current_price,
            change_rate: quote.change_rate,
            trading_value: quote.trading_value,
            source: quote.source,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
