//! Call-auction snapshot refresh: the 09:26 tick per stock, stored in
//! `quote_history`, with a non-clobbering partial update of the same
//! day's `daily_basic` row.

use super::engine::IngestionEngine;
use crate::domain::types::AuctionSnapshot;
use anyhow::Result;
use chrono::NaiveDate;
use tracing::{info, warn};

impl IngestionEngine {
    /// Fetch the day's auction snapshots (optionally narrowed to a code
    /// list) and replace the stored window. With `force`, every prior
    /// row in [09:20, 09:30) is deleted first; otherwise only the
    /// 09:26 snapshot itself is replaced.
    pub async fn refresh_auction(
        &self,
        date: NaiveDate,
        codes: Option<&[String]>,
        force: bool,
    ) -> Result<u64> {
        let mut snaps: Vec<AuctionSnapshot> = Vec::new();
        match codes {
            Some(codes) if !codes.is_empty() => {
                for code in codes {
                    match self
                        .with_rate_limit_retry("auction_by_date", || {
                            self.router.auction_by_date(date, Some(code), None)
                        })
                        .await
                    {
                        Ok(rows) => snaps.extend(rows),
                        Err(err) => warn!("{}: auction pull failed for {}: {}", date, code, err),
                    }
                    self.pace().await;
                }
            }
            _ => {
                match self
                    .with_rate_limit_retry("auction_by_date", || {
                        self.router.auction_by_date(date, None, None)
                    })
                    .await
                {
                    Ok(rows) => snaps = rows,
                    Err(err) => {
                        warn!("{}: auction pull failed: {}", date, err);
                        return Ok(0);
                    }
                }
            }
        }

        if snaps.is_empty() {
            info!("{}: no auction snapshots available", date);
            return Ok(0);
        }

        // Prints above the board's daily limit are vendor glitches.
        let total = snaps.len();
        snaps.retain(AuctionSnapshot::within_limit);
        let dropped = total - snaps.len();
        if dropped > 0 {
            warn!("{}: dropped {} limit-violating auction rows", date, dropped);
        }

        self.market.clear_auction_window(date, force).await?;
        let inserted = self.market.insert_auction_snapshots(&snaps).await?;

        // Auction figures only fill daily_basic gaps; the valuation
        // fields from the main pull stay untouched.
        for snap in &snaps {
            self.market.apply_auction_basic(snap).await?;
        }

        info!("{}: stored {} auction snapshots", date, inserted);
        Ok(inserted)
    }
}
