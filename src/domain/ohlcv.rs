//! Price bars and per-(symbol, timeframe) series.

use chrono::{DateTime, Utc};

use crate::domain::error::TradeguardError;
use crate::domain::timeframe::Timeframe;

/// Upper bound on synthetic bars inserted into a single gap by [`OhlcSeries::forward_fill`].
pub const MAX_FORWARD_FILL: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct PriceBar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl PriceBar {
    /// max(high - low, |high - prev_close|, |low - prev_close|)
    pub fn true_range(&self, prev_close: f64) -> f64 {
        let hl = self.high - self.low;
        let hc = (self.high - prev_close).abs();
        let lc = (self.low - prev_close).abs();
        hl.max(hc).max(lc)
    }

    fn flat(timestamp: DateTime<Utc>, price: f64) -> Self {
        PriceBar {
            timestamp,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 0.0,
        }
    }
}

/// Append-only bar series. Timestamps are strictly increasing.
#[derive(Debug, Clone)]
pub struct OhlcSeries {
    pub symbol: String,
    pub timeframe: Timeframe,
    bars: Vec<PriceBar>,
}

impl OhlcSeries {
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
            bars: Vec::new(),
        }
    }

    pub fn from_bars(
        symbol: impl Into<String>,
        timeframe: Timeframe,
        bars: Vec<PriceBar>,
    ) -> Result<Self, TradeguardError> {
        let mut series = Self::new(symbol, timeframe);
        series.bars.reserve(bars.len());
        for bar in bars {
            series.push(bar)?;
        }
        Ok(series)
    }

    pub fn push(&mut self, bar: PriceBar) -> Result<(), TradeguardError> {
        if let Some(last) = self.bars.last() {
            if bar.timestamp <= last.timestamp {
                return Err(TradeguardError::data(format!(
                    "{} {}: bar at {} is not after last bar at {}",
                    self.symbol, self.timeframe, bar.timestamp, last.timestamp
                )));
            }
        }
        self.bars.push(bar);
        Ok(())
    }

    pub fn bars(&self) -> &[PriceBar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn last(&self) -> Option<&PriceBar> {
        self.bars.last()
    }

    /// The most recent `n` bars (or all of them when fewer exist).
    pub fn window(&self, n: usize) -> &[PriceBar] {
        let start = self.bars.len().saturating_sub(n);
        &self.bars[start..]
    }

    /// Returns a copy with flat bars inserted for every missing interval.
    ///
    /// A synthetic bar repeats the previous close with zero volume. Gaps longer than
    /// [`MAX_FORWARD_FILL`] bars are rejected rather than papered over.
    pub fn forward_fill(&self) -> Result<OhlcSeries, TradeguardError> {
        let step = self.timeframe.duration();
        let mut filled = Vec::with_capacity(self.bars.len());

        for bar in &self.bars {
            if let Some((prev_ts, prev_close)) = filled.last().map(|p: &PriceBar| (p.timestamp, p.close)) {
                let mut next = prev_ts + step;
                let mut inserted = 0;
                while next < bar.timestamp {
                    if inserted == MAX_FORWARD_FILL {
                        return Err(TradeguardError::data(format!(
                            "{} {}: gap between {} and {} exceeds {} bars",
                            self.symbol, self.timeframe, prev_ts, bar.timestamp, MAX_FORWARD_FILL
                        )));
                    }
                    filled.push(PriceBar::flat(next, prev_close));
                    inserted += 1;
                    next += step;
                }
            }
            filled.push(bar.clone());
        }

        Ok(OhlcSeries {
            symbol: self.symbol.clone(),
            timeframe: self.timeframe,
            bars: filled,
        })
    }

    /// Fails when the last bar is older than `max_age` at `now`.
    pub fn ensure_fresh(
        &self,
        now: DateTime<Utc>,
        max_age: chrono::Duration,
    ) -> Result<(), TradeguardError> {
        let last = self.bars.last().ok_or_else(|| {
            TradeguardError::data(format!("{} {}: empty series", self.symbol, self.timeframe))
        })?;
        let age = now - last.timestamp;
        if age > max_age {
            return Err(TradeguardError::data(format!(
                "{} {}: last bar at {} is stale ({}s old)",
                self.symbol,
                self.timeframe,
                last.timestamp,
                age.num_seconds()
            )));
        }
        Ok(())
    }
}
