//! Instrument classification and per-class trading rules.
//!
//! Rules are keyed by [`InstrumentClass`], never by the raw symbol string. A broker
//! feed reports symbols with assorted suffixes (`EURUSD.m`, `XAUUSDm`, `US30_i`), so
//! every lookup goes through [`normalize_symbol`] first.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::domain::error::TradeguardError;

const MAJOR_CURRENCIES: [&str; 8] = ["EUR", "GBP", "USD", "JPY", "AUD", "CAD", "CHF", "NZD"];
const OTHER_CURRENCIES: [&str; 10] = [
    "SEK", "NOK", "DKK", "SGD", "HKD", "ZAR", "MXN", "TRY", "PLN", "CNH",
];
const METAL_PREFIXES: [&str; 6] = ["XAU", "XAG", "XPT", "XPD", "GOLD", "SILVER"];
const CRYPTO_PREFIXES: [&str; 10] = [
    "BTC", "ETH", "XRP", "ADA", "DOT", "LINK", "LTC", "SOL", "BNB", "DOGE",
];
const COMMODITY_NAMES: [&str; 4] = ["BRENT", "WTI", "COPPER", "CORN"];
const INDEX_NAMES: [&str; 6] = ["SPX", "NDX", "DAX", "DJI", "FTSE", "NIKKEI"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InstrumentClass {
    ForexMajor,
    ForexMinor,
    ForexJpy,
    Metal,
    Crypto,
    Index,
    Commodity,
    Equity,
}

impl InstrumentClass {
    pub const ALL: [InstrumentClass; 8] = [
        InstrumentClass::ForexMajor,
        InstrumentClass::ForexMinor,
        InstrumentClass::ForexJpy,
        InstrumentClass::Metal,
        InstrumentClass::Crypto,
        InstrumentClass::Index,
        InstrumentClass::Commodity,
        InstrumentClass::Equity,
    ];

    /// Name used in `[class.<name>]` config sections.
    pub fn name(&self) -> &'static str {
        match self {
            InstrumentClass::ForexMajor => "forex_major",
            InstrumentClass::ForexMinor => "forex_minor",
            InstrumentClass::ForexJpy => "forex_jpy",
            InstrumentClass::Metal => "metal",
            InstrumentClass::Crypto => "crypto",
            InstrumentClass::Index => "index",
            InstrumentClass::Commodity => "commodity",
            InstrumentClass::Equity => "equity",
        }
    }

    pub fn tier(&self) -> SymbolTier {
        match self {
            InstrumentClass::ForexMajor | InstrumentClass::Metal => SymbolTier::Primary,
            InstrumentClass::ForexMinor
            | InstrumentClass::ForexJpy
            | InstrumentClass::Index
            | InstrumentClass::Crypto => SymbolTier::Secondary,
            InstrumentClass::Commodity | InstrumentClass::Equity => SymbolTier::Tertiary,
        }
    }

    pub fn default_rules(&self) -> SymbolClassRules {
        let (pip_size, min_stop_distance_pips, price_digits, contract_size, min_lot, lot_step, max_lot) =
            match self {
                InstrumentClass::ForexMajor => (0.0001, 10.0, 5, 100_000.0, 0.01, 0.01, 100.0),
                InstrumentClass::ForexMinor => (0.0001, 15.0, 5, 100_000.0, 0.01, 0.01, 100.0),
                InstrumentClass::ForexJpy => (0.01, 10.0, 3, 100_000.0, 0.01, 0.01, 100.0),
                InstrumentClass::Metal => (0.01, 100.0, 2, 100.0, 0.01, 0.01, 50.0),
                InstrumentClass::Crypto => (1.0, 50.0, 2, 1.0, 0.01, 0.01, 10.0),
                InstrumentClass::Index => (1.0, 10.0, 1, 1.0, 0.1, 0.1, 100.0),
                InstrumentClass::Commodity => (0.01, 30.0, 2, 1_000.0, 0.01, 0.01, 50.0),
                InstrumentClass::Equity => (0.01, 10.0, 2, 1.0, 1.0, 1.0, 1_000.0),
            };
        SymbolClassRules {
            pip_size,
            min_stop_distance_pips,
            price_digits,
            contract_size,
            min_lot,
            lot_step,
            max_lot,
        }
    }
}

impl fmt::Display for InstrumentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for InstrumentClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        InstrumentClass::ALL
            .into_iter()
            .find(|c| c.name() == lower)
            .ok_or_else(|| format!("unknown instrument class '{s}'"))
    }
}

/// Liquidity tier, used by the confidence-gate rescue conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolTier {
    Primary,
    Secondary,
    Tertiary,
}

impl fmt::Display for SymbolTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SymbolTier::Primary => "primary",
            SymbolTier::Secondary => "secondary",
            SymbolTier::Tertiary => "tertiary",
        };
        f.write_str(s)
    }
}

impl FromStr for SymbolTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "primary" => Ok(SymbolTier::Primary),
            "secondary" => Ok(SymbolTier::Secondary),
            "tertiary" => Ok(SymbolTier::Tertiary),
            _ => Err(format!("unknown symbol tier '{s}'")),
        }
    }
}

/// Strips broker decorations and uppercases.
///
/// `EURUSD.m`, `EURUSD_i`, `EURUSDm` and ` eurusd ` all become `EURUSD`.
pub fn normalize_symbol(raw: &str) -> String {
    let trimmed = raw.trim();
    let base = trimmed
        .split(['.', '_'])
        .next()
        .unwrap_or(trimmed)
        .trim_end_matches(|c: char| !c.is_ascii_alphanumeric());
    let base = match base.strip_suffix('m') {
        Some(stripped) if stripped.chars().any(|c| c.is_ascii_uppercase()) => stripped,
        _ => base,
    };
    base.to_ascii_uppercase()
}

fn is_currency(code: &str) -> bool {
    MAJOR_CURRENCIES.contains(&code) || OTHER_CURRENCIES.contains(&code)
}

fn looks_like_index(sym: &str) -> bool {
    if INDEX_NAMES.iter().any(|n| sym.starts_with(n)) {
        return true;
    }
    let letters = sym.chars().take_while(|c| c.is_ascii_alphabetic()).count();
    let digits = sym[letters..].chars().take_while(|c| c.is_ascii_digit()).count();
    letters >= 2 && digits >= 2 && letters + digits == sym.len()
}

/// Ordered pattern rules; the first match wins.
pub fn classify(symbol: &str) -> InstrumentClass {
    let sym = normalize_symbol(symbol);

    if METAL_PREFIXES.iter().any(|p| sym.starts_with(p)) {
        return InstrumentClass::Metal;
    }
    if CRYPTO_PREFIXES.iter().any(|p| sym.starts_with(p)) {
        return InstrumentClass::Crypto;
    }
    if sym.ends_with("OIL") || sym.ends_with("GAS") || COMMODITY_NAMES.contains(&sym.as_str()) {
        return InstrumentClass::Commodity;
    }
    if looks_like_index(&sym) {
        return InstrumentClass::Index;
    }
    if sym.len() == 6 && sym.chars().all(|c| c.is_ascii_uppercase()) {
        let (base, quote) = sym.split_at(3);
        if is_currency(base) && is_currency(quote) {
            if base == "JPY" || quote == "JPY" {
                return InstrumentClass::ForexJpy;
            }
            let usd_leg = base == "USD" || quote == "USD";
            let both_major = MAJOR_CURRENCIES.contains(&base) && MAJOR_CURRENCIES.contains(&quote);
            return if usd_leg && both_major {
                InstrumentClass::ForexMajor
            } else {
                InstrumentClass::ForexMinor
            };
        }
    }
    InstrumentClass::Equity
}

/// Broker-reported per-symbol data, including the current quote.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolSpec {
    pub symbol: String,
    pub pip_size: f64,
    pub min_stop_distance_pips: f64,
    pub price_digits: u32,
    pub contract_size: f64,
    pub bid: f64,
    pub ask: f64,
}

impl SymbolSpec {
    pub fn validate_quote(&self) -> Result<(), TradeguardError> {
        if !(self.bid > 0.0 && self.ask > 0.0) {
            return Err(TradeguardError::data(format!(
                "{}: non-positive quote bid={} ask={}",
                self.symbol, self.bid, self.ask
            )));
        }
        if self.ask < self.bid {
            return Err(TradeguardError::data(format!(
                "{}: crossed quote bid={} ask={}",
                self.symbol, self.bid, self.ask
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SymbolClassRules {
    pub pip_size: f64,
    pub min_stop_distance_pips: f64,
    pub price_digits: u32,
    pub contract_size: f64,
    pub min_lot: f64,
    pub lot_step: f64,
    pub max_lot: f64,
}

impl SymbolClassRules {
    /// Class defaults overlaid with whatever the broker reports.
    pub fn merge_broker(&self, spec: &SymbolSpec) -> SymbolClassRules {
        let mut merged = *self;
        if spec.pip_size > 0.0 {
            merged.pip_size = spec.pip_size;
        }
        if spec.price_digits > 0 {
            merged.price_digits = spec.price_digits;
        }
        if spec.contract_size > 0.0 {
            merged.contract_size = spec.contract_size;
        }
        merged.min_stop_distance_pips = self.min_stop_distance_pips.max(spec.min_stop_distance_pips);
        merged
    }

    /// Currency value of one pip at `lots`.
    pub fn pip_value(&self, lots: f64) -> f64 {
        self.contract_size * self.pip_size * lots
    }

    pub fn min_stop_distance(&self) -> f64 {
        self.min_stop_distance_pips * self.pip_size
    }

    /// Smallest representable price increment at `price_digits`.
    pub fn tick(&self) -> f64 {
        10f64.powi(-(self.price_digits as i32))
    }

    pub fn round_price(&self, price: f64) -> f64 {
        let scale = 10f64.powi(self.price_digits as i32);
        (price * scale).round() / scale
    }

    /// Floors to a whole number of `lot_step`s.
    pub fn floor_lots(&self, lots: f64) -> f64 {
        if self.lot_step <= 0.0 || lots <= 0.0 {
            return 0.0;
        }
        let steps = (lots / self.lot_step + 1e-9).floor();
        ((steps * self.lot_step) * 1e8).round() / 1e8
    }

    pub fn validate(&self, section: &str) -> Result<(), TradeguardError> {
        let positive = [
            ("pip_size", self.pip_size),
            ("contract_size", self.contract_size),
            ("min_lot", self.min_lot),
            ("lot_step", self.lot_step),
            ("max_lot", self.max_lot),
        ];
        for (key, value) in positive {
            if !(value > 0.0) {
                return Err(TradeguardError::invalid(section, key, "must be positive"));
            }
        }
        if self.min_stop_distance_pips < 0.0 {
            return Err(TradeguardError::invalid(
                section,
                "min_stop_distance_pips",
                "must not be negative",
            ));
        }
        if self.max_lot < self.min_lot {
            return Err(TradeguardError::invalid(
                section,
                "max_lot",
                "must be at least min_lot",
            ));
        }
        Ok(())
    }
}

/// Rules per class: built-in defaults plus config overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassRulesTable {
    rules: HashMap<InstrumentClass, SymbolClassRules>,
}

impl Default for ClassRulesTable {
    fn default() -> Self {
        let rules = InstrumentClass::ALL
            .into_iter()
            .map(|c| (c, c.default_rules()))
            .collect();
        Self { rules }
    }
}

impl ClassRulesTable {
    pub fn get(&self, class: InstrumentClass) -> SymbolClassRules {
        self.rules
            .get(&class)
            .copied()
            .unwrap_or_else(|| class.default_rules())
    }

    pub fn set(&mut self, class: InstrumentClass, rules: SymbolClassRules) {
        self.rules.insert(class, rules);
    }

    pub fn lookup(&self, symbol: &str) -> (InstrumentClass, SymbolClassRules) {
        let class = classify(symbol);
        (class, self.get(class))
    }

    /// Effective rules for a live symbol: class defaults merged with the broker spec.
    pub fn resolve(&self, spec: &SymbolSpec) -> (InstrumentClass, SymbolClassRules) {
        let (class, rules) = self.lookup(&spec.symbol);
        (class, rules.merge_broker(spec))
    }
}
