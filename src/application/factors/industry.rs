//! Industry-level valuation anchors used when a stock's own financials
//! are missing. These are configuration data, not code: the embedded
//! defaults can be replaced wholesale from a JSON document without
//! touching the engine.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;

const DEFAULT_PE: f64 = 15.0;
const DEFAULT_GROWTH: f64 = 10.0;

/// (industry, typical PE, typical revenue growth %).
const DEFAULTS: &[(&str, f64, f64)] = &[
    ("银行", 6.5, 8.0),
    ("白酒", 28.0, 15.0),
    ("新能源", 35.0, 25.0),
    ("医药", 25.0, 18.0),
    ("科技", 30.0, 20.0),
    ("房地产", 8.0, 5.0),
    ("制造业", 15.0, 12.0),
    ("化工", 12.0, 10.0),
    ("化工原料", 12.0, 10.0),
    ("林业", 15.0, 8.0),
    ("有色金属", 10.0, 12.0),
    ("机械设备", 14.0, 10.0),
    ("电子", 25.0, 18.0),
    ("计算机", 30.0, 20.0),
    ("通信", 20.0, 15.0),
    ("建筑装饰", 8.0, 8.0),
    ("交通运输", 10.0, 8.0),
    ("公用事业", 12.0, 6.0),
    ("农林牧渔", 15.0, 10.0),
    ("商业贸易", 10.0, 8.0),
    ("休闲服务", 20.0, 15.0),
    ("纺织服装", 12.0, 8.0),
];

#[derive(Debug, Deserialize)]
struct TableDocument {
    #[serde(default)]
    pe: HashMap<String, f64>,
    #[serde(default)]
    growth: HashMap<String, f64>,
}

#[derive(Debug, Clone)]
pub struct IndustryTables {
    pe: HashMap<String, f64>,
    growth: HashMap<String, f64>,
}

impl Default for IndustryTables {
    fn default() -> Self {
        let mut pe = HashMap::new();
        let mut growth = HashMap::new();
        for (industry, industry_pe, industry_growth) in DEFAULTS {
            pe.insert(industry.to_string(), *industry_pe);
            growth.insert(industry.to_string(), *industry_growth);
        }
        Self { pe, growth }
    }
}

impl IndustryTables {
    /// Load replacement tables from a JSON document of the form
    /// `{"pe": {"银行": 6.5, ...}, "growth": {"银行": 8.0, ...}}`.
    /// Industries absent from the document fall back to the defaults.
    pub fn from_json(raw: &str) -> Result<Self> {
        let doc: TableDocument =
            serde_json::from_str(raw).context("industry table document is not valid JSON")?;
        let mut tables = Self::default();
        tables.pe.extend(doc.pe);
        tables.growth.extend(doc.growth);
        Ok(tables)
    }

    pub fn pe_for(&self, industry: Option<&str>) -> f64 {
        industry
            .and_then(|i| self.pe.get(i))
            .copied()
            .unwrap_or(DEFAULT_PE)
    }

    pub fn growth_for(&self, industry: Option<&str>) -> f64 {
        industry
            .and_then(|i| self.growth.get(i))
            .copied()
            .unwrap_or(DEFAULT_GROWTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_industries() {
        let tables = IndustryTables::default();
        assert_eq!(tables.pe_for(Some("银行")), 6.5);
        assert_eq!(tables.growth_for(Some("新能源")), 25.0);
    }

    #[test]
    fn test_unknown_industry_falls_back() {
        let tables = IndustryTables::default();
        assert_eq!(tables.pe_for(Some("元宇宙")), DEFAULT_PE);
        assert_eq!(tables.pe_for(None), DEFAULT_PE);
        assert_eq!(tables.growth_for(None), DEFAULT_GROWTH);
    }

    #[test]
    fn test_json_override_merges() {
        let tables =
            IndustryTables::from_json(r#"{"pe": {"银行": 5.0, "元宇宙": 60.0}}"#).unwrap();
        assert_eq!(tables.pe_for(Some("银行")), 5.0);
        assert_eq!(tables.pe_for(Some("元宇宙")), 60.0);
        // Untouched entries keep their defaults.
        assert_eq!(tables.pe_for(Some("白酒")), 28.0);
        assert_eq!(tables.growth_for(Some("银行")), 8.0);
    }

    #[test]
    fn test_bad_json_is_an_error() {
        assert!(IndustryTables::from_json("not json").is_err());
    }
}
