//! ConverterRegistry - (source, target) ペアから converter を引く
//!
//! # 学習ポイント
//! - HashMap<ConversionPair, Arc<dyn Converter>> での trait object 管理
//! - 登録は all-or-nothing（一つでも重複があれば何も登録しない）

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::domain::format::{ConversionPair, Format};

use super::Converter;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("conversion {pair} is already handled by '{existing}'")]
    AlreadyRegistered {
        pair: ConversionPair,
        existing: String,
    },
}

#[derive(Default, Clone)]
pub struct ConverterRegistry {
    converters: HashMap<ConversionPair, Arc<dyn Converter>>,
}

impl ConverterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, converter: Arc<dyn Converter>) -> Result<(), RegistryError> {
        let pairs = converter.pairs();
        if let Some((pair, existing)) = pairs
            .iter()
            .find_map(|pair| self.converters.get_key_value(pair))
        {
            return Err(RegistryError::AlreadyRegistered {
                pair: pair.clone(),
                existing: existing.name().to_string(),
            });
        }
        for pair in pairs {
            self.converters.insert(pair, converter.clone());
        }
        Ok(())
    }

    pub fn resolve(&self, pair: &ConversionPair) -> Option<Arc<dyn Converter>> {
        self.converters.get(pair).cloned()
    }

    pub fn supports(&self, pair: &ConversionPair) -> bool {
        self.converters.contains_key(pair)
    }

    /// Every format that appears as a conversion output.
    pub fn targets(&self) -> BTreeSet<Format> {
        self.converters
            .keys()
            .map(|pair| pair.target.clone())
            .collect()
    }
}
