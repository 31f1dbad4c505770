pub(crate) mod alert_feed;
pub(crate) mod log_stream;
pub(crate) mod receipt_poller;
pub(crate) mod rpc_parser;

use std::collections::HashMap;

/// Token metadata keyed by lowercased contract address.
#[derive(Debug, Clone, Default)]
pub struct TokenBook {
    tokens: HashMap<String, (String, u8)>,
}

impl TokenBook {
    pub fn insert(&mut self, address: &str, symbol: &str, decimals: u8) {
        self.tokens.insert(
            address.to_ascii_lowercase(),
            (symbol.to_ascii_uppercase(), decimals),
        );
    }

    pub fn get(&self, address: &str) -> Option<(&str, u8)> {
        self.tokens
            .get(&address.to_ascii_lowercase())
            .map(|(symbol, decimals)| (symbol.as_str(), *decimals))
    }
}
