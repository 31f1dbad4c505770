use tracing::warn;
use whaleflow_ingestion::TokenBook;

/// Ethereum contract addresses for the tokens the poller can watch.
/// Symbols come from config; anything not listed here is skipped with a
/// warning rather than failing startup.
const ERC20_TOKENS: &[(&str, &str, u8)] = &[
    ("WETH", "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2", 18),
    ("WBTC", "0x2260fac5e5542a773aa44fbcfedf7c193bc2c599", 8),
    ("USDC", "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48", 6),
    ("USDT", "0xdac17f958d2ee523a2206206994597c13d831ec7", 6),
    ("DAI", "0x6b175474e89094c44da98b954eedeac495271d0f", 18),
    ("LINK", "0x514910771af9ca656af840dff83e8264ecf986ca", 18),
    ("UNI", "0x1f9840a85d5af5bf1d1762f925bdaddc4201f984", 18),
    ("PEPE", "0x6982508145454ce325ddbe47a25d4ec3d2311933", 18),
    ("SHIB", "0x95ad61b0a150d79219dcf64e1e6cc01f0b64c4ce", 18),
    ("MATIC", "0x7d1afa7b718fb893db30a3abc0cfc608aacfebb0", 18),
    ("ARB", "0x912ce59144191c1204e64559fe8253a0e49e6548", 18),
    ("OP", "0x4200000000000000000000000000000000000042", 18),
    ("AAVE", "0x7fc66500c84a76ad7e9c93437bfc5ac33e2ddae9", 18),
    ("CRV", "0xd533a949740bb3306d119cc777fa900ba034cd52", 18),
    ("SUSHI", "0x6b3595068778dd592e39a122f4f5a5cf09c90fe2", 18),
];

pub fn build_token_book() -> TokenBook {
    let mut book = TokenBook::default();
    for (symbol, address, decimals) in ERC20_TOKENS {
        book.insert(address, symbol, *decimals);
    }
    book
}

/// Resolve the configured watch list to contract addresses.
pub fn watched_contracts(symbols: &[String]) -> Vec<String> {
    let mut contracts = Vec::new();
    for symbol in symbols {
        let upper = symbol.to_ascii_uppercase();
        match ERC20_TOKENS
            .iter()
            .find(|(known, _, _)| *known == upper.as_str())
        {
            Some((_, address, _)) => contracts.push(address.to_string()),
            None => warn!(symbol = %upper, "watched token has no known contract, skipping"),
        }
    }
    contracts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_book_resolves_known_contracts() {
        let book = build_token_book();
        let (symbol, decimals) = book
            .get("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48")
            .expect("usdc");
        assert_eq!(symbol, "USDC");
        assert_eq!(decimals, 6);
    }

    #[test]
    fn watch_list_skips_unknown_symbols() {
        let contracts = watched_contracts(&[
            "weth".to_string(),
            "NOSUCHTOKEN".to_string(),
            "PEPE".to_string(),
        ]);
        assert_eq!(contracts.len(), 2);
    }
}
