use whaleflow_core_types::LabelKind;

/// Exact CEX entity names, checked before any keyword class.
const CEX_ENTITIES: [&str; 16] = [
    "binance", "coinbase", "kraken", "okx", "bybit", "huobi", "kucoin", "gate.io", "gateio",
    "bitfinex", "gemini", "bitstamp", "crypto.com", "upbit", "bithumb", "mexc",
];

const DEX_KEYWORDS: [&str; 12] = [
    "uniswap", "sushiswap", "pancakeswap", "curve", "balancer", "1inch", "paraswap", "router",
    "swap", "aggregator", "0x proxy", "dex",
];

const BRIDGE_KEYWORDS: [&str; 6] = [
    "bridge", "wormhole", "portal", "across", "hop protocol", "stargate",
];

const LENDING_KEYWORDS: [&str; 5] = ["aave", "compound", "maker", "lending", "morpho"];

const STAKING_KEYWORDS: [&str; 5] = ["lido", "rocket pool", "staking", "stake", "beacon deposit"];

const YIELD_KEYWORDS: [&str; 4] = ["yearn", "vault", "harvest", "yield"];

const MEV_KEYWORDS: [&str; 3] = ["mev", "flashbots", "sandwich"];

const MIXER_KEYWORDS: [&str; 3] = ["tornado", "mixer", "tumbler"];

/// Infer an address kind from a raw explorer label string.
///
/// Prioritized: exact CEX entity match at 0.95, keyword classes at 0.80,
/// broad category heuristics at 0.60. First match wins.
pub fn infer_kind(raw_label: &str) -> Option<(LabelKind, Option<String>, f64)> {
    let lowered = raw_label.trim().to_ascii_lowercase();
    if lowered.is_empty() {
        return None;
    }

    for entity in CEX_ENTITIES {
        if lowered == entity || lowered.starts_with(&format!("{entity} ")) {
            return Some((LabelKind::Cex, Some(entity.to_string()), 0.95));
        }
    }
    for entity in CEX_ENTITIES {
        if lowered.contains(entity) {
            return Some((LabelKind::Cex, Some(entity.to_string()), 0.80));
        }
    }

    for keyword in DEX_KEYWORDS {
        if lowered.contains(keyword) {
            let entity = named_dex_entity(&lowered);
            let confidence = if entity.is_some() { 0.80 } else { 0.60 };
            return Some((LabelKind::Dex, entity, confidence));
        }
    }
    for keyword in BRIDGE_KEYWORDS {
        if lowered.contains(keyword) {
            return Some((LabelKind::Bridge, None, 0.60));
        }
    }
    for keyword in LENDING_KEYWORDS {
        if lowered.contains(keyword) {
            return Some((LabelKind::Lending, None, 0.60));
        }
    }
    for keyword in STAKING_KEYWORDS {
        if lowered.contains(keyword) {
            return Some((LabelKind::Staking, None, 0.60));
        }
    }
    for keyword in YIELD_KEYWORDS {
        if lowered.contains(keyword) {
            return Some((LabelKind::Yield, None, 0.60));
        }
    }
    for keyword in MEV_KEYWORDS {
        if lowered.contains(keyword) {
            return Some((LabelKind::Mev, None, 0.60));
        }
    }
    for keyword in MIXER_KEYWORDS {
        if lowered.contains(keyword) {
            return Some((LabelKind::Mixer, None, 0.60));
        }
    }

    None
}

fn named_dex_entity(lowered: &str) -> Option<String> {
    for name in [
        "uniswap",
        "sushiswap",
        "pancakeswap",
        "curve",
        "balancer",
        "1inch",
        "paraswap",
    ] {
        if lowered.contains(name) {
            return Some(name.to_string());
        }
    }
    None
}
