use anyhow::{Context, Result};
use chrono::Utc;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use whaleflow_core_types::{AddressLabel, Chain, LabelKind};

/// Built-in address book: the hot wallets and protocol contracts that
/// account for the bulk of classified volume. Overlayable via a config
/// file; runtime corrections go through the label store.
const EMBEDDED: &[(&str, Chain, LabelKind, &str)] = &[
    // Binance hot wallets
    ("0x28c6c06298d514db089934071355e5743bf21d60", Chain::Ethereum, LabelKind::Cex, "binance"),
    ("0xdfd5293d8e347dfe59e90efd55b2956a1343963d", Chain::Ethereum, LabelKind::Cex, "binance"),
    ("0x5a52e96bacdabb82fd05763e25335261b270efcb", Chain::Ethereum, LabelKind::Cex, "binance"),
    ("0x3f5ce5fbfe3e9af3971dd833d26ba9b5c936f0be", Chain::Ethereum, LabelKind::Cex, "binance"),
    ("0x85b931a32a0725be14285b66f1a22178c672d69b", Chain::Ethereum, LabelKind::Cex, "binance"),
    ("0x708396f17127c42383e3b9014072679b2f60b82f", Chain::Ethereum, LabelKind::Cex, "binance"),
    ("0xe0f0cfde7ee664943906f17f7f14342e76a5cec7", Chain::Ethereum, LabelKind::Cex, "binance"),
    ("0x21a31ee1afc51d94c2efccaa2092ad1028285549", Chain::Ethereum, LabelKind::Cex, "binance"),
    // Coinbase
    ("0x71660c4005ba85c37ccec55d0c4493e66fe775d3", Chain::Ethereum, LabelKind::Cex, "coinbase"),
    ("0x503828976d22510aad0201ac7ec88293211d23da", Chain::Ethereum, LabelKind::Cex, "coinbase"),
    ("0xddfabcdc4d8ffc6d5beaf154f18b778f892a0740", Chain::Ethereum, LabelKind::Cex, "coinbase"),
    ("0xa090e606e30bd747d4e6245a1517ebe430f0057e", Chain::Ethereum, LabelKind::Cex, "coinbase"),
    ("0xf6c0aa7ebfe9992200c67e5388e546f7d1362713", Chain::Ethereum, LabelKind::Cex, "coinbase"),
    ("0x58553f5c5e55f2393cf6e65527847aef599e4a46", Chain::Ethereum, LabelKind::Cex, "coinbase"),
    // Kraken
    ("0x2910543af39aba0cd09dbb2d50200b3e800a63d2", Chain::Ethereum, LabelKind::Cex, "kraken"),
    ("0x0a869d79a7052c7f1b55a8ebabbea3420f0d1e13", Chain::Ethereum, LabelKind::Cex, "kraken"),
    ("0xa83b11093c858c86321fbc4c20fe82cdbd58e09e", Chain::Ethereum, LabelKind::Cex, "kraken"),
    ("0x267be1c1d684f78cb4f6a176c4911b741e4ffdc0", Chain::Ethereum, LabelKind::Cex, "kraken"),
    ("0x53d284357ec70ce289d6d64134dfac8e511c8a3d", Chain::Ethereum, LabelKind::Cex, "kraken"),
    // OKX
    ("0x6cc5f688a315f3dc28a7781717a9a798a59fda7b", Chain::Ethereum, LabelKind::Cex, "okx"),
    ("0x236f9f97e0e62388479bf9e5ba4889e46b0273c3", Chain::Ethereum, LabelKind::Cex, "okx"),
    ("0x5041ed759dd4afc3a72b8192c143f72f4724081a", Chain::Ethereum, LabelKind::Cex, "okx"),
    // Solana exchange wallets
    ("5q544fkrfoe6tsebd7s8emxgtjyaktvhaw5q5pge4j1", Chain::Solana, LabelKind::Cex, "binance"),
    ("6qejkdv8nhhc4pucap3v6n5h5oshuqr1xcehuax8e9bl", Chain::Solana, LabelKind::Cex, "binance"),
    ("3z4oltsytjw5k2sgeyidebykerbym6snajqm5kmqozxd", Chain::Solana, LabelKind::Cex, "okx"),
    ("hssav4subdfgaybuwzwdk1rr14fnq73bcf3kam7rrkbf", Chain::Solana, LabelKind::Cex, "kraken"),
    // XRP exchange wallets
    ("rlnapokeebjze2qs6x52yvpzpz8td4dc6w", Chain::Xrp, LabelKind::Cex, "binance"),
    ("reb8tk3gbgk5auzkwc6shnwrgvjh8dualh", Chain::Xrp, LabelKind::Cex, "binance"),
    ("rnqemjw3saoxpyue4gr9c1js5ezk3cvumj", Chain::Xrp, LabelKind::Cex, "coinbase"),
    // DEX routers and aggregators
    ("0x7a250d5630b4cf539739df2c5dacb4c659f2488d", Chain::Ethereum, LabelKind::Dex, "uniswap"),
    ("0xe592427a0aece92de3edee1f18e0157c05861564", Chain::Ethereum, LabelKind::Dex, "uniswap"),
    ("0x68b3465833fb72a70ecdf485e0e4c7bd8665fc45", Chain::Ethereum, LabelKind::Dex, "uniswap"),
    ("0xd9e1ce17f2641f24ae83637ab66a2cca9c378b9f", Chain::Ethereum, LabelKind::Dex, "sushiswap"),
    ("0x1b02da8cb0d097eb8d57a175b88c7d8b47997506", Chain::Ethereum, LabelKind::Dex, "sushiswap"),
    ("0x99a58482bd75cbab83b27ec03ca68ff489b5788f", Chain::Ethereum, LabelKind::Dex, "curve"),
    ("0xbebc44782c7db0a1a60cb6fe97d0b483032ff1c7", Chain::Ethereum, LabelKind::Dex, "curve"),
    ("0xba12222222228d8ba445958a75a0704d566bf2c8", Chain::Ethereum, LabelKind::Dex, "balancer"),
    ("0x1111111254fb6c44bac0bed2854e76f90643097d", Chain::Ethereum, LabelKind::Dex, "1inch"),
    ("0x1111111254eeb25477b68fb85ed929f73a960582", Chain::Ethereum, LabelKind::Dex, "1inch"),
    ("0xdef171fe48cf0115b1d80b88dc8eab59176fee57", Chain::Ethereum, LabelKind::Dex, "paraswap"),
    ("0xdef1c0ded9bec7f1a1670819833240f027b25eff", Chain::Ethereum, LabelKind::Dex, "0x"),
    // Bridges
    ("0x8315177ab297ba92a06054ce80a67ed4dbd7ed3a", Chain::Ethereum, LabelKind::Bridge, "arbitrum"),
    ("0x99c9fc46f92e8a1c0dec1b1747d010903e884be1", Chain::Ethereum, LabelKind::Bridge, "optimism"),
    ("0xa0c68c638235ee32657e8f720a23cec1bfc77c77", Chain::Ethereum, LabelKind::Bridge, "polygon"),
    ("0x3ee18b2214aff97000d974cf647e7c347e8fa585", Chain::Ethereum, LabelKind::Bridge, "wormhole"),
    // Lending / staking
    ("0x87870bca3f3fd6335c3f4ce8392d69350b4fa4e2", Chain::Ethereum, LabelKind::Lending, "aave"),
    ("0xc3d688b66703497daa19211eedff47f25384cdc3", Chain::Ethereum, LabelKind::Lending, "compound"),
    ("0xae7ab96520de3a18e5e111b5eaab095312d7fe84", Chain::Ethereum, LabelKind::Staking, "lido"),
    ("0x00000000219ab540356cbb839cbe05303d7705fa", Chain::Ethereum, LabelKind::Staking, "beacon deposit"),
];

pub fn embedded_labels() -> Vec<AddressLabel> {
    let now = Utc::now();
    EMBEDDED
        .iter()
        .map(|(address, chain, kind, entity)| AddressLabel {
            address: address.to_string(),
            chain: *chain,
            kind: *kind,
            entity_name: Some(entity.to_string()),
            confidence: 0.95,
            updated_at: now,
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct OverlayEntry {
    address: String,
    chain: Chain,
    kind: LabelKind,
    entity_name: Option<String>,
    #[serde(default = "default_overlay_confidence")]
    confidence: f64,
}

fn default_overlay_confidence() -> f64 {
    0.95
}

/// Load operator-provided label overrides from a JSON array file.
pub fn load_overlay(path: &Path) -> Result<Vec<AddressLabel>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read label overlay: {}", path.display()))?;
    let entries: Vec<OverlayEntry> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse label overlay: {}", path.display()))?;
    let now = Utc::now();
    Ok(entries
        .into_iter()
        .map(|entry| AddressLabel {
            address: entry.address.to_ascii_lowercase(),
            chain: entry.chain,
            kind: entry.kind,
            entity_name: entry.entity_name,
            confidence: entry.confidence.clamp(0.0, 1.0),
            updated_at: now,
        })
        .collect())
}
