use whaleflow_core_types::{Classification, EnrichedTransfer, LabelKind};

/// The `(whale, counterparty)` projection of a classified transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct PerspectiveView {
    pub whale_address: Option<String>,
    pub counterparty_address: Option<String>,
    pub counterparty_kind: LabelKind,
    pub is_cex_transaction: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PerspectiveAction {
    Store(PerspectiveView),
    /// Exchange-internal moves never reach storage.
    Drop { reason: String },
}

/// Collapse `(from, to)` into whale and counterparty. Exchanges are
/// never the whale; when both sides are exchanges the event is dropped.
pub fn perspectivize(
    transfer: &EnrichedTransfer,
    _classification: &Classification,
) -> PerspectiveAction {
    let from_kind = transfer
        .from_label
        .as_ref()
        .map(|label| label.kind)
        .unwrap_or(LabelKind::Unknown);
    let to_kind = transfer
        .to_label
        .as_ref()
        .map(|label| label.kind)
        .unwrap_or(LabelKind::Unknown);
    let from = transfer.raw.from_addr.clone();
    let to = transfer.raw.to_addr.clone();

    let view = match (from_kind, to_kind) {
        (LabelKind::Cex, LabelKind::Cex) => {
            return PerspectiveAction::Drop {
                reason: "exchange-to-exchange move".to_string(),
            }
        }
        (LabelKind::Cex, _) => PerspectiveView {
            whale_address: Some(to),
            counterparty_address: Some(from),
            counterparty_kind: LabelKind::Cex,
            is_cex_transaction: true,
        },
        (_, LabelKind::Cex) => PerspectiveView {
            whale_address: Some(from),
            counterparty_address: Some(to),
            counterparty_kind: LabelKind::Cex,
            is_cex_transaction: true,
        },
        // router on either side: the wallet is the whale regardless of
        // whether the classification asserted a direction
        (LabelKind::Dex, _) => PerspectiveView {
            whale_address: Some(to),
            counterparty_address: Some(from),
            counterparty_kind: LabelKind::Dex,
            is_cex_transaction: false,
        },
        (_, LabelKind::Dex) => PerspectiveView {
            whale_address: Some(from),
            counterparty_address: Some(to),
            counterparty_kind: LabelKind::Dex,
            is_cex_transaction: false,
        },
        (from_kind, to_kind) if from_kind.is_walletish() => PerspectiveView {
            whale_address: Some(from),
            counterparty_address: Some(to),
            counterparty_kind: to_kind,
            is_cex_transaction: false,
        },
        (from_kind, to_kind) if to_kind.is_walletish() => PerspectiveView {
            whale_address: Some(to),
            counterparty_address: Some(from),
            counterparty_kind: from_kind,
            is_cex_transaction: false,
        },
        (_, to_kind) => PerspectiveView {
            whale_address: None,
            counterparty_address: Some(to),
            counterparty_kind: to_kind,
            is_cex_transaction: false,
        },
    };

    PerspectiveAction::Store(view)
}
