use whaleflow_core_types::{ClassificationKind, LabelKind};

/// How two records can describe the same economic event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DupePattern {
    /// The same trade reported from opposite perspectives.
    Mirror,
    /// A bare transfer shadowing a classified trade.
    Shadow,
    /// Same kind, different counterparty category.
    CounterpartyMismatch,
    /// Same kind, contradictory exchange flag.
    CexFlagMismatch,
}

impl DupePattern {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mirror => "mirror_trade",
            Self::Shadow => "transfer_shadow",
            Self::CounterpartyMismatch => "counterparty_mismatch",
            Self::CexFlagMismatch => "cex_flag_mismatch",
        }
    }
}

/// Absolute-or-relative USD tolerance. Two different whales moving the
/// same round number seconds apart is common; the relative bound keeps
/// the absolute one honest at large sizes.
pub fn is_usd_match(a: f64, b: f64, usd_threshold: f64, percentage_threshold: f64) -> bool {
    let diff = (a - b).abs();
    if diff <= usd_threshold {
        return true;
    }
    let larger = a.max(b);
    larger > 0.0 && diff / larger <= percentage_threshold
}

pub fn detect_pattern(
    a_kind: ClassificationKind,
    b_kind: ClassificationKind,
    a_counterparty: LabelKind,
    b_counterparty: LabelKind,
    a_is_cex: bool,
    b_is_cex: bool,
) -> Option<DupePattern> {
    let a_dir = a_kind.direction();
    let b_dir = b_kind.direction();

    if let (Some(a_dir), Some(b_dir)) = (a_dir, b_dir) {
        if a_dir != b_dir {
            return Some(DupePattern::Mirror);
        }
    }

    let a_transfer = a_kind == ClassificationKind::Transfer;
    let b_transfer = b_kind == ClassificationKind::Transfer;
    if (a_transfer && b_dir.is_some()) || (b_transfer && a_dir.is_some()) {
        return Some(DupePattern::Shadow);
    }

    if a_kind == b_kind {
        if a_counterparty != b_counterparty {
            return Some(DupePattern::CounterpartyMismatch);
        }
        if a_is_cex != b_is_cex {
            return Some(DupePattern::CexFlagMismatch);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usd_match_absolute_and_relative() {
        assert!(is_usd_match(100_000.0, 100_004.0, 5.0, 0.0015));
        assert!(!is_usd_match(100_000.0, 100_006.0, 5.0, 0.0));
        // $150 apart on $1M is within 0.015%
        assert!(is_usd_match(1_000_000.0, 1_000_150.0, 5.0, 0.0015));
        assert!(!is_usd_match(1_000_000.0, 1_010_000.0, 5.0, 0.0015));
        assert!(!is_usd_match(0.0, 0.0001, 0.00001, 0.0015));
    }

    #[test]
    fn mirror_requires_opposite_directions() {
        assert_eq!(
            detect_pattern(
                ClassificationKind::Buy,
                ClassificationKind::Sell,
                LabelKind::Cex,
                LabelKind::Cex,
                true,
                true,
            ),
            Some(DupePattern::Mirror)
        );
        assert_eq!(
            detect_pattern(
                ClassificationKind::ModerateBuy,
                ClassificationKind::Sell,
                LabelKind::Cex,
                LabelKind::Cex,
                true,
                true,
            ),
            Some(DupePattern::Mirror),
            "moderate kinds carry the same direction"
        );
    }

    #[test]
    fn shadow_pairs_transfer_with_a_trade() {
        assert_eq!(
            detect_pattern(
                ClassificationKind::Transfer,
                ClassificationKind::Buy,
                LabelKind::Eoa,
                LabelKind::Cex,
                false,
                true,
            ),
            Some(DupePattern::Shadow)
        );
    }

    #[test]
    fn same_kind_mismatches() {
        assert_eq!(
            detect_pattern(
                ClassificationKind::Sell,
                ClassificationKind::Sell,
                LabelKind::Cex,
                LabelKind::Dex,
                true,
                false,
            ),
            Some(DupePattern::CounterpartyMismatch)
        );
        assert_eq!(
            detect_pattern(
                ClassificationKind::Sell,
                ClassificationKind::Sell,
                LabelKind::Cex,
                LabelKind::Cex,
                true,
                false,
            ),
            Some(DupePattern::CexFlagMismatch)
        );
    }

    #[test]
    fn agreeing_records_do_not_match() {
        assert_eq!(
            detect_pattern(
                ClassificationKind::Sell,
                ClassificationKind::Sell,
                LabelKind::Cex,
                LabelKind::Cex,
                true,
                true,
            ),
            None
        );
        assert_eq!(
            detect_pattern(
                ClassificationKind::Transfer,
                ClassificationKind::Transfer,
                LabelKind::Eoa,
                LabelKind::Eoa,
                false,
                false,
            ),
            None
        );
    }
}
