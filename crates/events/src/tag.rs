//! Human-readable type tags for event-log entries.

/// Derive the log tag of an event kind name.
///
/// An underscore goes before every uppercase letter except the first
/// character, then the whole name is lowercased: `OrderPlaced` becomes
/// `order_placed` and `PaymentReceivedV2` becomes `payment_received_v2`.
/// Digits never get an underscore of their own.
pub fn event_tag(kind: &str) -> String {
    let mut tag = String::with_capacity(kind.len() + 4);
    for (idx, ch) in kind.chars().enumerate() {
        if idx > 0 && ch.is_uppercase() {
            tag.push('_');
        }
        tag.extend(ch.to_lowercase());
    }
    tag
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn splits_words_on_uppercase() {
        assert_eq!(event_tag("OrderPlaced"), "order_placed");
        assert_eq!(event_tag("LineQuantityChanged"), "line_quantity_changed");
    }

    #[test]
    fn digits_stay_attached() {
        assert_eq!(event_tag("PaymentReceivedV2"), "payment_received_v2");
        assert_eq!(event_tag("E1"), "e1");
        assert_eq!(event_tag("Step2Done"), "step2_done");
    }

    #[test]
    fn every_capital_is_split_even_in_acronyms() {
        assert_eq!(event_tag("SKUAdded"), "s_k_u_added");
    }

    #[test]
    fn degenerate_inputs() {
        assert_eq!(event_tag(""), "");
        assert_eq!(event_tag("A"), "a");
        assert_eq!(event_tag("already_lower"), "already_lower");
    }

    proptest! {
        #[test]
        fn tag_is_lowercase_and_loses_only_underscores(kind in "[A-Z][A-Za-z0-9]{0,24}") {
            let tag = event_tag(&kind);

            prop_assert!(!tag.chars().any(|c| c.is_uppercase()));
            prop_assert!(!tag.starts_with('_'));
            prop_assert_eq!(tag.replace('_', ""), kind.to_lowercase());
            prop_assert_eq!(
                tag.matches('_').count(),
                kind.chars().skip(1).filter(|c| c.is_uppercase()).count()
            );
        }
    }
}
