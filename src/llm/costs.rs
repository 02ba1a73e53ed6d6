use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// (input, output) USD per token for a model name. Unknown models price as Sonnet.
pub(crate) fn model_cost(model: &str) -> (Decimal, Decimal) {
    let model = model.to_ascii_lowercase();
    if model.contains("haiku") {
        (dec!(0.0000008), dec!(0.000004))
    } else if model.contains("opus") {
        (dec!(0.000015), dec!(0.000075))
    } else {
        (dec!(0.000003), dec!(0.000015))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_families_and_fallback() {
        assert_eq!(model_cost("claude-3-5-haiku-latest").0, dec!(0.0000008));
        assert_eq!(model_cost("Claude-Opus-4").1, dec!(0.000075));
        assert_eq!(model_cost("something-else"), model_cost("claude-sonnet-4-5"));
    }
}
