use super::domain::{number_of, CalculationStep, ResolutionContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sign {
    Plus,
    Minus,
    Multiply,
    Divide,
}

impl Sign {
    fn parse(raw: Option<&str>) -> Option<Self> {
        match raw.map(str::to_ascii_lowercase).as_deref() {
            None | Some("plus") => Some(Self::Plus),
            Some("minus") => Some(Self::Minus),
            Some("multiply") => Some(Self::Multiply),
            Some("divide") => Some(Self::Divide),
            Some(_) => None,
        }
    }
}

fn operand(step: &CalculationStep, context: &ResolutionContext) -> f64 {
    if let Some(code) = &step.field_calculate {
        return context.number(code);
    }
    if let Some(code) = &step.key_calculate {
        return context.number(code);
    }
    step.literal().and_then(number_of).unwrap_or(0.0)
}

/// Folds a calculated field's rows in `key_calculate_order`.
///
/// The first row seeds the accumulator without applying its sign. Later rows fold left to
/// right; division by zero and unknown signs leave the total untouched. Missing references
/// count as zero. The result is rounded to two decimals.
pub fn evaluate(steps: &[CalculationStep], context: &ResolutionContext) -> f64 {
    let mut ordered: Vec<&CalculationStep> = steps.iter().collect();
    ordered.sort_by(|a, b| a.order().total_cmp(&b.order()));

    let mut rows = ordered.into_iter();
    let Some(first) = rows.next() else {
        return 0.0;
    };
    let mut total = operand(first, context);

    for step in rows {
        let value = operand(step, context);
        match Sign::parse(step.calculate_sign.as_deref()) {
            Some(Sign::Plus) => total += value,
            Some(Sign::Minus) => total -= value,
            Some(Sign::Multiply) => total *= value,
            Some(Sign::Divide) if value != 0.0 => total /= value,
            Some(Sign::Divide) | None => {}
        }
    }

    round2(total)
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
