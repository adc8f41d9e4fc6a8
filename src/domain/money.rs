//! Integer minor-unit arithmetic.

/// Divides `numerator` by a positive `denominator`, rounding half away from
/// zero, and saturates into `i64`.
#[must_use]
pub fn round_div(numerator: i128, denominator: i128) -> i64 {
    if denominator <= 0 {
        return 0;
    }
    let half = denominator / 2;
    let rounded = if numerator >= 0 {
        (numerator + half) / denominator
    } else {
        -((-numerator + half) / denominator)
    };
    i64::try_from(rounded).unwrap_or(if rounded > 0 { i64::MAX } else { i64::MIN })
}

/// `round(amount * permille / 1000)`.
#[must_use]
pub fn apply_permille(amount: i64, permille: i64) -> i64 {
    round_div(i128::from(amount) * i128::from(permille), 1000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_half_away_from_zero() {
        assert_eq!(round_div(5, 10), 1);
        assert_eq!(round_div(4, 10), 0);
        assert_eq!(round_div(-5, 10), -1);
        assert_eq!(round_div(15, 10), 2);
    }

    #[test]
    fn permille_edges() {
        assert_eq!(apply_permille(13000, 1000), 13000);
        assert_eq!(apply_permille(13000, 100), 1300);
        // 1499 * 1 / 1000 = 1.499
        assert_eq!(apply_permille(1499, 1), 1);
        assert_eq!(apply_permille(499, 1), 0);
        assert_eq!(apply_permille(500, 1), 1);
    }

    #[test]
    fn zero_denominator_is_zero() {
        assert_eq!(round_div(10, 0), 0);
    }
}
