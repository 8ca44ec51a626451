use eyre::Context as _;

/// Ledger amounts are fixed-point with 7 decimal places ("stroops").
pub const AMOUNT_DECIMALS: u32 = 7;

/// Maximum representable amount: `i64::MAX` stroops.
pub const MAX_AMOUNT: &str = "922337203685.4775807";

/// Parse a decimal amount string into stroops without going through floats.
pub fn parse_amount_to_stroops(s: &str) -> eyre::Result<i64> {
    let s = s.trim();
    if s.is_empty() {
        eyre::bail!("empty amount");
    }

    let (whole, frac) = match s.split_once('.') {
        Some((a, b)) => (a, b),
        None => (s, ""),
    };

    if whole.starts_with('-') {
        eyre::bail!("amount must be positive");
    }

    let whole_v: i64 = if whole.is_empty() {
        0
    } else {
        whole.parse().context("parse whole part")?
    };

    if frac.len() > AMOUNT_DECIMALS as usize {
        eyre::bail!("too many decimal places (max {AMOUNT_DECIMALS})");
    }

    let mut frac_s = frac.to_owned();
    while frac_s.len() < AMOUNT_DECIMALS as usize {
        frac_s.push('0');
    }
    let frac_v: i64 = if frac_s.is_empty() {
        0
    } else {
        frac_s.parse().context("parse fractional part")?
    };

    let scale = 10_i64.pow(AMOUNT_DECIMALS);
    let stroops = whole_v
        .checked_mul(scale)
        .and_then(|x| x.checked_add(frac_v))
        .ok_or_else(|| eyre::eyre!("amount overflow"))?;

    if stroops == 0 {
        eyre::bail!("amount must be positive");
    }
    Ok(stroops)
}

/// Format stroops back into the canonical decimal string.
pub fn format_stroops(stroops: i64) -> String {
    let scale = 10_i64.pow(AMOUNT_DECIMALS);
    let whole = stroops / scale;
    let frac = stroops % scale;
    if frac == 0 {
        return whole.to_string();
    }
    let mut frac_s = format!("{frac:07}");
    while frac_s.ends_with('0') {
        frac_s.pop();
    }
    format!("{whole}.{frac_s}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_whole_and_fractional_amounts() -> eyre::Result<()> {
        assert_eq!(parse_amount_to_stroops("1")?, 10_000_000);
        assert_eq!(parse_amount_to_stroops("1.5")?, 15_000_000);
        assert_eq!(parse_amount_to_stroops("0.0000001")?, 1);
        assert_eq!(parse_amount_to_stroops(MAX_AMOUNT)?, i64::MAX);
        Ok(())
    }

    #[test]
    fn rejects_bad_amounts() {
        assert!(parse_amount_to_stroops("").is_err());
        assert!(parse_amount_to_stroops("0").is_err());
        assert!(parse_amount_to_stroops("-1").is_err());
        assert!(parse_amount_to_stroops("1.00000001").is_err());
        assert!(parse_amount_to_stroops("not a number").is_err());
        assert!(parse_amount_to_stroops("922337203685.4775808").is_err());
    }

    #[test]
    fn formats_canonically() {
        assert_eq!(format_stroops(15_000_000), "1.5");
        assert_eq!(format_stroops(10_000_000), "1");
        assert_eq!(format_stroops(1), "0.0000001");
        assert_eq!(format_stroops(i64::MAX), MAX_AMOUNT);
    }
}
